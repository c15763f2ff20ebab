//! Durable portfolio snapshots
//!
//! The snapshot is pretty-printed JSON at a fixed path. Writes go to a
//! sibling `.tmp` file which is flushed to disk and renamed over the live
//! file, so readers only ever see a complete snapshot.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::journal::TradeJournal;
use super::PortfolioState;
use crate::error::PersistenceError;
use crate::slippage::SlippageRecord;
use crate::types::ClosedTrade;

pub struct PortfolioStore {
    path: PathBuf,
    journal: Option<TradeJournal>,
}

impl PortfolioStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: TradeJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn journal(&self) -> Option<&TradeJournal> {
        self.journal.as_ref()
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "portfolio".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Load the last snapshot, or a fresh state when none exists
    pub fn load(&self, initial_balance: f64) -> Result<PortfolioState, PersistenceError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(
                    "No portfolio snapshot at {}, starting with balance {:.2}",
                    self.path.display(),
                    initial_balance
                );
                return Ok(PortfolioState::new(initial_balance));
            }
            Err(e) => return Err(PersistenceError::io(&self.path, e)),
        };

        let state: PortfolioState = serde_json::from_str(&contents)?;
        info!(
            "📂 Portfolio restored: balance {:.2}, {} open, {} trades",
            state.balance,
            state.open_positions.len(),
            state.total_trades
        );
        Ok(state)
    }

    /// Write the snapshot atomically
    pub fn snapshot(&self, state: &PortfolioState) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(state)?;
        let temp = self.temp_path();
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&temp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp, &self.path)
        };

        if let Err(e) = write() {
            if let Err(cleanup) = fs::remove_file(&temp) {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!("Could not remove {}: {}", temp.display(), cleanup);
                }
            }
            return Err(PersistenceError::io(&self.path, e));
        }

        debug!("Portfolio saved to {}", self.path.display());
        Ok(())
    }

    /// Append a closed trade to the journal, when one is configured
    pub fn record_trade(&self, trade: &ClosedTrade) -> Result<(), PersistenceError> {
        match &self.journal {
            Some(journal) => journal.record_trade(trade),
            None => Ok(()),
        }
    }

    pub fn record_slippage(&self, record: &SlippageRecord) -> Result<(), PersistenceError> {
        match &self.journal {
            Some(journal) => journal.record_slippage(record),
            None => Ok(()),
        }
    }
}
