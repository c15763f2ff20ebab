//! Execution slippage tracking
//!
//! Every live fill is compared with the price the engine acted on:
//!
//! ```text
//! slippage % = (executed - expected) / expected * 100
//! ```
//!
//! The tracker keeps the most recent records in memory for the status
//! summary; the trade journal keeps all of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use crate::types::{Side, Symbol};

pub const DEFAULT_SLIPPAGE_HISTORY: usize = 100;

/// Percent difference between the executed and the expected price
pub fn slippage_pct(expected: f64, executed: f64) -> Option<f64> {
    let valid = |p: f64| p.is_finite() && p > 0.0;
    (valid(expected) && valid(executed)).then(|| (executed - expected) / expected * 100.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlippageRecord {
    pub symbol: Symbol,
    pub side: Side,
    pub expected_price: f64,
    pub executed_price: f64,
    pub slippage_pct: f64,
    pub time: DateTime<Utc>,
}

impl SlippageRecord {
    pub fn new(
        symbol: Symbol,
        side: Side,
        expected_price: f64,
        executed_price: f64,
        time: DateTime<Utc>,
    ) -> Option<Self> {
        let slippage_pct = slippage_pct(expected_price, executed_price)?;
        Some(Self {
            symbol,
            side,
            expected_price,
            executed_price,
            slippage_pct,
            time,
        })
    }

    /// A BUY filled above, or a SELL filled below, the expected price
    pub fn is_adverse(&self) -> bool {
        match self.side {
            Side::Buy => self.slippage_pct > 0.0,
            Side::Sell => self.slippage_pct < 0.0,
        }
    }
}

/// Aggregate over a set of records
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SlippageStats {
    pub count: u64,
    pub average_pct: f64,
    pub min_pct: f64,
    pub max_pct: f64,
}

impl SlippageStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a SlippageRecord>) -> Self {
        let mut stats = Self::default();
        let mut sum = 0.0;
        for record in records {
            let pct = record.slippage_pct;
            if stats.count == 0 {
                stats.min_pct = pct;
                stats.max_pct = pct;
            } else {
                stats.min_pct = stats.min_pct.min(pct);
                stats.max_pct = stats.max_pct.max(pct);
            }
            sum += pct;
            stats.count += 1;
        }
        if stats.count > 0 {
            stats.average_pct = sum / stats.count as f64;
        }
        stats
    }
}

/// Bounded in-memory slippage history, shared by the entry and close paths
#[derive(Debug, Clone)]
pub struct SlippageTracker {
    history: Arc<Mutex<VecDeque<SlippageRecord>>>,
    capacity: usize,
    max_acceptable_pct: f64,
}

impl SlippageTracker {
    pub fn new(capacity: usize, max_acceptable_pct: f64) -> Self {
        Self {
            history: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
            max_acceptable_pct,
        }
    }

    pub fn max_acceptable_pct(&self) -> f64 {
        self.max_acceptable_pct
    }

    /// Slippage beyond the threshold in either direction
    pub fn exceeds_threshold(&self, record: &SlippageRecord) -> bool {
        record.slippage_pct.abs() > self.max_acceptable_pct
    }

    pub fn record(&self, record: SlippageRecord) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(record);
    }

    pub fn stats(&self) -> SlippageStats {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        SlippageStats::from_records(history.iter())
    }

    /// Most recent records, newest last
    pub fn recent(&self, limit: usize) -> Vec<SlippageRecord> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SlippageTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SLIPPAGE_HISTORY, 0.2)
    }
}
