//! Portfolio aggregate and its single-writer handle
//!
//! [`PortfolioState`] is plain data: balance, open positions, bounded closed
//! trade history and counters. [`Portfolio`] owns it behind one async lock
//! and exposes commands (open, close, update levels, snapshot); nothing else
//! mutates portfolio fields.
//!
//! Accounting:
//! - open debits `net_invested`
//! - close credits `net_invested + net_pnl`
//!
//! Every open and close is persisted before the lock is released.

pub mod journal;
pub mod store;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{PersistenceError, PositionError};
use crate::risk::{EntryRejection, RiskGate};
use crate::types::{ClosedTrade, ExitReason, Position, Symbol};

pub use journal::{JournalEntry, TradeJournal};
pub use store::PortfolioStore;

/// Realized P&L of one calendar day (UTC)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPnl {
    pub date: NaiveDate,
    pub realized: f64,
}

impl Default for DailyPnl {
    fn default() -> Self {
        Self {
            date: Utc::now().date_naive(),
            realized: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    /// Available balance in quote currency
    pub balance: f64,
    pub initial_balance: f64,
    /// Highest equity observed
    pub peak_balance: f64,
    pub open_positions: Vec<Position>,
    /// Most recent closed trades, oldest first
    pub closed_trades: VecDeque<ClosedTrade>,
    pub total_pnl: f64,
    pub total_fees: f64,
    pub total_trades: u64,
    pub winning_trades: u64,
    #[serde(default)]
    pub daily: DailyPnl,
    pub last_updated: DateTime<Utc>,
}

impl PortfolioState {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            balance: initial_balance,
            initial_balance,
            peak_balance: initial_balance,
            open_positions: Vec::new(),
            closed_trades: VecDeque::new(),
            total_pnl: 0.0,
            total_fees: 0.0,
            total_trades: 0,
            winning_trades: 0,
            daily: DailyPnl::default(),
            last_updated: Utc::now(),
        }
    }

    pub fn has_open(&self, symbol: &Symbol) -> bool {
        self.open_positions.iter().any(|p| &p.symbol == symbol)
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.open_positions.iter().find(|p| &p.symbol == symbol)
    }

    /// Balance plus capital invested in open positions
    pub fn equity(&self) -> f64 {
        self.balance + self.open_positions.iter().map(|p| p.net_invested).sum::<f64>()
    }

    pub fn realized_pnl_on(&self, date: NaiveDate) -> f64 {
        if self.daily.date == date {
            self.daily.realized
        } else {
            0.0
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.winning_trades as f64 / self.total_trades as f64 * 100.0
    }

    /// Add an open position and debit its invested capital
    pub fn apply_open(&mut self, position: Position) -> Result<(), PositionError> {
        if !position.is_open() {
            return Err(PositionError::AlreadyClosed(position.symbol.to_string()));
        }
        if self.has_open(&position.symbol) {
            return Err(PositionError::AlreadyOpen(position.symbol.to_string()));
        }

        self.balance -= position.net_invested;
        self.last_updated = position.entry_time.max(self.last_updated);
        self.open_positions.push(position);
        Ok(())
    }

    /// Close the open position on `symbol` and settle it.
    ///
    /// On error the state is unchanged.
    pub fn apply_close(
        &mut self,
        symbol: &Symbol,
        price: f64,
        reason: ExitReason,
        time: DateTime<Utc>,
        history_limit: usize,
    ) -> Result<ClosedTrade, PositionError> {
        let index = self
            .open_positions
            .iter()
            .position(|p| &p.symbol == symbol)
            .ok_or_else(|| PositionError::NotOpen(symbol.to_string()))?;

        let trade = self.open_positions[index].close(price, reason, time)?;
        self.open_positions.remove(index);

        self.balance += trade.proceeds();
        self.total_pnl += trade.net_pnl;
        self.total_fees += trade.total_fees;
        self.total_trades += 1;
        if trade.is_win() {
            self.winning_trades += 1;
        }

        let exit_time = trade.position.exit.as_ref().map_or(time, |e| e.time);
        let day = exit_time.date_naive();
        if self.daily.date != day {
            self.daily = DailyPnl {
                date: day,
                realized: 0.0,
            };
        }
        self.daily.realized += trade.net_pnl;
        self.peak_balance = self.peak_balance.max(self.equity());

        self.closed_trades.push_back(trade.clone());
        while self.closed_trades.len() > history_limit.max(1) {
            self.closed_trades.pop_front();
        }
        self.last_updated = exit_time;
        Ok(trade)
    }
}

/// Balance and open count after a mutation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Funds {
    pub balance: f64,
    pub open_positions: usize,
}

/// Shared handle to the portfolio; every mutation goes through it
#[derive(Clone)]
pub struct Portfolio {
    state: Arc<Mutex<PortfolioState>>,
    store: Arc<PortfolioStore>,
    history_limit: usize,
}

impl Portfolio {
    pub fn new(state: PortfolioState, store: PortfolioStore, history_limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            store: Arc::new(store),
            history_limit,
        }
    }

    /// Restore from the store, or start fresh with `initial_balance`
    pub fn load(
        store: PortfolioStore,
        initial_balance: f64,
        history_limit: usize,
    ) -> Result<Self, PersistenceError> {
        let state = store.load(initial_balance)?;
        Ok(Self::new(state, store, history_limit))
    }

    pub fn store(&self) -> &PortfolioStore {
        &self.store
    }

    /// Consistent copy of the whole aggregate
    pub async fn snapshot(&self) -> PortfolioState {
        self.state.lock().await.clone()
    }

    pub async fn funds(&self) -> Funds {
        let state = self.state.lock().await;
        Funds {
            balance: state.balance,
            open_positions: state.open_positions.len(),
        }
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        self.state.lock().await.open_positions.clone()
    }

    pub async fn is_open(&self, symbol: &Symbol) -> bool {
        self.state.lock().await.has_open(symbol)
    }

    pub async fn admit(
        &self,
        gate: &RiskGate,
        symbol: &Symbol,
        today: NaiveDate,
    ) -> Result<(), EntryRejection> {
        gate.check(&*self.state.lock().await, symbol, today)
    }

    fn persist(&self, state: &PortfolioState) {
        if let Err(e) = self.store.snapshot(state) {
            error!("Portfolio snapshot failed, retrying on next autosave: {}", e);
        }
    }

    pub async fn open(&self, position: Position) -> Result<Funds, PositionError> {
        let mut state = self.state.lock().await;
        let symbol = position.symbol.clone();
        state.apply_open(position)?;
        self.persist(&state);

        debug!("Opened {} | balance {:.2}", symbol, state.balance);
        Ok(Funds {
            balance: state.balance,
            open_positions: state.open_positions.len(),
        })
    }

    /// Close and settle the position on `symbol`; `Ok(None)` when none is open
    pub async fn close(
        &self,
        symbol: &Symbol,
        price: f64,
        reason: ExitReason,
        time: DateTime<Utc>,
    ) -> Result<Option<(ClosedTrade, Funds)>, PositionError> {
        let mut state = self.state.lock().await;
        if !state.has_open(symbol) {
            return Ok(None);
        }

        let trade = state.apply_close(symbol, price, reason, time, self.history_limit)?;
        self.persist(&state);
        if let Err(e) = self.store.record_trade(&trade) {
            error!("Failed to journal trade on {}: {}", symbol, e);
        }

        Ok(Some((
            trade,
            Funds {
                balance: state.balance,
                open_positions: state.open_positions.len(),
            },
        )))
    }

    /// Copy tracking levels from a monitor's view of the position
    pub async fn update_levels(&self, position: &Position) {
        let mut state = self.state.lock().await;
        if let Some(stored) = state
            .open_positions
            .iter_mut()
            .find(|p| p.symbol == position.symbol && p.is_open())
        {
            stored.observe_price(position.highest_price);
            stored.trailing_armed |= position.trailing_armed;
            stored.take_profit = position.take_profit;
        }
    }

    pub async fn save(&self) -> Result<(), PersistenceError> {
        let state = self.state.lock().await;
        self.store.snapshot(&state)
    }

    /// Periodic snapshot until `shutdown` fires
    pub async fn run_autosave(self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the state was just loaded
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    match self.save().await {
                        Ok(()) => debug!("💾 Autosave complete"),
                        Err(e) => warn!("Autosave failed: {}", e),
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }
        info!("Autosave stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    use crate::types::{PositionStatus, Side};

    fn position(pair: &str, entry: f64) -> Position {
        let notional = 100.0;
        let fee_rate = 0.00075;
        let entry_fee = notional * fee_rate;
        Position {
            symbol: Symbol::parse(pair).unwrap(),
            side: Side::Buy,
            entry_price: entry,
            quantity: (notional - entry_fee) / entry,
            notional,
            entry_fee,
            net_invested: notional - entry_fee,
            fee_rate,
            stop_loss: entry * 0.995,
            take_profit: entry * 1.015,
            initial_take_profit: entry * 1.015,
            entry_time: Utc::now(),
            highest_price: entry,
            trailing_armed: false,
            status: PositionStatus::Open,
            exit: None,
            order_id: None,
        }
    }

    #[test]
    fn test_open_close_accounting_identity() {
        let mut state = PortfolioState::new(2000.0);
        let p = position("BTC/USDT", 50_000.0);
        let invested = p.net_invested;
        state.apply_open(p).unwrap();
        assert_relative_eq!(state.balance, 2000.0 - invested);

        let before = state.balance;
        let trade = state
            .apply_close(
                &Symbol::parse("BTC/USDT").unwrap(),
                50_500.0,
                ExitReason::TakeProfit,
                Utc::now(),
                100,
            )
            .unwrap();
        assert_relative_eq!(state.balance, before + invested + trade.net_pnl);
        assert_relative_eq!(state.balance, 2000.0 + trade.net_pnl);
        assert_eq!(state.total_trades, 1);
        assert_eq!(state.winning_trades, 1);
        assert_relative_eq!(state.total_fees, trade.total_fees);
        assert!(state.open_positions.is_empty());
        assert_eq!(state.closed_trades.len(), 1);
    }

    #[test]
    fn test_duplicate_open_rejected() {
        let mut state = PortfolioState::new(2000.0);
        state.apply_open(position("ETH/USDT", 3000.0)).unwrap();
        assert!(matches!(
            state.apply_open(position("ETH/USDT", 3100.0)),
            Err(PositionError::AlreadyOpen(_))
        ));
        assert_eq!(state.open_positions.len(), 1);
    }

    #[test]
    fn test_close_unknown_symbol_leaves_state() {
        let mut state = PortfolioState::new(2000.0);
        let before = state.clone();
        assert!(state
            .apply_close(
                &Symbol::parse("SOL/USDT").unwrap(),
                10.0,
                ExitReason::StopLoss,
                Utc::now(),
                100
            )
            .is_err());
        assert_eq!(state, before);
    }

    #[test]
    fn test_history_bounded() {
        let mut state = PortfolioState::new(10_000.0);
        for i in 0..5 {
            let pair = format!("C{}/USDT", i);
            state.apply_open(position(&pair, 10.0)).unwrap();
            state
                .apply_close(
                    &Symbol::parse(&pair).unwrap(),
                    10.1,
                    ExitReason::TakeProfit,
                    Utc::now(),
                    3,
                )
                .unwrap();
        }
        assert_eq!(state.closed_trades.len(), 3);
        assert_eq!(state.total_trades, 5);
        assert_eq!(state.closed_trades[0].symbol().as_str(), "C2/USDT");
    }

    #[test]
    fn test_daily_pnl_tracks_losses() {
        let mut state = PortfolioState::new(2000.0);
        state.apply_open(position("ADA/USDT", 1.0)).unwrap();
        let trade = state
            .apply_close(
                &Symbol::parse("ADA/USDT").unwrap(),
                0.99,
                ExitReason::StopLoss,
                Utc::now(),
                100,
            )
            .unwrap();
        assert!(trade.net_pnl < 0.0);
        assert_relative_eq!(state.realized_pnl_on(Utc::now().date_naive()), trade.net_pnl);
    }

    #[tokio::test]
    async fn test_handle_persists_on_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portfolio.json");
        let portfolio = Portfolio::new(
            PortfolioState::new(2000.0),
            PortfolioStore::new(&path),
            100,
        );

        let funds = portfolio.open(position("BTC/USDT", 50_000.0)).await.unwrap();
        assert_eq!(funds.open_positions, 1);
        let on_disk = PortfolioStore::new(&path).load(0.0).unwrap();
        assert_eq!(on_disk.open_positions.len(), 1);

        let btc = Symbol::parse("BTC/USDT").unwrap();
        let closed = portfolio
            .close(&btc, 49_700.0, ExitReason::StopLoss, Utc::now())
            .await
            .unwrap();
        assert!(closed.is_some());
        let on_disk = PortfolioStore::new(&path).load(0.0).unwrap();
        assert!(on_disk.open_positions.is_empty());
        assert_eq!(on_disk.total_trades, 1);

        // Second close is a no-op
        assert!(portfolio
            .close(&btc, 49_600.0, ExitReason::StopLoss, Utc::now())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_levels_keeps_high_monotone() {
        let dir = tempfile::tempdir().unwrap();
        let portfolio = Portfolio::new(
            PortfolioState::new(2000.0),
            PortfolioStore::new(dir.path().join("p.json")),
            100,
        );
        let mut p = position("BTC/USDT", 100.0);
        portfolio.open(p.clone()).await.unwrap();

        p.highest_price = 102.0;
        p.trailing_armed = true;
        portfolio.update_levels(&p).await;

        p.highest_price = 101.0;
        p.trailing_armed = false;
        portfolio.update_levels(&p).await;

        let stored = portfolio.open_positions().await.remove(0);
        assert_eq!(stored.highest_price, 102.0);
        assert!(stored.trailing_armed);
    }

    #[tokio::test]
    async fn test_autosave_persists_level_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portfolio.json");
        let portfolio = Portfolio::new(
            PortfolioState::new(2000.0),
            PortfolioStore::new(&path),
            100,
        );
        let mut p = position("BTC/USDT", 100.0);
        portfolio.open(p.clone()).await.unwrap();

        // Level updates are not written on their own
        p.highest_price = 104.0;
        p.trailing_armed = true;
        portfolio.update_levels(&p).await;
        let on_disk = PortfolioStore::new(&path).load(0.0).unwrap();
        assert_eq!(on_disk.open_positions[0].highest_price, 100.0);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(
            portfolio
                .clone()
                .run_autosave(Duration::from_millis(20), shutdown_rx),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        let on_disk = PortfolioStore::new(&path).load(0.0).unwrap();
        assert_eq!(on_disk.open_positions[0].highest_price, 104.0);
        assert!(on_disk.open_positions[0].trailing_armed);

        shutdown_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("autosave did not stop")
            .unwrap();
    }
}
