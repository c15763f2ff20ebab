//! Position monitor state machine
//!
//! One monitor per open position. States:
//!
//! ```text
//! OPEN(watching) --gain >= activation--> OPEN(trailing armed) --exit--> CLOSED
//!        |                                                              ^
//!        +---------------------------exit-------------------------------+
//! ```
//!
//! Arming is one-way. On every evaluation the first matching rule wins:
//! 1. immediate exit on a loss beyond `immediate_exit_pct`
//! 2. stop-loss
//! 3. trailing stop (armed only)
//! 4. take-profit: extend once on strong momentum, close when momentum stalls
//! 5. momentum decline while still in profit
//! 6. stagnation, negative and absolute timeouts
//!
//! [`PositionMonitor::evaluate`] is pure state-machine logic;
//! [`PositionMonitor::run`] drives it from price events and a check interval
//! and hands exits to an [`ExitExecutor`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ExitConfig;
use crate::types::{ClosedTrade, ExitReason, Position, PriceEvent};

/// A decided exit, not yet executed
#[derive(Debug, Clone, PartialEq)]
pub struct ExitDecision {
    pub reason: ExitReason,
    pub price: f64,
    pub change_pct: f64,
    pub momentum_pct: Option<f64>,
    pub time: DateTime<Utc>,
}

/// Outcome of one evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Keep the position. `updated` is set when its tracked levels changed.
    Hold { updated: bool },
    Exit(ExitDecision),
}

/// Carries out exits decided by monitors
#[async_trait]
pub trait ExitExecutor: Send + Sync {
    /// Record changed tracking levels (high-water mark, arming, take-profit)
    async fn update_levels(&self, position: &Position);

    /// Close the position. `Ok(None)` when it is no longer open; `Err` leaves
    /// it open for a retry on the next evaluation.
    async fn execute_exit(
        &self,
        position: &Position,
        decision: &ExitDecision,
    ) -> anyhow::Result<Option<ClosedTrade>>;
}

pub struct PositionMonitor {
    config: ExitConfig,
    position: Position,
    history: VecDeque<f64>,
    tp_reached_at: Option<DateTime<Utc>>,
    last_price: Option<f64>,
}

impl PositionMonitor {
    pub fn new(position: Position, config: ExitConfig) -> Self {
        let capacity = config.momentum_samples * 2;
        Self {
            config,
            position,
            history: VecDeque::with_capacity(capacity),
            tp_reached_at: None,
            last_price: None,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn tp_reached_at(&self) -> Option<DateTime<Utc>> {
        self.tp_reached_at
    }

    /// Percent move over the last `momentum_samples` samples
    pub fn momentum_pct(&self) -> Option<f64> {
        let samples = self.config.momentum_samples;
        if samples < 2 || self.history.len() < samples {
            return None;
        }
        let oldest = self.history[self.history.len() - samples];
        let current = *self.history.back()?;
        if oldest <= 0.0 {
            return None;
        }
        Some((current - oldest) / oldest * 100.0)
    }

    /// Take-profit ceiling reachable through extension
    fn extended_take_profit(&self) -> f64 {
        let entry = self.position.entry_price;
        let target_pct = self.position.initial_take_profit / entry - 1.0;
        let factor = (1.0 + self.config.max_tp_extension_pct / 100.0).min(1.05);
        entry * (1.0 + target_pct * factor)
    }

    fn record_sample(&mut self, price: f64) {
        self.history.push_back(price);
        while self.history.len() > self.config.momentum_samples * 2 {
            self.history.pop_front();
        }
    }

    /// Evaluate the exit rules at `price`
    pub fn evaluate(&mut self, price: f64, now: DateTime<Utc>) -> Verdict {
        if !(price.is_finite() && price > 0.0) {
            return Verdict::Hold { updated: false };
        }
        self.last_price = Some(price);
        self.record_sample(price);

        let mut updated = self.position.observe_price(price);
        let change = self.position.change_pct(price);
        let momentum = self.momentum_pct();
        let exit = |reason| {
            Verdict::Exit(ExitDecision {
                reason,
                price,
                change_pct: change,
                momentum_pct: momentum,
                time: now,
            })
        };

        if change <= self.config.immediate_exit_pct {
            return exit(ExitReason::ImmediateExit);
        }

        if price <= self.position.stop_loss {
            return exit(ExitReason::StopLoss);
        }

        if self.config.trailing_enabled {
            if !self.position.trailing_armed && change >= self.config.trailing_activation_pct {
                self.position.trailing_armed = true;
                updated = true;
                info!(
                    "🔒 {} trailing stop armed at {:+.2}% (high {:.8})",
                    self.position.symbol, change, self.position.highest_price
                );
            }
            if self.position.trailing_armed
                && self.position.drawdown_from_high_pct(price) >= self.config.trailing_stop_pct
            {
                return exit(ExitReason::TrailingStop);
            }
        }

        if price >= self.position.take_profit {
            if self.tp_reached_at.is_none() {
                self.tp_reached_at = Some(now);
                info!(
                    "🎯 {} take-profit {:.8} reached at {:.8}",
                    self.position.symbol, self.position.take_profit, price
                );
            }
            match momentum {
                None => return exit(ExitReason::TakeProfit),
                Some(m) if m > self.config.strong_momentum_pct => {
                    let ceiling = self.extended_take_profit();
                    if ceiling > self.position.take_profit {
                        info!(
                            "🚀 {} take-profit extended {:.8} -> {:.8} (momentum {:+.2}%)",
                            self.position.symbol, self.position.take_profit, ceiling, m
                        );
                        self.position.take_profit = ceiling;
                        updated = true;
                    }
                }
                Some(m) if m < self.config.stagnation_momentum_pct => {
                    return exit(ExitReason::TakeProfit);
                }
                Some(_) => {}
            }
        }

        if let Some(m) = momentum {
            if m < self.config.decline_momentum_pct && change > self.config.decline_min_profit_pct {
                return exit(ExitReason::MomentumDecline);
            }
        }

        let elapsed = (now - self.position.entry_time).num_seconds().max(0) as u64;
        if elapsed > self.config.stagnation_timeout_secs
            && change.abs() < self.config.stagnation_band_pct
        {
            return exit(ExitReason::StagnationTimeout);
        }
        if elapsed > self.config.negative_timeout_secs && change < self.config.negative_threshold_pct {
            return exit(ExitReason::NegativeTimeout);
        }
        if elapsed > self.config.absolute_timeout_secs {
            return exit(ExitReason::AbsoluteTimeout);
        }

        Verdict::Hold { updated }
    }

    /// Drive the monitor until the position closes, the price channel closes
    /// or `shutdown` fires. Shutdown leaves the position open.
    pub async fn run(
        mut self,
        mut prices: mpsc::Receiver<PriceEvent>,
        executor: Arc<dyn ExitExecutor>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let symbol = self.position.symbol.clone();
        let mut ticker = interval(self.config.check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "👁️  Monitoring {} entry {:.8} SL {:.8} TP {:.8}",
            symbol, self.position.entry_price, self.position.stop_loss, self.position.take_profit
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let price = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = prices.recv() => match event {
                    Some(event) => event.price,
                    None => {
                        debug!("Price channel for {} closed", symbol);
                        break;
                    }
                },
                _ = ticker.tick() => match self.last_price {
                    Some(price) => price,
                    None => continue,
                },
            };

            match self.evaluate(price, Utc::now()) {
                Verdict::Hold { updated: false } => {}
                Verdict::Hold { updated: true } => executor.update_levels(&self.position).await,
                Verdict::Exit(decision) => {
                    info!(
                        "{} exit signal {} at {:.8} ({:+.2}%)",
                        symbol, decision.reason, decision.price, decision.change_pct
                    );
                    match executor.execute_exit(&self.position, &decision).await {
                        Ok(Some(_)) => return,
                        Ok(None) => {
                            debug!("{} already closed elsewhere", symbol);
                            return;
                        }
                        Err(e) => warn!("Close of {} failed, position kept open: {:#}", symbol, e),
                    }
                }
            }
        }

        info!("Monitor for {} stopped, position left open", symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::types::{PositionStatus, Side, Symbol};

    fn position(entry: f64, stop: f64, target: f64) -> Position {
        let fee_rate = 0.00075;
        let notional = 100.0;
        let entry_fee = notional * fee_rate;
        Position {
            symbol: Symbol::parse("BTC/USDT").unwrap(),
            side: Side::Buy,
            entry_price: entry,
            quantity: (notional - entry_fee) / entry,
            notional,
            entry_fee,
            net_invested: notional - entry_fee,
            fee_rate,
            stop_loss: stop,
            take_profit: target,
            initial_take_profit: target,
            entry_time: Utc::now(),
            highest_price: entry,
            trailing_armed: false,
            status: PositionStatus::Open,
            exit: None,
            order_id: None,
        }
    }

    fn monitor() -> PositionMonitor {
        PositionMonitor::new(position(50_000.0, 49_750.0, 50_750.0), ExitConfig::default())
    }

    fn reason(verdict: Verdict) -> Option<ExitReason> {
        match verdict {
            Verdict::Exit(d) => Some(d.reason),
            Verdict::Hold { .. } => None,
        }
    }

    #[test]
    fn test_immediate_exit_wins_over_stop_loss() {
        let mut m = monitor();
        let now = Utc::now();
        assert_eq!(reason(m.evaluate(49_550.0, now)), Some(ExitReason::ImmediateExit));
    }

    #[test]
    fn test_stop_loss() {
        let mut m = monitor();
        match m.evaluate(49_700.0, Utc::now()) {
            Verdict::Exit(d) => {
                assert_eq!(d.reason, ExitReason::StopLoss);
                assert!(d.price <= 49_750.0);
            }
            other => panic!("expected exit, got {:?}", other),
        }
    }

    #[test]
    fn test_trailing_arm_is_one_way() {
        let mut m = monitor();
        let now = Utc::now();
        assert_eq!(reason(m.evaluate(50_100.0, now)), None);
        assert!(!m.position().trailing_armed);

        assert_eq!(m.evaluate(50_250.0, now), Verdict::Hold { updated: true });
        assert!(m.position().trailing_armed);

        // Back below activation but within the trail: still armed
        assert_eq!(reason(m.evaluate(50_110.0, now)), None);
        assert!(m.position().trailing_armed);
        assert_eq!(m.position().highest_price, 50_250.0);
    }

    #[test]
    fn test_trailing_stop_from_high() {
        let mut m = monitor();
        let now = Utc::now();
        for price in [50_100.0, 50_200.0, 50_300.0] {
            assert_eq!(reason(m.evaluate(price, now)), None);
        }
        assert!(m.position().trailing_armed);
        assert_eq!(reason(m.evaluate(50_149.0, now)), Some(ExitReason::TrailingStop));
    }

    #[test]
    fn test_take_profit_without_momentum_history() {
        let mut config = ExitConfig::default();
        config.trailing_enabled = false;
        let mut m = PositionMonitor::new(position(50_000.0, 49_750.0, 50_750.0), config);
        assert_eq!(reason(m.evaluate(50_800.0, Utc::now())), Some(ExitReason::TakeProfit));
        assert!(m.tp_reached_at().is_some());
    }

    #[test]
    fn test_take_profit_extended_on_strong_momentum() {
        let mut config = ExitConfig::default();
        config.trailing_enabled = false;
        let mut m = PositionMonitor::new(position(100.0, 99.5, 101.0), config);
        let now = Utc::now();
        for price in [100.0, 100.2, 100.4, 100.7] {
            assert_eq!(reason(m.evaluate(price, now)), None);
        }
        // momentum over 5 samples: 100.0 -> 101.1 = +1.1%
        assert_eq!(m.evaluate(101.1, now), Verdict::Hold { updated: true });
        let extended = m.position().take_profit;
        assert!((extended - 101.02).abs() < 1e-9);

        // Extension happens once
        assert_eq!(reason(m.evaluate(101.5, now)), None);
        assert_eq!(m.position().take_profit, extended);
    }

    #[test]
    fn test_take_profit_closes_when_momentum_stalls() {
        let mut config = ExitConfig::default();
        config.trailing_enabled = false;
        let mut m = PositionMonitor::new(position(100.0, 99.5, 101.0), config);
        let now = Utc::now();
        for price in [101.2, 101.2, 101.2, 101.2] {
            m.record_sample(price);
        }
        assert_eq!(reason(m.evaluate(101.2, now)), Some(ExitReason::TakeProfit));
    }

    #[test]
    fn test_momentum_decline_in_profit() {
        let mut config = ExitConfig::default();
        config.trailing_enabled = false;
        let mut m = PositionMonitor::new(position(100.0, 99.5, 102.0), config);
        let now = Utc::now();
        for price in [100.8, 100.7, 100.6, 100.5] {
            assert_eq!(reason(m.evaluate(price, now)), None);
        }
        // -0.4% over the window while +0.3% from entry
        assert_eq!(reason(m.evaluate(100.4, now)), Some(ExitReason::MomentumDecline));
    }

    fn after(m: &PositionMonitor, secs: i64) -> DateTime<Utc> {
        m.position().entry_time + Duration::seconds(secs)
    }

    #[test]
    fn test_timeouts() {
        let mut m = monitor();
        let at = after(&m, 601);
        assert_eq!(reason(m.evaluate(50_010.0, at)), Some(ExitReason::StagnationTimeout));

        let mut m = monitor();
        let at = after(&m, 301);
        assert_eq!(reason(m.evaluate(49_850.0, at)), Some(ExitReason::NegativeTimeout));

        let mut m = monitor();
        let at = after(&m, 200);
        assert_eq!(reason(m.evaluate(49_850.0, at)), None);

        let mut m = monitor();
        let at = after(&m, 1801);
        assert_eq!(reason(m.evaluate(50_150.0, at)), Some(ExitReason::AbsoluteTimeout));
    }

    #[test]
    fn test_invalid_price_ignored() {
        let mut m = monitor();
        assert_eq!(m.evaluate(0.0, Utc::now()), Verdict::Hold { updated: false });
        assert_eq!(m.evaluate(f64::NAN, Utc::now()), Verdict::Hold { updated: false });
        assert_eq!(m.position().highest_price, 50_000.0);
    }
}
