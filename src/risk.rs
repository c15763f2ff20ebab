//! Entry admission controls
//!
//! Every entry, whether from a scan cycle or a real-time price event, is
//! checked against the current portfolio before any order is sent:
//! - one open position per symbol
//! - a cap on concurrent positions
//! - enough available balance for the per-position capital
//! - a daily realized loss limit, in percent of initial balance
//! - a maximum drawdown from the peak balance

use chrono::NaiveDate;
use thiserror::Error;

use crate::config::TradingConfig;
use crate::portfolio::PortfolioState;
use crate::types::Symbol;

/// Reason an entry was refused
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntryRejection {
    #[error("position already open on {0}")]
    DuplicateSymbol(Symbol),

    #[error("max positions reached ({0})")]
    MaxPositions(usize),

    #[error("insufficient balance: {available:.2} < {required:.2}")]
    InsufficientBalance { available: f64, required: f64 },

    #[error("daily loss limit hit: {loss:.2} > {limit:.2}")]
    DailyLossLimit { loss: f64, limit: f64 },

    #[error("max drawdown exceeded: {drawdown_pct:.2}% > {limit_pct:.2}%")]
    MaxDrawdown { drawdown_pct: f64, limit_pct: f64 },
}

/// Configuration for [`RiskGate`] using builder pattern
#[derive(Debug, Clone)]
pub struct RiskGateConfig {
    pub max_positions: usize,
    pub position_size: f64,
    pub daily_loss_limit_pct: f64,
    pub max_drawdown_pct: f64,
}

impl Default for RiskGateConfig {
    fn default() -> Self {
        Self::from_trading_config(&TradingConfig::default())
    }
}

impl RiskGateConfig {
    pub fn from_trading_config(trading: &TradingConfig) -> Self {
        Self {
            max_positions: trading.max_positions,
            position_size: trading.position_size,
            daily_loss_limit_pct: trading.daily_loss_limit_pct,
            max_drawdown_pct: trading.max_drawdown_pct,
        }
    }

    pub fn with_max_positions(mut self, max: usize) -> Self {
        self.max_positions = max;
        self
    }

    pub fn with_position_size(mut self, size: f64) -> Self {
        self.position_size = size;
        self
    }

    /// Daily realized loss limit in percent of initial balance
    pub fn with_daily_loss_limit(mut self, pct: f64) -> Self {
        self.daily_loss_limit_pct = pct;
        self
    }

    pub fn with_max_drawdown(mut self, pct: f64) -> Self {
        self.max_drawdown_pct = pct;
        self
    }

    pub fn build(self) -> RiskGate {
        RiskGate { config: self }
    }
}

#[derive(Debug, Clone)]
pub struct RiskGate {
    config: RiskGateConfig,
}

impl RiskGate {
    pub fn config(&self) -> &RiskGateConfig {
        &self.config
    }

    /// Drawdown of total equity from the peak, in percent.
    ///
    /// Capital tied up in open positions counts at its invested value.
    pub fn drawdown_pct(state: &PortfolioState) -> f64 {
        if state.peak_balance <= 0.0 {
            return 0.0;
        }
        let equity = state.equity();
        ((state.peak_balance - equity) / state.peak_balance * 100.0).max(0.0)
    }

    /// Admit or refuse an entry on `symbol`
    pub fn check(
        &self,
        state: &PortfolioState,
        symbol: &Symbol,
        today: NaiveDate,
    ) -> Result<(), EntryRejection> {
        if state.has_open(symbol) {
            return Err(EntryRejection::DuplicateSymbol(symbol.clone()));
        }
        if state.open_positions.len() >= self.config.max_positions {
            return Err(EntryRejection::MaxPositions(self.config.max_positions));
        }
        if state.balance < self.config.position_size {
            return Err(EntryRejection::InsufficientBalance {
                available: state.balance,
                required: self.config.position_size,
            });
        }

        let loss = -state.realized_pnl_on(today);
        let limit = state.initial_balance * self.config.daily_loss_limit_pct / 100.0;
        if loss > limit {
            return Err(EntryRejection::DailyLossLimit { loss, limit });
        }

        let drawdown_pct = Self::drawdown_pct(state);
        if drawdown_pct > self.config.max_drawdown_pct {
            return Err(EntryRejection::MaxDrawdown {
                drawdown_pct,
                limit_pct: self.config.max_drawdown_pct,
            });
        }

        Ok(())
    }
}
