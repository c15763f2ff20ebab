//! Entry sizing and take-profit selection
//!
//! A fixed amount of quote capital is committed per position. The entry fee
//! comes out of that capital, the rest buys the base asset:
//!
//! ```text
//! entry_fee    = capital * fee_rate
//! net_invested = capital - entry_fee
//! quantity     = net_invested / price
//! ```

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::{FeeConfig, TradingConfig};
use crate::error::PositionError;
use crate::scanner::EstimatedIndicators;
use crate::types::{AssetTier, Position, PositionStatus, Side, Symbol};

// ============================================================================
// Dynamic take-profit
// ============================================================================

/// Take-profit percent from an oscillator reading: the lower, the more room
fn oscillator_target(oscillator: f64) -> f64 {
    if oscillator < 25.0 {
        2.5
    } else if oscillator < 40.0 {
        1.5
    } else {
        1.0
    }
}

fn volume_target(volume_ratio: f64) -> f64 {
    if volume_ratio > 200.0 {
        3.0
    } else if volume_ratio > 130.0 {
        2.0
    } else {
        1.5
    }
}

fn momentum_target(change_pct: f64) -> f64 {
    let strength = change_pct.abs();
    if strength > 2.0 {
        2.5
    } else if strength > 1.0 {
        1.8
    } else {
        1.2
    }
}

fn tier_target(tier: AssetTier) -> f64 {
    match tier {
        AssetTier::Major => 1.5,
        AssetTier::LargeCap => 2.0,
        AssetTier::Other => 3.5,
    }
}

/// Take-profit percent for an entry.
///
/// Blends oscillator (30%), volume spike (25%), momentum (25%) and asset
/// tier (20%) targets, clamped to the configured range. Returns the fixed
/// percent when dynamic take-profit is off.
pub fn take_profit_pct(trading: &TradingConfig, change_pct: f64, tier: AssetTier) -> f64 {
    if !trading.dynamic_take_profit {
        return trading.take_profit_pct;
    }

    let oscillator = EstimatedIndicators::oscillator(change_pct);
    let volume_ratio = (150.0 + change_pct.abs() * 20.0).min(400.0);

    let blended = oscillator_target(oscillator) * 0.30
        + volume_target(volume_ratio) * 0.25
        + momentum_target(change_pct) * 0.25
        + tier_target(tier) * 0.20;

    let pct = blended.clamp(trading.min_take_profit_pct, trading.max_take_profit_pct);
    debug!(
        "Dynamic take-profit: oscillator {:.0}, volume {:.0}%, change {:.2}%, {:?} -> {:.2}%",
        oscillator, volume_ratio, change_pct, tier, pct
    );
    pct
}

// ============================================================================
// Entry plan
// ============================================================================

/// Sized, fee-adjusted entry ready to become a [`Position`]
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPlan {
    pub symbol: Symbol,
    pub price: f64,
    pub capital: f64,
    pub fee_rate: f64,
    pub entry_fee: f64,
    pub net_invested: f64,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub take_profit_pct: f64,
}

impl EntryPlan {
    pub fn new(
        symbol: Symbol,
        price: f64,
        change_pct: f64,
        tier: AssetTier,
        trading: &TradingConfig,
        fees: &FeeConfig,
    ) -> Result<Self, PositionError> {
        if !(price.is_finite() && price > 0.0) {
            return Err(PositionError::InvalidValue {
                symbol: symbol.to_string(),
                field: "entry price",
                value: price,
            });
        }

        let capital = trading.position_size;
        let fee_rate = fees.effective_rate();
        let entry_fee = capital * fee_rate;
        let net_invested = capital - entry_fee;
        let tp_pct = take_profit_pct(trading, change_pct, tier);

        Ok(Self {
            symbol,
            price,
            capital,
            fee_rate,
            entry_fee,
            net_invested,
            quantity: net_invested / price,
            stop_loss: price * (1.0 - trading.stop_loss_pct / 100.0),
            take_profit: price * (1.0 + tp_pct / 100.0),
            take_profit_pct: tp_pct,
        })
    }

    /// Replace the planned fill with an executed one (live orders).
    ///
    /// An acknowledgement with nothing executed is an error: no position
    /// exists on the exchange.
    pub fn with_fill(mut self, average_price: f64, quantity: f64) -> Result<Self, PositionError> {
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(PositionError::InvalidValue {
                symbol: self.symbol.to_string(),
                field: "executed quantity",
                value: quantity,
            });
        }
        if average_price.is_finite() && average_price > 0.0 && average_price != self.price {
            let ratio = average_price / self.price;
            self.stop_loss *= ratio;
            self.take_profit *= ratio;
            self.price = average_price;
        }
        self.quantity = quantity;
        Ok(self)
    }

    /// Check `stop_loss < entry < take_profit` and a positive quantity
    pub fn validate(&self) -> Result<(), PositionError> {
        if !(self.stop_loss < self.price && self.price < self.take_profit) {
            return Err(PositionError::InvalidLevels {
                symbol: self.symbol.to_string(),
                stop_loss: self.stop_loss,
                entry: self.price,
                take_profit: self.take_profit,
            });
        }
        if !(self.quantity.is_finite() && self.quantity > 0.0) {
            return Err(PositionError::InvalidValue {
                symbol: self.symbol.to_string(),
                field: "quantity",
                value: self.quantity,
            });
        }
        Ok(())
    }

    /// Open position from this plan. Fails when [`validate`](Self::validate) does.
    pub fn into_position(
        self,
        entry_time: DateTime<Utc>,
        order_id: Option<String>,
    ) -> Result<Position, PositionError> {
        self.validate()?;

        Ok(Position {
            symbol: self.symbol,
            side: Side::Buy,
            entry_price: self.price,
            quantity: self.quantity,
            notional: self.capital,
            entry_fee: self.entry_fee,
            net_invested: self.net_invested,
            fee_rate: self.fee_rate,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            initial_take_profit: self.take_profit,
            entry_time,
            highest_price: self.price,
            trailing_armed: false,
            status: PositionStatus::Open,
            exit: None,
            order_id,
        })
    }
}
