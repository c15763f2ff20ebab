//! Core data types used across the scalping engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{PositionError, SymbolError};

/// OHLCV candlestick data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Trading pair symbol in `BASE/QUOTE` form
///
/// Construction always validates the pair syntax: exactly one `/` with a
/// non-empty base and quote on either side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(s: &str) -> Result<Self, SymbolError> {
        let trimmed = s.trim();
        let mut parts = trimmed.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) if !base.is_empty() && !quote.is_empty() => {
                Ok(Symbol(format!(
                    "{}/{}",
                    base.to_ascii_uppercase(),
                    quote.to_ascii_uppercase()
                )))
            }
            _ => Err(SymbolError::Malformed(s.to_string())),
        }
    }

    /// Build from separate base and quote assets
    pub fn from_parts(base: &str, quote: &str) -> Result<Self, SymbolError> {
        Self::parse(&format!("{}/{}", base, quote))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn base(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    pub fn quote(&self) -> &str {
        self.0.split('/').nth(1).unwrap_or_default()
    }

    /// Venue pair code, e.g. `BTCUSDT`
    pub fn venue_code(&self) -> String {
        format!("{}{}", self.base(), self.quote())
    }

    /// Lowercase stream name, e.g. `btcusdt`
    pub fn stream_name(&self) -> String {
        self.venue_code().to_ascii_lowercase()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Symbol::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Symbol::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// One instrument as seen in a bulk market snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSnapshot {
    pub symbol: Symbol,
    pub last_price: f64,
    /// 24h traded volume in quote currency
    pub quote_volume: f64,
    /// 24h percent change
    pub change_pct: f64,
}

impl InstrumentSnapshot {
    /// Rejects zero, negative and non-finite prices
    pub fn has_valid_price(&self) -> bool {
        self.last_price.is_finite() && self.last_price > 0.0
    }
}

/// Where a price event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedSource {
    Stream,
    Polling,
}

/// Normalized market update delivered to the engine by either feed
#[derive(Debug, Clone, PartialEq)]
pub struct PriceEvent {
    pub symbol: Symbol,
    pub price: f64,
    pub volume_24h: f64,
    pub change_24h: f64,
    pub timestamp: DateTime<Utc>,
    pub source: FeedSource,
}

impl PriceEvent {
    /// Build an event from a snapshot, dropping invalid prices
    pub fn from_snapshot(snapshot: &InstrumentSnapshot, source: FeedSource) -> Option<Self> {
        if !snapshot.has_valid_price() {
            return None;
        }
        Some(PriceEvent {
            symbol: snapshot.symbol.clone(),
            price: snapshot.last_price,
            volume_24h: snapshot.quote_volume,
            change_24h: snapshot.change_pct,
            timestamp: Utc::now(),
            source,
        })
    }
}

/// Volume tier of an instrument's base asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetTier {
    Major,
    LargeCap,
    Other,
}

/// A ranked entry candidate produced by one scan cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: Symbol,
    pub score: f64,
    pub last_price: f64,
    pub volume_24h: f64,
    pub change_pct: f64,
    pub signal_count: usize,
    pub oscillator: f64,
    pub volume_ratio: Option<f64>,
    pub tier: AssetTier,
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    ImmediateExit,
    StopLoss,
    TrailingStop,
    TakeProfit,
    MomentumDecline,
    StagnationTimeout,
    NegativeTimeout,
    AbsoluteTimeout,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::ImmediateExit => "IMMEDIATE_EXIT",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TrailingStop => "TRAILING_STOP",
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::MomentumDecline => "MOMENTUM_DECLINE",
            ExitReason::StagnationTimeout => "STAGNATION_TIMEOUT",
            ExitReason::NegativeTimeout => "NEGATIVE_TIMEOUT",
            ExitReason::AbsoluteTimeout => "ABSOLUTE_TIMEOUT",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Exit details, present only once a position is closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitRecord {
    pub price: f64,
    pub reason: ExitReason,
    pub time: DateTime<Utc>,
}

/// Long position state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    /// Capital committed in quote currency, entry fee included
    pub notional: f64,
    pub entry_fee: f64,
    /// Capital actually converted into the base asset (`notional - entry_fee`)
    pub net_invested: f64,
    pub fee_rate: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub initial_take_profit: f64,
    pub entry_time: DateTime<Utc>,
    pub highest_price: f64,
    pub trailing_armed: bool,
    pub status: PositionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Unrealized percent change from entry
    pub fn change_pct(&self, price: f64) -> f64 {
        (price - self.entry_price) / self.entry_price * 100.0
    }

    /// Gross unrealized P&L, fees excluded
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity
    }

    /// Record a new price. Returns true when the high-water mark moved.
    pub fn observe_price(&mut self, price: f64) -> bool {
        if price > self.highest_price {
            self.highest_price = price;
            true
        } else {
            false
        }
    }

    /// Percent drop from the high-water mark
    pub fn drawdown_from_high_pct(&self, price: f64) -> f64 {
        if self.highest_price <= 0.0 {
            return 0.0;
        }
        (self.highest_price - price) / self.highest_price * 100.0
    }

    /// Close the position and settle fees.
    ///
    /// Sets exit reason, price and time together. The exit time is never
    /// earlier than the entry time.
    pub fn close(
        &mut self,
        price: f64,
        reason: ExitReason,
        time: DateTime<Utc>,
    ) -> Result<ClosedTrade, PositionError> {
        if !self.is_open() {
            return Err(PositionError::AlreadyClosed(self.symbol.to_string()));
        }
        if !(price.is_finite() && price > 0.0) {
            return Err(PositionError::InvalidValue {
                symbol: self.symbol.to_string(),
                field: "exit price",
                value: price,
            });
        }

        let gross_exit = self.quantity * price;
        let exit_fee = gross_exit * self.fee_rate;
        let net_pnl = (gross_exit - exit_fee) - self.net_invested;
        let pnl_percent = if self.net_invested > 0.0 {
            net_pnl / self.net_invested * 100.0
        } else {
            0.0
        };

        self.exit = Some(ExitRecord {
            price,
            reason,
            time: time.max(self.entry_time),
        });
        self.status = PositionStatus::Closed;

        Ok(ClosedTrade {
            position: self.clone(),
            gross_exit,
            exit_fee,
            net_pnl,
            pnl_percent,
            total_fees: self.entry_fee + exit_fee,
        })
    }
}

/// Immutable record of a closed position with its settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub position: Position,
    pub gross_exit: f64,
    pub exit_fee: f64,
    pub net_pnl: f64,
    pub pnl_percent: f64,
    pub total_fees: f64,
}

impl ClosedTrade {
    pub fn symbol(&self) -> &Symbol {
        &self.position.symbol
    }

    pub fn is_win(&self) -> bool {
        self.net_pnl > 0.0
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.position.exit.as_ref().map(|e| e.reason)
    }

    /// Capital returned to the balance on close
    pub fn proceeds(&self) -> f64 {
        self.position.net_invested + self.net_pnl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn sample_position() -> Position {
        let notional = 100.0;
        let fee_rate = 0.00075;
        let entry_fee = notional * fee_rate;
        let net_invested = notional - entry_fee;
        Position {
            symbol: Symbol::parse("BTC/USDT").unwrap(),
            side: Side::Buy,
            entry_price: 50_000.0,
            quantity: net_invested / 50_000.0,
            notional,
            entry_fee,
            net_invested,
            fee_rate,
            stop_loss: 49_750.0,
            take_profit: 50_750.0,
            initial_take_profit: 50_750.0,
            entry_time: Utc::now(),
            highest_price: 50_000.0,
            trailing_armed: false,
            status: PositionStatus::Open,
            exit: None,
            order_id: None,
        }
    }

    #[test]
    fn test_symbol_parse() {
        let s = Symbol::parse("btc/usdt").unwrap();
        assert_eq!(s.as_str(), "BTC/USDT");
        assert_eq!(s.base(), "BTC");
        assert_eq!(s.quote(), "USDT");
        assert_eq!(s.venue_code(), "BTCUSDT");
        assert_eq!(s.stream_name(), "btcusdt");
    }

    #[test]
    fn test_symbol_rejects_malformed() {
        assert!(Symbol::parse("BTCUSDT").is_err());
        assert!(Symbol::parse("BTC/").is_err());
        assert!(Symbol::parse("/USDT").is_err());
        assert!(Symbol::parse("A/B/C").is_err());
        assert!(serde_json::from_str::<Symbol>("\"BTCUSDT\"").is_err());
    }

    #[test]
    fn test_symbol_serde() {
        let s = Symbol::parse("ETH/BTC").unwrap();
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"ETH/BTC\"");
        assert_eq!(serde_json::from_str::<Symbol>(&json).unwrap(), s);
    }

    #[test]
    fn test_highest_price_only_rises() {
        let mut p = sample_position();
        assert!(p.observe_price(50_100.0));
        assert!(!p.observe_price(49_000.0));
        assert_eq!(p.highest_price, 50_100.0);
    }

    #[test]
    fn test_close_settlement() {
        let mut p = sample_position();
        let trade = p
            .close(50_500.0, ExitReason::TakeProfit, Utc::now())
            .unwrap();

        let gross_exit = p.quantity * 50_500.0;
        let exit_fee = gross_exit * 0.00075;
        assert_relative_eq!(trade.exit_fee, exit_fee);
        assert_relative_eq!(trade.net_pnl, gross_exit - exit_fee - p.net_invested);
        assert_relative_eq!(trade.total_fees, p.entry_fee + exit_fee);
        assert_relative_eq!(trade.proceeds(), p.net_invested + trade.net_pnl);
        assert!(trade.is_win());
        assert_eq!(trade.exit_reason(), Some(ExitReason::TakeProfit));
        assert_eq!(p.status, PositionStatus::Closed);
    }

    #[test]
    fn test_close_twice_fails() {
        let mut p = sample_position();
        p.close(49_700.0, ExitReason::StopLoss, Utc::now()).unwrap();
        assert!(matches!(
            p.close(49_600.0, ExitReason::StopLoss, Utc::now()),
            Err(PositionError::AlreadyClosed(_))
        ));
        assert_eq!(p.exit.as_ref().unwrap().price, 49_700.0);
    }

    #[test]
    fn test_exit_time_not_before_entry() {
        let mut p = sample_position();
        let earlier = p.entry_time - Duration::seconds(10);
        let trade = p.close(50_000.0, ExitReason::AbsoluteTimeout, earlier).unwrap();
        assert!(trade.position.exit.unwrap().time >= trade.position.entry_time);
    }

    #[test]
    fn test_close_rejects_bad_price() {
        let mut p = sample_position();
        assert!(p.close(0.0, ExitReason::StopLoss, Utc::now()).is_err());
        assert!(p.is_open());
    }

    #[test]
    fn test_exit_reason_wire_names() {
        let json = serde_json::to_string(&ExitReason::TrailingStop).unwrap();
        assert_eq!(json, "\"TRAILING_STOP\"");
        assert_eq!(ExitReason::NegativeTimeout.to_string(), "NEGATIVE_TIMEOUT");
    }

    #[test]
    fn test_price_event_drops_invalid_price() {
        let snap = InstrumentSnapshot {
            symbol: Symbol::parse("SOL/USDT").unwrap(),
            last_price: 0.0,
            quote_volume: 1.0,
            change_pct: 1.0,
        };
        assert!(PriceEvent::from_snapshot(&snap, FeedSource::Polling).is_none());
    }
}
