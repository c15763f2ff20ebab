//! Wire types for the exchange REST API
//!
//! Numeric fields arrive as JSON strings; they are parsed leniently so a
//! number or a numeric string both deserialize.

use serde::{Deserialize, Deserializer};

use crate::types::{InstrumentSnapshot, Symbol};

/// 24h rolling ticker statistics
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(default, deserialize_with = "de_f64")]
    pub last_price: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub quote_volume: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub price_change_percent: f64,
}

impl Ticker24h {
    /// Convert to a snapshot; `None` when the price is not positive
    pub fn to_snapshot(&self, symbol: Symbol) -> Option<InstrumentSnapshot> {
        let snapshot = InstrumentSnapshot {
            symbol,
            last_price: self.last_price,
            quote_volume: self.quote_volume,
            change_pct: self.price_change_percent,
        };
        snapshot.has_valid_price().then_some(snapshot)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

impl SymbolInfo {
    pub fn is_trading(&self) -> bool {
        self.status == "TRADING"
    }

    /// Quantity constraints from the `LOT_SIZE` filter
    pub fn lot_size(&self) -> Option<LotSize> {
        self.filters
            .iter()
            .find(|f| f.filter_type == "LOT_SIZE")
            .and_then(|f| {
                let step_size = f.step_size?;
                (step_size > 0.0).then_some(LotSize {
                    step_size,
                    min_qty: f.min_qty.unwrap_or(0.0),
                })
            })
    }
}

/// One entry of a symbol's `filters` array; only quantity fields are read
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolFilter {
    pub filter_type: String,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub step_size: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub min_qty: Option<f64>,
}

/// Order quantity granularity of one symbol
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LotSize {
    pub step_size: f64,
    pub min_qty: f64,
}

impl LotSize {
    /// Largest multiple of the step not above `quantity`
    pub fn floor(&self, quantity: f64) -> f64 {
        // Tolerance keeps 0.3 / 0.1 from flooring to 2
        let steps = (quantity / self.step_size + 1e-9).floor();
        steps * self.step_size
    }

    /// Decimal places of the step size (`0.00100000` -> 3)
    pub fn decimals(&self) -> usize {
        let formatted = format!("{:.8}", self.step_size);
        formatted
            .split_once('.')
            .map(|(_, fraction)| fraction.trim_end_matches('0').len())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub balances: Vec<AssetBalance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    #[serde(deserialize_with = "de_f64")]
    pub free: f64,
    #[serde(deserialize_with = "de_f64")]
    pub locked: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "de_f64")]
    pub executed_qty: f64,
    #[serde(default, rename = "cummulativeQuoteQty", deserialize_with = "de_f64")]
    pub cumulative_quote_qty: f64,
}

impl OrderResponse {
    /// Volume-weighted fill price, when anything was filled
    pub fn average_price(&self) -> Option<f64> {
        (self.executed_qty > 0.0).then(|| self.cumulative_quote_qty / self.executed_qty)
    }
}

/// Error body returned with non-2xx statuses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

fn de_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    de_f64(deserializer).map(Some)
}

fn de_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_parses_string_numbers() {
        let json = r#"{"symbol":"BTCUSDT","lastPrice":"50000.10","quoteVolume":"123456789.5","priceChangePercent":"1.25","openTime":0}"#;
        let ticker: Ticker24h = serde_json::from_str(json).unwrap();
        assert_eq!(ticker.last_price, 50000.10);
        assert_eq!(ticker.price_change_percent, 1.25);

        let snap = ticker.to_snapshot(Symbol::parse("BTC/USDT").unwrap()).unwrap();
        assert_eq!(snap.quote_volume, 123456789.5);
    }

    #[test]
    fn test_zero_price_ticker_has_no_snapshot() {
        let json = r#"{"symbol":"DEADUSDT","lastPrice":"0.00000000","quoteVolume":"0","priceChangePercent":"0"}"#;
        let ticker: Ticker24h = serde_json::from_str(json).unwrap();
        assert!(ticker
            .to_snapshot(Symbol::parse("DEAD/USDT").unwrap())
            .is_none());
    }

    #[test]
    fn test_order_average_price() {
        let json = r#"{"symbol":"BTCUSDT","orderId":28,"status":"FILLED","executedQty":"0.002","cummulativeQuoteQty":"100.0"}"#;
        let order: OrderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(order.average_price(), Some(50_000.0));
    }

    #[test]
    fn test_exchange_info() {
        let json = r#"{"symbols":[{"symbol":"ETHBTC","status":"TRADING","baseAsset":"ETH","quoteAsset":"BTC"},{"symbol":"OLDUSDT","status":"BREAK","baseAsset":"OLD","quoteAsset":"USDT"}]}"#;
        let info: ExchangeInfo = serde_json::from_str(json).unwrap();
        assert!(info.symbols[0].is_trading());
        assert!(!info.symbols[1].is_trading());
        assert!(info.symbols[0].lot_size().is_none());
    }

    #[test]
    fn test_lot_size_filter() {
        let json = r#"{"symbol":"BTCUSDT","status":"TRADING","baseAsset":"BTC","quoteAsset":"USDT","filters":[{"filterType":"PRICE_FILTER","minPrice":"0.01000000","maxPrice":"1000000.00000000","tickSize":"0.01000000"},{"filterType":"LOT_SIZE","minQty":"0.00001000","maxQty":"9000.00000000","stepSize":"0.00001000"}]}"#;
        let info: SymbolInfo = serde_json::from_str(json).unwrap();
        let lot = info.lot_size().unwrap();
        assert_eq!(lot.step_size, 0.00001);
        assert_eq!(lot.min_qty, 0.00001);
        assert_eq!(lot.decimals(), 5);
    }

    #[test]
    fn test_lot_size_floor() {
        let lot = LotSize {
            step_size: 0.001,
            min_qty: 0.001,
        };
        assert!((lot.floor(0.0019985) - 0.001).abs() < 1e-12);
        assert!((lot.floor(0.003) - 0.003).abs() < 1e-12);

        let whole = LotSize {
            step_size: 1.0,
            min_qty: 1.0,
        };
        assert_eq!(whole.floor(222.05), 222.0);
        assert_eq!(whole.decimals(), 0);

        let tenth = LotSize {
            step_size: 0.1,
            min_qty: 0.1,
        };
        assert!((tenth.floor(0.3) - 0.3).abs() < 1e-12);
    }
}
