//! Stream frame parsing
//!
//! Combined-stream frames look like
//! `{"stream":"btcusdt@ticker","data":{...}}`. Ticker payloads carry the last
//! price in `c`, quote volume in `q` and 24h percent change in `P`; kline
//! payloads carry the candle under `k`. Frames without a usable positive
//! price are dropped.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use crate::types::{Candle, FeedSource, PriceEvent, Symbol};

/// Lowercase stream name (`btcusdt`) to symbol, built at subscription time
pub type StreamSymbols = HashMap<String, Symbol>;

pub fn stream_symbols(symbols: &[Symbol]) -> StreamSymbols {
    symbols
        .iter()
        .map(|s| (s.stream_name(), s.clone()))
        .collect()
}

/// Combined stream URL subscribing to ticker and candle channels per symbol
pub fn stream_url(base_url: &str, symbols: &[Symbol], kline_interval: &str) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .flat_map(|s| {
            let name = s.stream_name();
            [
                format!("{}@ticker", name),
                format!("{}@kline_{}", name, kline_interval),
            ]
        })
        .collect();
    format!(
        "{}/stream?streams={}",
        base_url.trim_end_matches('/'),
        streams.join("/")
    )
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Ticker(PriceEvent),
    Candle {
        symbol: Symbol,
        candle: Candle,
        closed: bool,
    },
}

/// Parse one text frame. `None` for unknown, malformed or invalid frames.
pub fn parse_frame(text: &str, symbols: &StreamSymbols) -> Option<StreamFrame> {
    let value: Value = serde_json::from_str(text).ok()?;

    // Combined frames wrap the payload; raw frames are the payload
    let (stream, data) = match (value.get("stream"), value.get("data")) {
        (Some(Value::String(stream)), Some(data)) => (Some(stream.as_str()), data),
        _ => (None, &value),
    };

    let key = match stream {
        Some(stream) => stream.split('@').next()?.to_ascii_lowercase(),
        None => data.get("s")?.as_str()?.to_ascii_lowercase(),
    };
    let symbol = symbols.get(&key)?.clone();

    match data.get("e").and_then(Value::as_str) {
        Some("24hrTicker") => parse_ticker(symbol, data),
        Some("kline") => parse_kline(symbol, data),
        _ => match stream {
            Some(s) if s.ends_with("@ticker") => parse_ticker(symbol, data),
            Some(s) if s.contains("@kline") => parse_kline(symbol, data),
            _ => None,
        },
    }
}

fn parse_ticker(symbol: Symbol, data: &Value) -> Option<StreamFrame> {
    let price = number(data, "c")?;
    if !(price.is_finite() && price > 0.0) {
        return None;
    }

    Some(StreamFrame::Ticker(PriceEvent {
        symbol,
        price,
        volume_24h: number(data, "q").unwrap_or(0.0),
        change_24h: number(data, "P").unwrap_or(0.0),
        timestamp: data
            .get("E")
            .and_then(Value::as_i64)
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now),
        source: FeedSource::Stream,
    }))
}

fn parse_kline(symbol: Symbol, data: &Value) -> Option<StreamFrame> {
    let k = data.get("k")?;
    let close = number(k, "c")?;
    if !(close.is_finite() && close > 0.0) {
        return None;
    }

    let candle = Candle {
        datetime: k
            .get("t")
            .and_then(Value::as_i64)
            .and_then(DateTime::<Utc>::from_timestamp_millis)?,
        open: number(k, "o")?,
        high: number(k, "h")?,
        low: number(k, "l")?,
        close,
        volume: number(k, "v").unwrap_or(0.0),
    };

    Some(StreamFrame::Candle {
        symbol,
        candle,
        closed: k.get("x").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Numeric field sent either as a JSON number or a numeric string
fn number(obj: &Value, key: &str) -> Option<f64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
