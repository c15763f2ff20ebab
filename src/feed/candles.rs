//! Bounded per-symbol buffer of closed candles from the stream

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use crate::types::{Candle, Symbol};

#[derive(Debug, Clone)]
pub struct CandleBook {
    capacity: usize,
    inner: Arc<RwLock<HashMap<Symbol, VecDeque<Candle>>>>,
}

impl CandleBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Append a closed candle; a candle with the same open time replaces the last one
    pub fn push(&self, symbol: &Symbol, candle: Candle) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let buffer = map.entry(symbol.clone()).or_default();
        if buffer.back().map(|c| c.datetime) == Some(candle.datetime) {
            buffer.pop_back();
        }
        buffer.push_back(candle);
        while buffer.len() > self.capacity {
            buffer.pop_front();
        }
    }

    pub fn recent(&self, symbol: &Symbol) -> Vec<Candle> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Latest candle volume as a percent of the average of the preceding candles.
    ///
    /// `None` with fewer than two candles or a zero average.
    pub fn volume_ratio(&self, symbol: &Symbol) -> Option<f64> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let buffer = map.get(symbol)?;
        let all: Vec<&Candle> = buffer.iter().collect();
        let (current, previous) = all.split_last()?;
        if previous.is_empty() {
            return None;
        }

        let average = previous.iter().map(|c| c.volume).sum::<f64>() / previous.len() as f64;
        if average <= 0.0 {
            return None;
        }
        Some(current.volume / average * 100.0)
    }

    /// Drop buffers for symbols no longer watched
    pub fn retain(&self, symbols: &[Symbol]) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|s, _| symbols.contains(s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candle(minute: i64, volume: f64) -> Candle {
        Candle {
            datetime: Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::minutes(minute),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume,
        }
    }

    #[test]
    fn test_capacity_bound() {
        let book = CandleBook::new(3);
        let s = Symbol::parse("BTC/USDT").unwrap();
        for i in 0..5 {
            book.push(&s, candle(i, 1.0));
        }
        let recent = book.recent(&s);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].datetime, candle(2, 1.0).datetime);
    }

    #[test]
    fn test_same_open_time_replaces() {
        let book = CandleBook::new(10);
        let s = Symbol::parse("BTC/USDT").unwrap();
        book.push(&s, candle(0, 1.0));
        book.push(&s, candle(0, 2.0));
        assert_eq!(book.recent(&s).len(), 1);
        assert_eq!(book.recent(&s)[0].volume, 2.0);
    }

    #[test]
    fn test_volume_ratio() {
        let book = CandleBook::new(10);
        let s = Symbol::parse("BTC/USDT").unwrap();
        book.push(&s, candle(0, 10.0));
        book.push(&s, candle(1, 30.0));
        book.push(&s, candle(2, 40.0));
        assert_eq!(book.volume_ratio(&s), Some(200.0));
    }

    #[test]
    fn test_volume_ratio_zero_average_guarded() {
        let book = CandleBook::new(10);
        let s = Symbol::parse("BTC/USDT").unwrap();
        book.push(&s, candle(0, 0.0));
        book.push(&s, candle(1, 50.0));
        assert_eq!(book.volume_ratio(&s), None);

        let unknown = Symbol::parse("XRP/USDT").unwrap();
        assert_eq!(book.volume_ratio(&unknown), None);
    }
}
