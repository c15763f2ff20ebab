//! Market data feeds
//!
//! Two producers write normalized [`PriceEvent`](crate::types::PriceEvent)s
//! into the same engine channel:
//! - [`StreamingMarketDataClient`]: multiplexed WebSocket subscription with
//!   reconnect backoff and a liveness watchdog
//! - [`PollingFallbackFeed`]: REST polling while streaming is not connected
//!
//! Consumers must tolerate duplicate or near-duplicate events for a symbol.

pub mod candles;
pub mod fallback;
pub mod message;
pub mod stream;

use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::types::Symbol;

pub use candles::CandleBook;
pub use fallback::PollingFallbackFeed;
pub use message::{parse_frame, StreamFrame, StreamSymbols};
pub use stream::{StreamConfig, StreamingMarketDataClient};

/// Streaming connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Not started, stopped, or nothing to subscribe to
    Idle,
    Connecting,
    Connected,
    /// Lost, waiting out the reconnect backoff
    Disconnected,
    /// Consecutive attempt budget spent; needs a restart
    Failed,
}

/// Point-in-time health of the streaming client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedHealth {
    pub status: ConnectionStatus,
    pub since_last_message: Option<Duration>,
    /// Reconnections scheduled since the client was created
    pub reconnect_count: u64,
    /// Attempts since the last successful connection
    pub consecutive_attempts: u32,
    pub messages_received: u64,
    pub stale_detections: u64,
    pub symbols_tracked: usize,
    pub uptime: Option<Duration>,
}

impl FeedHealth {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Automatic reconnection has given up
    pub fn needs_restart(&self) -> bool {
        self.status == ConnectionStatus::Failed
    }
}

/// Symbols currently watched by the feeds, shared with the scan loop
#[derive(Debug, Clone, Default)]
pub struct Watchlist {
    inner: Arc<RwLock<Vec<Symbol>>>,
}

impl Watchlist {
    pub fn new(symbols: Vec<Symbol>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(symbols)),
        }
    }

    /// Replace the list; returns true when the set of symbols changed
    pub fn replace(&self, symbols: Vec<Symbol>) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut old = guard.clone();
        let mut new = symbols.clone();
        old.sort();
        new.sort();
        *guard = symbols;
        old != new
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn test_watchlist_change_detection() {
        let watchlist = Watchlist::default();
        assert!(watchlist.replace(vec![sym("BTC/USDT"), sym("ETH/USDT")]));
        assert!(!watchlist.replace(vec![sym("ETH/USDT"), sym("BTC/USDT")]));
        assert!(watchlist.replace(vec![sym("ETH/USDT")]));
        assert!(watchlist.contains(&sym("ETH/USDT")));
        assert!(!watchlist.contains(&sym("BTC/USDT")));
    }
}
