//! Shared test fixtures: an in-memory exchange and config helpers

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crypto_scalper::exchange::{Balance, ExchangeClient, Instrument, OrderAck};
use crypto_scalper::{Config, EngineEvent, ExchangeError, InstrumentSnapshot, Side, Symbol};

pub fn sym(pair: &str) -> Symbol {
    Symbol::parse(pair).unwrap()
}

pub fn snapshot(pair: &str, price: f64, volume: f64, change: f64) -> InstrumentSnapshot {
    InstrumentSnapshot {
        symbol: sym(pair),
        last_price: price,
        quote_volume: volume,
        change_pct: change,
    }
}

/// One recorded market order
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: f64,
}

/// Exchange whose market is set by the test
#[derive(Default)]
pub struct MockExchange {
    market: Mutex<BTreeMap<Symbol, InstrumentSnapshot>>,
    orders: Mutex<Vec<PlacedOrder>>,
    pub fail_snapshot: AtomicBool,
    pub fail_tickers: AtomicBool,
    pub fail_sells: AtomicBool,
    pub ticker_calls: AtomicU64,
    /// Delay before a snapshot is returned
    pub snapshot_delay_ms: AtomicU64,
    /// Fill price offset from the last price, in percent
    fill_offset_pct: Mutex<f64>,
    next_order_id: AtomicU64,
}

impl MockExchange {
    pub fn with_market(snapshots: Vec<InstrumentSnapshot>) -> Self {
        let exchange = Self::default();
        for s in snapshots {
            exchange.set(s);
        }
        exchange
    }

    pub fn set(&self, snapshot: InstrumentSnapshot) {
        self.market
            .lock()
            .unwrap()
            .insert(snapshot.symbol.clone(), snapshot);
    }

    pub fn set_price(&self, pair: &str, price: f64) {
        let mut market = self.market.lock().unwrap();
        if let Some(s) = market.get_mut(&sym(pair)) {
            s.last_price = price;
        }
    }

    pub fn set_fill_offset_pct(&self, pct: f64) {
        *self.fill_offset_pct.lock().unwrap() = pct;
    }

    pub fn orders(&self) -> Vec<PlacedOrder> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn load_instruments(&self) -> Result<Vec<Instrument>, ExchangeError> {
        Ok(self
            .market
            .lock()
            .unwrap()
            .keys()
            .map(|s| Instrument {
                symbol: s.clone(),
                venue_code: s.venue_code(),
            })
            .collect())
    }

    async fn fetch_snapshot(&self) -> Result<Vec<InstrumentSnapshot>, ExchangeError> {
        if self.fail_snapshot.load(Ordering::SeqCst) {
            return Err(ExchangeError::Network("connection reset".into()));
        }
        let delay = self.snapshot_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(self.market.lock().unwrap().values().cloned().collect())
    }

    async fn fetch_ticker(&self, symbol: &Symbol) -> Result<InstrumentSnapshot, ExchangeError> {
        self.ticker_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_tickers.load(Ordering::SeqCst) {
            return Err(ExchangeError::Api {
                status: 503,
                body: "maintenance".into(),
            });
        }
        self.market
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }

    async fn fetch_balance(&self) -> Result<Vec<Balance>, ExchangeError> {
        Ok(vec![Balance {
            asset: "USDT".into(),
            free: 10_000.0,
            locked: 0.0,
        }])
    }

    async fn place_market_order(
        &self,
        symbol: &Symbol,
        side: Side,
        quantity: f64,
    ) -> Result<OrderAck, ExchangeError> {
        if side == Side::Sell && self.fail_sells.load(Ordering::SeqCst) {
            return Err(ExchangeError::Api {
                status: 400,
                body: "insufficient balance".into(),
            });
        }
        let price = self
            .market
            .lock()
            .unwrap()
            .get(symbol)
            .map(|s| s.last_price);
        let offset = *self.fill_offset_pct.lock().unwrap();
        let price = price.map(|p| p * (1.0 + offset / 100.0));
        self.orders.lock().unwrap().push(PlacedOrder {
            symbol: symbol.clone(),
            side,
            quantity,
        });
        Ok(OrderAck {
            order_id: self.next_order_id.fetch_add(1, Ordering::SeqCst).to_string(),
            symbol: symbol.clone(),
            side,
            executed_qty: quantity,
            average_price: price,
        })
    }
}

/// Fast-ticking paper config persisting under `dir`
pub fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.feed.streaming_enabled = false;
    config.feed.poll_interval_ms = 20;
    config.exits.check_interval_ms = 20;
    config.scanner.scan_interval_secs = 3600;
    config.scanner.empty_scan_retry_secs = 3600;
    config.trading.entry_cooldown_secs = 3600;
    config.persistence.portfolio_path = dir.join("portfolio.json").to_string_lossy().into_owned();
    config.persistence.journal_path = None;
    config.persistence.autosave_interval_secs = 3600;
    config
}

/// WebSocket endpoint that accepts connections and stays silent.
/// Returns its URL and a connection counter.
pub async fn idle_ws_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                    return;
                };
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    (format!("ws://{}", addr), connections)
}

/// Next event matching `pred`, skipping others
pub async fn wait_for<F>(
    rx: &mut broadcast::Receiver<EngineEvent>,
    timeout: Duration,
    mut pred: F,
) -> Option<EngineEvent>
where
    F: FnMut(&EngineEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Err(_) => return None,
            Ok(Ok(event)) if pred(&event) => return Some(event),
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => return None,
        }
    }
}
