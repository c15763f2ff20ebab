//! Streaming market data client
//!
//! One multiplexed WebSocket connection carries a ticker and a candle stream
//! per watched symbol. The receive loop runs on its own task and:
//! - reconnects after errors or closes with `min(base * attempt, max)` backoff
//! - resets the attempt counter once a connection is established
//! - gives up after the configured consecutive attempts and reports `Failed`
//! - closes the socket when nothing arrives for `2 x heartbeat` (stale)
//!
//! Ticker frames become [`PriceEvent`]s on the engine channel; closed candles
//! go to the [`CandleBook`].

use futures_util::{SinkExt, StreamExt};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::candles::CandleBook;
use super::message::{parse_frame, stream_symbols, stream_url, StreamFrame, StreamSymbols};
use super::{ConnectionStatus, FeedHealth};
use crate::common::{ReconnectPolicy, ReconnectState};
use crate::config::FeedConfig;
use crate::types::{PriceEvent, Symbol};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub base_url: String,
    pub heartbeat: Duration,
    pub reconnect: ReconnectPolicy,
    pub kline_interval: String,
}

impl StreamConfig {
    pub fn from_feed_config(feed: &FeedConfig, ws_url: &str) -> Self {
        Self {
            base_url: ws_url.to_string(),
            heartbeat: Duration::from_millis(feed.heartbeat_interval_ms),
            reconnect: ReconnectPolicy::new(
                Duration::from_millis(feed.reconnect_base_delay_ms),
                Duration::from_millis(feed.reconnect_max_delay_ms),
                feed.max_reconnect_attempts,
            ),
            kline_interval: feed.kline_interval.clone(),
        }
    }

    /// Silence longer than this marks the connection stale
    pub fn stale_after(&self) -> Duration {
        self.heartbeat * 2
    }
}

#[derive(Debug, Default)]
struct HealthCounters {
    last_message: Option<Instant>,
    connected_since: Option<Instant>,
    messages_received: u64,
    reconnect_count: u64,
    consecutive_attempts: u32,
    stale_detections: u64,
    symbols_tracked: usize,
}

/// Health state shared between the receive task and readers
#[derive(Debug)]
struct SharedHealth {
    counters: StdMutex<HealthCounters>,
    status: watch::Sender<ConnectionStatus>,
}

impl SharedHealth {
    fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        Self {
            counters: StdMutex::new(HealthCounters::default()),
            status,
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut HealthCounters) -> R) -> R {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut counters)
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    fn snapshot(&self) -> FeedHealth {
        let status = *self.status.borrow();
        self.update(|c| FeedHealth {
            status,
            since_last_message: c.last_message.map(|t| t.elapsed()),
            reconnect_count: c.reconnect_count,
            consecutive_attempts: c.consecutive_attempts,
            messages_received: c.messages_received,
            stale_detections: c.stale_detections,
            symbols_tracked: c.symbols_tracked,
            uptime: match status {
                ConnectionStatus::Connected => c.connected_since.map(|t| t.elapsed()),
                _ => None,
            },
        })
    }
}

/// How one connection session ended
#[derive(Debug)]
enum SessionEnd {
    Stopped,
    Stale,
    Closed,
    Error(String),
}

struct RunningStream {
    symbols: BTreeSet<Symbol>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct StreamingMarketDataClient {
    config: StreamConfig,
    sink: mpsc::Sender<PriceEvent>,
    candles: CandleBook,
    health: Arc<SharedHealth>,
    running: Mutex<Option<RunningStream>>,
}

impl StreamingMarketDataClient {
    pub fn new(config: StreamConfig, sink: mpsc::Sender<PriceEvent>, candles: CandleBook) -> Self {
        Self {
            config,
            sink,
            candles,
            health: Arc::new(SharedHealth::new()),
            running: Mutex::new(None),
        }
    }

    /// Subscribe to `symbols`. No-op when already running for the same set.
    pub async fn start(&self, symbols: &[Symbol]) {
        let wanted: BTreeSet<Symbol> = symbols.iter().cloned().collect();
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if current.symbols == wanted && !current.task.is_finished() {
                debug!("Stream already running for {} symbols", wanted.len());
                return;
            }
        }
        Self::shutdown_running(&mut running).await;
        *running = self.spawn(wanted);
    }

    /// Close the current connection and open a fresh one for `symbols`
    pub async fn restart(&self, symbols: &[Symbol]) {
        let wanted: BTreeSet<Symbol> = symbols.iter().cloned().collect();
        let mut running = self.running.lock().await;
        Self::shutdown_running(&mut running).await;
        info!("Restarting market data stream with {} symbols", wanted.len());
        *running = self.spawn(wanted);
    }

    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        Self::shutdown_running(&mut running).await;
        self.health.set_status(ConnectionStatus::Idle);
    }

    pub fn health(&self) -> FeedHealth {
        self.health.snapshot()
    }

    /// Connection status updates, used to switch the polling fallback on and off
    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.health.status.subscribe()
    }

    pub fn candles(&self) -> &CandleBook {
        &self.candles
    }

    pub async fn symbols(&self) -> Vec<Symbol> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| r.symbols.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn shutdown_running(running: &mut Option<RunningStream>) {
        if let Some(current) = running.take() {
            current.stop.send_replace(true);
            if let Err(e) = current.task.await {
                warn!("Stream task ended abnormally: {}", e);
            }
        }
    }

    fn spawn(&self, symbols: BTreeSet<Symbol>) -> Option<RunningStream> {
        let list: Vec<Symbol> = symbols.iter().cloned().collect();
        self.health.update(|c| {
            c.symbols_tracked = list.len();
            c.consecutive_attempts = 0;
        });

        if list.is_empty() {
            self.health.set_status(ConnectionStatus::Idle);
            debug!("No symbols to stream");
            return None;
        }

        self.candles.retain(&list);
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = StreamWorker {
            url: stream_url(&self.config.base_url, &list, &self.config.kline_interval),
            symbols: stream_symbols(&list),
            config: self.config.clone(),
            sink: self.sink.clone(),
            candles: self.candles.clone(),
            health: Arc::clone(&self.health),
        };
        let task = tokio::spawn(worker.run(stop_rx));

        Some(RunningStream {
            symbols,
            stop: stop_tx,
            task,
        })
    }
}

struct StreamWorker {
    url: String,
    symbols: StreamSymbols,
    config: StreamConfig,
    sink: mpsc::Sender<PriceEvent>,
    candles: CandleBook,
    health: Arc<SharedHealth>,
}

impl StreamWorker {
    async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut reconnect = ReconnectState::new(self.config.reconnect);

        loop {
            if *stop.borrow() {
                break;
            }

            self.health.set_status(ConnectionStatus::Connecting);
            let connected = tokio::select! {
                _ = stop.changed() => break,
                result = connect_async(self.url.as_str()) => result,
            };

            match connected {
                Ok((ws, _)) => {
                    reconnect.on_connected();
                    self.health.update(|c| {
                        c.consecutive_attempts = 0;
                        c.connected_since = Some(Instant::now());
                        c.last_message = Some(Instant::now());
                    });
                    self.health.set_status(ConnectionStatus::Connected);
                    info!("📡 Market data stream connected ({} symbols)", self.symbols.len());

                    match self.session(ws, &mut stop).await {
                        SessionEnd::Stopped => break,
                        SessionEnd::Stale => warn!(
                            "Stream stale: no message for over {:?}, reconnecting",
                            self.config.stale_after()
                        ),
                        SessionEnd::Closed => warn!("Stream closed by server"),
                        SessionEnd::Error(e) => warn!("Stream error: {}", e),
                    }
                }
                Err(e) => warn!("Stream connection failed: {}", e),
            }

            self.health.set_status(ConnectionStatus::Disconnected);
            match reconnect.next_delay() {
                Some(delay) => {
                    let attempt = reconnect.attempts();
                    self.health.update(|c| {
                        c.consecutive_attempts = attempt;
                        c.reconnect_count += 1;
                    });
                    info!(
                        "Reconnecting in {:?} (attempt {}/{})",
                        delay,
                        attempt,
                        self.config.reconnect.max_attempts()
                    );
                    tokio::select! {
                        _ = stop.changed() => break,
                        _ = sleep(delay) => {}
                    }
                }
                None => {
                    error!(
                        "Stream gave up after {} consecutive attempts",
                        reconnect.attempts()
                    );
                    self.health.set_status(ConnectionStatus::Failed);
                    return;
                }
            }
        }

        self.health.set_status(ConnectionStatus::Idle);
        debug!("Stream worker stopped");
    }

    async fn session(&self, ws: WsStream, stop: &mut watch::Receiver<bool>) -> SessionEnd {
        let (mut write, mut read) = ws.split();
        let stale_after = self.config.stale_after();
        let mut watchdog = interval((self.config.heartbeat / 2).max(Duration::from_millis(10)));
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_message = Instant::now();

        loop {
            tokio::select! {
                _ = stop.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Stopped;
                }
                frame = read.next() => {
                    let message = match frame {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => return SessionEnd::Error(e.to_string()),
                        None => return SessionEnd::Closed,
                    };
                    last_message = Instant::now();
                    self.health.update(|c| {
                        c.last_message = Some(last_message);
                        c.messages_received += 1;
                    });

                    match message {
                        Message::Text(text) => {
                            if !self.dispatch(&text).await {
                                return SessionEnd::Stopped;
                            }
                        }
                        Message::Ping(payload) => {
                            if let Err(e) = write.send(Message::Pong(payload)).await {
                                return SessionEnd::Error(e.to_string());
                            }
                        }
                        Message::Close(_) => return SessionEnd::Closed,
                        _ => {}
                    }
                }
                _ = watchdog.tick() => {
                    if last_message.elapsed() > stale_after {
                        self.health.update(|c| c.stale_detections += 1);
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Stale;
                    }
                }
            }
        }
    }

    /// Returns false once the engine side of the channel is gone
    async fn dispatch(&self, text: &str) -> bool {
        match parse_frame(text, &self.symbols) {
            Some(StreamFrame::Ticker(event)) => self.sink.send(event).await.is_ok(),
            Some(StreamFrame::Candle {
                symbol,
                candle,
                closed: true,
            }) => {
                self.candles.push(&symbol, candle);
                true
            }
            Some(StreamFrame::Candle { .. }) => true,
            None => {
                debug!("Dropped unusable stream frame");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_from_feed_config() {
        let feed = FeedConfig::default();
        let config = StreamConfig::from_feed_config(&feed, "wss://example.test");
        assert_eq!(config.heartbeat, Duration::from_secs(30));
        assert_eq!(config.stale_after(), Duration::from_secs(60));
        assert_eq!(config.reconnect.delay_for(1), Duration::from_secs(5));
        assert_eq!(config.reconnect.delay_for(100), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_empty_symbol_set_stays_idle() {
        let (tx, _rx) = mpsc::channel(8);
        let client = StreamingMarketDataClient::new(
            StreamConfig::from_feed_config(&FeedConfig::default(), "ws://127.0.0.1:1"),
            tx,
            CandleBook::new(10),
        );
        client.start(&[]).await;
        let health = client.health();
        assert_eq!(health.status, ConnectionStatus::Idle);
        assert_eq!(health.symbols_tracked, 0);
        assert!(client.symbols().await.is_empty());
    }
}
