//! REST polling substitute for the streaming client
//!
//! Polls a ticker per watched symbol while the stream is anything but
//! `Connected`, and goes quiet again as soon as it reconnects.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{ConnectionStatus, Watchlist};
use crate::events::{EventBus, LogLevel};
use crate::exchange::ExchangeClient;
use crate::types::{FeedSource, PriceEvent};

const SOURCE: &str = "polling";

pub struct PollingFallbackFeed {
    exchange: Arc<dyn ExchangeClient>,
    interval: Duration,
    watchlist: Watchlist,
    status: watch::Receiver<ConnectionStatus>,
    sink: mpsc::Sender<PriceEvent>,
    events: EventBus,
    /// Last poll outcome, to report connectivity changes once
    healthy: bool,
}

impl PollingFallbackFeed {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        interval: Duration,
        watchlist: Watchlist,
        status: watch::Receiver<ConnectionStatus>,
        sink: mpsc::Sender<PriceEvent>,
        events: EventBus,
    ) -> Self {
        Self {
            exchange,
            interval,
            watchlist,
            status,
            sink,
            events,
            healthy: true,
        }
    }

    fn streaming_connected(&self) -> bool {
        *self.status.borrow() == ConnectionStatus::Connected
    }

    /// Poll until `shutdown` flips to true or the engine channel closes
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut active = false;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }

            if self.streaming_connected() {
                if active {
                    info!("Streaming connected, polling fallback suspended");
                    active = false;
                }
                continue;
            }
            if !active {
                info!(
                    "Streaming unavailable ({:?}), polling fallback active",
                    *self.status.borrow()
                );
                active = true;
            }

            if !self.poll_once().await {
                debug!("Engine channel closed, stopping polling fallback");
                break;
            }
        }
    }

    /// Fetch one ticker per watched symbol. Returns false once the sink is closed.
    pub async fn poll_once(&mut self) -> bool {
        for symbol in self.watchlist.symbols() {
            if self.streaming_connected() {
                break;
            }

            match self.exchange.fetch_ticker(&symbol).await {
                Ok(snapshot) => {
                    if !self.healthy {
                        self.healthy = true;
                        self.events.connectivity(SOURCE, true, None);
                        self.events.log(LogLevel::Info, "Exchange polling recovered");
                    }
                    match PriceEvent::from_snapshot(&snapshot, FeedSource::Polling) {
                        Some(event) => {
                            if self.sink.send(event).await.is_err() {
                                return false;
                            }
                        }
                        None => debug!("Dropped polled ticker with invalid price for {}", symbol),
                    }
                }
                Err(e) => {
                    let class = e.class();
                    warn!("Polling {} failed [{}]: {}", symbol, class, e);
                    if self.healthy {
                        self.healthy = false;
                        self.events.connectivity(SOURCE, false, Some(class));
                    }
                }
            }
        }
        true
    }
}
