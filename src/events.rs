//! Engine notifications for external collaborators
//!
//! Delivery is fire-and-forget over a broadcast channel: publishing never
//! waits on subscribers, and a subscriber that falls behind loses the oldest
//! events instead of slowing the engine down.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::error::ErrorClass;
use crate::scanner::ScanStats;
use crate::types::{ClosedTrade, Opportunity, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    LogMessage {
        level: LogLevel,
        message: String,
    },
    ScanUpdate {
        stats: ScanStats,
        opportunities: Vec<Opportunity>,
    },
    TradeExecuted {
        position: Position,
    },
    PositionClosed {
        trade: ClosedTrade,
    },
    BalanceUpdate {
        balance: f64,
        open_positions: usize,
    },
    ConnectivityStatus {
        source: String,
        connected: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
    },
}

/// Cloneable publisher handle
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish without waiting; having no subscribers is not an error
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Trace the message and publish it as a `log_message` event
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => info!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
        self.emit(EngineEvent::LogMessage { level, message });
    }

    pub fn connectivity(&self, source: &str, connected: bool, cause: Option<ErrorClass>) {
        self.emit(EngineEvent::ConnectivityStatus {
            source: source.to_string(),
            connected,
            cause: cause.map(|c| c.to_string()),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
