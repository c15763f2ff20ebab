//! Crypto Momentum Scalper
//!
//! Real-time scalping engine for spot crypto markets: ranks the market for
//! short-term momentum, opens fee-aware long positions and supervises each
//! one with its own exit state machine, fed by a streaming market data
//! client with a polling fallback.

pub mod common;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod events;
pub mod exchange;
pub mod feed;
pub mod monitor;
pub mod portfolio;
pub mod risk;
pub mod scanner;
pub mod slippage;
pub mod types;

pub use config::Config;
pub use engine::TradingEngine;
pub use error::{ConfigError, ExchangeError, PersistenceError, PositionError};
pub use events::{EngineEvent, EventBus, LogLevel};
pub use portfolio::{Portfolio, PortfolioState, PortfolioStore};
pub use slippage::{SlippageRecord, SlippageStats, SlippageTracker};
pub use types::*;
