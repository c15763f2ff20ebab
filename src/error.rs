//! Error types
//!
//! Library modules return these typed errors; orchestration and the binary
//! wrap them with `anyhow` context.
//!
//! - [`ConfigError`]: unreadable or invalid configuration, missing credentials
//! - [`ExchangeError`]: exchange client failures, classified by [`ErrorClass`]
//! - [`SymbolError`]: malformed instrument symbols
//! - [`PositionError`]: invalid entry levels, double close
//! - [`PersistenceError`]: snapshot and journal failures

use std::path::PathBuf;
use thiserror::Error;

/// Configuration and startup precondition errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {field} {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("missing API credentials: set API_KEY and API_SECRET for live trading")]
    MissingCredentials,
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Cause classification used when reporting connectivity problems
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Authentication,
    Network,
    RateLimited,
    Unavailable,
    Rejected,
    Data,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorClass::Authentication => "authentication",
            ErrorClass::Network => "network",
            ErrorClass::RateLimited => "rate-limited",
            ErrorClass::Unavailable => "unavailable",
            ErrorClass::Rejected => "rejected",
            ErrorClass::Data => "data",
        };
        f.write_str(name)
    }
}

/// Exchange client errors
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("circuit breaker open, request rejected")]
    CircuitOpen,

    #[error("exchange API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("failed to parse exchange response: {0}")]
    Parse(String),

    #[error("unknown instrument: {0}")]
    UnknownSymbol(String),
}

impl ExchangeError {
    /// Classified cause for connectivity logging
    pub fn class(&self) -> ErrorClass {
        match self {
            ExchangeError::Auth(_) => ErrorClass::Authentication,
            ExchangeError::Network(_) => ErrorClass::Network,
            ExchangeError::RateLimited => ErrorClass::RateLimited,
            ExchangeError::CircuitOpen => ErrorClass::Unavailable,
            ExchangeError::Api { status, .. } => match *status {
                401 | 403 => ErrorClass::Authentication,
                418 | 429 => ErrorClass::RateLimited,
                500..=599 => ErrorClass::Unavailable,
                _ => ErrorClass::Rejected,
            },
            ExchangeError::Parse(_) | ExchangeError::UnknownSymbol(_) => ErrorClass::Data,
        }
    }

    /// Whether a retry of the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Network | ErrorClass::RateLimited | ErrorClass::Unavailable
        )
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ExchangeError::Parse(err.to_string())
        } else {
            ExchangeError::Network(err.to_string())
        }
    }
}

/// Instrument symbol errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("malformed pair '{0}': expected BASE/QUOTE")]
    Malformed(String),
}

/// Position lifecycle errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PositionError {
    #[error("invalid entry levels for {symbol}: stop {stop_loss} < entry {entry} < target {take_profit} violated")]
    InvalidLevels {
        symbol: String,
        stop_loss: f64,
        entry: f64,
        take_profit: f64,
    },

    #[error("invalid {field} for {symbol}: {value}")]
    InvalidValue {
        symbol: String,
        field: &'static str,
        value: f64,
    },

    #[error("position {0} is already closed")]
    AlreadyClosed(String),

    #[error("no open position for {0}")]
    NotOpen(String),

    #[error("a position on {0} is already open")]
    AlreadyOpen(String),
}

/// Portfolio persistence errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("portfolio file I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("portfolio serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("trade journal error: {0}")]
    Journal(#[from] rusqlite::Error),

    #[error("trade journal lock poisoned")]
    Poisoned,

    #[error("closed trade for {0} has no exit record")]
    Incomplete(String),
}

impl PersistenceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }
}
