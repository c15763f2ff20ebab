//! Exchange client abstraction
//!
//! The engine only talks to an exchange through [`ExchangeClient`]. The
//! handle is shared read-only across workers for ticker and snapshot calls;
//! order placement is reserved for the engine's entry and close paths.
//!
//! - [`binance`]: REST implementation with rate limiting, retry and a circuit breaker
//! - [`auth`]: query signing and credentials
//! - [`types`]: wire types

pub mod auth;
pub mod binance;
pub mod types;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExchangeError;
use crate::types::{InstrumentSnapshot, Side, Symbol};

pub use auth::Credentials;
pub use binance::{BinanceClient, BinanceClientConfig};

/// A tradeable instrument known to the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: Symbol,
    pub venue_code: String,
}

/// Free and locked amount of one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
}

/// Acknowledgement of an executed market order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub executed_qty: f64,
    pub average_price: Option<f64>,
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Tradeable instruments
    async fn load_instruments(&self) -> Result<Vec<Instrument>, ExchangeError>;

    /// One snapshot per tradeable instrument
    async fn fetch_snapshot(&self) -> Result<Vec<InstrumentSnapshot>, ExchangeError>;

    async fn fetch_ticker(&self, symbol: &Symbol) -> Result<InstrumentSnapshot, ExchangeError>;

    async fn fetch_balance(&self) -> Result<Vec<Balance>, ExchangeError>;

    async fn place_market_order(
        &self,
        symbol: &Symbol,
        side: Side,
        quantity: f64,
    ) -> Result<OrderAck, ExchangeError>;
}
