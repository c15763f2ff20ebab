//! Binance spot REST client
//!
//! Implements [`ExchangeClient`] over the public and signed REST endpoints:
//! - Token bucket rate limiting on every request
//! - Retry with exponential backoff for idempotent reads
//! - Circuit breaker that fails fast while the exchange is unreachable
//!
//! Orders are never retried; a failed order is reported to the caller, which
//! keeps its position state unchanged.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::auth::{encode_query, Credentials};
use super::types::{AccountInfo, ApiErrorBody, ExchangeInfo, LotSize, OrderResponse, Ticker24h};
use super::{Balance, ExchangeClient, Instrument, OrderAck};
use crate::common::{CircuitBreaker, CircuitBreakerConfig, RateLimiter};
use crate::config::ExchangeConfig;
use crate::error::ExchangeError;
use crate::types::{InstrumentSnapshot, Side, Symbol};

/// Error codes the exchange returns for rejected keys or signatures
const AUTH_ERROR_CODES: [i64; 3] = [-1022, -2014, -2015];

/// Client configuration
#[derive(Debug, Clone)]
pub struct BinanceClientConfig {
    pub rest_url: String,
    pub max_retries: u32,
    pub timeout: Duration,
    /// Requests per second
    pub rate_limit: u32,
    pub recv_window_ms: u64,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for BinanceClientConfig {
    fn default() -> Self {
        Self::from_exchange_config(&ExchangeConfig::default())
    }
}

impl BinanceClientConfig {
    pub fn from_exchange_config(config: &ExchangeConfig) -> Self {
        Self {
            rest_url: config.rest_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.request_timeout_secs),
            rate_limit: config.rate_limit,
            recv_window_ms: config.recv_window_ms,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_rest_url(mut self, url: impl Into<String>) -> Self {
        self.rest_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

pub struct BinanceClient {
    http: Client,
    config: BinanceClientConfig,
    credentials: Option<Credentials>,
    rate_limiter: RateLimiter,
    circuit_breaker: Mutex<CircuitBreaker>,
    /// Venue pair code (`BTCUSDT`) to symbol (`BTC/USDT`)
    venue_symbols: RwLock<HashMap<String, Symbol>>,
    lot_sizes: RwLock<HashMap<Symbol, LotSize>>,
}

impl BinanceClient {
    pub fn new(
        config: BinanceClientConfig,
        credentials: Option<Credentials>,
    ) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ExchangeError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            rate_limiter: RateLimiter::new(config.rate_limit),
            circuit_breaker: Mutex::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            config,
            credentials,
            venue_symbols: RwLock::new(HashMap::new()),
            lot_sizes: RwLock::new(HashMap::new()),
        })
    }

    /// Client for public market data only
    pub fn public(config: BinanceClientConfig) -> Result<Self, ExchangeError> {
        Self::new(config, None)
    }

    fn credentials(&self) -> Result<&Credentials, ExchangeError> {
        self.credentials
            .as_ref()
            .ok_or_else(|| ExchangeError::Auth("no API credentials configured".to_string()))
    }

    /// Run an idempotent request with rate limiting, retry and the circuit breaker
    async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> Result<T, ExchangeError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        self.circuit_breaker.lock().await.check()?;

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // 1s, 2s, 4s, ...
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                debug!("Retrying after {}ms", delay.as_millis());
                sleep(delay).await;
            }

            self.rate_limiter.acquire().await;
            match operation().await {
                Ok(value) => {
                    self.circuit_breaker
                        .lock()
                        .await
                        .record::<()>(&Ok(()));
                    return Ok(value);
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        "Request failed (attempt {}/{}) [{}]: {}",
                        attempt + 1,
                        self.config.max_retries + 1,
                        e.class(),
                        e
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let outcome: Result<T, ExchangeError> = Err(last_error
            .unwrap_or_else(|| ExchangeError::Network("request failed after retries".to_string())));
        self.circuit_breaker.lock().await.record(&outcome);
        outcome
    }

    /// Run a non-idempotent request exactly once
    async fn execute_once<Fut, T>(&self, request: Fut) -> Result<T, ExchangeError>
    where
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        self.circuit_breaker.lock().await.check()?;
        self.rate_limiter.acquire().await;
        let outcome = request.await;
        self.circuit_breaker.lock().await.record(&outcome);
        outcome
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.config.rest_url, path);
        let response = self.http.get(&url).query(query).send().await?;
        read_response(response).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<T, ExchangeError> {
        let credentials = self.credentials()?;
        params.push(("recvWindow".to_string(), self.config.recv_window_ms.to_string()));
        params.push((
            "timestamp".to_string(),
            Utc::now().timestamp_millis().to_string(),
        ));

        let query = encode_query(&params);
        let signature = credentials.sign(&query);
        let url = format!(
            "{}{}?{}&signature={}",
            self.config.rest_url, path, query, signature
        );

        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", credentials.api_key())
            .send()
            .await?;
        read_response(response).await
    }

    async fn ensure_instruments(&self) -> Result<(), ExchangeError> {
        if self.venue_symbols.read().await.is_empty() {
            self.load_instruments().await?;
        }
        Ok(())
    }
}

async fn read_response<T: DeserializeOwned>(response: Response) -> Result<T, ExchangeError> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        let parsed = serde_json::from_str::<ApiErrorBody>(&text).ok();
        if let Some(body) = &parsed {
            if AUTH_ERROR_CODES.contains(&body.code) {
                return Err(ExchangeError::Auth(body.msg.clone()));
            }
        }
        let message = parsed
            .map(|b| format!("{} (code {})", b.msg, b.code))
            .unwrap_or(text);
        return Err(match status.as_u16() {
            401 | 403 => ExchangeError::Auth(message),
            418 | 429 => ExchangeError::RateLimited,
            code => ExchangeError::Api {
                status: code,
                body: message,
            },
        });
    }

    serde_json::from_str(&text).map_err(|e| ExchangeError::Parse(e.to_string()))
}

/// Order quantity for the wire.
///
/// Floored to the symbol's lot step when known; otherwise at most 8
/// decimals. Trailing zeros are dropped.
pub fn format_quantity(quantity: f64, lot: Option<LotSize>) -> String {
    let formatted = match lot {
        Some(lot) => format!("{:.*}", lot.decimals(), lot.floor(quantity)),
        None => format!("{:.8}", quantity),
    };
    if formatted.contains('.') {
        formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        formatted
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn load_instruments(&self) -> Result<Vec<Instrument>, ExchangeError> {
        let info: ExchangeInfo = self
            .execute_with_retry(|| self.public_get("/api/v3/exchangeInfo", &[]))
            .await?;

        let mut lots = HashMap::new();
        let instruments: Vec<Instrument> = info
            .symbols
            .iter()
            .filter(|s| s.is_trading())
            .filter_map(|s| {
                let symbol = Symbol::from_parts(&s.base_asset, &s.quote_asset).ok()?;
                if let Some(lot) = s.lot_size() {
                    lots.insert(symbol.clone(), lot);
                }
                Some(Instrument {
                    symbol,
                    venue_code: s.symbol.clone(),
                })
            })
            .collect();
        *self.lot_sizes.write().await = lots;

        let mut map = self.venue_symbols.write().await;
        map.clear();
        map.extend(
            instruments
                .iter()
                .map(|i| (i.venue_code.clone(), i.symbol.clone())),
        );
        info!("Loaded {} tradeable instruments", instruments.len());

        Ok(instruments)
    }

    async fn fetch_snapshot(&self) -> Result<Vec<InstrumentSnapshot>, ExchangeError> {
        self.ensure_instruments().await?;
        let tickers: Vec<Ticker24h> = self
            .execute_with_retry(|| self.public_get("/api/v3/ticker/24hr", &[]))
            .await?;

        let map = self.venue_symbols.read().await;
        let snapshots: Vec<InstrumentSnapshot> = tickers
            .iter()
            .filter_map(|t| {
                map.get(&t.symbol)
                    .and_then(|symbol| t.to_snapshot(symbol.clone()))
            })
            .collect();

        debug!(
            "Snapshot: {} tickers, {} tradeable with valid prices",
            tickers.len(),
            snapshots.len()
        );
        Ok(snapshots)
    }

    async fn fetch_ticker(&self, symbol: &Symbol) -> Result<InstrumentSnapshot, ExchangeError> {
        let query = [("symbol", symbol.venue_code())];
        let ticker: Ticker24h = self
            .execute_with_retry(|| self.public_get("/api/v3/ticker/24hr", &query))
            .await?;

        ticker.to_snapshot(symbol.clone()).ok_or_else(|| {
            ExchangeError::Parse(format!(
                "non-positive price {} for {}",
                ticker.last_price, symbol
            ))
        })
    }

    async fn fetch_balance(&self) -> Result<Vec<Balance>, ExchangeError> {
        self.credentials()?;
        let account: AccountInfo = self
            .execute_with_retry(|| self.signed_request(Method::GET, "/api/v3/account", Vec::new()))
            .await?;

        Ok(account
            .balances
            .into_iter()
            .filter(|b| b.free + b.locked > 0.0)
            .map(|b| Balance {
                asset: b.asset,
                free: b.free,
                locked: b.locked,
            })
            .collect())
    }

    async fn place_market_order(
        &self,
        symbol: &Symbol,
        side: Side,
        quantity: f64,
    ) -> Result<OrderAck, ExchangeError> {
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(ExchangeError::Api {
                status: 400,
                body: format!("invalid order quantity {}", quantity),
            });
        }
        self.credentials()?;
        self.ensure_instruments().await?;

        let lot = self.lot_sizes.read().await.get(symbol).copied();
        if let Some(lot) = lot {
            let floored = lot.floor(quantity);
            if floored <= 0.0 || floored < lot.min_qty {
                return Err(ExchangeError::Api {
                    status: 400,
                    body: format!(
                        "quantity {} below lot size of {} (step {}, min {})",
                        quantity, symbol, lot.step_size, lot.min_qty
                    ),
                });
            }
        } else {
            warn!("No lot size known for {}, sending 8 decimals", symbol);
        }

        let params = vec![
            ("symbol".to_string(), symbol.venue_code()),
            ("side".to_string(), side.to_string()),
            ("type".to_string(), "MARKET".to_string()),
            ("quantity".to_string(), format_quantity(quantity, lot)),
        ];

        let response: OrderResponse = self
            .execute_once(self.signed_request(Method::POST, "/api/v3/order", params))
            .await?;

        info!(
            "Order {} {} {} qty={} status={}",
            response.order_id, side, symbol, response.executed_qty, response.status
        );

        Ok(OrderAck {
            order_id: response.order_id.to_string(),
            symbol: symbol.clone(),
            side,
            executed_qty: response.executed_qty,
            average_price: response.average_price(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_quantity() {
        assert_eq!(format_quantity(0.002, None), "0.002");
        assert_eq!(format_quantity(1.0, None), "1");
        assert_eq!(format_quantity(0.123456789, None), "0.12345679");
    }

    #[test]
    fn test_format_quantity_floors_to_lot_step() {
        let btc = LotSize {
            step_size: 0.00001,
            min_qty: 0.00001,
        };
        // 99.925 USDT at 50000
        assert_eq!(format_quantity(0.0019985, Some(btc)), "0.00199");

        let whole = LotSize {
            step_size: 1.0,
            min_qty: 1.0,
        };
        assert_eq!(format_quantity(222.05, Some(whole)), "222");
        assert_eq!(format_quantity(10.0, Some(whole)), "10");
    }

    #[test]
    fn test_config_from_exchange_config() {
        let exchange = ExchangeConfig {
            rest_url: "https://testnet.binance.vision/".to_string(),
            ..ExchangeConfig::default()
        };
        let config = BinanceClientConfig::from_exchange_config(&exchange);
        assert_eq!(config.rest_url, "https://testnet.binance.vision");
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_signed_endpoints_require_credentials() {
        let client = BinanceClient::public(BinanceClientConfig::default()).unwrap();
        let err = client.fetch_balance().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Auth(_)));

        let symbol = Symbol::parse("BTC/USDT").unwrap();
        let err = client
            .place_market_order(&symbol, Side::Buy, 0.001)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Auth(_)));
    }

    #[tokio::test]
    async fn test_rejects_invalid_quantity() {
        let client = BinanceClient::new(
            BinanceClientConfig::default(),
            Some(Credentials::new("k", "s")),
        )
        .unwrap();
        let symbol = Symbol::parse("BTC/USDT").unwrap();
        assert!(client
            .place_market_order(&symbol, Side::Sell, 0.0)
            .await
            .is_err());
    }
}
