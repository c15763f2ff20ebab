//! Request signing for the exchange's signed endpoints
//!
//! Signed requests carry an HMAC-SHA256 signature of the URL-encoded query
//! string, hex encoded, keyed with the API secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::{API_KEY_ENV, API_SECRET_ENV};
use crate::error::ConfigError;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of a query string
///
/// ```
/// use crypto_scalper::exchange::auth::sign_query;
///
/// let signature = sign_query("symbol=BTCUSDT&timestamp=1499827319559", "secret");
/// assert_eq!(signature.len(), 64);
/// ```
pub fn sign_query(query: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Encode key/value pairs as a query string in the given order
pub fn encode_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// API credentials container
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Read `API_KEY` and `API_SECRET` from the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingCredentials)
        };
        Ok(Self::new(read(API_KEY_ENV)?, read(API_SECRET_ENV)?))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn sign(&self, query: &str) -> String {
        sign_query(query, &self.api_secret)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}
