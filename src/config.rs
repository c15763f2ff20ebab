//! Configuration management
//!
//! A single typed configuration resolved once at startup. Every field has an
//! explicit default, so a partial JSON file (or none at all) yields a complete
//! configuration. API credentials come from the environment.
//!
//! Percent fields are in percent units: `0.5` means 0.5%.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::exchange::Credentials;

/// Environment variable holding the exchange API key
pub const API_KEY_ENV: &str = "API_KEY";
/// Environment variable holding the exchange API secret
pub const API_SECRET_ENV: &str = "API_SECRET";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    pub fees: FeeConfig,
    pub exits: ExitConfig,
    pub scanner: ScannerConfig,
    pub feed: FeedConfig,
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Load configuration from a JSON file, apply environment overrides and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load API credentials from environment if set
    pub fn apply_env(&mut self) {
        if let Ok(api_key) = std::env::var(API_KEY_ENV) {
            if !api_key.trim().is_empty() {
                self.exchange.api_key = Some(api_key);
            }
        }
        if let Ok(api_secret) = std::env::var(API_SECRET_ENV) {
            if !api_secret.trim().is_empty() {
                self.exchange.api_secret = Some(api_secret);
            }
        }
    }

    /// Credentials required for signed endpoints and live trading
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        match (&self.exchange.api_key, &self.exchange.api_secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Ok(Credentials::new(key.clone(), secret.clone()))
            }
            _ => Err(ConfigError::MissingCredentials),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.trading;
        if t.initial_balance <= 0.0 {
            return Err(ConfigError::invalid("trading.initial_balance", "must be positive"));
        }
        if t.position_size <= 0.0 {
            return Err(ConfigError::invalid("trading.position_size", "must be positive"));
        }
        if t.max_positions == 0 {
            return Err(ConfigError::invalid("trading.max_positions", "must be at least 1"));
        }
        if t.stop_loss_pct <= 0.0 || t.stop_loss_pct >= 100.0 {
            return Err(ConfigError::invalid("trading.stop_loss_pct", "must be in (0, 100)"));
        }
        if t.take_profit_pct <= 0.0 {
            return Err(ConfigError::invalid("trading.take_profit_pct", "must be positive"));
        }
        if t.min_take_profit_pct <= 0.0 || t.min_take_profit_pct > t.max_take_profit_pct {
            return Err(ConfigError::invalid(
                "trading.min_take_profit_pct",
                "must be positive and not above max_take_profit_pct",
            ));
        }

        if t.max_acceptable_slippage_pct.is_nan() || t.max_acceptable_slippage_pct < 0.0 {
            return Err(ConfigError::invalid(
                "trading.max_acceptable_slippage_pct",
                "must not be negative",
            ));
        }

        let f = &self.fees;
        if !(0.0..1.0).contains(&f.taker_fee) {
            return Err(ConfigError::invalid("fees.taker_fee", "must be in [0, 1)"));
        }
        if f.discount_multiplier <= 0.0 || f.discount_multiplier > 1.0 {
            return Err(ConfigError::invalid("fees.discount_multiplier", "must be in (0, 1]"));
        }

        let e = &self.exits;
        if e.immediate_exit_pct >= 0.0 {
            return Err(ConfigError::invalid("exits.immediate_exit_pct", "must be negative"));
        }
        if e.trailing_stop_pct <= 0.0 || e.trailing_activation_pct <= 0.0 {
            return Err(ConfigError::invalid(
                "exits.trailing_stop_pct",
                "trailing percentages must be positive",
            ));
        }
        if e.momentum_samples < 2 {
            return Err(ConfigError::invalid("exits.momentum_samples", "must be at least 2"));
        }
        if e.check_interval_ms == 0 {
            return Err(ConfigError::invalid("exits.check_interval_ms", "must be non-zero"));
        }

        let s = &self.scanner;
        if s.min_pump > s.max_pump {
            return Err(ConfigError::invalid(
                "scanner.min_pump",
                format!("{} exceeds max_pump {}", s.min_pump, s.max_pump),
            ));
        }
        if s.oscillator_min > s.oscillator_max {
            return Err(ConfigError::invalid(
                "scanner.oscillator_min",
                "exceeds oscillator_max",
            ));
        }
        if s.top_n == 0 || s.max_watchlist == 0 {
            return Err(ConfigError::invalid("scanner.top_n", "top_n and max_watchlist must be non-zero"));
        }
        if s.scan_interval_secs == 0 {
            return Err(ConfigError::invalid("scanner.scan_interval_secs", "must be non-zero"));
        }

        let fd = &self.feed;
        if fd.heartbeat_interval_ms == 0 || fd.poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "feed.heartbeat_interval_ms",
                "heartbeat and poll intervals must be non-zero",
            ));
        }
        if fd.reconnect_base_delay_ms > fd.reconnect_max_delay_ms {
            return Err(ConfigError::invalid(
                "feed.reconnect_base_delay_ms",
                "exceeds reconnect_max_delay_ms",
            ));
        }
        if fd.max_reconnect_attempts == 0 {
            return Err(ConfigError::invalid("feed.max_reconnect_attempts", "must be at least 1"));
        }

        let p = &self.persistence;
        if p.autosave_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "persistence.autosave_interval_secs",
                "must be non-zero",
            ));
        }
        if p.history_limit == 0 {
            return Err(ConfigError::invalid("persistence.history_limit", "must be non-zero"));
        }

        Ok(())
    }
}

/// Exchange connectivity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    pub rest_url: String,
    pub ws_url: String,
    /// Requests per second
    pub rate_limit: u32,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
    pub recv_window_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            api_key: None,
            api_secret: None,
            rest_url: "https://api.binance.com".to_string(),
            ws_url: "wss://stream.binance.com:9443".to_string(),
            rate_limit: 10,
            max_retries: 3,
            request_timeout_secs: 30,
            recv_window_ms: 5000,
        }
    }
}

/// Capital, sizing and entry-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Paper trading when true: no orders reach the exchange
    pub simulation_mode: bool,
    pub initial_balance: f64,
    /// Capital per position in quote currency
    pub position_size: f64,
    pub max_positions: usize,
    pub stop_loss_pct: f64,
    /// Fixed take-profit, used when dynamic take-profit is off
    pub take_profit_pct: f64,
    pub dynamic_take_profit: bool,
    pub min_take_profit_pct: f64,
    pub max_take_profit_pct: f64,
    /// Minimum spacing between entry attempts on one symbol
    pub entry_cooldown_secs: u64,
    /// Daily realized loss, as percent of initial balance, that blocks entries
    pub daily_loss_limit_pct: f64,
    /// Drawdown from peak balance that blocks entries
    pub max_drawdown_pct: f64,
    /// Record expected against executed prices of live fills
    pub slippage_tracking: bool,
    /// Slippage magnitude, in percent, that raises a warning
    pub max_acceptable_slippage_pct: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            simulation_mode: true,
            initial_balance: 2000.0,
            position_size: 100.0,
            max_positions: 5,
            stop_loss_pct: 0.5,
            take_profit_pct: 1.5,
            dynamic_take_profit: true,
            min_take_profit_pct: 1.0,
            max_take_profit_pct: 5.0,
            entry_cooldown_secs: 5,
            daily_loss_limit_pct: 5.0,
            max_drawdown_pct: 20.0,
            slippage_tracking: true,
            max_acceptable_slippage_pct: 0.2,
        }
    }
}

/// Trading fee model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Base taker fee as a fraction (0.001 = 0.1%)
    pub taker_fee: f64,
    /// Pay fees with the exchange token for a discount
    pub discount_enabled: bool,
    pub discount_multiplier: f64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        FeeConfig {
            taker_fee: 0.001,
            discount_enabled: true,
            discount_multiplier: 0.75,
        }
    }
}

impl FeeConfig {
    /// Fee fraction charged on each side of a trade
    pub fn effective_rate(&self) -> f64 {
        if self.discount_enabled {
            self.taker_fee * self.discount_multiplier
        } else {
            self.taker_fee
        }
    }
}

/// Position monitor thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    /// Loss that closes a position before the stop-loss is reached
    pub immediate_exit_pct: f64,
    pub trailing_enabled: bool,
    pub trailing_activation_pct: f64,
    pub trailing_stop_pct: f64,
    /// Samples in the short momentum window
    pub momentum_samples: usize,
    pub strong_momentum_pct: f64,
    /// Momentum below this at take-profit closes the position
    pub stagnation_momentum_pct: f64,
    pub decline_momentum_pct: f64,
    /// Gain required before momentum decline closes a position
    pub decline_min_profit_pct: f64,
    pub max_tp_extension_pct: f64,
    pub stagnation_timeout_secs: u64,
    pub stagnation_band_pct: f64,
    pub negative_timeout_secs: u64,
    pub negative_threshold_pct: f64,
    pub absolute_timeout_secs: u64,
    pub check_interval_ms: u64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        ExitConfig {
            immediate_exit_pct: -0.8,
            trailing_enabled: true,
            trailing_activation_pct: 0.4,
            trailing_stop_pct: 0.3,
            momentum_samples: 5,
            strong_momentum_pct: 0.3,
            stagnation_momentum_pct: 0.05,
            decline_momentum_pct: -0.1,
            decline_min_profit_pct: 0.2,
            max_tp_extension_pct: 2.0,
            stagnation_timeout_secs: 600,
            stagnation_band_pct: 0.1,
            negative_timeout_secs: 300,
            negative_threshold_pct: -0.2,
            absolute_timeout_secs: 1800,
            check_interval_ms: 3000,
        }
    }
}

impl ExitConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// How the pair suffix list is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuffixMode {
    Include,
    Exclude,
}

/// Opportunity scanner thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Quote currencies the suffix filter matches against
    pub pair_suffixes: Vec<String>,
    pub suffix_mode: SuffixMode,
    pub major_assets: Vec<String>,
    pub large_cap_assets: Vec<String>,
    pub min_volume_major: f64,
    pub min_volume_large_cap: f64,
    pub min_volume_other: f64,
    pub min_pump: f64,
    pub max_pump: f64,
    pub oscillator_min: f64,
    pub oscillator_max: f64,
    /// Volume ratio, in percent of average, counted as a spike
    pub volume_spike_threshold: f64,
    pub min_required_signals: usize,
    pub top_n: usize,
    pub scan_interval_secs: u64,
    pub empty_scan_retry_secs: u64,
    pub max_watchlist: usize,
    /// Ranked opportunities considered for entry per scan
    pub entries_per_scan: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            pair_suffixes: vec!["USDT".into(), "BTC".into(), "ETH".into()],
            suffix_mode: SuffixMode::Include,
            major_assets: vec!["BTC".into(), "ETH".into()],
            large_cap_assets: ["BNB", "ADA", "SOL", "DOT", "LINK", "UNI", "MATIC"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_volume_major: 50_000_000.0,
            min_volume_large_cap: 8_000_000.0,
            min_volume_other: 1_000_000.0,
            min_pump: 0.8,
            max_pump: 2.0,
            oscillator_min: 20.0,
            oscillator_max: 80.0,
            volume_spike_threshold: 120.0,
            min_required_signals: 2,
            top_n: 10,
            scan_interval_secs: 60,
            empty_scan_retry_secs: 30,
            max_watchlist: 20,
            entries_per_scan: 3,
        }
    }
}

/// Market data feed settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Disable to run on the polling feed alone
    pub streaming_enabled: bool,
    pub heartbeat_interval_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub poll_interval_ms: u64,
    pub kline_interval: String,
    pub candle_history: usize,
    /// Interval of the engine's stream supervisor
    pub health_check_interval_secs: u64,
    pub channel_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            streaming_enabled: true,
            heartbeat_interval_ms: 30_000,
            reconnect_base_delay_ms: 5_000,
            reconnect_max_delay_ms: 60_000,
            max_reconnect_attempts: 10,
            poll_interval_ms: 5_000,
            kline_interval: "1m".to_string(),
            candle_history: 100,
            health_check_interval_secs: 30,
            channel_capacity: 1024,
        }
    }
}

/// Portfolio persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub portfolio_path: String,
    /// SQLite trade journal, disabled when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_path: Option<String>,
    pub autosave_interval_secs: u64,
    /// Closed trades retained in the snapshot
    pub history_limit: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            portfolio_path: "portfolio_state.json".to_string(),
            journal_path: Some("trades.db".to_string()),
            autosave_interval_secs: 30,
            history_limit: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_effective_fee_rate() {
        let fees = FeeConfig::default();
        assert_relative_eq!(fees.effective_rate(), 0.00075);

        let no_discount = FeeConfig {
            discount_enabled: false,
            ..FeeConfig::default()
        };
        assert_relative_eq!(no_discount.effective_rate(), 0.001);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"trading": {{"position_size": 250.0}}, "scanner": {{"suffix_mode": "exclude"}}}}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.trading.position_size, 250.0);
        assert_eq!(config.trading.stop_loss_pct, 0.5);
        assert_eq!(config.scanner.suffix_mode, SuffixMode::Exclude);
        assert_eq!(config.exits.absolute_timeout_secs, 1800);
    }

    #[test]
    fn test_negative_slippage_threshold_rejected() {
        let mut config = Config::default();
        config.trading.max_acceptable_slippage_pct = -0.1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "trading.max_acceptable_slippage_pct",
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_pump_band_rejected() {
        let mut config = Config::default();
        config.scanner.min_pump = 3.0;
        config.scanner.max_pump = 2.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "scanner.min_pump",
                ..
            })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::from_file("/nonexistent/scalper.json"),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_credentials_precondition() {
        let mut config = Config::default();
        assert!(matches!(
            config.credentials(),
            Err(ConfigError::MissingCredentials)
        ));

        config.exchange.api_key = Some("key".into());
        config.exchange.api_secret = Some("secret".into());
        let creds = config.credentials().unwrap();
        assert_eq!(creds.api_key(), "key");
    }
}
