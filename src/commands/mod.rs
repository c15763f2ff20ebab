//! Subcommand implementations

pub mod run;
pub mod scan;
pub mod status;

use anyhow::{Context, Result};
use crypto_scalper::exchange::{BinanceClient, BinanceClientConfig};
use crypto_scalper::portfolio::{Portfolio, PortfolioStore, TradeJournal};
use crypto_scalper::Config;
use std::path::Path;
use tracing::{info, warn};

/// Load the config file, or defaults plus environment when it does not exist
pub fn load_config(config_path: &str) -> Result<Config> {
    dotenv::dotenv().ok();

    if Path::new(config_path).exists() {
        let config = Config::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path))?;
        info!("Loaded configuration from: {}", config_path);
        Ok(config)
    } else {
        warn!("Config file {} not found, using defaults", config_path);
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }
}

/// Exchange client, signed when credentials are available
pub fn exchange_client(config: &Config) -> Result<BinanceClient> {
    let client_config = BinanceClientConfig::from_exchange_config(&config.exchange);
    let client = BinanceClient::new(client_config, config.credentials().ok())
        .context("Failed to build exchange client")?;
    Ok(client)
}

/// Portfolio restored from the configured snapshot and journal
pub fn open_portfolio(config: &Config) -> Result<Portfolio> {
    let persistence = &config.persistence;
    let mut store = PortfolioStore::new(&persistence.portfolio_path);
    if let Some(journal_path) = &persistence.journal_path {
        let journal = TradeJournal::open(journal_path)
            .with_context(|| format!("Failed to open trade journal {}", journal_path))?;
        store = store.with_journal(journal);
    }

    Portfolio::load(
        store,
        config.trading.initial_balance,
        persistence.history_limit,
    )
    .with_context(|| format!("Failed to restore portfolio from {}", persistence.portfolio_path))
}
