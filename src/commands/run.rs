//! Trading engine command
//!
//! Starts the engine, logs a periodic status summary and stops cleanly on
//! Ctrl+C. Open positions survive the stop and resume on the next run.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};
use tracing::{error, info, warn};

use crypto_scalper::exchange::ExchangeClient;
use crypto_scalper::{EngineEvent, TradingEngine};

pub fn run(
    config_path: String,
    paper: bool,
    live: bool,
    portfolio_override: Option<String>,
    status_interval: u64,
) -> Result<()> {
    if live && paper {
        anyhow::bail!("Cannot specify both --paper and --live modes");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path, paper, live, portfolio_override, status_interval))
}

async fn run_async(
    config_path: String,
    paper: bool,
    live: bool,
    portfolio_override: Option<String>,
    status_interval: u64,
) -> Result<()> {
    let mut config = super::load_config(&config_path)?;
    if live {
        config.trading.simulation_mode = false;
    } else if paper {
        config.trading.simulation_mode = true;
    }
    if let Some(path) = portfolio_override {
        info!("Overriding portfolio path to: {}", path);
        config.persistence.portfolio_path = path;
    }

    let paper_mode = config.trading.simulation_mode;
    if !paper_mode {
        // Fail before the countdown when live trading cannot work
        config.credentials()?;
    }
    let mode_str = if paper_mode { "PAPER" } else { "LIVE" };

    info!("============================================================");
    info!("CRYPTO SCALPER - {} MODE", mode_str);
    info!("Initial balance:  {:.2}", config.trading.initial_balance);
    info!("Position size:    {:.2}", config.trading.position_size);
    info!("Max positions:    {}", config.trading.max_positions);
    info!(
        "Momentum band:    {:.2}% .. {:.2}%",
        config.scanner.min_pump, config.scanner.max_pump
    );
    info!("Fee rate:         {:.4}%", config.fees.effective_rate() * 100.0);
    info!("============================================================");

    if !paper_mode {
        warn!("⚠️  LIVE TRADING MODE - REAL MONEY AT RISK!");
        warn!("⚠️  Press Ctrl+C within 10 seconds to abort...");

        for i in (1..=10).rev() {
            info!("Starting in {} seconds...", i);
            sleep(Duration::from_secs(1)).await;
        }
    }

    let exchange: Arc<dyn ExchangeClient> = Arc::new(super::exchange_client(&config)?);
    let portfolio = super::open_portfolio(&config)?;
    let engine = TradingEngine::new(config, exchange, portfolio)?;

    // Closed trades go to the console even when logs are filtered
    let mut events = engine.events().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::PositionClosed { trade }) => {
                    println!(
                        "{} {} net {:+.4} ({:+.2}%)",
                        trade.symbol(),
                        trade
                            .exit_reason()
                            .map(|r| r.as_str())
                            .unwrap_or("CLOSED"),
                        trade.net_pnl,
                        trade.pnl_percent
                    );
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Console missed {} engine events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                let _ = shutdown_tx.send(()).await;
            }
            Err(e) => {
                error!("Error setting up signal handler: {}", e);
            }
        }
    });

    engine.start().await?;

    let mut status_ticker = interval(Duration::from_secs(status_interval.max(1)));
    status_ticker.tick().await;

    loop {
        tokio::select! {
            _ = status_ticker.tick() => {
                let state = engine.portfolio().snapshot().await;
                let stream = engine
                    .stream_health()
                    .map(|h| format!("{:?} ({} msgs, {} reconnects)", h.status, h.messages_received, h.reconnect_count))
                    .unwrap_or_else(|| "disabled".to_string());
                info!(
                    "📊 Balance {:.2} | open {} | trades {} | win rate {:.1}% | P&L {:+.2} | watchlist {} | stream {}",
                    state.balance,
                    state.open_positions.len(),
                    state.total_trades,
                    state.win_rate(),
                    state.total_pnl,
                    engine.watchlist().len(),
                    stream
                );
                let slippage = engine.slippage_stats();
                if slippage.count > 0 {
                    info!(
                        "📊 Slippage over {} fills: avg {:+.3}% (min {:+.3}%, max {:+.3}%)",
                        slippage.count,
                        slippage.average_pct,
                        slippage.min_pct,
                        slippage.max_pct
                    );
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    engine.stop().await?;
    info!("Trading session ended.");
    Ok(())
}
