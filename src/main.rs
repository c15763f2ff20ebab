//! Crypto scalper - main entry point
//!
//! Subcommands:
//! - run: start the trading engine (paper or live)
//! - scan: rank the market once and print the opportunities
//! - status: print the persisted portfolio and recent trades

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "crypto-scalper")]
#[command(about = "Momentum scalping engine for spot crypto markets", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the trading engine
    Run {
        /// Path to configuration file (defaults apply when missing)
        #[arg(short, long, default_value = "configs/scalper.json")]
        config: String,

        /// Paper trading mode (safe, no real money)
        #[arg(long)]
        paper: bool,

        /// Live trading mode (CAUTION - REAL MONEY!)
        #[arg(long)]
        live: bool,

        /// Portfolio snapshot path (overrides config)
        #[arg(long)]
        portfolio: Option<String>,

        /// Seconds between status summaries
        #[arg(long, default_value = "60")]
        status_interval: u64,
    },

    /// Scan the market once and print ranked opportunities
    Scan {
        /// Path to configuration file (defaults apply when missing)
        #[arg(short, long, default_value = "configs/scalper.json")]
        config: String,

        /// Number of opportunities to show (overrides config)
        #[arg(short, long)]
        top: Option<usize>,

        /// Print rejected-instrument counts as well
        #[arg(long)]
        stats: bool,
    },

    /// Show the persisted portfolio
    Status {
        /// Path to configuration file (defaults apply when missing)
        #[arg(short, long, default_value = "configs/scalper.json")]
        config: String,

        /// Portfolio snapshot path (overrides config)
        #[arg(long)]
        portfolio: Option<String>,

        /// Number of journal trades to show
        #[arg(short, long, default_value = "10")]
        trades: usize,
    },
}

fn setup_logging(verbose: bool, json: bool, command_name: &str, log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = log_dir.join(&log_filename);

    // Filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn,tungstenite=warn,tokio_tungstenite=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never(log_dir, &log_filename);

    if json {
        let console_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(false);

        // File layer without ANSI colors
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();
    }

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Run { .. } => "run",
        Commands::Scan { .. } => "scan",
        Commands::Status { .. } => "status",
    };

    setup_logging(cli.verbose, cli.json_logs, command_name, Path::new("logs"))?;

    match cli.command {
        Commands::Run {
            config,
            paper,
            live,
            portfolio,
            status_interval,
        } => commands::run::run(config, paper, live, portfolio, status_interval),

        Commands::Scan { config, top, stats } => commands::scan::run(config, top, stats),

        Commands::Status {
            config,
            portfolio,
            trades,
        } => commands::status::run(config, portfolio, trades),
    }
}
