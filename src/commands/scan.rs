//! One-shot market scan

use anyhow::{Context, Result};
use tracing::info;

use crypto_scalper::scanner::OpportunityScanner;

pub fn run(config_path: String, top: Option<usize>, show_stats: bool) -> Result<()> {
    let mut config = super::load_config(&config_path)?;
    if let Some(top) = top {
        config.scanner.top_n = top.max(1);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let exchange = super::exchange_client(&config)?;
    let scanner = OpportunityScanner::estimated(config.scanner.clone());

    info!("Scanning market...");
    let (opportunities, stats) = runtime
        .block_on(scanner.scan_exchange(&exchange))
        .context("Market scan failed")?;

    println!("\n{}", "=".repeat(72));
    println!("SCAN RESULTS ({} ms)", stats.duration_ms);
    println!("{}", "=".repeat(72));
    println!(
        "{:<4} {:<14} {:>7} {:>14} {:>8} {:>7} {:>8} {:<8}",
        "#", "Symbol", "Score", "Price", "24h %", "Osc", "Signals", "Tier"
    );
    println!("{}", "-".repeat(72));
    for (rank, opp) in opportunities.iter().enumerate() {
        println!(
            "{:<4} {:<14} {:>7.1} {:>14.8} {:>+8.2} {:>7.1} {:>8} {:<8}",
            rank + 1,
            opp.symbol.as_str(),
            opp.score,
            opp.last_price,
            opp.change_pct,
            opp.oscillator,
            opp.signal_count,
            format!("{:?}", opp.tier)
        );
    }
    if opportunities.is_empty() {
        println!("No instrument passed the filters.");
    }

    if show_stats {
        println!("{}", "-".repeat(72));
        println!("Instruments:          {}", stats.total);
        println!("Invalid price:        {}", stats.invalid_price);
        println!("Suffix filtered:      {}", stats.suffix_filtered);
        println!("Low volume:           {}", stats.low_volume);
        println!("Outside band:         {}", stats.outside_band);
        println!("Insufficient signals: {}", stats.insufficient_signals);
        println!("Qualified:            {}", stats.qualified);
    }
    println!("{}", "=".repeat(72));

    Ok(())
}
