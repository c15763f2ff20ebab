//! Persisted portfolio summary

use anyhow::{Context, Result};

use crypto_scalper::portfolio::{PortfolioStore, TradeJournal};

pub fn run(config_path: String, portfolio_override: Option<String>, trades: usize) -> Result<()> {
    let mut config = super::load_config(&config_path)?;
    if let Some(path) = portfolio_override {
        config.persistence.portfolio_path = path;
    }
    let persistence = &config.persistence;

    let state = PortfolioStore::new(&persistence.portfolio_path)
        .load(config.trading.initial_balance)
        .with_context(|| format!("Failed to read {}", persistence.portfolio_path))?;

    println!("\n{}", "=".repeat(60));
    println!("PORTFOLIO STATUS");
    println!("{}", "=".repeat(60));
    println!("Balance:            {:.2}", state.balance);
    println!("Equity:             {:.2}", state.equity());
    println!("Initial Balance:    {:.2}", state.initial_balance);
    println!("Peak Balance:       {:.2}", state.peak_balance);
    println!("Total P&L:          {:+.2}", state.total_pnl);
    println!("Total Fees:         {:.2}", state.total_fees);
    println!("Total Trades:       {}", state.total_trades);
    println!("Win Rate:           {:.2}%", state.win_rate());
    println!("Last Updated:       {}", state.last_updated.format("%Y-%m-%d %H:%M:%S UTC"));

    println!("{}", "-".repeat(60));
    println!("OPEN POSITIONS ({})", state.open_positions.len());
    for p in &state.open_positions {
        println!(
            "  {:<12} entry {:.8} qty {:.8} SL {:.8} TP {:.8}{}",
            p.symbol.as_str(),
            p.entry_price,
            p.quantity,
            p.stop_loss,
            p.take_profit,
            if p.trailing_armed { " [trailing]" } else { "" }
        );
    }

    if let Some(journal_path) = &persistence.journal_path {
        if std::path::Path::new(journal_path).exists() {
            let journal = TradeJournal::open(journal_path)?;
            let recent = journal.recent(trades)?;
            println!("{}", "-".repeat(60));
            println!("RECENT TRADES ({} journaled)", journal.count()?);
            for t in recent {
                println!(
                    "  {} {:<12} {:>18} net {:+.4} ({:+.2}%)",
                    t.exit_time.format("%m-%d %H:%M"),
                    t.symbol,
                    t.exit_reason,
                    t.net_pnl,
                    t.pnl_pct
                );
            }

            let slippage = journal.slippage_stats()?;
            if slippage.count > 0 {
                println!("{}", "-".repeat(60));
                println!("SLIPPAGE ({} fills)", slippage.count);
                println!("  Average:          {:+.3}%", slippage.average_pct);
                println!("  Min:              {:+.3}%", slippage.min_pct);
                println!("  Max:              {:+.3}%", slippage.max_pct);
            }
        }
    }
    println!("{}", "=".repeat(60));

    Ok(())
}
