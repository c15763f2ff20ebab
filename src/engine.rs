//! Trading engine orchestration
//!
//! Workers, each on its own task:
//! - streaming receive loop (inside [`StreamingMarketDataClient`])
//! - polling fallback
//! - price dispatcher: routes events to monitors, triggers real-time entries
//! - scan loop: ranks the market, refreshes the watchlist, enters
//! - stream supervisor: restarts a stream that gave up
//! - autosave
//! - one monitor per open position
//!
//! Every worker watches the same shutdown signal. [`TradingEngine::stop`]
//! raises it, joins every task and writes a final snapshot. Open positions
//! stay open across a stop and get fresh monitors on the next start.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::common::LinearBackoff;
use crate::config::Config;
use crate::entry::EntryPlan;
use crate::events::{EngineEvent, EventBus, LogLevel};
use crate::exchange::ExchangeClient;
use crate::feed::{
    CandleBook, ConnectionStatus, FeedHealth, PollingFallbackFeed, StreamConfig,
    StreamingMarketDataClient, Watchlist,
};
use crate::monitor::{ExitDecision, ExitExecutor, PositionMonitor};
use crate::portfolio::{Funds, Portfolio};
use crate::risk::{RiskGate, RiskGateConfig};
use crate::scanner::{CandleIndicators, OpportunityScanner};
use crate::slippage::{SlippageRecord, SlippageStats, SlippageTracker, DEFAULT_SLIPPAGE_HISTORY};
use crate::types::{ClosedTrade, Opportunity, Position, PriceEvent, Side, Symbol};

const MONITOR_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Fill bookkeeping
// ============================================================================

/// Compares live fills with the price the engine acted on
#[derive(Clone)]
struct FillRecorder {
    tracker: SlippageTracker,
    portfolio: Portfolio,
    events: EventBus,
    enabled: bool,
}

impl FillRecorder {
    fn record(&self, symbol: &Symbol, side: Side, expected: f64, executed: Option<f64>) {
        if !self.enabled {
            return;
        }
        let Some(record) = executed
            .and_then(|price| SlippageRecord::new(symbol.clone(), side, expected, price, Utc::now()))
        else {
            return;
        };

        let exceeded = self.tracker.exceeds_threshold(&record);
        let (level, icon) = if exceeded {
            (LogLevel::Warning, "⚠️")
        } else {
            (LogLevel::Info, "📊")
        };
        self.events.log(
            level,
            format!(
                "{} SLIPPAGE {} {} {:+.3}% (expected {:.8}, executed {:.8}){}",
                icon,
                side,
                symbol,
                record.slippage_pct,
                record.expected_price,
                record.executed_price,
                if exceeded {
                    format!(" above {:.2}%", self.tracker.max_acceptable_pct())
                } else {
                    String::new()
                }
            ),
        );
        if let Err(e) = self.portfolio.store().record_slippage(&record) {
            warn!("Failed to journal slippage on {}: {}", symbol, e);
        }
        self.tracker.record(record);
    }
}

/// Per-symbol spacing between entry attempts
struct EntryCooldowns {
    period: Duration,
    last: StdMutex<HashMap<Symbol, Instant>>,
}

impl EntryCooldowns {
    fn new(period: Duration) -> Self {
        Self {
            period,
            last: StdMutex::new(HashMap::new()),
        }
    }

    /// Claim the cooldown for `symbol`. False while it is still running.
    fn claim(&self, symbol: &Symbol, now: Instant) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        last.retain(|_, at| now.saturating_duration_since(*at) < self.period);
        if last.contains_key(symbol) {
            return false;
        }
        last.insert(symbol.clone(), now);
        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

// ============================================================================
// Close routine
// ============================================================================

/// The only place positions are closed. In live mode the market SELL must
/// succeed before the close is recorded.
struct CloseRoutine {
    portfolio: Portfolio,
    exchange: Arc<dyn ExchangeClient>,
    events: EventBus,
    fills: FillRecorder,
    live: bool,
}

#[async_trait]
impl ExitExecutor for CloseRoutine {
    async fn update_levels(&self, position: &Position) {
        self.portfolio.update_levels(position).await;
    }

    async fn execute_exit(
        &self,
        position: &Position,
        decision: &ExitDecision,
    ) -> Result<Option<ClosedTrade>> {
        let symbol = &position.symbol;
        let mut exit_price = decision.price;

        if self.live {
            match self
                .exchange
                .place_market_order(symbol, Side::Sell, position.quantity)
                .await
            {
                Ok(ack) => {
                    if let Some(average) = ack.average_price.filter(|p| p.is_finite() && *p > 0.0) {
                        exit_price = average;
                    }
                    info!("SELL order {} filled for {}", ack.order_id, symbol);
                    self.fills
                        .record(symbol, Side::Sell, decision.price, ack.average_price);
                }
                Err(e) => {
                    self.events.log(
                        LogLevel::Error,
                        format!("❌ SELL {} failed [{}]: {}", symbol, e.class(), e),
                    );
                    self.events.connectivity("orders", false, Some(e.class()));
                    return Err(e).with_context(|| format!("market sell of {}", symbol));
                }
            }
        }

        let closed = self
            .portfolio
            .close(symbol, exit_price, decision.reason, decision.time)
            .await
            .with_context(|| format!("closing {}", symbol))?;

        let Some((trade, funds)) = closed else {
            return Ok(None);
        };

        let icon = if trade.is_win() { "✅" } else { "🔴" };
        self.events.log(
            LogLevel::Info,
            format!(
                "{} SELL {} @ {:.8} [{}] net {:+.4} ({:+.2}%) fees {:.4}",
                icon,
                symbol,
                exit_price,
                decision.reason,
                trade.net_pnl,
                trade.pnl_percent,
                trade.total_fees
            ),
        );
        self.events.emit(EngineEvent::PositionClosed {
            trade: trade.clone(),
        });
        self.events.emit(EngineEvent::BalanceUpdate {
            balance: funds.balance,
            open_positions: funds.open_positions,
        });
        Ok(Some(trade))
    }
}

// ============================================================================
// Shared engine state
// ============================================================================

struct MonitorSlot {
    prices: mpsc::Sender<PriceEvent>,
    task: JoinHandle<()>,
}

struct EngineInner {
    config: Config,
    exchange: Arc<dyn ExchangeClient>,
    portfolio: Portfolio,
    events: EventBus,
    scanner: OpportunityScanner,
    gate: RiskGate,
    watchlist: Watchlist,
    candles: CandleBook,
    stream: Option<StreamingMarketDataClient>,
    closer: Arc<CloseRoutine>,
    monitors: StdMutex<HashMap<Symbol, MonitorSlot>>,
    cooldowns: EntryCooldowns,
    fills: FillRecorder,
    /// Serializes entries so admission and open see the same portfolio
    entry_lock: Mutex<()>,
    shutdown: watch::Sender<bool>,
    live: bool,
}

impl EngineInner {
    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn live_label(&self) -> &'static str {
        if self.live {
            "LIVE"
        } else {
            "PAPER"
        }
    }

    /// Start a monitor task for an open position
    fn spawn_monitor(&self, position: Position) {
        let symbol = position.symbol.clone();
        let (tx, rx) = mpsc::channel(MONITOR_CHANNEL_CAPACITY);
        let monitor = PositionMonitor::new(position, self.config.exits.clone());
        let executor: Arc<dyn ExitExecutor> = self.closer.clone();
        let task = tokio::spawn(monitor.run(rx, executor, self.shutdown.subscribe()));

        let mut monitors = self.monitors.lock().unwrap_or_else(PoisonError::into_inner);
        monitors.retain(|_, slot| !slot.task.is_finished());
        monitors.insert(symbol, MonitorSlot { prices: tx, task });
    }

    /// Forward a price to the symbol's monitor, keeping arrival order
    fn route_to_monitor(&self, event: &PriceEvent) {
        let mut monitors = self.monitors.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = monitors.get(&event.symbol) else {
            return;
        };
        match slot.prices.try_send(event.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Monitor for {} busy, tick dropped", event.symbol)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                monitors.remove(&event.symbol);
            }
        }
    }

    fn claim_cooldown(&self, symbol: &Symbol) -> bool {
        self.cooldowns.claim(symbol, Instant::now())
    }

    /// Try to open a position. Returns true when one was opened.
    async fn try_enter(&self, symbol: &Symbol, price: f64, change_pct: f64, origin: &str) -> bool {
        let _entry = self.entry_lock.lock().await;
        if self.is_shutting_down() {
            return false;
        }

        let today = Utc::now().date_naive();
        if let Err(rejection) = self.portfolio.admit(&self.gate, symbol, today).await {
            debug!("Entry on {} ({}) refused: {}", symbol, origin, rejection);
            return false;
        }

        let tier = self.scanner.tier(symbol);
        let mut plan = match EntryPlan::new(
            symbol.clone(),
            price,
            change_pct,
            tier,
            &self.config.trading,
            &self.config.fees,
        ) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Entry plan for {} rejected: {}", symbol, e);
                return false;
            }
        };

        if let Err(e) = plan.validate() {
            warn!("Entry plan for {} rejected: {}", symbol, e);
            return false;
        }

        let mut order_id = None;
        if self.live {
            match self
                .exchange
                .place_market_order(symbol, Side::Buy, plan.quantity)
                .await
            {
                Ok(ack) => {
                    self.fills.record(symbol, Side::Buy, price, ack.average_price);
                    plan = match plan.with_fill(ack.average_price.unwrap_or(price), ack.executed_qty) {
                        Ok(filled) => filled,
                        Err(e) => {
                            self.events.log(
                                LogLevel::Error,
                                format!("❌ BUY {} order {} not filled: {}", symbol, ack.order_id, e),
                            );
                            return false;
                        }
                    };
                    order_id = Some(ack.order_id);
                }
                Err(e) => {
                    self.events.log(
                        LogLevel::Error,
                        format!("❌ BUY {} failed [{}]: {}", symbol, e.class(), e),
                    );
                    self.events.connectivity("orders", false, Some(e.class()));
                    return false;
                }
            }
        }

        let position = match plan.into_position(Utc::now(), order_id) {
            Ok(position) => position,
            Err(e) => {
                warn!("Entry on {} rejected: {}", symbol, e);
                return false;
            }
        };
        let funds: Funds = match self.portfolio.open(position.clone()).await {
            Ok(funds) => funds,
            Err(e) => {
                warn!("Could not record entry on {}: {}", symbol, e);
                return false;
            }
        };

        self.spawn_monitor(position.clone());

        self.events.log(
            LogLevel::Info,
            format!(
                "🟢 BUY {} [{}|{}] @ {:.8} qty {:.8} SL {:.8} TP {:.8} (+{:.2}%)",
                symbol,
                self.live_label(),
                origin,
                position.entry_price,
                position.quantity,
                position.stop_loss,
                position.take_profit,
                (position.take_profit / position.entry_price - 1.0) * 100.0
            ),
        );
        self.events.emit(EngineEvent::TradeExecuted {
            position: position.clone(),
        });
        self.events.emit(EngineEvent::BalanceUpdate {
            balance: funds.balance,
            open_positions: funds.open_positions,
        });
        true
    }

    /// Watchlist for a scan result: top opportunities plus every open position
    async fn watch_symbols(&self, opportunities: &[Opportunity]) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = opportunities
            .iter()
            .take(self.config.scanner.max_watchlist)
            .map(|o| o.symbol.clone())
            .collect();
        for position in self.portfolio.open_positions().await {
            if !symbols.contains(&position.symbol) {
                symbols.push(position.symbol);
            }
        }
        symbols
    }

    async fn refresh_watchlist(&self, symbols: Vec<Symbol>) {
        if self.is_shutting_down() {
            return;
        }
        if self.watchlist.replace(symbols.clone()) {
            info!("Watchlist updated: {} symbols", symbols.len());
            if let Some(stream) = &self.stream {
                stream.restart(&symbols).await;
            }
        } else if let Some(stream) = &self.stream {
            // No-op unless the stream is down for the same set
            stream.start(&symbols).await;
        }
    }
}

// ============================================================================
// Workers
// ============================================================================

async fn run_dispatcher(
    engine: Arc<EngineInner>,
    mut prices: mpsc::Receiver<PriceEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            event = prices.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        engine.route_to_monitor(&event);

        if engine.watchlist.contains(&event.symbol)
            && engine.scanner.in_momentum_band(event.change_24h)
            && !engine.portfolio.is_open(&event.symbol).await
            && engine.claim_cooldown(&event.symbol)
        {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .try_enter(&event.symbol, event.price, event.change_24h, "realtime")
                    .await;
            });
        }
    }
    debug!("Price dispatcher stopped");
}

async fn run_scan_loop(engine: Arc<EngineInner>, mut shutdown: watch::Receiver<bool>) {
    let scan = &engine.config.scanner;
    let failure_backoff = LinearBackoff::new(
        Duration::from_secs(60),
        Duration::from_secs(30),
        Duration::from_secs(300),
    );
    let mut failures = 0u32;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let scanned = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            scanned = engine.scanner.scan_exchange(engine.exchange.as_ref()) => scanned,
        };

        let wait = match scanned {
            Ok((opportunities, stats)) => {
                if failures > 0 {
                    engine.events.connectivity("scanner", true, None);
                }
                failures = 0;
                engine.events.emit(EngineEvent::ScanUpdate {
                    stats,
                    opportunities: opportunities.clone(),
                });

                let symbols = engine.watch_symbols(&opportunities).await;
                engine.refresh_watchlist(symbols).await;

                for opportunity in opportunities.iter().take(scan.entries_per_scan) {
                    if *shutdown.borrow() {
                        break;
                    }
                    if engine.claim_cooldown(&opportunity.symbol) {
                        engine
                            .try_enter(
                                &opportunity.symbol,
                                opportunity.last_price,
                                opportunity.change_pct,
                                "scan",
                            )
                            .await;
                    }
                }

                if opportunities.is_empty() {
                    debug!("No opportunities, rescanning sooner");
                    Duration::from_secs(scan.empty_scan_retry_secs)
                } else {
                    Duration::from_secs(scan.scan_interval_secs)
                }
            }
            Err(e) => {
                failures += 1;
                let wait = failure_backoff.delay(failures);
                engine.events.log(
                    LogLevel::Warning,
                    format!(
                        "⚠️ Scan failed [{}] ({} in a row), next attempt in {:?}: {}",
                        e.class(),
                        failures,
                        wait,
                        e
                    ),
                );
                engine.events.connectivity("scanner", false, Some(e.class()));
                wait
            }
        };

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(wait) => {}
        }
    }
    debug!("Scan loop stopped");
}

async fn run_stream_supervisor(
    engine: Arc<EngineInner>,
    mut status: watch::Receiver<ConnectionStatus>,
    mut shutdown: watch::Receiver<bool>,
) {
    let Some(stream) = engine.stream.as_ref() else {
        return;
    };
    let period = Duration::from_secs(engine.config.feed.health_check_interval_secs.max(1));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut was_connected = false;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let connected = *status.borrow_and_update() == ConnectionStatus::Connected;
                if connected != was_connected {
                    was_connected = connected;
                    engine.events.connectivity("stream", connected, None);
                }
            }
            _ = ticker.tick() => {
                let health = stream.health();
                debug!(
                    "Stream health: {:?}, {} messages, {} reconnects, {} stale",
                    health.status,
                    health.messages_received,
                    health.reconnect_count,
                    health.stale_detections
                );
                if health.needs_restart() && !engine.is_shutting_down() {
                    engine.events.log(
                        LogLevel::Warning,
                        "📡 Stream gave up reconnecting, restarting it (polling fallback active)",
                    );
                    stream.restart(&engine.watchlist.symbols()).await;
                }
            }
        }
    }
    debug!("Stream supervisor stopped");
}

// ============================================================================
// Engine
// ============================================================================

pub struct TradingEngine {
    inner: Arc<EngineInner>,
    price_rx: Mutex<Option<mpsc::Receiver<PriceEvent>>>,
    price_tx: mpsc::Sender<PriceEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TradingEngine {
    /// Build an engine. Live mode requires API credentials.
    pub fn new(config: Config, exchange: Arc<dyn ExchangeClient>, portfolio: Portfolio) -> Result<Self> {
        let live = !config.trading.simulation_mode;
        if live {
            config
                .credentials()
                .context("live trading needs exchange credentials")?;
        }

        let events = EventBus::default();
        let (price_tx, price_rx) = mpsc::channel(config.feed.channel_capacity.max(1));
        let candles = CandleBook::new(config.feed.candle_history);

        let stream = config.feed.streaming_enabled.then(|| {
            StreamingMarketDataClient::new(
                StreamConfig::from_feed_config(&config.feed, &config.exchange.ws_url),
                price_tx.clone(),
                candles.clone(),
            )
        });

        let scanner = OpportunityScanner::new(
            config.scanner.clone(),
            Arc::new(CandleIndicators::new(candles.clone())),
        );
        let gate = RiskGateConfig::from_trading_config(&config.trading).build();
        let fills = FillRecorder {
            tracker: SlippageTracker::new(
                DEFAULT_SLIPPAGE_HISTORY,
                config.trading.max_acceptable_slippage_pct,
            ),
            portfolio: portfolio.clone(),
            events: events.clone(),
            enabled: config.trading.slippage_tracking,
        };
        let closer = Arc::new(CloseRoutine {
            portfolio: portfolio.clone(),
            exchange: Arc::clone(&exchange),
            events: events.clone(),
            fills: fills.clone(),
            live,
        });
        let (shutdown, _) = watch::channel(false);
        let cooldowns = EntryCooldowns::new(Duration::from_secs(config.trading.entry_cooldown_secs));

        let inner = EngineInner {
            config,
            exchange,
            portfolio,
            events,
            scanner,
            gate,
            watchlist: Watchlist::default(),
            candles,
            stream,
            closer,
            monitors: StdMutex::new(HashMap::new()),
            cooldowns,
            fills,
            entry_lock: Mutex::new(()),
            shutdown,
            live,
        };

        Ok(Self {
            inner: Arc::new(inner),
            price_rx: Mutex::new(Some(price_rx)),
            price_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.inner.portfolio
    }

    pub fn watchlist(&self) -> &Watchlist {
        &self.inner.watchlist
    }

    pub fn candles(&self) -> &CandleBook {
        &self.inner.candles
    }

    /// Slippage of recent live fills
    pub fn slippage_stats(&self) -> SlippageStats {
        self.inner.fills.tracker.stats()
    }

    pub fn slippage(&self) -> &SlippageTracker {
        &self.inner.fills.tracker
    }

    pub fn stream_health(&self) -> Option<FeedHealth> {
        self.inner.stream.as_ref().map(|s| s.health())
    }

    /// Symbols with a running monitor
    pub fn monitored(&self) -> Vec<Symbol> {
        let monitors = self.inner.monitors.lock().unwrap_or_else(PoisonError::into_inner);
        monitors
            .iter()
            .filter(|(_, slot)| !slot.task.is_finished())
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    /// Sender into the price pipeline, for additional feeds
    pub fn price_sender(&self) -> mpsc::Sender<PriceEvent> {
        self.price_tx.clone()
    }

    /// Restore monitors and spawn every worker. Fails if already started.
    pub async fn start(&self) -> Result<()> {
        let price_rx = self
            .price_rx
            .lock()
            .await
            .take()
            .context("engine already started")?;
        let inner = &self.inner;

        // Restart recovery
        let open = inner.portfolio.open_positions().await;
        for position in &open {
            info!(
                "♻️  Resuming {} entry {:.8} high {:.8} armed {}",
                position.symbol, position.entry_price, position.highest_price, position.trailing_armed
            );
            inner.spawn_monitor(position.clone());
        }
        inner
            .watchlist
            .replace(open.iter().map(|p| p.symbol.clone()).collect());

        let mut tasks = self.tasks.lock().await;

        let status = match &inner.stream {
            Some(stream) => {
                stream.start(&inner.watchlist.symbols()).await;
                stream.status_receiver()
            }
            None => watch::channel(ConnectionStatus::Idle).1,
        };

        let fallback = PollingFallbackFeed::new(
            Arc::clone(&inner.exchange),
            Duration::from_millis(inner.config.feed.poll_interval_ms),
            inner.watchlist.clone(),
            status.clone(),
            self.price_tx.clone(),
            inner.events.clone(),
        );
        tasks.push(tokio::spawn(fallback.run(inner.shutdown.subscribe())));

        tasks.push(tokio::spawn(run_dispatcher(
            Arc::clone(inner),
            price_rx,
            inner.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(run_scan_loop(
            Arc::clone(inner),
            inner.shutdown.subscribe(),
        )));
        if inner.stream.is_some() {
            tasks.push(tokio::spawn(run_stream_supervisor(
                Arc::clone(inner),
                status,
                inner.shutdown.subscribe(),
            )));
        }
        tasks.push(tokio::spawn(inner.portfolio.clone().run_autosave(
            Duration::from_secs(inner.config.persistence.autosave_interval_secs),
            inner.shutdown.subscribe(),
        )));

        let funds = inner.portfolio.funds().await;
        inner.events.log(
            LogLevel::Info,
            format!(
                "🚀 Engine started [{}] balance {:.2}, {} open positions",
                inner.live_label(),
                funds.balance,
                funds.open_positions
            ),
        );
        inner.events.emit(EngineEvent::BalanceUpdate {
            balance: funds.balance,
            open_positions: funds.open_positions,
        });
        Ok(())
    }

    /// Stop every worker, leave positions open and write a final snapshot
    pub async fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        info!("🛑 Stopping engine...");
        inner.shutdown.send_replace(true);

        if let Some(stream) = &inner.stream {
            stream.stop().await;
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Worker ended abnormally: {}", e);
            }
        }

        // A restart issued by a worker before it saw the signal
        if let Some(stream) = &inner.stream {
            stream.stop().await;
        }

        // In-flight entries finish before monitors are collected
        let _entry = inner.entry_lock.lock().await;
        let monitors: Vec<(Symbol, MonitorSlot)> = inner
            .monitors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (symbol, slot) in monitors {
            if let Err(e) = slot.task.await {
                warn!("Monitor for {} ended abnormally: {}", symbol, e);
            }
        }

        inner
            .portfolio
            .save()
            .await
            .context("final portfolio snapshot")?;

        let funds = inner.portfolio.funds().await;
        inner.events.log(
            LogLevel::Info,
            format!(
                "Engine stopped: balance {:.2}, {} positions left open",
                funds.balance, funds.open_positions
            ),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(pair: &str) -> Symbol {
        Symbol::parse(pair).unwrap()
    }

    #[test]
    fn test_cooldown_blocks_until_period_passes() {
        let cooldowns = EntryCooldowns::new(Duration::from_secs(5));
        let start = Instant::now();
        let btc = sym("BTC/USDT");

        assert!(cooldowns.claim(&btc, start));
        assert!(!cooldowns.claim(&btc, start + Duration::from_secs(4)));
        assert!(cooldowns.claim(&sym("ETH/USDT"), start + Duration::from_secs(4)));
        assert!(cooldowns.claim(&btc, start + Duration::from_secs(5)));
    }

    #[test]
    fn test_expired_cooldowns_are_pruned() {
        let cooldowns = EntryCooldowns::new(Duration::from_secs(5));
        let start = Instant::now();
        for pair in ["BTC/USDT", "ETH/USDT", "SOL/USDT"] {
            assert!(cooldowns.claim(&sym(pair), start));
        }
        assert_eq!(cooldowns.len(), 3);

        assert!(cooldowns.claim(&sym("ADA/USDT"), start + Duration::from_secs(6)));
        assert_eq!(cooldowns.len(), 1);
    }

    #[test]
    fn test_zero_cooldown_keeps_nothing() {
        let cooldowns = EntryCooldowns::new(Duration::ZERO);
        let now = Instant::now();
        assert!(cooldowns.claim(&sym("BTC/USDT"), now));
        assert!(cooldowns.claim(&sym("BTC/USDT"), now));
        assert_eq!(cooldowns.len(), 1);
    }
}
