//! Opportunity scanner
//!
//! Turns one bulk market snapshot into a ranked list of entry candidates.
//! Each instrument passes, in order:
//! 1. price sanity and pair suffix filter
//! 2. tiered minimum 24h quote volume
//! 3. momentum band `[min_pump, max_pump]`
//! 4. corroborating signal count (momentum, oscillator range, trend, volume spike)
//!
//! Survivors are scored, sorted descending and truncated to `top_n`.

use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::{ScannerConfig, SuffixMode};
use crate::error::ExchangeError;
use crate::exchange::ExchangeClient;
use crate::feed::CandleBook;
use crate::types::{AssetTier, InstrumentSnapshot, Opportunity, Symbol};

// ============================================================================
// Indicator readings
// ============================================================================

/// Indicator outputs the scanner consumes for one instrument
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorReadings {
    /// Oscillator level in `[0, 100]`
    pub oscillator: f64,
    pub trend_bullish: bool,
    /// Current volume as a percent of its recent average; `None` when unknown
    pub volume_ratio: Option<f64>,
}

pub trait IndicatorSource: Send + Sync {
    fn readings(&self, snapshot: &InstrumentSnapshot) -> IndicatorReadings;
}

/// Readings derived from the 24h change alone
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatedIndicators;

impl EstimatedIndicators {
    pub fn oscillator(change_pct: f64) -> f64 {
        (50.0 + change_pct * 2.0).clamp(0.0, 100.0)
    }

    pub fn volume_ratio(change_pct: f64) -> f64 {
        (150.0 + change_pct * 10.0).min(300.0)
    }
}

impl IndicatorSource for EstimatedIndicators {
    fn readings(&self, snapshot: &InstrumentSnapshot) -> IndicatorReadings {
        IndicatorReadings {
            oscillator: Self::oscillator(snapshot.change_pct),
            trend_bullish: snapshot.change_pct > 0.0,
            volume_ratio: Some(Self::volume_ratio(snapshot.change_pct)),
        }
    }
}

/// Uses streamed candles for the volume ratio once a symbol has at least two;
/// falls back to estimates before that.
#[derive(Debug, Clone)]
pub struct CandleIndicators {
    candles: CandleBook,
}

impl CandleIndicators {
    pub fn new(candles: CandleBook) -> Self {
        Self { candles }
    }
}

impl IndicatorSource for CandleIndicators {
    fn readings(&self, snapshot: &InstrumentSnapshot) -> IndicatorReadings {
        let mut readings = EstimatedIndicators.readings(snapshot);
        if self.candles.recent(&snapshot.symbol).len() >= 2 {
            readings.volume_ratio = self.candles.volume_ratio(&snapshot.symbol);
        }
        readings
    }
}

// ============================================================================
// Scan results
// ============================================================================

/// Why an instrument did not make the list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    InvalidPrice,
    Suffix,
    LowVolume,
    OutsideBand,
    InsufficientSignals,
}

/// Per-cycle funnel counters, published with every `scan_update`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanStats {
    pub total: usize,
    pub invalid_price: usize,
    pub suffix_filtered: usize,
    pub low_volume: usize,
    pub outside_band: usize,
    pub insufficient_signals: usize,
    pub qualified: usize,
    pub returned: usize,
    pub duration_ms: u64,
}

impl ScanStats {
    fn count(&mut self, rejection: Rejection) {
        match rejection {
            Rejection::InvalidPrice => self.invalid_price += 1,
            Rejection::Suffix => self.suffix_filtered += 1,
            Rejection::LowVolume => self.low_volume += 1,
            Rejection::OutsideBand => self.outside_band += 1,
            Rejection::InsufficientSignals => self.insufficient_signals += 1,
        }
    }
}

// ============================================================================
// Scanner
// ============================================================================

pub struct OpportunityScanner {
    config: ScannerConfig,
    indicators: Arc<dyn IndicatorSource>,
}

impl OpportunityScanner {
    pub fn new(config: ScannerConfig, indicators: Arc<dyn IndicatorSource>) -> Self {
        Self { config, indicators }
    }

    /// Scanner driven by estimated indicators only
    pub fn estimated(config: ScannerConfig) -> Self {
        Self::new(config, Arc::new(EstimatedIndicators))
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn tier(&self, symbol: &Symbol) -> AssetTier {
        let base = symbol.base();
        if self.config.major_assets.iter().any(|a| a == base) {
            AssetTier::Major
        } else if self.config.large_cap_assets.iter().any(|a| a == base) {
            AssetTier::LargeCap
        } else {
            AssetTier::Other
        }
    }

    pub fn min_volume(&self, tier: AssetTier) -> f64 {
        match tier {
            AssetTier::Major => self.config.min_volume_major,
            AssetTier::LargeCap => self.config.min_volume_large_cap,
            AssetTier::Other => self.config.min_volume_other,
        }
    }

    pub fn passes_suffix(&self, symbol: &Symbol) -> bool {
        let listed = self
            .config
            .pair_suffixes
            .iter()
            .any(|s| s.eq_ignore_ascii_case(symbol.quote()));
        match self.config.suffix_mode {
            SuffixMode::Include => listed,
            SuffixMode::Exclude => !listed,
        }
    }

    pub fn in_momentum_band(&self, change_pct: f64) -> bool {
        change_pct >= self.config.min_pump && change_pct <= self.config.max_pump
    }

    /// Run every filter on one instrument
    pub fn evaluate(&self, snapshot: &InstrumentSnapshot) -> Result<Opportunity, Rejection> {
        if !snapshot.has_valid_price() {
            return Err(Rejection::InvalidPrice);
        }
        if !self.passes_suffix(&snapshot.symbol) {
            return Err(Rejection::Suffix);
        }

        let tier = self.tier(&snapshot.symbol);
        if snapshot.quote_volume < self.min_volume(tier) {
            return Err(Rejection::LowVolume);
        }
        if !self.in_momentum_band(snapshot.change_pct) {
            return Err(Rejection::OutsideBand);
        }

        let readings = self.indicators.readings(snapshot);
        let signals = self.count_signals(&readings);
        if signals < self.config.min_required_signals {
            return Err(Rejection::InsufficientSignals);
        }

        Ok(Opportunity {
            symbol: snapshot.symbol.clone(),
            score: score(snapshot.change_pct, snapshot.quote_volume, signals, readings.oscillator),
            last_price: snapshot.last_price,
            volume_24h: snapshot.quote_volume,
            change_pct: snapshot.change_pct,
            signal_count: signals,
            oscillator: readings.oscillator,
            volume_ratio: readings.volume_ratio,
            tier,
        })
    }

    fn count_signals(&self, readings: &IndicatorReadings) -> usize {
        // Momentum in band is already established by the time signals are counted
        let mut signals = 1;
        if readings.oscillator >= self.config.oscillator_min
            && readings.oscillator <= self.config.oscillator_max
        {
            signals += 1;
        }
        if readings.trend_bullish {
            signals += 1;
        }
        if readings
            .volume_ratio
            .is_some_and(|r| r.is_finite() && r >= self.config.volume_spike_threshold)
        {
            signals += 1;
        }
        signals
    }

    /// Rank a bulk snapshot
    pub fn scan(&self, snapshots: &[InstrumentSnapshot]) -> (Vec<Opportunity>, ScanStats) {
        let started = Instant::now();
        let mut stats = ScanStats {
            total: snapshots.len(),
            ..ScanStats::default()
        };

        let mut opportunities: Vec<Opportunity> = snapshots
            .iter()
            .filter_map(|snapshot| match self.evaluate(snapshot) {
                Ok(opportunity) => Some(opportunity),
                Err(rejection) => {
                    stats.count(rejection);
                    None
                }
            })
            .collect();

        stats.qualified = opportunities.len();
        opportunities.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        opportunities.truncate(self.config.top_n);
        stats.returned = opportunities.len();
        stats.duration_ms = started.elapsed().as_millis() as u64;

        debug!(
            "Scan funnel: total={} suffix={} volume={} band={} signals={} qualified={}",
            stats.total,
            stats.suffix_filtered,
            stats.low_volume,
            stats.outside_band,
            stats.insufficient_signals,
            stats.qualified
        );
        (opportunities, stats)
    }

    /// Fetch a bulk snapshot from the exchange and rank it
    pub async fn scan_exchange(
        &self,
        exchange: &dyn ExchangeClient,
    ) -> Result<(Vec<Opportunity>, ScanStats), ExchangeError> {
        let snapshots = exchange.fetch_snapshot().await?;
        let (opportunities, stats) = self.scan(&snapshots);
        info!(
            "🔍 Scanned {} instruments: {} qualified, top {} returned",
            stats.total, stats.qualified, stats.returned
        );
        Ok((opportunities, stats))
    }
}

/// Weighted blend of momentum, volume, signal count and oscillator, clipped to `[0, 100]`
pub fn score(change_pct: f64, quote_volume: f64, signals: usize, oscillator: f64) -> f64 {
    let momentum = (change_pct * 10.0).min(40.0);
    let volume = (quote_volume / 10_000_000.0).min(20.0);
    let confirmation = signals as f64 * 5.0;
    let oscillator = (oscillator - 50.0) / 5.0;
    (momentum + volume + confirmation + oscillator).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    use crate::types::Candle;

    fn snap(pair: &str, price: f64, volume: f64, change: f64) -> InstrumentSnapshot {
        InstrumentSnapshot {
            symbol: Symbol::parse(pair).unwrap(),
            last_price: price,
            quote_volume: volume,
            change_pct: change,
        }
    }

    fn scanner() -> OpportunityScanner {
        OpportunityScanner::estimated(ScannerConfig::default())
    }

    #[test]
    fn test_tier_classification() {
        let s = scanner();
        assert_eq!(s.tier(&Symbol::parse("BTC/USDT").unwrap()), AssetTier::Major);
        assert_eq!(s.tier(&Symbol::parse("SOL/USDT").unwrap()), AssetTier::LargeCap);
        assert_eq!(s.tier(&Symbol::parse("PEPE/USDT").unwrap()), AssetTier::Other);
    }

    #[test]
    fn test_tiered_volume_threshold() {
        let s = scanner();
        // 10M clears the large-cap bar but not the major one
        assert_eq!(
            s.evaluate(&snap("BTC/USDT", 50_000.0, 10_000_000.0, 1.2)),
            Err(Rejection::LowVolume)
        );
        assert!(s.evaluate(&snap("SOL/USDT", 150.0, 10_000_000.0, 1.2)).is_ok());
    }

    #[test]
    fn test_momentum_band_edges() {
        let s = scanner();
        assert!(s.in_momentum_band(0.8));
        assert!(s.in_momentum_band(2.0));
        assert!(!s.in_momentum_band(0.79));
        assert!(!s.in_momentum_band(2.5));
        assert_eq!(
            s.evaluate(&snap("ETH/USDT", 3000.0, 90_000_000.0, 4.0)),
            Err(Rejection::OutsideBand)
        );
    }

    #[test]
    fn test_suffix_modes() {
        let mut config = ScannerConfig::default();
        config.pair_suffixes = vec!["USDT".into()];
        let include = OpportunityScanner::estimated(config.clone());
        assert!(include.passes_suffix(&Symbol::parse("ADA/USDT").unwrap()));
        assert!(!include.passes_suffix(&Symbol::parse("ADA/BNB").unwrap()));

        config.suffix_mode = SuffixMode::Exclude;
        let exclude = OpportunityScanner::estimated(config);
        assert!(!exclude.passes_suffix(&Symbol::parse("ADA/USDT").unwrap()));
        assert!(exclude.passes_suffix(&Symbol::parse("ADA/BNB").unwrap()));
    }

    #[test]
    fn test_signal_gate() {
        let mut config = ScannerConfig::default();
        config.min_required_signals = 4;
        config.volume_spike_threshold = 1000.0;
        let s = OpportunityScanner::estimated(config);
        assert_eq!(
            s.evaluate(&snap("ADA/USDT", 0.5, 20_000_000.0, 1.0)),
            Err(Rejection::InsufficientSignals)
        );
    }

    #[test]
    fn test_score_clipped() {
        assert_eq!(score(100.0, 1e12, 10, 100.0), 100.0);
        assert_eq!(score(-50.0, 0.0, 0, 0.0), 0.0);
        // 1.5% on 30M with 4 signals at oscillator 53
        assert_relative_eq!(score(1.5, 30_000_000.0, 4, 53.0), 15.0 + 3.0 + 20.0 + 0.6);
    }

    #[test]
    fn test_scan_ranks_and_truncates() {
        let mut config = ScannerConfig::default();
        config.top_n = 2;
        let s = OpportunityScanner::estimated(config);
        let snapshots = vec![
            snap("ADA/USDT", 0.5, 20_000_000.0, 0.9),
            snap("SOL/USDT", 150.0, 20_000_000.0, 1.9),
            snap("DOT/USDT", 7.0, 20_000_000.0, 1.4),
            snap("XRP/USDT", 0.0, 20_000_000.0, 1.4),
        ];
        let (ranked, stats) = s.scan(&snapshots);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.invalid_price, 1);
        assert_eq!(stats.qualified, 3);
        assert_eq!(stats.returned, 2);
        assert_eq!(ranked[0].symbol.as_str(), "SOL/USDT");
        assert_eq!(ranked[1].symbol.as_str(), "DOT/USDT");
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_zero_average_candle_volume_not_counted() {
        let book = CandleBook::new(10);
        let symbol = Symbol::parse("ADA/USDT").unwrap();
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        for (i, volume) in [0.0, 0.0, 500.0].into_iter().enumerate() {
            book.push(
                &symbol,
                Candle {
                    datetime: t0 + Duration::minutes(i as i64),
                    open: 0.5,
                    high: 0.5,
                    low: 0.5,
                    close: 0.5,
                    volume,
                },
            );
        }

        let indicators = CandleIndicators::new(book);
        let readings = indicators.readings(&snap("ADA/USDT", 0.5, 20_000_000.0, 1.0));
        assert_eq!(readings.volume_ratio, None);

        let s = OpportunityScanner::new(ScannerConfig::default(), Arc::new(indicators));
        let opportunity = s.evaluate(&snap("ADA/USDT", 0.5, 20_000_000.0, 1.0)).unwrap();
        // momentum, oscillator and trend; no volume spike
        assert_eq!(opportunity.signal_count, 3);
    }
}
