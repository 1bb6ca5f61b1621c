//! Per-asset price history with volatility and trend analytics.
//!
//! History is a bounded, newest-first log fed by the aggregation engine.
//! Volatility is the coefficient of variation over a time window; trend is
//! a short/long moving-average crossover. "No data" is a representable
//! state for both, not an error. Recording a price also evaluates the
//! volatility and deviation alert conditions.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregator::AggregatedPrice;
use crate::clock::Clock;

/// Maximum retained entries per symbol.
const MAX_ENTRIES_PER_SYMBOL: usize = 10_000;

/// TTL for cached volatility results.
const VOLATILITY_CACHE_TTL_MS: u64 = 5 * 60 * 1000;

/// Points required before a trend is anything but sideways.
const TREND_MIN_POINTS: usize = 10;

/// Separation between the short and long moving averages (percent) needed
/// to leave the sideways classification.
const TREND_SEPARATION_PCT: f64 = 2.0;

/// Volatility alert thresholds (percent, 1-hour window).
const VOLATILITY_HIGH_PCT: f64 = 15.0;
const VOLATILITY_CRITICAL_PCT: f64 = 25.0;

/// Cross-source deviation alert thresholds (percent).
const DEVIATION_HIGH_PCT: f64 = 10.0;
const DEVIATION_CRITICAL_PCT: f64 = 20.0;

/// One recorded price point, derived from an [`AggregatedPrice`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub symbol: String,
    pub price: f64,
    pub confidence: f64,
    pub deviation_pct: f64,
    pub source_count: usize,
    pub timestamp_ms: u64,
}

impl From<&AggregatedPrice> for PriceHistoryEntry {
    fn from(agg: &AggregatedPrice) -> Self {
        Self {
            symbol: agg.symbol.clone(),
            price: agg.price,
            confidence: agg.confidence,
            deviation_pct: agg.deviation_pct,
            source_count: agg.source_count,
            timestamp_ms: agg.timestamp_ms,
        }
    }
}

/// Volatility over a time window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolatilityMetrics {
    pub symbol: String,
    pub period_hours: u64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Percent price change from the oldest to the newest point in window
    pub change_pct: f64,
    /// Coefficient of variation: stddev / mean * 100
    pub volatility_pct: f64,
    pub sample_count: usize,
}

/// Trend direction from moving-average crossover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Sideways,
}

/// Moving-average trend analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub symbol: String,
    pub direction: TrendDirection,
    /// Normalized MA gap, capped at 100
    pub strength: f64,
    /// Minimum of the last 20 points
    pub support: f64,
    /// Maximum of the last 20 points
    pub resistance: f64,
    /// Percent change over the last 5 points
    pub momentum_pct: f64,
}

impl TrendAnalysis {
    fn sideways(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            direction: TrendDirection::Sideways,
            strength: 0.0,
            support: 0.0,
            resistance: 0.0,
            momentum_pct: 0.0,
        }
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertSeverity {
    High,
    Critical,
}

/// What condition tripped a price alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceAlertKind {
    /// 1-hour volatility above threshold
    Volatility,
    /// Cross-source deviation of a single recorded entry above threshold
    Deviation,
}

/// Advisory signal raised while recording prices.
///
/// Consumed by the health monitor and liquidation manager; never a hard
/// gate by itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceAlert {
    pub symbol: String,
    pub kind: PriceAlertKind,
    pub severity: AlertSeverity,
    /// Observed value (percent)
    pub value_pct: f64,
    /// Threshold that was crossed (percent)
    pub threshold_pct: f64,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone)]
struct CachedVolatility {
    metrics: VolatilityMetrics,
    computed_at_ms: u64,
}

/// Bounded newest-first price log with analytics.
pub struct PriceHistory {
    entries: DashMap<String, VecDeque<PriceHistoryEntry>>,
    alerts: DashMap<String, Vec<PriceAlert>>,
    volatility_cache: DashMap<(String, u64), CachedVolatility>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
}

impl std::fmt::Debug for PriceHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceHistory")
            .field("symbol_count", &self.entries.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl PriceHistory {
    /// Create a new history keyed by symbol.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            alerts: DashMap::new(),
            volatility_cache: DashMap::new(),
            clock,
            max_entries: MAX_ENTRIES_PER_SYMBOL,
        }
    }

    /// Override the per-symbol retention cap.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Append an aggregated price to the history (newest first), invalidate
    /// cached analytics for the symbol, and evaluate alert conditions.
    pub fn record_price(&self, aggregated: &AggregatedPrice) {
        let entry = PriceHistoryEntry::from(aggregated);
        let symbol = entry.symbol.clone();

        {
            let mut log = self.entries.entry(symbol.clone()).or_default();
            log.push_front(entry.clone());
            while log.len() > self.max_entries {
                log.pop_back();
            }
        }

        self.volatility_cache
            .retain(|(cached_symbol, _), _| cached_symbol != &symbol);

        self.evaluate_alerts(&entry);
    }

    /// Newest-first snapshot of the recorded history for a symbol.
    pub fn entries(&self, symbol: &str) -> Vec<PriceHistoryEntry> {
        self.entries
            .get(symbol)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop entries older than `max_age_ms` across all symbols. Returns the
    /// number of pruned entries.
    pub fn prune_older_than(&self, max_age_ms: u64) -> usize {
        let cutoff = self.clock.now_ms().saturating_sub(max_age_ms);
        let mut pruned = 0;
        for mut log in self.entries.iter_mut() {
            let before = log.len();
            // Entries are newest-first, so stale ones sit at the back.
            while log.back().is_some_and(|e| e.timestamp_ms < cutoff) {
                log.pop_back();
            }
            pruned += before - log.len();
        }
        if pruned > 0 {
            debug!(pruned, "Pruned aged price history entries");
        }
        pruned
    }

    /// Volatility over the trailing `period_hours`.
    ///
    /// Fewer than two in-window points yields zeroed metrics: "no data" is
    /// a valid state, not an error. Results are cached for a short TTL.
    pub fn calculate_volatility(&self, symbol: &str, period_hours: u64) -> VolatilityMetrics {
        let now = self.clock.now_ms();
        let key = (symbol.to_string(), period_hours);
        if let Some(cached) = self.volatility_cache.get(&key) {
            if now.saturating_sub(cached.computed_at_ms) <= VOLATILITY_CACHE_TTL_MS {
                return cached.metrics.clone();
            }
        }

        let metrics = self.compute_volatility(symbol, period_hours, now);
        self.volatility_cache.insert(
            key,
            CachedVolatility {
                metrics: metrics.clone(),
                computed_at_ms: now,
            },
        );
        metrics
    }

    fn compute_volatility(&self, symbol: &str, period_hours: u64, now_ms: u64) -> VolatilityMetrics {
        let cutoff = now_ms.saturating_sub(period_hours * 3_600_000);
        let window: Vec<PriceHistoryEntry> = self
            .entries
            .get(symbol)
            .map(|log| {
                log.iter()
                    .take_while(|e| e.timestamp_ms >= cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if window.len() < 2 {
            return VolatilityMetrics {
                symbol: symbol.to_string(),
                period_hours,
                sample_count: window.len(),
                ..VolatilityMetrics::default()
            };
        }

        let prices: Vec<f64> = window.iter().map(|e| e.price).collect();
        let mean = prices.iter().sum::<f64>() / prices.len() as f64;
        let min = prices.iter().copied().fold(f64::INFINITY, f64::min);
        let max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let variance =
            prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / prices.len() as f64;
        let stddev = variance.sqrt();

        // Window is newest-first: last element is the window start.
        let start = prices[prices.len() - 1];
        let end = prices[0];
        let change_pct = if start != 0.0 {
            (end - start) / start * 100.0
        } else {
            0.0
        };

        VolatilityMetrics {
            symbol: symbol.to_string(),
            period_hours,
            mean,
            min,
            max,
            change_pct,
            volatility_pct: if mean != 0.0 { stddev / mean * 100.0 } else { 0.0 },
            sample_count: prices.len(),
        }
    }

    /// Moving-average crossover trend over the trailing `period_hours`.
    ///
    /// Fewer than ten in-window points yields a neutral sideways result
    /// with zero strength.
    pub fn analyze_trend(&self, symbol: &str, period_hours: u64) -> TrendAnalysis {
        let now = self.clock.now_ms();
        let cutoff = now.saturating_sub(period_hours * 3_600_000);
        let window: Vec<f64> = self
            .entries
            .get(symbol)
            .map(|log| {
                log.iter()
                    .take_while(|e| e.timestamp_ms >= cutoff)
                    .map(|e| e.price)
                    .collect()
            })
            .unwrap_or_default();

        if window.len() < TREND_MIN_POINTS {
            return TrendAnalysis::sideways(symbol);
        }

        // window is newest-first, so the "last N points" are the first N.
        let short_ma = window[..5].iter().sum::<f64>() / 5.0;
        let long_ma = window[..10].iter().sum::<f64>() / 10.0;

        let gap_pct = if long_ma != 0.0 {
            (short_ma - long_ma) / long_ma * 100.0
        } else {
            0.0
        };

        let direction = if gap_pct > TREND_SEPARATION_PCT {
            TrendDirection::Bullish
        } else if gap_pct < -TREND_SEPARATION_PCT {
            TrendDirection::Bearish
        } else {
            TrendDirection::Sideways
        };

        let strength = if direction == TrendDirection::Sideways {
            0.0
        } else {
            (gap_pct.abs() * 10.0).min(100.0)
        };

        let recent: Vec<f64> = window.iter().take(20).copied().collect();
        let support = recent.iter().copied().fold(f64::INFINITY, f64::min);
        let resistance = recent.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let momentum_pct = {
            let oldest_of_5 = window[4.min(window.len() - 1)];
            if oldest_of_5 != 0.0 {
                (window[0] - oldest_of_5) / oldest_of_5 * 100.0
            } else {
                0.0
            }
        };

        TrendAnalysis {
            symbol: symbol.to_string(),
            direction,
            strength,
            support,
            resistance,
            momentum_pct,
        }
    }

    /// Accumulated alerts for a symbol, newest last.
    pub fn alerts(&self, symbol: &str) -> Vec<PriceAlert> {
        self.alerts
            .get(symbol)
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    /// Drop accumulated alerts for a symbol.
    pub fn clear_alerts(&self, symbol: &str) {
        self.alerts.remove(symbol);
    }

    fn evaluate_alerts(&self, entry: &PriceHistoryEntry) {
        let now = self.clock.now_ms();

        // Recompute rather than read the cache: the freshly recorded entry
        // must participate in the 1-hour window.
        let volatility = self.compute_volatility(&entry.symbol, 1, now);
        let vol_alert = if volatility.volatility_pct > VOLATILITY_CRITICAL_PCT {
            Some((AlertSeverity::Critical, VOLATILITY_CRITICAL_PCT))
        } else if volatility.volatility_pct > VOLATILITY_HIGH_PCT {
            Some((AlertSeverity::High, VOLATILITY_HIGH_PCT))
        } else {
            None
        };
        if let Some((severity, threshold)) = vol_alert {
            self.push_alert(PriceAlert {
                symbol: entry.symbol.clone(),
                kind: PriceAlertKind::Volatility,
                severity,
                value_pct: volatility.volatility_pct,
                threshold_pct: threshold,
                timestamp_ms: now,
            });
        }

        let dev_alert = if entry.deviation_pct > DEVIATION_CRITICAL_PCT {
            Some((AlertSeverity::Critical, DEVIATION_CRITICAL_PCT))
        } else if entry.deviation_pct > DEVIATION_HIGH_PCT {
            Some((AlertSeverity::High, DEVIATION_HIGH_PCT))
        } else {
            None
        };
        if let Some((severity, threshold)) = dev_alert {
            self.push_alert(PriceAlert {
                symbol: entry.symbol.clone(),
                kind: PriceAlertKind::Deviation,
                severity,
                value_pct: entry.deviation_pct,
                threshold_pct: threshold,
                timestamp_ms: now,
            });
        }
    }

    fn push_alert(&self, alert: PriceAlert) {
        warn!(
            symbol = %alert.symbol,
            kind = ?alert.kind,
            severity = ?alert.severity,
            value_pct = alert.value_pct,
            "Price alert raised"
        );
        self.alerts.entry(alert.symbol.clone()).or_default().push(alert);
    }
}
