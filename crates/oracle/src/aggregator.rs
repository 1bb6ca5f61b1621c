//! Multi-source price aggregation with deviation rejection.
//!
//! The engine queries every active source concurrently ("gather, then
//! decide"), drops individual failures, and only produces a price when the
//! minimum-source and maximum-deviation policies hold. Successful results
//! are cached per asset and reused while fresh.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::OracleError;
use crate::source::{PriceSample, PriceSourceAdapter, SourceConfig, SourceRegistry};

/// Maximum age of an aggregated price before `validate_price` fails closed.
pub const STALE_PRICE_MAX_AGE_MS: u64 = 5 * 60 * 1000;

/// Minimum confidence an aggregated price needs before it can anchor
/// validation of an externally supplied price.
const VALIDATION_MIN_CONFIDENCE: f64 = 80.0;

/// Default allowed deviation for `validate_price` (percent).
const DEFAULT_VALIDATION_DEVIATION_PCT: f64 = 5.0;

/// Per-asset feed policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetFeedConfig {
    /// Asset symbol (e.g. "SUI")
    pub symbol: String,
    /// Token decimals (0-18)
    pub decimals: u8,
    /// Minimum number of valid samples per aggregation
    pub min_sources: usize,
    /// Maximum allowed inter-source spread (percent)
    pub max_deviation_pct: f64,
    /// Cache freshness window (ms)
    pub update_frequency_ms: u64,
}

impl AssetFeedConfig {
    /// Validate policy invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.is_empty() {
            return Err("asset symbol must not be empty".to_string());
        }
        if self.decimals > 18 {
            return Err(format!("{}: decimals {} outside 0-18", self.symbol, self.decimals));
        }
        if self.min_sources == 0 {
            return Err(format!("{}: min_sources must be at least 1", self.symbol));
        }
        if self.max_deviation_pct <= 0.0 || !self.max_deviation_pct.is_finite() {
            return Err(format!(
                "{}: max_deviation_pct {} must be positive",
                self.symbol, self.max_deviation_pct
            ));
        }
        Ok(())
    }
}

/// Weighted aggregate across contributing sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedPrice {
    /// Asset symbol
    pub symbol: String,
    /// Trust-weighted mean price (USD)
    pub price: f64,
    /// Derived confidence score (10-100)
    pub confidence: f64,
    /// Spread among contributing samples: (max-min)/price*100
    pub deviation_pct: f64,
    /// Number of contributing sources
    pub source_count: usize,
    /// Aggregation timestamp (epoch ms)
    pub timestamp_ms: u64,
    /// Contributing source ids
    pub sources: Vec<String>,
}

impl AggregatedPrice {
    /// Age of this aggregate relative to `now`.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp_ms)
    }
}

/// Outcome of validating an externally supplied price against the aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceValidation {
    /// Whether the proposed price is acceptable
    pub is_valid: bool,
    /// The aggregated reference price
    pub price: f64,
    /// Confidence of the reference price
    pub confidence: f64,
    /// Deviation of the proposed price from the reference (percent)
    pub deviation_pct: f64,
    /// Rejection reason when invalid
    pub reason: Option<String>,
}

/// Aggregation engine over a source registry and a set of adapters.
pub struct AggregationEngine {
    registry: Arc<SourceRegistry>,
    adapters: DashMap<String, Arc<dyn PriceSourceAdapter>>,
    configs: DashMap<String, AssetFeedConfig>,
    cache: DashMap<String, AggregatedPrice>,
    clock: Arc<dyn Clock>,
    /// Per-source fetch deadline; a slow source counts as failed, not fatal.
    fetch_timeout: Duration,
}

impl std::fmt::Debug for AggregationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationEngine")
            .field("adapter_count", &self.adapters.len())
            .field("asset_count", &self.configs.len())
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}

impl AggregationEngine {
    /// Create a new engine.
    pub fn new(registry: Arc<SourceRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            adapters: DashMap::new(),
            configs: DashMap::new(),
            cache: DashMap::new(),
            clock,
            fetch_timeout: Duration::from_secs(5),
        }
    }

    /// Set the per-source fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Handle to the underlying source registry.
    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Register an adapter for a configured source.
    pub fn register_adapter(&self, adapter: Arc<dyn PriceSourceAdapter>) {
        debug!(source = adapter.source_id(), "Registering source adapter");
        self.adapters.insert(adapter.source_id().to_string(), adapter);
    }

    /// Register or replace an asset feed policy.
    pub fn register_asset(&self, config: AssetFeedConfig) -> Result<(), String> {
        config.validate()?;
        self.configs.insert(config.symbol.clone(), config);
        Ok(())
    }

    /// Feed policy for a symbol.
    pub fn asset_config(&self, symbol: &str) -> Option<AssetFeedConfig> {
        self.configs.get(symbol).map(|c| c.clone())
    }

    /// Cached aggregate regardless of freshness (observability only).
    pub fn cached(&self, symbol: &str) -> Option<AggregatedPrice> {
        self.cache.get(symbol).map(|p| p.clone())
    }

    /// Aggregate the current price for `symbol`.
    ///
    /// Queries all active sources concurrently, excludes individual
    /// failures, and fails closed when the minimum-source or deviation
    /// policy is violated. A fresh cached aggregate is reused unless
    /// `force_refresh` is set.
    pub async fn get_aggregated_price(
        &self,
        symbol: &str,
        force_refresh: bool,
    ) -> Result<AggregatedPrice, OracleError> {
        let config = self
            .configs
            .get(symbol)
            .map(|c| c.clone())
            .ok_or_else(|| OracleError::UnsupportedAsset(symbol.to_string()))?;

        let now = self.clock.now_ms();
        if !force_refresh {
            if let Some(cached) = self.cache.get(symbol) {
                if cached.age_ms(now) <= config.update_frequency_ms {
                    return Ok(cached.clone());
                }
            }
        }

        // Gather: fan out to every active source with a registered adapter,
        // each bounded by the fetch timeout.
        let targets: Vec<(SourceConfig, Arc<dyn PriceSourceAdapter>)> = self
            .registry
            .active_sources()
            .into_iter()
            .filter_map(|cfg| {
                let adapter = self.adapters.get(&cfg.id).map(|a| Arc::clone(&a));
                adapter.map(|a| (cfg, a))
            })
            .collect();

        let fetches = targets.iter().map(|(cfg, adapter)| {
            let timeout = self.fetch_timeout;
            async move {
                let result = tokio::time::timeout(timeout, adapter.fetch(symbol)).await;
                (cfg, result)
            }
        });
        let results = futures::future::join_all(fetches).await;

        // Decide: keep usable samples, log and exclude the rest.
        let mut samples: Vec<(PriceSample, u32)> = Vec::with_capacity(results.len());
        for (cfg, result) in results {
            match result {
                Ok(Ok(sample)) if sample.is_usable() && sample.symbol == symbol => {
                    self.registry.touch(&cfg.id, now);
                    samples.push((sample, cfg.trust_weight));
                }
                Ok(Ok(sample)) => {
                    warn!(
                        source = %cfg.id,
                        symbol,
                        price = sample.price,
                        "Discarding unusable sample"
                    );
                }
                Ok(Err(e)) => {
                    warn!(source = %cfg.id, symbol, error = %e, "Source fetch failed");
                }
                Err(_) => {
                    warn!(
                        source = %cfg.id,
                        symbol,
                        timeout_ms = self.fetch_timeout.as_millis() as u64,
                        "Source fetch timed out"
                    );
                }
            }
        }

        if samples.len() < config.min_sources {
            return Err(OracleError::InsufficientSources {
                symbol: symbol.to_string(),
                got: samples.len(),
                required: config.min_sources,
            });
        }

        let aggregated = Self::aggregate_samples(symbol, &samples, now);

        if aggregated.deviation_pct > config.max_deviation_pct {
            return Err(OracleError::DeviationExceeded {
                symbol: symbol.to_string(),
                deviation_pct: aggregated.deviation_pct,
                max_pct: config.max_deviation_pct,
            });
        }

        debug!(
            symbol,
            price = aggregated.price,
            confidence = aggregated.confidence,
            deviation_pct = aggregated.deviation_pct,
            sources = aggregated.source_count,
            "Aggregated price"
        );

        self.store_if_fresher(aggregated.clone());
        Ok(aggregated)
    }

    /// Validate an externally supplied price against the current aggregate.
    ///
    /// Fails closed when the aggregate itself is stale or under-confident:
    /// no liquidation decision may lean on a price we cannot vouch for.
    pub async fn validate_price(
        &self,
        symbol: &str,
        proposed_price: f64,
        max_deviation_pct: Option<f64>,
    ) -> Result<PriceValidation, OracleError> {
        let current = self.get_aggregated_price(symbol, false).await?;
        let now = self.clock.now_ms();

        let age = current.age_ms(now);
        if age > STALE_PRICE_MAX_AGE_MS {
            return Ok(PriceValidation {
                is_valid: false,
                price: current.price,
                confidence: current.confidence,
                deviation_pct: 0.0,
                reason: Some(format!("aggregated price is stale ({age}ms old)")),
            });
        }

        if current.confidence < VALIDATION_MIN_CONFIDENCE {
            return Ok(PriceValidation {
                is_valid: false,
                price: current.price,
                confidence: current.confidence,
                deviation_pct: 0.0,
                reason: Some(format!(
                    "aggregated price confidence {:.0} below {:.0}",
                    current.confidence, VALIDATION_MIN_CONFIDENCE
                )),
            });
        }

        let allowed = max_deviation_pct.unwrap_or(DEFAULT_VALIDATION_DEVIATION_PCT);
        let deviation_pct = ((current.price - proposed_price).abs() / current.price) * 100.0;
        let is_valid = deviation_pct <= allowed && proposed_price.is_finite() && proposed_price > 0.0;

        Ok(PriceValidation {
            is_valid,
            price: current.price,
            confidence: current.confidence,
            deviation_pct,
            reason: if is_valid {
                None
            } else {
                Some(format!(
                    "proposed price deviates {deviation_pct:.2}% from aggregate (allowed {allowed:.2}%)"
                ))
            },
        })
    }

    /// Weighted mean, spread and confidence over the contributing samples.
    fn aggregate_samples(
        symbol: &str,
        samples: &[(PriceSample, u32)],
        now_ms: u64,
    ) -> AggregatedPrice {
        let weight_sum: f64 = samples.iter().map(|(_, w)| *w as f64).sum();
        let weighted: f64 = samples
            .iter()
            .map(|(s, w)| s.price * (*w as f64))
            .sum::<f64>()
            / weight_sum;

        let min = samples.iter().map(|(s, _)| s.price).fold(f64::INFINITY, f64::min);
        let max = samples
            .iter()
            .map(|(s, _)| s.price)
            .fold(f64::NEG_INFINITY, f64::max);
        let deviation_pct = ((max - min) / weighted) * 100.0;

        // More sources raise confidence (capped at 80), wider spread lowers
        // it (by up to 20), floor at 10.
        let source_score = ((samples.len() as f64) * 20.0).min(80.0);
        let deviation_penalty = (deviation_pct * 4.0).min(20.0);
        let confidence = (source_score - deviation_penalty).clamp(10.0, 100.0);

        AggregatedPrice {
            symbol: symbol.to_string(),
            price: weighted,
            confidence,
            deviation_pct,
            source_count: samples.len(),
            timestamp_ms: now_ms,
            sources: samples.iter().map(|(s, _)| s.source_id.clone()).collect(),
        }
    }

    /// Last-writer-wins cache update; a staler write is discarded if a
    /// fresher one already landed.
    fn store_if_fresher(&self, aggregated: AggregatedPrice) {
        match self.cache.entry(aggregated.symbol.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().timestamp_ms <= aggregated.timestamp_ms {
                    entry.insert(aggregated);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(aggregated);
            }
        }
    }
}
