//! Price source configuration, registry and the adapter seam.
//!
//! A source is a black box that, given an asset symbol, returns a price
//! sample or fails. The registry only holds configuration (trust weight,
//! active flag, reliability score); aggregation consults it on every cycle
//! and mutates nothing except `last_update_ms` on a successful sample.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::OracleError;

/// One raw price sample from a single source.
///
/// Ephemeral: produced per fetch and consumed immediately into aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSample {
    /// Asset symbol (e.g. "SUI")
    pub symbol: String,
    /// Price in USD
    pub price: f64,
    /// Sample timestamp (epoch ms)
    pub timestamp_ms: u64,
    /// Identifier of the producing source
    pub source_id: String,
    /// Per-sample confidence reported by the source (0-100)
    pub confidence: f64,
}

impl PriceSample {
    /// A sample is usable only with a finite, positive price.
    pub fn is_usable(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// Adapter contract for an external price source.
///
/// Real (HTTP) and fake (scripted) sources are interchangeable behind this
/// trait; aggregation logic never knows which it is talking to.
#[async_trait]
pub trait PriceSourceAdapter: Send + Sync + std::fmt::Debug {
    /// Stable identifier, must match a registered [`SourceConfig`].
    fn source_id(&self) -> &str;

    /// Fetch a price sample for the given symbol.
    async fn fetch(&self, symbol: &str) -> Result<PriceSample, OracleError>;
}

/// Configuration for one external price source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Stable identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Endpoint reference (opaque to the engine)
    pub endpoint: String,
    /// Trust weight used in the weighted mean (1-100)
    pub trust_weight: u32,
    /// Whether this source participates in aggregation
    pub active: bool,
    /// Last successful sample (epoch ms), 0 when never sampled
    #[serde(default)]
    pub last_update_ms: u64,
    /// Historical accuracy score (0-100)
    pub reliability: f64,
}

impl SourceConfig {
    /// Validate static invariants of a source entry.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("source id must not be empty".to_string());
        }
        if !(1..=100).contains(&self.trust_weight) {
            return Err(format!(
                "source {}: trust_weight {} outside 1-100",
                self.id, self.trust_weight
            ));
        }
        if !(0.0..=100.0).contains(&self.reliability) {
            return Err(format!(
                "source {}: reliability {} outside 0-100",
                self.id, self.reliability
            ));
        }
        Ok(())
    }
}

/// Registry of configured price sources.
pub struct SourceRegistry {
    sources: DashMap<String, SourceConfig>,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("source_count", &self.sources.len())
            .finish()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sources: DashMap::new(),
        }
    }

    /// Register or replace a source configuration.
    ///
    /// Invalid entries are rejected whole; the registry is never partially
    /// updated.
    pub fn upsert(&self, config: SourceConfig) -> Result<(), String> {
        config.validate()?;
        debug!(
            source = %config.id,
            weight = config.trust_weight,
            active = config.active,
            "Registering price source"
        );
        self.sources.insert(config.id.clone(), config);
        Ok(())
    }

    /// Look up a source by id.
    pub fn get(&self, id: &str) -> Option<SourceConfig> {
        self.sources.get(id).map(|s| s.clone())
    }

    /// Mark a source inactive without removing its configuration.
    pub fn deactivate(&self, id: &str) -> bool {
        match self.sources.get_mut(id) {
            Some(mut s) => {
                s.active = false;
                true
            }
            None => false,
        }
    }

    /// Record a successful sample time for a source.
    ///
    /// This is the only field aggregation writes back.
    pub fn touch(&self, id: &str, now_ms: u64) {
        if let Some(mut s) = self.sources.get_mut(id) {
            s.last_update_ms = now_ms;
        }
    }

    /// Snapshot of currently active sources.
    pub fn active_sources(&self) -> Vec<SourceConfig> {
        self.sources
            .iter()
            .filter(|e| e.value().active)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Total number of registered sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether the registry holds no sources.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: &str, weight: u32, active: bool) -> SourceConfig {
        SourceConfig {
            id: id.to_string(),
            name: format!("Source {id}"),
            endpoint: format!("https://feeds.example/{id}"),
            trust_weight: weight,
            active,
            last_update_ms: 0,
            reliability: 90.0,
        }
    }

    #[test]
    fn test_upsert_and_active_filter() {
        let registry = SourceRegistry::new();
        registry.upsert(source("a", 50, true)).unwrap();
        registry.upsert(source("b", 30, false)).unwrap();

        let active = registry.active_sources();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "a");
    }

    #[test]
    fn test_invalid_weight_rejected() {
        let registry = SourceRegistry::new();
        assert!(registry.upsert(source("a", 0, true)).is_err());
        assert!(registry.upsert(source("a", 101, true)).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_touch_updates_last_sample() {
        let registry = SourceRegistry::new();
        registry.upsert(source("a", 50, true)).unwrap();

        registry.touch("a", 1_700_000_000_000);
        assert_eq!(registry.get("a").unwrap().last_update_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_deactivate() {
        let registry = SourceRegistry::new();
        registry.upsert(source("a", 50, true)).unwrap();
        assert!(registry.deactivate("a"));
        assert!(registry.active_sources().is_empty());
        assert!(!registry.deactivate("missing"));
    }

    #[test]
    fn test_garbage_sample_unusable() {
        let sample = PriceSample {
            symbol: "SUI".into(),
            price: f64::NAN,
            timestamp_ms: 0,
            source_id: "a".into(),
            confidence: 100.0,
        };
        assert!(!sample.is_usable());

        let negative = PriceSample {
            price: -1.0,
            ..sample.clone()
        };
        assert!(!negative.is_usable());
    }
}
