//! Price aggregation and market analytics for the collateral engine.
//!
//! This crate provides the price-facing half of the engine:
//! - Source registry with trust weights and reliability tracking
//! - Multi-source weighted aggregation with deviation rejection
//! - Freshness-keyed price cache and manipulation-resistance validation
//! - Bounded price history with volatility and trend analytics
//! - Volatility/deviation alerting
//!
//! All components take their collaborators (clock, registry, adapters) as
//! constructor parameters so tests can run with fakes.

mod aggregator;
mod clock;
mod error;
mod history;
mod source;

pub use aggregator::{
    AggregatedPrice, AggregationEngine, AssetFeedConfig, PriceValidation, STALE_PRICE_MAX_AGE_MS,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::OracleError;
pub use history::{
    AlertSeverity, PriceAlert, PriceAlertKind, PriceHistory, PriceHistoryEntry, TrendAnalysis,
    TrendDirection, VolatilityMetrics,
};
pub use source::{PriceSample, PriceSourceAdapter, SourceConfig, SourceRegistry};
