//! Typed errors for price aggregation.
//!
//! Every failure mode is explicit. The engine never substitutes a guessed
//! price for a failed aggregation: in a lending system a wrong silent price
//! is worse than a loud error.

use thiserror::Error;

/// Errors raised by the aggregation engine and price validation.
#[derive(Debug, Error)]
pub enum OracleError {
    /// The symbol has no registered feed configuration. Caller's fault, no retry.
    #[error("unsupported asset: {0}")]
    UnsupportedAsset(String),

    /// Fewer valid samples than the asset's minimum source policy. Transient.
    #[error("insufficient sources for {symbol}: got {got}, require {required}")]
    InsufficientSources {
        symbol: String,
        got: usize,
        required: usize,
    },

    /// Inter-source spread exceeded the asset's maximum deviation policy. Transient.
    #[error("deviation exceeded for {symbol}: {deviation_pct:.2}% > {max_pct:.2}%")]
    DeviationExceeded {
        symbol: String,
        deviation_pct: f64,
        max_pct: f64,
    },

    /// The price is too old to act on.
    #[error("stale price for {symbol}: {age_ms}ms old")]
    StalePrice { symbol: String, age_ms: u64 },

    /// The price carries too little confidence to act on.
    #[error("low confidence price for {symbol}: {confidence:.0} < {required:.0}")]
    LowConfidence {
        symbol: String,
        confidence: f64,
        required: f64,
    },

    /// A single source failed or timed out. Only surfaced per source; the
    /// aggregate operation reports `InsufficientSources` instead.
    #[error("source {source_id} unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },
}

impl OracleError {
    /// Whether the caller may reasonably retry after a delay.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::InsufficientSources { .. }
                | Self::DeviationExceeded { .. }
                | Self::StalePrice { .. }
                | Self::LowConfidence { .. }
                | Self::SourceUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(!OracleError::UnsupportedAsset("SUI".into()).is_transient());
        assert!(OracleError::InsufficientSources {
            symbol: "SUI".into(),
            got: 1,
            required: 2
        }
        .is_transient());
    }
}
