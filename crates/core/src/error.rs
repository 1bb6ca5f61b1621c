//! Engine error taxonomy.
//!
//! Four families, each with a distinct retry policy:
//! - configuration errors: caller's fault, reject immediately, no retry
//! - data-quality errors (wrapped [`OracleError`]): transient, retry later
//! - state errors: logic/race bug or double submission, no retry
//! - execution errors: terminal for that liquidation attempt; a new attempt
//!   must be separately initiated and re-validated

use sentinel_oracle::OracleError;
use thiserror::Error;

/// Errors raised by the risk and liquidation components.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No risk configuration registered for the asset.
    #[error("unknown asset: {0}")]
    UnknownAsset(String),

    /// Threshold configuration violates ordering or range invariants.
    #[error("invalid thresholds: {0}")]
    InvalidThresholds(String),

    /// Calculator inputs failed validation; all violations are listed.
    #[error("invalid input: {}", .0.join("; "))]
    InvalidInput(Vec<String>),

    /// Price layer failure; transient by nature.
    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// The referenced loan does not exist on the ledger.
    #[error("loan not found: {0}")]
    LoanNotFound(String),

    /// The loan exists but is not in a liquidatable lifecycle state.
    #[error("loan not active: {0}")]
    LoanNotActive(String),

    /// Re-validation at initiation time found the loan healthy.
    #[error("liquidation not warranted for loan {loan_id}: ltv {ltv_bp}bp < threshold {threshold_bp}bp")]
    LiquidationNotWarranted {
        loan_id: String,
        ltv_bp: u64,
        threshold_bp: u64,
    },

    /// Unknown liquidation event id.
    #[error("liquidation not found: {0}")]
    LiquidationNotFound(String),

    /// The event already left the `Initiated` state; double submission.
    #[error("liquidation already processed: {0}")]
    LiquidationAlreadyProcessed(String),

    /// Ledger call failed mid-execution; the event is marked failed.
    #[error("liquidation execution failed for {liquidation_id}: {reason}")]
    ExecutionFailed {
        liquidation_id: String,
        reason: String,
    },
}
