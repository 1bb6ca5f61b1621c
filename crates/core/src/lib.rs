//! Collateral risk engine core.
//!
//! This crate provides the risk and liquidation logic on top of the
//! price oracle:
//! - Per-asset risk configuration with validated LTV thresholds
//! - Pure health-factor and LTV calculations
//! - Periodic vault health monitoring with transition alerts
//! - Liquidation lifecycle management with an ordered proceeds waterfall
//! - Ledger client abstraction over the authoritative loan store

pub mod config;
mod error;
pub mod health;
mod ledger;
mod liquidation;
mod monitor;
pub mod waterfall;

pub use config::{
    AssetRisk, AssetRiskConfig, Collateral, EngineConfig, LiquidationParams, LtvThresholds,
    MonitorParams, RiskRegistry,
};
pub use error::EngineError;
pub use health::{
    borrow_capacity, calculate_health_factor, classify, max_borrowable, max_withdrawable,
    project_interest, required_collateral, simulate_price_change, validate_borrow,
    validate_params, HealthFactorResult, HealthParams, VaultStatus, CRITICAL_BUFFER_BP,
};
pub use ledger::{LedgerClient, LiquidationAck, LoanData, LoanStatus};
pub use liquidation::{
    LiquidationEvent, LiquidationManager, LiquidationStatus, LiquidationTrigger, TriggerType,
};
pub use monitor::{
    AlertSink, HealthAlert, HealthAlertKind, HealthMonitor, LogAlertSink, SweepStats,
    TrackedVault,
};
pub use waterfall::{distribute, Claimant, LiquidationProceeds, ProceedsDistribution};
