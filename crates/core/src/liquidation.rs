//! Liquidation lifecycle orchestration.
//!
//! State machine per liquidation: `Initiated → InProgress → {Completed,
//! Failed}`. Terminal states are final and an event's trigger-time
//! snapshots are never retroactively altered, so the audit trail survives
//! failed executions. The `Initiated → InProgress` transition is an atomic
//! check-and-set to prevent double liquidation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use sentinel_oracle::{AggregationEngine, Clock};

use crate::config::{LiquidationParams, RiskRegistry};
use crate::error::EngineError;
use crate::health::{calculate_health_factor, HealthParams};
use crate::ledger::{LedgerClient, LoanData, LoanStatus};
use crate::waterfall::{distribute, LiquidationProceeds};

const MS_PER_DAY: u64 = 86_400_000;
const BP_SCALE: f64 = 10_000.0;

/// Liquidation event lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationStatus {
    Initiated,
    InProgress,
    Completed,
    Failed,
}

impl LiquidationStatus {
    /// Completed and Failed are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Why a liquidation was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerType {
    LtvThreshold,
    PaymentDefault,
    Manual,
}

/// Immutable audit record of the initiation cause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationTrigger {
    pub trigger_type: TriggerType,
    /// The threshold/overdue-days value observed at trigger time
    pub observed_value: f64,
    pub timestamp_ms: u64,
}

/// One liquidation, from trigger to terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub id: String,
    pub loan_id: String,
    pub borrower: String,
    pub liquidator: String,
    /// Collateral value snapshot at trigger time (USD)
    pub collateral_value: f64,
    /// Outstanding debt snapshot at trigger time (USD, incl. penalty interest)
    pub outstanding_debt: f64,
    /// LTV at trigger time (bp)
    pub ltv_bp: u64,
    /// Liquidation penalty owed (USD)
    pub penalty: f64,
    pub status: LiquidationStatus,
    pub trigger: LiquidationTrigger,
    /// Distributed proceeds; present once completed
    pub proceeds: Option<LiquidationProceeds>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// Current debt/collateral view of a loan, priced against the aggregate.
#[derive(Debug, Clone)]
struct LoanSnapshot {
    collateral_value: f64,
    total_debt: f64,
    ltv_bp: u64,
    liquidation_bp: u64,
}

/// Orchestrates liquidation trigger detection, execution and proceeds
/// distribution.
pub struct LiquidationManager {
    ledger: Arc<dyn LedgerClient>,
    aggregator: Arc<AggregationEngine>,
    registry: Arc<RiskRegistry>,
    params: LiquidationParams,
    events: DashMap<String, LiquidationEvent>,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for LiquidationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiquidationManager")
            .field("event_count", &self.events.len())
            .field("params", &self.params)
            .finish()
    }
}

impl LiquidationManager {
    /// Create a new manager.
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        aggregator: Arc<AggregationEngine>,
        registry: Arc<RiskRegistry>,
        params: LiquidationParams,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            aggregator,
            registry,
            params,
            events: DashMap::new(),
            clock,
            next_id: AtomicU64::new(1),
        }
    }

    /// Whether a loan currently qualifies for liquidation.
    ///
    /// Only `Active` loans are eligible; a missing or non-active loan
    /// answers `false` rather than erroring.
    pub async fn check_liquidation_criteria(&self, loan_id: &str) -> Result<bool, EngineError> {
        let Some(loan) = self.ledger.get_loan(loan_id).await? else {
            return Ok(false);
        };
        if loan.status != LoanStatus::Active {
            return Ok(false);
        }
        let snapshot = self.snapshot_loan(&loan).await?;
        Ok(snapshot.ltv_bp >= snapshot.liquidation_bp)
    }

    /// Initiate a liquidation after re-validating eligibility.
    ///
    /// Re-validation defends against stale triggers: the caller may have
    /// observed a breach that has since healed.
    pub async fn initiate_liquidation(
        &self,
        loan_id: &str,
        liquidator: &str,
        trigger_type: TriggerType,
    ) -> Result<LiquidationEvent, EngineError> {
        let loan = self
            .ledger
            .get_loan(loan_id)
            .await?
            .ok_or_else(|| EngineError::LoanNotFound(loan_id.to_string()))?;
        if loan.status != LoanStatus::Active {
            return Err(EngineError::LoanNotActive(loan_id.to_string()));
        }

        let snapshot = self.snapshot_loan(&loan).await?;
        if snapshot.ltv_bp < snapshot.liquidation_bp {
            return Err(EngineError::LiquidationNotWarranted {
                loan_id: loan_id.to_string(),
                ltv_bp: snapshot.ltv_bp,
                threshold_bp: snapshot.liquidation_bp,
            });
        }

        let now = self.clock.now_ms();
        let observed_value = match trigger_type {
            TriggerType::LtvThreshold => snapshot.ltv_bp as f64,
            TriggerType::PaymentDefault => self.days_overdue(&loan) as f64,
            TriggerType::Manual => 0.0,
        };

        let id = format!("liq-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let event = LiquidationEvent {
            id: id.clone(),
            loan_id: loan.loan_id.clone(),
            borrower: loan.borrower.clone(),
            liquidator: liquidator.to_string(),
            collateral_value: snapshot.collateral_value,
            outstanding_debt: snapshot.total_debt,
            ltv_bp: snapshot.ltv_bp,
            penalty: snapshot.collateral_value * self.params.penalty_rate_bp as f64 / BP_SCALE,
            status: LiquidationStatus::Initiated,
            trigger: LiquidationTrigger {
                trigger_type,
                observed_value,
                timestamp_ms: now,
            },
            proceeds: None,
            created_at_ms: now,
            updated_at_ms: now,
        };

        info!(
            liquidation = %id,
            loan = %loan.loan_id,
            borrower = %loan.borrower,
            ltv_bp = snapshot.ltv_bp,
            collateral_usd = snapshot.collateral_value,
            debt_usd = snapshot.total_debt,
            trigger = ?trigger_type,
            "Liquidation initiated"
        );

        self.events.insert(id, event.clone());
        Ok(event)
    }

    /// Execute an initiated liquidation against the ledger and distribute
    /// the proceeds.
    ///
    /// The `Initiated → InProgress` transition is a check-and-set under the
    /// event's map entry lock; a second concurrent execution of the same id
    /// fails with `LiquidationAlreadyProcessed`.
    pub async fn execute_liquidation(
        &self,
        liquidation_id: &str,
        executor: &str,
    ) -> Result<LiquidationEvent, EngineError> {
        // Claim the event. The guard must drop before awaiting the ledger.
        let (loan_id, collateral_value, outstanding_debt, penalty) = {
            let mut entry = self.events.get_mut(liquidation_id).ok_or_else(|| {
                EngineError::LiquidationNotFound(liquidation_id.to_string())
            })?;
            if entry.status != LiquidationStatus::Initiated {
                return Err(EngineError::LiquidationAlreadyProcessed(
                    liquidation_id.to_string(),
                ));
            }
            entry.status = LiquidationStatus::InProgress;
            entry.updated_at_ms = self.clock.now_ms();
            (
                entry.loan_id.clone(),
                entry.collateral_value,
                entry.outstanding_debt,
                entry.penalty,
            )
        };

        match self.ledger.liquidate(&loan_id, executor).await {
            Ok(ack) => {
                let fee = ack.proceeds * self.params.fee_rate_bp as f64 / BP_SCALE;
                let proceeds = distribute(ack.proceeds, outstanding_debt, penalty, fee);

                let updated = match self.events.get_mut(liquidation_id) {
                    Some(mut entry) => {
                        entry.status = LiquidationStatus::Completed;
                        entry.proceeds = Some(proceeds);
                        entry.updated_at_ms = self.clock.now_ms();
                        entry.clone()
                    }
                    None => {
                        return Err(EngineError::LiquidationNotFound(
                            liquidation_id.to_string(),
                        ))
                    }
                };

                info!(
                    liquidation = %liquidation_id,
                    loan = %loan_id,
                    tx_ref = %ack.tx_ref,
                    proceeds_usd = ack.proceeds,
                    "Liquidation completed"
                );
                Ok(updated)
            }
            Err(e) => {
                // Terminal failure; snapshots stay as they were at trigger
                // time for the audit trail.
                if let Some(mut entry) = self.events.get_mut(liquidation_id) {
                    entry.status = LiquidationStatus::Failed;
                    entry.updated_at_ms = self.clock.now_ms();
                }
                warn!(
                    liquidation = %liquidation_id,
                    loan = %loan_id,
                    collateral_usd = collateral_value,
                    error = %e,
                    "Liquidation execution failed"
                );
                Err(EngineError::ExecutionFailed {
                    liquidation_id: liquidation_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Penalty interest for an overdue loan: `principal * rate * days/365`,
    /// zero when not yet due.
    pub async fn calculate_penalty_interest(&self, loan_id: &str) -> Result<f64, EngineError> {
        let loan = self
            .ledger
            .get_loan(loan_id)
            .await?
            .ok_or_else(|| EngineError::LoanNotFound(loan_id.to_string()))?;
        Ok(self.penalty_interest(&loan))
    }

    /// Look up a liquidation event by id.
    pub fn get_event(&self, liquidation_id: &str) -> Option<LiquidationEvent> {
        self.events.get(liquidation_id).map(|e| e.clone())
    }

    /// All events recorded for a loan.
    pub fn events_for_loan(&self, loan_id: &str) -> Vec<LiquidationEvent> {
        self.events
            .iter()
            .filter(|e| e.value().loan_id == loan_id)
            .map(|e| e.value().clone())
            .collect()
    }

    fn days_overdue(&self, loan: &LoanData) -> u64 {
        match loan.due_date_ms {
            Some(due) => self.clock.now_ms().saturating_sub(due) / MS_PER_DAY,
            None => 0,
        }
    }

    fn penalty_interest(&self, loan: &LoanData) -> f64 {
        let days = self.days_overdue(loan);
        if days == 0 {
            return 0.0;
        }
        loan.principal * (self.params.overdue_apr_bp as f64 / BP_SCALE) * days as f64 / 365.0
    }

    /// Price the loan's collateral and compute its current LTV, including
    /// overdue penalty interest in the debt.
    async fn snapshot_loan(&self, loan: &LoanData) -> Result<LoanSnapshot, EngineError> {
        let risk = self.registry.get(&loan.collateral_symbol)?;
        let aggregated = self
            .aggregator
            .get_aggregated_price(&loan.collateral_symbol, false)
            .await?;

        let params = HealthParams {
            collateral_amount: loan.collateral_amount,
            decimals: risk.collateral.decimals(),
            price: aggregated.price,
            loan_amount: loan.principal,
            accrued_interest: loan.accrued_interest + self.penalty_interest(loan),
        };
        let result = calculate_health_factor(&params, &risk.thresholds)?;

        Ok(LoanSnapshot {
            collateral_value: result.collateral_value,
            total_debt: result.total_debt,
            ltv_bp: result.ltv_bp,
            liquidation_bp: risk.thresholds.liquidation_bp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ledger::LiquidationAck;
    use crate::waterfall::Claimant;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sentinel_oracle::{
        AssetFeedConfig, ManualClock, OracleError, PriceSample, PriceSourceAdapter, SourceConfig,
        SourceRegistry,
    };

    /// In-memory ledger with scriptable liquidation outcomes.
    #[derive(Debug)]
    struct FakeLedger {
        loans: DashMap<String, LoanData>,
        proceeds: Mutex<f64>,
        fail_liquidate: Mutex<bool>,
    }

    impl FakeLedger {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                loans: DashMap::new(),
                proceeds: Mutex::new(0.0),
                fail_liquidate: Mutex::new(false),
            })
        }
    }

    #[async_trait]
    impl LedgerClient for FakeLedger {
        async fn get_loan(&self, loan_id: &str) -> Result<Option<LoanData>, EngineError> {
            Ok(self.loans.get(loan_id).map(|l| l.clone()))
        }

        async fn liquidate(
            &self,
            loan_id: &str,
            _executor: &str,
        ) -> Result<LiquidationAck, EngineError> {
            if *self.fail_liquidate.lock() {
                return Err(EngineError::ExecutionFailed {
                    liquidation_id: String::new(),
                    reason: "ledger rejected transaction".to_string(),
                });
            }
            Ok(LiquidationAck {
                tx_ref: format!("tx-{loan_id}"),
                proceeds: *self.proceeds.lock(),
            })
        }

        async fn submit_price_update(
            &self,
            _symbol: &str,
            _price: f64,
        ) -> Result<String, EngineError> {
            Ok("tx-price".to_string())
        }
    }

    #[derive(Debug)]
    struct FixedSource {
        id: String,
        price: Mutex<f64>,
    }

    #[async_trait]
    impl PriceSourceAdapter for FixedSource {
        fn source_id(&self) -> &str {
            &self.id
        }

        async fn fetch(&self, symbol: &str) -> Result<PriceSample, OracleError> {
            Ok(PriceSample {
                symbol: symbol.to_string(),
                price: *self.price.lock(),
                timestamp_ms: 0,
                source_id: self.id.clone(),
                confidence: 100.0,
            })
        }
    }

    struct Harness {
        manager: LiquidationManager,
        ledger: Arc<FakeLedger>,
        clock: Arc<ManualClock>,
        sources: Vec<Arc<FixedSource>>,
    }

    fn harness(price: f64) -> Harness {
        let clock = ManualClock::new(1_700_000_000_000);
        let source_registry = Arc::new(SourceRegistry::new());
        let aggregator = Arc::new(AggregationEngine::new(source_registry.clone(), clock.clone()));
        aggregator
            .register_asset(AssetFeedConfig {
                symbol: "SUI".to_string(),
                decimals: 9,
                min_sources: 2,
                max_deviation_pct: 10.0,
                update_frequency_ms: 1_000,
            })
            .unwrap();
        let mut sources = Vec::new();
        for id in ["a", "b"] {
            source_registry
                .upsert(SourceConfig {
                    id: id.to_string(),
                    name: id.to_string(),
                    endpoint: String::new(),
                    trust_weight: 50,
                    active: true,
                    last_update_ms: 0,
                    reliability: 95.0,
                })
                .unwrap();
            let src = Arc::new(FixedSource {
                id: id.to_string(),
                price: Mutex::new(price),
            });
            aggregator.register_adapter(src.clone());
            sources.push(src);
        }

        let config = EngineConfig::from_toml(
            r#"
            [[assets]]
            symbol = "SUI"
            min_sources = 2
            max_deviation_pct = 10.0
            update_frequency_ms = 1000
        "#,
        )
        .unwrap();
        let registry = Arc::new(RiskRegistry::from_config(&config).unwrap());
        let ledger = FakeLedger::new();
        let manager = LiquidationManager::new(
            ledger.clone(),
            aggregator,
            registry,
            LiquidationParams::default(),
            clock.clone(),
        );

        Harness {
            manager,
            ledger,
            clock,
            sources,
        }
    }

    fn loan(loan_id: &str, principal: f64) -> LoanData {
        LoanData {
            loan_id: loan_id.to_string(),
            borrower: "0xborrower".to_string(),
            collateral_symbol: "SUI".to_string(),
            collateral_amount: 10_000_000_000, // 10 SUI
            principal,
            accrued_interest: 0.0,
            annual_rate_bp: 800,
            due_date_ms: None,
            status: LoanStatus::Active,
        }
    }

    #[tokio::test]
    async fn test_criteria_for_missing_and_inactive_loans() {
        let h = harness(2.50);
        assert!(!h.manager.check_liquidation_criteria("nope").await.unwrap());

        let mut repaid = loan("loan-1", 20.0);
        repaid.status = LoanStatus::Repaid;
        h.ledger.loans.insert("loan-1".to_string(), repaid);
        assert!(!h.manager.check_liquidation_criteria("loan-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_criteria_respects_threshold() {
        let h = harness(2.50);
        // $20 on $25 collateral = 8000bp, below the 8500bp line.
        h.ledger.loans.insert("loan-1".to_string(), loan("loan-1", 20.0));
        assert!(!h.manager.check_liquidation_criteria("loan-1").await.unwrap());

        // $22 on $25 = 8800bp, above the line.
        h.ledger.loans.insert("loan-2".to_string(), loan("loan-2", 22.0));
        assert!(h.manager.check_liquidation_criteria("loan-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_initiate_validates_and_snapshots() {
        let h = harness(2.50);
        h.ledger.loans.insert("loan-1".to_string(), loan("loan-1", 22.0));

        let event = h
            .manager
            .initiate_liquidation("loan-1", "0xliquidator", TriggerType::LtvThreshold)
            .await
            .unwrap();
        assert_eq!(event.status, LiquidationStatus::Initiated);
        assert_eq!(event.ltv_bp, 8_800);
        assert!((event.collateral_value - 25.0).abs() < 1e-9);
        assert!((event.outstanding_debt - 22.0).abs() < 1e-9);
        // Penalty is 10% of collateral value.
        assert!((event.penalty - 2.5).abs() < 1e-9);
        assert_eq!(event.trigger.trigger_type, TriggerType::LtvThreshold);
        assert!((event.trigger.observed_value - 8_800.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_initiate_rejections() {
        let h = harness(2.50);
        let err = h
            .manager
            .initiate_liquidation("missing", "x", TriggerType::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LoanNotFound(_)));

        let mut defaulted = loan("loan-1", 22.0);
        defaulted.status = LoanStatus::Defaulted;
        h.ledger.loans.insert("loan-1".to_string(), defaulted);
        let err = h
            .manager
            .initiate_liquidation("loan-1", "x", TriggerType::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LoanNotActive(_)));

        // Healthy loan: a stale trigger must be rejected at initiation.
        h.ledger.loans.insert("loan-2".to_string(), loan("loan-2", 10.0));
        let err = h
            .manager
            .initiate_liquidation("loan-2", "x", TriggerType::LtvThreshold)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LiquidationNotWarranted { .. }));
    }

    #[tokio::test]
    async fn test_execute_distributes_waterfall() {
        let h = harness(2.50);
        h.ledger.loans.insert("loan-1".to_string(), loan("loan-1", 22.0));
        *h.ledger.proceeds.lock() = 26.0;

        let event = h
            .manager
            .initiate_liquidation("loan-1", "0xliquidator", TriggerType::LtvThreshold)
            .await
            .unwrap();
        let done = h.manager.execute_liquidation(&event.id, "0xexec").await.unwrap();
        assert_eq!(done.status, LiquidationStatus::Completed);

        let proceeds = done.proceeds.unwrap();
        // Debt $22 first, then penalty $2.50, then fee 5% of $26 = $1.30,
        // leaving $0.20 for the borrower.
        assert!((proceeds.paid_to(Claimant::DebtRepayment) - 22.0).abs() < 1e-9);
        assert!((proceeds.paid_to(Claimant::Penalty) - 2.5).abs() < 1e-9);
        assert!((proceeds.paid_to(Claimant::LiquidatorFee) - 1.3).abs() < 1e-9);
        assert!((proceeds.paid_to(Claimant::BorrowerResidual) - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_execute_idempotence() {
        let h = harness(2.50);
        h.ledger.loans.insert("loan-1".to_string(), loan("loan-1", 22.0));
        *h.ledger.proceeds.lock() = 26.0;

        let event = h
            .manager
            .initiate_liquidation("loan-1", "x", TriggerType::LtvThreshold)
            .await
            .unwrap();
        h.manager.execute_liquidation(&event.id, "x").await.unwrap();

        let err = h.manager.execute_liquidation(&event.id, "x").await.unwrap_err();
        assert!(matches!(err, EngineError::LiquidationAlreadyProcessed(_)));
    }

    #[tokio::test]
    async fn test_execute_failure_is_terminal_and_preserves_snapshot() {
        let h = harness(2.50);
        h.ledger.loans.insert("loan-1".to_string(), loan("loan-1", 22.0));
        *h.ledger.fail_liquidate.lock() = true;

        let event = h
            .manager
            .initiate_liquidation("loan-1", "x", TriggerType::LtvThreshold)
            .await
            .unwrap();
        let err = h.manager.execute_liquidation(&event.id, "x").await.unwrap_err();
        assert!(matches!(err, EngineError::ExecutionFailed { .. }));

        let stored = h.manager.get_event(&event.id).unwrap();
        assert_eq!(stored.status, LiquidationStatus::Failed);
        assert_eq!(stored.ltv_bp, event.ltv_bp);
        assert!((stored.collateral_value - event.collateral_value).abs() < 1e-12);
        assert!(stored.proceeds.is_none());

        // A failed event cannot be re-executed.
        let err = h.manager.execute_liquidation(&event.id, "x").await.unwrap_err();
        assert!(matches!(err, EngineError::LiquidationAlreadyProcessed(_)));
    }

    #[tokio::test]
    async fn test_execute_unknown_event() {
        let h = harness(2.50);
        let err = h.manager.execute_liquidation("liq-99", "x").await.unwrap_err();
        assert!(matches!(err, EngineError::LiquidationNotFound(_)));
    }

    #[tokio::test]
    async fn test_penalty_interest_prorated_by_days_overdue() {
        let h = harness(2.50);
        let mut overdue = loan("loan-1", 1000.0);
        // Due 73 days ago.
        overdue.due_date_ms = Some(h.clock.now_ms() - 73 * MS_PER_DAY);
        h.ledger.loans.insert("loan-1".to_string(), overdue);

        // 1000 * 20% * 73/365 = $40.
        let penalty = h.manager.calculate_penalty_interest("loan-1").await.unwrap();
        assert!((penalty - 40.0).abs() < 1e-9);

        // Not yet due: zero.
        let mut current = loan("loan-2", 1000.0);
        current.due_date_ms = Some(h.clock.now_ms() + MS_PER_DAY);
        h.ledger.loans.insert("loan-2".to_string(), current);
        assert_eq!(h.manager.calculate_penalty_interest("loan-2").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_penalty_interest_feeds_criteria() {
        let h = harness(2.50);
        // $20 on $25 is 8000bp; 365 days of 20% APR penalty on $20 adds $4,
        // lifting debt to $24 = 9600bp, past the threshold.
        let mut overdue = loan("loan-1", 20.0);
        overdue.due_date_ms = Some(h.clock.now_ms().saturating_sub(365 * MS_PER_DAY));
        h.ledger.loans.insert("loan-1".to_string(), overdue);

        assert!(h.manager.check_liquidation_criteria("loan-1").await.unwrap());
        let event = h
            .manager
            .initiate_liquidation("loan-1", "x", TriggerType::PaymentDefault)
            .await
            .unwrap();
        assert!((event.trigger.observed_value - 365.0).abs() < 1e-9);
        assert!((event.outstanding_debt - 24.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_events_for_loan() {
        let h = harness(2.50);
        h.ledger.loans.insert("loan-1".to_string(), loan("loan-1", 22.0));

        let first = h
            .manager
            .initiate_liquidation("loan-1", "x", TriggerType::Manual)
            .await
            .unwrap();
        *h.ledger.fail_liquidate.lock() = true;
        let _ = h.manager.execute_liquidation(&first.id, "x").await;

        // A failed attempt stays on record; a fresh attempt gets a new id.
        let second = h
            .manager
            .initiate_liquidation("loan-1", "x", TriggerType::Manual)
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(h.manager.events_for_loan("loan-1").len(), 2);
    }

    #[tokio::test]
    async fn test_price_failure_propagates_not_defaults() {
        let h = harness(2.50);
        h.ledger.loans.insert("loan-1".to_string(), loan("loan-1", 22.0));

        // Sources diverge past the deviation policy; the cache has nothing
        // fresh, so criteria checking must surface the oracle error.
        *h.sources[0].price.lock() = 10.0;
        h.clock.advance_ms(5_000);
        let err = h.manager.check_liquidation_criteria("loan-1").await.unwrap_err();
        assert!(matches!(err, EngineError::Oracle(_)));
    }
}
