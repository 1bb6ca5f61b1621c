//! Vault health monitoring.
//!
//! The monitor sweeps tracked vaults on an interval, reprices each against
//! the aggregated feed, classifies its health, and emits alerts on status
//! transitions. One vault's failure never blocks the rest of a sweep, and
//! alert delivery is fire-and-forget: a failing sink is logged and skipped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use sentinel_oracle::{AggregationEngine, Clock, PriceHistory};

use crate::config::{MonitorParams, RiskRegistry};
use crate::error::EngineError;
use crate::health::{calculate_health_factor, HealthFactorResult, HealthParams, VaultStatus};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// How soon projected interest accrual pushes a vault over the line before
/// a liquidation warning fires.
const LIQUIDATION_WARNING_HORIZON_HOURS: f64 = 24.0;

/// One vault under observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedVault {
    pub vault_id: String,
    pub owner: String,
    pub collateral_symbol: String,
    /// Raw collateral amount in token base units
    pub collateral_amount: i128,
    /// Borrowed principal (USD)
    pub loan_amount: f64,
    /// Interest accrued to date (USD)
    pub accrued_interest: f64,
    /// Contractual annual rate (bp), used for time-to-liquidation estimates
    pub annual_rate_bp: u64,
    /// Status as of the last completed check
    pub last_status: Option<VaultStatus>,
    /// Next scheduled check (epoch ms)
    pub next_check_due_ms: u64,
}

/// What kind of health transition an alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthAlertKind {
    /// Status worsened since the previous check
    Deterioration,
    /// Status improved since the previous check
    Recovery,
    /// Critical vault projected to breach the liquidation line soon
    LiquidationWarning,
}

/// Alert emitted on a vault health transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthAlert {
    pub vault_id: String,
    pub owner: String,
    pub kind: HealthAlertKind,
    pub previous_status: Option<VaultStatus>,
    pub status: VaultStatus,
    pub ltv_bp: u64,
    pub health_factor_bp: u64,
    /// Hours until projected interest accrual exhausts the buffer, when a
    /// liquidation warning is being raised
    pub estimated_hours_to_liquidation: Option<f64>,
    pub timestamp_ms: u64,
}

/// Alert delivery channel. Failures are absorbed by the monitor.
#[async_trait]
pub trait AlertSink: Send + Sync + std::fmt::Debug {
    async fn deliver(&self, alert: &HealthAlert) -> Result<(), String>;
}

/// Sink that logs alerts through tracing.
#[derive(Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn deliver(&self, alert: &HealthAlert) -> Result<(), String> {
        warn!(
            vault = %alert.vault_id,
            owner = %alert.owner,
            kind = ?alert.kind,
            status = ?alert.status,
            ltv_bp = alert.ltv_bp,
            "Vault health alert"
        );
        Ok(())
    }
}

/// Aggregate counts for one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepStats {
    pub checked: usize,
    pub skipped: usize,
    pub failed: usize,
    pub alerts_emitted: usize,
}

/// Periodic vault health monitor.
pub struct HealthMonitor {
    aggregator: Arc<AggregationEngine>,
    history: Arc<PriceHistory>,
    registry: Arc<RiskRegistry>,
    sinks: Vec<Arc<dyn AlertSink>>,
    vaults: DashMap<String, TrackedVault>,
    /// Last alert per (vault, kind), for cooldown suppression
    last_alert: DashMap<(String, HealthAlertKind), u64>,
    clock: Arc<dyn Clock>,
    params: MonitorParams,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("vault_count", &self.vaults.len())
            .field("sink_count", &self.sinks.len())
            .field("params", &self.params)
            .finish()
    }
}

impl HealthMonitor {
    /// Create a new monitor.
    pub fn new(
        aggregator: Arc<AggregationEngine>,
        history: Arc<PriceHistory>,
        registry: Arc<RiskRegistry>,
        params: MonitorParams,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            aggregator,
            history,
            registry,
            sinks: Vec::new(),
            vaults: DashMap::new(),
            last_alert: DashMap::new(),
            clock,
            params,
        }
    }

    /// Attach an alert sink.
    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Start (or update) tracking a vault. The first check runs on the next
    /// sweep.
    pub fn track(&self, mut vault: TrackedVault) {
        vault.next_check_due_ms = self.clock.now_ms();
        debug!(vault = %vault.vault_id, symbol = %vault.collateral_symbol, "Tracking vault");
        self.vaults.insert(vault.vault_id.clone(), vault);
    }

    /// Stop tracking a vault.
    pub fn untrack(&self, vault_id: &str) -> bool {
        self.vaults.remove(vault_id).is_some()
    }

    /// Snapshot of a tracked vault.
    pub fn tracked(&self, vault_id: &str) -> Option<TrackedVault> {
        self.vaults.get(vault_id).map(|v| v.clone())
    }

    /// Number of tracked vaults.
    pub fn vault_count(&self) -> usize {
        self.vaults.len()
    }

    /// Check a single vault immediately, regardless of its schedule.
    pub async fn check_vault_now(&self, vault_id: &str) -> Result<HealthFactorResult, EngineError> {
        let vault = self
            .vaults
            .get(vault_id)
            .map(|v| v.clone())
            .ok_or_else(|| EngineError::LoanNotFound(vault_id.to_string()))?;
        self.check_vault(&vault).await
    }

    /// Sweep every tracked vault whose check is due.
    ///
    /// Failures are isolated per vault: the price feed being down for one
    /// asset degrades only the vaults collateralized by it.
    pub async fn sweep(&self) -> SweepStats {
        let now = self.clock.now_ms();
        let due: Vec<TrackedVault> = self
            .vaults
            .iter()
            .filter(|v| v.next_check_due_ms <= now)
            .map(|v| v.clone())
            .collect();

        let mut stats = SweepStats {
            skipped: self.vaults.len() - due.len(),
            ..Default::default()
        };

        for vault in due {
            match self.check_vault(&vault).await {
                Ok(result) => {
                    stats.checked += 1;
                    stats.alerts_emitted += self.evaluate_transition(&vault, &result).await;
                    self.reschedule(&vault.vault_id, Some(result.status));
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(vault = %vault.vault_id, error = %e, "Vault check failed");
                    // Keep the previous status; retry on the next sweep.
                    self.reschedule(&vault.vault_id, vault.last_status);
                }
            }
        }

        info!(
            checked = stats.checked,
            skipped = stats.skipped,
            failed = stats.failed,
            alerts = stats.alerts_emitted,
            "Sweep complete"
        );
        stats
    }

    /// Run sweeps on the configured interval until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.params.sweep_interval_secs));
        info!(
            interval_secs = self.params.sweep_interval_secs,
            vaults = self.vaults.len(),
            "Health monitor started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Health monitor stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Price the vault's collateral and compute its health.
    async fn check_vault(&self, vault: &TrackedVault) -> Result<HealthFactorResult, EngineError> {
        let risk = self.registry.get(&vault.collateral_symbol)?;
        let aggregated = self
            .aggregator
            .get_aggregated_price(&vault.collateral_symbol, false)
            .await?;
        self.history.record_price(&aggregated);

        let params = HealthParams {
            collateral_amount: vault.collateral_amount,
            decimals: risk.collateral.decimals(),
            price: aggregated.price,
            loan_amount: vault.loan_amount,
            accrued_interest: vault.accrued_interest,
        };
        calculate_health_factor(&params, &risk.thresholds)
    }

    /// Emit alerts for a status transition, honoring the cooldown. Returns
    /// the number of alerts emitted.
    async fn evaluate_transition(&self, vault: &TrackedVault, result: &HealthFactorResult) -> usize {
        let mut emitted = 0;
        let previous = vault.last_status;

        let transition = match previous {
            Some(prev) if result.status > prev => Some(HealthAlertKind::Deterioration),
            Some(prev) if result.status < prev => Some(HealthAlertKind::Recovery),
            None if result.status != VaultStatus::Healthy => Some(HealthAlertKind::Deterioration),
            _ => None,
        };
        if let Some(kind) = transition {
            if self.emit(vault, result, kind, None).await {
                emitted += 1;
            }
        }

        // A critical vault with a shrinking buffer gets a forward-looking
        // warning when interest accrual alone would breach the line soon.
        if result.status == VaultStatus::Critical && result.buffer_amount > 0.0 {
            if let Some(hours) = self.estimate_hours_to_liquidation(vault, result) {
                if hours <= LIQUIDATION_WARNING_HORIZON_HOURS
                    && self
                        .emit(vault, result, HealthAlertKind::LiquidationWarning, Some(hours))
                        .await
                {
                    emitted += 1;
                }
            }
        }

        emitted
    }

    /// Hours until interest accrual at the contractual rate exhausts the
    /// remaining debt buffer. `None` when the loan accrues no interest.
    fn estimate_hours_to_liquidation(
        &self,
        vault: &TrackedVault,
        result: &HealthFactorResult,
    ) -> Option<f64> {
        let hourly_interest =
            vault.loan_amount * (vault.annual_rate_bp as f64 / 10_000.0) / (365.0 * 24.0);
        if hourly_interest <= 0.0 {
            return None;
        }
        Some(result.buffer_amount / hourly_interest)
    }

    /// Deliver an alert to every sink unless suppressed by the cooldown.
    async fn emit(
        &self,
        vault: &TrackedVault,
        result: &HealthFactorResult,
        kind: HealthAlertKind,
        hours: Option<f64>,
    ) -> bool {
        let now = self.clock.now_ms();
        let cooldown_ms = self.params.alert_cooldown_secs * 1000;
        let key = (vault.vault_id.clone(), kind);
        if let Some(last) = self.last_alert.get(&key) {
            if now.saturating_sub(*last) < cooldown_ms {
                debug!(vault = %vault.vault_id, kind = ?kind, "Alert suppressed by cooldown");
                return false;
            }
        }
        self.last_alert.insert(key, now);

        let alert = HealthAlert {
            vault_id: vault.vault_id.clone(),
            owner: vault.owner.clone(),
            kind,
            previous_status: vault.last_status,
            status: result.status,
            ltv_bp: result.ltv_bp,
            health_factor_bp: result.health_factor_bp,
            estimated_hours_to_liquidation: hours,
            timestamp_ms: now,
        };

        for sink in &self.sinks {
            if let Err(e) = sink.deliver(&alert).await {
                warn!(vault = %vault.vault_id, error = %e, "Alert sink delivery failed");
            }
        }
        true
    }

    fn reschedule(&self, vault_id: &str, status: Option<VaultStatus>) {
        if let Some(mut entry) = self.vaults.get_mut(vault_id) {
            entry.last_status = status;
            entry.next_check_due_ms =
                self.clock.now_ms() + self.params.sweep_interval_secs * 1000;
        }
    }
}
