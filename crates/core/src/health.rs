//! Pure LTV / health-factor calculator.
//!
//! Side-effect free: validates its inputs, computes, and returns. Ratios in
//! basis points are floored; required-collateral amounts are ceiled, so
//! safety-margin computations never under-estimate required collateral.

use serde::{Deserialize, Serialize};

use crate::config::LtvThresholds;
use crate::error::EngineError;

/// Width of the early-warning band below the liquidation threshold.
///
/// A vault within this band is `Critical` even before crossing the hard
/// liquidation line. Fixed constant pending a product decision on per-asset
/// configurability.
pub const CRITICAL_BUFFER_BP: u64 = 200;

const BP_SCALE: f64 = 10_000.0;

/// Vault status, ordered from safest to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultStatus {
    Healthy,
    Warning,
    Critical,
    Liquidation,
}

impl VaultStatus {
    /// Numeric rank; higher is worse.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Warning => 1,
            Self::Critical => 2,
            Self::Liquidation => 3,
        }
    }
}

/// Inputs to the health-factor calculation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthParams {
    /// Raw collateral amount in token base units
    pub collateral_amount: i128,
    /// Token decimals (0-18)
    pub decimals: u8,
    /// Collateral price in USD
    pub price: f64,
    /// Borrowed principal in USD
    pub loan_amount: f64,
    /// Accrued interest in USD
    pub accrued_interest: f64,
}

impl HealthParams {
    /// Collateral amount in whole-token units.
    pub fn collateral_units(&self) -> f64 {
        self.collateral_amount as f64 / 10f64.powi(self.decimals as i32)
    }

    /// Outstanding debt: principal plus accrued interest.
    pub fn total_debt(&self) -> f64 {
        self.loan_amount + self.accrued_interest
    }
}

/// Full health snapshot, derived on demand and never stored as truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthFactorResult {
    /// Loan-to-value ratio in basis points (floored)
    pub ltv_bp: u64,
    /// Inverse-scaled health factor in basis points
    pub health_factor_bp: u64,
    /// Collateral value in USD
    pub collateral_value: f64,
    /// Outstanding debt in USD
    pub total_debt: f64,
    pub status: VaultStatus,
    /// Collateral price at which the vault first becomes liquidatable
    pub liquidation_price: f64,
    /// USD headroom before liquidation
    pub buffer_amount: f64,
}

/// Collect every violated input constraint; empty means valid.
pub fn validate_params(params: &HealthParams) -> Vec<String> {
    let mut violations = Vec::new();
    if params.collateral_amount < 0 {
        violations.push("collateral amount is negative".to_string());
    }
    if params.decimals > 18 {
        violations.push(format!("decimals {} outside 0-18", params.decimals));
    }
    if !params.price.is_finite() || params.price <= 0.0 {
        violations.push(format!("price {} must be positive", params.price));
    }
    if !params.loan_amount.is_finite() || params.loan_amount < 0.0 {
        violations.push("loan amount is negative".to_string());
    }
    if !params.accrued_interest.is_finite() || params.accrued_interest < 0.0 {
        violations.push("accrued interest is negative".to_string());
    }
    violations
}

/// Compute the health snapshot for a vault.
pub fn calculate_health_factor(
    params: &HealthParams,
    thresholds: &LtvThresholds,
) -> Result<HealthFactorResult, EngineError> {
    let violations = validate_params(params);
    if !violations.is_empty() {
        return Err(EngineError::InvalidInput(violations));
    }

    let collateral_units = params.collateral_units();
    let collateral_value = collateral_units * params.price;
    let total_debt = params.total_debt();

    // Zero or negative collateral value is maximally unhealthy, never a
    // divide-by-zero.
    let ltv_bp = if collateral_value <= 0.0 {
        10_000
    } else {
        ((total_debt / collateral_value) * BP_SCALE).floor() as u64
    };

    let health_factor_bp = if ltv_bp > 0 {
        ((BP_SCALE * BP_SCALE) / ltv_bp as f64).floor() as u64
    } else {
        10_000
    };

    let status = classify(ltv_bp, thresholds);

    let liquidation_price = if collateral_units > 0.0 {
        total_debt * thresholds.liquidation_bp as f64 / (collateral_units * BP_SCALE)
    } else {
        0.0
    };

    let buffer_amount =
        (collateral_value - total_debt * BP_SCALE / thresholds.liquidation_bp as f64).max(0.0);

    Ok(HealthFactorResult {
        ltv_bp,
        health_factor_bp,
        collateral_value,
        total_debt,
        status,
        liquidation_price,
        buffer_amount,
    })
}

/// Threshold banding for an LTV value.
pub fn classify(ltv_bp: u64, thresholds: &LtvThresholds) -> VaultStatus {
    if ltv_bp >= thresholds.liquidation_bp {
        VaultStatus::Liquidation
    } else if ltv_bp >= thresholds.liquidation_bp.saturating_sub(CRITICAL_BUFFER_BP) {
        VaultStatus::Critical
    } else if ltv_bp >= thresholds.warning_bp {
        VaultStatus::Warning
    } else {
        VaultStatus::Healthy
    }
}

/// Validate a prospective borrow: on top of input validation, the resulting
/// LTV must not exceed the asset's maximum.
pub fn validate_borrow(
    params: &HealthParams,
    thresholds: &LtvThresholds,
) -> Result<HealthFactorResult, EngineError> {
    let result = calculate_health_factor(params, thresholds)?;
    if result.ltv_bp > thresholds.max_ltv_bp {
        return Err(EngineError::InvalidInput(vec![format!(
            "resulting ltv {}bp exceeds max ltv {}bp",
            result.ltv_bp, thresholds.max_ltv_bp
        )]));
    }
    Ok(result)
}

/// Maximum borrowable USD against a collateral value.
pub fn max_borrowable(collateral_value: f64, thresholds: &LtvThresholds) -> f64 {
    collateral_value * thresholds.max_ltv_bp as f64 / BP_SCALE
}

/// Remaining borrow capacity given current debt.
pub fn borrow_capacity(
    params: &HealthParams,
    thresholds: &LtvThresholds,
) -> Result<f64, EngineError> {
    let result = calculate_health_factor(params, thresholds)?;
    Ok((max_borrowable(result.collateral_value, thresholds) - result.total_debt).max(0.0))
}

/// Raw collateral amount required to hold `total_debt` at `target_ltv_bp`.
///
/// Ceiled so the caller never posts less collateral than the target needs.
pub fn required_collateral(
    total_debt: f64,
    target_ltv_bp: u64,
    price: f64,
    decimals: u8,
) -> Result<i128, EngineError> {
    let mut violations = Vec::new();
    if !price.is_finite() || price <= 0.0 {
        violations.push(format!("price {price} must be positive"));
    }
    if target_ltv_bp == 0 || target_ltv_bp > 10_000 {
        violations.push(format!("target ltv {target_ltv_bp}bp outside (0, 10000]"));
    }
    if !total_debt.is_finite() || total_debt < 0.0 {
        violations.push("debt is negative".to_string());
    }
    if decimals > 18 {
        violations.push(format!("decimals {decimals} outside 0-18"));
    }
    if !violations.is_empty() {
        return Err(EngineError::InvalidInput(violations));
    }

    let units = total_debt * BP_SCALE / (target_ltv_bp as f64 * price);
    Ok((units * 10f64.powi(decimals as i32)).ceil() as i128)
}

/// USD value of collateral withdrawable while keeping LTV at or below the
/// asset maximum.
pub fn max_withdrawable(
    params: &HealthParams,
    thresholds: &LtvThresholds,
) -> Result<f64, EngineError> {
    let result = calculate_health_factor(params, thresholds)?;
    if result.total_debt == 0.0 {
        return Ok(result.collateral_value);
    }
    Ok((result.collateral_value - result.total_debt * BP_SCALE / thresholds.max_ltv_bp as f64)
        .max(0.0))
}

/// Linear interest projection: `principal * apr * days / 365`.
pub fn project_interest(principal: f64, apr_bp: u64, days: f64) -> f64 {
    principal * (apr_bp as f64 / BP_SCALE) * days / 365.0
}

/// Recompute health under a relative price move (percent, may be negative).
pub fn simulate_price_change(
    params: &HealthParams,
    thresholds: &LtvThresholds,
    price_change_pct: f64,
) -> Result<HealthFactorResult, EngineError> {
    let shifted = HealthParams {
        price: params.price * (1.0 + price_change_pct / 100.0),
        ..*params
    };
    calculate_health_factor(&shifted, thresholds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sui_thresholds() -> LtvThresholds {
        LtvThresholds {
            max_ltv_bp: 7000,
            warning_bp: 7500,
            liquidation_bp: 8500,
            bonus_bp: 500,
        }
    }

    fn sui_params(loan: f64) -> HealthParams {
        HealthParams {
            collateral_amount: 10_000_000_000, // 10 SUI at 9 decimals
            decimals: 9,
            price: 2.50,
            loan_amount: loan,
            accrued_interest: 0.0,
        }
    }

    #[test]
    fn test_reference_scenario() {
        // 10 SUI at $2.50 backing a $20 loan: collateral $25,
        // ltv = floor(20/25*10000) = 8000bp. With warning at 7500 and
        // liquidation at 8500, 8000 < 8500-200 so the status is warning.
        let result = calculate_health_factor(&sui_params(20.0), &sui_thresholds()).unwrap();
        assert!((result.collateral_value - 25.0).abs() < 1e-9);
        assert!((result.total_debt - 20.0).abs() < 1e-9);
        assert_eq!(result.ltv_bp, 8000);
        assert_eq!(result.status, VaultStatus::Warning);
        // hf = floor(1e8 / 8000) = 12500
        assert_eq!(result.health_factor_bp, 12_500);
        // liquidation price = 20 * 8500 / (10 * 10000) = 1.70
        assert!((result.liquidation_price - 1.70).abs() < 1e-9);
        // buffer = 25 - 20*10000/8500 ≈ 1.47
        assert!((result.buffer_amount - (25.0 - 20.0 * 10_000.0 / 8_500.0)).abs() < 1e-9);
    }

    #[test]
    fn test_determinism() {
        let params = sui_params(20.0);
        let thresholds = sui_thresholds();
        let a = calculate_health_factor(&params, &thresholds).unwrap();
        for _ in 0..10 {
            let b = calculate_health_factor(&params, &thresholds).unwrap();
            assert_eq!(a.ltv_bp, b.ltv_bp);
            assert_eq!(a.health_factor_bp, b.health_factor_bp);
            assert_eq!(a.collateral_value.to_bits(), b.collateral_value.to_bits());
            assert_eq!(a.total_debt.to_bits(), b.total_debt.to_bits());
        }
    }

    #[test]
    fn test_monotonicity_in_debt() {
        let thresholds = sui_thresholds();
        let mut prev = calculate_health_factor(&sui_params(1.0), &thresholds).unwrap();
        for loan in [5.0, 10.0, 15.0, 20.0] {
            let next = calculate_health_factor(&sui_params(loan), &thresholds).unwrap();
            assert!(next.ltv_bp > prev.ltv_bp);
            assert!(next.health_factor_bp <= prev.health_factor_bp);
            prev = next;
        }
    }

    #[test]
    fn test_monotonicity_in_collateral() {
        let thresholds = sui_thresholds();
        let base = sui_params(10.0);
        let mut prev = calculate_health_factor(&base, &thresholds).unwrap();
        for extra in [1u32, 2, 3, 4] {
            let params = HealthParams {
                collateral_amount: base.collateral_amount * (1 + extra as i128),
                ..base
            };
            let next = calculate_health_factor(&params, &thresholds).unwrap();
            assert!(next.ltv_bp < prev.ltv_bp);
            assert!(next.health_factor_bp > prev.health_factor_bp);
            prev = next;
        }
    }

    #[test]
    fn test_zero_debt_boundary() {
        let result = calculate_health_factor(&sui_params(0.0), &sui_thresholds()).unwrap();
        assert_eq!(result.ltv_bp, 0);
        assert_eq!(result.health_factor_bp, 10_000);
        assert_eq!(result.status, VaultStatus::Healthy);
    }

    #[test]
    fn test_zero_collateral_is_maximally_unhealthy() {
        let params = HealthParams {
            collateral_amount: 0,
            ..sui_params(20.0)
        };
        let result = calculate_health_factor(&params, &sui_thresholds()).unwrap();
        assert_eq!(result.ltv_bp, 10_000);
        assert_eq!(result.status, VaultStatus::Liquidation);
        assert_eq!(result.liquidation_price, 0.0);
    }

    #[test]
    fn test_status_banding() {
        let thresholds = sui_thresholds();
        assert_eq!(classify(7_000, &thresholds), VaultStatus::Healthy);
        assert_eq!(classify(7_500, &thresholds), VaultStatus::Warning);
        assert_eq!(classify(8_299, &thresholds), VaultStatus::Warning);
        assert_eq!(classify(8_300, &thresholds), VaultStatus::Critical);
        assert_eq!(classify(8_499, &thresholds), VaultStatus::Critical);
        assert_eq!(classify(8_500, &thresholds), VaultStatus::Liquidation);
    }

    #[test]
    fn test_status_ordering() {
        assert!(VaultStatus::Healthy < VaultStatus::Warning);
        assert!(VaultStatus::Warning < VaultStatus::Critical);
        assert!(VaultStatus::Critical < VaultStatus::Liquidation);
        assert_eq!(VaultStatus::Liquidation.rank(), 3);
    }

    #[test]
    fn test_validation_lists_all_violations() {
        let params = HealthParams {
            collateral_amount: -1,
            decimals: 19,
            price: 0.0,
            loan_amount: -5.0,
            accrued_interest: -1.0,
        };
        let err = calculate_health_factor(&params, &sui_thresholds()).unwrap_err();
        match err {
            EngineError::InvalidInput(violations) => assert_eq!(violations.len(), 5),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_borrow_enforces_max_ltv() {
        // $20 against $25 is 8000bp, above the 7000bp max.
        let err = validate_borrow(&sui_params(20.0), &sui_thresholds()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        // $15 against $25 is 6000bp, within the max.
        assert!(validate_borrow(&sui_params(15.0), &sui_thresholds()).is_ok());
    }

    #[test]
    fn test_max_borrowable_and_capacity() {
        let thresholds = sui_thresholds();
        assert!((max_borrowable(25.0, &thresholds) - 17.5).abs() < 1e-9);

        let capacity = borrow_capacity(&sui_params(10.0), &thresholds).unwrap();
        assert!((capacity - 7.5).abs() < 1e-9);

        // Over-borrowed vaults have zero capacity, never negative.
        let capacity = borrow_capacity(&sui_params(20.0), &thresholds).unwrap();
        assert_eq!(capacity, 0.0);
    }

    #[test]
    fn test_required_collateral_ceils() {
        // $20 debt at 7000bp target and $2.50 price needs
        // 20*10000/(7000*2.5) = 11.428... SUI.
        let raw = required_collateral(20.0, 7000, 2.50, 9).unwrap();
        let units = raw as f64 / 1e9;
        assert!(units >= 20.0 * 10_000.0 / (7_000.0 * 2.5));
        // Ceiling means at most one base unit above the exact need.
        assert!(units - 20.0 * 10_000.0 / (7_000.0 * 2.5) < 1e-8);

        assert!(required_collateral(20.0, 0, 2.5, 9).is_err());
        assert!(required_collateral(20.0, 7000, -1.0, 9).is_err());
    }

    #[test]
    fn test_max_withdrawable() {
        let thresholds = sui_thresholds();
        // $10 debt needs 10*10000/7000 ≈ $14.29 of collateral at max LTV.
        let headroom = max_withdrawable(&sui_params(10.0), &thresholds).unwrap();
        assert!((headroom - (25.0 - 10.0 * 10_000.0 / 7_000.0)).abs() < 1e-9);

        // Debt-free vaults can withdraw everything.
        let all = max_withdrawable(&sui_params(0.0), &thresholds).unwrap();
        assert!((all - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_project_interest() {
        // $1000 at 20% APR for 73 days: 1000 * 0.2 * 73/365 = $40.
        assert!((project_interest(1000.0, 2000, 73.0) - 40.0).abs() < 1e-9);
        assert_eq!(project_interest(1000.0, 2000, 0.0), 0.0);
    }

    #[test]
    fn test_simulate_price_change() {
        let thresholds = sui_thresholds();
        // A 32% drop takes the $20 loan vault from 8000bp past liquidation:
        // 20 / (10 * 1.70) = 11764bp.
        let crashed = simulate_price_change(&sui_params(20.0), &thresholds, -32.0).unwrap();
        assert_eq!(crashed.status, VaultStatus::Liquidation);

        let pumped = simulate_price_change(&sui_params(20.0), &thresholds, 100.0).unwrap();
        assert_eq!(pumped.status, VaultStatus::Healthy);
    }
}
