//! Ordered proceeds waterfall.
//!
//! A fixed pool of sale proceeds is allocated across competing claims in
//! strict priority order: debt repayment, then liquidation penalty, then
//! liquidator fee, then borrower residual. Each step consumes from what
//! remains and never overdraws; the residual is computed as what is left,
//! so the distributed amounts always sum to exactly the total.

use serde::{Deserialize, Serialize};

/// Claimants, in payout priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Claimant {
    /// Outstanding debt repayment to the lending pool
    DebtRepayment,
    /// Liquidation penalty retained by the protocol
    Penalty,
    /// Fee paid to the executing liquidator
    LiquidatorFee,
    /// Whatever remains, returned to the borrower
    BorrowerResidual,
}

/// One leg of the distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProceedsDistribution {
    pub claimant: Claimant,
    pub amount: f64,
}

/// Complete distribution of one liquidation's proceeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationProceeds {
    pub total: f64,
    /// Always four legs, in priority order; later legs are zero once the
    /// pool is exhausted.
    pub distributions: Vec<ProceedsDistribution>,
}

impl LiquidationProceeds {
    /// Amount paid to a claimant.
    pub fn paid_to(&self, claimant: Claimant) -> f64 {
        self.distributions
            .iter()
            .find(|d| d.claimant == claimant)
            .map(|d| d.amount)
            .unwrap_or(0.0)
    }
}

/// Allocate `total_proceeds` across the claims.
///
/// A shortfall reduces later-ranked claimants first; debt repayment is
/// always served before anyone else.
pub fn distribute(
    total_proceeds: f64,
    outstanding_debt: f64,
    penalty: f64,
    fee: f64,
) -> LiquidationProceeds {
    let total = total_proceeds.max(0.0);

    let debt_paid = outstanding_debt.max(0.0).min(total);
    let mut remaining = total - debt_paid;

    let penalty_paid = penalty.max(0.0).min(remaining);
    remaining -= penalty_paid;

    let fee_paid = fee.max(0.0).min(remaining);
    remaining -= fee_paid;

    LiquidationProceeds {
        total,
        distributions: vec![
            ProceedsDistribution {
                claimant: Claimant::DebtRepayment,
                amount: debt_paid,
            },
            ProceedsDistribution {
                claimant: Claimant::Penalty,
                amount: penalty_paid,
            },
            ProceedsDistribution {
                claimant: Claimant::LiquidatorFee,
                amount: fee_paid,
            },
            ProceedsDistribution {
                claimant: Claimant::BorrowerResidual,
                amount: remaining,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total_distributed(proceeds: &LiquidationProceeds) -> f64 {
        proceeds.distributions.iter().map(|d| d.amount).sum()
    }

    #[test]
    fn test_full_waterfall_with_residual() {
        let p = distribute(100.0, 60.0, 10.0, 5.0);
        assert_eq!(p.paid_to(Claimant::DebtRepayment), 60.0);
        assert_eq!(p.paid_to(Claimant::Penalty), 10.0);
        assert_eq!(p.paid_to(Claimant::LiquidatorFee), 5.0);
        assert_eq!(p.paid_to(Claimant::BorrowerResidual), 25.0);
        assert_eq!(total_distributed(&p), 100.0);
    }

    #[test]
    fn test_shortfall_shorts_later_claimants_first() {
        // Proceeds cover debt and only part of the penalty.
        let p = distribute(65.0, 60.0, 10.0, 5.0);
        assert_eq!(p.paid_to(Claimant::DebtRepayment), 60.0);
        assert_eq!(p.paid_to(Claimant::Penalty), 5.0);
        assert_eq!(p.paid_to(Claimant::LiquidatorFee), 0.0);
        assert_eq!(p.paid_to(Claimant::BorrowerResidual), 0.0);
    }

    #[test]
    fn test_proceeds_below_debt() {
        let p = distribute(40.0, 60.0, 10.0, 5.0);
        assert_eq!(p.paid_to(Claimant::DebtRepayment), 40.0);
        assert_eq!(p.paid_to(Claimant::Penalty), 0.0);
        assert_eq!(p.paid_to(Claimant::LiquidatorFee), 0.0);
        assert_eq!(p.paid_to(Claimant::BorrowerResidual), 0.0);
        assert_eq!(total_distributed(&p), 40.0);
    }

    #[test]
    fn test_order_is_fixed() {
        let p = distribute(1.0, 1.0, 1.0, 1.0);
        let order: Vec<Claimant> = p.distributions.iter().map(|d| d.claimant).collect();
        assert_eq!(
            order,
            vec![
                Claimant::DebtRepayment,
                Claimant::Penalty,
                Claimant::LiquidatorFee,
                Claimant::BorrowerResidual,
            ]
        );
    }

    #[test]
    fn test_conservation_across_inputs() {
        let cases = [
            (0.0, 0.0, 0.0, 0.0),
            (100.0, 0.0, 0.0, 0.0),
            (0.0, 50.0, 10.0, 5.0),
            (33.33, 50.0, 10.0, 5.0),
            (123.456, 100.0, 12.3456, 6.1728),
            (1e9, 5e8, 1e8, 5e7),
        ];
        for (total, debt, penalty, fee) in cases {
            let p = distribute(total, debt, penalty, fee);
            assert!(
                (total_distributed(&p) - total).abs() <= 1e-9 * total.max(1.0),
                "conservation violated for total={total}"
            );
            // Later claimants are only paid after earlier ones are whole.
            if p.paid_to(Claimant::Penalty) > 0.0 {
                assert_eq!(p.paid_to(Claimant::DebtRepayment), debt.min(total));
            }
            if p.paid_to(Claimant::LiquidatorFee) > 0.0 {
                assert_eq!(p.paid_to(Claimant::Penalty), penalty);
            }
        }
    }

    #[test]
    fn test_negative_claims_treated_as_zero() {
        let p = distribute(100.0, -5.0, -1.0, -1.0);
        assert_eq!(p.paid_to(Claimant::DebtRepayment), 0.0);
        assert_eq!(p.paid_to(Claimant::BorrowerResidual), 100.0);
    }
}
