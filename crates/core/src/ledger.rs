//! External ledger interface.
//!
//! The ledger is the authoritative store of vault and loan state; this
//! engine only depends on these signatures and treats every read as
//! possibly stale by the time a decision acts on it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Loan lifecycle state on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    Active,
    Repaid,
    Liquidated,
    Defaulted,
}

/// Loan state as read from the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanData {
    pub loan_id: String,
    /// Borrower identity as resolved by the capability/account store
    pub borrower: String,
    /// Collateral symbol; must map to a configured asset
    pub collateral_symbol: String,
    /// Raw collateral amount in token base units
    pub collateral_amount: i128,
    /// Borrowed principal (USD)
    pub principal: f64,
    /// Interest accrued to date (USD)
    pub accrued_interest: f64,
    /// Contractual annual interest rate (bp)
    pub annual_rate_bp: u64,
    /// Repayment due date (epoch ms), if the loan has one
    pub due_date_ms: Option<u64>,
    pub status: LoanStatus,
}

/// Acknowledgement of an executed on-ledger liquidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationAck {
    /// Ledger transaction reference
    pub tx_ref: String,
    /// Realized sale proceeds (USD)
    pub proceeds: f64,
}

/// Client for the external ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync + std::fmt::Debug {
    /// Read a loan; `None` when the id is unknown.
    async fn get_loan(&self, loan_id: &str) -> Result<Option<LoanData>, EngineError>;

    /// Execute the collateral sale/transfer for a loan.
    async fn liquidate(&self, loan_id: &str, executor: &str) -> Result<LiquidationAck, EngineError>;

    /// Submit an on-chain price-feed update.
    async fn submit_price_update(&self, symbol: &str, price: f64) -> Result<String, EngineError>;
}
