use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{ChargeCalculation, ChargeTiming, LoanStatus, TransactionKind};

#[derive(Error, Debug)]
pub enum LoanError {
    #[error("invalid charge amount: {amount}")]
    InvalidChargeAmount { amount: Money },

    #[error("charge calculation {calculation:?} not permitted for timing {timing:?}")]
    ChargeNotPermittedForTiming {
        calculation: ChargeCalculation,
        timing: ChargeTiming,
    },

    #[error("invalid payment amount: {amount}")]
    InvalidPaymentAmount { amount: Money },

    #[error("transaction date {date} is before first disbursement {disbursed_on}")]
    TransactionBeforeDisbursement {
        date: NaiveDate,
        disbursed_on: NaiveDate,
    },

    #[error("operation not permitted in status {status:?}")]
    LoanStatusNotPermitted { status: LoanStatus },

    #[error("schedule inconsistent: {message}")]
    InconsistentSchedule { message: String },

    #[error("stale loan version: expected {expected}, found {found}")]
    StaleVersion { expected: u64, found: u64 },

    #[error("wrong transaction kind: expected {expected:?}, found {found:?}")]
    WrongTransactionKind {
        expected: TransactionKind,
        found: TransactionKind,
    },

    #[error("transaction already reversed: {id}")]
    TransactionAlreadyReversed { id: Uuid },

    #[error("charge not found: {id}")]
    ChargeNotFound { id: Uuid },

    #[error("transaction not found: {id}")]
    TransactionNotFound { id: Uuid },

    #[error("disbursement exceeds approved principal: approved {approved}, requested {requested}")]
    DisbursementExceedsApproved {
        approved: Money,
        requested: Money,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("invalid date: {message}")]
    InvalidDate { message: String },
}

impl LoanError {
    /// concurrent-modification conflicts may be retried; everything else may not
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoanError::StaleVersion { .. })
    }
}

pub type Result<T> = std::result::Result<T, LoanError>;
