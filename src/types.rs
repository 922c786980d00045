use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// unique identifier for a loan
pub type LoanId = Uuid;

/// unique identifier for a charge instance
pub type ChargeId = Uuid;

/// unique identifier for a transaction
pub type TransactionId = Uuid;

/// loan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    /// submitted, awaiting approval
    Pending,
    /// approved, schedule projected, not yet disbursed
    Approved,
    /// disbursed and performing
    Active,
    /// paid beyond total outstanding, credit held in suspense
    Overpaid,
    /// fully settled
    Closed,
    /// settled early via foreclosure
    Foreclosed,
    /// written off as loss
    WrittenOff,
}

impl LoanStatus {
    /// terminal states freeze the schedule
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoanStatus::Closed | LoanStatus::Foreclosed | LoanStatus::WrittenOff
        )
    }

    pub fn accepts_repayments(&self) -> bool {
        matches!(self, LoanStatus::Active | LoanStatus::Overpaid)
    }
}

/// amortization method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmortizationType {
    /// level payment; interest on declining balance, principal the remainder
    EqualInstallments,
    /// equal principal per period, interest on declining balance
    EqualPrincipal,
}

/// how interest is computed within a repayment period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterestCalculationPeriod {
    /// daily rate times actual days in the period
    Daily,
    /// one periodic rate per repayment period
    SameAsRepaymentPeriod,
}

/// repayment period unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepaymentFrequency {
    Weekly,
    Monthly,
}

impl RepaymentFrequency {
    pub fn periods_per_year(&self) -> u32 {
        match self {
            RepaymentFrequency::Weekly => 52,
            RepaymentFrequency::Monthly => 12,
        }
    }
}

/// how the nominal rate is quoted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateFrequency {
    PerAnnum,
    /// the rate applies to one repayment period as-is
    PerRepaymentPeriod,
}

/// charge calculation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeCalculation {
    Flat,
    PercentOfAmount,
    PercentOfAmountPlusInterest,
    PercentOfInterest,
}

/// charge timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeTiming {
    OnDisbursement,
    SpecifiedDueDate,
    PerInstallment,
    OverdueFee,
}

/// repayment allocation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationStrategy {
    /// oldest installment first; penalties, fees, interest, principal within each
    Standard,
    /// overdue interest across all installments, then overdue principal, then
    /// current interest, then current principal; excess is advance principal
    RbiStyle,
    /// interest before principal within each installment, oldest first
    InterestPrincipalPenaltiesFees,
}

/// compounding method for interest recalculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompoundingMethod {
    None,
    Interest,
    InterestAndFee,
}

/// reschedule strategy for interest recalculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RescheduleStrategy {
    /// keep remaining installment count, recompute the level payment
    ReduceEmi,
    /// keep the payment amount, solve for the installment count
    ReduceNumberOfInstallments,
    /// keep per-period amounts, shift the deficit/surplus into the next installment
    RescheduleNextInstallments,
}

/// interest accrual cutoff for pre-close quotes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreCloseInterestStrategy {
    UpToPreCloseDate,
    UpToLastRestDate,
}

/// which schedule arrears aging is computed against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrearsBasis {
    /// the live, re-amortized schedule
    CurrentSchedule,
    /// the initial projection, pinned at first build
    OriginalSchedule,
}

/// kinds of monetary transactions in the loan's log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Disbursement,
    Repayment,
    ChargePayment,
    Waiver,
    Refund,
    Accrual,
}

/// a monetary component of an installment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Component {
    Principal,
    Interest,
    Fee,
    Penalty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(LoanStatus::Closed.is_terminal());
        assert!(LoanStatus::Foreclosed.is_terminal());
        assert!(LoanStatus::WrittenOff.is_terminal());
        assert!(!LoanStatus::Active.is_terminal());
        assert!(!LoanStatus::Overpaid.is_terminal());
    }

    #[test]
    fn test_repayment_acceptance() {
        assert!(LoanStatus::Active.accepts_repayments());
        assert!(LoanStatus::Overpaid.accepts_repayments());
        assert!(!LoanStatus::Approved.accepts_repayments());
        assert!(!LoanStatus::Closed.accepts_repayments());
    }
}
