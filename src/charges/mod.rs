pub mod apportion;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{LoanError, Result};
use crate::types::{ChargeCalculation, ChargeId, ChargeTiming};

pub use apportion::ChargeApportioner;

/// a product-level charge definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeDefinition {
    pub name: String,
    pub calculation: ChargeCalculation,
    pub timing: ChargeTiming,
    pub is_penalty: bool,
}

impl ChargeDefinition {
    /// not every calculation makes sense for every timing
    pub fn permits_calculation(&self) -> bool {
        match self.timing {
            ChargeTiming::OnDisbursement | ChargeTiming::SpecifiedDueDate => matches!(
                self.calculation,
                ChargeCalculation::Flat | ChargeCalculation::PercentOfAmount
            ),
            ChargeTiming::PerInstallment => true,
            ChargeTiming::OverdueFee => {
                self.is_penalty
                    && matches!(
                        self.calculation,
                        ChargeCalculation::Flat | ChargeCalculation::PercentOfAmount
                    )
            }
        }
    }
}

/// which installments a charge applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeTarget {
    AllInstallments,
    Installment(u32),
}

/// a charge attached to a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeInstance {
    pub id: ChargeId,
    pub definition: ChargeDefinition,
    /// flat amount or percentage, per the definition's calculation type
    pub amount_or_percentage: Decimal,
    /// due date for specified-due-date charges
    pub due_date: Option<NaiveDate>,
    pub target: ChargeTarget,
    pub due: Money,
    pub paid: Money,
    pub waived: Money,
    pub written_off: Money,
}

impl ChargeInstance {
    pub fn new(
        definition: ChargeDefinition,
        amount_or_percentage: Decimal,
        due_date: Option<NaiveDate>,
        target: ChargeTarget,
    ) -> Result<Self> {
        if amount_or_percentage <= Decimal::ZERO {
            return Err(LoanError::InvalidChargeAmount {
                amount: Money::from_decimal(amount_or_percentage),
            });
        }
        if !definition.permits_calculation() {
            return Err(LoanError::ChargeNotPermittedForTiming {
                calculation: definition.calculation,
                timing: definition.timing,
            });
        }
        if definition.timing == ChargeTiming::SpecifiedDueDate && due_date.is_none() {
            return Err(LoanError::InvalidConfiguration {
                message: "specified-due-date charge requires a due date".to_string(),
            });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            definition,
            amount_or_percentage,
            due_date,
            target,
            due: Money::ZERO,
            paid: Money::ZERO,
            waived: Money::ZERO,
            written_off: Money::ZERO,
        })
    }

    pub fn outstanding(&self) -> Money {
        self.due - self.paid - self.waived - self.written_off
    }

    /// reset settlement buckets ahead of a replay
    pub fn reset_settled(&mut self) {
        self.paid = Money::ZERO;
        self.waived = Money::ZERO;
        self.written_off = Money::ZERO;
    }

    pub fn verify_consistency(&self) -> Result<()> {
        let outstanding = self.outstanding();
        if outstanding.is_negative() {
            return Err(LoanError::InconsistentSchedule {
                message: format!("charge {}: outstanding {outstanding} is negative", self.id),
            });
        }
        Ok(())
    }
}
