pub mod builder;
pub mod recalculation;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LoanError, Result};
use crate::types::Component;

pub use builder::ScheduleBuilder;
pub use recalculation::RecalculationEngine;

/// settlement buckets for one component of one installment
///
/// invariant: due = paid + waived + written_off + outstanding, outstanding >= 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComponentAmounts {
    pub due: Money,
    pub paid: Money,
    pub waived: Money,
    pub written_off: Money,
}

impl ComponentAmounts {
    pub fn with_due(due: Money) -> Self {
        Self {
            due,
            ..Default::default()
        }
    }

    pub fn outstanding(&self) -> Money {
        self.due - self.paid - self.waived - self.written_off
    }

    /// apply a payment capped at the outstanding amount, returning what was consumed
    pub fn pay(&mut self, available: Money) -> Money {
        let applied = available.min(self.outstanding()).max(Money::ZERO);
        self.paid += applied;
        applied
    }

    /// reverse a previously applied payment, returning what was released
    pub fn unpay(&mut self, available: Money) -> Money {
        let released = available.min(self.paid).max(Money::ZERO);
        self.paid -= released;
        released
    }

    /// waive everything not yet settled, returning the waived amount
    pub fn waive_outstanding(&mut self) -> Money {
        let waived = self.outstanding();
        self.waived += waived;
        waived
    }

    fn verify(&self, what: &str) -> Result<()> {
        let outstanding = self.outstanding();
        if outstanding.is_negative() {
            return Err(LoanError::InconsistentSchedule {
                message: format!("{what}: outstanding {outstanding} is negative"),
            });
        }
        if self.due != self.paid + self.waived + self.written_off + outstanding {
            return Err(LoanError::InconsistentSchedule {
                message: format!("{what}: due does not reconcile"),
            });
        }
        Ok(())
    }
}

/// one scheduled due period of a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub number: u32,
    pub from_date: NaiveDate,
    pub due_date: NaiveDate,
    pub principal: ComponentAmounts,
    pub interest: ComponentAmounts,
    pub fee: ComponentAmounts,
    pub penalty: ComponentAmounts,
    /// principal balance outstanding after this installment, per projection
    pub balance_after: Money,
}

impl Installment {
    pub fn new(number: u32, from_date: NaiveDate, due_date: NaiveDate) -> Self {
        Self {
            number,
            from_date,
            due_date,
            principal: ComponentAmounts::default(),
            interest: ComponentAmounts::default(),
            fee: ComponentAmounts::default(),
            penalty: ComponentAmounts::default(),
            balance_after: Money::ZERO,
        }
    }

    pub fn component(&self, component: Component) -> &ComponentAmounts {
        match component {
            Component::Principal => &self.principal,
            Component::Interest => &self.interest,
            Component::Fee => &self.fee,
            Component::Penalty => &self.penalty,
        }
    }

    pub fn component_mut(&mut self, component: Component) -> &mut ComponentAmounts {
        match component {
            Component::Principal => &mut self.principal,
            Component::Interest => &mut self.interest,
            Component::Fee => &mut self.fee,
            Component::Penalty => &mut self.penalty,
        }
    }

    pub fn total_due_for_period(&self) -> Money {
        self.principal.due + self.interest.due + self.fee.due + self.penalty.due
    }

    pub fn total_outstanding_for_period(&self) -> Money {
        self.principal.outstanding()
            + self.interest.outstanding()
            + self.fee.outstanding()
            + self.penalty.outstanding()
    }

    pub fn is_fully_paid(&self) -> bool {
        self.total_outstanding_for_period().is_zero()
    }

    /// overdue as of the given date: past due with anything outstanding
    pub fn is_overdue(&self, as_of: NaiveDate) -> bool {
        self.due_date < as_of && !self.is_fully_paid()
    }

    pub fn verify_consistency(&self) -> Result<()> {
        let n = self.number;
        self.principal.verify(&format!("installment {n} principal"))?;
        self.interest.verify(&format!("installment {n} interest"))?;
        self.fee.verify(&format!("installment {n} fee"))?;
        self.penalty.verify(&format!("installment {n} penalty"))?;
        Ok(())
    }
}

/// verify whole-schedule invariants: chronology and principal reconciliation
pub fn verify_schedule(schedule: &[Installment], total_disbursed: Money) -> Result<()> {
    for installment in schedule {
        installment.verify_consistency()?;
    }
    for pair in schedule.windows(2) {
        if pair[1].due_date <= pair[0].due_date {
            return Err(LoanError::InconsistentSchedule {
                message: format!(
                    "installments {} and {} are not strictly chronological",
                    pair[0].number, pair[1].number
                ),
            });
        }
    }
    let principal_due: Money = schedule.iter().map(|i| i.principal.due).sum();
    if principal_due != total_disbursed {
        return Err(LoanError::InconsistentSchedule {
            message: format!(
                "principal dues {principal_due} do not sum to disbursed {total_disbursed}"
            ),
        });
    }
    Ok(())
}
