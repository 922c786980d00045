pub mod allocator;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{ChargeId, Component, TransactionId, TransactionKind};

pub use allocator::RepaymentAllocator;

/// one entry in the append-only transaction log
///
/// entries are never removed; undo marks the entry reversed and the loan
/// state is rebuilt by replaying everything that is not reversed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanTransaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub date: NaiveDate,
    /// tie-break for same-day entries, in posting order
    pub seq: u64,
    pub amount: Money,
    /// set for charge payments and waivers
    pub charge_id: Option<ChargeId>,
    pub reversed: bool,
}

impl LoanTransaction {
    pub fn new(kind: TransactionKind, date: NaiveDate, seq: u64, amount: Money) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            date,
            seq,
            amount,
            charge_id: None,
            reversed: false,
        }
    }

    pub fn for_charge(
        kind: TransactionKind,
        date: NaiveDate,
        seq: u64,
        amount: Money,
        charge_id: ChargeId,
    ) -> Self {
        Self {
            charge_id: Some(charge_id),
            ..Self::new(kind, date, seq, amount)
        }
    }
}

/// where one repayment went, component by component
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PaymentAllocation {
    pub to_principal: Money,
    pub to_interest: Money,
    pub to_fees: Money,
    pub to_penalties: Money,
    /// anything beyond every outstanding due
    pub excess: Money,
    pub lines: Vec<AllocationBreakdownLine>,
}

impl PaymentAllocation {
    pub fn applied(&self) -> Money {
        self.to_principal + self.to_interest + self.to_fees + self.to_penalties
    }

    pub fn add(&mut self, installment: u32, component: Component, amount: Money) {
        if amount.is_zero() {
            return;
        }
        match component {
            Component::Principal => self.to_principal += amount,
            Component::Interest => self.to_interest += amount,
            Component::Fee => self.to_fees += amount,
            Component::Penalty => self.to_penalties += amount,
        }
        self.lines.push(AllocationBreakdownLine {
            installment,
            component,
            amount,
        });
    }
}

/// one (installment, component, amount) slice of an allocation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationBreakdownLine {
    pub installment: u32,
    pub component: Component,
    pub amount: Money,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_totals_track_lines() {
        let mut allocation = PaymentAllocation::default();
        allocation.add(1, Component::Interest, Money::from_major(240));
        allocation.add(1, Component::Principal, Money::from_major(2_875));
        allocation.add(1, Component::Fee, Money::ZERO);

        assert_eq!(allocation.applied(), Money::from_major(3_115));
        assert_eq!(allocation.lines.len(), 2); // zero line is dropped
    }
}
