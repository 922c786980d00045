use chrono::NaiveDate;

use crate::decimal::Money;
use crate::errors::{LoanError, Result};
use crate::payments::PaymentAllocation;
use crate::schedule::Installment;
use crate::types::{AllocationStrategy, Component};

/// distributes repayments over the schedule per the configured strategy
pub struct RepaymentAllocator;

impl RepaymentAllocator {
    /// allocate a repayment, consuming it exactly; anything beyond every
    /// outstanding due lands in the allocation's excess bucket
    pub fn allocate(
        schedule: &mut [Installment],
        amount: Money,
        date: NaiveDate,
        strategy: AllocationStrategy,
    ) -> Result<PaymentAllocation> {
        if !amount.is_positive() {
            return Err(LoanError::InvalidPaymentAmount { amount });
        }
        let mut allocation = PaymentAllocation::default();
        let mut remaining = amount;

        match strategy {
            AllocationStrategy::Standard => {
                remaining = sweep(
                    schedule,
                    remaining,
                    &mut allocation,
                    &[
                        Component::Penalty,
                        Component::Fee,
                        Component::Interest,
                        Component::Principal,
                    ],
                    |_| true,
                );
            }
            AllocationStrategy::InterestPrincipalPenaltiesFees => {
                remaining = sweep(
                    schedule,
                    remaining,
                    &mut allocation,
                    &[
                        Component::Interest,
                        Component::Principal,
                        Component::Penalty,
                        Component::Fee,
                    ],
                    |_| true,
                );
            }
            AllocationStrategy::RbiStyle => {
                remaining = allocate_rbi(schedule, remaining, date, &mut allocation);
            }
        }

        allocation.excess = remaining;
        Ok(allocation)
    }

    /// un-apply a refund, releasing paid amounts in reverse application order
    pub fn refund(
        schedule: &mut [Installment],
        amount: Money,
        strategy: AllocationStrategy,
    ) -> Result<PaymentAllocation> {
        if !amount.is_positive() {
            return Err(LoanError::InvalidPaymentAmount { amount });
        }
        let total_paid: Money = schedule
            .iter()
            .map(|i| i.principal.paid + i.interest.paid + i.fee.paid + i.penalty.paid)
            .sum();
        if amount > total_paid {
            return Err(LoanError::InvalidPaymentAmount { amount });
        }

        // reverse of the strategy's within-installment order
        let order = match strategy {
            AllocationStrategy::Standard | AllocationStrategy::RbiStyle => [
                Component::Principal,
                Component::Interest,
                Component::Fee,
                Component::Penalty,
            ],
            AllocationStrategy::InterestPrincipalPenaltiesFees => [
                Component::Fee,
                Component::Penalty,
                Component::Principal,
                Component::Interest,
            ],
        };

        let mut released = PaymentAllocation::default();
        let mut remaining = amount;
        for installment in schedule.iter_mut().rev() {
            if remaining.is_zero() {
                break;
            }
            for component in order {
                let freed = installment.component_mut(component).unpay(remaining);
                released.add(installment.number, component, freed);
                remaining -= freed;
            }
        }
        Ok(released)
    }
}

/// pay components in order across installments oldest-first
fn sweep(
    schedule: &mut [Installment],
    mut remaining: Money,
    allocation: &mut PaymentAllocation,
    order: &[Component],
    eligible: impl Fn(&Installment) -> bool,
) -> Money {
    for installment in schedule.iter_mut() {
        if remaining.is_zero() {
            break;
        }
        if !eligible(installment) {
            continue;
        }
        for &component in order {
            let applied = installment.component_mut(component).pay(remaining);
            allocation.add(installment.number, component, applied);
            remaining -= applied;
        }
    }
    remaining
}

/// one component across every eligible installment, oldest-first
fn sweep_component(
    schedule: &mut [Installment],
    mut remaining: Money,
    allocation: &mut PaymentAllocation,
    component: Component,
    eligible: impl Fn(&Installment) -> bool,
) -> Money {
    for installment in schedule.iter_mut() {
        if remaining.is_zero() {
            break;
        }
        if !eligible(installment) {
            continue;
        }
        let applied = installment.component_mut(component).pay(remaining);
        allocation.add(installment.number, component, applied);
        remaining -= applied;
    }
    remaining
}

/// overdue interest, then overdue principal, then the current period's
/// interest and principal; once everything due so far is settled,
/// leftovers prepay principal on upcoming installments
fn allocate_rbi(
    schedule: &mut [Installment],
    mut remaining: Money,
    date: NaiveDate,
    allocation: &mut PaymentAllocation,
) -> Money {
    let overdue = |i: &Installment| i.due_date < date;
    let current = |i: &Installment| i.from_date < date && date <= i.due_date;
    let upcoming = |i: &Installment| i.from_date >= date;

    remaining = sweep_component(schedule, remaining, allocation, Component::Interest, overdue);
    remaining = sweep_component(schedule, remaining, allocation, Component::Principal, overdue);
    remaining = sweep_component(schedule, remaining, allocation, Component::Interest, current);
    remaining = sweep_component(schedule, remaining, allocation, Component::Principal, current);
    remaining = sweep(
        schedule,
        remaining,
        allocation,
        &[Component::Penalty, Component::Fee],
        |i| overdue(i) || current(i),
    );

    // advance principal on the next installments, in order
    remaining = sweep_component(schedule, remaining, allocation, Component::Principal, upcoming);

    // settle whatever else is open so the amount is consumed exactly
    sweep(
        schedule,
        remaining,
        allocation,
        &[Component::Penalty, Component::Fee, Component::Interest],
        |_| true,
    )
}
