use crate::charges::{ChargeInstance, ChargeTarget};
use crate::decimal::{Currency, Money};
use crate::errors::{LoanError, Result};
use crate::schedule::Installment;
use crate::types::{ChargeCalculation, ChargeTiming, Component};

/// distributes charge dues over the schedule and mirrors settlements back
pub struct ChargeApportioner;

impl ChargeApportioner {
    /// recompute every charge's due and re-attach fee/penalty dues to the schedule
    ///
    /// settled buckets are preserved: when a recomputed due falls below what
    /// was already paid or waived, the due is held at the settled amount so
    /// the reconciliation invariant keeps holding.
    pub fn apportion(
        charges: &mut [ChargeInstance],
        schedule: &mut [Installment],
        total_disbursed: Money,
        currency: &Currency,
    ) -> Result<()> {
        for installment in schedule.iter_mut() {
            installment.fee.due = Money::ZERO;
            installment.penalty.due = Money::ZERO;
        }

        for charge in charges.iter_mut() {
            let component = attachment_component(charge);
            let mut computed = Money::ZERO;
            match charge.definition.timing {
                // lives on the instance only and is collected at disbursement
                ChargeTiming::OnDisbursement => {
                    computed = charge_amount(charge, total_disbursed, currency);
                }
                ChargeTiming::SpecifiedDueDate => {
                    let due_date = charge.due_date.ok_or(LoanError::InvalidConfiguration {
                        message: "specified-due-date charge without a due date".to_string(),
                    })?;
                    computed = charge_amount(charge, total_disbursed, currency);
                    if let Some(installment) = containing_installment(schedule, due_date) {
                        installment.component_mut(component).due += computed;
                    }
                }
                ChargeTiming::PerInstallment => {
                    for installment in schedule.iter_mut() {
                        if !charge_targets(charge, installment.number) {
                            continue;
                        }
                        let base = match charge.definition.calculation {
                            ChargeCalculation::Flat => Money::ZERO,
                            ChargeCalculation::PercentOfAmount => installment.principal.due,
                            ChargeCalculation::PercentOfAmountPlusInterest => {
                                installment.principal.due + installment.interest.due
                            }
                            ChargeCalculation::PercentOfInterest => installment.interest.due,
                        };
                        let share = charge_amount(charge, base, currency);
                        installment.component_mut(component).due += share;
                        computed += share;
                    }
                }
                ChargeTiming::OverdueFee => {
                    let number = match charge.target {
                        ChargeTarget::Installment(n) => n,
                        ChargeTarget::AllInstallments => {
                            return Err(LoanError::InvalidConfiguration {
                                message: "overdue fee must target one installment".to_string(),
                            })
                        }
                    };
                    if let Some(installment) =
                        schedule.iter_mut().find(|i| i.number == number)
                    {
                        let base = installment.principal.outstanding();
                        computed = charge_amount(charge, base, currency);
                        installment.component_mut(component).due += computed;
                    }
                }
            }
            let settled = charge.paid + charge.waived + charge.written_off;
            charge.due = computed.max(settled);
        }

        // recomputed installment dues may have fallen below carried settlements
        for installment in schedule.iter_mut() {
            for component in [Component::Fee, Component::Penalty] {
                let c = installment.component_mut(component);
                c.due = c.due.max(c.paid + c.waived + c.written_off);
            }
        }
        Ok(())
    }

    /// apply a payment against one charge and mirror it onto the schedule
    pub fn pay(
        charge: &mut ChargeInstance,
        schedule: &mut [Installment],
        amount: Money,
    ) -> Result<()> {
        if !amount.is_positive() {
            return Err(LoanError::InvalidPaymentAmount { amount });
        }
        if amount > charge.outstanding() {
            return Err(LoanError::InvalidPaymentAmount { amount });
        }
        charge.paid += amount;

        let component = attachment_component(charge);
        let mut remaining = amount;
        for installment in schedule.iter_mut() {
            if remaining.is_zero() {
                break;
            }
            if !charge_targets(charge, installment.number) {
                continue;
            }
            let applied = installment.component_mut(component).pay(remaining);
            remaining -= applied;
        }
        Ok(())
    }

    /// waive everything outstanding on one charge, returning the waived amount
    pub fn waive(charge: &mut ChargeInstance, schedule: &mut [Installment]) -> Money {
        let amount = charge.outstanding();
        charge.waived += amount;

        let component = attachment_component(charge);
        let mut remaining = amount;
        for installment in schedule.iter_mut() {
            if remaining.is_zero() {
                break;
            }
            if !charge_targets(charge, installment.number) {
                continue;
            }
            let c = installment.component_mut(component);
            let waived_here = remaining.min(c.outstanding());
            c.waived += waived_here;
            remaining -= waived_here;
        }
        amount
    }
}

fn attachment_component(charge: &ChargeInstance) -> Component {
    if charge.definition.is_penalty {
        Component::Penalty
    } else {
        Component::Fee
    }
}

fn charge_amount(charge: &ChargeInstance, base: Money, currency: &Currency) -> Money {
    let raw = match charge.definition.calculation {
        ChargeCalculation::Flat => Money::from_decimal(charge.amount_or_percentage),
        _ => base.percentage(charge.amount_or_percentage),
    };
    raw.round_for(currency)
}

/// disbursement charges attach to no installment; the rest honor the target
fn charge_targets(charge: &ChargeInstance, installment_number: u32) -> bool {
    if charge.definition.timing == ChargeTiming::OnDisbursement {
        return false;
    }
    match charge.target {
        ChargeTarget::AllInstallments => true,
        ChargeTarget::Installment(n) => n == installment_number,
    }
}

fn containing_installment(
    schedule: &mut [Installment],
    date: chrono::NaiveDate,
) -> Option<&mut Installment> {
    let position = schedule
        .iter()
        .position(|i| date <= i.due_date)
        .unwrap_or(schedule.len().saturating_sub(1));
    schedule.get_mut(position)
}
