use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::calendar::{advance_periods, days_in_year};
use crate::config::{LoanTerms, Tranche};
use crate::decimal::{Money, Rate};
use crate::errors::{LoanError, Result};
use crate::schedule::{verify_schedule, ComponentAmounts, Installment};
use crate::types::{AmortizationType, InterestCalculationPeriod};

/// builds the baseline installment schedule from loan terms and tranches
pub struct ScheduleBuilder;

impl ScheduleBuilder {
    /// generate the full schedule; principal dues sum exactly to the disbursed total
    pub fn build(terms: &LoanTerms, tranches: &[Tranche]) -> Result<Vec<Installment>> {
        terms.validate()?;
        if tranches.is_empty() {
            return Err(LoanError::InvalidConfiguration {
                message: "at least one disbursement tranche is required".to_string(),
            });
        }
        let mut tranches: Vec<Tranche> = tranches.to_vec();
        tranches.sort_by_key(|t| t.date);

        let total_disbursed: Money = tranches.iter().map(|t| t.amount).sum();
        if total_disbursed > terms.approved_principal {
            return Err(LoanError::DisbursementExceedsApproved {
                approved: terms.approved_principal,
                requested: total_disbursed,
            });
        }

        let start = tranches[0].date;
        let dates = Self::period_dates(terms, start, terms.number_of_repayments);

        // with a trailing moratorium the final period suppresses principal,
        // so the remainder lands on the last period that still amortizes
        let last_amortizing = (1..=terms.number_of_repayments)
            .filter(|p| *p > terms.grace.principal && terms.moratorium_at(*p).is_none())
            .last()
            .unwrap_or(terms.number_of_repayments);
        let last_interest_bearing = (1..=terms.number_of_repayments)
            .filter(|p| *p > terms.grace.interest && terms.moratorium_at(*p).is_none())
            .last()
            .unwrap_or(terms.number_of_repayments);

        let mut schedule = Vec::with_capacity(dates.len());
        // balance used to amortize principal: tranches counted from the period
        // whose due date they precede
        let mut outstanding = Money::ZERO;
        let mut counted = 0usize;
        // interest accrued during a moratorium with charge_interest, deferred
        // into later periods
        let mut deferred_interest = Money::ZERO;
        let mut deferral_share = Money::ZERO;
        let mut deferral_active = false;
        let mut level_payment: Option<Money> = None;

        for (idx, (from, due)) in dates.iter().enumerate() {
            let number = idx as u32 + 1;
            let mut injected = Money::ZERO;
            // the last amortizing period absorbs tranches dated beyond it
            let last = number == last_amortizing;
            while counted < tranches.len() && (tranches[counted].date < *due || last) {
                injected += tranches[counted].amount;
                counted += 1;
            }
            if !injected.is_zero() {
                outstanding += injected;
                // a tranche restarts the level-payment computation from here
                level_payment = None;
            }

            let in_principal_grace = number <= terms.grace.principal;
            let in_interest_grace = number <= terms.grace.interest;
            let moratorium = terms.moratorium_at(number);
            let principal_suppressed = in_principal_grace || moratorium.is_some();

            let interest_basis = Self::interest_basis(&tranches[..counted], *from, outstanding);
            let raw_interest = Self::period_interest(terms, interest_basis, *from, *due);
            let raw_interest = raw_interest.round_for(&terms.currency);

            let remaining_amortizing = Self::remaining_amortizing_periods(terms, number);

            let mut installment = Installment::new(number, *from, *due);

            // interest due for this period
            let interest_due = if in_interest_grace {
                Money::ZERO
            } else if let Some(m) = moratorium {
                if m.charge_interest {
                    deferred_interest += raw_interest;
                    deferral_active = false; // share recomputed when moratorium ends
                }
                Money::ZERO
            } else {
                let mut due_amount = raw_interest;
                if !deferred_interest.is_zero() {
                    if !deferral_active {
                        let remaining = Self::remaining_unsuppressed_periods(terms, number);
                        deferral_share = (deferred_interest / Decimal::from(remaining.max(1)))
                            .round_for(&terms.currency);
                        deferral_active = true;
                    }
                    let share = deferral_share.min(deferred_interest);
                    let share = if number == last_interest_bearing {
                        deferred_interest
                    } else {
                        share
                    };
                    deferred_interest -= share;
                    due_amount += share;
                }
                due_amount
            };

            // principal due for this period
            let principal_due = if principal_suppressed {
                Money::ZERO
            } else if number == last_amortizing {
                // last amortizing period absorbs the rounding remainder
                outstanding
            } else {
                match terms.amortization {
                    AmortizationType::EqualPrincipal => {
                        (outstanding / Decimal::from(remaining_amortizing.max(1)))
                            .round_for(&terms.currency)
                            .min(outstanding)
                    }
                    AmortizationType::EqualInstallments => {
                        let payment = match level_payment {
                            Some(p) => p,
                            None => {
                                let p = Self::annuity_payment(
                                    outstanding,
                                    terms.periodic_rate(),
                                    remaining_amortizing.max(1),
                                )
                                .round_for(&terms.currency);
                                level_payment = Some(p);
                                p
                            }
                        };
                        (payment - interest_due).max(Money::ZERO).min(outstanding)
                    }
                }
            };

            outstanding -= principal_due;
            installment.principal = ComponentAmounts::with_due(principal_due);
            installment.interest = ComponentAmounts::with_due(interest_due);
            installment.balance_after = outstanding;
            schedule.push(installment);
        }

        verify_schedule(&schedule, total_disbursed)?;
        Ok(schedule)
    }

    /// (from, due) date pairs for n periods starting at the given date
    pub fn period_dates(terms: &LoanTerms, start: NaiveDate, n: u32) -> Vec<(NaiveDate, NaiveDate)> {
        use chrono::Datelike;
        let anchor = start.day();
        let mut dates = Vec::with_capacity(n as usize);
        let mut from = start;
        for i in 1..=n {
            let due = advance_periods(start, i, terms.repay_every, terms.repayment_frequency, anchor);
            dates.push((from, due));
            from = due;
        }
        dates
    }

    /// level annuity payment: P * r * (1 + r)^n / ((1 + r)^n - 1)
    pub fn annuity_payment(balance: Money, periodic_rate: Rate, periods: u32) -> Money {
        if periods == 0 {
            return balance;
        }
        let r = periodic_rate.as_decimal();
        if r.is_zero() {
            return balance / Decimal::from(periods);
        }
        let mut compound = Decimal::ONE;
        let base = Decimal::ONE + r;
        for _ in 0..periods {
            compound *= base;
        }
        let numerator = balance.as_decimal() * r * compound;
        let denominator = compound - Decimal::ONE;
        Money::from_decimal(numerator / denominator)
    }

    /// periods from `number` (inclusive) onward that amortize principal
    fn remaining_amortizing_periods(terms: &LoanTerms, number: u32) -> u32 {
        (number..=terms.number_of_repayments)
            .filter(|p| *p > terms.grace.principal && terms.moratorium_at(*p).is_none())
            .count() as u32
    }

    /// periods from `number` (inclusive) onward with interest charged normally
    fn remaining_unsuppressed_periods(terms: &LoanTerms, number: u32) -> u32 {
        (number..=terms.number_of_repayments)
            .filter(|p| *p > terms.grace.interest && terms.moratorium_at(*p).is_none())
            .count() as u32
    }

    /// balance the period's interest is computed on
    ///
    /// a tranche landing mid-period amortizes from this period but only bears
    /// interest from the next; under daily interest it bears interest for the
    /// days it was actually outstanding
    fn interest_basis(
        counted: &[Tranche],
        from: NaiveDate,
        outstanding_with_injection: Money,
    ) -> InterestBasis {
        let mid_period: Money = counted
            .iter()
            .filter(|t| t.date > from)
            .map(|t| t.amount)
            .sum();
        InterestBasis {
            at_period_start: outstanding_with_injection - mid_period,
            mid_period_tranches: counted.iter().filter(|t| t.date > from).cloned().collect(),
        }
    }

    fn period_interest(
        terms: &LoanTerms,
        basis: InterestBasis,
        from: NaiveDate,
        due: NaiveDate,
    ) -> Money {
        match terms.interest_calculation_period {
            InterestCalculationPeriod::SameAsRepaymentPeriod => {
                basis.at_period_start * terms.periodic_rate().as_decimal()
            }
            InterestCalculationPeriod::Daily => {
                use chrono::Datelike;
                let daily = terms.annual_rate().daily(days_in_year(from.year()));
                let days = (due - from).num_days().max(0) as u32;
                let mut interest =
                    basis.at_period_start * daily.as_decimal() * Decimal::from(days);
                for tranche in &basis.mid_period_tranches {
                    let days = (due - tranche.date).num_days().max(0) as u32;
                    interest += tranche.amount * daily.as_decimal() * Decimal::from(days);
                }
                interest
            }
        }
    }
}

struct InterestBasis {
    at_period_start: Money,
    mid_period_tranches: Vec<Tranche>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GracePeriods, Moratorium};
    use crate::decimal::Currency;
    use crate::types::{
        AllocationStrategy, ArrearsBasis, RateFrequency, RepaymentFrequency,
    };
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn monthly_terms(principal: i64, repayments: u32, rate_percent: u32) -> LoanTerms {
        LoanTerms {
            approved_principal: Money::from_major(principal),
            currency: Currency::usd(),
            nominal_rate: Rate::from_percentage(rate_percent),
            rate_frequency: RateFrequency::PerRepaymentPeriod,
            number_of_repayments: repayments,
            repay_every: 1,
            repayment_frequency: RepaymentFrequency::Monthly,
            amortization: AmortizationType::EqualInstallments,
            interest_calculation_period: InterestCalculationPeriod::SameAsRepaymentPeriod,
            grace: GracePeriods::default(),
            moratoriums: Vec::new(),
            allocation_strategy: AllocationStrategy::Standard,
            arrears_basis: ArrearsBasis::CurrentSchedule,
            recalculation: None,
        }
    }

    fn single_tranche(amount: i64, date: NaiveDate) -> Vec<Tranche> {
        vec![Tranche {
            date,
            amount: Money::from_major(amount),
        }]
    }

    #[test]
    fn test_equal_installments_basic() {
        let terms = monthly_terms(12_000, 4, 2);
        let schedule =
            ScheduleBuilder::build(&terms, &single_tranche(12_000, d(2024, 1, 1))).unwrap();

        assert_eq!(schedule.len(), 4);
        // first period interest: 12,000 * 2%
        assert_eq!(schedule[0].interest.due, Money::from_major(240));
        // level payment across all but possibly the last
        let emi = schedule[0].principal.due + schedule[0].interest.due;
        for installment in &schedule[..3] {
            assert_eq!(installment.principal.due + installment.interest.due, emi);
        }
        // principal dues reconcile exactly
        let principal_total: Money = schedule.iter().map(|i| i.principal.due).sum();
        assert_eq!(principal_total, Money::from_major(12_000));
        assert_eq!(schedule[3].balance_after, Money::ZERO);
        // interest declines with the balance
        for pair in schedule.windows(2) {
            assert!(pair[1].interest.due < pair[0].interest.due);
        }
    }

    #[test]
    fn test_equal_principal_basic() {
        let mut terms = monthly_terms(12_000, 4, 2);
        terms.amortization = AmortizationType::EqualPrincipal;
        let schedule =
            ScheduleBuilder::build(&terms, &single_tranche(12_000, d(2024, 1, 1))).unwrap();

        for installment in &schedule {
            assert_eq!(installment.principal.due, Money::from_major(3_000));
        }
        assert_eq!(schedule[0].interest.due, Money::from_major(240));
        assert_eq!(schedule[1].interest.due, Money::from_major(180));
        assert_eq!(schedule[2].interest.due, Money::from_major(120));
        assert_eq!(schedule[3].interest.due, Money::from_major(60));
    }

    #[test]
    fn test_due_dates_follow_monthly_anchor() {
        let terms = monthly_terms(12_000, 4, 2);
        let schedule =
            ScheduleBuilder::build(&terms, &single_tranche(12_000, d(2024, 1, 31))).unwrap();

        assert_eq!(schedule[0].due_date, d(2024, 2, 29));
        assert_eq!(schedule[1].due_date, d(2024, 3, 31));
        assert_eq!(schedule[2].due_date, d(2024, 4, 30));
        assert_eq!(schedule[3].due_date, d(2024, 5, 31));
    }

    #[test]
    fn test_principal_grace_defers_into_later_periods() {
        let mut terms = monthly_terms(12_000, 4, 2);
        terms.grace = GracePeriods {
            principal: 2,
            interest: 0,
        };
        let schedule =
            ScheduleBuilder::build(&terms, &single_tranche(12_000, d(2024, 1, 1))).unwrap();

        assert_eq!(schedule[0].principal.due, Money::ZERO);
        assert_eq!(schedule[1].principal.due, Money::ZERO);
        // interest still charged on the untouched balance
        assert_eq!(schedule[0].interest.due, Money::from_major(240));
        assert_eq!(schedule[1].interest.due, Money::from_major(240));
        // the full principal amortizes over the remaining two periods
        let principal_total: Money = schedule.iter().map(|i| i.principal.due).sum();
        assert_eq!(principal_total, Money::from_major(12_000));
        assert!(schedule[2].principal.due.is_positive());
    }

    #[test]
    fn test_interest_grace_suppresses_interest() {
        let mut terms = monthly_terms(12_000, 4, 2);
        terms.grace = GracePeriods {
            principal: 0,
            interest: 1,
        };
        let schedule =
            ScheduleBuilder::build(&terms, &single_tranche(12_000, d(2024, 1, 1))).unwrap();

        assert_eq!(schedule[0].interest.due, Money::ZERO);
        assert!(schedule[1].interest.due.is_positive());
    }

    #[test]
    fn test_moratorium_defers_charged_interest() {
        let mut terms = monthly_terms(12_000, 4, 2);
        terms.moratoriums.push(Moratorium {
            start_period: 2,
            periods: 1,
            charge_interest: true,
        });
        let schedule =
            ScheduleBuilder::build(&terms, &single_tranche(12_000, d(2024, 1, 1))).unwrap();

        assert_eq!(schedule[1].principal.due, Money::ZERO);
        assert_eq!(schedule[1].interest.due, Money::ZERO);
        // the moratorium period's interest reappears across periods 3 and 4
        let total_interest: Money = schedule.iter().map(|i| i.interest.due).sum();
        let no_moratorium = ScheduleBuilder::build(
            &monthly_terms(12_000, 4, 2),
            &single_tranche(12_000, d(2024, 1, 1)),
        )
        .unwrap();
        let baseline_interest: Money = no_moratorium.iter().map(|i| i.interest.due).sum();
        assert!(total_interest > baseline_interest - Money::from_major(240));
        // principal still fully amortizes
        let principal_total: Money = schedule.iter().map(|i| i.principal.due).sum();
        assert_eq!(principal_total, Money::from_major(12_000));
    }

    #[test]
    fn test_trailing_moratorium_moves_remainder_earlier() {
        let mut terms = monthly_terms(700, 3, 2);
        terms.moratoriums.push(Moratorium {
            start_period: 3,
            periods: 1,
            charge_interest: false,
        });
        let schedule =
            ScheduleBuilder::build(&terms, &single_tranche(700, d(2024, 1, 1))).unwrap();

        assert_eq!(schedule[2].principal.due, Money::ZERO);
        assert_eq!(schedule[2].interest.due, Money::ZERO);
        // period 2 absorbs the rounding remainder the final period no longer can
        let principal_total: Money = schedule.iter().map(|i| i.principal.due).sum();
        assert_eq!(principal_total, Money::from_major(700));
        assert_eq!(schedule[1].balance_after, Money::ZERO);
    }

    #[test]
    fn test_trailing_moratorium_with_deferred_interest_settles_early() {
        let mut terms = monthly_terms(12_000, 4, 2);
        terms.moratoriums.push(Moratorium {
            start_period: 2,
            periods: 1,
            charge_interest: true,
        });
        terms.moratoriums.push(Moratorium {
            start_period: 4,
            periods: 1,
            charge_interest: true,
        });
        let schedule =
            ScheduleBuilder::build(&terms, &single_tranche(12_000, d(2024, 1, 1))).unwrap();

        // period 2's deferred interest lands fully on period 3, the last
        // interest-bearing period
        assert!(schedule[2].interest.due > Money::from_major(240));
        assert_eq!(schedule[3].interest.due, Money::ZERO);
        let principal_total: Money = schedule.iter().map(|i| i.principal.due).sum();
        assert_eq!(principal_total, Money::from_major(12_000));
    }

    #[test]
    fn test_under_disbursement_rescales_pro_rata() {
        let terms = monthly_terms(12_000, 4, 2);
        // only 6,000 of the approved 12,000 actually disbursed
        let schedule =
            ScheduleBuilder::build(&terms, &single_tranche(6_000, d(2024, 1, 1))).unwrap();

        let principal_total: Money = schedule.iter().map(|i| i.principal.due).sum();
        assert_eq!(principal_total, Money::from_major(6_000));
        assert_eq!(schedule[0].interest.due, Money::from_major(120));
    }

    #[test]
    fn test_multiple_tranches_step_up_balance() {
        let terms = monthly_terms(12_000, 4, 2);
        let tranches = vec![
            Tranche {
                date: d(2024, 1, 1),
                amount: Money::from_major(8_000),
            },
            Tranche {
                date: d(2024, 3, 1),
                amount: Money::from_major(4_000),
            },
        ];
        let schedule = ScheduleBuilder::build(&terms, &tranches).unwrap();

        // period 1 interest only sees the first tranche
        assert_eq!(schedule[0].interest.due, Money::from_major(160));
        let principal_total: Money = schedule.iter().map(|i| i.principal.due).sum();
        assert_eq!(principal_total, Money::from_major(12_000));
        // period 3 and 4 interest reflects the larger balance
        assert!(schedule[2].interest.due > schedule[3].interest.due);
        assert_eq!(schedule[3].balance_after, Money::ZERO);
    }

    #[test]
    fn test_disbursement_over_approved_rejected() {
        let terms = monthly_terms(12_000, 4, 2);
        let result = ScheduleBuilder::build(&terms, &single_tranche(15_000, d(2024, 1, 1)));
        assert!(matches!(
            result,
            Err(LoanError::DisbursementExceedsApproved { .. })
        ));
    }

    #[test]
    fn test_daily_interest_calculation_period() {
        let mut terms = monthly_terms(12_000, 4, 2);
        terms.interest_calculation_period = InterestCalculationPeriod::Daily;
        let schedule =
            ScheduleBuilder::build(&terms, &single_tranche(12_000, d(2024, 1, 1))).unwrap();

        // january has 31 days; daily rate = 24% / 366 in a leap year
        let expected = Money::from_major(12_000)
            * (dec!(0.24) / dec!(366))
            * dec!(31);
        assert_eq!(schedule[0].interest.due, expected.round_for(&terms.currency));
        let principal_total: Money = schedule.iter().map(|i| i.principal.due).sum();
        assert_eq!(principal_total, Money::from_major(12_000));
    }

    #[test]
    fn test_zero_rate_amortizes_evenly() {
        let terms = monthly_terms(12_000, 4, 0);
        let schedule =
            ScheduleBuilder::build(&terms, &single_tranche(12_000, d(2024, 1, 1))).unwrap();

        for installment in &schedule {
            assert_eq!(installment.principal.due, Money::from_major(3_000));
            assert_eq!(installment.interest.due, Money::ZERO);
        }
    }
}
