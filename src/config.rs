use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::calendar::Recurrence;
use crate::decimal::{Currency, Money, Rate};
use crate::errors::{LoanError, Result};
use crate::types::{
    AllocationStrategy, AmortizationType, ArrearsBasis, ChargeCalculation, CompoundingMethod,
    InterestCalculationPeriod, PreCloseInterestStrategy, RateFrequency, RepaymentFrequency,
    RescheduleStrategy,
};

/// agreed loan terms, fixed at approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub approved_principal: Money,
    pub currency: Currency,
    pub nominal_rate: Rate,
    pub rate_frequency: RateFrequency,
    pub number_of_repayments: u32,
    /// repay every N frequency units (e.g. every 1 month, every 2 weeks)
    pub repay_every: u32,
    pub repayment_frequency: RepaymentFrequency,
    pub amortization: AmortizationType,
    pub interest_calculation_period: InterestCalculationPeriod,
    pub grace: GracePeriods,
    pub moratoriums: Vec<Moratorium>,
    pub allocation_strategy: AllocationStrategy,
    pub arrears_basis: ArrearsBasis,
    pub recalculation: Option<RecalculationSettings>,
}

impl LoanTerms {
    /// rate applying to one repayment period
    pub fn periodic_rate(&self) -> Rate {
        match self.rate_frequency {
            RateFrequency::PerRepaymentPeriod => self.nominal_rate,
            RateFrequency::PerAnnum => {
                let periods = self.repayment_frequency.periods_per_year() / self.repay_every.max(1);
                self.nominal_rate.per_period(periods.max(1))
            }
        }
    }

    /// annual-equivalent rate, used to derive daily rates
    pub fn annual_rate(&self) -> Rate {
        match self.rate_frequency {
            RateFrequency::PerAnnum => self.nominal_rate,
            RateFrequency::PerRepaymentPeriod => {
                let periods = self.repayment_frequency.periods_per_year() / self.repay_every.max(1);
                Rate::from_decimal(self.nominal_rate.as_decimal() * Decimal::from(periods.max(1)))
            }
        }
    }

    /// is the given 1-based period inside a moratorium
    pub fn moratorium_at(&self, period: u32) -> Option<&Moratorium> {
        self.moratoriums
            .iter()
            .find(|m| period >= m.start_period && period < m.start_period + m.periods)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.approved_principal.is_positive() {
            return Err(LoanError::InvalidConfiguration {
                message: format!("approved principal must be positive: {}", self.approved_principal),
            });
        }
        if self.number_of_repayments == 0 {
            return Err(LoanError::InvalidConfiguration {
                message: "number of repayments must be at least 1".to_string(),
            });
        }
        if self.repay_every == 0 {
            return Err(LoanError::InvalidConfiguration {
                message: "repay-every must be at least 1".to_string(),
            });
        }
        if self.nominal_rate.as_decimal().is_sign_negative() {
            return Err(LoanError::InvalidConfiguration {
                message: format!("nominal rate must not be negative: {}", self.nominal_rate),
            });
        }
        if self.grace.principal + self.grace.interest >= 2 * self.number_of_repayments
            || self.grace.principal >= self.number_of_repayments
        {
            return Err(LoanError::InvalidConfiguration {
                message: "grace periods must leave at least one amortizing period".to_string(),
            });
        }
        for m in &self.moratoriums {
            if m.start_period == 0 || m.start_period + m.periods > self.number_of_repayments + 1 {
                return Err(LoanError::InvalidConfiguration {
                    message: format!(
                        "moratorium periods {}..{} fall outside the term",
                        m.start_period,
                        m.start_period + m.periods
                    ),
                });
            }
        }
        let amortizing = (1..=self.number_of_repayments)
            .any(|p| p > self.grace.principal && self.moratorium_at(p).is_none());
        if !amortizing {
            return Err(LoanError::InvalidConfiguration {
                message: "moratoriums and grace must leave at least one amortizing period"
                    .to_string(),
            });
        }
        if let Some(recalc) = &self.recalculation {
            recalc.validate()?;
        }
        Ok(())
    }
}

/// leading periods with suppressed dues; the term is not shortened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GracePeriods {
    /// leading periods with no principal due
    pub principal: u32,
    /// leading periods with no interest charged
    pub interest: u32,
}

/// a span of periods with no dues; deferred amounts spread over the remainder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Moratorium {
    /// 1-based first affected period
    pub start_period: u32,
    pub periods: u32,
    /// when true, interest keeps accruing and is deferred into later periods
    pub charge_interest: bool,
}

/// a partial disbursement of the approved principal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tranche {
    pub date: NaiveDate,
    pub amount: Money,
}

/// rest/compounding cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestRule {
    Daily,
    /// 1 = monday .. 7 = sunday
    Weekly { day_of_week: u8 },
    /// 1..=31, clamped to month length
    Monthly { day_of_month: u8 },
    SameAsRepaymentPeriod,
}

impl RestRule {
    /// resolve to a concrete recurrence given the repayment cadence
    pub fn recurrence(&self, repayment: Recurrence) -> Recurrence {
        match self {
            RestRule::Daily => Recurrence::Daily,
            RestRule::Weekly { day_of_week } => Recurrence::Weekly {
                day_of_week: *day_of_week,
            },
            RestRule::Monthly { day_of_month } => Recurrence::Monthly {
                day_of_month: *day_of_month,
            },
            RestRule::SameAsRepaymentPeriod => repayment,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            RestRule::Weekly { day_of_week } if !(1..=7).contains(day_of_week) => {
                Err(LoanError::InvalidConfiguration {
                    message: format!("day-of-week out of range: {day_of_week}"),
                })
            }
            RestRule::Monthly { day_of_month } if !(1..=31).contains(day_of_month) => {
                Err(LoanError::InvalidConfiguration {
                    message: format!("day-of-month out of range: {day_of_month}"),
                })
            }
            _ => Ok(()),
        }
    }
}

/// interest recalculation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalculationSettings {
    pub compounding: CompoundingMethod,
    pub reschedule: RescheduleStrategy,
    pub rest: RestRule,
    pub compounding_rest: RestRule,
    pub pre_close: PreCloseInterestStrategy,
    pub overdue_penalty: Option<OverduePenalty>,
}

impl RecalculationSettings {
    pub fn validate(&self) -> Result<()> {
        self.rest.validate()?;
        self.compounding_rest.validate()?;
        if let Some(penalty) = &self.overdue_penalty {
            if penalty.amount_or_percentage <= Decimal::ZERO {
                return Err(LoanError::InvalidConfiguration {
                    message: "overdue penalty amount must be positive".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// penalty attached to overdue installments by the batch job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverduePenalty {
    pub calculation: ChargeCalculation,
    pub amount_or_percentage: Decimal,
    /// days past due before the penalty applies
    pub grace_days: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

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

    #[test]
    fn test_periodic_rate_per_period() {
        let terms = monthly_terms(12_000, 4, 2);
        assert_eq!(terms.periodic_rate().as_decimal(), dec!(0.02));
        assert_eq!(terms.annual_rate().as_decimal(), dec!(0.24));
    }

    #[test]
    fn test_periodic_rate_per_annum() {
        let mut terms = monthly_terms(12_000, 12, 24);
        terms.rate_frequency = RateFrequency::PerAnnum;
        assert_eq!(terms.periodic_rate().as_decimal(), dec!(0.02));
    }

    #[test]
    fn test_validation_rejects_zero_principal() {
        let terms = monthly_terms(0, 4, 2);
        assert!(terms.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_moratorium() {
        let mut terms = monthly_terms(12_000, 4, 2);
        terms.moratoriums.push(Moratorium {
            start_period: 4,
            periods: 3,
            charge_interest: false,
        });
        assert!(terms.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_term_with_no_amortizing_period() {
        let mut terms = monthly_terms(12_000, 4, 2);
        terms.moratoriums.push(Moratorium {
            start_period: 1,
            periods: 4,
            charge_interest: false,
        });
        assert!(terms.validate().is_err());
    }

    #[test]
    fn test_rest_rule_resolution() {
        let repayment = Recurrence::Monthly { day_of_month: 15 };
        assert_eq!(
            RestRule::SameAsRepaymentPeriod.recurrence(repayment),
            repayment
        );
        assert_eq!(RestRule::Daily.recurrence(repayment), Recurrence::Daily);
    }
}
