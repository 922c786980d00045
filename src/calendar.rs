use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::types::RepaymentFrequency;

/// recurrence rule anchored to a day of week or day of month
///
/// boundaries are intrinsic to the rule: daily matches every date, weekly
/// matches the anchored weekday, monthly matches the anchored day-of-month
/// clamped to month length (a 31st anchor lands on the 30th, 29th or 28th)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recurrence {
    Daily,
    /// 1 = monday .. 7 = sunday
    Weekly { day_of_week: u8 },
    /// 1..=31, clamped to month length
    Monthly { day_of_month: u8 },
}

impl Recurrence {
    /// monthly rule anchored to the given date's day-of-month
    pub fn monthly_from(date: NaiveDate) -> Self {
        Recurrence::Monthly {
            day_of_month: date.day() as u8,
        }
    }

    /// weekly rule anchored to the given date's weekday
    pub fn weekly_from(date: NaiveDate) -> Self {
        Recurrence::Weekly {
            day_of_week: date.weekday().number_from_monday() as u8,
        }
    }

    /// rule matching the repayment cadence, anchored to the first due date
    pub fn from_repayment(frequency: RepaymentFrequency, first_due: NaiveDate) -> Self {
        match frequency {
            RepaymentFrequency::Weekly => Recurrence::weekly_from(first_due),
            RepaymentFrequency::Monthly => Recurrence::monthly_from(first_due),
        }
    }

    /// does this date fall on a boundary of the rule
    pub fn is_boundary(&self, date: NaiveDate) -> bool {
        match self {
            Recurrence::Daily => true,
            Recurrence::Weekly { day_of_week } => {
                date.weekday().number_from_monday() as u8 == *day_of_week
            }
            Recurrence::Monthly { day_of_month } => {
                let clamped = (*day_of_month as u32).min(days_in_month(date.year(), date.month()));
                date.day() == clamped
            }
        }
    }

    /// the most recent boundary on or before the given date
    pub fn last_boundary_on_or_before(&self, date: NaiveDate) -> NaiveDate {
        let mut d = date;
        while !self.is_boundary(d) {
            d -= Duration::days(1);
        }
        d
    }

    /// the first boundary strictly after the given date
    pub fn next_boundary_after(&self, date: NaiveDate) -> NaiveDate {
        let mut d = date + Duration::days(1);
        while !self.is_boundary(d) {
            d += Duration::days(1);
        }
        d
    }

    /// ordered boundaries in (start, end]
    pub fn boundaries_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut out = Vec::new();
        if end <= start {
            return out;
        }
        let mut d = self.next_boundary_after(start);
        while d <= end {
            out.push(d);
            d = self.next_boundary_after(d);
        }
        out
    }
}

/// add calendar months keeping the anchor day-of-month, clamped to month length
pub fn add_months(date: NaiveDate, months: u32, anchor_day: u32) -> NaiveDate {
    let total = date.year() * 12 + date.month0() as i32 + months as i32;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    let day = anchor_day.min(days_in_month(year, month));
    // day is clamped to a valid day of the target month
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(date)
}

/// add whole weeks
pub fn add_weeks(date: NaiveDate, weeks: u32) -> NaiveDate {
    date + Duration::weeks(weeks as i64)
}

/// advance a repayment date by n periods, keeping the anchor day for monthly
pub fn advance_periods(
    from: NaiveDate,
    n: u32,
    every: u32,
    frequency: RepaymentFrequency,
    anchor_day: u32,
) -> NaiveDate {
    match frequency {
        RepaymentFrequency::Weekly => add_weeks(from, n * every),
        RepaymentFrequency::Monthly => add_months(from, n * every, anchor_day),
    }
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 30,
    }
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

pub fn days_in_year(year: i32) -> u32 {
    if is_leap_year(year) {
        366
    } else {
        365
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_add_months_month_end_anchor() {
        // 31st anchor clamps through short months and recovers
        assert_eq!(add_months(d(2024, 1, 31), 1, 31), d(2024, 2, 29));
        assert_eq!(add_months(d(2024, 2, 29), 1, 31), d(2024, 3, 31));
        assert_eq!(add_months(d(2024, 3, 31), 1, 31), d(2024, 4, 30));
        // non-leap february
        assert_eq!(add_months(d(2023, 1, 31), 1, 31), d(2023, 2, 28));
    }

    #[test]
    fn test_add_months_year_rollover() {
        assert_eq!(add_months(d(2023, 11, 15), 3, 15), d(2024, 2, 15));
    }

    #[test]
    fn test_monthly_boundaries() {
        let rule = Recurrence::Monthly { day_of_month: 31 };
        assert!(rule.is_boundary(d(2024, 2, 29))); // clamped anchor
        assert!(!rule.is_boundary(d(2024, 2, 28)));
        assert!(rule.is_boundary(d(2024, 1, 31)));

        let bounds = rule.boundaries_between(d(2024, 1, 1), d(2024, 4, 30));
        assert_eq!(bounds, vec![d(2024, 1, 31), d(2024, 2, 29), d(2024, 3, 31), d(2024, 4, 30)]);
    }

    #[test]
    fn test_weekly_boundaries() {
        // mondays
        let rule = Recurrence::Weekly { day_of_week: 1 };
        assert!(rule.is_boundary(d(2024, 1, 1))); // jan 1 2024 is a monday
        assert_eq!(rule.next_boundary_after(d(2024, 1, 1)), d(2024, 1, 8));
        assert_eq!(rule.last_boundary_on_or_before(d(2024, 1, 7)), d(2024, 1, 1));
    }

    #[test]
    fn test_daily_boundaries() {
        let rule = Recurrence::Daily;
        assert_eq!(
            rule.boundaries_between(d(2024, 1, 1), d(2024, 1, 3)),
            vec![d(2024, 1, 2), d(2024, 1, 3)]
        );
    }

    #[test]
    fn test_leap_year() {
        assert!(is_leap_year(2024));
        assert!(!is_leap_year(2023));
        assert!(is_leap_year(2000));
        assert!(!is_leap_year(1900));
        assert_eq!(days_in_year(2024), 366);
    }

    #[test]
    fn test_advance_periods() {
        assert_eq!(
            advance_periods(d(2024, 1, 31), 2, 1, RepaymentFrequency::Monthly, 31),
            d(2024, 3, 31)
        );
        assert_eq!(
            advance_periods(d(2024, 1, 1), 2, 1, RepaymentFrequency::Weekly, 1),
            d(2024, 1, 15)
        );
    }
}
