//! Turns relative period definitions into concrete date ranges.

use crate::backend::FiscalPeriod;
use crate::error::{ReportError, Result};
use crate::schema::{InstancePeriod, PeriodType};
use crate::utils::{add_days, start_of_week};
use chrono::NaiveDate;
use serde::Serialize;

/// Concrete dates of a report period.
///
/// An invalid period (no enclosing fiscal period, offset out of range) is
/// skipped by the report without raising an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedPeriod {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub period_from: Option<FiscalPeriod>,
    pub period_to: Option<FiscalPeriod>,
    pub valid: bool,
}

impl ResolvedPeriod {
    fn dates(date_from: NaiveDate, date_to: NaiveDate) -> Self {
        Self {
            date_from: Some(date_from),
            date_to: Some(date_to),
            valid: true,
            ..Default::default()
        }
    }

    fn invalid() -> Self {
        Self::default()
    }

    /// The date range, or a configuration error naming `period_name` when it is incomplete.
    pub fn date_range(&self, period_name: &str) -> Result<(NaiveDate, NaiveDate)> {
        match (self.date_from, self.date_to) {
            (Some(from), Some(to)) => Ok((from, to)),
            _ => Err(ReportError::MissingDateRange(period_name.to_string())),
        }
    }
}

/// Resolves `period` around `pivot`.
///
/// `fiscal_periods` are the backend fiscal periods of the instance company; they
/// are only consulted for fiscal periods and may include special periods.
pub fn resolve_period(
    period: &InstancePeriod,
    pivot: NaiveDate,
    fiscal_periods: &[FiscalPeriod],
) -> Result<ResolvedPeriod> {
    match period.period_type {
        PeriodType::Day => {
            let from = add_days(pivot, period.offset)?;
            let last = period
                .duration
                .checked_sub(1)
                .ok_or_else(|| out_of_range(period))?;
            let to = add_days(from, last)?;
            Ok(ResolvedPeriod::dates(from, to))
        }
        PeriodType::Week => {
            let offset = period
                .offset
                .checked_mul(7)
                .ok_or_else(|| out_of_range(period))?;
            let last = period
                .duration
                .checked_mul(7)
                .and_then(|days| days.checked_sub(1))
                .ok_or_else(|| out_of_range(period))?;
            let from = add_days(start_of_week(pivot), offset)?;
            let to = add_days(from, last)?;
            Ok(ResolvedPeriod::dates(from, to))
        }
        PeriodType::FiscalPeriod => Ok(resolve_fiscal(period, pivot, fiscal_periods)),
    }
}

fn resolve_fiscal(
    period: &InstancePeriod,
    pivot: NaiveDate,
    fiscal_periods: &[FiscalPeriod],
) -> ResolvedPeriod {
    let mut regular: Vec<&FiscalPeriod> = fiscal_periods.iter().filter(|p| !p.special).collect();
    regular.sort_by_key(|p| (p.date_start, p.id));

    let Some(current) = regular.iter().position(|p| p.contains(pivot)) else {
        return ResolvedPeriod::invalid();
    };

    let Some((first, end)) = (current as i64)
        .checked_add(period.offset)
        .and_then(|first| Some((first, first.checked_add(period.duration)?)))
    else {
        return ResolvedPeriod::invalid();
    };
    if first < 0 || end <= first || end > regular.len() as i64 {
        return ResolvedPeriod::invalid();
    }

    let span = &regular[first as usize..end as usize];
    match (span.first(), span.last()) {
        (Some(start), Some(end)) => ResolvedPeriod {
            date_from: Some(start.date_start),
            date_to: Some(end.date_stop),
            period_from: Some((*start).clone()),
            period_to: Some((*end).clone()),
            valid: true,
        },
        _ => ResolvedPeriod::invalid(),
    }
}

fn out_of_range(period: &InstancePeriod) -> ReportError {
    ReportError::DateError(format!(
        "Offset {} and duration {} of period {} are out of range",
        period.offset, period.duration, period.name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn months_2024() -> Vec<FiscalPeriod> {
        let mut periods: Vec<FiscalPeriod> = (1..=12)
            .map(|m| {
                let start = date(2024, m, 1);
                let stop = if m == 12 {
                    date(2024, 12, 31)
                } else {
                    date(2024, m + 1, 1).pred_opt().unwrap()
                };
                FiscalPeriod {
                    id: m as u64,
                    name: format!("{:02}/2024", m),
                    date_start: start,
                    date_stop: stop,
                    special: false,
                    company_id: 1,
                }
            })
            .collect();
        periods.push(FiscalPeriod {
            id: 99,
            name: "Opening 2024".to_string(),
            date_start: date(2024, 1, 1),
            date_stop: date(2024, 1, 1),
            special: true,
            company_id: 1,
        });
        periods
    }

    #[test]
    fn test_day_periods() {
        let pivot = date(2024, 3, 14);
        let period = InstancePeriod::new(1, "yesterday", PeriodType::Day);
        let resolved = resolve_period(&period, pivot, &[]).unwrap();
        assert!(resolved.valid);
        assert_eq!(resolved.date_range("yesterday").unwrap(), (date(2024, 3, 13), date(2024, 3, 13)));

        let period = InstancePeriod::new(2, "last week", PeriodType::Day)
            .with_offset(-7)
            .with_duration(7);
        let (from, to) = resolve_period(&period, pivot, &[])
            .unwrap()
            .date_range("last week")
            .unwrap();
        assert_eq!((to - from).num_days() + 1, 7);
        assert_eq!(from, date(2024, 3, 7));
    }

    #[test]
    fn test_week_periods_start_on_monday() {
        // Thursday
        let pivot = date(2024, 3, 14);
        let period = InstancePeriod::new(1, "w", PeriodType::Week).with_duration(2);
        let (from, to) = resolve_period(&period, pivot, &[])
            .unwrap()
            .date_range("w")
            .unwrap();
        assert_eq!(from, date(2024, 3, 4));
        assert_eq!(to, date(2024, 3, 17));
        assert_eq!((to - from).num_days() + 1, 14);
    }

    #[test]
    fn test_fiscal_periods() {
        let periods = months_2024();
        let pivot = date(2024, 3, 14);

        let quarter = InstancePeriod::new(1, "q1", PeriodType::FiscalPeriod)
            .with_offset(-2)
            .with_duration(3);
        let resolved = resolve_period(&quarter, pivot, &periods).unwrap();
        assert!(resolved.valid);
        assert_eq!(resolved.date_from, Some(date(2024, 1, 1)));
        assert_eq!(resolved.date_to, Some(date(2024, 3, 31)));
        assert_eq!(resolved.period_from.unwrap().name, "01/2024");
        assert_eq!(resolved.period_to.unwrap().name, "03/2024");
    }

    #[test]
    fn test_fiscal_periods_out_of_range() {
        let periods = months_2024();

        // special periods are never counted, so January is still the first period
        let before = InstancePeriod::new(1, "p", PeriodType::FiscalPeriod).with_offset(-3);
        assert!(!resolve_period(&before, date(2024, 3, 14), &periods).unwrap().valid);

        let after = InstancePeriod::new(1, "p", PeriodType::FiscalPeriod)
            .with_offset(0)
            .with_duration(2);
        assert!(!resolve_period(&after, date(2024, 12, 5), &periods).unwrap().valid);

        let no_enclosing = InstancePeriod::new(1, "p", PeriodType::FiscalPeriod);
        let resolved = resolve_period(&no_enclosing, date(2025, 2, 1), &periods).unwrap();
        assert!(!resolved.valid);
        assert!(matches!(
            resolved.date_range("p"),
            Err(ReportError::MissingDateRange(name)) if name == "p"
        ));
    }

    #[test]
    fn test_huge_offsets_do_not_overflow() {
        let pivot = date(2024, 3, 14);

        let week = InstancePeriod::new(1, "w", PeriodType::Week).with_offset(i64::MAX / 4);
        assert!(matches!(
            resolve_period(&week, pivot, &[]),
            Err(ReportError::DateError(_))
        ));

        let long_week = InstancePeriod::new(1, "w", PeriodType::Week).with_duration(i64::MAX);
        assert!(matches!(
            resolve_period(&long_week, pivot, &[]),
            Err(ReportError::DateError(_))
        ));

        let day = InstancePeriod::new(1, "d", PeriodType::Day).with_offset(i64::MIN);
        assert!(matches!(
            resolve_period(&day, pivot, &[]),
            Err(ReportError::DateError(_))
        ));

        let periods = months_2024();
        for offset in [i64::MAX, i64::MIN] {
            let fiscal = InstancePeriod::new(1, "p", PeriodType::FiscalPeriod).with_offset(offset);
            assert!(!resolve_period(&fiscal, pivot, &periods).unwrap().valid);
        }
        let fiscal = InstancePeriod::new(1, "p", PeriodType::FiscalPeriod)
            .with_offset(0)
            .with_duration(i64::MAX);
        assert!(!resolve_period(&fiscal, pivot, &periods).unwrap().valid);
    }
}
