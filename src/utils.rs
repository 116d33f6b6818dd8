use crate::error::{ReportError, Result};
use chrono::{Datelike, Days, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;

/// Returns true when `name` can be used as a binding key in formulas: `[_A-Za-z][_A-Za-z0-9]*`.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Builds an identifier from a free-text description.
///
/// Every non-word character becomes `_`, a leading digit is prefixed with `_`
/// and the result is lowercased, so `"Gross Margin %"` becomes `"gross_margin__"`.
pub fn identifier_from_description(description: &str) -> String {
    let mut out = String::with_capacity(description.len() + 1);
    if description.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.push('_');
    }
    for c in description.chars() {
        if c == '_' || c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else {
            out.push('_');
        }
    }
    out
}

pub fn add_days(date: NaiveDate, days: i64) -> Result<NaiveDate> {
    let shifted = if days >= 0 {
        date.checked_add_days(Days::new(days as u64))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted.ok_or_else(|| {
        ReportError::DateError(format!("Shifting {} by {} days is out of range", date, days))
    })
}

/// Monday of the ISO week containing `date`.
pub fn start_of_week(date: NaiveDate) -> NaiveDate {
    let weekday = date.weekday().num_days_from_monday() as i64;
    date - Duration::days(weekday)
}

/// Local midnight of `date + add_days` in `tz`, expressed as a naive UTC timestamp.
pub fn utc_midnight(date: NaiveDate, tz: Tz, add_days_count: i64) -> Result<NaiveDateTime> {
    let day = add_days(date, add_days_count)?;
    let midnight = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| ReportError::DateError(format!("No midnight on {}", day)))?;

    let local = match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        // DST gap at midnight: the first valid local instant of that day
        LocalResult::None => tz
            .from_local_datetime(&(midnight + Duration::hours(1)))
            .earliest()
            .ok_or_else(|| {
                ReportError::DateError(format!("Cannot resolve local midnight of {} in {}", day, tz))
            })?,
    };

    Ok(local.naive_utc())
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| ReportError::UnknownTimezone(name.to_string()))
}

/// Rounds half away from zero at `dp` decimals and never returns negative zero.
pub fn round_to(value: f64, dp: u32) -> f64 {
    let factor = 10f64.powi(dp as i32);
    let rounded = (value * factor).round() / factor;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("revenue_q1"));
        assert!(is_valid_identifier("_private"));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("a-b"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("é"));
    }

    #[test]
    fn test_identifier_from_description() {
        assert_eq!(identifier_from_description("Gross Margin %"), "gross_margin__");
        assert_eq!(identifier_from_description("2024 Sales"), "_2024_sales");
        assert!(is_valid_identifier(&identifier_from_description("9 lives-left")));
    }

    #[test]
    fn test_start_of_week() {
        // 2024-03-14 is a Thursday
        let thursday = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
        assert_eq!(
            start_of_week(thursday),
            NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()
        );
        let monday = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        assert_eq!(start_of_week(monday), monday);
    }

    #[test]
    fn test_utc_midnight() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let utc = utc_midnight(date, chrono_tz::UTC, 0).unwrap();
        assert_eq!(utc, date.and_hms_opt(0, 0, 0).unwrap());

        let brussels = parse_timezone("Europe/Brussels").unwrap();
        let from = utc_midnight(date, brussels, 0).unwrap();
        assert_eq!(
            from,
            NaiveDate::from_ymd_opt(2024, 1, 14)
                .unwrap()
                .and_hms_opt(23, 0, 0)
                .unwrap()
        );
        let to = utc_midnight(date, brussels, 1).unwrap();
        assert_eq!(to, date.and_hms_opt(23, 0, 0).unwrap());
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(12.345, 1), 12.3);
        assert_eq!(round_to(-0.04, 1), 0.0);
        assert!(round_to(-0.04, 1).is_sign_positive());
        assert_eq!(round_to(2.5, 0), 3.0);
    }

    #[test]
    fn test_unknown_timezone() {
        assert!(matches!(
            parse_timezone("Mars/Olympus"),
            Err(ReportError::UnknownTimezone(_))
        ));
    }
}
