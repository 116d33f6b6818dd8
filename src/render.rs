//! Display formatting of KPI values and period comparisons.

use crate::schema::{CompareMethod, Kpi, KpiType};
use crate::utils::round_to;
use crate::value::Value;
use chrono::NaiveDate;

pub const NO_BREAK_SPACE: char = '\u{a0}';
pub const NON_BREAKING_HYPHEN: char = '\u{2011}';

/// Rendering of a null KPI value.
pub const NOT_AVAILABLE: &str = "#N/A";

/// Number and date conventions of a language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locale {
    pub code: &'static str,
    pub decimal_sep: char,
    pub thousands_sep: Option<char>,
    /// Digit group sizes from the right; the last size repeats.
    pub grouping: &'static [usize],
    /// `strftime`-style date format.
    pub date_format: &'static str,
}

pub static EN_US: Locale = Locale {
    code: "en_US",
    decimal_sep: '.',
    thousands_sep: Some(','),
    grouping: &[3],
    date_format: "%m/%d/%Y",
};

pub static EN_GB: Locale = Locale {
    code: "en_GB",
    decimal_sep: '.',
    thousands_sep: Some(','),
    grouping: &[3],
    date_format: "%d/%m/%Y",
};

/// Indian numbering: `12,34,567.89`.
pub static EN_IN: Locale = Locale {
    code: "en_IN",
    decimal_sep: '.',
    thousands_sep: Some(','),
    grouping: &[3, 2],
    date_format: "%d/%m/%Y",
};

pub static FR_FR: Locale = Locale {
    code: "fr_FR",
    decimal_sep: ',',
    thousands_sep: Some(NO_BREAK_SPACE),
    grouping: &[3],
    date_format: "%d/%m/%Y",
};

pub static FR_BE: Locale = Locale {
    code: "fr_BE",
    decimal_sep: ',',
    thousands_sep: Some('.'),
    grouping: &[3],
    date_format: "%d/%m/%Y",
};

pub static NL_NL: Locale = Locale {
    code: "nl_NL",
    decimal_sep: ',',
    thousands_sep: Some('.'),
    grouping: &[3],
    date_format: "%d-%m-%Y",
};

pub static DE_DE: Locale = Locale {
    code: "de_DE",
    decimal_sep: ',',
    thousands_sep: Some('.'),
    grouping: &[3],
    date_format: "%d.%m.%Y",
};

/// Swiss German uses `'` for thousands and `.` for decimals.
pub static DE_CH: Locale = Locale {
    code: "de_CH",
    decimal_sep: '.',
    thousands_sep: Some('\''),
    grouping: &[3],
    date_format: "%d.%m.%Y",
};

pub static ES_ES: Locale = Locale {
    code: "es_ES",
    decimal_sep: ',',
    thousands_sep: Some('.'),
    grouping: &[3],
    date_format: "%d/%m/%Y",
};

pub static IT_IT: Locale = Locale {
    code: "it_IT",
    decimal_sep: ',',
    thousands_sep: Some('.'),
    grouping: &[3],
    date_format: "%d/%m/%Y",
};

static LOCALES: &[&Locale] = &[
    &EN_US, &EN_GB, &EN_IN, &FR_FR, &FR_BE, &NL_NL, &DE_DE, &DE_CH, &ES_ES, &IT_IT,
];

impl Locale {
    /// Looks up a language code (`fr_FR`, `fr-FR`, case-insensitive). Unknown codes use `en_US`.
    pub fn for_lang(lang: &str) -> &'static Locale {
        let wanted = lang.trim().replace('-', "_");
        LOCALES
            .iter()
            .copied()
            .find(|l| l.code.eq_ignore_ascii_case(&wanted))
            .unwrap_or(&EN_US)
    }

    /// Formats `value` with `dp` decimals and digit grouping. `force_sign` prefixes
    /// non-negative values with `+`.
    pub fn format_number(&self, value: f64, dp: u32, force_sign: bool) -> String {
        let fixed = format!("{:.*}", dp as usize, value.abs());
        let (int_part, frac_part) = match fixed.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (fixed.as_str(), None),
        };

        let mut out = String::with_capacity(fixed.len() + 8);
        if value.is_sign_negative() && fixed.bytes().any(|b| b.is_ascii_digit() && b != b'0') {
            out.push('-');
        } else if force_sign {
            out.push('+');
        }
        out.push_str(&self.group_digits(int_part));
        if let Some(frac) = frac_part {
            out.push(self.decimal_sep);
            out.push_str(frac);
        }
        out
    }

    fn group_digits(&self, digits: &str) -> String {
        let Some(sep) = self.thousands_sep else {
            return digits.to_string();
        };
        if self.grouping.is_empty() {
            return digits.to_string();
        }

        let chars: Vec<char> = digits.chars().collect();
        let mut groups: Vec<String> = Vec::new();
        let mut end = chars.len();
        let mut sizes = self.grouping.iter();
        let mut size = self.grouping[0];
        while end > 0 {
            if let Some(next) = sizes.next() {
                size = *next;
            }
            let start = end.saturating_sub(size.max(1));
            groups.push(chars[start..end].iter().collect());
            end = start;
        }
        groups.reverse();
        groups.join(&sep.to_string())
    }

    pub fn format_date(&self, date: NaiveDate) -> String {
        date.format(self.date_format).to_string()
    }
}

/// Formats a number for display: scaled by `divider`, rounded to `dp`
/// decimals, followed by a no-break space, the divider label and the suffix.
/// Hyphens are replaced by non-breaking hyphens so negative values never wrap.
pub fn render_num(
    value: f64,
    divider: f64,
    divider_label: &str,
    dp: u32,
    suffix: Option<&str>,
    force_sign: bool,
    locale: &Locale,
) -> String {
    let divider = if divider == 0.0 { 1.0 } else { divider };
    let scaled = round_to(value / divider, dp);
    let mut out = locale.format_number(scaled, dp, force_sign);
    out.push(NO_BREAK_SPACE);
    out.push_str(divider_label);
    out.push_str(suffix.unwrap_or(""));
    out.replace('-', &NON_BREAKING_HYPHEN.to_string())
}

/// Renders a KPI value according to its type.
pub fn render(kpi: &Kpi, value: &Value, locale: &Locale) -> String {
    if value.is_null() {
        return NOT_AVAILABLE.to_string();
    }
    let number = match (kpi.kpi_type, value.as_number()) {
        (KpiType::Str, _) | (_, None) => return value.to_string(),
        (_, Some(n)) => n,
    };
    match kpi.kpi_type {
        KpiType::Pct => render_num(number, 0.01, "", kpi.dp, Some("%"), false, locale),
        _ => render_num(
            number,
            kpi.divider.factor(),
            kpi.divider.label(),
            kpi.dp,
            kpi.suffix.as_deref(),
            false,
            locale,
        ),
    }
}

/// Renders the change of `value` relative to `base_value`.
///
/// Numeric KPIs are first divided by the normalize factor of their period so
/// periods of different lengths compare fairly. Percentages compare in
/// percentage points. Returns an empty string when there is nothing to show.
pub fn render_comparison(
    kpi: &Kpi,
    value: &Value,
    base_value: &Value,
    normalize_factor: i64,
    base_normalize_factor: i64,
    locale: &Locale,
) -> String {
    let (Some(value), Some(base)) = (value.as_number(), base_value.as_number()) else {
        return String::new();
    };

    match kpi.kpi_type {
        KpiType::Pct => render_num(value - base, 0.01, "", kpi.dp, Some("pp"), true, locale),
        KpiType::Num => {
            let value = normalize(value, normalize_factor);
            let base = normalize(base, base_normalize_factor);
            match kpi.compare_method {
                CompareMethod::Diff => render_num(
                    value - base,
                    kpi.divider.factor(),
                    kpi.divider.label(),
                    kpi.dp,
                    kpi.suffix.as_deref(),
                    true,
                    locale,
                ),
                CompareMethod::Pct if round_to(base, kpi.dp) != 0.0 => render_num(
                    (value - base) / base.abs(),
                    0.01,
                    "",
                    kpi.dp,
                    Some("%"),
                    true,
                    locale,
                ),
                _ => String::new(),
            }
        }
        KpiType::Str => String::new(),
    }
}

fn normalize(value: f64, factor: i64) -> f64 {
    if factor > 0 {
        value / factor as f64
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Divider;

    fn num_kpi(divider: Divider, dp: u32, suffix: Option<&str>) -> Kpi {
        let mut kpi = Kpi::new("k", "1");
        kpi.divider = divider;
        kpi.dp = dp;
        kpi.suffix = suffix.map(str::to_string);
        kpi
    }

    #[test]
    fn test_render_num_with_divider_and_suffix() {
        let kpi = num_kpi(Divider::Kilo, 1, Some("$"));
        assert_eq!(render(&kpi, &Value::Number(12345.0), &EN_US), "12.3\u{a0}k$");
        assert_eq!(
            render(&kpi, &Value::Number(-12345.0), &EN_US),
            "\u{2011}12.3\u{a0}k$"
        );
    }

    #[test]
    fn test_render_null_and_types() {
        let kpi = num_kpi(Divider::Unit, 0, None);
        assert_eq!(render(&kpi, &Value::Null, &EN_US), "#N/A");
        assert_eq!(render(&kpi, &Value::Number(1234567.0), &EN_US), "1,234,567\u{a0}");
        // tiny negatives round to an unsigned zero
        assert_eq!(render(&kpi, &Value::Number(-0.2), &EN_US), "0\u{a0}");

        let pct = Kpi::new("p", "1").with_type(KpiType::Pct);
        assert_eq!(render(&pct, &Value::Number(0.256), &EN_US), "26\u{a0}%");

        let text = Kpi::new("s", "'x'").with_type(KpiType::Str);
        assert_eq!(render(&text, &Value::from("a-b"), &EN_US), "a-b");
        assert_eq!(render(&kpi, &Value::from("n/a"), &EN_US), "n/a");
    }

    #[test]
    fn test_locale_grouping() {
        assert_eq!(DE_DE.format_number(1234567.891, 2, false), "1.234.567,89");
        assert_eq!(EN_IN.format_number(1234567.0, 0, false), "12,34,567");
        assert_eq!(FR_FR.format_number(-1234.5, 1, false), "-1\u{a0}234,5");
        assert_eq!(EN_US.format_number(0.0, 2, true), "+0.00");
        assert_eq!(EN_US.format_number(999.0, 0, false), "999");
    }

    #[test]
    fn test_locale_lookup() {
        assert_eq!(Locale::for_lang("fr-FR").code, "fr_FR");
        assert_eq!(Locale::for_lang("de_de").code, "de_DE");
        assert_eq!(Locale::for_lang("tlh").code, "en_US");
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(EN_US.format_date(date), "03/05/2024");
        assert_eq!(DE_DE.format_date(date), "05.03.2024");
    }

    #[test]
    fn test_pct_comparison_in_points() {
        let mut kpi = Kpi::new("p", "1").with_type(KpiType::Pct);
        kpi.dp = 2;
        assert_eq!(
            render_comparison(&kpi, &Value::Number(0.10), &Value::Number(0.08), 1, 1, &EN_US),
            "+2.00\u{a0}pp"
        );
    }

    #[test]
    fn test_num_comparisons() {
        let mut kpi = num_kpi(Divider::Unit, 0, Some("€"));
        kpi.compare_method = CompareMethod::Diff;
        assert_eq!(
            render_comparison(&kpi, &Value::Number(90.0), &Value::Number(100.0), 1, 1, &EN_US),
            "\u{2011}10\u{a0}€"
        );

        kpi.compare_method = CompareMethod::Pct;
        assert_eq!(
            render_comparison(&kpi, &Value::Number(120.0), &Value::Number(100.0), 1, 1, &EN_US),
            "+20\u{a0}%"
        );
        // a base rounding to zero has no meaningful relative change
        assert_eq!(
            render_comparison(&kpi, &Value::Number(120.0), &Value::Number(0.3), 1, 1, &EN_US),
            ""
        );

        kpi.compare_method = CompareMethod::None;
        assert_eq!(
            render_comparison(&kpi, &Value::Number(120.0), &Value::Number(100.0), 1, 1, &EN_US),
            ""
        );
    }

    #[test]
    fn test_comparison_normalizes_period_lengths() {
        let mut kpi = num_kpi(Divider::Unit, 0, None);
        kpi.compare_method = CompareMethod::Diff;
        // 3 months against 1 month
        assert_eq!(
            render_comparison(&kpi, &Value::Number(300.0), &Value::Number(90.0), 3, 1, &EN_US),
            "+10\u{a0}"
        );
        assert_eq!(
            render_comparison(&kpi, &Value::Null, &Value::Number(90.0), 1, 1, &EN_US),
            ""
        );
    }
}
