//! Value-level normalization of amounts, dates, currencies, and special
//! identifier formats.
//!
//! Every function here is total: empty, whitespace-only, missing, or
//! unparseable input yields `None` rather than an error. Callers steer the
//! ambiguous cases with a format hint, normally the format label produced by
//! [`TypeDetector`](crate::detector::TypeDetector).

use std::{collections::HashMap, ops::RangeInclusive, str::FromStr, sync::LazyLock};

use chrono::{DateTime, Days, Month, NaiveDate, NaiveDateTime};
use log::warn;
use regex::Regex;

use crate::data::{Value, ValueRef};

/// Currency symbols and their codes. Multi-character symbols come first so
/// that `A$` and `C$` are not read as a bare `$`.
pub const CURRENCY_SYMBOLS: &[(&str, &str)] = &[
    ("A$", "AUD"),
    ("C$", "CAD"),
    ("CHF", "CHF"),
    ("kr", "SEK"),
    ("$", "USD"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("₹", "INR"),
];

pub const MAGNITUDE_SUFFIXES: &[(char, f64)] =
    &[('K', 1e3), ('M', 1e6), ('B', 1e9), ('T', 1e12)];

/// Numbers in this range are read as spreadsheet serial day counts.
pub const EXCEL_SERIAL_PARSE_RANGE: RangeInclusive<f64> = 36000.0..=50000.0;

pub const DEFAULT_TARGET_CURRENCY: &str = "USD";

pub const HINT_INDIAN: &str = "indian";
pub const HINT_TRAILING_NEGATIVE: &str = "trailing_negative";
pub const HINT_EXCEL_SERIAL: &str = "excel_serial";
pub const HINT_DAY_FIRST: &str = "dd/mm/yyyy";

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%d/%m/%y",
    "%d/%m/%Y",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d-%B-%y",
    "%d-%B-%Y",
    "%d %B %y",
    "%d %B %Y",
    "%B %d, %Y",
    "%B %d %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
];

static QUARTER_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Q([1-4])\s+(\d{4})").expect("valid quarter pattern"));
static QUARTER_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^quarter\s+([1-4])\s*,?\s+(\d{4})$").expect("valid quarter pattern")
});
static QUARTER_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})\s*-?\s*Q([1-4])$").expect("valid quarter pattern"));
static MONTH_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]{3,9})[-\s/]+(\d{2}|\d{4})$").expect("valid month-year pattern")
});

/// Parses a monetary amount into a signed float.
///
/// Numbers pass through unchanged. Text is cleaned in order: a currency
/// symbol is stripped, a parenthesis or leading-minus negative is noted, a
/// trailing `K`/`M`/`B`/`T` magnitude is expanded, and the decimal mark is
/// resolved (the rightmost of `,` and `.` wins; a lone `,` is decimal only
/// when exactly two digits follow it). The hint `"indian"` drops every comma
/// instead, and `"trailing_negative"` also accepts `1,234.56-`.
pub fn parse_amount<'a>(value: impl Into<ValueRef<'a>>, format_hint: Option<&str>) -> Option<f64> {
    match value.into() {
        ValueRef::Integer(i) => Some(i as f64),
        ValueRef::Float(f) => f.is_finite().then_some(f),
        ValueRef::Text(text) => parse_amount_text(text, format_hint),
        ValueRef::Missing | ValueRef::Date(_) | ValueRef::DateTime(_) => None,
    }
}

fn parse_amount_text(raw: &str, format_hint: Option<&str>) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (stripped, _) = strip_currency_symbol(trimmed);
    let mut body = stripped.trim();

    let mut negative = false;
    if body.len() >= 2 && body.starts_with('(') && body.ends_with(')') {
        negative = true;
        body = body[1..body.len() - 1].trim();
    } else if let Some(rest) = body.strip_prefix('-') {
        negative = true;
        body = rest.trim_start();
    } else if format_hint == Some(HINT_TRAILING_NEGATIVE)
        && let Some(rest) = body.strip_suffix('-')
    {
        negative = true;
        body = rest.trim_end();
    }

    let mut multiplier = 1.0;
    if let Some(last) = body.chars().last() {
        let upper = last.to_ascii_uppercase();
        if let Some((_, factor)) = MAGNITUDE_SUFFIXES.iter().find(|(s, _)| *s == upper) {
            multiplier = *factor;
            body = body[..body.len() - last.len_utf8()].trim_end();
        }
    }

    let numeric = if format_hint == Some(HINT_INDIAN) {
        body.chars()
            .filter(|c| *c != ',' && !c.is_whitespace())
            .collect::<String>()
    } else {
        resolve_separators(body)
    };
    let parsed = numeric.parse::<f64>().ok()?;
    if !parsed.is_finite() {
        return None;
    }
    let amount = parsed * multiplier;
    Some(if negative { -amount } else { amount })
}

fn resolve_separators(body: &str) -> String {
    match (body.rfind(','), body.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => body.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => body.replace(',', ""),
        (Some(_), None) => match body.rsplit_once(',') {
            Some((head, tail)) if tail.len() == 2 && tail.bytes().all(|b| b.is_ascii_digit()) => {
                format!("{}.{tail}", head.replace(',', ""))
            }
            _ => body.replace(',', ""),
        },
        _ => body.to_string(),
    }
}

/// Removes every occurrence of the first matching currency symbol and
/// returns the remaining text with the symbol's code.
pub fn strip_currency_symbol(text: &str) -> (String, Option<&'static str>) {
    for (symbol, code) in CURRENCY_SYMBOLS {
        if text.contains(symbol) {
            return (text.replace(symbol, ""), Some(*code));
        }
    }
    (text.to_string(), None)
}

/// Parses a calendar date.
///
/// Dates pass through and datetimes lose their time. Numbers inside
/// [`EXCEL_SERIAL_PARSE_RANGE`] are spreadsheet serials (epoch 1899-12-30,
/// fraction dropped). Text is tried as a quarter (`Q4 2023`), a month and
/// year (`Dec-23`), and then against a list of common layouts, month-first
/// before day-first. With the hint `"excel_serial"`, numeric text is read as
/// a serial regardless of range.
pub fn parse_date<'a>(value: impl Into<ValueRef<'a>>, format_hint: Option<&str>) -> Option<NaiveDate> {
    match value.into() {
        ValueRef::Missing => None,
        ValueRef::Date(date) => Some(date),
        ValueRef::DateTime(datetime) => Some(datetime.date()),
        ValueRef::Integer(i) => parse_numeric_date(i as f64, &i.to_string()),
        ValueRef::Float(f) => parse_numeric_date(f, &f.to_string()),
        ValueRef::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            if format_hint == Some(HINT_EXCEL_SERIAL)
                && let Ok(serial) = trimmed.parse::<f64>()
            {
                return excel_serial_to_date(serial);
            }
            if format_hint == Some(HINT_DAY_FIRST)
                && let Ok(date) = NaiveDate::parse_from_str(trimmed, "%d/%m/%Y")
            {
                return Some(date);
            }
            parse_date_text(trimmed)
        }
    }
}

fn parse_numeric_date(number: f64, rendered: &str) -> Option<NaiveDate> {
    if EXCEL_SERIAL_PARSE_RANGE.contains(&number) {
        excel_serial_to_date(number)
    } else {
        parse_date_text(rendered)
    }
}

/// Converts a spreadsheet serial day count to a date. Day 0 is 1899-12-30,
/// which reproduces the 1900 leap-year quirk for all modern serials.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_days(Days::new(serial.floor() as u64))
}

/// Text date parsing without hints: quarters, month-year forms, then the
/// general layout list.
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(caps) = QUARTER_PREFIX
        .captures(text)
        .or_else(|| QUARTER_WORD.captures(text))
    {
        return quarter_start(&caps[2], &caps[1]);
    }
    if let Some(caps) = QUARTER_SUFFIX.captures(text) {
        return quarter_start(&caps[1], &caps[2]);
    }
    parse_general_date(text).or_else(|| parse_month_year(text))
}

fn quarter_start(year: &str, quarter: &str) -> Option<NaiveDate> {
    let year = year.parse::<i32>().ok()?;
    let quarter = quarter.parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(year, (quarter - 1) * 3 + 1, 1)
}

fn parse_general_date(text: &str) -> Option<NaiveDate> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.date_naive());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|datetime| datetime.date())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        })
}

fn parse_month_year(text: &str) -> Option<NaiveDate> {
    let caps = MONTH_YEAR.captures(text)?;
    let month = Month::from_str(&caps[1]).ok()?;
    let year_text = &caps[2];
    let mut year = year_text.parse::<i32>().ok()?;
    if year_text.len() == 2 {
        year += if year < 70 { 2000 } else { 1900 };
    }
    NaiveDate::from_ymd_opt(year, month.number_from_month(), 1)
}

/// Result of [`normalize_currency`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCurrency {
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub original_value: Option<Value>,
}

/// Parses a currency amount and, when a rate table is supplied, converts it
/// into `target_currency`.
///
/// Rates are keyed by source currency code and express units of that
/// currency per target unit, so conversion divides by the rate. A missing,
/// zero, or non-finite rate leaves the amount in its source currency.
pub fn normalize_currency<'a>(
    value: impl Into<ValueRef<'a>>,
    target_currency: &str,
    exchange_rates: Option<&HashMap<String, f64>>,
) -> NormalizedCurrency {
    let value = value.into();
    let text = match value {
        ValueRef::Missing => {
            return NormalizedCurrency {
                value: None,
                currency: None,
                original_value: None,
            };
        }
        ValueRef::Integer(_) | ValueRef::Float(_) => {
            return NormalizedCurrency {
                value: parse_amount(value, None),
                currency: Some(target_currency.to_string()),
                original_value: value.to_owned_value(),
            };
        }
        ValueRef::Text(text) => text.trim(),
        ValueRef::Date(_) | ValueRef::DateTime(_) => {
            return NormalizedCurrency {
                value: None,
                currency: Some(target_currency.to_string()),
                original_value: value.to_owned_value(),
            };
        }
    };
    if text.is_empty() {
        return NormalizedCurrency {
            value: None,
            currency: None,
            original_value: value.to_owned_value(),
        };
    }

    let (remaining, code) = strip_currency_symbol(text);
    let currency = code.unwrap_or(target_currency).to_string();
    let mut amount = parse_amount(remaining.as_str(), None);

    if let (Some(rates), Some(parsed)) = (exchange_rates, amount)
        && !rates.is_empty()
        && currency != target_currency
        && let Some(rate) = rates.get(&currency)
    {
        if rate.is_finite() && *rate > 0.0 {
            amount = Some(parsed / rate);
        } else {
            warn!("Ignoring unusable exchange rate {rate} for {currency}");
        }
    }

    NormalizedCurrency {
        value: amount,
        currency: Some(currency),
        original_value: Some(Value::Text(text.to_string())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialFormat {
    AccountCode,
    ReferenceNumber,
    Percentage,
}

impl FromStr for SpecialFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "account_code" => Ok(SpecialFormat::AccountCode),
            "reference_number" => Ok(SpecialFormat::ReferenceNumber),
            "percentage" => Ok(SpecialFormat::Percentage),
            other => Err(format!("Unknown special format '{other}'")),
        }
    }
}

/// Normalizes identifier-like values.
///
/// `account_code` strips spaces and dashes and uppercases, `reference_number`
/// strips spaces, and `percentage` strips `%` and divides by 100. Any other
/// format returns the (trimmed) input.
pub fn handle_special_formats<'a>(
    value: impl Into<ValueRef<'a>>,
    format_type: Option<&str>,
) -> Option<Value> {
    let value = value.into();
    if value.is_missing() {
        return None;
    }
    let text = value.to_text();
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match format_type.and_then(|f| f.parse::<SpecialFormat>().ok()) {
        Some(SpecialFormat::AccountCode) => {
            let code = text
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '-')
                .collect::<String>()
                .to_uppercase();
            (!code.is_empty()).then_some(Value::Text(code))
        }
        Some(SpecialFormat::ReferenceNumber) => Some(Value::Text(text.replace(' ', ""))),
        Some(SpecialFormat::Percentage) => text
            .replace('%', "")
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|pct| pct.is_finite())
            .map(|pct| Value::Float(pct / 100.0)),
        None => match value {
            ValueRef::Text(_) => Some(Value::Text(text.to_string())),
            other => other.to_owned_value(),
        },
    }
}

pub fn batch_parse_amounts<'a, I, V>(values: I, format_hint: Option<&str>) -> Vec<Option<f64>>
where
    I: IntoIterator<Item = V>,
    V: Into<ValueRef<'a>>,
{
    values
        .into_iter()
        .map(|value| parse_amount(value, format_hint))
        .collect()
}

pub fn batch_parse_dates<'a, I, V>(values: I, format_hint: Option<&str>) -> Vec<Option<NaiveDate>>
where
    I: IntoIterator<Item = V>,
    V: Into<ValueRef<'a>>,
{
    values
        .into_iter()
        .map(|value| parse_date(value, format_hint))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separators_resolve_by_rightmost_mark() {
        assert_eq!(resolve_separators("1,234.56"), "1234.56");
        assert_eq!(resolve_separators("1.234,56"), "1234.56");
        assert_eq!(resolve_separators("12,34"), "12.34");
        assert_eq!(resolve_separators("1,234"), "1234");
        assert_eq!(resolve_separators("1,234,567"), "1234567");
        assert_eq!(resolve_separators("1.234"), "1.234");
    }

    #[test]
    fn currency_symbols_prefer_longest_match() {
        assert_eq!(strip_currency_symbol("A$100"), ("100".to_string(), Some("AUD")));
        assert_eq!(strip_currency_symbol("$100"), ("100".to_string(), Some("USD")));
        assert_eq!(strip_currency_symbol("100"), ("100".to_string(), None));
    }

    #[test]
    fn month_year_forms_map_to_first_of_month() {
        let expected = NaiveDate::from_ymd_opt(2023, 12, 1);
        assert_eq!(parse_month_year("Dec-23"), expected);
        assert_eq!(parse_month_year("December 2023"), expected);
        assert_eq!(parse_month_year("Approved 2023"), None);
    }
}
