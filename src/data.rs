//! Cell values for financial tables.
//!
//! A cell is `Option<Value>`: `None` is the missing marker, `Some` carries one of
//! text, integer, float, date, or datetime. Ordering and equality follow SQL
//! storage-class rules so that in-memory evaluation agrees with the SQLite
//! backend: numbers compare numerically and sort before text-like values, and
//! text-like values (text, dates, datetimes) compare by their rendered text.

use std::{cmp::Ordering, fmt};

use chrono::{NaiveDate, NaiveDateTime};

pub const DATE_DISPLAY_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Field contents treated as missing when inferring values from text.
const PLACEHOLDER_TOKENS: &[&str] = &["na", "n/a", "null", "nan", "none", "#n/a"];

#[derive(Debug, Clone)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    /// Infers a value from a raw CSV field: empty fields and placeholders become
    /// `None`, integers without leading zeros become `Integer`, plain decimals
    /// become `Float`, and everything else is kept verbatim as `Text`.
    pub fn from_field(raw: &str) -> Option<Value> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || is_placeholder_token(trimmed) {
            return None;
        }
        if looks_like_integer(trimmed)
            && let Ok(parsed) = trimmed.parse::<i64>()
        {
            return Some(Value::Integer(parsed));
        }
        if looks_like_decimal(trimmed)
            && let Ok(parsed) = trimmed.parse::<f64>()
            && parsed.is_finite()
        {
            return Some(Value::Float(parsed));
        }
        Some(Value::Text(raw.to_string()))
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Date(d) => d.format(DATE_DISPLAY_FORMAT).to_string(),
            Value::DateTime(dt) => dt.format(DATETIME_DISPLAY_FORMAT).to_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, Value::Date(_) | Value::DateTime(_))
    }

    fn storage_rank(&self) -> u8 {
        if self.is_numeric() { 0 } else { 1 }
    }
}

/// Renders floats so that integral values keep a trailing `.0`, which lets a
/// float survive a CSV round trip without being re-read as an integer.
pub fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

pub fn is_placeholder_token(value: &str) -> bool {
    PLACEHOLDER_TOKENS
        .iter()
        .any(|token| value.eq_ignore_ascii_case(token))
}

fn looks_like_integer(value: &str) -> bool {
    let digits = value.strip_prefix(['-', '+']).unwrap_or(value);
    !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && (digits == "0" || !digits.starts_with('0'))
}

fn looks_like_decimal(value: &str) -> bool {
    let body = value.strip_prefix(['-', '+']).unwrap_or(value);
    let Some((whole, fraction)) = body.split_once('.') else {
        return false;
    };
    let fraction = fraction.split_once(['e', 'E']).map_or(fraction, |(f, _)| f);
    !(whole.is_empty() && fraction.is_empty())
        && whole.bytes().all(|b| b.is_ascii_digit())
        && fraction.bytes().all(|b| b.is_ascii_digit())
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (left, right) if left.is_numeric() && right.is_numeric() => {
                let a = left.as_f64().unwrap_or_default();
                let b = right.as_f64().unwrap_or_default();
                a.total_cmp(&b)
            }
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (left, right) => match left.storage_rank().cmp(&right.storage_rank()) {
                Ordering::Equal => left.as_display().cmp(&right.as_display()),
                unequal => unequal,
            },
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

/// Borrowed view of a cell, the input type of the parsing and detection
/// functions. `Missing` stands for an absent cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRef<'a> {
    Missing,
    Text(&'a str),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl ValueRef<'_> {
    pub fn is_missing(&self) -> bool {
        matches!(self, ValueRef::Missing)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueRef::Integer(_) | ValueRef::Float(_))
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, ValueRef::Date(_) | ValueRef::DateTime(_))
    }

    /// Text rendering used for pattern matching; missing cells render empty.
    pub fn to_text(&self) -> String {
        match self {
            ValueRef::Missing => String::new(),
            ValueRef::Text(s) => (*s).to_string(),
            ValueRef::Integer(i) => i.to_string(),
            ValueRef::Float(f) => format_float(*f),
            ValueRef::Date(d) => d.format(DATE_DISPLAY_FORMAT).to_string(),
            ValueRef::DateTime(dt) => dt.format(DATETIME_DISPLAY_FORMAT).to_string(),
        }
    }

    pub fn to_owned_value(&self) -> Option<Value> {
        match self {
            ValueRef::Missing => None,
            ValueRef::Text(s) => Some(Value::Text((*s).to_string())),
            ValueRef::Integer(i) => Some(Value::Integer(*i)),
            ValueRef::Float(f) => Some(Value::Float(*f)),
            ValueRef::Date(d) => Some(Value::Date(*d)),
            ValueRef::DateTime(dt) => Some(Value::DateTime(*dt)),
        }
    }
}

impl<'a> From<&'a Value> for ValueRef<'a> {
    fn from(value: &'a Value) -> Self {
        match value {
            Value::Text(s) => ValueRef::Text(s),
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Float(f) => ValueRef::Float(*f),
            Value::Date(d) => ValueRef::Date(*d),
            Value::DateTime(dt) => ValueRef::DateTime(*dt),
        }
    }
}

impl<'a> From<Option<&'a Value>> for ValueRef<'a> {
    fn from(value: Option<&'a Value>) -> Self {
        value.map_or(ValueRef::Missing, ValueRef::from)
    }
}

impl<'a> From<&'a Option<Value>> for ValueRef<'a> {
    fn from(value: &'a Option<Value>) -> Self {
        ValueRef::from(value.as_ref())
    }
}

impl<'a> From<&'a str> for ValueRef<'a> {
    fn from(value: &'a str) -> Self {
        ValueRef::Text(value)
    }
}

impl<'a> From<&'a String> for ValueRef<'a> {
    fn from(value: &'a String) -> Self {
        ValueRef::Text(value)
    }
}

impl<'a> From<Option<&'a str>> for ValueRef<'a> {
    fn from(value: Option<&'a str>) -> Self {
        value.map_or(ValueRef::Missing, ValueRef::Text)
    }
}

impl From<i64> for ValueRef<'_> {
    fn from(value: i64) -> Self {
        ValueRef::Integer(value)
    }
}

impl From<i32> for ValueRef<'_> {
    fn from(value: i32) -> Self {
        ValueRef::Integer(i64::from(value))
    }
}

impl From<f64> for ValueRef<'_> {
    fn from(value: f64) -> Self {
        ValueRef::Float(value)
    }
}

impl From<NaiveDate> for ValueRef<'_> {
    fn from(value: NaiveDate) -> Self {
        ValueRef::Date(value)
    }
}

impl From<NaiveDateTime> for ValueRef<'_> {
    fn from(value: NaiveDateTime) -> Self {
        ValueRef::DateTime(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_field_infers_integers_floats_and_text() {
        assert_eq!(Value::from_field("42"), Some(Value::Integer(42)));
        assert_eq!(Value::from_field("-7"), Some(Value::Integer(-7)));
        assert_eq!(Value::from_field("12.50"), Some(Value::Float(12.5)));
        assert!(matches!(Value::from_field("007"), Some(Value::Text(ref s)) if s == "007"));
        assert!(
            matches!(Value::from_field("$1,200"), Some(Value::Text(ref s)) if s == "$1,200")
        );
        assert_eq!(Value::from_field(""), None);
        assert_eq!(Value::from_field("N/A"), None);
        assert!(matches!(Value::from_field("inf"), Some(Value::Text(_))));
    }

    #[test]
    fn floats_render_with_fraction() {
        assert_eq!(Value::Float(300.0).as_display(), "300.0");
        assert_eq!(Value::Float(-120.25).as_display(), "-120.25");
        assert_eq!(Value::from_field(&Value::Float(300.0).as_display()), Some(Value::Float(300.0)));
    }

    #[test]
    fn numbers_sort_before_text_like_values() {
        let date = Value::Date(NaiveDate::from_ymd_opt(2023, 1, 15).expect("valid date"));
        assert!(Value::Integer(999_999) < Value::Text("0".into()));
        assert!(Value::Float(1.5) < date);
        assert_eq!(Value::Integer(3), Value::Float(3.0));
        assert_eq!(date, Value::Text("2023-01-15".into()));
        assert!(Value::Text("Expense".into()) < Value::Text("Income".into()));
    }

    #[test]
    fn value_ref_renders_text_for_matching() {
        let value = Value::Float(1000.0);
        assert_eq!(ValueRef::from(&value).to_text(), "1000.0");
        assert!(ValueRef::from(None::<&Value>).is_missing());
        assert_eq!(ValueRef::from("abc").to_owned_value(), Some(Value::Text("abc".into())));
    }
}
