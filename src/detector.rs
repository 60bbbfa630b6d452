//! Column type detection for financial tables.
//!
//! Each column is sampled and tested against date rules, then number rules,
//! then classified as a string. The first candidate whose confidence exceeds
//! [`ACCEPT_THRESHOLD`] wins; string classification always produces a result.

use std::{collections::HashSet, ops::RangeInclusive, sync::LazyLock};

use log::debug;
use regex::Regex;

use crate::{
    data::ValueRef,
    parser,
    schema::{ColumnType, ColumnTypeResult, ColumnTypes, DateFormat, NumberFormat, StringFormat},
    table::Table,
};

pub const DEFAULT_SAMPLE_SIZE: usize = 100;
pub const ACCEPT_THRESHOLD: f64 = 0.7;

const PATTERN_THRESHOLD: f64 = 0.5;
const COERCION_THRESHOLD: f64 = 0.5;
const EXCEL_SERIAL_DETECT_RANGE: RangeInclusive<f64> = 36500.0..=50000.0;
const EXCEL_SERIAL_SHARE: f64 = 0.8;
const MARKER_SHARE: f64 = 0.2;
const MAJORITY_SHARE: f64 = 0.5;
const STRING_PATTERN_SHARE: f64 = 0.7;
const CATEGORICAL_RATIO: f64 = 0.1;
const DESCRIPTION_MIN_LENGTH: f64 = 100.0;
const NAME_OR_ADDRESS_MIN_LENGTH: f64 = 30.0;

/// Symbols considered when voting on a currency column's code.
const VOTING_SYMBOLS: &[(&str, &str)] = &[
    ("$", "USD"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("₹", "INR"),
];

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid detection pattern")
}

static DATE_PATTERNS: LazyLock<Vec<(DateFormat, Regex)>> = LazyLock::new(|| {
    vec![
        (
            DateFormat::MonthDayYear,
            compile(r"^(0?[1-9]|1[0-2])/(0?[1-9]|[12]\d|3[01])/\d{4}$"),
        ),
        (
            DateFormat::DayMonthYear,
            compile(r"^(0?[1-9]|[12]\d|3[01])/(0?[1-9]|1[0-2])/\d{4}$"),
        ),
        (DateFormat::IsoDate, compile(r"^\d{4}-\d{1,2}-\d{1,2}$")),
        (DateFormat::DayMonthNameYear, compile(r"^\d{1,2}-[A-Za-z]{3}-\d{4}$")),
        (DateFormat::MonthNameYear, compile(r"^[A-Za-z]{3}-\d{2}$")),
        (DateFormat::Quarter, compile(r"^Q[1-4]\s+\d{4}$")),
    ]
});

static NUMBER_PATTERNS: LazyLock<Vec<(NumberFormat, Regex)>> = LazyLock::new(|| {
    vec![
        (NumberFormat::Standard, compile(r"^-?\d{1,3}(,\d{3})*(\.\d+)?$")),
        (NumberFormat::Accounting, compile(r"^\(\d{1,3}(,\d{3})*(\.\d+)?\)$")),
        (NumberFormat::European, compile(r"^-?\d{1,3}(\.\d{3})*(,\d+)?$")),
        (NumberFormat::Indian, compile(r"^-?\d{1,2}(,\d{2})*,\d{3}(\.\d+)?$")),
        (NumberFormat::TrailingNegative, compile(r"^\d+(\.\d+)?-$")),
        (NumberFormat::Currency(None), compile(r"^[$€£¥₹]\s*-?\d+([.,]\d+)*$")),
        (NumberFormat::Abbreviated, compile(r"^-?\d+(\.\d+)?[KMB]$")),
    ]
});

static STRING_PATTERNS: LazyLock<Vec<(StringFormat, Regex)>> = LazyLock::new(|| {
    vec![
        (StringFormat::AccountNumber, compile(r"^\d{4,20}$")),
        (StringFormat::ReferenceCode, compile(r"^[A-Za-z0-9]{5,30}$")),
        (StringFormat::TransactionId, compile(r"^[A-Za-z]{2,10}\d{4,20}$")),
    ]
});

static CURRENCY_PREFIX: LazyLock<Regex> = LazyLock::new(|| compile(r"^[$€£¥₹]"));
static CURRENCY_CHARS: LazyLock<Regex> = LazyLock::new(|| compile(r"[$€£¥₹]"));
static PARENTHESIZED: LazyLock<Regex> = LazyLock::new(|| compile(r"^\((.+)\)$"));
static TRAILING_MINUS: LazyLock<Regex> = LazyLock::new(|| compile(r"^(\d+(?:\.\d*)?)-$"));
static TRAILING_MINUS_MARKER: LazyLock<Regex> = LazyLock::new(|| compile(r"\d+\.?\d*-$"));
static ABBREVIATED: LazyLock<Regex> = LazyLock::new(|| compile(r"^([+-]?\d+\.?\d*)([KMB])$"));
static ABBREVIATION_MARKER: LazyLock<Regex> = LazyLock::new(|| compile(r"[KMB]$"));
static EUROPEAN: LazyLock<Regex> = LazyLock::new(|| compile(r"^-?\d{1,3}(\.\d{3})*(,\d+)$"));
static INDIAN: LazyLock<Regex> = LazyLock::new(|| compile(r"^\d{1,2}(,\d{2})+,\d{3}(\.\d+)?$"));

/// A deterministic, evenly spaced sample of a column's non-missing values
/// together with their text renderings.
#[derive(Debug, Clone)]
pub struct Sample<'a> {
    values: Vec<ValueRef<'a>>,
    texts: Vec<String>,
}

impl<'a> Sample<'a> {
    /// Drops missing values and keeps at most `cap` of the rest (`0` keeps all).
    pub fn collect<I, V>(values: I, cap: usize) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ValueRef<'a>>,
    {
        let present = values
            .into_iter()
            .map(Into::into)
            .filter(|value: &ValueRef<'a>| !value.is_missing())
            .collect::<Vec<_>>();
        let values = if cap == 0 || present.len() <= cap {
            present
        } else {
            (0..cap).map(|i| present[i * present.len() / cap]).collect()
        };
        let texts = values.iter().map(ValueRef::to_text).collect();
        Self { values, texts }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    fn all_numeric(&self) -> bool {
        !self.is_empty() && self.values.iter().all(ValueRef::is_numeric)
    }

    fn all_temporal(&self) -> bool {
        !self.is_empty() && self.values.iter().all(ValueRef::is_temporal)
    }

    fn share<F>(&self, predicate: F) -> f64
    where
        F: Fn(&str) -> bool,
    {
        if self.is_empty() {
            return 0.0;
        }
        let hits = self.texts.iter().filter(|text| predicate(text)).count();
        hits as f64 / self.len() as f64
    }

    fn numeric_share<F>(&self, predicate: F) -> f64
    where
        F: Fn(f64) -> bool,
    {
        if self.is_empty() {
            return 0.0;
        }
        let hits = self
            .values
            .iter()
            .filter(|value| match value {
                ValueRef::Integer(i) => predicate(*i as f64),
                ValueRef::Float(f) => predicate(*f),
                _ => false,
            })
            .count();
        hits as f64 / self.len() as f64
    }
}

#[derive(Debug, Clone)]
pub struct TypeDetector {
    sample_size: usize,
}

impl Default for TypeDetector {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

impl TypeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample_size(sample_size: usize) -> Self {
        Self { sample_size }
    }

    pub fn analyze_column<'a, I, V>(&self, values: I) -> ColumnTypeResult
    where
        I: IntoIterator<Item = V>,
        V: Into<ValueRef<'a>>,
    {
        let sample = Sample::collect(values, self.sample_size);
        if sample.is_empty() {
            return ColumnTypeResult::unknown();
        }
        if let Some(result) = self.detect_date_format(&sample)
            && result.confidence > ACCEPT_THRESHOLD
        {
            return result;
        }
        if let Some(result) = self.detect_number_format(&sample)
            && result.confidence > ACCEPT_THRESHOLD
        {
            return result;
        }
        self.classify_string_type(&sample)
    }

    /// Classifies every column of `table` independently.
    pub fn analyze_table(&self, table: &Table) -> ColumnTypes {
        table
            .headers()
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let result = self.analyze_column(table.column_values(idx));
                debug!(
                    "Column '{}' classified as {} ({}) with confidence {:.2}",
                    name,
                    result.kind(),
                    result.format_hint().unwrap_or("-"),
                    result.confidence
                );
                (name.clone(), result)
            })
            .collect()
    }

    /// Returns a date classification, or `None` when no date rule applies.
    pub fn detect_date_format(&self, sample: &Sample<'_>) -> Option<ColumnTypeResult> {
        if sample.is_empty() {
            return None;
        }
        if sample.all_temporal() {
            return Some(date_result(DateFormat::DateTime, 1.0));
        }
        if sample.all_numeric() {
            let share = sample.numeric_share(|n| EXCEL_SERIAL_DETECT_RANGE.contains(&n));
            return (share > EXCEL_SERIAL_SHARE)
                .then(|| date_result(DateFormat::ExcelSerial, 0.8));
        }
        if sample
            .texts()
            .iter()
            .all(|text| parser::parse_date_text(text).is_some())
        {
            return Some(date_result(DateFormat::AutoDetected, 0.9));
        }
        best_pattern(&DATE_PATTERNS, sample)
            .map(|(format, confidence)| date_result(format, confidence))
    }

    /// Returns a number classification, or `None` when no number rule applies.
    pub fn detect_number_format(&self, sample: &Sample<'_>) -> Option<ColumnTypeResult> {
        if sample.is_empty() || sample.all_temporal() {
            return None;
        }
        if sample.all_numeric() {
            return Some(number_result(NumberFormat::Numeric, 1.0));
        }
        let coerced = sample.share(|text| coerce_number(text).is_some());
        if coerced > COERCION_THRESHOLD {
            return Some(number_result(label_number_format(sample), coerced));
        }
        best_pattern(&NUMBER_PATTERNS, sample)
            .map(|(format, confidence)| number_result(format, confidence))
    }

    /// Always succeeds; the weakest outcome has confidence 0.8.
    pub fn classify_string_type(&self, sample: &Sample<'_>) -> ColumnTypeResult {
        if sample.is_empty() {
            return ColumnTypeResult::unknown();
        }
        for (format, regex) in STRING_PATTERNS.iter() {
            let share = sample.share(|text| regex.is_match(text));
            if share > STRING_PATTERN_SHARE {
                return string_result(*format, share);
            }
        }
        let distinct = sample
            .texts()
            .iter()
            .map(String::as_str)
            .collect::<HashSet<_>>()
            .len();
        if (distinct as f64 / sample.len() as f64) < CATEGORICAL_RATIO {
            return string_result(StringFormat::Categorical, 0.9);
        }
        let total_chars = sample
            .texts()
            .iter()
            .map(|text| text.chars().count())
            .sum::<usize>();
        let mean_length = total_chars as f64 / sample.len() as f64;
        let format = if mean_length > DESCRIPTION_MIN_LENGTH {
            StringFormat::Description
        } else if mean_length > NAME_OR_ADDRESS_MIN_LENGTH {
            StringFormat::NameOrAddress
        } else {
            StringFormat::Identifier
        };
        string_result(format, 0.8)
    }
}

fn date_result(format: DateFormat, confidence: f64) -> ColumnTypeResult {
    ColumnTypeResult::new(ColumnType::Date(format), confidence)
}

fn number_result(format: NumberFormat, confidence: f64) -> ColumnTypeResult {
    ColumnTypeResult::new(ColumnType::Number(format), confidence)
}

fn string_result(format: StringFormat, confidence: f64) -> ColumnTypeResult {
    ColumnTypeResult::new(ColumnType::String(format), confidence)
}

/// Picks the pattern with the most matches; ties go to the earlier pattern.
/// Reported only when its match share exceeds [`PATTERN_THRESHOLD`].
fn best_pattern<F: Clone>(patterns: &[(F, Regex)], sample: &Sample<'_>) -> Option<(F, f64)> {
    let mut best: Option<(&F, usize)> = None;
    for (format, regex) in patterns {
        let hits = sample
            .texts()
            .iter()
            .filter(|text| regex.is_match(text))
            .count();
        if hits > best.map_or(0, |(_, count)| count) {
            best = Some((format, hits));
        }
    }
    let (format, hits) = best?;
    let confidence = hits as f64 / sample.len() as f64;
    (confidence > PATTERN_THRESHOLD).then(|| (format.clone(), confidence))
}

/// Lenient numeric coercion used only for detection.
fn coerce_number(text: &str) -> Option<f64> {
    let stripped = CURRENCY_CHARS.replace_all(text.trim(), "");
    let mut cleaned = stripped.trim().to_string();
    cleaned = if EUROPEAN.is_match(&cleaned) {
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned.replace(',', "")
    };
    if let Some(caps) = PARENTHESIZED.captures(&cleaned) {
        cleaned = format!("-{}", &caps[1]);
    }
    if let Some(caps) = TRAILING_MINUS.captures(&cleaned) {
        cleaned = format!("-{}", &caps[1]);
    }
    let mut multiplier = 1.0;
    if let Some(caps) = ABBREVIATED.captures(&cleaned) {
        multiplier = match &caps[2] {
            "K" => 1e3,
            "M" => 1e6,
            _ => 1e9,
        };
        cleaned = caps[1].to_string();
    }
    let parsed = cleaned.trim().parse::<f64>().ok()? * multiplier;
    parsed.is_finite().then_some(parsed)
}

/// Labels a column that already coerces to numbers, checking markers in a
/// fixed priority order.
fn label_number_format(sample: &Sample<'_>) -> NumberFormat {
    if sample.texts().iter().any(|text| CURRENCY_PREFIX.is_match(text.trim())) {
        let code = VOTING_SYMBOLS.iter().find_map(|(symbol, code)| {
            let share = sample.share(|text| text.trim().starts_with(symbol));
            (share > MAJORITY_SHARE).then(|| code.to_string())
        });
        return NumberFormat::Currency(code);
    }
    if sample.share(|text| PARENTHESIZED.is_match(text.trim())) > MARKER_SHARE {
        return NumberFormat::Accounting;
    }
    if sample.share(|text| TRAILING_MINUS_MARKER.is_match(text.trim())) > MARKER_SHARE {
        return NumberFormat::TrailingNegative;
    }
    if sample.share(|text| ABBREVIATION_MARKER.is_match(text.trim())) > MARKER_SHARE {
        return NumberFormat::Abbreviated;
    }
    if sample.share(|text| EUROPEAN.is_match(text.trim())) > MAJORITY_SHARE {
        return NumberFormat::European;
    }
    if sample.share(|text| INDIAN.is_match(text.trim())) > MAJORITY_SHARE {
        return NumberFormat::Indian;
    }
    NumberFormat::Standard
}
