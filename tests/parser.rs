use std::collections::HashMap;

use chrono::NaiveDate;
use fintab::data::Value;
use fintab::parser::{
    batch_parse_amounts, batch_parse_dates, excel_serial_to_date, handle_special_formats,
    normalize_currency, parse_amount, parse_date,
};
use proptest::prelude::*;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn group_thousands(whole: u64, separator: char) -> String {
    let digits = whole.to_string();
    let mut grouped = String::new();
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(separator);
        }
        grouped.push(ch);
    }
    grouped
}

#[test]
fn amounts_in_common_notations() {
    assert_eq!(parse_amount("$1,234.56", None), Some(1234.56));
    assert_eq!(parse_amount("€1.234,56", None), Some(1234.56));
    assert_eq!(parse_amount("(2,500.00)", None), Some(-2500.0));
    assert_eq!(parse_amount("1.5M", None), Some(1_500_000.0));
    assert_eq!(parse_amount("2k", None), Some(2000.0));
    assert_eq!(parse_amount("-£75", None), Some(-75.0));
    assert_eq!(parse_amount("12,34", None), Some(12.34));
    assert_eq!(parse_amount("1,234", None), Some(1234.0));
}

#[test]
fn absent_and_unusable_amounts() {
    assert_eq!(parse_amount("", None), None);
    assert_eq!(parse_amount("   ", None), None);
    assert_eq!(parse_amount(None::<&str>, None), None);
    assert_eq!(parse_amount("pending", None), None);
}

#[test]
fn numeric_inputs_bypass_text_rules() {
    assert_eq!(parse_amount(42i64, None), Some(42.0));
    assert_eq!(parse_amount(&Value::Float(-3.25), None), Some(-3.25));
}

#[test]
fn format_hints_change_amount_rules() {
    assert_eq!(parse_amount("12,34,567.50", Some("indian")), Some(1_234_567.5));
    assert_eq!(parse_amount("1,234.56-", Some("trailing_negative")), Some(-1234.56));
    assert_eq!(parse_amount("1,234.56-", None), None);
}

#[test]
fn dates_from_quarters_serials_and_text() {
    assert_eq!(parse_date("Q4 2023", None), Some(date(2023, 10, 1)));
    assert_eq!(parse_date("Quarter 2 2024", None), Some(date(2024, 4, 1)));
    assert_eq!(parse_date("2023Q1", None), Some(date(2023, 1, 1)));
    assert_eq!(parse_date(44927i64, None), excel_serial_to_date(44927.0));
    assert_eq!(parse_date(44927i64, None), Some(date(2023, 1, 1)));
    assert_eq!(parse_date("44927", Some("excel_serial")), Some(date(2023, 1, 1)));
    assert_eq!(parse_date("2023-01-15", None), Some(date(2023, 1, 15)));
    assert_eq!(parse_date("01/15/2023", None), Some(date(2023, 1, 15)));
    assert_eq!(parse_date("15/01/2023", None), Some(date(2023, 1, 15)));
    assert_eq!(parse_date("Dec-23", None), Some(date(2023, 12, 1)));
    assert_eq!(parse_date("not a date", None), None);
    assert_eq!(parse_date("", None), None);
}

#[test]
fn day_first_hint_reads_ambiguous_dates_day_first() {
    assert_eq!(parse_date("05/06/2023", None), Some(date(2023, 5, 6)));
    assert_eq!(parse_date("05/06/2023", Some("dd/mm/yyyy")), Some(date(2023, 6, 5)));
    assert_eq!(parse_date("25/12/2023", Some("dd/mm/yyyy")), Some(date(2023, 12, 25)));
    assert_eq!(parse_date("2023-06-05", Some("dd/mm/yyyy")), Some(date(2023, 6, 5)));
}

#[test]
fn serial_epoch_keeps_the_leap_year_offset() {
    assert_eq!(excel_serial_to_date(1.0), Some(date(1899, 12, 31)));
    assert_eq!(excel_serial_to_date(61.0), Some(date(1900, 3, 1)));
    assert_eq!(excel_serial_to_date(-1.0), None);
}

#[test]
fn datetimes_drop_their_time() {
    let stamp = date(2023, 5, 2).and_hms_opt(13, 45, 0).expect("time");
    assert_eq!(parse_date(&Value::DateTime(stamp), None), Some(date(2023, 5, 2)));
    assert_eq!(parse_date("2023-05-02 13:45:00", None), Some(date(2023, 5, 2)));
}

#[test]
fn currency_conversion_divides_by_rate() {
    let rates = HashMap::from([("EUR".to_string(), 0.5), ("GBP".to_string(), 0.0)]);
    let euros = normalize_currency("€10.00", "USD", Some(&rates));
    assert_eq!(euros.value, Some(20.0));
    assert_eq!(euros.currency.as_deref(), Some("EUR"));
    assert_eq!(euros.original_value, Some(Value::from("€10.00")));

    let unusable = normalize_currency("£10.00", "USD", Some(&rates));
    assert_eq!(unusable.value, Some(10.0));

    let missing_rate = normalize_currency("¥500", "USD", Some(&rates));
    assert_eq!(missing_rate.value, Some(500.0));
    assert_eq!(missing_rate.currency.as_deref(), Some("JPY"));

    let plain = normalize_currency("10.00", "USD", Some(&rates));
    assert_eq!(plain.value, Some(10.0));
    assert_eq!(plain.currency.as_deref(), Some("USD"));

    let without_rates = normalize_currency("€10.00", "USD", None);
    assert_eq!(without_rates.value, Some(10.0));
}

#[test]
fn special_formats() {
    assert_eq!(
        handle_special_formats("ab-12 34", Some("account_code")),
        Some(Value::from("AB1234"))
    );
    assert_eq!(
        handle_special_formats("REF 001 22", Some("reference_number")),
        Some(Value::from("REF00122"))
    );
    assert_eq!(
        handle_special_formats("12.5%", Some("percentage")),
        Some(Value::Float(0.125))
    );
    assert_eq!(handle_special_formats("n/a%", Some("percentage")), None);
    assert_eq!(
        handle_special_formats("keep me", Some("unknown")),
        Some(Value::from("keep me"))
    );
    assert_eq!(handle_special_formats(7i64, None), Some(Value::Integer(7)));
    assert_eq!(handle_special_formats("", Some("account_code")), None);
}

#[test]
fn batches_stay_aligned_with_input() {
    let values = [Some(Value::from("$5")), None, Some(Value::from("oops"))];
    assert_eq!(
        batch_parse_amounts(values.iter(), None),
        vec![Some(5.0), None, None]
    );
    let dates = ["2023-01-01", "", "Q3 2022"];
    assert_eq!(
        batch_parse_dates(dates, None),
        vec![Some(date(2023, 1, 1)), None, Some(date(2022, 7, 1))]
    );
}

proptest! {
    #[test]
    fn us_amounts_parse_exactly(cents in 0u64..100_000_000_000u64) {
        let text = format!("${}.{:02}", group_thousands(cents / 100, ','), cents % 100);
        let expected = format!("{}.{:02}", cents / 100, cents % 100).parse::<f64>().unwrap();
        prop_assert_eq!(parse_amount(text.as_str(), None), Some(expected));
    }

    #[test]
    fn european_amounts_parse_exactly(cents in 100_000u64..100_000_000_000u64) {
        let text = format!("€{},{:02}", group_thousands(cents / 100, '.'), cents % 100);
        let expected = format!("{}.{:02}", cents / 100, cents % 100).parse::<f64>().unwrap();
        prop_assert_eq!(parse_amount(text.as_str(), None), Some(expected));
    }

    #[test]
    fn account_codes_are_idempotent(raw in "[A-Za-z0-9 -]{0,24}") {
        let once = handle_special_formats(raw.as_str(), Some("account_code"));
        let twice = once
            .as_ref()
            .and_then(|value| handle_special_formats(value, Some("account_code")));
        prop_assert_eq!(twice, once);
    }
}
