//! Date, identifier and number normalization shared by every ingestion path.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::FundbookError;

static LOCALIZED_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})\s*年\s*(\d{1,2})\s*月\s*(\d{1,2})\s*日").expect("static regex")
});

const SEPARATED_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"];

/// Canonical length of a numeric client (group) id.
pub const CLIENT_ID_WIDTH: usize = 9;

/// Parse any of the textual date encodings found in custodian exports.
///
/// Accepted: `20250701`, `2025年7月1日`, `2025-07-01`, `2025/7/1`,
/// `2025.07.01`, each optionally followed by a time of day.
pub fn parse_date(raw: &str) -> Result<NaiveDate, FundbookError> {
    let trimmed = raw.trim();
    let invalid = || FundbookError::InvalidDate(raw.to_string());

    if let Some(caps) = LOCALIZED_DATE.captures(trimmed) {
        let year = caps[1].parse::<i32>().map_err(|_| invalid())?;
        let month = caps[2].parse::<u32>().map_err(|_| invalid())?;
        let day = caps[3].parse::<u32>().map_err(|_| invalid())?;
        return NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid);
    }

    let date_part = trimmed
        .split(|c: char| c == ' ' || c == 'T')
        .next()
        .unwrap_or_default();

    if date_part.len() == 8 && date_part.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(date_part, "%Y%m%d").map_err(|_| invalid());
    }

    SEPARATED_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
        .ok_or_else(invalid)
}

/// Render a date in the compact 8-digit form.
pub fn format_compact(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// January 1 of the year containing `date`.
pub fn year_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date)
}

/// Canonicalize a client group id.
///
/// Purely numeric ids are zero-padded to nine digits; anything else is kept
/// as-is apart from surrounding whitespace. A trailing `.0` left behind by a
/// spreadsheet that stored the id as a float is dropped first.
pub fn normalize_client_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix(".0").unwrap_or(trimmed);

    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        format!("{:0>width$}", trimmed, width = CLIENT_ID_WIDTH)
    } else {
        trimmed.to_string()
    }
}

/// Fund codes are compared case-insensitively and stored upper-case.
pub fn normalize_fund_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Parse a human-formatted amount.
///
/// Thousands separators and currency symbols are stripped, `(1,234.50)` is
/// read as negative, and blank/`-`/`N/A` mean "no value".
pub fn parse_decimal_text(raw: &str) -> Result<Option<Decimal>, FundbookError> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '¥' | '￥' | '$' | ' ' | '\u{a0}'))
        .collect();

    if cleaned.is_empty() || cleaned == "-" || cleaned.eq_ignore_ascii_case("n/a") {
        return Ok(None);
    }

    let (negative, body) = match cleaned
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (false, cleaned.as_str()),
    };

    let value = Decimal::from_str(body)
        .or_else(|_| Decimal::from_scientific(body))
        .map_err(|_| FundbookError::InvalidNumber(raw.to_string()))?;

    Ok(Some(if negative { -value } else { value }))
}

/// Render a decimal for TEXT storage so equal values compare equal in SQL.
pub fn decimal_key(value: Decimal) -> String {
    value.normalize().to_string()
}
