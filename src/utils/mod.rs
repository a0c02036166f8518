//! Utility functions for formatting and common operations
//!
//! Centralized formatting so tables and summaries display money, NAVs and
//! percentages the same way everywhere.

use rust_decimal::{Decimal, RoundingStrategy};

/// Currency symbol options for formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrencySymbol {
    /// Include "¥" prefix (Chinese yuan)
    Cny,
    /// No currency symbol (for table cells)
    None,
}

/// Core formatting function with full control over output.
///
/// Formats a Decimal with `,` as thousands separator and `.` as decimal
/// separator, rounded half away from zero to 2 places.
///
/// # Examples
/// ```
/// use fundbook::utils::{format_currency_with_width, CurrencySymbol};
/// use rust_decimal_macros::dec;
///
/// assert_eq!(
///     format_currency_with_width(dec!(1234.56), 0, CurrencySymbol::Cny),
///     "¥1,234.56"
/// );
///
/// assert_eq!(
///     format_currency_with_width(dec!(1234), 12, CurrencySymbol::None),
///     "    1,234.00"
/// );
/// ```
pub fn format_currency_with_width(value: Decimal, width: usize, symbol: CurrencySymbol) -> String {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let is_negative = rounded < Decimal::ZERO;

    let formatted = format!("{:.2}", rounded.abs());
    let (integer_part, decimal_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));

    let digits: Vec<char> = integer_part.chars().collect();
    let mut with_separators = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            with_separators.push(',');
        }
        with_separators.push(*c);
    }

    let sign = if is_negative { "-" } else { "" };
    let prefix = match symbol {
        CurrencySymbol::Cny => "¥",
        CurrencySymbol::None => "",
    };

    let result = format!("{}{}{}.{}", sign, prefix, with_separators, decimal_part);

    let len = result.chars().count();
    if width > len {
        format!("{}{}", " ".repeat(width - len), result)
    } else {
        result
    }
}

/// Format as yuan with symbol: "¥1,234.56"
///
/// # Examples
/// ```
/// use fundbook::utils::format_currency;
/// use rust_decimal_macros::dec;
///
/// assert_eq!(format_currency(dec!(1261000)), "¥1,261,000.00");
/// assert_eq!(format_currency(dec!(-500)), "-¥500.00");
/// ```
pub fn format_currency(value: Decimal) -> String {
    format_currency_with_width(value, 0, CurrencySymbol::Cny)
}

/// Format number only (no symbol): "1,234.56"
pub fn format_amount(value: Decimal) -> String {
    format_currency_with_width(value, 0, CurrencySymbol::None)
}

/// Missing values render as a dash so tables keep their shape.
pub fn format_optional_currency(value: Option<Decimal>) -> String {
    value.map(format_currency).unwrap_or_else(|| "-".to_string())
}

/// Unit NAVs keep four places: "1.2610"
pub fn format_nav(value: Option<Decimal>) -> String {
    match value {
        Some(nav) => format!("{:.4}", nav.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)),
        None => "-".to_string(),
    }
}

/// Share counts with separators and two places
pub fn format_shares(value: Decimal) -> String {
    format_amount(value)
}

/// "12.34%" for an already-scaled percentage
pub fn format_pct(value: Option<f64>) -> String {
    match value {
        Some(pct) => format!("{:.2}%", pct),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_format_currency_basic() {
        assert_eq!(format_currency(dec!(1234.56)), "¥1,234.56");
        assert_eq!(format_currency(dec!(0.99)), "¥0.99");
        assert_eq!(format_currency(dec!(1000000)), "¥1,000,000.00");
    }

    #[test]
    fn test_format_currency_small_values() {
        assert_eq!(format_currency(dec!(0)), "¥0.00");
        assert_eq!(format_currency(dec!(12)), "¥12.00");
        assert_eq!(format_currency(dec!(999.99)), "¥999.99");
    }

    #[test]
    fn test_format_currency_negative() {
        assert_eq!(format_currency(dec!(-1234.56)), "-¥1,234.56");
        assert_eq!(format_currency(dec!(-0.001)), "¥0.00");
    }

    #[test]
    fn test_rounding_is_half_away_from_zero() {
        assert_eq!(format_amount(dec!(1.005)), "1.01");
        assert_eq!(format_amount(dec!(2.5049)), "2.50");
    }

    #[test]
    fn test_format_with_width() {
        let result = format_currency_with_width(dec!(100), 10, CurrencySymbol::Cny);
        assert_eq!(result, "   ¥100.00");
        assert_eq!(format_currency_with_width(dec!(1000000), 5, CurrencySymbol::None), "1,000,000.00");
    }

    #[test]
    fn test_optional_values() {
        assert_eq!(format_optional_currency(None), "-");
        assert_eq!(format_nav(Some(dec!(1.261))), "1.2610");
        assert_eq!(format_nav(None), "-");
        assert_eq!(format_pct(Some(0.24)), "0.24%");
        assert_eq!(format_pct(None), "-");
    }
}
