//! Valuation engine: market value, holding return, period and YTD return
//! of a position snapshot against a fund's NAV history.
//!
//! Missing NAVs yield `None`, never zero.

pub mod nav_series;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::db::Position;
use crate::error::FundbookError;
use crate::normalize::year_start;
pub use nav_series::{NavPoint, NavSeries};

/// Round a percentage for presentation.
pub fn round_pct(value: Decimal) -> Option<f64> {
    value.round_dp(2).to_f64()
}

/// `numerator / denominator * 100`, undefined for a zero denominator.
pub fn percent_of(numerator: Decimal, denominator: Decimal) -> Option<f64> {
    if denominator.is_zero() {
        return None;
    }
    round_pct(numerator / denominator * Decimal::ONE_HUNDRED)
}

/// Purchase price per share implied by the fee-exclusive cost.
pub fn buy_nav(position: &Position) -> Option<Decimal> {
    match (position.cost_without_fee, position.shares) {
        (Some(cost), Some(shares)) if shares > Decimal::ZERO => Some(cost / shares),
        _ => None,
    }
}

pub fn market_value(shares: Decimal, series: &NavSeries, as_of: NaiveDate) -> Option<Decimal> {
    series.as_of(as_of).map(|nav| shares * nav.unit_nav)
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionValuation {
    pub nav_date: Option<NaiveDate>,
    pub unit_nav: Option<Decimal>,
    pub buy_nav: Option<Decimal>,
    pub market_value: Option<Decimal>,
    pub cash_dividends: Decimal,
    pub holding_return: Option<Decimal>,
    pub holding_return_rate: Option<f64>,
}

/// Value a snapshot as of a date.
///
/// Holding return is market value minus cost-with-fee minus the cash
/// dividends already paid out; the rate is taken over cost-with-fee.
pub fn value_position(
    position: &Position,
    series: &NavSeries,
    as_of: NaiveDate,
    cash_dividends: Decimal,
) -> PositionValuation {
    let nav = series.as_of(as_of);
    let market_value = match (position.shares, nav) {
        (Some(shares), Some(nav)) => Some(shares * nav.unit_nav),
        _ => None,
    };

    let cost = position.cost_with_fee.filter(|c| !c.is_zero());
    let holding_return = match (market_value, cost) {
        (Some(mv), Some(cost)) => Some(mv - cost - cash_dividends),
        _ => None,
    };
    let holding_return_rate = match (holding_return, cost) {
        (Some(ret), Some(cost)) => percent_of(ret, cost),
        _ => None,
    };

    PositionValuation {
        nav_date: nav.map(|n| n.date),
        unit_nav: nav.map(|n| n.unit_nav),
        buy_nav: buy_nav(position),
        market_value,
        cash_dividends,
        holding_return,
        holding_return_rate,
    }
}

/// NAV gain of a snapshot over `[start, end]`.
///
/// A position first bought inside the window starts from its buy NAV; one
/// bought after the window earns nothing in it; otherwise the window opens at
/// the as-of NAV of `start`. Returns `Ok(None)` when a NAV is missing.
pub fn period_return(
    position: &Position,
    series: &NavSeries,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Option<Decimal>, FundbookError> {
    if start > end {
        return Err(FundbookError::InvalidRange { start, end });
    }
    let from_buy_nav = first_buy_date(position) > start;
    Ok(nav_gain(position, series, from_buy_nav, start, end))
}

fn first_buy_date(position: &Position) -> NaiveDate {
    position.first_buy_date.unwrap_or(position.stock_date)
}

/// `(end NAV − opening NAV) × shares`, opening at the buy NAV when
/// `from_buy_nav` and at the as-of NAV of `start` otherwise.
fn nav_gain(
    position: &Position,
    series: &NavSeries,
    from_buy_nav: bool,
    start: NaiveDate,
    end: NaiveDate,
) -> Option<Decimal> {
    let shares = position.shares?;
    if first_buy_date(position) > end {
        return Some(Decimal::ZERO);
    }

    let start_nav = if from_buy_nav {
        buy_nav(position)
    } else {
        series.as_of(start).map(|n| n.unit_nav)
    };
    let end_nav = series.as_of(end).map(|n| n.unit_nav);

    match (start_nav, end_nav) {
        (Some(s), Some(e)) => Some((e - s) * shares),
        _ => None,
    }
}

/// Year-to-date return: NAV gain since January 1 plus cash dividends
/// confirmed this year.
///
/// Unlike a period return, a first buy on January 1 itself opens at the
/// buy NAV.
pub fn ytd_return(
    position: &Position,
    series: &NavSeries,
    as_of: NaiveDate,
    ytd_cash_dividends: Decimal,
) -> Option<Decimal> {
    let jan1 = year_start(as_of);
    let from_buy_nav = first_buy_date(position) >= jan1;
    nav_gain(position, series, from_buy_nav, jan1, as_of).map(|gain| gain + ytd_cash_dividends)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NavRecord;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn series(points: &[(NaiveDate, Decimal)]) -> NavSeries {
        let records: Vec<NavRecord> = points
            .iter()
            .map(|(date, unit)| NavRecord {
                id: None,
                fund_code: "L03126".into(),
                nav_date: *date,
                unit_nav: *unit,
                accum_nav: *unit,
            })
            .collect();
        NavSeries::from_records(&records)
    }

    fn position(shares: Decimal, cost_with_fee: Decimal, first_buy: NaiveDate) -> Position {
        Position {
            id: None,
            group_id: "000319506".into(),
            fund_code: "L03126".into(),
            stock_date: d(2025, 8, 15),
            first_buy_date: Some(first_buy),
            cost_with_fee: Some(cost_with_fee),
            cost_without_fee: Some(cost_with_fee - dec!(8000)),
            shares: Some(shares),
        }
    }

    #[test]
    fn test_market_value_needs_a_nav() {
        let empty = NavSeries::default();
        assert_eq!(market_value(dec!(1000), &empty, d(2025, 8, 15)), None);

        let later_only = series(&[(d(2025, 9, 1), dec!(1.1))]);
        assert_eq!(market_value(dec!(1000), &later_only, d(2025, 8, 15)), None);

        let valuation = value_position(&position(dec!(1000), dec!(900), d(2025, 1, 2)), &empty, d(2025, 8, 15), Decimal::ZERO);
        assert!(valuation.market_value.is_none());
        assert!(valuation.holding_return.is_none());
        assert!(valuation.holding_return_rate.is_none());
    }

    #[test]
    fn test_holding_return_scenario() {
        let s = series(&[(d(2025, 8, 15), dec!(1.2610))]);
        let p = position(dec!(1000000), dec!(1258000), d(2025, 1, 2));
        let v = value_position(&p, &s, d(2025, 8, 15), Decimal::ZERO);
        assert_eq!(v.market_value, Some(dec!(1261000)));
        assert_eq!(v.holding_return, Some(dec!(3000)));
        assert_eq!(v.holding_return_rate, Some(0.24));
    }

    #[test]
    fn test_cash_dividends_reduce_holding_return() {
        let s = series(&[(d(2025, 8, 15), dec!(1.10))]);
        let p = position(dec!(1000), dec!(1000), d(2025, 1, 2));
        let v = value_position(&p, &s, d(2025, 8, 15), dec!(20));
        assert_eq!(v.holding_return, Some(dec!(80)));
        assert_eq!(v.holding_return_rate, Some(8.0));
    }

    #[test]
    fn test_zero_cost_has_no_rate() {
        let s = series(&[(d(2025, 8, 15), dec!(1.10))]);
        let p = position(dec!(1000), Decimal::ZERO, d(2025, 1, 2));
        let v = value_position(&p, &s, d(2025, 8, 15), Decimal::ZERO);
        assert_eq!(v.market_value, Some(dec!(1100)));
        assert!(v.holding_return_rate.is_none());
    }

    #[test]
    fn test_period_return_zero_on_single_nav_date() {
        let day = d(2025, 8, 15);
        let s = series(&[(d(2025, 8, 1), dec!(1.2)), (day, dec!(1.2610))]);
        for first_buy in [d(2024, 3, 1), day] {
            let p = position(dec!(1000), dec!(1258), first_buy);
            assert_eq!(period_return(&p, &s, day, day).unwrap(), Some(Decimal::ZERO));
        }
    }

    #[test]
    fn test_period_return_branches() {
        let s = series(&[
            (d(2025, 6, 30), dec!(1.00)),
            (d(2025, 7, 31), dec!(1.10)),
            (d(2025, 8, 29), dec!(1.20)),
        ]);
        let start = d(2025, 7, 1);
        let end = d(2025, 8, 31);

        // Held before the window: opens at the as-of NAV of the start date
        let held = position(dec!(1000), dec!(1000), d(2025, 1, 2));
        assert_eq!(period_return(&held, &s, start, end).unwrap(), Some(dec!(200)));

        // Bought inside the window: opens at buy NAV (cost without fee / shares)
        let mut bought = position(dec!(1000), dec!(1058), d(2025, 7, 15));
        bought.cost_without_fee = Some(dec!(1050));
        assert_eq!(period_return(&bought, &s, start, end).unwrap(), Some(dec!(150)));

        // Bought after the window
        let late = position(dec!(1000), dec!(1000), d(2025, 9, 15));
        assert_eq!(period_return(&late, &s, start, end).unwrap(), Some(Decimal::ZERO));

        // No NAV at or before the start date
        let early = series(&[(d(2025, 8, 29), dec!(1.20))]);
        assert_eq!(period_return(&held, &early, start, end).unwrap(), None);
    }

    #[test]
    fn test_period_return_rejects_inverted_range() {
        let p = position(dec!(1), dec!(1), d(2025, 1, 2));
        let err = period_return(&p, &NavSeries::default(), d(2025, 2, 1), d(2025, 1, 1)).unwrap_err();
        assert!(matches!(err, FundbookError::InvalidRange { .. }));
    }

    #[test]
    fn test_ytd_adds_this_years_dividends() {
        let s = series(&[(d(2024, 12, 31), dec!(1.00)), (d(2025, 8, 15), dec!(1.05))]);
        let p = position(dec!(1000), dec!(1000), d(2023, 5, 5));
        assert_eq!(ytd_return(&p, &s, d(2025, 8, 15), dec!(10)), Some(dec!(60)));
    }

    #[test]
    fn test_ytd_first_buy_on_january_first_opens_at_buy_nav() {
        let s = series(&[(d(2024, 12, 31), dec!(1.00)), (d(2025, 8, 15), dec!(1.05))]);
        let mut p = position(dec!(1000), dec!(1020), d(2025, 1, 1));
        p.cost_without_fee = Some(dec!(1020));
        // (1.05 − 1.02) × 1000, not (1.05 − 1.00) × 1000
        assert_eq!(ytd_return(&p, &s, d(2025, 8, 15), Decimal::ZERO), Some(dec!(30)));

        // The same day as a period start still opens at the as-of NAV
        assert_eq!(period_return(&p, &s, d(2025, 1, 1), d(2025, 8, 15)).unwrap(), Some(dec!(50)));
    }
}
