//! Fund-level NAV performance: the weekly stage view, custom periods and
//! risk statistics over a look-back window.

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::db::{self, Fund, Strategy};
use crate::error::FundbookError;
use crate::normalize::year_start;
use crate::valuation::{percent_of, NavSeries};

/// Days between the latest NAV and the comparison NAV of the weekly view
const WEEK: i64 = 7;

/// Optional fund filters shared by both views
#[derive(Debug, Clone, Default)]
pub struct FundFilter {
    /// Case-insensitive substring of the fund code or name
    pub search: Option<String>,
    pub main_strategy: Option<String>,
    pub sub_strategy: Option<String>,
}

impl FundFilter {
    fn matches(&self, fund: &Fund, strategy: Option<&Strategy>) -> bool {
        if let Some(needle) = &self.search {
            let needle = needle.to_lowercase();
            if !fund.fund_code.to_lowercase().contains(&needle)
                && !fund.fund_name.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        if let Some(main) = &self.main_strategy {
            if strategy.map(|s| &s.main_strategy) != Some(main) {
                return false;
            }
        }
        if let Some(sub) = &self.sub_strategy {
            if strategy.map(|s| &s.sub_strategy) != Some(sub) {
                return false;
            }
        }
        true
    }
}

/// Funds passing the filter, with their strategy
fn filtered_funds(conn: &Connection, filter: &FundFilter) -> Result<Vec<(Fund, Option<Strategy>)>> {
    let mut strategies: HashMap<String, Strategy> = db::list_strategies(conn)?
        .into_iter()
        .map(|s| (s.fund_code.clone(), s))
        .collect();
    Ok(db::list_funds(conn)?
        .into_iter()
        .filter_map(|fund| {
            let strategy = strategies.remove(&fund.fund_code);
            filter
                .matches(&fund, strategy.as_ref())
                .then_some((fund, strategy))
        })
        .collect())
}

fn pct_change(from: Decimal, to: Decimal) -> Option<f64> {
    percent_of(to - from, from)
}

#[derive(Debug, Clone, Serialize)]
pub struct StagePerformance {
    pub fund_code: String,
    pub fund_name: String,
    pub main_strategy: Option<String>,
    pub sub_strategy: Option<String>,
    pub latest_nav_date: NaiveDate,
    pub latest_nav: Decimal,
    pub previous_nav_date: Option<NaiveDate>,
    pub previous_nav: Option<Decimal>,
    pub weekly_return: Option<f64>,
    pub ytd_return: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageStatistics {
    pub total: usize,
    pub rising: usize,
    pub falling: usize,
    pub flat: usize,
    pub average_weekly_return: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StagePerformanceReport {
    pub as_of: NaiveDate,
    pub funds: Vec<StagePerformance>,
    pub statistics: StageStatistics,
}

/// Weekly and year-to-date NAV change of every fund with a recent NAV.
///
/// Only funds whose latest NAV falls within `recency_days` of `as_of` are
/// listed. The weekly change compares against the latest NAV at least seven
/// days older; YTD compares against the last NAV of the previous year, or
/// the first NAV of a fund launched this year.
pub fn fund_stage_performance(
    conn: &Connection,
    as_of: NaiveDate,
    recency_days: i64,
    filter: &FundFilter,
) -> Result<StagePerformanceReport> {
    let cutoff = as_of - Duration::days(recency_days);
    let jan1 = year_start(as_of);
    let mut funds = Vec::new();

    for (fund, strategy) in filtered_funds(conn, filter)? {
        let series = NavSeries::load(conn, &fund.fund_code)?;
        let Some(latest) = series.as_of(as_of).copied() else {
            continue;
        };
        if latest.date < cutoff {
            continue;
        }

        let previous = series.as_of(latest.date - Duration::days(WEEK)).copied();
        let ytd_base = match series.first() {
            Some(first) if first.date >= jan1 => Some(*first),
            _ => series.last_before(jan1).copied(),
        };

        funds.push(StagePerformance {
            fund_code: fund.fund_code,
            fund_name: fund.fund_name,
            main_strategy: strategy.as_ref().map(|s| s.main_strategy.clone()),
            sub_strategy: strategy.map(|s| s.sub_strategy),
            latest_nav_date: latest.date,
            latest_nav: latest.unit_nav,
            previous_nav_date: previous.map(|p| p.date),
            previous_nav: previous.map(|p| p.unit_nav),
            weekly_return: previous.and_then(|p| pct_change(p.unit_nav, latest.unit_nav)),
            ytd_return: ytd_base.and_then(|b| pct_change(b.unit_nav, latest.unit_nav)),
        });
    }

    funds.sort_by(|a, b| {
        a.main_strategy
            .cmp(&b.main_strategy)
            .then_with(|| a.sub_strategy.cmp(&b.sub_strategy))
            .then_with(|| {
                let a = a.weekly_return.unwrap_or(f64::NEG_INFINITY);
                let b = b.weekly_return.unwrap_or(f64::NEG_INFINITY);
                b.total_cmp(&a)
            })
    });

    let weekly: Vec<f64> = funds.iter().filter_map(|f| f.weekly_return).collect();
    let rising = weekly.iter().filter(|r| **r > 0.0).count();
    let falling = weekly.iter().filter(|r| **r < 0.0).count();
    let statistics = StageStatistics {
        total: funds.len(),
        rising,
        falling,
        flat: funds.len() - rising - falling,
        average_weekly_return: (!weekly.is_empty())
            .then(|| (weekly.iter().sum::<f64>() / weekly.len() as f64 * 100.0).round() / 100.0),
    };

    Ok(StagePerformanceReport {
        as_of,
        funds,
        statistics,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodPerformance {
    pub fund_code: String,
    pub fund_name: String,
    pub main_strategy: Option<String>,
    pub sub_strategy: Option<String>,
    pub start_nav_date: NaiveDate,
    pub start_nav: Decimal,
    pub end_nav_date: NaiveDate,
    pub end_nav: Decimal,
    pub period_return: Option<f64>,
}

/// NAV change of each fund between the first NAV on or after `start` and the
/// as-of NAV at `end`. Funds without both NAVs are left out.
pub fn fund_period_performance(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
    filter: &FundFilter,
) -> Result<Vec<PeriodPerformance>> {
    if start > end {
        return Err(FundbookError::InvalidRange { start, end }.into());
    }

    let mut result = Vec::new();
    for (fund, strategy) in filtered_funds(conn, filter)? {
        let series = NavSeries::load(conn, &fund.fund_code)?;
        let (Some(first), Some(last)) = (series.first_on_or_after(start), series.as_of(end)) else {
            continue;
        };
        if first.date > last.date {
            continue;
        }
        result.push(PeriodPerformance {
            fund_code: fund.fund_code,
            fund_name: fund.fund_name,
            main_strategy: strategy.as_ref().map(|s| s.main_strategy.clone()),
            sub_strategy: strategy.map(|s| s.sub_strategy),
            start_nav_date: first.date,
            start_nav: first.unit_nav,
            end_nav_date: last.date,
            end_nav: last.unit_nav,
            period_return: pct_change(first.unit_nav, last.unit_nav),
        });
    }

    result.sort_by(|a, b| {
        let a = a.period_return.unwrap_or(f64::NEG_INFINITY);
        let b = b.period_return.unwrap_or(f64::NEG_INFINITY);
        b.total_cmp(&a)
    });
    Ok(result)
}

/// Inputs of the risk statistics
#[derive(Debug, Clone, Copy)]
pub struct RiskParameters {
    /// Look-back window ending at the as-of date
    pub period_days: i64,
    /// Annual rate as a fraction
    pub risk_free_rate: f64,
    /// Observations per year used to annualise volatility
    pub trading_days: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FundRiskMetrics {
    pub fund_code: String,
    pub fund_name: String,
    pub main_strategy: Option<String>,
    pub sub_strategy: Option<String>,
    pub start_nav_date: NaiveDate,
    pub end_nav_date: NaiveDate,
    pub latest_nav: Decimal,
    pub nav_count: usize,
    pub max_nav: Decimal,
    pub min_nav: Decimal,
    pub average_nav: Decimal,
    pub total_return: Option<f64>,
    /// Total return scaled linearly to 365 days
    pub annualized_return: Option<f64>,
    /// Annualised sample deviation of NAV-to-NAV returns, in percent
    pub volatility: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    /// Deepest fall from a running peak, in percent
    pub max_drawdown: Option<f64>,
    pub client_count: usize,
    pub market_value: Option<Decimal>,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

fn max_drawdown(navs: &[f64]) -> Option<f64> {
    let mut peak = *navs.first()?;
    let mut worst = 0.0_f64;
    for &nav in navs {
        peak = peak.max(nav);
        if peak > 0.0 {
            worst = worst.min(nav / peak - 1.0);
        }
    }
    Some(round_to(worst * 100.0, 2))
}

/// Return, volatility, Sharpe ratio and drawdown of each fund over the
/// `period_days` ending at `as_of`.
///
/// Funds with fewer than two NAVs in the window are left out. Rows are
/// ordered by total return, best first.
pub fn fund_risk_metrics(
    conn: &Connection,
    as_of: NaiveDate,
    params: &RiskParameters,
    filter: &FundFilter,
) -> Result<Vec<FundRiskMetrics>> {
    let start = as_of - Duration::days(params.period_days);
    let mut result = Vec::new();

    for (fund, strategy) in filtered_funds(conn, filter)? {
        let series = NavSeries::load(conn, &fund.fund_code)?;
        let points: Vec<_> = series.between(start, as_of).copied().collect();
        let (Some(first), Some(last)) = (points.first().copied(), points.last().copied()) else {
            continue;
        };
        if points.len() < 2 {
            continue;
        }

        let navs: Vec<f64> = points.iter().filter_map(|p| p.unit_nav.to_f64()).collect();
        let returns: Vec<f64> = navs
            .windows(2)
            .filter(|w| w[0] > 0.0)
            .map(|w| w[1] / w[0] - 1.0)
            .collect();
        let volatility =
            sample_std_dev(&returns).map(|sd| sd * f64::from(params.trading_days).sqrt() * 100.0);
        let total_return = pct_change(first.unit_nav, last.unit_nav);
        let annualized_return = total_return.map(|r| r * 365.0 / params.period_days as f64);
        let sharpe_ratio = match (annualized_return, volatility) {
            (Some(ret), Some(vol)) if vol > 0.0 => {
                Some(round_to((ret / 100.0 - params.risk_free_rate) / (vol / 100.0), 3))
            }
            _ => None,
        };

        let holders = db::latest_positions(conn, None, Some(&fund.fund_code), as_of)?;
        let held: Vec<_> = holders
            .iter()
            .filter(|p| p.shares.is_some_and(|s| s > Decimal::ZERO))
            .collect();
        let client_count = held.iter().map(|p| p.group_id.as_str()).collect::<HashSet<_>>().len();
        let total_shares: Decimal = held.iter().filter_map(|p| p.shares).sum();

        let unit_navs = points.iter().map(|p| p.unit_nav);
        result.push(FundRiskMetrics {
            fund_code: fund.fund_code,
            fund_name: fund.fund_name,
            main_strategy: strategy.as_ref().map(|s| s.main_strategy.clone()),
            sub_strategy: strategy.map(|s| s.sub_strategy),
            start_nav_date: first.date,
            end_nav_date: last.date,
            latest_nav: last.unit_nav,
            nav_count: points.len(),
            max_nav: unit_navs.clone().max().unwrap_or_default(),
            min_nav: unit_navs.clone().min().unwrap_or_default(),
            average_nav: (unit_navs.sum::<Decimal>() / Decimal::from(points.len())).round_dp(4),
            total_return,
            annualized_return: annualized_return.map(|r| round_to(r, 2)),
            volatility: volatility.map(|v| round_to(v, 2)),
            sharpe_ratio,
            max_drawdown: max_drawdown(&navs),
            client_count,
            market_value: (!held.is_empty()).then(|| total_shares * last.unit_nav),
        });
    }

    result.sort_by(|a, b| {
        let a = a.total_return.unwrap_or(f64::NEG_INFINITY);
        let b = b.total_return.unwrap_or(f64::NEG_INFINITY);
        b.total_cmp(&a)
    });
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use rust_decimal_macros::dec;

    fn seed(conn: &Connection) {
        add_nav(conn, "OLD", date(2024, 12, 27), dec!(1.00));
        add_nav(conn, "OLD", date(2025, 8, 8), dec!(1.10));
        add_nav(conn, "OLD", date(2025, 8, 15), dec!(1.21));
        add_strategy(conn, "OLD", "Equity", "Quant long", None);

        add_nav(conn, "NEW", date(2025, 3, 3), dec!(1.00));
        add_nav(conn, "NEW", date(2025, 8, 14), dec!(0.90));
        add_strategy(conn, "NEW", "Equity", "Quant long", None);

        add_nav(conn, "STALE", date(2025, 6, 30), dec!(1.50));
    }

    #[test]
    fn test_weekly_and_ytd_returns() {
        let conn = memory_db();
        seed(&conn);

        let report = fund_stage_performance(&conn, date(2025, 8, 15), 7, &FundFilter::default()).unwrap();
        assert_eq!(report.funds.len(), 2);

        let old = report.funds.iter().find(|f| f.fund_code == "OLD").unwrap();
        assert_eq!(old.previous_nav_date, Some(date(2025, 8, 8)));
        assert_eq!(old.weekly_return, Some(10.0));
        assert_eq!(old.ytd_return, Some(21.0));

        // Launched this year: YTD runs from the first NAV
        let new = report.funds.iter().find(|f| f.fund_code == "NEW").unwrap();
        assert_eq!(new.ytd_return, Some(-10.0));
        assert_eq!(new.weekly_return, Some(-10.0));

        assert_eq!(report.statistics.rising, 1);
        assert_eq!(report.statistics.falling, 1);
        assert_eq!(report.statistics.average_weekly_return, Some(0.0));
        assert_eq!(report.funds[0].fund_code, "OLD");
    }

    #[test]
    fn test_filters() {
        let conn = memory_db();
        seed(&conn);
        let filter = FundFilter {
            search: Some("ne".into()),
            ..Default::default()
        };
        let report = fund_stage_performance(&conn, date(2025, 8, 15), 7, &filter).unwrap();
        assert_eq!(report.funds.len(), 1);
        assert_eq!(report.funds[0].fund_code, "NEW");

        let filter = FundFilter {
            main_strategy: Some("Bond".into()),
            ..Default::default()
        };
        let report = fund_stage_performance(&conn, date(2025, 8, 15), 7, &filter).unwrap();
        assert!(report.funds.is_empty());
    }

    #[test]
    fn test_period_performance() {
        let conn = memory_db();
        seed(&conn);

        let rows = fund_period_performance(&conn, date(2025, 8, 1), date(2025, 8, 31), &FundFilter::default()).unwrap();
        let old = rows.iter().find(|r| r.fund_code == "OLD").unwrap();
        assert_eq!(old.start_nav_date, date(2025, 8, 8));
        assert_eq!(old.period_return, Some(10.0));
        assert!(rows.iter().all(|r| r.fund_code != "STALE"));

        let err = fund_period_performance(&conn, date(2025, 9, 1), date(2025, 8, 1), &FundFilter::default());
        assert!(err.is_err());
    }

    fn risk_params() -> RiskParameters {
        RiskParameters {
            period_days: 30,
            risk_free_rate: 0.03,
            trading_days: 252,
        }
    }

    #[test]
    fn test_risk_metrics() {
        let conn = memory_db();
        add_nav(&conn, "F1", date(2025, 7, 1), dec!(0.80));
        add_nav(&conn, "F1", date(2025, 8, 1), dec!(1.00));
        add_nav(&conn, "F1", date(2025, 8, 8), dec!(1.10));
        add_nav(&conn, "F1", date(2025, 8, 15), dec!(0.99));
        add_nav(&conn, "F1", date(2025, 8, 22), dec!(1.089));
        add_position(&conn, "000000001", "F1", date(2025, 8, 1), dec!(1000), dec!(1000));
        add_position(&conn, "000000002", "F1", date(2025, 8, 1), dec!(0), dec!(0));
        // One NAV in the window is not enough
        add_nav(&conn, "F2", date(2025, 8, 22), dec!(1.00));

        let rows = fund_risk_metrics(&conn, date(2025, 8, 22), &risk_params(), &FundFilter::default()).unwrap();
        assert_eq!(rows.len(), 1);
        let f1 = &rows[0];
        // The July NAV falls before the 30-day window
        assert_eq!(f1.start_nav_date, date(2025, 8, 1));
        assert_eq!(f1.nav_count, 4);
        assert_eq!(f1.total_return, Some(8.9));
        assert_eq!(f1.max_nav, dec!(1.10));
        assert_eq!(f1.min_nav, dec!(0.99));
        assert_eq!(f1.average_nav, dec!(1.0448));
        assert_eq!(f1.max_drawdown, Some(-10.0));
        assert_eq!(f1.annualized_return, Some(108.28));

        // Returns +10%, −10%, +10%: sample deviation 0.11547, annualised over 252 days
        assert!((f1.volatility.unwrap() - 183.3).abs() < 0.01);
        assert!((f1.sharpe_ratio.unwrap() - 0.574).abs() < 0.001);

        assert_eq!(f1.client_count, 1);
        assert_eq!(f1.market_value, Some(dec!(1089)));
    }

    #[test]
    fn test_flat_fund_has_no_sharpe() {
        let conn = memory_db();
        add_nav(&conn, "FLAT", date(2025, 8, 1), dec!(1.00));
        add_nav(&conn, "FLAT", date(2025, 8, 8), dec!(1.00));
        add_nav(&conn, "FLAT", date(2025, 8, 15), dec!(1.00));

        let rows = fund_risk_metrics(&conn, date(2025, 8, 15), &risk_params(), &FundFilter::default()).unwrap();
        assert_eq!(rows[0].volatility, Some(0.0));
        assert_eq!(rows[0].sharpe_ratio, None);
        assert_eq!(rows[0].max_drawdown, Some(0.0));
        assert_eq!(rows[0].market_value, None);
    }
}
