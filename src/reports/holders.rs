use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::HoldersConfig;
use crate::db::{self, Fund, FundDividend, Position};
use crate::error::FundbookError;
use crate::valuation::{self, percent_of, NavPoint, NavSeries};

fn require_fund(conn: &Connection, fund_code: &str) -> Result<Fund> {
    Ok(db::get_fund(conn, fund_code)?.ok_or_else(|| FundbookError::not_found("fund", fund_code))?)
}

/// Snapshots of a fund as of a date, with the series to value them
fn holdings(conn: &Connection, fund_code: &str, as_of: NaiveDate) -> Result<(Vec<Position>, NavSeries)> {
    let positions = db::latest_positions(conn, None, Some(fund_code), as_of)?;
    let series = NavSeries::load(conn, fund_code)?;
    Ok((positions, series))
}

#[derive(Debug, Clone, Serialize)]
pub struct HolderLine {
    pub group_id: String,
    pub client_name: Option<String>,
    pub stock_date: NaiveDate,
    pub shares: Decimal,
    pub cost_with_fee: Option<Decimal>,
    pub market_value: Option<Decimal>,
    pub holding_return: Option<Decimal>,
}

/// Per-client view of a single fund
#[derive(Debug, Clone, Serialize)]
pub struct FundSummary {
    pub fund: Fund,
    pub as_of: NaiveDate,
    pub latest_nav: Option<NavPoint>,
    pub holders: Vec<HolderLine>,
    pub total_shares: Decimal,
    pub total_cost: Decimal,
    pub total_market_value: Option<Decimal>,
    /// Per-share distributions declared on or before the as-of date
    pub dividends: Vec<FundDividend>,
}

pub fn fund_summary(conn: &Connection, fund_code: &str, as_of: NaiveDate) -> Result<FundSummary> {
    let fund = require_fund(conn, fund_code)?;
    let (positions, series) = holdings(conn, fund_code, as_of)?;
    let latest_nav = series.as_of(as_of).cloned();

    let mut holders = Vec::with_capacity(positions.len());
    for position in &positions {
        let client_name = db::get_client(conn, &position.group_id)?.and_then(|c| c.obscured_name);
        let dividends = db::sum_cash_dividends(conn, &position.group_id, fund_code, None, as_of)?;
        let valuation = valuation::value_position(position, &series, as_of, dividends);
        holders.push(HolderLine {
            group_id: position.group_id.clone(),
            client_name,
            stock_date: position.stock_date,
            shares: position.shares.unwrap_or_default(),
            cost_with_fee: position.cost_with_fee,
            market_value: valuation.market_value,
            holding_return: valuation.holding_return,
        });
    }
    holders.sort_by(|a, b| b.shares.cmp(&a.shares));

    let total_shares: Decimal = holders.iter().map(|h| h.shares).sum();
    let total_cost: Decimal = holders.iter().filter_map(|h| h.cost_with_fee).sum();
    let total_market_value = latest_nav.as_ref().map(|nav| total_shares * nav.unit_nav);
    let dividends = db::list_fund_dividends(conn, fund_code)?
        .into_iter()
        .filter(|d| d.dividend_date <= as_of)
        .collect();

    Ok(FundSummary {
        fund,
        as_of,
        latest_nav,
        holders,
        total_shares,
        total_cost,
        total_market_value,
        dividends,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct TopHolder {
    pub rank: usize,
    pub group_id: String,
    pub client_name: Option<String>,
    pub shares: Decimal,
    pub share_percentage: Option<f64>,
    pub market_value: Option<Decimal>,
}

/// The `n` largest holders of a fund by shares
pub fn top_holders(conn: &Connection, fund_code: &str, as_of: NaiveDate, n: usize) -> Result<Vec<TopHolder>> {
    require_fund(conn, fund_code)?;
    let (mut positions, series) = holdings(conn, fund_code, as_of)?;
    positions.sort_by(|a, b| {
        b.shares
            .unwrap_or_default()
            .cmp(&a.shares.unwrap_or_default())
            .then_with(|| a.group_id.cmp(&b.group_id))
    });

    let total_shares: Decimal = positions.iter().filter_map(|p| p.shares).sum();
    let mut result = Vec::new();
    for (idx, position) in positions.iter().take(n).enumerate() {
        let shares = position.shares.unwrap_or_default();
        result.push(TopHolder {
            rank: idx + 1,
            group_id: position.group_id.clone(),
            client_name: db::get_client(conn, &position.group_id)?.and_then(|c| c.obscured_name),
            shares,
            share_percentage: percent_of(shares, total_shares),
            market_value: valuation::market_value(shares, &series, as_of),
        });
    }
    Ok(result)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TierCount {
    pub count: usize,
    pub market_value: Decimal,
}

/// Ownership concentration of a fund
#[derive(Debug, Clone, Serialize)]
pub struct ConcentrationReport {
    pub fund_code: String,
    pub as_of: NaiveDate,
    pub holder_count: usize,
    pub total_shares: Decimal,
    /// Herfindahl-Hirschman index over share fractions, 0..=1
    pub herfindahl_index: Option<f64>,
    pub top5_percentage: Option<f64>,
    pub top10_percentage: Option<f64>,
    pub large: TierCount,
    pub medium: TierCount,
    pub small: TierCount,
    /// Holders without a NAV to value them, left out of the tiers
    pub unvalued: usize,
}

pub fn fund_concentration(
    conn: &Connection,
    fund_code: &str,
    as_of: NaiveDate,
    thresholds: &HoldersConfig,
) -> Result<ConcentrationReport> {
    require_fund(conn, fund_code)?;
    let (positions, series) = holdings(conn, fund_code, as_of)?;

    let mut shares: Vec<Decimal> = positions
        .iter()
        .filter_map(|p| p.shares)
        .filter(|s| *s > Decimal::ZERO)
        .collect();
    shares.sort_by(|a, b| b.cmp(a));
    let total_shares: Decimal = shares.iter().copied().sum();

    let herfindahl_index = if total_shares.is_zero() {
        None
    } else {
        let hhi: Decimal = shares
            .iter()
            .map(|s| {
                let fraction = *s / total_shares;
                fraction * fraction
            })
            .sum();
        hhi.round_dp(4).to_f64()
    };
    let top = |n: usize| percent_of(shares.iter().take(n).copied().sum(), total_shares);

    let mut report = ConcentrationReport {
        fund_code: fund_code.to_string(),
        as_of,
        holder_count: shares.len(),
        total_shares,
        herfindahl_index,
        top5_percentage: top(5),
        top10_percentage: top(10),
        large: TierCount::default(),
        medium: TierCount::default(),
        small: TierCount::default(),
        unvalued: 0,
    };

    for share in &shares {
        let Some(mv) = valuation::market_value(*share, &series, as_of) else {
            report.unvalued += 1;
            continue;
        };
        let tier = if mv > thresholds.large_threshold {
            &mut report.large
        } else if mv >= thresholds.medium_threshold {
            &mut report.medium
        } else {
            &mut report.small
        };
        tier.count += 1;
        tier.market_value += mv;
    }

    Ok(report)
}
