use anyhow::Result;
use chrono::Datelike;
use itertools::Itertools;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::db::{self, Position};

/// Aggregated snapshot activity for one calendar bucket
#[derive(Debug, Clone, Serialize)]
pub struct SeasonalBucket {
    /// Month (1-12), quarter (1-4) or year, depending on the grouping
    pub key: i32,
    pub label: String,
    pub total_cost: Decimal,
    pub average_cost: Decimal,
    pub count: usize,
    pub total_shares: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeasonalReport {
    pub fund_code: Option<String>,
    pub year: Option<i32>,
    pub monthly: Vec<SeasonalBucket>,
    pub quarterly: Vec<SeasonalBucket>,
    pub yearly: Vec<SeasonalBucket>,
    pub peak_month: Option<String>,
    pub peak_quarter: Option<String>,
}

fn month_label(month: i32) -> String {
    chrono::Month::try_from(month as u8)
        .map(|m| m.name()[..3].to_string())
        .unwrap_or_else(|_| month.to_string())
}

fn buckets<F, L>(positions: &[Position], key: F, label: L) -> Vec<SeasonalBucket>
where
    F: Fn(&Position) -> i32,
    L: Fn(i32) -> String,
{
    positions
        .iter()
        .into_group_map_by(|p| key(p))
        .into_iter()
        .sorted_by_key(|(k, _)| *k)
        .map(|(k, group)| {
            let total_cost: Decimal = group.iter().filter_map(|p| p.cost_with_fee).sum();
            let total_shares: Decimal = group.iter().filter_map(|p| p.shares).sum();
            SeasonalBucket {
                key: k,
                label: label(k),
                average_cost: (total_cost / Decimal::from(group.len())).round_dp(2),
                total_cost,
                count: group.len(),
                total_shares,
            }
        })
        .collect()
}

fn peak(buckets: &[SeasonalBucket]) -> Option<String> {
    buckets
        .iter()
        .max_by(|a, b| a.total_cost.cmp(&b.total_cost).then_with(|| b.key.cmp(&a.key)))
        .map(|b| b.label.clone())
}

/// Group position snapshots by the month, quarter and year of their stock date.
pub fn seasonal_analysis(conn: &Connection, fund_code: Option<&str>, year: Option<i32>) -> Result<SeasonalReport> {
    let positions = db::list_positions(conn, fund_code, year)?;

    let monthly = buckets(&positions, |p| p.stock_date.month() as i32, month_label);
    let quarterly = buckets(
        &positions,
        |p| (p.stock_date.month0() / 3 + 1) as i32,
        |q| format!("Q{}", q),
    );
    let yearly = buckets(&positions, |p| p.stock_date.year(), |y| y.to_string());

    Ok(SeasonalReport {
        fund_code: fund_code.map(str::to_string),
        year,
        peak_month: peak(&monthly),
        peak_quarter: peak(&quarterly),
        monthly,
        quarterly,
        yearly,
    })
}
