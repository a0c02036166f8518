// Reports module - aggregations over positions, NAV history and transactions

pub mod activity;
pub mod holders;
pub mod lookthrough;
pub mod performance;
pub mod portfolio;
pub mod seasonal;
pub mod trading;

use anyhow::Result;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

use crate::valuation::{percent_of, NavSeries};

pub use activity::{
    analyze_client_activity, analyze_client_period, monthly_profit_trend, ActivityReport, MonthlyTrendReport,
    PeriodActivityReport,
};
pub use holders::{fund_concentration, fund_summary, top_holders, ConcentrationReport, FundSummary, TopHolder};
pub use lookthrough::{client_look_through, LookThroughReport};
pub use performance::{
    fund_period_performance, fund_risk_metrics, fund_stage_performance, FundFilter, RiskParameters,
    StagePerformanceReport,
};
pub use portfolio::{book_strategy_distribution, client_portfolio, planner_summary, ClientPortfolio};
pub use seasonal::{seasonal_analysis, SeasonalReport};
pub use trading::{
    cash_flow_analysis, client_trading_ranking, dividend_analysis, CashFlowReport, DividendReport, FlowGranularity,
    TradingRankingReport,
};

/// Label for positions whose fund has no strategy record
pub const UNCLASSIFIED: &str = "Unclassified";

/// One bucket of a breakdown, with its share of the total
#[derive(Debug, Clone, Serialize)]
pub struct Distribution {
    pub label: String,
    pub market_value: Decimal,
    pub percentage: Option<f64>,
    pub count: usize,
}

/// Sum values per label and express each bucket as a percentage of `total`.
/// Buckets are ordered by value, largest first.
pub fn distribution<I>(items: I, total: Decimal) -> Vec<Distribution>
where
    I: IntoIterator<Item = (String, Decimal)>,
{
    let mut buckets: HashMap<String, (Decimal, usize)> = HashMap::new();
    for (label, value) in items {
        let entry = buckets.entry(label).or_insert((Decimal::ZERO, 0));
        entry.0 += value;
        entry.1 += 1;
    }

    let mut rows: Vec<Distribution> = buckets
        .into_iter()
        .map(|(label, (market_value, count))| Distribution {
            percentage: percent_of(market_value, total),
            label,
            market_value,
            count,
        })
        .collect();
    rows.sort_by(|a, b| b.market_value.cmp(&a.market_value).then_with(|| a.label.cmp(&b.label)));
    rows
}

/// Lazily loaded NAV histories, one per fund
pub(crate) struct NavCache<'c> {
    conn: &'c Connection,
    series: HashMap<String, NavSeries>,
}

impl<'c> NavCache<'c> {
    pub(crate) fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            series: HashMap::new(),
        }
    }

    pub(crate) fn get(&mut self, fund_code: &str) -> Result<&NavSeries> {
        if !self.series.contains_key(fund_code) {
            let series = NavSeries::load(self.conn, fund_code)?;
            self.series.insert(fund_code.to_string(), series);
        }
        Ok(&self.series[fund_code])
    }
}
