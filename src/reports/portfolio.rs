use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use super::{distribution, Distribution, NavCache, UNCLASSIFIED};
use crate::db::{self, Client, Strategy};
use crate::error::FundbookError;
use crate::normalize::year_start;
use crate::valuation::{self, percent_of, PositionValuation};

/// One fund held by a client, valued as of the report date
#[derive(Debug, Clone, Serialize)]
pub struct PositionDetail {
    pub fund_code: String,
    pub fund_name: String,
    pub main_strategy: String,
    pub sub_strategy: String,
    pub stock_date: NaiveDate,
    pub first_buy_date: Option<NaiveDate>,
    pub shares: Option<Decimal>,
    pub cost_with_fee: Option<Decimal>,
    pub cost_without_fee: Option<Decimal>,
    #[serde(flatten)]
    pub valuation: PositionValuation,
    pub ytd_return: Option<Decimal>,
    pub period_return: Option<Decimal>,
}

/// Complete client portfolio report
#[derive(Debug, Clone, Serialize)]
pub struct ClientPortfolio {
    pub client: Client,
    pub as_of: NaiveDate,
    pub period: Option<(NaiveDate, NaiveDate)>,
    pub positions: Vec<PositionDetail>,
    pub total_cost: Decimal,
    pub total_market_value: Decimal,
    pub total_holding_return: Decimal,
    pub total_dividends: Decimal,
    pub overall_return_rate: Option<f64>,
    pub total_ytd_return: Decimal,
    pub total_period_return: Option<Decimal>,
    pub by_fund: Vec<Distribution>,
    pub by_main_strategy: Vec<Distribution>,
    pub by_sub_strategy: Vec<Distribution>,
}

fn strategy_labels(strategy: Option<&Strategy>) -> (String, String) {
    match strategy {
        Some(s) => (s.main_strategy.clone(), s.sub_strategy.clone()),
        None => (UNCLASSIFIED.to_string(), UNCLASSIFIED.to_string()),
    }
}

/// Value every fund a client holds as of `as_of`.
///
/// Uses the latest snapshot per fund dated on or before `as_of`. When a
/// period is given, each position also carries its period return.
pub fn client_portfolio(
    conn: &Connection,
    group_id: &str,
    as_of: NaiveDate,
    period: Option<(NaiveDate, NaiveDate)>,
) -> Result<ClientPortfolio> {
    let client = db::get_client(conn, group_id)?
        .ok_or_else(|| FundbookError::not_found("client", group_id))?;
    if let Some((start, end)) = period {
        if start > end {
            return Err(FundbookError::InvalidRange { start, end }.into());
        }
    }

    let snapshots = db::latest_positions(conn, Some(group_id), None, as_of)?;
    let mut navs = NavCache::new(conn);
    let mut positions = Vec::with_capacity(snapshots.len());

    for snapshot in snapshots {
        let fund_name = db::get_fund(conn, &snapshot.fund_code)?
            .map(|f| f.fund_name)
            .unwrap_or_else(|| snapshot.fund_code.clone());
        let strategy = db::get_strategy(conn, &snapshot.fund_code)?;
        let (main_strategy, sub_strategy) = strategy_labels(strategy.as_ref());

        let dividends = db::sum_cash_dividends(conn, group_id, &snapshot.fund_code, None, as_of)?;
        let ytd_dividends =
            db::sum_cash_dividends(conn, group_id, &snapshot.fund_code, Some(year_start(as_of)), as_of)?;

        let series = navs.get(&snapshot.fund_code)?;
        let valuation = valuation::value_position(&snapshot, series, as_of, dividends);
        let ytd_return = valuation::ytd_return(&snapshot, series, as_of, ytd_dividends);
        let period_return = match period {
            Some((start, end)) => valuation::period_return(&snapshot, series, start, end)?,
            None => None,
        };

        positions.push(PositionDetail {
            fund_code: snapshot.fund_code.clone(),
            fund_name,
            main_strategy,
            sub_strategy,
            stock_date: snapshot.stock_date,
            first_buy_date: snapshot.first_buy_date,
            shares: snapshot.shares,
            cost_with_fee: snapshot.cost_with_fee,
            cost_without_fee: snapshot.cost_without_fee,
            valuation,
            ytd_return,
            period_return,
        });
    }

    let total_cost: Decimal = positions.iter().filter_map(|p| p.cost_with_fee).sum();
    let total_market_value: Decimal = positions.iter().filter_map(|p| p.valuation.market_value).sum();
    let total_holding_return: Decimal = positions.iter().filter_map(|p| p.valuation.holding_return).sum();
    let total_dividends: Decimal = positions.iter().map(|p| p.valuation.cash_dividends).sum();
    let total_ytd_return: Decimal = positions.iter().filter_map(|p| p.ytd_return).sum();
    let total_period_return =
        period.map(|_| positions.iter().filter_map(|p| p.period_return).sum::<Decimal>());

    let valued = |label: fn(&PositionDetail) -> String| {
        positions
            .iter()
            .filter_map(|p| p.valuation.market_value.map(|mv| (label(p), mv)))
            .collect::<Vec<_>>()
    };
    let by_fund = distribution(valued(|p| p.fund_name.clone()), total_market_value);
    let by_main_strategy = distribution(valued(|p| p.main_strategy.clone()), total_market_value);
    let by_sub_strategy = distribution(valued(|p| p.sub_strategy.clone()), total_market_value);

    Ok(ClientPortfolio {
        client,
        as_of,
        period,
        overall_return_rate: percent_of(total_holding_return, total_cost),
        positions,
        total_cost,
        total_market_value,
        total_holding_return,
        total_dividends,
        total_ytd_return,
        total_period_return,
        by_fund,
        by_main_strategy,
        by_sub_strategy,
    })
}

/// Strategy mix of the whole book
#[derive(Debug, Clone, Serialize)]
pub struct StrategyBreakdown {
    pub as_of: NaiveDate,
    pub total_market_value: Decimal,
    pub by_main_strategy: Vec<Distribution>,
    /// main strategy -> sub-strategy buckets
    pub by_sub_strategy: BTreeMap<String, Vec<Distribution>>,
    pub unvalued_positions: usize,
}

pub fn book_strategy_distribution(conn: &Connection, as_of: NaiveDate) -> Result<StrategyBreakdown> {
    let strategies: HashMap<String, Strategy> = db::list_strategies(conn)?
        .into_iter()
        .map(|s| (s.fund_code.clone(), s))
        .collect();
    let mut navs = NavCache::new(conn);

    let mut valued: Vec<(String, String, Decimal)> = Vec::new();
    let mut unvalued_positions = 0;
    for position in db::latest_positions(conn, None, None, as_of)? {
        let series = navs.get(&position.fund_code)?;
        let market_value = position
            .shares
            .and_then(|shares| valuation::market_value(shares, series, as_of));
        match market_value {
            Some(mv) => {
                let (main, sub) = strategy_labels(strategies.get(&position.fund_code));
                valued.push((main, sub, mv));
            }
            None => unvalued_positions += 1,
        }
    }

    let total_market_value: Decimal = valued.iter().map(|(_, _, mv)| *mv).sum();
    let by_main_strategy = distribution(
        valued.iter().map(|(main, _, mv)| (main.clone(), *mv)),
        total_market_value,
    );

    let mut subs: BTreeMap<String, Vec<(String, Decimal)>> = BTreeMap::new();
    for (main, sub, mv) in &valued {
        subs.entry(main.clone()).or_default().push((sub.clone(), *mv));
    }
    let by_sub_strategy = subs
        .into_iter()
        .map(|(main, items)| (main, distribution(items, total_market_value)))
        .collect();

    Ok(StrategyBreakdown {
        as_of,
        total_market_value,
        by_main_strategy,
        by_sub_strategy,
        unvalued_positions,
    })
}

/// Book totals per domestic planner
#[derive(Debug, Clone, Serialize)]
pub struct PlannerLine {
    pub planner: String,
    pub clients: usize,
    pub positions: usize,
    pub total_cost: Decimal,
    pub total_market_value: Decimal,
}

pub fn planner_summary(conn: &Connection, as_of: NaiveDate) -> Result<Vec<PlannerLine>> {
    let planners: HashMap<String, String> = db::list_clients(conn)?
        .into_iter()
        .map(|c| {
            let planner = c.domestic_planner.unwrap_or_else(|| UNCLASSIFIED.to_string());
            (c.group_id, planner)
        })
        .collect();
    let mut navs = NavCache::new(conn);

    let mut lines: BTreeMap<String, (PlannerLine, Vec<String>)> = BTreeMap::new();
    for position in db::latest_positions(conn, None, None, as_of)? {
        let planner = planners
            .get(&position.group_id)
            .cloned()
            .unwrap_or_else(|| UNCLASSIFIED.to_string());
        let series = navs.get(&position.fund_code)?;
        let market_value = position
            .shares
            .and_then(|shares| valuation::market_value(shares, series, as_of))
            .unwrap_or_default();

        let (line, clients) = lines.entry(planner.clone()).or_insert_with(|| {
            (
                PlannerLine {
                    planner,
                    clients: 0,
                    positions: 0,
                    total_cost: Decimal::ZERO,
                    total_market_value: Decimal::ZERO,
                },
                Vec::new(),
            )
        });
        if !clients.contains(&position.group_id) {
            clients.push(position.group_id.clone());
            line.clients += 1;
        }
        line.positions += 1;
        line.total_cost += position.cost_with_fee.unwrap_or_default();
        line.total_market_value += market_value;
    }

    let mut result: Vec<PlannerLine> = lines.into_values().map(|(line, _)| line).collect();
    result.sort_by(|a, b| b.total_market_value.cmp(&a.total_market_value));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_not_found;
    use crate::test_support::*;
    use rust_decimal_macros::dec;

    const CLIENT: &str = "000319506";

    #[test]
    fn test_end_to_end_holding_return() {
        let conn = memory_db();
        let day = date(2025, 8, 15);
        add_nav(&conn, "L03126", day, dec!(1.2610));
        add_position(&conn, CLIENT, "L03126", day, dec!(1000000), dec!(1258000));

        let report = client_portfolio(&conn, CLIENT, day, None).unwrap();
        assert_eq!(report.positions.len(), 1);
        assert_eq!(report.total_market_value, dec!(1261000));
        assert_eq!(report.total_holding_return, dec!(3000));
        assert_eq!(report.overall_return_rate, Some(0.24));
        assert_eq!(report.by_main_strategy[0].label, UNCLASSIFIED);
        assert_eq!(report.by_main_strategy[0].percentage, Some(100.0));
    }

    #[test]
    fn test_unknown_client_is_not_found() {
        let conn = memory_db();
        let err = client_portfolio(&conn, "000000404", date(2025, 1, 1), None).unwrap_err();
        assert!(is_not_found(&err));
    }

    #[test]
    fn test_totals_skip_unvalued_positions() {
        let conn = memory_db();
        let day = date(2025, 8, 15);
        add_nav(&conn, "F1", day, dec!(2));
        add_position(&conn, CLIENT, "F1", day, dec!(100), dec!(150));
        add_position(&conn, CLIENT, "F2", day, dec!(100), dec!(100));
        add_strategy(&conn, "F1", "Equity", "Long only", None);

        let report = client_portfolio(&conn, CLIENT, day, Some((day, day))).unwrap();
        assert_eq!(report.total_cost, dec!(250));
        assert_eq!(report.total_market_value, dec!(200));
        assert_eq!(report.total_holding_return, dec!(50));
        assert_eq!(report.total_period_return, Some(Decimal::ZERO));

        let f2 = report.positions.iter().find(|p| p.fund_code == "F2").unwrap();
        assert!(f2.valuation.market_value.is_none());
        assert_eq!(report.by_main_strategy.len(), 1);
        assert_eq!(report.by_main_strategy[0].label, "Equity");
    }

    #[test]
    fn test_dividends_flow_into_holding_and_ytd_return() {
        let conn = memory_db();
        add_nav(&conn, "F1", date(2024, 12, 31), dec!(1.00));
        add_nav(&conn, "F1", date(2025, 6, 30), dec!(1.10));
        add_position(&conn, CLIENT, "F1", date(2025, 6, 30), dec!(1000), dec!(1000));
        add_cash_dividend(&conn, CLIENT, "F1", date(2024, 12, 20), dec!(5));
        add_cash_dividend(&conn, CLIENT, "F1", date(2025, 3, 20), dec!(7));

        // Snapshot has no first-buy date, so its stock date stands in for it
        let report = client_portfolio(&conn, CLIENT, date(2025, 6, 30), None).unwrap();
        let position = &report.positions[0];
        assert_eq!(position.valuation.cash_dividends, dec!(12));
        assert_eq!(position.valuation.holding_return, Some(dec!(88)));
        assert_eq!(report.total_dividends, dec!(12));
        // Bought 2025-06-30 at buy NAV 1.00, valued at 1.10, plus this year's dividend
        assert_eq!(position.ytd_return, Some(dec!(107)));
    }

    #[test]
    fn test_inverted_period_rejected() {
        let conn = memory_db();
        add_position(&conn, CLIENT, "F1", date(2025, 1, 1), dec!(1), dec!(1));
        let err = client_portfolio(&conn, CLIENT, date(2025, 2, 1), Some((date(2025, 2, 1), date(2025, 1, 1))))
            .unwrap_err();
        assert!(err.to_string().contains("invalid date range"));
    }

    #[test]
    fn test_book_strategy_and_planners() {
        let conn = memory_db();
        let day = date(2025, 8, 15);
        add_nav(&conn, "F1", day, dec!(1));
        add_nav(&conn, "F2", day, dec!(1));
        add_strategy(&conn, "F1", "Equity", "Quant long", None);
        add_strategy(&conn, "F2", "Equity", "Discretionary long", None);
        add_position(&conn, "000000001", "F1", day, dec!(300), dec!(300));
        add_position(&conn, "000000002", "F2", day, dec!(100), dec!(100));
        db::ensure_client(&conn, "000000001", None, Some("Wang")).unwrap();

        let breakdown = book_strategy_distribution(&conn, day).unwrap();
        assert_eq!(breakdown.total_market_value, dec!(400));
        assert_eq!(breakdown.by_main_strategy[0].percentage, Some(100.0));
        assert_eq!(breakdown.by_sub_strategy["Equity"][0].label, "Quant long");
        assert_eq!(breakdown.by_sub_strategy["Equity"][0].percentage, Some(75.0));

        let planners = planner_summary(&conn, day).unwrap();
        assert_eq!(planners[0].planner, "Wang");
        assert_eq!(planners[0].total_market_value, dec!(300));
        assert_eq!(planners[1].planner, UNCLASSIFIED);
    }
}
