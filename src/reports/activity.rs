//! Transaction analysis: per-product P&L rebuilt from a client's confirmed
//! events rather than from position snapshots.

use anyhow::Result;
use chrono::{Months, NaiveDate};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use super::NavCache;
use crate::db::{self, Transaction};
use crate::error::FundbookError;
use crate::ledger::{
    self, period_flows, reconstruct, HoldingStatus, PeriodFlows, ProductLedger, TransactionClassifier,
};
use crate::normalize::month_start;
use crate::valuation::percent_of;

#[derive(Debug, Clone, Serialize)]
pub struct ProductActivity {
    pub product_key: String,
    pub product_code: Option<String>,
    pub product_name: Option<String>,
    pub main_strategy: Option<String>,
    pub sub_strategy: Option<String>,
    pub is_qd: bool,
    pub buy_amount: Decimal,
    pub sell_amount: Decimal,
    pub dividend_amount: Decimal,
    pub buy_shares: Decimal,
    pub sell_shares: Decimal,
    pub current_shares: Decimal,
    pub first_buy_date: Option<NaiveDate>,
    pub last_event_date: Option<NaiveDate>,
    pub nav_date: Option<NaiveDate>,
    pub unit_nav: Option<Decimal>,
    /// None when shares are still held but no NAV is on record
    pub market_value: Option<Decimal>,
    /// Market value + redemptions + cash dividends − subscriptions
    pub pnl: Option<Decimal>,
    pub return_rate: Option<f64>,
    pub status: HoldingStatus,
    pub event_count: usize,
    pub unknown_labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityReport {
    pub group_id: String,
    pub client_name: Option<String>,
    pub as_of: NaiveDate,
    pub transaction_count: usize,
    pub current: Vec<ProductActivity>,
    pub cleared: Vec<ProductActivity>,
    pub total_invested: Decimal,
    pub total_redeemed: Decimal,
    pub total_dividends: Decimal,
    pub current_market_value: Decimal,
    pub cumulative_pnl: Decimal,
    pub cumulative_return_rate: Option<f64>,
    /// Product keys left out of the valuation totals for lack of a NAV
    pub unvalued: Vec<String>,
}

fn client_transactions(conn: &Connection, group_id: &str) -> Result<Vec<Transaction>> {
    let transactions = db::list_transactions_for_client(conn, group_id)?;
    if transactions.is_empty() {
        return Err(FundbookError::not_found("client transactions", group_id).into());
    }
    Ok(transactions)
}

fn client_name(transactions: &[Transaction]) -> Option<String> {
    transactions.iter().find_map(|t| t.client_name.clone())
}

/// Zero shares are worth zero whether or not a NAV exists.
fn value_shares(shares: Decimal, unit_nav: Option<Decimal>) -> Option<Decimal> {
    if shares.is_zero() {
        Some(Decimal::ZERO)
    } else {
        unit_nav.map(|nav| shares * nav)
    }
}

fn analyze_product(
    conn: &Connection,
    navs: &mut NavCache,
    product: ProductLedger,
    as_of: NaiveDate,
) -> Result<ProductActivity> {
    let balance = reconstruct(&product.events, Some(as_of));
    let current_shares = balance.net_shares();

    let strategy = match &product.product_code {
        Some(code) => db::get_strategy(conn, code)?,
        None => None,
    };
    let nav = match &product.product_code {
        Some(code) => navs.get(code)?.as_of(as_of).copied(),
        None => None,
    };
    let market_value = value_shares(current_shares, nav.map(|n| n.unit_nav));
    let pnl = market_value.map(|mv| mv + balance.sell_amount + balance.dividend_amount - balance.buy_amount);

    Ok(ProductActivity {
        return_rate: pnl.and_then(|pnl| percent_of(pnl, balance.buy_amount)),
        status: balance.status(),
        product_key: product.product_key,
        product_code: product.product_code,
        product_name: product.product_name,
        main_strategy: strategy.as_ref().map(|s| s.main_strategy.clone()),
        sub_strategy: strategy.as_ref().map(|s| s.sub_strategy.clone()),
        is_qd: strategy.is_some_and(|s| s.is_qd),
        buy_amount: balance.buy_amount,
        sell_amount: balance.sell_amount,
        dividend_amount: balance.dividend_amount,
        buy_shares: balance.buy_shares,
        sell_shares: balance.sell_shares,
        current_shares,
        first_buy_date: balance.first_buy_date,
        last_event_date: balance.last_event_date,
        nav_date: nav.map(|n| n.date),
        unit_nav: nav.map(|n| n.unit_nav),
        market_value,
        pnl,
        event_count: balance.event_count,
        unknown_labels: product.unknown_labels,
    })
}

/// Replay every product a client has traded and value what is still held.
///
/// Products still held without a resolvable NAV are listed in `unvalued`
/// and kept out of the market value and P&L totals. Unknown labels are
/// carried along so they can be mapped later.
pub fn analyze_client_activity(
    conn: &Connection,
    group_id: &str,
    as_of: NaiveDate,
    classifier: &TransactionClassifier,
) -> Result<ActivityReport> {
    let transactions = client_transactions(conn, group_id)?;
    let mut navs = NavCache::new(conn);

    let mut current = Vec::new();
    let mut cleared = Vec::new();
    for product in ledger::group_by_product(&transactions, classifier) {
        let activity = analyze_product(conn, &mut navs, product, as_of)?;
        if activity.current_shares > Decimal::ZERO {
            current.push(activity);
        } else {
            cleared.push(activity);
        }
    }
    debug!(
        "Client {}: {} current, {} cleared products",
        group_id,
        current.len(),
        cleared.len()
    );

    current.sort_by(|a, b| {
        a.main_strategy
            .cmp(&b.main_strategy)
            .then_with(|| a.sub_strategy.cmp(&b.sub_strategy))
            .then_with(|| a.first_buy_date.cmp(&b.first_buy_date))
    });
    cleared.sort_by(|a, b| a.product_name.cmp(&b.product_name).then_with(|| a.product_key.cmp(&b.product_key)));

    let all = || current.iter().chain(cleared.iter());
    let total_invested: Decimal = all().map(|p| p.buy_amount).sum();
    let total_redeemed: Decimal = all().map(|p| p.sell_amount).sum();
    let total_dividends: Decimal = all().map(|p| p.dividend_amount).sum();
    let cumulative_pnl: Decimal = all().filter_map(|p| p.pnl).sum();
    let valued_invested: Decimal = all().filter(|p| p.pnl.is_some()).map(|p| p.buy_amount).sum();
    let current_market_value: Decimal = current.iter().filter_map(|p| p.market_value).sum();
    let unvalued: Vec<String> = all()
        .filter(|p| p.market_value.is_none())
        .map(|p| p.product_key.clone())
        .collect();
    if !unvalued.is_empty() {
        debug!("Client {}: no NAV for {:?}", group_id, unvalued);
    }

    Ok(ActivityReport {
        group_id: group_id.to_string(),
        client_name: client_name(&transactions),
        as_of,
        transaction_count: transactions.len(),
        cumulative_return_rate: percent_of(cumulative_pnl, valued_invested),
        current,
        cleared,
        total_invested,
        total_redeemed,
        total_dividends,
        current_market_value,
        cumulative_pnl,
        unvalued,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductPeriod {
    pub product_key: String,
    pub product_name: Option<String>,
    pub main_strategy: Option<String>,
    pub sub_strategy: Option<String>,
    pub start_shares: Decimal,
    pub end_shares: Decimal,
    pub start_market_value: Option<Decimal>,
    pub end_market_value: Option<Decimal>,
    pub net_cash_flow: Decimal,
    pub dividends: Decimal,
    /// End value − start value − net cash flow + cash dividends; None when
    /// either end lacks a NAV
    pub period_return: Option<Decimal>,
    /// Share of the client's total period return, in percent
    pub contribution: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodActivityReport {
    pub group_id: String,
    pub client_name: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub products: Vec<ProductPeriod>,
    pub total_start_value: Decimal,
    pub total_end_value: Decimal,
    pub total_return: Decimal,
    pub total_return_rate: Option<f64>,
    /// Products with no NAV at one end of the window, left out of the totals
    pub unvalued: Vec<String>,
}

/// Valuation of one product at both ends of a window
struct ProductWindow {
    flows: PeriodFlows,
    start_market_value: Option<Decimal>,
    end_market_value: Option<Decimal>,
    /// End value − start value − net cash flow + cash dividends
    period_return: Option<Decimal>,
}

/// `None` when the product was neither held nor traded in the window.
fn product_window(
    navs: &mut NavCache,
    product: &ProductLedger,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Option<ProductWindow>> {
    let flows = period_flows(&product.events, start, end);
    if flows.start_shares.is_zero() && flows.end_shares.is_zero() && flows.net_cash_flow.is_zero() {
        return Ok(None);
    }
    let (start_nav, end_nav) = match &product.product_code {
        Some(code) => {
            let series = navs.get(code)?;
            (
                series.as_of(start).map(|n| n.unit_nav),
                series.as_of(end).map(|n| n.unit_nav),
            )
        }
        None => (None, None),
    };
    let start_market_value = value_shares(flows.start_shares, start_nav);
    let end_market_value = value_shares(flows.end_shares, end_nav);
    let period_return = match (start_market_value, end_market_value) {
        (Some(start_value), Some(end_value)) => Some(end_value - start_value - flows.net_cash_flow + flows.dividends),
        _ => None,
    };
    Ok(Some(ProductWindow {
        flows,
        start_market_value,
        end_market_value,
        period_return,
    }))
}

/// Profit each product contributed over `[start, end]`.
///
/// Products neither held at either end nor traded inside the window are
/// left out. Products that cannot be valued at both ends stay in the list
/// without a return and are excluded from the totals.
pub fn analyze_client_period(
    conn: &Connection,
    group_id: &str,
    start: NaiveDate,
    end: NaiveDate,
    classifier: &TransactionClassifier,
) -> Result<PeriodActivityReport> {
    if start > end {
        return Err(FundbookError::InvalidRange { start, end }.into());
    }
    let transactions = client_transactions(conn, group_id)?;
    let mut navs = NavCache::new(conn);
    let mut products = Vec::new();

    for product in ledger::group_by_product(&transactions, classifier) {
        let Some(window) = product_window(&mut navs, &product, start, end)? else {
            continue;
        };
        let ProductWindow {
            flows,
            start_market_value,
            end_market_value,
            period_return,
        } = window;

        let strategy = match &product.product_code {
            Some(code) => db::get_strategy(conn, code)?,
            None => None,
        };
        products.push(ProductPeriod {
            product_key: product.product_key,
            product_name: product.product_name,
            main_strategy: strategy.as_ref().map(|s| s.main_strategy.clone()),
            sub_strategy: strategy.map(|s| s.sub_strategy),
            start_shares: flows.start_shares,
            end_shares: flows.end_shares,
            period_return,
            start_market_value,
            end_market_value,
            net_cash_flow: flows.net_cash_flow,
            dividends: flows.dividends,
            contribution: None,
        });
    }

    let valued = || products.iter().filter(|p| p.period_return.is_some());
    let total_start_value: Decimal = valued().filter_map(|p| p.start_market_value).sum();
    let total_end_value: Decimal = valued().filter_map(|p| p.end_market_value).sum();
    let total_return: Decimal = valued().filter_map(|p| p.period_return).sum();
    let unvalued: Vec<String> = products
        .iter()
        .filter(|p| p.period_return.is_none())
        .map(|p| p.product_key.clone())
        .collect();
    for product in &mut products {
        product.contribution = product.period_return.and_then(|r| percent_of(r, total_return));
    }
    // Unvalued products sort last
    products.sort_by(|a, b| b.period_return.cmp(&a.period_return));

    Ok(PeriodActivityReport {
        group_id: group_id.to_string(),
        client_name: client_name(&transactions),
        start,
        end,
        products,
        total_start_value,
        total_end_value,
        total_return,
        total_return_rate: percent_of(total_return, total_start_value),
        unvalued,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyProfit {
    /// `YYYY-MM`
    pub month: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub start_value: Decimal,
    pub end_value: Decimal,
    pub net_cash_flow: Decimal,
    pub dividends: Decimal,
    pub monthly_return: Decimal,
    pub cumulative_return: Decimal,
    /// Products left out of this month for lack of a NAV
    pub unvalued: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyTrendReport {
    pub group_id: String,
    pub client_name: Option<String>,
    pub as_of: NaiveDate,
    pub transaction_count: usize,
    pub months: Vec<MonthlyProfit>,
    pub total_return: Decimal,
}

/// Month-by-month profit from the first transaction's month through the
/// month of `as_of`, with a running total.
///
/// Each month is a window analysed like [`analyze_client_period`]; the
/// last one is cut off at `as_of`.
pub fn monthly_profit_trend(
    conn: &Connection,
    group_id: &str,
    as_of: NaiveDate,
    classifier: &TransactionClassifier,
) -> Result<MonthlyTrendReport> {
    let transactions = client_transactions(conn, group_id)?;
    let products = ledger::group_by_product(&transactions, classifier);
    let mut navs = NavCache::new(conn);

    let mut months = Vec::new();
    let mut cumulative_return = Decimal::ZERO;
    let first_date = transactions.iter().map(|t| t.confirmed_date).min().unwrap_or(as_of);
    let mut cursor = month_start(first_date);
    while cursor <= as_of {
        let Some(next) = cursor.checked_add_months(Months::new(1)) else {
            break;
        };
        let end = next.pred_opt().unwrap_or(next).min(as_of);

        let mut month = MonthlyProfit {
            month: cursor.format("%Y-%m").to_string(),
            start: cursor,
            end,
            start_value: Decimal::ZERO,
            end_value: Decimal::ZERO,
            net_cash_flow: Decimal::ZERO,
            dividends: Decimal::ZERO,
            monthly_return: Decimal::ZERO,
            cumulative_return: Decimal::ZERO,
            unvalued: Vec::new(),
        };
        for product in &products {
            let Some(window) = product_window(&mut navs, product, cursor, end)? else {
                continue;
            };
            match (window.start_market_value, window.end_market_value, window.period_return) {
                (Some(start_value), Some(end_value), Some(period_return)) => {
                    month.start_value += start_value;
                    month.end_value += end_value;
                    month.net_cash_flow += window.flows.net_cash_flow;
                    month.dividends += window.flows.dividends;
                    month.monthly_return += period_return;
                }
                _ => month.unvalued.push(product.product_key.clone()),
            }
        }
        cumulative_return += month.monthly_return;
        month.cumulative_return = cumulative_return;
        months.push(month);
        cursor = next;
    }
    debug!("Client {}: profit trend over {} months", group_id, months.len());

    Ok(MonthlyTrendReport {
        group_id: group_id.to_string(),
        client_name: client_name(&transactions),
        as_of,
        transaction_count: transactions.len(),
        months,
        total_return: cumulative_return,
    })
}
