//! Book-wide trading views built from confirmed transactions: cash flow per
//! calendar bucket, client trading activity, and dividend distribution.

use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDate};
use itertools::Itertools;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use tracing::debug;

use crate::db::{self, DividendKind, TransactionKind};
use crate::error::FundbookError;
use crate::ledger::{LedgerEvent, TransactionClassifier};
use crate::normalize::month_start;

/// Width of a cash-flow bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowGranularity {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

impl FlowGranularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowGranularity::Daily => "daily",
            FlowGranularity::Weekly => "weekly",
            FlowGranularity::Monthly => "monthly",
            FlowGranularity::Quarterly => "quarterly",
        }
    }

    /// First day of the bucket holding `date`. Weeks start on Monday.
    pub fn bucket_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            FlowGranularity::Daily => date,
            FlowGranularity::Weekly => date - Duration::days(date.weekday().num_days_from_monday() as i64),
            FlowGranularity::Monthly => month_start(date),
            FlowGranularity::Quarterly => {
                NaiveDate::from_ymd_opt(date.year(), date.month0() / 3 * 3 + 1, 1).unwrap_or(date)
            }
        }
    }
}

impl FromStr for FlowGranularity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(FlowGranularity::Daily),
            "weekly" | "week" => Ok(FlowGranularity::Weekly),
            "monthly" | "month" => Ok(FlowGranularity::Monthly),
            "quarterly" | "quarter" => Ok(FlowGranularity::Quarterly),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CashFlowBucket {
    pub period_start: NaiveDate,
    /// Subscription amounts
    pub inflow: Decimal,
    /// Redemption amounts
    pub outflow: Decimal,
    pub net_flow: Decimal,
    pub cash_dividends: Decimal,
    pub subscribed_shares: Decimal,
    pub redeemed_shares: Decimal,
    pub transaction_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CashFlowReport {
    pub fund_code: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub granularity: FlowGranularity,
    pub buckets: Vec<CashFlowBucket>,
    pub total_inflow: Decimal,
    pub total_outflow: Decimal,
    pub net_flow: Decimal,
    pub total_cash_dividends: Decimal,
    /// Labels the classifier could not place; their rows are not counted
    pub unknown_labels: Vec<String>,
}

/// Money moving in and out of the book over `[start, end]`.
///
/// Subscriptions are inflows and redemptions outflows; cash dividends are
/// reported beside them. Forced adjustments and reinvestments move shares
/// only and count as transactions without cash.
pub fn cash_flow_analysis(
    conn: &Connection,
    fund_code: Option<&str>,
    start: NaiveDate,
    end: NaiveDate,
    granularity: FlowGranularity,
    classifier: &TransactionClassifier,
) -> Result<CashFlowReport> {
    if start > end {
        return Err(FundbookError::InvalidRange { start, end }.into());
    }
    let transactions = db::list_transactions_between(conn, start, end, fund_code)?;

    let mut buckets: BTreeMap<NaiveDate, CashFlowBucket> = BTreeMap::new();
    let mut unknown_labels: BTreeSet<String> = BTreeSet::new();
    for tx in &transactions {
        let kind = classifier.classify(&tx.transaction_type);
        if kind == TransactionKind::Unknown {
            unknown_labels.insert(tx.transaction_type.clone());
            continue;
        }
        let event = LedgerEvent::from_transaction(tx, kind);
        let period_start = granularity.bucket_start(event.date);
        let bucket = buckets.entry(period_start).or_insert_with(|| CashFlowBucket {
            period_start,
            ..Default::default()
        });
        bucket.transaction_count += 1;
        match kind {
            TransactionKind::Subscription => {
                bucket.inflow += event.amount;
                bucket.subscribed_shares += event.shares;
            }
            TransactionKind::Redemption => {
                bucket.outflow += event.amount;
                bucket.redeemed_shares += event.shares;
            }
            TransactionKind::CashDividend => bucket.cash_dividends += event.amount,
            _ => {}
        }
    }

    let buckets: Vec<CashFlowBucket> = buckets
        .into_values()
        .map(|mut b| {
            b.net_flow = b.inflow - b.outflow;
            b
        })
        .collect();
    let total_inflow: Decimal = buckets.iter().map(|b| b.inflow).sum();
    let total_outflow: Decimal = buckets.iter().map(|b| b.outflow).sum();
    debug!(
        "Cash flow {}..{}: {} transactions in {} {} buckets",
        start,
        end,
        transactions.len(),
        buckets.len(),
        granularity.as_str()
    );

    Ok(CashFlowReport {
        fund_code: fund_code.map(str::to_string),
        start,
        end,
        granularity,
        total_cash_dividends: buckets.iter().map(|b| b.cash_dividends).sum(),
        buckets,
        net_flow: total_inflow - total_outflow,
        total_inflow,
        total_outflow,
        unknown_labels: unknown_labels.into_iter().collect(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientTradingActivity {
    pub group_id: String,
    pub client_name: Option<String>,
    pub domestic_planner: Option<String>,
    pub transaction_count: usize,
    pub product_count: usize,
    pub subscription_amount: Decimal,
    pub redemption_amount: Decimal,
    /// Subscriptions plus redemptions
    pub traded_amount: Decimal,
    pub average_amount: Decimal,
    pub first_transaction: NaiveDate,
    pub last_transaction: NaiveDate,
    /// Calendar days from the first to the last transaction, inclusive
    pub active_days: i64,
    pub days_per_transaction: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradingRankingReport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub clients: Vec<ClientTradingActivity>,
    pub total_transactions: usize,
    pub total_traded_amount: Decimal,
    pub average_transactions_per_client: Option<f64>,
}

/// Rank clients by how often they traded over `[start, end]`.
///
/// Clients with fewer than `min_transactions` events are left out. Ties on
/// the count are broken by traded amount.
pub fn client_trading_ranking(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
    min_transactions: usize,
    classifier: &TransactionClassifier,
) -> Result<TradingRankingReport> {
    if start > end {
        return Err(FundbookError::InvalidRange { start, end }.into());
    }
    let transactions = db::list_transactions_between(conn, start, end, None)?;

    let mut clients = Vec::new();
    for (group_id, txs) in transactions.iter().into_group_map_by(|t| t.group_id.clone()) {
        if txs.len() < min_transactions.max(1) {
            continue;
        }
        let mut subscription_amount = Decimal::ZERO;
        let mut redemption_amount = Decimal::ZERO;
        for tx in &txs {
            let kind = classifier.classify(&tx.transaction_type);
            let event = LedgerEvent::from_transaction(tx, kind);
            match kind {
                TransactionKind::Subscription => subscription_amount += event.amount,
                TransactionKind::Redemption => redemption_amount += event.amount,
                _ => {}
            }
        }
        let (first_transaction, last_transaction) = txs
            .iter()
            .map(|t| t.confirmed_date)
            .minmax()
            .into_option()
            .unwrap_or((start, start));
        let active_days = (last_transaction - first_transaction).num_days() + 1;
        let traded_amount = subscription_amount + redemption_amount;
        let client = db::get_client(conn, &group_id)?;

        clients.push(ClientTradingActivity {
            client_name: client
                .as_ref()
                .and_then(|c| c.obscured_name.clone())
                .or_else(|| txs.iter().find_map(|t| t.client_name.clone())),
            domestic_planner: client.and_then(|c| c.domestic_planner),
            transaction_count: txs.len(),
            product_count: txs.iter().map(|t| t.product_key()).unique().count(),
            average_amount: (traded_amount / Decimal::from(txs.len())).round_dp(2),
            days_per_transaction: (active_days as f64 / txs.len() as f64 * 10.0).round() / 10.0,
            group_id,
            subscription_amount,
            redemption_amount,
            traded_amount,
            first_transaction,
            last_transaction,
            active_days,
        });
    }

    clients.sort_by(|a, b| {
        b.transaction_count
            .cmp(&a.transaction_count)
            .then_with(|| b.traded_amount.cmp(&a.traded_amount))
            .then_with(|| a.group_id.cmp(&b.group_id))
    });
    let total_transactions: usize = clients.iter().map(|c| c.transaction_count).sum();

    Ok(TradingRankingReport {
        start,
        end,
        total_traded_amount: clients.iter().map(|c| c.traded_amount).sum(),
        average_transactions_per_client: (!clients.is_empty())
            .then(|| (total_transactions as f64 / clients.len() as f64 * 10.0).round() / 10.0),
        total_transactions,
        clients,
    })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FundDividendStats {
    pub fund_code: String,
    pub fund_name: Option<String>,
    pub declared_count: usize,
    pub total_per_share: Decimal,
    pub average_per_share: Option<Decimal>,
    /// Cash actually paid to clients
    pub cash_paid: Decimal,
    pub reinvested_shares: Decimal,
    pub recipients: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MonthlyDividends {
    /// `YYYY-MM`
    pub month: String,
    pub declared_count: usize,
    pub total_per_share: Decimal,
    pub cash_paid: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct DividendReport {
    pub fund_code: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub funds: Vec<FundDividendStats>,
    pub monthly: Vec<MonthlyDividends>,
    pub declared_count: usize,
    pub total_cash_paid: Decimal,
    pub total_reinvested_shares: Decimal,
}

fn month_bucket(monthly: &mut BTreeMap<String, MonthlyDividends>, date: NaiveDate) -> &mut MonthlyDividends {
    let key = date.format("%Y-%m").to_string();
    monthly.entry(key.clone()).or_insert_with(|| MonthlyDividends {
        month: key,
        ..Default::default()
    })
}

/// Declared distributions and what clients received over `[start, end]`,
/// per fund and per month.
pub fn dividend_analysis(
    conn: &Connection,
    fund_code: Option<&str>,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<DividendReport> {
    if start > end {
        return Err(FundbookError::InvalidRange { start, end }.into());
    }
    let declared = db::list_fund_dividends_between(conn, fund_code, start, end)?;
    let received = db::list_client_dividends_between(conn, fund_code, start, end)?;

    let mut funds: BTreeMap<String, FundDividendStats> = BTreeMap::new();
    let mut monthly: BTreeMap<String, MonthlyDividends> = BTreeMap::new();
    let mut recipients: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for dividend in &declared {
        let stats = funds.entry(dividend.fund_code.clone()).or_default();
        stats.declared_count += 1;
        stats.total_per_share += dividend.dividend_per_share;

        let month = month_bucket(&mut monthly, dividend.dividend_date);
        month.declared_count += 1;
        month.total_per_share += dividend.dividend_per_share;
    }

    for dividend in &received {
        let stats = funds.entry(dividend.fund_code.clone()).or_default();
        recipients
            .entry(dividend.fund_code.clone())
            .or_default()
            .insert(dividend.group_id.clone());
        match dividend.dividend_kind {
            DividendKind::Cash => {
                let amount = dividend.confirmed_amount.unwrap_or_default();
                stats.cash_paid += amount;
                month_bucket(&mut monthly, dividend.confirmed_date).cash_paid += amount;
            }
            DividendKind::Reinvest => stats.reinvested_shares += dividend.confirmed_shares.unwrap_or_default(),
        }
    }

    let mut rows = Vec::with_capacity(funds.len());
    for (code, mut stats) in funds {
        stats.fund_name = db::get_fund(conn, &code)?.map(|f| f.fund_name);
        stats.average_per_share = (stats.declared_count > 0)
            .then(|| stats.total_per_share / Decimal::from(stats.declared_count));
        stats.recipients = recipients.get(&code).map_or(0, BTreeSet::len);
        stats.fund_code = code;
        rows.push(stats);
    }

    Ok(DividendReport {
        fund_code: fund_code.map(str::to_string),
        start,
        end,
        declared_count: declared.len(),
        total_cash_paid: rows.iter().map(|f| f.cash_paid).sum(),
        total_reinvested_shares: rows.iter().map(|f| f.reinvested_shares).sum(),
        funds: rows,
        monthly: monthly.into_values().collect(),
    })
}
