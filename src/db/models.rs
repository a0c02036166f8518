use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Name given to funds created implicitly by an import row that only
/// carries a fund code.
pub fn placeholder_fund_name(fund_code: &str) -> String {
    format!("Fund {}", fund_code)
}

pub fn is_placeholder_fund_name(fund_code: &str, name: &str) -> bool {
    name == placeholder_fund_name(fund_code) || name.trim().is_empty()
}

/// A private fund product
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fund {
    pub fund_code: String,
    pub fund_name: String,
}

/// Strategy classification, one per fund
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: Option<i64>,
    pub fund_code: String,
    pub project_name: Option<String>,
    pub main_strategy: String,
    pub sub_strategy: String,
    pub is_qd: bool,
}

/// Daily net asset value record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavRecord {
    pub id: Option<i64>,
    pub fund_code: String,
    pub nav_date: NaiveDate,
    pub unit_nav: Decimal,
    pub accum_nav: Decimal,
}

/// Investor account keyed by group id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Client {
    pub group_id: String,
    pub obscured_name: Option<String>,
    pub domestic_planner: Option<String>,
}

/// Point-in-time holding snapshot of one client in one fund
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Option<i64>,
    pub group_id: String,
    pub fund_code: String,
    pub stock_date: NaiveDate,
    pub first_buy_date: Option<NaiveDate>,
    pub cost_with_fee: Option<Decimal>,
    pub cost_without_fee: Option<Decimal>,
    pub shares: Option<Decimal>,
}

/// Classified meaning of a transaction-type label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    Subscription,
    Redemption,
    CashDividend,
    ReinvestDividend,
    ForcedIncrease,
    ForcedDecrease,
    Unknown,
}

/// Direction in which an event moves the share balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareEffect {
    Increase,
    Decrease,
    Neutral,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 7] = [
        TransactionKind::Subscription,
        TransactionKind::Redemption,
        TransactionKind::CashDividend,
        TransactionKind::ReinvestDividend,
        TransactionKind::ForcedIncrease,
        TransactionKind::ForcedDecrease,
        TransactionKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Subscription => "SUBSCRIPTION",
            TransactionKind::Redemption => "REDEMPTION",
            TransactionKind::CashDividend => "CASH_DIVIDEND",
            TransactionKind::ReinvestDividend => "REINVEST_DIVIDEND",
            TransactionKind::ForcedIncrease => "FORCED_INCREASE",
            TransactionKind::ForcedDecrease => "FORCED_DECREASE",
            TransactionKind::Unknown => "UNKNOWN",
        }
    }

    pub fn share_effect(&self) -> ShareEffect {
        match self {
            TransactionKind::Subscription
            | TransactionKind::ReinvestDividend
            | TransactionKind::ForcedIncrease => ShareEffect::Increase,
            TransactionKind::Redemption | TransactionKind::ForcedDecrease => ShareEffect::Decrease,
            TransactionKind::CashDividend | TransactionKind::Unknown => ShareEffect::Neutral,
        }
    }
}

impl FromStr for TransactionKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "SUBSCRIPTION" | "BUY" => Ok(TransactionKind::Subscription),
            "REDEMPTION" | "SELL" => Ok(TransactionKind::Redemption),
            "CASH_DIVIDEND" => Ok(TransactionKind::CashDividend),
            "REINVEST_DIVIDEND" => Ok(TransactionKind::ReinvestDividend),
            "FORCED_INCREASE" => Ok(TransactionKind::ForcedIncrease),
            "FORCED_DECREASE" => Ok(TransactionKind::ForcedDecrease),
            "UNKNOWN" => Ok(TransactionKind::Unknown),
            _ => Err(()),
        }
    }
}

/// Raw transaction event as delivered by the transfer agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Option<i64>,
    pub group_id: String,
    pub client_name: Option<String>,
    pub fund_name: Option<String>,
    pub transaction_type: String,
    pub confirmed_date: NaiveDate,
    pub confirmed_shares: Option<Decimal>,
    pub confirmed_amount: Option<Decimal>,
    pub transaction_fee: Option<Decimal>,
    pub product_code: Option<String>,
    pub product_name: Option<String>,
}

impl Transaction {
    /// Products are keyed by code, falling back to the fund name.
    pub fn product_key(&self) -> String {
        self.product_code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .or(self.fund_name.as_deref().filter(|n| !n.trim().is_empty()))
            .or(self.product_name.as_deref().filter(|n| !n.trim().is_empty()))
            .unwrap_or("UNKNOWN")
            .to_string()
    }
}

/// Fund-level distribution declared per share
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundDividend {
    pub id: Option<i64>,
    pub fund_code: String,
    pub dividend_date: NaiveDate,
    pub dividend_per_share: Decimal,
    pub ex_dividend_date: Option<NaiveDate>,
    pub record_date: Option<NaiveDate>,
}

/// How a client received a distribution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DividendKind {
    Cash,
    Reinvest,
}

impl DividendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DividendKind::Cash => "CASH",
            DividendKind::Reinvest => "REINVEST",
        }
    }
}

impl FromStr for DividendKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CASH" => Ok(DividendKind::Cash),
            "REINVEST" => Ok(DividendKind::Reinvest),
            _ => Err(()),
        }
    }
}

/// Distribution actually received by a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientDividend {
    pub id: Option<i64>,
    pub group_id: String,
    pub fund_code: String,
    pub dividend_kind: DividendKind,
    pub transaction_type: String,
    pub confirmed_amount: Option<Decimal>,
    pub confirmed_shares: Option<Decimal>,
    pub confirmed_date: NaiveDate,
}

/// Monthly asset-class allocation of an underlying project, in percent
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectHoldingAsset {
    pub project_name: String,
    pub month: Option<NaiveDate>,
    pub a_share_ratio: Option<Decimal>,
    pub h_share_ratio: Option<Decimal>,
    pub us_share_ratio: Option<Decimal>,
    pub other_market_ratio: Option<Decimal>,
    pub global_bond_ratio: Option<Decimal>,
    pub convertible_bond_ratio: Option<Decimal>,
    pub other_ratio: Option<Decimal>,
}

impl ProjectHoldingAsset {
    /// Share of the portfolio held in equities across all markets.
    pub fn stock_total_ratio(&self) -> Decimal {
        [
            self.a_share_ratio,
            self.h_share_ratio,
            self.us_share_ratio,
            self.other_market_ratio,
        ]
        .iter()
        .flatten()
        .sum()
    }

    /// (label, ratio) pairs for every asset class.
    pub fn classes(&self) -> Vec<(&'static str, Decimal)> {
        vec![
            ("A-share", self.a_share_ratio.unwrap_or_default()),
            ("H-share", self.h_share_ratio.unwrap_or_default()),
            ("US share", self.us_share_ratio.unwrap_or_default()),
            ("Other market", self.other_market_ratio.unwrap_or_default()),
            ("Global bond", self.global_bond_ratio.unwrap_or_default()),
            ("Convertible bond", self.convertible_bond_ratio.unwrap_or_default()),
            ("Other", self.other_ratio.unwrap_or_default()),
        ]
    }
}

/// Base the industry ratios are expressed against
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RatioType {
    BasedOnStock,
    BasedOnTotal,
}

impl RatioType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RatioType::BasedOnStock => "based_on_stock",
            RatioType::BasedOnTotal => "based_on_total",
        }
    }
}

impl FromStr for RatioType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "based_on_stock" | "stock" => Ok(RatioType::BasedOnStock),
            "based_on_total" | "total" => Ok(RatioType::BasedOnTotal),
            _ => Err(()),
        }
    }
}

/// Maximum number of industries tracked per project snapshot
pub const MAX_INDUSTRIES: usize = 5;

/// Monthly top-industry breakdown of an underlying project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectHoldingIndustry {
    pub project_name: String,
    pub month: Option<NaiveDate>,
    pub ratio_type: RatioType,
    /// At most [`MAX_INDUSTRIES`] entries; ratios may be negative for net shorts.
    pub industries: Vec<(String, Decimal)>,
}

impl ProjectHoldingIndustry {
    /// Industry weights expressed against total assets.
    pub fn actual_ratios(&self, stock_total_ratio: Decimal) -> Vec<(String, Decimal)> {
        self.industries
            .iter()
            .map(|(name, ratio)| {
                let actual = match self.ratio_type {
                    RatioType::BasedOnStock => *ratio * stock_total_ratio / Decimal::ONE_HUNDRED,
                    RatioType::BasedOnTotal => *ratio,
                };
                (name.clone(), actual)
            })
            .collect()
    }
}

/// Unknown transaction label waiting for a manual mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub label: String,
    pub occurrences: i64,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
}
