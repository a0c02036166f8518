use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;

use crate::db::{ShareEffect, Transaction, TransactionKind};

/// Balances within this distance of zero are treated as fully redeemed
pub fn share_epsilon() -> Decimal {
    Decimal::new(1, 2)
}

/// A classified event ready for replay
#[derive(Debug, Clone)]
pub struct LedgerEvent {
    pub date: NaiveDate,
    pub kind: TransactionKind,
    pub shares: Decimal,
    pub amount: Decimal,
}

impl LedgerEvent {
    pub fn from_transaction(tx: &Transaction, kind: TransactionKind) -> Self {
        Self {
            date: tx.confirmed_date,
            kind,
            shares: tx.confirmed_shares.unwrap_or_default().abs(),
            amount: tx.confirmed_amount.unwrap_or_default().abs(),
        }
    }
}

/// Where a product stands after replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HoldingStatus {
    Holding,
    PartiallyRedeemed,
    Cleared,
}

impl HoldingStatus {
    pub fn label(&self) -> &'static str {
        match self {
            HoldingStatus::Holding => "holding",
            HoldingStatus::PartiallyRedeemed => "partially redeemed",
            HoldingStatus::Cleared => "cleared",
        }
    }
}

/// Accumulated result of replaying a product's events
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShareBalance {
    pub buy_shares: Decimal,
    pub sell_shares: Decimal,
    pub buy_amount: Decimal,
    pub sell_amount: Decimal,
    pub dividend_amount: Decimal,
    pub first_buy_date: Option<NaiveDate>,
    pub last_event_date: Option<NaiveDate>,
    pub event_count: usize,
}

impl ShareBalance {
    fn apply(&mut self, event: &LedgerEvent) {
        match event.kind.share_effect() {
            ShareEffect::Increase => {
                self.buy_shares += event.shares;
                if self.first_buy_date.map_or(true, |d| event.date < d) {
                    self.first_buy_date = Some(event.date);
                }
            }
            ShareEffect::Decrease => self.sell_shares += event.shares,
            ShareEffect::Neutral => {}
        }

        match event.kind {
            TransactionKind::Subscription => self.buy_amount += event.amount,
            TransactionKind::Redemption => self.sell_amount += event.amount,
            TransactionKind::CashDividend => self.dividend_amount += event.amount,
            _ => {}
        }

        if event.kind != TransactionKind::Unknown {
            self.last_event_date = Some(self.last_event_date.map_or(event.date, |d| d.max(event.date)));
            self.event_count += 1;
        }
    }

    /// Unclamped buy − sell difference
    pub fn raw_net_shares(&self) -> Decimal {
        self.buy_shares - self.sell_shares
    }

    /// Shares still held; dust and oversold balances collapse to zero.
    pub fn net_shares(&self) -> Decimal {
        let net = self.raw_net_shares();
        if net.abs() < share_epsilon() || net < Decimal::ZERO {
            Decimal::ZERO
        } else {
            net
        }
    }

    pub fn status(&self) -> HoldingStatus {
        if self.net_shares().is_zero() {
            HoldingStatus::Cleared
        } else if self.sell_shares > Decimal::ZERO {
            HoldingStatus::PartiallyRedeemed
        } else {
            HoldingStatus::Holding
        }
    }
}

/// Replay events up to and including `as_of` (all events when `None`).
///
/// Input order does not matter; events are replayed in confirmed-date order.
pub fn reconstruct(events: &[LedgerEvent], as_of: Option<NaiveDate>) -> ShareBalance {
    let mut ordered: Vec<&LedgerEvent> = events
        .iter()
        .filter(|e| as_of.map_or(true, |cutoff| e.date <= cutoff))
        .collect();
    ordered.sort_by_key(|e| e.date);

    let mut balance = ShareBalance::default();
    for event in ordered {
        balance.apply(event);
    }

    if balance.raw_net_shares() < -share_epsilon() {
        warn!(
            "Redemptions exceed subscriptions by {}; clamping balance to zero",
            -balance.raw_net_shares()
        );
    }

    balance
}

/// Share and cash movement around a reporting window
#[derive(Debug, Clone, Default, Serialize)]
pub struct PeriodFlows {
    /// Held at the close of the day before `start`
    pub start_shares: Decimal,
    /// Held at the close of `end`
    pub end_shares: Decimal,
    /// Subscriptions minus redemptions confirmed inside the window
    pub net_cash_flow: Decimal,
    pub subscriptions: Decimal,
    pub redemptions: Decimal,
    pub dividends: Decimal,
}

pub fn period_flows(events: &[LedgerEvent], start: NaiveDate, end: NaiveDate) -> PeriodFlows {
    let start_shares = start
        .pred_opt()
        .map(|day_before| reconstruct(events, Some(day_before)).net_shares())
        .unwrap_or_default();
    let end_shares = reconstruct(events, Some(end)).net_shares();

    let mut flows = PeriodFlows {
        start_shares,
        end_shares,
        ..Default::default()
    };
    for event in events.iter().filter(|e| e.date >= start && e.date <= end) {
        match event.kind {
            TransactionKind::Subscription => flows.subscriptions += event.amount,
            TransactionKind::Redemption => flows.redemptions += event.amount,
            TransactionKind::CashDividend => flows.dividends += event.amount,
            _ => {}
        }
    }
    flows.net_cash_flow = flows.subscriptions - flows.redemptions;
    flows
}
