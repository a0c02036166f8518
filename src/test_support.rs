//! Fixtures shared by unit tests.

use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::db::{self, ClientDividend, DividendKind, FundDividend, NavRecord, Position, Strategy, Transaction};
use crate::importers::sheet::parse_csv_content;
use crate::importers::{import_sheet, ImportContext, ImportKind, ImportOptions, ImportSummary};
use crate::ledger::TransactionClassifier;

pub fn memory_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
    db::apply_schema(&conn).unwrap();
    conn
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn add_nav(conn: &Connection, fund_code: &str, nav_date: NaiveDate, unit: Decimal) {
    db::ensure_fund(conn, fund_code, None).unwrap();
    let record = NavRecord {
        id: None,
        fund_code: fund_code.into(),
        nav_date,
        unit_nav: unit,
        accum_nav: unit,
    };
    db::upsert_nav(conn, &record, true).unwrap();
}

pub fn add_position(
    conn: &Connection,
    group_id: &str,
    fund_code: &str,
    stock_date: NaiveDate,
    shares: Decimal,
    cost_with_fee: Decimal,
) {
    db::ensure_fund(conn, fund_code, None).unwrap();
    db::ensure_client(conn, group_id, None, None).unwrap();
    let position = Position {
        id: None,
        group_id: group_id.into(),
        fund_code: fund_code.into(),
        stock_date,
        first_buy_date: None,
        cost_with_fee: Some(cost_with_fee),
        cost_without_fee: Some(cost_with_fee),
        shares: Some(shares),
    };
    db::upsert_position(conn, &position, true).unwrap();
}

pub fn add_strategy(conn: &Connection, fund_code: &str, main: &str, sub: &str, project: Option<&str>) {
    db::ensure_fund(conn, fund_code, None).unwrap();
    let strategy = Strategy {
        id: None,
        fund_code: fund_code.into(),
        project_name: project.map(str::to_string),
        main_strategy: main.into(),
        sub_strategy: sub.into(),
        is_qd: false,
    };
    db::upsert_strategy(conn, &strategy).unwrap();
}

pub fn add_cash_dividend(conn: &Connection, group_id: &str, fund_code: &str, day: NaiveDate, amount: Decimal) {
    let dividend = ClientDividend {
        id: None,
        group_id: group_id.into(),
        fund_code: fund_code.into(),
        dividend_kind: DividendKind::Cash,
        transaction_type: "现金红利".into(),
        confirmed_amount: Some(amount),
        confirmed_shares: None,
        confirmed_date: day,
    };
    db::upsert_client_dividend(conn, &dividend, true).unwrap();
}

pub fn add_fund_dividend(conn: &Connection, fund_code: &str, day: NaiveDate, per_share: Decimal) {
    db::ensure_fund(conn, fund_code, None).unwrap();
    let dividend = FundDividend {
        id: None,
        fund_code: fund_code.into(),
        dividend_date: day,
        dividend_per_share: per_share,
        ex_dividend_date: None,
        record_date: None,
    };
    db::upsert_fund_dividend(conn, &dividend, true).unwrap();
}

pub fn add_transaction(
    conn: &Connection,
    group_id: &str,
    product_code: &str,
    label: &str,
    day: NaiveDate,
    shares: Decimal,
    amount: Decimal,
) {
    let tx = Transaction {
        id: None,
        group_id: group_id.into(),
        client_name: None,
        fund_name: None,
        transaction_type: label.into(),
        confirmed_date: day,
        confirmed_shares: Some(shares),
        confirmed_amount: Some(amount),
        transaction_fee: None,
        product_code: Some(product_code.into()),
        product_name: None,
    };
    db::upsert_transaction(conn, &tx, true).unwrap();
}

/// Run one CSV through the import pipeline with default classification rules
pub fn import_csv(conn: &mut Connection, kind: ImportKind, csv: &str, today: NaiveDate) -> ImportSummary {
    let sheet = parse_csv_content(csv).unwrap();
    let options = ImportOptions::new(today);
    let classifier = TransactionClassifier::default();
    let ctx = ImportContext {
        options: &options,
        classifier: &classifier,
    };
    let mut summary = ImportSummary::new("test.csv", kind.as_str());
    import_sheet(conn, &sheet, kind, &ctx, &mut summary).unwrap();
    summary
}
