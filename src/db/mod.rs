// Database module - SQLite connection, models and queries

pub mod classification;
pub mod models;
pub mod projects;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

use crate::normalize::decimal_key;
pub use models::{
    Client, ClientDividend, DividendKind, Fund, FundDividend, NavRecord, Position,
    ProjectHoldingAsset, ProjectHoldingIndustry, RatioType, ReviewItem, ShareEffect, Strategy,
    Transaction, TransactionKind,
};

/// Result of an insert-or-update against a natural key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    /// The key already existed and overriding was not allowed.
    Duplicate,
}

/// Get the default database path (~/.fundbook/data.db)
pub fn get_default_db_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("FUNDBOOK_DB") {
        return Ok(PathBuf::from(path));
    }

    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let data_dir = PathBuf::from(home).join(".fundbook");

    std::fs::create_dir_all(&data_dir).context("Failed to create .fundbook directory")?;

    Ok(data_dir.join("data.db"))
}

/// Open database connection
pub fn open_db(db_path: Option<PathBuf>) -> Result<Connection> {
    let path = match db_path {
        Some(path) => path,
        None => get_default_db_path()?,
    };
    let conn = Connection::open(&path).context(format!("Failed to open database at {:?}", path))?;

    conn.execute("PRAGMA foreign_keys = ON", [])
        .context("Failed to enable foreign keys")?;

    Ok(conn)
}

/// Initialize the database with schema
///
/// The schema is idempotent, so this is safe to run on every start.
pub fn init_database(db_path: Option<PathBuf>) -> Result<()> {
    let path = match db_path {
        Some(path) => path,
        None => get_default_db_path()?,
    };

    info!("Initializing database at: {:?}", path);

    let conn = open_db(Some(path))?;
    apply_schema(&conn)?;

    info!("Database initialized successfully");
    Ok(())
}

/// Run the schema script against an open connection
pub fn apply_schema(conn: &Connection) -> Result<()> {
    let schema_sql = include_str!("schema.sql");
    conn.execute_batch(schema_sql)
        .context("Failed to execute schema")?;
    Ok(())
}

/// Helper to read Decimal from SQLite (handles both INTEGER, REAL and TEXT)
pub fn get_decimal_value(row: &rusqlite::Row, idx: usize) -> Result<Decimal, rusqlite::Error> {
    get_optional_decimal_value(row, idx)?.ok_or(rusqlite::Error::InvalidColumnType(
        idx,
        "decimal".to_string(),
        rusqlite::types::Type::Null,
    ))
}

/// Helper to read optional Decimal from SQLite
pub fn get_optional_decimal_value(
    row: &rusqlite::Row,
    idx: usize,
) -> Result<Option<Decimal>, rusqlite::Error> {
    use rusqlite::types::ValueRef;

    match row.get_ref(idx)? {
        ValueRef::Null => Ok(None),
        ValueRef::Text(bytes) => {
            let s = std::str::from_utf8(bytes)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            Decimal::from_str(s)
                .map(Some)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
        }
        ValueRef::Integer(i) => Ok(Some(Decimal::from(i))),
        ValueRef::Real(f) => Decimal::try_from(f)
            .map(Some)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e))),
        ValueRef::Blob(_) => Ok(None),
    }
}

fn dec_param(value: Option<Decimal>) -> Option<String> {
    value.map(decimal_key)
}

// ---------------------------------------------------------------------------
// Funds
// ---------------------------------------------------------------------------

pub fn get_fund(conn: &Connection, fund_code: &str) -> Result<Option<Fund>> {
    let fund = conn
        .query_row(
            "SELECT fund_code, fund_name FROM funds WHERE fund_code = ?1",
            [fund_code],
            |row| {
                Ok(Fund {
                    fund_code: row.get(0)?,
                    fund_name: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(fund)
}

pub fn list_funds(conn: &Connection) -> Result<Vec<Fund>> {
    let mut stmt = conn.prepare("SELECT fund_code, fund_name FROM funds ORDER BY fund_code")?;
    let funds = stmt
        .query_map([], |row| {
            Ok(Fund {
                fund_code: row.get(0)?,
                fund_name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(funds)
}

/// Make sure a fund exists, creating it with a placeholder name if needed.
///
/// A real name replaces a placeholder name. Returns true when the fund was
/// created.
pub fn ensure_fund(conn: &Connection, fund_code: &str, fund_name: Option<&str>) -> Result<bool> {
    let name = fund_name.map(str::trim).filter(|n| !n.is_empty());

    match get_fund(conn, fund_code)? {
        Some(existing) => {
            if let Some(name) = name {
                if models::is_placeholder_fund_name(fund_code, &existing.fund_name) {
                    conn.execute(
                        "UPDATE funds SET fund_name = ?2, updated_at = datetime('now') WHERE fund_code = ?1",
                        params![fund_code, name],
                    )?;
                }
            }
            Ok(false)
        }
        None => {
            let name = name
                .map(str::to_string)
                .unwrap_or_else(|| models::placeholder_fund_name(fund_code));
            conn.execute(
                "INSERT INTO funds (fund_code, fund_name) VALUES (?1, ?2)",
                params![fund_code, name],
            )?;
            info!("Created fund {} ({})", fund_code, name);
            Ok(true)
        }
    }
}

/// Delete a fund and everything it owns.
///
/// Children are removed explicitly inside one transaction; the schema's
/// ON DELETE CASCADE covers the same tables.
pub fn delete_fund(conn: &Connection, fund_code: &str) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    for table in [
        "nav_records",
        "positions",
        "strategies",
        "fund_dividends",
        "client_dividends",
    ] {
        tx.execute(
            &format!("DELETE FROM {} WHERE fund_code = ?1", table),
            [fund_code],
        )?;
    }
    let deleted = tx.execute("DELETE FROM funds WHERE fund_code = ?1", [fund_code])?;
    tx.commit()?;
    Ok(deleted > 0)
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn strategy_from_row(row: &rusqlite::Row) -> Result<Strategy, rusqlite::Error> {
    Ok(Strategy {
        id: Some(row.get(0)?),
        fund_code: row.get(1)?,
        project_name: row.get(2)?,
        main_strategy: row.get(3)?,
        sub_strategy: row.get(4)?,
        is_qd: row.get(5)?,
    })
}

pub fn get_strategy(conn: &Connection, fund_code: &str) -> Result<Option<Strategy>> {
    let strategy = conn
        .query_row(
            "SELECT id, fund_code, project_name, main_strategy, sub_strategy, is_qd
             FROM strategies WHERE fund_code = ?1",
            [fund_code],
            strategy_from_row,
        )
        .optional()?;
    Ok(strategy)
}

pub fn list_strategies(conn: &Connection) -> Result<Vec<Strategy>> {
    let mut stmt = conn.prepare(
        "SELECT id, fund_code, project_name, main_strategy, sub_strategy, is_qd
         FROM strategies ORDER BY fund_code",
    )?;
    let strategies = stmt
        .query_map([], strategy_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(strategies)
}

/// Strategies are one-to-one with funds, so a second row for a fund updates it.
pub fn upsert_strategy(conn: &Connection, strategy: &Strategy) -> Result<WriteOutcome> {
    let existing = get_strategy(conn, &strategy.fund_code)?;
    match existing {
        Some(_) => {
            conn.execute(
                "UPDATE strategies SET project_name = ?2, main_strategy = ?3, sub_strategy = ?4, is_qd = ?5
                 WHERE fund_code = ?1",
                params![
                    strategy.fund_code,
                    strategy.project_name,
                    strategy.main_strategy,
                    strategy.sub_strategy,
                    strategy.is_qd,
                ],
            )?;
            Ok(WriteOutcome::Updated)
        }
        None => {
            conn.execute(
                "INSERT INTO strategies (fund_code, project_name, main_strategy, sub_strategy, is_qd)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    strategy.fund_code,
                    strategy.project_name,
                    strategy.main_strategy,
                    strategy.sub_strategy,
                    strategy.is_qd,
                ],
            )?;
            Ok(WriteOutcome::Created)
        }
    }
}

// ---------------------------------------------------------------------------
// NAV records
// ---------------------------------------------------------------------------

fn nav_from_row(row: &rusqlite::Row) -> Result<NavRecord, rusqlite::Error> {
    Ok(NavRecord {
        id: Some(row.get(0)?),
        fund_code: row.get(1)?,
        nav_date: row.get(2)?,
        unit_nav: get_decimal_value(row, 3)?,
        accum_nav: get_decimal_value(row, 4)?,
    })
}

pub fn get_nav(conn: &Connection, fund_code: &str, nav_date: NaiveDate) -> Result<Option<NavRecord>> {
    let record = conn
        .query_row(
            "SELECT id, fund_code, nav_date, unit_nav, accum_nav
             FROM nav_records WHERE fund_code = ?1 AND nav_date = ?2",
            params![fund_code, nav_date],
            nav_from_row,
        )
        .optional()?;
    Ok(record)
}

/// Latest NAV on or before a given date
pub fn get_nav_on_or_before(
    conn: &Connection,
    fund_code: &str,
    as_of_date: NaiveDate,
) -> Result<Option<NavRecord>> {
    let record = conn
        .query_row(
            "SELECT id, fund_code, nav_date, unit_nav, accum_nav
             FROM nav_records
             WHERE fund_code = ?1 AND nav_date <= ?2
             ORDER BY nav_date DESC
             LIMIT 1",
            params![fund_code, as_of_date],
            nav_from_row,
        )
        .optional()?;
    Ok(record)
}

/// NAV records of a fund in ascending date order, optionally bounded
pub fn list_nav_records(
    conn: &Connection,
    fund_code: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<NavRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, fund_code, nav_date, unit_nav, accum_nav
         FROM nav_records
         WHERE fund_code = ?1
           AND (?2 IS NULL OR nav_date >= ?2)
           AND (?3 IS NULL OR nav_date <= ?3)
         ORDER BY nav_date ASC",
    )?;
    let records = stmt
        .query_map(params![fund_code, from, to], nav_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Insert a NAV record; an existing (fund, date) row is replaced only when
/// `allow_override` is set.
pub fn upsert_nav(conn: &Connection, record: &NavRecord, allow_override: bool) -> Result<WriteOutcome> {
    if let Some(existing) = get_nav(conn, &record.fund_code, record.nav_date)? {
        if !allow_override {
            return Ok(WriteOutcome::Duplicate);
        }
        conn.execute(
            "UPDATE nav_records SET unit_nav = ?2, accum_nav = ?3 WHERE id = ?1",
            params![
                existing.id,
                decimal_key(record.unit_nav),
                decimal_key(record.accum_nav)
            ],
        )?;
        return Ok(WriteOutcome::Updated);
    }

    conn.execute(
        "INSERT INTO nav_records (fund_code, nav_date, unit_nav, accum_nav) VALUES (?1, ?2, ?3, ?4)",
        params![
            record.fund_code,
            record.nav_date,
            decimal_key(record.unit_nav),
            decimal_key(record.accum_nav)
        ],
    )?;
    Ok(WriteOutcome::Created)
}

pub fn delete_nav(conn: &Connection, fund_code: &str, nav_date: NaiveDate) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM nav_records WHERE fund_code = ?1 AND nav_date = ?2",
        params![fund_code, nav_date],
    )?;
    Ok(deleted > 0)
}

/// Most recent NAV of every fund that has one
pub fn latest_navs(conn: &Connection) -> Result<Vec<NavRecord>> {
    let mut stmt = conn.prepare(
        "SELECT n.id, n.fund_code, n.nav_date, n.unit_nav, n.accum_nav
         FROM nav_records n
         WHERE n.nav_date = (SELECT MAX(nav_date) FROM nav_records m WHERE m.fund_code = n.fund_code)
         ORDER BY n.fund_code",
    )?;
    let records = stmt
        .query_map([], nav_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

fn client_from_row(row: &rusqlite::Row) -> Result<Client, rusqlite::Error> {
    Ok(Client {
        group_id: row.get(0)?,
        obscured_name: row.get(1)?,
        domestic_planner: row.get(2)?,
    })
}

pub fn get_client(conn: &Connection, group_id: &str) -> Result<Option<Client>> {
    let client = conn
        .query_row(
            "SELECT group_id, obscured_name, domestic_planner FROM clients WHERE group_id = ?1",
            [group_id],
            client_from_row,
        )
        .optional()?;
    Ok(client)
}

pub fn list_clients(conn: &Connection) -> Result<Vec<Client>> {
    let mut stmt = conn.prepare(
        "SELECT group_id, obscured_name, domestic_planner FROM clients ORDER BY group_id",
    )?;
    let clients = stmt
        .query_map([], client_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(clients)
}

/// Make sure a client exists. Name and planner fill in blanks on an
/// existing client but never overwrite known values. Returns true when created.
pub fn ensure_client(
    conn: &Connection,
    group_id: &str,
    obscured_name: Option<&str>,
    domestic_planner: Option<&str>,
) -> Result<bool> {
    let name = obscured_name.map(str::trim).filter(|s| !s.is_empty());
    let planner = domestic_planner.map(str::trim).filter(|s| !s.is_empty());

    if get_client(conn, group_id)?.is_some() {
        conn.execute(
            "UPDATE clients
             SET obscured_name = COALESCE(obscured_name, ?2),
                 domestic_planner = COALESCE(domestic_planner, ?3)
             WHERE group_id = ?1",
            params![group_id, name, planner],
        )?;
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO clients (group_id, obscured_name, domestic_planner) VALUES (?1, ?2, ?3)",
        params![group_id, name, planner],
    )?;
    Ok(true)
}

/// Delete a client with its positions and received dividends.
///
/// Raw transactions are kept; see [`delete_client_transactions`].
pub fn delete_client(conn: &Connection, group_id: &str) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM positions WHERE group_id = ?1", [group_id])?;
    tx.execute("DELETE FROM client_dividends WHERE group_id = ?1", [group_id])?;
    let deleted = tx.execute("DELETE FROM clients WHERE group_id = ?1", [group_id])?;
    tx.commit()?;
    Ok(deleted > 0)
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

const POSITION_COLUMNS: &str = "p.id, p.group_id, p.fund_code, p.stock_date, p.first_buy_date, \
     p.cost_with_fee, p.cost_without_fee, p.shares";

fn position_from_row(row: &rusqlite::Row) -> Result<Position, rusqlite::Error> {
    Ok(Position {
        id: Some(row.get(0)?),
        group_id: row.get(1)?,
        fund_code: row.get(2)?,
        stock_date: row.get(3)?,
        first_buy_date: row.get(4)?,
        cost_with_fee: get_optional_decimal_value(row, 5)?,
        cost_without_fee: get_optional_decimal_value(row, 6)?,
        shares: get_optional_decimal_value(row, 7)?,
    })
}

pub fn upsert_position(conn: &Connection, position: &Position, allow_override: bool) -> Result<WriteOutcome> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM positions WHERE group_id = ?1 AND fund_code = ?2 AND stock_date = ?3",
            params![position.group_id, position.fund_code, position.stock_date],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(_) if !allow_override => Ok(WriteOutcome::Duplicate),
        Some(id) => {
            conn.execute(
                "UPDATE positions
                 SET first_buy_date = ?2, cost_with_fee = ?3, cost_without_fee = ?4, shares = ?5
                 WHERE id = ?1",
                params![
                    id,
                    position.first_buy_date,
                    dec_param(position.cost_with_fee),
                    dec_param(position.cost_without_fee),
                    dec_param(position.shares),
                ],
            )?;
            Ok(WriteOutcome::Updated)
        }
        None => {
            conn.execute(
                "INSERT INTO positions
                 (group_id, fund_code, stock_date, first_buy_date, cost_with_fee, cost_without_fee, shares)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    position.group_id,
                    position.fund_code,
                    position.stock_date,
                    position.first_buy_date,
                    dec_param(position.cost_with_fee),
                    dec_param(position.cost_without_fee),
                    dec_param(position.shares),
                ],
            )?;
            Ok(WriteOutcome::Created)
        }
    }
}

/// Latest snapshot per (client, fund) with stock date on or before `as_of`.
///
/// Either filter may be omitted to scan the whole book.
pub fn latest_positions(
    conn: &Connection,
    group_id: Option<&str>,
    fund_code: Option<&str>,
    as_of: NaiveDate,
) -> Result<Vec<Position>> {
    let sql = format!(
        "SELECT {}
         FROM positions p
         WHERE (?1 IS NULL OR p.group_id = ?1)
           AND (?2 IS NULL OR p.fund_code = ?2)
           AND p.stock_date = (
               SELECT MAX(q.stock_date) FROM positions q
               WHERE q.group_id = p.group_id AND q.fund_code = p.fund_code AND q.stock_date <= ?3
           )
         ORDER BY p.group_id, p.fund_code",
        POSITION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let positions = stmt
        .query_map(params![group_id, fund_code, as_of], position_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(positions)
}

/// Every stored snapshot, optionally filtered by fund and stock-date year
pub fn list_positions(
    conn: &Connection,
    fund_code: Option<&str>,
    year: Option<i32>,
) -> Result<Vec<Position>> {
    let sql = format!(
        "SELECT {}
         FROM positions p
         WHERE (?1 IS NULL OR p.fund_code = ?1)
           AND (?2 IS NULL OR CAST(substr(p.stock_date, 1, 4) AS INTEGER) = ?2)
         ORDER BY p.stock_date, p.group_id",
        POSITION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let positions = stmt
        .query_map(params![fund_code, year], position_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(positions)
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

fn transaction_from_row(row: &rusqlite::Row) -> Result<Transaction, rusqlite::Error> {
    Ok(Transaction {
        id: Some(row.get(0)?),
        group_id: row.get(1)?,
        client_name: row.get(2)?,
        fund_name: row.get(3)?,
        transaction_type: row.get(4)?,
        confirmed_date: row.get(5)?,
        confirmed_shares: get_optional_decimal_value(row, 6)?,
        confirmed_amount: get_optional_decimal_value(row, 7)?,
        transaction_fee: get_optional_decimal_value(row, 8)?,
        product_code: row.get(9)?,
        product_name: row.get(10)?,
    })
}

/// Store a transaction event.
///
/// Two events are the same when client, label, date, shares, amount and
/// product all match. A repeat is skipped unless `allow_override` is set, in
/// which case the remaining descriptive fields are refreshed.
pub fn upsert_transaction(conn: &Connection, tx: &Transaction, allow_override: bool) -> Result<WriteOutcome> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM transactions
             WHERE group_id = ?1 AND transaction_type = ?2 AND confirmed_date = ?3
               AND confirmed_shares IS ?4 AND confirmed_amount IS ?5
               AND COALESCE(product_code, fund_name, '') = COALESCE(?6, ?7, '')",
            params![
                tx.group_id,
                tx.transaction_type,
                tx.confirmed_date,
                dec_param(tx.confirmed_shares),
                dec_param(tx.confirmed_amount),
                tx.product_code,
                tx.fund_name,
            ],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(_) if !allow_override => Ok(WriteOutcome::Duplicate),
        Some(id) => {
            conn.execute(
                "UPDATE transactions
                 SET client_name = ?2, fund_name = ?3, transaction_fee = ?4, product_name = ?5
                 WHERE id = ?1",
                params![
                    id,
                    tx.client_name,
                    tx.fund_name,
                    dec_param(tx.transaction_fee),
                    tx.product_name,
                ],
            )?;
            Ok(WriteOutcome::Updated)
        }
        None => {
            conn.execute(
                "INSERT INTO transactions (
                    group_id, client_name, fund_name, transaction_type, confirmed_date,
                    confirmed_shares, confirmed_amount, transaction_fee, product_code, product_name
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    tx.group_id,
                    tx.client_name,
                    tx.fund_name,
                    tx.transaction_type,
                    tx.confirmed_date,
                    dec_param(tx.confirmed_shares),
                    dec_param(tx.confirmed_amount),
                    dec_param(tx.transaction_fee),
                    tx.product_code,
                    tx.product_name,
                ],
            )?;
            Ok(WriteOutcome::Created)
        }
    }
}

pub fn list_transactions_for_client(conn: &Connection, group_id: &str) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, group_id, client_name, fund_name, transaction_type, confirmed_date,
                confirmed_shares, confirmed_amount, transaction_fee, product_code, product_name
         FROM transactions
         WHERE group_id = ?1
         ORDER BY confirmed_date ASC, id ASC",
    )?;
    let txs = stmt
        .query_map([group_id], transaction_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(txs)
}

/// Every client's transactions confirmed within `[start, end]`, optionally
/// restricted to one product code
pub fn list_transactions_between(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
    product_code: Option<&str>,
) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, group_id, client_name, fund_name, transaction_type, confirmed_date,
                confirmed_shares, confirmed_amount, transaction_fee, product_code, product_name
         FROM transactions
         WHERE confirmed_date >= ?1 AND confirmed_date <= ?2
           AND (?3 IS NULL OR product_code = ?3)
         ORDER BY confirmed_date ASC, id ASC",
    )?;
    let txs = stmt
        .query_map(params![start, end, product_code], transaction_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(txs)
}

pub fn delete_client_transactions(conn: &Connection, group_id: &str) -> Result<usize> {
    let deleted = conn.execute("DELETE FROM transactions WHERE group_id = ?1", [group_id])?;
    Ok(deleted)
}

// ---------------------------------------------------------------------------
// Dividends
// ---------------------------------------------------------------------------

pub fn upsert_fund_dividend(
    conn: &Connection,
    dividend: &FundDividend,
    allow_override: bool,
) -> Result<WriteOutcome> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM fund_dividends WHERE fund_code = ?1 AND dividend_date = ?2",
            params![dividend.fund_code, dividend.dividend_date],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(_) if !allow_override => Ok(WriteOutcome::Duplicate),
        Some(id) => {
            conn.execute(
                "UPDATE fund_dividends
                 SET dividend_per_share = ?2, ex_dividend_date = ?3, record_date = ?4
                 WHERE id = ?1",
                params![
                    id,
                    decimal_key(dividend.dividend_per_share),
                    dividend.ex_dividend_date,
                    dividend.record_date,
                ],
            )?;
            Ok(WriteOutcome::Updated)
        }
        None => {
            conn.execute(
                "INSERT INTO fund_dividends
                 (fund_code, dividend_date, dividend_per_share, ex_dividend_date, record_date)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    dividend.fund_code,
                    dividend.dividend_date,
                    decimal_key(dividend.dividend_per_share),
                    dividend.ex_dividend_date,
                    dividend.record_date,
                ],
            )?;
            Ok(WriteOutcome::Created)
        }
    }
}

fn fund_dividend_from_row(row: &rusqlite::Row) -> Result<FundDividend, rusqlite::Error> {
    Ok(FundDividend {
        id: Some(row.get(0)?),
        fund_code: row.get(1)?,
        dividend_date: row.get(2)?,
        dividend_per_share: get_decimal_value(row, 3)?,
        ex_dividend_date: row.get(4)?,
        record_date: row.get(5)?,
    })
}

pub fn list_fund_dividends(conn: &Connection, fund_code: &str) -> Result<Vec<FundDividend>> {
    let mut stmt = conn.prepare(
        "SELECT id, fund_code, dividend_date, dividend_per_share, ex_dividend_date, record_date
         FROM fund_dividends WHERE fund_code = ?1 ORDER BY dividend_date",
    )?;
    let dividends = stmt
        .query_map([fund_code], fund_dividend_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(dividends)
}

/// Declared distributions dated within `[start, end]`
pub fn list_fund_dividends_between(
    conn: &Connection,
    fund_code: Option<&str>,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<FundDividend>> {
    let mut stmt = conn.prepare(
        "SELECT id, fund_code, dividend_date, dividend_per_share, ex_dividend_date, record_date
         FROM fund_dividends
         WHERE (?1 IS NULL OR fund_code = ?1) AND dividend_date >= ?2 AND dividend_date <= ?3
         ORDER BY dividend_date, fund_code",
    )?;
    let dividends = stmt
        .query_map(params![fund_code, start, end], fund_dividend_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(dividends)
}

/// Distributions received by clients, confirmed within `[start, end]`
pub fn list_client_dividends_between(
    conn: &Connection,
    fund_code: Option<&str>,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<ClientDividend>> {
    let mut stmt = conn.prepare(
        "SELECT id, group_id, fund_code, dividend_kind, transaction_type,
                confirmed_amount, confirmed_shares, confirmed_date
         FROM client_dividends
         WHERE (?1 IS NULL OR fund_code = ?1) AND confirmed_date >= ?2 AND confirmed_date <= ?3
         ORDER BY confirmed_date, group_id",
    )?;
    let dividends = stmt
        .query_map(params![fund_code, start, end], |row| {
            let kind: String = row.get(3)?;
            Ok(ClientDividend {
                id: Some(row.get(0)?),
                group_id: row.get(1)?,
                fund_code: row.get(2)?,
                dividend_kind: DividendKind::from_str(&kind).unwrap_or(DividendKind::Cash),
                transaction_type: row.get(4)?,
                confirmed_amount: get_optional_decimal_value(row, 5)?,
                confirmed_shares: get_optional_decimal_value(row, 6)?,
                confirmed_date: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(dividends)
}

pub fn upsert_client_dividend(
    conn: &Connection,
    dividend: &ClientDividend,
    allow_override: bool,
) -> Result<WriteOutcome> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM client_dividends
             WHERE group_id = ?1 AND fund_code = ?2 AND confirmed_date = ?3 AND dividend_kind = ?4",
            params![
                dividend.group_id,
                dividend.fund_code,
                dividend.confirmed_date,
                dividend.dividend_kind.as_str()
            ],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(_) if !allow_override => Ok(WriteOutcome::Duplicate),
        Some(id) => {
            conn.execute(
                "UPDATE client_dividends
                 SET transaction_type = ?2, confirmed_amount = ?3, confirmed_shares = ?4
                 WHERE id = ?1",
                params![
                    id,
                    dividend.transaction_type,
                    dec_param(dividend.confirmed_amount),
                    dec_param(dividend.confirmed_shares),
                ],
            )?;
            Ok(WriteOutcome::Updated)
        }
        None => {
            conn.execute(
                "INSERT INTO client_dividends (
                    group_id, fund_code, dividend_kind, transaction_type,
                    confirmed_amount, confirmed_shares, confirmed_date
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    dividend.group_id,
                    dividend.fund_code,
                    dividend.dividend_kind.as_str(),
                    dividend.transaction_type,
                    dec_param(dividend.confirmed_amount),
                    dec_param(dividend.confirmed_shares),
                    dividend.confirmed_date,
                ],
            )?;
            Ok(WriteOutcome::Created)
        }
    }
}

/// Cash dividends a client received from a fund, confirmed within
/// `[from, to]` (`from = None` means since inception).
pub fn sum_cash_dividends(
    conn: &Connection,
    group_id: &str,
    fund_code: &str,
    from: Option<NaiveDate>,
    to: NaiveDate,
) -> Result<Decimal> {
    let mut stmt = conn.prepare(
        "SELECT confirmed_amount FROM client_dividends
         WHERE group_id = ?1 AND fund_code = ?2 AND dividend_kind = 'CASH'
           AND (?3 IS NULL OR confirmed_date >= ?3)
           AND confirmed_date <= ?4",
    )?;
    let amounts = stmt
        .query_map(params![group_id, fund_code, from, to], |row| {
            get_optional_decimal_value(row, 0)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(amounts.into_iter().flatten().sum())
}

// ---------------------------------------------------------------------------
// Import log
// ---------------------------------------------------------------------------

pub fn record_import(
    conn: &Connection,
    file_hash: &str,
    file_name: &str,
    kind: &str,
    success_count: usize,
    failure_count: usize,
) -> Result<()> {
    conn.execute(
        "INSERT INTO import_log (file_hash, file_name, kind, success_count, failure_count)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            file_hash,
            file_name,
            kind,
            success_count as i64,
            failure_count as i64
        ],
    )?;
    Ok(())
}

/// When this exact file content was last imported as `kind`, if ever
pub fn last_import_of(conn: &Connection, file_hash: &str, kind: &str) -> Result<Option<String>> {
    let imported_at = conn
        .query_row(
            "SELECT imported_at FROM import_log WHERE file_hash = ?1 AND kind = ?2
             ORDER BY id DESC LIMIT 1",
            params![file_hash, kind],
            |row| row.get(0),
        )
        .optional()?;
    Ok(imported_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        apply_schema(&conn).unwrap();
        conn
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn nav(code: &str, day: NaiveDate, unit: Decimal) -> NavRecord {
        NavRecord {
            id: None,
            fund_code: code.into(),
            nav_date: day,
            unit_nav: unit,
            accum_nav: unit,
        }
    }

    #[test]
    fn test_placeholder_fund_name_is_upgraded_once() {
        let conn = memory_db();
        assert!(ensure_fund(&conn, "L03126", None).unwrap());
        assert_eq!(get_fund(&conn, "L03126").unwrap().unwrap().fund_name, "Fund L03126");

        assert!(!ensure_fund(&conn, "L03126", Some("Alpha Growth")).unwrap());
        assert_eq!(get_fund(&conn, "L03126").unwrap().unwrap().fund_name, "Alpha Growth");

        ensure_fund(&conn, "L03126", Some("Renamed")).unwrap();
        assert_eq!(get_fund(&conn, "L03126").unwrap().unwrap().fund_name, "Alpha Growth");
    }

    #[test]
    fn test_nav_duplicate_requires_override() {
        let conn = memory_db();
        ensure_fund(&conn, "F1", None).unwrap();
        let d = date(2025, 8, 15);

        assert_eq!(upsert_nav(&conn, &nav("F1", d, dec!(1.2)), false).unwrap(), WriteOutcome::Created);
        assert_eq!(upsert_nav(&conn, &nav("F1", d, dec!(1.3)), false).unwrap(), WriteOutcome::Duplicate);
        assert_eq!(get_nav(&conn, "F1", d).unwrap().unwrap().unit_nav, dec!(1.2));

        assert_eq!(upsert_nav(&conn, &nav("F1", d, dec!(1.3)), true).unwrap(), WriteOutcome::Updated);
        assert_eq!(get_nav(&conn, "F1", d).unwrap().unwrap().unit_nav, dec!(1.3));
    }

    #[test]
    fn test_nav_as_of_lookup() {
        let conn = memory_db();
        ensure_fund(&conn, "F1", None).unwrap();
        upsert_nav(&conn, &nav("F1", date(2025, 7, 1), dec!(1.00)), false).unwrap();
        upsert_nav(&conn, &nav("F1", date(2025, 7, 8), dec!(1.10)), false).unwrap();

        assert!(get_nav_on_or_before(&conn, "F1", date(2025, 6, 30)).unwrap().is_none());
        let mid = get_nav_on_or_before(&conn, "F1", date(2025, 7, 5)).unwrap().unwrap();
        assert_eq!(mid.unit_nav, dec!(1.00));
        let last = get_nav_on_or_before(&conn, "F1", date(2025, 12, 31)).unwrap().unwrap();
        assert_eq!(last.nav_date, date(2025, 7, 8));
    }

    #[test]
    fn test_latest_positions_picks_newest_snapshot() {
        let conn = memory_db();
        ensure_fund(&conn, "F1", None).unwrap();
        ensure_client(&conn, "000000001", Some("Z*"), None).unwrap();
        for (day, shares) in [(date(2025, 6, 30), dec!(100)), (date(2025, 7, 31), dec!(150))] {
            let position = Position {
                id: None,
                group_id: "000000001".into(),
                fund_code: "F1".into(),
                stock_date: day,
                first_buy_date: None,
                cost_with_fee: None,
                cost_without_fee: None,
                shares: Some(shares),
            };
            upsert_position(&conn, &position, false).unwrap();
        }

        let july = latest_positions(&conn, Some("000000001"), None, date(2025, 7, 31)).unwrap();
        assert_eq!(july.len(), 1);
        assert_eq!(july[0].shares, Some(dec!(150)));

        let june = latest_positions(&conn, None, Some("F1"), date(2025, 7, 15)).unwrap();
        assert_eq!(june[0].shares, Some(dec!(100)));
    }

    #[test]
    fn test_delete_fund_cascades() {
        let conn = memory_db();
        ensure_fund(&conn, "F1", None).unwrap();
        ensure_client(&conn, "000000001", None, None).unwrap();
        upsert_nav(&conn, &nav("F1", date(2025, 7, 1), dec!(1)), false).unwrap();
        let position = Position {
            id: None,
            group_id: "000000001".into(),
            fund_code: "F1".into(),
            stock_date: date(2025, 7, 1),
            first_buy_date: None,
            cost_with_fee: Some(dec!(100)),
            cost_without_fee: None,
            shares: Some(dec!(100)),
        };
        upsert_position(&conn, &position, false).unwrap();

        assert!(delete_fund(&conn, "F1").unwrap());
        assert!(list_nav_records(&conn, "F1", None, None).unwrap().is_empty());
        assert!(latest_positions(&conn, None, Some("F1"), date(2025, 7, 1)).unwrap().is_empty());
        assert!(get_client(&conn, "000000001").unwrap().is_some());
        assert!(!delete_fund(&conn, "F1").unwrap());
    }

    #[test]
    fn test_cash_dividend_sum_respects_window_and_kind() {
        let conn = memory_db();
        ensure_fund(&conn, "F1", None).unwrap();
        ensure_client(&conn, "000000001", None, None).unwrap();
        let rows = [
            (date(2024, 12, 20), DividendKind::Cash, dec!(500)),
            (date(2025, 3, 20), DividendKind::Cash, dec!(700)),
            (date(2025, 6, 20), DividendKind::Reinvest, dec!(900)),
        ];
        for (day, kind, amount) in rows {
            let dividend = ClientDividend {
                id: None,
                group_id: "000000001".into(),
                fund_code: "F1".into(),
                dividend_kind: kind,
                transaction_type: "分红".into(),
                confirmed_amount: Some(amount),
                confirmed_shares: None,
                confirmed_date: day,
            };
            upsert_client_dividend(&conn, &dividend, false).unwrap();
        }

        let all = sum_cash_dividends(&conn, "000000001", "F1", None, date(2025, 12, 31)).unwrap();
        assert_eq!(all, dec!(1200));
        let ytd = sum_cash_dividends(&conn, "000000001", "F1", Some(date(2025, 1, 1)), date(2025, 12, 31))
            .unwrap();
        assert_eq!(ytd, dec!(700));
    }
}
