//! Integration tests for fundbook ingestion and reporting
//!
//! These tests drive the library against a real SQLite file:
//! - NAV duplicate rejection vs override
//! - Whole-file rejection on missing columns
//! - Per-file rollback with batch continuation
//! - Storage failures mid-file rolling back that file only
//! - The L03126 valuation scenario end to end
//! - GBK-encoded CSV transactions feeding the activity analysis

use anyhow::Result;
use chrono::NaiveDate;
use fundbook::config::AppConfig;
use fundbook::db::{self, init_database, open_db};
use fundbook::importers::{import_batch, ImportContext, ImportKind, ImportOptions};
use fundbook::ledger::TransactionClassifier;
use fundbook::reports;
use rusqlite::Connection;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use tempfile::TempDir;

mod cli_helpers;
use cli_helpers::{n, nav_headers, t, write_l03126_files, write_workbook};

/// Test helper: Create a temporary database
fn create_test_db() -> Result<(TempDir, Connection)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    init_database(Some(db_path.clone()))?;
    let conn = open_db(Some(db_path))?;
    Ok((temp_dir, conn))
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn today() -> NaiveDate {
    date(2025, 10, 1)
}

fn import(
    conn: &mut Connection,
    kind: ImportKind,
    files: &[PathBuf],
    options: &ImportOptions,
) -> Result<fundbook::importers::BatchSummary> {
    let classifier = TransactionClassifier::default();
    let ctx = ImportContext {
        options,
        classifier: &classifier,
    };
    import_batch(conn, files, kind, &ctx, |_| {})
}

#[test]
fn test_nav_duplicate_rejected_then_overridden() -> Result<()> {
    let (dir, mut conn) = create_test_db()?;

    let first = dir.path().join("nav_a.xlsx");
    write_workbook(
        &first,
        &nav_headers(),
        &[vec![t("L03126"), t("Aurora Quant 1"), t("2025-07-01"), t("1.2580"), t("1.2580")]],
    )?;
    let second = dir.path().join("nav_b.xlsx");
    write_workbook(
        &second,
        &nav_headers(),
        &[vec![t("L03126"), t("Aurora Quant 1"), t("20250701"), t("1.3000"), t("1.3000")]],
    )?;

    let options = ImportOptions::new(today());
    let batch = import(&mut conn, ImportKind::Nav, &[first.clone(), second.clone()], &options)?;
    assert_eq!(batch.files[0].created, 1);
    assert_eq!(batch.files[0].auto_created, 1);
    assert_eq!(batch.files[1].failed, 1);
    assert!(batch.files[1].issues[0].reason.contains("already exists"));
    assert_eq!(
        db::get_nav(&conn, "L03126", date(2025, 7, 1))?.unwrap().unit_nav,
        dec!(1.2580)
    );

    let mut options = ImportOptions::new(today());
    options.allow_override = true;
    let batch = import(&mut conn, ImportKind::Nav, &[second], &options)?;
    assert_eq!(batch.updated(), 1);
    assert_eq!(batch.failure_count(), 0);
    assert_eq!(
        db::get_nav(&conn, "L03126", date(2025, 7, 1))?.unwrap().unit_nav,
        dec!(1.3000)
    );

    let fund = db::get_fund(&conn, "L03126")?.unwrap();
    assert_eq!(fund.fund_name, "Aurora Quant 1");
    Ok(())
}

#[test]
fn test_missing_column_rejects_whole_file() -> Result<()> {
    let (dir, mut conn) = create_test_db()?;

    let path = dir.path().join("nav_missing.xlsx");
    write_workbook(
        &path,
        &["基金代码", "净值日期", "累计净值"],
        &[vec![t("L03126"), t("2025-07-01"), n(1.3)]],
    )?;

    let batch = import(&mut conn, ImportKind::Nav, &[path], &ImportOptions::new(today()))?;
    let summary = &batch.files[0];
    assert!(summary.is_file_failure());
    assert!(summary.file_error.as_deref().unwrap().contains("单位净值"));
    assert_eq!(summary.created, 0);
    assert!(db::list_funds(&conn)?.is_empty());
    Ok(())
}

#[test]
fn test_bad_rows_reported_and_batch_continues() -> Result<()> {
    let (dir, mut conn) = create_test_db()?;

    let unsupported = dir.path().join("notes.txt.bak");
    std::fs::write(&unsupported, "not a spreadsheet")?;

    let mixed = dir.path().join("nav_mixed.xlsx");
    write_workbook(
        &mixed,
        &nav_headers(),
        &[
            vec![t("F0001"), t("Fund One"), t("2025-07-01"), n(1.1), n(1.2)],
            vec![t("F0001"), t("Fund One"), t("2025-13-01"), n(1.1), n(1.2)],
            vec![t("F0001"), t("Fund One"), t("2025-07-03"), n(-1.0), n(1.2)],
            vec![t("F0001"), t("Fund One"), t("2025-07-04"), n(1.5), n(1.2)],
            vec![t("F0001"), t("Fund One"), t("2025-07-05"), n(1.15), n(1.25)],
        ],
    )?;

    let batch = import(
        &mut conn,
        ImportKind::Nav,
        &[unsupported, mixed],
        &ImportOptions::new(today()),
    )?;
    assert_eq!(batch.failed_files(), 1);
    assert!(batch.files[0].file_error.as_deref().unwrap().contains("unsupported file"));

    let summary = &batch.files[1];
    assert_eq!(summary.total_rows, 5);
    assert_eq!(summary.created, 2);
    assert_eq!(summary.failed, 3);
    let fields: Vec<&str> = summary.issues.iter().map(|i| i.field.as_str()).collect();
    assert_eq!(fields, vec!["nav_date", "unit_nav", "accum_nav"]);
    assert_eq!(summary.issues[0].row, 3);

    assert_eq!(db::list_nav_records(&conn, "F0001", None, None)?.len(), 2);
    Ok(())
}

#[test]
fn test_storage_error_rolls_back_file_and_batch_continues() -> Result<()> {
    let (dir, mut conn) = create_test_db()?;
    // The second F0001 NAV write hits a storage failure
    conn.execute_batch(
        "CREATE TRIGGER fail_second_f0001 BEFORE INSERT ON nav_records
         WHEN NEW.fund_code = 'F0001'
              AND EXISTS (SELECT 1 FROM nav_records WHERE fund_code = 'F0001')
         BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
    )?;

    let failing = dir.path().join("nav_failing.xlsx");
    write_workbook(
        &failing,
        &nav_headers(),
        &[
            vec![t("F0001"), t("Fund One"), t("2025-07-01"), n(1.1), n(1.2)],
            vec![t("F0001"), t("Fund One"), t("2025-07-02"), n(1.15), n(1.25)],
        ],
    )?;
    let healthy = dir.path().join("nav_healthy.xlsx");
    write_workbook(
        &healthy,
        &nav_headers(),
        &[
            vec![t("F0002"), t("Fund Two"), t("2025-07-01"), n(1.0), n(1.0)],
            vec![t("F0002"), t("Fund Two"), t("2025-07-02"), n(1.01), n(1.01)],
        ],
    )?;

    let batch = import(&mut conn, ImportKind::Nav, &[failing, healthy], &ImportOptions::new(today()))?;
    assert_eq!(batch.files.len(), 2);

    let failed = &batch.files[0];
    assert!(failed.file_error.as_deref().unwrap().contains("storage error"));
    assert_eq!(failed.created, 0);
    assert_eq!(failed.auto_created, 0);
    assert_eq!(failed.failed, 2);
    // The first row and the auto-created fund went with the rollback
    assert!(db::list_nav_records(&conn, "F0001", None, None)?.is_empty());
    assert!(db::get_fund(&conn, "F0001")?.is_none());

    let committed = &batch.files[1];
    assert!(committed.file_error.is_none());
    assert_eq!(committed.created, 2);
    assert_eq!(db::list_nav_records(&conn, "F0002", None, None)?.len(), 2);
    assert!(db::get_fund(&conn, "F0002")?.is_some());
    Ok(())
}

#[test]
fn test_dry_run_writes_nothing() -> Result<()> {
    let (dir, mut conn) = create_test_db()?;
    let (nav, _, _) = write_l03126_files(dir.path())?;

    let mut options = ImportOptions::new(today());
    options.dry_run = true;
    let batch = import(&mut conn, ImportKind::Nav, &[nav], &options)?;
    assert_eq!(batch.created(), 2);
    assert!(batch.files[0].dry_run);
    assert!(db::get_fund(&conn, "L03126")?.is_none());
    assert!(db::list_nav_records(&conn, "L03126", None, None)?.is_empty());
    Ok(())
}

#[test]
fn test_l03126_end_to_end() -> Result<()> {
    let (dir, mut conn) = create_test_db()?;
    let (nav, strategies, positions) = write_l03126_files(dir.path())?;
    let options = ImportOptions::new(today());

    import(&mut conn, ImportKind::Nav, &[nav], &options)?;
    let strategy_batch = import(&mut conn, ImportKind::Strategies, &[strategies], &options)?;
    assert_eq!(strategy_batch.created(), 1);
    let position_batch = import(&mut conn, ImportKind::Positions, &[positions], &options)?;
    assert_eq!(position_batch.created(), 1);
    assert_eq!(position_batch.files[0].auto_created, 1);

    let portfolio = reports::client_portfolio(&conn, "000319506", date(2025, 7, 2), None)?;
    assert_eq!(portfolio.positions.len(), 1);
    let position = &portfolio.positions[0];
    assert_eq!(position.main_strategy, "股票策略");
    assert_eq!(position.valuation.unit_nav, Some(dec!(1.2610)));
    assert_eq!(position.valuation.buy_nav, Some(dec!(1.25)));
    assert_eq!(position.valuation.market_value, Some(dec!(1261000)));
    assert_eq!(position.valuation.holding_return, Some(dec!(3000)));
    assert_eq!(portfolio.total_market_value, dec!(1261000));
    assert_eq!(portfolio.total_holding_return, dec!(3000));
    assert_eq!(portfolio.by_fund[0].percentage, Some(100.0));

    let holders = reports::top_holders(&conn, "L03126", date(2025, 7, 2), 10)?;
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].share_percentage, Some(100.0));

    let config = AppConfig::default();
    let concentration = reports::fund_concentration(&conn, "L03126", date(2025, 7, 2), &config.holders)?;
    assert_eq!(concentration.herfindahl_index, Some(1.0));
    assert_eq!(concentration.large.count, 1);
    Ok(())
}

#[test]
fn test_gbk_csv_transactions_feed_activity() -> Result<()> {
    let (dir, mut conn) = create_test_db()?;
    let (nav, _, _) = write_l03126_files(dir.path())?;
    let options = ImportOptions::new(today());
    import(&mut conn, ImportKind::Nav, &[nav], &options)?;

    let csv = "集团号,客户遮蔽姓名,交易类型名称,交易确认日期,确认份额,确认金额,产品代码,产品名称\n\
               319506,张*,申购,20250701,120,150.96,L03126,Aurora Quant 1\n\
               319506,张*,赎回,20250702,100,126.10,L03126,Aurora Quant 1\n\
               319506,张*,神秘调整,20250702,5,0,L03126,Aurora Quant 1\n";
    let (encoded, _, _) = encoding_rs::GBK.encode(csv);
    let path = dir.path().join("transactions.csv");
    std::fs::write(&path, &encoded)?;

    let batch = import(&mut conn, ImportKind::Transactions, &[path], &options)?;
    assert_eq!(batch.created(), 3);
    assert_eq!(batch.files[0].queued_for_review, 1);
    let queue = db::classification::list_review_queue(&conn)?;
    assert_eq!(queue[0].label, "神秘调整");

    let classifier = TransactionClassifier::default();
    let report = reports::analyze_client_activity(&conn, "000319506", date(2025, 7, 2), &classifier)?;
    assert_eq!(report.transaction_count, 3);
    assert_eq!(report.current.len(), 1);
    let product = &report.current[0];
    assert_eq!(product.current_shares, dec!(20));
    assert_eq!(product.market_value, Some(dec!(25.22)));
    assert_eq!(product.pnl, Some(dec!(0.36)));
    assert_eq!(product.unknown_labels, vec!["神秘调整".to_string()]);
    Ok(())
}
