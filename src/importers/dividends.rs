//! Fund-level dividend declarations and client-level dividend receipts.

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;

use super::columns::{ColumnMap, FieldSpec, SheetRow};
use super::sheet::Sheet;
use super::validation::{ImportSummary, RowIssue};
use super::{record_outcome, ImportContext};
use crate::db::{self, ClientDividend, DividendKind, FundDividend, TransactionKind};
use crate::normalize::{format_compact, normalize_client_id, normalize_fund_code};

pub const FUND_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("fund_code", &["基金代码", "产品代码", "fund_code"]),
    FieldSpec::required("dividend_date", &["分红日期", "分红发放日", "dividend_date"]),
    FieldSpec::required(
        "dividend_per_share",
        &["每份分红", "分红金额", "每份分红金额", "dividend_per_share"],
    ),
    FieldSpec::optional("ex_dividend_date", &["除息日", "ex_dividend_date"]),
    FieldSpec::optional("record_date", &["登记日", "权益登记日", "record_date"]),
];

pub const CLIENT_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("group_id", &["集团号", "客户号", "group_id"]),
    FieldSpec::required("fund_code", &["产品代码", "基金代码", "fund_code"]),
    FieldSpec::optional("fund_name", &["产品名称", "基金名称", "fund_name"]),
    FieldSpec::required("transaction_type", &["交易类型", "交易类型名称", "transaction_type"]),
    FieldSpec::optional(
        "confirmed_amount",
        &["确认金额(原币)", "确认金额", "confirmed_amount"],
    ),
    FieldSpec::optional("confirmed_shares", &["确认份额", "confirmed_shares"]),
    FieldSpec::required("confirmed_date", &["确认日期", "交易确认日期", "confirmed_date"]),
];

fn not_in_future(row: &SheetRow, field: &str, date: NaiveDate, today: NaiveDate) -> Result<(), RowIssue> {
    if date > today {
        return Err(RowIssue::new(
            row.number,
            field,
            date.to_string(),
            "date is in the future",
        ));
    }
    Ok(())
}

fn parse_fund_row(row: &SheetRow, today: NaiveDate) -> Result<FundDividend, RowIssue> {
    let fund_code = normalize_fund_code(&row.required_text("fund_code")?);
    let dividend_date = row.required_date("dividend_date")?;
    not_in_future(row, "dividend_date", dividend_date, today)?;

    let per_share = row.required_decimal("dividend_per_share")?;
    if per_share <= Decimal::ZERO {
        return Err(RowIssue::new(
            row.number,
            "dividend_per_share",
            per_share.to_string(),
            "dividend per share must be greater than zero",
        ));
    }

    Ok(FundDividend {
        id: None,
        fund_code,
        dividend_date,
        dividend_per_share: per_share,
        ex_dividend_date: row.date("ex_dividend_date")?,
        record_date: row.date("record_date")?,
    })
}

pub fn import_fund_rows(
    conn: &Connection,
    sheet: &Sheet,
    map: &ColumnMap,
    ctx: &ImportContext,
    summary: &mut ImportSummary,
) -> Result<()> {
    for row in map.data_rows(sheet) {
        summary.total_rows += 1;

        let dividend = match parse_fund_row(&row, ctx.options.today) {
            Ok(dividend) => dividend,
            Err(issue) => {
                summary.reject(issue);
                continue;
            }
        };

        if db::ensure_fund(conn, &dividend.fund_code, None)? {
            summary.auto_created += 1;
        }

        let outcome = db::upsert_fund_dividend(conn, &dividend, ctx.options.allow_override)?;
        let key = format!("{}@{}", dividend.fund_code, format_compact(dividend.dividend_date));
        record_outcome(summary, outcome, row.number, "dividend_date", &key);
    }
    Ok(())
}

fn parse_client_row(
    row: &SheetRow,
    ctx: &ImportContext,
) -> Result<(ClientDividend, Option<String>), RowIssue> {
    let group_id = normalize_client_id(&row.required_text("group_id")?);
    let fund_code = normalize_fund_code(&row.required_text("fund_code")?);
    let label = row.required_text("transaction_type")?;
    let confirmed_date = row.required_date("confirmed_date")?;
    not_in_future(row, "confirmed_date", confirmed_date, ctx.options.today)?;

    let dividend_kind = match ctx.classifier.classify(&label) {
        TransactionKind::CashDividend => DividendKind::Cash,
        TransactionKind::ReinvestDividend => DividendKind::Reinvest,
        _ => {
            return Err(RowIssue::new(
                row.number,
                "transaction_type",
                label,
                "not a cash or reinvested dividend",
            ))
        }
    };

    let dividend = ClientDividend {
        id: None,
        group_id,
        fund_code,
        dividend_kind,
        transaction_type: label,
        confirmed_amount: row.decimal("confirmed_amount")?,
        confirmed_shares: row.decimal("confirmed_shares")?,
        confirmed_date,
    };
    Ok((dividend, row.text("fund_name")))
}

/// Client dividends only attach to funds that are already known.
pub fn import_client_rows(
    conn: &Connection,
    sheet: &Sheet,
    map: &ColumnMap,
    ctx: &ImportContext,
    summary: &mut ImportSummary,
) -> Result<()> {
    for row in map.data_rows(sheet) {
        summary.total_rows += 1;

        let (dividend, fund_name) = match parse_client_row(&row, ctx) {
            Ok(parsed) => parsed,
            Err(issue) => {
                summary.reject(issue);
                continue;
            }
        };

        if db::get_fund(conn, &dividend.fund_code)?.is_none() {
            summary.reject(RowIssue::new(
                row.number,
                "fund_code",
                &dividend.fund_code,
                "unknown fund; import its NAV or positions first",
            ));
            continue;
        }
        db::ensure_fund(conn, &dividend.fund_code, fund_name.as_deref())?;
        if db::ensure_client(conn, &dividend.group_id, None, None)? {
            summary.auto_created += 1;
        }

        let outcome = db::upsert_client_dividend(conn, &dividend, ctx.options.allow_override)?;
        let key = format!(
            "{}/{}@{}",
            dividend.group_id,
            dividend.fund_code,
            format_compact(dividend.confirmed_date)
        );
        record_outcome(summary, outcome, row.number, "confirmed_date", &key);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importers::ImportKind;
    use crate::test_support::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fund_dividend_rules() {
        let mut conn = memory_db();
        let csv = "基金代码,分红日期,每份分红,除息日\n\
                   F1,2025-06-30,0.05,2025-06-28\n\
                   F1,2025-07-31,0,\n\
                   F1,2025-12-31,0.03,\n\
                   F1,20250630,0.06,\n";
        let summary = import_csv(&mut conn, ImportKind::FundDividends, csv, date(2025, 10, 1));

        assert_eq!(summary.created, 1);
        assert_eq!(summary.auto_created, 1);
        let reasons: Vec<&str> = summary.issues.iter().map(|i| i.reason.as_str()).collect();
        assert!(reasons[0].contains("greater than zero"));
        assert_eq!(reasons[1], "date is in the future");
        assert!(reasons[2].contains("already exists"));

        let declared = db::list_fund_dividends(&conn, "F1").unwrap();
        assert_eq!(declared.len(), 1);
        assert_eq!(declared[0].dividend_per_share, dec!(0.05));
        assert_eq!(declared[0].ex_dividend_date, Some(date(2025, 6, 28)));
    }

    #[test]
    fn test_client_dividends_need_known_fund_and_dividend_label() {
        let mut conn = memory_db();
        add_nav(&conn, "F1", date(2025, 6, 30), dec!(1.1));
        let csv = "集团号,产品代码,交易类型,确认金额,确认份额,确认日期\n\
                   1,F1,现金红利,500,,2025-06-30\n\
                   1,F1,红利再投,300,272.73,2025-06-30\n\
                   1,F1,申购,1000,909.09,2025-07-01\n\
                   1,F9,现金红利,200,,2025-06-30\n";
        let summary = import_csv(&mut conn, ImportKind::ClientDividends, csv, date(2025, 10, 1));

        assert_eq!(summary.created, 2);
        assert_eq!(summary.auto_created, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.issues[0].field, "transaction_type");
        assert_eq!(summary.issues[1].field, "fund_code");

        // Reinvested dividends add shares, not cash
        let cash = db::sum_cash_dividends(&conn, "000000001", "F1", None, date(2025, 10, 1)).unwrap();
        assert_eq!(cash, dec!(500));
    }
}
