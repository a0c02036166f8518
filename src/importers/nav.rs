use anyhow::Result;
use rusqlite::Connection;
use rust_decimal::Decimal;

use super::columns::{ColumnMap, FieldSpec, SheetRow};
use super::sheet::Sheet;
use super::validation::{ImportSummary, RowIssue};
use super::{record_outcome, ImportContext};
use crate::db::{self, NavRecord};
use crate::normalize::{format_compact, normalize_fund_code};

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec::required("fund_code", &["基金代码", "产品代码", "fund_code", "code"]),
    FieldSpec::optional("fund_name", &["产品名称", "基金名称", "fund_name"]),
    FieldSpec::required("nav_date", &["净值日期", "日期", "nav_date", "date"]),
    FieldSpec::required("unit_nav", &["单位净值", "unit_nav"]),
    FieldSpec::required("accum_nav", &["累计净值", "accum_nav", "cumulative_nav"]),
];

struct NavRow {
    record: NavRecord,
    fund_name: Option<String>,
}

fn parse_row(row: &SheetRow) -> Result<NavRow, RowIssue> {
    let fund_code = normalize_fund_code(&row.required_text("fund_code")?);
    let nav_date = row.required_date("nav_date")?;
    let unit_nav = row.required_decimal("unit_nav")?;
    let accum_nav = row.required_decimal("accum_nav")?;

    if unit_nav <= Decimal::ZERO {
        return Err(RowIssue::new(
            row.number,
            "unit_nav",
            unit_nav.to_string(),
            "unit NAV must be greater than zero",
        ));
    }
    if accum_nav < unit_nav {
        return Err(RowIssue::new(
            row.number,
            "accum_nav",
            accum_nav.to_string(),
            format!("cumulative NAV must not be below unit NAV {}", unit_nav),
        ));
    }

    Ok(NavRow {
        record: NavRecord {
            id: None,
            fund_code,
            nav_date,
            unit_nav,
            accum_nav,
        },
        fund_name: row.text("fund_name"),
    })
}

pub fn import_rows(
    conn: &Connection,
    sheet: &Sheet,
    map: &ColumnMap,
    ctx: &ImportContext,
    summary: &mut ImportSummary,
) -> Result<()> {
    for row in map.data_rows(sheet) {
        summary.total_rows += 1;

        let parsed = match parse_row(&row) {
            Ok(parsed) => parsed,
            Err(issue) => {
                summary.reject(issue);
                continue;
            }
        };

        if db::ensure_fund(conn, &parsed.record.fund_code, parsed.fund_name.as_deref())? {
            summary.auto_created += 1;
        }

        let outcome = db::upsert_nav(conn, &parsed.record, ctx.options.allow_override)?;
        let key = format!(
            "{}@{}",
            parsed.record.fund_code,
            format_compact(parsed.record.nav_date)
        );
        record_outcome(summary, outcome, row.number, "nav_date", &key);
    }
    Ok(())
}
