use anyhow::Result;
use rusqlite::Connection;
use rust_decimal::Decimal;

use super::columns::{ColumnMap, FieldSpec, SheetRow};
use super::sheet::Sheet;
use super::validation::{ImportSummary, RowIssue};
use super::{record_outcome, ImportContext};
use crate::db::{self, Position};
use crate::normalize::{format_compact, normalize_client_id, normalize_fund_code};

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec::required("group_id", &["集团号", "客户号", "group_id"]),
    FieldSpec::required("fund_code", &["产品code", "产品代码", "基金代码", "fund_code"]),
    FieldSpec::required("stock_date", &["存量时间", "持仓日期", "stock_date"]),
    FieldSpec::optional("first_buy_date", &["首次买入日期", "first_buy_date"]),
    FieldSpec::optional(
        "cost_with_fee",
        &["含费成本", "¥持仓成本(含费)(二级)", "持仓成本(含费)", "cost_with_fee"],
    ),
    FieldSpec::optional(
        "cost_without_fee",
        &["不含费金额", "¥投资金额(不含费)(二级)", "投资金额(不含费)", "cost_without_fee"],
    ),
    FieldSpec::optional("shares", &["持仓份额", "持仓份额(二级)", "shares"]),
    FieldSpec::optional("client_name", &["客户姓名", "客户姓名(遮蔽)", "客户遮蔽姓名", "client_name"]),
    FieldSpec::optional("domestic_planner", &["国内理财师", "理财师", "planner"]),
];

struct PositionRow {
    position: Position,
    client_name: Option<String>,
    planner: Option<String>,
}

fn non_negative(row: &SheetRow, field: &str) -> Result<Option<Decimal>, RowIssue> {
    match row.decimal(field)? {
        Some(value) if value < Decimal::ZERO => Err(RowIssue::new(
            row.number,
            field,
            value.to_string(),
            "must not be negative",
        )),
        other => Ok(other),
    }
}

fn parse_row(row: &SheetRow) -> Result<PositionRow, RowIssue> {
    let group_id = normalize_client_id(&row.required_text("group_id")?);
    let fund_code = normalize_fund_code(&row.required_text("fund_code")?);
    let stock_date = row.required_date("stock_date")?;
    let first_buy_date = row.date("first_buy_date")?;

    if let Some(first_buy) = first_buy_date {
        if first_buy > stock_date {
            return Err(RowIssue::new(
                row.number,
                "first_buy_date",
                first_buy.to_string(),
                format!("first buy date is after the snapshot date {}", stock_date),
            ));
        }
    }

    Ok(PositionRow {
        position: Position {
            id: None,
            group_id,
            fund_code,
            stock_date,
            first_buy_date,
            cost_with_fee: non_negative(row, "cost_with_fee")?,
            cost_without_fee: non_negative(row, "cost_without_fee")?,
            shares: non_negative(row, "shares")?,
        },
        client_name: row.text("client_name"),
        planner: row.text("domestic_planner"),
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
        let position = &parsed.position;

        if db::ensure_fund(conn, &position.fund_code, None)? {
            summary.auto_created += 1;
        }
        if db::ensure_client(
            conn,
            &position.group_id,
            parsed.client_name.as_deref(),
            parsed.planner.as_deref(),
        )? {
            summary.auto_created += 1;
        }

        let outcome = db::upsert_position(conn, position, ctx.options.allow_override)?;
        let key = format!(
            "{}/{}@{}",
            position.group_id,
            position.fund_code,
            format_compact(position.stock_date)
        );
        record_outcome(summary, outcome, row.number, "stock_date", &key);
    }
    Ok(())
}
