use anyhow::Result;
use rusqlite::Connection;
use tracing::warn;

use super::columns::{ColumnMap, FieldSpec, SheetRow};
use super::sheet::Sheet;
use super::validation::{ImportSummary, RowIssue};
use super::{record_outcome, ImportContext};
use crate::db::{self, Transaction, TransactionKind};
use crate::normalize::{normalize_client_id, normalize_fund_code};

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec::required("group_id", &["集团号", "客户号", "group_id"]),
    FieldSpec::optional("client_name", &["客户遮蔽姓名", "客户姓名", "client_name"]),
    FieldSpec::optional("fund_name", &["基金名称", "fund_name"]),
    FieldSpec::required(
        "transaction_type",
        &["交易类型名称", "交易类型", "业务类型", "transaction_type"],
    ),
    FieldSpec::required("confirmed_date", &["交易确认日期", "确认日期", "confirmed_date"]),
    FieldSpec::optional("confirmed_shares", &["确认份额", "confirmed_shares"]),
    FieldSpec::optional("confirmed_amount", &["确认金额", "确认金额(原币)", "confirmed_amount"]),
    FieldSpec::optional("transaction_fee", &["手续费", "交易费用", "transaction_fee", "fee"]),
    FieldSpec::optional("product_code", &["产品代码", "基金代码", "product_code"]),
    FieldSpec::optional("product_name", &["产品名称", "product_name"]),
];

fn parse_row(row: &SheetRow) -> Result<Transaction, RowIssue> {
    Ok(Transaction {
        id: None,
        group_id: normalize_client_id(&row.required_text("group_id")?),
        client_name: row.text("client_name"),
        fund_name: row.text("fund_name"),
        transaction_type: row.required_text("transaction_type")?,
        confirmed_date: row.required_date("confirmed_date")?,
        confirmed_shares: row.decimal("confirmed_shares")?,
        confirmed_amount: row.decimal("confirmed_amount")?,
        transaction_fee: row.decimal("transaction_fee")?,
        product_code: row.text("product_code").map(|c| normalize_fund_code(&c)),
        product_name: row.text("product_name"),
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

        let tx = match parse_row(&row) {
            Ok(tx) => tx,
            Err(issue) => {
                summary.reject(issue);
                continue;
            }
        };

        if ctx.classifier.classify(&tx.transaction_type) == TransactionKind::Unknown {
            warn!(
                "Row {}: unclassified transaction type '{}' queued for review",
                row.number, tx.transaction_type
            );
            db::classification::record_unknown_label(conn, &tx.transaction_type, tx.confirmed_date)?;
            summary.queued_for_review += 1;
        }

        if db::ensure_client(conn, &tx.group_id, tx.client_name.as_deref(), None)? {
            summary.auto_created += 1;
        }

        let outcome = db::upsert_transaction(conn, &tx, ctx.options.allow_override)?;
        let key = format!("{} {} {}", tx.group_id, tx.transaction_type, tx.confirmed_date);
        record_outcome(summary, outcome, row.number, "transaction", &key);
    }
    Ok(())
}
