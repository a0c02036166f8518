use anyhow::Result;
use rusqlite::Connection;

use super::columns::{ColumnMap, FieldSpec, SheetRow};
use super::sheet::Sheet;
use super::validation::{ImportSummary, RowIssue};
use super::{record_outcome, ImportContext};
use crate::db::{self, Strategy};
use crate::normalize::normalize_fund_code;

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec::required("fund_code", &["产品代码", "基金代码", "fund_code"]),
    FieldSpec::optional("project_name", &["项目名称", "project_name"]),
    FieldSpec::optional("fund_name", &["产品名称", "基金名称", "fund_name"]),
    FieldSpec::required("main_strategy", &["大类策略", "main_strategy"]),
    FieldSpec::required("sub_strategy", &["细分策略", "sub_strategy"]),
    FieldSpec::optional("is_qd", &["是否QD", "is_qd"]),
];

fn parse_row(row: &SheetRow) -> Result<(Strategy, Option<String>), RowIssue> {
    let strategy = Strategy {
        id: None,
        fund_code: normalize_fund_code(&row.required_text("fund_code")?),
        project_name: row.text("project_name"),
        main_strategy: row.required_text("main_strategy")?,
        sub_strategy: row.required_text("sub_strategy")?,
        is_qd: row.flag("is_qd"),
    };
    Ok((strategy, row.text("fund_name")))
}

/// Strategy rows classify existing funds; a second row for the same fund
/// replaces the classification regardless of the override flag.
pub fn import_rows(
    conn: &Connection,
    sheet: &Sheet,
    map: &ColumnMap,
    _ctx: &ImportContext,
    summary: &mut ImportSummary,
) -> Result<()> {
    for row in map.data_rows(sheet) {
        summary.total_rows += 1;

        let (strategy, fund_name) = match parse_row(&row) {
            Ok(parsed) => parsed,
            Err(issue) => {
                summary.reject(issue);
                continue;
            }
        };

        if db::get_fund(conn, &strategy.fund_code)?.is_none() {
            summary.reject(RowIssue::new(
                row.number,
                "fund_code",
                &strategy.fund_code,
                "unknown fund; import its NAV or positions first",
            ));
            continue;
        }
        db::ensure_fund(conn, &strategy.fund_code, fund_name.as_deref())?;

        let outcome = db::upsert_strategy(conn, &strategy)?;
        record_outcome(summary, outcome, row.number, "fund_code", &strategy.fund_code);
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
    fn test_strategy_rows_upsert_known_funds_only() {
        let mut conn = memory_db();
        add_nav(&conn, "L03126", date(2025, 7, 1), dec!(1.258));
        let csv = "产品代码,项目名称,产品名称,大类策略,细分策略\n\
                   L03126,Aurora,Aurora Quant 1,股票策略,量化多头\n\
                   L09999,Ghost,Ghost Fund,债券策略,纯债\n\
                   l03126,Aurora,Aurora Quant 1,股票策略,指数增强\n";
        let summary = import_csv(&mut conn, ImportKind::Strategies, csv, date(2025, 10, 1));

        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.issues[0].value, "L09999");

        let strategy = db::get_strategy(&conn, "L03126").unwrap().unwrap();
        assert_eq!(strategy.sub_strategy, "指数增强");
        assert_eq!(strategy.project_name.as_deref(), Some("Aurora"));
        assert_eq!(db::get_fund(&conn, "L03126").unwrap().unwrap().fund_name, "Aurora Quant 1");
        assert!(db::get_fund(&conn, "L09999").unwrap().is_none());
    }
}
