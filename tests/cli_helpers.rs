#![allow(dead_code)]

use anyhow::{bail, Context, Result};
use assert_cmd::cargo;
use rust_decimal::Decimal;
use rust_xlsxwriter::Workbook;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// A cell to write into a generated workbook
pub enum Val {
    Text(&'static str),
    Num(f64),
}

pub fn t(value: &'static str) -> Val {
    Val::Text(value)
}

pub fn n(value: f64) -> Val {
    Val::Num(value)
}

/// Write a single-sheet workbook with a header row followed by `rows`.
pub fn write_workbook(path: &Path, headers: &[&str], rows: &[Vec<Val>]) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    for (col, header) in headers.iter().enumerate() {
        worksheet.write_string(0, col as u16, *header)?;
    }
    for (r, row) in rows.iter().enumerate() {
        for (col, value) in row.iter().enumerate() {
            let row_idx = (r + 1) as u32;
            match value {
                Val::Text(s) => worksheet.write_string(row_idx, col as u16, *s)?,
                Val::Num(f) => worksheet.write_number(row_idx, col as u16, *f)?,
            };
        }
    }

    workbook.save(path)?;
    Ok(())
}

pub fn nav_headers() -> [&'static str; 5] {
    ["基金代码", "产品名称", "净值日期", "单位净值", "累计净值"]
}

pub fn position_headers() -> [&'static str; 8] {
    [
        "集团号",
        "客户姓名(遮蔽)",
        "产品代码",
        "存量时间",
        "首次买入日期",
        "含费成本",
        "不含费金额",
        "持仓份额",
    ]
}

pub fn strategy_headers() -> [&'static str; 4] {
    ["产品代码", "项目名称", "大类策略", "细分策略"]
}

/// Workbooks for the L03126 scenario: two NAVs, one strategy and one
/// position of 1,000,000 shares bought at 1.2580 with cost 1,258,000.
pub fn write_l03126_files(dir: &Path) -> Result<(PathBuf, PathBuf, PathBuf)> {
    let nav = dir.join("nav.xlsx");
    write_workbook(
        &nav,
        &nav_headers(),
        &[
            vec![t("L03126"), t("Aurora Quant 1"), t("2025-07-01"), t("1.2580"), t("1.3580")],
            vec![t("L03126"), t("Aurora Quant 1"), t("2025-07-02"), t("1.2610"), t("1.3610")],
        ],
    )?;

    let strategies = dir.join("strategies.xlsx");
    write_workbook(
        &strategies,
        &strategy_headers(),
        &[vec![t("L03126"), t("Aurora"), t("股票策略"), t("量化多头")]],
    )?;

    let positions = dir.join("positions.xlsx");
    write_workbook(
        &positions,
        &position_headers(),
        &[vec![
            n(319506.0),
            t("张*"),
            t("L03126"),
            t("20250701"),
            t("2025/07/01"),
            n(1_258_000.0),
            n(1_250_000.0),
            n(1_000_000.0),
        ]],
    )?;

    Ok((nav, strategies, positions))
}

pub fn db_path(home: &TempDir) -> PathBuf {
    home.path().join(".fundbook").join("data.db")
}

pub fn base_cmd(home: &TempDir) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("fundbook"));
    cmd.env("HOME", home.path());
    cmd.env_remove("FUNDBOOK_DB");
    cmd.env_remove("FUNDBOOK_CONFIG");
    cmd.env_remove("FUNDBOOK_LOG");
    cmd.arg("--no-color");
    cmd
}

pub fn run_cmd(home: &TempDir, args: &[&str]) -> Result<Output> {
    let mut cmd = base_cmd(home);
    cmd.args(args);
    let output = cmd.output()?;
    if !output.status.success() {
        bail!(
            "command failed: {:?}\nstdout: {}\nstderr: {}",
            args,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(output)
}

pub fn run_cmd_json(home: &TempDir, args: &[&str]) -> Result<Value> {
    let mut full = vec!["--json"];
    full.extend_from_slice(args);
    let output = run_cmd(home, &full)?;
    let stdout = String::from_utf8(output.stdout)?;
    serde_json::from_str(&stdout).with_context(|| format!("stdout is not JSON: {}", stdout))
}

pub fn import_json(home: &TempDir, kind: &str, files: &[&Path]) -> Result<Value> {
    let paths: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
    let mut args = vec!["import", kind];
    args.extend(paths.iter().map(String::as_str));
    run_cmd_json(home, &args)
}

/// Decimals serialize as strings; accept plain numbers too.
pub fn decimal_from_value(value: &Value) -> Result<Decimal> {
    if let Some(s) = value.as_str() {
        return Decimal::from_str_exact(s).context("invalid decimal string");
    }
    if let Some(f) = value.as_f64() {
        return Decimal::try_from(f).context("invalid decimal number");
    }
    Err(anyhow::anyhow!("expected decimal value, got {}", value))
}
