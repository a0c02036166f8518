//! Output formatting module for CLI display
//!
//! Keeps presentation apart from the report calculations: reports hand back
//! plain structs, these helpers turn them into tables, colored figures or JSON.

use anyhow::Result;
use colored::{ColoredString, Colorize};
use rust_decimal::Decimal;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Style},
    Table, Tabled,
};

use crate::importers::{BatchSummary, ImportSummary};
use crate::reports::Distribution;
use crate::utils::{format_currency, format_pct};

/// Pretty JSON for `--json` output
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Rounded table with every column from `first_numeric` on right-aligned
pub fn render_table<T: Tabled>(rows: &[T], first_numeric: usize) -> String {
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    table.modify(Columns::new(first_numeric..), Alignment::right());
    table.to_string()
}

/// Green for gains, red for losses
pub fn signed_currency(value: Decimal) -> ColoredString {
    let text = format_currency(value);
    if value >= Decimal::ZERO {
        text.green()
    } else {
        text.red()
    }
}

pub fn signed_optional_currency(value: Option<Decimal>) -> String {
    match value {
        Some(v) => signed_currency(v).to_string(),
        None => "-".to_string(),
    }
}

pub fn signed_pct(value: Option<f64>) -> String {
    match value {
        Some(pct) if pct > 0.0 => format_pct(value).green().to_string(),
        Some(pct) if pct < 0.0 => format_pct(value).red().to_string(),
        _ => format_pct(value),
    }
}

pub fn heading(title: &str) -> String {
    format!("\n{} {}\n", "📊".cyan().bold(), title.bold())
}

pub fn info_line(message: &str) -> String {
    format!("{} {}", "ℹ".blue().bold(), message)
}

pub fn success_line(message: &str) -> String {
    format!("{} {}", "✓".green().bold(), message)
}

/// "Label: value" summary line with a fixed-width label
pub fn summary_line(label: &str, value: impl std::fmt::Display) -> String {
    format!("{:<24} {}", format!("{}:", label).bold(), value)
}

#[derive(Tabled)]
struct DistributionRow {
    #[tabled(rename = "Bucket")]
    label: String,
    #[tabled(rename = "Count")]
    count: usize,
    #[tabled(rename = "Market Value")]
    market_value: String,
    #[tabled(rename = "Share")]
    percentage: String,
}

pub fn format_distribution(title: &str, rows: &[Distribution]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    let rows: Vec<DistributionRow> = rows
        .iter()
        .map(|d| DistributionRow {
            label: d.label.clone(),
            count: d.count,
            market_value: format_currency(d.market_value),
            percentage: format_pct(d.percentage),
        })
        .collect();
    format!("\n{}\n{}\n", title.bold(), render_table(&rows, 1))
}

#[derive(Tabled)]
struct ImportRow {
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Rows")]
    rows: usize,
    #[tabled(rename = "Created")]
    created: usize,
    #[tabled(rename = "Updated")]
    updated: usize,
    #[tabled(rename = "Failed")]
    failed: usize,
    #[tabled(rename = "Auto-created")]
    auto_created: usize,
    #[tabled(rename = "Queued")]
    queued: usize,
}

/// Per-file counts followed by the rejected rows of each file
pub fn format_batch_summary(batch: &BatchSummary, max_issues: usize) -> String {
    let rows: Vec<ImportRow> = batch
        .files
        .iter()
        .map(|s| ImportRow {
            file: s.file.clone(),
            rows: s.total_rows,
            created: s.created,
            updated: s.updated,
            failed: s.failed,
            auto_created: s.auto_created,
            queued: s.queued_for_review,
        })
        .collect();

    let mut output = render_table(&rows, 1);
    for summary in &batch.files {
        output.push_str(&format_file_problems(summary, max_issues));
    }
    output
}

fn format_file_problems(summary: &ImportSummary, max_issues: usize) -> String {
    let mut output = String::new();
    if let Some(error) = &summary.file_error {
        output.push_str(&format!("\n{} {}: {}", "✗".red().bold(), summary.file, error));
        return output;
    }
    if summary.issues.is_empty() {
        return output;
    }

    output.push_str(&format!(
        "\n{} {}: {} row(s) rejected",
        "⚠".yellow().bold(),
        summary.file,
        summary.issues.len()
    ));
    for issue in summary.issues.iter().take(max_issues) {
        output.push_str(&format!("\n    {}", issue));
    }
    if summary.issues.len() > max_issues {
        output.push_str(&format!("\n    ... and {} more", summary.issues.len() - max_issues));
    }
    output
}
