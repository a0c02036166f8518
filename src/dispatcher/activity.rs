use anyhow::Result;
use colored::Colorize;
use itertools::Itertools;
use tabled::Tabled;

use super::Context;
use crate::cli::formatters::{
    heading, info_line, print_json, render_table, signed_currency, signed_optional_currency, signed_pct,
    success_line, summary_line,
};
use crate::cli::ActivityCommands;
use crate::db;
use crate::normalize::normalize_client_id;
use crate::reports::{self, activity::ProductActivity};
use crate::utils::{format_currency, format_nav, format_optional_currency, format_pct, format_shares};

#[derive(Tabled)]
struct ProductRow {
    #[tabled(rename = "Product")]
    product: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Invested")]
    invested: String,
    #[tabled(rename = "Redeemed")]
    redeemed: String,
    #[tabled(rename = "Dividends")]
    dividends: String,
    #[tabled(rename = "Shares")]
    shares: String,
    #[tabled(rename = "NAV")]
    nav: String,
    #[tabled(rename = "Market Value")]
    market_value: String,
    #[tabled(rename = "P&L")]
    pnl: String,
    #[tabled(rename = "Return")]
    return_rate: String,
}

fn product_rows(products: &[ProductActivity]) -> Vec<ProductRow> {
    products
        .iter()
        .map(|p| ProductRow {
            product: match (&p.product_code, &p.product_name) {
                (Some(code), Some(name)) => format!("{} {}", code, name),
                _ => p.product_key.clone(),
            },
            status: p.status.label().to_string(),
            invested: format_currency(p.buy_amount),
            redeemed: format_currency(p.sell_amount),
            dividends: format_currency(p.dividend_amount),
            shares: format_shares(p.current_shares),
            nav: format_nav(p.unit_nav),
            market_value: format_optional_currency(p.market_value),
            pnl: signed_optional_currency(p.pnl),
            return_rate: signed_pct(p.return_rate),
        })
        .collect()
}

pub async fn dispatch_activity(ctx: &Context, action: ActivityCommands) -> Result<()> {
    match action {
        ActivityCommands::Analyze { group_id, at } => {
            let group_id = normalize_client_id(&group_id);
            let classifier = ctx.classifier()?;
            let report = reports::analyze_client_activity(&ctx.conn, &group_id, ctx.as_of(at), &classifier)?;
            if ctx.json {
                return print_json(&report);
            }

            let name = report.client_name.as_deref().unwrap_or("");
            println!(
                "{}",
                heading(&format!("Transaction analysis of {} {} as of {}", report.group_id, name, report.as_of))
            );

            if !report.current.is_empty() {
                println!("{}", "Current holdings".bold());
                println!("{}", render_table(&product_rows(&report.current), 2));
            }
            if !report.cleared.is_empty() {
                println!("\n{}", "Cleared products".bold());
                println!("{}", render_table(&product_rows(&report.cleared), 2));
            }

            println!();
            println!("{}", summary_line("Transactions", report.transaction_count));
            println!("{}", summary_line("Invested", format_currency(report.total_invested)));
            println!("{}", summary_line("Redeemed", format_currency(report.total_redeemed)));
            println!("{}", summary_line("Cash dividends", format_currency(report.total_dividends)));
            println!("{}", summary_line("Current market value", format_currency(report.current_market_value).cyan()));
            println!("{}", summary_line("Cumulative P&L", signed_currency(report.cumulative_pnl)));
            println!("{}", summary_line("Cumulative return", signed_pct(report.cumulative_return_rate)));
            if !report.unvalued.is_empty() {
                println!(
                    "{}",
                    info_line(&format!("No NAV for {}; left out of the totals", report.unvalued.join(", ")))
                );
            }

            let unknown: Vec<&str> = report
                .current
                .iter()
                .chain(report.cleared.iter())
                .flat_map(|p| p.unknown_labels.iter().map(String::as_str))
                .collect();
            if !unknown.is_empty() {
                println!(
                    "\n{} Unrecognized transaction labels were ignored: {}",
                    "⚠".yellow().bold(),
                    unknown.join(", ")
                );
                println!("{}", info_line("Map them with `fundbook types map <LABEL> <KIND>`"));
            }
            Ok(())
        }
        ActivityCommands::Period { group_id, from, to } => {
            let group_id = normalize_client_id(&group_id);
            let classifier = ctx.classifier()?;
            let report = reports::analyze_client_period(&ctx.conn, &group_id, from, to, &classifier)?;
            if ctx.json {
                return print_json(&report);
            }

            println!(
                "{}",
                heading(&format!("Period profit of {} from {} to {}", report.group_id, report.start, report.end))
            );
            if report.products.is_empty() {
                println!("{}\n", info_line("No holdings or activity in this window"));
                return Ok(());
            }

            #[derive(Tabled)]
            struct PeriodRow {
                #[tabled(rename = "Product")]
                product: String,
                #[tabled(rename = "Start Value")]
                start_value: String,
                #[tabled(rename = "End Value")]
                end_value: String,
                #[tabled(rename = "Net Flow")]
                net_flow: String,
                #[tabled(rename = "Dividends")]
                dividends: String,
                #[tabled(rename = "Return")]
                period_return: String,
                #[tabled(rename = "Contribution")]
                contribution: String,
            }

            let rows: Vec<PeriodRow> = report
                .products
                .iter()
                .map(|p| PeriodRow {
                    product: p.product_name.clone().unwrap_or_else(|| p.product_key.clone()),
                    start_value: format_optional_currency(p.start_market_value),
                    end_value: format_optional_currency(p.end_market_value),
                    net_flow: format_currency(p.net_cash_flow),
                    dividends: format_currency(p.dividends),
                    period_return: signed_optional_currency(p.period_return),
                    contribution: format_pct(p.contribution),
                })
                .collect();
            println!("{}", render_table(&rows, 1));

            println!();
            println!("{}", summary_line("Start value", format_currency(report.total_start_value)));
            println!("{}", summary_line("End value", format_currency(report.total_end_value)));
            println!("{}", summary_line("Period return", signed_currency(report.total_return)));
            println!("{}", summary_line("Return rate", signed_pct(report.total_return_rate)));
            if !report.unvalued.is_empty() {
                println!(
                    "{}",
                    info_line(&format!("No NAV for {}; left out of the totals", report.unvalued.join(", ")))
                );
            }
            Ok(())
        }
        ActivityCommands::Trend { group_id, at } => {
            let group_id = normalize_client_id(&group_id);
            let classifier = ctx.classifier()?;
            let report = reports::monthly_profit_trend(&ctx.conn, &group_id, ctx.as_of(at), &classifier)?;
            if ctx.json {
                return print_json(&report);
            }

            let name = report.client_name.as_deref().unwrap_or("");
            println!(
                "{}",
                heading(&format!("Monthly profit of {} {} to {}", report.group_id, name, report.as_of))
            );

            #[derive(Tabled)]
            struct MonthRow {
                #[tabled(rename = "Month")]
                month: String,
                #[tabled(rename = "Start Value")]
                start_value: String,
                #[tabled(rename = "End Value")]
                end_value: String,
                #[tabled(rename = "Net Flow")]
                net_flow: String,
                #[tabled(rename = "Dividends")]
                dividends: String,
                #[tabled(rename = "Return")]
                monthly_return: String,
                #[tabled(rename = "Cumulative")]
                cumulative: String,
            }

            let rows: Vec<MonthRow> = report
                .months
                .iter()
                .map(|m| MonthRow {
                    month: m.month.clone(),
                    start_value: format_currency(m.start_value),
                    end_value: format_currency(m.end_value),
                    net_flow: format_currency(m.net_cash_flow),
                    dividends: format_currency(m.dividends),
                    monthly_return: signed_currency(m.monthly_return).to_string(),
                    cumulative: signed_currency(m.cumulative_return).to_string(),
                })
                .collect();
            println!("{}", render_table(&rows, 1));

            println!();
            println!("{}", summary_line("Transactions", report.transaction_count));
            println!("{}", summary_line("Total return", signed_currency(report.total_return)));
            let unvalued: Vec<&str> = report
                .months
                .iter()
                .flat_map(|m| m.unvalued.iter().map(String::as_str))
                .unique()
                .collect();
            if !unvalued.is_empty() {
                println!(
                    "{}",
                    info_line(&format!("No NAV for {} in some months; left out of those months", unvalued.join(", ")))
                );
            }
            Ok(())
        }
        ActivityCommands::Purge { group_id } => {
            let group_id = normalize_client_id(&group_id);
            let removed = db::delete_client_transactions(&ctx.conn, &group_id)?;
            if ctx.json {
                return print_json(&serde_json::json!({ "group_id": group_id, "deleted": removed }));
            }
            if removed == 0 {
                println!("\n{}\n", info_line(&format!("No transactions recorded for {}", group_id)));
            } else {
                println!("\n{}", success_line(&format!("Deleted {} transaction(s) of {}", removed, group_id)));
            }
            Ok(())
        }
    }
}
