use anyhow::Result;
use chrono::{Months, NaiveDate};
use colored::Colorize;
use tabled::Tabled;

use super::Context;
use crate::cli::formatters::{heading, info_line, print_json, render_table, signed_currency, summary_line};
use crate::cli::{TradeCommands, WindowArgs};
use crate::normalize::normalize_fund_code;
use crate::reports;
use crate::utils::{format_amount, format_currency, format_shares};

/// `--to` defaults to today and `--from` to a year before it
fn resolve_window(ctx: &Context, window: WindowArgs) -> (NaiveDate, NaiveDate) {
    let end = window.to.unwrap_or(ctx.today);
    let start = window
        .from
        .unwrap_or_else(|| end.checked_sub_months(Months::new(12)).unwrap_or(end));
    (start, end)
}

fn scope_label(fund: Option<&str>) -> String {
    fund.map(str::to_string).unwrap_or_else(|| "all funds".to_string())
}

pub async fn dispatch_trade(ctx: &Context, action: TradeCommands) -> Result<()> {
    match action {
        TradeCommands::Flow { fund, window, period } => {
            let fund = fund.as_deref().map(normalize_fund_code);
            let (start, end) = resolve_window(ctx, window);
            let classifier = ctx.classifier()?;
            let report = reports::cash_flow_analysis(&ctx.conn, fund.as_deref(), start, end, period, &classifier)?;
            if ctx.json {
                return print_json(&report);
            }

            println!(
                "{}",
                heading(&format!(
                    "{} cash flow of {} from {} to {}",
                    capitalize(report.granularity.as_str()),
                    scope_label(report.fund_code.as_deref()),
                    report.start,
                    report.end
                ))
            );
            if report.buckets.is_empty() {
                println!("{}\n", info_line("No transactions or dividends in this window"));
                return Ok(());
            }

            #[derive(Tabled)]
            struct FlowRow {
                #[tabled(rename = "Period")]
                period: String,
                #[tabled(rename = "Transactions")]
                count: usize,
                #[tabled(rename = "Inflow")]
                inflow: String,
                #[tabled(rename = "Outflow")]
                outflow: String,
                #[tabled(rename = "Net")]
                net: String,
                #[tabled(rename = "Cash Dividends")]
                dividends: String,
            }

            let rows: Vec<FlowRow> = report
                .buckets
                .iter()
                .map(|b| FlowRow {
                    period: b.period_start.to_string(),
                    count: b.transaction_count,
                    inflow: format_currency(b.inflow),
                    outflow: format_currency(b.outflow),
                    net: signed_currency(b.net_flow).to_string(),
                    dividends: format_currency(b.cash_dividends),
                })
                .collect();
            println!("{}", render_table(&rows, 1));

            println!();
            println!("{}", summary_line("Inflow", format_currency(report.total_inflow)));
            println!("{}", summary_line("Outflow", format_currency(report.total_outflow)));
            println!("{}", summary_line("Net flow", signed_currency(report.net_flow)));
            println!("{}", summary_line("Cash dividends", format_currency(report.total_cash_dividends)));
            if !report.unknown_labels.is_empty() {
                println!(
                    "\n{} Unrecognized transaction labels were ignored: {}",
                    "⚠".yellow().bold(),
                    report.unknown_labels.join(", ")
                );
            }
            Ok(())
        }
        TradeCommands::Clients { window, min, top } => {
            let (start, end) = resolve_window(ctx, window);
            let classifier = ctx.classifier()?;
            let mut report = reports::client_trading_ranking(&ctx.conn, start, end, min, &classifier)?;
            if let Some(top) = top {
                report.clients.truncate(top);
            }
            if ctx.json {
                return print_json(&report);
            }

            println!("{}", heading(&format!("Client trading activity from {} to {}", start, end)));
            if report.clients.is_empty() {
                println!("{}\n", info_line(&format!("No client has {} or more transactions", min)));
                return Ok(());
            }

            #[derive(Tabled)]
            struct ClientRow {
                #[tabled(rename = "#")]
                rank: usize,
                #[tabled(rename = "Client")]
                client: String,
                #[tabled(rename = "Planner")]
                planner: String,
                #[tabled(rename = "Trades")]
                count: usize,
                #[tabled(rename = "Products")]
                products: usize,
                #[tabled(rename = "Subscribed")]
                subscribed: String,
                #[tabled(rename = "Redeemed")]
                redeemed: String,
                #[tabled(rename = "Average")]
                average: String,
                #[tabled(rename = "Days/Trade")]
                cadence: String,
            }

            let rows: Vec<ClientRow> = report
                .clients
                .iter()
                .enumerate()
                .map(|(i, c)| ClientRow {
                    rank: i + 1,
                    client: format!("{} {}", c.group_id, c.client_name.as_deref().unwrap_or("")),
                    planner: c.domestic_planner.clone().unwrap_or_else(|| "-".to_string()),
                    count: c.transaction_count,
                    products: c.product_count,
                    subscribed: format_currency(c.subscription_amount),
                    redeemed: format_currency(c.redemption_amount),
                    average: format_amount(c.average_amount),
                    cadence: format!("{:.1}", c.days_per_transaction),
                })
                .collect();
            println!("{}", render_table(&rows, 3));

            println!();
            println!("{}", summary_line("Transactions", report.total_transactions));
            println!("{}", summary_line("Traded amount", format_currency(report.total_traded_amount)));
            if let Some(avg) = report.average_transactions_per_client {
                println!("{}", summary_line("Per client", format!("{:.1}", avg)));
            }
            Ok(())
        }
        TradeCommands::Dividends { fund, window } => {
            let fund = fund.as_deref().map(normalize_fund_code);
            let (start, end) = resolve_window(ctx, window);
            let report = reports::dividend_analysis(&ctx.conn, fund.as_deref(), start, end)?;
            if ctx.json {
                return print_json(&report);
            }

            println!(
                "{}",
                heading(&format!(
                    "Dividends of {} from {} to {}",
                    scope_label(report.fund_code.as_deref()),
                    report.start,
                    report.end
                ))
            );
            if report.funds.is_empty() {
                println!("{}\n", info_line("No dividends declared or paid in this window"));
                return Ok(());
            }

            #[derive(Tabled)]
            struct FundRow {
                #[tabled(rename = "Fund")]
                fund: String,
                #[tabled(rename = "Declared")]
                declared: usize,
                #[tabled(rename = "Per Share")]
                per_share: String,
                #[tabled(rename = "Average")]
                average: String,
                #[tabled(rename = "Cash Paid")]
                cash_paid: String,
                #[tabled(rename = "Reinvested")]
                reinvested: String,
                #[tabled(rename = "Recipients")]
                recipients: usize,
            }

            let rows: Vec<FundRow> = report
                .funds
                .iter()
                .map(|f| FundRow {
                    fund: format!("{} {}", f.fund_code, f.fund_name.as_deref().unwrap_or("")),
                    declared: f.declared_count,
                    per_share: f.total_per_share.normalize().to_string(),
                    average: f
                        .average_per_share
                        .map(|v| v.normalize().to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    cash_paid: format_currency(f.cash_paid),
                    reinvested: format_shares(f.reinvested_shares),
                    recipients: f.recipients,
                })
                .collect();
            println!("{}", render_table(&rows, 1));

            #[derive(Tabled)]
            struct MonthRow {
                #[tabled(rename = "Month")]
                month: String,
                #[tabled(rename = "Declared")]
                declared: usize,
                #[tabled(rename = "Per Share")]
                per_share: String,
                #[tabled(rename = "Cash Paid")]
                cash_paid: String,
            }

            let months: Vec<MonthRow> = report
                .monthly
                .iter()
                .map(|m| MonthRow {
                    month: m.month.clone(),
                    declared: m.declared_count,
                    per_share: m.total_per_share.normalize().to_string(),
                    cash_paid: format_currency(m.cash_paid),
                })
                .collect();
            println!("\n{}", "By month".bold());
            println!("{}", render_table(&months, 1));

            println!();
            println!("{}", summary_line("Declarations", report.declared_count));
            println!("{}", summary_line("Cash paid", format_currency(report.total_cash_paid)));
            println!("{}", summary_line("Reinvested shares", format_shares(report.total_reinvested_shares)));
            Ok(())
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
