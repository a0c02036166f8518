use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use super::Context;
use crate::cli::formatters::{heading, info_line, print_json, render_table, signed_pct, summary_line};
use crate::cli::{FilterArgs, PerformanceCommands};
use crate::normalize::normalize_fund_code;
use crate::reports::{self, seasonal::SeasonalBucket, FundFilter, RiskParameters};
use crate::utils::{format_amount, format_currency, format_nav, format_optional_currency, format_pct, format_shares};

impl From<FilterArgs> for FundFilter {
    fn from(args: FilterArgs) -> Self {
        FundFilter {
            search: args.search,
            main_strategy: args.main,
            sub_strategy: args.sub,
        }
    }
}

fn strategy_label(main: Option<&str>, sub: Option<&str>) -> String {
    match (main, sub) {
        (Some(main), Some(sub)) => format!("{} / {}", main, sub),
        (Some(main), None) => main.to_string(),
        _ => "-".to_string(),
    }
}

pub async fn dispatch_performance(ctx: &Context, action: PerformanceCommands) -> Result<()> {
    match action {
        PerformanceCommands::Weekly { filter, days, at } => {
            let report = reports::fund_stage_performance(&ctx.conn, ctx.as_of(at), days, &filter.into())?;
            if ctx.json {
                return print_json(&report);
            }
            if report.funds.is_empty() {
                println!(
                    "\n{}\n",
                    info_line(&format!("No fund has a NAV within {} day(s) of {}", days, report.as_of))
                );
                return Ok(());
            }

            #[derive(Tabled)]
            struct StageRow {
                #[tabled(rename = "Fund")]
                fund: String,
                #[tabled(rename = "Strategy")]
                strategy: String,
                #[tabled(rename = "NAV Date")]
                nav_date: String,
                #[tabled(rename = "NAV")]
                nav: String,
                #[tabled(rename = "Previous")]
                previous: String,
                #[tabled(rename = "Weekly")]
                weekly: String,
                #[tabled(rename = "YTD")]
                ytd: String,
            }

            let rows: Vec<StageRow> = report
                .funds
                .iter()
                .map(|f| StageRow {
                    fund: format!("{} {}", f.fund_code, f.fund_name),
                    strategy: strategy_label(f.main_strategy.as_deref(), f.sub_strategy.as_deref()),
                    nav_date: f.latest_nav_date.to_string(),
                    nav: format_nav(Some(f.latest_nav)),
                    previous: match (f.previous_nav, f.previous_nav_date) {
                        (Some(nav), Some(date)) => format!("{} ({})", format_nav(Some(nav)), date),
                        _ => "-".to_string(),
                    },
                    weekly: signed_pct(f.weekly_return),
                    ytd: signed_pct(f.ytd_return),
                })
                .collect();

            println!("{}", heading(&format!("Fund performance as of {}", report.as_of)));
            println!("{}", render_table(&rows, 3));

            let stats = &report.statistics;
            println!();
            println!("{}", summary_line("Funds", stats.total));
            println!(
                "{}",
                summary_line(
                    "Rising / falling / flat",
                    format!(
                        "{} / {} / {}",
                        stats.rising.to_string().green(),
                        stats.falling.to_string().red(),
                        stats.flat
                    )
                )
            );
            println!("{}", summary_line("Average weekly return", signed_pct(stats.average_weekly_return)));
            Ok(())
        }
        PerformanceCommands::Period { from, to, filter } => {
            let funds = reports::fund_period_performance(&ctx.conn, from, to, &filter.into())?;
            if ctx.json {
                return print_json(&funds);
            }
            if funds.is_empty() {
                println!("\n{}\n", info_line(&format!("No fund has NAVs covering {} to {}", from, to)));
                return Ok(());
            }

            #[derive(Tabled)]
            struct PeriodRow {
                #[tabled(rename = "Fund")]
                fund: String,
                #[tabled(rename = "Strategy")]
                strategy: String,
                #[tabled(rename = "Start")]
                start: String,
                #[tabled(rename = "End")]
                end: String,
                #[tabled(rename = "Return")]
                period_return: String,
            }

            let rows: Vec<PeriodRow> = funds
                .iter()
                .map(|f| PeriodRow {
                    fund: format!("{} {}", f.fund_code, f.fund_name),
                    strategy: strategy_label(f.main_strategy.as_deref(), f.sub_strategy.as_deref()),
                    start: format!("{} ({})", format_nav(Some(f.start_nav)), f.start_nav_date),
                    end: format!("{} ({})", format_nav(Some(f.end_nav)), f.end_nav_date),
                    period_return: signed_pct(f.period_return),
                })
                .collect();
            println!("{}", heading(&format!("Fund performance {} to {}", from, to)));
            println!("{}", render_table(&rows, 2));
            Ok(())
        }
        PerformanceCommands::Risk { filter, days, at } => {
            let settings = &ctx.config.performance;
            let params = RiskParameters {
                period_days: days.unwrap_or(settings.default_period_days),
                risk_free_rate: settings.risk_free_rate,
                trading_days: settings.trading_days,
            };
            let as_of = ctx.as_of(at);
            let funds = reports::fund_risk_metrics(&ctx.conn, as_of, &params, &filter.into())?;
            if ctx.json {
                return print_json(&funds);
            }
            if funds.is_empty() {
                println!(
                    "\n{}\n",
                    info_line(&format!("No fund has two NAVs in the {} day(s) before {}", params.period_days, as_of))
                );
                return Ok(());
            }

            #[derive(Tabled)]
            struct RiskRow {
                #[tabled(rename = "Fund")]
                fund: String,
                #[tabled(rename = "Strategy")]
                strategy: String,
                #[tabled(rename = "NAVs")]
                nav_count: usize,
                #[tabled(rename = "Latest")]
                latest: String,
                #[tabled(rename = "Return")]
                total_return: String,
                #[tabled(rename = "Annualized")]
                annualized: String,
                #[tabled(rename = "Volatility")]
                volatility: String,
                #[tabled(rename = "Sharpe")]
                sharpe: String,
                #[tabled(rename = "Max Drawdown")]
                drawdown: String,
                #[tabled(rename = "Clients")]
                clients: usize,
                #[tabled(rename = "Market Value")]
                market_value: String,
            }

            let rows: Vec<RiskRow> = funds
                .iter()
                .map(|f| RiskRow {
                    fund: format!("{} {}", f.fund_code, f.fund_name),
                    strategy: strategy_label(f.main_strategy.as_deref(), f.sub_strategy.as_deref()),
                    nav_count: f.nav_count,
                    latest: format!("{} ({})", format_nav(Some(f.latest_nav)), f.end_nav_date),
                    total_return: signed_pct(f.total_return),
                    annualized: signed_pct(f.annualized_return),
                    volatility: format_pct(f.volatility),
                    sharpe: f.sharpe_ratio.map(|s| format!("{:.3}", s)).unwrap_or_else(|| "-".to_string()),
                    drawdown: format_pct(f.max_drawdown),
                    clients: f.client_count,
                    market_value: format_optional_currency(f.market_value),
                })
                .collect();
            println!(
                "{}",
                heading(&format!("Fund risk over {} day(s) to {}", params.period_days, as_of))
            );
            println!("{}", render_table(&rows, 2));
            println!();
            println!(
                "{}",
                summary_line("Risk-free rate", format!("{:.2}%", params.risk_free_rate * 100.0))
            );
            Ok(())
        }
    }
}

#[derive(Tabled)]
struct BucketRow {
    #[tabled(rename = "Period")]
    label: String,
    #[tabled(rename = "Snapshots")]
    count: usize,
    #[tabled(rename = "Total Cost")]
    total_cost: String,
    #[tabled(rename = "Average Cost")]
    average_cost: String,
    #[tabled(rename = "Shares")]
    total_shares: String,
}

fn bucket_rows(buckets: &[SeasonalBucket]) -> Vec<BucketRow> {
    buckets
        .iter()
        .map(|b| BucketRow {
            label: b.label.clone(),
            count: b.count,
            total_cost: format_currency(b.total_cost),
            average_cost: format_amount(b.average_cost),
            total_shares: format_shares(b.total_shares),
        })
        .collect()
}

pub async fn dispatch_seasonal(ctx: &Context, fund: Option<&str>, year: Option<i32>) -> Result<()> {
    let fund = fund.map(normalize_fund_code);
    let report = reports::seasonal_analysis(&ctx.conn, fund.as_deref(), year)?;
    if ctx.json {
        return print_json(&report);
    }
    if report.monthly.is_empty() {
        println!("\n{}\n", info_line("No position snapshots match"));
        return Ok(());
    }

    let scope = match (&report.fund_code, report.year) {
        (Some(fund), Some(year)) => format!("{} in {}", fund, year),
        (Some(fund), None) => fund.clone(),
        (None, Some(year)) => year.to_string(),
        (None, None) => "all funds".to_string(),
    };
    println!("{}", heading(&format!("Seasonal analysis - {}", scope)));

    println!("{}", "By month".bold());
    println!("{}", render_table(&bucket_rows(&report.monthly), 1));
    println!("\n{}", "By quarter".bold());
    println!("{}", render_table(&bucket_rows(&report.quarterly), 1));
    if report.yearly.len() > 1 {
        println!("\n{}", "By year".bold());
        println!("{}", render_table(&bucket_rows(&report.yearly), 1));
    }

    println!();
    if let Some(month) = &report.peak_month {
        println!("{}", summary_line("Peak month", month));
    }
    if let Some(quarter) = &report.peak_quarter {
        println!("{}", summary_line("Peak quarter", quarter));
    }
    let snapshots: usize = report.monthly.iter().map(|b| b.count).sum();
    println!("{}", summary_line("Snapshots", snapshots));
    Ok(())
}
