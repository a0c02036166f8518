use anyhow::Result;
use colored::Colorize;
use rust_decimal::Decimal;
use tabled::Tabled;

use super::Context;
use crate::cli::formatters::{
    heading, info_line, print_json, render_table, signed_optional_currency, success_line,
    summary_line,
};
use crate::cli::{ClientCommands, FundCommands, NavCommands};
use crate::db::{self, NavRecord, WriteOutcome};
use crate::error::FundbookError;
use crate::normalize::{normalize_client_id, normalize_fund_code};
use crate::reports;
use crate::utils::{
    format_currency, format_nav, format_optional_currency, format_pct, format_shares,
};

pub async fn dispatch_nav(ctx: &Context, action: NavCommands) -> Result<()> {
    match action {
        NavCommands::Add {
            fund_code,
            date,
            unit_nav,
            accum,
            allow_override,
        } => {
            let fund_code = normalize_fund_code(&fund_code);
            let accum_nav = accum.unwrap_or(unit_nav);
            if unit_nav <= Decimal::ZERO {
                return Err(FundbookError::BusinessRule("unit NAV must be greater than zero".into()).into());
            }
            if accum_nav < unit_nav {
                return Err(FundbookError::BusinessRule(format!(
                    "cumulative NAV {} must not be below unit NAV {}",
                    accum_nav, unit_nav
                ))
                .into());
            }

            db::ensure_fund(&ctx.conn, &fund_code, None)?;
            let record = NavRecord {
                id: None,
                fund_code: fund_code.clone(),
                nav_date: date,
                unit_nav,
                accum_nav,
            };
            match db::upsert_nav(&ctx.conn, &record, allow_override)? {
                WriteOutcome::Duplicate => Err(FundbookError::BusinessRule(format!(
                    "NAV for {} on {} already exists (use --override to replace it)",
                    fund_code, date
                ))
                .into()),
                outcome => {
                    if ctx.json {
                        return print_json(&record);
                    }
                    let verb = if outcome == WriteOutcome::Created { "Recorded" } else { "Replaced" };
                    println!(
                        "\n{}",
                        success_line(&format!("{} NAV {} for {} on {}", verb, format_nav(Some(unit_nav)), fund_code, date))
                    );
                    Ok(())
                }
            }
        }
        NavCommands::List { fund_code, from, to } => {
            let fund_code = normalize_fund_code(&fund_code);
            require_fund(ctx, &fund_code)?;
            let records = db::list_nav_records(&ctx.conn, &fund_code, from, to)?;
            if ctx.json {
                return print_json(&records);
            }
            if records.is_empty() {
                println!("\n{}\n", info_line(&format!("No NAV records for {}", fund_code)));
                return Ok(());
            }
            println!("{}", heading(&format!("NAV history - {}", fund_code)));
            println!("{}", render_table(&nav_rows(&records), 2));
            Ok(())
        }
        NavCommands::Latest => {
            let records = db::latest_navs(&ctx.conn)?;
            if ctx.json {
                return print_json(&records);
            }
            if records.is_empty() {
                println!("\n{}\n", info_line("No NAV records yet"));
                return Ok(());
            }
            println!("{}", heading("Latest NAV per fund"));
            println!("{}", render_table(&nav_rows(&records), 2));
            Ok(())
        }
        NavCommands::Delete { fund_code, date } => {
            let fund_code = normalize_fund_code(&fund_code);
            if !db::delete_nav(&ctx.conn, &fund_code, date)? {
                return Err(FundbookError::not_found("NAV", format!("{}@{}", fund_code, date)).into());
            }
            println!("\n{}", success_line(&format!("Deleted NAV of {} on {}", fund_code, date)));
            Ok(())
        }
    }
}

#[derive(Tabled)]
struct NavRow {
    #[tabled(rename = "Fund")]
    fund_code: String,
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Unit NAV")]
    unit_nav: String,
    #[tabled(rename = "Cumulative NAV")]
    accum_nav: String,
}

fn nav_rows(records: &[NavRecord]) -> Vec<NavRow> {
    records
        .iter()
        .map(|r| NavRow {
            fund_code: r.fund_code.clone(),
            date: r.nav_date.to_string(),
            unit_nav: format_nav(Some(r.unit_nav)),
            accum_nav: format_nav(Some(r.accum_nav)),
        })
        .collect()
}

fn require_fund(ctx: &Context, fund_code: &str) -> Result<()> {
    db::get_fund(&ctx.conn, fund_code)?.ok_or_else(|| FundbookError::not_found("fund", fund_code))?;
    Ok(())
}

pub async fn dispatch_funds(ctx: &Context, action: FundCommands) -> Result<()> {
    match action {
        FundCommands::List => list_funds(ctx),
        FundCommands::Summary { fund_code, at } => {
            let summary = reports::fund_summary(&ctx.conn, &normalize_fund_code(&fund_code), ctx.as_of(at))?;
            if ctx.json {
                return print_json(&summary);
            }

            println!(
                "{}",
                heading(&format!("{} {} as of {}", summary.fund.fund_code, summary.fund.fund_name, summary.as_of))
            );
            match &summary.latest_nav {
                Some(nav) => println!("{}", summary_line("Latest NAV", format!("{} ({})", format_nav(Some(nav.unit_nav)), nav.date))),
                None => println!("{}", summary_line("Latest NAV", "-".yellow())),
            }
            println!("{}", summary_line("Holders", summary.holders.len()));
            println!("{}", summary_line("Total shares", format_shares(summary.total_shares)));
            println!("{}", summary_line("Total cost", format_currency(summary.total_cost)));
            println!("{}", summary_line("Market value", format_optional_currency(summary.total_market_value)));
            if !summary.dividends.is_empty() {
                let declared: Vec<String> = summary
                    .dividends
                    .iter()
                    .map(|d| format!("{} {}", d.dividend_date, d.dividend_per_share.normalize()))
                    .collect();
                println!("{}", summary_line("Dividends/share", declared.join(", ")));
            }

            #[derive(Tabled)]
            struct HolderRow {
                #[tabled(rename = "Group ID")]
                group_id: String,
                #[tabled(rename = "Client")]
                client: String,
                #[tabled(rename = "Stock Date")]
                stock_date: String,
                #[tabled(rename = "Shares")]
                shares: String,
                #[tabled(rename = "Cost")]
                cost: String,
                #[tabled(rename = "Market Value")]
                market_value: String,
                #[tabled(rename = "Return")]
                holding_return: String,
            }

            if !summary.holders.is_empty() {
                let rows: Vec<HolderRow> = summary
                    .holders
                    .iter()
                    .map(|h| HolderRow {
                        group_id: h.group_id.clone(),
                        client: h.client_name.clone().unwrap_or_default(),
                        stock_date: h.stock_date.to_string(),
                        shares: format_shares(h.shares),
                        cost: format_optional_currency(h.cost_with_fee),
                        market_value: format_optional_currency(h.market_value),
                        holding_return: signed_optional_currency(h.holding_return),
                    })
                    .collect();
                println!("\n{}", render_table(&rows, 3));
            }
            Ok(())
        }
        FundCommands::Holders { fund_code, top, at } => {
            let fund_code = normalize_fund_code(&fund_code);
            let n = top.unwrap_or(ctx.config.holders.default_top);
            let holders = reports::top_holders(&ctx.conn, &fund_code, ctx.as_of(at), n)?;
            if ctx.json {
                return print_json(&holders);
            }
            if holders.is_empty() {
                println!("\n{}\n", info_line(&format!("No holders of {}", fund_code)));
                return Ok(());
            }

            #[derive(Tabled)]
            struct TopHolderRow {
                #[tabled(rename = "#")]
                rank: usize,
                #[tabled(rename = "Group ID")]
                group_id: String,
                #[tabled(rename = "Client")]
                client: String,
                #[tabled(rename = "Shares")]
                shares: String,
                #[tabled(rename = "Share of Fund")]
                share_percentage: String,
                #[tabled(rename = "Market Value")]
                market_value: String,
            }

            let rows: Vec<TopHolderRow> = holders
                .iter()
                .map(|h| TopHolderRow {
                    rank: h.rank,
                    group_id: h.group_id.clone(),
                    client: h.client_name.clone().unwrap_or_default(),
                    shares: format_shares(h.shares),
                    share_percentage: format_pct(h.share_percentage),
                    market_value: format_optional_currency(h.market_value),
                })
                .collect();
            println!("{}", heading(&format!("Top {} holders of {}", n, fund_code)));
            println!("{}", render_table(&rows, 3));
            Ok(())
        }
        FundCommands::Concentration { fund_code, at } => {
            let report = reports::fund_concentration(
                &ctx.conn,
                &normalize_fund_code(&fund_code),
                ctx.as_of(at),
                &ctx.config.holders,
            )?;
            if ctx.json {
                return print_json(&report);
            }

            println!("{}", heading(&format!("Concentration of {} as of {}", report.fund_code, report.as_of)));
            println!("{}", summary_line("Holders", report.holder_count));
            println!("{}", summary_line("Total shares", format_shares(report.total_shares)));
            println!(
                "{}",
                summary_line(
                    "Herfindahl index",
                    report.herfindahl_index.map(|h| format!("{:.4}", h)).unwrap_or_else(|| "-".into())
                )
            );
            println!("{}", summary_line("Top 5 share", format_pct(report.top5_percentage)));
            println!("{}", summary_line("Top 10 share", format_pct(report.top10_percentage)));

            #[derive(Tabled)]
            struct TierRow {
                #[tabled(rename = "Tier")]
                tier: String,
                #[tabled(rename = "Holders")]
                count: usize,
                #[tabled(rename = "Market Value")]
                market_value: String,
            }

            let thresholds = &ctx.config.holders;
            let rows = vec![
                TierRow {
                    tier: format!("Large (> {})", format_currency(thresholds.large_threshold)),
                    count: report.large.count,
                    market_value: format_currency(report.large.market_value),
                },
                TierRow {
                    tier: format!("Medium (>= {})", format_currency(thresholds.medium_threshold)),
                    count: report.medium.count,
                    market_value: format_currency(report.medium.market_value),
                },
                TierRow {
                    tier: "Small".to_string(),
                    count: report.small.count,
                    market_value: format_currency(report.small.market_value),
                },
            ];
            println!("\n{}", render_table(&rows, 1));
            if report.unvalued > 0 {
                println!(
                    "{}",
                    info_line(&format!("{} holder(s) without a NAV are not tiered", report.unvalued))
                );
            }
            Ok(())
        }
        FundCommands::Delete { fund_code } => {
            let fund_code = normalize_fund_code(&fund_code);
            if !db::delete_fund(&ctx.conn, &fund_code)? {
                return Err(FundbookError::not_found("fund", fund_code).into());
            }
            println!(
                "\n{}",
                success_line(&format!("Deleted fund {} with its NAVs, strategy, positions and dividends", fund_code))
            );
            Ok(())
        }
    }
}

fn list_funds(ctx: &Context) -> Result<()> {
    let funds = db::list_funds(&ctx.conn)?;
    let strategies = db::list_strategies(&ctx.conn)?;

    #[derive(Tabled, serde::Serialize)]
    struct FundRow {
        #[tabled(rename = "Code")]
        fund_code: String,
        #[tabled(rename = "Name")]
        fund_name: String,
        #[tabled(rename = "Main Strategy")]
        main_strategy: String,
        #[tabled(rename = "Sub-strategy")]
        sub_strategy: String,
        #[tabled(rename = "Project")]
        project: String,
    }

    let rows: Vec<FundRow> = funds
        .into_iter()
        .map(|f| {
            let strategy = strategies.iter().find(|s| s.fund_code == f.fund_code);
            FundRow {
                main_strategy: strategy.map(|s| s.main_strategy.clone()).unwrap_or_default(),
                sub_strategy: strategy.map(|s| s.sub_strategy.clone()).unwrap_or_default(),
                project: strategy.and_then(|s| s.project_name.clone()).unwrap_or_default(),
                fund_code: f.fund_code,
                fund_name: f.fund_name,
            }
        })
        .collect();

    if ctx.json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("\n{}\n", info_line("No funds yet; import NAVs or positions first"));
        return Ok(());
    }
    println!("{}", heading(&format!("{} fund(s)", rows.len())));
    println!("{}", render_table(&rows, 5));
    Ok(())
}

pub async fn dispatch_clients(ctx: &Context, action: ClientCommands) -> Result<()> {
    match action {
        ClientCommands::List => {
            let clients = db::list_clients(&ctx.conn)?;
            if ctx.json {
                return print_json(&clients);
            }
            if clients.is_empty() {
                println!("\n{}\n", info_line("No clients yet"));
                return Ok(());
            }

            #[derive(Tabled)]
            struct ClientRow {
                #[tabled(rename = "Group ID")]
                group_id: String,
                #[tabled(rename = "Name")]
                name: String,
                #[tabled(rename = "Planner")]
                planner: String,
            }

            let rows: Vec<ClientRow> = clients
                .into_iter()
                .map(|c| ClientRow {
                    group_id: c.group_id,
                    name: c.obscured_name.unwrap_or_default(),
                    planner: c.domestic_planner.unwrap_or_default(),
                })
                .collect();
            println!("{}", heading(&format!("{} client(s)", rows.len())));
            println!("{}", render_table(&rows, 3));
            Ok(())
        }
        ClientCommands::Delete { group_id } => {
            let group_id = normalize_client_id(&group_id);
            if !db::delete_client(&ctx.conn, &group_id)? {
                return Err(FundbookError::not_found("client", group_id).into());
            }
            println!(
                "\n{}",
                success_line(&format!("Deleted client {} with its positions and dividends", group_id))
            );
            println!(
                "{}",
                info_line("Transactions are kept; remove them with `fundbook activity purge`")
            );
            Ok(())
        }
    }
}
