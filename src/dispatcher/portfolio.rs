use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use super::Context;
use crate::cli::formatters::{
    format_distribution, heading, info_line, print_json, render_table, signed_currency,
    signed_optional_currency, signed_pct, summary_line,
};
use crate::cli::PortfolioCommands;
use crate::normalize::normalize_client_id;
use crate::reports::{self, lookthrough::ExposureLine, ClientPortfolio, LookThroughReport};
use crate::utils::{format_currency, format_nav, format_optional_currency, format_pct, format_shares};

pub async fn dispatch_portfolio(ctx: &Context, action: PortfolioCommands) -> Result<()> {
    match action {
        PortfolioCommands::Show { group_id, at, from, to } => {
            let group_id = normalize_client_id(&group_id);
            let period = from.zip(to);
            tracing::info!("Generating portfolio report for {}", group_id);
            let report = reports::client_portfolio(&ctx.conn, &group_id, ctx.as_of(at), period)?;
            if ctx.json {
                return print_json(&report);
            }
            print_portfolio(&report);
            Ok(())
        }
        PortfolioCommands::Lookthrough { group_id, at } => {
            let group_id = normalize_client_id(&group_id);
            let report = reports::client_look_through(&ctx.conn, &group_id, ctx.as_of(at), &ctx.config.lookthrough)?;
            if ctx.json {
                return print_json(&report);
            }
            print_look_through(&report);
            Ok(())
        }
        PortfolioCommands::Strategies { at } => {
            let breakdown = reports::book_strategy_distribution(&ctx.conn, ctx.as_of(at))?;
            if ctx.json {
                return print_json(&breakdown);
            }

            println!("{}", heading(&format!("Strategy distribution as of {}", breakdown.as_of)));
            println!("{}", summary_line("Market value", format_currency(breakdown.total_market_value)));
            print!("{}", format_distribution("Main strategy", &breakdown.by_main_strategy));
            for (main, subs) in &breakdown.by_sub_strategy {
                print!("{}", format_distribution(&format!("{} by sub-strategy", main), subs));
            }
            if breakdown.unvalued_positions > 0 {
                println!(
                    "\n{}",
                    info_line(&format!(
                        "{} position(s) have no NAV and are excluded",
                        breakdown.unvalued_positions
                    ))
                );
            }
            Ok(())
        }
        PortfolioCommands::Planners { at } => {
            let lines = reports::planner_summary(&ctx.conn, ctx.as_of(at))?;
            if ctx.json {
                return print_json(&lines);
            }
            if lines.is_empty() {
                println!("\n{}\n", info_line("No positions on record"));
                return Ok(());
            }

            #[derive(Tabled)]
            struct PlannerRow {
                #[tabled(rename = "Planner")]
                planner: String,
                #[tabled(rename = "Clients")]
                clients: usize,
                #[tabled(rename = "Positions")]
                positions: usize,
                #[tabled(rename = "Cost")]
                cost: String,
                #[tabled(rename = "Market Value")]
                market_value: String,
            }

            let rows: Vec<PlannerRow> = lines
                .into_iter()
                .map(|l| PlannerRow {
                    planner: l.planner,
                    clients: l.clients,
                    positions: l.positions,
                    cost: format_currency(l.total_cost),
                    market_value: format_currency(l.total_market_value),
                })
                .collect();
            println!("{}", heading("Book by domestic planner"));
            println!("{}", render_table(&rows, 1));
            Ok(())
        }
    }
}

fn print_portfolio(report: &ClientPortfolio) {
    let name = report.client.obscured_name.as_deref().unwrap_or("");
    println!(
        "{}",
        heading(&format!("Portfolio of {} {} as of {}", report.client.group_id, name, report.as_of))
    );

    if report.positions.is_empty() {
        println!("{}\n", info_line("No positions on or before this date"));
        return;
    }

    #[derive(Tabled)]
    struct PositionRow {
        #[tabled(rename = "Fund")]
        fund: String,
        #[tabled(rename = "Strategy")]
        strategy: String,
        #[tabled(rename = "Stock Date")]
        stock_date: String,
        #[tabled(rename = "Shares")]
        shares: String,
        #[tabled(rename = "Cost")]
        cost: String,
        #[tabled(rename = "NAV")]
        nav: String,
        #[tabled(rename = "Market Value")]
        market_value: String,
        #[tabled(rename = "Return")]
        holding_return: String,
        #[tabled(rename = "Return %")]
        return_rate: String,
        #[tabled(rename = "YTD")]
        ytd: String,
    }

    let rows: Vec<PositionRow> = report
        .positions
        .iter()
        .map(|p| PositionRow {
            fund: format!("{} {}", p.fund_code, p.fund_name),
            strategy: format!("{} / {}", p.main_strategy, p.sub_strategy),
            stock_date: p.stock_date.to_string(),
            shares: p.shares.map(format_shares).unwrap_or_else(|| "-".into()),
            cost: format_optional_currency(p.cost_with_fee),
            nav: format_nav(p.valuation.unit_nav),
            market_value: format_optional_currency(p.valuation.market_value),
            holding_return: signed_optional_currency(p.valuation.holding_return),
            return_rate: signed_pct(p.valuation.holding_return_rate),
            ytd: signed_optional_currency(p.ytd_return),
        })
        .collect();
    println!("{}", render_table(&rows, 3));

    println!();
    println!("{}", summary_line("Total cost", format_currency(report.total_cost)));
    println!("{}", summary_line("Market value", format_currency(report.total_market_value).cyan()));
    println!("{}", summary_line("Holding return", signed_currency(report.total_holding_return)));
    println!("{}", summary_line("Return rate", signed_pct(report.overall_return_rate)));
    println!("{}", summary_line("Cash dividends", format_currency(report.total_dividends)));
    println!("{}", summary_line("YTD return", signed_currency(report.total_ytd_return)));
    if let (Some((start, end)), Some(period)) = (report.period, report.total_period_return) {
        println!(
            "{}",
            summary_line(&format!("Return {} to {}", start, end), signed_currency(period))
        );
    }

    let unvalued = report.positions.iter().filter(|p| p.valuation.market_value.is_none()).count();
    if unvalued > 0 {
        println!(
            "\n{} {} position(s) have no NAV on or before {} and are not valued",
            "⚠".yellow().bold(),
            unvalued,
            report.as_of
        );
    }

    print!("{}", format_distribution("By fund", &report.by_fund));
    print!("{}", format_distribution("By main strategy", &report.by_main_strategy));
    print!("{}", format_distribution("By sub-strategy", &report.by_sub_strategy));
}

#[derive(Tabled)]
struct ExposureRow {
    #[tabled(rename = "Exposure")]
    label: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "% of Included")]
    pct_of_included: String,
    #[tabled(rename = "% of Portfolio")]
    pct_of_portfolio: String,
}

fn exposure_rows(lines: &[ExposureLine]) -> Vec<ExposureRow> {
    lines
        .iter()
        .map(|l| ExposureRow {
            label: l.label.clone(),
            value: signed_currency(l.value).to_string(),
            pct_of_included: format_pct(l.pct_of_included),
            pct_of_portfolio: format_pct(l.pct_of_portfolio),
        })
        .collect()
}

fn print_look_through(report: &LookThroughReport) {
    println!(
        "{}",
        heading(&format!("Look-through exposure of {} as of {}", report.group_id, report.as_of))
    );
    println!("{}", summary_line("Portfolio value", format_currency(report.portfolio_value)));
    println!("{}", summary_line("Looked through", format_currency(report.included_value)));

    if !report.asset_classes.is_empty() {
        println!("\n{}", "Asset classes".bold());
        println!("{}", render_table(&exposure_rows(&report.asset_classes), 1));
    }
    if !report.industries.is_empty() {
        println!("\n{}", "Industries".bold());
        println!("{}", render_table(&exposure_rows(&report.industries), 1));
    }

    if !report.unconfigured.is_empty() {
        println!("\n{} Positions not looked through:", "⚠".yellow().bold());
        for missing in &report.unconfigured {
            let reason = match missing.reason {
                reports::lookthrough::MissingConfig::NoProject => "no underlying project".to_string(),
                reports::lookthrough::MissingConfig::NoNav => "no NAV".to_string(),
                reports::lookthrough::MissingConfig::NoAssetSnapshot => format!(
                    "no asset snapshot for {}",
                    missing.project_name.as_deref().unwrap_or("project")
                ),
                reports::lookthrough::MissingConfig::NoIndustrySnapshot => format!(
                    "no industry snapshot for {}",
                    missing.project_name.as_deref().unwrap_or("project")
                ),
                reports::lookthrough::MissingConfig::NoStockSleeveForIndustryMonth => format!(
                    "industries of {} are stock-based but their month has no asset snapshot",
                    missing.project_name.as_deref().unwrap_or("project")
                ),
            };
            println!("  {}: {}", missing.fund_code, reason);
        }
    }
}
