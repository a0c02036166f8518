use anyhow::Result;
use colored::Colorize;
use rust_decimal::Decimal;
use tabled::Tabled;

use super::Context;
use crate::cli::formatters::{heading, info_line, print_json, render_table, success_line, summary_line};
use crate::cli::ProjectCommands;
use crate::db::models::MAX_INDUSTRIES;
use crate::db::{projects, ProjectHoldingAsset, ProjectHoldingIndustry};
use crate::error::FundbookError;
use crate::normalize::month_start;

fn ratio_text(ratio: Decimal) -> String {
    format!("{}%", ratio.normalize())
}

pub async fn dispatch_projects(ctx: &mut Context, action: ProjectCommands) -> Result<()> {
    match action {
        ProjectCommands::List => {
            let names = projects::list_projects(&ctx.conn)?;
            if ctx.json {
                return print_json(&names);
            }
            if names.is_empty() {
                println!("\n{}\n", info_line("No projects yet; import strategies with a project column"));
                return Ok(());
            }
            println!("{}", heading(&format!("{} project(s)", names.len())));
            for name in names {
                println!("  {}", name);
            }
            Ok(())
        }
        ProjectCommands::Show { project, at } => {
            let as_of = ctx.as_of(at);
            let asset = projects::project_asset_as_of(&ctx.conn, &project, as_of)?;
            let industry = projects::project_industry_as_of(&ctx.conn, &project, as_of)?;
            if asset.is_none() && industry.is_none() {
                return Err(FundbookError::not_found("project snapshot", project).into());
            }
            if ctx.json {
                return print_json(&serde_json::json!({
                    "project_name": project,
                    "as_of": as_of,
                    "asset": asset,
                    "industry": industry,
                }));
            }

            println!("{}", heading(&format!("{} as of {}", project, month_start(as_of).format("%Y-%m"))));

            #[derive(Tabled)]
            struct RatioRow {
                #[tabled(rename = "Name")]
                name: String,
                #[tabled(rename = "Ratio")]
                ratio: String,
            }

            match &asset {
                Some(asset) => {
                    let month = asset.month.map(|m| m.format("%Y-%m").to_string()).unwrap_or_default();
                    println!("{} ({})", "Asset classes".bold(), month);
                    let rows: Vec<RatioRow> = asset
                        .classes()
                        .into_iter()
                        .map(|(name, ratio)| RatioRow {
                            name: name.to_string(),
                            ratio: ratio_text(ratio),
                        })
                        .collect();
                    println!("{}", render_table(&rows, 1));
                    println!("{}", summary_line("Equity sleeve", ratio_text(asset.stock_total_ratio())));
                }
                None => println!("{}", info_line("No asset snapshot")),
            }

            match &industry {
                Some(industry) => {
                    let month = industry.month.map(|m| m.format("%Y-%m").to_string()).unwrap_or_default();
                    println!("\n{} ({}, {})", "Top industries".bold(), month, industry.ratio_type.as_str());
                    let rows: Vec<RatioRow> = industry
                        .industries
                        .iter()
                        .map(|(name, ratio)| RatioRow {
                            name: name.clone(),
                            ratio: ratio_text(*ratio),
                        })
                        .collect();
                    println!("{}", render_table(&rows, 1));
                }
                None => println!("\n{}", info_line("No industry snapshot")),
            }
            Ok(())
        }
        ProjectCommands::SetAsset {
            project,
            month,
            a_share,
            h_share,
            us_share,
            other_market,
            global_bond,
            convertible_bond,
            other,
        } => {
            let given = [a_share, h_share, us_share, other_market, global_bond, convertible_bond, other];
            if given.iter().all(Option::is_none) {
                return Err(FundbookError::BusinessRule("give at least one asset-class ratio".into()).into());
            }
            let asset = ProjectHoldingAsset {
                project_name: project.clone(),
                month: Some(month_start(month)),
                a_share_ratio: a_share,
                h_share_ratio: h_share,
                us_share_ratio: us_share,
                other_market_ratio: other_market,
                global_bond_ratio: global_bond,
                convertible_bond_ratio: convertible_bond,
                other_ratio: other,
            };
            let total: Decimal = asset.classes().iter().map(|(_, r)| *r).sum();
            if total > Decimal::ONE_HUNDRED {
                tracing::warn!("Asset ratios of {} sum to {}%", project, total);
                if !ctx.json {
                    println!("{} Ratios sum to {}", "⚠".yellow().bold(), ratio_text(total));
                }
            }

            let written = projects::set_project_asset_synced(&mut ctx.conn, &project, month, &asset)?;
            report_written(ctx, "asset", &written, month)
        }
        ProjectCommands::SetIndustry {
            project,
            month,
            ratio_type,
            industries,
        } => {
            if industries.is_empty() {
                return Err(FundbookError::BusinessRule("give at least one --industry NAME=RATIO".into()).into());
            }
            if industries.len() > MAX_INDUSTRIES {
                return Err(FundbookError::BusinessRule(format!(
                    "at most {} industries per snapshot, got {}",
                    MAX_INDUSTRIES,
                    industries.len()
                ))
                .into());
            }

            let industry = ProjectHoldingIndustry {
                project_name: project.clone(),
                month: Some(month_start(month)),
                ratio_type,
                industries,
            };
            let written = projects::set_project_industry_synced(&mut ctx.conn, &project, month, &industry)?;
            report_written(ctx, "industry", &written, month)
        }
        ProjectCommands::SyncGroups => {
            let groups = projects::list_sync_groups(&ctx.conn)?;
            if ctx.json {
                return print_json(&groups);
            }
            if groups.is_empty() {
                println!("\n{}\n", info_line("No sync groups"));
                return Ok(());
            }
            println!("{}", heading("Project sync groups"));
            for (group, members) in &groups {
                println!("  {}: {}", group.bold(), members.join(", "));
            }
            Ok(())
        }
        ProjectCommands::SyncAdd { group, project } => {
            if projects::add_sync_member(&ctx.conn, &group, &project)? {
                println!("\n{}", success_line(&format!("Added {} to sync group {}", project, group)));
            } else {
                println!("\n{}", info_line(&format!("{} is already in sync group {}", project, group)));
            }
            Ok(())
        }
        ProjectCommands::SyncRemove { group, project } => {
            if !projects::remove_sync_member(&ctx.conn, &group, &project)? {
                return Err(FundbookError::not_found("sync group member", format!("{}/{}", group, project)).into());
            }
            println!("\n{}", success_line(&format!("Removed {} from sync group {}", project, group)));
            Ok(())
        }
    }
}

fn report_written(ctx: &Context, what: &str, written: &[String], month: chrono::NaiveDate) -> Result<()> {
    if ctx.json {
        return print_json(&serde_json::json!({
            "snapshot": what,
            "month": month_start(month),
            "projects": written,
        }));
    }
    println!(
        "\n{}",
        success_line(&format!(
            "Saved {} snapshot for {} ({})",
            what,
            written.first().map(String::as_str).unwrap_or_default(),
            month_start(month).format("%Y-%m")
        ))
    );
    if written.len() > 1 {
        println!("{}", info_line(&format!("Synced to {}", written[1..].join(", "))));
    }
    Ok(())
}
