use anyhow::Result;
use tabled::Tabled;

use super::Context;
use crate::cli::formatters::{heading, info_line, print_json, render_table, success_line};
use crate::cli::TypeCommands;
use crate::db::classification;
use crate::error::FundbookError;

pub async fn dispatch_types(ctx: &Context, action: TypeCommands) -> Result<()> {
    match action {
        TypeCommands::List => {
            let mappings = classification::list_type_mappings(&ctx.conn)?;
            if ctx.json {
                let payload: Vec<_> = mappings
                    .iter()
                    .map(|(label, kind)| serde_json::json!({ "label": label, "kind": kind.as_str() }))
                    .collect();
                return print_json(&payload);
            }
            if mappings.is_empty() {
                println!("\n{}\n", info_line("No explicit mappings; keyword rules from the config apply"));
                return Ok(());
            }

            #[derive(Tabled)]
            struct MappingRow {
                #[tabled(rename = "Label")]
                label: String,
                #[tabled(rename = "Kind")]
                kind: &'static str,
            }

            let rows: Vec<MappingRow> = mappings
                .into_iter()
                .map(|(label, kind)| MappingRow {
                    label,
                    kind: kind.as_str(),
                })
                .collect();
            println!("{}", heading("Transaction label mappings"));
            println!("{}", render_table(&rows, 2));
            Ok(())
        }
        TypeCommands::Unknown => {
            let queue = classification::list_review_queue(&ctx.conn)?;
            if ctx.json {
                return print_json(&queue);
            }
            if queue.is_empty() {
                println!("\n{}\n", success_line("Every imported label is classified"));
                return Ok(());
            }

            #[derive(Tabled)]
            struct ReviewRow {
                #[tabled(rename = "Label")]
                label: String,
                #[tabled(rename = "Seen")]
                occurrences: i64,
                #[tabled(rename = "First")]
                first_seen: String,
                #[tabled(rename = "Last")]
                last_seen: String,
            }

            let rows: Vec<ReviewRow> = queue
                .into_iter()
                .map(|item| ReviewRow {
                    label: item.label,
                    occurrences: item.occurrences,
                    first_seen: item.first_seen.to_string(),
                    last_seen: item.last_seen.to_string(),
                })
                .collect();
            println!("{}", heading("Unrecognized transaction labels"));
            println!("{}", render_table(&rows, 1));
            println!("\n{}", info_line("Map them with `fundbook types map <LABEL> <KIND>`"));
            Ok(())
        }
        TypeCommands::Map { label, kind } => {
            classification::set_type_mapping(&ctx.conn, &label, kind)?;
            println!(
                "\n{}",
                success_line(&format!("'{}' now classifies as {}", label.trim(), kind.as_str()))
            );
            Ok(())
        }
        TypeCommands::Unmap { label } => {
            if !classification::remove_type_mapping(&ctx.conn, &label)? {
                return Err(FundbookError::not_found("type mapping", label.trim()).into());
            }
            println!("\n{}", success_line(&format!("Removed mapping for '{}'", label.trim())));
            Ok(())
        }
    }
}
