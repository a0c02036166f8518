use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::PathBuf;

use super::Context;
use crate::cli::formatters::{format_batch_summary, info_line, print_json, success_line};
use crate::importers::{self, ImportContext, ImportKind, ImportOptions};

const MAX_LISTED_ISSUES: usize = 20;

pub async fn dispatch_import(
    ctx: &mut Context,
    kind: ImportKind,
    files: &[PathBuf],
    allow_override: bool,
    dry_run: bool,
) -> Result<()> {
    tracing::info!("Importing {} file(s) as {}", files.len(), kind.as_str());

    let mut options = ImportOptions::new(ctx.today);
    options.allow_override = allow_override;
    options.dry_run = dry_run;
    let classifier = ctx.classifier()?;
    let import_ctx = ImportContext {
        options: &options,
        classifier: &classifier,
    };

    let progress = ProgressBar::new(files.len() as u64);
    if ctx.json {
        progress.set_draw_target(ProgressDrawTarget::hidden());
    }
    progress.set_style(ProgressStyle::with_template(
        "{spinner} [{bar:30}] {pos}/{len} {msg}",
    )?);

    let batch = importers::import_batch(&mut ctx.conn, files, kind, &import_ctx, |summary| {
        progress.set_message(summary.file.clone());
        progress.inc(1);
    })?;
    progress.finish_and_clear();

    if ctx.json {
        return print_json(&batch);
    }

    println!("\n{}", format_batch_summary(&batch, MAX_LISTED_ISSUES));

    let headline = format!(
        "{} created, {} updated, {} row(s) failed",
        batch.created(),
        batch.updated(),
        batch.failure_count()
    );
    if batch.failed_files() > 0 {
        println!(
            "\n{} {} ({} of {} file(s) rejected)",
            "⚠".yellow().bold(),
            headline,
            batch.failed_files(),
            batch.files.len()
        );
    } else {
        println!("\n{}", success_line(&headline));
    }

    let queued: usize = batch.files.iter().map(|f| f.queued_for_review).sum();
    if queued > 0 {
        println!(
            "{}",
            info_line(&format!(
                "{} transaction(s) have unrecognized labels; see `fundbook types unknown`",
                queued
            ))
        );
    }
    if dry_run {
        println!("{}", info_line("Dry run - no changes saved"));
    }
    Ok(())
}
