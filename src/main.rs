use clap::Parser;
use colored::Colorize;
use tracing::error;
use tracing_subscriber::EnvFilter;

use fundbook::cli::Cli;
use fundbook::dispatcher::dispatch_command;
use fundbook::error::{is_not_found, user_facing_message};

#[tokio::main]
async fn main() {
    // Logs go to stderr so `--json` output stays parseable
    let filter = EnvFilter::try_from_env("FUNDBOOK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = dispatch_command(cli).await {
        if is_not_found(&e) {
            eprintln!("{} {}", "✗".red().bold(), user_facing_message(&e).unwrap_or_else(|| e.to_string()));
            std::process::exit(2);
        }

        error!("{:#}", e);
        let message = user_facing_message(&e)
            .unwrap_or_else(|| "unexpected failure; rerun with FUNDBOOK_LOG=debug for details".to_string());
        eprintln!("{} {}", "✗".red().bold(), message);
        std::process::exit(1);
    }
}
