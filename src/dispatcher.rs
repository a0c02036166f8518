//! Command dispatcher that routes parsed clap commands to their handlers.
//!
//! Every handler receives a [`Context`] holding the open database, the loaded
//! configuration and the output mode, so handlers never resolve paths or
//! settings themselves.

mod activity;
mod funds;
mod imports;
mod performance;
mod portfolio;
mod projects;
mod trade;
mod types;

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::db;
use crate::ledger::TransactionClassifier;

/// Shared state for one CLI invocation
pub struct Context {
    pub conn: Connection,
    pub config: AppConfig,
    pub json: bool,
    pub today: NaiveDate,
}

impl Context {
    /// Load configuration, then open (and migrate) the database.
    ///
    /// Database location: `--db`, then `db_path` from the config file, then
    /// `$FUNDBOOK_DB` or `~/.fundbook/data.db`.
    pub fn open(db_path: Option<PathBuf>, config_path: Option<PathBuf>, json: bool) -> Result<Self> {
        let config = AppConfig::load(config_path.as_deref())?;
        let path = match db_path.or_else(|| config.db_path.clone()) {
            Some(path) => path,
            None => db::get_default_db_path()?,
        };
        debug!("Using database {:?}", path);

        let conn = db::open_db(Some(path))?;
        db::apply_schema(&conn)?;

        Ok(Self {
            conn,
            config,
            json,
            today: chrono::Local::now().date_naive(),
        })
    }

    /// Valuation date for commands with an optional `--at`
    pub fn as_of(&self, at: Option<NaiveDate>) -> NaiveDate {
        at.unwrap_or(self.today)
    }

    pub fn classifier(&self) -> Result<TransactionClassifier> {
        TransactionClassifier::load(&self.conn, &self.config.classification)
    }
}

/// Route a parsed command line to its handler
pub async fn dispatch_command(cli: Cli) -> Result<()> {
    if cli.no_color {
        colored::control::set_override(false);
    }

    let mut ctx = Context::open(cli.db, cli.config, cli.json)?;
    info!("Dispatching command (today is {})", ctx.today);

    match cli.command {
        Commands::Import {
            kind,
            files,
            allow_override,
            dry_run,
        } => imports::dispatch_import(&mut ctx, kind, &files, allow_override, dry_run).await,
        Commands::Nav { action } => funds::dispatch_nav(&ctx, action).await,
        Commands::Funds { action } => funds::dispatch_funds(&ctx, action).await,
        Commands::Clients { action } => funds::dispatch_clients(&ctx, action).await,
        Commands::Portfolio { action } => portfolio::dispatch_portfolio(&ctx, action).await,
        Commands::Performance { action } => performance::dispatch_performance(&ctx, action).await,
        Commands::Activity { action } => activity::dispatch_activity(&ctx, action).await,
        Commands::Trade { action } => trade::dispatch_trade(&ctx, action).await,
        Commands::Seasonal { fund, year } => {
            performance::dispatch_seasonal(&ctx, fund.as_deref(), year).await
        }
        Commands::Types { action } => types::dispatch_types(&ctx, action).await,
        Commands::Projects { action } => projects::dispatch_projects(&mut ctx, action).await,
    }
}
