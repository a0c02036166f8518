use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;

use crate::db::{RatioType, TransactionKind};
use crate::importers::ImportKind;
use crate::reports::FlowGranularity;
use crate::normalize::parse_date;

pub mod formatters;

#[derive(Parser)]
#[command(name = "fundbook")]
#[command(version, about = "Private-fund back office: NAV, positions, transactions and client reports")]
#[command(
    long_about = "Ingest custodian and transfer-agent spreadsheet exports into a local SQLite book and report client portfolios, fund holders, concentration, look-through exposure and NAV performance."
)]
pub struct Cli {
    /// Disable colorized/ANSI output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Output results in JSON format
    #[arg(long = "json", global = true)]
    pub json: bool,

    /// Database file (defaults to $FUNDBOOK_DB or ~/.fundbook/data.db)
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Configuration file (defaults to $FUNDBOOK_CONFIG or ~/.fundbook/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Accepts every date spelling the importers accept
pub fn parse_cli_date(raw: &str) -> Result<NaiveDate, String> {
    parse_date(raw).map_err(|e| e.to_string())
}

fn parse_import_kind(raw: &str) -> Result<ImportKind, String> {
    ImportKind::from_str(raw).map_err(|_| {
        format!(
            "unknown import kind '{}' (expected nav, positions, transactions, dividends, client-dividends or strategies)",
            raw
        )
    })
}

fn parse_transaction_kind(raw: &str) -> Result<TransactionKind, String> {
    TransactionKind::from_str(raw).map_err(|_| {
        let names: Vec<&str> = TransactionKind::ALL.iter().map(|k| k.as_str()).collect();
        format!("unknown transaction kind '{}' (expected one of {})", raw, names.join(", "))
    })
}

fn parse_granularity(raw: &str) -> Result<FlowGranularity, String> {
    FlowGranularity::from_str(raw)
        .map_err(|_| format!("unknown period '{}' (expected daily, weekly, monthly or quarterly)", raw))
}

fn parse_ratio_type(raw: &str) -> Result<RatioType, String> {
    RatioType::from_str(raw).map_err(|_| format!("unknown ratio type '{}' (expected stock or total)", raw))
}

/// `NAME=RATIO`, e.g. `Banks=12.5`
fn parse_industry(raw: &str) -> Result<(String, Decimal), String> {
    let (name, ratio) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected NAME=RATIO, got '{}'", raw))?;
    let ratio = Decimal::from_str(ratio.trim()).map_err(|e| format!("invalid ratio '{}': {}", ratio, e))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing industry name in '{}'", raw));
    }
    Ok((name.to_string(), ratio))
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import spreadsheet or CSV exports (one transaction per file)
    Import {
        /// nav, positions, transactions, dividends, client-dividends or strategies
        #[arg(value_parser = parse_import_kind)]
        kind: ImportKind,

        /// Files to import, processed in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Replace records that already exist instead of rejecting the row
        #[arg(long = "override")]
        allow_override: bool,

        /// Validate only, don't save to database
        #[arg(short, long)]
        dry_run: bool,
    },

    /// NAV history management
    Nav {
        #[command(subcommand)]
        action: NavCommands,
    },

    /// Fund listing and holder analysis
    Funds {
        #[command(subcommand)]
        action: FundCommands,
    },

    /// Client management
    Clients {
        #[command(subcommand)]
        action: ClientCommands,
    },

    /// Client portfolio and book-level reports
    Portfolio {
        #[command(subcommand)]
        action: PortfolioCommands,
    },

    /// Fund NAV performance
    Performance {
        #[command(subcommand)]
        action: PerformanceCommands,
    },

    /// Transaction-based client analysis
    Activity {
        #[command(subcommand)]
        action: ActivityCommands,
    },

    /// Book-wide cash flow, trading frequency and dividends
    Trade {
        #[command(subcommand)]
        action: TradeCommands,
    },

    /// Position snapshots grouped by month, quarter and year
    Seasonal {
        /// Restrict to one fund
        #[arg(long)]
        fund: Option<String>,

        /// Restrict to one stock-date year
        #[arg(long)]
        year: Option<i32>,
    },

    /// Transaction label classification
    Types {
        #[command(subcommand)]
        action: TypeCommands,
    },

    /// Underlying project configuration for look-through
    Projects {
        #[command(subcommand)]
        action: ProjectCommands,
    },
}

#[derive(Subcommand)]
pub enum NavCommands {
    /// Record a single NAV
    Add {
        fund_code: String,
        #[arg(value_parser = parse_cli_date)]
        date: NaiveDate,
        unit_nav: Decimal,
        /// Cumulative NAV (defaults to the unit NAV)
        #[arg(long)]
        accum: Option<Decimal>,
        /// Replace an existing NAV for the same date
        #[arg(long = "override")]
        allow_override: bool,
    },

    /// List a fund's NAV history
    List {
        fund_code: String,
        #[arg(long, value_parser = parse_cli_date)]
        from: Option<NaiveDate>,
        #[arg(long, value_parser = parse_cli_date)]
        to: Option<NaiveDate>,
    },

    /// Latest NAV of every fund
    Latest,

    /// Delete one NAV record
    Delete {
        fund_code: String,
        #[arg(value_parser = parse_cli_date)]
        date: NaiveDate,
    },
}

#[derive(Subcommand)]
pub enum FundCommands {
    /// List funds with their strategy
    List,

    /// Per-client holdings of a fund
    Summary {
        fund_code: String,
        #[arg(long, value_parser = parse_cli_date)]
        at: Option<NaiveDate>,
    },

    /// Largest holders of a fund by shares
    Holders {
        fund_code: String,
        /// Number of holders to show (defaults to holders.default_top)
        #[arg(short = 'n', long)]
        top: Option<usize>,
        #[arg(long, value_parser = parse_cli_date)]
        at: Option<NaiveDate>,
    },

    /// Ownership concentration of a fund
    Concentration {
        fund_code: String,
        #[arg(long, value_parser = parse_cli_date)]
        at: Option<NaiveDate>,
    },

    /// Delete a fund with its NAVs, strategy, positions and dividends
    Delete { fund_code: String },
}

#[derive(Subcommand)]
pub enum ClientCommands {
    /// List clients
    List,

    /// Delete a client with its positions and dividends
    Delete { group_id: String },
}

#[derive(Subcommand)]
pub enum PortfolioCommands {
    /// Client portfolio with valuation and distributions
    Show {
        group_id: String,
        /// Valuation date (defaults to today)
        #[arg(long, value_parser = parse_cli_date)]
        at: Option<NaiveDate>,
        /// Period return window start
        #[arg(long, value_parser = parse_cli_date, requires = "to")]
        from: Option<NaiveDate>,
        /// Period return window end
        #[arg(long, value_parser = parse_cli_date, requires = "from")]
        to: Option<NaiveDate>,
    },

    /// Client exposure through the underlying projects
    Lookthrough {
        group_id: String,
        #[arg(long, value_parser = parse_cli_date)]
        at: Option<NaiveDate>,
    },

    /// Strategy distribution across the whole book
    Strategies {
        #[arg(long, value_parser = parse_cli_date)]
        at: Option<NaiveDate>,
    },

    /// Book totals per domestic planner
    Planners {
        #[arg(long, value_parser = parse_cli_date)]
        at: Option<NaiveDate>,
    },
}

#[derive(Args, Clone, Default)]
pub struct FilterArgs {
    /// Substring of the fund code or name
    #[arg(long)]
    pub search: Option<String>,
    /// Main strategy
    #[arg(long)]
    pub main: Option<String>,
    /// Sub-strategy
    #[arg(long)]
    pub sub: Option<String>,
}

#[derive(Subcommand)]
pub enum PerformanceCommands {
    /// Weekly and year-to-date NAV change per fund
    Weekly {
        #[command(flatten)]
        filter: FilterArgs,
        /// Only funds with a NAV within this many days
        #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(i64).range(1..=30))]
        days: i64,
        #[arg(long, value_parser = parse_cli_date)]
        at: Option<NaiveDate>,
    },

    /// NAV change per fund over a custom window
    Period {
        #[arg(value_parser = parse_cli_date)]
        from: NaiveDate,
        #[arg(value_parser = parse_cli_date)]
        to: NaiveDate,
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Volatility, Sharpe ratio and drawdown per fund
    Risk {
        #[command(flatten)]
        filter: FilterArgs,
        /// Look-back window in days (defaults to performance.default_period_days)
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=365))]
        days: Option<i64>,
        #[arg(long, value_parser = parse_cli_date)]
        at: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
pub enum ActivityCommands {
    /// Per-product P&L rebuilt from transactions
    Analyze {
        group_id: String,
        #[arg(long, value_parser = parse_cli_date)]
        at: Option<NaiveDate>,
    },

    /// Profit per product over a window
    Period {
        group_id: String,
        #[arg(value_parser = parse_cli_date)]
        from: NaiveDate,
        #[arg(value_parser = parse_cli_date)]
        to: NaiveDate,
    },

    /// Month-by-month profit since the first transaction
    Trend {
        group_id: String,
        #[arg(long, value_parser = parse_cli_date)]
        at: Option<NaiveDate>,
    },

    /// Delete every transaction of a client
    Purge { group_id: String },
}

#[derive(Args, Clone, Default)]
pub struct WindowArgs {
    /// Window start (defaults to one year before the end)
    #[arg(long, value_parser = parse_cli_date)]
    pub from: Option<NaiveDate>,
    /// Window end (defaults to today)
    #[arg(long, value_parser = parse_cli_date)]
    pub to: Option<NaiveDate>,
}

#[derive(Subcommand)]
pub enum TradeCommands {
    /// Subscriptions, redemptions and cash dividends per period
    Flow {
        /// Restrict to one fund
        #[arg(long)]
        fund: Option<String>,
        #[command(flatten)]
        window: WindowArgs,
        /// daily, weekly, monthly or quarterly
        #[arg(long, default_value = "monthly", value_parser = parse_granularity)]
        period: FlowGranularity,
    },

    /// Clients ranked by number of transactions
    Clients {
        #[command(flatten)]
        window: WindowArgs,
        /// Leave out clients with fewer transactions
        #[arg(long, default_value_t = 1)]
        min: usize,
        /// Number of clients to show
        #[arg(short = 'n', long)]
        top: Option<usize>,
    },

    /// Declared distributions and client receipts
    Dividends {
        #[arg(long)]
        fund: Option<String>,
        #[command(flatten)]
        window: WindowArgs,
    },
}

#[derive(Subcommand)]
pub enum TypeCommands {
    /// Explicit label mappings
    List,

    /// Labels waiting for a mapping
    Unknown,

    /// Map a label to a transaction kind
    Map {
        label: String,
        #[arg(value_parser = parse_transaction_kind)]
        kind: TransactionKind,
    },

    /// Remove an explicit mapping
    Unmap { label: String },
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Projects referenced by strategies or snapshots
    List,

    /// Asset and industry snapshot in effect for a month
    Show {
        project: String,
        #[arg(long, value_parser = parse_cli_date)]
        at: Option<NaiveDate>,
    },

    /// Record the asset-class mix of a project for a month (percentages)
    SetAsset {
        project: String,
        #[arg(value_parser = parse_cli_date)]
        month: NaiveDate,
        #[arg(long)]
        a_share: Option<Decimal>,
        #[arg(long)]
        h_share: Option<Decimal>,
        #[arg(long)]
        us_share: Option<Decimal>,
        #[arg(long)]
        other_market: Option<Decimal>,
        #[arg(long)]
        global_bond: Option<Decimal>,
        #[arg(long)]
        convertible_bond: Option<Decimal>,
        #[arg(long)]
        other: Option<Decimal>,
    },

    /// Record the top industries of a project for a month
    SetIndustry {
        project: String,
        #[arg(value_parser = parse_cli_date)]
        month: NaiveDate,
        /// stock (share of the equity sleeve) or total (share of the portfolio)
        #[arg(long, default_value = "total", value_parser = parse_ratio_type)]
        ratio_type: RatioType,
        /// NAME=RATIO, up to five times
        #[arg(long = "industry", value_parser = parse_industry)]
        industries: Vec<(String, Decimal)>,
    },

    /// Projects whose configuration is replicated together
    SyncGroups,

    /// Add a project to a sync group
    SyncAdd { group: String, project: String },

    /// Remove a project from a sync group
    SyncRemove { group: String, project: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rust_decimal_macros::dec;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_import_args() {
        let cli = Cli::try_parse_from([
            "fundbook", "--json", "import", "client-dividends", "a.xlsx", "b.csv", "--override",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Import {
                kind,
                files,
                allow_override,
                dry_run,
            } => {
                assert_eq!(kind, ImportKind::ClientDividends);
                assert_eq!(files.len(), 2);
                assert!(allow_override);
                assert!(!dry_run);
            }
            _ => panic!("expected import"),
        }
    }

    #[test]
    fn test_dates_accept_compact_form() {
        let cli = Cli::try_parse_from(["fundbook", "portfolio", "show", "000319506", "--at", "20250815"]).unwrap();
        match cli.command {
            Commands::Portfolio {
                action: PortfolioCommands::Show { at, .. },
            } => assert_eq!(at, NaiveDate::from_ymd_opt(2025, 8, 15)),
            _ => panic!("expected portfolio show"),
        }
        assert!(Cli::try_parse_from(["fundbook", "nav", "delete", "F1", "2025-13-01"]).is_err());
    }

    #[test]
    fn test_industry_pairs() {
        assert_eq!(parse_industry("Banks=12.5"), Ok(("Banks".to_string(), dec!(12.5))));
        assert_eq!(parse_industry("Index hedge=-3"), Ok(("Index hedge".to_string(), dec!(-3))));
        assert!(parse_industry("Banks").is_err());
        assert!(parse_industry("=5").is_err());
    }

    #[test]
    fn test_trade_flow_period() {
        let cli =
            Cli::try_parse_from(["fundbook", "trade", "flow", "--period", "Quarter", "--from", "2025-01-01"]).unwrap();
        match cli.command {
            Commands::Trade {
                action: TradeCommands::Flow { period, window, fund },
            } => {
                assert_eq!(period, FlowGranularity::Quarterly);
                assert_eq!(window.from, NaiveDate::from_ymd_opt(2025, 1, 1));
                assert_eq!(window.to, None);
                assert_eq!(fund, None);
            }
            _ => panic!("expected trade flow"),
        }
        assert!(Cli::try_parse_from(["fundbook", "trade", "flow", "--period", "hourly"]).is_err());
    }

    #[test]
    fn test_risk_days_are_bounded() {
        assert!(Cli::try_parse_from(["fundbook", "performance", "risk", "--days", "90"]).is_ok());
        assert!(Cli::try_parse_from(["fundbook", "performance", "risk", "--days", "0"]).is_err());
    }

    #[test]
    fn test_period_window_needs_both_ends() {
        assert!(Cli::try_parse_from(["fundbook", "portfolio", "show", "1", "--from", "2025-01-01"]).is_err());
    }
}
