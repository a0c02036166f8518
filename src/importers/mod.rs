// Import module - spreadsheet/CSV ingestion of custodian and transfer-agent exports

pub mod columns;
pub mod dividends;
pub mod nav;
pub mod positions;
pub mod sheet;
pub mod strategies;
pub mod transactions;
pub mod validation;

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

use crate::db::{self, WriteOutcome};
use crate::error::FundbookError;
use crate::ledger::TransactionClassifier;
pub use columns::{ColumnMap, FieldSpec, SheetRow};
pub use sheet::{read_sheet, Cell, Sheet};
pub use validation::{BatchSummary, ImportSummary, RowIssue};

/// Entity carried by an import file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Nav,
    Positions,
    Transactions,
    FundDividends,
    ClientDividends,
    Strategies,
}

impl ImportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportKind::Nav => "nav",
            ImportKind::Positions => "positions",
            ImportKind::Transactions => "transactions",
            ImportKind::FundDividends => "dividends",
            ImportKind::ClientDividends => "client-dividends",
            ImportKind::Strategies => "strategies",
        }
    }

    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            ImportKind::Nav => nav::FIELDS,
            ImportKind::Positions => positions::FIELDS,
            ImportKind::Transactions => transactions::FIELDS,
            ImportKind::FundDividends => dividends::FUND_FIELDS,
            ImportKind::ClientDividends => dividends::CLIENT_FIELDS,
            ImportKind::Strategies => strategies::FIELDS,
        }
    }
}

impl FromStr for ImportKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "nav" => Ok(ImportKind::Nav),
            "positions" | "position" => Ok(ImportKind::Positions),
            "transactions" | "transaction" => Ok(ImportKind::Transactions),
            "dividends" | "fund-dividends" => Ok(ImportKind::FundDividends),
            "client-dividends" => Ok(ImportKind::ClientDividends),
            "strategies" | "strategy" => Ok(ImportKind::Strategies),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Replace records whose natural key already exists instead of rejecting the row
    pub allow_override: bool,
    /// Validate and count without committing anything
    pub dry_run: bool,
    /// Reference date for "in the future" checks
    pub today: NaiveDate,
}

impl ImportOptions {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            allow_override: false,
            dry_run: false,
            today,
        }
    }
}

/// Everything a row importer needs besides the connection
pub struct ImportContext<'a> {
    pub options: &'a ImportOptions,
    pub classifier: &'a TransactionClassifier,
}

/// Apply a write outcome to the summary; duplicates become row issues.
pub(crate) fn record_outcome(
    summary: &mut ImportSummary,
    outcome: WriteOutcome,
    row: usize,
    key_field: &str,
    key: &str,
) {
    match outcome {
        WriteOutcome::Created => summary.created += 1,
        WriteOutcome::Updated => summary.updated += 1,
        WriteOutcome::Duplicate => summary.reject(RowIssue::new(
            row,
            key_field,
            key,
            "record already exists (use --override to replace it)",
        )),
    }
}

/// Ingest an already-read sheet inside one SQLite transaction.
///
/// Row problems are collected in the summary. A persistence error rolls back
/// everything this sheet wrote and is reported as a file-level failure.
pub fn import_sheet(
    conn: &mut Connection,
    sheet: &Sheet,
    kind: ImportKind,
    ctx: &ImportContext,
    summary: &mut ImportSummary,
) -> Result<()> {
    summary.dry_run = ctx.options.dry_run;

    let map = match ColumnMap::locate(sheet, kind.fields()) {
        Ok(map) => map,
        Err(e) => {
            summary.fail_file(e.to_string());
            return Ok(());
        }
    };

    let tx = conn.transaction()?;
    let result = match kind {
        ImportKind::Nav => nav::import_rows(&tx, sheet, &map, ctx, summary),
        ImportKind::Positions => positions::import_rows(&tx, sheet, &map, ctx, summary),
        ImportKind::Transactions => transactions::import_rows(&tx, sheet, &map, ctx, summary),
        ImportKind::FundDividends => dividends::import_fund_rows(&tx, sheet, &map, ctx, summary),
        ImportKind::ClientDividends => dividends::import_client_rows(&tx, sheet, &map, ctx, summary),
        ImportKind::Strategies => strategies::import_rows(&tx, sheet, &map, ctx, summary),
    };

    match result {
        Ok(()) if ctx.options.dry_run => {
            tx.rollback()?;
            info!("Dry run: rolled back {} rows", summary.total_rows);
        }
        Ok(()) => tx.commit()?,
        Err(e) => {
            // Dropping the transaction rolls it back
            warn!("Import of {} rolled back: {:#}", summary.file, e);
            drop(tx);
            summary.fail_file("storage error; no rows from this file were saved");
        }
    }
    Ok(())
}

/// Read and ingest a single file
pub fn import_file(
    conn: &mut Connection,
    path: &Path,
    kind: ImportKind,
    ctx: &ImportContext,
) -> Result<ImportSummary> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let mut summary = ImportSummary::new(&file_name, kind.as_str());

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            summary.fail_file(format!("cannot read file: {}", e));
            return Ok(summary);
        }
    };
    let file_hash = blake3::hash(&bytes).to_hex().to_string();
    if let Some(when) = db::last_import_of(conn, &file_hash, kind.as_str())? {
        info!("{} has identical content to a file imported at {}", file_name, when);
    }

    let sheet = match read_sheet(path) {
        Ok(sheet) => sheet,
        Err(e) => {
            let message = match e.downcast_ref::<FundbookError>() {
                Some(domain) => domain.to_string(),
                None => format!("cannot parse file: {:#}", e),
            };
            summary.fail_file(message);
            return Ok(summary);
        }
    };

    import_sheet(conn, &sheet, kind, ctx, &mut summary)?;

    if !summary.dry_run {
        db::record_import(
            conn,
            &file_hash,
            &file_name,
            kind.as_str(),
            summary.success_count(),
            summary.failure_count(),
        )?;
    }

    info!(
        "Imported {}: {} created, {} updated, {} failed",
        file_name, summary.created, summary.updated, summary.failed
    );
    Ok(summary)
}

/// Ingest several files in order. One file failing never stops the others.
pub fn import_batch<P: AsRef<Path>>(
    conn: &mut Connection,
    paths: &[P],
    kind: ImportKind,
    ctx: &ImportContext,
    mut on_file_done: impl FnMut(&ImportSummary),
) -> Result<BatchSummary> {
    let mut batch = BatchSummary::default();
    for path in paths {
        let summary = import_file(conn, path.as_ref(), kind, ctx)?;
        on_file_done(&summary);
        batch.files.push(summary);
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_kind_names() {
        for kind in [
            ImportKind::Nav,
            ImportKind::Positions,
            ImportKind::Transactions,
            ImportKind::FundDividends,
            ImportKind::ClientDividends,
            ImportKind::Strategies,
        ] {
            assert_eq!(ImportKind::from_str(kind.as_str()), Ok(kind));
        }
        assert_eq!(ImportKind::from_str("client_dividends"), Ok(ImportKind::ClientDividends));
        assert!(ImportKind::from_str("prices").is_err());
    }
}
