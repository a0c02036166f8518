//! Row-level validation issues and per-file / per-batch import summaries.
//!
//! Ingestion collects every problem instead of stopping at the first bad row;
//! only a persistence failure aborts (and rolls back) a file.

use serde::Serialize;
use std::collections::BTreeMap;

/// A problem with one row of an import file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowIssue {
    /// Row number in the import file (1-indexed, as shown by spreadsheet software)
    pub row: usize,
    /// Field name that has the issue (e.g. "nav_date", "unit_nav")
    pub field: String,
    /// The problematic value
    pub value: String,
    /// Description of why this is an issue
    pub reason: String,
}

impl RowIssue {
    pub fn new(
        row: usize,
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            row,
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for RowIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.value.is_empty() {
            write!(f, "row {}: {}: {}", self.row, self.field, self.reason)
        } else {
            write!(
                f,
                "row {}: {} '{}': {}",
                self.row, self.field, self.value, self.reason
            )
        }
    }
}

/// Outcome of ingesting one file
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub file: String,
    pub kind: String,
    pub total_rows: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    /// Funds and clients created implicitly by rows of this file
    pub auto_created: usize,
    /// Rows stored with a label no rule could classify
    pub queued_for_review: usize,
    pub issues: Vec<RowIssue>,
    /// Set when the whole file was rejected or rolled back
    pub file_error: Option<String>,
    pub dry_run: bool,
}

impl ImportSummary {
    pub fn new(file: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn success_count(&self) -> usize {
        self.created + self.updated
    }

    pub fn failure_count(&self) -> usize {
        self.failed
    }

    pub fn reject(&mut self, issue: RowIssue) {
        tracing::debug!("Rejected {}", issue);
        self.failed += 1;
        self.issues.push(issue);
    }

    /// Mark the file as rejected as a whole. Counted writes are discarded
    /// because the surrounding transaction did not commit.
    pub fn fail_file(&mut self, message: impl Into<String>) {
        self.failed = self.total_rows.max(self.failed);
        self.created = 0;
        self.updated = 0;
        self.auto_created = 0;
        self.queued_for_review = 0;
        self.file_error = Some(message.into());
    }

    pub fn is_file_failure(&self) -> bool {
        self.file_error.is_some()
    }

    /// Count issues by field for summary reporting
    pub fn issue_summary(&self) -> BTreeMap<String, usize> {
        let mut summary = BTreeMap::new();
        for issue in &self.issues {
            *summary.entry(issue.field.clone()).or_insert(0) += 1;
        }
        summary
    }
}

/// Outcome of ingesting several files of the same kind
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub files: Vec<ImportSummary>,
}

impl BatchSummary {
    pub fn success_count(&self) -> usize {
        self.files.iter().map(ImportSummary::success_count).sum()
    }

    pub fn failure_count(&self) -> usize {
        self.files.iter().map(ImportSummary::failure_count).sum()
    }

    pub fn created(&self) -> usize {
        self.files.iter().map(|f| f.created).sum()
    }

    pub fn updated(&self) -> usize {
        self.files.iter().map(|f| f.updated).sum()
    }

    pub fn failed_files(&self) -> usize {
        self.files.iter().filter(|f| f.is_file_failure()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_display() {
        let issue = RowIssue::new(7, "unit_nav", "-1", "unit NAV must be positive");
        assert_eq!(issue.to_string(), "row 7: unit_nav '-1': unit NAV must be positive");
        let blank = RowIssue::new(3, "group_id", "", "group_id is required");
        assert_eq!(blank.to_string(), "row 3: group_id: group_id is required");
    }

    #[test]
    fn test_fail_file_discards_counted_writes() {
        let mut summary = ImportSummary::new("nav.xlsx", "nav");
        summary.total_rows = 5;
        summary.created = 3;
        summary.reject(RowIssue::new(4, "nav_date", "x", "bad"));
        summary.fail_file("database is locked");

        assert_eq!(summary.success_count(), 0);
        assert_eq!(summary.failure_count(), 5);
        assert!(summary.is_file_failure());
        assert_eq!(summary.issue_summary().get("nav_date"), Some(&1));
    }

    #[test]
    fn test_batch_totals() {
        let mut a = ImportSummary::new("a.xlsx", "nav");
        a.created = 2;
        let mut b = ImportSummary::new("b.xlsx", "nav");
        b.updated = 1;
        b.failed = 1;
        let batch = BatchSummary { files: vec![a, b] };
        assert_eq!(batch.success_count(), 3);
        assert_eq!(batch.failure_count(), 1);
        assert_eq!(batch.failed_files(), 0);
    }
}
