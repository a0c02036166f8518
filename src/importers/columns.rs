//! Header detection and bilingual column-name mapping.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use super::sheet::{Cell, Sheet};
use super::validation::RowIssue;
use crate::error::FundbookError;

/// How many leading rows may precede the header (titles, notes)
const HEADER_SCAN_ROWS: usize = 10;

/// A logical field and the header labels it may appear under
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub labels: &'static [&'static str],
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(name: &'static str, labels: &'static [&'static str]) -> Self {
        Self {
            name,
            labels,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, labels: &'static [&'static str]) -> Self {
        Self {
            name,
            labels,
            required: false,
        }
    }

    /// Label shown to users when the column is missing
    fn display_label(&self) -> String {
        match self.labels.first() {
            Some(label) => format!("{} ({})", label, self.name),
            None => self.name.to_string(),
        }
    }
}

/// Fold full-width characters, case and whitespace out of a header label.
pub fn normalize_label(raw: &str) -> String {
    raw.nfkc()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

/// Resolved positions of the fields present in a sheet
#[derive(Debug, Clone)]
pub struct ColumnMap {
    header_row: usize,
    columns: HashMap<&'static str, usize>,
}

impl ColumnMap {
    fn from_header(header: &[Cell], specs: &[FieldSpec]) -> Self {
        let labels: Vec<Option<String>> = header
            .iter()
            .map(|cell| cell.text().map(|t| normalize_label(&t)))
            .collect();

        let mut columns = HashMap::new();
        for spec in specs {
            let wanted: Vec<String> = spec.labels.iter().map(|l| normalize_label(l)).collect();
            // Synonyms are listed by preference, so the first listed label wins
            let found = wanted.iter().find_map(|w| {
                labels
                    .iter()
                    .position(|l| l.as_deref() == Some(w.as_str()))
            });
            if let Some(idx) = found {
                columns.insert(spec.name, idx);
            }
        }

        Self {
            header_row: 0,
            columns,
        }
    }

    fn missing(&self, specs: &[FieldSpec]) -> Vec<String> {
        specs
            .iter()
            .filter(|s| s.required && !self.columns.contains_key(s.name))
            .map(FieldSpec::display_label)
            .collect()
    }

    /// Locate the header row and map its columns.
    ///
    /// The first row among the leading rows that carries every required
    /// field is the header. When no row qualifies, the error names the
    /// required columns missing from the best candidate.
    pub fn locate(sheet: &Sheet, specs: &[FieldSpec]) -> Result<Self, FundbookError> {
        let mut best: Option<ColumnMap> = None;

        for (idx, row) in sheet.rows.iter().take(HEADER_SCAN_ROWS).enumerate() {
            if row.iter().all(Cell::is_blank) {
                continue;
            }
            let mut map = ColumnMap::from_header(row, specs);
            map.header_row = idx;

            if map.missing(specs).is_empty() {
                debug!("Header found at row {}: {:?}", idx + 1, map.columns);
                return Ok(map);
            }
            if best.as_ref().map_or(true, |b| map.columns.len() > b.columns.len()) {
                best = Some(map);
            }
        }

        let missing = match best {
            Some(map) => map.missing(specs),
            None => specs
                .iter()
                .filter(|s| s.required)
                .map(FieldSpec::display_label)
                .collect(),
        };
        Err(FundbookError::MissingColumns(missing))
    }

    pub fn has(&self, field: &str) -> bool {
        self.columns.contains_key(field)
    }

    /// Data rows following the header, with their 1-based spreadsheet row number.
    /// Fully blank rows are skipped.
    pub fn data_rows<'a>(&'a self, sheet: &'a Sheet) -> impl Iterator<Item = SheetRow<'a>> + 'a {
        sheet
            .rows
            .iter()
            .enumerate()
            .skip(self.header_row + 1)
            .filter(|(_, cells)| !cells.iter().all(Cell::is_blank))
            .map(move |(idx, cells)| SheetRow {
                number: idx + 1,
                cells,
                map: self,
            })
    }
}

/// One data row with typed, field-named accessors
#[derive(Debug, Clone, Copy)]
pub struct SheetRow<'a> {
    pub number: usize,
    cells: &'a [Cell],
    map: &'a ColumnMap,
}

impl<'a> SheetRow<'a> {
    pub fn cell(&self, field: &str) -> Option<&'a Cell> {
        self.map
            .columns
            .get(field)
            .and_then(|idx| self.cells.get(*idx))
            .filter(|c| !c.is_blank())
    }

    fn raw(&self, field: &str) -> String {
        self.cell(field).and_then(Cell::text).unwrap_or_default()
    }

    pub fn text(&self, field: &str) -> Option<String> {
        self.cell(field)
            .and_then(Cell::text)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    pub fn required_text(&self, field: &str) -> Result<String, RowIssue> {
        self.text(field)
            .ok_or_else(|| RowIssue::new(self.number, field, "", format!("{} is required", field)))
    }

    pub fn date(&self, field: &str) -> Result<Option<NaiveDate>, RowIssue> {
        match self.cell(field) {
            None => Ok(None),
            Some(cell) => cell
                .as_date()
                .map_err(|e| RowIssue::new(self.number, field, self.raw(field), e.to_string())),
        }
    }

    pub fn required_date(&self, field: &str) -> Result<NaiveDate, RowIssue> {
        self.date(field)?
            .ok_or_else(|| RowIssue::new(self.number, field, "", format!("{} is required", field)))
    }

    pub fn decimal(&self, field: &str) -> Result<Option<Decimal>, RowIssue> {
        match self.cell(field) {
            None => Ok(None),
            Some(cell) => cell
                .as_decimal()
                .map_err(|e| RowIssue::new(self.number, field, self.raw(field), e.to_string())),
        }
    }

    pub fn required_decimal(&self, field: &str) -> Result<Decimal, RowIssue> {
        self.decimal(field)?
            .ok_or_else(|| RowIssue::new(self.number, field, "", format!("{} is required", field)))
    }

    pub fn flag(&self, field: &str) -> bool {
        self.cell(field).map(Cell::as_bool).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: &[FieldSpec] = &[
        FieldSpec::required("fund_code", &["基金代码", "产品代码", "fund_code"]),
        FieldSpec::required("nav_date", &["净值日期", "nav_date"]),
        FieldSpec::optional("fund_name", &["产品名称", "fund_name"]),
    ];

    fn text_row(values: &[&str]) -> Vec<Cell> {
        values.iter().map(|v| Cell::from_text(v)).collect()
    }

    #[test]
    fn test_header_after_title_rows() {
        let sheet = Sheet::from_rows(vec![
            text_row(&["净值报表"]),
            text_row(&[]),
            text_row(&["备注", "净值日期", "基金代码"]),
            text_row(&["", "20250815", "L03126"]),
            text_row(&["", "", ""]),
            text_row(&["", "20250816", "L03126"]),
        ]);
        let map = ColumnMap::locate(&sheet, SPECS).unwrap();
        assert!(!map.has("fund_name"));

        let rows: Vec<SheetRow> = map.data_rows(&sheet).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].number, 4);
        assert_eq!(rows[1].number, 6);
        assert_eq!(rows[0].text("fund_code").as_deref(), Some("L03126"));
    }

    #[test]
    fn test_labels_are_normalized() {
        let sheet = Sheet::from_rows(vec![text_row(&["FUND_CODE ", "Nav_Date"])]);
        assert!(ColumnMap::locate(&sheet, SPECS).is_ok());

        // Full-width parentheses fold to ASCII
        assert_eq!(normalize_label("含费成本（元）"), normalize_label("含费成本(元)"));
    }

    #[test]
    fn test_missing_columns_are_named() {
        let sheet = Sheet::from_rows(vec![text_row(&["基金代码", "产品名称"])]);
        let err = ColumnMap::locate(&sheet, SPECS).unwrap_err();
        match err {
            FundbookError::MissingColumns(missing) => {
                assert_eq!(missing, vec!["净值日期 (nav_date)".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_row_issue_carries_field_and_value() {
        let sheet = Sheet::from_rows(vec![
            text_row(&["基金代码", "净值日期"]),
            text_row(&["L03126", "someday"]),
        ]);
        let map = ColumnMap::locate(&sheet, SPECS).unwrap();
        let row = map.data_rows(&sheet).next().unwrap();
        let issue = row.required_date("nav_date").unwrap_err();
        assert_eq!(issue.row, 2);
        assert_eq!(issue.field, "nav_date");
        assert_eq!(issue.value, "someday");
    }
}
