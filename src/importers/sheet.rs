//! Format-agnostic tabular reader for spreadsheet and CSV exports.

use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::path::Path;
use tracing::{debug, info};

use crate::error::FundbookError;
use crate::normalize::{parse_date, parse_decimal_text};

/// A single cell, detached from the file format it came from
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Bool(bool),
}

/// Excel serial day zero (with the 1900 leap-year bug folded in)
fn excel_epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1899, 12, 30)
}

/// Serial of 9999-12-31, the last date Excel can store
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let days = chrono::Duration::try_days(serial.floor() as i64)?;
    excel_epoch()?.checked_add_signed(days)
}

impl Cell {
    pub fn from_data(data: &Data) -> Self {
        match data {
            Data::Empty | Data::Error(_) => Cell::Empty,
            Data::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(trimmed.to_string())
                }
            }
            Data::Int(i) => Cell::Int(*i),
            Data::Float(f) => Cell::Float(*f),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())
                .map(Cell::Date)
                .unwrap_or(Cell::Empty),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::from_text(s),
        }
    }

    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// Display form; whole floats lose their `.0` so numeric ids survive.
    pub fn text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => Some(s.clone()),
            Cell::Int(i) => Some(i.to_string()),
            Cell::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
            Cell::Float(f) => Some(f.to_string()),
            Cell::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Cell::Bool(b) => Some(b.to_string()),
        }
    }

    pub fn as_date(&self) -> Result<Option<NaiveDate>, FundbookError> {
        match self {
            Cell::Empty => Ok(None),
            Cell::Date(d) => Ok(Some(*d)),
            // 8-digit integers are compact dates, smaller ones Excel serials
            Cell::Int(i) if *i >= 10_000_000 => parse_date(&i.to_string()).map(Some),
            Cell::Int(i) => excel_serial_to_date(*i as f64)
                .map(Some)
                .ok_or_else(|| FundbookError::InvalidDate(i.to_string())),
            Cell::Float(f) if *f >= 10_000_000.0 => parse_date(&format!("{}", *f as i64)).map(Some),
            Cell::Float(f) => excel_serial_to_date(*f)
                .map(Some)
                .ok_or_else(|| FundbookError::InvalidDate(f.to_string())),
            Cell::Text(s) => parse_date(s).map(Some),
            Cell::Bool(b) => Err(FundbookError::InvalidDate(b.to_string())),
        }
    }

    pub fn as_decimal(&self) -> Result<Option<Decimal>, FundbookError> {
        match self {
            Cell::Empty => Ok(None),
            Cell::Int(i) => Ok(Some(Decimal::from(*i))),
            Cell::Float(f) => Decimal::try_from(*f)
                .map(Some)
                .map_err(|_| FundbookError::InvalidNumber(f.to_string())),
            Cell::Text(s) => parse_decimal_text(s),
            Cell::Date(d) => Err(FundbookError::InvalidNumber(d.to_string())),
            Cell::Bool(b) => Err(FundbookError::InvalidNumber(b.to_string())),
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Cell::Bool(b) => *b,
            Cell::Int(i) => *i != 0,
            Cell::Float(f) => *f != 0.0,
            Cell::Text(s) => matches!(
                s.trim().to_lowercase().as_str(),
                "true" | "1" | "yes" | "y" | "是" | "qd"
            ),
            Cell::Empty | Cell::Date(_) => false,
        }
    }
}

/// Raw rows of the first worksheet (or of a CSV file)
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Self {
        Self { rows }
    }
}

/// Read a spreadsheet or CSV file, dispatching on the extension
pub fn read_sheet<P: AsRef<Path>>(file_path: P) -> Result<Sheet> {
    let path = file_path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    info!("Reading {:?} (type: {})", path, extension);

    match extension.as_str() {
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => read_workbook(path),
        "csv" | "txt" => read_csv(path),
        _ => Err(FundbookError::UnsupportedFile(format!(
            "{} (supported: .xlsx, .xls, .ods, .csv)",
            path.display()
        ))
        .into()),
    }
}

fn read_workbook(path: &Path) -> Result<Sheet> {
    let mut workbook = open_workbook_auto(path).context("Failed to open spreadsheet")?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| FundbookError::UnsupportedFile(format!("{} has no worksheets", path.display())))?;

    debug!("Using worksheet: {}", sheet_name);

    let range = workbook
        .worksheet_range(&sheet_name)
        .context("Failed to read worksheet")?;

    let rows = range
        .rows()
        .map(|row| row.iter().map(Cell::from_data).collect())
        .collect();
    Ok(Sheet::from_rows(rows))
}

/// Decode CSV bytes: UTF-8 (with or without BOM), else GBK as written by
/// Chinese-locale spreadsheet software.
pub fn decode_csv_bytes(bytes: &[u8]) -> String {
    let without_bom = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(without_bom) {
        Ok(text) => text.to_string(),
        Err(_) => {
            debug!("CSV is not UTF-8, decoding as GBK");
            let (decoded, _, _) = encoding_rs::GBK.decode(without_bom);
            decoded.into_owned()
        }
    }
}

fn detect_delimiter(content: &str) -> u8 {
    let first_line = content.lines().next().unwrap_or_default();
    [b'\t', b';', b',']
        .into_iter()
        .max_by_key(|d| first_line.bytes().filter(|b| b == d).count())
        .unwrap_or(b',')
}

fn read_csv(path: &Path) -> Result<Sheet> {
    let bytes = std::fs::read(path).context("Failed to read CSV file")?;
    parse_csv_content(&decode_csv_bytes(&bytes))
}

pub fn parse_csv_content(content: &str) -> Result<Sheet> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(detect_delimiter(content))
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("Failed to read CSV record")?;
        rows.push(record.iter().map(Cell::from_text).collect());
    }
    Ok(Sheet::from_rows(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_cell_text_drops_float_suffix() {
        assert_eq!(Cell::Float(319506.0).text().as_deref(), Some("319506"));
        assert_eq!(Cell::Float(1.5).text().as_deref(), Some("1.5"));
        assert_eq!(Cell::Empty.text(), None);
    }

    #[test]
    fn test_cell_dates() {
        let expected = NaiveDate::from_ymd_opt(2025, 8, 15).unwrap();
        assert_eq!(Cell::Int(20250815).as_date().unwrap(), Some(expected));
        assert_eq!(Cell::Float(45884.0).as_date().unwrap(), Some(expected));
        assert_eq!(Cell::Text("2025年8月15日".into()).as_date().unwrap(), Some(expected));
        assert!(Cell::Text("soon".into()).as_date().is_err());
        assert_eq!(Cell::Empty.as_date().unwrap(), None);
    }

    #[test]
    fn test_out_of_range_serials_are_invalid_dates() {
        for cell in [
            Cell::Float(-1e300),
            Cell::Float(f64::NAN),
            Cell::Float(3_000_000.0),
            Cell::Int(-5),
            Cell::Int(0),
        ] {
            assert!(
                matches!(cell.as_date(), Err(FundbookError::InvalidDate(_))),
                "{:?} should be rejected",
                cell
            );
        }
        let last = NaiveDate::from_ymd_opt(9999, 12, 31).unwrap();
        assert_eq!(Cell::Int(2_958_465).as_date().unwrap(), Some(last));
    }

    #[test]
    fn test_cell_decimals() {
        assert_eq!(Cell::Float(1.261).as_decimal().unwrap(), Some(dec!(1.261)));
        assert_eq!(Cell::Int(1000).as_decimal().unwrap(), Some(dec!(1000)));
        assert_eq!(Cell::Text("1,258,000".into()).as_decimal().unwrap(), Some(dec!(1258000)));
        assert!(Cell::Text("n/a?".into()).as_decimal().is_err());
    }

    #[test]
    fn test_bool_cells() {
        assert!(Cell::Text("是".into()).as_bool());
        assert!(Cell::Text("QD".into()).as_bool());
        assert!(!Cell::Text("否".into()).as_bool());
        assert!(Cell::Int(1).as_bool());
    }

    #[test]
    fn test_gbk_csv_is_decoded() {
        let (encoded, _, _) = encoding_rs::GBK.encode("基金代码,单位净值\nL03126,1.261\n");
        let text = decode_csv_bytes(&encoded);
        let sheet = parse_csv_content(&text).unwrap();
        assert_eq!(sheet.rows[0][0], Cell::Text("基金代码".into()));
        assert_eq!(sheet.rows[1][1], Cell::Text("1.261".into()));
    }

    #[test]
    fn test_semicolon_delimiter_detected() {
        let sheet = parse_csv_content("a;b;c\n1;2;3\n").unwrap();
        assert_eq!(sheet.rows[1].len(), 3);
    }
}
