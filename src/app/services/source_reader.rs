//! Tabular source reading
//!
//! Reads CSV and spreadsheet files into a [`SourceTable`]: the header row and
//! one [`RawRecord`] per non-blank data row. CSV files go through the `csv`
//! crate; xlsx, xlsm, xls, and ods go through `calamine`, first worksheet only.

use crate::app::models::RawRecord;
use crate::{Error, Result};
use calamine::{Data, DataType, Reader, open_workbook_auto};
use chrono::NaiveTime;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

const BOM: char = '\u{feff}';

/// File formats the reader understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Spreadsheet,
}

impl SourceFormat {
    /// Format implied by a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "csv" | "txt" => Some(SourceFormat::Csv),
            "xlsx" | "xlsm" | "xls" | "ods" => Some(SourceFormat::Spreadsheet),
            _ => None,
        }
    }
}

/// Headers and data rows of one source file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRecord>,
}

impl SourceTable {
    /// Build a table from a header row and raw cell rows
    ///
    /// Blank headers are named `column_<n>` (1-based), repeated headers get a
    /// numeric suffix, short rows are padded, and blank rows are dropped. Row
    /// indexes count every data row, so they still point at the source line.
    pub fn from_cells(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let headers = unique_headers(headers);
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(index, cells)| {
                let mut cells = cells.into_iter();
                RawRecord::new(
                    index,
                    headers
                        .iter()
                        .map(|header| {
                            let value = cells.next().unwrap_or_default();
                            (header.clone(), value.trim().to_string())
                        })
                        .collect(),
                )
            })
            .filter(|row| !row.is_blank())
            .collect();
        Self { headers, rows }
    }

    /// Parse CSV text with a header row
    pub fn from_csv_str(content: &str) -> Result<Self> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(content.as_bytes());
        read_csv_records(reader, "<inline>")
    }

    /// First `n` rows, used for structure detection and previews
    pub fn sample(&self, n: usize) -> &[RawRecord] {
        &self.rows[..self.rows.len().min(n)]
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Read a source file, dispatching on its extension
///
/// # Errors
///
/// Returns `FileNotFound` for a missing path, `UnsupportedFormat` for an
/// unknown extension, and `CsvParsing` or `Spreadsheet` for unreadable
/// content.
pub fn read_source(path: &Path) -> Result<SourceTable> {
    if !path.exists() {
        return Err(Error::file_not_found(path.display().to_string()));
    }
    let format = SourceFormat::from_path(path)
        .ok_or_else(|| Error::unsupported_format(path.display().to_string()))?;

    let table = match format {
        SourceFormat::Csv => read_csv(path)?,
        SourceFormat::Spreadsheet => read_spreadsheet(path)?,
    };

    info!(
        "Read {} data rows with {} columns from {}",
        table.rows.len(),
        table.headers.len(),
        path.display()
    );
    Ok(table)
}

/// Read a source file on the blocking thread pool
pub async fn read_source_async(path: &Path) -> Result<SourceTable> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || read_source(&owned))
        .await
        .map_err(|e| Error::processing_interrupted(format!("Source reader task failed: {}", e)))?
}

fn read_csv(path: &Path) -> Result<SourceTable> {
    let file_name = path.display().to_string();
    let reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| {
            Error::csv_parsing(file_name.clone(), "Failed to open CSV file", Some(e))
        })?;
    read_csv_records(reader, &file_name)
}

fn read_csv_records<R: std::io::Read>(
    mut reader: csv::Reader<R>,
    file_name: &str,
) -> Result<SourceTable> {
    let mut records = reader.records();

    let headers: Vec<String> = match records.next() {
        Some(record) => record
            .map_err(|e| Error::csv_parsing(file_name, "Failed to read header row", Some(e)))?
            .iter()
            .map(|cell| cell.to_string())
            .collect(),
        None => return Ok(SourceTable::default()),
    };

    let mut rows = Vec::new();
    for record in records {
        let record = record
            .map_err(|e| Error::csv_parsing(file_name, "Failed to read CSV record", Some(e)))?;
        rows.push(record.iter().map(|cell| cell.to_string()).collect());
    }

    debug!("Parsed {} CSV records from {}", rows.len(), file_name);
    Ok(SourceTable::from_cells(headers, rows))
}

fn read_spreadsheet(path: &Path) -> Result<SourceTable> {
    let file_name = path.display().to_string();
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| Error::spreadsheet(file_name.clone(), format!("Failed to open workbook: {}", e)))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| Error::spreadsheet(file_name.clone(), "Workbook has no worksheets"))?;
    let range = workbook.worksheet_range(&sheet_name).map_err(|e| {
        Error::spreadsheet(
            file_name.clone(),
            format!("Failed to read worksheet '{}': {}", sheet_name, e),
        )
    })?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<String>>());
    let Some(headers) = rows.next() else {
        return Ok(SourceTable::default());
    };
    let rows: Vec<Vec<String>> = rows.collect();

    debug!(
        "Read worksheet '{}' of {} with {} rows",
        sheet_name,
        file_name,
        rows.len()
    );
    Ok(SourceTable::from_cells(headers, rows))
}

/// Text of a spreadsheet cell; integral floats lose their ".0"
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Error(_) => String::new(),
        Data::DateTime(_) | Data::DateTimeIso(_) => match cell.as_datetime() {
            Some(datetime) if datetime.time() == NaiveTime::MIN => {
                datetime.date().format("%Y-%m-%d").to_string()
            }
            Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => cell.to_string(),
        },
        other => other.to_string(),
    }
}

fn unique_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    headers
        .into_iter()
        .enumerate()
        .map(|(position, header)| {
            let header = header.trim().trim_start_matches(BOM).trim().to_string();
            let header = if header.is_empty() {
                format!("column_{}", position + 1)
            } else {
                header
            };
            let count = seen.entry(header.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                header
            } else {
                format!("{}_{}", header, count)
            }
        })
        .collect()
}
