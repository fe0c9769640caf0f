use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use box_traverse_core::config::CsvColumns;
use box_traverse_core::input::{normalize_row, CsvRow};
use tracing::{error, info};

/// Reads the owner/item CSV at `path`.
///
/// Rows missing a required column are logged and skipped. A file that cannot be read or
/// parsed is an error.
pub fn read_rows(path: &Path, columns: &CsvColumns) -> Result<Vec<CsvRow>> {
    info!(csv_path = ?path, "Reading item CSV");
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open CSV file {path:?}"))?;
    let rows = parse_rows(file, columns).with_context(|| format!("Failed to parse CSV file {path:?}"))?;
    info!(csv_path = ?path, rows = rows.len(), "CSV rows accepted");
    Ok(rows)
}

pub fn parse_rows<R: Read>(reader: R, columns: &CsvColumns) -> Result<Vec<CsvRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let fields: HashMap<String, String> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect();
        match normalize_row(index, &fields, columns) {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => {}
            Err(e) => error!(
                correlation_id = "N/A",
                action = "VALIDATE_CSV_ROW",
                row = index,
                "{e}"
            ),
        }
    }
    Ok(rows)
}
