//! Untyped tabular snapshot shared by the store and CSV paths.

use crate::error::{AppError, Result};
use crate::models::IncidentRecord;
use std::io::Read;

/// Header plus rows of optional cells; blank cells are `None`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Parse a CSV document with a header row
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(
                record
                    .iter()
                    .map(|cell| {
                        if cell.is_empty() || is_null_marker(cell) {
                            None
                        } else {
                            Some(cell.to_string())
                        }
                    })
                    .collect(),
            );
        }

        Ok(Self { columns, rows })
    }

    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_csv_reader(bytes)
    }

    /// Snapshot of store rows in export column order
    pub fn from_records(records: &[IncidentRecord]) -> Self {
        Self {
            columns: IncidentRecord::columns(),
            rows: records
                .iter()
                .map(|r| r.cells().into_iter().map(Some).collect())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell value, `None` for blanks and short rows
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(|c| c.as_deref())
    }

    /// All values of one column
    pub fn column_values(&self, column: usize) -> Vec<Option<String>> {
        self.rows
            .iter()
            .map(|r| r.get(column).cloned().flatten())
            .collect()
    }

    /// Append a column; `values` must have one entry per row
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<String>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(AppError::Internal(format!(
                "column has {} values for {} rows",
                values.len(),
                self.rows.len()
            )));
        }
        self.columns.push(name.into());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(Some(value));
        }
        Ok(())
    }

    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.write_csv(&mut buffer)?;
        Ok(buffer)
    }
}

fn is_null_marker(cell: &str) -> bool {
    matches!(
        cell.to_ascii_lowercase().as_str(),
        "nan" | "null" | "none" | "na" | "n/a"
    )
}

/// Parse an integer cell, accepting integral floats such as `"3.0"`
pub fn parse_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(value);
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 => {
            Some(value as i64)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv_with_blanks() {
        let csv = "A,B,C\n1, 2 ,\n4,nan,6\n";
        let table = RawTable::from_csv_bytes(csv.as_bytes()).unwrap();
        assert_eq!(table.columns, vec!["A", "B", "C"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(0, 1), Some("2"));
        assert_eq!(table.cell(0, 2), None);
        assert_eq!(table.cell(1, 1), None);
    }

    #[test]
    fn test_bom_is_stripped_from_header() {
        let csv = "\u{feff}ZONA,MES\n1,2\n";
        let table = RawTable::from_csv_bytes(csv.as_bytes()).unwrap();
        assert_eq!(table.columns[0], "ZONA");
    }

    #[test]
    fn test_ragged_rows_are_malformed() {
        let csv = "A,B\n1,2,3\n";
        let err = RawTable::from_csv_bytes(csv.as_bytes()).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer("3"), Some(3));
        assert_eq!(parse_integer(" -2 "), Some(-2));
        assert_eq!(parse_integer("3.0"), Some(3));
        assert_eq!(parse_integer("3.5"), None);
        assert_eq!(parse_integer("abc"), None);
        assert_eq!(parse_integer("inf"), None);
    }

    #[test]
    fn test_push_column_and_write() {
        let mut table = RawTable::from_csv_bytes(b"A\n1\n2\n").unwrap();
        table
            .push_column("B", vec!["x".to_string(), "y".to_string()])
            .unwrap();
        let out = String::from_utf8(table.to_csv_bytes().unwrap()).unwrap();
        assert_eq!(out, "A,B\n1,x\n2,y\n");
        assert!(table.push_column("C", vec![]).is_err());
    }
}
