//! Semi-structured availability table
//!
//! The upstream API owns the record schema, so rows are kept as strings keyed
//! by an ordered column list. Appending tables unions their columns in order of
//! first appearance and fills the gaps with empty values, which is also how the
//! CSV history treats missing cells.

use serde_json::{Map, Value};
use std::io::Read;
use thiserror::Error;

/// Separator used when nested JSON objects are flattened into column names
pub const COLUMN_SEPARATOR: char = '.';

#[derive(Debug, Error)]
pub enum TableError {
    #[error("record {index} is not a JSON object")]
    NotAnObject { index: usize },

    #[error("CSV line {line} has {found} fields, header has {expected}")]
    RaggedRow { line: u64, expected: usize, found: usize },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailabilityTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl AvailabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from already flat rows. Short rows are padded.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();

        Self { columns, rows }
    }

    /// Flatten a list of JSON records, one row per record.
    ///
    /// Nested objects become dotted columns (`vehicle.model.name`), arrays are
    /// kept as their JSON text and `null` becomes an empty cell.
    pub fn from_records(records: &[Value]) -> Result<Self, TableError> {
        let mut table = Self::new();

        for (index, record) in records.iter().enumerate() {
            let object = record
                .as_object()
                .ok_or(TableError::NotAnObject { index })?;

            let mut cells = Vec::new();
            flatten_object(None, object, &mut cells);
            table.push_record(cells);
        }

        Ok(table)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
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

    /// Cell value by row number and column name
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index).map(String::as_str)
    }

    /// All values of one column, empty cells included
    pub fn column_values(&self, column: &str) -> Vec<&str> {
        match self.column_index(column) {
            Some(index) => self.rows.iter().map(|row| row[index].as_str()).collect(),
            None => Vec::new(),
        }
    }

    /// Append one row given as (column, value) pairs, adding unknown columns.
    pub fn push_record(&mut self, cells: Vec<(String, String)>) {
        let mut row = vec![String::new(); self.columns.len()];

        for (column, value) in cells {
            let index = self.ensure_column(&column);
            if index >= row.len() {
                row.resize(index + 1, String::new());
            }
            row[index] = value;
        }

        self.rows.push(row);
    }

    /// Set `name` to `value` on every row, creating the column if needed.
    ///
    /// The column is added even when the table has no rows.
    pub fn set_column(&mut self, name: &str, value: &str) {
        let index = self.ensure_column(name);
        for row in &mut self.rows {
            row[index] = value.to_string();
        }
    }

    /// Append `other` after the rows of `self`, unioning the column sets.
    pub fn append(&mut self, other: AvailabilityTable) {
        let mapping: Vec<usize> = other
            .columns
            .iter()
            .map(|column| self.ensure_column(column))
            .collect();

        let width = self.columns.len();
        self.rows.reserve(other.rows.len());

        for source in other.rows {
            let mut row = vec![String::new(); width];
            for (value, &target) in source.into_iter().zip(&mapping) {
                row[target] = value;
            }
            self.rows.push(row);
        }
    }

    /// Rows re-ordered to match `columns`; values of other columns are dropped
    /// and columns this table lacks come out empty.
    pub fn project(&self, columns: &[String]) -> Vec<Vec<String>> {
        let mapping: Vec<Option<usize>> = columns.iter().map(|c| self.column_index(c)).collect();

        self.rows
            .iter()
            .map(|row| {
                mapping
                    .iter()
                    .map(|index| index.map(|i| row[i].clone()).unwrap_or_default())
                    .collect()
            })
            .collect()
    }

    /// Serialize as UTF-8 CSV with a header row and no index column.
    pub fn to_csv(&self) -> Result<Vec<u8>, TableError> {
        if self.columns.is_empty() {
            return Ok(Vec::new());
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }

        writer.into_inner().map_err(|e| TableError::Io(e.into_error()))
    }

    /// Parse CSV with a header row. Short rows are padded to the header
    /// width; a row with more fields than the header is an error.
    pub fn from_csv<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let width = columns.len();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.len() > width {
                return Err(TableError::RaggedRow {
                    line: record.position().map_or(0, |p| p.line()),
                    expected: width,
                    found: record.len(),
                });
            }

            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(width, String::new());
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }

    fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(index) = self.column_index(name) {
            return index;
        }

        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(String::new());
        }
        self.columns.len() - 1
    }
}

fn flatten_object(prefix: Option<&str>, object: &Map<String, Value>, cells: &mut Vec<(String, String)>) {
    for (key, value) in object {
        let column = match prefix {
            Some(prefix) => format!("{prefix}{COLUMN_SEPARATOR}{key}"),
            None => key.clone(),
        };

        match value {
            Value::Object(nested) => flatten_object(Some(&column), nested, cells),
            other => cells.push((column, cell_text(other))),
        }
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
