//! Local CSV fallback
//!
//! Appends rows to `<dir>/availabilities_data.csv` instead of rewriting a
//! remote blob. Not used by the scheduled job.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use crate::models::availability_table::{AvailabilityTable, TableError};

pub const LOCAL_FILE_NAME: &str = "availabilities_data.csv";
pub const DEFAULT_OUTPUT_DIR: &str = "./data/raw";

/// Create the file with a header, or append rows without one.
///
/// Appended rows follow the header already on disk: columns the file lacks
/// are dropped (with a warning) and columns the table lacks stay empty.
pub fn save_data_locally(table: &AvailabilityTable, output_dir: &Path) -> Result<PathBuf, TableError> {
    fs::create_dir_all(output_dir)?;
    let path = output_dir.join(LOCAL_FILE_NAME);

    let header = if path.exists() { read_header(&path)? } else { Vec::new() };

    if header.is_empty() {
        fs::write(&path, table.to_csv()?)?;
        tracing::info!(rows = table.len(), path = %path.display(), "Created local availability file");
        return Ok(path);
    }

    let dropped: Vec<&str> = table
        .columns()
        .iter()
        .filter(|c| !header.contains(c))
        .map(String::as_str)
        .collect();
    if !dropped.is_empty() {
        tracing::warn!(columns = ?dropped, "Columns missing from local file header are not written");
    }

    let file = OpenOptions::new().append(true).open(&path)?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    for row in table.project(&header) {
        writer.write_record(&row)?;
    }
    writer.flush()?;

    tracing::info!(rows = table.len(), path = %path.display(), "Appended to local availability file");
    Ok(path)
}

fn read_header(path: &Path) -> Result<Vec<String>, TableError> {
    let mut reader = csv::Reader::from_path(path)?;
    Ok(reader.headers()?.iter().map(str::to_string).collect())
}
