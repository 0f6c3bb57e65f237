//! Turns upstream availability payloads into history rows
//!
//! Each payload is flattened to one row per vehicle and stamped with the
//! query window. On request the stored history is loaded and the new rows
//! are appended after it.

use serde_json::Value;
use thiserror::Error;

use crate::models::availability_table::{AvailabilityTable, TableError};
use crate::services::blob_storage::{BlobStore, StorageError};
use crate::services::time_window::TimeWindow;

/// Where the accumulated history lives
pub const HISTORY_CONTAINER: &str = "data";
pub const HISTORY_BLOB: &str = "availabilities_data.csv";

/// Key of the per-vehicle array in the upstream response
pub const RECORDS_KEY: &str = "vehicleAvailabilities";

pub const TIMESTAMP_FROM_COLUMN: &str = "timestamp.from";
pub const TIMESTAMP_TO_COLUMN: &str = "timestamp.to";

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("response has no `vehicleAvailabilities` array")]
    MissingRecords,

    #[error("malformed availability record: {0}")]
    Table(#[from] TableError),

    #[error("failed to load availability history: {0}")]
    History(#[from] StorageError),
}

/// New rows, possibly preceded by the stored history
#[derive(Debug, Clone, Default)]
pub struct PreparedData {
    pub table: AvailabilityTable,
    pub history_rows: usize,
}

impl PreparedData {
    pub fn new_rows(&self) -> usize {
        self.table.len() - self.history_rows
    }
}

/// Flatten `vehicleAvailabilities` and attach the window columns.
///
/// An empty vehicle list yields a table with no rows but with both
/// timestamp columns.
pub fn flatten_response(response: &Value, window: &TimeWindow) -> Result<AvailabilityTable, MergeError> {
    let records = response
        .get(RECORDS_KEY)
        .and_then(Value::as_array)
        .ok_or(MergeError::MissingRecords)?;

    let mut table = AvailabilityTable::from_records(records)?;
    table.set_column(TIMESTAMP_FROM_COLUMN, &window.from_iso());
    table.set_column(TIMESTAMP_TO_COLUMN, &window.to_iso());

    Ok(table)
}

pub struct TableMerger<'a> {
    store: &'a dyn BlobStore,
}

impl<'a> TableMerger<'a> {
    pub fn new(store: &'a dyn BlobStore) -> Self {
        Self { store }
    }

    /// Stored history, or an empty table before the first upload
    pub async fn load_history(&self) -> Result<AvailabilityTable, StorageError> {
        match self.store.download_table(HISTORY_CONTAINER, HISTORY_BLOB).await? {
            Some(history) => {
                tracing::info!(rows = history.len(), "Loaded availability history");
                Ok(history)
            }
            None => {
                tracing::warn!(
                    "No history blob {}/{} yet, starting a new one",
                    HISTORY_CONTAINER,
                    HISTORY_BLOB
                );
                Ok(AvailabilityTable::new())
            }
        }
    }

    /// Flatten `response`; with `fetch_old_data` the result is
    /// history ++ new rows, otherwise just the new rows.
    pub async fn prepare_data_for_file(
        &self,
        response: &Value,
        window: &TimeWindow,
        fetch_old_data: bool,
    ) -> Result<PreparedData, MergeError> {
        let new_rows = flatten_response(response, window)?;

        if !fetch_old_data {
            return Ok(PreparedData {
                table: new_rows,
                history_rows: 0,
            });
        }

        let mut table = self.load_history().await?;
        let history_rows = table.len();
        table.append(new_rows);

        Ok(PreparedData {
            table,
            history_rows,
        })
    }
}
