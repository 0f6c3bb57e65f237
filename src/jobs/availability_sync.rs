//! Availability sync job
//!
//! One run polls every configured station for the next half-hour window,
//! folds the per-station results into a single table on top of the stored
//! history and writes that table back over the history blob.
//!
//! Runs must not overlap: the history is read and rewritten without any
//! locking, so concurrent runs lose rows (last writer wins). Rows are not
//! deduplicated either; re-running the same window appends the same rows
//! again.

use chrono::Utc;
use std::future::Future;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::config::{ScraperConfig, StationPause};
use crate::models::availability_table::AvailabilityTable;
use crate::scrapers::{AvailabilitySource, ScrapeError, StationId};
use crate::services::blob_storage::{BlobStore, StorageError};
use crate::services::table_merger::{MergeError, TableMerger, HISTORY_BLOB, HISTORY_CONTAINER};
use crate::services::time_window::TimeWindow;

/// A tick this late is reported as past due
const PAST_DUE_TOLERANCE: Duration = Duration::from_secs(60);

/// Run-fatal failures
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to prepare history container: {0}")]
    Container(StorageError),

    #[error("failed to read availability history: {0}")]
    History(StorageError),

    #[error("failed to write availability history: {0}")]
    Upload(StorageError),
}

/// Why a single station contributed no rows
#[derive(Debug, Error)]
pub enum StationFailure {
    #[error(transparent)]
    Upstream(#[from] ScrapeError),

    #[error(transparent)]
    Response(MergeError),
}

#[derive(Debug)]
pub enum StationOutcome {
    /// Rows for this station; includes the history when it was requested
    Fetched { table: AvailabilityTable, new_rows: usize },
    Failed(StationFailure),
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub window: TimeWindow,
    pub stations_attempted: usize,
    pub succeeded_stations: Vec<StationId>,
    pub failed_stations: Vec<StationId>,
    pub history_rows: usize,
    pub new_rows: usize,
    pub rows_written: usize,
    pub uploaded: bool,
}

/// Start the scheduled sync.
///
/// Runs once immediately, then every `config.interval`, until ctrl-c.
pub fn start_availability_sync_job<S, B>(config: ScraperConfig, source: S, store: B) -> JoinHandle<()>
where
    S: AvailabilitySource + 'static,
    B: BlobStore + 'static,
{
    start_availability_sync_job_until(config, source, store, tokio::signal::ctrl_c())
}

/// Same as [`start_availability_sync_job`], stopping when `shutdown`
/// completes. A run in progress at that point is finished first.
pub fn start_availability_sync_job_until<S, B, F>(
    config: ScraperConfig,
    source: S,
    store: B,
    shutdown: F,
) -> JoinHandle<()>
where
    S: AvailabilitySource + 'static,
    B: BlobStore + 'static,
    F: Future + Send + 'static,
    F::Output: Send,
{
    tokio::spawn(async move {
        tracing::info!(
            stations = ?config.station_ids,
            interval_secs = config.interval.as_secs(),
            timezone = %config.timezone,
            "Availability sync job started"
        );

        let mut interval = interval(config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received, stopping availability sync job");
                    break;
                }
                scheduled = interval.tick() => {
                    if scheduled.elapsed() > PAST_DUE_TOLERANCE {
                        tracing::warn!(
                            late_secs = scheduled.elapsed().as_secs(),
                            "The timer is past due"
                        );
                    }

                    let now = Utc::now();
                    tracing::info!("Availability sync triggered at {}", now);
                    let window = TimeWindow::next_after(&now.with_timezone(&config.timezone));

                    let run = run_availability_sync(&source, &store, &config.station_ids, &config.pause, &window);
                    tokio::pin!(run);

                    let mut stopping = false;
                    let result = tokio::select! {
                        result = &mut run => result,
                        _ = &mut shutdown => {
                            tracing::info!("Shutdown signal received, finishing the current run first");
                            stopping = true;
                            run.await
                        }
                    };

                    match result {
                        Ok(report) => log_report(&report),
                        Err(e) => tracing::error!("Availability sync failed: {}", e),
                    }

                    if stopping {
                        tracing::info!("Availability sync job stopped");
                        break;
                    }
                }
            }
        }
    })
}

/// One run over `station_ids` for `window`.
///
/// The history is read together with the first station that returns data
/// and written back once at the end. Station failures are logged and
/// skipped; only storage failures end the run with an error. When no
/// station returns data nothing is written and the history stays as it is.
pub async fn run_availability_sync(
    source: &dyn AvailabilitySource,
    store: &dyn BlobStore,
    station_ids: &[StationId],
    pause: &StationPause,
    window: &TimeWindow,
) -> Result<SyncReport, SyncError> {
    tracing::info!(stations = station_ids.len(), window = %window, "Starting availability sync");

    store
        .ensure_container(HISTORY_CONTAINER)
        .await
        .map_err(SyncError::Container)?;

    let merger = TableMerger::new(store);
    let mut accumulated = AvailabilityTable::new();
    let mut history_pending = true;
    let mut report = SyncReport {
        window: *window,
        stations_attempted: station_ids.len(),
        succeeded_stations: Vec::new(),
        failed_stations: Vec::new(),
        history_rows: 0,
        new_rows: 0,
        rows_written: 0,
        uploaded: false,
    };

    for (idx, &station_id) in station_ids.iter().enumerate() {
        if idx > 0 {
            let delay = pause.sample();
            if !delay.is_zero() {
                tracing::debug!(delay_secs = delay.as_secs(), "Pausing before next station");
                tokio::time::sleep(delay).await;
            }
        }

        match scrape_station(&merger, source, station_id, window, history_pending).await? {
            StationOutcome::Fetched { table, new_rows } => {
                tracing::info!(station_id, new_rows, "Station scraped");

                if history_pending {
                    report.history_rows = table.len() - new_rows;
                    history_pending = false;
                }
                report.new_rows += new_rows;
                report.succeeded_stations.push(station_id);
                accumulated.append(table);
            }
            StationOutcome::Failed(reason) => {
                tracing::error!(station_id, "Station scrape failed: {}", reason);
                report.failed_stations.push(station_id);
            }
        }
    }

    if history_pending {
        tracing::warn!("No station returned data, leaving history untouched");
        return Ok(report);
    }

    store
        .upload_table(&accumulated, HISTORY_CONTAINER, HISTORY_BLOB)
        .await
        .map_err(SyncError::Upload)?;

    report.rows_written = accumulated.len();
    report.uploaded = true;

    Ok(report)
}

/// Fetch and flatten one station.
///
/// Upstream and payload problems become `StationOutcome::Failed`; a failed
/// history read is returned as an error.
pub async fn scrape_station(
    merger: &TableMerger<'_>,
    source: &dyn AvailabilitySource,
    station_id: StationId,
    window: &TimeWindow,
    fetch_old_data: bool,
) -> Result<StationOutcome, SyncError> {
    let response = match source.fetch_availabilities(station_id, window).await {
        Ok(response) => response,
        Err(e) => return Ok(StationOutcome::Failed(e.into())),
    };

    match merger.prepare_data_for_file(&response, window, fetch_old_data).await {
        Ok(prepared) => {
            let new_rows = prepared.new_rows();
            Ok(StationOutcome::Fetched {
                table: prepared.table,
                new_rows,
            })
        }
        Err(MergeError::History(e)) => Err(SyncError::History(e)),
        Err(e) => Ok(StationOutcome::Failed(StationFailure::Response(e))),
    }
}

fn log_report(report: &SyncReport) {
    if report.failed_stations.is_empty() {
        tracing::info!(
            window = %report.window,
            stations = report.stations_attempted,
            new_rows = report.new_rows,
            rows_written = report.rows_written,
            "Availability sync complete"
        );
    } else {
        tracing::warn!(
            window = %report.window,
            failed = ?report.failed_stations,
            succeeded = report.succeeded_stations.len(),
            new_rows = report.new_rows,
            rows_written = report.rows_written,
            uploaded = report.uploaded,
            "Availability sync complete with station failures"
        );
    }
}
