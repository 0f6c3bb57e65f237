#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use chrono::DateTime;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::time::Instant;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use mobility_availability_scraper::models::availability_table::AvailabilityTable;
use mobility_availability_scraper::scrapers::{AvailabilitySource, ScrapeError, StationId};
use mobility_availability_scraper::services::blob_storage::{BlobStore, StorageError};
use mobility_availability_scraper::services::table_merger::{HISTORY_BLOB, HISTORY_CONTAINER};
use mobility_availability_scraper::services::time_window::TimeWindow;

/// Fixed query window used across tests
pub fn test_window() -> TimeWindow {
    TimeWindow::starting_at(DateTime::parse_from_rfc3339("2025-01-14T15:00:00+01:00").unwrap())
}

/// Upstream-shaped payload with one record per vehicle id
pub fn vehicles_response(station_id: StationId, vehicle_ids: &[u32]) -> Value {
    let records: Vec<Value> = vehicle_ids
        .iter()
        .map(|id| {
            json!({
                "vehicle": { "id": id, "category": { "name": "Budget" } },
                "station": { "id": station_id },
                "available": true
            })
        })
        .collect();

    json!({ "vehicleAvailabilities": records })
}

/// History table with `vehicle.id` values as given
pub fn history_table(vehicle_ids: &[&str]) -> AvailabilityTable {
    AvailabilityTable::from_rows(
        vec!["vehicle.id".to_string(), "timestamp.from".to_string()],
        vehicle_ids
            .iter()
            .map(|id| vec![id.to_string(), "2025-01-13T12:00:00.000+01:00".to_string()])
            .collect(),
    )
}

/// Availability source answering from a fixed script; unscripted or `None`
/// stations fail like an upstream outage.
#[derive(Default)]
pub struct ScriptedSource {
    responses: HashMap<StationId, Option<Value>>,
    pub calls: Mutex<Vec<StationId>>,
    call_times: Mutex<Vec<Instant>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, station_id: StationId, response: Value) -> Self {
        self.responses.insert(station_id, Some(response));
        self
    }

    pub fn fail(mut self, station_id: StationId) -> Self {
        self.responses.insert(station_id, None);
        self
    }

    pub fn calls(&self) -> Vec<StationId> {
        self.calls.lock().unwrap().clone()
    }

    /// When each call arrived, on the tokio clock
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }
}

#[async_trait]
impl AvailabilitySource for ScriptedSource {
    async fn fetch_availabilities(
        &self,
        station_id: StationId,
        _window: &TimeWindow,
    ) -> Result<Value, ScrapeError> {
        self.calls.lock().unwrap().push(station_id);
        self.call_times.lock().unwrap().push(Instant::now());

        match self.responses.get(&station_id) {
            Some(Some(response)) => Ok(response.clone()),
            _ => Err(ScrapeError::Status {
                status: StatusCode::BAD_GATEWAY,
                body: "simulated outage".to_string(),
            }),
        }
    }
}

/// Blob store kept in memory, with switchable failures
#[derive(Default)]
pub struct InMemoryBlobStore {
    containers: Mutex<HashSet<String>>,
    blobs: Mutex<HashMap<(String, String), Vec<u8>>>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a history blob
    pub fn with_history(history: &AvailabilityTable) -> Self {
        let store = Self::new();
        store.containers.lock().unwrap().insert(HISTORY_CONTAINER.to_string());
        store.insert_raw(HISTORY_CONTAINER, HISTORY_BLOB, history.to_csv().unwrap());
        store
    }

    pub fn insert_raw(&self, container: &str, name: &str, body: Vec<u8>) {
        self.blobs
            .lock()
            .unwrap()
            .insert((container.to_string(), name.to_string()), body);
    }

    pub fn raw(&self, container: &str, name: &str) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(&(container.to_string(), name.to_string()))
            .cloned()
    }

    pub fn stored_history(&self) -> Option<AvailabilityTable> {
        self.raw(HISTORY_CONTAINER, HISTORY_BLOB)
            .map(|body| AvailabilityTable::from_csv(body.as_slice()).unwrap())
    }

    pub fn has_container(&self, container: &str) -> bool {
        self.containers.lock().unwrap().contains(container)
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn simulated_failure(resource: String) -> StorageError {
        StorageError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            resource,
            body: "simulated storage failure".to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn container_exists(&self, container: &str) -> Result<bool, StorageError> {
        Ok(self.has_container(container))
    }

    async fn create_container(&self, container: &str) -> Result<(), StorageError> {
        self.containers.lock().unwrap().insert(container.to_string());
        Ok(())
    }

    async fn put_blob(
        &self,
        container: &str,
        name: &str,
        _content_type: &str,
        body: Vec<u8>,
    ) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::simulated_failure(format!("{container}/{name}")));
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        self.insert_raw(container, name, body);
        Ok(())
    }

    async fn get_blob(&self, container: &str, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::simulated_failure(format!("{container}/{name}")));
        }

        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.raw(container, name))
    }
}

/// Handle to an `InMemoryBlobStore` that can be moved into a spawned job
#[derive(Clone, Default)]
pub struct SharedStore(pub Arc<InMemoryBlobStore>);

#[async_trait]
impl BlobStore for SharedStore {
    async fn container_exists(&self, container: &str) -> Result<bool, StorageError> {
        self.0.container_exists(container).await
    }

    async fn create_container(&self, container: &str) -> Result<(), StorageError> {
        self.0.create_container(container).await
    }

    async fn put_blob(
        &self,
        container: &str,
        name: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<(), StorageError> {
        self.0.put_blob(container, name, content_type, body).await
    }

    async fn get_blob(&self, container: &str, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.0.get_blob(container, name).await
    }
}

/// Serve `router` on an ephemeral local port and return its base URL
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{addr}")
}
