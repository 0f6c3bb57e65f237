pub mod mobility;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::services::time_window::TimeWindow;

/// Identifier of a vehicle-sharing station
pub type StationId = u32;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream API error {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("upstream response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Source of raw availability payloads for one station and time window
#[async_trait]
pub trait AvailabilitySource: Send + Sync {
    async fn fetch_availabilities(
        &self,
        station_id: StationId,
        window: &TimeWindow,
    ) -> Result<Value, ScrapeError>;
}
