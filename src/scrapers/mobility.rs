//! Client for the Mobility location map availability endpoint
//!
//! The endpoint is the AJAX backend of the public booking map: a single POST
//! with two form fields, one of which carries the whole search filter as JSON.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use super::{AvailabilitySource, ScrapeError, StationId};
use crate::services::time_window::TimeWindow;

pub const DEFAULT_BASE_URL: &str = "https://www.mobility.ch/en/api/locationmap";

pub const REQUEST_FIELD: &str = "tx_mobilitymaps_locationmapajaxendpoint[request]";
pub const FILTER_FIELD: &str = "tx_mobilitymaps_locationmapajaxendpoint[filter]";
pub const AVAILABILITIES_REQUEST: &str = "availabilities";

const ORIGIN: &str = "https://www.mobility.ch";
const REFERER: &str = "https://www.mobility.ch/";
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15";

// Search area around Zug; the station criteria do the actual narrowing.
const CENTER: Coordinates = Coordinates {
    longitude: 8.437079228460789,
    latitude: 47.14424096318203,
};
const EAST: f64 = 8.441263474524021;
const WEST: f64 = 7.432894982397557;
const NORTH: f64 = 48.14948014616674;
const SOUTH: f64 = 47.139687270534495;

const PAGE_SIZE: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub longitude: f64,
    pub latitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginationCriteria {
    pub page: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundariesCriteria {
    pub bottom_right: Coordinates,
    pub top_right: Coordinates,
    pub top_left: Coordinates,
    pub bottom_left: Coordinates,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityCriteria {
    pub from_date_time: String,
    pub flexible_from_date_time_in_minutes: u32,
    pub to_date_time: String,
    pub flexible_to_date_time_in_minutes: u32,
    pub category_ids: Vec<u32>,
    pub include_alternatives: bool,
    pub include_unavailables: bool,
    pub gear_shifts: Vec<&'static str>,
    pub fuel_types: Vec<&'static str>,
    pub only_4x4: bool,
    pub only_learner_drivers: bool,
}

/// Search filter sent as JSON inside the form body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilter {
    pub include_walking_distance: bool,
    pub include_walking_duration: bool,
    pub tripmode: &'static str,
    pub pagination_criteria: PaginationCriteria,
    pub coordinates_criteria: Coordinates,
    pub boundaries_criteria: BoundariesCriteria,
    pub availability_criteria: AvailabilityCriteria,
    pub station_criteria: Vec<StationId>,
}

impl QueryFilter {
    /// Filter for one station; everything except the window and the station
    /// id is fixed.
    pub fn new(station_id: StationId, window: &TimeWindow) -> Self {
        Self {
            include_walking_distance: true,
            include_walking_duration: true,
            tripmode: "RETURN",
            pagination_criteria: PaginationCriteria {
                page: 0,
                size: PAGE_SIZE,
            },
            coordinates_criteria: CENTER,
            boundaries_criteria: BoundariesCriteria {
                bottom_right: Coordinates { longitude: EAST, latitude: SOUTH },
                top_right: Coordinates { longitude: EAST, latitude: NORTH },
                top_left: Coordinates { longitude: WEST, latitude: NORTH },
                bottom_left: Coordinates { longitude: WEST, latitude: SOUTH },
            },
            availability_criteria: AvailabilityCriteria {
                from_date_time: window.from_iso(),
                flexible_from_date_time_in_minutes: 0,
                to_date_time: window.to_iso(),
                flexible_to_date_time_in_minutes: 0,
                category_ids: Vec::new(),
                include_alternatives: true,
                include_unavailables: true,
                gear_shifts: vec!["AUTOMATIC", "MANUAL"],
                fuel_types: vec!["FOSSIL", "ELECTRIC"],
                only_4x4: false,
                only_learner_drivers: false,
            },
            station_criteria: vec![station_id],
        }
    }
}

#[derive(Clone)]
pub struct MobilityClient {
    client: Client,
    base_url: String,
}

impl MobilityClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Single POST for one station, no retry
    pub async fn fetch_data(
        &self,
        station_id: StationId,
        window: &TimeWindow,
    ) -> Result<Value, ScrapeError> {
        let filter = serde_json::to_string(&QueryFilter::new(station_id, window))?;

        tracing::debug!(station_id, window = %window, "Requesting availabilities");

        let response = self
            .client
            .post(&self.base_url)
            .header("Accept", "*/*")
            .header("Accept-Language", "en-GB,en;q=0.9")
            .header("Origin", ORIGIN)
            .header("Referer", REFERER)
            .header("User-Agent", USER_AGENT)
            .form(&[
                (REQUEST_FIELD, AVAILABILITIES_REQUEST),
                (FILTER_FIELD, filter.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScrapeError::Status { status, body });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl AvailabilitySource for MobilityClient {
    async fn fetch_availabilities(
        &self,
        station_id: StationId,
        window: &TimeWindow,
    ) -> Result<Value, ScrapeError> {
        self.fetch_data(station_id, window).await
    }
}
