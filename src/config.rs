//! Environment-driven configuration
//!
//! Call `dotenvy::dotenv()` before `ScraperConfig::from_env()` to pick up a
//! local `.env` file.

use chrono_tz::Tz;
use rand::Rng;
use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::scrapers::StationId;
use crate::scrapers::mobility::DEFAULT_BASE_URL;
use crate::services::blob_storage::AzureConnection;

pub const ENV_CONNECTION_STRING: &str = "AZURE_BLOB_CONNECTION_STRING";
pub const ENV_BASE_URL: &str = "MOBILITY_BASE_URL";
pub const ENV_STATION_IDS: &str = "STATION_IDS";
pub const ENV_INTERVAL: &str = "SCRAPE_INTERVAL_SECS";
pub const ENV_TIMEZONE: &str = "SCRAPE_TIMEZONE";
pub const ENV_PAUSE_MIN: &str = "STATION_PAUSE_MIN_SECS";
pub const ENV_PAUSE_MAX: &str = "STATION_PAUSE_MAX_SECS";
pub const ENV_HTTP_TIMEOUT: &str = "HTTP_TIMEOUT_SECS";

pub const DEFAULT_STATION_IDS: [StationId; 3] = [69951, 80456, 80815];
pub const DEFAULT_INTERVAL_SECS: u64 = 3 * 60 * 60;
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Zurich;
pub const DEFAULT_PAUSE_MIN_SECS: u64 = 1;
pub const DEFAULT_PAUSE_MAX_SECS: u64 = 5;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Whole-second pause drawn uniformly from `min_secs..=max_secs`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationPause {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl StationPause {
    pub fn none() -> Self {
        Self {
            min_secs: 0,
            max_secs: 0,
        }
    }

    pub fn sample(&self) -> Duration {
        if self.max_secs == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs(rand::thread_rng().gen_range(self.min_secs..=self.max_secs))
    }
}

impl Default for StationPause {
    fn default() -> Self {
        Self {
            min_secs: DEFAULT_PAUSE_MIN_SECS,
            max_secs: DEFAULT_PAUSE_MAX_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub storage: AzureConnection,
    pub base_url: String,
    pub station_ids: Vec<StationId>,
    pub interval: Duration,
    pub timezone: Tz,
    pub pause: StationPause,
    pub http_timeout: Duration,
}

impl ScraperConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let connection_string = get(ENV_CONNECTION_STRING).ok_or(ConfigError::Missing(ENV_CONNECTION_STRING))?;
        let storage = AzureConnection::parse(&connection_string)?;

        let base_url = get(ENV_BASE_URL).unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let station_ids = match get(ENV_STATION_IDS) {
            Some(raw) => parse_station_ids(&raw)?,
            None => DEFAULT_STATION_IDS.to_vec(),
        };

        let interval_secs = parse_or(get(ENV_INTERVAL), ENV_INTERVAL, DEFAULT_INTERVAL_SECS)?;
        if interval_secs == 0 {
            return Err(ConfigError::Invalid {
                name: ENV_INTERVAL,
                reason: "must be greater than zero".to_string(),
            });
        }

        let timezone = match get(ENV_TIMEZONE) {
            Some(name) => name.trim().parse::<Tz>().map_err(|e| ConfigError::Invalid {
                name: ENV_TIMEZONE,
                reason: e.to_string(),
            })?,
            None => DEFAULT_TIMEZONE,
        };

        let pause = StationPause {
            min_secs: parse_or(get(ENV_PAUSE_MIN), ENV_PAUSE_MIN, DEFAULT_PAUSE_MIN_SECS)?,
            max_secs: parse_or(get(ENV_PAUSE_MAX), ENV_PAUSE_MAX, DEFAULT_PAUSE_MAX_SECS)?,
        };
        if pause.min_secs > pause.max_secs {
            return Err(ConfigError::Invalid {
                name: ENV_PAUSE_MIN,
                reason: format!("{} is greater than {} ({})", pause.min_secs, ENV_PAUSE_MAX, pause.max_secs),
            });
        }

        let http_timeout_secs = parse_or(get(ENV_HTTP_TIMEOUT), ENV_HTTP_TIMEOUT, DEFAULT_HTTP_TIMEOUT_SECS)?;

        Ok(Self {
            storage,
            base_url,
            station_ids,
            interval: Duration::from_secs(interval_secs),
            timezone,
            pause,
            http_timeout: Duration::from_secs(http_timeout_secs),
        })
    }
}

/// Comma separated, order preserved
pub fn parse_station_ids(raw: &str) -> Result<Vec<StationId>, ConfigError> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<StationId>().map_err(|e| ConfigError::Invalid {
                name: ENV_STATION_IDS,
                reason: format!("{s:?}: {e}"),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if ids.is_empty() {
        return Err(ConfigError::Invalid {
            name: ENV_STATION_IDS,
            reason: "no station ids given".to_string(),
        });
    }

    Ok(ids)
}

fn parse_or(value: Option<String>, name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match value {
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::Invalid {
            name,
            reason: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}
