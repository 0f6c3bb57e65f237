// src/bin/scrape_station.rs
//
// Ad-hoc run for a single station, with the window taken from the machine's
// local clock.
//
// Usage: cargo run --bin scrape_station -- [station_id] [--local <dir>]
//
// Without --local the rows are merged into the history blob exactly like a
// scheduled run. With --local they are appended to <dir>/availabilities_data.csv.

use chrono::Local;
use std::env;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mobility_availability_scraper::config::{ScraperConfig, StationPause};
use mobility_availability_scraper::jobs::availability_sync::run_availability_sync;
use mobility_availability_scraper::scrapers::mobility::MobilityClient;
use mobility_availability_scraper::scrapers::StationId;
use mobility_availability_scraper::services::blob_storage::AzureBlobStore;
use mobility_availability_scraper::services::local_storage::save_data_locally;
use mobility_availability_scraper::services::table_merger::flatten_response;
use mobility_availability_scraper::services::time_window::TimeWindow;

const DEFAULT_STATION_ID: StationId = 80815;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mobility_availability_scraper=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = env::args().collect();
    let mut station_id = DEFAULT_STATION_ID;
    let mut local_dir: Option<PathBuf> = None;

    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--local" => match rest.next() {
                Some(dir) => local_dir = Some(PathBuf::from(dir)),
                None => {
                    eprintln!("Usage: {} [station_id] [--local <dir>]", args[0]);
                    std::process::exit(1);
                }
            },
            other => station_id = other.parse()?,
        }
    }

    let config = ScraperConfig::from_env()?;
    let client = MobilityClient::new(config.base_url.clone(), config.http_timeout)?;
    let window = TimeWindow::next_after(&Local::now());

    tracing::info!(station_id, window = %window, "Manual scrape");

    if let Some(dir) = local_dir {
        let response = client.fetch_data(station_id, &window).await?;
        let table = flatten_response(&response, &window)?;
        let path = save_data_locally(&table, &dir)?;
        tracing::info!("Wrote {} rows to {}", table.len(), path.display());
        return Ok(());
    }

    let store = AzureBlobStore::new(config.storage.clone(), config.http_timeout)?;
    let report = run_availability_sync(&client, &store, &[station_id], &StationPause::none(), &window).await?;

    if !report.failed_stations.is_empty() {
        tracing::error!("Station {} returned no data", station_id);
    }
    tracing::info!(
        new_rows = report.new_rows,
        rows_written = report.rows_written,
        uploaded = report.uploaded,
        "Manual scrape finished"
    );

    Ok(())
}
