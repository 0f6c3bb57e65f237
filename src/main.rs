use mobility_availability_scraper::config::ScraperConfig;
use mobility_availability_scraper::jobs::availability_sync::start_availability_sync_job;
use mobility_availability_scraper::scrapers::mobility::MobilityClient;
use mobility_availability_scraper::services::blob_storage::AzureBlobStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mobility_availability_scraper=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ScraperConfig::from_env()?;

    let store = AzureBlobStore::new(config.storage.clone(), config.http_timeout)?;
    let client = MobilityClient::new(config.base_url.clone(), config.http_timeout)?;

    tracing::info!("Polling {} stations via {}", config.station_ids.len(), client.base_url());

    start_availability_sync_job(config, client, store).await?;

    tracing::info!("Availability scraper stopped");
    Ok(())
}
