//! TravelQ Beat - periodic task trigger.
//!
//! Runs the static schedule table, enqueueing a cleanup envelope every
//! configured interval. Never executes task bodies itself; the worker
//! does that.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use travelq::scheduler::{default_schedule, Scheduler};
use travelq::travel::{BookingStore, ConsoleMailer, Mailer, MemoryStore};
use travelq::{default_registry, BrokerClient, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("beat_starting");

    let config = Config::from_env();
    tracing::info!(
        cleanup_interval_secs = config.cleanup_interval.as_secs(),
        "config_loaded"
    );

    // Beat only builds envelopes; handlers never run here, but the
    // registry still validates that every scheduled task has one.
    let store: Arc<dyn BookingStore> = Arc::new(MemoryStore::new());
    let mailer: Arc<dyn Mailer> = Arc::new(ConsoleMailer::new());
    let registry = Arc::new(default_registry(&config, store, mailer)?);

    let schedule = default_schedule(&config, Utc::now());
    let broker = BrokerClient::new(config.broker_url.clone());

    let scheduler = Scheduler::new(schedule, broker, registry)?;
    scheduler.run().await?;

    Ok(())
}
