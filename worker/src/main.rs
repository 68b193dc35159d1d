//! TravelQ Worker - async RabbitMQ consumer for booking emails and
//! cleanup.
//!
//! Executes task envelopes from the emails and cleanup queues with
//! late acknowledgement, fixed-delay retries, per-task rate limits,
//! and periodic self-recycling.

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use travelq::travel::{BookingStore, ConsoleMailer, Mailer, MemoryStore};
use travelq::worker::{self, WorkerExit};
use travelq::{default_registry, Config, OutcomeTracker, RateLimiter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("worker_starting");

    // Load configuration from environment
    let config = Config::from_env();
    tracing::info!(
        broker_url_set = !config.broker_url.is_empty(),
        concurrency = config.worker_concurrency,
        max_tasks_per_child = config.max_tasks_per_child,
        max_retries = config.default_max_retries,
        retry_delay_secs = config.default_retry_delay.as_secs(),
        "config_loaded"
    );

    // Collaborators from the excluded web/data layer. Deployments
    // swap these for implementations against the real database and
    // mail relay.
    let store: Arc<dyn BookingStore> = Arc::new(MemoryStore::new());
    let mailer: Arc<dyn Mailer> = Arc::new(ConsoleMailer::new());

    let registry = Arc::new(default_registry(&config, store, mailer)?);
    let limiter = Arc::new(RateLimiter::new());
    let tracker = Arc::new(OutcomeTracker::new());
    let config = Arc::new(config);

    loop {
        let exit = worker::run(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&limiter),
            Arc::clone(&tracker),
        )
        .await?;

        match exit {
            WorkerExit::Recycle => {
                tracing::info!("worker_recycling");
                continue;
            }
            WorkerExit::Shutdown => break,
        }
    }

    tracing::info!("worker_shutdown_complete");
    Ok(())
}
