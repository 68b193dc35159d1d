//! RabbitMQ worker loop using lapin.
//!
//! Pulls envelopes from the emails and cleanup queues with late-ack
//! discipline: a delivery is only acknowledged after its attempt
//! resolves, so a crash mid-execution means broker redelivery rather
//! than a lost task. Prefetch equals the concurrency level, one
//! unacked delivery per slot, so a stalled worker cannot hoard
//! envelopes other workers could be running.

pub mod execute;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::select;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    Channel, Connection, ConnectionProperties,
};
use tokio::signal;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::queue::BrokerClient;
use crate::rate_limit::RateLimiter;
use crate::task::{OutcomeTracker, Registry, TaskEnvelope, CLEANUP_QUEUE, EMAILS_QUEUE};
use crate::worker::execute::{run_attempt, AttemptDecision};

/// Why the worker loop returned.
#[derive(Debug, PartialEq)]
pub enum WorkerExit {
    /// SIGINT/SIGTERM received; the process should exit.
    Shutdown,
    /// max_tasks_per_child reached; the caller restarts the loop to
    /// bound memory growth from handler-side leaks.
    Recycle,
}

/// Shared state for in-flight deliveries.
struct WorkerContext {
    registry: Arc<Registry>,
    limiter: Arc<RateLimiter>,
    tracker: Arc<OutcomeTracker>,
    broker: BrokerClient,
    channel: Arc<Channel>,
    completed: AtomicU64,
}

/// Resolve on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Run the worker loop until shutdown or recycle.
pub async fn run(
    config: Arc<Config>,
    registry: Arc<Registry>,
    limiter: Arc<RateLimiter>,
    tracker: Arc<OutcomeTracker>,
) -> Result<WorkerExit> {
    // Connect to RabbitMQ
    info!(url_length = config.broker_url.len(), "rabbitmq_connecting");

    let conn = Connection::connect(&config.broker_url, ConnectionProperties::default())
        .await
        .context("Failed to connect to RabbitMQ")?;

    info!("rabbitmq_connected");

    let channel = conn.create_channel().await.context("Failed to create channel")?;

    info!("rabbitmq_channel_created");

    // One unacked delivery per execution slot
    let prefetch_count = config.worker_concurrency as u16;
    channel
        .basic_qos(prefetch_count, BasicQosOptions::default())
        .await
        .context("Failed to set QoS")?;

    info!(prefetch_count = prefetch_count, "rabbitmq_qos_set");

    // Declare both task queues (idempotent operation)
    for queue in [EMAILS_QUEUE, CLEANUP_QUEUE] {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("Failed to declare queue")?;
    }

    info!(
        emails_queue = EMAILS_QUEUE,
        cleanup_queue = CLEANUP_QUEUE,
        "rabbitmq_queues_declared"
    );

    // Separate publish path for retries and deferrals
    let broker = BrokerClient::new(config.broker_url.clone());

    // Start consuming from both queues
    let emails_consumer = channel
        .basic_consume(
            EMAILS_QUEUE,
            "travelq-worker-emails",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to start emails consumer")?;

    let cleanup_consumer = channel
        .basic_consume(
            CLEANUP_QUEUE,
            "travelq-worker-cleanup",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to start cleanup consumer")?;

    let mut deliveries = select(emails_consumer, cleanup_consumer);

    info!("rabbitmq_consumers_started");
    info!("worker_ready");

    let semaphore = Arc::new(Semaphore::new(config.worker_concurrency));
    let ctx = Arc::new(WorkerContext {
        registry,
        limiter,
        tracker,
        broker,
        channel: Arc::new(channel),
        completed: AtomicU64::new(0),
    });

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let exit = loop {
        if ctx.completed.load(Ordering::Relaxed) >= config.max_tasks_per_child {
            info!(
                completed = ctx.completed.load(Ordering::Relaxed),
                "worker_recycle_threshold_reached"
            );
            break WorkerExit::Recycle;
        }

        tokio::select! {
            // Check for shutdown signal
            _ = &mut shutdown => {
                info!("worker_stopping");
                break WorkerExit::Shutdown;
            }
            // Process next message
            delivery = deliveries.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        let permit = Arc::clone(&semaphore)
                            .acquire_owned()
                            .await
                            .context("Worker semaphore closed")?;
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(handle_delivery(ctx, delivery, permit));
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "rabbitmq_delivery_error");
                    }
                    None => {
                        warn!("rabbitmq_consumer_closed");
                        break WorkerExit::Shutdown;
                    }
                }
            }
        }
    };

    // Wait for in-flight attempts before returning
    let _ = semaphore
        .acquire_many(config.worker_concurrency as u32)
        .await;
    ctx.broker.close().await;

    info!(exit = ?exit, "worker_loop_finished");
    Ok(exit)
}

async fn handle_delivery(
    ctx: Arc<WorkerContext>,
    delivery: lapin::message::Delivery,
    permit: OwnedSemaphorePermit,
) {
    let delivery_tag = delivery.delivery_tag;

    let envelope: TaskEnvelope = match serde_json::from_slice(&delivery.data) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!(
                delivery_tag = delivery_tag,
                error = %e,
                body_preview = %String::from_utf8_lossy(
                    &delivery.data[..delivery.data.len().min(500)]
                ),
                "task_envelope_parse_failed"
            );
            // A malformed payload can never execute; drop it.
            nack(&ctx.channel, delivery_tag, false).await;
            return;
        }
    };

    info!(
        queue = %envelope.queue,
        task = %envelope.task_name,
        task_id = %envelope.task_id,
        attempt = envelope.attempt_count + 1,
        "task_received"
    );

    let decision = run_attempt(&ctx.registry, &ctx.limiter, &ctx.tracker, &envelope).await;

    match decision {
        AttemptDecision::Ack | AttemptDecision::DeadLettered => {
            ack(&ctx.channel, delivery_tag).await;
            ctx.completed.fetch_add(1, Ordering::Relaxed);
            drop(permit);
        }
        AttemptDecision::Retry { delay } => {
            // Free the execution slot for the wait; the unacked
            // delivery anchors broker redelivery if we crash before
            // the retry is re-published.
            drop(permit);
            sleep(delay).await;
            requeue(&ctx, &envelope.next_attempt(), delivery_tag).await;
            ctx.completed.fetch_add(1, Ordering::Relaxed);
        }
        AttemptDecision::Defer { delay } => {
            drop(permit);
            sleep(delay).await;
            requeue(&ctx, &envelope, delivery_tag).await;
        }
    }
}

/// Publish `envelope` back onto its queue, then acknowledge the
/// consumed delivery. Publish-before-ack: if the publish fails, the
/// original is nacked back to the broker instead of being lost.
async fn requeue(ctx: &WorkerContext, envelope: &TaskEnvelope, delivery_tag: u64) {
    match ctx.broker.enqueue(envelope).await {
        Ok(_) => ack(&ctx.channel, delivery_tag).await,
        Err(e) => {
            error!(
                task_id = %envelope.task_id,
                task = %envelope.task_name,
                error = %e,
                "task_requeue_failed"
            );
            nack(&ctx.channel, delivery_tag, true).await;
        }
    }
}

async fn ack(channel: &Channel, delivery_tag: u64) {
    if let Err(e) = channel
        .basic_ack(delivery_tag, BasicAckOptions::default())
        .await
    {
        error!(delivery_tag = delivery_tag, error = %e, "rabbitmq_ack_failed");
    }
}

async fn nack(channel: &Channel, delivery_tag: u64, requeue: bool) {
    if let Err(e) = channel
        .basic_nack(
            delivery_tag,
            BasicNackOptions {
                requeue,
                ..Default::default()
            },
        )
        .await
    {
        error!(delivery_tag = delivery_tag, error = %e, "rabbitmq_nack_failed");
    }
}
