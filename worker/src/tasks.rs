//! Production task bindings.
//!
//! The three tasks the travel backend runs, bound to the registry with
//! the routing and annotation values the deployment has always used:
//! confirmation emails on the `emails` queue at 50/m, reminders at
//! 30/m, cleanup on its own queue. Handlers re-fetch booking state on
//! every attempt, so redelivery of the same envelope only repeats the
//! email send, never a state mutation.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{ConfigurationError, TaskError};
use crate::queue::BrokerClient;
use crate::task::{
    Handler, Registry, RoutingRule, TaskContext, TaskName, CLEANUP_QUEUE, EMAILS_QUEUE,
};
use crate::travel::{Booking, BookingStatus, BookingStore, Mailer, OutboundMail, StoreError, User};

/// Build the process-wide registry with every production task bound.
pub fn default_registry(
    config: &Config,
    store: Arc<dyn BookingStore>,
    mailer: Arc<dyn Mailer>,
) -> Result<Registry, ConfigurationError> {
    let mut registry = Registry::new();

    registry.register(
        TaskName::SendBookingConfirmationEmail,
        RoutingRule {
            queue: EMAILS_QUEUE,
            max_retries: config.default_max_retries,
            retry_delay: config.default_retry_delay,
            rate_limit: Some(config.confirmation_rate_limit),
            soft_time_limit: config.soft_time_limit,
            hard_time_limit: config.hard_time_limit,
        },
        confirmation_handler(config.clone(), Arc::clone(&store), Arc::clone(&mailer)),
    )?;

    registry.register(
        TaskName::SendBookingReminderEmail,
        RoutingRule {
            queue: EMAILS_QUEUE,
            max_retries: config.default_max_retries,
            retry_delay: config.default_retry_delay,
            rate_limit: Some(config.reminder_rate_limit),
            soft_time_limit: config.soft_time_limit,
            hard_time_limit: config.hard_time_limit,
        },
        reminder_handler(config.clone(), Arc::clone(&store), mailer),
    )?;

    registry.register(
        TaskName::CleanupExpiredBookings,
        RoutingRule {
            queue: CLEANUP_QUEUE,
            max_retries: config.default_max_retries,
            retry_delay: config.default_retry_delay,
            rate_limit: None,
            soft_time_limit: config.soft_time_limit,
            hard_time_limit: config.hard_time_limit,
        },
        cleanup_handler(config.clone(), store),
    )?;

    Ok(registry)
}

/// Fire-and-forget surface for the booking-creation path.
///
/// Enqueue failure is logged and swallowed: a booking must never fail
/// because its confirmation email could not be scheduled.
pub async fn enqueue_confirmation(
    broker: &BrokerClient,
    registry: &Registry,
    booking_id: &str,
    user_id: &str,
) -> Option<String> {
    let args = vec![
        Value::String(booking_id.to_string()),
        Value::String(user_id.to_string()),
    ];
    let envelope = match registry.build_envelope(TaskName::SendBookingConfirmationEmail, args) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!(booking_id, error = %e, "confirmation_email_enqueue_failed");
            return None;
        }
    };

    match broker.enqueue(&envelope).await {
        Ok(task_id) => {
            info!(booking_id, task_id = %task_id, "confirmation_email_task_triggered");
            Some(task_id)
        }
        Err(e) => {
            error!(booking_id, error = %e, "confirmation_email_enqueue_failed");
            None
        }
    }
}

/// Fire-and-forget enqueue of a reminder email.
pub async fn enqueue_reminder(
    broker: &BrokerClient,
    registry: &Registry,
    booking_id: &str,
) -> Option<String> {
    let args = vec![Value::String(booking_id.to_string())];
    let envelope = match registry.build_envelope(TaskName::SendBookingReminderEmail, args) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!(booking_id, error = %e, "reminder_email_enqueue_failed");
            return None;
        }
    };

    match broker.enqueue(&envelope).await {
        Ok(task_id) => {
            info!(booking_id, task_id = %task_id, "reminder_email_task_triggered");
            Some(task_id)
        }
        Err(e) => {
            error!(booking_id, error = %e, "reminder_email_enqueue_failed");
            None
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

fn confirmation_handler(
    config: Config,
    store: Arc<dyn BookingStore>,
    mailer: Arc<dyn Mailer>,
) -> Handler {
    Arc::new(move |ctx| {
        let config = config.clone();
        let store = Arc::clone(&store);
        let mailer = Arc::clone(&mailer);
        Box::pin(async move {
            send_booking_confirmation_email(&config, store.as_ref(), mailer.as_ref(), ctx).await
        })
    })
}

fn reminder_handler(
    config: Config,
    store: Arc<dyn BookingStore>,
    mailer: Arc<dyn Mailer>,
) -> Handler {
    Arc::new(move |ctx| {
        let config = config.clone();
        let store = Arc::clone(&store);
        let mailer = Arc::clone(&mailer);
        Box::pin(async move {
            send_booking_reminder_email(&config, store.as_ref(), mailer.as_ref(), ctx).await
        })
    })
}

fn cleanup_handler(config: Config, store: Arc<dyn BookingStore>) -> Handler {
    Arc::new(move |ctx| {
        let config = config.clone();
        let store = Arc::clone(&store);
        Box::pin(async move { cleanup_expired_bookings(&config, store.as_ref(), ctx).await })
    })
}

/// Send a booking confirmation email. Args: [booking_id, user_id].
pub async fn send_booking_confirmation_email(
    config: &Config,
    store: &dyn BookingStore,
    mailer: &dyn Mailer,
    ctx: TaskContext,
) -> Result<String, TaskError> {
    let booking_id = ctx.str_arg(0)?;
    let user_id = ctx.str_arg(1)?;

    let booking = store.lookup_booking(&booking_id).await.map_err(store_err)?;
    let user = store.lookup_user(&user_id).await.map_err(store_err)?;

    let mail = render_confirmation(config, &booking, &user);
    mailer
        .send_mail(&mail)
        .await
        .map_err(|e| TaskError::Transient(e.into()))?;

    info!(
        booking_id = %booking_id,
        to = %user.email,
        attempt = ctx.attempt,
        "booking_confirmation_sent"
    );
    Ok(format!("Email sent successfully to {}", user.email))
}

/// Send a booking reminder email. Args: [booking_id].
pub async fn send_booking_reminder_email(
    config: &Config,
    store: &dyn BookingStore,
    mailer: &dyn Mailer,
    ctx: TaskContext,
) -> Result<String, TaskError> {
    let booking_id = ctx.str_arg(0)?;

    let booking = store.lookup_booking(&booking_id).await.map_err(store_err)?;
    let guest = store
        .lookup_user(&booking.guest_id)
        .await
        .map_err(store_err)?;

    let mail = render_reminder(config, &booking, &guest);
    mailer
        .send_mail(&mail)
        .await
        .map_err(|e| TaskError::Transient(e.into()))?;

    info!(
        booking_id = %booking_id,
        to = %guest.email,
        attempt = ctx.attempt,
        "booking_reminder_sent"
    );
    Ok(format!("Reminder email sent successfully to {}", guest.email))
}

/// Delete pending bookings older than the configured expiry window.
pub async fn cleanup_expired_bookings(
    config: &Config,
    store: &dyn BookingStore,
    _ctx: TaskContext,
) -> Result<String, TaskError> {
    let cutoff = Utc::now() - chrono::Duration::hours(config.booking_expiry_hours as i64);

    let count = store
        .delete_expired(BookingStatus::Pending, cutoff)
        .await
        .map_err(store_err)?;

    info!(count = count, "expired_bookings_cleaned");
    Ok(format!("Cleaned up {count} expired bookings"))
}

fn store_err(err: StoreError) -> TaskError {
    match err {
        e @ StoreError::NotFound { .. } => TaskError::RecordNotFound(e.to_string()),
        e @ StoreError::Unavailable(_) => TaskError::Transient(e.into()),
    }
}

// =============================================================================
// Email rendering
// =============================================================================

fn render_confirmation(config: &Config, booking: &Booking, user: &User) -> OutboundMail {
    let subject = format!("Booking Confirmation - {}", booking.listing.title);
    let body_text = format!(
        "Hi {username},\n\n\
         Your booking at {title} in {location} is confirmed.\n\n\
         Check-in:  {check_in}\n\
         Check-out: {check_out}\n\
         Total:     ${total:.2}\n\n\
         Manage your booking at {site_url}.\n\n\
         {site_name}",
        username = user.username,
        title = booking.listing.title,
        location = booking.listing.location,
        check_in = booking.check_in,
        check_out = booking.check_out,
        total = booking.total_price,
        site_url = config.site_url,
        site_name = config.site_name,
    );
    let body_html = format!(
        "<html><body>\
         <h2>Booking confirmed</h2>\
         <p>Hi {username},</p>\
         <p>Your booking at <strong>{title}</strong> in {location} is confirmed.</p>\
         <ul>\
         <li>Check-in: {check_in}</li>\
         <li>Check-out: {check_out}</li>\
         <li>Total: ${total:.2}</li>\
         </ul>\
         <p><a href=\"{site_url}\">Manage your booking</a></p>\
         <p>{site_name}</p>\
         </body></html>",
        username = user.username,
        title = booking.listing.title,
        location = booking.listing.location,
        check_in = booking.check_in,
        check_out = booking.check_out,
        total = booking.total_price,
        site_url = config.site_url,
        site_name = config.site_name,
    );

    OutboundMail {
        subject,
        body_text,
        body_html: Some(body_html),
        from_addr: config.from_email.clone(),
        to_addrs: vec![user.email.clone()],
    }
}

fn render_reminder(config: &Config, booking: &Booking, guest: &User) -> OutboundMail {
    let subject = format!("Booking Reminder - {}", booking.listing.title);
    let body_text = format!(
        "Hi {username},\n\n\
         A reminder about your upcoming stay at {title} in {location}.\n\n\
         Check-in:  {check_in}\n\
         Check-out: {check_out}\n\n\
         See you soon!\n\
         {site_name} - {site_url}",
        username = guest.username,
        title = booking.listing.title,
        location = booking.listing.location,
        check_in = booking.check_in,
        check_out = booking.check_out,
        site_name = config.site_name,
        site_url = config.site_url,
    );
    let body_html = format!(
        "<html><body>\
         <h2>Your stay is coming up</h2>\
         <p>Hi {username},</p>\
         <p>A reminder about your upcoming stay at <strong>{title}</strong> in {location}.</p>\
         <ul>\
         <li>Check-in: {check_in}</li>\
         <li>Check-out: {check_out}</li>\
         </ul>\
         <p>{site_name} - <a href=\"{site_url}\">{site_url}</a></p>\
         </body></html>",
        username = guest.username,
        title = booking.listing.title,
        location = booking.listing.location,
        check_in = booking.check_in,
        check_out = booking.check_out,
        site_name = config.site_name,
        site_url = config.site_url,
    );

    OutboundMail {
        subject,
        body_text,
        body_html: Some(body_html),
        from_addr: config.from_email.clone(),
        to_addrs: vec![guest.email.clone()],
    }
}
