//! Interfaces to the excluded web/data layer.
//!
//! The task core never owns booking data or a mail transport; it
//! consumes them through the [`BookingStore`] and [`Mailer`] traits.
//! Production deployments implement these against the real database
//! and SMTP relay. [`MemoryStore`] and [`ConsoleMailer`] back local
//! runs and tests.

pub mod mailer;
pub mod store;
pub mod types;

pub use mailer::{ConsoleMailer, Mailer, OutboundMail, RecordingMailer, TransportError};
pub use store::{BookingStore, MemoryStore, StoreError};
pub use types::{Booking, BookingStatus, Listing, User};
