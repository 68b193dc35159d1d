//! Broker client for the durable task queues.
//!
//! Two named queues carry every envelope:
//!
//! ```text
//! web handler ──▶ emails  queue ──▶ worker ──▶ mailer
//! beat ─────────▶ cleanup queue ──▶ worker ──▶ store
//! ```

pub mod publisher;

pub use publisher::BrokerClient;
