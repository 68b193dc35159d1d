//! Booking data access.
//!
//! Handlers re-fetch current state through this trait on every attempt
//! rather than caching it across attempts; each attempt stands alone,
//! which is what makes redelivery safe.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use super::types::{Booking, BookingStatus, User};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The record is gone. Maps to a non-retriable task failure.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The store itself could not answer. Retriable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn lookup_booking(&self, booking_id: &str) -> Result<Booking, StoreError>;

    async fn lookup_user(&self, user_id: &str) -> Result<User, StoreError>;

    /// Delete bookings in `status` created before `older_than`.
    /// Returns the exact number removed.
    async fn delete_expired(
        &self,
        status: BookingStatus,
        older_than: DateTime<Utc>,
    ) -> Result<usize, StoreError>;
}

/// In-memory store for local runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    bookings: RwLock<HashMap<String, Booking>>,
    users: RwLock<HashMap<String, User>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_booking(&self, booking: Booking) {
        self.bookings.write().await.insert(booking.id.clone(), booking);
    }

    pub async fn insert_user(&self, user: User) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    pub async fn booking_count(&self) -> usize {
        self.bookings.read().await.len()
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn lookup_booking(&self, booking_id: &str) -> Result<Booking, StoreError> {
        self.bookings
            .read()
            .await
            .get(booking_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "booking",
                id: booking_id.to_string(),
            })
    }

    async fn lookup_user(&self, user_id: &str) -> Result<User, StoreError> {
        self.users
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "user",
                id: user_id.to_string(),
            })
    }

    async fn delete_expired(
        &self,
        status: BookingStatus,
        older_than: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut bookings = self.bookings.write().await;
        let before = bookings.len();
        bookings.retain(|_, b| !(b.status == status && b.created_at < older_than));
        Ok(before - bookings.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    use crate::travel::types::Listing;

    fn booking(id: &str, status: BookingStatus, age_hours: i64) -> Booking {
        Booking {
            id: id.to_string(),
            listing: Listing {
                id: "L1".to_string(),
                title: "Seaside Villa".to_string(),
                location: "Mombasa".to_string(),
                price_per_night: 120.0,
            },
            guest_id: "U1".to_string(),
            status,
            check_in: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2025, 6, 5).unwrap(),
            total_price: 480.0,
            created_at: Utc::now() - Duration::hours(age_hours),
        }
    }

    #[tokio::test]
    async fn test_lookup_missing_booking_is_not_found() {
        let store = MemoryStore::new();
        let err = store.lookup_booking("B404").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "booking", .. }));
    }

    #[tokio::test]
    async fn test_delete_expired_only_touches_matching_status() {
        let store = MemoryStore::new();
        store.insert_booking(booking("B1", BookingStatus::Pending, 30)).await;
        store.insert_booking(booking("B2", BookingStatus::Pending, 48)).await;
        store.insert_booking(booking("B3", BookingStatus::Confirmed, 72)).await;
        store.insert_booking(booking("B4", BookingStatus::Pending, 1)).await;

        let cutoff = Utc::now() - Duration::hours(24);
        let count = store
            .delete_expired(BookingStatus::Pending, cutoff)
            .await
            .unwrap();

        assert_eq!(count, 2);
        // Old but confirmed booking survives.
        assert!(store.lookup_booking("B3").await.is_ok());
        // Recent pending booking survives.
        assert!(store.lookup_booking("B4").await.is_ok());
    }
}
