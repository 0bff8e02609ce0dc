use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::clock::{next_deadline, parse_time_zone};
use crate::domain::phone_number::PhoneNumber;
use crate::domain::subscriber::Subscriber;

mod memory;
mod postgres;

pub use memory::InMemorySubscriberStore;
pub use postgres::PostgresSubscriberStore;

#[derive(thiserror::Error)]
pub enum StoreError {
    #[error("A subscriber with this number already exists.")]
    AlreadyExists,
    #[error("No subscriber found for this number.")]
    NotFound,
    #[error("Stored subscriber record is invalid: {0}")]
    InvalidRecord(String),
    #[error("Failed to reach the subscriber store.")]
    Unexpected(#[from] sqlx::Error),
}

impl std::fmt::Debug for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unexpected(err) => write!(f, "{}\nCaused by:\n\t{}", self, err),
            _ => write!(f, "{}", self),
        }
    }
}

/// Durable subscriber records keyed by phone number.
///
/// Every write touches a single record. Implementations must make `create`
/// atomic (no overwrite of an existing number) and must never move a stored
/// `send_deadline` backwards. `get` is a strongly consistent read.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn create(&self, subscriber: &Subscriber) -> Result<(), StoreError>;

    async fn get(&self, number: &PhoneNumber) -> Result<Subscriber, StoreError>;

    /// Up to `limit` subscribers whose deadline is strictly before `deadline`,
    /// in no particular order. Records that can't be read are advanced and
    /// left out.
    async fn get_due_before(
        &self,
        deadline: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Subscriber>, StoreError>;

    /// Records a delivery outcome at `sent_at` and pushes the deadline to the
    /// next local delivery hour.
    async fn update_sent(
        &self,
        number: &PhoneNumber,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Pushes the deadline forward like `update_sent` without touching
    /// `last_sent_at`.
    async fn update_skipped(&self, number: &PhoneNumber, at: DateTime<Utc>)
        -> Result<(), StoreError>;

    async fn set_sendable(&self, number: &PhoneNumber, is_sendable: bool)
        -> Result<(), StoreError>;
}

/// Deadline following `at` for a record stored with `timezone`. A corrupt zone
/// is advanced in UTC so the record still leaves the due set.
pub(crate) fn advance_deadline(timezone: &str, at: DateTime<Utc>) -> DateTime<Utc> {
    let tz = parse_time_zone(timezone).unwrap_or_else(|err| {
        tracing::warn!("{}, advancing the deadline in UTC", err);
        Tz::UTC
    });

    next_deadline(at, tz)
}
