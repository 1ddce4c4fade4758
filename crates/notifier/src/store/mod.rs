//! Record store contract for scheduled notifications.
//!
//! The queue only needs three primitives from storage: insert, filtered reads,
//! and a compare-and-set update. The compare-and-set is the sole concurrency
//! control in the system; every status transition goes through it.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use rally_common::error::AppError;
use rally_common::types::{DeliveryStatus, NewNotification, Notification};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Filters supported by [`RecordStore::query`]. Each filter has a fixed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFilter {
    /// `Pending` records with `scheduled_for <= now` whose backoff has elapsed,
    /// ordered by `scheduled_for` then `id`.
    Due { now: DateTime<Utc> },
    /// `InProgress` records claimed at or before `claimed_before`, oldest claim first.
    StaleClaims { claimed_before: DateTime<Utc> },
    /// Records sharing a correlation key, ordered by `created_at` then `id`.
    Correlation { key: String },
}

/// Expected state of a record for a conditional update to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guard {
    pub status: DeliveryStatus,
    /// Must equal the stored claim token, `None` included.
    pub claim_token: Option<Uuid>,
}

impl Guard {
    /// Matches an unclaimed `Pending` record.
    pub fn pending() -> Self {
        Self {
            status: DeliveryStatus::Pending,
            claim_token: None,
        }
    }

    /// Matches an `InProgress` record still held by `token`.
    pub fn claimed_by(token: Uuid) -> Self {
        Self {
            status: DeliveryStatus::InProgress,
            claim_token: Some(token),
        }
    }
}

/// Ownership marker written together with an `InProgress` status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub token: Uuid,
    pub at: DateTime<Utc>,
}

/// Field changes applied by a conditional update.
///
/// `last_error` and `sent_at` are only written when `Some`; the remaining
/// optional fields are written as given, so `None` clears them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changes {
    pub status: DeliveryStatus,
    pub increment_attempts: bool,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub claim: Option<Claim>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Changes {
    /// `Pending -> InProgress` under a fresh claim.
    pub fn claim(token: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            status: DeliveryStatus::InProgress,
            increment_attempts: false,
            last_error: None,
            next_attempt_at: None,
            claim: Some(Claim { token, at: now }),
            sent_at: None,
        }
    }

    /// Successful delivery.
    pub fn sent(now: DateTime<Utc>) -> Self {
        Self {
            status: DeliveryStatus::Sent,
            increment_attempts: true,
            last_error: None,
            next_attempt_at: None,
            claim: None,
            sent_at: Some(now),
        }
    }

    /// Failed delivery, either back to `Pending` or terminally `Failed`.
    pub fn failed_attempt(
        status: DeliveryStatus,
        error: String,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            status,
            increment_attempts: true,
            last_error: Some(error),
            next_attempt_at,
            claim: None,
            sent_at: None,
        }
    }
}

/// Storage capability consumed by the notification queue.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new `Pending` record with zero attempts. The store assigns the id.
    async fn insert(&self, record: NewNotification) -> Result<Notification, AppError>;

    /// Fetch a single record.
    async fn get(&self, id: Uuid) -> Result<Option<Notification>, AppError>;

    /// Read up to `limit` records matching `filter`, in the filter's order.
    async fn query(
        &self,
        filter: &RecordFilter,
        limit: usize,
    ) -> Result<Vec<Notification>, AppError>;

    /// Atomically apply `changes` if the record currently matches `guard`.
    ///
    /// Returns the updated record, or `None` when the guard did not match
    /// (including when the record does not exist).
    async fn compare_and_set(
        &self,
        id: Uuid,
        guard: Guard,
        changes: Changes,
    ) -> Result<Option<Notification>, AppError>;
}
