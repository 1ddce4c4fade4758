//! In-memory record store.
//!
//! Used by tests and local development. A single mutex around the map makes
//! every `compare_and_set` atomic, which is the same guarantee the Postgres
//! store gets from a conditional `UPDATE`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use rally_common::error::AppError;
use rally_common::types::{DeliveryStatus, NewNotification, Notification};

use super::{Changes, Guard, RecordFilter, RecordStore};

/// Mutex-guarded map of notifications keyed by id.
#[derive(Debug)]
pub struct InMemoryStore {
    records: Mutex<HashMap<Uuid, Notification>>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Snapshot of every stored record, in no particular order.
    pub fn snapshot(&self) -> Vec<Notification> {
        self.records.lock().values().cloned().collect()
    }

    /// Overwrite a stored record. Lets tests stage states the engine cannot
    /// reach on its own, such as a claim abandoned by a crashed worker.
    pub fn put(&self, record: Notification) {
        self.records.lock().insert(record.id, record);
    }

    fn ensure_available(&self) -> Result<(), AppError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::StoreUnavailable(
                "in-memory store is offline".to_string(),
            ))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert(&self, record: NewNotification) -> Result<Notification, AppError> {
        self.ensure_available()?;

        let now = Utc::now();
        let notification = Notification {
            id: Uuid::new_v4(),
            recipient: record.recipient,
            subject: record.subject,
            body: record.body,
            category: record.category,
            correlation_key: record.correlation_key,
            scheduled_for: record.scheduled_for,
            status: DeliveryStatus::Pending,
            attempts: 0,
            last_error: None,
            next_attempt_at: None,
            claim_token: None,
            claimed_at: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        };

        self.records
            .lock()
            .insert(notification.id, notification.clone());
        Ok(notification)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>, AppError> {
        self.ensure_available()?;
        Ok(self.records.lock().get(&id).cloned())
    }

    async fn query(
        &self,
        filter: &RecordFilter,
        limit: usize,
    ) -> Result<Vec<Notification>, AppError> {
        self.ensure_available()?;

        let records = self.records.lock();
        let mut matched: Vec<Notification> = match filter {
            RecordFilter::Due { now } => records
                .values()
                .filter(|n| n.is_due(*now))
                .cloned()
                .collect(),
            RecordFilter::StaleClaims { claimed_before } => records
                .values()
                .filter(|n| {
                    n.status == DeliveryStatus::InProgress
                        && n.claimed_at.is_some_and(|at| at <= *claimed_before)
                })
                .cloned()
                .collect(),
            RecordFilter::Correlation { key } => records
                .values()
                .filter(|n| n.correlation_key.as_deref() == Some(key.as_str()))
                .cloned()
                .collect(),
        };
        drop(records);

        match filter {
            RecordFilter::Due { .. } => {
                matched.sort_by(|a, b| (a.scheduled_for, a.id).cmp(&(b.scheduled_for, b.id)))
            }
            RecordFilter::StaleClaims { .. } => {
                matched.sort_by(|a, b| (a.claimed_at, a.id).cmp(&(b.claimed_at, b.id)))
            }
            RecordFilter::Correlation { .. } => {
                matched.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)))
            }
        }
        matched.truncate(limit);
        Ok(matched)
    }

    async fn compare_and_set(
        &self,
        id: Uuid,
        guard: Guard,
        changes: Changes,
    ) -> Result<Option<Notification>, AppError> {
        self.ensure_available()?;

        let mut records = self.records.lock();
        let Some(record) = records.get_mut(&id) else {
            return Ok(None);
        };
        if record.status != guard.status || record.claim_token != guard.claim_token {
            return Ok(None);
        }

        record.status = changes.status;
        if changes.increment_attempts {
            record.attempts += 1;
        }
        if let Some(error) = changes.last_error {
            record.last_error = Some(error);
        }
        record.next_attempt_at = changes.next_attempt_at;
        record.claim_token = changes.claim.map(|c| c.token);
        record.claimed_at = changes.claim.map(|c| c.at);
        if let Some(sent_at) = changes.sent_at {
            record.sent_at = Some(sent_at);
        }
        record.updated_at = Utc::now();

        Ok(Some(record.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};

    fn new_record(recipient: &str, scheduled_for: DateTime<Utc>) -> NewNotification {
        NewNotification {
            recipient: recipient.to_string(),
            subject: "Check-in opens".to_string(),
            body: "Doors open at 9".to_string(),
            category: "reminder".to_string(),
            correlation_key: Some("event-1".to_string()),
            scheduled_for,
        }
    }

    #[tokio::test]
    async fn test_insert_starts_pending_with_zero_attempts() {
        let store = InMemoryStore::new();
        let record = store.insert(new_record("a@x.io", Utc::now())).await.unwrap();
        assert_eq!(record.status, DeliveryStatus::Pending);
        assert_eq!(record.attempts, 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_due_query_orders_by_schedule_then_id() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let late = store
            .insert(new_record("late@x.io", now - Duration::minutes(1)))
            .await
            .unwrap();
        let early = store
            .insert(new_record("early@x.io", now - Duration::minutes(10)))
            .await
            .unwrap();
        let tie_a = store
            .insert(new_record("tie@x.io", now - Duration::minutes(5)))
            .await
            .unwrap();
        let tie_b = store
            .insert(new_record("tie@x.io", now - Duration::minutes(5)))
            .await
            .unwrap();
        store
            .insert(new_record("future@x.io", now + Duration::minutes(5)))
            .await
            .unwrap();

        let due = store.query(&RecordFilter::Due { now }, 10).await.unwrap();
        let ids: Vec<Uuid> = due.iter().map(|n| n.id).collect();
        let (first_tie, second_tie) = if tie_a.id < tie_b.id {
            (tie_a.id, tie_b.id)
        } else {
            (tie_b.id, tie_a.id)
        };
        assert_eq!(ids, vec![early.id, first_tie, second_tie, late.id]);

        let limited = store.query(&RecordFilter::Due { now }, 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_compare_and_set_only_applies_on_matching_guard() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let record = store.insert(new_record("a@x.io", now)).await.unwrap();
        let token = Uuid::new_v4();

        let claimed = store
            .compare_and_set(record.id, Guard::pending(), Changes::claim(token, now))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.status, DeliveryStatus::InProgress);
        assert_eq!(claimed.claim_token, Some(token));

        // Second claim loses the race.
        let again = store
            .compare_and_set(record.id, Guard::pending(), Changes::claim(Uuid::new_v4(), now))
            .await
            .unwrap();
        assert!(again.is_none());

        // Wrong token cannot finish the attempt.
        let stolen = store
            .compare_and_set(record.id, Guard::claimed_by(Uuid::new_v4()), Changes::sent(now))
            .await
            .unwrap();
        assert!(stolen.is_none());

        let sent = store
            .compare_and_set(record.id, Guard::claimed_by(token), Changes::sent(now))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sent.status, DeliveryStatus::Sent);
        assert_eq!(sent.attempts, 1);
        assert_eq!(sent.claim_token, None);
        assert_eq!(sent.sent_at, Some(now));
    }

    #[tokio::test]
    async fn test_failed_attempt_keeps_previous_error_when_none_given() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut record = store.insert(new_record("a@x.io", now)).await.unwrap();
        record.status = DeliveryStatus::InProgress;
        record.claim_token = Some(Uuid::new_v4());
        record.last_error = Some("earlier".to_string());
        let token = record.claim_token;
        store.put(record.clone());

        let mut changes =
            Changes::failed_attempt(DeliveryStatus::Pending, "unused".to_string(), None);
        changes.last_error = None;
        let updated = store
            .compare_and_set(
                record.id,
                Guard {
                    status: DeliveryStatus::InProgress,
                    claim_token: token,
                },
                changes,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.last_error.as_deref(), Some("earlier"));
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = InMemoryStore::new();
        store.set_available(false);
        let err = store.insert(new_record("a@x.io", Utc::now())).await.unwrap_err();
        assert!(err.is_store_failure());

        store.set_available(true);
        assert!(store.insert(new_record("a@x.io", Utc::now())).await.is_ok());
    }

    #[tokio::test]
    async fn test_correlation_query() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.insert(new_record("a@x.io", now)).await.unwrap();
        let mut other = new_record("b@x.io", now);
        other.correlation_key = Some("event-2".to_string());
        store.insert(other).await.unwrap();

        let found = store
            .query(
                &RecordFilter::Correlation {
                    key: "event-1".to_string(),
                },
                10,
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].recipient, "a@x.io");
    }
}
