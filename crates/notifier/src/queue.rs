//! Notification queue: typed access to scheduled notification records.
//!
//! Every mutation after insert is a guarded compare-and-set, so callers that
//! race on the same record (overlapping dispatch passes, stale-claim recovery)
//! resolve to exactly one winner without any lock outside the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use rally_common::error::AppError;
use rally_common::types::{DeliveryStatus, NewNotification, Notification};

use crate::retry::RetryPolicy;
use crate::store::{Changes, Guard, RecordFilter, RecordStore};
use crate::transport::{DeliveryError, OutboundMessage};

/// Category used when the caller does not provide one.
const DEFAULT_CATEGORY: &str = "general";

/// Maximum stale claims recovered per pass.
const RECOVERY_BATCH: usize = 100;

/// Error recorded when an abandoned claim is recovered.
const CLAIM_EXPIRED: &str = "claim expired before the delivery outcome was recorded";

/// Parameters for scheduling a notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub correlation_key: Option<String>,
    /// When omitted the notification is due immediately.
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl EnqueueRequest {
    /// Validate and normalize into an insertable record.
    fn into_new_notification(self, now: DateTime<Utc>) -> Result<NewNotification, AppError> {
        let recipient = self.recipient.trim().to_lowercase();
        if recipient.is_empty() {
            return Err(AppError::Validation("recipient is required".to_string()));
        }
        if self.subject.trim().is_empty() {
            return Err(AppError::Validation("subject is required".to_string()));
        }
        if self.body.trim().is_empty() {
            return Err(AppError::Validation("body is required".to_string()));
        }

        let category = self
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
        let correlation_key = self
            .correlation_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        Ok(NewNotification {
            recipient,
            subject: self.subject,
            body: self.body,
            category,
            correlation_key,
            scheduled_for: self.scheduled_for.unwrap_or(now),
        })
    }
}

/// A record this process currently holds the claim on.
#[derive(Debug, Clone)]
pub struct ClaimedNotification {
    record: Notification,
    token: Uuid,
}

impl ClaimedNotification {
    pub fn id(&self) -> Uuid {
        self.record.id
    }

    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn record(&self) -> &Notification {
        &self.record
    }

    pub fn message(&self) -> OutboundMessage<'_> {
        OutboundMessage {
            recipient: &self.record.recipient,
            subject: &self.record.subject,
            body: &self.record.body,
        }
    }
}

/// Queue repository over a [`RecordStore`].
#[derive(Clone)]
pub struct NotificationQueue {
    store: Arc<dyn RecordStore>,
}

impl NotificationQueue {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Schedule a notification. Rejects blank recipient, subject or body
    /// before touching the store.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Notification, AppError> {
        let record = request.into_new_notification(Utc::now())?;
        let notification = self.store.insert(record).await?;

        tracing::info!(
            notification_id = %notification.id,
            category = %notification.category,
            scheduled_for = %notification.scheduled_for,
            "Notification enqueued"
        );

        Ok(notification)
    }

    /// Read the due set: `Pending` records scheduled at or before `now`, oldest
    /// first, at most `limit`. Does not claim anything.
    pub async fn claim_due_batch(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Notification>, AppError> {
        self.store.query(&RecordFilter::Due { now }, limit).await
    }

    /// Try to take exclusive ownership of a due record.
    ///
    /// Returns `None` when another pass claimed it first.
    pub async fn claim(
        &self,
        record: &Notification,
        now: DateTime<Utc>,
    ) -> Result<Option<ClaimedNotification>, AppError> {
        let token = Uuid::new_v4();
        let claimed = self
            .store
            .compare_and_set(record.id, Guard::pending(), Changes::claim(token, now))
            .await?;

        match claimed {
            Some(record) => Ok(Some(ClaimedNotification { record, token })),
            None => {
                tracing::debug!(notification_id = %record.id, "Claim lost to another pass");
                Ok(None)
            }
        }
    }

    /// Mark a claimed record as sent.
    ///
    /// Returns `false` when the claim was no longer held, in which case the
    /// record is left as is.
    pub async fn record_success(
        &self,
        claimed: &ClaimedNotification,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let updated = self
            .store
            .compare_and_set(
                claimed.id(),
                Guard::claimed_by(claimed.token()),
                Changes::sent(now),
            )
            .await?;

        match updated {
            Some(record) => {
                tracing::info!(
                    notification_id = %record.id,
                    attempts = record.attempts,
                    "Notification sent"
                );
                Ok(true)
            }
            None => {
                tracing::warn!(
                    notification_id = %claimed.id(),
                    "Notification sent but claim was lost before recording the outcome"
                );
                Ok(false)
            }
        }
    }

    /// Record a failed attempt on a claimed record.
    ///
    /// The record returns to `Pending` (with a backoff time when the policy has
    /// one) unless the error is permanent or the attempt budget is used up, in
    /// which case it becomes `Failed`. Returns the updated record, or `None`
    /// when the claim was no longer held.
    pub async fn record_failure(
        &self,
        claimed: &ClaimedNotification,
        error: &DeliveryError,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<Notification>, AppError> {
        let attempts = claimed.record().attempts + 1;
        let terminal = error.is_permanent() || policy.is_exhausted(attempts);
        let (status, next_attempt_at) = if terminal {
            (DeliveryStatus::Failed, None)
        } else {
            (DeliveryStatus::Pending, policy.next_attempt_at(attempts, now))
        };

        let updated = self
            .store
            .compare_and_set(
                claimed.id(),
                Guard::claimed_by(claimed.token()),
                Changes::failed_attempt(status, error.to_string(), next_attempt_at),
            )
            .await?;

        match &updated {
            Some(record) if record.status == DeliveryStatus::Failed => {
                tracing::error!(
                    notification_id = %record.id,
                    attempts = record.attempts,
                    error = %error,
                    "Notification failed permanently"
                );
            }
            Some(record) => {
                tracing::warn!(
                    notification_id = %record.id,
                    attempts = record.attempts,
                    next_attempt_at = ?record.next_attempt_at,
                    error = %error,
                    "Notification delivery failed, will retry"
                );
            }
            None => {
                tracing::warn!(
                    notification_id = %claimed.id(),
                    error = %error,
                    "Delivery failed but claim was lost before recording the outcome"
                );
            }
        }

        Ok(updated)
    }

    /// Release claims held longer than `stale_after`, counting the abandoned
    /// attempt as a failure. Returns how many records were recovered.
    pub async fn recover_stale_claims(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
        policy: &RetryPolicy,
    ) -> Result<usize, AppError> {
        // A timeout reaching past the representable time range means no claim
        // can be old enough to count as abandoned.
        let Some(claimed_before) = chrono::Duration::from_std(stale_after)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
        else {
            tracing::debug!(?stale_after, "Claim staleness timeout out of range, skipping recovery");
            return Ok(0);
        };

        let stale = self
            .store
            .query(&RecordFilter::StaleClaims { claimed_before }, RECOVERY_BATCH)
            .await?;

        let mut recovered = 0;
        for record in stale {
            let Some(token) = record.claim_token else {
                continue;
            };
            let claimed = ClaimedNotification { record, token };
            tracing::warn!(
                notification_id = %claimed.id(),
                claimed_at = ?claimed.record().claimed_at,
                "Recovering stale claim"
            );
            let error = DeliveryError::Transient(CLAIM_EXPIRED.to_string());
            if self
                .record_failure(&claimed, &error, policy, now)
                .await?
                .is_some()
            {
                recovered += 1;
            }
        }

        Ok(recovered)
    }

    /// Fetch a single notification.
    pub async fn get(&self, id: Uuid) -> Result<Notification, AppError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))
    }

    /// Notifications sharing a correlation key, oldest first.
    pub async fn list_by_correlation(
        &self,
        key: &str,
        limit: usize,
    ) -> Result<Vec<Notification>, AppError> {
        self.store
            .query(
                &RecordFilter::Correlation {
                    key: key.to_string(),
                },
                limit,
            )
            .await
    }
}
