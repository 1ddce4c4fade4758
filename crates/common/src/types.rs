use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification delivery status.
///
/// `InProgress` only exists while one dispatch attempt holds the claim on a
/// record; the due-set query never selects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    InProgress,
    Sent,
    Failed,
}

impl DeliveryStatus {
    /// `Sent` and `Failed` never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::Failed)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::InProgress => write!(f, "in_progress"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A scheduled notification: one deferred, retryable unit of delivery work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    /// Canonical (trimmed, lowercase) destination address
    pub recipient: String,
    pub subject: String,
    pub body: String,
    /// Free-form classification, e.g. the event type that produced it
    pub category: String,
    /// Optional grouping key such as a team or event id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Earliest time a retry may be attempted (backoff)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing)]
    pub claim_token: Option<Uuid>,
    #[serde(default, skip_serializing)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Whether the record is eligible for a dispatch attempt at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == DeliveryStatus::Pending
            && self.scheduled_for <= now
            && self.next_attempt_at.is_none_or(|at| at <= now)
    }
}

/// Validated input for a new notification, ready for insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub category: String,
    pub correlation_key: Option<String>,
    pub scheduled_for: DateTime<Utc>,
}
