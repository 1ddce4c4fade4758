//! PostgreSQL-backed record store.
//!
//! Claims and outcomes are single conditional `UPDATE ... RETURNING *`
//! statements. Under concurrent passes Postgres re-evaluates the `WHERE`
//! clause once the row lock is released, so at most one writer wins.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use rally_common::error::AppError;
use rally_common::types::{DeliveryStatus, NewNotification, Notification};

use super::{Changes, Guard, RecordFilter, RecordStore};

/// Record store over the `scheduled_notifications` table.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn insert(&self, record: NewNotification) -> Result<Notification, AppError> {
        let notification: Notification = sqlx::query_as(
            r#"
            INSERT INTO scheduled_notifications
                (id, recipient, subject, body, category, correlation_key, scheduled_for, status, attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.recipient)
        .bind(&record.subject)
        .bind(&record.body)
        .bind(&record.category)
        .bind(&record.correlation_key)
        .bind(record.scheduled_for)
        .bind(DeliveryStatus::Pending.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(notification)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>, AppError> {
        let notification: Option<Notification> =
            sqlx::query_as("SELECT * FROM scheduled_notifications WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(notification)
    }

    async fn query(
        &self,
        filter: &RecordFilter,
        limit: usize,
    ) -> Result<Vec<Notification>, AppError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let records: Vec<Notification> = match filter {
            RecordFilter::Due { now } => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM scheduled_notifications
                    WHERE status = $1
                      AND scheduled_for <= $2
                      AND (next_attempt_at IS NULL OR next_attempt_at <= $2)
                    ORDER BY scheduled_for ASC, id ASC
                    LIMIT $3
                    "#,
                )
                .bind(DeliveryStatus::Pending.to_string())
                .bind(*now)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            RecordFilter::StaleClaims { claimed_before } => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM scheduled_notifications
                    WHERE status = $1 AND claimed_at <= $2
                    ORDER BY claimed_at ASC, id ASC
                    LIMIT $3
                    "#,
                )
                .bind(DeliveryStatus::InProgress.to_string())
                .bind(*claimed_before)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            RecordFilter::Correlation { key } => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM scheduled_notifications
                    WHERE correlation_key = $1
                    ORDER BY created_at ASC, id ASC
                    LIMIT $2
                    "#,
                )
                .bind(key)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(records)
    }

    async fn compare_and_set(
        &self,
        id: Uuid,
        guard: Guard,
        changes: Changes,
    ) -> Result<Option<Notification>, AppError> {
        let updated: Option<Notification> = sqlx::query_as(
            r#"
            UPDATE scheduled_notifications
            SET status = $4,
                attempts = attempts + $5,
                last_error = COALESCE($6, last_error),
                next_attempt_at = $7,
                claim_token = $8,
                claimed_at = $9,
                sent_at = COALESCE($10, sent_at),
                updated_at = NOW()
            WHERE id = $1
              AND status = $2
              AND claim_token IS NOT DISTINCT FROM $3
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(guard.status.to_string())
        .bind(guard.claim_token)
        .bind(changes.status.to_string())
        .bind(i32::from(changes.increment_attempts))
        .bind(changes.last_error)
        .bind(changes.next_attempt_at)
        .bind(changes.claim.map(|c| c.token))
        .bind(changes.claim.map(|c| c.at))
        .bind(changes.sent_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }
}
