//! Dispatch engine. Runs one processing pass over the notification queue.
//!
//! A pass:
//! 1. Recovers claims abandoned by crashed workers
//! 2. Reads the due batch (oldest `scheduled_for` first)
//! 3. Claims each record with a compare-and-set, skipping records another pass owns
//! 4. Sends claimed records through the transport and records the outcome
//!
//! The engine keeps no state between passes and has no timer of its own; the
//! caller decides when a pass runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;

use rally_common::config::AppConfig;
use rally_common::error::AppError;
use rally_common::types::{DeliveryStatus, Notification};

use crate::queue::NotificationQueue;
use crate::retry::RetryPolicy;
use crate::transport::{DeliveryError, Transport};

/// Tuning knobs for a dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Records selected per pass unless the trigger overrides it.
    pub batch_size: usize,
    /// Delivery attempts allowed in flight at once.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Claims older than this are treated as abandoned.
    pub claim_stale_after: Duration,
}

impl DispatchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.dispatch_batch_size,
            concurrency: config.dispatch_concurrency,
            retry: RetryPolicy::new(
                config.dispatch_max_attempts,
                Duration::from_secs(config.dispatch_backoff_base_secs),
                Duration::from_secs(config.dispatch_backoff_max_secs),
            ),
            claim_stale_after: Duration::from_secs(config.dispatch_claim_stale_after_secs),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            concurrency: 8,
            retry: RetryPolicy::default(),
            claim_stale_after: Duration::from_secs(300),
        }
    }
}

/// Result of one pass, returned to whoever triggered it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassSummary {
    /// Records claimed by this pass and handed to the transport.
    pub attempted: u32,
    pub sent: u32,
    /// Failed attempts that went back to `Pending`.
    pub retrying: u32,
    pub failed_permanently: u32,
    /// Due records another pass claimed first.
    pub skipped: u32,
    /// Abandoned claims released before selecting the batch.
    pub recovered: u32,
    /// First delivery error in batch order.
    pub first_error: Option<String>,
}

/// What happened to a single record in a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptOutcome {
    Skipped,
    Sent,
    Retrying(String),
    FailedPermanently(String),
    /// Delivery failed and the claim was gone by the time we recorded it.
    ClaimLost(String),
}

impl PassSummary {
    fn absorb(&mut self, outcome: AttemptOutcome) {
        let error = match outcome {
            AttemptOutcome::Skipped => {
                self.skipped += 1;
                return;
            }
            AttemptOutcome::Sent => {
                self.attempted += 1;
                self.sent += 1;
                return;
            }
            AttemptOutcome::Retrying(error) => {
                self.retrying += 1;
                error
            }
            AttemptOutcome::FailedPermanently(error) => {
                self.failed_permanently += 1;
                error
            }
            AttemptOutcome::ClaimLost(error) => error,
        };

        self.attempted += 1;
        if self.first_error.is_none() {
            self.first_error = Some(error);
        }
    }
}

/// Runs dispatch passes against a queue and a transport.
pub struct Dispatcher {
    queue: NotificationQueue,
    transport: Arc<dyn Transport>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        queue: NotificationQueue,
        transport: Arc<dyn Transport>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            queue,
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Run one pass at the current wall-clock time.
    pub async fn run_pass_now(&self, batch_size: Option<usize>) -> Result<PassSummary, AppError> {
        self.run_pass(Utc::now(), batch_size).await
    }

    /// Run one pass as of `now`.
    ///
    /// Delivery failures are recorded per record and never fail the pass. A
    /// store failure stops new attempts from starting and is returned once the
    /// attempts already in flight have finished. Attempts run on spawned tasks,
    /// so dropping this future does not cancel sends that already started.
    pub async fn run_pass(
        &self,
        now: DateTime<Utc>,
        batch_size: Option<usize>,
    ) -> Result<PassSummary, AppError> {
        let mut summary = PassSummary::default();

        let recovered = self
            .queue
            .recover_stale_claims(now, self.settings.claim_stale_after, &self.settings.retry)
            .await?;
        summary.recovered = u32::try_from(recovered).unwrap_or(u32::MAX);

        let limit = batch_size.unwrap_or(self.settings.batch_size);
        let batch = self.queue.claim_due_batch(now, limit).await?;
        if batch.is_empty() {
            tracing::debug!(recovered = summary.recovered, "No notifications due");
            return Ok(summary);
        }

        tracing::debug!(due = batch.len(), limit, "Dispatching due notifications");

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let aborted = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(batch.len());

        for record in batch {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| AppError::Internal(format!("Dispatch semaphore closed: {}", e)))?;
            if aborted.load(Ordering::Acquire) {
                break;
            }

            let queue = self.queue.clone();
            let transport = Arc::clone(&self.transport);
            let retry = self.settings.retry;
            let aborted = Arc::clone(&aborted);

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = attempt(&queue, &transport, &retry, record, now).await;
                if result.is_err() {
                    aborted.store(true, Ordering::Release);
                }
                result
            }));
        }

        let mut pass_error: Option<AppError> = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(outcome)) => summary.absorb(outcome),
                Ok(Err(e)) => {
                    pass_error.get_or_insert(e);
                }
                Err(e) => {
                    pass_error.get_or_insert(AppError::Internal(format!(
                        "Dispatch task failed: {}",
                        e
                    )));
                }
            }
        }

        if let Some(e) = pass_error {
            tracing::error!(
                error = %e,
                attempted = summary.attempted,
                sent = summary.sent,
                "Dispatch pass aborted"
            );
            return Err(e);
        }

        tracing::info!(
            attempted = summary.attempted,
            sent = summary.sent,
            retrying = summary.retrying,
            failed_permanently = summary.failed_permanently,
            skipped = summary.skipped,
            recovered = summary.recovered,
            "Dispatch pass complete"
        );

        Ok(summary)
    }
}

/// Claim, send and record a single notification.
///
/// The send runs on its own task so a panicking transport is recorded as a
/// failed attempt on this record instead of taking the pass down.
async fn attempt(
    queue: &NotificationQueue,
    transport: &Arc<dyn Transport>,
    retry: &RetryPolicy,
    record: Notification,
    now: DateTime<Utc>,
) -> Result<AttemptOutcome, AppError> {
    let Some(claimed) = queue.claim(&record, now).await? else {
        return Ok(AttemptOutcome::Skipped);
    };

    let send = {
        let transport = Arc::clone(transport);
        let claimed = claimed.clone();
        tokio::spawn(async move { transport.send(claimed.message()).await })
    };
    let delivery = match send.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(notification_id = %claimed.id(), error = %e, "Transport task failed");
            Err(DeliveryError::Transient(format!("Transport task failed: {}", e)))
        }
    };

    match delivery {
        Ok(()) => {
            queue.record_success(&claimed, now).await?;
            Ok(AttemptOutcome::Sent)
        }
        Err(error) => {
            let description = error.to_string();
            let outcome = match queue.record_failure(&claimed, &error, retry, now).await? {
                Some(updated) if updated.status == DeliveryStatus::Failed => {
                    AttemptOutcome::FailedPermanently(description)
                }
                Some(_) => AttemptOutcome::Retrying(description),
                None => AttemptOutcome::ClaimLost(description),
            };
            Ok(outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_outcomes() {
        let mut summary = PassSummary::default();
        summary.absorb(AttemptOutcome::Sent);
        summary.absorb(AttemptOutcome::Skipped);
        summary.absorb(AttemptOutcome::Retrying("timeout".to_string()));
        summary.absorb(AttemptOutcome::FailedPermanently("bad address".to_string()));
        summary.absorb(AttemptOutcome::ClaimLost("late".to_string()));

        assert_eq!(summary.attempted, 4);
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.retrying, 1);
        assert_eq!(summary.failed_permanently, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.first_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_summary_serializes_first_error_as_null() {
        let json = serde_json::to_value(PassSummary::default()).unwrap();
        assert_eq!(json["attempted"], 0);
        assert_eq!(json["failedPermanently"], 0);
        assert!(json["firstError"].is_null());
    }

    #[test]
    fn test_settings_from_config() {
        let config = AppConfig {
            database_url: "unused".to_string(),
            db_max_connections: 5,
            api_bind_addr: "127.0.0.1:0".to_string(),
            resend_api_key: None,
            resend_api_url: "http://unused".to_string(),
            email_from: None,
            transport_timeout_secs: 5,
            dispatch_batch_size: 10,
            dispatch_concurrency: 2,
            dispatch_max_attempts: 5,
            dispatch_backoff_base_secs: 0,
            dispatch_backoff_max_secs: 60,
            dispatch_claim_stale_after_secs: 120,
        };
        let settings = DispatchSettings::from_config(&config);
        assert_eq!(settings.batch_size, 10);
        assert_eq!(settings.concurrency, 2);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.backoff_base, Duration::ZERO);
        assert_eq!(settings.retry.backoff_max, Duration::from_secs(60));
        assert_eq!(settings.claim_stale_after, Duration::from_secs(120));
    }
}
