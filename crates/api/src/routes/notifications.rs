//! Notification routes: scheduling, inspection and the dispatch trigger.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use rally_common::error::AppError;
use rally_common::types::Notification;
use rally_notifier::dispatcher::PassSummary;
use rally_notifier::queue::EnqueueRequest;

use crate::state::AppState;

/// Default and maximum page size for correlation lookups.
const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/notifications",
            post(enqueue_notification).get(list_notifications),
        )
        .route("/api/notifications/dispatch", post(dispatch))
        .route("/api/notifications/{id}", get(get_notification))
}

/// Query parameters for listing notifications.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub correlation_key: Option<String>,
    pub limit: Option<usize>,
}

/// Query parameters for the dispatch trigger.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchParams {
    pub batch_size: Option<usize>,
}

/// POST /api/notifications — Schedule a notification for later delivery.
async fn enqueue_notification(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<Notification>), AppError> {
    let notification = state.queue.enqueue(request).await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

/// GET /api/notifications?correlationKey= — Notifications sharing a correlation key.
async fn list_notifications(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let key = params
        .correlation_key
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| AppError::Validation("correlationKey is required".to_string()))?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .min(MAX_LIST_LIMIT);

    let notifications = state.queue.list_by_correlation(key.trim(), limit).await?;
    Ok(Json(notifications))
}

/// GET /api/notifications/:id — Inspect a single notification.
async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, AppError> {
    let notification = state.queue.get(id).await?;
    Ok(Json(notification))
}

/// POST /api/notifications/dispatch — Run one dispatch pass and report the outcome.
///
/// Store failures surface as 503; individual delivery failures are part of
/// the summary, never an error response.
async fn dispatch(
    State(state): State<AppState>,
    Query(params): Query<DispatchParams>,
) -> Result<Json<PassSummary>, AppError> {
    if params.batch_size == Some(0) {
        return Err(AppError::Validation(
            "batchSize must be greater than zero".to_string(),
        ));
    }

    let summary = state.dispatcher.run_pass_now(params.batch_size).await?;
    Ok(Json(summary))
}
