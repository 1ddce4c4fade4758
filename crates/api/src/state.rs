//! Shared application state for the Axum API server.

use std::sync::Arc;

use rally_notifier::dispatcher::Dispatcher;
use rally_notifier::queue::NotificationQueue;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub queue: NotificationQueue,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(queue: NotificationQueue, dispatcher: Dispatcher) -> Self {
        Self {
            queue,
            dispatcher: Arc::new(dispatcher),
        }
    }
}
