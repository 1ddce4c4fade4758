//! Scheduled notification delivery.
//!
//! Notifications are enqueued with a `scheduled_for` time and delivered by
//! externally triggered dispatch passes:
//! - [`queue::NotificationQueue`]: typed access to the record store
//! - [`dispatcher::Dispatcher`]: one select/claim/send/record pass
//! - [`store`]: Postgres and in-memory record stores
//! - [`transport`]: Resend email and log-only transports

pub mod dispatcher;
pub mod queue;
pub mod retry;
pub mod store;
pub mod transport;
