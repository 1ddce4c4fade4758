//! HTTP surface for the notification engine.
//!
//! - `GET  /health`
//! - `POST /api/notifications` — schedule a notification
//! - `GET  /api/notifications?correlationKey=` — audit by correlation key
//! - `GET  /api/notifications/{id}` — inspect one notification
//! - `POST /api/notifications/dispatch` — run one dispatch pass
pub mod routes;
pub mod state;
