//! HTTP handlers.
//!
//! # Endpoints
//!
//! - `POST /webhooks/{provider}` – inbound payment provider webhooks

pub mod webhooks;
