//! # QuoteSync Server
//!
//! Authoritative HTTP server for QuoteSync quotations.
//!
//! This crate provides:
//! - HTTP endpoints (health, list, create, read, patch, state change)
//! - Lifecycle enforcement through the engine's state machine
//! - Default audit and notification sinks writing `tracing` events
//!
//! # Endpoints
//!
//! | Route | Meaning |
//! |---|---|
//! | `GET /health` | 200 when the store answers, 503 otherwise |
//! | `GET /quotations?client=` | a client's quotations |
//! | `POST /quotations` | create in `CARGADA`, version 1 |
//! | `GET /quotations/{id}` | one quotation or 404 |
//! | `PATCH /quotations/{id}` | content patch, new version |
//! | `POST /quotations/{id}/state` | `{state, force}` lifecycle change |
//!
//! A state change answers 400 with the allowed targets for a transition
//! outside the table, 404 for an unknown record, 409 when another quotation
//! of the client is already active and `force` is not set, and 500 on a
//! persistence fault. A patch carrying `expectedVersion` answers 409 with the
//! stored version when the record has moved on.
//!
//! The acting user comes from the `x-actor-id` / `x-actor-name` headers;
//! authentication is expected to happen upstream.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod collaborators;
mod config;
mod error;
mod handler;
mod routes;
mod server;

pub use collaborators::{LogNotifier, TracingAuditSink};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use routes::app_router;
pub use server::SyncServer;
