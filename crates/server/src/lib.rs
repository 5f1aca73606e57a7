//! # KPATH HTTP Server
//!
//! Thin facade over the search core: request validation, the §6-style
//! endpoint surface under `/api/v1/search`, per-query telemetry, and the
//! `{code, message, retryable}` error envelope.
//!
//! Authentication lives in an outer middleware that is out of scope here;
//! the facade trusts the `X-Caller-Id` header it is handed and uses it for
//! telemetry only.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use crate::config::ServerConfig;
pub use crate::error::{ServerError, ServerResult};
pub use crate::server::{build_router, start_server};
pub use crate::state::ServerState;
