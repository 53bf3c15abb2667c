//! # rr-api
//!
//! HTTP surface of Runbook Responder: alert ingestion, incident queries,
//! the approval decision callback and operational endpoints.

pub mod dto;
pub mod error;
pub mod ingest;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::{shutdown_signal, ApiServer, ApiServerConfig};
pub use state::AppState;
