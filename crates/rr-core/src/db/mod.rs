//! Incident persistence.
//!
//! The [`IncidentStateStore`] trait is the only way the rest of the system
//! reads or writes incidents. Two implementations ship: an in-memory store
//! for tests and single-process demos, and a SQLite store behind the
//! `database` feature.

mod error;
mod memory;
mod pool;
mod schema;
#[cfg(feature = "database")]
mod sqlite;
mod store;

pub use error::StoreError;
pub use memory::InMemoryStateStore;
pub use pool::{is_memory_url, PoolOptions};
#[cfg(feature = "database")]
pub use pool::{create_pool, create_pool_with_options};
#[cfg(feature = "database")]
pub use schema::run_migrations;
#[cfg(feature = "database")]
pub use sqlite::SqliteStateStore;
pub use store::{commit_with_retry, IncidentStateStore, SharedStateStore};
