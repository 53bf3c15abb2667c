//! Threat intelligence clients.

pub mod mock;

pub use mock::{LookupRecord, MockBehavior, MockThreatIntelClient, REFERENCE_SOURCE};
