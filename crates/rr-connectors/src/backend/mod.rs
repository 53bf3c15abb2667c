//! Remediation backends.

pub mod browser;
pub mod mock;

pub use browser::{BrowserSession, DemoBrowserBackend, SessionTracker, DEFAULT_SESSION_TIMEOUT};
pub use mock::{MockBackendBehavior, MockRemediationBackend};
