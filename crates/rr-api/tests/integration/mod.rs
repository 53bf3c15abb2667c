pub mod alert_tests;
pub mod approval_tests;
pub mod common;
pub mod database_tests;
pub mod health_tests;
pub mod incident_tests;
