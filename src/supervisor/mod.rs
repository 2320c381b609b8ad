//! Supervisor layer
//!
//! Operational alerting shared by the services.

pub mod alert_manager;

pub use alert_manager::{Alert, AlertLevel, AlertManager, AlertSink};
