//! Infrastructure adapters: configuration, telemetry, and webhook
//! ingestion. The only layer that touches the process environment.

pub mod config;
pub mod telemetry;
pub mod webhook;

pub use config::OrchestratorConfig;
pub use webhook::{EventRing, LifecycleNotification, NotificationKind, sign_body, verify_signature};
