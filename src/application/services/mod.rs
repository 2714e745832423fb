//! Use-case services. Each service owns one orchestration concern and
//! depends only on domain types and port traits.

pub mod demo;
pub mod evaluation;
pub mod export;
pub mod fan_out;
pub mod local;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use crate::application::ports::BatchExecutor;

pub use demo::{DemoAccess, DemoSettings, EphemeralDemoProvisioner};
pub use evaluation::{EphemeralEvaluationRunner, EvaluationOutcome, EvaluationSettings};
pub use export::{ExportSpec, Exporter, generation_artifacts};
pub use fan_out::FanOutOrchestrator;
pub use local::LocalFallbackExecutor;
pub use registry::JobRegistry;

/// Whether the remote provisioning backend can be used at all, decided
/// once per process from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningAvailability {
    Available,
    Unavailable { reason: String },
}

/// Pick the batch executor for the current environment.
///
/// Remote fan-out when provisioning is available, sequential local
/// execution otherwise. Callers treat the returned executor uniformly;
/// the substitution only shows up in the result's `provisioning_mode`.
#[must_use]
pub fn select_executor(
    availability: &ProvisioningAvailability,
    remote: Arc<FanOutOrchestrator>,
    local: Arc<LocalFallbackExecutor>,
) -> Arc<dyn BatchExecutor> {
    match availability {
        ProvisioningAvailability::Available => remote,
        ProvisioningAvailability::Unavailable { reason } => {
            tracing::warn!(reason, "provisioning unavailable, selecting local fallback");
            local
        }
    }
}
