//! Typed orchestrator error taxonomy.
//!
//! This module has zero imports from `crate::application`, `crate::infra`,
//! `tokio`, `std::fs`, or `std::net`. All error types implement
//! `thiserror::Error` and convert to `anyhow::Error` via the `?` operator.
//!
//! Propagation policy: per-seed errors are captured and returned as data in
//! `SandboxSeedResult` — never thrown across the batch boundary. Only
//! batch-level configuration errors surface before any provisioning begins.

use thiserror::Error;

/// Errors raised by the sandbox orchestrator and its single-unit runners.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No provisioning backend is available. Triggers the local fallback
    /// executor, not a user-visible failure.
    #[error("sandbox provisioning is unavailable: {0}")]
    ProvisioningUnavailable(String),

    /// A single unit exceeded its per-unit timeout. Isolated to that seed.
    #[error("sandbox for seed '{seed_id}' timed out after {timeout_secs}s")]
    ProvisioningTimeout { seed_id: String, timeout_secs: u64 },

    /// A demo or evaluation unit never became healthy within the retry
    /// budget. Always followed by cleanup of the unit.
    #[error("health check exhausted after {attempts} attempts\n{log}")]
    HealthCheckExhausted { attempts: u32, log: String },

    /// One or more artifacts could not be exported. Non-fatal: the
    /// remaining artifacts in the same export are still valid.
    #[error("export partially failed: {0}")]
    ExportPartialFailure(String),

    /// Feature disabled or credentials missing. Surfaced immediately
    /// before any provisioning begins; never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Webhook signature verification failed. An authentication error,
    /// not a crash.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A command inside a unit exited non-zero or produced unusable output.
    #[error("unit command failed (exit code {exit_code}):\n{stderr_tail}")]
    UnitCommandFailed { exit_code: i32, stderr_tail: String },

    /// An illegal job state transition was requested.
    #[error("illegal job transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    /// The referenced job does not exist in the registry.
    #[error("job '{0}' not found")]
    JobNotFound(String),
}
