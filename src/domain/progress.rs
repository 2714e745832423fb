//! Ephemeral per-seed progress events.
//!
//! `SandboxProgress` events are never persisted; they exist only on the
//! streaming channel between workers and the consumer. For a fixed seed,
//! `conversations_completed` is monotonically non-decreasing until a
//! terminal phase is reached.

use serde::{Deserialize, Serialize};

use crate::domain::batch::BatchResult;

/// Where a single seed currently is in its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SeedPhase {
    Queued,
    Booting,
    Generating,
    Evaluating,
    Complete,
    Error,
}

impl SeedPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// One progress event for one seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxProgress {
    pub seed_id: String,
    /// Zero-based position of this seed within the batch.
    pub sandbox_index: usize,
    pub total_sandboxes: usize,
    pub phase: SeedPhase,
    pub conversations_completed: usize,
    pub conversations_total: usize,
    pub elapsed_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SandboxProgress {
    /// An event for a seed that has not produced anything yet.
    #[must_use]
    pub fn at_phase(
        seed_id: &str,
        sandbox_index: usize,
        total_sandboxes: usize,
        phase: SeedPhase,
        conversations_total: usize,
        elapsed_seconds: f64,
    ) -> Self {
        Self {
            seed_id: seed_id.to_string(),
            sandbox_index,
            total_sandboxes,
            phase,
            conversations_completed: 0,
            conversations_total,
            elapsed_seconds,
            error: None,
        }
    }
}

/// One item on the batch streaming channel.
///
/// Consumers must treat the stream as a single-pass sequence: zero or more
/// `Progress` events, terminated exactly once by `Done`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchEvent {
    Progress(SandboxProgress),
    Done(BatchResult),
}
