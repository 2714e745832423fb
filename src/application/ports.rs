//! Port trait definitions for the application layer.
//!
//! Ports are the interfaces (contracts) that external collaborators must
//! fulfill. This file imports only from `crate::domain` — never from
//! `crate::infra`.
//!
//! All ports are `async_trait` object-safe so services can hold them as
//! `Arc<dyn …>` and tests can inject fakes.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{BatchRequest, BatchResult, Conversation, QualityReport, SandboxTemplate, Seed};

// ── Value Types ───────────────────────────────────────────────────────────────

/// Handle to one live execution unit. Owned by exactly one worker for the
/// unit's lifetime; consumed by `ProvisioningClient::destroy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitHandle {
    pub unit_id: String,
    pub template: SandboxTemplate,
}

/// Captured output of a command run inside a unit.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last `max_lines` lines of stderr, for diagnostics.
    #[must_use]
    pub fn stderr_tail(&self, max_lines: usize) -> String {
        let lines: Vec<&str> = self.stderr.lines().collect();
        let start = lines.len().saturating_sub(max_lines);
        lines[start..].join("\n")
    }
}

// ── Provisioning Port ─────────────────────────────────────────────────────────

/// Creates and destroys isolated execution units, moves files in and out of
/// them, and runs shell-like commands inside them.
///
/// How units physically execute code is the backend's concern; this crate
/// only consumes the interface.
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    /// Provision one unit. `timeout` is the backend-enforced maximum
    /// lifetime of the unit; the backend tears the unit down on its own
    /// once it elapses.
    async fn create(&self, template: SandboxTemplate, timeout: Duration) -> Result<UnitHandle>;

    /// Write a file inside the unit, creating parent directories.
    async fn write_file(&self, handle: &UnitHandle, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read a file from the unit. `Ok(None)` means the file does not
    /// exist; `Err` means the read itself failed.
    async fn read_file(&self, handle: &UnitHandle, path: &str) -> Result<Option<Vec<u8>>>;

    /// Run a shell command inside the unit and capture its output.
    async fn run_command(
        &self,
        handle: &UnitHandle,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput>;

    /// Public URL for a port the unit exposes.
    async fn public_url(&self, handle: &UnitHandle, port: u16) -> Result<String>;

    /// Tear the unit down. Consumes the handle: no operation on a unit is
    /// possible after destroy.
    async fn destroy(&self, handle: UnitHandle) -> Result<()>;
}

// ── Generation and Evaluation Ports ───────────────────────────────────────────

/// External collaborator that produces conversations for a seed.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(
        &self,
        seed: &Seed,
        count: usize,
        model: &str,
        temperature: f64,
    ) -> Result<(Vec<Conversation>, Option<Vec<QualityReport>>)>;
}

/// External collaborator that scores one conversation. `prior` is the
/// report the generation step may already have produced for it.
#[async_trait]
pub trait EvaluationService: Send + Sync {
    async fn evaluate(
        &self,
        conversation: &Conversation,
        prior: Option<&QualityReport>,
    ) -> Result<QualityReport>;
}

// ── Batch Executor Strategy ───────────────────────────────────────────────────

/// Strategy seam over batch execution. Implemented by the remote fan-out
/// orchestrator and the local sequential fallback; both return structurally
/// identical `BatchResult`s.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    async fn run_batch(&self, request: BatchRequest) -> Result<BatchResult>;
}
