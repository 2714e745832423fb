//! Sandbox job records and the job lifecycle state machine.
//!
//! One `SandboxJob` exists per provisioned unit. Transitions are
//! one-directional; no terminal state may transition elsewhere.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::OrchestratorError;

/// Which workload kind a unit runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SandboxTemplate {
    Generation,
    Demo,
    Evaluation,
    Training,
}

impl SandboxTemplate {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Demo => "demo",
            Self::Evaluation => "evaluation",
            Self::Training => "training",
        }
    }
}

impl std::fmt::Display for SandboxTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job lifecycle state.
///
/// `Pending → Booting → Running → (Exporting) → Completed | Failed | Expired`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job record created, no remote resources yet.
    Pending,
    /// Provisioning requested; unit not yet confirmed healthy.
    Booting,
    /// Unit confirmed healthy and usable.
    Running,
    /// Artifacts being persisted before destroy. Always followed by a
    /// terminal state.
    Exporting,
    /// Terminal, success.
    Completed,
    /// Terminal, unrecoverable error during booting/running/exporting.
    Failed,
    /// Terminal, TTL elapsed while the job was non-terminal.
    Expired,
}

impl JobStatus {
    /// Whether this state admits no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }

    /// Whether the one-directional state machine permits `self → next`.
    ///
    /// `Expired` is reachable from any non-terminal state (the reaper's
    /// transition), `Failed` from any non-terminal state, and the forward
    /// path is strictly `Pending → Booting → Running → Exporting →
    /// Completed` with `Exporting` optional.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Pending => false,
            Self::Booting => self == Self::Pending,
            Self::Running => self == Self::Booting,
            Self::Exporting => self == Self::Running,
            Self::Completed => matches!(self, Self::Running | Self::Exporting),
            Self::Failed | Self::Expired => true,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Booting => "booting",
            Self::Running => "running",
            Self::Exporting => "exporting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One record per provisioned unit.
///
/// Invariant: `expires_at` is set if and only if the job has a TTL; once
/// the status is terminal the record never changes again (enforced by the
/// registry, which refuses transitions out of terminal states).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxJob {
    /// Opaque unique id, caller-invisible internal key.
    pub job_id: String,
    pub template: SandboxTemplate,
    pub status: JobStatus,
    /// Optional tenant scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Populated once the job is `Running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_api_url: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set only for TTL-bounded jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Set only in `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SandboxJob {
    /// Create a fresh `Pending` job with a generated id and no TTL.
    #[must_use]
    pub fn new(template: SandboxTemplate) -> Self {
        Self {
            job_id: generate_job_id(),
            template,
            status: JobStatus::Pending,
            organization_id: None,
            access_url: None,
            internal_api_url: None,
            created_at: Utc::now(),
            expires_at: None,
            error: None,
        }
    }

    /// Create a fresh `Pending` job that expires `ttl` from now.
    #[must_use]
    pub fn with_ttl(template: SandboxTemplate, ttl: chrono::Duration) -> Self {
        let mut job = Self::new(template);
        job.expires_at = Some(job.created_at + ttl);
        job
    }

    /// Whether the TTL (if any) has elapsed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|e| e <= now)
    }
}

/// Validates sandbox job ID format.
///
/// A valid job ID is `sbx-` followed by exactly 16 lowercase hex characters.
///
/// # Errors
///
/// Returns an error if the ID doesn't match the expected format.
pub fn validate_job_id(id: &str) -> Result<()> {
    if !id.starts_with("sbx-") || id.len() != 20 {
        return Err(OrchestratorError::JobNotFound(id.to_string()).into());
    }
    if !id[4..]
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    {
        return Err(OrchestratorError::JobNotFound(id.to_string()).into());
    }
    Ok(())
}

/// Generate a unique sandbox job identifier.
///
/// Format: `sbx-` followed by 16 lowercase hex characters.
/// Entropy sources: nanosecond timestamp and two independent `RandomState`
/// hashes.
#[must_use]
pub fn generate_job_id() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u128(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    );
    hasher.write_u64(RandomState::new().build_hasher().finish());
    hasher.write_u64(RandomState::new().build_hasher().finish());
    format!("sbx-{:016x}", hasher.finish())
}
