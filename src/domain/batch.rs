//! Work items, per-seed results, batch requests, and batch summaries.
//!
//! A batch request is validated before any provisioning begins; a seed
//! result holds either generated conversations or an error, never both
//! silently. Once a batch completes, its results belong to the caller and
//! are not mutated further.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::error::OrchestratorError;

/// Inclusive bounds for `BatchRequest::max_parallel`.
pub const MAX_PARALLEL_RANGE: (usize, usize) = (1, 20);

/// Inclusive bounds for `BatchRequest::timeout_per_unit`, in seconds.
pub const TIMEOUT_PER_UNIT_RANGE: (u64, u64) = (30, 600);

/// One independently-processable work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seed {
    pub seed_id: String,
    /// Topic or scenario the generated conversations should cover.
    pub topic: String,
    /// Free-form generation instructions.
    #[serde(default)]
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// One generated conversation. The orchestrator treats turn content as
/// opaque; only the generation collaborator interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub turns: serde_json::Value,
}

/// Quality evaluation outcome for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub conversation_id: String,
    pub score: f64,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Aggregated outcome for one seed.
///
/// Invariant: exactly one of {non-empty `conversations`} or {`error`
/// set} holds. Use `succeeded` / `failed` rather than building the struct
/// by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSeedResult {
    pub seed_id: String,
    pub conversations: Vec<Conversation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports: Option<Vec<QualityReport>>,
    pub passed_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_seconds: f64,
}

impl SandboxSeedResult {
    /// A seed that produced output.
    #[must_use]
    pub fn succeeded(
        seed_id: &str,
        conversations: Vec<Conversation>,
        reports: Option<Vec<QualityReport>>,
        duration: Duration,
    ) -> Self {
        let passed_count = reports
            .as_deref()
            .map(|r| r.iter().filter(|q| q.passed).count())
            .unwrap_or(0);
        Self {
            seed_id: seed_id.to_string(),
            conversations,
            reports,
            passed_count,
            error: None,
            duration_seconds: duration.as_secs_f64(),
        }
    }

    /// A seed that failed. Any partial output is discarded so the
    /// output-xor-error invariant holds.
    #[must_use]
    pub fn failed(seed_id: &str, error: &str, duration: Duration) -> Self {
        Self {
            seed_id: seed_id.to_string(),
            conversations: Vec::new(),
            reports: None,
            passed_count: 0,
            error: Some(error.to_string()),
            duration_seconds: duration.as_secs_f64(),
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Configuration for one batch run. Both the remote fan-out and the local
/// fallback accept the same request.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub seeds: Vec<Seed>,
    pub conversations_per_seed: usize,
    pub model: String,
    pub temperature: f64,
    pub max_parallel: usize,
    pub timeout_per_unit: Duration,
    /// Run the evaluation collaborator on each generated conversation.
    pub evaluate_after: bool,
    /// Optional batch-level deadline. Outstanding workers are cancelled
    /// when it elapses; already-provisioned units are still destroyed.
    pub deadline: Option<Duration>,
}

impl BatchRequest {
    /// Validate request bounds before any provisioning begins.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::Configuration` when the seed list is
    /// empty, `max_parallel` is out of `[1, 20]`, or `timeout_per_unit`
    /// is out of `[30s, 600s]`.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.seeds.is_empty() {
            return Err(OrchestratorError::Configuration(
                "batch request must contain at least one seed".to_string(),
            ));
        }
        let (lo, hi) = MAX_PARALLEL_RANGE;
        if self.max_parallel < lo || self.max_parallel > hi {
            return Err(OrchestratorError::Configuration(format!(
                "max_parallel must be in [{lo}, {hi}], got {}",
                self.max_parallel
            )));
        }
        let (tlo, thi) = TIMEOUT_PER_UNIT_RANGE;
        let secs = self.timeout_per_unit.as_secs();
        if secs < tlo || secs > thi {
            return Err(OrchestratorError::Configuration(format!(
                "timeout_per_unit must be in [{tlo}s, {thi}s], got {secs}s"
            )));
        }
        Ok(())
    }
}

/// How the batch was executed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisioningMode {
    Remote,
    LocalFallback,
}

/// Aggregated counters for a completed batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_seeds: usize,
    pub total_generated: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_passed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_score: Option<f64>,
    pub failed_seeds: usize,
    pub model_used: String,
    pub max_parallel: usize,
    pub duration_seconds: f64,
    pub provisioning_mode: ProvisioningMode,
}

/// Final response for a batch. `success` reflects the batch as a whole
/// and is true independent of individual seed failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub success: bool,
    pub summary: BatchSummary,
    pub results: Vec<SandboxSeedResult>,
}

/// Build the summary for a finished batch. Shared by the fan-out
/// orchestrator and the local fallback so both produce structurally
/// identical results.
#[must_use]
pub fn summarize(
    request: &BatchRequest,
    results: &[SandboxSeedResult],
    duration: Duration,
    mode: ProvisioningMode,
    max_parallel: usize,
) -> BatchSummary {
    let total_generated = results.iter().map(|r| r.conversations.len()).sum();
    let failed_seeds = results.iter().filter(|r| r.is_failed()).count();

    let scores: Vec<f64> = results
        .iter()
        .filter_map(|r| r.reports.as_deref())
        .flatten()
        .map(|q| q.score)
        .collect();
    let (total_passed, avg_score) = if request.evaluate_after {
        let passed = results.iter().map(|r| r.passed_count).sum();
        let avg = if scores.is_empty() {
            None
        } else {
            #[allow(clippy::cast_precision_loss)]
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            Some(mean)
        };
        (Some(passed), avg)
    } else {
        (None, None)
    };

    BatchSummary {
        total_seeds: request.seeds.len(),
        total_generated,
        total_passed,
        avg_score,
        failed_seeds,
        model_used: request.model.clone(),
        max_parallel,
        duration_seconds: duration.as_secs_f64(),
        provisioning_mode: mode,
    }
}
