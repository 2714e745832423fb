//! Ephemeral evaluation runner — scores a conversation set against
//! reference data inside one short-lived unit.
//!
//! The payload (conversations plus reference data) is written into the
//! unit, the preinstalled judge command is run, and its verdict is parsed
//! from the final line of stdout. Artifacts are exported before the unit is
//! destroyed; the unit is destroyed on every exit path.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::application::ports::{ProvisioningClient, UnitHandle};
use crate::application::services::export::{ExportSpec, Exporter};
use crate::application::services::registry::JobRegistry;
use crate::domain::batch::{Conversation, QualityReport};
use crate::domain::error::OrchestratorError;
use crate::domain::export::{ArtifactFormat, ArtifactType, SandboxExportResult};
use crate::domain::job::{JobStatus, SandboxJob, SandboxTemplate};

const PAYLOAD_PATH: &str = "/work/payload.json";
const REPORTS_PATH: &str = "/work/out/quality_reports.json";
const JUDGE_LOG_PATH: &str = "/work/out/judge.log";

/// Tunables for evaluation runs.
#[derive(Debug, Clone)]
pub struct EvaluationSettings {
    /// Command run inside the unit; reads the payload, prints its verdict
    /// as the final line of stdout.
    pub judge_command: String,
    pub judge_timeout: Duration,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            judge_command: format!("python3 /opt/judge/run.py {PAYLOAD_PATH}"),
            judge_timeout: Duration::from_secs(300),
        }
    }
}

/// What the judge command prints as its final stdout line.
#[derive(Debug, Deserialize)]
struct JudgeVerdict {
    reports: Vec<QualityReport>,
}

/// Scored result of one evaluation run.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationOutcome {
    pub experiment_name: String,
    pub job_id: String,
    pub total: usize,
    pub passed: usize,
    pub avg_score: f64,
    pub reports: Vec<QualityReport>,
    /// Present when an exporter is configured; may be partial.
    pub export: Option<SandboxExportResult>,
}

#[derive(Serialize)]
struct EvaluationPayload<'a> {
    experiment_name: &'a str,
    conversations: &'a [Conversation],
    reference_data: &'a serde_json::Value,
}

/// Runs judge-based evaluations in single TTL-bounded units.
pub struct EphemeralEvaluationRunner {
    provisioner: Arc<dyn ProvisioningClient>,
    registry: JobRegistry,
    exporter: Option<Exporter>,
    settings: EvaluationSettings,
}

impl EphemeralEvaluationRunner {
    #[must_use]
    pub fn new(
        provisioner: Arc<dyn ProvisioningClient>,
        registry: JobRegistry,
        exporter: Option<Exporter>,
        settings: EvaluationSettings,
    ) -> Self {
        Self {
            provisioner,
            registry,
            exporter,
            settings,
        }
    }

    /// Evaluate `conversations` against `reference_data` in a fresh unit.
    ///
    /// # Errors
    ///
    /// Returns `UnitCommandFailed` when the judge exits non-zero or prints
    /// an unparsable verdict, and provisioning errors when the unit cannot
    /// be created. The unit is destroyed before any error is returned.
    pub async fn run_evaluation(
        &self,
        conversations: &[Conversation],
        reference_data: &serde_json::Value,
        experiment_name: &str,
        ttl: Duration,
    ) -> Result<EvaluationOutcome> {
        let ttl_chrono = chrono::Duration::from_std(ttl).context("evaluation ttl out of range")?;
        let job = SandboxJob::with_ttl(SandboxTemplate::Evaluation, ttl_chrono);
        let job_id = job.job_id.clone();
        self.registry.insert(job).await;
        let _ = self.registry.transition(&job_id, JobStatus::Booting).await;

        tracing::info!(
            job_id,
            experiment_name,
            conversations = conversations.len(),
            "booting evaluation unit"
        );
        let handle = match self
            .provisioner
            .create(SandboxTemplate::Evaluation, ttl)
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                let _ = self
                    .registry
                    .fail(&job_id, &format!("evaluation provisioning failed: {err:#}"))
                    .await;
                return Err(err.context("provisioning evaluation unit"));
            }
        };
        let _ = self.registry.transition(&job_id, JobStatus::Running).await;

        let verdict = self
            .judge_in_unit(&handle, conversations, reference_data, experiment_name)
            .await;

        // Artifacts must come out while the unit is still alive.
        let export = if verdict.is_ok() {
            self.export_artifacts(&handle, &job_id).await
        } else {
            None
        };

        if let Err(err) = self.provisioner.destroy(handle).await {
            tracing::warn!(job_id, error = %format!("{err:#}"), "failed to destroy evaluation unit");
        }

        match verdict {
            Ok(reports) => {
                let _ = self.registry.transition(&job_id, JobStatus::Completed).await;
                let passed = reports.iter().filter(|r| r.passed).count();
                let avg_score = if reports.is_empty() {
                    0.0
                } else {
                    #[allow(clippy::cast_precision_loss)]
                    let mean = reports.iter().map(|r| r.score).sum::<f64>() / reports.len() as f64;
                    mean
                };
                tracing::info!(job_id, total = reports.len(), passed, "evaluation complete");
                Ok(EvaluationOutcome {
                    experiment_name: experiment_name.to_string(),
                    job_id,
                    total: reports.len(),
                    passed,
                    avg_score,
                    reports,
                    export,
                })
            }
            Err(err) => {
                let _ = self.registry.fail(&job_id, &format!("{err:#}")).await;
                Err(err)
            }
        }
    }

    /// Write the payload, run the judge, and parse its verdict.
    async fn judge_in_unit(
        &self,
        handle: &UnitHandle,
        conversations: &[Conversation],
        reference_data: &serde_json::Value,
        experiment_name: &str,
    ) -> Result<Vec<QualityReport>> {
        let payload = EvaluationPayload {
            experiment_name,
            conversations,
            reference_data,
        };
        let bytes = serde_json::to_vec(&payload).context("serializing evaluation payload")?;
        self.provisioner
            .write_file(handle, PAYLOAD_PATH, &bytes)
            .await
            .context("writing evaluation payload")?;

        let output = self
            .provisioner
            .run_command(handle, &self.settings.judge_command, self.settings.judge_timeout)
            .await
            .context("running judge command")?;
        if !output.success() {
            return Err(OrchestratorError::UnitCommandFailed {
                exit_code: output.exit_code,
                stderr_tail: output.stderr_tail(20),
            }
            .into());
        }

        // The judge may log freely; only its final non-empty stdout line
        // is the verdict.
        let last_line = output
            .stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default();
        let verdict: JudgeVerdict = serde_json::from_str(last_line).map_err(|err| {
            OrchestratorError::UnitCommandFailed {
                exit_code: output.exit_code,
                stderr_tail: format!("judge verdict was not valid JSON ({err}): {last_line}"),
            }
        })?;
        Ok(verdict.reports)
    }

    async fn export_artifacts(
        &self,
        handle: &UnitHandle,
        job_id: &str,
    ) -> Option<SandboxExportResult> {
        let exporter = self.exporter.as_ref()?;
        let _ = self.registry.transition(job_id, JobStatus::Exporting).await;
        let specs = vec![
            ExportSpec {
                artifact_type: ArtifactType::QualityReports,
                format: ArtifactFormat::Json,
                remote_path: REPORTS_PATH.to_string(),
            },
            ExportSpec {
                artifact_type: ArtifactType::Log,
                format: ArtifactFormat::Text,
                remote_path: JUDGE_LOG_PATH.to_string(),
            },
        ];
        let result = exporter
            .export_all(self.provisioner.as_ref(), handle, job_id, &specs)
            .await;
        if !result.is_complete() {
            tracing::warn!(job_id, error = ?result.error, "evaluation export incomplete");
        }
        Some(result)
    }
}
