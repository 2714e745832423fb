//! Artifact export — pulls named files out of a live unit and persists
//! them locally before the unit is destroyed.
//!
//! Export is best-effort: a missing or unreadable artifact appends a
//! diagnostic to the result and the remaining artifacts are still
//! attempted. Only the caller decides whether a partial export fails the
//! owning job. Callers must invoke this strictly before destroying the
//! unit; destroying first loses the data irrecoverably.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::application::ports::{ProvisioningClient, UnitHandle};
use crate::domain::export::{
    ArtifactFormat, ArtifactType, ExportArtifact, SandboxExportResult, count_records,
    local_file_name,
};

/// One artifact to pull out of a unit.
#[derive(Debug, Clone)]
pub struct ExportSpec {
    pub artifact_type: ArtifactType,
    pub format: ArtifactFormat,
    pub remote_path: String,
}

/// Persists unit artifacts under a job-scoped local directory.
#[derive(Debug, Clone)]
pub struct Exporter {
    export_root: PathBuf,
}

impl Exporter {
    #[must_use]
    pub fn new(export_root: impl Into<PathBuf>) -> Self {
        Self {
            export_root: export_root.into(),
        }
    }

    /// Directory artifacts for `job_id` are written to.
    #[must_use]
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.export_root.join(job_id)
    }

    /// Pull every artifact in `specs` out of the unit.
    ///
    /// Never errors for a single missing artifact; per-artifact failures
    /// are aggregated into the result's combined `error` string.
    pub async fn export_all(
        &self,
        client: &dyn ProvisioningClient,
        handle: &UnitHandle,
        job_id: &str,
        specs: &[ExportSpec],
    ) -> SandboxExportResult {
        let mut result = SandboxExportResult::default();
        let dir = self.job_dir(job_id);

        for spec in specs {
            match self.export_one(client, handle, &dir, spec).await {
                Ok(artifact) => {
                    tracing::debug!(
                        job_id,
                        artifact = spec.artifact_type.as_str(),
                        size_bytes = artifact.size_bytes,
                        "artifact exported"
                    );
                    result.artifacts.push(artifact);
                }
                Err(err) => {
                    let diagnostic =
                        format!("{}: {err:#}", spec.artifact_type.as_str());
                    tracing::warn!(job_id, %diagnostic, "artifact export failed");
                    result.push_error(&diagnostic);
                }
            }
        }
        result
    }

    async fn export_one(
        &self,
        client: &dyn ProvisioningClient,
        handle: &UnitHandle,
        dir: &Path,
        spec: &ExportSpec,
    ) -> Result<ExportArtifact> {
        let bytes = client
            .read_file(handle, &spec.remote_path)
            .await
            .with_context(|| format!("reading {}", spec.remote_path))?
            .with_context(|| format!("{} not found in unit", spec.remote_path))?;

        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        let path = dir.join(local_file_name(spec.artifact_type, spec.format));
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;

        Ok(ExportArtifact {
            artifact_type: spec.artifact_type,
            format: spec.format,
            size_bytes: bytes.len() as u64,
            path: path.to_string_lossy().into_owned(),
            record_count: count_records(spec.format, &bytes),
        })
    }
}

/// Default artifact set for a generation unit.
#[must_use]
pub fn generation_artifacts() -> Vec<ExportSpec> {
    vec![
        ExportSpec {
            artifact_type: ArtifactType::Conversations,
            format: ArtifactFormat::Jsonl,
            remote_path: "/work/out/conversations.jsonl".to_string(),
        },
        ExportSpec {
            artifact_type: ArtifactType::QualityReports,
            format: ArtifactFormat::Json,
            remote_path: "/work/out/quality_reports.json".to_string(),
        },
        ExportSpec {
            artifact_type: ArtifactType::Log,
            format: ArtifactFormat::Text,
            remote_path: "/work/out/run.log".to_string(),
        },
    ]
}
