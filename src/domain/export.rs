//! Export artifact types and pure record-counting helpers.
//!
//! Export is best-effort: one missing artifact does not invalidate the
//! others. The export result aggregates whatever was persisted plus an
//! optional combined error string for the artifacts that were not.

use serde::{Deserialize, Serialize};

/// What an exported file contains.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Conversations,
    QualityReports,
    Log,
    Dataset,
}

impl ArtifactType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conversations => "conversations",
            Self::QualityReports => "quality_reports",
            Self::Log => "log",
            Self::Dataset => "dataset",
        }
    }
}

/// On-disk format of an exported file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Jsonl,
    Json,
    Text,
}

impl ArtifactFormat {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jsonl => "jsonl",
            Self::Json => "json",
            Self::Text => "log",
        }
    }
}

/// Deterministic local file name for an artifact: `<type>.<ext>`.
/// Callers place it under a job-scoped directory, so the name itself does
/// not need the job id.
#[must_use]
pub fn local_file_name(artifact_type: ArtifactType, format: ArtifactFormat) -> String {
    format!("{}.{}", artifact_type.as_str(), format.extension())
}

/// One successfully persisted artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportArtifact {
    pub artifact_type: ArtifactType,
    pub format: ArtifactFormat,
    pub size_bytes: u64,
    /// Local path the artifact was written to.
    pub path: String,
    /// Number of records for structured formats; `None` for plain text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<usize>,
}

/// Aggregate outcome of exporting all requested artifacts for one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxExportResult {
    pub artifacts: Vec<ExportArtifact>,
    /// Combined diagnostics for artifacts that could not be exported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SandboxExportResult {
    /// Whether every requested artifact was persisted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Append one per-artifact diagnostic to the combined error string.
    pub fn push_error(&mut self, diagnostic: &str) {
        match &mut self.error {
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(diagnostic);
            }
            None => self.error = Some(diagnostic.to_string()),
        }
    }
}

/// Count records in an artifact body.
///
/// JSONL counts non-empty lines; JSON counts top-level array elements (a
/// non-array document counts as one record); text has no record notion.
#[must_use]
pub fn count_records(format: ArtifactFormat, bytes: &[u8]) -> Option<usize> {
    match format {
        ArtifactFormat::Jsonl => {
            let text = String::from_utf8_lossy(bytes);
            Some(text.lines().filter(|l| !l.trim().is_empty()).count())
        }
        ArtifactFormat::Json => match serde_json::from_slice::<serde_json::Value>(bytes) {
            Ok(serde_json::Value::Array(items)) => Some(items.len()),
            Ok(_) => Some(1),
            Err(_) => None,
        },
        ArtifactFormat::Text => None,
    }
}
