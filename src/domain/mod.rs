//! Domain types and pure functions.
//!
//! Modules under `domain` are intentionally free of I/O, async, and imports
//! from `crate::application` or `crate::infra`. All functions take data in
//! and return data out.

pub mod batch;
pub mod error;
pub mod export;
pub mod job;
pub mod progress;

pub use batch::{
    BatchRequest, BatchResult, BatchSummary, Conversation, ProvisioningMode, QualityReport,
    SandboxSeedResult, Seed,
};
pub use error::OrchestratorError;
pub use export::{ArtifactFormat, ArtifactType, ExportArtifact, SandboxExportResult};
pub use job::{JobStatus, SandboxJob, SandboxTemplate};
pub use progress::{BatchEvent, SandboxProgress, SeedPhase};
