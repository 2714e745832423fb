//! In-memory job registry and TTL reaper.
//!
//! The registry is constructor-injected and owns every `SandboxJob` until
//! it reaches a terminal state — there is no hidden global. All state
//! transitions go through [`JobRegistry::transition`], which enforces the
//! one-directional lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::domain::error::OrchestratorError;
use crate::domain::job::{JobStatus, SandboxJob};

/// Shared registry of sandbox jobs. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, SandboxJob>>>,
}

impl JobRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: SandboxJob) {
        self.jobs.write().await.insert(job.job_id.clone(), job);
    }

    pub async fn get(&self, job_id: &str) -> Option<SandboxJob> {
        self.jobs.read().await.get(job_id).cloned()
    }

    pub async fn list(&self) -> Vec<SandboxJob> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Advance a job to `next`, enforcing the state machine.
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` for unknown ids and `IllegalTransition` when
    /// the lifecycle does not permit `current → next` (including any
    /// transition out of a terminal state).
    pub async fn transition(&self, job_id: &str, next: JobStatus) -> Result<(), OrchestratorError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;
        if !job.status.can_transition_to(next) {
            return Err(OrchestratorError::IllegalTransition {
                from: job.status.to_string(),
                to: next.to_string(),
            });
        }
        job.status = next;
        Ok(())
    }

    /// Mark a job `Failed` with a diagnostic.
    ///
    /// # Errors
    ///
    /// Same rules as [`JobRegistry::transition`].
    pub async fn fail(&self, job_id: &str, diagnostic: &str) -> Result<(), OrchestratorError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;
        if !job.status.can_transition_to(JobStatus::Failed) {
            return Err(OrchestratorError::IllegalTransition {
                from: job.status.to_string(),
                to: JobStatus::Failed.to_string(),
            });
        }
        job.status = JobStatus::Failed;
        job.error = Some(diagnostic.to_string());
        Ok(())
    }

    /// Record the URLs of a running unit.
    pub async fn set_urls(
        &self,
        job_id: &str,
        access_url: Option<String>,
        internal_api_url: Option<String>,
    ) {
        if let Some(job) = self.jobs.write().await.get_mut(job_id) {
            job.access_url = access_url;
            job.internal_api_url = internal_api_url;
        }
    }

    /// Mark every non-terminal job whose TTL has elapsed at `now` as
    /// `Expired`. Returns the ids that were expired.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut jobs = self.jobs.write().await;
        let mut expired = Vec::new();
        for job in jobs.values_mut() {
            if !job.status.is_terminal() && job.is_expired_at(now) {
                job.status = JobStatus::Expired;
                expired.push(job.job_id.clone());
            }
        }
        expired
    }

    /// Spawn the background reaper. The caller owns the returned handle;
    /// aborting it stops the reaper.
    #[must_use]
    pub fn spawn_reaper(&self, interval: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                for job_id in registry.expire_due(Utc::now()).await {
                    tracing::info!(%job_id, "job TTL elapsed, marked expired");
                }
            }
        })
    }
}
