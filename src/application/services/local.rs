//! Local fallback executor — sequential, same-process batch execution.
//!
//! Used whenever the provisioning backend reports itself unavailable. The
//! substitution is transparent to callers: the returned `BatchResult` is
//! structurally identical to the fan-out orchestrator's, differing only in
//! `provisioning_mode` (and `max_parallel = 1` in the summary).

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;

use crate::application::ports::{BatchExecutor, EvaluationService, GenerationService};
use crate::domain::batch::{
    self, BatchRequest, BatchResult, ProvisioningMode, SandboxSeedResult, Seed,
};

/// Sequential in-process substitute for the fan-out orchestrator.
#[derive(Clone)]
pub struct LocalFallbackExecutor {
    generator: Arc<dyn GenerationService>,
    evaluator: Option<Arc<dyn EvaluationService>>,
}

impl LocalFallbackExecutor {
    #[must_use]
    pub fn new(
        generator: Arc<dyn GenerationService>,
        evaluator: Option<Arc<dyn EvaluationService>>,
    ) -> Self {
        Self {
            generator,
            evaluator,
        }
    }

    /// Run the batch sequentially in-process.
    ///
    /// # Errors
    ///
    /// Returns an error only for invalid request configuration; per-seed
    /// errors are captured as data, exactly like the remote path.
    pub async fn run_batch_local(&self, request: BatchRequest) -> Result<BatchResult> {
        request.validate()?;
        let started = Instant::now();
        tracing::info!(
            seeds = request.seeds.len(),
            "provisioning unavailable, running batch locally"
        );

        let mut results = Vec::with_capacity(request.seeds.len());
        for seed in &request.seeds {
            results.push(self.process_seed(&request, seed).await);
        }

        let summary = batch::summarize(
            &request,
            &results,
            started.elapsed(),
            ProvisioningMode::LocalFallback,
            1,
        );
        Ok(BatchResult {
            success: true,
            summary,
            results,
        })
    }

    async fn process_seed(&self, request: &BatchRequest, seed: &Seed) -> SandboxSeedResult {
        let started = Instant::now();
        let generated = self
            .generator
            .generate(
                seed,
                request.conversations_per_seed,
                &request.model,
                request.temperature,
            )
            .await;
        let (conversations, mut reports) = match generated {
            Ok(out) => out,
            Err(err) => {
                return SandboxSeedResult::failed(
                    &seed.seed_id,
                    &format!("generation collaborator failed: {err:#}"),
                    started.elapsed(),
                );
            }
        };

        if request.evaluate_after
            && let Some(evaluator) = &self.evaluator
        {
            let mut evaluated = Vec::with_capacity(conversations.len());
            for conversation in &conversations {
                let prior = reports
                    .as_deref()
                    .and_then(|r| r.iter().find(|q| q.conversation_id == conversation.id));
                match evaluator.evaluate(conversation, prior).await {
                    Ok(report) => evaluated.push(report),
                    Err(err) => {
                        return SandboxSeedResult::failed(
                            &seed.seed_id,
                            &format!("evaluation collaborator failed: {err:#}"),
                            started.elapsed(),
                        );
                    }
                }
            }
            reports = Some(evaluated);
        }

        SandboxSeedResult::succeeded(&seed.seed_id, conversations, reports, started.elapsed())
    }
}

#[async_trait]
impl BatchExecutor for LocalFallbackExecutor {
    async fn run_batch(&self, request: BatchRequest) -> Result<BatchResult> {
        self.run_batch_local(request).await
    }
}
