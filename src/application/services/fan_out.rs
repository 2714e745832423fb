//! Fan-out orchestrator — the concurrency core.
//!
//! Dispatches N independent seeds onto a semaphore-bounded pool of workers,
//! each of which provisions its own execution unit, delegates generation
//! and evaluation to the external collaborators, exports artifacts, and
//! destroys the unit on every exit path. Workers are fully independent: a
//! failure in one is captured as data and never affects siblings.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::Stream;
use tokio::sync::{Semaphore, mpsc};

use crate::application::ports::{
    BatchExecutor, EvaluationService, GenerationService, ProvisioningClient, UnitHandle,
};
use crate::application::services::export::{Exporter, generation_artifacts};
use crate::application::services::registry::JobRegistry;
use crate::domain::batch::{
    self, BatchRequest, BatchResult, Conversation, ProvisioningMode, QualityReport,
    SandboxSeedResult, Seed,
};
use crate::domain::error::OrchestratorError;
use crate::domain::job::{JobStatus, SandboxJob, SandboxTemplate};
use crate::domain::progress::{BatchEvent, SandboxProgress, SeedPhase};

/// Capacity of the shared progress channel. Workers block on a full
/// channel rather than dropping events, which preserves per-seed ordering.
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Runs batches of seeds across ephemeral sandboxes.
#[derive(Clone)]
pub struct FanOutOrchestrator {
    provisioner: Arc<dyn ProvisioningClient>,
    generator: Arc<dyn GenerationService>,
    evaluator: Option<Arc<dyn EvaluationService>>,
    registry: JobRegistry,
    exporter: Option<Exporter>,
}

impl FanOutOrchestrator {
    #[must_use]
    pub fn new(
        provisioner: Arc<dyn ProvisioningClient>,
        generator: Arc<dyn GenerationService>,
        evaluator: Option<Arc<dyn EvaluationService>>,
        registry: JobRegistry,
        exporter: Option<Exporter>,
    ) -> Self {
        Self {
            provisioner,
            generator,
            evaluator,
            registry,
            exporter,
        }
    }

    /// Run a batch to completion and return the aggregated result.
    ///
    /// The batch as a whole succeeds independent of individual seed
    /// failures; `summary.failed_seeds` reports the count.
    ///
    /// # Errors
    ///
    /// Returns an error only for invalid request configuration, before any
    /// provisioning begins. Per-seed errors are data in the results.
    pub async fn run_batch(&self, request: BatchRequest) -> Result<BatchResult> {
        request.validate()?;
        let started = Instant::now();
        tracing::info!(
            seeds = request.seeds.len(),
            max_parallel = request.max_parallel,
            "starting sandbox batch"
        );
        let results = self.dispatch(&request, None).await;
        let result = finish(&request, results, started.elapsed());
        tracing::info!(
            failed_seeds = result.summary.failed_seeds,
            total_generated = result.summary.total_generated,
            "sandbox batch complete"
        );
        Ok(result)
    }

    /// Streaming variant: the returned stream yields `Progress` events as
    /// workers advance and terminates with exactly one `Done` carrying the
    /// final result. Single-pass, non-restartable.
    ///
    /// Dropping the stream does not cancel in-flight workers; cleanup of
    /// provisioned units is unconditional either way.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid request configuration, before any
    /// provisioning begins.
    pub fn run_batch_stream(
        &self,
        request: BatchRequest,
    ) -> Result<impl Stream<Item = BatchEvent> + Send + 'static, OrchestratorError> {
        request.validate()?;
        let this = self.clone();
        let (tx, mut rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let driver = tokio::spawn(async move {
            let started = Instant::now();
            let results = this.dispatch(&request, Some(tx.clone())).await;
            let result = finish(&request, results, started.elapsed());
            let _ = tx.send(BatchEvent::Done(result)).await;
        });

        Ok(async_stream::stream! {
            // Keep the driver handle alive for the stream's lifetime; the
            // task itself runs to completion even if the consumer stops
            // polling, so unit cleanup never depends on the receiver.
            let _driver = driver;
            while let Some(event) = rx.recv().await {
                let done = matches!(event, BatchEvent::Done(_));
                yield event;
                if done {
                    break;
                }
            }
        })
    }

    /// Spawn one worker per seed and collect results in input order.
    async fn dispatch(
        &self,
        request: &BatchRequest,
        progress: Option<mpsc::Sender<BatchEvent>>,
    ) -> Vec<SandboxSeedResult> {
        let semaphore = Arc::new(Semaphore::new(request.max_parallel));
        let ctx = Arc::new(WorkerContext {
            provisioner: Arc::clone(&self.provisioner),
            generator: Arc::clone(&self.generator),
            evaluator: self.evaluator.clone(),
            registry: self.registry.clone(),
            exporter: self.exporter.clone(),
            conversations_per_seed: request.conversations_per_seed,
            model: request.model.clone(),
            temperature: request.temperature,
            evaluate_after: request.evaluate_after,
            timeout_per_unit: request.timeout_per_unit,
            deadline: request.deadline,
            total_sandboxes: request.seeds.len(),
            batch_started: Instant::now(),
            progress,
        });

        let mut handles = Vec::with_capacity(request.seeds.len());
        for (index, seed) in request.seeds.iter().cloned().enumerate() {
            let ctx = Arc::clone(&ctx);
            let semaphore = Arc::clone(&semaphore);
            let seed_id = seed.seed_id.clone();
            let handle = tokio::spawn(async move { process_seed(&ctx, seed, index, semaphore).await });
            handles.push((seed_id, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (seed_id, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_err) => {
                    // A panicking worker is isolated to its own seed.
                    tracing::warn!(seed_id, error = %join_err, "worker task aborted");
                    results.push(SandboxSeedResult::failed(
                        &seed_id,
                        &format!("worker aborted: {join_err}"),
                        ctx.batch_started.elapsed(),
                    ));
                }
            }
        }
        results
    }
}

#[async_trait]
impl BatchExecutor for FanOutOrchestrator {
    async fn run_batch(&self, request: BatchRequest) -> Result<BatchResult> {
        Self::run_batch(self, request).await
    }
}

fn finish(request: &BatchRequest, results: Vec<SandboxSeedResult>, elapsed: Duration) -> BatchResult {
    let summary = batch::summarize(
        request,
        &results,
        elapsed,
        ProvisioningMode::Remote,
        request.max_parallel,
    );
    BatchResult {
        success: true,
        summary,
        results,
    }
}

/// Everything a worker needs, shared across the batch.
struct WorkerContext {
    provisioner: Arc<dyn ProvisioningClient>,
    generator: Arc<dyn GenerationService>,
    evaluator: Option<Arc<dyn EvaluationService>>,
    registry: JobRegistry,
    exporter: Option<Exporter>,
    conversations_per_seed: usize,
    model: String,
    temperature: f64,
    evaluate_after: bool,
    timeout_per_unit: Duration,
    deadline: Option<Duration>,
    total_sandboxes: usize,
    batch_started: Instant,
    progress: Option<mpsc::Sender<BatchEvent>>,
}

impl WorkerContext {
    fn deadline_elapsed(&self) -> bool {
        self.deadline
            .is_some_and(|d| self.batch_started.elapsed() >= d)
    }

    async fn emit(
        &self,
        seed_id: &str,
        index: usize,
        phase: SeedPhase,
        completed: usize,
        error: Option<String>,
    ) {
        let Some(tx) = &self.progress else {
            return;
        };
        let event = SandboxProgress {
            seed_id: seed_id.to_string(),
            sandbox_index: index,
            total_sandboxes: self.total_sandboxes,
            phase,
            conversations_completed: completed,
            conversations_total: self.conversations_per_seed,
            elapsed_seconds: self.batch_started.elapsed().as_secs_f64(),
            error,
        };
        let _ = tx.send(BatchEvent::Progress(event)).await;
    }
}

/// Run one seed end to end inside its own unit.
///
/// The unit is destroyed on every exit path once provisioned: success,
/// generation error, evaluation error, export error, and per-unit timeout.
async fn process_seed(
    ctx: &WorkerContext,
    seed: Seed,
    index: usize,
    semaphore: Arc<Semaphore>,
) -> SandboxSeedResult {
    let started = Instant::now();
    let seed_id = seed.seed_id.clone();
    ctx.emit(&seed_id, index, SeedPhase::Queued, 0, None).await;

    // Concurrency slot. The semaphore is never closed while workers run.
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return SandboxSeedResult::failed(&seed_id, "scheduler shut down", started.elapsed());
    };

    if ctx.deadline_elapsed() {
        let diagnostic = "batch deadline exceeded before provisioning".to_string();
        ctx.emit(&seed_id, index, SeedPhase::Error, 0, Some(diagnostic.clone()))
            .await;
        return SandboxSeedResult::failed(&seed_id, &diagnostic, started.elapsed());
    }

    let job = SandboxJob::new(SandboxTemplate::Generation);
    let job_id = job.job_id.clone();
    ctx.registry.insert(job).await;
    let _ = ctx.registry.transition(&job_id, JobStatus::Booting).await;
    ctx.emit(&seed_id, index, SeedPhase::Booting, 0, None).await;

    // One unit gets one timeout budget, shared between create and the
    // work that follows.
    let unit_budget_started = tokio::time::Instant::now();
    let created = tokio::time::timeout(
        ctx.timeout_per_unit,
        ctx.provisioner
            .create(SandboxTemplate::Generation, ctx.timeout_per_unit),
    )
    .await;
    let handle = match created {
        Ok(Ok(handle)) => handle,
        Ok(Err(err)) => {
            let diagnostic = format!("provisioning failed: {err:#}");
            let _ = ctx.registry.fail(&job_id, &diagnostic).await;
            ctx.emit(&seed_id, index, SeedPhase::Error, 0, Some(diagnostic.clone()))
                .await;
            return SandboxSeedResult::failed(&seed_id, &diagnostic, started.elapsed());
        }
        Err(_) => {
            let diagnostic = OrchestratorError::ProvisioningTimeout {
                seed_id: seed_id.clone(),
                timeout_secs: ctx.timeout_per_unit.as_secs(),
            }
            .to_string();
            let _ = ctx.registry.fail(&job_id, &diagnostic).await;
            ctx.emit(&seed_id, index, SeedPhase::Error, 0, Some(diagnostic.clone()))
                .await;
            return SandboxSeedResult::failed(&seed_id, &diagnostic, started.elapsed());
        }
    };
    let _ = ctx.registry.transition(&job_id, JobStatus::Running).await;
    ctx.emit(&seed_id, index, SeedPhase::Generating, 0, None).await;

    let remaining = ctx
        .timeout_per_unit
        .saturating_sub(unit_budget_started.elapsed());
    let completed_so_far = AtomicUsize::new(0);
    let outcome = tokio::time::timeout(
        remaining,
        run_in_unit(ctx, &seed, index, &job_id, &handle, &completed_so_far),
    )
    .await;

    // Unconditional cleanup before the result is built.
    if let Err(err) = ctx.provisioner.destroy(handle).await {
        tracing::warn!(job_id, error = %format!("{err:#}"), "failed to destroy unit");
    }

    match outcome {
        Ok(Ok((conversations, reports))) => {
            let _ = ctx.registry.transition(&job_id, JobStatus::Completed).await;
            let completed = conversations.len();
            let result = SandboxSeedResult::succeeded(&seed_id, conversations, reports, started.elapsed());
            ctx.emit(&seed_id, index, SeedPhase::Complete, completed, None)
                .await;
            result
        }
        Ok(Err(err)) => {
            // Counts already reported for this seed must not regress on
            // the terminal event.
            let completed = completed_so_far.load(Ordering::Relaxed);
            let diagnostic = format!("{err:#}");
            let _ = ctx.registry.fail(&job_id, &diagnostic).await;
            ctx.emit(&seed_id, index, SeedPhase::Error, completed, Some(diagnostic.clone()))
                .await;
            SandboxSeedResult::failed(&seed_id, &diagnostic, started.elapsed())
        }
        Err(_) => {
            let completed = completed_so_far.load(Ordering::Relaxed);
            let diagnostic = OrchestratorError::ProvisioningTimeout {
                seed_id: seed_id.clone(),
                timeout_secs: ctx.timeout_per_unit.as_secs(),
            }
            .to_string();
            let _ = ctx.registry.fail(&job_id, &diagnostic).await;
            ctx.emit(&seed_id, index, SeedPhase::Error, completed, Some(diagnostic.clone()))
                .await;
            SandboxSeedResult::failed(&seed_id, &diagnostic, started.elapsed())
        }
    }
}

/// Generation, optional evaluation, and export — everything that runs
/// while the unit is alive. Export always precedes the caller's destroy.
async fn run_in_unit(
    ctx: &WorkerContext,
    seed: &Seed,
    index: usize,
    job_id: &str,
    handle: &UnitHandle,
    completed_so_far: &AtomicUsize,
) -> Result<(Vec<Conversation>, Option<Vec<QualityReport>>)> {
    let (conversations, mut reports) = ctx
        .generator
        .generate(seed, ctx.conversations_per_seed, &ctx.model, ctx.temperature)
        .await
        .context("generation collaborator failed")?;
    completed_so_far.store(conversations.len(), Ordering::Relaxed);
    if ctx.deadline_elapsed() {
        anyhow::bail!("batch deadline exceeded after generation");
    }

    if ctx.evaluate_after
        && let Some(evaluator) = &ctx.evaluator
    {
        ctx.emit(
            &seed.seed_id,
            index,
            SeedPhase::Evaluating,
            conversations.len(),
            None,
        )
        .await;
        let mut evaluated = Vec::with_capacity(conversations.len());
        for conversation in &conversations {
            if ctx.deadline_elapsed() {
                anyhow::bail!("batch deadline exceeded during evaluation");
            }
            let prior = reports
                .as_deref()
                .and_then(|r| r.iter().find(|q| q.conversation_id == conversation.id));
            let report = evaluator
                .evaluate(conversation, prior)
                .await
                .context("evaluation collaborator failed")?;
            evaluated.push(report);
        }
        reports = Some(evaluated);
    }

    if ctx.deadline_elapsed() {
        anyhow::bail!("batch deadline exceeded before export");
    }
    if let Some(exporter) = &ctx.exporter {
        let _ = ctx.registry.transition(job_id, JobStatus::Exporting).await;
        let export = exporter
            .export_all(ctx.provisioner.as_ref(), handle, job_id, &generation_artifacts())
            .await;
        if !export.is_complete() {
            // Partial export is non-fatal for the seed.
            tracing::warn!(job_id, error = ?export.error, "export partially failed");
        }
    }

    Ok((conversations, reports))
}
