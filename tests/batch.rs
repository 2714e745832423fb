//! End-to-end batch orchestration tests against the public API.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;

use seedbox::application::ports::{
    BatchExecutor, CommandOutput, GenerationService, ProvisioningClient, UnitHandle,
};
use seedbox::application::services::{
    Exporter, FanOutOrchestrator, JobRegistry, LocalFallbackExecutor, ProvisioningAvailability,
    select_executor,
};
use seedbox::domain::{
    BatchEvent, BatchRequest, Conversation, JobStatus, ProvisioningMode, QualityReport,
    SandboxTemplate, Seed,
};
use seedbox::infra::OrchestratorConfig;

/// In-memory backend recording a global, ordered event log.
#[derive(Default)]
struct RecordingBackend {
    next_id: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    files: Mutex<HashMap<(String, String), Vec<u8>>>,
    log: Mutex<Vec<String>>,
}

impl RecordingBackend {
    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl ProvisioningClient for RecordingBackend {
    async fn create(&self, template: SandboxTemplate, _timeout: Duration) -> Result<UnitHandle> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        let handle = UnitHandle {
            unit_id: format!("unit-{n}"),
            template,
        };
        self.record(format!("create {}", handle.unit_id));
        Ok(handle)
    }

    async fn write_file(&self, handle: &UnitHandle, path: &str, bytes: &[u8]) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert((handle.unit_id.clone(), path.to_string()), bytes.to_vec());
        Ok(())
    }

    async fn read_file(&self, handle: &UnitHandle, path: &str) -> Result<Option<Vec<u8>>> {
        self.record(format!("read {} {path}", handle.unit_id));
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(&(handle.unit_id.clone(), path.to_string()))
            .cloned())
    }

    async fn run_command(
        &self,
        _handle: &UnitHandle,
        _command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput> {
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    async fn public_url(&self, handle: &UnitHandle, port: u16) -> Result<String> {
        Ok(format!("https://{}.example.test:{port}", handle.unit_id))
    }

    async fn destroy(&self, handle: UnitHandle) -> Result<()> {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.record(format!("destroy {}", handle.unit_id));
        Ok(())
    }
}

/// Generator that also writes its output into the unit so exports have
/// something to pull.
struct WritingGenerator {
    backend: Arc<RecordingBackend>,
    fail_seeds: Vec<String>,
    latency: Option<Duration>,
}

#[async_trait]
impl GenerationService for WritingGenerator {
    async fn generate(
        &self,
        seed: &Seed,
        count: usize,
        _model: &str,
        _temperature: f64,
    ) -> Result<(Vec<Conversation>, Option<Vec<QualityReport>>)> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_seeds.contains(&seed.seed_id) {
            anyhow::bail!("model refused seed {}", seed.seed_id);
        }
        let conversations: Vec<Conversation> = (0..count)
            .map(|i| Conversation {
                id: format!("{}-c{i}", seed.seed_id),
                turns: serde_json::json!([{"role": "user", "content": seed.topic}]),
            })
            .collect();
        // Real generation units leave their artifacts on disk; the fake
        // writes into every live unit since it cannot see its own handle.
        let jsonl: String = conversations
            .iter()
            .map(|c| format!("{}\n", serde_json::to_string(c).unwrap()))
            .collect();
        let units: Vec<String> = {
            let files = self.backend.log();
            files
                .iter()
                .filter_map(|e| e.strip_prefix("create "))
                .map(str::to_string)
                .collect()
        };
        for unit_id in units {
            let handle = UnitHandle {
                unit_id,
                template: SandboxTemplate::Generation,
            };
            self.backend
                .write_file(&handle, "/work/out/conversations.jsonl", jsonl.as_bytes())
                .await?;
            self.backend
                .write_file(&handle, "/work/out/quality_reports.json", b"[]")
                .await?;
            self.backend
                .write_file(&handle, "/work/out/run.log", b"generation ok\n")
                .await?;
        }
        Ok((conversations, None))
    }
}

fn seeds(n: usize) -> Vec<Seed> {
    (1..=n)
        .map(|i| Seed {
            seed_id: format!("seed-{i}"),
            topic: "billing dispute".to_string(),
            instructions: "stay on topic".to_string(),
            language: None,
        })
        .collect()
}

fn request(n: usize, max_parallel: usize) -> BatchRequest {
    BatchRequest {
        seeds: seeds(n),
        conversations_per_seed: 2,
        model: "test-model".to_string(),
        temperature: 0.7,
        max_parallel,
        timeout_per_unit: Duration::from_secs(60),
        evaluate_after: false,
        deadline: None,
    }
}

fn orchestrator(
    backend: Arc<RecordingBackend>,
    fail_seeds: Vec<String>,
    latency: Option<Duration>,
    registry: JobRegistry,
    exporter: Option<Exporter>,
) -> FanOutOrchestrator {
    let generator = Arc::new(WritingGenerator {
        backend: Arc::clone(&backend),
        fail_seeds,
        latency,
    });
    FanOutOrchestrator::new(backend, generator, None, registry, exporter)
}

#[tokio::test]
async fn remote_batch_runs_all_seeds_within_the_parallel_bound() {
    let backend = Arc::new(RecordingBackend::default());
    let registry = JobRegistry::new();
    let orch = orchestrator(
        Arc::clone(&backend),
        Vec::new(),
        Some(Duration::from_millis(20)),
        registry.clone(),
        None,
    );

    let result = orch.run_batch(request(5, 2)).await.expect("run_batch");

    assert!(result.success);
    assert_eq!(result.summary.total_seeds, 5);
    assert_eq!(result.summary.total_generated, 10);
    assert_eq!(result.summary.provisioning_mode, ProvisioningMode::Remote);
    assert!(backend.peak.load(Ordering::SeqCst) <= 2);

    // Every job in the registry reached a terminal state.
    let jobs = registry.list().await;
    assert_eq!(jobs.len(), 5);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
}

#[tokio::test]
async fn seed_failures_do_not_leak_units_or_affect_siblings() {
    let backend = Arc::new(RecordingBackend::default());
    let orch = orchestrator(
        Arc::clone(&backend),
        vec!["seed-2".to_string()],
        None,
        JobRegistry::new(),
        None,
    );

    let result = orch.run_batch(request(3, 3)).await.expect("run_batch");

    assert_eq!(result.summary.failed_seeds, 1);
    assert_eq!(result.summary.total_generated, 4);

    let log = backend.log();
    let creates = log.iter().filter(|e| e.starts_with("create ")).count();
    let destroys = log.iter().filter(|e| e.starts_with("destroy ")).count();
    assert_eq!(creates, 3);
    assert_eq!(destroys, 3, "failed seed unit must still be destroyed");
}

#[tokio::test]
async fn artifacts_are_read_out_of_each_unit_before_its_destroy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(RecordingBackend::default());
    let orch = orchestrator(
        Arc::clone(&backend),
        Vec::new(),
        None,
        JobRegistry::new(),
        Some(Exporter::new(dir.path())),
    );

    let result = orch.run_batch(request(2, 1)).await.expect("run_batch");
    assert_eq!(result.summary.failed_seeds, 0);

    let log = backend.log();
    for unit in ["unit-1", "unit-2"] {
        let first_read = log.iter().position(|e| e.starts_with(&format!("read {unit}")));
        let destroy = log.iter().position(|e| *e == format!("destroy {unit}"));
        let (Some(first_read), Some(destroy)) = (first_read, destroy) else {
            panic!("missing read/destroy for {unit}: {log:?}");
        };
        assert!(first_read < destroy, "export must precede destroy for {unit}");
    }

    // Exported files landed on local disk, one directory per job.
    let job_dirs: Vec<_> = std::fs::read_dir(dir.path()).expect("read_dir").collect();
    assert_eq!(job_dirs.len(), 2);
}

#[tokio::test]
async fn stream_terminates_with_done_after_progress() {
    let backend = Arc::new(RecordingBackend::default());
    let orch = orchestrator(backend, Vec::new(), None, JobRegistry::new(), None);

    let stream = orch.run_batch_stream(request(3, 2)).expect("stream");
    let events: Vec<BatchEvent> = stream.collect().await;

    assert!(matches!(events.last(), Some(BatchEvent::Done(_))));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, BatchEvent::Done(_)))
            .count(),
        1
    );
    let BatchEvent::Done(result) = events.last().unwrap() else {
        unreachable!();
    };
    assert_eq!(result.summary.total_seeds, 3);
}

#[tokio::test]
async fn unavailable_backend_selects_transparent_local_fallback() {
    let backend = Arc::new(RecordingBackend::default());
    let registry = JobRegistry::new();
    let remote = Arc::new(orchestrator(
        Arc::clone(&backend),
        Vec::new(),
        None,
        registry,
        None,
    ));
    let generator = Arc::new(WritingGenerator {
        backend: Arc::clone(&backend),
        fail_seeds: Vec::new(),
        latency: None,
    });
    let local = Arc::new(LocalFallbackExecutor::new(generator, None));

    let config = OrchestratorConfig::default(); // no API key
    let executor = select_executor(&config.availability(), remote, local);
    let result = executor.run_batch(request(3, 4)).await.expect("run_batch");

    // Same result shape as the remote path, different mode, no units.
    assert!(result.success);
    assert_eq!(result.summary.total_seeds, 3);
    assert_eq!(result.summary.total_generated, 6);
    assert_eq!(
        result.summary.provisioning_mode,
        ProvisioningMode::LocalFallback
    );
    assert_eq!(result.summary.max_parallel, 1);
    assert!(backend.log().is_empty(), "fallback must not touch the backend");
}

#[tokio::test]
async fn availability_flips_with_configuration() {
    let disabled = OrchestratorConfig {
        sandbox_enabled: false,
        provisioner_api_key: Some("key".to_string()),
        ..OrchestratorConfig::default()
    };
    assert!(matches!(
        disabled.availability(),
        ProvisioningAvailability::Unavailable { .. }
    ));

    let enabled = OrchestratorConfig {
        provisioner_api_key: Some("key".to_string()),
        ..OrchestratorConfig::default()
    };
    assert_eq!(enabled.availability(), ProvisioningAvailability::Available);
}
