//! Shared fakes for service unit tests.
//!
//! The fake provisioner keeps everything in memory and records an ordered
//! event log so tests can assert lifecycle ordering (create, read, destroy)
//! and peak concurrency.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::application::ports::{
    CommandOutput, EvaluationService, GenerationService, ProvisioningClient, UnitHandle,
};
use crate::domain::batch::{Conversation, QualityReport, Seed};
use crate::domain::job::SandboxTemplate;

/// In-memory provisioner with an ordered event log.
#[derive(Default)]
pub(crate) struct FakeProvisioner {
    next_id: AtomicUsize,
    files: Mutex<HashMap<(String, String), Vec<u8>>>,
    events: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    /// When true, `create` fails.
    pub fail_create: bool,
    /// Artificial delay before `create` returns.
    create_delay: Option<Duration>,
    /// Scripted responses for `run_command`, consumed in order. When the
    /// queue is empty, commands succeed with empty output.
    command_script: Mutex<VecDeque<CommandOutput>>,
}

impl FakeProvisioner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A provisioner whose `create` always fails.
    pub(crate) fn failing_create() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    /// A provisioner whose `create` takes `delay` before returning.
    pub(crate) fn with_create_delay(delay: Duration) -> Self {
        Self {
            create_delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn seed_file(&self, handle: &UnitHandle, path: &str, bytes: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert((handle.unit_id.clone(), path.to_string()), bytes.to_vec());
    }

    pub(crate) fn push_command_output(&self, output: CommandOutput) {
        self.command_script.lock().unwrap().push_back(output);
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ProvisioningClient for FakeProvisioner {
    async fn create(&self, template: SandboxTemplate, _timeout: Duration) -> Result<UnitHandle> {
        if self.fail_create {
            anyhow::bail!("backend rejected create");
        }
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        let handle = UnitHandle {
            unit_id: format!("u{n}"),
            template,
        };
        self.record(format!("create:{}", handle.unit_id));
        Ok(handle)
    }

    async fn write_file(&self, handle: &UnitHandle, path: &str, bytes: &[u8]) -> Result<()> {
        self.record(format!("write:{}:{path}", handle.unit_id));
        self.files
            .lock()
            .unwrap()
            .insert((handle.unit_id.clone(), path.to_string()), bytes.to_vec());
        Ok(())
    }

    async fn read_file(&self, handle: &UnitHandle, path: &str) -> Result<Option<Vec<u8>>> {
        self.record(format!("read:{}:{path}", handle.unit_id));
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(&(handle.unit_id.clone(), path.to_string()))
            .cloned())
    }

    async fn run_command(
        &self,
        handle: &UnitHandle,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput> {
        let head = command.split_whitespace().next().unwrap_or("").to_string();
        self.record(format!("cmd:{}:{head}", handle.unit_id));
        Ok(self
            .command_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            }))
    }

    async fn public_url(&self, handle: &UnitHandle, port: u16) -> Result<String> {
        self.record(format!("url:{}", handle.unit_id));
        Ok(format!("https://{}.sandbox.test:{port}", handle.unit_id))
    }

    async fn destroy(&self, handle: UnitHandle) -> Result<()> {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.record(format!("destroy:{}", handle.unit_id));
        Ok(())
    }
}

/// Generator fake: `count` conversations per seed, optional per-seed
/// failures, optional artificial latency to force worker overlap.
#[derive(Default)]
pub(crate) struct FakeGenerator {
    pub fail_seeds: Vec<String>,
    pub latency: Option<Duration>,
    /// Seeds that hang until the caller's timeout fires.
    pub stall_seeds: Vec<String>,
    pub with_reports: bool,
}

#[async_trait]
impl GenerationService for FakeGenerator {
    async fn generate(
        &self,
        seed: &Seed,
        count: usize,
        _model: &str,
        _temperature: f64,
    ) -> Result<(Vec<Conversation>, Option<Vec<QualityReport>>)> {
        if self.stall_seeds.contains(&seed.seed_id) {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_seeds.contains(&seed.seed_id) {
            anyhow::bail!("generation failed for seed {}", seed.seed_id);
        }
        let conversations: Vec<Conversation> = (0..count)
            .map(|i| Conversation {
                id: format!("{}-c{i}", seed.seed_id),
                turns: serde_json::json!([{"role": "user", "content": seed.topic}]),
            })
            .collect();
        let reports = self.with_reports.then(|| {
            conversations
                .iter()
                .map(|c| QualityReport {
                    conversation_id: c.id.clone(),
                    score: 0.8,
                    passed: true,
                    notes: None,
                })
                .collect()
        });
        Ok((conversations, reports))
    }
}

/// Evaluator fake: fixed score, always passing, optionally failing.
#[derive(Default)]
pub(crate) struct FakeEvaluator {
    pub fail: bool,
}

#[async_trait]
impl EvaluationService for FakeEvaluator {
    async fn evaluate(
        &self,
        conversation: &Conversation,
        _prior: Option<&QualityReport>,
    ) -> Result<QualityReport> {
        if self.fail {
            anyhow::bail!("judge unavailable");
        }
        Ok(QualityReport {
            conversation_id: conversation.id.clone(),
            score: 0.9,
            passed: true,
            notes: None,
        })
    }
}
