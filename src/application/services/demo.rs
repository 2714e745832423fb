//! Ephemeral demo provisioner — boots one TTL-bounded unit with preloaded
//! fixture data and a minimal self-contained service, health-checks it with
//! bounded retries, and hands back a public access URL.
//!
//! On health-check exhaustion the unit is destroyed and a diagnostic error
//! returned — a `DemoAccess` pointing at an unhealthy unit is never
//! produced. Callers that want a soft failure substitute their own static
//! preview; that policy lives outside this crate.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::ports::{ProvisioningClient, UnitHandle};
use crate::application::services::registry::JobRegistry;
use crate::domain::error::OrchestratorError;
use crate::domain::job::{JobStatus, SandboxJob, SandboxTemplate};

const FIXTURE_PATH: &str = "/srv/demo/fixture.json";
const SERVICE_PATH: &str = "/srv/demo/server.py";
const SERVICE_LOG_PATH: &str = "/srv/demo/server.log";

/// Minimal self-contained demo service. Serves the preloaded fixture on
/// `/` and a liveness probe on `/health`.
const SERVICE_SCRIPT: &str = r#"import http.server, json

with open("/srv/demo/fixture.json") as f:
    FIXTURE = f.read()

class Handler(http.server.BaseHTTPRequestHandler):
    def do_GET(self):
        body = b"ok" if self.path == "/health" else FIXTURE.encode()
        self.send_response(200)
        self.send_header("Content-Type", "application/json")
        self.end_headers()
        self.wfile.write(body)

http.server.ThreadingHTTPServer(("0.0.0.0", 8000), Handler).serve_forever()
"#;

/// Tunables for demo provisioning. Defaults give a ~90s health ceiling.
#[derive(Debug, Clone)]
pub struct DemoSettings {
    pub health_attempts: u32,
    pub health_interval: Duration,
    pub service_port: u16,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            health_attempts: 30,
            health_interval: Duration::from_secs(3),
            service_port: 8000,
        }
    }
}

/// A healthy, reachable demo unit.
#[derive(Debug, Clone, Serialize)]
pub struct DemoAccess {
    pub job_id: String,
    pub domain: String,
    pub access_url: String,
    /// The backend tears the unit down at this instant regardless of
    /// caller behavior.
    pub expires_at: DateTime<Utc>,
}

/// Boots single-unit, TTL-bounded demo environments.
pub struct EphemeralDemoProvisioner {
    provisioner: Arc<dyn ProvisioningClient>,
    registry: JobRegistry,
    settings: DemoSettings,
}

impl EphemeralDemoProvisioner {
    #[must_use]
    pub fn new(
        provisioner: Arc<dyn ProvisioningClient>,
        registry: JobRegistry,
        settings: DemoSettings,
    ) -> Self {
        Self {
            provisioner,
            registry,
            settings,
        }
    }

    /// Provision a demo unit for `domain`, preload it, and wait for it to
    /// become healthy.
    ///
    /// # Errors
    ///
    /// Returns `HealthCheckExhausted` (with the captured service log) when
    /// the unit never becomes healthy, or a provisioning error when setup
    /// fails. The unit is destroyed on every failure path.
    pub async fn create_demo(
        &self,
        domain: &str,
        ttl: Duration,
        preload_count: usize,
        language: Option<&str>,
    ) -> Result<DemoAccess> {
        let ttl_chrono = chrono::Duration::from_std(ttl).context("demo ttl out of range")?;
        let job = SandboxJob::with_ttl(SandboxTemplate::Demo, ttl_chrono);
        let job_id = job.job_id.clone();
        let created_at = job.created_at;
        self.registry.insert(job).await;
        let _ = self.registry.transition(&job_id, JobStatus::Booting).await;

        tracing::info!(job_id, domain, ttl_secs = ttl.as_secs(), "booting demo unit");
        let handle = match self.provisioner.create(SandboxTemplate::Demo, ttl).await {
            Ok(handle) => handle,
            Err(err) => {
                let diagnostic = format!("demo provisioning failed: {err:#}");
                let _ = self.registry.fail(&job_id, &diagnostic).await;
                return Err(err.context("provisioning demo unit"));
            }
        };

        match self.boot_and_check(&handle, domain, preload_count, language).await {
            Ok(access_url) => {
                let _ = self.registry.transition(&job_id, JobStatus::Running).await;
                self.registry
                    .set_urls(&job_id, Some(access_url.clone()), None)
                    .await;
                tracing::info!(job_id, %access_url, "demo unit healthy");
                Ok(DemoAccess {
                    job_id,
                    domain: domain.to_string(),
                    access_url,
                    expires_at: created_at + ttl_chrono,
                })
            }
            Err(err) => {
                // Never hand out access to an unhealthy unit.
                if let Err(destroy_err) = self.provisioner.destroy(handle).await {
                    tracing::warn!(job_id, error = %format!("{destroy_err:#}"), "failed to destroy demo unit");
                }
                let _ = self.registry.fail(&job_id, &format!("{err:#}")).await;
                Err(err)
            }
        }
    }

    /// Preload fixtures, start the service, and poll its health endpoint.
    /// Returns the public access URL once healthy.
    async fn boot_and_check(
        &self,
        handle: &UnitHandle,
        domain: &str,
        preload_count: usize,
        language: Option<&str>,
    ) -> Result<String> {
        let fixture = build_fixture(domain, preload_count, language);
        let fixture_bytes = serde_json::to_vec(&fixture).context("serializing demo fixture")?;
        self.provisioner
            .write_file(handle, FIXTURE_PATH, &fixture_bytes)
            .await
            .context("writing demo fixture")?;
        self.provisioner
            .write_file(handle, SERVICE_PATH, SERVICE_SCRIPT.as_bytes())
            .await
            .context("writing demo service script")?;

        // Background start: the service may take longer to come up than a
        // single RPC allows, so readiness is confirmed by polling instead.
        let start = format!(
            "nohup python3 {SERVICE_PATH} >{SERVICE_LOG_PATH} 2>&1 &"
        );
        self.provisioner
            .run_command(handle, &start, Duration::from_secs(10))
            .await
            .context("starting demo service")?;

        let probe = format!(
            "curl -fsS http://127.0.0.1:{}/health",
            self.settings.service_port
        );
        for attempt in 1..=self.settings.health_attempts {
            let output = self
                .provisioner
                .run_command(handle, &probe, Duration::from_secs(5))
                .await;
            match output {
                Ok(out) if out.success() => {
                    tracing::debug!(attempt, "demo health check passed");
                    return self
                        .provisioner
                        .public_url(handle, self.settings.service_port)
                        .await
                        .context("resolving demo public url");
                }
                Ok(_) | Err(_) => {
                    // No point sleeping once the budget is spent.
                    if attempt < self.settings.health_attempts {
                        tokio::time::sleep(self.settings.health_interval).await;
                    }
                }
            }
        }

        let log = self.capture_service_log(handle).await;
        Err(OrchestratorError::HealthCheckExhausted {
            attempts: self.settings.health_attempts,
            log,
        }
        .into())
    }

    async fn capture_service_log(&self, handle: &UnitHandle) -> String {
        match self.provisioner.read_file(handle, SERVICE_LOG_PATH).await {
            Ok(Some(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(None) => "(no service log)".to_string(),
            Err(err) => format!("(service log unreadable: {err:#})"),
        }
    }
}

/// Deterministic preloaded demo dataset for a domain.
#[must_use]
fn build_fixture(domain: &str, preload_count: usize, language: Option<&str>) -> serde_json::Value {
    let conversations: Vec<serde_json::Value> = (0..preload_count)
        .map(|i| {
            serde_json::json!({
                "id": format!("{domain}-demo-{i}"),
                "domain": domain,
                "language": language.unwrap_or("en"),
                "turns": [
                    {"role": "user", "content": format!("Sample {domain} question {i}")},
                    {"role": "assistant", "content": format!("Sample {domain} answer {i}")}
                ]
            })
        })
        .collect();
    serde_json::json!({
        "domain": domain,
        "count": conversations.len(),
        "conversations": conversations,
    })
}
