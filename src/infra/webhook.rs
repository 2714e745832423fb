//! Lifecycle webhook ingestion: HMAC signature verification and a bounded
//! in-memory ring of recently received notifications.
//!
//! This crate stops at the library boundary — callers wire these functions
//! into whatever HTTP surface they run. Signatures are HMAC-SHA256 over the
//! raw request body, carried as either raw hex or `sha256=<hex>`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::domain::error::OrchestratorError;

type HmacSha256 = Hmac<Sha256>;

/// Lifecycle moment a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Started,
    Completed,
    Error,
}

/// One job lifecycle notification delivered by the provisioning backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleNotification {
    pub job_id: String,
    pub kind: NotificationKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Verify an HMAC-SHA256 signature over `body`.
///
/// Accepts the signature in either raw hex or `sha256=<hex>` format.
///
/// # Errors
///
/// Returns `Authentication` when the signature is malformed or does not
/// match. `hmac` performs the comparison in constant time.
pub fn verify_signature(
    secret: &str,
    signature: &str,
    body: &[u8],
) -> Result<(), OrchestratorError> {
    let sig = signature.trim();
    let sig_hex = sig.strip_prefix("sha256=").unwrap_or(sig);
    let provided = hex::decode(sig_hex)
        .map_err(|_| OrchestratorError::Authentication("signature is not valid hex".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| OrchestratorError::Authentication("unusable signing secret".to_string()))?;
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| OrchestratorError::Authentication("signature mismatch".to_string()))
}

/// Compute the signature header value for `body`. Format: `sha256=<hex>`.
///
/// # Errors
///
/// Returns `Authentication` when the secret cannot be used as an HMAC key.
pub fn sign_body(secret: &str, body: &[u8]) -> Result<String, OrchestratorError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| OrchestratorError::Authentication("unusable signing secret".to_string()))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Bounded ring of the most recent notifications. Cheap to clone; clones
/// share state. When full, the oldest notification is dropped.
#[derive(Clone)]
pub struct EventRing {
    inner: Arc<Mutex<VecDeque<LifecycleNotification>>>,
    capacity: usize,
}

impl EventRing {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Verify (when a secret is configured), parse, and record one raw
    /// notification body.
    ///
    /// # Errors
    ///
    /// Returns `Authentication` for a missing or bad signature and for an
    /// unparsable body. A configured secret makes the signature mandatory.
    pub fn ingest(
        &self,
        secret: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<LifecycleNotification, OrchestratorError> {
        if let Some(secret) = secret {
            let signature = signature.ok_or_else(|| {
                OrchestratorError::Authentication("missing signature".to_string())
            })?;
            verify_signature(secret, signature, body)?;
        }
        let notification: LifecycleNotification = serde_json::from_slice(body).map_err(|err| {
            OrchestratorError::Authentication(format!("invalid notification body: {err}"))
        })?;
        tracing::info!(
            job_id = notification.job_id,
            kind = ?notification.kind,
            "lifecycle notification received"
        );
        self.push(notification.clone());
        Ok(notification)
    }

    pub fn push(&self, notification: LifecycleNotification) {
        if let Ok(mut ring) = self.inner.lock() {
            if ring.len() == self.capacity {
                ring.pop_front();
            }
            ring.push_back(notification);
        }
    }

    /// Most recent notifications, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<LifecycleNotification> {
        self.inner
            .lock()
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }
}
