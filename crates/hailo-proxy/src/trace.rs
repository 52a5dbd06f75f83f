//! Write-only request tracing.
//!
//! Each pipeline stage of a request can be dumped to
//! `<dir>/<trace-id>-<stage>.log`. Nothing here ever fails a request: every
//! I/O error is logged at debug level and dropped.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::config::TraceConfig;

/// Per-request identifier: `<unix-seconds>-<sequence>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(String);

impl TraceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Records pipeline stages to disk.
#[derive(Debug)]
pub struct TraceRecorder {
    config: TraceConfig,
    sequence: AtomicU64,
}

impl TraceRecorder {
    pub const fn new(config: TraceConfig) -> Self {
        Self {
            config,
            sequence: AtomicU64::new(0),
        }
    }

    pub const fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Allocate a fresh trace id.
    ///
    /// The sequence is the only cross-request mutable state in the proxy;
    /// the timestamp only makes ids readable across restarts.
    pub fn next_id(&self) -> TraceId {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let secs = chrono::Utc::now().timestamp();
        TraceId(format!("{secs}-{seq:06}"))
    }

    /// Write one stage artifact if tracing is enabled.
    pub async fn record(&self, id: &TraceId, stage: &str, payload: &[u8]) {
        if self.config.enabled {
            self.write(id, stage, payload).await;
        }
    }

    /// Write one stage artifact even when tracing is disabled.
    ///
    /// Used for upstream crashes, where the request bodies are the only
    /// way to reproduce the failure offline.
    pub async fn persist_failure(&self, id: &TraceId, stage: &str, payload: &[u8]) {
        self.write(id, stage, payload).await;
    }

    /// Path of the artifact for `(id, stage)`.
    pub fn artifact_path(&self, id: &TraceId, stage: &str) -> PathBuf {
        self.config.dir.join(format!("{id}-{stage}.log"))
    }

    async fn write(&self, id: &TraceId, stage: &str, payload: &[u8]) {
        let path = self.artifact_path(id, stage);
        let data = cap_payload(payload, self.config.max_bytes);
        if let Err(e) = write_artifact(&self.config.dir, &path, &data).await {
            debug!(trace_id = %id, stage, path = %path.display(), "Trace write failed: {e}");
        }
    }
}

async fn write_artifact(dir: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, data).await
}

/// Cut `payload` at `limit` bytes and append a marker noting the original size.
pub fn cap_payload(payload: &[u8], limit: usize) -> Vec<u8> {
    if payload.len() <= limit {
        return payload.to_vec();
    }
    let marker = format!(
        "\n...[truncated: {} bytes, limit {limit}]\n",
        payload.len()
    );
    let mut out = Vec::with_capacity(limit + marker.len());
    out.extend_from_slice(&payload[..limit]);
    out.extend_from_slice(marker.as_bytes());
    out
}
