//! One-way job history.
//!
//! Every stage run, manual edit and re-extraction emits an [`AuditEvent`].
//! Sinks never fail the operation that emitted the event: a write error is
//! logged and dropped.

use crate::error::MenuExtractError;
use crate::schema::Stage;
use crate::store::JobId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// What happened to a stage document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Extract,
    ManualEdit,
    Reextract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failure,
}

/// One line of a job's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub job_id: String,
    pub stage: Stage,
    pub action: AuditAction,
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn success(job: &JobId, stage: Stage, action: AuditAction) -> Self {
        Self {
            job_id: job.to_string(),
            stage,
            action,
            status: AuditStatus::Success,
            error_message: None,
            at: Utc::now(),
        }
    }

    pub fn failure(job: &JobId, stage: Stage, action: AuditAction, error: &dyn fmt::Display) -> Self {
        Self {
            job_id: job.to_string(),
            stage,
            action,
            status: AuditStatus::Failure,
            error_message: Some(error.to_string()),
            at: Utc::now(),
        }
    }

    /// `success` or `failure` depending on `result`.
    pub fn outcome<T>(
        job: &JobId,
        stage: Stage,
        action: AuditAction,
        result: &Result<T, MenuExtractError>,
    ) -> Self {
        match result {
            Ok(_) => Self::success(job, stage, action),
            Err(e) => Self::failure(job, stage, action, e),
        }
    }
}

/// Receives audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Discards every event.
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _event: AuditEvent) {}
}

/// Appends events as JSON lines to `outputs/{job}/history.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonlAuditLog {
    root: PathBuf,
}

impl JsonlAuditLog {
    pub const FILE_NAME: &'static str = "history.jsonl";

    /// `root` is the storage directory shared with the document store.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, job_id: &str) -> PathBuf {
        self.root.join("outputs").join(job_id).join(Self::FILE_NAME)
    }

    /// Every recorded event of `job`, oldest first. Unparseable lines are
    /// skipped with a warning.
    pub async fn history(&self, job: &JobId) -> Result<Vec<AuditEvent>, MenuExtractError> {
        let path = self.path(job.as_str());
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MenuExtractError::Storage { path, source: e }),
        };
        Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("Skipping malformed history line in {}: {}", path.display(), e);
                    None
                }
            })
            .collect())
    }

    async fn append(&self, event: &AuditEvent) -> std::io::Result<()> {
        let path = self.path(&event.job_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

#[async_trait]
impl AuditSink for JsonlAuditLog {
    async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.append(&event).await {
            warn!(
                "Failed to record {:?} event for job {}: {}",
                event.action, event.job_id, e
            );
        }
    }
}
