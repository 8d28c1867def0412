//! Document persistence.
//!
//! ```text
//! {storage_dir}/
//! ├── uploads/{job}.pdf
//! └── outputs/{job}/
//!     ├── phase1_categories_raw.json
//!     ├── phase1_categories_reviewed.json
//!     ├── phase2_items.json
//!     ├── phase3_bases.json
//!     ├── phase4_final.json
//!     └── history.jsonl
//! ```
//!
//! Documents are stored as plain JSON values; typing and validation happen in
//! the caller on every load, because a file may have been edited by hand.

use crate::error::MenuExtractError;
use crate::schema::Stage;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

// ── Job identity ─────────────────────────────────────────────────────────

/// Identifier of one uploaded menu and all of its stage documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    /// A fresh random id (uuid v4, simple hex form).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = MenuExtractError;

    /// Job ids become path components, so only `[A-Za-z0-9_-]` is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(MenuExtractError::InvalidConfig(format!(
                "invalid job id '{}'",
                s
            )));
        }
        Ok(Self(s.to_string()))
    }
}

// ── Slots ────────────────────────────────────────────────────────────────

/// A persisted stage document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentSlot {
    /// Stage 1 output exactly as extracted.
    CategoriesRaw,
    /// Stage 1 output after review; Stage 2 prefers it over the raw one.
    CategoriesReviewed,
    Items,
    Bases,
    Addons,
}

impl DocumentSlot {
    pub fn file_name(self) -> &'static str {
        match self {
            DocumentSlot::CategoriesRaw => "phase1_categories_raw.json",
            DocumentSlot::CategoriesReviewed => "phase1_categories_reviewed.json",
            DocumentSlot::Items => "phase2_items.json",
            DocumentSlot::Bases => "phase3_bases.json",
            DocumentSlot::Addons => "phase4_final.json",
        }
    }

    pub fn stage(self) -> Stage {
        match self {
            DocumentSlot::CategoriesRaw | DocumentSlot::CategoriesReviewed => Stage::Categories,
            DocumentSlot::Items => Stage::Items,
            DocumentSlot::Bases => Stage::Bases,
            DocumentSlot::Addons => Stage::Addons,
        }
    }

    /// The slot a stage writes its result to. Stage 1 also writes the
    /// reviewed slot; see [`crate::extractor::MenuExtractor::extract_categories`].
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Categories => DocumentSlot::CategoriesRaw,
            Stage::Items => DocumentSlot::Items,
            Stage::Bases => DocumentSlot::Bases,
            Stage::Addons => DocumentSlot::Addons,
        }
    }
}

// ── Store ────────────────────────────────────────────────────────────────

/// Where uploaded PDFs and stage documents live.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn save_pdf(&self, job: &JobId, bytes: &[u8]) -> Result<(), MenuExtractError>;

    async fn load_pdf(&self, job: &JobId) -> Result<Vec<u8>, MenuExtractError>;

    /// Replace the whole document in `slot`.
    async fn save_document(
        &self,
        job: &JobId,
        slot: DocumentSlot,
        document: &Value,
    ) -> Result<(), MenuExtractError>;

    /// The document in `slot`, or `None` if the slot was never written.
    async fn load_document(
        &self,
        job: &JobId,
        slot: DocumentSlot,
    ) -> Result<Option<Value>, MenuExtractError>;

    /// Every job with an uploaded PDF, most recently uploaded first.
    async fn list_jobs(&self) -> Result<Vec<JobId>, MenuExtractError>;

    /// Remove the job's PDF and everything written for it.
    async fn delete_job(&self, job: &JobId) -> Result<(), MenuExtractError>;
}

/// [`DocumentStore`] on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pdf_path(&self, job: &JobId) -> PathBuf {
        self.root.join("uploads").join(format!("{}.pdf", job))
    }

    pub fn job_dir(&self, job: &JobId) -> PathBuf {
        self.root.join("outputs").join(job.as_str())
    }

    pub fn document_path(&self, job: &JobId, slot: DocumentSlot) -> PathBuf {
        self.job_dir(job).join(slot.file_name())
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn save_pdf(&self, job: &JobId, bytes: &[u8]) -> Result<(), MenuExtractError> {
        write_atomic(&self.pdf_path(job), bytes).await
    }

    async fn load_pdf(&self, job: &JobId) -> Result<Vec<u8>, MenuExtractError> {
        let path = self.pdf_path(job);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MenuExtractError::ResourceMissing {
                    resource: format!("uploaded PDF of job {}", job),
                })
            }
            Err(e) => Err(MenuExtractError::Storage { path, source: e }),
        }
    }

    async fn save_document(
        &self,
        job: &JobId,
        slot: DocumentSlot,
        document: &Value,
    ) -> Result<(), MenuExtractError> {
        let bytes = serde_json::to_vec_pretty(document).map_err(|e| {
            MenuExtractError::Serialization {
                stage: slot.stage(),
                source: e,
            }
        })?;
        write_atomic(&self.document_path(job, slot), &bytes).await
    }

    async fn load_document(
        &self,
        job: &JobId,
        slot: DocumentSlot,
    ) -> Result<Option<Value>, MenuExtractError> {
        let path = self.document_path(job, slot);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MenuExtractError::Storage { path, source: e }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| MenuExtractError::UpstreamDocumentInvalid {
                stage: slot.stage(),
                detail: format!("{} is not valid JSON: {}", path.display(), e),
            })
    }

    async fn list_jobs(&self) -> Result<Vec<JobId>, MenuExtractError> {
        let dir = self.root.join("uploads");
        let storage_err = |source: std::io::Error| MenuExtractError::Storage {
            path: dir.clone(),
            source,
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(e)),
        };

        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(storage_err)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pdf") {
                continue;
            }
            let Some(job) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<JobId>().ok())
            else {
                continue;
            };
            let uploaded = entry.metadata().await.and_then(|m| m.modified()).ok();
            jobs.push((uploaded, job));
        }

        jobs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.as_str().cmp(b.1.as_str())));
        Ok(jobs.into_iter().map(|(_, job)| job).collect())
    }

    async fn delete_job(&self, job: &JobId) -> Result<(), MenuExtractError> {
        let had_pdf = remove_if_present(&self.pdf_path(job), false).await?;
        let had_outputs = remove_if_present(&self.job_dir(job), true).await?;
        if !had_pdf && !had_outputs {
            return Err(MenuExtractError::ResourceMissing {
                resource: format!("job {}", job),
            });
        }
        Ok(())
    }
}

/// Remove a file (or a whole directory); `false` if it was not there.
async fn remove_if_present(path: &Path, is_dir: bool) -> Result<bool, MenuExtractError> {
    let result = if is_dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(MenuExtractError::Storage {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Atomic write: write to a sibling temp file, then rename over the target.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), MenuExtractError> {
    let storage_err = |source| MenuExtractError::Storage {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(storage_err)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await.map_err(storage_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(storage_err)?;
    debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
