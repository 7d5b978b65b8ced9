//! Error taxonomy shared by every stage of the archive pipeline.
//!
//! Callers recover at the per-link, per-assignment or per-course boundary, so
//! most variants are matched on rather than bubbled to the top. `NotFound` in
//! particular is frequently an already-satisfied terminal state.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// A state record or remote repository does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Timeouts, connection resets and 5xx responses, after retries ran out.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// 4xx responses. Never retried.
    #[error("request to {url} rejected with status {status}")]
    PermanentRequest { status: u16, url: String },

    #[error("extraction failed for {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    /// `git`/`gh` returned non-zero for a reason other than "not found".
    #[error("external tool failed: {0}")]
    ExternalTool(String),

    /// The browser-like session collaborator failed outside of a byte fetch.
    #[error("session error: {0}")]
    Session(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ArchiveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArchiveError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
