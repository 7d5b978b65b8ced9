//! # contract: interfaces to the engine's external collaborators
//!
//! The engine never talks to a browser, the network, `git` or `gh` directly.
//! It drives two traits instead:
//!
//! - [`Session`]: the authenticated, browser-like session. It lists course
//!   cards and assignment rows, exposes the links on an assignment page, and
//!   performs authenticated byte fetches with the session's cookies.
//! - [`VcsHost`]: the version-control and hosting command surface. Every call
//!   receives an explicit working directory; nothing changes the process cwd.
//!
//! ## Mocking & Testing
//! Both traits are annotated for `mockall`, so integration tests can script
//! responses (including failures) deterministically.
//!
//! ## Errors
//! `Session` methods return a boxed error; the engine classifies it. For
//! [`Session::fetch_authenticated`] an `Err` always means a network-level
//! failure (timeout, reset). HTTP error statuses are returned as `Ok` with the
//! status so the retry policy can tell 4xx from 5xx.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

use mockall::automock;

/// Error type for the session collaborator.
pub type SessionError = Box<dyn std::error::Error + Send + Sync>;

/// One course card on the platform's dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseCard {
    /// Canonical course URL; doubles as the course identifier.
    pub url: String,
    pub display_name: String,
    pub short_name: String,
    pub term: String,
}

/// One row of a course's assignment table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentRow {
    pub name: String,
    pub url: String,
    pub status_text: String,
}

/// An anchor element found on an assignment page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageLink {
    /// Raw `href` attribute; `None` for script-driven download buttons.
    pub href: Option<String>,
    /// Visible text content.
    pub text: String,
    /// Whether the element carries a `download` attribute.
    pub has_download_attr: bool,
    /// Opaque handle the session can click via [`Session::click_and_capture`].
    pub locator: String,
}

/// Raw response of an authenticated fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A file the session saved after clicking an element.
#[derive(Debug, Clone)]
pub struct CapturedDownload {
    pub suggested_filename: String,
    pub body: Vec<u8>,
}

/// Authenticated browser-like session shared by discovery and downloads.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Session: Send + Sync {
    /// Every course card visible on the dashboard, in display order.
    async fn list_course_cards(&self) -> Result<Vec<CourseCard>, SessionError>;

    /// Every row of the course's assignment table, in listing order.
    async fn list_assignment_rows(
        &self,
        course_url: &str,
    ) -> Result<Vec<AssignmentRow>, SessionError>;

    /// Navigate to an assignment page and return its anchors in document order.
    async fn open_assignment(&self, assignment_url: &str) -> Result<Vec<PageLink>, SessionError>;

    /// GET `url` with the session's current cookies.
    async fn fetch_authenticated(&self, url: &str) -> Result<FetchResponse, SessionError>;

    /// Click the element behind `locator` and capture the resulting download.
    async fn click_and_capture(&self, locator: &str) -> Result<CapturedDownload, SessionError>;
}

/// Classified failure of an external `git`/`gh` invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// The remote repository does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Creation collided with an existing repository of the same name.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// Any other non-zero exit, or the tool could not be launched.
    #[error("{0}")]
    Failed(String),
}

/// Version-control and hosting command surface used by repository sync.
///
/// Remote repository arguments are `owner/name` where the operation needs an
/// owner, and a bare name for creation.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait VcsHost: Send + Sync {
    /// Whether `dir` already holds version-control metadata.
    fn has_vcs_root(&self, dir: &Path) -> bool;
    fn init(&self, dir: &Path) -> Result<(), ToolError>;
    fn stage_all(&self, dir: &Path) -> Result<(), ToolError>;
    /// Whether the working tree has anything to commit.
    fn has_changes(&self, dir: &Path) -> Result<bool, ToolError>;
    fn commit(&self, dir: &Path, message: &str) -> Result<(), ToolError>;
    fn list_remotes(&self, dir: &Path) -> Result<Vec<String>, ToolError>;
    fn add_remote(&self, dir: &Path, name: &str, url: &str) -> Result<(), ToolError>;
    /// Create a hosted repository from `dir` and bind it as `origin`.
    fn create_remote_repository(&self, dir: &Path, name: &str, private: bool)
        -> Result<(), ToolError>;
    fn rename_remote_repository(
        &self,
        dir: &Path,
        full_name: &str,
        new_name: &str,
    ) -> Result<(), ToolError>;
    fn delete_remote_repository(&self, dir: &Path, full_name: &str) -> Result<(), ToolError>;
    fn rename_branch(&self, dir: &Path, branch: &str) -> Result<(), ToolError>;
    fn force_push(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), ToolError>;
    /// Login of the authenticated hosting account.
    fn current_user(&self, dir: &Path) -> Result<String, ToolError>;
}
