use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Process-wide tunables, passed explicitly into every component.
///
/// Every field has a default so a partially specified YAML file (or none at
/// all) still yields a usable configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Origin used to resolve relative links found on platform pages.
    pub base_url: String,
    /// Root under which one directory per course is materialised.
    pub output_dir: PathBuf,
    /// JSON file holding the persisted course records.
    pub state_file: PathBuf,
    /// Optional JSON array of display-name substrings to skip.
    pub ignore_file: PathBuf,
    /// Browser storage-state file holding the authenticated session cookies.
    pub auth_file: PathBuf,
    /// Pause between assignments and between courses.
    pub request_delay_ms: u64,
    /// Total number of attempts per link, first attempt included.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Records older than this are re-synced by `update-stale`.
    pub update_threshold_hours: i64,
    pub repo_private: bool,
    /// How many levels of nested archives are unpacked below the downloaded one.
    pub extract_depth: usize,
    pub branch: String,
    /// Keep the local course directory after a successful push.
    pub keep_local: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.gradescope.com".to_string(),
            output_dir: PathBuf::from("gradescope_archive"),
            state_file: PathBuf::from("courses.json"),
            ignore_file: PathBuf::from("ignore_courses.json"),
            auth_file: PathBuf::from("gradescope_auth.json"),
            request_delay_ms: 2000,
            max_retries: 3,
            retry_delay_ms: 2000,
            update_threshold_hours: 24,
            repo_private: true,
            extract_depth: 1,
            branch: "main".to_string(),
            keep_local: false,
        }
    }
}

impl ArchiveConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn staleness_threshold(&self) -> chrono::Duration {
        chrono::Duration::hours(self.update_threshold_hours)
    }

    pub fn trace_loaded(&self) {
        info!(
            output_dir = %self.output_dir.display(),
            state_file = %self.state_file.display(),
            max_retries = self.max_retries,
            extract_depth = self.extract_depth,
            repo_private = self.repo_private,
            "Loaded ArchiveConfig"
        );
        debug!(?self, "ArchiveConfig loaded (full debug)");
    }
}
