//! Per-assignment artifact download.
//!
//! For one assignment page the pipeline tries an ordered list of link rules,
//! fetches every matched link at most once with the session's cookies, writes
//! each body under the assignment directory and hands it to the
//! [`Extractor`]. When nothing at all could be downloaded it makes one last
//! attempt at the graded-copy PDF.
//!
//! Retry policy: `max_retries` is the total number of attempts per link. 5xx
//! responses and network failures are retried after `retry_delay`; 4xx
//! responses end the link immediately.

use regex::Regex;
use reqwest::Url;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::config::ArchiveConfig;
use crate::contract::{FetchResponse, PageLink, Session};
use crate::discovery::AssignmentRecord;
use crate::error::{ArchiveError, Result};
use crate::extract::Extractor;
use crate::sanitize;

/// A way of recognising a downloadable link on an assignment page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRule {
    /// Explicit submission download endpoint.
    SubmissionDownload,
    /// Anchor carrying a `download` attribute.
    DownloadAttribute,
    /// Href path ending in the given suffix (case-insensitive, query ignored).
    Suffix(&'static str),
    /// Visible text containing the given label.
    Text(&'static str),
}

impl LinkRule {
    pub fn matches(&self, link: &PageLink) -> bool {
        let href = link.href.as_deref().unwrap_or("");
        match self {
            LinkRule::SubmissionDownload => href.contains("/download_submission"),
            LinkRule::DownloadAttribute => link.has_download_attr,
            LinkRule::Suffix(suffix) => {
                let path = href.split(&['?', '#'][..]).next().unwrap_or("");
                path.to_ascii_lowercase().ends_with(suffix)
            }
            LinkRule::Text(label) => link.text.contains(label),
        }
    }
}

/// Rules in priority order. Links are fetched in the order they are matched.
pub const DEFAULT_LINK_RULES: &[LinkRule] = &[
    LinkRule::SubmissionDownload,
    LinkRule::DownloadAttribute,
    LinkRule::Suffix(".zip"),
    LinkRule::Suffix(".tar.gz"),
    LinkRule::Suffix(".tar.bz2"),
    LinkRule::Suffix(".tar"),
    LinkRule::Suffix(".tgz"),
    LinkRule::Suffix(".py"),
    LinkRule::Suffix(".java"),
    LinkRule::Suffix(".cpp"),
    LinkRule::Suffix(".c"),
    LinkRule::Suffix(".h"),
    LinkRule::Suffix(".txt"),
    LinkRule::Suffix(".pdf"),
    LinkRule::Text("Download Graded Copy"),
];

/// Outcome of one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub url: String,
    pub filename: String,
    pub bytes: usize,
    pub success: bool,
    /// Directory the payload was unpacked into, when it was an archive.
    pub extracted_into: Option<PathBuf>,
}

impl DownloadResult {
    fn failed(url: &str) -> Self {
        Self {
            url: url.to_string(),
            filename: String::new(),
            bytes: 0,
            success: false,
            extracted_into: None,
        }
    }
}

/// Everything attempted for one assignment.
#[derive(Debug, Clone, Default)]
pub struct AssignmentDownload {
    pub results: Vec<DownloadResult>,
}

impl AssignmentDownload {
    /// Number of successful downloads; zero is a valid outcome.
    pub fn successful(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }
}

/// A matched link, keyed for deduplication.
enum Candidate {
    Url(String),
    Click(String),
}

pub struct DownloadPipeline<'a, S: Session + ?Sized> {
    session: &'a S,
    config: &'a ArchiveConfig,
    extractor: Extractor,
    rules: &'a [LinkRule],
}

impl<'a, S: Session + ?Sized> DownloadPipeline<'a, S> {
    pub fn new(session: &'a S, config: &'a ArchiveConfig) -> Self {
        Self {
            session,
            config,
            extractor: Extractor::new(config.extract_depth),
            rules: DEFAULT_LINK_RULES,
        }
    }

    pub fn with_rules(mut self, rules: &'a [LinkRule]) -> Self {
        self.rules = rules;
        self
    }

    /// Download every retrievable artifact of `assignment` into `target_dir`.
    pub async fn download_assignment(
        &self,
        assignment: &AssignmentRecord,
        target_dir: &Path,
    ) -> Result<AssignmentDownload> {
        info!(assignment = %assignment.name, url = %assignment.url, "Processing assignment");
        std::fs::create_dir_all(target_dir)?;

        let links = self
            .session
            .open_assignment(&assignment.url)
            .await
            .map_err(|e| ArchiveError::Session(format!("opening {} failed: {e}", assignment.url)))?;

        let page_url = self
            .resolve_url(&self.config.base_url, &assignment.url)
            .unwrap_or_else(|| assignment.url.clone());
        let mut outcome = AssignmentDownload::default();
        let mut attempted: HashSet<String> = HashSet::new();
        let mut written: HashSet<String> = HashSet::new();

        for candidate in self.candidates(&page_url, &links) {
            match candidate {
                Candidate::Url(url) => {
                    if !attempted.insert(url.clone()) {
                        continue;
                    }
                    outcome.results.push(self.fetch_to_dir(&url, None, target_dir, &mut written).await);
                }
                Candidate::Click(locator) => {
                    if !attempted.insert(format!("click:{locator}")) {
                        continue;
                    }
                    outcome.results.push(self.capture_to_dir(&locator, target_dir, &mut written).await);
                }
            }
        }

        if outcome.successful() == 0 {
            let url = graded_copy_url(&page_url);
            if attempted.insert(url.clone()) {
                info!(url = %url, "No direct downloads succeeded, trying graded copy");
                let filename = format!("{}_graded.pdf", sanitize::assignment_dir_name(&assignment.name));
                outcome.results.push(self.fetch_to_dir(&url, Some(filename), target_dir, &mut written).await);
            } else {
                debug!(url = %url, "Graded copy already attempted in this pass");
            }
        }

        let count = outcome.successful();
        if count > 0 {
            info!(assignment = %assignment.name, count, "Downloaded file(s)");
        } else {
            warn!(assignment = %assignment.name, "No files could be downloaded");
        }
        Ok(outcome)
    }

    /// Matched links in rule-priority order, then document order.
    fn candidates(&self, page_url: &str, links: &[PageLink]) -> Vec<Candidate> {
        let mut out = Vec::new();
        for rule in self.rules {
            for link in links.iter().filter(|l| rule.matches(l)) {
                match link.href.as_deref().map(str::trim) {
                    Some(href) if is_navigable(href) => match self.resolve_url(page_url, href) {
                        Some(url) => out.push(Candidate::Url(url)),
                        None => warn!(href, ?rule, "Skipping link with unresolvable href"),
                    },
                    _ => out.push(Candidate::Click(link.locator.clone())),
                }
            }
        }
        out
    }

    /// Resolve `href` against `base`, itself resolved against the platform origin.
    fn resolve_url(&self, base: &str, href: &str) -> Option<String> {
        let origin = Url::parse(&self.config.base_url).ok()?;
        let base = origin.join(base).ok()?;
        base.join(href).map(|u| u.to_string()).ok()
    }

    /// GET `url` under the retry policy.
    pub async fn fetch_with_retry(&self, url: &str) -> Result<FetchResponse> {
        let attempts = self.config.max_retries.max(1);
        let mut last_failure = String::new();
        for attempt in 1..=attempts {
            debug!(url, attempt, "Fetching");
            match self.session.fetch_authenticated(url).await {
                Ok(resp) if resp.is_success() => return Ok(resp),
                Ok(resp) if (400..500).contains(&resp.status) => {
                    warn!(url, status = resp.status, "Request rejected, not retrying");
                    return Err(ArchiveError::PermanentRequest {
                        status: resp.status,
                        url: url.to_string(),
                    });
                }
                Ok(resp) => {
                    warn!(url, attempt, status = resp.status, "Server error");
                    last_failure = format!("status {}", resp.status);
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "Network failure");
                    last_failure = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
        }
        Err(ArchiveError::TransientNetwork(format!(
            "{url}: gave up after {attempts} attempt(s), last failure: {last_failure}"
        )))
    }

    async fn fetch_to_dir(
        &self,
        url: &str,
        filename_override: Option<String>,
        target_dir: &Path,
        written: &mut HashSet<String>,
    ) -> DownloadResult {
        let resp = match self.fetch_with_retry(url).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url, error = %e, "Download failed");
                return DownloadResult::failed(url);
            }
        };
        let filename = filename_override.unwrap_or_else(|| resolve_filename(&resp, url));
        self.persist(url, filename, &resp.body, target_dir, written)
    }

    async fn capture_to_dir(
        &self,
        locator: &str,
        target_dir: &Path,
        written: &mut HashSet<String>,
    ) -> DownloadResult {
        match self.session.click_and_capture(locator).await {
            Ok(captured) => {
                let filename = sanitize::file_name(&captured.suggested_filename);
                self.persist(locator, filename, &captured.body, target_dir, written)
            }
            Err(e) => {
                warn!(locator, error = %e, "Click download failed");
                DownloadResult::failed(locator)
            }
        }
    }

    /// Write one body under `target_dir`. Names already written in this pass
    /// get a numeric suffix instead of being overwritten.
    fn persist(
        &self,
        source: &str,
        filename: String,
        body: &[u8],
        target_dir: &Path,
        written: &mut HashSet<String>,
    ) -> DownloadResult {
        let filename = if written.contains(&filename) {
            let renamed = distinct_name(&filename, written);
            warn!(source, file = %filename, renamed = %renamed, "Filename already used in this pass");
            renamed
        } else {
            filename
        };
        written.insert(filename.clone());
        let path = target_dir.join(&filename);
        if let Err(e) = std::fs::write(&path, body) {
            warn!(error = ?e, path = %path.display(), "Failed to write download");
            return DownloadResult::failed(source);
        }
        info!(file = %filename, bytes = body.len(), "Downloaded");
        let extracted_into = self.extractor.extract_if_archive(&path);
        DownloadResult {
            url: source.to_string(),
            filename,
            bytes: body.len(),
            success: true,
            extracted_into,
        }
    }
}

fn is_navigable(href: &str) -> bool {
    !href.is_empty() && !href.starts_with('#') && !href.starts_with("javascript:")
}

fn disposition_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).expect("disposition pattern is a valid regex")
    })
}

/// Filename from a `Content-Disposition` header value, if it names one.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    disposition_pattern()
        .captures(value)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Disposition filename, then URL basename, then a generic name; sanitised.
pub fn resolve_filename(resp: &FetchResponse, url: &str) -> String {
    let from_header = resp
        .header("content-disposition")
        .and_then(filename_from_disposition);
    let from_url = || {
        Url::parse(url).ok().and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
                .filter(|s| !s.is_empty())
        })
    };
    let raw = from_header.or_else(from_url).unwrap_or_default();
    sanitize::file_name(&raw)
}

/// `name` with `_2`, `_3`, ... inserted before the extension until it is not in `taken`.
fn distinct_name(name: &str, taken: &HashSet<String>) -> String {
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (name, String::new()),
    };
    (2..)
        .map(|n| format!("{stem}_{n}{ext}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// Well-known graded-copy endpoint of an assignment submission page.
pub fn graded_copy_url(assignment_url: &str) -> String {
    let base = assignment_url
        .split(&['?', '#'][..])
        .next()
        .unwrap_or(assignment_url)
        .trim_end_matches('/');
    format!("{base}.pdf")
}
