//! Top-level driver: discovery → download → repository sync, per course.
//!
//! The [`Archiver`] composes the engine's stages around one shared session and
//! one state file. Courses are processed strictly one at a time, in discovery
//! order, with `request_delay` between courses and between assignments.
//!
//! # Failure boundaries
//! A failing link never fails its assignment, and a failing assignment never
//! fails its course. A failing course is recorded in the [`BatchReport`] and
//! the batch moves on. The state file is only written after a confirmed step:
//! the repository name is bound and the timestamp refreshed once the push
//! succeeded, so a course whose push failed stays stale and is retried.
//!
//! # Entry points
//! - [`Archiver::refresh_courses`]: discover and add new courses to state.
//! - [`Archiver::download_all`] / [`Archiver::update_stale`]: batch syncs.
//! - [`Archiver::test_course`]: sync one course picked by id or 1-based index.
//! - [`apply_pending_renames`] and [`nuke`] only need the hosting side, so
//!   they take a [`RepositorySync`] rather than a full archiver.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::config::ArchiveConfig;
use crate::contract::{Session, VcsHost};
use crate::discovery::{self, eligible_assignments};
use crate::download::DownloadPipeline;
use crate::error::{ArchiveError, Result};
use crate::repository::{DeleteOutcome, RepositorySync, RepositorySyncState};
use crate::sanitize;
use crate::state::{is_stale, CourseMap, CourseRecord, RawCourse, StateStore};

/// Totals of a batch operation. Failures carry the unit and its diagnosis.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<(String, String)>,
}

impl BatchReport {
    fn record<T>(&mut self, unit: &str, outcome: &Result<T>) {
        self.attempted += 1;
        match outcome {
            Ok(_) => self.succeeded += 1,
            Err(e) => {
                self.failed += 1;
                self.failures.push((unit.to_string(), e.to_string()));
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Result of a course-list refresh.
#[derive(Debug, Clone)]
pub struct Refresh {
    /// Courses as discovered, in dashboard order.
    pub discovered: Vec<RawCourse>,
    /// State after merging the discovery in.
    pub courses: CourseMap,
    pub added: usize,
}

/// What one course's archive pass produced on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseArchive {
    pub dir: PathBuf,
    pub assignments: usize,
    pub files: usize,
}

/// What one course's full sync did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseSync {
    pub archive: CourseArchive,
    /// `None` when there was nothing on disk to mirror.
    pub repository: Option<RepositorySyncState>,
    pub removed_local: bool,
}

pub struct Archiver<'a, S: Session + ?Sized, V: VcsHost + ?Sized> {
    session: &'a S,
    vcs: &'a V,
    store: StateStore,
    config: &'a ArchiveConfig,
}

impl<'a, S: Session + ?Sized, V: VcsHost + ?Sized> Archiver<'a, S, V> {
    pub fn new(session: &'a S, vcs: &'a V, config: &'a ArchiveConfig) -> Self {
        Self {
            session,
            vcs,
            store: StateStore::new(&config.state_file),
            config,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    fn repository(&self) -> RepositorySync<'_, V> {
        RepositorySync::new(self.vcs, self.config)
    }

    /// Discover courses and add the new ones to the state file.
    pub async fn refresh_courses(&self) -> Result<Refresh> {
        let ignore = discovery::load_ignore_patterns(&self.config.ignore_file);
        let discovered = discovery::discover(self.session, &ignore).await?;
        let (courses, added) = self.store.upsert_discovered(&discovered)?;
        Ok(Refresh {
            discovered,
            courses,
            added,
        })
    }

    /// Download every eligible assignment of one course into its directory.
    pub async fn archive_course(&self, record: &CourseRecord) -> Result<CourseArchive> {
        let course_dir = self
            .config
            .output_dir
            .join(sanitize::course_dir_name(&record.full_name));
        info!(course = %record.full_name, dir = %course_dir.display(), "Processing course");

        let rows = self
            .session
            .list_assignment_rows(&record.url)
            .await
            .map_err(|e| ArchiveError::Session(format!("listing assignments of {} failed: {e}", record.url)))?;
        let assignments = eligible_assignments(rows);
        info!(course = %record.full_name, eligible = assignments.len(), "Found eligible assignment(s)");

        let pipeline = DownloadPipeline::new(self.session, self.config);
        let mut files = 0;
        for (i, assignment) in assignments.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.request_delay()).await;
            }
            let target = course_dir.join(sanitize::assignment_dir_name(&assignment.name));
            match pipeline.download_assignment(assignment, &target).await {
                Ok(outcome) => files += outcome.successful(),
                Err(e) => warn!(assignment = %assignment.name, error = %e, "Assignment failed, continuing"),
            }
        }

        Ok(CourseArchive {
            dir: course_dir,
            assignments: assignments.len(),
            files,
        })
    }

    /// Archive one course, mirror it, and record the outcome in state.
    pub async fn sync_course(&self, id: &str) -> Result<CourseSync> {
        let record = self.store.get(id)?;
        let archive = self.archive_course(&record).await?;

        let nothing_to_mirror =
            !archive.dir.is_dir() || (archive.files == 0 && !self.vcs.has_vcs_root(&archive.dir));
        if nothing_to_mirror {
            info!(course = %record.full_name, "Nothing archived locally, skipping repository sync");
            self.store.touch(id)?;
            return Ok(CourseSync {
                archive,
                repository: None,
                removed_local: false,
            });
        }

        let repo = self.repository().sync_directory(&archive.dir, &record.full_name)?;
        self.store.bind_repository(id, &repo.repo_name)?;
        self.store.touch(id)?;

        let mut removed_local = false;
        if repo.safe_to_delete_local() && !self.config.keep_local {
            std::fs::remove_dir_all(&repo.local_dir)?;
            info!(dir = %repo.local_dir.display(), "Removed local copy after push");
            removed_local = true;
        }
        Ok(CourseSync {
            archive,
            repository: Some(repo),
            removed_local,
        })
    }

    async fn sync_batch(&self, ids: &[String]) -> BatchReport {
        let mut report = BatchReport::default();
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.request_delay()).await;
            }
            let outcome = self.sync_course(id).await;
            if let Err(e) = &outcome {
                error!(course = %id, error = %e, "Course sync failed, continuing with next course");
            }
            report.record(id, &outcome);
        }
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            "Batch finished"
        );
        report
    }

    /// Rediscover and sync every course.
    pub async fn download_all(&self) -> Result<BatchReport> {
        let refresh = self.refresh_courses().await?;
        let ids: Vec<String> = refresh.discovered.into_iter().map(|c| c.id).collect();
        Ok(self.sync_batch(&ids).await)
    }

    /// Rediscover, then sync only the courses whose last pass is older than
    /// the staleness threshold.
    pub async fn update_stale(&self, now: DateTime<Utc>) -> Result<BatchReport> {
        let refresh = self.refresh_courses().await?;
        let threshold = self.config.staleness_threshold();
        let ids: Vec<String> = refresh
            .discovered
            .iter()
            .filter(|c| {
                refresh
                    .courses
                    .get(&c.id)
                    .is_some_and(|record| is_stale(record, now, threshold))
            })
            .map(|c| c.id.clone())
            .collect();
        info!(stale = ids.len(), "Found stale course(s)");
        Ok(self.sync_batch(&ids).await)
    }

    /// Sync one course picked by identifier or by 1-based discovery index.
    pub async fn test_course(&self, selector: &str) -> Result<CourseSync> {
        let refresh = self.refresh_courses().await?;
        let id = select_course(&refresh.discovered, selector)?;
        info!(course = %id, "Running single-course sync");
        self.sync_course(&id).await
    }
}

/// Run the rename flow for every record with a pending rename.
pub fn apply_pending_renames<V: VcsHost + ?Sized>(repo: &RepositorySync<'_, V>, store: &StateStore) -> BatchReport {
    let pending: Vec<(String, String)> = store
        .load()
        .into_iter()
        .filter_map(|(id, record)| record.pending_rename().map(|r| (id, r.to_string())))
        .collect();
    if pending.is_empty() {
        info!("No pending renames");
    }
    let mut report = BatchReport::default();
    for (id, target) in pending {
        let outcome = repo.rename_course(store, &id, &target);
        match &outcome {
            Ok(done) => info!(course = %id, outcome = ?done, "Rename applied"),
            Err(e) => error!(course = %id, error = %e, "Rename failed"),
        }
        report.record(&id, &outcome);
    }
    report
}

/// Delete every bound hosted repository and summarise the outcomes.
pub fn nuke<V: VcsHost + ?Sized>(repo: &RepositorySync<'_, V>, store: &StateStore) -> Result<BatchReport> {
    let outcomes = repo.delete_all(store)?;
    let mut report = BatchReport::default();
    for (id, outcome) in outcomes {
        if let Ok(DeleteOutcome::AlreadyGone) = &outcome {
            debug!(course = %id, "Repository was already deleted");
        }
        report.record(&id, &outcome);
    }
    Ok(report)
}

/// Resolve a course selector: an exact identifier, or a 1-based position in
/// the discovered list.
pub fn select_course(discovered: &[RawCourse], selector: &str) -> Result<String> {
    if let Some(course) = discovered.iter().find(|c| c.id == selector) {
        return Ok(course.id.clone());
    }
    selector
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| discovered.get(i))
        .map(|c| c.id.clone())
        .ok_or_else(|| ArchiveError::NotFound(format!("no discovered course matches '{selector}'")))
}
