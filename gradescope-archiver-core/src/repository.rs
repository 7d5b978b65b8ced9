//! Mirrors a course directory into a hosted repository.
//!
//! Per course directory the sync walks: ensure a local repository with the
//! current snapshot committed, ensure an `origin` remote (creating the hosted
//! repository, or attaching an existing one of the same name), then rename the
//! branch and force-push. The hosted repository is an archival mirror, so its
//! history is always replaced by the local snapshot.
//!
//! The rename and delete ("nuke") flows treat a remote that no longer exists
//! as an already-satisfied outcome.
//!
//! All external commands run with an explicit working directory.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, error, info, warn};

use crate::config::ArchiveConfig;
use crate::contract::{ToolError, VcsHost};
use crate::error::{ArchiveError, Result};
use crate::sanitize;
use crate::state::StateStore;

pub const REMOTE_NAME: &str = "origin";

/// Sort a failed command's stderr into the cases callers react to.
pub fn classify_failure(stderr: &str) -> ToolError {
    let message = stderr.trim().to_string();
    if message.contains("Name already exists on this account") {
        ToolError::AlreadyExists(message)
    } else if message.contains("HTTP 404")
        || message.contains("Not Found")
        || message.contains("Could not resolve to a Repository")
    {
        ToolError::NotFound(message)
    } else {
        ToolError::Failed(message)
    }
}

/// [`VcsHost`] backed by the `git` and `gh` executables on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, program: &str, dir: &Path, args: &[&str]) -> std::result::Result<Output, ToolError> {
        debug!(program, ?args, dir = %dir.display(), "Running external command");
        let output = Command::new(program)
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| {
                error!(error = ?e, program, dir = %dir.display(), "Failed to launch process");
                ToolError::Failed(format!("failed to launch {program}: {e}"))
            })?;
        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let failure = classify_failure(&stderr);
            debug!(program, ?args, status = ?output.status, error = %failure, "Command exited with non-zero code");
            Err(failure)
        }
    }

    fn git(&self, dir: &Path, args: &[&str]) -> std::result::Result<Output, ToolError> {
        self.run("git", dir, args)
    }

    fn gh(&self, dir: &Path, args: &[&str]) -> std::result::Result<Output, ToolError> {
        self.run("gh", dir, args)
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

impl VcsHost for GitCli {
    fn has_vcs_root(&self, dir: &Path) -> bool {
        dir.join(".git").exists()
    }

    fn init(&self, dir: &Path) -> std::result::Result<(), ToolError> {
        self.git(dir, &["init"]).map(drop)
    }

    fn stage_all(&self, dir: &Path) -> std::result::Result<(), ToolError> {
        self.git(dir, &["add", "."]).map(drop)
    }

    fn has_changes(&self, dir: &Path) -> std::result::Result<bool, ToolError> {
        self.git(dir, &["status", "--porcelain"])
            .map(|out| !stdout(&out).is_empty())
    }

    fn commit(&self, dir: &Path, message: &str) -> std::result::Result<(), ToolError> {
        self.git(dir, &["commit", "-m", message]).map(drop)
    }

    fn list_remotes(&self, dir: &Path) -> std::result::Result<Vec<String>, ToolError> {
        self.git(dir, &["remote"])
            .map(|out| stdout(&out).split_whitespace().map(str::to_string).collect())
    }

    fn add_remote(&self, dir: &Path, name: &str, url: &str) -> std::result::Result<(), ToolError> {
        self.git(dir, &["remote", "add", name, url]).map(drop)
    }

    fn create_remote_repository(
        &self,
        dir: &Path,
        name: &str,
        private: bool,
    ) -> std::result::Result<(), ToolError> {
        let visibility = if private { "--private" } else { "--public" };
        let remote = format!("--remote={REMOTE_NAME}");
        self.gh(dir, &["repo", "create", name, visibility, "--source=.", remote.as_str()])
            .map(drop)
    }

    fn rename_remote_repository(
        &self,
        dir: &Path,
        full_name: &str,
        new_name: &str,
    ) -> std::result::Result<(), ToolError> {
        self.gh(dir, &["repo", "rename", new_name, "--repo", full_name, "--yes"])
            .map(drop)
    }

    fn delete_remote_repository(&self, dir: &Path, full_name: &str) -> std::result::Result<(), ToolError> {
        self.gh(dir, &["repo", "delete", full_name, "--yes"]).map(drop)
    }

    fn rename_branch(&self, dir: &Path, branch: &str) -> std::result::Result<(), ToolError> {
        self.git(dir, &["branch", "-M", branch]).map(drop)
    }

    fn force_push(&self, dir: &Path, remote: &str, branch: &str) -> std::result::Result<(), ToolError> {
        self.git(dir, &["push", "-u", remote, branch, "--force"]).map(drop)
    }

    fn current_user(&self, dir: &Path) -> std::result::Result<String, ToolError> {
        let login = stdout(&self.gh(dir, &["api", "user", "--jq", ".login"])?);
        if login.is_empty() {
            return Err(ToolError::Failed("hosting account login is empty".to_string()));
        }
        Ok(login)
    }
}

/// What happened to one course directory during a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySyncState {
    pub local_dir: PathBuf,
    pub repo_name: String,
    /// A local repository existed before this pass.
    pub had_vcs_root: bool,
    /// `origin` was configured before this pass.
    pub remote_was_bound: bool,
    pub pushed: bool,
}

impl RepositorySyncState {
    /// Only a pushed snapshot makes the local copy redundant.
    pub fn safe_to_delete_local(&self) -> bool {
        self.pushed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    /// The hosted repository was renamed and the record updated.
    Renamed { repo: String },
    /// No repository was bound, so the record was simply dropped.
    RemovedUnbound,
    /// The hosted repository no longer exists; the record was dropped.
    RemovedMissingRemote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
}

pub struct RepositorySync<'a, V: VcsHost + ?Sized> {
    vcs: &'a V,
    config: &'a ArchiveConfig,
}

impl<'a, V: VcsHost + ?Sized> RepositorySync<'a, V> {
    pub fn new(vcs: &'a V, config: &'a ArchiveConfig) -> Self {
        Self { vcs, config }
    }

    fn tool_error(step: &str, e: ToolError) -> ArchiveError {
        match e {
            ToolError::NotFound(msg) => ArchiveError::NotFound(format!("{step}: {msg}")),
            other => ArchiveError::ExternalTool(format!("{step}: {other}")),
        }
    }

    /// Turn `dir` into a pushed hosted repository named after `display_name`.
    pub fn sync_directory(&self, dir: &Path, display_name: &str) -> Result<RepositorySyncState> {
        info!(course = display_name, dir = %dir.display(), "Setting up repository");
        if !dir.is_dir() {
            return Err(ArchiveError::NotFound(format!(
                "course directory '{}' does not exist",
                dir.display()
            )));
        }
        let repo_name = sanitize::repo_name(display_name);
        let mut state = RepositorySyncState {
            local_dir: dir.to_path_buf(),
            repo_name: repo_name.clone(),
            had_vcs_root: self.vcs.has_vcs_root(dir),
            remote_was_bound: false,
            pushed: false,
        };

        if !state.had_vcs_root {
            self.vcs.init(dir).map_err(|e| Self::tool_error("init", e))?;
            info!(dir = %dir.display(), "Initialized local repository");
        }
        self.commit_snapshot(dir, display_name)?;

        let remotes = self
            .vcs
            .list_remotes(dir)
            .map_err(|e| Self::tool_error("list remotes", e))?;
        state.remote_was_bound = remotes.iter().any(|r| r == REMOTE_NAME);
        if state.remote_was_bound {
            debug!(dir = %dir.display(), "Remote 'origin' already exists, skipping creation");
        } else {
            self.bind_remote(dir, &repo_name)?;
        }

        self.vcs
            .rename_branch(dir, &self.config.branch)
            .map_err(|e| Self::tool_error("rename branch", e))?;
        self.vcs
            .force_push(dir, REMOTE_NAME, &self.config.branch)
            .map_err(|e| Self::tool_error("push", e))?;
        state.pushed = true;
        info!(repo = %repo_name, "Pushed snapshot to hosted repository");
        Ok(state)
    }

    fn commit_snapshot(&self, dir: &Path, display_name: &str) -> Result<()> {
        self.vcs
            .stage_all(dir)
            .map_err(|e| Self::tool_error("stage", e))?;
        let dirty = self
            .vcs
            .has_changes(dir)
            .map_err(|e| Self::tool_error("status", e))?;
        if !dirty {
            info!(dir = %dir.display(), "No changes to commit");
            return Ok(());
        }
        let message = format!("Gradescope archive snapshot for {display_name}");
        self.vcs
            .commit(dir, &message)
            .map_err(|e| Self::tool_error("commit", e))?;
        info!(dir = %dir.display(), "Committed snapshot");
        Ok(())
    }

    /// Create the hosted repository, or attach to it when the name is taken.
    fn bind_remote(&self, dir: &Path, repo_name: &str) -> Result<()> {
        match self
            .vcs
            .create_remote_repository(dir, repo_name, self.config.repo_private)
        {
            Ok(()) => {
                info!(repo = repo_name, private = self.config.repo_private, "Created hosted repository");
                Ok(())
            }
            Err(ToolError::AlreadyExists(_)) => {
                info!(repo = repo_name, "Hosted repository already exists, attaching to it");
                let login = self
                    .vcs
                    .current_user(dir)
                    .map_err(|e| Self::tool_error("look up hosting account", e))?;
                let url = format!("https://github.com/{login}/{repo_name}.git");
                self.vcs
                    .add_remote(dir, REMOTE_NAME, &url)
                    .map_err(|e| Self::tool_error("add remote", e))
            }
            Err(e) => Err(Self::tool_error("create repository", e)),
        }
    }

    /// Rename a course's hosted repository and record the new names.
    pub fn rename_course(&self, store: &StateStore, id: &str, new_name: &str) -> Result<RenameOutcome> {
        let record = store.get(id)?;
        let old_name = record.full_name.clone();
        info!(course = id, from = %old_name, to = new_name, "Renaming course");

        let Some(old_repo) = record.bound_repository().map(str::to_string) else {
            info!(course = id, "No hosted repository bound, removing course from state");
            store.remove(id)?;
            return Ok(RenameOutcome::RemovedUnbound);
        };

        std::fs::create_dir_all(&self.config.output_dir)?;
        let run_dir = self.config.output_dir.clone();
        let login = self
            .vcs
            .current_user(&run_dir)
            .map_err(|e| Self::tool_error("look up hosting account", e))?;
        let full_old = format!("{login}/{old_repo}");
        let new_repo = sanitize::repo_name(new_name);

        match self.vcs.rename_remote_repository(&run_dir, &full_old, &new_repo) {
            Ok(()) => {
                info!(from = %full_old, to = %new_repo, "Renamed hosted repository");
                store.rename(id, new_name)?;
                store.bind_repository(id, &new_repo)?;
                self.rename_local_dir(&old_name, new_name);
                Ok(RenameOutcome::Renamed { repo: new_repo })
            }
            Err(ToolError::NotFound(_)) => {
                info!(repo = %full_old, "Hosted repository not found, assuming deleted");
                store.remove(id)?;
                Ok(RenameOutcome::RemovedMissingRemote)
            }
            Err(e) => {
                error!(repo = %full_old, error = %e, "Failed to rename hosted repository");
                Err(Self::tool_error("rename repository", e))
            }
        }
    }

    /// Move the local course folder to its new name, if there is one. The
    /// hosted repository is already renamed at this point, so a folder that
    /// cannot be moved is reported and left where it is.
    fn rename_local_dir(&self, old_name: &str, new_name: &str) {
        let old_path = self.config.output_dir.join(sanitize::course_dir_name(old_name));
        let new_path = self.config.output_dir.join(sanitize::course_dir_name(new_name));
        if !old_path.is_dir() {
            debug!(path = %old_path.display(), "Local folder does not exist, skipping local rename");
            return;
        }
        if old_path == new_path {
            return;
        }
        match std::fs::rename(&old_path, &new_path) {
            Ok(()) => info!(from = %old_path.display(), to = %new_path.display(), "Renamed local folder"),
            Err(e) => warn!(
                from = %old_path.display(),
                to = %new_path.display(),
                error = %e,
                "Could not rename local folder, leaving it in place"
            ),
        }
    }

    /// Delete every bound hosted repository. One course's failure never stops
    /// the batch; the returned list pairs each course id with its outcome.
    pub fn delete_all(&self, store: &StateStore) -> Result<Vec<(String, Result<DeleteOutcome>)>> {
        let bound: Vec<(String, String)> = store
            .load()
            .into_iter()
            .filter_map(|(id, record)| record.bound_repository().map(|r| (id, r.to_string())))
            .collect();
        if bound.is_empty() {
            info!("No bound repositories to delete");
            return Ok(Vec::new());
        }

        std::fs::create_dir_all(&self.config.output_dir)?;
        let run_dir = self.config.output_dir.clone();
        let login = self
            .vcs
            .current_user(&run_dir)
            .map_err(|e| Self::tool_error("look up hosting account", e))?;

        let mut outcomes = Vec::new();
        for (id, repo) in bound {
            let full_name = format!("{login}/{repo}");
            let outcome = match self.vcs.delete_remote_repository(&run_dir, &full_name) {
                Ok(()) => {
                    info!(repo = %full_name, "Deleted hosted repository");
                    Ok(DeleteOutcome::Deleted)
                }
                Err(ToolError::NotFound(_)) => {
                    info!(repo = %full_name, "Hosted repository already gone");
                    Ok(DeleteOutcome::AlreadyGone)
                }
                Err(e) => {
                    warn!(repo = %full_name, error = %e, "Failed to delete hosted repository");
                    Err(Self::tool_error("delete repository", e))
                }
            };
            let outcome = match outcome {
                Ok(done) => store.clear_repository(&id).map(|()| done),
                Err(e) => Err(e),
            };
            outcomes.push((id, outcome));
        }
        Ok(outcomes)
    }
}
