//! Command-line interface for gradescope-archiver.
//!
//! All archiving logic lives in `gradescope-archiver-core`; this module parses
//! arguments, wires the real collaborators (the HTTP session and the
//! `git`/`gh` command host) into the engine, and prints summaries.
//!
//! Commands that only touch hosted repositories (`rename`, `apply-renames`,
//! `nuke`) never open a platform session, so they work without a valid
//! authentication file.
//!
//! For programmatic and integration use, call [`run`] with a constructed [`Cli`].

use crate::load_config::resolve_config;
use crate::session::HttpSession;
use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use gradescope_archiver_core::config::ArchiveConfig;
use gradescope_archiver_core::repository::{GitCli, RepositorySync};
use gradescope_archiver_core::state::{is_stale, StateStore};
use gradescope_archiver_core::synchronise::{self, Archiver, BatchReport, CourseSync};
use std::path::PathBuf;

/// Archive graded Gradescope coursework and mirror each course to GitHub.
#[derive(Parser)]
#[clap(name = "gradescope-archiver", version, about = "Archive Gradescope coursework into per-course GitHub repositories")]
pub struct Cli {
    /// Optional YAML config file; every key defaults when omitted
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List discovered courses with their archive state
    List,
    /// Discover courses and add new ones to the state file
    UpdateCourses,
    /// Archive and push every discovered course
    DownloadAll,
    /// Archive and push only courses not synced within the update threshold
    UpdateStale,
    /// Archive and push a single course
    Test {
        /// Course URL, or 1-based position in the discovered list
        #[clap(long)]
        course: String,
    },
    /// Rename a course and its hosted repository
    Rename {
        /// Course identifier (its URL) as stored in the state file
        #[clap(long)]
        course: String,
        /// New display name
        #[clap(long)]
        name: String,
    },
    /// Apply every pending rename recorded in the state file
    ApplyRenames,
    /// Delete every hosted repository recorded in the state file
    Nuke {
        /// Confirm the deletion
        #[clap(long)]
        yes: bool,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::List => "list",
            Commands::UpdateCourses => "update-courses",
            Commands::DownloadAll => "download-all",
            Commands::UpdateStale => "update-stale",
            Commands::Test { .. } => "test",
            Commands::Rename { .. } => "rename",
            Commands::ApplyRenames => "apply-renames",
            Commands::Nuke { .. } => "nuke",
        }
    }
}

/// Async CLI entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");
    let command = cli.command.name();
    let config = resolve_config(cli.config.as_deref())?;
    tracing::info!(command, "Dispatching command");

    let vcs = GitCli::new();
    match cli.command {
        Commands::Rename { course, name } => {
            let store = StateStore::new(&config.state_file);
            let outcome = RepositorySync::new(&vcs, &config).rename_course(&store, &course, &name)?;
            println!("Rename of {course}: {outcome:?}");
            Ok(())
        }
        Commands::ApplyRenames => {
            let store = StateStore::new(&config.state_file);
            let report = synchronise::apply_pending_renames(&RepositorySync::new(&vcs, &config), &store);
            finish(command, &report)
        }
        Commands::Nuke { yes } => {
            if !yes {
                bail!("refusing to delete hosted repositories without --yes");
            }
            let store = StateStore::new(&config.state_file);
            let report = synchronise::nuke(&RepositorySync::new(&vcs, &config), &store)?;
            finish(command, &report)
        }
        session_command => {
            let session = HttpSession::from_storage_state(&config)?;
            let archiver = Archiver::new(&session, &vcs, &config);
            run_with_session(session_command, &archiver, &config).await
        }
    }
}

async fn run_with_session(
    command: Commands,
    archiver: &Archiver<'_, HttpSession, GitCli>,
    config: &ArchiveConfig,
) -> Result<()> {
    let name = command.name();
    match command {
        Commands::List => {
            let refresh = archiver.refresh_courses().await?;
            let now = Utc::now();
            for (i, course) in refresh.discovered.iter().enumerate() {
                let Some(record) = refresh.courses.get(&course.id) else {
                    continue;
                };
                let repo = record.bound_repository().unwrap_or("-");
                let stale = if is_stale(record, now, config.staleness_threshold()) { "stale" } else { "fresh" };
                println!(
                    "{:>3}. {} [{}] repo={} {} ({})",
                    i + 1,
                    record.full_name,
                    record.term,
                    repo,
                    stale,
                    course.id
                );
            }
            Ok(())
        }
        Commands::UpdateCourses => {
            let refresh = archiver.refresh_courses().await?;
            println!(
                "Discovered {} course(s), added {} new to {}",
                refresh.discovered.len(),
                refresh.added,
                config.state_file.display()
            );
            Ok(())
        }
        Commands::DownloadAll => finish(name, &archiver.download_all().await?),
        Commands::UpdateStale => finish(name, &archiver.update_stale(Utc::now()).await?),
        Commands::Test { course } => {
            let outcome = archiver.test_course(&course).await?;
            print_course(&outcome);
            Ok(())
        }
        other => bail!("command '{}' does not use a platform session", other.name()),
    }
}

fn print_course(outcome: &CourseSync) {
    println!(
        "Archived {} file(s) from {} assignment(s) into {}",
        outcome.archive.files,
        outcome.archive.assignments,
        outcome.archive.dir.display()
    );
    match &outcome.repository {
        Some(repo) => println!(
            "Pushed to {}{}",
            repo.repo_name,
            if outcome.removed_local { ", local copy removed" } else { "" }
        ),
        None => println!("Nothing to push"),
    }
}

fn finish(command: &str, report: &BatchReport) -> Result<()> {
    for (unit, reason) in &report.failures {
        println!("  ✗ {unit}: {reason}");
    }
    println!(
        "{command}: attempted {}, succeeded {}, failed {}",
        report.attempted, report.succeeded, report.failed
    );
    tracing::info!(
        command,
        attempted = report.attempted,
        succeeded = report.succeeded,
        failed = report.failed,
        "Batch summary"
    );
    Ok(())
}
