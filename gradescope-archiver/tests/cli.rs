use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use tempfile::{tempdir, NamedTempFile};

/// Config pointing every file into a scratch directory.
fn scratch_config(dir: &std::path::Path) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    write(
        config.path(),
        format!(
            "output_dir: {out}\nstate_file: {state}\nauth_file: {auth}\nrequest_delay_ms: 0\n",
            out = dir.join("archive").display(),
            state = dir.join("courses.json").display(),
            auth = dir.join("missing_auth.json").display(),
        ),
    )
    .expect("Writing temp config failed");
    config
}

#[test]
fn help_lists_every_command() {
    let output = Command::cargo_bin("gradescope-archiver")
        .expect("Binary exists")
        .arg("--help")
        .output()
        .expect("Running --help failed");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in [
        "list",
        "update-courses",
        "download-all",
        "update-stale",
        "test",
        "rename",
        "apply-renames",
        "nuke",
    ] {
        assert!(stdout.contains(command), "help should mention '{command}':\n{stdout}");
    }
}

#[test]
fn session_commands_fail_without_auth_file() {
    let dir = tempdir().unwrap();
    let config = scratch_config(dir.path());

    let mut cmd = Command::cargo_bin("gradescope-archiver").expect("Binary exists");
    cmd.arg("--config")
        .arg(config.path())
        .arg("list")
        .env_remove("GRADESCOPE_AUTH_FILE");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("authentication file"));
}

#[test]
fn nuke_requires_confirmation() {
    let dir = tempdir().unwrap();
    let config = scratch_config(dir.path());

    let mut cmd = Command::cargo_bin("gradescope-archiver").expect("Binary exists");
    cmd.arg("--config").arg(config.path()).arg("nuke");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--yes"));
}

#[test]
fn apply_renames_with_empty_state_is_a_clean_no_op() {
    let dir = tempdir().unwrap();
    let config = scratch_config(dir.path());

    let mut cmd = Command::cargo_bin("gradescope-archiver").expect("Binary exists");
    cmd.arg("--config").arg(config.path()).arg("apply-renames");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("attempted 0, succeeded 0, failed 0"));
}

#[test]
fn rename_of_unknown_course_reports_not_found() {
    let dir = tempdir().unwrap();
    let config = scratch_config(dir.path());

    let mut cmd = Command::cargo_bin("gradescope-archiver").expect("Binary exists");
    cmd.arg("--config")
        .arg(config.path())
        .args(["rename", "--course", "/courses/404", "--name", "Nothing"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Collects every emitted event's debug rendering.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{:?}", event));
    }
}

#[tokio::test]
async fn run_emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let _guard = tracing::subscriber::set_default(Registry::default().with(collector));

    use gradescope_archiver::cli::{run, Cli, Commands};

    let dir = tempdir().unwrap();
    let config = scratch_config(dir.path());
    let cli = Cli {
        config: Some(config.path().to_path_buf()),
        command: Commands::Nuke { yes: false },
    };

    assert!(run(cli).await.is_err(), "nuke without --yes must refuse");

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
