use chrono::{Duration, Utc};
use gradescope_archiver_core::config::ArchiveConfig;
use gradescope_archiver_core::contract::{
    AssignmentRow, CourseCard, FetchResponse, MockSession, MockVcsHost, PageLink, ToolError,
};
use gradescope_archiver_core::repository::RepositorySync;
use gradescope_archiver_core::synchronise::{apply_pending_renames, nuke, Archiver};
use std::collections::HashMap;
use tempfile::{tempdir, TempDir};

fn test_config(dir: &TempDir) -> ArchiveConfig {
    ArchiveConfig {
        output_dir: dir.path().join("archive"),
        state_file: dir.path().join("courses.json"),
        ignore_file: dir.path().join("ignore_courses.json"),
        request_delay_ms: 0,
        retry_delay_ms: 0,
        keep_local: true,
        ..ArchiveConfig::default()
    }
}

fn card(id: u32, name: &str) -> CourseCard {
    CourseCard {
        url: format!("/courses/{id}"),
        display_name: name.to_string(),
        short_name: String::new(),
        term: "Fall 2024".to_string(),
    }
}

fn row(name: &str, url: &str, status: &str) -> AssignmentRow {
    AssignmentRow {
        name: name.to_string(),
        url: url.to_string(),
        status_text: status.to_string(),
    }
}

fn pdf_link(href: &str) -> PageLink {
    PageLink {
        href: Some(href.to_string()),
        text: "Submission".to_string(),
        has_download_attr: false,
        locator: href.to_string(),
    }
}

fn ok(body: &[u8]) -> FetchResponse {
    FetchResponse {
        status: 200,
        headers: HashMap::new(),
        body: body.to_vec(),
    }
}

/// A host on which every command succeeds.
fn healthy_vcs() -> MockVcsHost {
    let mut vcs = MockVcsHost::new();
    vcs.expect_has_vcs_root().returning(|_| false);
    vcs.expect_init().returning(|_| Ok(()));
    vcs.expect_stage_all().returning(|_| Ok(()));
    vcs.expect_has_changes().returning(|_| Ok(true));
    vcs.expect_commit().returning(|_, _| Ok(()));
    vcs.expect_list_remotes().returning(|_| Ok(vec![]));
    vcs.expect_create_remote_repository().returning(|_, _, _| Ok(()));
    vcs.expect_rename_branch().returning(|_, _| Ok(()));
    vcs.expect_force_push().returning(|_, _, _| Ok(()));
    vcs
}

#[tokio::test]
async fn only_eligible_assignment_is_archived() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);

    let mut session = MockSession::new();
    session
        .expect_list_course_cards()
        .returning(|| Ok(vec![card(1, "CS 101")]));
    session
        .expect_list_assignment_rows()
        .withf(|url| url == "/courses/1")
        .returning(|_| {
            Ok(vec![
                row("HW 1", "/courses/1/assignments/10/submissions/100", "Graded"),
                row("HW 2", "/courses/1/assignments/11/submissions/101", "Ungraded"),
            ])
        });
    session
        .expect_open_assignment()
        .withf(|url| url == "/courses/1/assignments/10/submissions/100")
        .times(1)
        .returning(|_| Ok(vec![pdf_link("/files/hw1.pdf")]));
    session
        .expect_fetch_authenticated()
        .times(1)
        .returning(|_| Ok(ok(b"%PDF-1.4")));

    let vcs = healthy_vcs();
    let archiver = Archiver::new(&session, &vcs, &config);
    let report = archiver.download_all().await.unwrap();

    assert_eq!((report.attempted, report.succeeded, report.failed), (1, 1, 0));
    let course_dir = config.output_dir.join("CS 101");
    assert!(course_dir.join("HW1/hw1.pdf").exists());
    assert!(!course_dir.join("HW2").exists());

    let record = archiver.store().get("/courses/1").unwrap();
    assert_eq!(record.github_repo, "CS-101");
}

#[tokio::test]
async fn failing_course_does_not_abort_the_batch() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);

    let mut session = MockSession::new();
    session
        .expect_list_course_cards()
        .returning(|| Ok(vec![card(1, "Broken"), card(2, "Works")]));
    session
        .expect_list_assignment_rows()
        .withf(|url| url == "/courses/1")
        .returning(|_| Err("page did not load".into()));
    session
        .expect_list_assignment_rows()
        .withf(|url| url == "/courses/2")
        .returning(|_| Ok(vec![row("Lab", "/courses/2/assignments/1/submissions/9", "9 / 10")]));
    session
        .expect_open_assignment()
        .returning(|_| Ok(vec![pdf_link("/files/lab.pdf")]));
    session
        .expect_fetch_authenticated()
        .returning(|_| Ok(ok(b"%PDF")));

    let vcs = healthy_vcs();
    let archiver = Archiver::new(&session, &vcs, &config);
    let report = archiver.download_all().await.unwrap();

    assert_eq!((report.attempted, report.succeeded, report.failed), (2, 1, 1));
    assert_eq!(report.failures[0].0, "/courses/1");
    assert!(archiver.store().get("/courses/1").unwrap().bound_repository().is_none());
    assert_eq!(archiver.store().get("/courses/2").unwrap().github_repo, "Works");
}

#[tokio::test]
async fn push_failure_leaves_course_stale_and_local_copy_in_place() {
    let dir = tempdir().unwrap();
    let config = ArchiveConfig {
        keep_local: false,
        ..test_config(&dir)
    };

    let mut session = MockSession::new();
    session
        .expect_list_course_cards()
        .returning(|| Ok(vec![card(1, "CS 101")]));
    session
        .expect_list_assignment_rows()
        .returning(|_| Ok(vec![row("HW 1", "/courses/1/assignments/10/submissions/100", "Graded")]));
    session
        .expect_open_assignment()
        .returning(|_| Ok(vec![pdf_link("/files/hw1.pdf")]));
    session
        .expect_fetch_authenticated()
        .returning(|_| Ok(ok(b"%PDF")));

    let mut vcs = MockVcsHost::new();
    vcs.expect_has_vcs_root().returning(|_| false);
    vcs.expect_init().returning(|_| Ok(()));
    vcs.expect_stage_all().returning(|_| Ok(()));
    vcs.expect_has_changes().returning(|_| Ok(true));
    vcs.expect_commit().returning(|_, _| Ok(()));
    vcs.expect_list_remotes().returning(|_| Ok(vec![]));
    vcs.expect_create_remote_repository()
        .returning(|_, _, _| Err(ToolError::Failed("HTTP 401: Bad credentials".to_string())));

    let archiver = Archiver::new(&session, &vcs, &config);
    archiver.refresh_courses().await.unwrap();
    let two_days_ago = Utc::now() - Duration::hours(48);
    let mut map = archiver.store().load();
    map.get_mut("/courses/1").unwrap().timestamp = two_days_ago;
    archiver.store().save(&map).unwrap();

    let report = archiver.download_all().await.unwrap();
    assert_eq!(report.failed, 1);

    assert!(config.output_dir.join("CS 101/HW1/hw1.pdf").exists());
    let record = archiver.store().get("/courses/1").unwrap();
    assert!(record.bound_repository().is_none());
    assert_eq!(record.timestamp.timestamp(), two_days_ago.timestamp());
}

#[tokio::test]
async fn update_stale_skips_fresh_courses() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);

    let mut session = MockSession::new();
    session
        .expect_list_course_cards()
        .returning(|| Ok(vec![card(1, "Fresh"), card(2, "Old")]));
    session
        .expect_list_assignment_rows()
        .withf(|url| url == "/courses/2")
        .times(1)
        .returning(|_| Ok(vec![]));

    let vcs = MockVcsHost::new();
    let archiver = Archiver::new(&session, &vcs, &config);
    archiver.refresh_courses().await.unwrap();

    let mut map = archiver.store().load();
    map.get_mut("/courses/2").unwrap().timestamp = Utc::now() - Duration::hours(25);
    archiver.store().save(&map).unwrap();

    let report = archiver.update_stale(Utc::now()).await.unwrap();
    assert_eq!((report.attempted, report.succeeded), (1, 1));

    let refreshed = archiver.store().get("/courses/2").unwrap();
    assert!(Utc::now() - refreshed.timestamp < Duration::minutes(1));
}

#[tokio::test]
async fn ignored_courses_are_never_recorded() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    std::fs::write(&config.ignore_file, r#"["Sandbox"]"#).unwrap();

    let mut session = MockSession::new();
    session
        .expect_list_course_cards()
        .returning(|| Ok(vec![card(1, "CS 101"), card(2, "Instructor Sandbox"), card(1, "CS 101 duplicate")]));

    let vcs = MockVcsHost::new();
    let archiver = Archiver::new(&session, &vcs, &config);
    let refresh = archiver.refresh_courses().await.unwrap();

    assert_eq!(refresh.added, 1);
    assert_eq!(refresh.discovered.len(), 1);
    assert_eq!(refresh.courses["/courses/1"].full_name, "CS 101");
}

#[tokio::test]
async fn pending_renames_are_applied_in_batch() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);

    let mut session = MockSession::new();
    session
        .expect_list_course_cards()
        .returning(|| Ok(vec![card(1, "CS 101"), card(2, "CS 102")]));

    let mut vcs = MockVcsHost::new();
    vcs.expect_current_user().returning(|_| Ok("octo".to_string()));
    vcs.expect_rename_remote_repository()
        .withf(|_, full, new| full == "octo/CS-101" && new == "Intro-to-CS")
        .times(1)
        .returning(|_, _, _| Ok(()));

    let archiver = Archiver::new(&session, &vcs, &config);
    archiver.refresh_courses().await.unwrap();
    let mut map = archiver.store().load();
    let record = map.get_mut("/courses/1").unwrap();
    record.github_repo = "CS-101".to_string();
    record.rename = "Intro to CS".to_string();
    archiver.store().save(&map).unwrap();

    let report = apply_pending_renames(&RepositorySync::new(&vcs, &config), archiver.store());

    assert_eq!((report.attempted, report.succeeded), (1, 1));
    let record = archiver.store().get("/courses/1").unwrap();
    assert_eq!(record.full_name, "Intro to CS");
    assert!(record.pending_rename().is_none());
    assert_eq!(archiver.store().get("/courses/2").unwrap().full_name, "CS 102");
}

#[tokio::test]
async fn nuke_reports_per_course_outcomes() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);

    let mut session = MockSession::new();
    session
        .expect_list_course_cards()
        .returning(|| Ok(vec![card(1, "CS 101"), card(2, "CS 102")]));

    let mut vcs = MockVcsHost::new();
    vcs.expect_current_user().returning(|_| Ok("octo".to_string()));
    vcs.expect_delete_remote_repository().returning(|_, full| {
        if full == "octo/CS-101" {
            Ok(())
        } else {
            Err(ToolError::Failed("HTTP 403: Must have admin rights to Repository.".to_string()))
        }
    });

    let archiver = Archiver::new(&session, &vcs, &config);
    archiver.refresh_courses().await.unwrap();
    archiver.store().bind_repository("/courses/1", "CS-101").unwrap();
    archiver.store().bind_repository("/courses/2", "CS-102").unwrap();

    let report = nuke(&RepositorySync::new(&vcs, &config), archiver.store()).unwrap();

    assert_eq!((report.attempted, report.succeeded, report.failed), (2, 1, 1));
    assert_eq!(report.failures[0].0, "/courses/2");
    assert!(archiver.store().get("/courses/1").unwrap().bound_repository().is_none());
    assert_eq!(archiver.store().get("/courses/2").unwrap().github_repo, "CS-102");
}

#[tokio::test]
async fn course_with_no_downloaded_files_creates_no_repository() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);

    let mut session = MockSession::new();
    session
        .expect_list_course_cards()
        .returning(|| Ok(vec![card(1, "CS 101")]));
    session
        .expect_list_assignment_rows()
        .returning(|_| Ok(vec![row("HW 1", "/courses/1/assignments/10/submissions/100", "Graded")]));
    session.expect_open_assignment().returning(|_| Ok(vec![]));
    session.expect_fetch_authenticated().times(1).returning(|_| {
        Ok(FetchResponse {
            status: 404,
            ..Default::default()
        })
    });

    let mut vcs = MockVcsHost::new();
    vcs.expect_has_vcs_root().returning(|_| false);
    vcs.expect_init().never();
    vcs.expect_create_remote_repository().never();
    vcs.expect_force_push().never();

    let archiver = Archiver::new(&session, &vcs, &config);
    archiver.refresh_courses().await.unwrap();
    let mut map = archiver.store().load();
    map.get_mut("/courses/1").unwrap().timestamp = Utc::now() - Duration::hours(48);
    archiver.store().save(&map).unwrap();

    let report = archiver.update_stale(Utc::now()).await.unwrap();

    assert_eq!((report.attempted, report.succeeded, report.failed), (1, 1, 0));
    let record = archiver.store().get("/courses/1").unwrap();
    assert!(record.bound_repository().is_none());
    assert!(Utc::now() - record.timestamp < Duration::minutes(1));
}
