// SPDX-License-Identifier: MIT

use super::*;
use lp_core::{JobStatus, User};

fn store(dir: &Path) -> LocalJobStore {
    LocalJobStore::new(dir, "worker-1", true)
}

fn job(id: &str) -> Job {
    Job::builder()
        .id(id)
        .user(User::named("alice"))
        .command("true")
        .status(JobStatus::Finished)
        .build()
}

#[test]
fn initialize_creates_per_host_directories() {
    let dir = tempfile::tempdir().unwrap();
    store(dir.path()).initialize().unwrap();

    assert!(dir.path().join("jobs/worker-1").is_dir());
    assert!(dir.path().join("output/worker-1").is_dir());
}

#[test]
fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    store.initialize().unwrap();

    store.save_job(&job("j-1")).unwrap();
    store.save_job(&job("j-2")).unwrap();

    let mut loaded = store.load_jobs().unwrap();
    loaded.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].id, "j-1");
    assert_eq!(loaded[0].status, JobStatus::Finished);
}

#[test]
fn save_leaves_no_temp_files_behind() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    store.initialize().unwrap();

    store.save_job(&job("j-1")).unwrap();

    let names: Vec<String> = std::fs::read_dir(dir.path().join("jobs/worker-1"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["j-1".to_string()]);
}

#[test]
fn unparsable_job_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    store.initialize().unwrap();

    store.save_job(&job("j-good")).unwrap();
    std::fs::write(dir.path().join("jobs/worker-1/j-bad"), "{not json").unwrap();
    // Valid JSON but an invalid job (both command and exe set).
    std::fs::write(
        dir.path().join("jobs/worker-1/j-conflict"),
        r#"{"id": "j-conflict", "command": "a", "exe": "b", "user": "alice"}"#,
    )
    .unwrap();

    let loaded = store.load_jobs().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, "j-good");
}

#[test]
fn loading_before_any_save_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    assert!(store(dir.path()).load_jobs().unwrap().is_empty());
}

#[test]
fn output_paths_are_assigned_only_when_both_are_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    store.initialize().unwrap();

    let mut fresh = job("j-1");
    fresh.stdout_file.clear();
    fresh.stderr_file.clear();
    store.set_job_output_paths(&mut fresh).unwrap();

    let expected_dir = dir.path().join("output/worker-1/j-1");
    assert!(expected_dir.is_dir());
    assert_eq!(fresh.stdout_file, expected_dir.join("stdout.log").to_string_lossy());
    assert_eq!(fresh.stderr_file, expected_dir.join("stderr.log").to_string_lossy());
    assert!(store.owns_output(&fresh));

    let mut custom = job("j-2");
    custom.stdout_file = "/home/alice/out.log".to_string();
    store.set_job_output_paths(&mut custom).unwrap();
    assert_eq!(custom.stdout_file, "/home/alice/out.log");
    assert!(custom.stderr_file.is_empty());
    assert!(!store.owns_output(&custom));
}

#[test]
fn output_assignment_is_disabled_with_the_option() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalJobStore::new(dir.path(), "worker-1", false);
    store.initialize().unwrap();

    let mut fresh = job("j-1");
    fresh.stdout_file.clear();
    store.set_job_output_paths(&mut fresh).unwrap();
    assert!(fresh.stdout_file.is_empty());
}

#[test]
fn delete_removes_the_file_and_owned_output() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    store.initialize().unwrap();

    let mut owned = job("j-1");
    owned.stdout_file.clear();
    owned.stderr_file.clear();
    store.set_job_output_paths(&mut owned).unwrap();
    store.save_job(&owned).unwrap();
    std::fs::write(&owned.stdout_file, "output\n").unwrap();

    store.delete_job(&owned);

    assert!(!store.job_file("j-1").exists());
    assert!(!store.output_dir("j-1").exists());
}

#[test]
fn delete_leaves_caller_owned_output_alone() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    store.initialize().unwrap();

    let outside = dir.path().join("user-output.log");
    std::fs::write(&outside, "precious\n").unwrap();

    let mut custom = job("j-2");
    custom.stdout_file = outside.to_string_lossy().into_owned();
    store.save_job(&custom).unwrap();

    store.delete_job(&custom);

    assert!(outside.exists(), "user-supplied output must never be deleted");
}
