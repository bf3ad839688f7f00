// SPDX-License-Identifier: MIT

use super::*;
use lp_core::{shared, HostMountSource, Job, JobStatus, MountSource, User};
use tokio::sync::mpsc;

#[derive(Debug)]
enum Event {
    Output(String, OutputKind),
    Complete,
    Error(String),
}

fn callbacks() -> (OutputCallbacks, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let out_tx = tx.clone();
    let done_tx = tx.clone();
    (
        OutputCallbacks {
            on_output: Arc::new(move |text, kind| {
                let _ = out_tx.send(Event::Output(text, kind));
            }),
            on_complete: Arc::new(move || {
                let _ = done_tx.send(Event::Complete);
            }),
            on_error: Arc::new(move |e| {
                let _ = tx.send(Event::Error(e.message));
            }),
        },
        rx,
    )
}

/// Stand-in sandbox: consumes any launch profile on stdin and the sandbox
/// flags, then execs the shell payload.
fn fake_sandbox(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("rsandbox");
    std::fs::write(
        &path,
        "#!/bin/sh\nread -r _profile\nwhile [ $# -gt 0 ] && [ \"$1\" != \"/bin/sh\" ]; do shift; done\nexec \"$@\"\n",
    )
    .unwrap();
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).unwrap();
    path
}

fn finished_job(stdout_file: &str, stderr_file: &str) -> SharedJob {
    shared(
        Job::builder()
            .id("j-1")
            .user(User::named("alice"))
            .command("true")
            .status(JobStatus::Finished)
            .stdout_file(stdout_file)
            .stderr_file(stderr_file)
            .build(),
    )
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for stream event")
        .expect("stream event channel closed")
}

#[tokio::test]
async fn completed_job_dump_delivers_output_then_complete() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = fake_sandbox(dir.path());
    let out = dir.path().join("stdout.log");
    std::fs::write(&out, "hello\n").unwrap();

    let job = finished_job(out.to_str().unwrap(), "");
    let (callbacks, mut rx) = callbacks();
    let stream = FileOutputStream::new(OutputType::Both, job, &sandbox, callbacks);
    stream.start().unwrap();

    match next_event(&mut rx).await {
        Event::Output(text, OutputKind::Stdout) => assert_eq!(text, "hello\n"),
        other => panic!("expected stdout output, got {other:?}"),
    }
    assert!(matches!(next_event(&mut rx).await, Event::Complete));
}

#[tokio::test]
async fn aliased_files_stream_as_mixed() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = fake_sandbox(dir.path());
    let both = dir.path().join("both.log");
    std::fs::write(&both, "mixed output\n").unwrap();

    let path = both.to_str().unwrap();
    let job = finished_job(path, path);
    let (callbacks, mut rx) = callbacks();
    let stream = FileOutputStream::new(OutputType::Both, job, &sandbox, callbacks);
    stream.start().unwrap();

    match next_event(&mut rx).await {
        Event::Output(text, OutputKind::Mixed) => assert_eq!(text, "mixed output\n"),
        other => panic!("expected mixed output, got {other:?}"),
    }
    assert!(matches!(next_event(&mut rx).await, Event::Complete));
}

#[tokio::test]
async fn separate_files_report_their_own_kinds() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = fake_sandbox(dir.path());
    let out = dir.path().join("out.log");
    let err = dir.path().join("err.log");
    std::fs::write(&out, "to stdout\n").unwrap();
    std::fs::write(&err, "to stderr\n").unwrap();

    let job = finished_job(out.to_str().unwrap(), err.to_str().unwrap());
    let (callbacks, mut rx) = callbacks();
    let stream = FileOutputStream::new(OutputType::Both, job, &sandbox, callbacks);
    stream.start().unwrap();

    let mut kinds = Vec::new();
    loop {
        match next_event(&mut rx).await {
            Event::Output(_, kind) => kinds.push(kind),
            Event::Complete => break,
            Event::Error(e) => panic!("unexpected stream error {e}"),
        }
    }
    kinds.sort_by_key(|kind| kind.to_string());
    assert_eq!(kinds, vec![OutputKind::Stderr, OutputKind::Stdout]);
}

#[tokio::test]
async fn stderr_only_stream_reads_the_error_file() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = fake_sandbox(dir.path());
    let err = dir.path().join("err.log");
    std::fs::write(&err, "oops\n").unwrap();

    let job = finished_job("", err.to_str().unwrap());
    let (callbacks, mut rx) = callbacks();
    let stream = FileOutputStream::new(OutputType::Stderr, job, &sandbox, callbacks);
    stream.start().unwrap();

    match next_event(&mut rx).await {
        Event::Output(text, OutputKind::Stderr) => assert_eq!(text, "oops\n"),
        other => panic!("expected stderr output, got {other:?}"),
    }
}

#[tokio::test]
async fn job_without_output_files_completes_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = fake_sandbox(dir.path());

    let job = finished_job("", "");
    let (callbacks, mut rx) = callbacks();
    let stream = FileOutputStream::new(OutputType::Both, job, &sandbox, callbacks);
    stream.start().unwrap();

    assert!(matches!(next_event(&mut rx).await, Event::Complete));
}

#[tokio::test]
async fn missing_file_reports_output_not_found_once() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = fake_sandbox(dir.path());

    let job = finished_job("/definitely/not/here.log", "");
    let (callbacks, mut rx) = callbacks();
    let stream = FileOutputStream::new(OutputType::Both, job, &sandbox, callbacks);
    stream.start().unwrap();

    match next_event(&mut rx).await {
        Event::Error(_) => {}
        other => panic!("expected an error, got {other:?}"),
    }
    // No complete (and no second error) follows a reported failure.
    assert!(
        tokio::time::timeout(Duration::from_millis(300), rx.recv()).await.is_err(),
        "nothing may follow the error"
    );
}

#[tokio::test]
async fn live_job_follows_appended_output_until_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = fake_sandbox(dir.path());
    let out = dir.path().join("stdout.log");
    std::fs::write(&out, "first\n").unwrap();

    let job = shared(
        Job::builder()
            .id("j-live")
            .user(User::named("alice"))
            .command("sleep 5")
            .status(JobStatus::Running)
            .stdout_file(out.to_str().unwrap())
            .build(),
    );

    let (callbacks, mut rx) = callbacks();
    let stream = FileOutputStream::new(OutputType::Both, job.clone(), &sandbox, callbacks);
    stream.start().unwrap();

    match next_event(&mut rx).await {
        Event::Output(text, _) => assert_eq!(text, "first\n"),
        other => panic!("expected output, got {other:?}"),
    }

    // Append while following.
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(&out).unwrap();
        writeln!(file, "second").unwrap();
    }
    match next_event(&mut rx).await {
        Event::Output(text, _) => assert_eq!(text, "second\n"),
        other => panic!("expected appended output, got {other:?}"),
    }

    // A stop on a still-running job terminates the tails immediately and
    // emits nothing further.
    stream.stop().await;
    assert!(tokio::time::timeout(Duration::from_millis(300), rx.recv()).await.is_err());
}

#[test]
fn host_mount_paths_are_rewritten() {
    let mounts = vec![Mount {
        mount_path: "/mnt/data".to_string(),
        read_only: false,
        source: MountSource::Host(HostMountSource { path: "/srv/data".to_string() }),
    }];

    assert_eq!(
        resolve_host_path("/mnt/data/logs/out.log", &mounts),
        Some(PathBuf::from("/srv/data/logs/out.log"))
    );
    assert_eq!(
        resolve_host_path("/elsewhere/out.log", &mounts),
        Some(PathBuf::from("/elsewhere/out.log"))
    );
    assert_eq!(resolve_host_path("", &mounts), None);
}
