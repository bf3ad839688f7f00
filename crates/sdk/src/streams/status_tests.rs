// SPDX-License-Identifier: MIT

use super::*;
use crate::channel::ResponseSender;
use crate::repository::NullHooks;
use crate::streams::StreamManager;
use lp_core::{shared, FakeClock, Job, JobStatus};
use lp_wire::{ErrorCode, JobTarget, StreamSequence};

struct Fixture {
    manager: StreamManager,
    notifier: JobStatusNotifier,
    repo: JobRepository,
    rx: tokio::sync::mpsc::UnboundedReceiver<(u64, lp_wire::Response)>,
}

fn fixture() -> Fixture {
    let notifier = JobStatusNotifier::new(FakeClock::new());
    let repo = JobRepository::new(Arc::new(NullHooks), notifier.clone());
    let (sender, rx) = ResponseSender::capture();
    let manager = StreamManager::new(repo.clone(), notifier.clone(), sender);
    Fixture { manager, notifier, repo, rx }
}

fn add_job(repo: &JobRepository, id: &str, user: &str) -> lp_core::SharedJob {
    let job = shared(
        Job::builder()
            .id(id)
            .user(User::named(user))
            .command("true")
            .status(JobStatus::Pending)
            .build(),
    );
    repo.add_job(&job);
    job
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<(u64, lp_wire::Response)>) -> Vec<lp_wire::Response> {
    let mut out = Vec::new();
    while let Ok((_, response)) = rx.try_recv() {
        out.push(response);
    }
    out
}

fn sequences(response: &lp_wire::Response) -> Vec<StreamSequence> {
    match response {
        lp_wire::Response::JobStatus { sequences, .. } => sequences.clone(),
        other => panic!("expected a job status response, got {other:?}"),
    }
}

#[tokio::test]
async fn all_jobs_stream_replays_initial_state_per_visible_job() {
    let mut fx = fixture();
    add_job(&fx.repo, "j-1", "alice");
    add_job(&fx.repo, "j-2", "alice");
    add_job(&fx.repo, "j-3", "bob");

    fx.manager.handle_status_request(42, &JobTarget::All, &User::named("alice"), false);

    let responses = drain(&mut fx.rx);
    assert_eq!(responses.len(), 2, "one replay per visible job, bob's job filtered");
    for response in &responses {
        assert_eq!(sequences(response)[0].request_id, 42);
    }
    // Sequence ids are consecutive from 1 across the replays.
    let seq_ids: Vec<u64> = responses.iter().map(|r| sequences(r)[0].seq_id).collect();
    assert_eq!(seq_ids, vec![1, 2]);
}

#[tokio::test]
async fn newcomer_to_live_all_jobs_stream_gets_its_own_replay() {
    let mut fx = fixture();
    add_job(&fx.repo, "j-1", "alice");

    fx.manager.handle_status_request(1, &JobTarget::All, &User::named("alice"), false);
    drain(&mut fx.rx);

    fx.manager.handle_status_request(2, &JobTarget::All, &User::named("alice"), false);
    let responses = drain(&mut fx.rx);

    assert_eq!(responses.len(), 1);
    let seqs = sequences(&responses[0]);
    assert_eq!(seqs, vec![StreamSequence { request_id: 2, seq_id: 1 }]);
}

#[tokio::test]
async fn updates_fan_out_with_per_request_sequences() {
    let mut fx = fixture();
    let job = add_job(&fx.repo, "j-1", "alice");

    fx.manager.handle_status_request(1, &JobTarget::All, &User::named("alice"), false);
    fx.manager.handle_status_request(2, &JobTarget::All, &User::all_users(), false);
    drain(&mut fx.rx);

    fx.notifier.update_job(&job, JobStatus::Running, None, None);

    let responses = drain(&mut fx.rx);
    assert_eq!(responses.len(), 1);
    let seqs = sequences(&responses[0]);
    // Request 1 replayed once before (seq 1), so this update is its seq 2.
    assert!(seqs.contains(&StreamSequence { request_id: 1, seq_id: 2 }));
    assert!(seqs.contains(&StreamSequence { request_id: 2, seq_id: 2 }));
}

#[tokio::test]
async fn global_stream_never_leaks_other_users_jobs() {
    let mut fx = fixture();
    let bobs_job = add_job(&fx.repo, "j-bob", "bob");

    fx.manager.handle_status_request(7, &JobTarget::All, &User::named("alice"), false);
    drain(&mut fx.rx);

    fx.notifier.update_job(&bobs_job, JobStatus::Running, None, None);

    assert!(drain(&mut fx.rx).is_empty(), "alice must not observe bob's job");
}

#[tokio::test]
async fn cancel_removes_the_request_from_the_fan_out() {
    let mut fx = fixture();
    let job = add_job(&fx.repo, "j-1", "alice");

    fx.manager.handle_status_request(42, &JobTarget::All, &User::named("alice"), false);
    fx.manager.handle_status_request(43, &JobTarget::All, &User::named("alice"), false);
    drain(&mut fx.rx);

    fx.manager.handle_status_request(42, &JobTarget::All, &User::named("alice"), true);
    fx.notifier.update_job(&job, JobStatus::Running, None, None);

    let responses = drain(&mut fx.rx);
    assert_eq!(responses.len(), 1);
    let seqs = sequences(&responses[0]);
    assert!(seqs.iter().all(|s| s.request_id != 42), "42 must be gone from sequences");
    assert!(seqs.iter().any(|s| s.request_id == 43));
}

#[tokio::test]
async fn single_job_stream_replays_then_follows() {
    let mut fx = fixture();
    let job = add_job(&fx.repo, "j-1", "alice");

    let target = JobTarget::Id("j-1".to_string());
    fx.manager.handle_status_request(5, &target, &User::named("alice"), false);

    let replay = drain(&mut fx.rx);
    assert_eq!(replay.len(), 1);
    assert_eq!(sequences(&replay[0]), vec![StreamSequence { request_id: 5, seq_id: 1 }]);

    fx.notifier.update_job(&job, JobStatus::Running, None, None);
    let update = drain(&mut fx.rx);
    assert_eq!(sequences(&update[0]), vec![StreamSequence { request_id: 5, seq_id: 2 }]);
}

#[tokio::test]
async fn single_job_stream_rejects_unknown_or_foreign_jobs() {
    let mut fx = fixture();
    add_job(&fx.repo, "j-1", "bob");

    let target = JobTarget::Id("j-1".to_string());
    fx.manager.handle_status_request(5, &target, &User::named("alice"), false);

    let responses = drain(&mut fx.rx);
    assert_eq!(responses.len(), 1);
    match &responses[0] {
        lp_wire::Response::Error { request_id, code, .. } => {
            assert_eq!(*request_id, 5);
            assert_eq!(*code, ErrorCode::JobNotFound);
        }
        other => panic!("expected job-not-found, got {other:?}"),
    }

    // Nothing was registered: an update emits no stream response.
    let job = fx.repo.get_job("j-1", &User::all_users()).unwrap();
    fx.notifier.update_job(&job, JobStatus::Running, None, None);
    assert!(drain(&mut fx.rx).is_empty());
}

#[tokio::test]
async fn last_cancel_tears_the_single_stream_down() {
    let mut fx = fixture();
    let job = add_job(&fx.repo, "j-1", "alice");
    let target = JobTarget::Id("j-1".to_string());

    fx.manager.handle_status_request(5, &target, &User::named("alice"), false);
    drain(&mut fx.rx);
    fx.manager.handle_status_request(5, &target, &User::named("alice"), true);

    fx.notifier.update_job(&job, JobStatus::Running, None, None);
    assert!(drain(&mut fx.rx).is_empty(), "torn-down stream must not emit");
}
