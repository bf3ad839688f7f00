// SPDX-License-Identifier: MIT

use super::*;
use lp_core::{FakeClock, JobStatus};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Hooks that record every callback for assertions.
struct RecordingHooks {
    loaded: Vec<Job>,
    added: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    initialized: AtomicUsize,
}

impl RecordingHooks {
    fn new(loaded: Vec<Job>) -> Arc<Self> {
        Arc::new(Self {
            loaded,
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            initialized: AtomicUsize::new(0),
        })
    }
}

impl RepositoryHooks for RecordingHooks {
    fn on_initialize(&self) -> Result<(), SourceError> {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_jobs(&self) -> Result<Vec<Job>, SourceError> {
        Ok(self.loaded.clone())
    }

    fn on_job_added(&self, job: &SharedJob) {
        self.added.lock().push(job.lock().id.clone());
    }

    fn on_job_removed(&self, job: &SharedJob) {
        self.removed.lock().push(job.lock().id.clone());
    }
}

fn job_for(id: &str, user: &str) -> Job {
    Job::builder().id(id).user(User::named(user)).command("true").build()
}

#[test]
fn add_is_idempotent_and_runs_the_hook_once() {
    let hooks = RecordingHooks::new(Vec::new());
    let repo =
        JobRepository::new(Arc::clone(&hooks) as Arc<dyn RepositoryHooks>, test_notifier());

    let job = shared(job_for("j-1", "alice"));
    repo.add_job(&job);
    repo.add_job(&job);

    assert_eq!(repo.get_jobs(&User::all_users()).len(), 1);
    assert_eq!(hooks.added.lock().as_slice(), &["j-1".to_string()]);
}

#[test]
fn get_job_is_user_scoped() {
    let repo = JobRepository::new(Arc::new(NullHooks), test_notifier());
    repo.add_job(&shared(job_for("j-1", "alice")));

    assert!(repo.get_job("j-1", &User::named("alice")).is_some());
    assert!(repo.get_job("j-1", &User::all_users()).is_some());
    assert!(repo.get_job("j-1", &User::named("bob")).is_none());
    assert!(repo.get_job("J-1", &User::named("alice")).is_none(), "id match is case-sensitive");
}

#[test]
fn get_jobs_filters_by_owner() {
    let repo = JobRepository::new(Arc::new(NullHooks), test_notifier());
    repo.add_job(&shared(job_for("j-1", "alice")));
    repo.add_job(&shared(job_for("j-2", "bob")));

    assert_eq!(repo.get_jobs(&User::named("alice")).len(), 1);
    assert_eq!(repo.get_jobs(&User::all_users()).len(), 2);
}

#[test]
fn remove_runs_the_hook_then_deletes() {
    let hooks = RecordingHooks::new(Vec::new());
    let repo =
        JobRepository::new(Arc::clone(&hooks) as Arc<dyn RepositoryHooks>, test_notifier());
    repo.add_job(&shared(job_for("j-1", "alice")));

    repo.remove_job("j-1");
    repo.remove_job("j-1"); // second removal is a no-op

    assert!(repo.get_job("j-1", &User::all_users()).is_none());
    assert_eq!(hooks.removed.lock().as_slice(), &["j-1".to_string()]);
}

#[tokio::test]
async fn initialize_loads_jobs_without_the_add_hook() {
    let hooks = RecordingHooks::new(vec![job_for("j-1", "alice")]);
    let repo =
        JobRepository::new(Arc::clone(&hooks) as Arc<dyn RepositoryHooks>, test_notifier());

    repo.initialize(chrono::Duration::hours(24), FakeClock::new()).unwrap();

    assert_eq!(hooks.initialized.load(Ordering::SeqCst), 1);
    assert!(repo.get_job("j-1", &User::named("alice")).is_some());
    assert!(hooks.added.lock().is_empty(), "loaded jobs bypass on_job_added");
}

#[tokio::test]
async fn initialize_prunes_already_expired_jobs() {
    let clock = FakeClock::new();
    let mut expired = job_for("j-old", "alice");
    expired.status = JobStatus::Finished;
    expired.last_update_time = Some(clock.now() - chrono::Duration::hours(48));

    let hooks = RecordingHooks::new(vec![expired]);
    let repo =
        JobRepository::new(Arc::clone(&hooks) as Arc<dyn RepositoryHooks>, test_notifier());

    repo.initialize(chrono::Duration::hours(24), clock).unwrap();

    assert!(repo.get_job("j-old", &User::all_users()).is_none());
    assert_eq!(hooks.removed.lock().as_slice(), &["j-old".to_string()]);
}

#[tokio::test]
async fn status_updates_auto_insert_unknown_jobs() {
    let notifier = test_notifier();
    let hooks = RecordingHooks::new(Vec::new());
    let repo = JobRepository::new(Arc::clone(&hooks) as Arc<dyn RepositoryHooks>, notifier.clone());
    repo.initialize(chrono::Duration::hours(24), FakeClock::new()).unwrap();

    let job = shared(job_for("j-new", "alice"));
    notifier.update_job(&job, JobStatus::Pending, None, None);

    assert!(repo.get_job("j-new", &User::named("alice")).is_some());
    assert_eq!(hooks.added.lock().as_slice(), &["j-new".to_string()]);
}

fn test_notifier() -> JobStatusNotifier {
    JobStatusNotifier::new(FakeClock::new())
}
