// SPDX-License-Identifier: MIT

//! Authoritative in-memory job repository.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use lp_core::{shared, Clock, Job, SharedJob, User};
use parking_lot::{Mutex, RwLock};

use crate::notifier::{JobStatusNotifier, Subscription};
use crate::pruner::JobPruner;
use crate::SourceError;

/// Backend hooks driven by the repository.
///
/// `on_job_removed` runs while the repository write lock is held; hooks
/// must not call back into the repository.
pub trait RepositoryHooks: Send + Sync + 'static {
    fn on_initialize(&self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Load persisted jobs at initialization. These bypass `on_job_added`.
    fn load_jobs(&self) -> Result<Vec<Job>, SourceError> {
        Ok(Vec::new())
    }

    fn on_job_added(&self, _job: &SharedJob) {}

    fn on_job_removed(&self, _job: &SharedJob) {}

    /// Assign output paths for a job submitted without any.
    fn set_job_output_paths(&self, _job: &mut Job) -> Result<(), SourceError> {
        Ok(())
    }
}

/// No-op hooks for backends with nothing to persist.
pub struct NullHooks;

impl RepositoryHooks for NullHooks {}

struct RepoInner {
    jobs: RwLock<HashMap<String, SharedJob>>,
    hooks: Arc<dyn RepositoryHooks>,
    notifier: JobStatusNotifier,
    pruner: Mutex<Option<JobPruner>>,
    add_subscription: Mutex<Option<Subscription>>,
}

/// Process-wide mapping of job id to job, with user-scoped queries.
#[derive(Clone)]
pub struct JobRepository {
    inner: Arc<RepoInner>,
}

/// Non-owning repository handle, used to break reference cycles with the
/// pruner and the notifier subscription.
#[derive(Clone)]
pub struct WeakRepository(Weak<RepoInner>);

impl WeakRepository {
    pub fn upgrade(&self) -> Option<JobRepository> {
        self.0.upgrade().map(|inner| JobRepository { inner })
    }
}

impl JobRepository {
    pub fn new(hooks: Arc<dyn RepositoryHooks>, notifier: JobStatusNotifier) -> Self {
        Self {
            inner: Arc::new(RepoInner {
                jobs: RwLock::new(HashMap::new()),
                hooks,
                notifier,
                pruner: Mutex::new(None),
                add_subscription: Mutex::new(None),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakRepository {
        WeakRepository(Arc::downgrade(&self.inner))
    }

    /// Insert a job if absent and run the backend add hook. No-op when the
    /// id is already present.
    pub fn add_job(&self, job: &SharedJob) {
        let id = job.lock().id.clone();
        let mut jobs = self.inner.jobs.write();
        if !jobs.contains_key(&id) {
            jobs.insert(id, Arc::clone(job));
            self.inner.hooks.on_job_added(job);
        }
    }

    /// Case-sensitive lookup, scoped to `user` unless it is all-users.
    pub fn get_job(&self, job_id: &str, user: &User) -> Option<SharedJob> {
        let jobs = self.inner.jobs.read();
        let job = jobs.get(job_id)?;
        if user.is_all_users() || job.lock().user == *user {
            Some(Arc::clone(job))
        } else {
            None
        }
    }

    /// Every job visible to `user`. Order is not guaranteed.
    pub fn get_jobs(&self, user: &User) -> Vec<SharedJob> {
        let jobs = self.inner.jobs.read();
        jobs.values()
            .filter(|job| user.is_all_users() || job.lock().user == *user)
            .map(Arc::clone)
            .collect()
    }

    /// Remove a job, running the backend removal hook under the write lock.
    pub fn remove_job(&self, job_id: &str) {
        let mut jobs = self.inner.jobs.write();
        if let Some(job) = jobs.get(job_id) {
            self.inner.hooks.on_job_removed(job);
            jobs.remove(job_id);
        }
    }

    pub fn set_job_output_paths(&self, job: &mut Job) -> Result<(), SourceError> {
        self.inner.hooks.set_job_output_paths(job)
    }

    /// Bring the repository up: run the backend init hook, load persisted
    /// jobs (bypassing the add hook), subscribe to the notifier so any
    /// update for an unknown job auto-inserts it, construct the pruner, and
    /// offer every loaded job to it so already-expired jobs are deleted
    /// here.
    pub fn initialize(
        &self,
        retention: chrono::Duration,
        clock: impl Clock,
    ) -> Result<(), SourceError> {
        self.inner.hooks.on_initialize()?;

        let loaded = self.inner.hooks.load_jobs()?;
        let loaded_ids: Vec<String> = loaded.iter().map(|job| job.id.clone()).collect();
        {
            let mut jobs = self.inner.jobs.write();
            for job in loaded {
                jobs.insert(job.id.clone(), shared(job));
            }
        }

        let weak = self.downgrade();
        let subscription = self.inner.notifier.subscribe_all(move |job| {
            if let Some(repo) = weak.upgrade() {
                repo.add_job(job);
            }
        });
        *self.inner.add_subscription.lock() = Some(subscription);

        let pruner = JobPruner::new(self.downgrade(), &self.inner.notifier, retention, clock);
        let mut pruned = 0usize;
        for id in &loaded_ids {
            if pruner.prune_now(id) {
                pruned += 1;
            }
        }
        tracing::info!(loaded = loaded_ids.len(), pruned, "job repository initialized");
        *self.inner.pruner.lock() = Some(pruner);

        Ok(())
    }
}

#[cfg(test)]
#[path = "repository_tests.rs"]
mod tests;
