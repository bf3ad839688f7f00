// SPDX-License-Identifier: MIT

//! Deadline-driven reaper for expired completed jobs.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lp_core::{Clock, SharedJob};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::notifier::{JobStatusNotifier, Subscription};
use crate::repository::WeakRepository;

type NowFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

struct PrunerInner {
    repo: WeakRepository,
    retention: Duration,
    now: NowFn,
    /// At most one pending deadline per job id.
    pending: Mutex<HashMap<String, CancellationToken>>,
}

/// Removes completed jobs once their retention window elapses.
///
/// Subscribes globally to the status notifier. A terminal update arms a
/// one-shot deadline at `retention_reference + retention`; any further
/// update for the same job (terminal or not) cancels the previous deadline
/// first, so a status flap never leaves a stale prune event behind.
pub struct JobPruner {
    inner: Arc<PrunerInner>,
    _subscription: Subscription,
}

impl JobPruner {
    pub fn new(
        repo: WeakRepository,
        notifier: &JobStatusNotifier,
        retention: Duration,
        clock: impl Clock,
    ) -> Self {
        let inner = Arc::new(PrunerInner {
            repo,
            retention,
            now: Arc::new(move || clock.now()),
            pending: Mutex::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = notifier.subscribe_all(move |job| {
            if let Some(inner) = weak.upgrade() {
                PrunerInner::on_job_update(&inner, job);
            }
        });

        Self { inner, _subscription: subscription }
    }

    /// Prune the job immediately if its retention window has elapsed.
    /// Returns true when the job was removed. Used at startup for
    /// persisted jobs that expired while the plugin was down.
    pub fn prune_now(&self, job_id: &str) -> bool {
        PrunerInner::prune(&self.inner, job_id)
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

impl PrunerInner {
    fn on_job_update(inner: &Arc<Self>, job: &SharedJob) {
        let (job_id, terminal, reference) = {
            let guard = job.lock();
            (guard.id.clone(), guard.is_terminal(), guard.retention_reference())
        };

        let mut pending = inner.pending.lock();
        if let Some(previous) = pending.remove(&job_id) {
            previous.cancel();
        }
        if !terminal {
            return;
        }

        let deadline = reference.unwrap_or_else(|| (inner.now)()) + inner.retention;
        let token = CancellationToken::new();
        pending.insert(job_id.clone(), token.clone());
        drop(pending);

        let weak = Arc::downgrade(inner);
        tokio::spawn(async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let wait = (deadline - (inner.now)()).to_std().unwrap_or_default();
            drop(inner);

            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(wait) => {
                    if let Some(inner) = weak.upgrade() {
                        Self::prune(&inner, &job_id);
                    }
                }
            }
        });
    }

    /// Re-read the job and remove it if its (possibly refreshed) deadline
    /// has passed.
    fn prune(inner: &Arc<Self>, job_id: &str) -> bool {
        let Some(repo) = inner.repo.upgrade() else {
            return false;
        };
        let Some(job) = repo.get_job(job_id, &lp_core::User::all_users()) else {
            inner.pending.lock().remove(job_id);
            return false;
        };

        let expired = {
            let guard = job.lock();
            match guard.retention_reference() {
                Some(reference) => reference + inner.retention <= (inner.now)(),
                None => false,
            }
        };

        if expired {
            repo.remove_job(job_id);
            inner.pending.lock().remove(job_id);
            tracing::debug!(job_id, "pruned expired job");
        }
        expired
    }
}

#[cfg(test)]
#[path = "pruner_tests.rs"]
mod tests;
