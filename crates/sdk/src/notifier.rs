// SPDX-License-Identifier: MIT

//! Status-notification bus.
//!
//! Pub/sub keyed by job id plus a global "all jobs" scope. Publishing an
//! update mutates the job under its lock, then invokes every matching
//! subscriber synchronously on the caller's task, in registration order.
//! The registry lock is dropped before dispatch so a callback may itself
//! publish without deadlocking.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use lp_core::{Clock, JobStatus, SharedJob};
use parking_lot::Mutex;

/// Callback invoked with the updated job. Subscribers re-lock the job to
/// read anything beyond what they captured.
pub type StatusCallback = Arc<dyn Fn(&SharedJob) + Send + Sync>;

type NowFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: StatusCallback,
}

#[derive(Default)]
struct Registry {
    global: Vec<Subscriber>,
    per_job: HashMap<String, Vec<Subscriber>>,
}

struct NotifierInner {
    next_id: AtomicU64,
    registry: Mutex<Registry>,
    now: NowFn,
}

/// The process-wide job status bus.
#[derive(Clone)]
pub struct JobStatusNotifier {
    inner: Arc<NotifierInner>,
}

/// An active subscription. Dropping it unsubscribes.
pub struct Subscription {
    inner: Weak<NotifierInner>,
    job_id: Option<String>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut registry = inner.registry.lock();
        match &self.job_id {
            None => registry.global.retain(|s| s.id != self.id),
            Some(job_id) => {
                if let Some(list) = registry.per_job.get_mut(job_id) {
                    list.retain(|s| s.id != self.id);
                    if list.is_empty() {
                        registry.per_job.remove(job_id);
                    }
                }
            }
        }
    }
}

impl JobStatusNotifier {
    pub fn new(clock: impl Clock) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                next_id: AtomicU64::new(1),
                registry: Mutex::new(Registry::default()),
                now: Arc::new(move || clock.now()),
            }),
        }
    }

    /// Subscribe to updates for every job.
    pub fn subscribe_all(&self, callback: impl Fn(&SharedJob) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .registry
            .lock()
            .global
            .push(Subscriber { id, callback: Arc::new(callback) });
        Subscription { inner: Arc::downgrade(&self.inner), job_id: None, id }
    }

    /// Subscribe to updates for a single job id.
    pub fn subscribe_job(
        &self,
        job_id: &str,
        callback: impl Fn(&SharedJob) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .registry
            .lock()
            .per_job
            .entry(job_id.to_string())
            .or_default()
            .push(Subscriber { id, callback: Arc::new(callback) });
        Subscription { inner: Arc::downgrade(&self.inner), job_id: Some(job_id.to_string()), id }
    }

    /// Publish a status update.
    ///
    /// Mutates the job under its lock (terminal statuses are sticky: a
    /// terminal job keeps its status, though message, exit code, and
    /// last-update time may still settle), then dispatches to per-job
    /// subscribers followed by global subscribers.
    pub fn update_job(
        &self,
        job: &SharedJob,
        status: JobStatus,
        message: Option<String>,
        when: Option<DateTime<Utc>>,
    ) {
        let when = when.unwrap_or_else(|| (self.inner.now)());
        let job_id = {
            let mut guard = job.lock();
            if !guard.status.is_terminal() {
                guard.status = status;
            } else if guard.status != status {
                tracing::debug!(
                    job_id = %guard.id,
                    current = %guard.status,
                    requested = %status,
                    "ignoring status change for terminal job"
                );
            }
            if let Some(message) = message {
                guard.status_message = message;
            }
            guard.last_update_time = Some(when);
            guard.id.clone()
        };

        // Copy the subscriber lists under the registry lock, then dispatch
        // with no locks held.
        let callbacks: Vec<StatusCallback> = {
            let registry = self.inner.registry.lock();
            let per_job = registry.per_job.get(&job_id).into_iter().flatten();
            per_job
                .chain(registry.global.iter())
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };

        for callback in callbacks {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(job)));
            if result.is_err() {
                tracing::error!(job_id = %job_id, "job status subscriber panicked");
            }
        }
    }
}

#[cfg(test)]
#[path = "notifier_tests.rs"]
mod tests;
