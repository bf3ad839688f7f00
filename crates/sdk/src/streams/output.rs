// SPDX-License-Identifier: MIT

//! Output-stream bookkeeping: one single-subscriber stream per request id.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use lp_core::{JobStatus, SharedJob, User};
use lp_wire::{ErrorCode, OutputKind, OutputType, Response};
use parking_lot::Mutex;
use tracing::debug;

use crate::channel::ResponseSender;
use crate::notifier::{JobStatusNotifier, Subscription};
use crate::repository::JobRepository;
use crate::source::{JobSource, OutputCallbacks, OutputStream};
use crate::SourceError;

struct OutputEntry {
    stream: Arc<dyn OutputStream>,
    started: bool,
    next_seq: u64,
    _subscription: Option<Subscription>,
}

struct OutputInner {
    repo: JobRepository,
    notifier: JobStatusNotifier,
    sender: ResponseSender,
    entries: Mutex<HashMap<u64, OutputEntry>>,
}

/// Manages the `RequestId -> OutputStream` registry.
///
/// Streams for Pending jobs are created but not started; the first
/// non-Pending status observation starts them, and a terminal status stops
/// them, emits the final `complete` response, and drops them.
pub struct OutputStreamManager {
    inner: Arc<OutputInner>,
}

impl OutputStreamManager {
    pub fn new(repo: JobRepository, notifier: JobStatusNotifier, sender: ResponseSender) -> Self {
        Self {
            inner: Arc::new(OutputInner {
                repo,
                notifier,
                sender,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn handle_request(
        &self,
        source: &Arc<dyn JobSource>,
        request_id: u64,
        job_id: &str,
        user: &User,
        output_type: OutputType,
        cancel: bool,
    ) {
        let inner = &self.inner;
        let mut entries = inner.entries.lock();

        if let Some(entry) = entries.get(&request_id) {
            if cancel {
                let stream = Arc::clone(&entry.stream);
                entries.remove(&request_id);
                tokio::spawn(async move { stream.stop().await });
            } else {
                debug!(request_id, job_id, "duplicate output stream request");
            }
            return;
        }
        if cancel {
            return;
        }

        let Some(job) = inner.repo.get_job(job_id, user) else {
            inner.sender.send(Response::error(
                request_id,
                ErrorCode::JobNotFound,
                SourceError::job_not_found(job_id, user).message,
            ));
            return;
        };

        let stream = match source.create_output_stream(
            output_type,
            &job,
            Self::callbacks(Arc::downgrade(inner), request_id),
        ) {
            Ok(stream) => stream,
            Err(e) => {
                inner.sender.send(Response::error(request_id, ErrorCode::JobOutputNotFound, e.message));
                return;
            }
        };

        let mut entry =
            OutputEntry { stream: Arc::clone(&stream), started: false, next_seq: 1, _subscription: None };

        // Defer the start while the job is still Pending.
        if job.lock().status != JobStatus::Pending {
            if let Err(e) = stream.start() {
                inner.sender.send(Response::error(request_id, ErrorCode::JobOutputNotFound, e.message));
                return;
            }
            entry.started = true;
        }

        let weak = Arc::downgrade(inner);
        entry._subscription = Some(inner.notifier.subscribe_job(job_id, move |job| {
            OutputInner::on_job_status(&weak, request_id, job);
        }));
        entries.insert(request_id, entry);
    }

    fn callbacks(weak: Weak<OutputInner>, request_id: u64) -> OutputCallbacks {
        let on_output = {
            let weak = weak.clone();
            Arc::new(move |output: String, kind: OutputKind| {
                OutputInner::on_output(&weak, request_id, output, kind);
            })
        };
        let on_complete = {
            let weak = weak.clone();
            Arc::new(move || OutputInner::finish(&weak, request_id))
        };
        let on_error = Arc::new(move |error: SourceError| {
            OutputInner::on_error(&weak, request_id, error);
        });
        OutputCallbacks { on_output, on_complete, on_error }
    }

    #[cfg(test)]
    pub(crate) fn active_count(&self) -> usize {
        self.inner.entries.lock().len()
    }
}

impl OutputInner {
    fn on_job_status(weak: &Weak<Self>, request_id: u64, job: &SharedJob) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let mut entries = inner.entries.lock();
        let Some(entry) = entries.get_mut(&request_id) else {
            return;
        };

        let (start_now, close) = {
            let guard = job.lock();
            (!entry.started && guard.status != JobStatus::Pending, guard.is_terminal())
        };

        if start_now {
            match entry.stream.start() {
                Ok(()) => entry.started = true,
                Err(e) => {
                    entries.remove(&request_id);
                    inner.sender.send(Response::error(
                        request_id,
                        ErrorCode::JobOutputNotFound,
                        e.message,
                    ));
                    return;
                }
            }
        }

        if close {
            // Stop may drain trailing output before returning; the final
            // complete response follows once it has.
            let stream = Arc::clone(&entry.stream);
            drop(entries);
            let weak = weak.clone();
            tokio::spawn(async move {
                stream.stop().await;
                Self::finish(&weak, request_id);
            });
        }
    }

    fn on_output(weak: &Weak<Self>, request_id: u64, output: String, kind: OutputKind) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let mut entries = inner.entries.lock();
        let Some(entry) = entries.get_mut(&request_id) else {
            return;
        };
        let seq_id = entry.next_seq;
        entry.next_seq += 1;
        inner.sender.send(Response::output_chunk(request_id, seq_id, output, kind));
    }

    /// Emit the final `complete` response and drop the stream. Idempotent:
    /// both the stream's own completion and the terminal-status close path
    /// funnel here.
    fn finish(weak: &Weak<Self>, request_id: u64) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let mut entries = inner.entries.lock();
        let Some(entry) = entries.remove(&request_id) else {
            return;
        };
        inner.sender.send(Response::output_complete(request_id, entry.next_seq));
    }

    fn on_error(weak: &Weak<Self>, request_id: u64, error: SourceError) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let mut entries = inner.entries.lock();
        if entries.remove(&request_id).is_some() {
            inner.sender.send(Response::error(request_id, ErrorCode::JobOutputNotFound, error.message));
        }
    }
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
