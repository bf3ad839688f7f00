// SPDX-License-Identifier: MIT

//! Streaming subsystem: per-request stream bookkeeping for job status and
//! job output.

mod multi;
mod output;
mod status;

use std::collections::HashMap;
use std::sync::Arc;

use lp_core::User;
use lp_wire::{ErrorCode, JobTarget, OutputType, Response};
use parking_lot::Mutex;

use crate::channel::ResponseSender;
use crate::notifier::JobStatusNotifier;
use crate::repository::JobRepository;
use crate::source::JobSource;
use crate::SourceError;

use output::OutputStreamManager;
use status::{AllJobStatusStream, SingleJobStatusStream};

/// Front door for all stream requests.
///
/// Three registries, each behind its own mutex: per-job status streams,
/// the all-jobs status stream singleton, and output streams.
pub struct StreamManager {
    repo: JobRepository,
    notifier: JobStatusNotifier,
    sender: ResponseSender,
    job_streams: Mutex<HashMap<String, Arc<SingleJobStatusStream>>>,
    all_stream: Mutex<Option<Arc<AllJobStatusStream>>>,
    output: OutputStreamManager,
}

impl StreamManager {
    pub fn new(repo: JobRepository, notifier: JobStatusNotifier, sender: ResponseSender) -> Self {
        Self {
            output: OutputStreamManager::new(repo.clone(), notifier.clone(), sender.clone()),
            repo,
            notifier,
            sender,
            job_streams: Mutex::new(HashMap::new()),
            all_stream: Mutex::new(None),
        }
    }

    /// Handle a GetJobStatus request: start or cancel a status stream.
    pub fn handle_status_request(
        &self,
        request_id: u64,
        target: &JobTarget,
        user: &User,
        cancel: bool,
    ) {
        match target {
            JobTarget::All => self.handle_all_jobs_request(request_id, user, cancel),
            JobTarget::Id(job_id) => self.handle_job_request(request_id, job_id, user, cancel),
        }
    }

    fn handle_all_jobs_request(&self, request_id: u64, user: &User, cancel: bool) {
        let mut slot = self.all_stream.lock();
        if cancel {
            if let Some(stream) = slot.as_ref() {
                stream.remove_request(request_id);
                if stream.is_empty() {
                    *slot = None;
                }
            }
            return;
        }

        match slot.as_ref() {
            Some(stream) => stream.add_request(request_id, user),
            None => {
                let stream = AllJobStatusStream::new(self.repo.clone(), self.sender.clone());
                stream.add_request(request_id, user);
                stream.initialize(&self.notifier);
                *slot = Some(stream);
            }
        }
    }

    fn handle_job_request(&self, request_id: u64, job_id: &str, user: &User, cancel: bool) {
        let mut streams = self.job_streams.lock();
        if cancel {
            if let Some(stream) = streams.get(job_id) {
                stream.remove_request(request_id);
                if stream.is_empty() {
                    streams.remove(job_id);
                }
            }
            return;
        }

        // Verify visibility before registering anything.
        if self.repo.get_job(job_id, user).is_none() {
            self.sender.send(Response::error(
                request_id,
                ErrorCode::JobNotFound,
                SourceError::job_not_found(job_id, user).message,
            ));
            return;
        }

        match streams.get(job_id) {
            Some(stream) => stream.add_request(request_id),
            None => {
                let stream =
                    SingleJobStatusStream::new(job_id, self.repo.clone(), self.sender.clone());
                stream.add_request(request_id);
                stream.initialize(&self.notifier);
                streams.insert(job_id.to_string(), stream);
            }
        }
    }

    /// Handle a GetJobOutput request: open or cancel an output stream.
    pub fn handle_output_request(
        &self,
        source: &Arc<dyn JobSource>,
        request_id: u64,
        job_id: &str,
        user: &User,
        output_type: OutputType,
        cancel: bool,
    ) {
        self.output.handle_request(source, request_id, job_id, user, output_type, cancel);
    }

    #[cfg(test)]
    pub(crate) fn active_output_streams(&self) -> usize {
        self.output.active_count()
    }
}
