// SPDX-License-Identifier: MIT

//! Plugin runtime: wires the channel, repository, notifier, and streams
//! together and dispatches every launcher request.

use std::sync::Arc;
use std::time::Duration;

use lp_core::{shared, Clock, Job};
use lp_wire::{ErrorCode, JobFilters, JobTarget, Request, Response, Version};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::{RequestHandler, ResponseSender};
use crate::notifier::JobStatusNotifier;
use crate::repository::{JobRepository, RepositoryHooks};
use crate::source::JobSource;
use crate::streams::StreamManager;
use crate::SourceError;

/// The launcher plugin API version implemented by this SDK.
pub const API_VERSION: Version = Version::new(1, 2, 0);

struct PluginInner {
    source: Arc<dyn JobSource>,
    repo: JobRepository,
    streams: StreamManager,
    sender: ResponseSender,
    heartbeat: Mutex<Option<CancellationToken>>,
}

/// The plugin runtime.
#[derive(Clone)]
pub struct Plugin {
    inner: Arc<PluginInner>,
}

impl Plugin {
    pub fn new(
        source: Arc<dyn JobSource>,
        hooks: Arc<dyn RepositoryHooks>,
        notifier: JobStatusNotifier,
        sender: ResponseSender,
    ) -> Self {
        let repo = JobRepository::new(hooks, notifier.clone());
        let streams = StreamManager::new(repo.clone(), notifier, sender.clone());
        Self {
            inner: Arc::new(PluginInner {
                source,
                repo,
                streams,
                sender,
                heartbeat: Mutex::new(None),
            }),
        }
    }

    pub fn repository(&self) -> &JobRepository {
        &self.inner.repo
    }

    /// Initialize the repository (loading persisted jobs and arming the
    /// pruner) and start the heartbeat timer. Called once before the
    /// channel starts delivering requests.
    pub fn initialize(
        &self,
        retention: chrono::Duration,
        heartbeat_interval: Duration,
        clock: impl Clock,
    ) -> Result<(), SourceError> {
        self.inner.repo.initialize(retention, clock)?;
        if !heartbeat_interval.is_zero() {
            self.start_heartbeat(heartbeat_interval);
        }
        Ok(())
    }

    /// The request handler to install on the launcher channel. Spawns one
    /// task per request on the shared runtime.
    pub fn handler(&self) -> RequestHandler {
        let plugin = self.clone();
        Arc::new(move |request| {
            let plugin = plugin.clone();
            tokio::spawn(async move { plugin.dispatch(request).await });
        })
    }

    /// Stop the heartbeat timer. The channel is stopped separately so its
    /// pending writes still drain.
    pub fn shutdown(&self) {
        if let Some(token) = self.inner.heartbeat.lock().take() {
            token.cancel();
        }
    }

    /// Handle one request. Any handler error becomes an error response;
    /// requests are never silently swallowed.
    pub async fn dispatch(&self, request: Request) {
        let request_id = request.request_id();
        if let Err(e) = self.handle(request).await {
            self.inner.sender.send(Response::error(request_id, e.code, e.message));
        }
    }

    fn start_heartbeat(&self, interval: Duration) {
        let token = CancellationToken::new();
        let stop = token.clone();
        let sender = self.inner.sender.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the zeroth tick fires immediately
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => sender.send(Response::Heartbeat),
                }
            }
        });
        *self.inner.heartbeat.lock() = Some(token);
    }

    async fn handle(&self, request: Request) -> Result<(), SourceError> {
        let inner = &self.inner;
        match request {
            Request::Heartbeat { .. } => {
                // If the launcher dies, the plugin dies with its stdio.
                debug!("received heartbeat from launcher");
                Ok(())
            }

            Request::Bootstrap { request_id, version } => {
                if version.major != API_VERSION.major {
                    inner.sender.send(Response::error(
                        request_id,
                        ErrorCode::UnsupportedVersion,
                        format!(
                            "The plugin supports API version {}.X.X; the launcher requested {version}",
                            API_VERSION.major
                        ),
                    ));
                    return Ok(());
                }

                inner.source.initialize().await?;
                for job in inner.source.get_jobs().await? {
                    inner.repo.add_job(&shared(job));
                }
                inner.sender.send(Response::Bootstrap { request_id, version: API_VERSION });
                Ok(())
            }

            Request::SubmitJob { request_id, scope, job } => {
                let mut job = *job;
                if job.user.is_empty() {
                    job.user = scope.submit_owner();
                }
                if job.user.is_empty() || job.user.is_all_users() {
                    return Err(SourceError::invalid_request("User must not be empty."));
                }
                job.validate().map_err(|e| SourceError::invalid_request(e.to_string()))?;

                let job = shared(job);
                inner.source.submit_job(&job).await?;

                let value = job.lock().to_projected_json(None);
                inner.sender.send(Response::JobState { request_id, jobs: vec![value] });
                Ok(())
            }

            Request::GetJob { request_id, scope, target, filters } => {
                let jobs = match target {
                    JobTarget::Id(id) => {
                        let job = inner
                            .repo
                            .get_job(&id, &scope.user)
                            .ok_or_else(|| SourceError::job_not_found(&id, &scope.user))?;
                        // A specific id ignores the list filters.
                        let guard = job.lock();
                        vec![guard.to_projected_json(filters.fields.as_ref())]
                    }
                    JobTarget::All => inner
                        .repo
                        .get_jobs(&scope.user)
                        .into_iter()
                        .filter_map(|job| {
                            let guard = job.lock();
                            matches_filters(&guard, &filters)
                                .then(|| guard.to_projected_json(filters.fields.as_ref()))
                        })
                        .collect(),
                };
                inner.sender.send(Response::JobState { request_id, jobs });
                Ok(())
            }

            Request::GetJobStatus { request_id, scope, target, cancel } => {
                inner.streams.handle_status_request(request_id, &target, &scope.user, cancel);
                Ok(())
            }

            Request::ControlJob { request_id, scope, job_id, operation } => {
                let job = inner
                    .repo
                    .get_job(&job_id, &scope.user)
                    .ok_or_else(|| SourceError::job_not_found(&job_id, &scope.user))?;
                let outcome = inner.source.control_job(&job, operation).await?;
                inner.sender.send(Response::ControlJob {
                    request_id,
                    status_message: outcome.status_message,
                    operation_complete: outcome.operation_complete,
                });
                Ok(())
            }

            Request::GetJobOutput { request_id, scope, job_id, output_type, cancel } => {
                inner.streams.handle_output_request(
                    &inner.source,
                    request_id,
                    &job_id,
                    &scope.user,
                    output_type,
                    cancel,
                );
                Ok(())
            }

            Request::GetJobResourceUtil { cancel, .. } => {
                if cancel {
                    return Ok(());
                }
                Err(SourceError::new(
                    ErrorCode::RequestNotSupported,
                    "Resource utilization streaming is not supported by this plugin.",
                ))
            }

            Request::GetJobNetwork { request_id, scope, job_id } => {
                let job = inner
                    .repo
                    .get_job(&job_id, &scope.user)
                    .ok_or_else(|| SourceError::job_not_found(&job_id, &scope.user))?;
                let network = inner.source.get_network(&job).await?;
                inner.sender.send(Response::JobNetwork { request_id, network });
                Ok(())
            }

            Request::GetClusterInfo { request_id, scope } => {
                let info = inner.source.get_configuration(&scope.user).await?;
                inner.sender.send(Response::ClusterInfo { request_id, info });
                Ok(())
            }
        }
    }
}

fn matches_filters(job: &Job, filters: &JobFilters) -> bool {
    if filters.start_time.is_some() || filters.end_time.is_some() {
        let Some(submitted) = job.submission_time else {
            return false;
        };
        if filters.start_time.is_some_and(|start| submitted < start) {
            return false;
        }
        if filters.end_time.is_some_and(|end| submitted > end) {
            return false;
        }
    }
    if filters.statuses.as_ref().is_some_and(|statuses| !statuses.contains(&job.status)) {
        return false;
    }
    if filters.tags.as_ref().is_some_and(|tags| !job.matches_tags(tags)) {
        return false;
    }
    true
}

#[cfg(test)]
#[path = "plugin_tests.rs"]
mod tests;
