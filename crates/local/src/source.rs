// SPDX-License-Identifier: MIT

//! The local job source: submits to the runner, controls jobs with POSIX
//! signals, persists through the store, and streams output from files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use lp_core::{Clock, ConfigValue, ConfigValueType, Job, JobStatus, SharedJob, User};
use lp_sdk::{
    ControlOutcome, JobSource, JobStatusNotifier, OutputCallbacks, OutputStream,
    RepositoryHooks, SourceError, Subscription,
};
use lp_wire::{ClusterInfo, ControlOperation, ErrorCode, NetworkInfo, OutputType};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tracing::error;

use crate::output::FileOutputStream;
use crate::runner::LocalJobRunner;
use crate::secure_cookie::{ENCRYPTED_PASSWORD, INITIALIZATION_VECTOR, PAM_PROFILE};
use crate::store::{LocalJobStore, StoreError};

fn store_error(e: StoreError) -> SourceError {
    SourceError::unknown(e.to_string())
}

/// Repository hooks backed by [`LocalJobStore`].
pub struct LocalRepositoryHooks {
    store: Arc<LocalJobStore>,
}

impl LocalRepositoryHooks {
    pub fn new(store: Arc<LocalJobStore>) -> Self {
        Self { store }
    }
}

impl RepositoryHooks for LocalRepositoryHooks {
    fn on_initialize(&self) -> Result<(), SourceError> {
        self.store.initialize().map_err(store_error)
    }

    fn load_jobs(&self) -> Result<Vec<Job>, SourceError> {
        self.store.load_jobs().map_err(store_error)
    }

    fn on_job_added(&self, job: &SharedJob) {
        let guard = job.lock();
        if let Err(e) = self.store.save_job(&guard) {
            error!(job_id = %guard.id, error = %e, "could not persist new job");
        }
    }

    fn on_job_removed(&self, job: &SharedJob) {
        self.store.delete_job(&job.lock());
    }

    fn set_job_output_paths(&self, job: &mut Job) -> Result<(), SourceError> {
        self.store.set_job_output_paths(job).map_err(store_error)
    }
}

/// Job source for local POSIX processes under the sandbox helper.
pub struct LocalJobSource<C: Clock> {
    hostname: String,
    sandbox_path: PathBuf,
    runner: LocalJobRunner<C>,
    store: Arc<LocalJobStore>,
    notifier: JobStatusNotifier,
    /// Persists every status update; held for its lifetime.
    _save_subscription: Mutex<Option<Subscription>>,
}

impl<C: Clock> LocalJobSource<C> {
    pub fn new(
        hostname: &str,
        sandbox_path: &Path,
        store: Arc<LocalJobStore>,
        notifier: JobStatusNotifier,
        secure_cookie: crate::SecureCookie,
        clock: C,
    ) -> Self {
        let runner = LocalJobRunner::new(
            hostname,
            sandbox_path,
            notifier.clone(),
            Arc::clone(&store),
            secure_cookie,
            clock,
        );

        // Every status notification persists the job, so the on-disk state
        // tracks the authoritative in-memory state.
        let save_store = Arc::clone(&store);
        let subscription = notifier.subscribe_all(move |job| {
            let guard = job.lock();
            if let Err(e) = save_store.save_job(&guard) {
                error!(job_id = %guard.id, error = %e, "could not persist job update");
            }
        });

        Self {
            hostname: hostname.to_string(),
            sandbox_path: sandbox_path.to_path_buf(),
            runner,
            store,
            notifier,
            _save_subscription: Mutex::new(Some(subscription)),
        }
    }

    fn signal_job(&self, job_id: &str, pid: i32, signal: Signal) -> Result<(), SourceError> {
        kill(Pid::from_raw(pid), signal).map_err(|e| {
            SourceError::new(
                ErrorCode::JobControlFailure,
                format!("could not signal job {job_id} (pid {pid}): {e}"),
            )
        })
    }
}

#[async_trait]
impl<C: Clock> JobSource for LocalJobSource<C> {
    async fn initialize(&self) -> Result<(), SourceError> {
        self.store.initialize().map_err(store_error)
    }

    async fn get_jobs(&self) -> Result<Vec<Job>, SourceError> {
        self.store.load_jobs().map_err(store_error)
    }

    async fn submit_job(&self, job: &SharedJob) -> Result<(), SourceError> {
        self.runner.run_job(job).await
    }

    async fn control_job(
        &self,
        job: &SharedJob,
        operation: ControlOperation,
    ) -> Result<ControlOutcome, SourceError> {
        let (job_id, pid, status) = {
            let guard = job.lock();
            (guard.id.clone(), guard.pid, guard.status)
        };

        if status.is_terminal() {
            return Err(SourceError::new(
                ErrorCode::InvalidJobState,
                format!("Job {job_id} is already {status} and cannot be controlled."),
            ));
        }
        let Some(pid) = pid else {
            return Err(SourceError::new(
                ErrorCode::InvalidJobState,
                format!("Job {job_id} has no process to control."),
            ));
        };

        match operation {
            ControlOperation::Suspend => {
                self.signal_job(&job_id, pid, Signal::SIGSTOP)?;
                self.notifier.update_job(job, JobStatus::Suspended, None, None);
                Ok(ControlOutcome::complete(format!("Job {job_id} suspended.")))
            }
            ControlOperation::Resume => {
                self.signal_job(&job_id, pid, Signal::SIGCONT)?;
                self.notifier.update_job(job, JobStatus::Running, None, None);
                Ok(ControlOutcome::complete(format!("Job {job_id} resumed.")))
            }
            ControlOperation::Stop => {
                self.signal_job(&job_id, pid, Signal::SIGTERM)?;
                Ok(ControlOutcome::complete(format!("Job {job_id} stopped.")))
            }
            ControlOperation::Kill => {
                // Mark the job first so the exit handler settles it silently.
                self.notifier.update_job(job, JobStatus::Killed, None, None);
                self.signal_job(&job_id, pid, Signal::SIGKILL)?;
                Ok(ControlOutcome::complete(format!("Job {job_id} killed.")))
            }
            ControlOperation::Cancel => {
                if status != JobStatus::Pending {
                    return Err(SourceError::new(
                        ErrorCode::JobControlFailure,
                        format!("Job {job_id} is already {status}; only pending jobs can be canceled."),
                    ));
                }
                self.notifier.update_job(job, JobStatus::Canceled, None, None);
                self.signal_job(&job_id, pid, Signal::SIGTERM)?;
                Ok(ControlOutcome::complete(format!("Job {job_id} canceled.")))
            }
        }
    }

    fn create_output_stream(
        &self,
        output_type: OutputType,
        job: &SharedJob,
        callbacks: OutputCallbacks,
    ) -> Result<Arc<dyn OutputStream>, SourceError> {
        Ok(Arc::new(FileOutputStream::new(
            output_type,
            Arc::clone(job),
            &self.sandbox_path,
            callbacks,
        )))
    }

    async fn get_network(&self, job: &SharedJob) -> Result<NetworkInfo, SourceError> {
        // Everything the local plugin runs stays on its own host.
        let host = {
            let guard = job.lock();
            if guard.host.is_empty() {
                self.hostname.clone()
            } else {
                guard.host.clone()
            }
        };
        Ok(NetworkInfo { host, ip_addresses: Vec::new() })
    }

    async fn get_configuration(&self, _user: &User) -> Result<ClusterInfo, SourceError> {
        Ok(ClusterInfo {
            supports_containers: false,
            allow_unknown_images: false,
            config: vec![
                ConfigValue::declaration(PAM_PROFILE, ConfigValueType::String),
                ConfigValue::declaration(ENCRYPTED_PASSWORD, ConfigValueType::String),
                ConfigValue::declaration(INITIALIZATION_VECTOR, ConfigValueType::String),
            ],
            ..Default::default()
        })
    }
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
