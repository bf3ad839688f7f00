// SPDX-License-Identifier: MIT

//! The per-backend facade the plugin runtime drives.

use std::sync::Arc;

use async_trait::async_trait;
use lp_core::{Job, SharedJob, User};
use lp_wire::{ClusterInfo, ControlOperation, NetworkInfo, OutputKind, OutputType};

use crate::SourceError;

/// Result of a control operation.
#[derive(Debug, Clone, Default)]
pub struct ControlOutcome {
    pub status_message: String,
    pub operation_complete: bool,
}

impl ControlOutcome {
    pub fn complete(message: impl Into<String>) -> Self {
        Self { status_message: message.into(), operation_complete: true }
    }
}

/// Callbacks an output stream uses to report back to the stream manager.
///
/// Sequence ids are assigned by the manager; streams just report chunks,
/// completion, and errors.
#[derive(Clone)]
pub struct OutputCallbacks {
    pub on_output: Arc<dyn Fn(String, OutputKind) + Send + Sync>,
    pub on_complete: Arc<dyn Fn() + Send + Sync>,
    pub on_error: Arc<dyn Fn(SourceError) + Send + Sync>,
}

/// A backend-produced stream of job output.
#[async_trait]
pub trait OutputStream: Send + Sync + 'static {
    /// Begin emission. Called once, possibly deferred until the job leaves
    /// the Pending state.
    fn start(&self) -> Result<(), SourceError>;

    /// Halt emission. Implementations may drain trailing output before
    /// returning; no callbacks fire after this resolves.
    async fn stop(&self);
}

/// A job-execution backend.
///
/// The plugin runtime owns exactly one source and translates every
/// launcher request into calls on it.
#[async_trait]
pub trait JobSource: Send + Sync + 'static {
    /// Called when the launcher bootstraps the plugin.
    async fn initialize(&self) -> Result<(), SourceError>;

    /// Enumerate the jobs the backend currently knows about.
    async fn get_jobs(&self) -> Result<Vec<Job>, SourceError>;

    /// Submit a job. The job is already validated and owned; the source
    /// assigns its id and starts it.
    async fn submit_job(&self, job: &SharedJob) -> Result<(), SourceError>;

    /// Apply a control operation to a job.
    async fn control_job(
        &self,
        job: &SharedJob,
        operation: ControlOperation,
    ) -> Result<ControlOutcome, SourceError>;

    /// Create (but do not start) an output stream for a job.
    fn create_output_stream(
        &self,
        output_type: OutputType,
        job: &SharedJob,
        callbacks: OutputCallbacks,
    ) -> Result<Arc<dyn OutputStream>, SourceError>;

    /// Network placement of a job.
    async fn get_network(&self, job: &SharedJob) -> Result<NetworkInfo, SourceError>;

    /// Capabilities and custom configuration of this backend.
    async fn get_configuration(&self, user: &User) -> Result<ClusterInfo, SourceError>;
}
