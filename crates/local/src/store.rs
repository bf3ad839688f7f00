// SPDX-License-Identifier: MIT

//! On-disk job persistence: one JSON file per job under a per-host
//! directory, plus plugin-assigned output directories.

use std::path::{Path, PathBuf};

use lp_core::Job;
use thiserror::Error;
use tracing::warn;

pub const STDOUT_FILE: &str = "stdout.log";
pub const STDERR_FILE: &str = "stderr.log";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not serialize job {id}: {source}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io { path: path.to_path_buf(), source }
}

/// Per-host job storage rooted at the configured scratch path.
///
/// Layout: `<scratch>/jobs/<hostname>/<job-id>` holds the job JSON, and
/// `<scratch>/output/<hostname>/<job-id>/{stdout.log,stderr.log}` holds
/// plugin-assigned output.
pub struct LocalJobStore {
    jobs_path: PathBuf,
    output_path: PathBuf,
    save_unspecified_output: bool,
}

impl LocalJobStore {
    pub fn new(scratch: &Path, hostname: &str, save_unspecified_output: bool) -> Self {
        Self {
            jobs_path: scratch.join("jobs").join(hostname),
            output_path: scratch.join("output").join(hostname),
            save_unspecified_output,
        }
    }

    /// Create the jobs and (if enabled) output directories.
    pub fn initialize(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.jobs_path).map_err(io_err(&self.jobs_path))?;
        if self.save_unspecified_output {
            std::fs::create_dir_all(&self.output_path).map_err(io_err(&self.output_path))?;
        }
        Ok(())
    }

    pub fn job_file(&self, job_id: &str) -> PathBuf {
        self.jobs_path.join(job_id)
    }

    pub fn output_dir(&self, job_id: &str) -> PathBuf {
        self.output_path.join(job_id)
    }

    /// Load every persisted job. Files that fail to parse or validate are
    /// logged and skipped; they do not abort the load.
    pub fn load_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let entries = match std::fs::read_dir(&self.jobs_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.jobs_path)(e)),
        };

        let mut jobs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err(&self.jobs_path))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable job file");
                    continue;
                }
            };
            match serde_json::from_str::<Job>(&text) {
                Ok(job) => match job.validate() {
                    Ok(()) => jobs.push(job),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping invalid job file");
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unparsable job file");
                }
            }
        }
        Ok(jobs)
    }

    /// Persist a job atomically: write to a temp file, then rename.
    pub fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        let target = self.job_file(&job.id);
        let temp = self.jobs_path.join(format!(".{}.tmp", job.id));

        let text = serde_json::to_string_pretty(job)
            .map_err(|source| StoreError::Serialize { id: job.id.clone(), source })?;
        std::fs::write(&temp, text).map_err(io_err(&temp))?;
        std::fs::rename(&temp, &target).map_err(io_err(&target))?;
        Ok(())
    }

    /// Delete a job's file and, when the plugin assigned its output paths,
    /// its output directory tree.
    pub fn delete_job(&self, job: &Job) {
        let path = self.job_file(&job.id);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "could not delete job file");
            }
        }

        if self.owns_output(job) {
            let dir = self.output_dir(&job.id);
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %dir.display(), error = %e, "could not delete job output");
                }
            }
        }
    }

    /// Whether the job's output lives in a plugin-assigned directory.
    pub fn owns_output(&self, job: &Job) -> bool {
        !job.id.is_empty() && Path::new(&job.stdout_file).starts_with(self.output_dir(&job.id))
    }

    /// Assign output files under the per-job output directory when the
    /// caller supplied none and unspecified output is being saved.
    pub fn set_job_output_paths(&self, job: &mut Job) -> Result<(), StoreError> {
        if !self.save_unspecified_output
            || !job.stdout_file.is_empty()
            || !job.stderr_file.is_empty()
        {
            return Ok(());
        }

        let dir = self.output_dir(&job.id);
        std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        job.stdout_file = dir.join(STDOUT_FILE).to_string_lossy().into_owned();
        job.stderr_file = dir.join(STDERR_FILE).to_string_lossy().into_owned();
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
