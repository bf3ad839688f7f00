// SPDX-License-Identifier: MIT

//! Runs jobs as sandboxed child processes.
//!
//! Submission mints an id, builds the sandbox invocation, spawns it, and
//! publishes Pending. A deadline probe then polls `/proc/<pid>/comm` with
//! bounded exponential backoff until the process image stops being the
//! sandbox itself, at which point the job is Running. Child exit settles
//! the exit code and drives the job to its terminal status.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use lp_core::{Clock, Job, JobStatus, Mount, SharedJob};
use lp_sdk::{JobStatusNotifier, SourceError};
use parking_lot::Mutex;
use rand::RngCore;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::secure_cookie::{decrypt_password, SecureCookie, PAM_PROFILE};
use crate::store::LocalJobStore;

/// Initial delay before the first probe of a freshly spawned job.
const PROBE_INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Probes past this count have given up on seeing the job start.
const PROBE_MAX_ATTEMPTS: u32 = 100;

struct RunnerInner<C: Clock> {
    hostname: String,
    sandbox_path: PathBuf,
    sandbox_name: String,
    notifier: JobStatusNotifier,
    store: Arc<LocalJobStore>,
    secure_cookie: SecureCookie,
    clock: C,
    /// One pending process-watch probe per job id.
    probes: Mutex<HashMap<String, CancellationToken>>,
}

/// Executes jobs for the local job source.
pub struct LocalJobRunner<C: Clock> {
    inner: Arc<RunnerInner<C>>,
}

impl<C: Clock> Clone for LocalJobRunner<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

/// Everything needed to spawn the sandbox for one job.
struct SandboxLaunch {
    args: Vec<String>,
    env: Vec<(String, String)>,
    /// JSON launch profile followed by the job's standard input.
    stdin_payload: String,
}

impl<C: Clock> LocalJobRunner<C> {
    pub fn new(
        hostname: &str,
        sandbox_path: &Path,
        notifier: JobStatusNotifier,
        store: Arc<LocalJobStore>,
        secure_cookie: SecureCookie,
        clock: C,
    ) -> Self {
        let sandbox_name = sandbox_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "rsandbox".to_string());
        Self {
            inner: Arc::new(RunnerInner {
                hostname: hostname.to_string(),
                sandbox_path: sandbox_path.to_path_buf(),
                sandbox_name,
                notifier,
                store,
                secure_cookie,
                clock,
                probes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Submit one job: mint its id, persist-ready it, spawn the sandbox,
    /// publish Pending, and arm the running-probe.
    pub async fn run_job(&self, job: &SharedJob) -> Result<(), SourceError> {
        let inner = &self.inner;
        let (job_id, launch) = {
            let mut guard = job.lock();
            guard.id = mint_job_id();
            guard.submission_time = Some(inner.clock.now());
            guard.host = inner.hostname.clone();
            inner
                .store
                .set_job_output_paths(&mut guard)
                .map_err(|e| SourceError::unknown(e.to_string()))?;

            let launch = build_sandbox_launch(&guard, &inner.secure_cookie)?;
            (guard.id.clone(), launch)
        };

        debug!(job_id = %job_id, args = ?launch.args, "launching sandbox");

        // Only the job's declared environment (plus the PATH fallback)
        // reaches the sandbox; the daemon's own environment never does.
        let mut command = Command::new(&inner.sandbox_path);
        command
            .args(&launch.args)
            .env_clear()
            .envs(launch.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        let mut child = command.spawn().map_err(|e| {
            SourceError::unknown(format!("Could not launch process for job {job_id}: {e}"))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = launch.stdin_payload;
            tokio::spawn(async move {
                let _ = stdin.write_all(payload.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        }

        let pid = child.id().map(|pid| pid as i32);
        job.lock().pid = pid;
        inner.notifier.update_job(job, JobStatus::Pending, None, None);

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_sandbox_stderr(Arc::clone(job), stderr));
        }

        if let Some(pid) = pid {
            self.arm_probe(job, pid);
        }

        let runner = self.clone();
        let job = Arc::clone(job);
        tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => exit_code_of(status),
                Err(e) => {
                    error!(error = %e, "failed to reap sandbox child");
                    -1
                }
            };
            runner.on_job_exit(&job, exit_code);
        });

        Ok(())
    }

    /// Arm the "is it running yet" probe with its initial delay.
    fn arm_probe(&self, job: &SharedJob, pid: i32) {
        let job_id = job.lock().id.clone();
        let token = CancellationToken::new();
        self.inner.probes.lock().insert(job_id.clone(), token.clone());

        let runner = self.clone();
        let job = Arc::clone(job);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = runner.probe_loop(&job, &job_id, pid) => {}
            }
            runner.inner.probes.lock().remove(&job_id);
        });
    }

    async fn probe_loop(&self, job: &SharedJob, job_id: &str, pid: i32) {
        tokio::time::sleep(PROBE_INITIAL_DELAY).await;

        for attempt in 1..=PROBE_MAX_ATTEMPTS {
            // If the job already reached a terminal state, stop watching.
            if job.lock().is_terminal() {
                return;
            }

            let comm = match tokio::fs::read_to_string(format!("/proc/{pid}/comm")).await {
                Ok(comm) => comm,
                Err(e) => {
                    debug!(job_id, pid, error = %e, "process probe failed; stopping watch");
                    return;
                }
            };

            // Once the process image is no longer the sandbox, the user
            // workload is running.
            if comm.trim() != self.inner.sandbox_name {
                self.inner.notifier.update_job(job, JobStatus::Running, None, None);
                return;
            }

            tokio::time::sleep(probe_backoff(attempt)).await;
        }

        error!(job_id, "job did not transition to a running state within a reasonable time");
    }

    /// Settle a job whose sandbox child exited.
    pub(crate) fn on_job_exit(&self, job: &SharedJob, exit_code: i32) {
        let inner = &self.inner;
        enum Settle {
            /// Explicitly killed or canceled: persist silently.
            AlreadyTerminal,
            /// Exited before the probe saw it running.
            RunningThenFinished,
            Finished,
        }

        let (job_id, action) = {
            let mut guard = job.lock();
            debug!(
                job_id = %guard.id,
                pid = guard.pid.unwrap_or(-1),
                exit_code,
                "sandbox child exited"
            );
            guard.exit_code = Some(exit_code);

            let action = if guard.status.is_terminal() {
                guard.last_update_time = Some(inner.clock.now());
                if let Err(e) = inner.store.save_job(&guard) {
                    error!(job_id = %guard.id, error = %e, "could not persist exited job");
                }
                Settle::AlreadyTerminal
            } else if guard.status == JobStatus::Pending {
                Settle::RunningThenFinished
            } else {
                Settle::Finished
            };
            (guard.id.clone(), action)
        };

        // The exited process no longer needs watching.
        if let Some(token) = inner.probes.lock().remove(&job_id) {
            token.cancel();
        }

        match action {
            Settle::AlreadyTerminal => {}
            Settle::RunningThenFinished => {
                // Subscribers must never observe Pending -> Finished.
                inner.notifier.update_job(job, JobStatus::Running, None, None);
                inner.notifier.update_job(job, JobStatus::Finished, None, None);
            }
            Settle::Finished => {
                inner.notifier.update_job(job, JobStatus::Finished, None, None);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_probes(&self) -> usize {
        self.inner.probes.lock().len()
    }
}

/// Exponential backoff for the process watch: `100 * 2^n` ms for the first
/// five retries, then 5 s flat.
fn probe_backoff(attempt: u32) -> Duration {
    if attempt > 5 {
        Duration::from_secs(5)
    } else {
        Duration::from_millis(100 * 2u64.pow(attempt))
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.code().or_else(|| status.signal().map(|sig| 128 + sig)).unwrap_or(-1)
}

/// Generate a job id: 16 random bytes, base64-encoded, with `/` replaced
/// so the id is usable as a file name.
fn mint_job_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes).replace('/', "-")
}

/// Mirror sandbox stderr into the job's stderr file so users find launch
/// errors where they expect job errors.
async fn forward_sandbox_stderr(job: SharedJob, stderr: tokio::process::ChildStderr) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let (job_id, stderr_file) = {
            let guard = job.lock();
            (guard.id.clone(), guard.stderr_file.clone())
        };
        debug!(job_id = %job_id, "sandbox stderr: {line}");

        if stderr_file.is_empty() {
            continue;
        }
        let echo = format!("echo {} >> {}", shell_escape(&line), shell_escape(&stderr_file));
        match Command::new("/bin/sh").arg("-c").arg(&echo).status().await {
            Ok(status) if status.success() => {}
            Ok(status) => {
                warn!(job_id = %job_id, code = status.code().unwrap_or(-1),
                    "could not write sandbox error to job output file");
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e,
                    "could not write sandbox error to job output file");
            }
        }
    }
}

/// Build the full sandbox invocation for a job.
fn build_sandbox_launch(job: &Job, cookie: &SecureCookie) -> Result<SandboxLaunch, SourceError> {
    let mut args = Vec::new();

    args.push("--username".to_string());
    args.push(job.user.name().to_string());

    if !job.working_directory.is_empty() {
        args.push("--workingdir".to_string());
        args.push(job.working_directory.clone());
    }

    let pam_profile = job.config_value(PAM_PROFILE).unwrap_or_default().to_string();
    if !pam_profile.is_empty() {
        args.push("--pam-profile".to_string());
        args.push(pam_profile.clone());
    }

    for mount in &job.mounts {
        args.push("--mount".to_string());
        args.push(mount_flag(mount)?);
    }

    args.push("/bin/sh".to_string());
    args.push("-c".to_string());
    args.push(shell_command(job));

    let mut env = job.environment.iter().map(|v| (v.name.clone(), v.value.clone())).collect::<Vec<_>>();
    if !env.iter().any(|(name, _)| name == "PATH") {
        if let Ok(path) = std::env::var("PATH") {
            env.push(("PATH".to_string(), path));
        }
    }

    // The launch profile rides on stdin so secrets never appear in argv.
    let password = decrypt_password(job, cookie)?;
    let mut profile = json!({ "username": job.user.name() });
    if !pam_profile.is_empty() {
        profile["pamProfile"] = json!(pam_profile);
    }
    if let Some(password) = password {
        profile["password"] = json!(password);
    }

    let mut stdin_payload = profile.to_string();
    stdin_payload.push('\n');
    stdin_payload.push_str(&job.standard_in);

    Ok(SandboxLaunch { args, env, stdin_payload })
}

/// `host-path:dest[:ro]`; only host mounts are supported locally.
fn mount_flag(mount: &Mount) -> Result<String, SourceError> {
    let Some(host_path) = mount.host_source_path() else {
        return Err(SourceError::invalid_request(format!(
            "Invalid mount type {:?} for {:?} - only host mount types are supported.",
            mount.source.type_str(),
            mount.mount_path,
        )));
    };
    let mut flag = format!("{host_path}:{}", mount.mount_path);
    if mount.read_only {
        flag.push_str(":ro");
    }
    Ok(flag)
}

/// The `/bin/sh -c` payload: command or exe with escaped arguments and
/// output redirections.
fn shell_command(job: &Job) -> String {
    let mut command = if !job.command.is_empty() {
        job.command.clone()
    } else {
        shell_escape(&job.exe)
    };
    for arg in &job.arguments {
        command.push(' ');
        command.push_str(&shell_escape(arg));
    }

    if !job.stdout_file.is_empty() {
        command.push_str(" > ");
        command.push_str(&shell_escape(&job.stdout_file));
    }
    if !job.stderr_file.is_empty() {
        if job.stderr_file == job.stdout_file {
            command.push_str(" 2>&1");
        } else {
            command.push_str(" 2> ");
            command.push_str(&shell_escape(&job.stderr_file));
        }
    }
    command
}

/// Base sandbox argv for running a shell command as a specific user. Used
/// for every sandboxed helper that is not a full job launch (output tails).
pub(crate) fn sandbox_shell_args(username: &str, shell_command: &str) -> Vec<String> {
    vec![
        "--username".to_string(),
        username.to_string(),
        "/bin/sh".to_string(),
        "-c".to_string(),
        shell_command.to_string(),
    ]
}

/// Single-quote a string for the shell.
pub(crate) fn shell_escape(value: &str) -> String {
    if !value.is_empty()
        && value.chars().all(|c| c.is_ascii_alphanumeric() || "_-./=:".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
