// SPDX-License-Identifier: MIT

//! Output streaming by tailing the files a job writes.
//!
//! One or two `tail` children per stream: separate stdout/stderr tails, or
//! a single mixed tail when both targets alias. Each tail runs through the
//! sandbox helper as the job's owner, so file reads happen under the
//! owner's identity rather than the daemon's. While the job is live the
//! tails follow (`-f`); for an already-finished job they dump the file
//! once and exit. Tail failures surface as a single job-output-not-found
//! error only if no bytes were delivered yet; afterwards the stream is
//! quietly closed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use lp_core::{Mount, SharedJob};
use lp_sdk::{OutputCallbacks, OutputStream, SourceError};
use lp_wire::{ErrorCode, OutputKind, OutputType};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::runner::{sandbox_shell_args, shell_escape};

/// Grace period after a job completes before its tails are terminated, so
/// trailing output can drain.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Default)]
struct TailState {
    /// Follow mode, as opposed to a one-shot dump of a finished job.
    streaming: bool,
    /// Stop was requested; child exits are expected and not reported.
    stopping: bool,
    output_written: bool,
    error_reported: bool,
    children: Vec<(CancellationToken, JoinHandle<()>)>,
    remaining: usize,
    exit_codes: Vec<i32>,
}

struct StreamInner {
    output_type: OutputType,
    job: SharedJob,
    sandbox_path: PathBuf,
    callbacks: OutputCallbacks,
    state: Mutex<TailState>,
}

/// Streams a job's output by tailing its stdout/stderr files.
pub struct FileOutputStream {
    inner: Arc<StreamInner>,
}

impl FileOutputStream {
    pub fn new(
        output_type: OutputType,
        job: SharedJob,
        sandbox_path: &Path,
        callbacks: OutputCallbacks,
    ) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                output_type,
                job,
                sandbox_path: sandbox_path.to_path_buf(),
                callbacks,
                state: Mutex::new(TailState::default()),
            }),
        }
    }
}

#[async_trait::async_trait]
impl OutputStream for FileOutputStream {
    fn start(&self) -> Result<(), SourceError> {
        let inner = &self.inner;
        let (stdout_file, stderr_file, streaming, username) = {
            let guard = inner.job.lock();
            (
                resolve_host_path(&guard.stdout_file, &guard.mounts),
                resolve_host_path(&guard.stderr_file, &guard.mounts),
                !guard.is_terminal(),
                guard.user.name().to_string(),
            )
        };

        let mut tails: Vec<(OutputKind, PathBuf)> = Vec::new();
        match inner.output_type {
            OutputType::Both => {
                if stdout_file == stderr_file && stdout_file.is_some() {
                    if let Some(path) = stdout_file {
                        tails.push((OutputKind::Mixed, path));
                    }
                } else {
                    if let Some(path) = stdout_file {
                        tails.push((OutputKind::Stdout, path));
                    }
                    if let Some(path) = stderr_file {
                        tails.push((OutputKind::Stderr, path));
                    }
                }
            }
            OutputType::Stdout => {
                if let Some(path) = stdout_file {
                    tails.push((OutputKind::Stdout, path));
                }
            }
            OutputType::Stderr => {
                if let Some(path) = stderr_file {
                    tails.push((OutputKind::Stderr, path));
                }
            }
        }

        let mut state = inner.state.lock();
        state.streaming = streaming;
        state.remaining = tails.len();

        if tails.is_empty() {
            // Nothing to read: the stream is an empty, already-complete one.
            let callbacks = inner.callbacks.clone();
            drop(state);
            tokio::spawn(async move { (callbacks.on_complete)() });
            return Ok(());
        }

        for (kind, path) in tails {
            let token = CancellationToken::new();
            let task = tokio::spawn(run_tail(
                Arc::clone(inner),
                kind,
                path,
                username.clone(),
                streaming,
                token.clone(),
            ));
            state.children.push((token, task));
        }
        Ok(())
    }

    async fn stop(&self) {
        let inner = &self.inner;
        let completed = {
            let mut state = inner.state.lock();
            state.stopping = true;
            inner.job.lock().is_terminal()
        };

        // A finished job's trailing output drains before the tails die,
        // whether the tails were following or dumping.
        if completed {
            tokio::time::sleep(DRAIN_GRACE).await;
        }

        let children = std::mem::take(&mut inner.state.lock().children);
        for (token, _) in &children {
            token.cancel();
        }
        for (_, task) in children {
            let _ = task.await;
        }
    }
}

async fn run_tail(
    inner: Arc<StreamInner>,
    kind: OutputKind,
    path: PathBuf,
    username: String,
    follow: bool,
    stop: CancellationToken,
) {
    // The tail runs through the sandbox as the job owner so the read
    // happens under the owner's identity, not the daemon's.
    let mut tail_command = String::from("tail ");
    if follow {
        tail_command.push_str("-f ");
    }
    tail_command.push_str("-n+1 ");
    tail_command.push_str(&shell_escape(&path.to_string_lossy()));

    let mut command = Command::new(&inner.sandbox_path);
    command.args(sandbox_shell_args(&username, &tail_command));
    command.env_clear();
    if let Ok(path) = std::env::var("PATH") {
        command.env("PATH", path);
    }
    command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            report_tail_error(&inner, format!("could not spawn tail for {}: {e}", path.display()));
            child_exited(&inner, -1);
            return;
        }
    };

    let stdout_task = child.stdout.take().map(|stdout| {
        let inner = Arc::clone(&inner);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut chunk = vec![0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                        deliver_output(&inner, text, kind);
                    }
                }
            }
        })
    });

    let stderr_task = child.stderr.take().map(|stderr| {
        let inner = Arc::clone(&inner);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                report_tail_error(&inner, format!("error output from tail: {line}"));
            }
        })
    });

    let exit_code = tokio::select! {
        status = child.wait() => status.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1),
        _ = stop.cancelled() => {
            let _ = child.start_kill();
            child.wait().await.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1)
        }
    };

    // Drain the readers so trailing bytes are delivered before the exit is
    // accounted for.
    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    child_exited(&inner, exit_code);
}

fn deliver_output(inner: &Arc<StreamInner>, text: String, kind: OutputKind) {
    let mut state = inner.state.lock();
    if state.error_reported {
        return;
    }
    state.output_written = true;
    drop(state);
    (inner.callbacks.on_output)(text, kind);
}

/// Report a tail failure. Only the first failure is surfaced, and only if
/// no output has been delivered yet.
fn report_tail_error(inner: &Arc<StreamInner>, message: String) {
    error!("{message}");
    let mut state = inner.state.lock();
    if state.stopping || state.error_reported || state.output_written {
        return;
    }
    state.error_reported = true;
    drop(state);
    (inner.callbacks.on_error)(SourceError::new(ErrorCode::JobOutputNotFound, message));
}

fn child_exited(inner: &Arc<StreamInner>, exit_code: i32) {
    let mut state = inner.state.lock();
    if state.stopping {
        return;
    }
    if state.streaming {
        // A following tail should never exit on its own.
        warn!(exit_code, "output stream tail exited unexpectedly");
    }
    state.exit_codes.push(exit_code);
    state.remaining = state.remaining.saturating_sub(1);
    if state.remaining > 0 {
        return;
    }

    let failed = !state.output_written && state.exit_codes.iter().any(|&code| code != 0);
    if failed {
        if !state.error_reported {
            state.error_reported = true;
            let codes = state.exit_codes.clone();
            drop(state);
            (inner.callbacks.on_error)(SourceError::new(
                ErrorCode::JobOutputNotFound,
                format!("output stream exited unexpectedly with codes {codes:?}"),
            ));
        }
    } else {
        drop(state);
        (inner.callbacks.on_complete)();
    }
}

/// Rewrite a path under a host mount's destination to the host source.
/// Returns `None` for empty paths.
fn resolve_host_path(path: &str, mounts: &[Mount]) -> Option<PathBuf> {
    if path.is_empty() {
        return None;
    }
    let mut resolved = PathBuf::from(path);
    for mount in mounts {
        let Some(host_path) = mount.host_source_path() else {
            continue;
        };
        if let Ok(relative) = std::path::Path::new(path).strip_prefix(&mount.mount_path) {
            resolved = PathBuf::from(host_path).join(relative);
        }
    }
    Some(resolved)
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
