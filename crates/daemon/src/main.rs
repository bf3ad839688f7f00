// SPDX-License-Identifier: MIT

//! `lpd`: the local launcher plugin daemon.
//!
//! Speaks the framed launcher protocol on stdin/stdout and runs jobs as
//! local sandboxed processes. Exits 0 on clean shutdown, non-zero on an
//! unrecoverable startup failure.

use std::sync::Arc;

use anyhow::Context;
use lp_core::SystemClock;
use lp_local::{LocalJobSource, LocalJobStore, LocalRepositoryHooks, SecureCookie};
use lp_sdk::{JobStatusNotifier, LauncherChannel, Options, Plugin};
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let options = Options::load().context("could not load options")?;
    let _log_guard = init_logging(&options);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(options.worker_threads())
        .enable_all()
        .build()
        .context("could not build the async runtime")?;

    runtime.block_on(run(options))
}

async fn run(options: Options) -> anyhow::Result<()> {
    let hostname = gethostname::gethostname().to_string_lossy().into_owned();
    let clock = SystemClock;

    info!(
        plugin = %options.plugin_name,
        host = %hostname,
        scratch = %options.scratch_path.display(),
        "starting launcher plugin"
    );

    let store = Arc::new(LocalJobStore::new(
        &options.scratch_path,
        &hostname,
        options.save_unspecified_output,
    ));
    let secure_cookie = SecureCookie::load(&options.scratch_path.join("secure-cookie-key"));
    let notifier = JobStatusNotifier::new(clock.clone());

    let source = Arc::new(LocalJobSource::new(
        &hostname,
        &options.rsandbox_path,
        Arc::clone(&store),
        notifier.clone(),
        secure_cookie,
        clock.clone(),
    ));
    let hooks = Arc::new(LocalRepositoryHooks::new(store));

    let channel = LauncherChannel::new(options.max_message_size);
    let plugin = Plugin::new(source, hooks, notifier, channel.sender());
    plugin
        .initialize(options.retention(), options.heartbeat_interval(), clock)
        .context("plugin initialization failed")?;

    let handle = channel.start(tokio::io::stdin(), tokio::io::stdout(), plugin.handler());
    let closed = handle.closed();

    let mut sigterm = signal(SignalKind::terminate()).context("could not install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("could not install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM; shutting down"),
        _ = sigint.recv() => info!("received SIGINT; shutting down"),
        _ = closed.cancelled() => info!("launcher channel closed; shutting down"),
    }

    plugin.shutdown();
    handle.stop().await;
    Ok(())
}

/// Install the tracing subscriber: a rolling file under `logging-dir` when
/// configured, stderr otherwise.
fn init_logging(options: &Options) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::new(options.effective_log_level().as_filter());

    match &options.logging_dir {
        Some(dir) => {
            let appender =
                tracing_appender::rolling::daily(dir, format!("{}.log", options.plugin_name));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            // stdout belongs to the launcher protocol; logs go to stderr.
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}
