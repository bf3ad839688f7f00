// SPDX-License-Identifier: MIT

use super::*;
use clap::Parser;
use std::io::Write;

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("lpd").chain(args.iter().copied())).unwrap()
}

#[test]
fn defaults_match_the_documented_surface() {
    let options = Options::from_cli(parse(&[])).unwrap();

    assert!(!options.enable_debug_logging);
    assert_eq!(options.job_expiry_hours, 24);
    assert_eq!(options.heartbeat_interval_seconds, 5);
    assert_eq!(options.log_level, LogLevel::Warning);
    assert_eq!(options.max_message_size, 5 * 1024 * 1024);
    assert_eq!(options.rsandbox_path, PathBuf::from("/usr/lib/rstudio-server/bin/rsandbox"));
    assert_eq!(options.scratch_path, PathBuf::from("/var/lib/rstudio-launcher/"));
    assert_eq!(options.server_user, "rstudio-server");
    assert!(!options.unprivileged);
    assert!(options.logging_dir.is_none());
    assert!(options.save_unspecified_output);
}

#[test]
fn command_line_overrides_defaults() {
    let options = Options::from_cli(parse(&[
        "--job-expiry-hours",
        "48",
        "--log-level",
        "debug",
        "--enable-debug-logging",
        "--heartbeat-interval-seconds",
        "0",
        "--scratch-path",
        "/tmp/scratch",
    ]))
    .unwrap();

    assert_eq!(options.job_expiry_hours, 48);
    assert_eq!(options.log_level, LogLevel::Debug);
    assert!(options.enable_debug_logging);
    assert_eq!(options.heartbeat_interval_seconds, 0);
    assert_eq!(options.scratch_path, PathBuf::from("/tmp/scratch"));
}

#[test]
fn config_file_fills_in_and_command_line_wins() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "job-expiry-hours = 72\nplugin-name = \"file-plugin\"\nlog-level = \"info\""
    )
    .unwrap();

    let path = file.path().to_str().unwrap().to_string();
    let options = Options::from_cli(parse(&[
        "--config-file",
        &path,
        "--job-expiry-hours",
        "12",
    ]))
    .unwrap();

    // CLI beats the file; the file beats the default.
    assert_eq!(options.job_expiry_hours, 12);
    assert_eq!(options.plugin_name, "file-plugin");
    assert_eq!(options.log_level, LogLevel::Info);
}

#[test]
fn unknown_config_file_keys_are_fatal() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "no-such-option = true").unwrap();

    let path = file.path().to_path_buf();
    let cli = parse(&["--config-file", path.to_str().unwrap()]);

    assert!(matches!(Options::from_cli(cli), Err(OptionsError::Parse { .. })));
}

#[test]
fn missing_config_file_is_a_read_error() {
    let cli = parse(&["--config-file", "/definitely/not/here.toml"]);
    assert!(matches!(Options::from_cli(cli), Err(OptionsError::Read { .. })));
}

#[test]
fn debug_logging_raises_the_effective_level() {
    let options = Options::from_cli(parse(&["--enable-debug-logging"])).unwrap();
    assert_eq!(options.effective_log_level(), LogLevel::Debug);
    assert_eq!(options.effective_log_level().as_filter(), "debug");

    let options = Options::from_cli(parse(&["--log-level", "off"])).unwrap();
    assert_eq!(options.effective_log_level(), LogLevel::Off);
}

#[test]
fn worker_threads_honors_the_override_and_the_floor() {
    let options = Options::from_cli(parse(&["--thread-pool-size", "2"])).unwrap();
    assert_eq!(options.worker_threads(), 2);

    let options = Options::from_cli(parse(&[])).unwrap();
    assert!(options.worker_threads() >= 4);
}

#[test]
fn retention_converts_hours() {
    let options = Options::from_cli(parse(&["--job-expiry-hours", "2"])).unwrap();
    assert_eq!(options.retention(), chrono::Duration::hours(2));
}
