// SPDX-License-Identifier: MIT

use super::*;
use yare::parameterized;

#[parameterized(
    canceled = { "Canceled", JobStatus::Canceled },
    failed = { "Failed", JobStatus::Failed },
    finished = { "Finished", JobStatus::Finished },
    killed = { "Killed", JobStatus::Killed },
    pending = { "Pending", JobStatus::Pending },
    running = { "Running", JobStatus::Running },
    suspended = { "Suspended", JobStatus::Suspended },
)]
fn parses_wire_strings(s: &str, expected: JobStatus) {
    assert_eq!(JobStatus::parse(s).unwrap(), expected);
    assert_eq!(expected.as_str(), s);
}

#[test]
fn empty_string_is_unknown_both_directions() {
    assert_eq!(JobStatus::parse("").unwrap(), JobStatus::Unknown);
    assert_eq!(JobStatus::parse("  ").unwrap(), JobStatus::Unknown);
    assert_eq!(JobStatus::Unknown.as_str(), "");

    let json = serde_json::to_string(&JobStatus::Unknown).unwrap();
    assert_eq!(json, "\"\"");
}

#[test]
fn unrecognized_status_is_rejected() {
    assert!(JobStatus::parse("Exploded").is_err());
    assert!(serde_json::from_str::<JobStatus>("\"Exploded\"").is_err());
}

#[parameterized(
    canceled = { JobStatus::Canceled, true },
    failed = { JobStatus::Failed, true },
    finished = { JobStatus::Finished, true },
    killed = { JobStatus::Killed, true },
    pending = { JobStatus::Pending, false },
    running = { JobStatus::Running, false },
    suspended = { JobStatus::Suspended, false },
    unknown = { JobStatus::Unknown, false },
)]
fn terminal_states(status: JobStatus, terminal: bool) {
    assert_eq!(status.is_terminal(), terminal);
}
