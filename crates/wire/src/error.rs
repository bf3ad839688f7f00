// SPDX-License-Identifier: MIT

//! Wire error codes for error responses.

/// The closed set of error codes understood by the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidResponse,
    Unknown,
    RequestNotSupported,
    InvalidRequest,
    JobNotFound,
    PluginRestarted,
    Timeout,
    JobNotRunning,
    JobOutputNotFound,
    InvalidJobState,
    JobControlFailure,
    UnsupportedVersion,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            Self::InvalidResponse => -1,
            Self::Unknown => 0,
            Self::RequestNotSupported => 1,
            Self::InvalidRequest => 2,
            Self::JobNotFound => 3,
            Self::PluginRestarted => 4,
            Self::Timeout => 5,
            Self::JobNotRunning => 6,
            Self::JobOutputNotFound => 7,
            Self::InvalidJobState => 8,
            Self::JobControlFailure => 9,
            Self::UnsupportedVersion => 10,
        }
    }
}

lp_core::simple_display! {
    ErrorCode {
        InvalidResponse => "invalid-response",
        Unknown => "unknown",
        RequestNotSupported => "request-not-supported",
        InvalidRequest => "invalid-request",
        JobNotFound => "job-not-found",
        PluginRestarted => "plugin-restarted",
        Timeout => "timeout",
        JobNotRunning => "job-not-running",
        JobOutputNotFound => "job-output-not-found",
        InvalidJobState => "invalid-job-state",
        JobControlFailure => "job-control-failure",
        UnsupportedVersion => "unsupported-version",
    }
}
