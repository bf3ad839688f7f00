// SPDX-License-Identifier: MIT

//! Backend errors and their wire mapping.

use lp_wire::ErrorCode;

/// An error from a job source or repository hook.
///
/// Carries the most-specific wire error code the failure maps to; the
/// request handlers forward it verbatim in an error response.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct SourceError {
    pub code: ErrorCode,
    pub message: String,
}

impl SourceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// An error with no more specific wire mapping.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn job_not_found(job_id: &str, user: &lp_core::User) -> Self {
        let scope = if user.is_all_users() {
            String::new()
        } else {
            format!(" for user {}", user.name())
        };
        Self::new(ErrorCode::JobNotFound, format!("Job {job_id} could not be found{scope}."))
    }
}
