// SPDX-License-Identifier: MIT

//! Job status state machine and its wire representation.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Lifecycle status of a job.
///
/// On the wire, statuses are capitalized strings; `Unknown` is the empty
/// string in both directions. Any other unrecognized string is an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Canceled,
    Failed,
    Finished,
    Killed,
    Pending,
    Running,
    Suspended,
    #[default]
    Unknown,
}

impl JobStatus {
    /// Whether this status is terminal. Terminal jobs never transition to
    /// another status, though their exit code and message may still settle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Failed | Self::Finished | Self::Killed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Canceled => "Canceled",
            Self::Failed => "Failed",
            Self::Finished => "Finished",
            Self::Killed => "Killed",
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Suspended => "Suspended",
            Self::Unknown => "",
        }
    }

    /// Parse a wire status string. The single parsing rule: the empty
    /// string (after trimming) is `Unknown`; anything else unrecognized
    /// is rejected.
    pub fn parse(s: &str) -> Result<Self, InvalidStatus> {
        match s.trim() {
            "Canceled" => Ok(Self::Canceled),
            "Failed" => Ok(Self::Failed),
            "Finished" => Ok(Self::Finished),
            "Killed" => Ok(Self::Killed),
            "Pending" => Ok(Self::Pending),
            "Running" => Ok(Self::Running),
            "Suspended" => Ok(Self::Suspended),
            "" => Ok(Self::Unknown),
            other => Err(InvalidStatus(other.to_string())),
        }
    }
}

/// Error returned for an unrecognized status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job status: {0:?}")]
pub struct InvalidStatus(pub String);

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JobStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
