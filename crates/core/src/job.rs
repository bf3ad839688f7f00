// SPDX-License-Identifier: MIT

//! The canonical job entity and its per-job lock.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ConfigValue, ContainerSpec, JobStatus, Mount, User};

/// A job with its per-job lock.
///
/// All reads of mutable fields (status, times, pid, exit code, message) and
/// all serialization must hold this lock. When a registry lock (repository,
/// stream manager, pruner) is also needed, it is always taken first.
pub type SharedJob = Arc<Mutex<Job>>;

/// Wrap a job in its lock.
pub fn shared(job: Job) -> SharedJob {
    Arc::new(Mutex::new(job))
}

/// An environment entry. Ordered, duplicates allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// A network port the job asks to have exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposedPort {
    pub target_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_port: Option<u16>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

/// A resource limit request (`type` is backend-defined, e.g. "memory").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimit {
    #[serde(rename = "type")]
    pub limit_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_value: String,
}

/// A placement constraint name/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementConstraint {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// The unit of work managed by the plugin.
///
/// Field names mirror the launcher wire format exactly; this struct is the
/// persisted form as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster: String,
    #[serde(default)]
    pub user: User,
    /// Shell command line. Exactly one of `command`/`exe` is non-empty on a
    /// validated job, unless a container image stands in for both.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub exe: String,
    #[serde(default, rename = "args", skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<EnvVar>,
    #[serde(default, rename = "stdin", skip_serializing_if = "String::is_empty")]
    pub standard_in: String,
    #[serde(default, rename = "stdoutFile", skip_serializing_if = "String::is_empty")]
    pub stdout_file: String,
    #[serde(default, rename = "stderrFile", skip_serializing_if = "String::is_empty")]
    pub stderr_file: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub working_directory: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exposed_ports: Vec<ExposedPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queues: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_limits: Vec<ResourceLimit>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub placement_constraints: Vec<PlacementConstraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<ConfigValue>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::clock::timestamp::opt"
    )]
    pub submission_time: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::clock::timestamp::opt"
    )]
    pub last_update_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status_message: String,
}

impl Default for Job {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            cluster: String::new(),
            user: User::empty(),
            command: String::new(),
            exe: String::new(),
            arguments: Vec::new(),
            environment: Vec::new(),
            standard_in: String::new(),
            stdout_file: String::new(),
            stderr_file: String::new(),
            working_directory: String::new(),
            host: String::new(),
            container: None,
            exposed_ports: Vec::new(),
            mounts: Vec::new(),
            queues: Vec::new(),
            resource_limits: Vec::new(),
            placement_constraints: Vec::new(),
            config: Vec::new(),
            tags: BTreeSet::new(),
            submission_time: None,
            last_update_time: None,
            pid: None,
            exit_code: None,
            status: JobStatus::Unknown,
            status_message: String::new(),
        }
    }
}

/// Validation failure for a submitted or persisted job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("multiple conflicting values set: both 'command' and 'exe' are non-empty")]
    ConflictingCommand,
    #[error("required value was not set: one of 'command' or 'exe' (or a container image)")]
    MissingCommand,
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl Job {
    /// Validate a job against the submission invariants.
    pub fn validate(&self) -> Result<(), JobError> {
        if !self.command.is_empty() && !self.exe.is_empty() {
            return Err(JobError::ConflictingCommand);
        }
        if self.command.is_empty() && self.exe.is_empty() && self.container.is_none() {
            return Err(JobError::MissingCommand);
        }
        if let (Some(submitted), Some(updated)) = (self.submission_time, self.last_update_time) {
            if updated < submitted {
                return Err(JobError::InvalidValue(format!(
                    "lastUpdateTime {updated} precedes submissionTime {submitted}"
                )));
            }
        }
        for value in &self.config {
            value.validate().map_err(JobError::InvalidValue)?;
        }
        Ok(())
    }

    /// Whether the job has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the job carries every requested tag.
    pub fn matches_tags(&self, requested: &BTreeSet<String>) -> bool {
        requested.iter().all(|tag| self.tags.contains(tag))
    }

    /// Look up a custom config value by name.
    pub fn config_value(&self, name: &str) -> Option<&str> {
        self.config.iter().find(|v| v.name == name).map(|v| v.value.as_str())
    }

    /// Serialize to wire JSON, optionally projected to a field set.
    ///
    /// `id` is always included; unknown projected names are ignored.
    pub fn to_projected_json(&self, fields: Option<&BTreeSet<String>>) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let (Some(fields), Value::Object(obj)) = (fields, &mut value) {
            obj.retain(|key, _| key == "id" || fields.contains(key));
        }
        value
    }

    /// The time from which the retention window is measured.
    pub fn retention_reference(&self) -> Option<DateTime<Utc>> {
        self.last_update_time.or(self.submission_time)
    }
}

crate::builder! {
    pub struct JobBuilder => Job {
        into {
            id: String = "job-1",
            name: String = "test-job",
            user: User = User::named("alice"),
            command: String = "",
            exe: String = "",
            stdout_file: String = "",
            stderr_file: String = "",
            working_directory: String = "",
            host: String = "",
            standard_in: String = "",
            cluster: String = "",
        }
        set {
            arguments: Vec<String> = Vec::new(),
            environment: Vec<EnvVar> = Vec::new(),
            mounts: Vec<Mount> = Vec::new(),
            queues: Vec<String> = Vec::new(),
            exposed_ports: Vec<ExposedPort> = Vec::new(),
            resource_limits: Vec<ResourceLimit> = Vec::new(),
            placement_constraints: Vec<PlacementConstraint> = Vec::new(),
            config: Vec<ConfigValue> = Vec::new(),
            tags: BTreeSet<String> = BTreeSet::new(),
            status: JobStatus = JobStatus::Pending,
            status_message: String = String::new(),
        }
        option {
            container: ContainerSpec = None,
            submission_time: DateTime<Utc> = None,
            last_update_time: DateTime<Utc> = None,
            pid: i32 = None,
            exit_code: i32 = None,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
