// SPDX-License-Identifier: MIT

//! Request taxonomy: typed parsing of launcher messages.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use lp_core::{timestamp, Job, JobStatus, User};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const TYPE_HEARTBEAT: i64 = 0;
const TYPE_BOOTSTRAP: i64 = 1;
const TYPE_SUBMIT_JOB: i64 = 2;
const TYPE_GET_JOB: i64 = 3;
const TYPE_GET_JOB_STATUS: i64 = 4;
const TYPE_CONTROL_JOB: i64 = 5;
const TYPE_GET_JOB_OUTPUT: i64 = 6;
const TYPE_GET_JOB_RESOURCE_UTIL: i64 = 7;
const TYPE_GET_JOB_NETWORK: i64 = 8;
const TYPE_GET_CLUSTER_INFO: i64 = 9;

/// A semantic API version, exchanged during bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: i32,
    pub minor: i32,
    pub patch: i32,
}

impl Version {
    pub const fn new(major: i32, minor: i32, patch: i32) -> Self {
        Self { major, minor, patch }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Who a request acts as.
///
/// `username == "*"` is administrator scope; `requestUsername` then names
/// the real account behind the admin session and is used to fill in job
/// ownership on submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestScope {
    pub user: User,
    pub request_username: String,
}

impl RequestScope {
    /// The owner a submitted job defaults to when its body names none.
    pub fn submit_owner(&self) -> User {
        if self.user.is_all_users() {
            User::named(self.request_username.clone())
        } else {
            self.user.clone()
        }
    }
}

/// Which job(s) a request addresses: a specific id or `"*"` for all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTarget {
    All,
    Id(String),
}

impl JobTarget {
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Id(id) => Some(id),
        }
    }
}

/// Filters on a GetJob listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilters {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub statuses: Option<Vec<JobStatus>>,
    pub tags: Option<BTreeSet<String>>,
    pub fields: Option<BTreeSet<String>>,
}

/// Control operation requested on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOperation {
    Suspend,
    Resume,
    Stop,
    Kill,
    Cancel,
}

impl ControlOperation {
    fn from_wire(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Suspend),
            1 => Some(Self::Resume),
            2 => Some(Self::Stop),
            3 => Some(Self::Kill),
            4 => Some(Self::Cancel),
            _ => None,
        }
    }
}

lp_core::simple_display! {
    ControlOperation {
        Suspend => "suspend",
        Resume => "resume",
        Stop => "stop",
        Kill => "kill",
        Cancel => "cancel",
    }
}

/// Which output channels an output stream covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    Stdout,
    Stderr,
    Both,
}

impl OutputType {
    fn from_wire(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Stdout),
            1 => Some(Self::Stderr),
            2 => Some(Self::Both),
            _ => None,
        }
    }
}

/// The closed set of requests the launcher may send.
#[derive(Debug, Clone)]
pub enum Request {
    Heartbeat {
        request_id: u64,
    },
    Bootstrap {
        request_id: u64,
        version: Version,
    },
    SubmitJob {
        request_id: u64,
        scope: RequestScope,
        job: Box<Job>,
    },
    GetJob {
        request_id: u64,
        scope: RequestScope,
        target: JobTarget,
        filters: JobFilters,
    },
    GetJobStatus {
        request_id: u64,
        scope: RequestScope,
        target: JobTarget,
        cancel: bool,
    },
    ControlJob {
        request_id: u64,
        scope: RequestScope,
        job_id: String,
        operation: ControlOperation,
    },
    GetJobOutput {
        request_id: u64,
        scope: RequestScope,
        job_id: String,
        output_type: OutputType,
        cancel: bool,
    },
    GetJobResourceUtil {
        request_id: u64,
        scope: RequestScope,
        job_id: String,
        cancel: bool,
    },
    GetJobNetwork {
        request_id: u64,
        scope: RequestScope,
        job_id: String,
    },
    GetClusterInfo {
        request_id: u64,
        scope: RequestScope,
    },
}

impl Request {
    pub fn request_id(&self) -> u64 {
        match self {
            Self::Heartbeat { request_id }
            | Self::Bootstrap { request_id, .. }
            | Self::SubmitJob { request_id, .. }
            | Self::GetJob { request_id, .. }
            | Self::GetJobStatus { request_id, .. }
            | Self::ControlJob { request_id, .. }
            | Self::GetJobOutput { request_id, .. }
            | Self::GetJobResourceUtil { request_id, .. }
            | Self::GetJobNetwork { request_id, .. }
            | Self::GetClusterInfo { request_id, .. } => *request_id,
        }
    }
}

/// Why a request could not be parsed.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed request JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("{message}")]
    Invalid { request_id: u64, message: String },

    #[error("unsupported request type {message_type}")]
    Unsupported { request_id: u64, message_type: i64 },
}

impl RequestError {
    /// The request id to address the error response to (0 when unknown).
    pub fn request_id(&self) -> u64 {
        match self {
            Self::MalformedJson(_) => 0,
            Self::Invalid { request_id, .. } | Self::Unsupported { request_id, .. } => *request_id,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserFields {
    #[serde(default)]
    username: String,
    #[serde(default)]
    request_username: String,
}

impl UserFields {
    fn into_scope(self) -> RequestScope {
        RequestScope { user: User::named(self.username), request_username: self.request_username }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobIdFields {
    #[serde(flatten)]
    user: UserFields,
    #[serde(default)]
    job_id: String,
    #[serde(default)]
    encoded_job_id: String,
}

impl JobIdFields {
    /// The effective job id: `encodedJobId` wins when present.
    fn effective_id(&self) -> &str {
        if self.encoded_job_id.is_empty() {
            &self.job_id
        } else {
            &self.encoded_job_id
        }
    }
}

#[derive(Deserialize)]
struct BootstrapFields {
    version: Version,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitFields {
    #[serde(flatten)]
    user: UserFields,
    job: Box<Job>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetJobFields {
    #[serde(flatten)]
    base: JobIdFields,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
    #[serde(default)]
    statuses: Option<Vec<String>>,
    #[serde(default)]
    tags: Option<BTreeSet<String>>,
    #[serde(default)]
    fields: Option<BTreeSet<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelableFields {
    #[serde(flatten)]
    base: JobIdFields,
    #[serde(default)]
    cancel: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControlFields {
    #[serde(flatten)]
    base: JobIdFields,
    operation: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputFields {
    #[serde(flatten)]
    base: JobIdFields,
    #[serde(default = "default_output_type")]
    output_type: i64,
    #[serde(default)]
    cancel: bool,
}

fn default_output_type() -> i64 {
    2 // both
}

fn invalid(request_id: u64, message: impl Into<String>) -> RequestError {
    RequestError::Invalid { request_id, message: message.into() }
}

fn payload<T: serde::de::DeserializeOwned>(
    request_id: u64,
    value: Value,
) -> Result<T, RequestError> {
    serde_json::from_value(value).map_err(|e| invalid(request_id, e.to_string()))
}

/// Scope for requests that require a real (or admin) user.
fn required_scope(request_id: u64, user: UserFields) -> Result<RequestScope, RequestError> {
    let scope = user.into_scope();
    if scope.user.is_empty() {
        return Err(invalid(request_id, "'username' must not be empty"));
    }
    Ok(scope)
}

fn required_target(request_id: u64, base: &JobIdFields) -> Result<JobTarget, RequestError> {
    match base.effective_id() {
        "" => Err(invalid(request_id, "'jobId' must not be empty")),
        "*" => Ok(JobTarget::All),
        id => Ok(JobTarget::Id(id.to_string())),
    }
}

fn specific_job_id(request_id: u64, base: &JobIdFields) -> Result<String, RequestError> {
    match required_target(request_id, base)? {
        JobTarget::All => Err(invalid(request_id, "'jobId' must name a specific job")),
        JobTarget::Id(id) => Ok(id),
    }
}

fn parse_time(
    request_id: u64,
    label: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RequestError> {
    match value {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => timestamp::parse(&s)
            .map(Some)
            .map_err(|_| invalid(request_id, format!("invalid {label}: {s:?}"))),
    }
}

/// Parse one framed payload into a typed request.
pub fn parse_request(text: &str) -> Result<Request, RequestError> {
    let value: Value = serde_json::from_str(text)?;
    let request_id = value.get("requestId").and_then(Value::as_u64).unwrap_or(0);
    let Some(message_type) = value.get("messageType").and_then(Value::as_i64) else {
        return Err(invalid(request_id, "missing or invalid 'messageType'"));
    };

    match message_type {
        TYPE_HEARTBEAT => Ok(Request::Heartbeat { request_id }),

        TYPE_BOOTSTRAP => {
            let fields: BootstrapFields = payload(request_id, value)?;
            Ok(Request::Bootstrap { request_id, version: fields.version })
        }

        TYPE_SUBMIT_JOB => {
            // An empty username is allowed here: the owner may come from the
            // job body or, for admin requests, from requestUsername.
            let fields: SubmitFields = payload(request_id, value)?;
            Ok(Request::SubmitJob { request_id, scope: fields.user.into_scope(), job: fields.job })
        }

        TYPE_GET_JOB => {
            let fields: GetJobFields = payload(request_id, value)?;
            let target = required_target(request_id, &fields.base)?;
            let scope = required_scope(request_id, fields.base.user)?;
            let statuses = match fields.statuses {
                None => None,
                Some(raw) => {
                    let mut parsed = Vec::with_capacity(raw.len());
                    for s in raw {
                        parsed.push(
                            JobStatus::parse(&s)
                                .map_err(|e| invalid(request_id, format!("invalid status: {e}")))?,
                        );
                    }
                    Some(parsed)
                }
            };
            let filters = JobFilters {
                start_time: parse_time(request_id, "startTime", fields.start_time)?,
                end_time: parse_time(request_id, "endTime", fields.end_time)?,
                statuses,
                tags: fields.tags,
                fields: fields.fields,
            };
            Ok(Request::GetJob { request_id, scope, target, filters })
        }

        TYPE_GET_JOB_STATUS => {
            let fields: CancelableFields = payload(request_id, value)?;
            let target = required_target(request_id, &fields.base)?;
            let scope = required_scope(request_id, fields.base.user)?;
            Ok(Request::GetJobStatus { request_id, scope, target, cancel: fields.cancel })
        }

        TYPE_CONTROL_JOB => {
            let fields: ControlFields = payload(request_id, value)?;
            let job_id = specific_job_id(request_id, &fields.base)?;
            let scope = required_scope(request_id, fields.base.user)?;
            let operation = ControlOperation::from_wire(fields.operation).ok_or_else(|| {
                invalid(request_id, format!("invalid control operation {}", fields.operation))
            })?;
            Ok(Request::ControlJob { request_id, scope, job_id, operation })
        }

        TYPE_GET_JOB_OUTPUT => {
            let fields: OutputFields = payload(request_id, value)?;
            let job_id = specific_job_id(request_id, &fields.base)?;
            let scope = required_scope(request_id, fields.base.user)?;
            let output_type = OutputType::from_wire(fields.output_type).ok_or_else(|| {
                invalid(request_id, format!("invalid output type {}", fields.output_type))
            })?;
            Ok(Request::GetJobOutput { request_id, scope, job_id, output_type, cancel: fields.cancel })
        }

        TYPE_GET_JOB_RESOURCE_UTIL => {
            let fields: CancelableFields = payload(request_id, value)?;
            let job_id = specific_job_id(request_id, &fields.base)?;
            let scope = required_scope(request_id, fields.base.user)?;
            Ok(Request::GetJobResourceUtil { request_id, scope, job_id, cancel: fields.cancel })
        }

        TYPE_GET_JOB_NETWORK => {
            let fields: CancelableFields = payload(request_id, value)?;
            let job_id = specific_job_id(request_id, &fields.base)?;
            let scope = required_scope(request_id, fields.base.user)?;
            Ok(Request::GetJobNetwork { request_id, scope, job_id })
        }

        TYPE_GET_CLUSTER_INFO => {
            let fields: UserFields = payload(request_id, value)?;
            let scope = required_scope(request_id, fields)?;
            Ok(Request::GetClusterInfo { request_id, scope })
        }

        other => Err(RequestError::Unsupported { request_id, message_type: other }),
    }
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
