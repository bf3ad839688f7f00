// SPDX-License-Identifier: MIT

//! Response taxonomy: typed construction of launcher messages.

use lp_core::{ConfigValue, Job, JobStatus, PlacementConstraint, ResourceLimit};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::ErrorCode;
use crate::Version;

const TYPE_ERROR: i64 = -1;
const TYPE_HEARTBEAT: i64 = 0;
const TYPE_BOOTSTRAP: i64 = 1;
const TYPE_JOB_STATE: i64 = 2;
const TYPE_JOB_STATUS: i64 = 3;
const TYPE_CONTROL_JOB: i64 = 4;
const TYPE_JOB_OUTPUT: i64 = 5;
const TYPE_JOB_RESOURCE_UTIL: i64 = 6;
const TYPE_JOB_NETWORK: i64 = 7;
const TYPE_CLUSTER_INFO: i64 = 8;

/// One subscriber's position in a multi-stream response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSequence {
    pub request_id: u64,
    pub seq_id: u64,
}

/// Which channel an output chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Stdout,
    Stderr,
    Mixed,
}

lp_core::simple_display! {
    OutputKind {
        Stdout => "stdout",
        Stderr => "stderr",
        Mixed => "mixed",
    }
}

/// Cluster capabilities advertised by a backend.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    pub supports_containers: bool,
    pub allow_unknown_images: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub default_image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub queues: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource_limits: Vec<ResourceLimit>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub placement_constraints: Vec<PlacementConstraint>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<ConfigValue>,
}

/// Network placement of a job.
#[derive(Debug, Clone, Default)]
pub struct NetworkInfo {
    pub host: String,
    pub ip_addresses: Vec<String>,
}

/// The closed set of responses the plugin may send.
#[derive(Debug, Clone)]
pub enum Response {
    Heartbeat,
    Bootstrap {
        request_id: u64,
        version: Version,
    },
    /// A list of (possibly field-projected) job objects.
    JobState {
        request_id: u64,
        jobs: Vec<Value>,
    },
    /// Streamed job status update, fanned out to every listed sequence.
    JobStatus {
        sequences: Vec<StreamSequence>,
        job_id: String,
        name: String,
        status: JobStatus,
        status_message: String,
    },
    ControlJob {
        request_id: u64,
        status_message: String,
        operation_complete: bool,
    },
    /// Streamed output chunk, or the final `complete` marker.
    JobOutput {
        request_id: u64,
        seq_id: u64,
        complete: bool,
        output: Option<String>,
        output_type: Option<OutputKind>,
    },
    /// Streamed resource-utilization sample.
    JobResourceUtil {
        sequences: Vec<StreamSequence>,
        cpu_percent: f64,
        cpu_time: f64,
        virtual_memory: f64,
        resident_memory: f64,
    },
    JobNetwork {
        request_id: u64,
        network: NetworkInfo,
    },
    ClusterInfo {
        request_id: u64,
        info: ClusterInfo,
    },
    Error {
        request_id: u64,
        code: ErrorCode,
        message: String,
    },
}

impl Response {
    /// Build a status-stream response from a locked job.
    pub fn job_status(sequences: Vec<StreamSequence>, job: &Job) -> Self {
        Self::JobStatus {
            sequences,
            job_id: job.id.clone(),
            name: job.name.clone(),
            status: job.status,
            status_message: job.status_message.clone(),
        }
    }

    pub fn error(request_id: u64, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error { request_id, code, message: message.into() }
    }

    /// An output chunk for an open output stream.
    pub fn output_chunk(request_id: u64, seq_id: u64, output: String, kind: OutputKind) -> Self {
        Self::JobOutput {
            request_id,
            seq_id,
            complete: false,
            output: Some(output),
            output_type: Some(kind),
        }
    }

    /// The final response closing an output stream.
    pub fn output_complete(request_id: u64, seq_id: u64) -> Self {
        Self::JobOutput { request_id, seq_id, complete: true, output: None, output_type: None }
    }

    /// Heartbeats and errors reuse response id 0; everything else draws a
    /// fresh process-monotonic id.
    pub fn uses_zero_response_id(&self) -> bool {
        matches!(self, Self::Heartbeat | Self::Error { .. })
    }

    pub fn message_type(&self) -> i64 {
        match self {
            Self::Error { .. } => TYPE_ERROR,
            Self::Heartbeat => TYPE_HEARTBEAT,
            Self::Bootstrap { .. } => TYPE_BOOTSTRAP,
            Self::JobState { .. } => TYPE_JOB_STATE,
            Self::JobStatus { .. } => TYPE_JOB_STATUS,
            Self::ControlJob { .. } => TYPE_CONTROL_JOB,
            Self::JobOutput { .. } => TYPE_JOB_OUTPUT,
            Self::JobResourceUtil { .. } => TYPE_JOB_RESOURCE_UTIL,
            Self::JobNetwork { .. } => TYPE_JOB_NETWORK,
            Self::ClusterInfo { .. } => TYPE_CLUSTER_INFO,
        }
    }

    /// Serialize to a wire JSON object carrying the given response id.
    pub fn to_json(&self, response_id: u64) -> Value {
        let mut obj = Map::new();
        obj.insert("messageType".to_string(), json!(self.message_type()));
        obj.insert("responseId".to_string(), json!(response_id));

        match self {
            Self::Heartbeat => {
                obj.insert("requestId".to_string(), json!(0));
            }
            Self::Bootstrap { request_id, version } => {
                obj.insert("requestId".to_string(), json!(request_id));
                obj.insert("version".to_string(), json!(version));
            }
            Self::JobState { request_id, jobs } => {
                obj.insert("requestId".to_string(), json!(request_id));
                obj.insert("jobs".to_string(), Value::Array(jobs.clone()));
            }
            Self::JobStatus { sequences, job_id, name, status, status_message } => {
                obj.insert("requestId".to_string(), json!(0));
                obj.insert("sequences".to_string(), json!(sequences));
                obj.insert("id".to_string(), json!(job_id));
                obj.insert("name".to_string(), json!(name));
                obj.insert("status".to_string(), json!(status));
                obj.insert("statusMessage".to_string(), json!(status_message));
            }
            Self::ControlJob { request_id, status_message, operation_complete } => {
                obj.insert("requestId".to_string(), json!(request_id));
                obj.insert("statusMessage".to_string(), json!(status_message));
                obj.insert("operationComplete".to_string(), json!(operation_complete));
            }
            Self::JobOutput { request_id, seq_id, complete, output, output_type } => {
                obj.insert("requestId".to_string(), json!(request_id));
                obj.insert("seqId".to_string(), json!(seq_id));
                obj.insert("complete".to_string(), json!(complete));
                if let Some(output) = output {
                    obj.insert("output".to_string(), json!(output));
                }
                if let Some(kind) = output_type {
                    obj.insert("outputType".to_string(), json!(kind.to_string()));
                }
            }
            Self::JobResourceUtil { sequences, cpu_percent, cpu_time, virtual_memory, resident_memory } => {
                obj.insert("requestId".to_string(), json!(0));
                obj.insert("sequences".to_string(), json!(sequences));
                obj.insert("cpuPercent".to_string(), json!(cpu_percent));
                obj.insert("cpuTime".to_string(), json!(cpu_time));
                obj.insert("virtualMemory".to_string(), json!(virtual_memory));
                obj.insert("residentMemory".to_string(), json!(resident_memory));
            }
            Self::JobNetwork { request_id, network } => {
                obj.insert("requestId".to_string(), json!(request_id));
                obj.insert("host".to_string(), json!(network.host));
                obj.insert("ipAddresses".to_string(), json!(network.ip_addresses));
            }
            Self::ClusterInfo { request_id, info } => {
                obj.insert("requestId".to_string(), json!(request_id));
                let fields = serde_json::to_value(info).unwrap_or(Value::Null);
                if let Value::Object(fields) = fields {
                    obj.extend(fields);
                }
            }
            Self::Error { request_id, code, message } => {
                obj.insert("requestId".to_string(), json!(request_id));
                obj.insert("errorCode".to_string(), json!(code.code()));
                obj.insert("errorMessage".to_string(), json!(message));
            }
        }

        Value::Object(obj)
    }
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
