//! Records sent back to the transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Fault, JobError};

/// Message shown to callers for every server fault.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Success acknowledgment / completion record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub task_id: i64,
    pub timestamp: Value,
}

/// Failure payload. `task_id` and `timestamp` are echoed as received, even
/// when they were the reason for the rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePayload {
    pub error: String,
    pub task_id: Value,
    pub timestamp: Value,
}

/// How a job ended, as reported to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(CompletionRecord),
    /// Client fault, with the specific reason.
    Rejected(FailurePayload),
    /// Server fault, with the generic message.
    Failed(FailurePayload),
}

impl JobOutcome {
    /// Classify `err`. Server-fault details are not carried over.
    pub fn from_error(err: &JobError, task_id: Value, timestamp: Value) -> Self {
        match err.fault() {
            Fault::Client => JobOutcome::Rejected(FailurePayload {
                error: err.to_string(),
                task_id,
                timestamp,
            }),
            Fault::Server => JobOutcome::Failed(FailurePayload {
                error: INTERNAL_ERROR_MESSAGE.to_string(),
                task_id,
                timestamp,
            }),
        }
    }

    pub fn fault(&self) -> Option<Fault> {
        match self {
            JobOutcome::Completed(_) => None,
            JobOutcome::Rejected(_) => Some(Fault::Client),
            JobOutcome::Failed(_) => Some(Fault::Server),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }

    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        self.fault().map(|f| f.status_code()).unwrap_or(200)
    }

    pub fn to_json(&self) -> Value {
        let value = match self {
            JobOutcome::Completed(record) => serde_json::to_value(record),
            JobOutcome::Rejected(payload) | JobOutcome::Failed(payload) => {
                serde_json::to_value(payload)
            }
        };
        value.unwrap_or(Value::Null)
    }
}
