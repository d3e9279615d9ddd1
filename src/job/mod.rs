//! Jobs: the raw record a transport delivers and the validated form the
//! pipeline runs.

mod archive;
mod validator;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use archive::{ArchiveValidator, ZipArchiveValidator};
pub use validator::JobValidator;

/// Flat key/value job record as delivered by a transport.
///
/// Every field is kept as raw JSON so that type problems are reported as
/// client faults by [`JobValidator`] rather than failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub docker_image_name_tag: Option<Value>,
    #[serde(default)]
    pub output_path: Option<Value>,
    #[serde(default)]
    pub submission: Option<Value>,
    #[serde(default)]
    pub assessment: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub task_id: Option<Value>,
    /// `1` keeps the workspace after the job.
    #[serde(default)]
    pub skip_rm: Option<Value>,
    /// `1` means the submission is a zip archive, otherwise a directory.
    #[serde(default)]
    pub zip_file: Option<Value>,
}

impl JobRequest {
    /// Task identifier exactly as received, for echoing back.
    pub fn task_id_echo(&self) -> Value {
        self.task_id.clone().unwrap_or(Value::Null)
    }

    /// Timestamp exactly as received, for echoing back.
    pub fn timestamp_echo(&self) -> Value {
        self.timestamp.clone().unwrap_or(Value::Null)
    }
}

/// Where the submission comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Archive(PathBuf),
    Directory(PathBuf),
}

/// A validated job. Immutable once built.
#[derive(Debug, Clone)]
pub struct Job {
    pub task_id: i64,
    /// Opaque, echoed back unchanged.
    pub timestamp: Value,
    pub submission: Submission,
    /// Assessment archive.
    pub assessment: PathBuf,
    /// Container image reference.
    pub image: String,
    pub output_dir: PathBuf,
    pub skip_cleanup: bool,
}
