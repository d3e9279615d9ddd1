//! Fail-fast validation of job records.
//!
//! Nothing here writes to disk: a rejected job leaves no trace.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::error::JobError;
use crate::job::{ArchiveValidator, Job, JobRequest, Submission};

/// Turns a [`JobRequest`] into a [`Job`] or a client-fault rejection.
pub struct JobValidator {
    archives: Arc<dyn ArchiveValidator>,
    /// Development mode: prepended to every path parameter.
    path_prefix: Option<String>,
}

impl JobValidator {
    pub fn new(archives: Arc<dyn ArchiveValidator>) -> Self {
        Self {
            archives,
            path_prefix: None,
        }
    }

    /// Prefix `submission`, `assessment` and `output_path` with `root`.
    pub fn with_path_prefix(mut self, root: Option<String>) -> Self {
        self.path_prefix = root;
        self
    }

    /// Validate `request`. The first failing check wins.
    pub fn validate(&self, request: &JobRequest) -> Result<Job, JobError> {
        let image = required(&request.docker_image_name_tag, "docker_image_name_tag")?;
        let output_path = required(&request.output_path, "output_path")?;
        let submission = required(&request.submission, "submission")?;
        let assessment = required(&request.assessment, "assessment")?;
        let timestamp = required(&request.timestamp, "timestamp")?;
        let task_id = required(&request.task_id, "task_id")?;

        let image = as_str(image, "docker_image_name_tag")?;
        let output_path = as_str(output_path, "output_path")?;
        let submission = as_str(submission, "submission")?;
        let assessment = as_str(assessment, "assessment")?;

        if let Some(root) = &self.path_prefix {
            tracing::debug!("Development mode: prefixing job paths with {}", root);
        }

        let task_id = task_id
            .as_i64()
            .ok_or_else(|| JobError::InvalidTaskId(task_id.to_string()))?;

        if !valid_image_reference(image) {
            return Err(JobError::InvalidImage(image.to_string()));
        }

        if output_path.trim().is_empty() {
            return Err(JobError::InvalidOutputPath);
        }

        let submission = if is_flag_set(&request.zip_file) {
            Submission::Archive(self.resolve(submission))
        } else {
            Submission::Directory(self.resolve(submission))
        };
        let assessment = self.resolve(assessment);

        match &submission {
            Submission::Archive(path) if !path.exists() => {
                return Err(JobError::ArchiveNotFound(path.clone()));
            }
            Submission::Directory(path) if !path.is_dir() => {
                return Err(JobError::FolderNotFound(path.clone()));
            }
            _ => {}
        }

        if !assessment.exists() {
            return Err(JobError::ArchiveNotFound(assessment));
        }

        if let Submission::Archive(path) = &submission
            && !self.archives.is_valid(path)
        {
            return Err(JobError::InvalidArchive(path.clone()));
        }

        if !self.archives.is_valid(&assessment) {
            return Err(JobError::InvalidArchive(assessment));
        }

        Ok(Job {
            task_id,
            timestamp: timestamp.clone(),
            submission,
            assessment,
            image: image.trim().to_string(),
            output_dir: self.resolve(output_path),
            skip_cleanup: is_flag_set(&request.skip_rm),
        })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        match &self.path_prefix {
            Some(root) => PathBuf::from(format!("{}{}", root, path)),
            None => PathBuf::from(path),
        }
    }
}

fn required<'a>(value: &'a Option<Value>, name: &'static str) -> Result<&'a Value, JobError> {
    match value {
        None | Some(Value::Null) => Err(JobError::MissingParam(name)),
        Some(v) => Ok(v),
    }
}

fn as_str<'a>(value: &'a Value, field: &'static str) -> Result<&'a str, JobError> {
    value.as_str().ok_or(JobError::InvalidParam {
        field,
        expected: "a string",
    })
}

/// Integer `1` (or `true`) turns a flag on; anything else leaves it off.
fn is_flag_set(value: &Option<Value>) -> bool {
    match value {
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}

/// `name[:tag]` or `name@digest` with no whitespace and no leading dash.
fn valid_image_reference(image: &str) -> bool {
    let image = image.trim();
    if image.is_empty() || image.starts_with('-') {
        return false;
    }
    if image.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return false;
    }

    let last = image.rsplit('/').next().unwrap_or(image);
    if last.contains('@') {
        return !last.starts_with('@') && !last.ends_with('@');
    }
    match last.split_once(':') {
        Some((name, tag)) => !name.is_empty() && !tag.is_empty(),
        None => !last.is_empty(),
    }
}
