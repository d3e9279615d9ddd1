//! Error types for job processing.

use std::path::PathBuf;

use crate::artifacts::MergeError;
use crate::sandbox::{Phase, SandboxError};
use crate::workspace::StagingError;

/// Who is to blame for a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The job itself is invalid. Reported with its reason, never retried.
    Client,
    /// Infrastructure or unexpected failure. Reported generically.
    Server,
}

impl Fault {
    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        match self {
            Fault::Client => 400,
            Fault::Server => 500,
        }
    }
}

/// Errors that end a job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("PARAM `{0}` is required")]
    MissingParam(&'static str),

    #[error("PARAM `{field}` must be {expected}")]
    InvalidParam {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Invalid task_id: {0}")]
    InvalidTaskId(String),

    #[error("A valid Docker image name:tag is needed")]
    InvalidImage(String),

    #[error("A valid output_path is needed")]
    InvalidOutputPath,

    #[error("Zip file not found: {}", .0.display())]
    ArchiveNotFound(PathBuf),

    #[error("Folder not found: {}", .0.display())]
    FolderNotFound(PathBuf),

    #[error("Invalid zip file: {}", .0.display())]
    InvalidArchive(PathBuf),

    #[error("Workspace staging failed: {0}")]
    Staging(#[from] StagingError),

    #[error("Output merge failed: {0}")]
    Merge(#[from] MergeError),

    /// The reserved container name stays taken until this is fixed.
    #[error("Container {name} for the {phase} phase was not removed")]
    ContainerNotRemoved { phase: Phase, name: String },

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    pub fn fault(&self) -> Fault {
        match self {
            JobError::MissingParam(_)
            | JobError::InvalidParam { .. }
            | JobError::InvalidTaskId(_)
            | JobError::InvalidImage(_)
            | JobError::InvalidOutputPath
            | JobError::ArchiveNotFound(_)
            | JobError::FolderNotFound(_)
            | JobError::InvalidArchive(_) => Fault::Client,
            JobError::Staging(_)
            | JobError::Merge(_)
            | JobError::ContainerNotRemoved { .. }
            | JobError::Sandbox(_)
            | JobError::Io(_)
            | JobError::Internal(_) => Fault::Server,
        }
    }
}
