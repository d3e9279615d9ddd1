//! The job workspace: the directory mounted at `/app` in every phase
//! container.
//!
//! It is empty immediately before staging, regardless of what an earlier job
//! left behind, and emptied again when the job ends unless the job asked to
//! keep it.

mod cleanup;
pub(crate) mod fs;
mod stager;

use std::path::PathBuf;

pub use cleanup::{CleanupManager, CleanupOutcome};
pub use fs::{clear_contents, copy_dir_contents, extract_flat};
pub use stager::{StagingReport, WorkspaceStager};

/// Errors while preparing the workspace.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Failed to reset workspace {}: {source}", path.display())]
    Reset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to extract {}: {source}", archive.display())]
    Extract {
        archive: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy {} into the workspace: {source}", from.display())]
    Copy {
        from: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
