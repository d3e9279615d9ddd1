//! Accumulated job artifacts.
//!
//! A job's output directory ends up holding:
//!
//! ```text
//! <output_path>/
//!   output.txt       both phase logs, build first, blank line between
//!   output.yaml      union of both phase status documents (+ exit codes)
//!   build-diff.txt   container filesystem changes after the build phase
//!   run-diff.txt     container filesystem changes after the run phase
//! ```

mod changes;
mod merge;

use std::io;
use std::path::Path;

use tokio::io::AsyncWriteExt;

pub use changes::ChangeRecorder;
pub use merge::{
    ACCUMULATED_LOG, ACCUMULATED_STATUS, MergeError, MergeSummary, OutputMerger,
    append_log_section, merge_status_documents,
};

/// Write `contents` to a fresh file beside `path`, then rename it over
/// `path`. Whatever was at `path` (including a symlink) is replaced, never
/// written through.
pub(crate) async fn replace_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let staging = path.with_file_name(format!(
        ".{}.{}.tmp",
        name.to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    ));

    let result = async {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)
            .await?;
        file.write_all(contents).await?;
        file.flush().await?;
        tokio::fs::rename(&staging, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&staging).await;
    }
    result
}
