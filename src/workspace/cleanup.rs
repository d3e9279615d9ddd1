//! Guaranteed workspace teardown.
//!
//! The pipeline holds one [`CleanupManager`] per job. It is bound to the
//! workspace once validation has passed and consumed by [`CleanupManager::finish`]
//! on the way out, which does the recursive removal on the blocking pool. If
//! the job future is dropped or panics before that, `Drop` performs the same
//! cleanup inline, so it runs exactly once on every exit path.

use std::path::PathBuf;

use crate::workspace::fs::clear_contents;

/// What the cleanup step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Workspace contents removed.
    Removed { entries: usize },
    /// The job asked to keep its workspace.
    Skipped,
    /// No workspace was bound (the job was rejected before staging).
    NothingBound,
    /// Removal failed; the job outcome is unaffected.
    Failed(String),
}

#[derive(Debug)]
struct Target {
    workspace: PathBuf,
    skip: bool,
}

/// Runs workspace cleanup exactly once per job.
#[derive(Debug, Default)]
pub struct CleanupManager {
    target: Option<Target>,
    finished: bool,
}

impl CleanupManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the job's workspace. `skip` keeps it for inspection.
    pub fn bind(&mut self, workspace: impl Into<PathBuf>, skip: bool) {
        self.target = Some(Target {
            workspace: workspace.into(),
            skip,
        });
    }

    /// Run the cleanup. Consumes the manager so it cannot run twice.
    pub async fn finish(mut self) -> CleanupOutcome {
        self.finished = true;
        let Some(target) = self.target.take() else {
            return CleanupOutcome::NothingBound;
        };

        match tokio::task::spawn_blocking(move || target.clean()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Workspace cleanup task failed: {}", e);
                CleanupOutcome::Failed(e.to_string())
            }
        }
    }
}

impl Target {
    fn clean(&self) -> CleanupOutcome {
        if self.skip {
            tracing::info!("Keeping workspace {} (skip_rm set)", self.workspace.display());
            return CleanupOutcome::Skipped;
        }

        tracing::info!("Recursively force removing: {}/*", self.workspace.display());
        match clear_contents(&self.workspace) {
            Ok(entries) => CleanupOutcome::Removed { entries },
            Err(e) => {
                tracing::error!("Failed to clean workspace {}: {}", self.workspace.display(), e);
                CleanupOutcome::Failed(e.to_string())
            }
        }
    }
}

impl Drop for CleanupManager {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(target) = self.target.take() {
            tracing::warn!("Job ended without explicit cleanup, cleaning up on drop");
            let _ = target.clean();
        }
    }
}
