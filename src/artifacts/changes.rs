//! Persisting a phase's filesystem-change report.

use std::path::PathBuf;

use crate::artifacts::replace_file;
use crate::sandbox::phase::Phase;

/// Writes change reports into an output directory.
pub struct ChangeRecorder {
    output_dir: PathBuf,
}

impl ChangeRecorder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Write `report` verbatim to `<phase>-diff.txt`. An empty report still
    /// produces an (empty) file.
    pub async fn record(&self, phase: Phase, report: &str) -> std::io::Result<PathBuf> {
        let path = self.output_dir.join(phase.change_report_name());

        if report.trim().is_empty() {
            tracing::info!(phase = %phase, "docker diff: nothing changed");
        } else {
            tracing::info!(phase = %phase, "docker diff:\n{}", report);
        }

        replace_file(&path, report.as_bytes()).await.map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("Failed to write change report {}: {}", path.display(), e),
            )
        })?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_report_written_verbatim() {
        let dir = TempDir::new().unwrap();
        let report = "A /app/target\nC /tmp\nD /app/build.sh\n";

        let path = ChangeRecorder::new(dir.path())
            .record(Phase::Build, report)
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("build-diff.txt"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), report);
    }

    #[tokio::test]
    async fn test_empty_report_still_written() {
        let dir = TempDir::new().unwrap();

        let path = ChangeRecorder::new(dir.path())
            .record(Phase::Run, "")
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("run-diff.txt"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "");
    }

    #[tokio::test]
    async fn test_missing_output_dir_is_an_error() {
        let dir = TempDir::new().unwrap();
        let recorder = ChangeRecorder::new(dir.path().join("gone"));

        assert!(recorder.record(Phase::Run, "C /x\n").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_planted_report_symlink_is_replaced() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let host_file = dir.path().join("host.txt");
        std::fs::write(&host_file, "HOST").unwrap();
        std::os::unix::fs::symlink(&host_file, out.join("build-diff.txt")).unwrap();

        let path = ChangeRecorder::new(&out)
            .record(Phase::Build, "A /app/a.out\n")
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&host_file).unwrap(), "HOST");
        assert!(!std::fs::symlink_metadata(&path).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A /app/a.out\n");
    }
}
