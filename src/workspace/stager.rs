//! Staging a job's submission and assessment into the workspace.

use std::path::{Path, PathBuf};

use crate::job::Submission;
use crate::workspace::StagingError;
use crate::workspace::fs::{clear_contents, copy_dir_contents, extract_flat};

/// What went into the workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagingReport {
    /// Entries left behind by an earlier job and removed first.
    pub residue_removed: usize,
    pub submission_files: usize,
    pub assessment_files: usize,
}

/// Resets and populates one workspace directory.
#[derive(Debug, Clone)]
pub struct WorkspaceStager {
    root: PathBuf,
}

impl WorkspaceStager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Make the workspace exist and be empty.
    pub fn reset(&self) -> Result<usize, StagingError> {
        let reset_err = |source| StagingError::Reset {
            path: self.root.clone(),
            source,
        };

        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(reset_err)?;
            return Ok(0);
        }

        tracing::info!("Recursively force removing: {}/*", self.root.display());
        clear_contents(&self.root).map_err(reset_err)
    }

    /// Reset the workspace, then lay down the submission followed by the
    /// assessment. Assessment files overwrite submission files of the same
    /// name.
    pub fn stage(
        &self,
        submission: &Submission,
        assessment: &Path,
    ) -> Result<StagingReport, StagingError> {
        let residue_removed = self.reset()?;

        let submission_files = match submission {
            Submission::Archive(archive) => {
                tracing::info!("Extracting submission from zip file");
                extract_flat(archive, &self.root)?
            }
            Submission::Directory(dir) => {
                tracing::info!("Copying submission files");
                copy_dir_contents(dir, &self.root).map_err(|source| StagingError::Copy {
                    from: dir.clone(),
                    source,
                })?
            }
        };

        tracing::info!("Extracting assessment from zip file");
        let assessment_files = extract_flat(assessment, &self.root)?;

        Ok(StagingReport {
            residue_removed,
            submission_files,
            assessment_files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::fs::tests::write_zip;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_reset_creates_missing_workspace() {
        let dir = TempDir::new().unwrap();
        let stager = WorkspaceStager::new(dir.path().join("app/sandbox"));

        assert_eq!(stager.reset().unwrap(), 0);
        assert!(stager.root().is_dir());
    }

    #[test]
    fn test_stage_clears_residue_first() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("sandbox");
        fs::create_dir_all(root.join("old_build/obj")).unwrap();
        fs::write(root.join("stale.txt"), "from last job").unwrap();

        let sub = dir.path().join("sub.zip");
        let assess = dir.path().join("assess.zip");
        write_zip(&sub, &[("Program.cs", "class P {}")]);
        write_zip(&assess, &[("run.sh", "dotnet test")]);

        let report = WorkspaceStager::new(&root)
            .stage(&Submission::Archive(sub), &assess)
            .unwrap();

        assert_eq!(
            report,
            StagingReport {
                residue_removed: 2,
                submission_files: 1,
                assessment_files: 1
            }
        );
        assert!(!root.join("stale.txt").exists());
        assert!(!root.join("old_build").exists());
        assert!(root.join("Program.cs").exists());
        assert!(root.join("run.sh").exists());
    }

    #[test]
    fn test_assessment_overwrites_submission() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("sandbox");
        let sub = dir.path().join("sub.zip");
        let assess = dir.path().join("assess.zip");
        write_zip(&sub, &[("student/run.sh", "rm -rf /"), ("main.c", "int main;")]);
        write_zip(&assess, &[("tests/run.sh", "make test")]);

        WorkspaceStager::new(&root)
            .stage(&Submission::Archive(sub), &assess)
            .unwrap();

        assert_eq!(fs::read_to_string(root.join("run.sh")).unwrap(), "make test");
        assert_eq!(fs::read_to_string(root.join("main.c")).unwrap(), "int main;");
    }

    #[test]
    fn test_directory_submission_is_copied() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("sandbox");
        let sub = dir.path().join("submission");
        fs::create_dir_all(sub.join("src")).unwrap();
        fs::write(sub.join("src/lib.rs"), "pub fn f() {}").unwrap();
        let assess = dir.path().join("assess.zip");
        write_zip(&assess, &[("build.sh", "cargo build")]);

        let report = WorkspaceStager::new(&root)
            .stage(&Submission::Directory(sub), &assess)
            .unwrap();

        assert_eq!(report.submission_files, 1);
        assert!(root.join("src/lib.rs").exists());
        assert!(root.join("build.sh").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_assessment_replaces_submission_symlink_without_following_it() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("sandbox");
        let host_file = dir.path().join("host.conf");
        fs::write(&host_file, "HOST ORIGINAL").unwrap();

        let sub = dir.path().join("submission");
        fs::create_dir_all(&sub).unwrap();
        std::os::unix::fs::symlink(&host_file, sub.join("run.sh")).unwrap();
        let assess = dir.path().join("assess.zip");
        write_zip(&assess, &[("run.sh", "make test")]);

        WorkspaceStager::new(&root)
            .stage(&Submission::Directory(sub), &assess)
            .unwrap();

        assert_eq!(fs::read_to_string(&host_file).unwrap(), "HOST ORIGINAL");
        let staged = root.join("run.sh");
        assert!(!fs::symlink_metadata(&staged).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&staged).unwrap(), "make test");
    }
}
