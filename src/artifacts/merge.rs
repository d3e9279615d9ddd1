//! Folding a phase's scratch output into the accumulated artifacts.
//!
//! Each phase leaves up to two scratch files in the output directory, named by
//! its token: `<token>.txt` (the script's log) and `<token>.yaml` (a status
//! document the script may write). They are folded into `output.txt` and
//! `output.yaml` and then deleted.
//!
//! The output directory is writable from inside the container, so every path
//! here is checked with `symlink_metadata` before it is read, and written by
//! renaming a fresh file over it.

use std::path::{Path, PathBuf};

use serde_yml::{Mapping, Value};
use tokio::fs;

use crate::artifacts::replace_file;
use crate::sandbox::phase::{Phase, PhaseToken};

/// Accumulated log file name.
pub const ACCUMULATED_LOG: &str = "output.txt";

/// Accumulated status document file name.
pub const ACCUMULATED_STATUS: &str = "output.yaml";

/// Key added to each phase status document. The latest phase wins it; the
/// per-phase `<phase>_exit_code` key keeps every phase's status.
const EXIT_CODE_KEY: &str = "exit_code";

/// Key recording why a phase status document was unusable.
const STATUS_ERROR_KEY: &str = "status_error";

/// Errors while merging phase output.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An artifact path holds a symlink, directory or other non-file entry.
    #[error("{} is not a regular file", path.display())]
    NotRegularFile { path: PathBuf },

    /// The accumulated status document is not a YAML mapping.
    #[error("Accumulated status document {} is unreadable: {reason}", path.display())]
    CorruptAccumulated { path: PathBuf, reason: String },

    #[error("Status document serialization failed: {0}")]
    Serialize(#[from] serde_yml::Error),
}

type Result<T> = std::result::Result<T, MergeError>;

/// What a merge contributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub log_merged: bool,
    pub status_merged: bool,
}

/// Merges phase scratch files into the accumulated artifacts of one output
/// directory.
pub struct OutputMerger {
    output_dir: PathBuf,
}

impl OutputMerger {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Merge the scratch output of `token`, stamping it with `exit_code`.
    ///
    /// The scratch files are deleted afterwards whether or not the merge
    /// succeeded.
    pub async fn merge(&self, token: &PhaseToken, exit_code: i64) -> Result<MergeSummary> {
        let log = self.output_dir.join(token.log_file_name());
        let status = self.output_dir.join(token.status_file_name());

        let result = self.fold(&log, &status, token.phase(), exit_code).await;

        remove_scratch(&log).await;
        remove_scratch(&status).await;

        result
    }

    async fn fold(
        &self,
        log: &Path,
        status: &Path,
        phase: Phase,
        exit_code: i64,
    ) -> Result<MergeSummary> {
        let log_merged = self.merge_log(log, exit_code).await?;
        let status_merged = self.merge_status(status, phase, exit_code).await?;
        Ok(MergeSummary {
            log_merged,
            status_merged,
        })
    }

    async fn merge_log(&self, scratch: &Path, exit_code: i64) -> Result<bool> {
        let Some(mut phase_log) = read_scratch(scratch).await? else {
            tracing::debug!("Results file {} does not exist", scratch.display());
            return Ok(false);
        };

        if !phase_log.is_empty() && !phase_log.ends_with(b"\n") {
            phase_log.push(b'\n');
        }
        phase_log.extend_from_slice(format!("exit code: {}\n", exit_code).as_bytes());

        let target = self.output_dir.join(ACCUMULATED_LOG);
        let merged = match read_optional(&target).await? {
            Some(mut accumulated) => {
                append_log_section(&mut accumulated, &phase_log);
                accumulated
            }
            None => phase_log,
        };

        write(&target, &merged).await?;
        Ok(true)
    }

    async fn merge_status(&self, scratch: &Path, phase: Phase, exit_code: i64) -> Result<bool> {
        let Some(raw) = read_scratch(scratch).await? else {
            tracing::debug!("Results file {} does not exist", scratch.display());
            return Ok(false);
        };
        let raw = String::from_utf8_lossy(&raw);

        let stamps = [EXIT_CODE_KEY.to_string(), format!("{}_{}", phase, EXIT_CODE_KEY)];
        let mut phase_doc = parse_phase_status(&raw);
        for key in &stamps {
            phase_doc.insert(Value::String(key.clone()), Value::Number(exit_code.into()));
        }

        let target = self.output_dir.join(ACCUMULATED_STATUS);
        let text = match read_optional(&target).await? {
            Some(existing) => {
                let accumulated =
                    parse_accumulated_status(&target, &String::from_utf8_lossy(&existing))?;
                serde_yml::to_string(&Value::Mapping(merge_status_documents(
                    accumulated,
                    phase_doc,
                )))?
            }
            None => match stamp_verbatim(&raw, &stamps, exit_code, &phase_doc) {
                Some(text) => text,
                None => serde_yml::to_string(&Value::Mapping(phase_doc))?,
            },
        };

        write(&target, text.as_bytes()).await?;
        Ok(true)
    }
}

/// Append a phase log to an accumulated log, separated by one blank line.
pub fn append_log_section(accumulated: &mut Vec<u8>, phase_log: &[u8]) {
    if !accumulated.is_empty() && !accumulated.ends_with(b"\n") {
        accumulated.push(b'\n');
    }
    accumulated.push(b'\n');
    accumulated.extend_from_slice(phase_log);
}

/// Union two status documents; keys from `incoming` win on conflict.
pub fn merge_status_documents(mut accumulated: Mapping, incoming: Mapping) -> Mapping {
    for (key, value) in incoming {
        accumulated.insert(key, value);
    }
    accumulated
}

/// Parse a status document written by a phase script.
///
/// The script is untrusted, so anything that is not a mapping is kept as a
/// diagnostic entry instead of failing the job.
fn parse_phase_status(text: &str) -> Mapping {
    match serde_yml::from_str::<Value>(text) {
        Ok(Value::Mapping(map)) => map,
        Ok(Value::Null) => Mapping::new(),
        Ok(other) => {
            tracing::warn!("Phase status document is not a mapping: {:?}", other);
            status_error("status document is not a mapping")
        }
        Err(e) => {
            tracing::warn!("Phase status document is not valid YAML: {}", e);
            status_error(&format!("invalid YAML: {}", e))
        }
    }
}

/// The first phase's document is kept as written, with the exit-code lines
/// appended. `None` when appending would not yield `expected` (duplicate keys,
/// unusable YAML, explicit document end).
fn stamp_verbatim(
    raw: &str,
    keys: &[String],
    exit_code: i64,
    expected: &Mapping,
) -> Option<String> {
    let mut text = raw.to_string();
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    for key in keys {
        text.push_str(&format!("{}: {}\n", key, exit_code));
    }

    match serde_yml::from_str::<Value>(&text) {
        Ok(Value::Mapping(map)) if &map == expected => Some(text),
        _ => None,
    }
}

fn status_error(reason: &str) -> Mapping {
    let mut map = Mapping::new();
    map.insert(
        Value::String(STATUS_ERROR_KEY.to_string()),
        Value::String(reason.to_string()),
    );
    map
}

fn parse_accumulated_status(path: &Path, text: &str) -> Result<Mapping> {
    match serde_yml::from_str::<Value>(text) {
        Ok(Value::Mapping(map)) => Ok(map),
        Ok(Value::Null) => Ok(Mapping::new()),
        Ok(_) => Err(MergeError::CorruptAccumulated {
            path: path.to_path_buf(),
            reason: "not a mapping".to_string(),
        }),
        Err(e) => Err(MergeError::CorruptAccumulated {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

/// Read `path` if it is a regular file. Links are never followed.
async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    let io_err = |source| MergeError::Io {
        path: path.to_path_buf(),
        source,
    };

    match fs::symlink_metadata(path).await {
        Ok(metadata) if metadata.is_file() => {}
        Ok(_) => {
            return Err(MergeError::NotRegularFile {
                path: path.to_path_buf(),
            });
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(e)),
    }

    fs::read(path).await.map(Some).map_err(io_err)
}

/// Scratch files come from the phase script; anything but a regular file is
/// ignored like a missing one.
async fn read_scratch(path: &Path) -> Result<Option<Vec<u8>>> {
    match read_optional(path).await {
        Err(MergeError::NotRegularFile { path }) => {
            tracing::warn!("Ignoring results entry {}: not a regular file", path.display());
            Ok(None)
        }
        other => other,
    }
}

async fn write(path: &Path, contents: &[u8]) -> Result<()> {
    replace_file(path, contents)
        .await
        .map_err(|source| MergeError::Io {
            path: path.to_path_buf(),
            source,
        })
}

async fn remove_scratch(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove scratch file {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn yaml(text: &str) -> Mapping {
        match serde_yml::from_str::<Value>(text).unwrap() {
            Value::Mapping(map) => map,
            other => panic!("not a mapping: {:?}", other),
        }
    }

    #[test]
    fn test_log_sections_separated_by_blank_line() {
        let mut accumulated = b"B-log".to_vec();
        append_log_section(&mut accumulated, b"R-log");
        assert_eq!(String::from_utf8(accumulated).unwrap(), "B-log\n\nR-log");

        let mut accumulated = b"B-log\n".to_vec();
        append_log_section(&mut accumulated, b"R-log");
        assert_eq!(String::from_utf8(accumulated).unwrap(), "B-log\n\nR-log");
    }

    #[test]
    fn test_incoming_status_keys_win() {
        let merged = merge_status_documents(yaml("a: 1"), yaml("a: 2\nb: 3"));
        assert_eq!(merged, yaml("a: 2\nb: 3"));
    }

    #[test]
    fn test_unusable_phase_status_is_kept_as_diagnostic() {
        let doc = parse_phase_status("- just\n- a list\n");
        assert!(doc.contains_key(STATUS_ERROR_KEY));

        let doc = parse_phase_status("key: [unclosed");
        assert!(doc.contains_key(STATUS_ERROR_KEY));

        assert!(parse_phase_status("").is_empty());
    }

    #[tokio::test]
    async fn test_merges_two_phases() {
        let dir = TempDir::new().unwrap();
        let merger = OutputMerger::new(dir.path());

        let build = PhaseToken::new(Phase::Build);
        std::fs::write(dir.path().join(build.log_file_name()), "compiling\n").unwrap();
        std::fs::write(dir.path().join(build.status_file_name()), "compiled: true\n").unwrap();
        let summary = merger.merge(&build, 0).await.unwrap();
        assert_eq!(
            summary,
            MergeSummary {
                log_merged: true,
                status_merged: true
            }
        );

        let run = PhaseToken::new(Phase::Run);
        std::fs::write(dir.path().join(run.log_file_name()), "3/4 tests passed").unwrap();
        std::fs::write(dir.path().join(run.status_file_name()), "score: 75\n").unwrap();
        merger.merge(&run, 1).await.unwrap();

        let log = std::fs::read_to_string(dir.path().join(ACCUMULATED_LOG)).unwrap();
        assert_eq!(
            log,
            "compiling\nexit code: 0\n\n3/4 tests passed\nexit code: 1\n"
        );

        let status = std::fs::read_to_string(dir.path().join(ACCUMULATED_STATUS)).unwrap();
        assert_eq!(
            yaml(&status),
            yaml("compiled: true\nexit_code: 1\nbuild_exit_code: 0\nrun_exit_code: 1\nscore: 75\n")
        );

        let leftover: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.starts_with("build-") || name.starts_with("run-"))
            .collect();
        assert!(leftover.is_empty(), "scratch files left: {:?}", leftover);
    }

    #[tokio::test]
    async fn test_first_status_document_kept_verbatim() {
        let dir = TempDir::new().unwrap();
        let token = PhaseToken::new(Phase::Build);
        std::fs::write(
            dir.path().join(token.status_file_name()),
            "# compiler report\nwarnings: 2\ncompiled: true",
        )
        .unwrap();

        OutputMerger::new(dir.path()).merge(&token, 0).await.unwrap();

        let status = std::fs::read_to_string(dir.path().join(ACCUMULATED_STATUS)).unwrap();
        assert_eq!(
            status,
            "# compiler report\nwarnings: 2\ncompiled: true\nexit_code: 0\nbuild_exit_code: 0\n"
        );
    }

    #[tokio::test]
    async fn test_status_with_own_exit_code_is_normalized() {
        let dir = TempDir::new().unwrap();
        let token = PhaseToken::new(Phase::Build);
        std::fs::write(dir.path().join(token.status_file_name()), "exit_code: 9\n").unwrap();

        OutputMerger::new(dir.path()).merge(&token, 3).await.unwrap();

        let status = std::fs::read_to_string(dir.path().join(ACCUMULATED_STATUS)).unwrap();
        assert_eq!(yaml(&status), yaml("exit_code: 3\nbuild_exit_code: 3\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_planted_accumulated_symlink_is_not_followed() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let host_file = dir.path().join("host.txt");
        std::fs::write(&host_file, "HOST\n").unwrap();
        std::os::unix::fs::symlink(&host_file, out.join(ACCUMULATED_LOG)).unwrap();

        let token = PhaseToken::new(Phase::Run);
        std::fs::write(out.join(token.log_file_name()), "pwned\n").unwrap();

        let err = OutputMerger::new(&out).merge(&token, 0).await.unwrap_err();

        assert!(matches!(err, MergeError::NotRegularFile { .. }));
        assert_eq!(std::fs::read_to_string(&host_file).unwrap(), "HOST\n");
        assert!(!out.join(token.log_file_name()).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_scratch_log_is_ignored() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let secret = dir.path().join("secret");
        std::fs::write(&secret, "host secret\n").unwrap();

        let token = PhaseToken::new(Phase::Build);
        std::os::unix::fs::symlink(&secret, out.join(token.log_file_name())).unwrap();

        let summary = OutputMerger::new(&out).merge(&token, 0).await.unwrap();

        assert!(!summary.log_merged);
        assert!(!out.join(ACCUMULATED_LOG).exists());
        assert_eq!(std::fs::read_to_string(&secret).unwrap(), "host secret\n");
    }

    #[tokio::test]
    async fn test_missing_scratch_files_are_tolerated() {
        let dir = TempDir::new().unwrap();
        let summary = OutputMerger::new(dir.path())
            .merge(&PhaseToken::new(Phase::Build), 0)
            .await
            .unwrap();

        assert_eq!(summary, MergeSummary::default());
        assert!(!dir.path().join(ACCUMULATED_LOG).exists());
        assert!(!dir.path().join(ACCUMULATED_STATUS).exists());
    }

    #[tokio::test]
    async fn test_corrupt_accumulated_status_fails_and_cleans_scratch() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(ACCUMULATED_STATUS), "- not\n- a map\n").unwrap();

        let token = PhaseToken::new(Phase::Run);
        let scratch = dir.path().join(token.status_file_name());
        std::fs::write(&scratch, "ok: true\n").unwrap();

        let err = OutputMerger::new(dir.path())
            .merge(&token, 0)
            .await
            .unwrap_err();

        assert!(matches!(err, MergeError::CorruptAccumulated { .. }));
        assert!(!scratch.exists());
    }
}
