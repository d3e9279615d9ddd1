//! Per-phase container execution.
//!
//! A job runs two phases, `build` then `run`, each in a fresh container:
//!
//! ```text
//!   run_to_completion ──▶ merge scratch output ──▶ changes ──▶ record ──▶ remove
//!        (exit code)        (output.txt/.yaml)     (diff)    (<phase>-diff.txt)
//! ```
//!
//! A non-zero exit from the phase script is data, not a failure. Only engine
//! failures and a container that cannot be removed abort the job.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::artifacts::{ChangeRecorder, OutputMerger};
use crate::error::JobError;
use crate::job::Job;
use crate::sandbox::config::{CONTAINER_OUTDIR, CONTAINER_WORKDIR, ResourceLimits};
use crate::sandbox::container::{ContainerEngine, ContainerSpec, Mount};

/// Runs the phase script with its status path, appending stdout and stderr to
/// the log. Positional parameters keep paths out of the program text.
const PHASE_PROGRAM: &str = r#"chmod +x "$1" && "$1" "$2" >> "$3" 2>&1"#;

/// `$0` for the phase program.
const PHASE_ARGV0: &str = "overseer-phase";

/// One step of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Build,
    Run,
}

impl Phase {
    /// Phases in execution order.
    pub const ALL: [Phase; 2] = [Phase::Build, Phase::Run];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Build => "build",
            Phase::Run => "run",
        }
    }

    /// Script the phase executes, relative to the workspace root.
    pub fn script_name(&self) -> String {
        format!("{}.sh", self.as_str())
    }

    /// Name of the change report this phase leaves in the output directory.
    pub fn change_report_name(&self) -> String {
        format!("{}-diff.txt", self.as_str())
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Random, phase-unique token naming a phase's scratch files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseToken {
    phase: Phase,
    nonce: String,
}

impl PhaseToken {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            nonce: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Scratch log file name (`<token>.txt`).
    pub fn log_file_name(&self) -> String {
        format!("{}.txt", self)
    }

    /// Scratch status document file name (`<token>.yaml`).
    pub fn status_file_name(&self) -> String {
        format!("{}.yaml", self)
    }
}

impl fmt::Display for PhaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.phase, self.nonce)
    }
}

/// How phase containers are named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerNaming {
    /// Every phase of every job uses the same reserved name.
    Reserved(String),
    /// Each phase gets a name derived from its token.
    PerPhase,
}

impl ContainerNaming {
    pub fn name_for(&self, token: &PhaseToken) -> String {
        match self {
            ContainerNaming::Reserved(name) => name.clone(),
            ContainerNaming::PerPhase => format!("overseer-{}", token),
        }
    }
}

/// Outcome of one phase.
#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub phase: Phase,
    /// Exit status of the phase script.
    pub exit_code: i64,
    /// Raw filesystem-change report.
    pub changes: String,
    pub container_removed: bool,
}

/// Executes phase scripts in ephemeral containers.
pub struct ContainerPhaseRunner {
    engine: Arc<dyn ContainerEngine>,
    limits: ResourceLimits,
    naming: ContainerNaming,
    shell: String,
}

impl ContainerPhaseRunner {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        limits: ResourceLimits,
        naming: ContainerNaming,
        shell: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            limits,
            naming,
            shell: shell.into(),
        }
    }

    /// Run one phase of `job` against the staged `workspace`.
    ///
    /// On return the phase's scratch files have been merged into the
    /// accumulated artifacts and its change report written.
    pub async fn run(
        &self,
        phase: Phase,
        job: &Job,
        workspace: &Path,
    ) -> Result<PhaseResult, JobError> {
        if job.image.trim().is_empty() {
            return Err(JobError::InvalidImage(job.image.clone()));
        }

        let token = PhaseToken::new(phase);
        let spec = self.container_spec(&token, job, workspace);

        tracing::info!(
            task_id = job.task_id,
            phase = %phase,
            container = %spec.name,
            image = %spec.image,
            "Starting phase container"
        );

        let exit_code = match self.engine.run_to_completion(&spec).await {
            Ok(code) => code,
            Err(e) => {
                self.discard(&spec.name).await;
                return Err(e.into());
            }
        };

        tracing::info!(task_id = job.task_id, phase = %phase, exit_code, "Phase script exited");

        if let Err(e) = self.collect(&token, exit_code, &job.output_dir).await {
            self.discard(&spec.name).await;
            return Err(e);
        }

        let changes = match self.engine.changes(&spec.name).await {
            Ok(changes) => changes,
            Err(e) => {
                tracing::warn!(container = %spec.name, "Change report unavailable: {}", e);
                String::new()
            }
        };

        if let Err(e) = ChangeRecorder::new(&job.output_dir)
            .record(phase, &changes)
            .await
        {
            self.discard(&spec.name).await;
            return Err(e.into());
        }

        let result = PhaseResult {
            phase,
            exit_code,
            changes,
            container_removed: self.remove(&spec.name).await,
        };

        if !result.container_removed {
            return Err(JobError::ContainerNotRemoved {
                phase,
                name: spec.name,
            });
        }

        Ok(result)
    }

    fn container_spec(&self, token: &PhaseToken, job: &Job, workspace: &Path) -> ContainerSpec {
        let script = format!("{}/{}", CONTAINER_WORKDIR, token.phase().script_name());
        let status = format!("{}/{}", CONTAINER_OUTDIR, token.status_file_name());
        let log = format!("{}/{}", CONTAINER_OUTDIR, token.log_file_name());

        ContainerSpec {
            name: self.naming.name_for(token),
            image: job.image.clone(),
            mounts: vec![
                Mount::new(workspace, CONTAINER_WORKDIR),
                Mount::new(&job.output_dir, CONTAINER_OUTDIR),
            ],
            limits: self.limits.clone(),
            command: vec![
                self.shell.clone(),
                "-c".to_string(),
                PHASE_PROGRAM.to_string(),
                PHASE_ARGV0.to_string(),
                script,
                status,
                log,
            ],
        }
    }

    async fn collect(
        &self,
        token: &PhaseToken,
        exit_code: i64,
        output_dir: &Path,
    ) -> Result<(), JobError> {
        let summary = OutputMerger::new(output_dir).merge(token, exit_code).await?;
        tracing::debug!(
            token = %token,
            log_merged = summary.log_merged,
            status_merged = summary.status_merged,
            "Phase output collected"
        );
        Ok(())
    }

    async fn remove(&self, name: &str) -> bool {
        match self.engine.remove(name).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(container = %name, "Container removal failed: {}", e);
                false
            }
        }
    }

    /// Best-effort removal on a path that is already failing.
    async fn discard(&self, name: &str) {
        if let Err(e) = self.engine.remove(name).await {
            tracing::warn!(container = %name, "Could not discard container: {}", e);
        }
    }
}
