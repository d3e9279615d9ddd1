//! End-to-end job handling.
//!
//! ```text
//! JobRequest ─► JobValidator ─► WorkspaceStager ─► build phase ─► run phase
//!                   │                 │                 │              │
//!                   └─────────────────┴─────────────────┴──────────────┘
//!                                         │
//!                          CleanupManager::finish ─► ack ─► publish (success only)
//! ```
//!
//! Every job, whatever its outcome, is acknowledged exactly once and only
//! after cleanup has run.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::OverseerConfig;
use crate::error::{Fault, JobError};
use crate::job::{ArchiveValidator, Job, JobRequest, JobValidator};
use crate::sandbox::{ContainerEngine, ContainerPhaseRunner, Phase, PhaseResult};
use crate::transport::{CompletionRecord, DeliveryReceipt, JobOutcome, ResultPublisher};
use crate::workspace::{CleanupManager, CleanupOutcome, StagingReport, WorkspaceStager};

/// Everything the pipeline knows about a finished job.
#[derive(Debug)]
pub struct JobReport {
    pub outcome: JobOutcome,
    pub cleanup: CleanupOutcome,
    /// Phases that completed, in order.
    pub phases: Vec<PhaseResult>,
}

struct Completed {
    job: Job,
    phases: Vec<PhaseResult>,
}

/// Drives one job at a time through validation, staging, both phases and
/// cleanup.
pub struct Pipeline {
    config: OverseerConfig,
    validator: JobValidator,
    runner: ContainerPhaseRunner,
    publisher: Option<Arc<dyn ResultPublisher>>,
    /// Held for the whole job when jobs share one workspace.
    dispatch_gate: Option<Mutex<()>>,
}

impl Pipeline {
    pub fn new(
        config: OverseerConfig,
        engine: Arc<dyn ContainerEngine>,
        archives: Arc<dyn ArchiveValidator>,
    ) -> Self {
        let validator = JobValidator::new(archives).with_path_prefix(config.root_path.clone());
        let runner = ContainerPhaseRunner::new(
            engine,
            config.limits(),
            config.container_naming(),
            config.shell.clone(),
        );
        let dispatch_gate = if config.isolation.allows_concurrency() {
            None
        } else {
            Some(Mutex::new(()))
        };

        Self {
            config,
            validator,
            runner,
            publisher: None,
            dispatch_gate,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn ResultPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn config(&self) -> &OverseerConfig {
        &self.config
    }

    /// Run `request` on its own task. Dropping the returned handle does not
    /// cancel the job: it still runs to the end, cleans up and acknowledges.
    pub fn dispatch(
        self: &Arc<Self>,
        request: JobRequest,
        receipt: Arc<dyn DeliveryReceipt>,
    ) -> JoinHandle<JobReport> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.handle(request, receipt.as_ref()).await })
    }

    /// Process one delivered job and acknowledge it through `receipt`.
    pub async fn handle(&self, request: JobRequest, receipt: &dyn DeliveryReceipt) -> JobReport {
        let _serialized = match &self.dispatch_gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };

        let task_id = request.task_id_echo();
        let timestamp = request.timestamp_echo();
        tracing::info!(task_id = %task_id, "Received job");

        let mut cleanup = CleanupManager::new();
        let result = self.execute(&request, &mut cleanup).await;
        let cleanup = cleanup.finish().await;

        if let Err(e) = receipt.ack().await {
            tracing::error!(task_id = %task_id, "Failed to acknowledge job: {}", e);
        }

        match result {
            Ok(Completed { job, phases }) => {
                let record = CompletionRecord {
                    task_id: job.task_id,
                    timestamp: job.timestamp,
                };
                self.publish(&record).await;
                tracing::info!(task_id = job.task_id, "Job completed");

                JobReport {
                    outcome: JobOutcome::Completed(record),
                    cleanup,
                    phases,
                }
            }
            Err(e) => {
                match e.fault() {
                    Fault::Client => tracing::warn!(task_id = %task_id, "Job rejected: {}", e),
                    Fault::Server => tracing::error!(task_id = %task_id, "Job failed: {}", e),
                }

                JobReport {
                    outcome: JobOutcome::from_error(&e, task_id, timestamp),
                    cleanup,
                    phases: Vec::new(),
                }
            }
        }
    }

    async fn execute(
        &self,
        request: &JobRequest,
        cleanup: &mut CleanupManager,
    ) -> Result<Completed, JobError> {
        let job = self.validator.validate(request)?;

        let workspace = self.config.workspace_for(job.task_id);
        cleanup.bind(&workspace, job.skip_cleanup);

        let staged = self.stage(&job, &workspace).await?;
        tracing::info!(
            task_id = job.task_id,
            residue_removed = staged.residue_removed,
            submission_files = staged.submission_files,
            assessment_files = staged.assessment_files,
            "Workspace staged"
        );

        tokio::fs::create_dir_all(&job.output_dir).await?;

        let mut phases = Vec::with_capacity(Phase::ALL.len());
        for phase in Phase::ALL {
            phases.push(self.runner.run(phase, &job, &workspace).await?);
        }

        Ok(Completed { job, phases })
    }

    async fn stage(&self, job: &Job, workspace: &Path) -> Result<StagingReport, JobError> {
        let stager = WorkspaceStager::new(workspace);
        let submission = job.submission.clone();
        let assessment = job.assessment.clone();

        let report = tokio::task::spawn_blocking(move || stager.stage(&submission, &assessment))
            .await
            .map_err(|e| JobError::Internal(format!("staging task failed: {}", e)))??;
        Ok(report)
    }

    async fn publish(&self, record: &CompletionRecord) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        if let Err(e) = publisher.publish(record).await {
            tracing::error!(task_id = record.task_id, "Failed to publish completion: {}", e);
        }
    }
}
