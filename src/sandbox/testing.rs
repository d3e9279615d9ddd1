//! In-memory container engine for exercising the pipeline without Docker.
//!
//! `ScriptedEngine` plays the part of the phase script: on `run_to_completion`
//! it writes the scripted log and status document to the host paths behind
//! the output mount, exactly where a real container would have left them.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::sandbox::container::{ContainerEngine, ContainerSpec};
use crate::sandbox::error::{Result, SandboxError};
use crate::sandbox::phase::Phase;

/// What a scripted phase writes and how it exits.
#[derive(Debug, Clone)]
pub struct ScriptedPhase {
    pub log: Option<String>,
    pub status: Option<String>,
    pub exit_code: i64,
}

impl ScriptedPhase {
    pub fn new(log: impl Into<String>, exit_code: i64) -> Self {
        Self {
            log: Some(log.into()),
            status: None,
            exit_code,
        }
    }

    pub fn with_status(mut self, yaml: impl Into<String>) -> Self {
        self.status = Some(yaml.into());
        self
    }
}

/// A call received by the engine, in order.
#[derive(Debug, Clone)]
pub enum EngineCall {
    Run(ContainerSpec),
    Changes(String),
    Remove(String),
}

/// Scripted `ContainerEngine`.
#[derive(Default)]
pub struct ScriptedEngine {
    phases: HashMap<Phase, ScriptedPhase>,
    changes: String,
    fail_start: bool,
    fail_removal: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<EngineCall>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_phase(mut self, phase: Phase, script: ScriptedPhase) -> Self {
        self.phases.insert(phase, script);
        self
    }

    /// Change report returned for every container.
    pub fn with_changes(mut self, changes: impl Into<String>) -> Self {
        self.changes = changes.into();
        self
    }

    /// Every container fails to start.
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Every container takes `delay` to exit.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every removal is refused.
    pub fn failing_removal(mut self) -> Self {
        self.fail_removal = true;
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Phases started, in order.
    pub fn phases_run(&self) -> Vec<Phase> {
        self.calls()
            .iter()
            .filter_map(|call| match call {
                EngineCall::Run(spec) => phase_of(spec),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: EngineCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn script_for(&self, phase: Option<Phase>) -> ScriptedPhase {
        phase
            .and_then(|p| self.phases.get(&p).cloned())
            .unwrap_or_else(|| {
                let label = phase.map(|p| p.as_str()).unwrap_or("phase");
                ScriptedPhase::new(format!("{} ok\n", label), 0)
            })
    }
}

/// Phase a container runs, read from its script argument.
fn phase_of(spec: &ContainerSpec) -> Option<Phase> {
    let script = spec.command.get(4)?;
    Phase::ALL
        .into_iter()
        .find(|p| script.ends_with(&format!("/{}", p.script_name())))
}

#[async_trait]
impl ContainerEngine for ScriptedEngine {
    async fn run_to_completion(&self, spec: &ContainerSpec) -> Result<i64> {
        self.record(EngineCall::Run(spec.clone()));

        if self.fail_start {
            return Err(SandboxError::ContainerStartFailed {
                reason: "scripted start failure".to_string(),
            });
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let script = self.script_for(phase_of(spec));

        let host = |idx: usize| {
            spec.command
                .get(idx)
                .and_then(|p| spec.host_path(p))
                .ok_or_else(|| SandboxError::ExecutionFailed {
                    reason: format!("argument {} is not under a mount", idx),
                })
        };

        if let Some(status) = &script.status {
            std::fs::write(host(5)?, status)?;
        }
        if let Some(log) = &script.log {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(host(6)?)?;
            file.write_all(log.as_bytes())?;
        }

        Ok(script.exit_code)
    }

    async fn changes(&self, name: &str) -> Result<String> {
        self.record(EngineCall::Changes(name.to_string()));
        Ok(self.changes.clone())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.record(EngineCall::Remove(name.to_string()));
        if self.fail_removal {
            return Err(SandboxError::RemovalFailed {
                name: name.to_string(),
                reason: "scripted removal failure".to_string(),
            });
        }
        Ok(())
    }
}
