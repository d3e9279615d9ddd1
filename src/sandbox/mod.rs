//! Container sandbox for phase scripts.
//!
//! Untrusted build and run scripts execute inside throwaway containers with
//! the job workspace and output directory bind-mounted and a hard memory
//! ceiling. The engine is reached through the [`ContainerEngine`] trait so the
//! pipeline can run against Docker or the scripted engine in [`testing`].

pub mod config;
pub mod container;
pub mod error;
pub mod phase;
pub mod testing;

pub use config::{CONTAINER_OUTDIR, CONTAINER_WORKDIR, JobIsolation, ResourceLimits};
pub use container::{ContainerEngine, ContainerSpec, DockerEngine, Mount, connect_docker};
pub use error::SandboxError;
pub use phase::{ContainerNaming, ContainerPhaseRunner, Phase, PhaseResult, PhaseToken};
