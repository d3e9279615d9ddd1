//! Overseer: sandboxed two-phase grading of submissions.
//!
//! A job names a submission, an assessment archive and a container image.
//! The submission and assessment are staged into a workspace, the
//! assessment's `build.sh` and then `run.sh` execute in throwaway containers,
//! and their logs, status documents and filesystem changes are collected in
//! the job's output directory.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod sandbox;
pub mod transport;
pub mod workspace;

pub use config::OverseerConfig;
pub use error::{Fault, JobError};
pub use pipeline::{JobReport, Pipeline};
