//! Configuration for the container sandbox.

/// In-container path the job workspace is mounted at.
pub const CONTAINER_WORKDIR: &str = "/app";

/// In-container path the job output directory is mounted at.
pub const CONTAINER_OUTDIR: &str = "/var/lib/overseer";

/// How jobs share host and engine resources.
///
/// ```text
/// ┌────────────┬──────────────────────────────┬──────────────────────────────┐
/// │ Isolation  │ Workspace                    │ Container name               │
/// ├────────────┼──────────────────────────────┼──────────────────────────────┤
/// │ Shared     │ <work_root>/sandbox          │ reserved (one at a time)     │
/// │ PerJob     │ <work_root>/sandbox/task_<id>│ derived from the phase token │
/// └────────────┴──────────────────────────────┴──────────────────────────────┘
/// ```
///
/// `Shared` permits only one job at a time system-wide; callers must
/// serialize delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobIsolation {
    #[default]
    Shared,
    PerJob,
}

impl JobIsolation {
    /// Returns true if two jobs may safely execute at the same time.
    pub fn allows_concurrency(&self) -> bool {
        matches!(self, JobIsolation::PerJob)
    }
}

impl std::fmt::Display for JobIsolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobIsolation::Shared => write!(f, "shared"),
            JobIsolation::PerJob => write!(f, "per_job"),
        }
    }
}

impl std::str::FromStr for JobIsolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "shared" | "single" => Ok(JobIsolation::Shared),
            "per_job" | "perjob" | "per-job" => Ok(JobIsolation::PerJob),
            _ => Err(format!(
                "invalid isolation '{}', expected 'shared' or 'per_job'",
                s
            )),
        }
    }
}

/// Resource limits for a phase container.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Hard memory ceiling in bytes (swap included).
    pub memory_bytes: u64,
}

impl ResourceLimits {
    /// Limits with the given memory ceiling in megabytes, or `None` when the
    /// byte count does not fit the engine's signed 64-bit field.
    pub fn from_megabytes(mb: u64) -> Option<Self> {
        let memory_bytes = mb.checked_mul(1024 * 1024)?;
        i64::try_from(memory_bytes).ok()?;
        Some(Self { memory_bytes })
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 100 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_parsing() {
        assert_eq!(
            "shared".parse::<JobIsolation>().unwrap(),
            JobIsolation::Shared
        );
        assert_eq!(
            "PER_JOB".parse::<JobIsolation>().unwrap(),
            JobIsolation::PerJob
        );
        assert!("parallel".parse::<JobIsolation>().is_err());
    }

    #[test]
    fn test_isolation_properties() {
        assert!(!JobIsolation::Shared.allows_concurrency());
        assert!(JobIsolation::PerJob.allows_concurrency());
        assert_eq!(JobIsolation::default(), JobIsolation::Shared);
    }

    #[test]
    fn test_default_memory_ceiling() {
        assert_eq!(ResourceLimits::default().memory_bytes, 100 * 1024 * 1024);
    }

    #[test]
    fn test_memory_ceiling_must_fit_engine_field() {
        let largest = i64::MAX as u64 / (1024 * 1024);
        let limits = ResourceLimits::from_megabytes(largest).unwrap();
        assert!(limits.memory_bytes <= i64::MAX as u64);

        assert!(ResourceLimits::from_megabytes(largest + 1).is_none());
        assert!(ResourceLimits::from_megabytes(u64::MAX).is_none());
    }
}
