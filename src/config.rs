//! Service configuration, read once from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::sandbox::{ContainerNaming, JobIsolation, ResourceLimits};

/// Errors while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Could not determine working directory: {0}")]
    WorkingDirectory(#[from] std::io::Error),
}

/// Immutable configuration threaded through the pipeline.
#[derive(Debug, Clone)]
pub struct OverseerConfig {
    /// Host directory holding the workspace(s).
    pub work_root: PathBuf,
    pub isolation: JobIsolation,
    /// Reserved container name used in shared isolation.
    pub container_name: String,
    pub memory_limit_mb: u64,
    /// Shell used inside the container to run phase scripts.
    pub shell: String,
    pub auto_pull_image: bool,
    /// Development mode: prepended to job paths.
    pub root_path: Option<String>,
    /// Completion records are POSTed here when set.
    pub results_url: Option<String>,
    pub listen_addr: SocketAddr,
}

impl Default for OverseerConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("app"),
            isolation: JobIsolation::Shared,
            container_name: "overseer-sandbox".to_string(),
            memory_limit_mb: 100,
            shell: "/bin/bash".to_string(),
            auto_pull_image: true,
            root_path: None,
            results_url: None,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8085)),
        }
    }
}

impl OverseerConfig {
    /// Build from `OVERSEER_*` environment variables (after loading `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // Container mounts need absolute host paths.
        let work_root = match lookup("OVERSEER_WORK_ROOT") {
            Some(root) => PathBuf::from(root),
            None => std::env::current_dir()?.join(&defaults.work_root),
        };

        let isolation = match lookup("OVERSEER_ISOLATION") {
            Some(v) => v.parse().map_err(|reason| ConfigError::InvalidValue {
                key: "OVERSEER_ISOLATION".to_string(),
                reason,
            })?,
            None => defaults.isolation,
        };

        let memory_limit_mb = match lookup("OVERSEER_MEMORY_LIMIT_MB") {
            Some(v) => match v.parse::<u64>() {
                Ok(mb) if mb > 0 && ResourceLimits::from_megabytes(mb).is_some() => mb,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "OVERSEER_MEMORY_LIMIT_MB".to_string(),
                        reason: format!("expected a positive megabyte count, got '{}'", v),
                    });
                }
            },
            None => defaults.memory_limit_mb,
        };

        let auto_pull_image = match lookup("OVERSEER_AUTO_PULL") {
            Some(v) => parse_bool("OVERSEER_AUTO_PULL", &v)?,
            None => defaults.auto_pull_image,
        };

        let development = lookup("OVERSEER_ENV").is_some_and(|env| env == "development");
        let root_path = if development {
            lookup("OVERSEER_ROOT_PATH")
        } else {
            None
        };

        let listen_addr = match lookup("OVERSEER_LISTEN_ADDR") {
            Some(v) => v.parse().map_err(|e| ConfigError::InvalidValue {
                key: "OVERSEER_LISTEN_ADDR".to_string(),
                reason: format!("{}", e),
            })?,
            None => defaults.listen_addr,
        };

        Ok(Self {
            work_root,
            isolation,
            container_name: lookup("OVERSEER_CONTAINER_NAME").unwrap_or(defaults.container_name),
            memory_limit_mb,
            shell: lookup("OVERSEER_SHELL").unwrap_or(defaults.shell),
            auto_pull_image,
            root_path,
            results_url: lookup("OVERSEER_RESULTS_URL").filter(|u| !u.is_empty()),
            listen_addr,
        })
    }

    /// Workspace directory for a job.
    pub fn workspace_for(&self, task_id: i64) -> PathBuf {
        let sandbox = self.work_root.join("sandbox");
        match self.isolation {
            JobIsolation::Shared => sandbox,
            JobIsolation::PerJob => sandbox.join(format!("task_{}", task_id)),
        }
    }

    pub fn container_naming(&self) -> ContainerNaming {
        match self.isolation {
            JobIsolation::Shared => ContainerNaming::Reserved(self.container_name.clone()),
            JobIsolation::PerJob => ContainerNaming::PerPhase,
        }
    }

    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits::from_megabytes(self.memory_limit_mb).unwrap_or_default()
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("expected a boolean, got '{}'", value),
        }),
    }
}
