//! Docker container lifecycle management.
//!
//! Each phase of a job runs in its own container which is created, started,
//! waited on, inspected for filesystem changes and then removed. The container
//! is never restarted and never outlives its phase.
//!
//! # Container Setup
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │                          Phase Container                                │
//! │                                                                         │
//! │  Mounts:                                                                │
//! │    /app              ─▶ Job workspace (rw)                              │
//! │    /var/lib/overseer ─▶ Job output directory (rw)                       │
//! │                                                                         │
//! │  Limits:                                                                │
//! │    Memory: 100MB hard ceiling (default)                                 │
//! │    Restart policy: no                                                   │
//! │                                                                         │
//! │  Command: argument vector, never an interpolated shell string           │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::models::{ChangeType, HostConfig, RestartPolicy, RestartPolicyNameEnum};
use futures::StreamExt;

use crate::sandbox::config::ResourceLimits;
use crate::sandbox::error::{Result, SandboxError};

/// A host directory bind-mounted read-write into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
}

impl Mount {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
        }
    }

    fn bind(&self) -> String {
        format!("{}:{}:rw", self.host.display(), self.container)
    }
}

/// Everything the engine needs to run one phase container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container name; phase runners address the container by it.
    pub name: String,
    /// Image reference (`name:tag`).
    pub image: String,
    pub mounts: Vec<Mount>,
    pub limits: ResourceLimits,
    /// Entrypoint argument vector.
    pub command: Vec<String>,
}

impl ContainerSpec {
    /// Translate an in-container path back to the host path of its mount.
    pub fn host_path(&self, container_path: &str) -> Option<PathBuf> {
        self.mounts.iter().find_map(|m| {
            let rest = container_path.strip_prefix(m.container.as_str())?;
            if rest.is_empty() {
                return Some(m.host.clone());
            }
            rest.strip_prefix('/').map(|rest| m.host.join(rest))
        })
    }
}

/// The container engine operations a phase needs.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Create and start a container, block until it exits and return its exit
    /// status. The container is left in place for inspection.
    async fn run_to_completion(&self, spec: &ContainerSpec) -> Result<i64>;

    /// Filesystem changes of the container relative to its image, one
    /// `<C|A|D> <path>` line per change. Empty when nothing changed.
    async fn changes(&self, name: &str) -> Result<String>;

    /// Remove a stopped container by name.
    async fn remove(&self, name: &str) -> Result<()>;
}

/// `ContainerEngine` backed by the Docker Engine API.
pub struct DockerEngine {
    docker: Docker,
    auto_pull_image: bool,
}

impl DockerEngine {
    /// Create a new engine over an established connection.
    pub fn new(docker: Docker, auto_pull_image: bool) -> Self {
        Self {
            docker,
            auto_pull_image,
        }
    }

    /// Check if the Docker daemon is available.
    pub async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    /// Check if an image exists locally.
    pub async fn image_exists(&self, image: &str) -> bool {
        self.docker.inspect_image(image).await.is_ok()
    }

    /// Pull an image.
    pub async fn pull_image(&self, image: &str) -> Result<()> {
        use bollard::image::CreateImageOptions;

        tracing::info!("Pulling job image: {}", image);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::debug!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(SandboxError::ImageUnavailable {
                        image: image.to_string(),
                        reason: format!("image pull failed: {}", e),
                    });
                }
            }
        }

        tracing::info!("Successfully pulled image: {}", image);
        Ok(())
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.image_exists(image).await {
            return Ok(());
        }
        if !self.auto_pull_image {
            return Err(SandboxError::ImageUnavailable {
                image: image.to_string(),
                reason: "not found locally and auto-pull is disabled".to_string(),
            });
        }
        self.pull_image(image).await
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let memory = i64::try_from(spec.limits.memory_bytes).map_err(|_| {
            SandboxError::ContainerCreationFailed {
                reason: format!("memory limit {} bytes is out of range", spec.limits.memory_bytes),
            }
        })?;

        let host_config = HostConfig {
            binds: Some(spec.mounts.iter().map(Mount::bind).collect()),
            memory: Some(memory),
            // Equal to memory: no swap on top of the ceiling.
            memory_swap: Some(memory),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: None,
            }),
            auto_remove: Some(false),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| SandboxError::ContainerCreationFailed {
                reason: e.to_string(),
            })?;

        for warning in &response.warnings {
            tracing::warn!(container = %spec.name, "Docker warning: {}", warning);
        }

        Ok(response.id)
    }

    async fn wait_for_exit(&self, name: &str) -> Result<i64> {
        let mut wait_stream = self.docker.wait_container(
            name,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );

        match wait_stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(SandboxError::ExecutionFailed {
                reason: format!("wait failed: {}", e),
            }),
            None => Err(SandboxError::ExecutionFailed {
                reason: "container wait stream ended unexpectedly".to_string(),
            }),
        }
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn run_to_completion(&self, spec: &ContainerSpec) -> Result<i64> {
        self.ensure_image(&spec.image).await?;

        let container_id = self.create_container(spec).await?;
        tracing::debug!(container = %spec.name, id = %container_id, "Container created");

        self.docker
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::ContainerStartFailed {
                reason: e.to_string(),
            })?;

        self.wait_for_exit(&spec.name).await
    }

    async fn changes(&self, name: &str) -> Result<String> {
        let changes = self.docker.container_changes(name).await?.unwrap_or_default();

        let mut report = String::new();
        for change in changes {
            report.push(change_marker(&change.kind));
            report.push(' ');
            report.push_str(&change.path);
            report.push('\n');
        }
        Ok(report)
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: false,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| SandboxError::RemovalFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }
}

/// `docker diff` markers: 0 modified, 1 added, 2 deleted.
fn change_marker(kind: &ChangeType) -> char {
    match kind {
        ChangeType::_0 => 'C',
        ChangeType::_1 => 'A',
        ChangeType::_2 => 'D',
    }
}

/// Connect to the Docker daemon.
///
/// Tries these locations in order:
/// 1. `DOCKER_HOST` env var (bollard default)
/// 2. `/var/run/docker.sock` (Linux default)
/// 3. `~/.docker/run/docker.sock` (Docker Desktop on macOS)
pub async fn connect_docker() -> Result<Docker> {
    if let Ok(docker) = Docker::connect_with_local_defaults()
        && docker.ping().await.is_ok()
    {
        return Ok(docker);
    }

    if let Some(home) = std::env::var_os("HOME") {
        let desktop_sock = Path::new(&home).join(".docker/run/docker.sock");
        if desktop_sock.exists() {
            let sock_str = desktop_sock.to_string_lossy();
            if let Ok(docker) =
                Docker::connect_with_socket(&sock_str, 120, bollard::API_DEFAULT_VERSION)
                && docker.ping().await.is_ok()
            {
                return Ok(docker);
            }
        }
    }

    Err(SandboxError::DockerNotAvailable {
        reason: "Socket not found: /var/run/docker.sock".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "overseer-sandbox".to_string(),
            image: "alpine:3".to_string(),
            mounts: vec![
                Mount::new("/srv/app/sandbox", "/app"),
                Mount::new("/data/out", "/var/lib/overseer"),
            ],
            limits: ResourceLimits::default(),
            command: vec![],
        }
    }

    #[test]
    fn test_host_path_translation() {
        let spec = spec();
        assert_eq!(
            spec.host_path("/var/lib/overseer/build-abc.txt"),
            Some(PathBuf::from("/data/out/build-abc.txt"))
        );
        assert_eq!(spec.host_path("/app"), Some(PathBuf::from("/srv/app/sandbox")));
        assert_eq!(spec.host_path("/etc/passwd"), None);
        assert_eq!(spec.host_path("/apple"), None);
    }

    #[test]
    fn test_bind_is_read_write() {
        assert_eq!(
            Mount::new("/data/out", "/var/lib/overseer").bind(),
            "/data/out:/var/lib/overseer:rw"
        );
    }

    #[test]
    fn test_change_markers() {
        assert_eq!(change_marker(&ChangeType::_0), 'C');
        assert_eq!(change_marker(&ChangeType::_1), 'A');
        assert_eq!(change_marker(&ChangeType::_2), 'D');
    }

    #[tokio::test]
    async fn test_docker_connection() {
        // This test requires Docker to be running
        let result = connect_docker().await;
        let Ok(docker) = result else {
            eprintln!("Skipping Docker test: Docker not available");
            return;
        };

        let engine = DockerEngine::new(docker, false);
        assert!(engine.is_available().await);
    }
}
