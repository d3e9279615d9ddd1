//! Error types for the container sandbox.

/// Errors that can occur while driving the container engine.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Docker daemon is not available or not running.
    #[error("Docker not available: {reason}")]
    DockerNotAvailable { reason: String },

    /// The job image is missing locally and could not be pulled.
    #[error("Image {image} unavailable: {reason}")]
    ImageUnavailable { image: String, reason: String },

    /// Failed to create container.
    #[error("Container creation failed: {reason}")]
    ContainerCreationFailed { reason: String },

    /// Failed to start container.
    #[error("Container start failed: {reason}")]
    ContainerStartFailed { reason: String },

    /// Waiting for the container to exit failed.
    #[error("Execution failed: {reason}")]
    ExecutionFailed { reason: String },

    /// The engine refused to remove a container.
    #[error("Container {name} could not be removed: {reason}")]
    RemovalFailed { name: String, reason: String },

    /// Docker API error.
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;
