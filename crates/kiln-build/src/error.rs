use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Dockerfile not found: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("Build context directory not found: {0}")]
    ContextNotFound(PathBuf),

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("no destinations given; set no-push to build without pushing")]
    NoDestinations,

    #[error("Invalid tag: {tag}")]
    InvalidTag { tag: String },

    #[error("Authentication failed for {registry}: {message}")]
    AuthFailed { registry: String, message: String },

    #[error("Push failed: {message}")]
    PushFailed { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
