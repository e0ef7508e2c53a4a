//! Container control for restores.

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Container control errors
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{action} {name} failed: {stderr}")]
    Command {
        action: &'static str,
        name: String,
        stderr: String,
    },
}

/// Stops and starts the service containers being restored
#[async_trait]
pub trait ContainerControl: Send + Sync {
    async fn stop(&self, name: &str) -> Result<(), ContainerError>;
    async fn start(&self, name: &str) -> Result<(), ContainerError>;
}

/// Container control through the `docker` CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }

    /// Use a different docker-compatible CLI (e.g. `podman`)
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, action: &'static str, name: &str) -> Result<(), ContainerError> {
        let output = Command::new(&self.program)
            .arg(action)
            .arg(name)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ContainerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ContainerError::Command {
                action,
                name: name.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerControl for DockerCli {
    async fn stop(&self, name: &str) -> Result<(), ContainerError> {
        self.run("stop", name).await
    }

    async fn start(&self, name: &str) -> Result<(), ContainerError> {
        self.run("start", name).await
    }
}
