//! The container runtime seam used by the sandbox controller.

use async_trait::async_trait;

use crate::error::DockerError;

/// Status of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatusInfo {
    /// Container is created but not started.
    Created,
    /// Container is running.
    Running,
    /// Container is paused.
    Paused,
    /// Container is restarting.
    Restarting,
    /// Container has exited.
    Exited { exit_code: i64 },
    /// Container is being removed.
    Removing,
    /// Container is dead.
    Dead,
    /// Unknown status.
    Unknown(String),
}

impl ContainerStatusInfo {
    /// Maps the daemon's state string onto a status.
    pub fn from_docker_status(status: &str, exit_code: i64) -> Self {
        match status {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited { exit_code },
            "dead" => Self::Dead,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// A command to run inside a container.
#[derive(Debug, Clone, Copy)]
pub struct ExecRequest<'a> {
    pub cmd: &'a [&'a str],
    pub working_dir: Option<&'a str>,
    /// Bytes piped to the command's stdin.
    pub stdin: Option<&'a [u8]>,
}

impl<'a> ExecRequest<'a> {
    pub fn new(cmd: &'a [&'a str]) -> Self {
        Self {
            cmd,
            working_dir: None,
            stdin: None,
        }
    }

    pub fn in_dir(mut self, dir: &'a str) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn with_stdin(mut self, bytes: &'a [u8]) -> Self {
        self.stdin = Some(bytes);
        self
    }
}

/// Result of executing a command in a container.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    /// Exit code of the command.
    pub exit_code: i64,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

/// Lifecycle and exec operations on an already-provisioned container.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn status(&self, id: &str) -> Result<ContainerStatusInfo, DockerError>;

    async fn exec(&self, id: &str, request: ExecRequest<'_>) -> Result<ExecResult, DockerError>;

    async fn start(&self, id: &str) -> Result<(), DockerError>;

    async fn unpause(&self, id: &str) -> Result<(), DockerError>;

    async fn restart(&self, id: &str) -> Result<(), DockerError>;

    /// Force-kills the container.
    async fn kill(&self, id: &str) -> Result<(), DockerError>;
}
