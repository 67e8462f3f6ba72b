//! Docker API wrapper using the bollard crate.
//!
//! The sandbox container is provisioned outside this crate; the client only
//! inspects it, runs commands in it and performs lifecycle recovery
//! (unpause, start, restart, kill).

use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, KillContainerOptions, LogOutput, RestartContainerOptions,
    StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::DockerError;
use crate::execution::runtime::{ContainerRuntime, ContainerStatusInfo, ExecRequest, ExecResult};

/// Docker client wrapper for container operations.
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Creates a new Docker client connecting to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::DaemonUnavailable` if the Docker daemon is not accessible.
    pub fn new() -> Result<Self, DockerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DockerError::DaemonUnavailable(format!("Failed to connect: {e}")))?;

        Ok(Self { docker })
    }

    /// Creates a new Docker client from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    fn call_failed(id: &str, action: &str, e: bollard::errors::Error) -> DockerError {
        let message = e.to_string();
        if message.contains("No such container") {
            DockerError::ContainerNotFound { id: id.to_string() }
        } else {
            DockerError::CallFailed(format!("Failed to {action}: {message}"))
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn status(&self, id: &str) -> Result<ContainerStatusInfo, DockerError> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| Self::call_failed(id, "inspect container", e))?;

        let state = info
            .state
            .ok_or_else(|| DockerError::CallFailed("Container has no state".to_string()))?;

        let status = state.status.map(|s| s.to_string()).unwrap_or_default();

        Ok(ContainerStatusInfo::from_docker_status(
            &status,
            state.exit_code.unwrap_or(-1),
        ))
    }

    async fn exec(&self, id: &str, request: ExecRequest<'_>) -> Result<ExecResult, DockerError> {
        let exec_options = CreateExecOptions {
            cmd: Some(request.cmd.to_vec()),
            working_dir: request.working_dir,
            attach_stdin: Some(request.stdin.is_some()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, exec_options)
            .await
            .map_err(|e| Self::call_failed(id, "create exec", e))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Self::call_failed(id, "start exec", e))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, mut input } = start_result {
            if let Some(bytes) = request.stdin {
                input
                    .write_all(bytes)
                    .await
                    .map_err(|e| DockerError::CallFailed(format!("Failed to write stdin: {e}")))?;
                input
                    .shutdown()
                    .await
                    .map_err(|e| DockerError::CallFailed(format!("Failed to close stdin: {e}")))?;
            }

            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(DockerError::CallFailed(format!("Error reading output: {e}")));
                    }
                }
            }
        }

        let exec_info = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Self::call_failed(id, "inspect exec", e))?;

        Ok(ExecResult {
            exit_code: exec_info.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    async fn start(&self, id: &str) -> Result<(), DockerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Self::call_failed(id, "start container", e))
    }

    async fn unpause(&self, id: &str) -> Result<(), DockerError> {
        self.docker
            .unpause_container(id)
            .await
            .map_err(|e| Self::call_failed(id, "unpause container", e))
    }

    async fn restart(&self, id: &str) -> Result<(), DockerError> {
        self.docker
            .restart_container(id, Some(RestartContainerOptions { t: 10 }))
            .await
            .map_err(|e| Self::call_failed(id, "restart container", e))
    }

    async fn kill(&self, id: &str) -> Result<(), DockerError> {
        self.docker
            .kill_container(id, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await
            .map_err(|e| Self::call_failed(id, "kill container", e))
    }
}
