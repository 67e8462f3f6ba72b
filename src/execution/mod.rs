//! Sandbox execution layer.
//!
//! The evaluation core talks to the working tree only through the
//! [`Sandbox`] trait. The production implementation is
//! [`SandboxController`], which drives an already-provisioned container
//! through the [`ContainerRuntime`] seam (bollard in [`DockerClient`]).
//!
//! # Fault handling
//!
//! ```text
//! probe ──healthy──> exec ──ok──> output
//!   │                  │ runtime error ─> re-probe ─> recover ─> exec (once)
//!   │                  └ deadline ─> kill ─> Timeout (no retry)
//!   └ fault ─> RecoveryPolicy ─> unpause | start | restart ─> probe
//!                     └ budget spent / unreachable ─> Unavailable
//! ```
//!
//! # Example
//!
//! ```ignore
//! use drupal_bench::execution::{DockerClient, Sandbox, SandboxController, SandboxSettings};
//!
//! let client = DockerClient::new()?;
//! let sandbox = SandboxController::new(client, SandboxSettings::default());
//! sandbox.reset().await?;
//! let output = sandbox.exec("./vendor/bin/phpunit", Duration::from_secs(600)).await?;
//! ```

pub mod docker_client;
pub mod fault;
#[cfg(test)]
pub(crate) mod memory;
pub mod runtime;
pub mod sandbox;

pub use docker_client::DockerClient;
pub use fault::{RecoveryAction, RecoveryPolicy, RuntimeFault};
pub use runtime::{ContainerRuntime, ContainerStatusInfo, ExecRequest, ExecResult};
pub use sandbox::{
    classify_apply_output, shell_quote, validate_relative_path, ExecOutput, Sandbox,
    SandboxController, SandboxSettings,
};
