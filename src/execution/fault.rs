//! Runtime fault detection and the recovery policy applied to it.
//!
//! Detection ([`RuntimeFault::from_status`], [`RuntimeFault::from_docker_error`])
//! only says what is wrong. [`RecoveryPolicy`] decides what to do about it and
//! how many times.

use std::fmt;

use crate::error::DockerError;
use crate::execution::runtime::ContainerStatusInfo;

/// Why the sandbox runtime cannot currently run commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeFault {
    /// Frozen by the runtime.
    Paused,
    /// Exited, dead or never started.
    Stopped { exit_code: Option<i64> },
    /// Running but the liveness probe did not answer.
    Unresponsive(String),
    /// The daemon or the container cannot be reached at all.
    Unreachable(String),
}

impl RuntimeFault {
    /// Classifies a container status. `None` means healthy.
    pub fn from_status(status: &ContainerStatusInfo) -> Option<Self> {
        match status {
            ContainerStatusInfo::Running => None,
            ContainerStatusInfo::Paused => Some(Self::Paused),
            ContainerStatusInfo::Exited { exit_code } => Some(Self::Stopped {
                exit_code: Some(*exit_code),
            }),
            ContainerStatusInfo::Dead | ContainerStatusInfo::Created => {
                Some(Self::Stopped { exit_code: None })
            }
            ContainerStatusInfo::Restarting => {
                Some(Self::Unresponsive("container is restarting".to_string()))
            }
            ContainerStatusInfo::Removing => {
                Some(Self::Unreachable("container is being removed".to_string()))
            }
            ContainerStatusInfo::Unknown(s) => {
                Some(Self::Unreachable(format!("unknown container state '{s}'")))
            }
        }
    }

    /// Classifies a runtime call failure.
    pub fn from_docker_error(err: &DockerError) -> Self {
        match err {
            DockerError::DaemonUnavailable(_) | DockerError::ContainerNotFound { .. } => {
                Self::Unreachable(err.to_string())
            }
            DockerError::CallFailed(msg) => Self::Unresponsive(msg.clone()),
        }
    }

    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Paused => "paused",
            Self::Stopped { .. } => "stopped",
            Self::Unresponsive(_) => "unresponsive",
            Self::Unreachable(_) => "unreachable",
        }
    }
}

impl fmt::Display for RuntimeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paused => write!(f, "container is paused"),
            Self::Stopped {
                exit_code: Some(code),
            } => write!(f, "container exited with code {code}"),
            Self::Stopped { exit_code: None } => write!(f, "container is not running"),
            Self::Unresponsive(msg) => write!(f, "container is unresponsive: {msg}"),
            Self::Unreachable(msg) => write!(f, "container is unreachable: {msg}"),
        }
    }
}

/// What to do about a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Unpause,
    Start,
    Restart,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unpause => write!(f, "unpause"),
            Self::Start => write!(f, "start"),
            Self::Restart => write!(f, "restart"),
        }
    }
}

/// Bounded recovery policy for sandbox faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Recovery actions allowed per sandbox operation.
    pub max_recoveries: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self { max_recoveries: 1 }
    }
}

impl RecoveryPolicy {
    /// Picks the recovery action for a fault, or `None` to give up.
    pub fn action_for(&self, fault: &RuntimeFault) -> Option<RecoveryAction> {
        match fault {
            RuntimeFault::Paused => Some(RecoveryAction::Unpause),
            RuntimeFault::Stopped { exit_code: Some(_) } => Some(RecoveryAction::Start),
            RuntimeFault::Stopped { exit_code: None } => Some(RecoveryAction::Restart),
            RuntimeFault::Unresponsive(_) => Some(RecoveryAction::Restart),
            RuntimeFault::Unreachable(_) => None,
        }
    }

    /// True if another recovery is allowed after `used` recoveries.
    pub fn allows(&self, used: u32) -> bool {
        used < self.max_recoveries
    }
}
