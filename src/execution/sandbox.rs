//! The sandbox contract and its container-backed controller.
//!
//! [`SandboxController`] owns the single mutable working tree. Every command
//! is preceded by a liveness probe; runtime faults found by the probe (or by
//! a failed exec) are classified and handed to the [`RecoveryPolicy`]. A
//! command that overruns its deadline gets the container force-killed and
//! surfaces as [`SandboxError::Timeout`] without a retry.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SandboxError;
use crate::execution::fault::{RecoveryAction, RecoveryPolicy, RuntimeFault};
use crate::execution::runtime::{ContainerRuntime, ExecRequest, ExecResult};
use crate::metrics::MetricsCollector;
use crate::patch::ApplyOutcome;

/// Exit code used by the read helper when the file is missing.
const MISSING_FILE_EXIT: i64 = 3;

/// Output of a sandbox command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

impl From<ExecResult> for ExecOutput {
    fn from(r: ExecResult) -> Self {
        Self {
            stdout: r.stdout,
            stderr: r.stderr,
            exit_code: r.exit_code,
        }
    }
}

/// Operations the evaluation core needs from the execution environment.
///
/// Paths are relative to the working tree root.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Restores the working tree to the baseline commit and removes untracked files.
    async fn reset(&self) -> Result<(), SandboxError>;

    /// Applies a unified diff at the given strip level. Hunk rejection is an
    /// `Ok(ApplyOutcome::Rejected)`, not an error.
    async fn apply_patch(&self, diff: &str, strip: usize) -> Result<ApplyOutcome, SandboxError>;

    /// Runs a shell command in the working tree.
    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput, SandboxError>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError>;

    async fn exists(&self, path: &str) -> Result<bool, SandboxError>;
}

/// Classifies the output of `git apply`.
pub fn classify_apply_output(output: &ExecOutput) -> ApplyOutcome {
    if output.success() {
        ApplyOutcome::Applied
    } else {
        let reason = output.combined().trim().to_string();
        if reason.is_empty() {
            ApplyOutcome::Rejected(format!("git apply exited with code {}", output.exit_code))
        } else {
            ApplyOutcome::Rejected(reason)
        }
    }
}

/// Single-quotes a string for `sh`.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Rejects paths that would escape the working tree.
pub fn validate_relative_path(path: &str) -> Result<(), SandboxError> {
    let invalid = |reason: &str| SandboxError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    if path.trim().is_empty() {
        return Err(invalid("path is empty"));
    }
    if path.starts_with('/') {
        return Err(invalid("path must be relative to the working tree"));
    }
    if path.contains('\0') {
        return Err(invalid("path contains a NUL byte"));
    }
    if path.split('/').any(|c| c == "..") {
        return Err(invalid("path must not contain '..'"));
    }
    Ok(())
}

/// Connection and timing settings for the sandbox container.
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    /// Container name or id.
    pub container: String,
    /// Working tree root inside the container.
    pub workdir: String,
    /// Deadline for reset, apply and file operations.
    pub exec_timeout: Duration,
    /// Deadline for the liveness probe.
    pub probe_timeout: Duration,
    /// Pause after a recovery action before re-probing.
    pub recovery_settle: Duration,
    pub policy: RecoveryPolicy,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            container: "drupal".to_string(),
            workdir: "/var/www/html".to_string(),
            exec_timeout: Duration::from_secs(120),
            probe_timeout: Duration::from_secs(5),
            recovery_settle: Duration::from_secs(2),
            policy: RecoveryPolicy::default(),
        }
    }
}

/// Container-backed [`Sandbox`].
pub struct SandboxController<R: ContainerRuntime> {
    runtime: R,
    settings: SandboxSettings,
    metrics: MetricsCollector,
}

impl<R: ContainerRuntime> SandboxController<R> {
    pub fn new(runtime: R, settings: SandboxSettings) -> Self {
        Self {
            runtime,
            settings,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    /// Runs the liveness probe. `None` means the container answered.
    async fn probe(&self) -> Option<RuntimeFault> {
        let container = &self.settings.container;
        let status = match self.runtime.status(container).await {
            Ok(status) => status,
            Err(e) => return Some(RuntimeFault::from_docker_error(&e)),
        };
        if let Some(fault) = RuntimeFault::from_status(&status) {
            return Some(fault);
        }

        let cmd = ["true"];
        let probe = self.runtime.exec(container, ExecRequest::new(&cmd));
        match tokio::time::timeout(self.settings.probe_timeout, probe).await {
            Ok(Ok(r)) if r.exit_code == 0 => None,
            Ok(Ok(r)) => Some(RuntimeFault::Unresponsive(format!(
                "liveness probe exited with code {}",
                r.exit_code
            ))),
            Ok(Err(e)) => Some(RuntimeFault::from_docker_error(&e)),
            Err(_) => Some(RuntimeFault::Unresponsive(format!(
                "liveness probe timed out after {}ms",
                self.settings.probe_timeout.as_millis()
            ))),
        }
    }

    async fn recover(&self, fault: &RuntimeFault) -> Result<(), SandboxError> {
        let container = &self.settings.container;
        let Some(action) = self.settings.policy.action_for(fault) else {
            return Err(SandboxError::Unavailable(fault.to_string()));
        };

        warn!(
            container = %container,
            fault = fault.label(),
            action = %action,
            "Recovering sandbox runtime: {fault}"
        );
        self.metrics.record_recovery(fault.label());

        let result = match action {
            RecoveryAction::Unpause => self.runtime.unpause(container).await,
            RecoveryAction::Start => self.runtime.start(container).await,
            RecoveryAction::Restart => self.runtime.restart(container).await,
        };
        result.map_err(|e| SandboxError::Unavailable(format!("{action} failed: {e}")))?;

        if !self.settings.recovery_settle.is_zero() {
            tokio::time::sleep(self.settings.recovery_settle).await;
        }
        Ok(())
    }

    /// Probes until healthy, spending at most the policy's recovery budget.
    async fn ensure_live(&self, recoveries: &mut u32) -> Result<(), SandboxError> {
        loop {
            let Some(fault) = self.probe().await else {
                return Ok(());
            };
            if !self.settings.policy.allows(*recoveries) {
                return Err(SandboxError::Unavailable(format!(
                    "{fault} (after {recoveries} recovery attempt(s))"
                )));
            }
            *recoveries += 1;
            self.recover(&fault).await?;
        }
    }

    async fn force_kill(&self) {
        let container = &self.settings.container;
        if let Err(e) = self.runtime.kill(container).await {
            warn!(container = %container, error = %e, "Failed to kill sandbox after timeout");
        } else {
            info!(container = %container, "Killed sandbox after command timeout");
        }
    }

    async fn run(
        &self,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<ExecOutput, SandboxError> {
        let container = &self.settings.container;
        let mut recoveries = 0u32;

        loop {
            self.ensure_live(&mut recoveries).await?;

            let cmd = ["sh", "-c", command];
            let mut request = ExecRequest::new(&cmd).in_dir(&self.settings.workdir);
            if let Some(bytes) = stdin {
                request = request.with_stdin(bytes);
            }

            let started = Instant::now();
            let result =
                tokio::time::timeout(timeout, self.runtime.exec(container, request)).await;
            self.metrics.record_exec(started.elapsed());

            match result {
                Ok(Ok(output)) => {
                    debug!(
                        container = %container,
                        exit_code = output.exit_code,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Sandbox command finished"
                    );
                    return Ok(output.into());
                }
                Ok(Err(e)) => {
                    if !self.settings.policy.allows(recoveries) {
                        return Err(SandboxError::Unavailable(e.to_string()));
                    }
                    warn!(container = %container, error = %e, "Sandbox exec failed, re-probing");
                    recoveries += 1;
                    let fault = self
                        .probe()
                        .await
                        .unwrap_or_else(|| RuntimeFault::from_docker_error(&e));
                    self.recover(&fault).await?;
                }
                Err(_) => {
                    warn!(
                        container = %container,
                        timeout_secs = timeout.as_secs(),
                        "Sandbox command timed out"
                    );
                    self.force_kill().await;
                    return Err(SandboxError::Timeout {
                        command: command.to_string(),
                        after: timeout,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl<R: ContainerRuntime> Sandbox for SandboxController<R> {
    async fn reset(&self) -> Result<(), SandboxError> {
        let output = self
            .run(
                "git reset --hard HEAD && git clean -fd",
                None,
                self.settings.exec_timeout,
            )
            .await?;
        if !output.success() {
            return Err(SandboxError::ExecFailed(format!(
                "reset failed: {}",
                output.combined().trim()
            )));
        }
        debug!(container = %self.settings.container, "Sandbox reset to baseline");
        Ok(())
    }

    async fn apply_patch(&self, diff: &str, strip: usize) -> Result<ApplyOutcome, SandboxError> {
        let patch_path = format!("/tmp/bench-{}.patch", Uuid::new_v4());
        let quoted = shell_quote(&patch_path);

        let write = self
            .run(
                &format!("cat > {quoted}"),
                Some(diff.as_bytes()),
                self.settings.exec_timeout,
            )
            .await?;
        if !write.success() {
            return Err(SandboxError::ExecFailed(format!(
                "failed to stage patch: {}",
                write.combined().trim()
            )));
        }

        let apply = format!(
            "git apply -p{strip} --recount --whitespace=nowarn {quoted}; \
             status=$?; rm -f {quoted}; exit $status"
        );
        let output = self.run(&apply, None, self.settings.exec_timeout).await?;
        Ok(classify_apply_output(&output))
    }

    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput, SandboxError> {
        self.run(command, None, timeout).await
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        validate_relative_path(path)?;
        let quoted = shell_quote(path);
        let command = format!("test -f {quoted} || exit {MISSING_FILE_EXIT}; base64 {quoted}");
        let output = self.run(&command, None, self.settings.exec_timeout).await?;

        match output.exit_code {
            0 => {
                let encoded: String = output
                    .stdout
                    .chars()
                    .filter(|c| !c.is_ascii_whitespace())
                    .collect();
                base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| SandboxError::ExecFailed(format!("bad base64 from sandbox: {e}")))
            }
            MISSING_FILE_EXIT => Err(SandboxError::FileNotFound(path.to_string())),
            code => Err(SandboxError::ExecFailed(format!(
                "reading {path} exited with code {code}: {}",
                output.stderr.trim()
            ))),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, SandboxError> {
        validate_relative_path(path)?;
        let output = self
            .run(
                &format!("test -e {}", shell_quote(path)),
                None,
                self.settings.exec_timeout,
            )
            .await?;
        match output.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(SandboxError::ExecFailed(format!(
                "checking {path} exited with code {code}"
            ))),
        }
    }
}
