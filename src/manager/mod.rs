//! Package-Manager Adapters
//!
//! Translate logical operations into concrete command lines for one package
//! manager family, run them through a [`CommandRunner`], and report a
//! uniform [`AdapterOutcome`].
//!
//! # Architecture
//!
//! - `node.rs`: npm (manifest `package.json`)
//! - `python.rs`: uv or pip (manifest `pyproject.toml` / `requirements.txt`),
//!   plus the Python-only `add` and `create_venv` operations
//!
//! Adapters never return an error. Spawn failures, timeouts and non-zero exits
//! all become a failed outcome whose message carries the captured stderr.

mod node;
mod python;

pub use node::NodeAdapter;
pub use python::{PythonAdapter, PythonBackend};

use crate::config::PolicyConfig;
use crate::error::ToolError;
use crate::exec::{truncate_string, CommandRunner, CommandSpec, ExecutionResult, RunnerError};
use crate::protocol::{ManagerKind, Operation, ToolResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Cap on captured output embedded in a result message, per stream
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// What an adapter reports back for one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterOutcome {
    /// Message shown to the caller
    pub message: String,
    pub success: bool,
    /// Captured output of the decisive command (stdout on success, stderr otherwise)
    pub raw_output: String,
}

impl AdapterOutcome {
    pub fn success(message: impl Into<String>, raw_output: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: true,
            raw_output: raw_output.into(),
        }
    }

    pub fn failure(message: impl Into<String>, raw_output: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: false,
            raw_output: raw_output.into(),
        }
    }

    /// Outcome for a fault that prevented the command from completing
    pub(crate) fn from_error(label: &str, err: ToolError) -> Self {
        match &err {
            ToolError::Spawn { .. } | ToolError::Timeout { .. } => {
                error!(kind = err.kind(), error = %err, "{}", label)
            }
            _ => tracing::warn!(kind = err.kind(), error = %err, "{}", label),
        }
        let detail = err.to_string();
        Self::failure(format!("{}: {}", label, detail), detail)
    }
}

impl From<AdapterOutcome> for ToolResult {
    fn from(outcome: AdapterOutcome) -> Self {
        if outcome.success {
            ToolResult::success(outcome.message)
        } else {
            ToolResult::failure(outcome.message)
        }
    }
}

/// Operations every package manager supports
#[async_trait]
pub trait ManagerAdapter: Send + Sync {
    /// Family this adapter serves
    fn kind(&self) -> ManagerKind;

    /// Project descriptor whose absence triggers auto-initialization
    fn manifest(&self) -> &'static str;

    /// Install one package (initializing the project first if needed)
    async fn install(&self, package: &str, path: &Path) -> AdapterOutcome;

    /// Remove one package; the manifest need not exist
    async fn uninstall(&self, package: &str, path: &Path) -> AdapterOutcome;

    /// Initialize a project non-interactively
    async fn init(&self, path: &Path) -> AdapterOutcome;
}

/// Runner plus policy, shared by the adapters
#[derive(Clone)]
pub(crate) struct Invoker {
    runner: Arc<dyn CommandRunner>,
    policy: Arc<PolicyConfig>,
}

impl Invoker {
    pub(crate) fn new(runner: Arc<dyn CommandRunner>, policy: Arc<PolicyConfig>) -> Self {
        Self { runner, policy }
    }

    pub(crate) fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Run one command under the timeout budget of `operation`
    ///
    /// A completed process is `Ok` whatever its exit code; callers decide
    /// what a non-zero exit means for their operation.
    pub(crate) async fn run(
        &self,
        program: &Path,
        args: Vec<String>,
        cwd: &Path,
        operation: Operation,
        shell: bool,
    ) -> Result<ExecutionResult, ToolError> {
        let spec = CommandSpec::new(
            program.to_path_buf(),
            args,
            cwd,
            self.policy.timeout_for(operation),
        )
        .with_shell(shell);

        match self.runner.execute(spec).await {
            Ok(mut result) => {
                result.stdout = truncate_string(result.stdout, MAX_OUTPUT_BYTES);
                result.stderr = truncate_string(result.stderr, MAX_OUTPUT_BYTES);
                Ok(result)
            }
            Err(err) => {
                if let RunnerError::Timeout { partial, .. } = &err {
                    info!(
                        stdout_bytes = partial.stdout.len(),
                        stderr_bytes = partial.stderr.len(),
                        "Discarding output of timed-out command"
                    );
                }
                Err(ToolError::from(err))
            }
        }
    }

    /// Run `init_args` unless `path` already holds `manifest`
    ///
    /// A failed initialization is reported as [`ToolError::NonZeroExit`]
    /// so the caller never proceeds to the real command.
    pub(crate) async fn ensure_manifest(
        &self,
        program: &Path,
        init_args: &[&str],
        manifest: &str,
        path: &Path,
        shell: bool,
    ) -> Result<(), ToolError> {
        if manifest_path(path, manifest).exists() {
            return Ok(());
        }

        info!(manifest, path = %path.display(), "No manifest found, initializing");
        let args = init_args.iter().map(|s| s.to_string()).collect();
        let result = self
            .run(program, args, path, Operation::Init, shell)
            .await?;
        if result.success() {
            Ok(())
        } else {
            Err(ToolError::NonZeroExit {
                program: program_label(program),
                code: result.exit_code,
                stderr: result.stderr,
            })
        }
    }
}

pub(crate) fn manifest_path(path: &Path, manifest: &str) -> PathBuf {
    path.join(manifest)
}

pub(crate) fn program_label(program: &Path) -> String {
    program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string_lossy().into_owned())
}

/// Message for an auto-initialization that failed before the real command
pub(crate) fn init_failure(manifest: &str, err: ToolError) -> AdapterOutcome {
    match err {
        ToolError::NonZeroExit { stderr, .. } => {
            tracing::warn!(manifest, "Project initialization failed");
            AdapterOutcome::failure(
                format!("Failed to initialize {}: {}", manifest, stderr),
                stderr,
            )
        }
        other => AdapterOutcome::from_error(&format!("Failed to initialize {}", manifest), other),
    }
}

/// Standard success/failure message pair for a completed command
pub(crate) fn completed(
    result: ExecutionResult,
    success_message: String,
    failure_heading: &str,
) -> AdapterOutcome {
    if result.success() {
        AdapterOutcome::success(format!("{}\n{}", success_message, result.stdout), result.stdout)
    } else {
        AdapterOutcome::failure(format!("{}:\n{}", failure_heading, result.stderr), result.stderr)
    }
}
