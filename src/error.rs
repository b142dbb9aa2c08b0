//! Error types for tool handling
//!
//! Every variant is converted into a failed [`ToolResult`] at the adapter or
//! dispatcher boundary; none of them reaches the transport.

use crate::exec::RunnerError;
use crate::protocol::ToolResult;
use std::io;

/// Result type for tool handling
pub type Result<T> = std::result::Result<T, ToolError>;

/// Tool handling errors
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Missing or malformed arguments (never reaches the guards)
    #[error("Invalid arguments: {0}")]
    Validation(String),

    /// Path or package rejected by policy (never reaches the runner)
    #[error("{0}")]
    PolicyDenied(String),

    /// Executable missing or not launchable
    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Exceeded its budget; the process was reaped
    #[error("'{program}' timed out after {timeout_ms}ms")]
    Timeout { program: String, timeout_ms: u64 },

    /// Ran to completion but reported failure
    #[error("'{program}' exited with code {code}: {stderr}")]
    NonZeroExit {
        program: String,
        code: i32,
        stderr: String,
    },

    /// Anything else, e.g. an I/O error creating the target directory
    #[error("{0}")]
    Unexpected(String),
}

impl ToolError {
    pub fn missing_argument(key: &str) -> Self {
        ToolError::Validation(format!("Missing required argument '{}'", key))
    }

    pub fn path_denied(path: &str) -> Self {
        ToolError::PolicyDenied(format!("Path {} not in allowed directory", path))
    }

    pub fn package_denied(package: &str) -> Self {
        ToolError::PolicyDenied(format!("Package {} not in whitelist", package))
    }

    /// Short name of the error kind, for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Validation(_) => "validation",
            ToolError::PolicyDenied(_) => "policy_denied",
            ToolError::Spawn { .. } => "spawn",
            ToolError::Timeout { .. } => "timeout",
            ToolError::NonZeroExit { .. } => "non_zero_exit",
            ToolError::Unexpected(_) => "unexpected",
        }
    }
}

impl From<RunnerError> for ToolError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::Spawn { program, source } => ToolError::Spawn { program, source },
            RunnerError::Timeout {
                program, timeout, ..
            } => ToolError::Timeout {
                program,
                timeout_ms: timeout.as_millis() as u64,
            },
            RunnerError::Io { .. } => ToolError::Unexpected(err.to_string()),
        }
    }
}

impl From<ToolError> for ToolResult {
    fn from(err: ToolError) -> Self {
        ToolResult::failure(err.to_string())
    }
}
