//! Tool Dispatcher
//!
//! Routes a named operation and its argument bag to the right adapter.
//!
//! Every request goes through the same sequence:
//!
//! 1. Required arguments are checked; nothing else runs if one is missing
//! 2. [`PathGuard`] confines the target directory to the project root
//! 3. [`PackageGuard`] checks the package for install
//! 4. The target directory is created if absent
//! 5. The adapter runs the package manager
//!
//! Whatever happens, the caller gets a [`ToolResult`]; errors and panics stop
//! here.

use crate::config::PolicyConfig;
use crate::error::{Result, ToolError};
use crate::exec::{CommandRunner, ProcessRunner};
use crate::guard::{PackageGuard, PathGuard, REQUIREMENTS_SENTINEL};
use crate::manager::{AdapterOutcome, Invoker, ManagerAdapter, NodeAdapter, PythonAdapter};
use crate::protocol::{ManagerKind, Operation, ToolRequest, ToolResult};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Environment name used when `create_venv` gets none
pub const DEFAULT_VENV_NAME: &str = ".venv";

/// Guarded entry point for all tool calls
///
/// Holds only read-only state, so one instance serves any number of
/// concurrent requests.
pub struct ToolDispatcher {
    policy: Arc<PolicyConfig>,
    paths: PathGuard,
    packages: PackageGuard,
    node: NodeAdapter,
    python: PythonAdapter,
}

impl ToolDispatcher {
    /// Create a dispatcher that runs real processes
    pub fn new(policy: Arc<PolicyConfig>) -> Self {
        let runner = Arc::new(ProcessRunner::with_kill_grace(policy.kill_grace()));
        Self::with_runner(policy, runner)
    }

    /// Create a dispatcher over a custom runner
    pub fn with_runner(policy: Arc<PolicyConfig>, runner: Arc<dyn CommandRunner>) -> Self {
        let invoker = Invoker::new(runner, policy.clone());
        let packages = PackageGuard::new(policy.allowed_packages.iter().cloned());
        let node = NodeAdapter::new(invoker.clone());
        let python = PythonAdapter::new(invoker);
        debug!(
            root = %policy.project_root.display(),
            allowed = ?packages.allowed(),
            npm = %node.program().display(),
            python = %python.program().display(),
            backend = ?python.backend(),
            "Dispatcher ready"
        );
        Self {
            paths: PathGuard::new(policy.project_root.clone()),
            packages,
            node,
            python,
            policy,
        }
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    fn adapter(&self, kind: ManagerKind) -> &dyn ManagerAdapter {
        let adapter: &dyn ManagerAdapter = match kind {
            ManagerKind::Node => &self.node,
            ManagerKind::Python => &self.python,
        };
        debug!(manager = %adapter.kind(), manifest = adapter.manifest(), "Adapter selected");
        adapter
    }

    /// Handle a request by tool name
    ///
    /// Unknown names yield an "Unknown tool" result rather than an error.
    pub async fn dispatch_request(&self, request: ToolRequest) -> ToolResult {
        let request_id = Uuid::new_v4();
        let span = info_span!("tool_call", tool = %request.name, request_id = %request_id);

        async move {
            match request.name.parse::<Operation>() {
                Ok(operation) => self.dispatch(operation, &request.arguments).await,
                Err(message) => {
                    warn!("{}", message);
                    ToolResult::failure(message)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Handle one operation
    pub async fn dispatch(&self, operation: Operation, arguments: &Map<String, Value>) -> ToolResult {
        info!(operation = %operation, "Tool call started");

        let handled = AssertUnwindSafe(self.handle(operation, arguments))
            .catch_unwind()
            .await;

        let result = match handled {
            Ok(Ok(outcome)) => ToolResult::from(outcome),
            Ok(Err(err)) => {
                match &err {
                    ToolError::Validation(_) | ToolError::PolicyDenied(_) => {
                        warn!(kind = err.kind(), error = %err, "Request rejected")
                    }
                    _ => error!(kind = err.kind(), error = %err, "Request failed"),
                }
                ToolResult::from(err)
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(panic = %detail, "Handler panicked");
                ToolResult::failure(format!("Internal error while handling '{}': {}", operation, detail))
            }
        };

        info!(operation = %operation, success = result.success, "Tool call finished");
        result
    }

    async fn handle(&self, operation: Operation, args: &Map<String, Value>) -> Result<AdapterOutcome> {
        match operation {
            Operation::Install => {
                let package = required_str(args, "package")?.trim();
                let kind = manager_kind(args)?;
                let path = required_str(args, "path")?;
                check_package_form(package, kind == ManagerKind::Python)?;

                let path = self.check_path(path)?;
                self.check_package(package, &path)?;
                prepare_directory(&path)?;
                Ok(self.adapter(kind).install(package, &path).await)
            }
            Operation::Uninstall => {
                let package = required_str(args, "package")?.trim();
                let kind = manager_kind(args)?;
                let path = required_str(args, "path")?;
                check_package_form(package, false)?;
                let path = self.check_path(path)?;
                prepare_directory(&path)?;
                Ok(self.adapter(kind).uninstall(package, &path).await)
            }
            Operation::Init => {
                let kind = manager_kind(args)?;
                let path = self.check_path(required_str(args, "path")?)?;
                prepare_directory(&path)?;
                Ok(self.adapter(kind).init(&path).await)
            }
            Operation::CreateVenv => {
                let raw_path = required_str(args, "path")?;
                let venv_name = optional_str(args, "venv_name")?.unwrap_or(DEFAULT_VENV_NAME);
                let path = self.check_path(raw_path)?;
                let venv_path = path.join(venv_name);
                if !self.paths.is_path_allowed(&venv_path) {
                    warn!(venv = %venv_path.display(), "Environment path outside project root");
                    return Err(ToolError::path_denied(&venv_path.display().to_string()));
                }
                prepare_directory(&path)?;
                Ok(self.python.create_venv(&path, venv_name).await)
            }
            Operation::Add => {
                let raw_path = required_str(args, "path")?;
                let add_args = string_list(args, "args")?;
                let path = self.check_path(raw_path)?;
                prepare_directory(&path)?;
                Ok(self.python.add(&add_args, &path).await)
            }
        }
    }

    fn check_path(&self, raw: &str) -> Result<PathBuf> {
        let path = PathBuf::from(raw);
        if self.paths.is_path_allowed(&path) {
            Ok(path)
        } else {
            warn!(path = raw, "Path outside project root");
            Err(ToolError::path_denied(raw))
        }
    }

    fn check_package(&self, package: &str, path: &Path) -> Result<()> {
        if self.packages.is_package_allowed(package, Some(path)) {
            return Ok(());
        }
        warn!(package, "Package rejected by allow-list");
        if package == REQUIREMENTS_SENTINEL {
            Err(ToolError::PolicyDenied(
                "Some packages in requirements.txt are not in whitelist".to_string(),
            ))
        } else {
            Err(ToolError::package_denied(package))
        }
    }
}

/// One package specifier, or the requirements sentinel where accepted
///
/// The package reaches the manager as a single argument, so anything that
/// would read as a second package or as an option is refused up front.
fn check_package_form(package: &str, requirements_allowed: bool) -> Result<()> {
    if package == REQUIREMENTS_SENTINEL {
        return if requirements_allowed {
            Ok(())
        } else {
            Err(ToolError::Validation(format!(
                "'{}' is only accepted by install with a Python manager",
                REQUIREMENTS_SENTINEL
            )))
        };
    }
    if package.starts_with('-') || package.contains(char::is_whitespace) {
        return Err(ToolError::Validation(format!(
            "'{}' is not a single package specifier",
            package
        )));
    }
    Ok(())
}

fn prepare_directory(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| {
        ToolError::Unexpected(format!("Failed to create directory {}: {}", path.display(), e))
    })
}

fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    optional_str(args, key)?.ok_or_else(|| ToolError::missing_argument(key))
}

fn optional_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.as_str())),
        Some(Value::String(_)) => Err(ToolError::Validation(format!(
            "Argument '{}' must not be empty",
            key
        ))),
        Some(_) => Err(ToolError::Validation(format!(
            "Argument '{}' must be a string",
            key
        ))),
    }
}

fn string_list(args: &Map<String, Value>, key: &str) -> Result<Vec<String>> {
    let items = match args.get(key) {
        None | Some(Value::Null) => return Err(ToolError::missing_argument(key)),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(ToolError::Validation(format!(
                "Argument '{}' must be a list of strings",
                key
            )))
        }
    };
    if items.is_empty() {
        return Err(ToolError::Validation(format!(
            "Argument '{}' must not be empty",
            key
        )));
    }
    items
        .iter()
        .map(|item| {
            item.as_str().map(String::from).ok_or_else(|| {
                ToolError::Validation(format!("Argument '{}' must be a list of strings", key))
            })
        })
        .collect()
}

fn manager_kind(args: &Map<String, Value>) -> Result<ManagerKind> {
    required_str(args, "manager")?
        .parse()
        .map_err(ToolError::Validation)
}
