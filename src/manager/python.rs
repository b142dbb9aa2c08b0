//! Python adapter (uv or pip backend)

use super::{completed, init_failure, AdapterOutcome, Invoker, ManagerAdapter};
use crate::error::ToolError;
use crate::guard::{PackageGuard, PathGuard, REQUIREMENTS_FILE, REQUIREMENTS_SENTINEL};
use crate::protocol::{ManagerKind, Operation};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const PYPROJECT: &str = "pyproject.toml";
const REQUIREMENTS_HEADER: &str = "# Python package requirements\n";

/// Which tool serves Python operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PythonBackend {
    Uv,
    Pip,
}

impl PythonBackend {
    pub fn manifest(&self) -> &'static str {
        match self {
            PythonBackend::Uv => PYPROJECT,
            PythonBackend::Pip => REQUIREMENTS_FILE,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            PythonBackend::Uv => "UV",
            PythonBackend::Pip => "Pip",
        }
    }
}

/// Runs uv or pip, plus the interpreter for pip-backed virtual environments
#[derive(Clone)]
pub struct PythonAdapter {
    invoker: Invoker,
    backend: PythonBackend,
    program: PathBuf,
    python: PathBuf,
    packages: PackageGuard,
    paths: PathGuard,
}

impl PythonAdapter {
    pub(crate) fn new(invoker: Invoker) -> Self {
        let policy = invoker.policy();
        let backend = if policy.tools.use_uv {
            PythonBackend::Uv
        } else {
            PythonBackend::Pip
        };
        let program = policy.executable(ManagerKind::Python).to_path_buf();
        let python = policy.tools.python().to_path_buf();
        let packages = PackageGuard::new(policy.allowed_packages.iter().cloned());
        let paths = PathGuard::new(policy.project_root.clone());

        Self {
            invoker,
            backend,
            program,
            python,
            packages,
            paths,
        }
    }

    pub fn backend(&self) -> PythonBackend {
        self.backend
    }

    /// Executable this adapter launches for package operations
    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn ensure_manifest(&self, path: &Path) -> Result<(), ToolError> {
        match self.backend {
            PythonBackend::Uv => {
                self.invoker
                    .ensure_manifest(&self.program, &["init"], PYPROJECT, path, false)
                    .await
            }
            PythonBackend::Pip => write_requirements_stub(path).map(|_| ()),
        }
    }

    /// Add packages with a raw argument list
    ///
    /// Requirements references among `args` are resolved against `path`; each
    /// file must lie inside the project root and list only allowed packages
    /// before anything runs.
    pub async fn add(&self, args: &[String], path: &Path) -> AdapterOutcome {
        info!(args = ?args, path = %path.display(), "python add");

        let references = match requirements_references(args) {
            Ok(references) => references,
            Err(message) => {
                warn!(args = ?args, error = %message, "Unreadable requirements option");
                return AdapterOutcome::failure(ToolError::Validation(message).to_string(), "");
            }
        };
        for reference in references {
            let file = path.join(reference);
            if !self.paths.is_path_allowed(&file) {
                warn!(file = %file.display(), "Requirements file outside project root");
                return AdapterOutcome::failure(
                    format!("Path {} not in allowed directory", file.display()),
                    "",
                );
            }
            if !self.packages.is_requirements_file_allowed(&file) {
                warn!(file = %file.display(), "Requirements file rejected");
                return AdapterOutcome::failure(
                    format!("Some packages in {} are not in whitelist", reference),
                    "",
                );
            }
        }

        if let Err(e) = self.ensure_manifest(path).await {
            return init_failure(self.manifest(), e);
        }

        let verb = match self.backend {
            PythonBackend::Uv => "add",
            PythonBackend::Pip => "install",
        };
        let mut argv = vec![verb.to_string()];
        argv.extend(args.iter().cloned());

        match self
            .invoker
            .run(&self.program, argv, path, Operation::Add, false)
            .await
        {
            Ok(result) => completed(
                result,
                format!(
                    "Successfully added packages using '{} {} {}'",
                    super::program_label(&self.program),
                    verb,
                    args.join(" ")
                ),
                "Package addition failed",
            ),
            Err(e) => AdapterOutcome::from_error(&format!("{} add error", self.backend.label()), e),
        }
    }

    /// Create a virtual environment named `venv_name` inside `path`
    ///
    /// A zero exit is only trusted once the environment directory exists.
    pub async fn create_venv(&self, path: &Path, venv_name: &str) -> AdapterOutcome {
        info!(venv = venv_name, path = %path.display(), "python create_venv");

        let (program, args) = match self.backend {
            PythonBackend::Uv => (&self.program, vec!["venv".to_string(), venv_name.to_string()]),
            PythonBackend::Pip => (
                &self.python,
                vec!["-m".to_string(), "venv".to_string(), venv_name.to_string()],
            ),
        };

        let result = match self
            .invoker
            .run(program, args, path, Operation::CreateVenv, false)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                return AdapterOutcome::from_error(
                    &format!("{} venv creation error", self.backend.label()),
                    e,
                )
            }
        };

        let venv_path = path.join(venv_name);
        if !result.success() {
            return AdapterOutcome::failure(
                format!("Virtual environment creation failed:\n{}", result.stderr),
                result.stderr,
            );
        }
        if !venv_path.is_dir() {
            warn!(venv = %venv_path.display(), "Manager reported success but environment is missing");
            return AdapterOutcome::failure(
                format!(
                    "Virtual environment creation seemed to succeed but {} not found",
                    venv_path.display()
                ),
                result.stdout,
            );
        }
        AdapterOutcome::success(
            format!(
                "Successfully created virtual environment at {}\n{}",
                venv_path.display(),
                result.stdout
            ),
            result.stdout,
        )
    }
}

#[async_trait]
impl ManagerAdapter for PythonAdapter {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Python
    }

    fn manifest(&self) -> &'static str {
        self.backend.manifest()
    }

    /// `package` is one specifier and reaches the manager as one argument.
    /// The requirements sentinel expands to `-r requirements.txt` under
    /// `uv pip install` / `pip install`.
    async fn install(&self, package: &str, path: &Path) -> AdapterOutcome {
        info!(package, path = %path.display(), backend = ?self.backend, "python install");

        if let Err(e) = self.ensure_manifest(path).await {
            return init_failure(self.manifest(), e);
        }

        let args: Vec<String> = match (self.backend, package == REQUIREMENTS_SENTINEL) {
            (PythonBackend::Uv, true) => vec!["pip", "install", "-r", REQUIREMENTS_FILE],
            (PythonBackend::Uv, false) => vec!["add", package],
            (PythonBackend::Pip, true) => vec!["install", "-r", REQUIREMENTS_FILE],
            (PythonBackend::Pip, false) => vec!["install", package],
        }
        .into_iter()
        .map(String::from)
        .collect();

        match self
            .invoker
            .run(&self.program, args, path, Operation::Install, false)
            .await
        {
            Ok(result) => completed(
                result,
                format!("Successfully installed {}", package),
                "Installation failed",
            ),
            Err(e) => AdapterOutcome::from_error(
                &format!("{} installation error", self.backend.label()),
                e,
            ),
        }
    }

    async fn uninstall(&self, package: &str, path: &Path) -> AdapterOutcome {
        info!(package, path = %path.display(), backend = ?self.backend, "python uninstall");

        let package = package.trim().to_string();
        let args = match self.backend {
            PythonBackend::Uv if path.join(PYPROJECT).exists() => vec!["remove".to_string(), package.clone()],
            PythonBackend::Uv => vec!["pip".to_string(), "uninstall".to_string(), package.clone()],
            PythonBackend::Pip => vec!["uninstall".to_string(), "-y".to_string(), package.clone()],
        };

        match self
            .invoker
            .run(&self.program, args, path, Operation::Uninstall, false)
            .await
        {
            Ok(result) => completed(
                result,
                format!("Successfully uninstalled {}", package),
                "Uninstallation failed",
            ),
            Err(e) => AdapterOutcome::from_error(
                &format!("{} uninstallation error", self.backend.label()),
                e,
            ),
        }
    }

    async fn init(&self, path: &Path) -> AdapterOutcome {
        info!(path = %path.display(), backend = ?self.backend, "python init");

        match self.backend {
            PythonBackend::Uv => match self
                .invoker
                .run(&self.program, vec!["init".to_string()], path, Operation::Init, false)
                .await
            {
                Ok(result) => completed(
                    result,
                    "Successfully initialized UV project".to_string(),
                    "Initialization failed",
                ),
                Err(e) => AdapterOutcome::from_error("UV initialization error", e),
            },
            PythonBackend::Pip => match write_requirements_stub(path) {
                Ok(true) => AdapterOutcome::success(
                    format!("Successfully initialized pip project\nCreated {}", REQUIREMENTS_FILE),
                    "",
                ),
                Ok(false) => AdapterOutcome::success(
                    format!("Successfully initialized pip project\n{} already exists", REQUIREMENTS_FILE),
                    "",
                ),
                Err(e) => AdapterOutcome::from_error("Pip initialization error", e),
            },
        }
    }
}

/// Create an empty requirements file unless one exists; `true` if created
fn write_requirements_stub(path: &Path) -> Result<bool, ToolError> {
    let file = path.join(REQUIREMENTS_FILE);
    if file.exists() {
        return Ok(false);
    }
    fs::write(&file, REQUIREMENTS_HEADER).map_err(|e| {
        ToolError::Unexpected(format!("Failed to write {}: {}", file.display(), e))
    })?;
    Ok(true)
}

/// Requirements-file references in a raw argument list
///
/// Recognises `-r <file>`, `-r<file>`, `--requirement <file>`,
/// `--requirement=<file>` and the same two forms of `--requirements`. Any
/// other argument the managers could read as one of these is an error: a flag
/// with no file, `-r` bundled behind other short flags, or an abbreviated or
/// misspelt long option.
pub fn requirements_references(args: &[String]) -> Result<Vec<&str>, String> {
    let mut refs = Vec::new();
    let mut iter = args.iter().map(String::as_str);
    while let Some(arg) = iter.next() {
        if let Some(long) = arg.strip_prefix("--") {
            let (name, inline) = match long.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (long, None),
            };
            if name != "requirement" && name != "requirements" {
                if looks_like_requirement_option(name) {
                    return Err(format!("Unsupported option '{}'", arg));
                }
                continue;
            }
            let file = match inline {
                Some(file) => file,
                None => iter
                    .next()
                    .ok_or_else(|| format!("Option '{}' needs a file", arg))?,
            };
            if file.is_empty() {
                return Err(format!("Option '{}' needs a file", arg));
            }
            refs.push(file);
        } else if let Some(short) = arg.strip_prefix('-') {
            if !short.contains('r') {
                continue;
            }
            match short.strip_prefix('r') {
                Some("") => {
                    let file = iter
                        .next()
                        .ok_or_else(|| format!("Option '{}' needs a file", arg))?;
                    refs.push(file);
                }
                Some(file) => refs.push(file),
                None => return Err(format!("Unsupported option '{}'", arg)),
            }
        }
    }
    Ok(refs)
}

/// pip accepts unambiguous prefixes of long options
fn looks_like_requirement_option(name: &str) -> bool {
    name.starts_with("requirement") || (name.len() >= 3 && "requirement".starts_with(name))
}
