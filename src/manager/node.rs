//! npm adapter

use super::{completed, init_failure, AdapterOutcome, Invoker, ManagerAdapter};
use crate::protocol::{ManagerKind, Operation};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

const MANIFEST: &str = "package.json";
const INIT_ARGS: [&str; 2] = ["init", "-y"];

/// Runs npm
///
/// npm ships as a `.cmd` script on Windows, which cannot be launched as a
/// plain executable; there the adapter opts into shell mode. Everywhere else
/// it uses argument vectors.
#[derive(Clone)]
pub struct NodeAdapter {
    invoker: Invoker,
    npm: PathBuf,
    shell: bool,
}

impl NodeAdapter {
    pub(crate) fn new(invoker: Invoker) -> Self {
        let npm = invoker.policy().executable(ManagerKind::Node).to_path_buf();
        Self {
            invoker,
            npm,
            shell: cfg!(windows),
        }
    }

    /// Executable this adapter launches
    pub fn program(&self) -> &Path {
        &self.npm
    }

    fn args(verb: &str, package: &str) -> Vec<String> {
        vec![verb.to_string(), package.to_string()]
    }
}

#[async_trait]
impl ManagerAdapter for NodeAdapter {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Node
    }

    fn manifest(&self) -> &'static str {
        MANIFEST
    }

    async fn install(&self, package: &str, path: &Path) -> AdapterOutcome {
        info!(package, path = %path.display(), "npm install");

        if let Err(e) = self
            .invoker
            .ensure_manifest(&self.npm, &INIT_ARGS, self.manifest(), path, self.shell)
            .await
        {
            return init_failure(self.manifest(), e);
        }

        match self
            .invoker
            .run(&self.npm, Self::args("install", package), path, Operation::Install, self.shell)
            .await
        {
            Ok(result) => completed(
                result,
                format!("Successfully installed {}", package),
                "Installation failed",
            ),
            Err(e) => AdapterOutcome::from_error("NPM installation error", e),
        }
    }

    async fn uninstall(&self, package: &str, path: &Path) -> AdapterOutcome {
        info!(package, path = %path.display(), "npm uninstall");

        match self
            .invoker
            .run(&self.npm, Self::args("uninstall", package), path, Operation::Uninstall, self.shell)
            .await
        {
            Ok(result) => completed(
                result,
                format!("Successfully uninstalled {}", package),
                "Uninstallation failed",
            ),
            Err(e) => AdapterOutcome::from_error("NPM uninstallation error", e),
        }
    }

    async fn init(&self, path: &Path) -> AdapterOutcome {
        info!(path = %path.display(), "npm init");

        let args = INIT_ARGS.iter().map(|s| s.to_string()).collect();
        match self
            .invoker
            .run(&self.npm, args, path, Operation::Init, self.shell)
            .await
        {
            Ok(result) => completed(
                result,
                "Successfully initialized npm project".to_string(),
                "Initialization failed",
            ),
            Err(e) => AdapterOutcome::from_error("NPM initialization error", e),
        }
    }
}
