// Configuration File Support
//
// This module provides configuration for the pmguard tool server.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from the XDG config directory: ~/.config/pmguard/config.toml
//
// The loaded configuration is immutable: it is wrapped in an `Arc` at startup
// and shared read-only by every request.

use crate::protocol::{ManagerKind, Operation};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Request policy (allow-list, root, timeouts, executables)
    pub policy: PolicyConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,

    /// Also append logs to this file
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            log_file: None,
        }
    }
}

/// Process-wide request policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Allowed package-name patterns ("*" disables filtering)
    pub allowed_packages: Vec<String>,

    /// Directory subtree every operation is confined to
    pub project_root: PathBuf,

    /// Per-operation timeouts
    pub timeouts: TimeoutConfig,

    /// Package-manager executables
    pub tools: ToolPaths,
}

pub const DEFAULT_ALLOWED_PACKAGES: [&str; 3] = ["typescript", "react", "express"];

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_packages: DEFAULT_ALLOWED_PACKAGES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            project_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            timeouts: TimeoutConfig::default(),
            tools: ToolPaths::default(),
        }
    }
}

impl PolicyConfig {
    /// Budget for one command of the given operation
    pub fn timeout_for(&self, operation: Operation) -> Duration {
        let ms = match operation {
            Operation::Install | Operation::Add => self.timeouts.install_ms,
            Operation::Uninstall => self.timeouts.uninstall_ms,
            Operation::Init => self.timeouts.init_ms,
            Operation::CreateVenv => self.timeouts.venv_ms,
        };
        Duration::from_millis(ms)
    }

    /// Grace window between SIGTERM and SIGKILL
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.timeouts.kill_grace_ms)
    }

    /// Executable that serves a manager kind
    pub fn executable(&self, kind: ManagerKind) -> &Path {
        match kind {
            ManagerKind::Node => self.tools.npm(),
            ManagerKind::Python if self.tools.use_uv => self.tools.uv(),
            ManagerKind::Python => self.tools.pip(),
        }
    }
}

/// Timeouts in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// install and add
    pub install_ms: u64,
    pub uninstall_ms: u64,
    pub init_ms: u64,
    pub venv_ms: u64,
    pub kill_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            install_ms: 300_000,
            uninstall_ms: 60_000,
            init_ms: 30_000,
            venv_ms: 120_000,
            kill_grace_ms: 2_000,
        }
    }
}

/// Package-manager executables
///
/// Unset entries are discovered at load time; see [`ToolPaths::discover`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolPaths {
    pub npm: Option<PathBuf>,
    pub uv: Option<PathBuf>,
    pub pip: Option<PathBuf>,

    /// Interpreter used by the pip backend to create virtual environments
    pub python: Option<PathBuf>,

    /// Python backend: uv when true, pip otherwise
    pub use_uv: bool,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            npm: None,
            uv: None,
            pip: None,
            python: None,
            use_uv: true,
        }
    }
}

impl ToolPaths {
    pub fn npm(&self) -> &Path {
        self.npm.as_deref().unwrap_or(Path::new("npm"))
    }

    pub fn uv(&self) -> &Path {
        self.uv.as_deref().unwrap_or(Path::new("uv"))
    }

    pub fn pip(&self) -> &Path {
        self.pip.as_deref().unwrap_or(Path::new("pip"))
    }

    pub fn python(&self) -> &Path {
        self.python.as_deref().unwrap_or(Path::new("python3"))
    }

    /// Fill unset executables from PATH, then well-known install directories
    ///
    /// Anything still not found keeps its bare name, so the failure surfaces
    /// as a spawn error on the request that needs it.
    pub fn discover(mut self) -> Self {
        if self.npm.is_none() {
            self.npm = find_executable("npm");
        }
        if self.uv.is_none() {
            self.uv = find_executable("uv");
        }
        if self.pip.is_none() {
            self.pip = find_executable("pip");
        }
        if self.python.is_none() {
            self.python = find_executable("python3");
        }
        self
    }
}

fn find_executable(name: &str) -> Option<PathBuf> {
    if let Ok(path) = which::which(name) {
        tracing::debug!("Found {} at {:?}", name, path);
        return Some(path);
    }

    let found = known_install_dirs()
        .into_iter()
        .flat_map(|dir| candidate_names(name).into_iter().map(move |n| dir.join(n)))
        .find(|path| path.is_file());
    match &found {
        Some(path) => tracing::debug!("Found {} at {:?}", name, path),
        None => tracing::debug!("{} not found, keeping bare name", name),
    }
    found
}

#[cfg(windows)]
fn candidate_names(name: &str) -> Vec<String> {
    vec![format!("{}.cmd", name), format!("{}.exe", name)]
}

#[cfg(not(windows))]
fn candidate_names(name: &str) -> Vec<String> {
    vec![name.to_string()]
}

#[cfg(windows)]
fn known_install_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(appdata) = std::env::var("APPDATA") {
        dirs.push(PathBuf::from(appdata).join("npm"));
    }
    for var in ["PROGRAMFILES", "PROGRAMFILES(X86)"] {
        if let Ok(base) = std::env::var(var) {
            dirs.push(PathBuf::from(base).join("nodejs"));
        }
    }
    if let Ok(profile) = std::env::var("USERPROFILE") {
        dirs.push(PathBuf::from(&profile).join(".local").join("bin"));
        dirs.push(PathBuf::from(&profile).join(".cargo").join("bin"));
    }
    dirs
}

#[cfg(not(windows))]
fn known_install_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
        dirs.push(home.join(".local").join("bin"));
        dirs.push(home.join(".cargo").join("bin"));
    }
    dirs.push(PathBuf::from("/usr/local/bin"));
    dirs.push(PathBuf::from("/opt/homebrew/bin"));
    dirs
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or if
    /// the resulting configuration is invalid.
    /// If the config file does not exist, defaults plus environment overrides apply.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides().finalize()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/pmguard/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "pmguard", "pmguard") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("pmguard").join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - PMGUARD_ALLOWED_PACKAGES (comma-separated)
    /// - PMGUARD_PROJECT_DIR
    /// - PMGUARD_INSTALL_TIMEOUT / _UNINSTALL_TIMEOUT / _INIT_TIMEOUT / _VENV_TIMEOUT (ms)
    /// - PMGUARD_KILL_GRACE (ms)
    /// - PMGUARD_NPM_PATH / _UV_PATH / _PIP_PATH / _PYTHON_PATH
    /// - PMGUARD_USE_UV
    /// - PMGUARD_LOG_LEVEL / _LOG_FORMAT / _LOG_FILE
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (environment in production)
    pub fn apply_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(list) = lookup("PMGUARD_ALLOWED_PACKAGES") {
            self.policy.allowed_packages = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(dir) = lookup("PMGUARD_PROJECT_DIR") {
            self.policy.project_root = PathBuf::from(dir);
        }

        let timeouts = &mut self.policy.timeouts;
        for (key, slot) in [
            ("PMGUARD_INSTALL_TIMEOUT", &mut timeouts.install_ms),
            ("PMGUARD_UNINSTALL_TIMEOUT", &mut timeouts.uninstall_ms),
            ("PMGUARD_INIT_TIMEOUT", &mut timeouts.init_ms),
            ("PMGUARD_VENV_TIMEOUT", &mut timeouts.venv_ms),
            ("PMGUARD_KILL_GRACE", &mut timeouts.kill_grace_ms),
        ] {
            if let Some(value) = lookup(key) {
                match value.trim().parse::<u64>() {
                    Ok(ms) if ms > 0 => *slot = ms,
                    _ => tracing::warn!("Ignoring invalid {}={:?}", key, value),
                }
            }
        }

        let tools = &mut self.policy.tools;
        for (key, slot) in [
            ("PMGUARD_NPM_PATH", &mut tools.npm),
            ("PMGUARD_UV_PATH", &mut tools.uv),
            ("PMGUARD_PIP_PATH", &mut tools.pip),
            ("PMGUARD_PYTHON_PATH", &mut tools.python),
        ] {
            if let Some(path) = lookup(key).filter(|p| !p.trim().is_empty()) {
                *slot = Some(PathBuf::from(path));
            }
        }
        if let Some(value) = lookup("PMGUARD_USE_UV") {
            match parse_bool(&value) {
                Some(flag) => tools.use_uv = flag,
                None => tracing::warn!("Ignoring invalid PMGUARD_USE_UV={:?}", value),
            }
        }

        if let Some(level) = lookup("PMGUARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("PMGUARD_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(file) = lookup("PMGUARD_LOG_FILE").filter(|f| !f.trim().is_empty()) {
            self.logging.log_file = Some(PathBuf::from(file));
        }

        self
    }

    /// Make the project root absolute and discover executables
    fn finalize(mut self) -> Result<Self> {
        if !self.policy.project_root.is_absolute() {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            self.policy.project_root = cwd.join(&self.policy.project_root);
        }
        self.policy.tools = self.policy.tools.discover();
        Ok(self)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if !self
            .policy
            .allowed_packages
            .iter()
            .any(|p| !p.trim().is_empty())
        {
            anyhow::bail!("Allowed package list must not be empty (use \"*\" to allow all)");
        }

        if self.policy.project_root.as_os_str().is_empty() {
            anyhow::bail!("Project root must not be empty");
        }

        let t = &self.policy.timeouts;
        for (name, ms) in [
            ("install", t.install_ms),
            ("uninstall", t.uninstall_ms),
            ("init", t.init_ms),
            ("venv", t.venv_ms),
            ("kill grace", t.kill_grace_ms),
        ] {
            if ms == 0 {
                anyhow::bail!("{} timeout must be > 0", name);
            }
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.policy.allowed_packages,
            vec!["typescript", "react", "express"]
        );
        assert_eq!(config.policy.timeouts.install_ms, 300_000);
        assert_eq!(config.policy.timeouts.uninstall_ms, 60_000);
        assert_eq!(config.policy.timeouts.init_ms, 30_000);
        assert!(config.policy.tools.use_uv);
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_empty_allow_list() {
        let mut config = Config::default();
        config.policy.allowed_packages = vec![" ".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let mut config = Config::default();
        config.policy.timeouts.init_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_for_operation() {
        let policy = PolicyConfig::default();
        assert_eq!(policy.timeout_for(Operation::Install), Duration::from_millis(300_000));
        assert_eq!(policy.timeout_for(Operation::Add), Duration::from_millis(300_000));
        assert_eq!(policy.timeout_for(Operation::Uninstall), Duration::from_millis(60_000));
        assert_eq!(policy.timeout_for(Operation::Init), Duration::from_millis(30_000));
        assert_eq!(policy.timeout_for(Operation::CreateVenv), Duration::from_millis(120_000));
        assert_eq!(policy.kill_grace(), Duration::from_millis(2_000));
    }

    #[test]
    fn test_executable_selection() {
        let mut policy = PolicyConfig::default();
        policy.tools.npm = Some(PathBuf::from("/opt/node/bin/npm"));
        policy.tools.uv = Some(PathBuf::from("/opt/uv"));

        assert_eq!(policy.executable(ManagerKind::Node), Path::new("/opt/node/bin/npm"));
        assert_eq!(policy.executable(ManagerKind::Python), Path::new("/opt/uv"));

        policy.tools.use_uv = false;
        assert_eq!(policy.executable(ManagerKind::Python), Path::new("pip"));
    }

    #[test]
    fn test_discover_keeps_explicit_paths() {
        let tools = ToolPaths {
            npm: Some(PathBuf::from("/custom/npm")),
            uv: Some(PathBuf::from("/custom/uv")),
            pip: Some(PathBuf::from("/custom/pip")),
            python: Some(PathBuf::from("/custom/python")),
            use_uv: true,
        }
        .discover();
        assert_eq!(tools.npm(), Path::new("/custom/npm"));
        assert_eq!(tools.uv(), Path::new("/custom/uv"));
        assert_eq!(tools.pip(), Path::new("/custom/pip"));
        assert_eq!(tools.python(), Path::new("/custom/python"));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default().apply_overrides_from(lookup(&[
            ("PMGUARD_ALLOWED_PACKAGES", "react, lodash,,"),
            ("PMGUARD_PROJECT_DIR", "/work"),
            ("PMGUARD_INSTALL_TIMEOUT", "1000"),
            ("PMGUARD_VENV_TIMEOUT", "2000"),
            ("PMGUARD_NPM_PATH", "/usr/bin/npm"),
            ("PMGUARD_USE_UV", "false"),
            ("PMGUARD_LOG_LEVEL", "debug"),
            ("PMGUARD_LOG_FORMAT", "json"),
            ("PMGUARD_LOG_FILE", "/tmp/pmguard.log"),
        ]));

        assert_eq!(config.policy.allowed_packages, vec!["react", "lodash"]);
        assert_eq!(config.policy.project_root, PathBuf::from("/work"));
        assert_eq!(config.policy.timeouts.install_ms, 1000);
        assert_eq!(config.policy.timeouts.venv_ms, 2000);
        assert_eq!(config.policy.tools.npm, Some(PathBuf::from("/usr/bin/npm")));
        assert!(!config.policy.tools.use_uv);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.log_file, Some(PathBuf::from("/tmp/pmguard.log")));
    }

    #[test]
    fn test_env_overrides_invalid_values() {
        let config = Config::default().apply_overrides_from(lookup(&[
            ("PMGUARD_INSTALL_TIMEOUT", "soon"),
            ("PMGUARD_UNINSTALL_TIMEOUT", "0"),
            ("PMGUARD_USE_UV", "maybe"),
        ]));

        // Should keep defaults for invalid values
        assert_eq!(config.policy.timeouts.install_ms, 300_000);
        assert_eq!(config.policy.timeouts.uninstall_ms, 60_000);
        assert!(config.policy.tools.use_uv);
    }

    #[test]
    fn test_load_from_nonexistent_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().with_extension("nonexistent");
        let config = Config::load_from_path(&path).unwrap();
        assert!(config.policy.project_root.is_absolute());
    }

    #[test]
    fn test_load_valid_toml_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let toml_content = r#"
[policy]
allowed_packages = ["*"]
project_root = "/srv/projects"

[policy.timeouts]
install_ms = 120000
init_ms = 5000

[policy.tools]
npm = "/opt/node/bin/npm"
uv = "/opt/uv/bin/uv"
use_uv = true

[logging]
level = "debug"
format = "json"
"#;
        fs::write(temp_file.path(), toml_content).unwrap();

        let config: Config = toml::from_str(&fs::read_to_string(temp_file.path()).unwrap()).unwrap();
        assert_eq!(config.policy.allowed_packages, vec!["*"]);
        assert_eq!(config.policy.project_root, PathBuf::from("/srv/projects"));
        assert_eq!(config.policy.timeouts.install_ms, 120_000);
        assert_eq!(config.policy.timeouts.init_ms, 5_000);
        // Partial tables keep defaults for the rest
        assert_eq!(config.policy.timeouts.uninstall_ms, 60_000);
        assert_eq!(config.policy.tools.npm, Some(PathBuf::from("/opt/node/bin/npm")));
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_invalid_toml_config() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[policy\nallowed_packages = 1\n").unwrap();
        assert!(Config::load_from_path(temp_file.path()).is_err());
    }

    #[test]
    fn test_finalize_makes_root_absolute() {
        let mut config = Config::default();
        config.policy.project_root = PathBuf::from("projects");
        config.policy.tools.npm = Some(PathBuf::from("/custom/npm"));
        let config = config.finalize().unwrap();
        assert!(config.policy.project_root.is_absolute());
        assert!(config.policy.project_root.ends_with("projects"));
        assert_eq!(config.policy.tools.npm(), Path::new("/custom/npm"));
    }

    #[test]
    fn test_config_path() {
        assert!(Config::config_path().ends_with("config.toml"));
    }

    #[test]
    fn test_log_level_parsing() {
        let mut config = Config::default();
        config.logging.level = "debug".to_string();
        assert_eq!(config.log_level().unwrap(), tracing::Level::DEBUG);

        config.logging.level = "invalid".to_string();
        assert!(config.log_level().is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("perhaps"), None);
    }
}
