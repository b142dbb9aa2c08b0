//! Package allow-list enforcement
//!
//! Matching is substring containment: an allow-list entry permits any package
//! whose bare name contains it, so `react` also permits `reactive-thing`. This
//! is a known coarse match kept for compatibility with existing allow-lists.

use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Allow-list entry that disables filtering
pub const WILDCARD: &str = "*";

/// Identifier meaning "install from the project's requirements file"
pub const REQUIREMENTS_SENTINEL: &str = "-r requirements.txt";

/// Requirements file name resolved against the context directory
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

const VERSION_SPECIFIERS: [&str; 3] = ["==", ">=", "<="];

/// Decides whether package identifiers are permitted
#[derive(Debug, Clone)]
pub struct PackageGuard {
    allowed: Vec<String>,
}

impl PackageGuard {
    /// Blank entries are dropped; an empty pattern would match every name.
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(Into::into)
                .map(|p: String| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    pub fn allows_everything(&self) -> bool {
        self.allowed.iter().any(|p| p == WILDCARD)
    }

    /// Check a package identifier
    ///
    /// `context` is the project directory; it is only consulted for
    /// [`REQUIREMENTS_SENTINEL`], whose file is `context/requirements.txt`.
    pub fn is_package_allowed(&self, identifier: &str, context: Option<&Path>) -> bool {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return false;
        }
        if self.allows_everything() {
            return true;
        }

        if identifier == REQUIREMENTS_SENTINEL {
            return match context {
                Some(dir) => self.is_requirements_file_allowed(&dir.join(REQUIREMENTS_FILE)),
                None => {
                    debug!("Requirements install without a project directory");
                    false
                }
            };
        }

        let name = bare_name(identifier);
        let allowed = self.matches(name);
        if !allowed {
            debug!(package = %name, "Package not in whitelist");
        }
        allowed
    }

    /// All-or-nothing check of a requirements file
    ///
    /// Missing or unreadable files fail closed. Blank lines and `#` comments
    /// are skipped; every other line must match the allow-list.
    pub fn is_requirements_file_allowed(&self, file: &Path) -> bool {
        if self.allows_everything() {
            return true;
        }

        let contents = match fs::read_to_string(file) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "Cannot read requirements file");
                return false;
            }
        };

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let name = bare_name(line);
            if !self.matches(name) {
                warn!(package = %name, file = %file.display(), "Requirements entry not in whitelist");
                return false;
            }
        }
        true
    }

    fn matches(&self, name: &str) -> bool {
        self.allowed.iter().any(|pattern| name.contains(pattern.as_str()))
    }
}

/// Strip `==`, `>=` and `<=` version specifiers
pub fn bare_name(identifier: &str) -> &str {
    let mut name = identifier;
    for specifier in VERSION_SPECIFIERS {
        if let Some((head, _)) = name.split_once(specifier) {
            name = head;
        }
    }
    name.trim()
}
