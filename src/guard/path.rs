//! Project-root confinement

use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Decides whether a filesystem path lies inside the project root
///
/// Both sides are resolved to absolute, symlink-free form on every call, and
/// containment is decided on whole path segments, so `/work-evil` is not
/// inside `/work`. A symlink inside the root that points elsewhere resolves to
/// its target and is rejected.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Never fails; any resolution error yields `false`.
    ///
    /// The root must exist. Only the candidate may name directories that
    /// have not been created yet.
    pub fn is_path_allowed(&self, candidate: &Path) -> bool {
        let root = match self.root.canonicalize() {
            Ok(root) => root,
            Err(e) => {
                debug!(root = %self.root.display(), error = %e, "Project root cannot be resolved");
                return false;
            }
        };
        let candidate_resolved = match resolve(candidate) {
            Ok(path) => path,
            Err(e) => {
                debug!(path = %candidate.display(), error = %e, "Path cannot be resolved");
                return false;
            }
        };

        let allowed = contains(&root, &candidate_resolved);
        debug!(
            path = %candidate.display(),
            resolved = %candidate_resolved.display(),
            root = %root.display(),
            allowed,
            "Path check"
        );
        allowed
    }
}

/// Canonicalize a path that may not exist yet
///
/// The deepest existing ancestor is canonicalized and the remaining
/// components are appended. Those components cannot be checked against the
/// filesystem, so anything other than plain names among them is refused.
fn resolve(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut existing = absolute.as_path();
    let mut pending = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(mut resolved) => {
                for component in pending.iter().rev() {
                    resolved.push(component);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let name = match existing.components().next_back() {
                    Some(Component::Normal(name)) => name.to_os_string(),
                    Some(Component::CurDir) => std::ffi::OsString::new(),
                    _ => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "unresolvable component below a missing directory",
                        ))
                    }
                };
                if !name.is_empty() {
                    pending.push(name);
                }
                existing = existing.parent().ok_or(e)?;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(any(windows, target_os = "macos"))]
fn contains(root: &Path, candidate: &Path) -> bool {
    let fold = |p: &Path| PathBuf::from(p.to_string_lossy().to_lowercase());
    fold(candidate).starts_with(fold(root))
}

#[cfg(not(any(windows, target_os = "macos")))]
fn contains(root: &Path, candidate: &Path) -> bool {
    candidate.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;

    fn setup() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("work");
        fs::create_dir(&root).unwrap();
        (dir, root)
    }

    #[test]
    fn test_root_itself_is_allowed() {
        let (_dir, root) = setup();
        assert!(PathGuard::new(&root).is_path_allowed(&root));
    }

    #[test]
    fn test_existing_descendant_is_allowed() {
        let (_dir, root) = setup();
        let app = root.join("app");
        fs::create_dir(&app).unwrap();
        assert!(PathGuard::new(&root).is_path_allowed(&app));
    }

    #[test]
    fn test_missing_descendant_is_allowed() {
        let (_dir, root) = setup();
        assert!(PathGuard::new(&root).is_path_allowed(&root.join("app").join("nested")));
    }

    #[test]
    fn test_prefix_sibling_is_rejected() {
        let (dir, root) = setup();
        let evil = dir.path().join("work-evil");
        fs::create_dir(&evil).unwrap();
        assert!(!PathGuard::new(&root).is_path_allowed(&evil));
        assert!(!PathGuard::new(&root).is_path_allowed(&dir.path().join("workshop")));
    }

    #[test]
    fn test_outside_path_is_rejected() {
        let (dir, root) = setup();
        assert!(!PathGuard::new(&root).is_path_allowed(dir.path()));
        assert!(!PathGuard::new(&root).is_path_allowed(Path::new("/etc/evil")));
    }

    #[test]
    fn test_dot_dot_escape_is_rejected() {
        let (_dir, root) = setup();
        fs::create_dir(root.join("app")).unwrap();
        let escape = root.join("app").join("..").join("..");
        assert!(!PathGuard::new(&root).is_path_allowed(&escape));
    }

    #[test]
    fn test_dot_dot_that_stays_inside_is_allowed() {
        let (_dir, root) = setup();
        fs::create_dir(root.join("app")).unwrap();
        let inside = root.join("app").join("..").join("lib");
        assert!(PathGuard::new(&root).is_path_allowed(&inside));
    }

    #[test]
    fn test_dot_dot_below_missing_directory_fails_closed() {
        let (_dir, root) = setup();
        let path = root.join("missing").join("..").join("..").join("etc");
        assert!(!PathGuard::new(&root).is_path_allowed(&path));
    }

    #[test]
    fn test_missing_root_fails_closed() {
        let (dir, _root) = setup();
        let guard = PathGuard::new(dir.path().join("nope"));
        assert!(!guard.is_path_allowed(&dir.path().join("nope").join("app")));
        assert!(!guard.is_path_allowed(&dir.path().join("nope")));
    }

    #[test]
    fn test_root_below_missing_directory_fails_closed() {
        let (dir, _root) = setup();
        let guard = PathGuard::new(dir.path().join("a").join("b"));
        assert!(!guard.is_path_allowed(&dir.path().join("a").join("b").join("c")));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escaping_root_is_rejected() {
        let (dir, root) = setup();
        let outside = dir.path().join("outside");
        fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        let guard = PathGuard::new(&root);
        assert!(!guard.is_path_allowed(&root.join("link")));
        assert!(!guard.is_path_allowed(&root.join("link").join("app")));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_within_root_is_allowed() {
        let (_dir, root) = setup();
        fs::create_dir(root.join("real")).unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("alias")).unwrap();
        assert!(PathGuard::new(&root).is_path_allowed(&root.join("alias")));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_root_is_resolved() {
        let (dir, root) = setup();
        let link = dir.path().join("root-link");
        std::os::unix::fs::symlink(&root, &link).unwrap();
        assert!(PathGuard::new(&link).is_path_allowed(&root.join("app")));
    }

    proptest! {
        #[test]
        fn prop_descendants_allowed(segments in prop::collection::vec("[a-z0-9_]{1,8}", 1..5)) {
            let (_dir, root) = setup();
            let mut path = root.clone();
            for segment in &segments {
                path.push(segment);
            }
            prop_assert!(PathGuard::new(&root).is_path_allowed(&path));
        }

        #[test]
        fn prop_prefix_siblings_rejected(suffix in "[a-z0-9_-]{1,8}") {
            let (dir, root) = setup();
            let sibling = dir.path().join(format!("work{}", suffix));
            prop_assert!(!PathGuard::new(&root).is_path_allowed(&sibling));
        }
    }
}
