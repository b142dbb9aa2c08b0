//! Policy Guards
//!
//! Checks that must pass before any package-manager process is spawned.
//!
//! - [`PathGuard`]: the target directory must lie inside the project root
//! - [`PackageGuard`]: the package (or every entry of a requirements file)
//!   must match the allow-list
//!
//! Both guards are evaluated per request and never cache results; the
//! filesystem state they inspect can change between calls.

mod package;
mod path;

pub use package::{bare_name, PackageGuard, REQUIREMENTS_FILE, REQUIREMENTS_SENTINEL, WILDCARD};
pub use path::PathGuard;
