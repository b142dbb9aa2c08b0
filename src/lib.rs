//! pmguard Library
//!
//! Guarded package-management operations: every install, uninstall, init,
//! add and virtual-environment request is checked against a project-root
//! sandbox and a package allow-list before an npm, uv or pip process is
//! spawned, and every spawned process is bounded by a timeout.
//!
//! The entry point is [`ToolDispatcher`], which turns a [`ToolRequest`] into
//! a [`ToolResult`] and never fails.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod exec;
pub mod guard;
pub mod logging;
pub mod manager;
pub mod protocol;

pub use config::{Config, PolicyConfig};
pub use dispatcher::ToolDispatcher;
pub use error::ToolError;
pub use protocol::{ManagerKind, Operation, ToolRequest, ToolResult};
