//! Tool Request/Result Types
//!
//! The request and result shapes exchanged with whatever transport hosts the
//! dispatcher, plus the two tags that select behaviour inside it: the
//! [`Operation`] being requested and the [`ManagerKind`] that performs it.
//!
//! # Example
//!
//! ```json
//! {
//!   "name": "install",
//!   "arguments": {"package": "typescript", "manager": "npm", "path": "/work/app"}
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// A named tool invocation with its argument bag
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolRequest {
    /// Tool name ("install", "uninstall", "init", "create_venv", "add")
    pub name: String,

    /// Tool arguments, keyed by argument name
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolRequest {
    /// Create a new tool request
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Build a request from a JSON object value
    ///
    /// Non-object values produce an empty argument bag, which the
    /// dispatcher then rejects through its required-key checks.
    pub fn from_value(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(name, arguments)
    }
}

/// Terminal outcome of a tool invocation
///
/// Rendered to callers as a single text item; `success` is carried alongside
/// for transports that can express it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolResult {
    /// Human-readable message
    #[serde(rename = "text")]
    pub message: String,

    /// Whether the operation succeeded
    pub success: bool,
}

impl ToolResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: true,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: false,
        }
    }
}

/// Logical package-management operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Install,
    Uninstall,
    Init,
    Add,
    CreateVenv,
}

impl Operation {
    /// Every operation, in the order tools are listed
    pub const ALL: [Operation; 5] = [
        Operation::Install,
        Operation::Uninstall,
        Operation::Init,
        Operation::CreateVenv,
        Operation::Add,
    ];

    /// Tool name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Install => "install",
            Operation::Uninstall => "uninstall",
            Operation::Init => "init",
            Operation::Add => "add",
            Operation::CreateVenv => "create_venv",
        }
    }

    /// One-line description for tool listings
    pub fn description(&self) -> &'static str {
        match self {
            Operation::Install => {
                "Install an npm or Python package. For Python, use '-r requirements.txt' to install from file."
            }
            Operation::Uninstall => "Uninstall an npm or Python package",
            Operation::Init => "Initialize package.json or pyproject.toml",
            Operation::CreateVenv => "Create a Python virtual environment",
            Operation::Add => "Add Python packages with a raw argument list",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "install" => Ok(Operation::Install),
            "uninstall" => Ok(Operation::Uninstall),
            "init" => Ok(Operation::Init),
            "add" => Ok(Operation::Add),
            "create_venv" => Ok(Operation::CreateVenv),
            other => Err(format!("Unknown tool: {}", other)),
        }
    }
}

/// Which package-manager family handles an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerKind {
    Node,
    Python,
}

impl fmt::Display for ManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerKind::Node => f.write_str("node"),
            ManagerKind::Python => f.write_str("python"),
        }
    }
}

impl FromStr for ManagerKind {
    type Err = String;

    /// Accepts the manager names callers use ("npm", "uv", "pip") as well as
    /// the family names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "npm" | "node" => Ok(ManagerKind::Node),
            "uv" | "pip" | "python" => Ok(ManagerKind::Python),
            other => Err(format!(
                "Unsupported package manager '{}'. Must be one of: npm, uv, pip",
                other
            )),
        }
    }
}
