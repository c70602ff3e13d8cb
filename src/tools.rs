//! Tool registry and local tool implementations
//!
//! The registry is built once per session and never mutated. It holds two
//! kinds of entries: local tools, which the dispatcher runs, and server
//! capabilities, which are only advertised to the endpoint.

mod edit_file;
mod list_files;
mod read_file;

pub use edit_file::EditFileTool;
pub use list_files::ListFilesTool;
pub use read_file::ReadFileTool;

use crate::config::ConfigError;
use crate::llm::ToolDefinition;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result from tool execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }
}

/// Trait for tools that can be executed by the agent
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name
    fn name(&self) -> &str;

    /// Tool description for LLM
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Execute the tool. Failures are reported through `ToolOutput::error`.
    async fn run(&self, input: Value) -> ToolOutput;
}

/// A capability the endpoint executes on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTool {
    pub name: String,
    pub tool_type: String,
    pub max_uses: Option<u32>,
}

impl ServerTool {
    /// Hosted web search
    pub fn web_search() -> Self {
        Self {
            name: "web_search".to_string(),
            tool_type: "web_search_20250305".to_string(),
            max_uses: Some(5),
        }
    }
}

/// A registry entry
#[derive(Clone)]
pub enum RegisteredTool {
    Local(Arc<dyn Tool>),
    Server(ServerTool),
}

impl RegisteredTool {
    pub fn name(&self) -> &str {
        match self {
            RegisteredTool::Local(tool) => tool.name(),
            RegisteredTool::Server(tool) => &tool.name,
        }
    }
}

/// Collection of tools available to a session
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    /// Build a registry. Names must be unique across both kinds.
    pub fn new(local: Vec<Arc<dyn Tool>>, server: Vec<ServerTool>) -> Result<Self, ConfigError> {
        let tools: Vec<RegisteredTool> = local
            .into_iter()
            .map(RegisteredTool::Local)
            .chain(server.into_iter().map(RegisteredTool::Server))
            .collect();

        let mut seen = HashSet::new();
        for tool in &tools {
            if !seen.insert(tool.name().to_string()) {
                return Err(ConfigError::DuplicateTool(tool.name().to_string()));
            }
        }

        Ok(Self { tools })
    }

    /// The file tools rooted at `working_dir`, plus web search if enabled
    pub fn standard(working_dir: &Path, web_search: bool) -> Result<Self, ConfigError> {
        let local: Vec<Arc<dyn Tool>> = vec![
            Arc::new(ReadFileTool::new(working_dir.to_path_buf())),
            Arc::new(ListFilesTool::new(working_dir.to_path_buf())),
            Arc::new(EditFileTool::new(working_dir.to_path_buf())),
        ];
        let server = if web_search {
            vec![ServerTool::web_search()]
        } else {
            Vec::new()
        };
        Self::new(local, server)
    }

    /// Get all tool definitions for LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|entry| match entry {
                RegisteredTool::Local(t) => ToolDefinition::Function {
                    name: t.name().to_string(),
                    description: t.description(),
                    input_schema: t.input_schema(),
                },
                RegisteredTool::Server(t) => ToolDefinition::Server {
                    name: t.name.clone(),
                    tool_type: t.tool_type.clone(),
                    max_uses: t.max_uses,
                },
            })
            .collect()
    }

    /// Find a tool by exact name; first match wins
    pub fn lookup(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

}

/// Resolve a tool-supplied path against the working directory
fn resolve_path(working_dir: &Path, path: &str) -> PathBuf {
    let p = PathBuf::from(path);
    if p.is_absolute() {
        p
    } else {
        working_dir.join(p)
    }
}

/// Deserialize tool input, turning failures into a tool error
fn parse_input<T: DeserializeOwned>(input: Value) -> Result<T, ToolOutput> {
    serde_json::from_value(input).map_err(|e| ToolOutput::error(format!("Invalid input: {e}")))
}
