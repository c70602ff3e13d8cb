//! Read file tool

use super::{parse_input, resolve_path, Tool, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;

/// Returns the contents of a file
pub struct ReadFileTool {
    working_dir: PathBuf,
}

impl ReadFileTool {
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadFileInput {
    path: String,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> String {
        "Read the contents of a given relative file path. Use this when you want to see what's inside a file. Do not use this with directory names.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path"],
            "additionalProperties": false,
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The relative path of a file in the working directory"
                }
            }
        })
    }

    async fn run(&self, input: Value) -> ToolOutput {
        let input: ReadFileInput = match parse_input(input) {
            Ok(i) => i,
            Err(e) => return e,
        };

        let path = resolve_path(&self.working_dir, &input.path);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => ToolOutput::success(content),
            Err(e) => ToolOutput::error(format!("Failed to read {}: {e}", input.path)),
        }
    }
}
