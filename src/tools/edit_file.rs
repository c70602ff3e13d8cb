//! Edit file tool
//!
//! Exact text replacement. `old_str` must match exactly once.

use super::{parse_input, resolve_path, Tool, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const INVALID_PARAMETERS: &str = "invalid input parameters";

/// Replaces text in a file, or creates a new one
pub struct EditFileTool {
    working_dir: PathBuf,
}

impl EditFileTool {
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EditFileInput {
    path: String,
    old_str: String,
    new_str: String,
}

/// Outcome of applying one replacement to file contents
#[derive(Debug, PartialEq, Eq)]
enum Replacement {
    Applied(String),
    NotFound,
    Ambiguous(usize),
}

/// Start positions of `needle`, overlapping ones included
fn occurrences(content: &str, needle: &str) -> usize {
    content
        .char_indices()
        .filter(|&(i, _)| content.get(i..).is_some_and(|rest| rest.starts_with(needle)))
        .count()
}

fn replace_unique(content: &str, old: &str, new: &str) -> Replacement {
    match occurrences(content, old) {
        0 => Replacement::NotFound,
        1 => Replacement::Applied(content.replacen(old, new, 1)),
        n => Replacement::Ambiguous(n),
    }
}

async fn create_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, content).await
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &'static str {
        "edit_file"
    }

    fn description(&self) -> String {
        "Make edits to a text file.

Replaces 'old_str' with 'new_str' in the given file. 'old_str' and 'new_str' MUST be different from each other.

'old_str' must appear exactly once in the file; include enough surrounding context to make it unique.

If the file specified with path doesn't exist and 'old_str' is empty, it will be created with 'new_str' as its content."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path", "old_str", "new_str"],
            "additionalProperties": false,
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The path to the file"
                },
                "old_str": {
                    "type": "string",
                    "description": "Text to search for - must match exactly and must only have one match exactly"
                },
                "new_str": {
                    "type": "string",
                    "description": "Text to replace old_str with"
                }
            }
        })
    }

    async fn run(&self, input: Value) -> ToolOutput {
        let input: EditFileInput = match parse_input(input) {
            Ok(i) => i,
            Err(e) => return e,
        };

        if input.path.is_empty() || input.old_str == input.new_str {
            return ToolOutput::error(INVALID_PARAMETERS);
        }

        let path = resolve_path(&self.working_dir, &input.path);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if !input.old_str.is_empty() {
                    return ToolOutput::error(format!("file not found: {}", input.path));
                }
                return match create_file(&path, &input.new_str).await {
                    Ok(()) => {
                        tracing::info!(path = %input.path, "Created file");
                        ToolOutput::success(format!("Successfully created file {}", input.path))
                    }
                    Err(e) => ToolOutput::error(format!("failed to create file: {e}")),
                };
            }
            Err(e) => return ToolOutput::error(format!("failed to read {}: {e}", input.path)),
        };

        if input.old_str.is_empty() {
            return ToolOutput::error(format!(
                "file already exists: {}; old_str must not be empty",
                input.path
            ));
        }

        let updated = match replace_unique(&content, &input.old_str, &input.new_str) {
            Replacement::Applied(updated) => updated,
            Replacement::NotFound => return ToolOutput::error("old_str not found in file"),
            Replacement::Ambiguous(n) => {
                return ToolOutput::error(format!(
                    "old_str matches {n} times in file; it must match exactly once"
                ))
            }
        };

        match tokio::fs::write(&path, updated).await {
            Ok(()) => {
                tracing::debug!(path = %input.path, "Edited file");
                ToolOutput::success("OK")
            }
            Err(e) => ToolOutput::error(format!("failed to write {}: {e}", input.path)),
        }
    }
}
