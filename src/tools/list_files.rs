//! List files tool

use super::{parse_input, resolve_path, Tool, ToolOutput};
use async_trait::async_trait;
use ignore::WalkBuilder;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// Recursively lists a directory
pub struct ListFilesTool {
    working_dir: PathBuf,
}

impl ListFilesTool {
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListFilesInput {
    #[serde(default)]
    path: Option<String>,
}

/// Walk `root` depth-first in file-name order. Entries are relative to
/// `root`, directories end in `/`, and `root` itself is left out.
fn list_entries(root: &Path) -> Result<Vec<String>, ignore::Error> {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 {
            if !entry.file_type().is_some_and(|t| t.is_dir()) {
                return Err(ignore::Error::Io(std::io::Error::other(format!(
                    "{} is not a directory",
                    root.display()
                ))));
            }
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let mut name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if entry.file_type().is_some_and(|t| t.is_dir()) {
            name.push('/');
        }
        entries.push(name);
    }
    Ok(entries)
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &'static str {
        "list_files"
    }

    fn description(&self) -> String {
        "List files and directories at a given path. If no path is provided, lists files in the current directory.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Optional relative path to list files from. Defaults to current directory if not provided."
                }
            }
        })
    }

    async fn run(&self, input: Value) -> ToolOutput {
        let input: ListFilesInput = match parse_input(input) {
            Ok(i) => i,
            Err(e) => return e,
        };

        let root = match input.path.as_deref() {
            Some(path) if !path.is_empty() => resolve_path(&self.working_dir, path),
            _ => self.working_dir.clone(),
        };

        let walked = tokio::task::spawn_blocking(move || list_entries(&root)).await;
        let entries = match walked {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => return ToolOutput::error(format!("Failed to list files: {e}")),
            Err(e) => return ToolOutput::error(format!("Listing task failed: {e}")),
        };

        match serde_json::to_string(&entries) {
            Ok(json) => ToolOutput::success(json),
            Err(e) => ToolOutput::error(format!("Failed to encode listing: {e}")),
        }
    }
}
