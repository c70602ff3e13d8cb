//! System prompt construction
//!
//! The prompt is either the configured override or the built-in base prompt,
//! followed by any guidance file (AGENTS.md, AGENT.md) found in the working
//! directory.

use crate::config::ConfigError;
use crate::llm::SystemContent;
use std::fmt::Write;
use std::path::{Path, PathBuf};

/// Names of guidance files to look for, in order of preference
const GUIDANCE_FILE_NAMES: &[&str] = &["AGENTS.md", "AGENT.md"];

const BASE_PROMPT: &str = r"You are a research assistant working in a terminal alongside a human operator. You can read, list and edit files in the working directory, and you may have access to web search.

Be concise. When you use a tool, say briefly what you are doing and why. Prefer reading a file before editing it, and make edits with enough surrounding context that the text you replace is unique.";

/// A discovered guidance file
#[derive(Debug, Clone)]
pub struct GuidanceFile {
    pub path: PathBuf,
    pub content: String,
}

/// First guidance file present in `working_dir`, if any
pub fn discover_guidance_file(working_dir: &Path) -> Option<GuidanceFile> {
    GUIDANCE_FILE_NAMES.iter().find_map(|name| {
        let path = working_dir.join(name);
        if !path.is_file() {
            return None;
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(GuidanceFile { path, content }),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read guidance file");
                None
            }
        }
    })
}

/// Build the system prompt for a session.
pub fn build_system_prompt(
    working_dir: &Path,
    override_prompt: Option<&str>,
) -> Result<String, ConfigError> {
    let mut prompt = override_prompt.unwrap_or(BASE_PROMPT).trim().to_string();

    if let Some(file) = discover_guidance_file(working_dir) {
        if !file.content.trim().is_empty() {
            if !prompt.is_empty() {
                prompt.push_str("\n\n");
            }
            prompt.push_str("<project_guidance>\n");
            let _ = writeln!(prompt, "<!-- From: {} -->", file.path.display());
            prompt.push_str(&file.content);
            if !file.content.ends_with('\n') {
                prompt.push('\n');
            }
            prompt.push_str("</project_guidance>");
        }
    }

    if prompt.trim().is_empty() {
        return Err(ConfigError::EmptySystemPrompt);
    }
    Ok(prompt)
}

/// The system blocks sent with every request. The prompt is stable for the
/// whole session, so it is marked cacheable.
pub fn system_blocks(prompt: &str) -> Vec<SystemContent> {
    vec![SystemContent::cached(prompt)]
}
