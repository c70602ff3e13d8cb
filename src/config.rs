//! Runtime configuration from environment variables

use crate::events::DEFAULT_CAPACITY;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Errors raised while assembling a session
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),
    #[error("ANTHROPIC_API_KEY is not set")]
    MissingApiKey,
    #[error("system prompt is empty")]
    EmptySystemPrompt,
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

/// Everything the binary needs to start a session
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub working_dir: PathBuf,
    pub web_search: bool,
    pub system_prompt: Option<String>,
    pub event_buffer: usize,
    pub log_json: bool,
}

impl AgentConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("ANTHROPIC_API_KEY").ok_or(ConfigError::MissingApiKey)?;

        let max_tokens = match get("AGENT_MAX_TOKENS") {
            Some(v) => parse_positive("AGENT_MAX_TOKENS", &v)?,
            None => DEFAULT_MAX_TOKENS,
        };

        let event_buffer = match get("AGENT_EVENT_BUFFER") {
            Some(v) => parse_positive::<usize>("AGENT_EVENT_BUFFER", &v)?,
            None => DEFAULT_CAPACITY,
        };

        let working_dir = match get("AGENT_WORKING_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };

        Ok(Self {
            api_key,
            base_url: get("ANTHROPIC_BASE_URL"),
            model: get("AGENT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens,
            working_dir,
            web_search: parse_flag("AGENT_WEB_SEARCH", get("AGENT_WEB_SEARCH"))?,
            system_prompt: get("AGENT_SYSTEM_PROMPT"),
            event_buffer,
            log_json: parse_flag("AGENT_LOG_JSON", get("AGENT_LOG_JSON"))?,
        })
    }
}

fn parse_positive<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match value.trim().parse::<T>() {
        Ok(n) if n > T::default() => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        }),
    }
}

fn parse_flag(var: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(false);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { var, value }),
    }
}
