use std::time::Duration;

use super::anthropic::{ANTHROPIC_HOST, ANTHROPIC_MODEL, ANTHROPIC_VERSION};
use super::claude_cli::{CLAUDE_CLI_COMMAND, NESTED_SESSION_ENV_PREFIXES};
use super::openai::{OPENAI_HOST, OPENAI_MODEL};

pub const DEFAULT_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    OpenAi(OpenAiProviderConfig),
    Anthropic(AnthropicProviderConfig),
    ClaudeCli(ClaudeCliProviderConfig),
}

impl ProviderConfig {
    /// Credential of HTTP backends; `None` for backends that take none.
    pub fn api_key(&self) -> Option<&str> {
        match self {
            ProviderConfig::OpenAi(config) => Some(&config.api_key),
            ProviderConfig::Anthropic(config) => Some(&config.api_key),
            ProviderConfig::ClaudeCli(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    /// Base URL including the version segment, e.g. `https://api.openai.com/v1`
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for OpenAiProviderConfig {
    fn default() -> Self {
        Self {
            host: OPENAI_HOST.to_string(),
            api_key: String::new(),
            model: OPENAI_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: u32,
    pub version: String,
}

impl Default for AnthropicProviderConfig {
    fn default() -> Self {
        Self {
            host: ANTHROPIC_HOST.to_string(),
            api_key: String::new(),
            model: ANTHROPIC_MODEL.to_string(),
            temperature: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            version: ANTHROPIC_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClaudeCliProviderConfig {
    /// Executable name or path
    pub command: String,
    /// Passed as `--model` when set, otherwise the CLI picks its default
    pub model: Option<String>,
    /// Label prefixed to user turns in the rendered transcript
    pub user_label: String,
    /// Label prefixed to assistant turns in the rendered transcript
    pub assistant_label: String,
    /// Tera template replacing the built-in instruction block
    pub instruction_template: Option<String>,
    /// Environment variables starting with any of these are not passed to the child
    pub strip_env_prefixes: Vec<String>,
}

impl Default for ClaudeCliProviderConfig {
    fn default() -> Self {
        Self {
            command: CLAUDE_CLI_COMMAND.to_string(),
            model: None,
            user_label: "Benutzer".to_string(),
            assistant_label: "Assistent".to_string(),
            instruction_template: None,
            strip_env_prefixes: NESTED_SESSION_ENV_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

/// Bounds on how long a backend may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Establishing the upstream TCP/TLS connection
    pub connect: Duration,
    /// Whole non-streaming request, body included
    pub request: Duration,
    /// Maximum silence between two reads of a streaming body or child stdout
    pub idle: Duration,
    /// How long a child may keep running after it reported completion
    pub exit_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(600),
            idle: Duration::from_secs(300),
            exit_grace: Duration::from_secs(2),
        }
    }
}
