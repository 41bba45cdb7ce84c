use std::ffi::OsString;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use super::base::{BackendRequest, ProcessRequest, Provider};
use super::configs::ClaudeCliProviderConfig;
use super::factory::ProviderType;
use super::utils::parse_json_frame;
use crate::errors::{GatewayError, GatewayResult};
use crate::models::event::CanonicalEvent;
use crate::models::message::{Conversation, Message};
use crate::models::role::Role;
use crate::prompt_template::{InstructionTemplate, DEFAULT_INSTRUCTION_TEMPLATE};

pub const CLAUDE_CLI_COMMAND: &str = "claude";

/// Variables the CLI sets for its own sessions. A child that inherits them
/// believes it runs nested inside another session.
pub const NESTED_SESSION_ENV_PREFIXES: &[&str] = &["CLAUDECODE", "CLAUDE_CODE_"];

pub const UNSUPPORTED_SYNC: &str = "synchronous mode is not supported by the claude-cli backend";

/// Model name reported when the CLI chooses its own default.
const DEFAULT_MODEL_LABEL: &str = "default";

#[derive(Serialize)]
struct TranscriptTurn<'a> {
    role: Role,
    label: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct InstructionContext<'a> {
    system: String,
    history: Vec<TranscriptTurn<'a>>,
    user_label: &'a str,
    assistant_label: &'a str,
}

/// Runs the Claude CLI in print mode as the model backend.
///
/// The CLI accepts a single prompt, so the last user turn becomes the prompt
/// and everything before it is rendered into the instruction block.
pub struct ClaudeCliProvider {
    config: ClaudeCliProviderConfig,
    template: InstructionTemplate,
}

impl ClaudeCliProvider {
    pub fn new(config: ClaudeCliProviderConfig) -> Result<Self> {
        let template = match &config.instruction_template {
            Some(custom) => InstructionTemplate::new(custom)
                .context("Failed to compile the configured instruction template")?,
            None => InstructionTemplate::new(DEFAULT_INSTRUCTION_TEMPLATE)
                .context("Failed to compile the built-in instruction template")?,
        };

        Ok(Self { config, template })
    }

    fn label_for(&self, role: Role) -> &str {
        match role {
            Role::Assistant => &self.config.assistant_label,
            Role::User | Role::System => &self.config.user_label,
        }
    }

    fn render_instructions(
        &self,
        system: Option<String>,
        history: &[&Message],
    ) -> GatewayResult<String> {
        let context = InstructionContext {
            system: system.unwrap_or_default(),
            history: history
                .iter()
                .map(|m| TranscriptTurn {
                    role: m.role,
                    label: self.label_for(m.role),
                    content: &m.content,
                })
                .collect(),
            user_label: &self.config.user_label,
            assistant_label: &self.config.assistant_label,
        };

        self.template.render(&context).map_err(|e| {
            tracing::error!("instruction template failed to render: {}", e);
            GatewayError::unavailable(format!("instruction template failed to render: {e}"))
        })
    }

    /// The child's environment: `vars` minus anything marking a nested session.
    ///
    /// Variables whose name or value is not valid UTF-8 are left out.
    pub fn child_environment<I>(vars: I, strip_prefixes: &[String]) -> Vec<(String, String)>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        vars.into_iter()
            .filter_map(|(name, value)| match (name.into_string(), value.into_string()) {
                (Ok(name), Ok(value)) => Some((name, value)),
                (name, _) => {
                    tracing::debug!("skipping non UTF-8 environment variable {:?}", name);
                    None
                }
            })
            .filter(|(name, _)| {
                !strip_prefixes
                    .iter()
                    .any(|prefix| name.starts_with(prefix.as_str()))
            })
            .collect()
    }
}

impl Provider for ClaudeCliProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::ClaudeCli
    }

    fn model(&self) -> &str {
        self.config.model.as_deref().unwrap_or(DEFAULT_MODEL_LABEL)
    }

    fn build_request(
        &self,
        conversation: &Conversation,
        stream: bool,
    ) -> GatewayResult<BackendRequest> {
        if !stream {
            return Err(GatewayError::UnsupportedMode(UNSUPPORTED_SYNC.to_string()));
        }

        let (prompt, history) = conversation.last_user_turn().ok_or_else(|| {
            GatewayError::invalid_request("messages must contain at least one user message")
        })?;
        let instructions = self.render_instructions(conversation.system_prompt(), &history)?;

        let mut args: Vec<String> = [
            "-p",
            "--output-format",
            "stream-json",
            "--verbose",
            "--include-partial-messages",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if let Some(model) = &self.config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        // An empty tool list turns the agent into a plain chat model.
        args.push("--tools".to_string());
        args.push(String::new());

        if !instructions.is_empty() {
            args.push("--system-prompt".to_string());
            args.push(instructions);
        }

        // The prompt goes last so text starting with '-' is never read as a flag.
        args.push("--".to_string());
        args.push(prompt.content.clone());

        Ok(BackendRequest::Process(ProcessRequest {
            program: self.config.command.clone(),
            args,
            env: Self::child_environment(std::env::vars_os(), &self.config.strip_env_prefixes),
        }))
    }

    fn parse_stream_frame(&self, line: &str) -> Option<CanonicalEvent> {
        let event = parse_json_frame(line.trim())?;

        match event.get("type").and_then(Value::as_str)? {
            "stream_event" => {
                let inner = event.get("event")?;
                match inner.get("type").and_then(Value::as_str)? {
                    "content_block_delta" => {
                        let delta = inner.get("delta")?;
                        match delta.get("type").and_then(Value::as_str) {
                            Some("text_delta") | Some("text") => delta
                                .get("text")
                                .and_then(Value::as_str)
                                .map(CanonicalEvent::delta),
                            _ => None,
                        }
                    }
                    "message_stop" => Some(CanonicalEvent::Done),
                    _ => None,
                }
            }
            "result" => {
                if event.get("is_error").and_then(Value::as_bool) == Some(true) {
                    let result = event.get("result").unwrap_or(&Value::Null);
                    tracing::warn!("claude cli finished with an error result: {}", result);
                }
                Some(CanonicalEvent::Done)
            }
            _ => None,
        }
    }

    fn parse_sync_response(&self, _body: &Value) -> GatewayResult<String> {
        Err(GatewayError::UnsupportedMode(UNSUPPORTED_SYNC.to_string()))
    }
}
