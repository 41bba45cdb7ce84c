use serde_json::{json, Value};

use super::base::{BackendRequest, HttpRequest, Provider};
use super::configs::AnthropicProviderConfig;
use super::factory::ProviderType;
use super::utils::{endpoint, parse_json_frame, sse_data};
use crate::errors::{GatewayError, GatewayResult};
use crate::models::event::CanonicalEvent;
use crate::models::message::Conversation;

pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com/v1";
pub const ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Self {
        Self { config }
    }

    /// The messages API takes the system prompt in its own field, so system
    /// turns are folded into it and left out of `messages`.
    fn messages_to_anthropic_spec(conversation: &Conversation) -> (Option<String>, Vec<Value>) {
        let messages = conversation
            .turns()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();

        (conversation.system_prompt(), messages)
    }
}

impl Provider for AnthropicProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn api_url(&self) -> Option<&str> {
        Some(&self.config.host)
    }

    fn build_request(
        &self,
        conversation: &Conversation,
        stream: bool,
    ) -> GatewayResult<BackendRequest> {
        let (system, messages) = Self::messages_to_anthropic_spec(conversation);

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages,
            "stream": stream,
            "max_tokens": self.config.max_tokens,
        });

        if let Some(object) = payload.as_object_mut() {
            if let Some(system) = system {
                object.insert("system".to_string(), json!(system));
            }
            if let Some(temperature) = self.config.temperature {
                object.insert("temperature".to_string(), json!(temperature));
            }
        }

        Ok(BackendRequest::Http(HttpRequest {
            url: endpoint(&self.config.host, "messages"),
            headers: vec![
                ("x-api-key", self.config.api_key.clone()),
                ("anthropic-version", self.config.version.clone()),
            ],
            body: payload,
        }))
    }

    fn parse_stream_frame(&self, line: &str) -> Option<CanonicalEvent> {
        // `event:` lines repeat the type found in the data payload and are skipped
        let event = parse_json_frame(sse_data(line)?)?;

        match event.get("type").and_then(Value::as_str)? {
            "content_block_delta" => event
                .pointer("/delta/text")
                .and_then(Value::as_str)
                .map(CanonicalEvent::delta),
            "message_stop" => Some(CanonicalEvent::Done),
            "error" => {
                tracing::warn!("anthropic stream reported an error: {}", event["error"]);
                None
            }
            _ => None,
        }
    }

    fn parse_sync_response(&self, body: &Value) -> GatewayResult<String> {
        let blocks = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                GatewayError::unavailable("Invalid response format from Anthropic API: no content")
            })?;

        Ok(blocks
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect())
    }
}
