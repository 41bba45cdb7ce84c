use serde_json::{json, Value};

use super::base::{BackendRequest, HttpRequest, Provider};
use super::configs::OpenAiProviderConfig;
use super::factory::ProviderType;
use super::utils::{endpoint, parse_json_frame, sse_data};
use crate::errors::{GatewayError, GatewayResult};
use crate::models::event::CanonicalEvent;
use crate::models::message::Conversation;

pub const OPENAI_HOST: &str = "https://api.openai.com/v1";
pub const OPENAI_MODEL: &str = "gpt-4o";

const DONE_SENTINEL: &str = "[DONE]";

pub struct OpenAiProvider {
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Self {
        Self { config }
    }
}

impl Provider for OpenAiProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAi
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
        // The chat completions API takes system messages inline, so the list is passed as is.
        let messages: Vec<Value> = conversation
            .messages()
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();

        let body = json!({
            "model": self.config.model,
            "messages": messages,
            "stream": stream,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        Ok(BackendRequest::Http(HttpRequest {
            url: endpoint(&self.config.host, "chat/completions"),
            headers: vec![(
                "Authorization",
                format!("Bearer {}", self.config.api_key),
            )],
            body,
        }))
    }

    fn parse_stream_frame(&self, line: &str) -> Option<CanonicalEvent> {
        let data = sse_data(line)?;
        if data == DONE_SENTINEL {
            return Some(CanonicalEvent::Done);
        }

        let chunk = parse_json_frame(data)?;
        if let Some(error) = chunk.get("error") {
            tracing::warn!("openai stream reported an error: {}", error);
            return None;
        }

        chunk
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            .map(CanonicalEvent::delta)
    }

    fn parse_sync_response(&self, body: &Value) -> GatewayResult<String> {
        let choice = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .ok_or_else(|| {
                GatewayError::unavailable("Invalid response format from OpenAI API: no choices")
            })?;

        // A null content (e.g. a refusal or a tool call) is reported as empty text.
        Ok(choice
            .pointer("/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}
