use anyhow::Result;
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use super::{
    anthropic::AnthropicProvider,
    base::{BackendRequest, Provider},
    claude_cli::ClaudeCliProvider,
    configs::ProviderConfig,
    openai::OpenAiProvider,
};
use crate::errors::GatewayResult;
use crate::models::event::CanonicalEvent;
use crate::models::message::Conversation;

#[derive(EnumIter, EnumString, AsRefStr, Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    #[strum(serialize = "openai")]
    OpenAi,
    #[strum(serialize = "anthropic")]
    Anthropic,
    #[strum(serialize = "claude-cli")]
    ClaudeCli,
}

/// The backend chosen for the lifetime of a gateway.
///
/// Selected once from configuration; requests dispatch on the variant and
/// never look at configuration strings again.
pub enum ProviderAdapter {
    OpenAi(OpenAiProvider),
    Anthropic(AnthropicProvider),
    ClaudeCli(ClaudeCliProvider),
}

impl ProviderAdapter {
    fn inner(&self) -> &dyn Provider {
        match self {
            ProviderAdapter::OpenAi(provider) => provider,
            ProviderAdapter::Anthropic(provider) => provider,
            ProviderAdapter::ClaudeCli(provider) => provider,
        }
    }

    /// Whether the backend can answer without streaming.
    pub fn supports_sync(&self) -> bool {
        !matches!(self, ProviderAdapter::ClaudeCli(_))
    }
}

impl Provider for ProviderAdapter {
    fn provider_type(&self) -> ProviderType {
        self.inner().provider_type()
    }

    fn model(&self) -> &str {
        self.inner().model()
    }

    fn api_url(&self) -> Option<&str> {
        self.inner().api_url()
    }

    fn build_request(
        &self,
        conversation: &Conversation,
        stream: bool,
    ) -> GatewayResult<BackendRequest> {
        self.inner().build_request(conversation, stream)
    }

    fn parse_stream_frame(&self, line: &str) -> Option<CanonicalEvent> {
        self.inner().parse_stream_frame(line)
    }

    fn parse_sync_response(&self, body: &Value) -> GatewayResult<String> {
        self.inner().parse_sync_response(body)
    }
}

pub fn get_provider(config: ProviderConfig) -> Result<ProviderAdapter> {
    match config {
        ProviderConfig::OpenAi(openai_config) => {
            Ok(ProviderAdapter::OpenAi(OpenAiProvider::new(openai_config)))
        }
        ProviderConfig::Anthropic(anthropic_config) => Ok(ProviderAdapter::Anthropic(
            AnthropicProvider::new(anthropic_config),
        )),
        ProviderConfig::ClaudeCli(cli_config) => Ok(ProviderAdapter::ClaudeCli(
            ClaudeCliProvider::new(cli_config)?,
        )),
    }
}
