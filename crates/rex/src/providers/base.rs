use std::fmt;

use serde_json::Value;

use super::factory::ProviderType;
use crate::errors::GatewayResult;
use crate::models::event::CanonicalEvent;
use crate::models::message::Conversation;

/// Everything needed to issue one upstream HTTP call.
#[derive(Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
}

// Header values carry credentials, so only their names are printed.
impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.headers.iter().map(|(name, _)| *name).collect();
        f.debug_struct("HttpRequest")
            .field("url", &self.url)
            .field("headers", &names)
            .field("body", &self.body)
            .finish()
    }
}

/// Everything needed to launch the backend as a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    /// The complete environment of the child; nothing else is inherited.
    pub env: Vec<(String, String)>,
}

/// Backend specific representation of one request, built fresh per call.
#[derive(Debug, Clone)]
pub enum BackendRequest {
    Http(HttpRequest),
    Process(ProcessRequest),
}

/// Per-backend transcoding and frame parsing.
///
/// Implementations only translate between formats; opening connections and
/// spawning processes is left to the gateway and the process supervisor.
pub trait Provider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Model identifier reported to clients.
    fn model(&self) -> &str;

    /// Upstream base URL, for backends reached over HTTP.
    fn api_url(&self) -> Option<&str> {
        None
    }

    /// Translate the conversation into the backend's request format.
    fn build_request(
        &self,
        conversation: &Conversation,
        stream: bool,
    ) -> GatewayResult<BackendRequest>;

    /// Parse one complete line of streamed output.
    ///
    /// Returns `None` for anything without client visible content: blank and
    /// comment lines, heartbeats, unrelated event types and malformed JSON.
    fn parse_stream_frame(&self, line: &str) -> Option<CanonicalEvent>;

    /// Extract the assistant text from a complete non-streaming response.
    fn parse_sync_response(&self, body: &Value) -> GatewayResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_http_request_debug_hides_header_values() {
        let request = HttpRequest {
            url: "https://api.example.com/v1/chat/completions".to_string(),
            headers: vec![("Authorization", "Bearer sk-secret".to_string())],
            body: json!({"model": "gpt-4o"}),
        };

        let printed = format!("{:?}", request);
        assert!(printed.contains("Authorization"));
        assert!(!printed.contains("sk-secret"));
    }
}
