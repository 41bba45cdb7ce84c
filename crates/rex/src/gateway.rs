use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{GatewayError, GatewayResult};
use crate::models::message::{Conversation, Message};
use crate::normalizer::{http_event_stream, EventStream};
use crate::process::{process_event_stream, ProcessSupervisor};
use crate::providers::base::{BackendRequest, Provider};
use crate::providers::configs::{ProviderConfig, Timeouts};
use crate::providers::factory::{get_provider, ProviderAdapter};
use crate::providers::utils::send;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub provider: String,
    pub model: String,
    #[serde(rename = "apiUrl", skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigReport {
    pub provider: String,
    pub model: String,
}

/// Dispatches chat requests to the configured backend.
///
/// Built once at startup and shared immutably between requests. Each call owns
/// its own stream state, so nothing here needs a lock.
pub struct Gateway {
    adapter: Arc<ProviderAdapter>,
    client: Client,
    timeouts: Timeouts,
}

impl Gateway {
    pub fn new(config: ProviderConfig, timeouts: Timeouts) -> Result<Self> {
        if config.api_key().is_some_and(str::is_empty) {
            warn!("no API key configured, upstream calls will most likely be rejected");
        }

        let adapter = get_provider(config)?;
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .context("Failed to build the upstream HTTP client")?;

        info!(
            "gateway ready: provider={} model={}",
            adapter.provider_type(),
            adapter.model()
        );

        Ok(Self {
            adapter: Arc::new(adapter),
            client,
            timeouts,
        })
    }

    /// Open a streaming session.
    ///
    /// Errors are only returned before anything was streamed; once the
    /// returned stream exists every failure ends it with `Done`. Cancelling
    /// `cancel` tears the session down: the upstream body is dropped or the
    /// child is killed.
    pub async fn handle_stream(
        &self,
        messages: Vec<Message>,
        cancel: CancellationToken,
    ) -> GatewayResult<EventStream> {
        let conversation = Conversation::new(messages)?;
        let request = self.adapter.build_request(&conversation, true)?;

        match request {
            BackendRequest::Http(request) => {
                debug!("streaming from {}", request.url);
                let response = tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(GatewayError::StreamInterrupted(
                            "client went away before the upstream answered".to_string(),
                        ));
                    }
                    response = timeout(self.timeouts.idle, send(&self.client, &request, None)) => {
                        response.map_err(|_| {
                            warn!("no response headers from {} within {:?}", request.url, self.timeouts.idle);
                            GatewayError::unavailable(format!(
                                "upstream did not answer within {:?}",
                                self.timeouts.idle
                            ))
                        })??
                    }
                };
                Ok(http_event_stream(
                    response,
                    Arc::clone(&self.adapter),
                    self.timeouts.idle,
                    cancel,
                ))
            }
            BackendRequest::Process(request) => {
                let (supervisor, stdout) = ProcessSupervisor::spawn(&request)?;
                Ok(process_event_stream(
                    supervisor,
                    stdout,
                    Arc::clone(&self.adapter),
                    self.timeouts,
                    cancel,
                ))
            }
        }
    }

    /// Run one non-streaming completion and return the assembled text.
    pub async fn handle_sync(&self, messages: Vec<Message>) -> GatewayResult<String> {
        let conversation = Conversation::new(messages)?;
        if !self.adapter.supports_sync() {
            return Err(unsupported_sync(&self.adapter));
        }

        match self.adapter.build_request(&conversation, false)? {
            BackendRequest::Http(request) => {
                debug!("sync request to {}", request.url);
                let response = send(&self.client, &request, Some(self.timeouts.request)).await?;
                let body = response.json().await.map_err(|e| {
                    warn!("unreadable upstream response from {}: {}", request.url, e);
                    GatewayError::from(e)
                })?;
                self.adapter.parse_sync_response(&body)
            }
            BackendRequest::Process(_) => Err(unsupported_sync(&self.adapter)),
        }
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            provider: self.adapter.provider_type().to_string(),
            model: self.adapter.model().to_string(),
            api_url: self.adapter.api_url().map(str::to_string),
        }
    }

    pub fn config(&self) -> ConfigReport {
        ConfigReport {
            provider: self.adapter.provider_type().to_string(),
            model: self.adapter.model().to_string(),
        }
    }
}

fn unsupported_sync(adapter: &ProviderAdapter) -> GatewayError {
    GatewayError::UnsupportedMode(format!(
        "synchronous mode is not supported by the {} backend",
        adapter.provider_type()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::CanonicalEvent;
    use crate::providers::configs::{
        AnthropicProviderConfig, ClaudeCliProviderConfig, OpenAiProviderConfig,
    };
    use futures::StreamExt;
    use serde_json::json;
    use std::os::unix::fs::PermissionsExt;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn openai_gateway(host: &str) -> Gateway {
        let config = ProviderConfig::OpenAi(OpenAiProviderConfig {
            host: host.to_string(),
            api_key: "sk-test".to_string(),
            ..Default::default()
        });
        Gateway::new(config, Timeouts::default()).unwrap()
    }

    fn anthropic_gateway(host: &str) -> Gateway {
        let config = ProviderConfig::Anthropic(AnthropicProviderConfig {
            host: host.to_string(),
            api_key: "sk-ant-test".to_string(),
            ..Default::default()
        });
        Gateway::new(config, Timeouts::default()).unwrap()
    }

    fn sse(frames: &[&str]) -> ResponseTemplate {
        let body: String = frames.iter().map(|f| format!("{f}\n\n")).collect();
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(body)
    }

    async fn collect(stream: EventStream) -> Vec<CanonicalEvent> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_openai_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"stream": true, "model": "gpt-4o"})))
            .respond_with(sse(&[
                r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
                r#"data: {"choices":[{"delta":{"content":"Guten "}}]}"#,
                ": keep-alive",
                r#"data: {"choices":[{"delta":{"content":"Tag"}}]}"#,
                "data: [DONE]",
                "data: [DONE]",
            ]))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = openai_gateway(&server.uri());
        let stream = gateway
            .handle_stream(vec![Message::user("Hallo")], CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            collect(stream).await,
            vec![
                CanonicalEvent::delta("Guten "),
                CanonicalEvent::delta("Tag"),
                CanonicalEvent::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_anthropic_stream_without_stop_gets_done() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", "2023-06-01"))
            .and(body_partial_json(json!({
                "system": "Sei knapp.",
                "messages": [{"role": "user", "content": "Hallo"}]
            })))
            .respond_with(sse(&[
                "event: message_start\ndata: {\"type\":\"message_start\"}",
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}",
            ]))
            .mount(&server)
            .await;

        let gateway = anthropic_gateway(&server.uri());
        let stream = gateway
            .handle_stream(
                vec![Message::system("Sei knapp."), Message::user("Hallo")],
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            collect(stream).await,
            vec![CanonicalEvent::delta("Hi"), CanonicalEvent::Done]
        );
    }

    #[tokio::test]
    async fn test_upstream_rejection_before_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\":\"bad key\"}"))
            .mount(&server)
            .await;

        let gateway = openai_gateway(&server.uri());
        let err = gateway
            .handle_stream(vec![Message::user("Hallo")], CancellationToken::new())
            .await
            .err()
            .unwrap();

        assert_eq!(
            err,
            GatewayError::UpstreamRejected {
                status: 401,
                body: "{\"error\":\"bad key\"}".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_empty_conversation_is_rejected_without_upstream_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let gateway = openai_gateway(&server.uri());
        let err = gateway
            .handle_stream(vec![], CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::InvalidRequest(ref m) if m.contains("messages")));

        let err = gateway.handle_sync(vec![]).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_sync_openai_and_anthropic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Antwort"}}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "text", "text": "Teil 1, "},
                    {"type": "text", "text": "Teil 2"}
                ]
            })))
            .mount(&server)
            .await;

        let openai = openai_gateway(&server.uri());
        assert_eq!(
            openai.handle_sync(vec![Message::user("Frage")]).await.unwrap(),
            "Antwort"
        );

        let anthropic = anthropic_gateway(&server.uri());
        assert_eq!(
            anthropic
                .handle_sync(vec![Message::user("Frage")])
                .await
                .unwrap(),
            "Teil 1, Teil 2"
        );
    }

    #[tokio::test]
    async fn test_silent_upstream_times_out_before_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse(&["data: [DONE]"]).set_delay(std::time::Duration::from_secs(3)))
            .mount(&server)
            .await;

        let config = ProviderConfig::OpenAi(OpenAiProviderConfig {
            host: server.uri(),
            ..Default::default()
        });
        let timeouts = Timeouts {
            idle: std::time::Duration::from_millis(200),
            ..Timeouts::default()
        };
        let gateway = Gateway::new(config, timeouts).unwrap();

        let started = std::time::Instant::now();
        let err = gateway
            .handle_stream(vec![Message::user("Hallo")], CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::UpstreamUnavailable(_)));
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_unavailable() {
        let gateway = openai_gateway("http://127.0.0.1:9");
        let err = gateway
            .handle_sync(vec![Message::user("Hallo")])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cli_backend_streams_and_rejects_sync() {
        let dir = tempfile::TempDir::new().unwrap();
        let program = dir.path().join("claude");
        std::fs::write(
            &program,
            "#!/bin/sh\n\
             echo '{\"type\":\"stream_event\",\"event\":{\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Servus\"}}}'\n\
             echo '{\"type\":\"result\",\"subtype\":\"success\"}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = ProviderConfig::ClaudeCli(ClaudeCliProviderConfig {
            command: program.to_string_lossy().into_owned(),
            ..Default::default()
        });
        let gateway = Gateway::new(config, Timeouts::default()).unwrap();

        let stream = gateway
            .handle_stream(vec![Message::user("Hallo")], CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            collect(stream).await,
            vec![CanonicalEvent::delta("Servus"), CanonicalEvent::Done]
        );

        let err = gateway
            .handle_sync(vec![Message::user("Hallo")])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedMode(_)));
    }

    #[tokio::test]
    async fn test_missing_cli_is_a_request_error() {
        let config = ProviderConfig::ClaudeCli(ClaudeCliProviderConfig {
            command: "/nonexistent/claude".to_string(),
            ..Default::default()
        });
        let gateway = Gateway::new(config, Timeouts::default()).unwrap();

        let err = gateway
            .handle_stream(vec![Message::user("Hallo")], CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::UpstreamUnavailable(_)));
    }

    #[test]
    fn test_reports_never_carry_credentials() {
        let gateway = openai_gateway("https://llm.example.com/v1");

        let health = serde_json::to_value(gateway.health()).unwrap();
        assert_eq!(
            health,
            json!({
                "status": "ok",
                "provider": "openai",
                "model": "gpt-4o",
                "apiUrl": "https://llm.example.com/v1"
            })
        );

        let config = serde_json::to_value(gateway.config()).unwrap();
        assert_eq!(config, json!({"provider": "openai", "model": "gpt-4o"}));
        assert!(!health.to_string().contains("sk-test"));
    }

    #[test]
    fn test_cli_health_has_no_api_url() {
        let gateway = Gateway::new(
            ProviderConfig::ClaudeCli(ClaudeCliProviderConfig::default()),
            Timeouts::default(),
        )
        .unwrap();

        let health = serde_json::to_value(gateway.health()).unwrap();
        assert_eq!(
            health,
            json!({"status": "ok", "provider": "claude-cli", "model": "default"})
        );
    }
}
