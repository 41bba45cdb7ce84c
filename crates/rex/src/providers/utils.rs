use std::time::Duration;

use reqwest::{Client, Response};
use serde_json::Value;

use super::base::HttpRequest;
use crate::errors::{GatewayError, GatewayResult};

/// Payload of an SSE `data:` line, or `None` for any other kind of line.
///
/// Comment lines (`:` prefixed), `event:`/`id:` fields and blank lines are not
/// data and yield `None`.
pub fn sse_data(line: &str) -> Option<&str> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() {
        None
    } else {
        Some(data)
    }
}

/// Parse a JSON frame, swallowing malformed input.
pub fn parse_json_frame(data: &str) -> Option<Value> {
    match serde_json::from_str(data) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!("skipping malformed stream frame: {}", e);
            None
        }
    }
}

/// Send an upstream request and fail on any non-success status.
///
/// The upstream body is kept verbatim so the client sees the backend's own
/// error message.
pub async fn send(
    client: &Client,
    request: &HttpRequest,
    timeout: Option<Duration>,
) -> GatewayResult<Response> {
    let mut builder = client.post(&request.url).json(&request.body);
    for (name, value) in &request.headers {
        builder = builder.header(*name, value);
    }
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    let response = builder.send().await.map_err(|e| {
        tracing::error!("upstream request to {} failed: {}", request.url, e);
        GatewayError::from(e)
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!("upstream {} answered {}", request.url, status);
    Err(GatewayError::UpstreamRejected {
        status: status.as_u16(),
        body,
    })
}

/// Join a base URL and a path without doubling the slash.
pub fn endpoint(host: &str, path: &str) -> String {
    format!("{}/{}", host.trim_end_matches('/'), path.trim_start_matches('/'))
}
