use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rex::errors::GatewayError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {env_var}: {message}")]
    InvalidValue { env_var: String, message: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets the given settings field.
///
/// Bare field names come from the provider section, which is the only one
/// with required fields.
pub fn to_env_var(field_path: &str) -> String {
    let normalized_path = if field_path.starts_with("provider.")
        || field_path.starts_with("server.")
        || field_path.starts_with("timeouts.")
    {
        field_path.to_string()
    } else {
        format!("provider.{}", field_path)
    };

    format!(
        "REX_{}",
        normalized_path.replace('.', "__").to_uppercase()
    )
}

/// A gateway failure rendered as `{"error": ...}` with the matching status.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::UpstreamRejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::UnsupportedMode(_) => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match &self.0 {
            // The upstream body is passed through untouched.
            GatewayError::UpstreamRejected { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        } else {
            tracing::debug!("request rejected: {}", self.0);
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}
