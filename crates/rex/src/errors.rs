use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// The client sent something we cannot turn into a conversation.
    #[error("{0}")]
    InvalidRequest(String),

    /// The backend answered with a non-success status before any output was streamed.
    #[error("Upstream rejected the request with status {status}: {body}")]
    UpstreamRejected { status: u16, body: String },

    /// Network failure, spawn failure or an unreadable upstream response.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("{0}")]
    UnsupportedMode(String),

    /// The backend went away mid-stream. Recovered locally, never sent to the client.
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl GatewayError {
    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        GatewayError::InvalidRequest(message.into())
    }

    pub fn unavailable<E: std::fmt::Display>(err: E) -> Self {
        GatewayError::UpstreamUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::UpstreamUnavailable(err.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::UpstreamUnavailable(err.to_string())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
