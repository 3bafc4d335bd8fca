use serde_json::Value;
use thiserror::Error;

/// Message reported for every transport-level failure.
pub const SERVER_NOT_AVAILABLE: &str = "Server not available";

/// Errors returned by pipeline client operations.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// The pipeline backend returned a non-success HTTP status.
    #[error("Pipeline returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The response from the backend was missing expected fields.
    #[error("{0}")]
    InvalidResponse(String),

    /// A request URL could not be built from the configured endpoint.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The reachability probe reported the backend as down.
    #[error("{}", SERVER_NOT_AVAILABLE)]
    ServerUnavailable,

    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MonitorError {
    /// True for failures where the backend could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            MonitorError::Network { .. } | MonitorError::ServerUnavailable
        )
    }

    /// Message suitable for a [`CommandResult`](crate::CommandResult).
    ///
    /// Transport failures collapse to [`SERVER_NOT_AVAILABLE`]. Upstream
    /// rejections pass the server's own error text through unchanged.
    pub fn user_message(&self) -> String {
        match self {
            MonitorError::Network { .. } | MonitorError::ServerUnavailable => {
                SERVER_NOT_AVAILABLE.to_string()
            }
            MonitorError::Http { status, body } => upstream_message(*status, body),
            other => other.to_string(),
        }
    }
}

fn upstream_message(status: u16, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        for key in ["error", "detail", "message"] {
            if let Some(msg) = json.get(key).and_then(|v| v.as_str()) {
                return msg.to_string();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status)
    } else {
        trimmed.to_string()
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, MonitorError>;
