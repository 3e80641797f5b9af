//! Error types for the proxy.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{message}")]
    InvalidRequest { message: String },

    /// The request body could not be read, e.g. it exceeds the size limit.
    #[error("{message}")]
    RequestBody { status: u16, message: String },

    #[error("Upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    pub fn request_body(status: u16, msg: impl Into<String>) -> Self {
        Self::RequestBody {
            status,
            message: msg.into(),
        }
    }

    pub fn upstream(status: u16, body: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            body: body.into(),
        }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// HTTP status a caller sees for this error.
    ///
    /// Upstream statuses pass through verbatim when they are error statuses;
    /// a 2xx carrying `success: false` is reported as a bad gateway.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } => 400,
            Self::RequestBody { status, .. } if (400..=499).contains(status) => *status,
            Self::RequestBody { .. } => 400,
            Self::Upstream { status, .. } if (400..=599).contains(status) => *status,
            Self::Upstream { .. } => 502,
            _ => 500,
        }
    }

    /// Error `type` string reported in the response body.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } | Self::RequestBody { .. } => "invalid_request_error",
            Self::Upstream { .. }
            | Self::Provider { .. }
            | Self::Translation { .. }
            | Self::Http(_) => "provider_error",
            _ => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_request_maps_to_400() {
        let err = ProxyError::invalid_request("input is required");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_type(), "invalid_request_error");
        assert_eq!(err.to_string(), "input is required");
    }

    #[test]
    fn test_rejected_body_keeps_its_status() {
        let err = ProxyError::request_body(413, "length limit exceeded");
        assert_eq!(err.status_code(), 413);
        assert_eq!(err.error_type(), "invalid_request_error");
        assert_eq!(ProxyError::request_body(200, "odd").status_code(), 400);
    }

    #[test]
    fn test_upstream_status_passes_through() {
        let err = ProxyError::upstream(429, "slow down");
        assert_eq!(err.status_code(), 429);
        assert_eq!(err.error_type(), "provider_error");

        let err = ProxyError::upstream(200, "{\"success\":false}");
        assert_eq!(err.status_code(), 502);
    }

    #[test]
    fn test_everything_else_is_internal() {
        let err = ProxyError::other("boom");
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.error_type(), "internal_error");
    }
}
