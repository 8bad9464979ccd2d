use thiserror::Error;

pub type Result<T> = std::result::Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Empty response from {0}")]
    EmptyResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AiError {
    /// HTTP status for API errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            AiError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Network failures, rate limits and server errors are worth retrying.
    /// Bad requests, auth failures and malformed payloads are not.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::Network(_) => true,
            AiError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        AiError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for AiError {
    fn from(err: serde_json::Error) -> Self {
        AiError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        let limited = AiError::Api { status: 429, message: "slow down".into() };
        let unavailable = AiError::Api { status: 503, message: "down".into() };
        assert!(limited.is_transient());
        assert!(unavailable.is_transient());
        assert!(AiError::Network("reset".into()).is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        let unauthorized = AiError::Api { status: 401, message: "bad key".into() };
        assert!(!unauthorized.is_transient());
        assert!(!AiError::Parse("eof".into()).is_transient());
        assert_eq!(unauthorized.status(), Some(401));
    }
}
