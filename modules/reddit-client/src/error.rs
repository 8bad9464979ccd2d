use thiserror::Error;

pub type Result<T> = std::result::Result<T, RedditError>;

#[derive(Debug, Error)]
pub enum RedditError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl RedditError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RedditError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Rate limiting, server errors and dropped connections.
    pub fn is_transient(&self) -> bool {
        match self {
            RedditError::Network(_) => true,
            RedditError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Private, banned or missing communities answer 403/404.
    pub fn is_missing(&self) -> bool {
        matches!(self.status(), Some(403) | Some(404))
    }
}

impl From<reqwest::Error> for RedditError {
    fn from(err: reqwest::Error) -> Self {
        RedditError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for RedditError {
    fn from(err: serde_json::Error) -> Self {
        RedditError::Parse(err.to_string())
    }
}
