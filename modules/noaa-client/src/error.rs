use thiserror::Error;

pub type Result<T> = std::result::Result<T, NoaaError>;

#[derive(Debug, Error)]
pub enum NoaaError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl NoaaError {
    /// Timeouts, rate limiting and server-side failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            NoaaError::Network(_) | NoaaError::Timeout(_) => true,
            NoaaError::Api { status, .. } => *status == 429 || *status >= 500,
            NoaaError::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for NoaaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NoaaError::Timeout(err.to_string())
        } else if err.is_decode() {
            NoaaError::Parse(err.to_string())
        } else {
            NoaaError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for NoaaError {
    fn from(err: serde_json::Error) -> Self {
        NoaaError::Parse(err.to_string())
    }
}
