use thiserror::Error;

pub type Result<T> = std::result::Result<T, InferenceError>;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl InferenceError {
    /// 503 is what hosted endpoints return while a model is still loading.
    pub fn is_transient(&self) -> bool {
        match self {
            InferenceError::Network(_) | InferenceError::Timeout(_) => true,
            InferenceError::Api { status, .. } => *status == 429 || *status >= 500,
            InferenceError::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            InferenceError::Timeout(err.to_string())
        } else {
            InferenceError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for InferenceError {
    fn from(err: serde_json::Error) -> Self {
        InferenceError::Parse(err.to_string())
    }
}
