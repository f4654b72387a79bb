use thiserror::Error;

pub type Result<T> = std::result::Result<T, GeocoderError>;

#[derive(Debug, Error)]
pub enum GeocoderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl GeocoderError {
    pub fn is_transient(&self) -> bool {
        match self {
            GeocoderError::Network(_) | GeocoderError::Timeout(_) => true,
            GeocoderError::Api { status, .. } => *status == 429 || *status >= 500,
            GeocoderError::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for GeocoderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GeocoderError::Timeout(err.to_string())
        } else {
            GeocoderError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GeocoderError {
    fn from(err: serde_json::Error) -> Self {
        GeocoderError::Parse(err.to_string())
    }
}
