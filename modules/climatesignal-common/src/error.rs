use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transient {service} error: {message}")]
    TransientService { service: &'static str, message: String },

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Cache corruption at {key}: {message}")]
    CacheCorruption { key: String, message: String },

    #[error("Text transform failed: {0}")]
    TextTransform(String),
}

impl EnrichError {
    /// Errors that reject the record outright rather than degrading a stage.
    pub fn is_fatal_for_record(&self) -> bool {
        matches!(
            self,
            EnrichError::Validation(_) | EnrichError::TextTransform(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_are_fatal_and_service_faults_degrade() {
        assert!(EnrichError::Validation("missing id".into()).is_fatal_for_record());
        assert!(EnrichError::TextTransform("empty".into()).is_fatal_for_record());
        assert!(!EnrichError::ModelUnavailable("langid".into()).is_fatal_for_record());
        assert!(!EnrichError::TransientService {
            service: "geocoder",
            message: "timeout".into(),
        }
        .is_fatal_for_record());
        assert!(!EnrichError::CacheCorruption {
            key: "geo:x".into(),
            message: "bad json".into(),
        }
        .is_fatal_for_record());
    }
}
