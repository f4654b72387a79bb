pub mod error;
pub mod types;
pub mod util;

pub use error::{InferenceError, Result};
pub use types::{top_label, ClassifyResponse, LabelScore};
pub use util::truncate_chars;

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;
use tracing::debug;

use types::ClassifyRequest;

const MAX_ATTEMPTS: u32 = 3;
/// Base backoff. Actual delay is base * 3^attempt + jitter.
const RETRY_BASE: Duration = Duration::from_secs(1);

/// Client for one hosted text-classification model.
pub struct InferenceClient {
    http: reqwest::Client,
    model_url: String,
    api_token: Option<String>,
}

impl InferenceClient {
    pub fn new(model_url: &str, api_token: Option<&str>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            model_url: model_url.to_string(),
            api_token: api_token.map(String::from),
        }
    }

    pub fn model_url(&self) -> &str {
        &self.model_url
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(ref token) = self.api_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| InferenceError::Parse(format!("invalid API token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Score `text` and return every label the model reports.
    pub async fn classify(&self, text: &str) -> Result<Vec<LabelScore>> {
        let mut attempt = 0;
        loop {
            match self.classify_once(text).await {
                Ok(scores) => return Ok(scores),
                Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let backoff = RETRY_BASE * 3u32.pow(attempt);
                    let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
                    tracing::warn!(
                        model = %self.model_url,
                        attempt = attempt + 1,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "Inference request failed, retrying after backoff"
                    );
                    tokio::time::sleep(backoff + jitter).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn classify_once(&self, text: &str) -> Result<Vec<LabelScore>> {
        debug!(model = %self.model_url, chars = text.chars().count(), "Inference request");

        let response = self
            .http
            .post(&self.model_url)
            .headers(self.headers()?)
            .json(&ClassifyRequest { inputs: text })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(InferenceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        let parsed: ClassifyResponse = serde_json::from_str(&body)?;
        Ok(parsed.into_scores())
    }
}
