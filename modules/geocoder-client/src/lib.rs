pub mod error;

pub use error::{GeocoderError, Result};

use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
/// Base backoff. Actual delay is base * 3^attempt + jitter.
const RETRY_BASE: Duration = Duration::from_secs(2);

/// One hit from `/search?format=json`. Nominatim returns coordinates as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub lat: String,
    pub lon: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl SearchHit {
    pub fn point(&self) -> Result<(f64, f64)> {
        let lat = self
            .lat
            .parse::<f64>()
            .map_err(|e| GeocoderError::Parse(format!("lat {:?}: {e}", self.lat)))?;
        let lon = self
            .lon
            .parse::<f64>()
            .map_err(|e| GeocoderError::Parse(format!("lon {:?}: {e}", self.lon)))?;
        Ok((lat, lon))
    }
}

pub struct NominatimClient {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimClient {
    /// Nominatim's usage policy requires an identifying User-Agent.
    pub fn new(base_url: &str, user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve a free-text place to its best (lat, lon), if any.
    ///
    /// The caller owns rate limiting; this only retries transient failures.
    pub async fn search(&self, query: &str) -> Result<Option<(f64, f64)>> {
        let mut attempt = 0;
        loop {
            match self.search_once(query).await {
                Ok(hit) => return hit.map(|h| h.point()).transpose(),
                Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let backoff = RETRY_BASE * 3u32.pow(attempt);
                    let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
                    tracing::warn!(
                        query,
                        attempt = attempt + 1,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "Geocoder request failed, retrying after backoff"
                    );
                    tokio::time::sleep(backoff + jitter).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn search_once(&self, query: &str) -> Result<Option<SearchHit>> {
        let endpoint = format!("{}/search", self.base_url);
        let resp = self
            .client
            .get(&endpoint)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(GeocoderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.text().await?;
        let hits: Vec<SearchHit> = serde_json::from_str(&body)?;
        Ok(hits.into_iter().next())
    }
}
