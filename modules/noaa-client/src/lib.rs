pub mod error;
pub mod types;

pub use error::{NoaaError, Result};
pub use types::{DataRecord, Extent, ResultSet, StationRecord, DATASET_GHCND};

use chrono::NaiveDate;
use rand::Rng;
use serde::de::DeserializeOwned;
use std::time::Duration;

const BASE_URL: &str = "https://www.ncdc.noaa.gov/cdo-web/api/v2";

/// Max attempts for transient failures (timeouts, 429, 5xx).
const MAX_ATTEMPTS: u32 = 3;
/// Base backoff. Actual delay is base * 3^attempt + jitter.
const RETRY_BASE: Duration = Duration::from_secs(1);

const STATION_LIMIT: u32 = 10;
const DATA_LIMIT: u32 = 1000;

pub struct NoaaClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl NoaaClient {
    pub fn new(token: String) -> Self {
        Self::with_base_url(BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// GHCND stations inside `extent`, as returned by `/stations`.
    pub async fn list_stations(&self, extent: Extent) -> Result<Vec<StationRecord>> {
        let url = format!("{}/stations", self.base_url);
        let params = [
            ("datasetid", DATASET_GHCND.to_string()),
            ("extent", extent.to_param()),
            ("limit", STATION_LIMIT.to_string()),
        ];
        let resp: ResultSet<StationRecord> = self.get_json(&url, &params).await?;
        tracing::debug!(count = resp.results.len(), "NOAA stations listed");
        Ok(resp.results)
    }

    /// Daily GHCND data points for one station between two dates, inclusive.
    pub async fn observations(
        &self,
        station_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DataRecord>> {
        let url = format!("{}/data", self.base_url);
        let params = [
            ("datasetid", DATASET_GHCND.to_string()),
            ("stationid", station_id.to_string()),
            ("startdate", start.format("%Y-%m-%d").to_string()),
            ("enddate", end.format("%Y-%m-%d").to_string()),
            ("limit", DATA_LIMIT.to_string()),
        ];
        let resp: ResultSet<DataRecord> = self.get_json(&url, &params).await?;
        tracing::debug!(station_id, count = resp.results.len(), "NOAA observations fetched");
        Ok(resp.results)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, params: &[(&str, String)]) -> Result<T> {
        let mut attempt = 0;
        loop {
            match self.get_once(url, params).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let backoff = RETRY_BASE * 3u32.pow(attempt);
                    let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
                    tracing::warn!(
                        url,
                        attempt = attempt + 1,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "NOAA request failed, retrying after backoff"
                    );
                    tokio::time::sleep(backoff + jitter).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once<T: DeserializeOwned>(&self, url: &str, params: &[(&str, String)]) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .header("token", &self.token)
            .query(params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NoaaError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}
