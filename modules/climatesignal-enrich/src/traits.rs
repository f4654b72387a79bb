// Trait abstractions for the enrichment collaborators.
//
// TextClassifier: language-ID and sentiment models (hosted or in-process).
// Geocoder: free-text location to coordinates.
// WeatherSource: nearest station plus observations in a time window.
// CacheStore: TTL key-value store fronting the geocoder and station lookups.
// RecordSink / DeadLetterSink: storage handoff for finished and rejected records.
//
// Mocks for all of these live in `testing`; no network needed for `cargo test`.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use climatesignal_common::{Observation, ProcessingStage, Record, Station};

// ---------------------------------------------------------------------------
// TextClassifier
// ---------------------------------------------------------------------------

/// Top label from a scoring model.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

#[async_trait]
pub trait TextClassifier: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Score `text`. `Ok(None)` means the model had no opinion;
    /// `Err` means the model is unavailable or failed at inference time.
    async fn predict(&self, text: &str) -> Result<Option<Prediction>>;
}

// ---------------------------------------------------------------------------
// Geocoder
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a free-text place to (lat, lon). Callers rate-limit.
    async fn geocode(&self, query: &str) -> Result<Option<(f64, f64)>>;
}

// ---------------------------------------------------------------------------
// WeatherSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Nearest station within `radius_km` of the point, if any.
    async fn find_station(&self, lat: f64, lon: f64, radius_km: f64) -> Result<Option<Station>>;

    /// Observations for a station in `[start, end]`, in domain units.
    async fn query_observations(
        &self,
        station_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>>;
}

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn setex(&self, key: &str, ttl: Duration, value: String) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// A record that could not be enriched, with the stage that rejected it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Option<String>,
    pub stage: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_json: Option<String>,
}

impl DeadLetter {
    pub fn for_record(record: &Record, stage: ProcessingStage, reason: impl Into<String>) -> Self {
        Self {
            id: Some(record.id.clone()),
            stage: stage.to_string(),
            reason: reason.into(),
            raw_json: Some(record.raw_json.clone()),
        }
    }
}

#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn write(&self, record: &Record) -> Result<()>;

    /// Persist anything buffered. Called at shutdown.
    async fn flush(&self) -> Result<()>;
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn reject(&self, letter: &DeadLetter) -> Result<()>;

    async fn flush(&self) -> Result<()>;
}
