// Test mocks for the enrichment pipeline.
//
// One mock per trait boundary:
// - FixedClassifier / FailingClassifier (TextClassifier)
// - MockGeocoder (Geocoder): HashMap-based query→point, call counter
// - MockWeatherSource (WeatherSource): one station fixture plus observations
// - CollectingSink (RecordSink + DeadLetterSink): keeps everything in memory
//
// Plus helpers for constructing Records, Stations and Observations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use climatesignal_common::{Observation, ProcessingStage, Quantity, Record, Station};

use crate::traits::{
    DeadLetter, DeadLetterSink, Geocoder, Prediction, RecordSink, TextClassifier, WeatherSource,
};

// ---------------------------------------------------------------------------
// Test constants
// ---------------------------------------------------------------------------

/// Houston, TX coordinates.
pub const HOUSTON: (f64, f64) = (29.7604, -95.3698);
/// Miami, FL coordinates.
pub const MIAMI: (f64, f64) = (25.7617, -80.1918);

// ---------------------------------------------------------------------------
// Classifiers
// ---------------------------------------------------------------------------

/// Always answers with the same label. Remembers the last input it saw.
pub struct FixedClassifier {
    prediction: Option<Prediction>,
    last_input: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl FixedClassifier {
    pub fn new(label: &str, confidence: f64) -> Self {
        Self {
            prediction: Some(Prediction::new(label, confidence)),
            last_input: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// A model that runs but never has an opinion.
    pub fn silent() -> Self {
        Self {
            prediction: None,
            last_input: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn last_input(&self) -> Option<String> {
        self.last_input.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextClassifier for FixedClassifier {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn predict(&self, text: &str) -> Result<Option<Prediction>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().unwrap() = Some(text.to_string());
        Ok(self.prediction.clone())
    }
}

/// Always errors, as an unloadable or crashing model would.
pub struct FailingClassifier {
    name: String,
}

impl FailingClassifier {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl TextClassifier for FailingClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn predict(&self, _text: &str) -> Result<Option<Prediction>> {
        bail!("{} failed to load", self.name)
    }
}

// ---------------------------------------------------------------------------
// MockGeocoder
// ---------------------------------------------------------------------------

/// Exact-match query→point map. Unknown queries return `Ok(None)`.
/// Builder pattern: `.on_query()`, `.failing()`.
pub struct MockGeocoder {
    points: HashMap<String, (f64, f64)>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockGeocoder {
    pub fn new() -> Self {
        Self {
            points: HashMap::new(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn on_query(mut self, query: &str, point: (f64, f64)) -> Self {
        self.points.insert(query.to_string(), point);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Geocoder for MockGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<(f64, f64)>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("MockGeocoder: 503 Service Unavailable");
        }
        Ok(self.points.get(query).copied())
    }
}

// ---------------------------------------------------------------------------
// MockWeatherSource
// ---------------------------------------------------------------------------

/// Returns the same station and observations for every query.
/// Builder pattern: `.with_station()`, `.with_observations()`, `.failing()`.
pub struct MockWeatherSource {
    station: Option<Station>,
    observations: Vec<Observation>,
    fail: bool,
    station_calls: AtomicUsize,
    observation_calls: AtomicUsize,
}

impl MockWeatherSource {
    pub fn new() -> Self {
        Self {
            station: None,
            observations: Vec::new(),
            fail: false,
            station_calls: AtomicUsize::new(0),
            observation_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_station(mut self, station: Station) -> Self {
        self.station = Some(station);
        self
    }

    pub fn with_observations(mut self, observations: Vec<Observation>) -> Self {
        self.observations = observations;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn station_calls(&self) -> usize {
        self.station_calls.load(Ordering::SeqCst)
    }

    pub fn observation_calls(&self) -> usize {
        self.observation_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockWeatherSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WeatherSource for MockWeatherSource {
    async fn find_station(&self, _lat: f64, _lon: f64, _radius_km: f64) -> Result<Option<Station>> {
        self.station_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("MockWeatherSource: 429 Too Many Requests");
        }
        Ok(self.station.clone())
    }

    async fn query_observations(
        &self,
        _station_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>> {
        self.observation_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("MockWeatherSource: 429 Too Many Requests");
        }
        Ok(self
            .observations
            .iter()
            .filter(|o| o.timestamp >= start && o.timestamp <= end)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// CollectingSink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CollectingSink {
    records: Mutex<Vec<Record>>,
    letters: Mutex<Vec<DeadLetter>>,
    flushes: AtomicUsize,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().unwrap().clone()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSink for CollectingSink {
    async fn write(&self, record: &Record) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DeadLetterSink for CollectingSink {
    async fn reject(&self, letter: &DeadLetter) -> Result<()> {
        self.letters.lock().unwrap().push(letter.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Fixed timestamp all test records share.
pub fn test_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap()
}

/// A parsed record with just an id and text.
pub fn record(id: &str, text: &str) -> Record {
    Record {
        id: id.to_string(),
        author_id: "unknown".to_string(),
        created_at: test_time(),
        text: text.to_string(),
        declared_lang: "en".to_string(),
        is_repost: false,
        retweet_count: 0,
        hashtags: Vec::new(),
        mentions: Vec::new(),
        urls: Vec::new(),
        coordinates: None,
        place: None,
        user_location: None,
        raw_json: "{}".to_string(),
        parsed_at: test_time(),
        text_enrichment: None,
        language: None,
        geo: None,
        weather: None,
        sentiment: None,
        processing_stage: ProcessingStage::Parsed,
    }
}

/// Raw JSON input line as the ingestion side would hand it over.
pub fn input_line(id: &str, text: &str) -> String {
    serde_json::json!({
        "id": id,
        "text": text,
        "created_at": "2024-01-15T14:30:00.000Z",
        "declared_lang": "en",
    })
    .to_string()
}

pub fn station(id: &str, distance_km: f64) -> Station {
    Station {
        id: id.to_string(),
        name: format!("{id} TEST STATION"),
        lat: HOUSTON.0,
        lon: HOUSTON.1,
        distance_km,
    }
}

pub fn observation(timestamp: DateTime<Utc>, quantity: Quantity, value: f64) -> Observation {
    Observation {
        timestamp,
        quantity,
        value,
    }
}
