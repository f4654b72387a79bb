use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Geo Types ---

/// Haversine great-circle distance between two lat/lon points in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Round to `places` decimal places. Used for reported scores and metrics.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoConfidence {
    High,
    Medium,
    Low,
    Unavailable,
}

impl GeoConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoConfidence::High => "high",
            GeoConfidence::Medium => "medium",
            GeoConfidence::Low => "low",
            GeoConfidence::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoSource {
    Coordinates,
    PlaceCentroid,
    UserLocationGeocoded,
    Unavailable,
}

/// Resolved location for a record. Coordinates are present iff the
/// confidence is not `Unavailable`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoResult {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub confidence: GeoConfidence,
    pub source: GeoSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_location: Option<String>,
}

impl GeoResult {
    pub fn resolved(lat: f64, lon: f64, confidence: GeoConfidence, source: GeoSource) -> Self {
        Self {
            lat: Some(lat),
            lon: Some(lon),
            confidence,
            source,
            place_name: None,
            user_location: None,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            lat: None,
            lon: None,
            confidence: GeoConfidence::Unavailable,
            source: GeoSource::Unavailable,
            place_name: None,
            user_location: None,
        }
    }

    /// The (lat, lon) pair, if this result carries one.
    pub fn point(&self) -> Option<(f64, f64)> {
        match (self.confidence, self.lat, self.lon) {
            (GeoConfidence::Unavailable, _, _) => None,
            (_, Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

// --- Input Types ---

/// Identifiers arrive as strings from v2 payloads and as integers from
/// older exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdField {
    Text(String),
    Number(u64),
}

impl IdField {
    pub fn into_string(self) -> String {
        match self {
            IdField::Text(s) => s,
            IdField::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// Place geometry. `coordinates` is kept as raw JSON because polygons arrive
/// both as a flat ring and nested one level deeper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaceGeo {
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
    #[serde(default)]
    pub coordinates: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Place {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub geo: Option<PlaceGeo>,
}

/// An entity reference: either the bare value or the v2 object form
/// (`{"tag": ..}`, `{"username": ..}`, `{"url": ..}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityRef {
    Plain(String),
    Object {
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
}

impl EntityRef {
    pub fn value(&self) -> &str {
        match self {
            EntityRef::Plain(s) => s,
            EntityRef::Object { tag, username, url } => tag
                .as_deref()
                .or(username.as_deref())
                .or(url.as_deref())
                .unwrap_or(""),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub hashtags: Vec<EntityRef>,
    #[serde(default)]
    pub mentions: Vec<EntityRef>,
    #[serde(default)]
    pub urls: Vec<EntityRef>,
}

/// Input record as handed over by the ingestion collaborator. Every field is
/// optional here; the validator decides what is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default, alias = "tweet_id")]
    pub id: Option<IdField>,
    #[serde(default)]
    pub author_id: Option<IdField>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub place: Option<Place>,
    #[serde(default)]
    pub user_location: Option<String>,
    #[serde(default, alias = "lang")]
    pub declared_lang: Option<String>,
    #[serde(default)]
    pub entities: Option<Entities>,
    #[serde(default, alias = "retweet_status")]
    pub is_repost: Option<bool>,
    #[serde(default)]
    pub retweet_count: Option<u64>,
}

// --- Enrichment Types ---

/// Last stage successfully applied to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Parsed,
    Deduplicated,
    Cleaned,
    LanguageResolved,
    GeoResolved,
    WeatherMatched,
    SentimentScored,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::Parsed => "parsed",
            ProcessingStage::Deduplicated => "deduplicated",
            ProcessingStage::Cleaned => "cleaned",
            ProcessingStage::LanguageResolved => "language_resolved",
            ProcessingStage::GeoResolved => "geo_resolved",
            ProcessingStage::WeatherMatched => "weather_matched",
            ProcessingStage::SentimentScored => "sentiment_scored",
        }
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextFeatures {
    pub hashtag_count: usize,
    pub mention_count: usize,
    pub url_count: usize,
    pub emoji_count: usize,
    pub emoji_sentiment_score: f64,
    pub text_length: usize,
    pub word_count: usize,
    pub has_media: bool,
    pub avg_word_length: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextEnrichment {
    pub text_original: String,
    pub clean_text: String,
    pub emoji: Vec<String>,
    pub decomposed_hashtags: Vec<String>,
    pub features: TextFeatures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageMethod {
    ShortText,
    Primary,
    Secondary,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageResult {
    pub lang: String,
    pub confidence: f64,
    pub method: LanguageMethod,
}

/// Nearest weather station to a query point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub distance_km: f64,
}

/// The closed set of physical quantities the matcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    TemperatureMax,
    TemperatureMin,
    Precipitation,
    WindSpeed,
    Snowfall,
}

/// A single observation in domain units: °C, mm, m/s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub quantity: Quantity,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherEvent {
    HeavyRain,
    Rain,
    LightRain,
    HighWind,
    Windy,
    ExtremeHeat,
    Heat,
    Freezing,
    Cold,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchQuality {
    High,
    Medium,
    Low,
    NoObservations,
    NoStation,
    NoGeolocation,
}

impl MatchQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchQuality::High => "high",
            MatchQuality::Medium => "medium",
            MatchQuality::Low => "low",
            MatchQuality::NoObservations => "no_observations",
            MatchQuality::NoStation => "no_station",
            MatchQuality::NoGeolocation => "no_geolocation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherResult {
    pub station: Option<Station>,
    pub temp_c: Option<f64>,
    pub temp_max_c: Option<f64>,
    pub temp_min_c: Option<f64>,
    pub precip_mm: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub snowfall_mm: Option<f64>,
    pub event_type: Option<WeatherEvent>,
    pub observation_time: Option<DateTime<Utc>>,
    pub match_quality: MatchQuality,
}

impl WeatherResult {
    /// All weather fields null, tagged with why.
    pub fn empty(match_quality: MatchQuality) -> Self {
        Self {
            station: None,
            temp_c: None,
            temp_max_c: None,
            temp_min_c: None,
            precip_mm: None,
            wind_speed_ms: None,
            snowfall_mm: None,
            event_type: None,
            observation_time: None,
            match_quality,
        }
    }

    /// True when no metric was filled in.
    pub fn is_placeholder(&self) -> bool {
        self.observation_time.is_none()
            && self.temp_max_c.is_none()
            && self.temp_min_c.is_none()
            && self.precip_mm.is_none()
            && self.wind_speed_ms.is_none()
            && self.snowfall_mm.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentMethod {
    PrimaryModel,
    MultilingualModel,
    Lexicon,
    EmptyText,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult {
    pub score: f64,
    pub label: SentimentLabel,
    pub method: SentimentMethod,
    pub confidence: f64,
}

impl SentimentResult {
    pub fn neutral(method: SentimentMethod) -> Self {
        Self {
            score: 0.0,
            label: SentimentLabel::Neutral,
            method,
            confidence: 0.0,
        }
    }
}

// --- Record ---

/// A validated record and its enrichment accumulator.
///
/// Stages only ever add. `text`, `language` and `sentiment` are written once;
/// `geo` and `weather` may additionally replace an unavailable / all-null
/// placeholder, never a populated value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub declared_lang: String,
    pub is_repost: bool,
    pub retweet_count: u64,
    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
    pub urls: Vec<String>,
    pub coordinates: Option<Coordinates>,
    pub place: Option<Place>,
    pub user_location: Option<String>,
    pub raw_json: String,
    pub parsed_at: DateTime<Utc>,

    pub text_enrichment: Option<TextEnrichment>,
    pub language: Option<LanguageResult>,
    pub geo: Option<GeoResult>,
    pub weather: Option<WeatherResult>,
    pub sentiment: Option<SentimentResult>,
    pub processing_stage: ProcessingStage,
}

impl Record {
    /// Cleaned text if the text stage ran, otherwise empty.
    pub fn clean_text(&self) -> &str {
        self.text_enrichment
            .as_ref()
            .map(|t| t.clean_text.as_str())
            .unwrap_or("")
    }

    pub fn emoji_sentiment_score(&self) -> f64 {
        self.text_enrichment
            .as_ref()
            .map(|t| t.features.emoji_sentiment_score)
            .unwrap_or(0.0)
    }

    pub fn geo_confidence(&self) -> GeoConfidence {
        self.geo
            .as_ref()
            .map(|g| g.confidence)
            .unwrap_or(GeoConfidence::Unavailable)
    }

    /// Returns false (and keeps the existing value) if text was already set.
    pub fn attach_text(&mut self, text: TextEnrichment) -> bool {
        fill_once(&mut self.text_enrichment, text, &self.id, "text_enrichment")
    }

    pub fn attach_language(&mut self, language: LanguageResult) -> bool {
        fill_once(&mut self.language, language, &self.id, "language")
    }

    pub fn attach_sentiment(&mut self, sentiment: SentimentResult) -> bool {
        fill_once(&mut self.sentiment, sentiment, &self.id, "sentiment")
    }

    pub fn attach_geo(&mut self, geo: GeoResult) -> bool {
        let replaceable = self
            .geo
            .as_ref()
            .is_none_or(|g| g.confidence == GeoConfidence::Unavailable);
        if !replaceable {
            tracing::warn!(record_id = %self.id, field = "geo", "Refusing to overwrite resolved field");
            return false;
        }
        self.geo = Some(geo);
        true
    }

    pub fn attach_weather(&mut self, weather: WeatherResult) -> bool {
        let replaceable = self.weather.as_ref().is_none_or(|w| w.is_placeholder());
        if !replaceable {
            tracing::warn!(record_id = %self.id, field = "weather", "Refusing to overwrite resolved field");
            return false;
        }
        self.weather = Some(weather);
        true
    }

    /// Move the stage marker forward. Never moves it backwards.
    pub fn advance(&mut self, stage: ProcessingStage) {
        if stage > self.processing_stage {
            self.processing_stage = stage;
        }
    }
}

fn fill_once<T>(slot: &mut Option<T>, value: T, record_id: &str, field: &'static str) -> bool {
    if slot.is_some() {
        tracing::warn!(record_id, field, "Refusing to overwrite enriched field");
        return false;
    }
    *slot = Some(value);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_record() -> Record {
        let now = Utc::now();
        Record {
            id: "1".to_string(),
            author_id: "unknown".to_string(),
            created_at: now,
            text: "hello".to_string(),
            declared_lang: "en".to_string(),
            is_repost: false,
            retweet_count: 0,
            hashtags: vec![],
            mentions: vec![],
            urls: vec![],
            coordinates: None,
            place: None,
            user_location: None,
            raw_json: "{}".to_string(),
            parsed_at: now,
            text_enrichment: None,
            language: None,
            geo: None,
            weather: None,
            sentiment: None,
            processing_stage: ProcessingStage::Parsed,
        }
    }

    #[test]
    fn haversine_sf_to_oakland() {
        // SF to Oakland is ~13km
        let dist = haversine_km(37.7749, -122.4194, 37.8044, -122.2712);
        assert!(
            (dist - 13.0).abs() < 2.0,
            "SF to Oakland should be ~13km, got {dist}"
        );
    }

    #[test]
    fn haversine_houston_to_galveston() {
        // Houston to Galveston is ~72km
        let dist = haversine_km(29.7604, -95.3698, 29.3013, -94.7977);
        assert!(
            (dist - 72.0).abs() < 5.0,
            "Houston to Galveston should be ~72km, got {dist}"
        );
    }

    #[test]
    fn haversine_same_point_is_zero() {
        let dist = haversine_km(25.7617, -80.1918, 25.7617, -80.1918);
        assert!(dist < 0.001, "Same point should be 0km, got {dist}");
    }

    #[test]
    fn geo_is_not_overwritten_once_resolved() {
        let mut record = test_record();
        assert!(record.attach_geo(GeoResult::resolved(
            29.76,
            -95.37,
            GeoConfidence::High,
            GeoSource::Coordinates
        )));
        let lower = GeoResult::resolved(30.0, -90.0, GeoConfidence::Low, GeoSource::UserLocationGeocoded);
        assert!(!record.attach_geo(lower));
        assert_eq!(record.geo_confidence(), GeoConfidence::High);
        assert_eq!(record.geo.as_ref().and_then(|g| g.point()), Some((29.76, -95.37)));
    }

    #[test]
    fn geo_placeholder_can_be_replaced() {
        let mut record = test_record();
        assert!(record.attach_geo(GeoResult::unavailable()));
        assert!(record.attach_geo(GeoResult::resolved(
            1.0,
            2.0,
            GeoConfidence::Medium,
            GeoSource::PlaceCentroid
        )));
        assert_eq!(record.geo_confidence(), GeoConfidence::Medium);
    }

    #[test]
    fn weather_placeholder_can_be_replaced_but_not_real_values() {
        let mut record = test_record();
        assert!(record.attach_weather(WeatherResult::empty(MatchQuality::NoStation)));

        let mut real = WeatherResult::empty(MatchQuality::High);
        real.precip_mm = Some(3.0);
        assert!(record.attach_weather(real));
        assert!(!record.attach_weather(WeatherResult::empty(MatchQuality::NoGeolocation)));
        assert_eq!(
            record.weather.as_ref().map(|w| w.match_quality),
            Some(MatchQuality::High)
        );
    }

    #[test]
    fn language_is_written_once() {
        let mut record = test_record();
        let first = LanguageResult {
            lang: "en".to_string(),
            confidence: 0.9,
            method: LanguageMethod::Primary,
        };
        let second = LanguageResult {
            lang: "fr".to_string(),
            confidence: 0.3,
            method: LanguageMethod::Fallback,
        };
        assert!(record.attach_language(first));
        assert!(!record.attach_language(second));
        assert_eq!(record.language.as_ref().map(|l| l.lang.as_str()), Some("en"));
    }

    #[test]
    fn stage_marker_only_moves_forward() {
        let mut record = test_record();
        record.advance(ProcessingStage::GeoResolved);
        record.advance(ProcessingStage::Cleaned);
        assert_eq!(record.processing_stage, ProcessingStage::GeoResolved);
    }

    #[test]
    fn entity_ref_accepts_both_shapes() {
        let entities: Entities = serde_json::from_str(
            r#"{"hashtags":[{"tag":"Flood"},"Storm"],"mentions":[{"username":"nws"}],"urls":[{"url":"https://x.co"}]}"#,
        )
        .unwrap();
        let tags: Vec<&str> = entities.hashtags.iter().map(|h| h.value()).collect();
        assert_eq!(tags, vec!["Flood", "Storm"]);
        assert_eq!(entities.mentions[0].value(), "nws");
        assert_eq!(entities.urls[0].value(), "https://x.co");
    }

    #[test]
    fn raw_record_accepts_legacy_field_names() {
        let raw: RawRecord = serde_json::from_str(
            r#"{"tweet_id":123,"text":"hi","created_at":"2024-01-15T14:30:00.000Z","lang":"es","retweet_status":true}"#,
        )
        .unwrap();
        assert_eq!(raw.id.map(IdField::into_string).as_deref(), Some("123"));
        assert_eq!(raw.declared_lang.as_deref(), Some("es"));
        assert_eq!(raw.is_repost, Some(true));
    }

    #[test]
    fn round_to_three_places() {
        assert_eq!(round_to(0.123456, 3), 0.123);
        assert_eq!(round_to(-0.98765, 1), -1.0);
    }
}
