//! Stage orchestration.
//!
//! `Enricher` owns one instance of every stage and the shared caches behind
//! them. `process` runs a single record through all stages in order; the
//! worker pool in `workers` calls `apply` per stage with N workers each.

pub mod stats;
pub mod workers;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use typed_builder::TypedBuilder;

use climatesignal_common::{
    FileConfig, GeoConfidence, MatchQuality, ProcessingStage, Record, WeatherResult,
};

use crate::infra::MemoryCacheStore;
use crate::stages::geo::GeocodedLocationTier;
use crate::stages::language::{
    normalize_language_label, NgramClassifier, DEFAULT_MIN_TEXT_CHARS, DEFAULT_PRIMARY_THRESHOLD,
};
use crate::stages::sentiment::ValenceLexicon;
use crate::stages::{
    DedupFilter, DedupVerdict, GeoResolver, LanguageResolver, SentimentFuser, TextEnricher,
    Validator, WeatherMatcher,
};
use crate::traits::{CacheStore, DeadLetter, Geocoder, TextClassifier, WeatherSource};

pub use stats::{RunReport, RunTotals};

/// What happened to one record.
#[derive(Debug)]
pub enum Outcome {
    Completed(Box<Record>),
    Dropped { id: String, verdict: DedupVerdict },
    DeadLetter(DeadLetter),
}

/// Stages after validation, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Dedup,
    Clean,
    Language,
    Geo,
    Weather,
    Sentiment,
}

impl Step {
    pub const ALL: [Step; 6] = [
        Step::Dedup,
        Step::Clean,
        Step::Language,
        Step::Geo,
        Step::Weather,
        Step::Sentiment,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Step::Dedup => "dedup",
            Step::Clean => "text",
            Step::Language => "language",
            Step::Geo => "geo",
            Step::Weather => "weather",
            Step::Sentiment => "sentiment",
        }
    }
}

/// External services the stages call out to. Anything left unset makes the
/// corresponding stage use its fallback chain.
#[derive(Clone, TypedBuilder)]
pub struct Collaborators {
    #[builder(default = Arc::new(MemoryCacheStore::new()) as Arc<dyn CacheStore>)]
    pub cache: Arc<dyn CacheStore>,
    #[builder(default, setter(strip_option))]
    pub geocoder: Option<Arc<dyn Geocoder>>,
    #[builder(default, setter(strip_option))]
    pub weather: Option<Arc<dyn WeatherSource>>,
    #[builder(default, setter(strip_option))]
    pub language_model: Option<Arc<dyn TextClassifier>>,
    #[builder(default, setter(strip_option))]
    pub sentiment_primary: Option<Arc<dyn TextClassifier>>,
    #[builder(default, setter(strip_option))]
    pub sentiment_multilingual: Option<Arc<dyn TextClassifier>>,
}

#[derive(Clone, TypedBuilder)]
pub struct Enricher {
    #[builder(default = Arc::new(Validator::new()))]
    validator: Arc<Validator>,
    #[builder(default = Arc::new(DedupFilter::default()))]
    dedup: Arc<DedupFilter>,
    #[builder(default = Arc::new(TextEnricher::new()))]
    text: Arc<TextEnricher>,
    #[builder(default = Arc::new(default_language_resolver()))]
    language: Arc<LanguageResolver>,
    #[builder(default = Arc::new(GeoResolver::new(None)))]
    geo: Arc<GeoResolver>,
    #[builder(default, setter(strip_option))]
    weather: Option<Arc<WeatherMatcher>>,
    #[builder(default = Arc::new(SentimentFuser::new("en", None, None, Some(ValenceLexicon))))]
    sentiment: Arc<SentimentFuser>,
}

fn default_language_resolver() -> LanguageResolver {
    LanguageResolver::new(
        None,
        Some(Arc::new(NgramClassifier)),
        DEFAULT_MIN_TEXT_CHARS,
        DEFAULT_PRIMARY_THRESHOLD,
    )
}

impl Enricher {
    /// Wire every stage from the tuning file and the available collaborators.
    pub fn from_config(config: &FileConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            cache,
            geocoder,
            weather,
            language_model,
            sentiment_primary,
            sentiment_multilingual,
        } = collaborators;

        let language = LanguageResolver::new(
            language_model,
            Some(Arc::new(NgramClassifier)),
            config.language.min_text_chars,
            config.language.primary_threshold,
        );

        let geocoder_tier = geocoder.map(|g| {
            GeocodedLocationTier::new(
                g,
                cache.clone(),
                Duration::from_secs(config.geo.geocode_cache_ttl_secs),
                config.geo.geocode_requests_per_second,
            )
        });

        let weather = weather.map(|source| {
            Arc::new(
                WeatherMatcher::new(source, cache.clone())
                    .with_radius_km(config.weather.station_radius_km)
                    .with_window_minutes(config.weather.window_minutes)
                    .with_station_ttl(Duration::from_secs(config.weather.station_cache_ttl_secs)),
            )
        });
        if weather.is_none() {
            warn!("No weather source configured, weather fields will be placeholders");
        }

        let sentiment = SentimentFuser::new(
            config.sentiment.primary_language.clone(),
            sentiment_primary,
            sentiment_multilingual,
            Some(ValenceLexicon),
        )
        .with_max_input_chars(config.sentiment.max_input_chars);

        Self {
            validator: Arc::new(Validator::new()),
            dedup: Arc::new(DedupFilter::new(config.dedup.capacity)),
            text: Arc::new(TextEnricher::new()),
            language: Arc::new(language),
            geo: Arc::new(GeoResolver::new(geocoder_tier)),
            weather,
            sentiment: Arc::new(sentiment),
        }
    }

    /// Run one raw input line through every stage.
    pub async fn process_line(&self, raw_json: &str) -> Outcome {
        match self.validate(raw_json) {
            Ok(record) => self.process(record).await,
            Err(outcome) => outcome,
        }
    }

    /// Run an already-parsed record through every stage after validation.
    pub async fn process(&self, mut record: Record) -> Outcome {
        for step in Step::ALL {
            record = match self.apply(step, record).await {
                Ok(r) => r,
                Err(outcome) => return outcome,
            };
        }
        Outcome::Completed(Box::new(record))
    }

    pub fn validate(&self, raw_json: &str) -> Result<Record, Outcome> {
        self.validator.validate(raw_json).map_err(|e| {
            Outcome::DeadLetter(DeadLetter {
                id: raw_id(raw_json),
                stage: ProcessingStage::Parsed.to_string(),
                reason: e.to_string(),
                raw_json: Some(raw_json.to_string()),
            })
        })
    }

    /// Apply a single stage. `Err` means the record leaves the pipeline here.
    pub async fn apply(&self, step: Step, record: Record) -> Result<Record, Outcome> {
        match step {
            Step::Dedup => self.deduplicate(record),
            Step::Clean => self.clean(record),
            Step::Language => Ok(self.resolve_language(record).await),
            Step::Geo => Ok(self.resolve_geo(record).await),
            Step::Weather => Ok(self.match_weather(record).await),
            Step::Sentiment => Ok(self.score_sentiment(record).await),
        }
    }

    fn deduplicate(&self, mut record: Record) -> Result<Record, Outcome> {
        match self.dedup.check(&record) {
            DedupVerdict::Admitted => {
                record.advance(ProcessingStage::Deduplicated);
                Ok(record)
            }
            verdict => {
                debug!(record_id = %record.id, verdict = verdict.as_str(), "Dropped duplicate");
                Err(Outcome::Dropped {
                    id: record.id,
                    verdict,
                })
            }
        }
    }

    fn clean(&self, mut record: Record) -> Result<Record, Outcome> {
        match self.text.enrich_record(&record) {
            Ok(enrichment) => {
                record.attach_text(enrichment);
                record.advance(ProcessingStage::Cleaned);
                Ok(record)
            }
            Err(e) if e.is_fatal_for_record() => {
                warn!(record_id = %record.id, error = %e, "Text enrichment failed");
                Err(Outcome::DeadLetter(DeadLetter::for_record(
                    &record,
                    ProcessingStage::Cleaned,
                    e.to_string(),
                )))
            }
            Err(e) => {
                warn!(record_id = %record.id, error = %e, "Text enrichment degraded, continuing without clean text");
                record.advance(ProcessingStage::Cleaned);
                Ok(record)
            }
        }
    }

    async fn resolve_language(&self, mut record: Record) -> Record {
        let result = self
            .language
            .resolve(record.clean_text(), &record.declared_lang)
            .await;
        record.attach_language(result);
        record.advance(ProcessingStage::LanguageResolved);
        record
    }

    async fn resolve_geo(&self, mut record: Record) -> Record {
        let result = self.geo.resolve(&record).await;
        record.attach_geo(result);
        record.advance(ProcessingStage::GeoResolved);
        record
    }

    async fn match_weather(&self, mut record: Record) -> Record {
        let result = match (&self.weather, &record.geo) {
            (Some(matcher), Some(geo)) => matcher.match_geo(geo, record.created_at).await,
            (_, _) if record.geo_confidence() == GeoConfidence::Unavailable => {
                WeatherResult::empty(MatchQuality::NoGeolocation)
            }
            (_, _) => WeatherResult::empty(MatchQuality::NoStation),
        };
        record.attach_weather(result);
        record.advance(ProcessingStage::WeatherMatched);
        record
    }

    async fn score_sentiment(&self, mut record: Record) -> Record {
        let language = record
            .language
            .as_ref()
            .map(|l| l.lang.clone())
            .unwrap_or_else(|| normalize_language_label(&record.declared_lang));
        let result = self
            .sentiment
            .fuse(record.clean_text(), &language, record.emoji_sentiment_score())
            .await;
        record.attach_sentiment(result);
        record.advance(ProcessingStage::SentimentScored);
        record
    }

    /// Snapshot of every stage's counters.
    pub fn report(&self, totals: RunTotals) -> RunReport {
        RunReport {
            totals,
            validator: self.validator.stats(),
            dedup: self.dedup.stats(),
            text: self.text.stats(),
            language: self.language.stats(),
            geo: self.geo.stats(),
            weather: self.weather.as_ref().map(|w| w.stats()),
            sentiment: self.sentiment.stats(),
        }
    }
}

impl Default for Enricher {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Best-effort id from a line that failed validation.
fn raw_id(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let id = value.get("id").or_else(|| value.get("tweet_id"))?;
    match id {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
