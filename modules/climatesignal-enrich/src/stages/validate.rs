//! Validator/Normalizer: raw JSON line in, typed `Record` out.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, info};

use climatesignal_common::{EnrichError, EntityRef, IdField, ProcessingStage, RawRecord, Record};

use super::STATS_INTERVAL;

#[derive(Default)]
pub struct Validator {
    processed: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidatorStats {
    pub processed: u64,
    pub rejected: u64,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate one raw JSON record.
    pub fn validate(&self, raw_json: &str) -> Result<Record, EnrichError> {
        let n = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        let result = parse_record(raw_json, Utc::now());
        if let Err(ref e) = result {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(error = %e, "Rejected input record");
        }
        if n % STATS_INTERVAL == 0 {
            let stats = self.stats();
            info!(
                processed = stats.processed,
                rejected = stats.rejected,
                "Validator stats"
            );
        }
        result
    }

    pub fn stats(&self) -> ValidatorStats {
        ValidatorStats {
            processed: self.processed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Build a `Record` from raw JSON. Requires `id`, non-blank `text` and a
/// parseable `created_at`.
pub fn parse_record(raw_json: &str, parsed_at: DateTime<Utc>) -> Result<Record, EnrichError> {
    let raw: RawRecord = serde_json::from_str(raw_json)
        .map_err(|e| EnrichError::Validation(format!("invalid JSON: {e}")))?;

    let id = raw
        .id
        .map(IdField::into_string)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EnrichError::Validation("missing required field: id".to_string()))?;

    let text = raw
        .text
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| EnrichError::Validation(format!("record {id}: missing or blank text")))?;

    let created_raw = raw
        .created_at
        .ok_or_else(|| EnrichError::Validation(format!("record {id}: missing created_at")))?;
    let created_at = parse_timestamp(&created_raw).ok_or_else(|| {
        EnrichError::Validation(format!("record {id}: unparseable created_at {created_raw:?}"))
    })?;

    let entities = raw.entities.unwrap_or_default();

    Ok(Record {
        id,
        author_id: raw
            .author_id
            .map(IdField::into_string)
            .unwrap_or_else(|| "unknown".to_string()),
        created_at,
        text,
        declared_lang: raw
            .declared_lang
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
        is_repost: raw.is_repost.unwrap_or(false),
        retweet_count: raw.retweet_count.unwrap_or(0),
        hashtags: flatten(&entities.hashtags),
        mentions: flatten(&entities.mentions),
        urls: flatten(&entities.urls),
        coordinates: raw.coordinates,
        place: raw.place,
        user_location: raw.user_location,
        raw_json: raw_json.to_string(),
        parsed_at,
        text_enrichment: None,
        language: None,
        geo: None,
        weather: None,
        sentiment: None,
        processing_stage: ProcessingStage::Parsed,
    })
}

/// RFC 3339 first, then naive ISO-8601 read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn flatten(refs: &[EntityRef]) -> Vec<String> {
    refs.iter()
        .map(|r| r.value().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}
