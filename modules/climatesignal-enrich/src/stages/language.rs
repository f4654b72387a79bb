//! LanguageResolver: confidence-gated fallback chain.
//!
//! short text -> primary classifier -> secondary classifier -> declared language.
//! Each link is a `LanguageStrategy`; the first one to answer wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use climatesignal_common::{round_to, EnrichError, LanguageMethod, LanguageResult};

use super::STATS_INTERVAL;
use crate::traits::{Prediction, TextClassifier};

pub const DEFAULT_MIN_TEXT_CHARS: usize = 10;
pub const DEFAULT_PRIMARY_THRESHOLD: f64 = 0.5;

const SHORT_TEXT_CONFIDENCE: f64 = 0.5;
const FALLBACK_CONFIDENCE: f64 = 0.3;

// ---------------------------------------------------------------------------
// Label normalization
// ---------------------------------------------------------------------------

/// ISO 639-3 to 639-1 for the languages the classifiers commonly report.
fn iso639_1(code: &str) -> Option<&'static str> {
    let mapped = match code {
        "afr" => "af",
        "amh" => "am",
        "ara" | "arb" => "ar",
        "aze" => "az",
        "bel" => "be",
        "ben" => "bn",
        "bul" => "bg",
        "cat" => "ca",
        "ces" => "cs",
        "cmn" | "zho" => "zh",
        "dan" => "da",
        "deu" => "de",
        "ell" => "el",
        "eng" => "en",
        "epo" => "eo",
        "est" => "et",
        "fin" => "fi",
        "fra" => "fr",
        "guj" => "gu",
        "heb" => "he",
        "hin" => "hi",
        "hrv" => "hr",
        "hun" => "hu",
        "hye" => "hy",
        "ind" => "id",
        "ita" => "it",
        "jav" => "jv",
        "jpn" => "ja",
        "kan" => "kn",
        "kat" => "ka",
        "khm" => "km",
        "kor" => "ko",
        "lat" => "la",
        "lav" => "lv",
        "lit" => "lt",
        "mal" => "ml",
        "mar" => "mr",
        "mkd" => "mk",
        "mya" => "my",
        "nep" => "ne",
        "nld" => "nl",
        "nob" | "nor" => "no",
        "ori" => "or",
        "pan" => "pa",
        "pes" | "fas" => "fa",
        "pol" => "pl",
        "por" => "pt",
        "ron" => "ro",
        "rus" => "ru",
        "sin" => "si",
        "slk" => "sk",
        "slv" => "sl",
        "sna" => "sn",
        "spa" => "es",
        "srp" => "sr",
        "swe" => "sv",
        "tam" => "ta",
        "tel" => "te",
        "tgl" => "tl",
        "tha" => "th",
        "tur" => "tr",
        "ukr" => "uk",
        "urd" => "ur",
        "uzb" => "uz",
        "vie" => "vi",
        "yid" => "yi",
        "zul" => "zu",
        _ => return None,
    };
    Some(mapped)
}

/// `__label__en`, `eng_Latn`, `EN` -> `en`. Unknown 3-letter codes pass through.
pub fn normalize_language_label(label: &str) -> String {
    let label = label.trim();
    let label = label.strip_prefix("__label__").unwrap_or(label);
    let base = label
        .split(['_', '-'])
        .next()
        .unwrap_or(label)
        .to_lowercase();
    match iso639_1(&base) {
        Some(code) => code.to_string(),
        None => base,
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LanguageStrategy: Send + Sync {
    fn method(&self) -> LanguageMethod;

    /// `None` passes to the next strategy in the chain.
    async fn attempt(&self, text: &str, declared_lang: &str) -> Option<LanguageResult>;
}

pub struct ShortText {
    pub min_chars: usize,
}

#[async_trait]
impl LanguageStrategy for ShortText {
    fn method(&self) -> LanguageMethod {
        LanguageMethod::ShortText
    }

    async fn attempt(&self, text: &str, declared_lang: &str) -> Option<LanguageResult> {
        if text.trim().chars().count() >= self.min_chars {
            return None;
        }
        Some(LanguageResult {
            lang: normalize_language_label(declared_lang),
            confidence: SHORT_TEXT_CONFIDENCE,
            method: self.method(),
        })
    }
}

/// A classifier link. With a threshold, answers below it fall through.
pub struct Classified {
    classifier: Arc<dyn TextClassifier>,
    method: LanguageMethod,
    threshold: Option<f64>,
}

impl Classified {
    pub fn primary(classifier: Arc<dyn TextClassifier>, threshold: f64) -> Self {
        Self {
            classifier,
            method: LanguageMethod::Primary,
            threshold: Some(threshold),
        }
    }

    pub fn secondary(classifier: Arc<dyn TextClassifier>) -> Self {
        Self {
            classifier,
            method: LanguageMethod::Secondary,
            threshold: None,
        }
    }
}

#[async_trait]
impl LanguageStrategy for Classified {
    fn method(&self) -> LanguageMethod {
        self.method
    }

    async fn attempt(&self, text: &str, _declared_lang: &str) -> Option<LanguageResult> {
        let prediction = match self.classifier.predict(text).await {
            Ok(Some(p)) => p,
            Ok(None) => return None,
            Err(e) => {
                let err = EnrichError::ModelUnavailable(format!("{}: {e}", self.classifier.name()));
                warn!(error = %err, method = ?self.method, "Language classifier failed, falling through");
                return None;
            }
        };

        if let Some(threshold) = self.threshold {
            if prediction.confidence < threshold {
                return None;
            }
        }

        let lang = normalize_language_label(&prediction.label);
        if lang.is_empty() {
            return None;
        }
        Some(LanguageResult {
            lang,
            confidence: round_to(prediction.confidence, 3),
            method: self.method,
        })
    }
}

pub struct DeclaredFallback;

#[async_trait]
impl LanguageStrategy for DeclaredFallback {
    fn method(&self) -> LanguageMethod {
        LanguageMethod::Fallback
    }

    async fn attempt(&self, _text: &str, declared_lang: &str) -> Option<LanguageResult> {
        Some(LanguageResult {
            lang: normalize_language_label(declared_lang),
            confidence: FALLBACK_CONFIDENCE,
            method: self.method(),
        })
    }
}

/// In-process n-gram detector (`whatlang`), a different algorithm family
/// from the hosted primary model.
pub struct NgramClassifier;

#[async_trait]
impl TextClassifier for NgramClassifier {
    fn name(&self) -> &str {
        "whatlang"
    }

    async fn predict(&self, text: &str) -> Result<Option<Prediction>> {
        Ok(whatlang::detect(text).map(|info| Prediction::new(info.lang().code(), info.confidence())))
    }
}

// ---------------------------------------------------------------------------
// LanguageResolver
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MethodCounters {
    short_text: AtomicU64,
    primary: AtomicU64,
    secondary: AtomicU64,
    fallback: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LanguageStats {
    pub processed: u64,
    pub short_text: u64,
    pub primary: u64,
    pub secondary: u64,
    pub fallback: u64,
}

pub struct LanguageResolver {
    strategies: Vec<Box<dyn LanguageStrategy>>,
    processed: AtomicU64,
    counters: MethodCounters,
}

impl LanguageResolver {
    /// The standard chain. Missing classifiers are skipped.
    pub fn new(
        primary: Option<Arc<dyn TextClassifier>>,
        secondary: Option<Arc<dyn TextClassifier>>,
        min_text_chars: usize,
        primary_threshold: f64,
    ) -> Self {
        let mut strategies: Vec<Box<dyn LanguageStrategy>> = vec![Box::new(ShortText {
            min_chars: min_text_chars,
        })];
        if let Some(p) = primary {
            strategies.push(Box::new(Classified::primary(p, primary_threshold)));
        }
        if let Some(s) = secondary {
            strategies.push(Box::new(Classified::secondary(s)));
        }
        strategies.push(Box::new(DeclaredFallback));
        Self::with_strategies(strategies)
    }

    pub fn with_strategies(strategies: Vec<Box<dyn LanguageStrategy>>) -> Self {
        Self {
            strategies,
            processed: AtomicU64::new(0),
            counters: MethodCounters::default(),
        }
    }

    pub async fn resolve(&self, clean_text: &str, declared_lang: &str) -> LanguageResult {
        let mut result = None;
        for strategy in &self.strategies {
            if let Some(found) = strategy.attempt(clean_text, declared_lang).await {
                debug!(method = ?strategy.method(), lang = %found.lang, "Language resolved");
                result = Some(found);
                break;
            }
        }
        let result = result.unwrap_or_else(|| LanguageResult {
            lang: normalize_language_label(declared_lang),
            confidence: FALLBACK_CONFIDENCE,
            method: LanguageMethod::Fallback,
        });

        let counter = match result.method {
            LanguageMethod::ShortText => &self.counters.short_text,
            LanguageMethod::Primary => &self.counters.primary,
            LanguageMethod::Secondary => &self.counters.secondary,
            LanguageMethod::Fallback => &self.counters.fallback,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let n = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if n % STATS_INTERVAL == 0 {
            let stats = self.stats();
            info!(
                processed = stats.processed,
                short_text = stats.short_text,
                primary = stats.primary,
                secondary = stats.secondary,
                fallback = stats.fallback,
                "Language stats"
            );
        }
        result
    }

    pub fn stats(&self) -> LanguageStats {
        LanguageStats {
            processed: self.processed.load(Ordering::Relaxed),
            short_text: self.counters.short_text.load(Ordering::Relaxed),
            primary: self.counters.primary.load(Ordering::Relaxed),
            secondary: self.counters.secondary.load(Ordering::Relaxed),
            fallback: self.counters.fallback.load(Ordering::Relaxed),
        }
    }
}
