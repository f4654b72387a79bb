//! SentimentFuser: language-routed model score plus a damped emoji adjustment.
//!
//! Routing: the primary model for the primary language, the multilingual
//! model otherwise. If the routed model is missing or fails, the valence
//! lexicon scores the text; with no lexicon the result is neutral.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use tracing::{info, warn};

use climatesignal_common::{round_to, EnrichError, SentimentLabel, SentimentMethod, SentimentResult};
use inference_client::truncate_chars;

use super::STATS_INTERVAL;
use crate::traits::{Prediction, TextClassifier};

pub const DEFAULT_MAX_INPUT_CHARS: usize = 512;

const EMOJI_WEIGHT: f64 = 0.2;
const EMOJI_CAP: f64 = 0.2;
const POSITIVE_THRESHOLD: f64 = 0.3;
const NEGATIVE_THRESHOLD: f64 = -0.3;

// ---------------------------------------------------------------------------
// Fusion rule
// ---------------------------------------------------------------------------

pub fn emoji_adjustment(emoji_sentiment_score: f64) -> f64 {
    (emoji_sentiment_score * EMOJI_WEIGHT).clamp(-EMOJI_CAP, EMOJI_CAP)
}

/// `clamp(model + clamp(emoji * 0.2, ±0.2), -1, 1)`.
pub fn fuse_scores(model_score: f64, emoji_sentiment_score: f64) -> f64 {
    (model_score + emoji_adjustment(emoji_sentiment_score)).clamp(-1.0, 1.0)
}

pub fn label_for(score: f64) -> SentimentLabel {
    if score > POSITIVE_THRESHOLD {
        SentimentLabel::Positive
    } else if score < NEGATIVE_THRESHOLD {
        SentimentLabel::Negative
    } else {
        SentimentLabel::Neutral
    }
}

/// Signed score for a model label: positive -> +confidence, negative ->
/// -confidence, anything else 0.
pub fn signed_score(prediction: &Prediction) -> f64 {
    let label = prediction.label.trim().to_uppercase();
    if label.contains("POSITIVE") || label == "POS" || label == "LABEL_2" {
        prediction.confidence
    } else if label.contains("NEGATIVE") || label == "NEG" || label == "LABEL_0" {
        -prediction.confidence
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Valence lexicon
// ---------------------------------------------------------------------------

/// Word valences on a -4..4 scale.
const VALENCE: &[(&str, f64)] = &[
    ("amazing", 2.8), ("awesome", 3.1), ("beautiful", 2.9), ("best", 3.2), ("better", 1.9),
    ("calm", 1.3), ("clear", 1.6), ("cool", 1.3), ("enjoy", 2.2), ("excellent", 2.7),
    ("fantastic", 2.6), ("fine", 0.8), ("fresh", 1.3), ("fun", 2.3), ("glad", 2.0),
    ("good", 1.9), ("great", 3.1), ("happy", 2.7), ("hope", 1.9), ("love", 3.2),
    ("lovely", 2.8), ("nice", 1.8), ("perfect", 2.7), ("pleasant", 2.3), ("relief", 2.1),
    ("safe", 1.9), ("thank", 1.5), ("thanks", 1.9), ("warm", 0.9), ("wonderful", 2.7),
    ("afraid", -2.2), ("angry", -2.3), ("awful", -2.0), ("bad", -2.5), ("crisis", -3.1),
    ("damage", -2.2), ("danger", -2.4), ("dangerous", -2.1), ("dead", -3.3), ("death", -2.9),
    ("destroyed", -2.7), ("devastating", -3.1), ("disaster", -3.1), ("emergency", -1.6),
    ("fear", -2.2), ("hate", -2.7), ("horrible", -2.5), ("hurt", -2.4), ("killed", -3.5),
    ("lost", -1.3), ("miserable", -2.2), ("sad", -2.1), ("scared", -1.9), ("scary", -2.2),
    ("suffering", -2.1), ("terrible", -2.1), ("threat", -2.4), ("tragic", -3.4),
    ("ugh", -1.8), ("unbearable", -2.3), ("unsafe", -2.0), ("worried", -1.2), ("worse", -2.1),
    ("worst", -3.1),
];

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "none", "nobody", "nothing", "neither", "nor", "cannot", "without",
];

/// Intensity modifiers and their scalar increments.
const BOOSTERS: &[(&str, f64)] = &[
    ("absolutely", 0.293), ("completely", 0.293), ("extremely", 0.293), ("incredibly", 0.293),
    ("really", 0.293), ("so", 0.293), ("totally", 0.293), ("very", 0.293),
    ("barely", -0.293), ("hardly", -0.293), ("kind", -0.293), ("slightly", -0.293),
    ("somewhat", -0.293),
];

const NEGATION_SCALAR: f64 = -0.74;
const NORMALIZATION_ALPHA: f64 = 15.0;

static VALENCE_MAP: LazyLock<HashMap<&'static str, f64>> =
    LazyLock::new(|| VALENCE.iter().copied().collect());
static BOOSTER_MAP: LazyLock<HashMap<&'static str, f64>> =
    LazyLock::new(|| BOOSTERS.iter().copied().collect());

/// VADER-style polarity scorer: word valences, boosters and negation in a
/// three-word window, normalized to [-1, 1].
#[derive(Debug, Clone, Copy, Default)]
pub struct ValenceLexicon;

impl ValenceLexicon {
    /// Compound score in [-1, 1].
    pub fn compound(&self, text: &str) -> f64 {
        let tokens: Vec<String> = text
            .split_whitespace()
            .map(|t| {
                t.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                    .to_lowercase()
            })
            .filter(|t| !t.is_empty())
            .collect();

        let mut total = 0.0;
        for (i, token) in tokens.iter().enumerate() {
            let Some(&valence) = VALENCE_MAP.get(token.as_str()) else {
                continue;
            };
            let mut value = valence;
            let window = &tokens[i.saturating_sub(3)..i];
            for prior in window {
                if let Some(&boost) = BOOSTER_MAP.get(prior.as_str()) {
                    value += if value > 0.0 { boost } else { -boost };
                }
            }
            if window.iter().any(|w| is_negation(w)) {
                value *= NEGATION_SCALAR;
            }
            total += value;
        }

        if total == 0.0 {
            return 0.0;
        }
        (total / (total * total + NORMALIZATION_ALPHA).sqrt()).clamp(-1.0, 1.0)
    }
}

fn is_negation(word: &str) -> bool {
    NEGATIONS.contains(&word) || word.ends_with("n't")
}

// ---------------------------------------------------------------------------
// SentimentFuser
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Counters {
    positive: AtomicU64,
    neutral: AtomicU64,
    negative: AtomicU64,
    model: AtomicU64,
    lexicon: AtomicU64,
    unavailable: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SentimentStats {
    pub processed: u64,
    pub positive: u64,
    pub neutral: u64,
    pub negative: u64,
    pub model: u64,
    pub lexicon: u64,
    pub unavailable: u64,
}

pub struct SentimentFuser {
    primary_language: String,
    primary: Option<Arc<dyn TextClassifier>>,
    multilingual: Option<Arc<dyn TextClassifier>>,
    lexicon: Option<ValenceLexicon>,
    max_input_chars: usize,
    processed: AtomicU64,
    counters: Counters,
}

impl SentimentFuser {
    pub fn new(
        primary_language: impl Into<String>,
        primary: Option<Arc<dyn TextClassifier>>,
        multilingual: Option<Arc<dyn TextClassifier>>,
        lexicon: Option<ValenceLexicon>,
    ) -> Self {
        Self {
            primary_language: primary_language.into(),
            primary,
            multilingual,
            lexicon,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            processed: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    pub async fn fuse(&self, clean_text: &str, language: &str, emoji_sentiment_score: f64) -> SentimentResult {
        let result = self.score(clean_text, language, emoji_sentiment_score).await;
        self.record(&result);
        result
    }

    async fn score(&self, clean_text: &str, language: &str, emoji_sentiment_score: f64) -> SentimentResult {
        if clean_text.trim().is_empty() {
            return SentimentResult::neutral(SentimentMethod::EmptyText);
        }
        let text = truncate_chars(clean_text, self.max_input_chars);

        let (routed, method) = if language == self.primary_language {
            (self.primary.as_ref(), SentimentMethod::PrimaryModel)
        } else {
            (self.multilingual.as_ref(), SentimentMethod::MultilingualModel)
        };

        if let Some(model) = routed {
            match model.predict(text).await {
                Ok(Some(prediction)) => {
                    return finish(signed_score(&prediction), prediction.confidence, method, emoji_sentiment_score);
                }
                Ok(None) => {
                    warn!(model = model.name(), "Sentiment model returned no labels, using lexicon");
                }
                Err(e) => {
                    let err = EnrichError::ModelUnavailable(format!("{}: {e}", model.name()));
                    warn!(error = %err, "Sentiment model failed, using lexicon");
                }
            }
        }

        match &self.lexicon {
            Some(lexicon) => {
                let compound = lexicon.compound(text);
                finish(compound, compound.abs(), SentimentMethod::Lexicon, emoji_sentiment_score)
            }
            None => SentimentResult::neutral(SentimentMethod::Unavailable),
        }
    }

    fn record(&self, result: &SentimentResult) {
        let label = match result.label {
            SentimentLabel::Positive => &self.counters.positive,
            SentimentLabel::Neutral => &self.counters.neutral,
            SentimentLabel::Negative => &self.counters.negative,
        };
        label.fetch_add(1, Ordering::Relaxed);
        let method = match result.method {
            SentimentMethod::PrimaryModel | SentimentMethod::MultilingualModel => &self.counters.model,
            SentimentMethod::Lexicon => &self.counters.lexicon,
            SentimentMethod::EmptyText | SentimentMethod::Unavailable => &self.counters.unavailable,
        };
        method.fetch_add(1, Ordering::Relaxed);

        let n = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if n % STATS_INTERVAL == 0 {
            let stats = self.stats();
            info!(
                processed = stats.processed,
                positive = stats.positive,
                neutral = stats.neutral,
                negative = stats.negative,
                model = stats.model,
                lexicon = stats.lexicon,
                unavailable = stats.unavailable,
                "Sentiment stats"
            );
        }
    }

    pub fn stats(&self) -> SentimentStats {
        SentimentStats {
            processed: self.processed.load(Ordering::Relaxed),
            positive: self.counters.positive.load(Ordering::Relaxed),
            neutral: self.counters.neutral.load(Ordering::Relaxed),
            negative: self.counters.negative.load(Ordering::Relaxed),
            model: self.counters.model.load(Ordering::Relaxed),
            lexicon: self.counters.lexicon.load(Ordering::Relaxed),
            unavailable: self.counters.unavailable.load(Ordering::Relaxed),
        }
    }
}

fn finish(model_score: f64, confidence: f64, method: SentimentMethod, emoji_sentiment_score: f64) -> SentimentResult {
    let score = round_to(fuse_scores(model_score, emoji_sentiment_score), 3);
    SentimentResult {
        score,
        label: label_for(score),
        method,
        confidence: round_to(confidence.clamp(0.0, 1.0), 3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingClassifier, FixedClassifier};

    fn fuser(
        primary: Option<Arc<dyn TextClassifier>>,
        multilingual: Option<Arc<dyn TextClassifier>>,
        lexicon: Option<ValenceLexicon>,
    ) -> SentimentFuser {
        SentimentFuser::new("en", primary, multilingual, lexicon)
    }

    #[test]
    fn zero_emoji_score_leaves_model_score_alone() {
        for score in [-1.0, -0.42, 0.0, 0.3, 0.77, 1.0] {
            assert_eq!(fuse_scores(score, 0.0), score);
        }
    }

    #[test]
    fn emoji_adjustment_is_capped() {
        assert_eq!(emoji_adjustment(5.0), 0.2);
        assert_eq!(emoji_adjustment(-5.0), -0.2);
        assert!((fuse_scores(0.1, 5.0) - 0.3).abs() < 1e-12);
        assert_eq!(fuse_scores(0.95, 5.0), 1.0);
        assert!((emoji_adjustment(0.8) - 0.16).abs() < 1e-12);
    }

    #[test]
    fn labels_use_strict_thresholds() {
        assert_eq!(label_for(0.3), SentimentLabel::Neutral);
        assert_eq!(label_for(0.301), SentimentLabel::Positive);
        assert_eq!(label_for(-0.3), SentimentLabel::Neutral);
        assert_eq!(label_for(-0.31), SentimentLabel::Negative);
    }

    #[test]
    fn model_labels_map_to_signs() {
        assert_eq!(signed_score(&Prediction::new("POSITIVE", 0.9)), 0.9);
        assert_eq!(signed_score(&Prediction::new("negative", 0.8)), -0.8);
        assert_eq!(signed_score(&Prediction::new("LABEL_0", 0.6)), -0.6);
        assert_eq!(signed_score(&Prediction::new("LABEL_1", 0.99)), 0.0);
        assert_eq!(signed_score(&Prediction::new("neutral", 0.7)), 0.0);
    }

    #[test]
    fn lexicon_handles_negation_and_boosters() {
        let lexicon = ValenceLexicon;
        let good = lexicon.compound("the weather is good");
        let very_good = lexicon.compound("the weather is very good");
        let not_good = lexicon.compound("the weather is not good");
        assert!(good > 0.0);
        assert!(very_good > good);
        assert!(not_good < 0.0);
        assert!(lexicon.compound("devastating flood, terrible damage") < -0.5);
        assert_eq!(lexicon.compound("the river is at twelve feet"), 0.0);
    }

    #[tokio::test]
    async fn primary_language_routes_to_primary_model() {
        let primary: Arc<dyn TextClassifier> = Arc::new(FixedClassifier::new("POSITIVE", 0.9));
        let multi: Arc<dyn TextClassifier> = Arc::new(FixedClassifier::new("NEGATIVE", 0.9));
        let f = fuser(Some(primary), Some(multi), None);

        let en = f.fuse("lovely day", "en", 0.0).await;
        assert_eq!(en.method, SentimentMethod::PrimaryModel);
        assert_eq!(en.score, 0.9);
        assert_eq!(en.label, SentimentLabel::Positive);

        let es = f.fuse("qué día", "es", 0.0).await;
        assert_eq!(es.method, SentimentMethod::MultilingualModel);
        assert_eq!(es.score, -0.9);
        assert_eq!(es.label, SentimentLabel::Negative);
    }

    #[tokio::test]
    async fn emoji_nudges_model_score() {
        let primary: Arc<dyn TextClassifier> = Arc::new(FixedClassifier::new("POSITIVE", 0.2));
        let f = fuser(Some(primary), None, None);
        let result = f.fuse("ok then", "en", 0.8).await;
        assert_eq!(result.score, 0.36);
        assert_eq!(result.label, SentimentLabel::Positive);
        assert_eq!(result.confidence, 0.2);
    }

    #[tokio::test]
    async fn failing_model_falls_back_to_lexicon() {
        let primary: Arc<dyn TextClassifier> = Arc::new(FailingClassifier::new("sentiment-en"));
        let f = fuser(Some(primary), None, Some(ValenceLexicon));
        let result = f.fuse("this heat is terrible", "en", 0.0).await;
        assert_eq!(result.method, SentimentMethod::Lexicon);
        assert!(result.score < 0.0);
        assert_eq!(result.confidence, result.score.abs());
    }

    #[tokio::test]
    async fn missing_routed_model_uses_lexicon() {
        let primary: Arc<dyn TextClassifier> = Arc::new(FixedClassifier::new("POSITIVE", 0.9));
        let f = fuser(Some(primary), None, Some(ValenceLexicon));
        let result = f.fuse("un día horrible", "es", 0.0).await;
        assert_eq!(result.method, SentimentMethod::Lexicon);
    }

    #[tokio::test]
    async fn nothing_available_is_neutral() {
        let f = fuser(None, None, None);
        let result = f.fuse("great news", "en", 5.0).await;
        assert_eq!(result, SentimentResult::neutral(SentimentMethod::Unavailable));
        assert_eq!(f.stats().unavailable, 1);
    }

    #[tokio::test]
    async fn empty_text_short_circuits() {
        let primary: Arc<dyn TextClassifier> = Arc::new(FixedClassifier::new("POSITIVE", 0.9));
        let f = fuser(Some(primary), None, Some(ValenceLexicon));
        let result = f.fuse("   ", "en", 1.0).await;
        assert_eq!(result.method, SentimentMethod::EmptyText);
        assert_eq!(result.score, 0.0);
    }

    #[tokio::test]
    async fn input_is_truncated_before_scoring() {
        let primary = Arc::new(FixedClassifier::new("POSITIVE", 0.9));
        let f = SentimentFuser::new("en", Some(primary.clone() as Arc<dyn TextClassifier>), None, None)
            .with_max_input_chars(5);
        f.fuse("abcdefghij", "en", 0.0).await;
        assert_eq!(primary.last_input().as_deref(), Some("abcde"));
    }
}
