//! TextEnricher: Unicode normalization, emoji extraction, hashtag
//! decomposition, URL stripping, contraction expansion and lexical features.
//!
//! The transforms run in a fixed order; each assumes the previous ones ran.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::info;
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

use climatesignal_common::{round_to, EnrichError, Record, TextEnrichment, TextFeatures};

use super::STATS_INTERVAL;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+|www\.\S+").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static HASHTAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\w+)").unwrap());
static CAMEL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([a-z])([A-Z])").unwrap());
static LETTER_DIGIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-zA-Z])(\d)").unwrap());

/// Emoji valence in [-1, 1]. Keys are stored without variation selectors.
const EMOJI_SENTIMENT: &[(&str, f64)] = &[
    // Positive
    ("😊", 0.8), ("😃", 0.9), ("😄", 0.9), ("😁", 0.8), ("🙂", 0.6), ("😀", 0.9),
    ("😍", 1.0), ("🥰", 1.0), ("😘", 0.9), ("💕", 0.9), ("❤", 0.9), ("💖", 0.9),
    ("👍", 0.7), ("👏", 0.7), ("🙌", 0.8), ("✨", 0.6), ("🌟", 0.7), ("⭐", 0.6),
    // Negative
    ("😢", -0.8), ("😭", -0.9), ("😞", -0.7), ("😔", -0.7), ("☹", -0.6), ("🙁", -0.6),
    ("😠", -0.9), ("😡", -1.0), ("🤬", -1.0), ("😤", -0.8), ("💔", -0.9),
    ("😱", -0.8), ("😨", -0.7), ("😰", -0.7), ("😓", -0.6), ("😖", -0.7),
    // Weather
    ("🌞", 0.7), ("☀", 0.6), ("🌈", 0.8), ("🌸", 0.6), ("🌺", 0.6),
    ("🌊", 0.0), ("💧", 0.0), ("🌧", -0.3), ("⛈", -0.5), ("🌪", -0.7),
    ("🔥", -0.4), ("💨", -0.2), ("❄", 0.0), ("🌡", 0.0),
];

static EMOJI_LEXICON: LazyLock<HashMap<&'static str, f64>> =
    LazyLock::new(|| EMOJI_SENTIMENT.iter().copied().collect());

const CONTRACTIONS: &[(&str, &str)] = &[
    ("ain't", "are not"),
    ("aren't", "are not"),
    ("can't", "cannot"),
    ("couldn't", "could not"),
    ("could've", "could have"),
    ("didn't", "did not"),
    ("doesn't", "does not"),
    ("don't", "do not"),
    ("hadn't", "had not"),
    ("hasn't", "has not"),
    ("haven't", "have not"),
    ("he'd", "he would"),
    ("he'll", "he will"),
    ("he's", "he is"),
    ("how's", "how is"),
    ("i'd", "I would"),
    ("i'll", "I will"),
    ("i'm", "I am"),
    ("i've", "I have"),
    ("isn't", "is not"),
    ("it'd", "it would"),
    ("it'll", "it will"),
    ("it's", "it is"),
    ("let's", "let us"),
    ("mightn't", "might not"),
    ("might've", "might have"),
    ("mustn't", "must not"),
    ("must've", "must have"),
    ("shan't", "shall not"),
    ("she'd", "she would"),
    ("she'll", "she will"),
    ("she's", "she is"),
    ("shouldn't", "should not"),
    ("should've", "should have"),
    ("that's", "that is"),
    ("there's", "there is"),
    ("they'd", "they would"),
    ("they'll", "they will"),
    ("they're", "they are"),
    ("they've", "they have"),
    ("wasn't", "was not"),
    ("we'd", "we would"),
    ("we'll", "we will"),
    ("we're", "we are"),
    ("we've", "we have"),
    ("weren't", "were not"),
    ("what's", "what is"),
    ("where's", "where is"),
    ("who's", "who is"),
    ("won't", "will not"),
    ("wouldn't", "would not"),
    ("would've", "would have"),
    ("y'all", "you all"),
    ("you'd", "you would"),
    ("you'll", "you will"),
    ("you're", "you are"),
    ("you've", "you have"),
];

static CONTRACTION_MAP: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| CONTRACTIONS.iter().copied().collect());

// Straight and curly apostrophes both match.
static CONTRACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = CONTRACTIONS
        .iter()
        .map(|(from, _)| regex::escape(from).replace('\'', "['’]"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).unwrap()
});

// ---------------------------------------------------------------------------
// Pure transforms
// ---------------------------------------------------------------------------

/// Collapse whitespace runs to one space and trim. Idempotent.
pub fn normalize_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text, " ").trim().to_string()
}

/// `ClimateChange2024` -> `climate change 2024`.
pub fn decompose_hashtag(tag: &str) -> String {
    let spaced = CAMEL_RE.replace_all(tag, "$1 $2");
    let spaced = LETTER_DIGIT_RE.replace_all(&spaced, "$1 $2");
    spaced.to_lowercase()
}

/// Replace every `#tag` occurrence whose whole tag is in `decomposed`.
/// Tags are matched to the end of the word, so `#Climate` never claims the
/// front of `#ClimateChange`.
pub fn substitute_hashtags(text: &str, decomposed: &HashMap<&str, String>) -> String {
    HASHTAG_RE
        .replace_all(text, |caps: &Captures| match decomposed.get(&caps[1]) {
            Some(phrase) => phrase.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

pub fn strip_urls(text: &str) -> String {
    URL_RE.replace_all(text, "").into_owned()
}

/// Best-effort contraction expansion; unknown forms are left alone.
pub fn expand_contractions(text: &str) -> String {
    CONTRACTION_RE
        .replace_all(text, |caps: &Captures| {
            let matched = &caps[0];
            let key = matched.to_lowercase().replace('’', "'");
            let Some(expansion) = CONTRACTION_MAP.get(key.as_str()) else {
                return matched.to_string();
            };
            match_case(matched, expansion)
        })
        .into_owned()
}

fn match_case(original: &str, expansion: &str) -> String {
    let letters: Vec<char> = original.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() > 1 && letters.iter().all(|c| c.is_uppercase()) {
        return expansion.to_uppercase();
    }
    if original.chars().next().is_some_and(char::is_uppercase) {
        let mut chars = expansion.chars();
        return match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
    }
    expansion.to_string()
}

fn strip_modifiers(grapheme: &str) -> String {
    grapheme
        .chars()
        .filter(|c| *c != '\u{FE0F}' && !('\u{1F3FB}'..='\u{1F3FF}').contains(c))
        .collect()
}

fn lookup_emoji(grapheme: &str) -> Option<&'static emojis::Emoji> {
    emojis::get(grapheme).or_else(|| emojis::get(&strip_modifiers(grapheme)))
}

/// `smiling face with smiling eyes` -> `smiling_face_with_smiling_eyes`.
fn emoji_token(emoji: &emojis::Emoji) -> String {
    let mut token = String::new();
    for c in emoji.name().chars() {
        if c.is_alphanumeric() {
            token.extend(c.to_lowercase());
        } else if !token.ends_with('_') {
            token.push('_');
        }
    }
    token.trim_matches('_').to_string()
}

/// Emoji found in the text, its valence sum, and the text with each emoji
/// replaced by ` :name: `.
pub fn extract_emoji(text: &str) -> (Vec<String>, f64, String) {
    let mut found = Vec::new();
    let mut score = 0.0;
    let mut out = String::with_capacity(text.len());

    for grapheme in text.graphemes(true) {
        match lookup_emoji(grapheme) {
            Some(emoji) => {
                score += EMOJI_LEXICON
                    .get(strip_modifiers(grapheme).as_str())
                    .copied()
                    .unwrap_or(0.0);
                found.push(grapheme.to_string());
                out.push_str(" :");
                out.push_str(&emoji_token(emoji));
                out.push_str(": ");
            }
            None => out.push_str(grapheme),
        }
    }
    (found, round_to(score, 3), out)
}

// ---------------------------------------------------------------------------
// TextEnricher
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct TextEnricher {
    processed: AtomicU64,
    failed: AtomicU64,
    with_emoji: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextStats {
    pub processed: u64,
    pub failed: u64,
    pub with_emoji: u64,
}

impl TextEnricher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enrich a record's text, carrying its parsed entity counts into the features.
    pub fn enrich_record(&self, record: &Record) -> Result<TextEnrichment, EnrichError> {
        let n = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        let result = self.enrich(&record.text, &record.hashtags).map(|mut enrichment| {
            let features = &mut enrichment.features;
            features.mention_count = record.mentions.len();
            features.url_count = record.urls.len();
            features.has_media = features.url_count > 0;
            enrichment
        });

        match &result {
            Ok(e) if e.features.emoji_count > 0 => {
                self.with_emoji.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        if n % STATS_INTERVAL == 0 {
            let stats = self.stats();
            info!(
                processed = stats.processed,
                failed = stats.failed,
                with_emoji = stats.with_emoji,
                "Text enrichment stats"
            );
        }
        result
    }

    /// Run the transform chain over `text`. Mention and URL counts are left
    /// at zero; `enrich_record` fills them from the parsed entities.
    pub fn enrich(&self, text: &str, hashtags: &[String]) -> Result<TextEnrichment, EnrichError> {
        if text.trim().is_empty() {
            return Err(EnrichError::TextTransform("empty input text".to_string()));
        }

        let normalized: String = text.nfkc().collect();
        let (emoji, emoji_sentiment_score, working) = extract_emoji(&normalized);

        let mut decomposed_hashtags = Vec::with_capacity(hashtags.len());
        let mut by_tag = HashMap::with_capacity(hashtags.len());
        for tag in hashtags.iter().filter(|t| !t.is_empty()) {
            let decomposed = decompose_hashtag(tag);
            by_tag.insert(tag.as_str(), decomposed.clone());
            decomposed_hashtags.push(decomposed);
        }

        let working = substitute_hashtags(&working, &by_tag);
        let working = strip_urls(&working);
        let working = expand_contractions(&working);
        let clean_text = normalize_whitespace(&working);

        let text_length = clean_text.chars().count();
        let word_count = clean_text.split_whitespace().count();
        let avg_word_length = if word_count > 0 {
            round_to(text_length as f64 / word_count as f64, 2)
        } else {
            0.0
        };

        Ok(TextEnrichment {
            text_original: text.to_string(),
            clean_text,
            features: TextFeatures {
                hashtag_count: hashtags.len(),
                mention_count: 0,
                url_count: 0,
                emoji_count: emoji.len(),
                emoji_sentiment_score,
                text_length,
                word_count,
                has_media: false,
                avg_word_length,
            },
            emoji,
            decomposed_hashtags,
        })
    }

    pub fn stats(&self) -> TextStats {
        TextStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            with_emoji: self.with_emoji.load(Ordering::Relaxed),
        }
    }
}
