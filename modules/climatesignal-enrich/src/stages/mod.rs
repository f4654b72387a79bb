pub mod dedup;
pub mod geo;
pub mod language;
pub mod sentiment;
pub mod text;
pub mod validate;
pub mod weather;

/// Every stage logs a stats line after this many records.
pub const STATS_INTERVAL: u64 = 1000;

pub use dedup::{DedupFilter, DedupVerdict};
pub use geo::GeoResolver;
pub use language::LanguageResolver;
pub use sentiment::SentimentFuser;
pub use text::TextEnricher;
pub use validate::Validator;
pub use weather::WeatherMatcher;
