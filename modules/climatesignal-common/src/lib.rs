pub mod types;
pub mod config;
pub mod error;
pub mod file_config;

pub use types::*;
pub use config::AppConfig;
pub use error::EnrichError;
pub use file_config::{
    load_config, DedupConfig, FileConfig, GeoConfig, LanguageConfig, OutputConfig, SentimentConfig,
    WeatherConfig, WorkersConfig,
};
