use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// TOML-backed stage tuning loaded from disk.
/// Secrets and endpoints stay as env vars (see `AppConfig`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub dedup: DedupConfig,
    pub language: LanguageConfig,
    pub geo: GeoConfig,
    pub weather: WeatherConfig,
    pub sentiment: SentimentConfig,
    pub workers: WorkersConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupConfig {
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LanguageConfig {
    pub min_text_chars: usize,
    pub primary_threshold: f64,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 10,
            primary_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeoConfig {
    pub geocode_cache_ttl_secs: u64,
    pub geocode_requests_per_second: u32,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            geocode_cache_ttl_secs: 7 * 24 * 3600,
            geocode_requests_per_second: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeatherConfig {
    pub station_radius_km: f64,
    pub window_minutes: i64,
    pub station_cache_ttl_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            station_radius_km: 50.0,
            window_minutes: 60,
            station_cache_ttl_secs: 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SentimentConfig {
    pub primary_language: String,
    pub max_input_chars: usize,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            primary_language: "en".to_string(),
            max_input_chars: 512,
        }
    }
}

/// Worker counts per stage. Network-bound stages get more workers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkersConfig {
    pub validate: usize,
    pub dedup: usize,
    pub text: usize,
    pub language: usize,
    pub geo: usize,
    pub weather: usize,
    pub sentiment: usize,
    pub channel_capacity: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            validate: 2,
            dedup: 1,
            text: 4,
            language: 2,
            geo: 4,
            weather: 8,
            sentiment: 2,
            channel_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub buffer_size: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    if config.workers.dedup != 1 {
        tracing::warn!(
            requested = config.workers.dedup,
            "Dedup stage runs as a single instance; ignoring worker count"
        );
        config.workers.dedup = 1;
    }
    Ok(config)
}
