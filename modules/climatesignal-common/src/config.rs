use anyhow::Result;

pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org";
pub const DEFAULT_GEOCODER_USER_AGENT: &str = "climatesignal/0.1";

/// Application configuration loaded from environment variables.
/// Contains only secrets and collaborator endpoints; stage tuning
/// lives in the TOML FileConfig.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Weather data (NOAA Climate Data Online)
    pub noaa_api_token: Option<String>,

    // Geocoding (Nominatim-compatible)
    pub geocoder_url: String,
    pub geocoder_user_agent: String,

    // Hosted model endpoints
    pub langid_model_url: Option<String>,
    pub sentiment_primary_model_url: Option<String>,
    pub sentiment_multilingual_model_url: Option<String>,
    pub inference_api_token: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            noaa_api_token: non_empty_env("NOAA_API_TOKEN"),
            geocoder_url: non_empty_env("GEOCODER_URL")
                .unwrap_or_else(|| DEFAULT_GEOCODER_URL.to_string()),
            geocoder_user_agent: non_empty_env("GEOCODER_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_GEOCODER_USER_AGENT.to_string()),
            langid_model_url: non_empty_env("LANGID_MODEL_URL"),
            sentiment_primary_model_url: non_empty_env("SENTIMENT_PRIMARY_MODEL_URL"),
            sentiment_multilingual_model_url: non_empty_env("SENTIMENT_MULTILINGUAL_MODEL_URL"),
            inference_api_token: non_empty_env("INFERENCE_API_TOKEN"),
        };

        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let n = val
                .char_indices()
                .nth(5)
                .map(|(i, _)| i)
                .unwrap_or(val.len());
            format!("{}...({} chars)", &val[..n], val.len())
        }
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => preview(v),
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  NOAA_API_TOKEN: {}", preview_opt(&self.noaa_api_token));
        tracing::info!("  GEOCODER_URL: {}", self.geocoder_url);
        tracing::info!("  GEOCODER_USER_AGENT: {}", self.geocoder_user_agent);
        tracing::info!("  LANGID_MODEL_URL: {}", opt_or_unset(&self.langid_model_url));
        tracing::info!(
            "  SENTIMENT_PRIMARY_MODEL_URL: {}",
            opt_or_unset(&self.sentiment_primary_model_url)
        );
        tracing::info!(
            "  SENTIMENT_MULTILINGUAL_MODEL_URL: {}",
            opt_or_unset(&self.sentiment_multilingual_model_url)
        );
        tracing::info!("  INFERENCE_API_TOKEN: {}", preview_opt(&self.inference_api_token));
    }
}

fn opt_or_unset(val: &Option<String>) -> &str {
    val.as_deref().unwrap_or("<not set>")
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
