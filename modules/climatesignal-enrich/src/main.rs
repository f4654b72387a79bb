use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use climatesignal_common::{load_config, AppConfig, FileConfig};
use climatesignal_enrich::infra::adapters::{HostedClassifier, NoaaWeatherSource, NominatimGeocoder};
use climatesignal_enrich::infra::{JsonLinesSink, MemoryCacheStore};
use climatesignal_enrich::pipeline::workers::run_pool;
use climatesignal_enrich::pipeline::{Collaborators, Enricher};
use climatesignal_enrich::traits::{CacheStore, Geocoder, TextClassifier, WeatherSource};
use geocoder_client::NominatimClient;
use inference_client::InferenceClient;
use noaa_client::NoaaClient;

#[derive(Parser)]
#[command(name = "climatesignal", about = "Enrich climate and weather social-media records")]
struct Cli {
    /// JSON-lines input file; reads stdin when omitted
    input: Option<PathBuf>,

    /// Path to tuning TOML file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where enriched records are appended
    #[arg(long, default_value = "./enriched.jsonl")]
    output: PathBuf,

    /// Where rejected records are appended
    #[arg(long, default_value = "./dead_letter.jsonl")]
    dead_letter: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

fn collaborators(config: &AppConfig) -> Collaborators {
    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
    let token = config.inference_api_token.as_deref();
    let classifier = |name: &str, url: &Option<String>| {
        url.as_deref().map(|u| {
            Arc::new(HostedClassifier::new(name, InferenceClient::new(u, token))) as Arc<dyn TextClassifier>
        })
    };

    let geocoder: Arc<dyn Geocoder> = Arc::new(NominatimGeocoder::new(NominatimClient::new(
        &config.geocoder_url,
        &config.geocoder_user_agent,
    )));
    let weather = config.noaa_api_token.as_ref().map(|token| {
        Arc::new(NoaaWeatherSource::new(NoaaClient::new(token.clone()))) as Arc<dyn WeatherSource>
    });

    Collaborators {
        cache,
        geocoder: Some(geocoder),
        weather,
        language_model: classifier("langid", &config.langid_model_url),
        sentiment_primary: classifier("sentiment-primary", &config.sentiment_primary_model_url),
        sentiment_multilingual: classifier(
            "sentiment-multilingual",
            &config.sentiment_multilingual_model_url,
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive("climatesignal=info".parse()?);
    if cli.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Climate Signal enrichment starting...");

    let app_config = AppConfig::from_env()?;
    let file_config = match &cli.config {
        Some(path) => load_config(path)?,
        None => FileConfig::default(),
    };

    let enricher = Arc::new(Enricher::from_config(&file_config, collaborators(&app_config)));

    let sink = Arc::new(JsonLinesSink::open(&cli.output, file_config.output.buffer_size).await?);
    let dead_sink =
        Arc::new(JsonLinesSink::open(&cli.dead_letter, file_config.output.buffer_size).await?);

    let input: Box<dyn AsyncBufRead + Unpin + Send> = match &cli.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input: {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    info!(
        output = %sink.path().display(),
        dead_letter = %dead_sink.path().display(),
        "Processing input"
    );

    let totals = run_pool(enricher.clone(), &file_config.workers, input, sink, dead_sink).await?;
    info!("{}", enricher.report(totals));

    Ok(())
}
