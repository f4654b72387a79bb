//! Integration tests: the full enrichment pipeline against mocks.
//!
//! Covers stage ordering and the cross-stage behaviour that unit tests
//! can't see: dedup before text, geo feeding weather, language feeding
//! sentiment, and the worker pool producing the same results as the
//! sequential path.

use std::io::Cursor;
use std::sync::Arc;

use chrono::Duration;
use serde_json::json;

use climatesignal_common::{
    FileConfig, GeoConfidence, GeoSource, MatchQuality, ProcessingStage, Quantity, Record,
    SentimentLabel, SentimentMethod, WeatherEvent, WorkersConfig,
};
use climatesignal_enrich::pipeline::workers::{run_pool, run_sequential};
use climatesignal_enrich::pipeline::{Collaborators, Enricher, Outcome};
use climatesignal_enrich::testing::{
    input_line, observation, station, test_time, CollectingSink, FailingClassifier,
    FixedClassifier, MockGeocoder, MockWeatherSource, HOUSTON,
};
use climatesignal_enrich::traits::{Geocoder, TextClassifier, WeatherSource};

fn completed(outcome: Outcome) -> Record {
    match outcome {
        Outcome::Completed(record) => *record,
        other => panic!("expected completed record, got {other:?}"),
    }
}

fn rainy_houston() -> Arc<MockWeatherSource> {
    let t = test_time();
    Arc::new(
        MockWeatherSource::new()
            .with_station(station("GHCND:USW00012918", 5.0))
            .with_observations(vec![
                observation(t - Duration::minutes(10), Quantity::Precipitation, 18.0),
                observation(t + Duration::minutes(20), Quantity::Precipitation, 12.0),
                observation(t - Duration::minutes(10), Quantity::WindSpeed, 25.0),
                observation(t, Quantity::TemperatureMax, 38.0),
                observation(t, Quantity::TemperatureMin, 24.0),
            ]),
    )
}

fn enricher_with(geocoder: Arc<MockGeocoder>, weather: Arc<MockWeatherSource>) -> Enricher {
    let collaborators = Collaborators::builder()
        .geocoder(geocoder as Arc<dyn Geocoder>)
        .weather(weather as Arc<dyn WeatherSource>)
        .build();
    Enricher::from_config(&FileConfig::default(), collaborators)
}

#[tokio::test]
async fn emoji_url_and_hashtag_are_cleaned() {
    let enricher = Enricher::default();
    let line = json!({
        "id": "1",
        "text": "Don't miss this! 😊 #ClimateChange https://x.co",
        "created_at": "2024-01-15T14:30:00Z",
        "entities": {"hashtags": [{"tag": "ClimateChange"}], "urls": [{"url": "https://x.co"}]},
    })
    .to_string();

    let record = completed(enricher.process_line(&line).await);
    let text = record.text_enrichment.as_ref().unwrap();
    assert!(text.clean_text.contains("climate change"), "{}", text.clean_text);
    assert!(!text.clean_text.contains("x.co"));
    assert_eq!(text.features.emoji_count, 1);
    assert!(text.features.emoji_sentiment_score > 0.0);
    assert_eq!(text.features.url_count, 1);
    assert_eq!(record.hashtags, vec!["ClimateChange"]);
}

#[tokio::test]
async fn same_id_with_different_text_is_dropped() {
    let enricher = Enricher::default();
    completed(enricher.process_line(&input_line("42", "Hail the size of golf balls")).await);

    let outcome = enricher
        .process_line(&input_line("42", "Completely unrelated words here"))
        .await;
    assert!(matches!(outcome, Outcome::Dropped { ref id, .. } if id == "42"));
}

#[tokio::test]
async fn reposts_never_reach_text_stage() {
    let enricher = Enricher::default();
    let line = json!({
        "id": "7",
        "text": "RT: wildfire smoke everywhere",
        "created_at": "2024-01-15T14:30:00Z",
        "retweet_status": true,
    })
    .to_string();

    assert!(matches!(enricher.process_line(&line).await, Outcome::Dropped { .. }));
    let report = enricher.report(Default::default());
    assert_eq!(report.dedup.reposts, 1);
    assert_eq!(report.text.processed, 0);
}

#[tokio::test]
async fn coordinates_win_over_place_and_drive_weather_match() {
    let weather = rainy_houston();
    let enricher = enricher_with(Arc::new(MockGeocoder::new()), weather.clone());
    let line = json!({
        "id": "1",
        "text": "Streets are flooding in Midtown",
        "created_at": "2024-01-15T14:30:00Z",
        "coordinates": {"lat": HOUSTON.0, "lon": HOUSTON.1},
        "place": {"full_name": "Miami, FL", "geo": {"bbox": [-80.0, 25.0, -79.0, 26.0]}},
    })
    .to_string();

    let record = completed(enricher.process_line(&line).await);
    let geo = record.geo.as_ref().unwrap();
    assert_eq!(geo.confidence, GeoConfidence::High);
    assert_eq!(geo.source, GeoSource::Coordinates);

    let w = record.weather.as_ref().unwrap();
    assert_eq!(w.station.as_ref().unwrap().id, "GHCND:USW00012918");
    assert_eq!(w.precip_mm, Some(30.0));
    // Precipitation outranks both wind and heat.
    assert_eq!(w.event_type, Some(WeatherEvent::HeavyRain));
    assert_eq!(w.match_quality, MatchQuality::High);
    assert_eq!(w.temp_max_c, Some(38.0));
    assert_eq!(w.temp_c, Some(31.0));
    assert_eq!(record.processing_stage, ProcessingStage::SentimentScored);
}

#[tokio::test]
async fn place_only_resolves_to_bbox_centroid() {
    let enricher = enricher_with(Arc::new(MockGeocoder::new()), Arc::new(MockWeatherSource::new()));
    let line = json!({
        "id": "1",
        "text": "King tides on the causeway again",
        "created_at": "2024-01-15T14:30:00Z",
        "place": {"full_name": "Miami, FL", "geo": {"bbox": [-80.0, 25.0, -79.0, 26.0]}},
    })
    .to_string();

    let record = completed(enricher.process_line(&line).await);
    let geo = record.geo.as_ref().unwrap();
    assert_eq!(geo.confidence, GeoConfidence::Medium);
    assert_eq!(geo.point(), Some((25.5, -79.5)));
    assert_eq!(geo.place_name.as_deref(), Some("Miami, FL"));
    assert_eq!(
        record.weather.as_ref().unwrap().match_quality,
        MatchQuality::NoStation
    );
}

#[tokio::test]
async fn user_location_is_geocoded_once_then_cached() {
    let geocoder = Arc::new(MockGeocoder::new().on_query("Houston, TX", HOUSTON));
    let enricher = enricher_with(geocoder.clone(), rainy_houston());

    for (id, location) in [("1", "Houston, TX"), ("2", "  houston, tx ")] {
        let line = json!({
            "id": id,
            "text": format!("Record {id}: power is out across the neighborhood"),
            "created_at": "2024-01-15T14:30:00Z",
            "user_location": location,
        })
        .to_string();
        let record = completed(enricher.process_line(&line).await);
        let geo = record.geo.as_ref().unwrap();
        assert_eq!(geo.confidence, GeoConfidence::Low);
        assert_eq!(geo.point(), Some(HOUSTON));
    }

    assert_eq!(geocoder.calls(), 1);
    let report = enricher.report(Default::default());
    assert_eq!(report.geo.geocode_cache_hits, 1);
    assert_eq!(report.geo.geocode_api_calls, 1);
}

#[tokio::test]
async fn geocoder_outage_degrades_to_unavailable() {
    let geocoder = Arc::new(MockGeocoder::new().failing());
    let weather = rainy_houston();
    let enricher = enricher_with(geocoder, weather.clone());
    let line = json!({
        "id": "1",
        "text": "Tornado sirens going off",
        "created_at": "2024-01-15T14:30:00Z",
        "user_location": "Moore, OK",
    })
    .to_string();

    let record = completed(enricher.process_line(&line).await);
    assert_eq!(record.geo_confidence(), GeoConfidence::Unavailable);
    assert_eq!(
        record.weather.as_ref().unwrap().match_quality,
        MatchQuality::NoGeolocation
    );
    assert_eq!(weather.station_calls(), 0);
}

#[tokio::test]
async fn sentiment_is_routed_by_resolved_language() {
    let langid = Arc::new(FixedClassifier::new("__label__es", 0.97));
    let primary = Arc::new(FixedClassifier::new("POSITIVE", 0.9));
    let multilingual = Arc::new(FixedClassifier::new("negative", 0.8));
    let collaborators = Collaborators::builder()
        .language_model(langid as Arc<dyn TextClassifier>)
        .sentiment_primary(primary.clone() as Arc<dyn TextClassifier>)
        .sentiment_multilingual(multilingual.clone() as Arc<dyn TextClassifier>)
        .build();
    let enricher = Enricher::from_config(&FileConfig::default(), collaborators);

    let record = completed(
        enricher
            .process_line(&input_line("1", "La ola de calor no termina nunca"))
            .await,
    );
    assert_eq!(record.language.as_ref().unwrap().lang, "es");
    let sentiment = record.sentiment.as_ref().unwrap();
    assert_eq!(sentiment.method, SentimentMethod::MultilingualModel);
    assert_eq!(sentiment.label, SentimentLabel::Negative);
    assert_eq!(primary.calls(), 0);
    assert_eq!(multilingual.calls(), 1);
}

#[tokio::test]
async fn declared_region_tag_still_routes_to_primary_sentiment() {
    let primary = Arc::new(FixedClassifier::new("POSITIVE", 0.9));
    let multilingual = Arc::new(FixedClassifier::new("negative", 0.8));
    let collaborators = Collaborators::builder()
        .sentiment_primary(primary.clone() as Arc<dyn TextClassifier>)
        .sentiment_multilingual(multilingual.clone() as Arc<dyn TextClassifier>)
        .build();
    let enricher = Enricher::from_config(&FileConfig::default(), collaborators);

    let line = json!({
        "id": "1",
        "text": "So hot!",
        "created_at": "2024-01-15T14:30:00.000Z",
        "declared_lang": "EN-us",
    })
    .to_string();
    let record = completed(enricher.process_line(&line).await);

    assert_eq!(record.language.as_ref().unwrap().lang, "en");
    assert_eq!(
        record.sentiment.as_ref().unwrap().method,
        SentimentMethod::PrimaryModel
    );
    assert_eq!(primary.calls(), 1);
    assert_eq!(multilingual.calls(), 0);
}

#[tokio::test]
async fn failing_models_fall_back_without_failing_the_record() {
    let collaborators = Collaborators::builder()
        .language_model(Arc::new(FailingClassifier::new("langid")) as Arc<dyn TextClassifier>)
        .sentiment_primary(Arc::new(FailingClassifier::new("sentiment")) as Arc<dyn TextClassifier>)
        .build();
    let enricher = Enricher::from_config(&FileConfig::default(), collaborators);

    let record = completed(
        enricher
            .process_line(&input_line("1", "What a great and beautiful morning after the storm"))
            .await,
    );
    assert!(record.language.is_some());
    assert_eq!(
        record.sentiment.as_ref().unwrap().method,
        SentimentMethod::Lexicon
    );
}

#[tokio::test]
async fn invalid_lines_go_to_dead_letter_sink() {
    let enricher = Enricher::default();
    let sink = CollectingSink::new();
    let input = [
        input_line("1", "Drought has dried up the reservoir"),
        r#"{"id": "2", "created_at": "2024-01-15T14:30:00Z"}"#.to_string(),
        r#"{"id": "3", "text": "no timestamp"}"#.to_string(),
    ]
    .join("\n");

    let totals = run_sequential(&enricher, Cursor::new(input.into_bytes()), &sink, &sink)
        .await
        .unwrap();

    assert_eq!(totals.completed, 1);
    assert_eq!(totals.dead_lettered, 2);
    let ids: Vec<_> = sink.letters().into_iter().map(|l| l.id).collect();
    assert_eq!(ids, vec![Some("2".to_string()), Some("3".to_string())]);
}

#[tokio::test]
async fn worker_pool_matches_sequential_run() {
    let mut lines: Vec<String> = (0..200)
        .map(|i| input_line(&format!("id-{i}"), &format!("Observation {i}: snow is piling up fast")))
        .collect();
    lines.push(input_line("id-0", "a repeat id"));
    lines.push("garbage".to_string());
    let input = lines.join("\n");

    let sequential_sink = CollectingSink::new();
    let sequential = run_sequential(
        &Enricher::default(),
        Cursor::new(input.clone().into_bytes()),
        &sequential_sink,
        &sequential_sink,
    )
    .await
    .unwrap();

    let pool_sink = Arc::new(CollectingSink::new());
    let config = WorkersConfig {
        validate: 1,
        ..Default::default()
    };
    let pooled = run_pool(
        Arc::new(Enricher::default()),
        &config,
        Cursor::new(input.into_bytes()),
        pool_sink.clone(),
        pool_sink.clone(),
    )
    .await
    .unwrap();

    assert_eq!(pooled, sequential);
    assert_eq!(pooled.completed, 200);

    let mut a: Vec<String> = sequential_sink.records().into_iter().map(|r| r.id).collect();
    let mut b: Vec<String> = pool_sink.records().into_iter().map(|r| r.id).collect();
    a.sort();
    b.sort();
    assert_eq!(a, b);
    assert!(pool_sink
        .records()
        .iter()
        .all(|r| r.processing_stage == ProcessingStage::SentimentScored));
}
