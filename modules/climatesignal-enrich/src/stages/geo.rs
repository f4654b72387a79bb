//! GeoResolver: three-tier location resolution.
//!
//! coordinates (high) -> place centroid (medium) -> geocoded user location (low).
//! The first tier that produces a point wins; tiers never combine.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use climatesignal_common::{EnrichError, GeoConfidence, GeoResult, GeoSource, Place, Record};

use super::STATS_INTERVAL;
use crate::infra::cache_store::{get_json, set_json};
use crate::traits::{CacheStore, Geocoder};

pub const DEFAULT_GEOCODE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

#[async_trait]
pub trait GeoStrategy: Send + Sync {
    fn source(&self) -> GeoSource;

    /// `None` passes to the next tier.
    async fn resolve(&self, record: &Record) -> Option<GeoResult>;
}

fn valid_point(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

// ---------------------------------------------------------------------------
// Tier 1: explicit coordinates
// ---------------------------------------------------------------------------

pub struct CoordinatesTier;

#[async_trait]
impl GeoStrategy for CoordinatesTier {
    fn source(&self) -> GeoSource {
        GeoSource::Coordinates
    }

    async fn resolve(&self, record: &Record) -> Option<GeoResult> {
        let coords = record.coordinates?;
        let (lat, lon) = (coords.lat?, coords.lon?);
        if !valid_point(lat, lon) {
            warn!(record_id = %record.id, lat, lon, "Ignoring out-of-range coordinates");
            return None;
        }
        Some(GeoResult::resolved(lat, lon, GeoConfidence::High, GeoSource::Coordinates))
    }
}

// ---------------------------------------------------------------------------
// Tier 2: place centroid
// ---------------------------------------------------------------------------

/// Centroid of a `[lon_min, lat_min, lon_max, lat_max]` box as (lat, lon).
pub fn bbox_centroid(bbox: &[f64]) -> Option<(f64, f64)> {
    match bbox {
        [lon_min, lat_min, lon_max, lat_max] => {
            Some(((lat_min + lat_max) / 2.0, (lon_min + lon_max) / 2.0))
        }
        _ => None,
    }
}

/// Mean of `[lon, lat]` vertices as (lat, lon). Nested polygons use their
/// first ring; a bare `[lon, lat]` point is its own centroid.
pub fn ring_centroid(coordinates: &serde_json::Value) -> Option<(f64, f64)> {
    let outer = coordinates.as_array()?;
    if let [lon, lat] = outer.as_slice() {
        if let (Some(lon), Some(lat)) = (lon.as_f64(), lat.as_f64()) {
            return Some((lat, lon));
        }
    }

    let nested = outer
        .first()
        .and_then(|first| first.as_array())
        .and_then(|first| first.first())
        .is_some_and(|inner| inner.is_array());
    let ring = if nested {
        outer.first()?.as_array()?
    } else {
        outer
    };

    let mut sum_lat = 0.0;
    let mut sum_lon = 0.0;
    let mut n = 0usize;
    for point in ring {
        let pair = point.as_array()?;
        let lon = pair.first()?.as_f64()?;
        let lat = pair.get(1)?.as_f64()?;
        sum_lon += lon;
        sum_lat += lat;
        n += 1;
    }
    if n == 0 {
        return None;
    }
    Some((sum_lat / n as f64, sum_lon / n as f64))
}

pub fn place_centroid(place: &Place) -> Option<(f64, f64)> {
    let geo = place.geo.as_ref()?;
    if let Some(bbox) = geo.bbox.as_deref() {
        if let Some(centroid) = bbox_centroid(bbox) {
            return Some(centroid);
        }
    }
    geo.coordinates.as_ref().and_then(ring_centroid)
}

pub struct PlaceCentroidTier;

#[async_trait]
impl GeoStrategy for PlaceCentroidTier {
    fn source(&self) -> GeoSource {
        GeoSource::PlaceCentroid
    }

    async fn resolve(&self, record: &Record) -> Option<GeoResult> {
        let place = record.place.as_ref()?;
        let (lat, lon) = place_centroid(place)?;
        if !valid_point(lat, lon) {
            warn!(record_id = %record.id, lat, lon, "Ignoring out-of-range place centroid");
            return None;
        }
        let mut result = GeoResult::resolved(lat, lon, GeoConfidence::Medium, GeoSource::PlaceCentroid);
        result.place_name = place.full_name.clone();
        Some(result)
    }
}

// ---------------------------------------------------------------------------
// Tier 3: geocoded free-text location
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct CachedPoint {
    lat: f64,
    lon: f64,
}

pub fn geocode_cache_key(location: &str) -> String {
    format!("geocode:{}", location.trim().to_lowercase())
}

/// Geocodes `user_location` behind a TTL cache and a rate limiter shared by
/// every worker holding this tier.
pub struct GeocodedLocationTier {
    geocoder: Arc<dyn Geocoder>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    cache_hits: AtomicU64,
    api_calls: AtomicU64,
}

impl GeocodedLocationTier {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        cache: Arc<dyn CacheStore>,
        ttl: Duration,
        requests_per_second: u32,
    ) -> Self {
        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            geocoder,
            cache,
            ttl,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
            cache_hits: AtomicU64::new(0),
            api_calls: AtomicU64::new(0),
        }
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn api_calls(&self) -> u64 {
        self.api_calls.load(Ordering::Relaxed)
    }

    async fn lookup(&self, location: &str) -> Option<(f64, f64)> {
        let key = geocode_cache_key(location);
        if let Some(cached) = get_json::<CachedPoint>(self.cache.as_ref(), &key).await {
            if valid_point(cached.lat, cached.lon) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Some((cached.lat, cached.lon));
            }
            let err = EnrichError::CacheCorruption {
                key: key.clone(),
                message: format!("out-of-range point ({}, {})", cached.lat, cached.lon),
            };
            warn!(error = %err, "Discarding corrupt cache entry");
        }

        self.rate_limiter.until_ready().await;
        self.api_calls.fetch_add(1, Ordering::Relaxed);

        match self.geocoder.geocode(location).await {
            Ok(Some((lat, lon))) if valid_point(lat, lon) => {
                set_json(self.cache.as_ref(), &key, self.ttl, &CachedPoint { lat, lon }).await;
                Some((lat, lon))
            }
            Ok(Some((lat, lon))) => {
                warn!(location, lat, lon, "Geocoder returned out-of-range point");
                None
            }
            Ok(None) => {
                debug!(location, "Geocoder found no match");
                None
            }
            Err(e) => {
                let err = EnrichError::TransientService {
                    service: "geocoder",
                    message: e.to_string(),
                };
                warn!(location, error = %err, "Geocoding failed, degrading to unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl GeoStrategy for GeocodedLocationTier {
    fn source(&self) -> GeoSource {
        GeoSource::UserLocationGeocoded
    }

    async fn resolve(&self, record: &Record) -> Option<GeoResult> {
        let location = record.user_location.as_deref()?.trim();
        if location.is_empty() {
            return None;
        }
        let (lat, lon) = self.lookup(location).await?;
        let mut result = GeoResult::resolved(lat, lon, GeoConfidence::Low, GeoSource::UserLocationGeocoded);
        result.user_location = Some(location.to_string());
        Some(result)
    }
}

// ---------------------------------------------------------------------------
// GeoResolver
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TierCounters {
    high: AtomicU64,
    medium: AtomicU64,
    low: AtomicU64,
    unavailable: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeoStats {
    pub processed: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub unavailable: u64,
    pub geocode_cache_hits: u64,
    pub geocode_api_calls: u64,
}

pub struct GeoResolver {
    tiers: Vec<Arc<dyn GeoStrategy>>,
    geocoder_tier: Option<Arc<GeocodedLocationTier>>,
    processed: AtomicU64,
    counters: TierCounters,
}

impl GeoResolver {
    /// Standard tier order. Without a geocoder, free-text locations stay unresolved.
    pub fn new(geocoder_tier: Option<GeocodedLocationTier>) -> Self {
        let geocoder_tier = geocoder_tier.map(Arc::new);
        let mut tiers: Vec<Arc<dyn GeoStrategy>> =
            vec![Arc::new(CoordinatesTier), Arc::new(PlaceCentroidTier)];
        if let Some(tier) = &geocoder_tier {
            tiers.push(tier.clone());
        }
        Self {
            tiers,
            geocoder_tier,
            processed: AtomicU64::new(0),
            counters: TierCounters::default(),
        }
    }

    pub async fn resolve(&self, record: &Record) -> GeoResult {
        let mut result = GeoResult::unavailable();
        for tier in &self.tiers {
            if let Some(found) = tier.resolve(record).await {
                debug!(
                    record_id = %record.id,
                    source = ?tier.source(),
                    confidence = found.confidence.as_str(),
                    "Geo tier resolved"
                );
                result = found;
                break;
            }
        }

        let counter = match result.confidence {
            GeoConfidence::High => &self.counters.high,
            GeoConfidence::Medium => &self.counters.medium,
            GeoConfidence::Low => &self.counters.low,
            GeoConfidence::Unavailable => &self.counters.unavailable,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let n = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if n % STATS_INTERVAL == 0 {
            let stats = self.stats();
            let total = stats.processed.max(1) as f64;
            let resolved = stats.high + stats.medium + stats.low;
            info!(
                processed = stats.processed,
                high = stats.high,
                medium = stats.medium,
                low = stats.low,
                unavailable = stats.unavailable,
                resolved_pct = format!("{:.1}", resolved as f64 / total * 100.0),
                geocode_cache_hits = stats.geocode_cache_hits,
                geocode_api_calls = stats.geocode_api_calls,
                "Geo stats"
            );
        }
        result
    }

    pub fn stats(&self) -> GeoStats {
        let (geocode_cache_hits, geocode_api_calls) = self
            .geocoder_tier
            .as_ref()
            .map(|t| (t.cache_hits(), t.api_calls()))
            .unwrap_or((0, 0));
        GeoStats {
            processed: self.processed.load(Ordering::Relaxed),
            high: self.counters.high.load(Ordering::Relaxed),
            medium: self.counters.medium.load(Ordering::Relaxed),
            low: self.counters.low.load(Ordering::Relaxed),
            unavailable: self.counters.unavailable.load(Ordering::Relaxed),
            geocode_cache_hits,
            geocode_api_calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::cache_store::MemoryCacheStore;
    use crate::testing::{record, MockGeocoder, HOUSTON, MIAMI};
    use climatesignal_common::{Coordinates, PlaceGeo};

    fn place_with_bbox(bbox: Vec<f64>) -> Place {
        Place {
            full_name: Some("Miami, FL".to_string()),
            geo: Some(PlaceGeo {
                bbox: Some(bbox),
                coordinates: None,
            }),
        }
    }

    fn geocoding_resolver(geocoder: Arc<MockGeocoder>, cache: Arc<MemoryCacheStore>) -> GeoResolver {
        GeoResolver::new(Some(GeocodedLocationTier::new(geocoder, cache, DEFAULT_GEOCODE_TTL, 1000)))
    }

    #[test]
    fn bbox_centroid_is_midpoint() {
        assert_eq!(bbox_centroid(&[-80.0, 25.0, -79.0, 26.0]), Some((25.5, -79.5)));
        assert_eq!(bbox_centroid(&[1.0, 2.0, 3.0]), None);
    }

    #[test]
    fn ring_centroid_handles_flat_and_nested() {
        let flat = serde_json::json!([[-80.0, 25.0], [-79.0, 25.0], [-79.0, 26.0], [-80.0, 26.0]]);
        assert_eq!(ring_centroid(&flat), Some((25.5, -79.5)));

        let nested = serde_json::json!([[[0.0, 0.0], [2.0, 0.0], [2.0, 4.0]], [[9.0, 9.0]]]);
        let (lat, lon) = ring_centroid(&nested).unwrap();
        assert!((lat - 4.0 / 3.0).abs() < 1e-9);
        assert!((lon - 4.0 / 3.0).abs() < 1e-9);

        assert_eq!(ring_centroid(&serde_json::json!([-95.4, 29.8])), Some((29.8, -95.4)));
        assert_eq!(ring_centroid(&serde_json::json!([])), None);
    }

    #[tokio::test]
    async fn coordinates_beat_place() {
        let mut r = record("1", "text");
        r.coordinates = Some(Coordinates {
            lat: Some(HOUSTON.0),
            lon: Some(HOUSTON.1),
        });
        r.place = Some(place_with_bbox(vec![-80.0, 25.0, -79.0, 26.0]));

        let result = GeoResolver::new(None).resolve(&r).await;
        assert_eq!(result.confidence, GeoConfidence::High);
        assert_eq!(result.source, GeoSource::Coordinates);
        assert_eq!(result.point(), Some(HOUSTON));
    }

    #[tokio::test]
    async fn place_bbox_gives_medium_with_name() {
        let mut r = record("1", "text");
        r.place = Some(place_with_bbox(vec![-80.0, 25.0, -79.0, 26.0]));
        r.user_location = Some("Houston".to_string());

        let result = GeoResolver::new(None).resolve(&r).await;
        assert_eq!(result.confidence, GeoConfidence::Medium);
        assert_eq!(result.point(), Some((25.5, -79.5)));
        assert_eq!(result.place_name.as_deref(), Some("Miami, FL"));
    }

    #[tokio::test]
    async fn half_null_coordinates_fall_through() {
        let mut r = record("1", "text");
        r.coordinates = Some(Coordinates {
            lat: Some(10.0),
            lon: None,
        });
        let result = GeoResolver::new(None).resolve(&r).await;
        assert_eq!(result.confidence, GeoConfidence::Unavailable);
        assert_eq!(result.point(), None);
        assert!(result.lat.is_none() && result.lon.is_none());
    }

    #[tokio::test]
    async fn user_location_is_geocoded_and_cached() {
        let geocoder = Arc::new(MockGeocoder::new().on_query("Miami, FL", MIAMI));
        let cache = Arc::new(MemoryCacheStore::new());
        let resolver = geocoding_resolver(geocoder.clone(), cache.clone());

        let mut r = record("1", "text");
        r.user_location = Some("  Miami, FL ".to_string());
        let first = resolver.resolve(&r).await;
        assert_eq!(first.confidence, GeoConfidence::Low);
        assert_eq!(first.source, GeoSource::UserLocationGeocoded);
        assert_eq!(first.point(), Some(MIAMI));
        assert_eq!(first.user_location.as_deref(), Some("Miami, FL"));

        let mut again = record("2", "text");
        again.user_location = Some("miami, fl".to_string());
        let second = resolver.resolve(&again).await;
        assert_eq!(second.point(), Some(MIAMI));

        assert_eq!(geocoder.calls(), 1);
        assert!(cache.get("geocode:miami, fl").await.unwrap().is_some());
        let stats = resolver.stats();
        assert_eq!(stats.geocode_cache_hits, 1);
        assert_eq!(stats.geocode_api_calls, 1);
    }

    #[tokio::test]
    async fn geocoder_failure_degrades_to_unavailable() {
        let geocoder = Arc::new(MockGeocoder::new().failing());
        let cache = Arc::new(MemoryCacheStore::new());
        let resolver = geocoding_resolver(geocoder, cache.clone());

        let mut r = record("1", "text");
        r.user_location = Some("Atlantis".to_string());
        let result = resolver.resolve(&r).await;
        assert_eq!(result.confidence, GeoConfidence::Unavailable);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_refetched() {
        let geocoder = Arc::new(MockGeocoder::new().on_query("Houston", HOUSTON));
        let cache = Arc::new(MemoryCacheStore::new());
        cache
            .setex("geocode:houston", DEFAULT_GEOCODE_TTL, "not json".to_string())
            .await
            .unwrap();
        let resolver = geocoding_resolver(geocoder.clone(), cache);

        let mut r = record("1", "text");
        r.user_location = Some("Houston".to_string());
        let result = resolver.resolve(&r).await;
        assert_eq!(result.point(), Some(HOUSTON));
        assert_eq!(geocoder.calls(), 1);
    }

    #[tokio::test]
    async fn blank_location_is_unavailable_without_calls() {
        let geocoder = Arc::new(MockGeocoder::new());
        let resolver = geocoding_resolver(geocoder.clone(), Arc::new(MemoryCacheStore::new()));
        let mut r = record("1", "text");
        r.user_location = Some("   ".to_string());
        assert_eq!(resolver.resolve(&r).await.confidence, GeoConfidence::Unavailable);
        assert_eq!(geocoder.calls(), 0);
    }

    #[test]
    fn tiers_run_from_most_to_least_precise() {
        let tier = GeocodedLocationTier::new(
            Arc::new(MockGeocoder::new()),
            Arc::new(MemoryCacheStore::new()),
            DEFAULT_GEOCODE_TTL,
            1,
        );
        let resolver = GeoResolver::new(Some(tier));
        let sources: Vec<GeoSource> = resolver.tiers.iter().map(|t| t.source()).collect();
        assert_eq!(
            sources,
            vec![
                GeoSource::Coordinates,
                GeoSource::PlaceCentroid,
                GeoSource::UserLocationGeocoded,
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn geocoder_quota_is_shared_across_workers() {
        let places = ["Houston", "Miami", "Austin", "Tampa"];
        let mut geocoder = MockGeocoder::new();
        for place in places {
            geocoder = geocoder.on_query(place, HOUSTON);
        }
        let geocoder = Arc::new(geocoder);
        let resolver = Arc::new(GeoResolver::new(Some(GeocodedLocationTier::new(
            geocoder.clone(),
            Arc::new(MemoryCacheStore::new()),
            DEFAULT_GEOCODE_TTL,
            1,
        ))));

        let started = std::time::Instant::now();
        let handles: Vec<_> = places
            .iter()
            .enumerate()
            .map(|(i, place)| {
                let resolver = resolver.clone();
                let mut r = record(&i.to_string(), "text");
                r.user_location = Some(place.to_string());
                tokio::spawn(async move { resolver.resolve(&r).await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().confidence, GeoConfidence::Low);
        }

        // One call goes out immediately, the other three wait a second each.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2900), "elapsed {elapsed:?}");
        assert_eq!(geocoder.calls(), 4);
    }
}
