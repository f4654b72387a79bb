//! WeatherMatcher: nearest station, observations in a window around the
//! record timestamp, aggregation, event classification and match quality.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use climatesignal_common::{
    round_to, EnrichError, GeoResult, MatchQuality, Observation, Quantity, Station, WeatherEvent,
    WeatherResult,
};

use super::STATS_INTERVAL;
use crate::infra::cache_store::{get_json, set_json};
use crate::traits::{CacheStore, WeatherSource};

pub const DEFAULT_RADIUS_KM: f64 = 50.0;
pub const DEFAULT_WINDOW_MINUTES: i64 = 60;
pub const DEFAULT_STATION_TTL: Duration = Duration::from_secs(24 * 3600);

// ---------------------------------------------------------------------------
// Pure aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    pub temp_max_c: Option<f64>,
    pub temp_min_c: Option<f64>,
    pub temp_c: Option<f64>,
    pub precip_mm: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub snowfall_mm: Option<f64>,
    pub closest: Option<DateTime<Utc>>,
    /// Absolute offset of the closest observation, in minutes.
    pub closest_offset_minutes: Option<f64>,
}

/// Max of maxima, min of minima, their mean, summed precipitation and
/// snowfall, mean wind. Values are rounded to one decimal.
pub fn aggregate(observations: &[Observation], at: DateTime<Utc>) -> Aggregate {
    let values = |q: Quantity| {
        observations
            .iter()
            .filter(move |o| o.quantity == q && o.value.is_finite())
            .map(|o| o.value)
    };

    let temp_max = values(Quantity::TemperatureMax).reduce(f64::max);
    let temp_min = values(Quantity::TemperatureMin).reduce(f64::min);
    let temp_mean = match (temp_max, temp_min) {
        (Some(max), Some(min)) => Some((max + min) / 2.0),
        _ => None,
    };
    let sum = |q: Quantity| values(q).reduce(|a, b| a + b);
    let wind: Vec<f64> = values(Quantity::WindSpeed).collect();
    let wind_mean = (!wind.is_empty()).then(|| wind.iter().sum::<f64>() / wind.len() as f64);

    let closest = observations
        .iter()
        .min_by_key(|o| (o.timestamp - at).num_seconds().unsigned_abs());
    let r1 = |v: Option<f64>| v.map(|x| round_to(x, 1));

    Aggregate {
        temp_max_c: r1(temp_max),
        temp_min_c: r1(temp_min),
        temp_c: r1(temp_mean),
        precip_mm: r1(sum(Quantity::Precipitation)),
        wind_speed_ms: r1(wind_mean),
        snowfall_mm: r1(sum(Quantity::Snowfall)),
        closest: closest.map(|o| o.timestamp),
        closest_offset_minutes: closest
            .map(|o| (o.timestamp - at).num_seconds().unsigned_abs() as f64 / 60.0),
    }
}

/// First matching rule wins: precipitation, then wind, then temperature.
/// Missing precipitation and wind count as zero.
pub fn classify_event(precip_mm: Option<f64>, wind_ms: Option<f64>, temp_c: Option<f64>) -> WeatherEvent {
    let precip = precip_mm.unwrap_or(0.0);
    let wind = wind_ms.unwrap_or(0.0);

    if precip > 25.0 {
        return WeatherEvent::HeavyRain;
    }
    if precip > 10.0 {
        return WeatherEvent::Rain;
    }
    if precip > 0.0 {
        return WeatherEvent::LightRain;
    }
    if wind > 20.0 {
        return WeatherEvent::HighWind;
    }
    if wind > 10.0 {
        return WeatherEvent::Windy;
    }
    match temp_c {
        Some(t) if t > 35.0 => WeatherEvent::ExtremeHeat,
        Some(t) if t > 30.0 => WeatherEvent::Heat,
        Some(t) if t < 0.0 => WeatherEvent::Freezing,
        Some(t) if t < 5.0 => WeatherEvent::Cold,
        _ => WeatherEvent::Normal,
    }
}

pub fn match_quality(distance_km: f64, offset_minutes: f64) -> MatchQuality {
    if distance_km < 10.0 && offset_minutes < 30.0 {
        MatchQuality::High
    } else if distance_km < 30.0 && offset_minutes < 60.0 {
        MatchQuality::Medium
    } else {
        MatchQuality::Low
    }
}

pub fn station_cache_key(lat: f64, lon: f64, radius_km: f64) -> String {
    format!("noaa:station:{lat:.2}:{lon:.2}:{radius_km}")
}

// ---------------------------------------------------------------------------
// WeatherMatcher
// ---------------------------------------------------------------------------

#[derive(Default)]
struct QualityCounters {
    high: AtomicU64,
    medium: AtomicU64,
    low: AtomicU64,
    no_observations: AtomicU64,
    no_station: AtomicU64,
    no_geolocation: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeatherStats {
    pub processed: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub no_observations: u64,
    pub no_station: u64,
    pub no_geolocation: u64,
    pub station_cache_hits: u64,
    pub station_api_calls: u64,
}

impl WeatherStats {
    pub fn matched(&self) -> u64 {
        self.high + self.medium + self.low
    }
}

pub struct WeatherMatcher {
    source: Arc<dyn WeatherSource>,
    cache: Arc<dyn CacheStore>,
    radius_km: f64,
    window: chrono::Duration,
    station_ttl: Duration,
    processed: AtomicU64,
    station_cache_hits: AtomicU64,
    station_api_calls: AtomicU64,
    counters: QualityCounters,
}

impl WeatherMatcher {
    pub fn new(source: Arc<dyn WeatherSource>, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            source,
            cache,
            radius_km: DEFAULT_RADIUS_KM,
            window: chrono::Duration::minutes(DEFAULT_WINDOW_MINUTES),
            station_ttl: DEFAULT_STATION_TTL,
            processed: AtomicU64::new(0),
            station_cache_hits: AtomicU64::new(0),
            station_api_calls: AtomicU64::new(0),
            counters: QualityCounters::default(),
        }
    }

    pub fn with_radius_km(mut self, radius_km: f64) -> Self {
        self.radius_km = radius_km;
        self
    }

    pub fn with_window_minutes(mut self, minutes: i64) -> Self {
        self.window = chrono::Duration::minutes(minutes);
        self
    }

    pub fn with_station_ttl(mut self, ttl: Duration) -> Self {
        self.station_ttl = ttl;
        self
    }

    /// Match using a resolved location. Unavailable geolocation skips the
    /// lookups entirely.
    pub async fn match_geo(&self, geo: &GeoResult, at: DateTime<Utc>) -> WeatherResult {
        let result = match geo.point() {
            Some((lat, lon)) => self.match_point(lat, lon, at).await,
            None => WeatherResult::empty(MatchQuality::NoGeolocation),
        };
        debug!(
            station_id = result.station.as_ref().map(|s| s.id.as_str()),
            quality = result.match_quality.as_str(),
            "Weather matched"
        );
        self.record(&result);
        result
    }

    async fn match_point(&self, lat: f64, lon: f64, at: DateTime<Utc>) -> WeatherResult {
        let Some(station) = self.nearest_station(lat, lon).await else {
            return WeatherResult::empty(MatchQuality::NoStation);
        };

        let observations = match self
            .source
            .query_observations(&station.id, at - self.window, at + self.window)
            .await
        {
            Ok(obs) => obs,
            Err(e) => {
                let err = EnrichError::TransientService {
                    service: "weather",
                    message: e.to_string(),
                };
                warn!(station_id = %station.id, error = %err, "Observation query failed");
                Vec::new()
            }
        };

        if observations.is_empty() {
            debug!(station_id = %station.id, "No observations in window");
            let mut result = WeatherResult::empty(MatchQuality::NoObservations);
            result.station = Some(station);
            return result;
        }

        let agg = aggregate(&observations, at);
        let quality = match_quality(
            station.distance_km,
            agg.closest_offset_minutes.unwrap_or(f64::INFINITY),
        );
        WeatherResult {
            event_type: Some(classify_event(agg.precip_mm, agg.wind_speed_ms, agg.temp_max_c)),
            station: Some(station),
            temp_c: agg.temp_c,
            temp_max_c: agg.temp_max_c,
            temp_min_c: agg.temp_min_c,
            precip_mm: agg.precip_mm,
            wind_speed_ms: agg.wind_speed_ms,
            snowfall_mm: agg.snowfall_mm,
            observation_time: agg.closest,
            match_quality: quality,
        }
    }

    /// Cached per rounded coordinate bucket. Only found stations are cached.
    async fn nearest_station(&self, lat: f64, lon: f64) -> Option<Station> {
        let key = station_cache_key(lat, lon, self.radius_km);
        if let Some(station) = get_json::<Station>(self.cache.as_ref(), &key).await {
            if station.distance_km <= self.radius_km {
                self.station_cache_hits.fetch_add(1, Ordering::Relaxed);
                return Some(station);
            }
        }

        self.station_api_calls.fetch_add(1, Ordering::Relaxed);
        match self.source.find_station(lat, lon, self.radius_km).await {
            Ok(Some(station)) if station.distance_km <= self.radius_km => {
                set_json(self.cache.as_ref(), &key, self.station_ttl, &station).await;
                Some(station)
            }
            Ok(Some(station)) => {
                debug!(
                    station_id = %station.id,
                    distance_km = station.distance_km,
                    "Nearest station outside radius"
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                let err = EnrichError::TransientService {
                    service: "weather",
                    message: e.to_string(),
                };
                warn!(lat, lon, error = %err, "Station lookup failed, degrading to no_station");
                None
            }
        }
    }

    fn record(&self, result: &WeatherResult) {
        let counter = match result.match_quality {
            MatchQuality::High => &self.counters.high,
            MatchQuality::Medium => &self.counters.medium,
            MatchQuality::Low => &self.counters.low,
            MatchQuality::NoObservations => &self.counters.no_observations,
            MatchQuality::NoStation => &self.counters.no_station,
            MatchQuality::NoGeolocation => &self.counters.no_geolocation,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let n = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if n % STATS_INTERVAL == 0 {
            let stats = self.stats();
            let total = stats.processed.max(1) as f64;
            info!(
                processed = stats.processed,
                matched = stats.matched(),
                matched_pct = format!("{:.1}", stats.matched() as f64 / total * 100.0),
                no_observations = stats.no_observations,
                no_station = stats.no_station,
                no_geolocation = stats.no_geolocation,
                station_cache_hits = stats.station_cache_hits,
                station_api_calls = stats.station_api_calls,
                "Weather stats"
            );
        }
    }

    pub fn stats(&self) -> WeatherStats {
        WeatherStats {
            processed: self.processed.load(Ordering::Relaxed),
            high: self.counters.high.load(Ordering::Relaxed),
            medium: self.counters.medium.load(Ordering::Relaxed),
            low: self.counters.low.load(Ordering::Relaxed),
            no_observations: self.counters.no_observations.load(Ordering::Relaxed),
            no_station: self.counters.no_station.load(Ordering::Relaxed),
            no_geolocation: self.counters.no_geolocation.load(Ordering::Relaxed),
            station_cache_hits: self.station_cache_hits.load(Ordering::Relaxed),
            station_api_calls: self.station_api_calls.load(Ordering::Relaxed),
        }
    }
}
