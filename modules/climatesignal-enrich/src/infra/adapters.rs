//! Trait impls over the REST client crates.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use climatesignal_common::{haversine_km, round_to, Observation, Quantity, Station};
use geocoder_client::NominatimClient;
use inference_client::{top_label, InferenceClient};
use noaa_client::{DataRecord, Extent, NoaaClient, StationRecord};

use crate::traits::{Geocoder, Prediction, TextClassifier, WeatherSource};

// ---------------------------------------------------------------------------
// NOAA
// ---------------------------------------------------------------------------

pub struct NoaaWeatherSource {
    client: NoaaClient,
}

impl NoaaWeatherSource {
    pub fn new(client: NoaaClient) -> Self {
        Self { client }
    }
}

/// Closest station within `radius_km`, distance rounded to 0.01 km.
pub fn nearest_station(stations: &[StationRecord], lat: f64, lon: f64, radius_km: f64) -> Option<Station> {
    stations
        .iter()
        .map(|s| (s, haversine_km(lat, lon, s.latitude, s.longitude)))
        .filter(|(_, d)| *d <= radius_km)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(s, d)| Station {
            id: s.id.clone(),
            name: s.name.clone(),
            lat: s.latitude,
            lon: s.longitude,
            distance_km: round_to(d, 2),
        })
}

/// GHCND datatype to domain quantity, scaling tenths to whole units.
/// Datatypes outside the known set are skipped.
pub fn to_observation(record: &DataRecord) -> Option<Observation> {
    let (quantity, scale) = match record.datatype.as_str() {
        "TMAX" => (Quantity::TemperatureMax, 0.1),
        "TMIN" => (Quantity::TemperatureMin, 0.1),
        "PRCP" => (Quantity::Precipitation, 0.1),
        "AWND" => (Quantity::WindSpeed, 0.1),
        "SNOW" => (Quantity::Snowfall, 1.0),
        _ => return None,
    };
    Some(Observation {
        timestamp: record.date.and_utc(),
        quantity,
        value: record.value * scale,
    })
}

#[async_trait]
impl WeatherSource for NoaaWeatherSource {
    async fn find_station(&self, lat: f64, lon: f64, radius_km: f64) -> Result<Option<Station>> {
        let stations = self
            .client
            .list_stations(Extent::around(lat, lon, radius_km))
            .await
            .context("NOAA station search failed")?;
        Ok(nearest_station(&stations, lat, lon, radius_km))
    }

    async fn query_observations(
        &self,
        station_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>> {
        let records = self
            .client
            .observations(station_id, start.date_naive(), end.date_naive())
            .await
            .with_context(|| format!("NOAA data query failed for {station_id}"))?;
        Ok(records.iter().filter_map(to_observation).collect())
    }
}

// ---------------------------------------------------------------------------
// Nominatim
// ---------------------------------------------------------------------------

pub struct NominatimGeocoder {
    client: NominatimClient,
}

impl NominatimGeocoder {
    pub fn new(client: NominatimClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<(f64, f64)>> {
        Ok(self.client.search(query).await?)
    }
}

// ---------------------------------------------------------------------------
// Hosted classifiers
// ---------------------------------------------------------------------------

pub struct HostedClassifier {
    name: String,
    client: InferenceClient,
}

impl HostedClassifier {
    pub fn new(name: impl Into<String>, client: InferenceClient) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }
}

#[async_trait]
impl TextClassifier for HostedClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn predict(&self, text: &str) -> Result<Option<Prediction>> {
        let scores = self
            .client
            .classify(text)
            .await
            .with_context(|| format!("{} inference failed ({})", self.name, self.client.model_url()))?;
        Ok(top_label(&scores).map(|s| Prediction::new(s.label.clone(), s.score)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn station_record(id: &str, lat: f64, lon: f64) -> StationRecord {
        StationRecord {
            id: id.to_string(),
            name: id.to_string(),
            latitude: lat,
            longitude: lon,
            elevation: None,
            datacoverage: None,
        }
    }

    #[test]
    fn nearest_station_within_radius() {
        // Houston Hobby is ~12 km from downtown; Galveston ~72 km.
        let stations = vec![
            station_record("GHCND:GALVESTON", 29.3013, -94.7977),
            station_record("GHCND:HOBBY", 29.6381, -95.2819),
        ];
        let found = nearest_station(&stations, 29.7604, -95.3698, 50.0).unwrap();
        assert_eq!(found.id, "GHCND:HOBBY");
        assert!(found.distance_km > 10.0 && found.distance_km < 20.0);
        assert_eq!(found.distance_km, round_to(found.distance_km, 2));
    }

    #[test]
    fn no_station_outside_radius() {
        let stations = vec![station_record("GHCND:GALVESTON", 29.3013, -94.7977)];
        assert!(nearest_station(&stations, 29.7604, -95.3698, 50.0).is_none());
        assert!(nearest_station(&[], 29.7604, -95.3698, 50.0).is_none());
    }

    #[test]
    fn ghcnd_values_are_scaled() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let raw = |datatype: &str, value: f64| DataRecord {
            date,
            datatype: datatype.to_string(),
            station: "GHCND:X".to_string(),
            value,
            attributes: None,
        };

        let tmax = to_observation(&raw("TMAX", 156.0)).unwrap();
        assert_eq!(tmax.quantity, Quantity::TemperatureMax);
        assert!((tmax.value - 15.6).abs() < 1e-9);

        let snow = to_observation(&raw("SNOW", 25.0)).unwrap();
        assert_eq!(snow.value, 25.0);

        assert!(to_observation(&raw("WT01", 1.0)).is_none());
    }
}
