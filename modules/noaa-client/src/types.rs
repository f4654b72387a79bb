use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// GHCND daily summaries: the only dataset the matcher queries.
pub const DATASET_GHCND: &str = "GHCND";

/// Lat/lon rectangle used to pre-filter stations server-side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl Extent {
    /// Square box of `radius_km` around a point, using ~111 km per degree.
    pub fn around(lat: f64, lon: f64, radius_km: f64) -> Self {
        let delta = radius_km / 111.0;
        Self {
            min_lat: lat - delta,
            min_lon: lon - delta,
            max_lat: lat + delta,
            max_lon: lon + delta,
        }
    }

    /// `extent` query parameter: `minlat,minlon,maxlat,maxlon`.
    pub fn to_param(&self) -> String {
        format!(
            "{},{},{},{}",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon
        )
    }
}

/// Paged response envelope. CDO omits `results` entirely when nothing matched.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultSet<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub elevation: Option<f64>,
    #[serde(default)]
    pub datacoverage: Option<f64>,
}

/// A raw GHCND data point. Temperatures, precipitation and wind arrive in
/// tenths of their unit; snowfall in whole millimetres.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRecord {
    pub date: NaiveDateTime,
    pub datatype: String,
    pub station: String,
    pub value: f64,
    #[serde(default)]
    pub attributes: Option<String>,
}
