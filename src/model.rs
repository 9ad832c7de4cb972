//! Value records shared by the pipeline stages.

use geo::{MultiPolygon, Point};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Governance status of a territory; lower is preferred when polygons overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum AdminLevel {
    Sovereign,
    Dependency,
    SpecialAdministrative,
}

impl AdminLevel {
    /// Map the Natural Earth `TYPE` property onto an admin level.
    pub fn from_natural_earth_type(kind: &str) -> AdminLevel {
        match kind.trim().to_ascii_lowercase().as_str() {
            "sovereign country" | "country" | "sovereignty" => AdminLevel::Sovereign,
            "dependency" => AdminLevel::Dependency,
            _ => AdminLevel::SpecialAdministrative,
        }
    }
}

impl From<AdminLevel> for u8 {
    fn from(level: AdminLevel) -> u8 {
        match level {
            AdminLevel::Sovereign => 0,
            AdminLevel::Dependency => 3,
            AdminLevel::SpecialAdministrative => 4,
        }
    }
}

impl TryFrom<u8> for AdminLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AdminLevel::Sovereign),
            3 => Ok(AdminLevel::Dependency),
            4 => Ok(AdminLevel::SpecialAdministrative),
            other => Err(format!("unknown admin level {other}")),
        }
    }
}

/// One country or territory from the boundary dataset.
#[derive(Debug, Clone)]
pub struct CountryShape {
    /// Administrative name (`ADMIN`), the key used to group packed records.
    pub admin: String,
    /// Short display name (`NAME`).
    pub name: String,
    pub iso2: String,
    pub iso3: String,
    pub continent: String,
    pub population: i64,
    pub admin_level: AdminLevel,
    /// Every other `NAME*` property, in property-key order.
    pub alternate_names: Vec<String>,
    pub geometry: MultiPolygon<f64>,
}

impl CountryShape {
    pub fn metadata(&self) -> CountryMeta {
        CountryMeta {
            admin: self.admin.clone(),
            name: self.name.clone(),
            iso2: self.iso2.clone(),
            iso3: self.iso3.clone(),
            continent: self.continent.clone(),
            population: self.population,
            admin_level: self.admin_level,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointMethod {
    /// The area centroid was already inside the mainland.
    Centroid,
    /// The centroid fell outside and the pole of inaccessibility was used.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepresentativePoint {
    pub lon: f64,
    pub lat: f64,
    pub method: PointMethod,
}

impl RepresentativePoint {
    pub fn point(&self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

/// A crawled radio station, as read from the crawler output.
///
/// Columns the pipeline does not interpret are kept in `extra` and written
/// back out unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    /// Free-text crawl label; blank when the crawler had none.
    #[serde(default, deserialize_with = "string_or_empty")]
    pub country: String,
    #[serde(rename = "channel_resolved_url", default)]
    pub stream_url: Option<String>,
    #[serde(rename = "channel_secure", default)]
    pub secure: bool,
    /// NaN when the cell was blank; such stations never match a polygon.
    #[serde(rename = "geo_lat", default = "missing_coordinate", deserialize_with = "f64_or_nan")]
    pub lat: f64,
    #[serde(rename = "geo_lon", default = "missing_coordinate", deserialize_with = "f64_or_nan")]
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_size: Option<i64>,
    #[serde(default)]
    pub boost: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn missing_coordinate() -> f64 {
    f64::NAN
}

fn f64_or_nan<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

fn string_or_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl StationRecord {
    /// Whether both coordinates are usable for a spatial join.
    pub fn has_coordinates(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }

    pub fn point(&self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.extra.get("channel_id").and_then(Value::as_str)
    }
}

/// Country columns copied onto every matched station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryMeta {
    #[serde(rename = "ADMIN")]
    pub admin: String,
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "ISO_A2")]
    pub iso2: String,
    #[serde(rename = "ISO_A3")]
    pub iso3: String,
    #[serde(rename = "CONTINENT")]
    pub continent: String,
    #[serde(rename = "POP_EST")]
    pub population: i64,
    #[serde(rename = "LEVEL")]
    pub admin_level: AdminLevel,
}

// `country` must stay first: its columns are claimed before the station's
// catch-all `extra` map sees the remaining keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedStation {
    #[serde(flatten)]
    pub country: CountryMeta,
    #[serde(flatten)]
    pub station: StationRecord,
}

impl EnrichedStation {
    pub fn admin(&self) -> &str {
        &self.country.admin
    }
}

/// A station that matched no shape, kept only for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct UnmatchedStation {
    pub station: StationRecord,
}

impl fmt::Display for CountryMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.admin, self.iso2)
    }
}
