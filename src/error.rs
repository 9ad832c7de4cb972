//! Error types for the preparation pipeline.
//!
//! Per-record problems (unmatched labels, countries below a threshold) are not
//! errors; they are collected into reports by the stage that finds them. The
//! variants here are the ones that stop a run, plus [`GeometryError`], which
//! callers decide how to handle per country.

use std::path::PathBuf;
use thiserror::Error;

/// Why a country shape could not be reduced to a representative point.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("geometry has no polygons")]
    Empty,

    #[error("mainland polygon has zero area")]
    ZeroArea,

    #[error("geometry contains non-finite coordinates")]
    Degenerate,

    #[error("no interior point found (best candidate at {lon}, {lat})")]
    NoInteriorPoint { lon: f64, lat: f64 },
}

#[derive(Error, Debug)]
pub enum PrepError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("GeoJSON error in {path}: {source}")]
    GeoJson {
        path: PathBuf,
        #[source]
        source: Box<geojson::Error>,
    },

    #[error("download of {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("missing required column '{column}' in {path}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("invalid value in {path}, row {row}: {reason}")]
    InvalidRecord {
        path: PathBuf,
        row: usize,
        reason: String,
    },

    #[error("geometry error for {country}: {source}")]
    Geometry {
        country: String,
        #[source]
        source: GeometryError,
    },

    #[error(
        "record {line} is {length} bytes including newline but the line length is {line_length}"
    )]
    RecordTooLong {
        line: usize,
        length: usize,
        line_length: usize,
    },

    #[error("record {line} reopens group '{key}'; records must be sorted by key")]
    UnsortedInput { line: usize, key: String },

    #[error("record {line} has no string field '{key}' to group by")]
    MissingGroupKey { line: usize, key: String },

    #[error("station {index} is out of range for {country} ({count} stations)")]
    StationOutOfRange {
        country: String,
        index: usize,
        count: usize,
    },

    #[error("unknown country key: {0}")]
    UnknownCountry(String),

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("server error: {message}")]
    Server { message: String },
}

impl PrepError {
    /// Wrap an IO error with the path that was being read or written.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PrepError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        PrepError::Config {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PrepError>;
