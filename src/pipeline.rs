//! Stage orchestration.
//!
//! Each stage is callable on its own (the CLI exposes them as subcommands)
//! and [`run`] chains them in the one fixed order:
//! quality filters, join, dedupe and disputed merges, population and area
//! percentiles, minimum-count recheck, sampling, packing.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::datasets::{self, write_centroids};
use crate::error::{PrepError, Result};
use crate::filtering::{
    dedupe_channels, enforce_min_stations, filter_by_area, filter_by_population, filter_quality,
    ExcludedGroup, FilterReport,
};
use crate::geometry::reduce_all;
use crate::matching::{match_stations, UnmatchedSummary};
use crate::model::{CountryShape, EnrichedStation, PointMethod, StationRecord};
use crate::packing::{pack, CountryIndex};
use crate::sampling::sample_per_country;

pub const STATIONS_FILE: &str = "stations.jsonl";
pub const INDEX_FILE: &str = "index.json";
pub const CENTROIDS_FILE: &str = "country_centroids.geojson";
pub const ENRICHED_FILE: &str = "stations_enriched.json";
pub const SAMPLED_FILE: &str = "stations_sampled.json";

/// Where a full run writes its files.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub data: PathBuf,
    pub index: PathBuf,
    pub centroids: PathBuf,
    pub enriched: PathBuf,
    pub sampled: PathBuf,
}

impl OutputPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            data: dir.join(STATIONS_FILE),
            index: dir.join(INDEX_FILE),
            centroids: dir.join(CENTROIDS_FILE),
            enriched: dir.join(ENRICHED_FILE),
            sampled: dir.join(SAMPLED_FILE),
        }
    }
}

/// Everything a run dropped or could not place, for manual review.
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// One `PrepError::Geometry` per country without a representative point.
    pub geometry_failures: Vec<PrepError>,
    pub unmatched: UnmatchedSummary,
    pub filters: Vec<FilterReport>,
    pub excluded: Vec<ExcludedGroup>,
    pub countries: usize,
    pub stations: usize,
}

impl PipelineReport {
    pub fn log(&self) {
        for failure in &self.geometry_failures {
            warn!("No representative point: {}", failure);
        }
        self.unmatched.log();
        if !self.excluded.is_empty() {
            warn!("{} countries excluded", self.excluded.len());
        }
        info!(
            "Final dataset: {} stations across {} countries",
            self.stations, self.countries
        );
    }
}

/// Reduce every shape to a point and write the centroid GeoJSON.
pub fn prepare_geometry(
    shapes: &[CountryShape],
    centroids_path: &Path,
) -> Result<Vec<PrepError>> {
    let (points, failures) = reduce_all(shapes);
    let fallbacks = points
        .iter()
        .filter(|(_, p)| p.method == PointMethod::Fallback)
        .count();
    info!(
        "Reduced {} shapes ({} via pole of inaccessibility, {} failed)",
        points.len(),
        fallbacks,
        failures.len()
    );
    write_centroids(centroids_path, &points)?;
    Ok(failures
        .into_iter()
        .map(|(shape, source)| PrepError::Geometry {
            country: shape.admin.clone(),
            source,
        })
        .collect())
}

/// Filter, join and threshold the raw stations.
pub fn enrich(
    stations: Vec<StationRecord>,
    shapes: &[CountryShape],
    config: &PipelineConfig,
    report: &mut PipelineReport,
) -> Result<Vec<EnrichedStation>> {
    let (stations, quality) =
        filter_quality(stations, config.require_stream_url, config.require_secure);
    report.filters.extend(quality);

    let outcome = match_stations(stations, shapes, config.match_strategy, config.quadtree_depth);
    report.unmatched = outcome.summary();

    let (enriched, dedupe) = dedupe_channels(outcome.enriched);
    report.filters.push(dedupe);
    let enriched = config.disputed_merges.apply(enriched, shapes)?;

    let (enriched, excluded) = filter_by_population(enriched, shapes, config.population_percentile);
    report.excluded.extend(excluded);
    let (enriched, excluded) = filter_by_area(enriched, shapes, config.area_percentile);
    report.excluded.extend(excluded);
    let (enriched, excluded) = enforce_min_stations(enriched, config.min_stations);
    report.excluded.extend(excluded);

    Ok(enriched)
}

/// Pack the records and write the data/index pair.
pub fn package(
    stations: &[EnrichedStation],
    config: &PipelineConfig,
    data_path: &Path,
    index_path: &Path,
) -> Result<CountryIndex> {
    let packed = pack(stations, &config.group_key, config.padding_slack)?;
    packed.write(data_path, index_path)?;
    Ok(packed.index)
}

/// Run every stage from the raw inputs to the packed files.
pub fn run(
    boundaries: &Path,
    stations_path: &Path,
    outputs: &OutputPaths,
    config: &PipelineConfig,
) -> Result<PipelineReport> {
    config.validate()?;
    let shapes = datasets::load_country_shapes(boundaries)?;
    let stations = datasets::load_stations(stations_path)?;

    let mut report = PipelineReport {
        geometry_failures: prepare_geometry(&shapes, &outputs.centroids)?,
        ..PipelineReport::default()
    };

    let enriched = enrich(stations, &shapes, config, &mut report)?;
    datasets::write_enriched(&outputs.enriched, &enriched)?;

    let sampled = sample_per_country(enriched, &config.sampling());
    datasets::write_enriched(&outputs.sampled, &sampled)?;

    let index = package(&sampled, config, &outputs.data, &outputs.index)?;
    report.countries = index.countries.len();
    report.stations = index.total_records();
    report.log();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeometryError;
    use crate::model::AdminLevel;
    use geo::{LineString, MultiPolygon, Polygon};
    use serde_json::Value;
    use tempfile::TempDir;

    fn shape(admin: &str, ring: Vec<(f64, f64)>) -> CountryShape {
        CountryShape {
            admin: admin.to_string(),
            name: admin.to_string(),
            iso2: admin[..2].to_uppercase(),
            iso3: admin[..3].to_uppercase(),
            continent: "Imaginary".to_string(),
            population: 1,
            admin_level: AdminLevel::Sovereign,
            alternate_names: vec![],
            geometry: MultiPolygon::new(vec![Polygon::new(LineString::from(ring), vec![])]),
        }
    }

    #[test]
    fn geometry_failures_are_reported_per_country() {
        let shapes = vec![
            shape(
                "Squareland",
                vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)],
            ),
            shape(
                "Flatland",
                vec![(0.0, 0.0), (4.0, 0.0), (8.0, 0.0), (0.0, 0.0)],
            ),
        ];
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CENTROIDS_FILE);

        let failures = prepare_geometry(&shapes, &path).unwrap();
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            &failures[0],
            PrepError::Geometry { country, source: GeometryError::ZeroArea } if country == "Flatland"
        ));

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["features"].as_array().unwrap().len(), 1);
        assert_eq!(written["features"][0]["properties"]["admin"], "Squareland");
    }
}
