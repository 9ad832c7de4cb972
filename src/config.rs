//! Pipeline configuration.
//!
//! Loaded from a JSON file when one is given; every field has a default so a
//! partial file (or none at all) is valid.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PrepError, Result};
use crate::filtering::DisputedMerges;
use crate::matching::MatchStrategy;
use crate::sampling::SamplingConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Countries with fewer matched stations are dropped.
    pub min_stations: usize,
    /// Fraction in [0, 1]; countries below this population quantile are dropped.
    pub population_percentile: f64,
    /// Fraction in [0, 1]; countries below this area quantile are dropped.
    pub area_percentile: f64,
    pub require_stream_url: bool,
    pub require_secure: bool,
    pub samples_per_country: usize,
    pub sample_seed: u64,
    pub large_place_size: i64,
    pub boosted_per_country: usize,
    /// Extra bytes added to the longest record when choosing the line length.
    pub padding_slack: usize,
    /// Record field the packed file is grouped and indexed by.
    pub group_key: String,
    pub match_strategy: MatchStrategy,
    pub quadtree_depth: usize,
    pub disputed_merges: DisputedMerges,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let sampling = SamplingConfig::default();
        Self {
            min_stations: 5,
            population_percentile: 0.0,
            area_percentile: 0.0,
            require_stream_url: true,
            require_secure: true,
            samples_per_country: sampling.per_country,
            sample_seed: sampling.seed,
            large_place_size: sampling.large_place_size,
            boosted_per_country: sampling.boosted,
            padding_slack: 16,
            group_key: "ADMIN".to_string(),
            match_strategy: MatchStrategy::PointInPolygon,
            quadtree_depth: 6,
            disputed_merges: DisputedMerges::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PrepError::io(path, e))?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("population_percentile", self.population_percentile),
            ("area_percentile", self.area_percentile),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PrepError::config(format!(
                    "{name} must be between 0 and 1, got {value}"
                )));
            }
        }
        if self.min_stations == 0 {
            return Err(PrepError::config("min_stations must be at least 1"));
        }
        if self.samples_per_country == 0 {
            return Err(PrepError::config("samples_per_country must be at least 1"));
        }
        if self.group_key.trim().is_empty() {
            return Err(PrepError::config("group_key must not be empty"));
        }
        for merge in &self.disputed_merges.merges {
            if merge.from == merge.into {
                return Err(PrepError::config(format!(
                    "disputed merge of '{}' into itself",
                    merge.from
                )));
            }
        }
        Ok(())
    }

    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            per_country: self.samples_per_country,
            seed: self.sample_seed,
            large_place_size: self.large_place_size,
            boosted: self.boosted_per_country,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_stations, 5);
        assert_eq!(config.sampling(), SamplingConfig::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"min_stations": 3, "match_strategy": "name",
                "disputed_merges": {{"version": 2, "merges": [{{"from": "Somaliland", "into": "Somalia"}}]}}}}"#
        )
        .unwrap();
        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.min_stations, 3);
        assert_eq!(config.match_strategy, MatchStrategy::Name);
        assert_eq!(config.disputed_merges.version, 2);
        assert_eq!(config.padding_slack, 16);
    }

    #[test]
    fn rejects_out_of_range_percentile() {
        let config = PipelineConfig {
            area_percentile: 1.5,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(PrepError::Config { .. })));
    }
}
