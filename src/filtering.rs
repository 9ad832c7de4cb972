//! Station quality filters and country-level thresholds.
//!
//! Station-level filters report before/after counts; country-level filters
//! report every excluded group with the reason it fell out. None of these
//! reports stop the pipeline.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PrepError, Result};
use crate::geometry::equal_area_km2;
use crate::model::{CountryShape, EnrichedStation, StationRecord};

#[derive(Debug, Clone, PartialEq)]
pub struct FilterReport {
    pub description: String,
    pub before: usize,
    pub after: usize,
}

impl FilterReport {
    pub fn removed(&self) -> usize {
        self.before - self.after
    }

    fn log(&self) {
        info!(
            "{}: {} -> {} stations (removed {})",
            self.description,
            self.before,
            self.after,
            self.removed()
        );
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExclusionReason {
    BelowMinStations { min: usize },
    BelowPopulation { population: i64, threshold: f64 },
    BelowArea { area_km2: f64, threshold: f64 },
}

/// A whole country dropped by a threshold filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ExcludedGroup {
    pub key: String,
    pub stations: usize,
    pub reason: ExclusionReason,
}

fn log_exclusions(excluded: &[ExcludedGroup]) {
    for group in excluded {
        warn!(
            "Excluding {} ({} stations): {:?}",
            group.key, group.stations, group.reason
        );
    }
}

fn apply_filter<T>(
    records: Vec<T>,
    description: &str,
    keep: impl Fn(&T) -> bool,
) -> (Vec<T>, FilterReport) {
    let before = records.len();
    let kept: Vec<T> = records.into_iter().filter(|r| keep(r)).collect();
    let report = FilterReport {
        description: description.to_string(),
        before,
        after: kept.len(),
    };
    report.log();
    (kept, report)
}

/// Drop stations without a resolved stream URL and, optionally, insecure ones.
pub fn filter_quality(
    stations: Vec<StationRecord>,
    require_stream_url: bool,
    require_secure: bool,
) -> (Vec<StationRecord>, Vec<FilterReport>) {
    let mut reports = Vec::new();
    let mut stations = stations;
    if require_stream_url {
        let (kept, report) = apply_filter(stations, "Removing stations without resolved URLs", |s| {
            s.stream_url.as_deref().map(|u| !u.trim().is_empty()).unwrap_or(false)
        });
        stations = kept;
        reports.push(report);
    }
    if require_secure {
        let (kept, report) =
            apply_filter(stations, "Removing stations with insecure channels", |s| s.secure);
        stations = kept;
        reports.push(report);
    }
    (stations, reports)
}

/// Keep the first station for each `channel_id`; stations without one are
/// always kept.
pub fn dedupe_channels(stations: Vec<EnrichedStation>) -> (Vec<EnrichedStation>, FilterReport) {
    let mut seen = HashSet::new();
    let before = stations.len();
    let kept: Vec<EnrichedStation> = stations
        .into_iter()
        .filter(|s| match s.station.channel_id() {
            Some(id) => seen.insert(id.to_string()),
            None => true,
        })
        .collect();
    let report = FilterReport {
        description: "Removing duplicate channels".to_string(),
        before,
        after: kept.len(),
    };
    report.log();
    (kept, report)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputedMerge {
    /// `ADMIN` of the territory whose stations are reassigned.
    pub from: String,
    /// `ADMIN` of the country that absorbs them.
    pub into: String,
}

/// Versioned list of territories folded into another country after the join.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputedMerges {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub merges: Vec<DisputedMerge>,
}

impl DisputedMerges {
    /// Reassign stations of every `from` territory to its `into` country.
    pub fn apply(
        &self,
        stations: Vec<EnrichedStation>,
        shapes: &[CountryShape],
    ) -> Result<Vec<EnrichedStation>> {
        if self.merges.is_empty() {
            return Ok(stations);
        }
        let by_admin: HashMap<&str, &CountryShape> =
            shapes.iter().map(|s| (s.admin.as_str(), s)).collect();
        let mut targets = HashMap::new();
        for merge in &self.merges {
            let target = by_admin
                .get(merge.into.as_str())
                .ok_or_else(|| PrepError::UnknownCountry(merge.into.clone()))?;
            targets.insert(merge.from.as_str(), target.metadata());
        }

        let mut moved = 0;
        let stations = stations
            .into_iter()
            .map(|mut s| {
                if let Some(target) = targets.get(s.admin()) {
                    s.country = target.clone();
                    moved += 1;
                }
                s
            })
            .collect();
        info!(
            "Disputed territory merges v{}: reassigned {} stations",
            self.version, moved
        );
        Ok(stations)
    }
}

/// Quantile with linear interpolation between closest ranks.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

fn count_by_admin(stations: &[EnrichedStation]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for s in stations {
        *counts.entry(s.admin().to_string()).or_insert(0) += 1;
    }
    counts
}

fn exclude_groups(
    stations: Vec<EnrichedStation>,
    description: &str,
    reason_for: impl Fn(&EnrichedStation) -> Option<ExclusionReason>,
) -> (Vec<EnrichedStation>, Vec<ExcludedGroup>) {
    let counts = count_by_admin(&stations);
    let mut excluded: BTreeMap<String, ExcludedGroup> = BTreeMap::new();
    let before = stations.len();
    let kept: Vec<EnrichedStation> = stations
        .into_iter()
        .filter(|s| match reason_for(s) {
            Some(reason) => {
                excluded
                    .entry(s.admin().to_string())
                    .or_insert_with(|| ExcludedGroup {
                        key: s.admin().to_string(),
                        stations: counts.get(s.admin()).copied().unwrap_or(0),
                        reason,
                    });
                false
            }
            None => true,
        })
        .collect();
    FilterReport {
        description: description.to_string(),
        before,
        after: kept.len(),
    }
    .log();
    let excluded: Vec<ExcludedGroup> = excluded.into_values().collect();
    log_exclusions(&excluded);
    (kept, excluded)
}

/// Drop countries whose population is below the given percentile of all
/// shapes' populations.
pub fn filter_by_population(
    stations: Vec<EnrichedStation>,
    shapes: &[CountryShape],
    percentile: f64,
) -> (Vec<EnrichedStation>, Vec<ExcludedGroup>) {
    let populations: Vec<f64> = shapes.iter().map(|s| s.population as f64).collect();
    let Some(threshold) = quantile(&populations, percentile) else {
        return (stations, vec![]);
    };
    info!(
        "Population threshold ({:.0}th percentile): {:.0}",
        percentile * 100.0,
        threshold
    );
    exclude_groups(stations, "Removing low-population countries", |s| {
        ((s.country.population as f64) < threshold).then_some(ExclusionReason::BelowPopulation {
            population: s.country.population,
            threshold,
        })
    })
}

/// Drop countries whose equal-area size is below the given percentile of all
/// shapes' areas.
pub fn filter_by_area(
    stations: Vec<EnrichedStation>,
    shapes: &[CountryShape],
    percentile: f64,
) -> (Vec<EnrichedStation>, Vec<ExcludedGroup>) {
    let areas: HashMap<&str, f64> = shapes
        .iter()
        .map(|s| (s.admin.as_str(), equal_area_km2(&s.geometry)))
        .collect();
    let all: Vec<f64> = areas.values().copied().collect();
    let Some(threshold) = quantile(&all, percentile) else {
        return (stations, vec![]);
    };
    info!(
        "Area threshold ({:.0}th percentile): {:.0} km²",
        percentile * 100.0,
        threshold
    );
    exclude_groups(stations, "Removing small-area countries", |s| {
        let area_km2 = areas.get(s.admin()).copied().unwrap_or(0.0);
        (area_km2 < threshold).then_some(ExclusionReason::BelowArea {
            area_km2,
            threshold,
        })
    })
}

/// Drop every country with fewer than `min` stations.
///
/// Applying this twice gives the same result as applying it once.
pub fn enforce_min_stations(
    stations: Vec<EnrichedStation>,
    min: usize,
) -> (Vec<EnrichedStation>, Vec<ExcludedGroup>) {
    let counts = count_by_admin(&stations);
    exclude_groups(
        stations,
        &format!("Removing countries with < {min} stations"),
        |s| {
            let count = counts.get(s.admin()).copied().unwrap_or(0);
            (count < min).then_some(ExclusionReason::BelowMinStations { min })
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AdminLevel, CountryMeta};
    use geo::{LineString, MultiPolygon, Polygon};
    use serde_json::{json, Map};

    fn meta(admin: &str, population: i64) -> CountryMeta {
        CountryMeta {
            admin: admin.to_string(),
            name: admin.to_string(),
            iso2: admin[..2].to_uppercase(),
            iso3: admin[..3].to_uppercase(),
            continent: "Oceania".to_string(),
            population,
            admin_level: AdminLevel::Sovereign,
        }
    }

    fn record(url: Option<&str>, secure: bool) -> StationRecord {
        StationRecord {
            country: "x".to_string(),
            stream_url: url.map(str::to_string),
            secure,
            lat: 0.0,
            lon: 0.0,
            place_size: None,
            boost: false,
            extra: Map::new(),
        }
    }

    fn enriched(admin: &str, population: i64, channel: &str) -> EnrichedStation {
        let mut station = record(Some("https://s"), true);
        station.extra.insert("channel_id".to_string(), json!(channel));
        EnrichedStation {
            country: meta(admin, population),
            station,
        }
    }

    fn shape(admin: &str, population: i64, side: f64) -> CountryShape {
        CountryShape {
            admin: admin.to_string(),
            name: admin.to_string(),
            iso2: admin[..2].to_uppercase(),
            iso3: admin[..3].to_uppercase(),
            continent: "Oceania".to_string(),
            population,
            admin_level: AdminLevel::Sovereign,
            alternate_names: vec![],
            geometry: MultiPolygon::new(vec![Polygon::new(
                LineString::from(vec![(0.0, 0.0), (side, 0.0), (side, side), (0.0, side), (0.0, 0.0)]),
                vec![],
            )]),
        }
    }

    #[test]
    fn quality_filters_drop_missing_and_insecure() {
        let stations = vec![
            record(Some("https://a"), true),
            record(None, true),
            record(Some("  "), true),
            record(Some("http://b"), false),
        ];
        let (kept, reports) = filter_quality(stations, true, true);
        assert_eq!(kept.len(), 1);
        assert_eq!(reports[0].removed(), 2);
        assert_eq!(reports[1].removed(), 1);
    }

    #[test]
    fn min_station_filter_is_idempotent() {
        let mut stations = vec![];
        for i in 0..5 {
            stations.push(enriched("Alpha", 10, &format!("a{i}")));
        }
        for i in 0..2 {
            stations.push(enriched("Beta", 10, &format!("b{i}")));
        }
        let (once, excluded) = enforce_min_stations(stations, 3);
        assert_eq!(once.len(), 5);
        assert_eq!(excluded.len(), 1);
        assert_eq!(excluded[0].key, "Beta");
        assert_eq!(excluded[0].stations, 2);

        let (twice, excluded_again) = enforce_min_stations(once.clone(), 3);
        assert_eq!(twice, once);
        assert!(excluded_again.is_empty());
    }

    #[test]
    fn dedupe_keeps_first_channel() {
        let stations = vec![
            enriched("Alpha", 1, "same"),
            enriched("Beta", 1, "same"),
            enriched("Alpha", 1, "other"),
        ];
        let (kept, report) = dedupe_channels(stations);
        assert_eq!(report.removed(), 1);
        assert_eq!(kept[0].admin(), "Alpha");
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn quantile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&values, 0.0), Some(1.0));
        assert_eq!(quantile(&values, 1.0), Some(4.0));
        assert_eq!(quantile(&values, 0.5), Some(2.5));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn population_and_area_thresholds() {
        let shapes = vec![shape("Tiny", 10, 0.1), shape("Large", 1_000, 5.0)];
        let stations = vec![enriched("Tiny", 10, "t"), enriched("Large", 1_000, "l")];

        let (kept, excluded) = filter_by_population(stations.clone(), &shapes, 0.0);
        assert_eq!(kept.len(), 2);
        assert!(excluded.is_empty());

        let (kept, excluded) = filter_by_population(stations.clone(), &shapes, 0.5);
        assert_eq!(kept.len(), 1);
        assert_eq!(excluded[0].key, "Tiny");

        let (kept, excluded) = filter_by_area(stations, &shapes, 0.5);
        assert_eq!(kept[0].admin(), "Large");
        assert!(matches!(excluded[0].reason, ExclusionReason::BelowArea { .. }));
    }

    #[test]
    fn disputed_merge_reassigns_country() {
        let shapes = vec![shape("Northern Cyprus", 300, 1.0), shape("Cyprus", 1_000, 1.0)];
        let merges = DisputedMerges {
            version: 1,
            merges: vec![DisputedMerge {
                from: "Northern Cyprus".to_string(),
                into: "Cyprus".to_string(),
            }],
        };
        let merged = merges
            .apply(vec![enriched("Northern Cyprus", 300, "n")], &shapes)
            .unwrap();
        assert_eq!(merged[0].admin(), "Cyprus");
        assert_eq!(merged[0].country.population, 1_000);

        let bad = DisputedMerges {
            version: 1,
            merges: vec![DisputedMerge {
                from: "A".to_string(),
                into: "Nowhere".to_string(),
            }],
        };
        assert!(matches!(
            bad.apply(vec![], &shapes),
            Err(PrepError::UnknownCountry(name)) if name == "Nowhere"
        ));
    }
}
