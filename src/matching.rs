//! Assigning crawled stations to country shapes.
//!
//! Two strategies are available: a point-in-polygon join on the station's
//! coordinates, and a lookup of its free-text country label against every
//! known name variant. Both produce a [`MatchOutcome`] with the enriched
//! stations and a per-label count of the ones that could not be placed.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::labeling::{world_bbox, LabeledPartitionTree};
use crate::model::{CountryShape, EnrichedStation, StationRecord, UnmatchedStation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    #[default]
    PointInPolygon,
    Name,
}

/// Unmatched stations grouped by their original country label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnmatchedSummary {
    pub by_label: BTreeMap<String, usize>,
}

impl UnmatchedSummary {
    pub fn from_stations(unmatched: &[UnmatchedStation]) -> Self {
        let mut by_label = BTreeMap::new();
        for miss in unmatched {
            *by_label.entry(miss.station.country.clone()).or_insert(0) += 1;
        }
        UnmatchedSummary { by_label }
    }

    pub fn total(&self) -> usize {
        self.by_label.values().sum()
    }

    pub fn log(&self) {
        if self.by_label.is_empty() {
            info!("All stations matched a country");
            return;
        }
        warn!(
            "{} stations from {} labels matched no country and were dropped",
            self.total(),
            self.by_label.len()
        );
        for (label, count) in &self.by_label {
            warn!("  unmatched '{}': {} stations", label, count);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub enriched: Vec<EnrichedStation>,
    pub unmatched: Vec<UnmatchedStation>,
}

impl MatchOutcome {
    pub fn summary(&self) -> UnmatchedSummary {
        UnmatchedSummary::from_stations(&self.unmatched)
    }
}

/// Anything that can pick the shape index for a station.
pub trait CountryMatcher {
    fn find(&self, station: &StationRecord) -> Option<usize>;
}

/// Point-in-polygon matcher backed by a [`LabeledPartitionTree`] of shape
/// indices.
pub struct SpatialMatcher<'a> {
    shapes: &'a [CountryShape],
    tree: LabeledPartitionTree<usize>,
}

impl<'a> SpatialMatcher<'a> {
    pub fn new(shapes: &'a [CountryShape], max_depth: usize) -> Self {
        let labeled: Vec<(usize, &_)> = shapes
            .iter()
            .enumerate()
            .map(|(i, shape)| (i, &shape.geometry))
            .collect();
        let tree = LabeledPartitionTree::from_labeled_polygons(&labeled, world_bbox(), max_depth);
        debug!("Built partition tree with {} leaves", tree.size());
        SpatialMatcher { shapes, tree }
    }
}

impl CountryMatcher for SpatialMatcher<'_> {
    /// Overlapping claims resolve to the lowest admin level, then to the
    /// earliest shape.
    fn find(&self, station: &StationRecord) -> Option<usize> {
        if !station.has_coordinates() {
            return None;
        }
        let point = station.point();
        self.tree
            .containing_labels(&point, |&i| self.shapes.get(i).map(|s| &s.geometry))
            .into_iter()
            .min_by_key(|&i| (self.shapes[i].admin_level, i))
    }
}

/// Lowercase, trimmed form used on both sides of the name lookup.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Name matcher over a lookup built once from every name variant.
///
/// Variants are inserted `ADMIN` first, then `NAME`, then the alternate
/// names, each pass over the shapes in input order; the first shape to claim
/// a variant keeps it.
pub struct NameMatcher {
    lookup: HashMap<String, usize>,
}

impl NameMatcher {
    pub fn new(shapes: &[CountryShape]) -> Self {
        let mut lookup = HashMap::new();
        let mut insert = |name: &str, index: usize| {
            let key = normalize_name(name);
            if !key.is_empty() {
                lookup.entry(key).or_insert(index);
            }
        };
        for (i, shape) in shapes.iter().enumerate() {
            insert(&shape.admin, i);
        }
        for (i, shape) in shapes.iter().enumerate() {
            insert(&shape.name, i);
        }
        let max_alternates = shapes.iter().map(|s| s.alternate_names.len()).max().unwrap_or(0);
        for column in 0..max_alternates {
            for (i, shape) in shapes.iter().enumerate() {
                if let Some(name) = shape.alternate_names.get(column) {
                    insert(name, i);
                }
            }
        }
        info!("Name lookup built with {} unique variants", lookup.len());
        NameMatcher { lookup }
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }
}

impl CountryMatcher for NameMatcher {
    fn find(&self, station: &StationRecord) -> Option<usize> {
        self.lookup.get(&normalize_name(&station.country)).copied()
    }
}

/// Attach country metadata to every station the matcher can place.
pub fn match_with<M: CountryMatcher>(
    matcher: &M,
    stations: Vec<StationRecord>,
    shapes: &[CountryShape],
) -> MatchOutcome {
    let mut outcome = MatchOutcome::default();
    for station in stations {
        match matcher.find(&station).and_then(|i| shapes.get(i)) {
            Some(shape) => outcome.enriched.push(EnrichedStation {
                country: shape.metadata(),
                station,
            }),
            None => outcome.unmatched.push(UnmatchedStation { station }),
        }
    }
    info!(
        "Matched {} stations, {} unmatched",
        outcome.enriched.len(),
        outcome.unmatched.len()
    );
    outcome
}

pub fn match_stations(
    stations: Vec<StationRecord>,
    shapes: &[CountryShape],
    strategy: MatchStrategy,
    quadtree_depth: usize,
) -> MatchOutcome {
    match strategy {
        MatchStrategy::PointInPolygon => {
            let matcher = SpatialMatcher::new(shapes, quadtree_depth);
            match_with(&matcher, stations, shapes)
        }
        MatchStrategy::Name => match_with(&NameMatcher::new(shapes), stations, shapes),
    }
}
