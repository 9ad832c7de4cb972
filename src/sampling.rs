//! Seeded per-country station sampling.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::EnrichedStation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub per_country: usize,
    pub seed: u64,
    /// A station counts as "large place" when its `place_size` exceeds this.
    pub large_place_size: i64,
    pub boosted: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            per_country: 5,
            seed: 42,
            large_place_size: 7,
            boosted: 2,
        }
    }
}

/// Pick up to `per_country` stations for each country.
///
/// Countries are visited in key order with one RNG, so the result depends
/// only on the input and the seed. Each selection tries for one station from a
/// large place, then up to `boosted` boosted stations, then fills the rest at
/// random, and is shuffled before being appended.
pub fn sample_per_country(
    stations: Vec<EnrichedStation>,
    config: &SamplingConfig,
) -> Vec<EnrichedStation> {
    let mut groups: BTreeMap<String, Vec<EnrichedStation>> = BTreeMap::new();
    for station in stations {
        groups.entry(station.admin().to_string()).or_default().push(station);
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut sampled = Vec::new();
    for (admin, group) in groups {
        let total = group.len();
        let mut chosen: Vec<usize> = Vec::with_capacity(config.per_country);

        let large: Vec<usize> = (0..total)
            .filter(|&i| {
                group[i]
                    .station
                    .place_size
                    .map(|size| size > config.large_place_size)
                    .unwrap_or(false)
            })
            .collect();
        if config.per_country > 0 {
            if let Some(&i) = large.choose(&mut rng) {
                chosen.push(i);
            }
        }

        let boosted: Vec<usize> = (0..total)
            .filter(|&i| group[i].station.boost && !chosen.contains(&i))
            .collect();
        let take = config.boosted.min(boosted.len()).min(config.per_country - chosen.len());
        chosen.extend(boosted.choose_multiple(&mut rng, take).copied());

        let rest: Vec<usize> = (0..total).filter(|i| !chosen.contains(i)).collect();
        let take = config.per_country.saturating_sub(chosen.len()).min(rest.len());
        chosen.extend(index::sample(&mut rng, rest.len(), take).into_iter().map(|j| rest[j]));

        chosen.shuffle(&mut rng);
        debug!("{}: selected {} of {} stations", admin, chosen.len(), total);

        let mut slots: Vec<Option<EnrichedStation>> = group.into_iter().map(Some).collect();
        sampled.extend(chosen.into_iter().filter_map(|i| slots[i].take()));
    }
    info!("Sampled {} stations", sampled.len());
    sampled
}
