/// This script reads stations back out of the packed output the same way the
/// map client does.
///
/// It performs the following steps:
/// 1. Loads `index.json` to learn the line length and each country's byte range.
/// 2. Picks a random station for a handful of countries.
/// 3. Reads exactly one line per station with a single seek, as a range request would.

use std::{env, path::PathBuf, time::Instant};

use hearo_prep::packing::{load_index, read_station_from_file};
use hearo_prep::pipeline::{INDEX_FILE, STATIONS_FILE};
use rand::seq::IteratorRandom;
use rand::Rng;

pub fn main() {
    let dir = PathBuf::from(env::args().nth(1).unwrap_or_else(|| "public".to_string()));
    let index = load_index(&dir.join(INDEX_FILE)).unwrap();
    let data_path = dir.join(STATIONS_FILE);

    let mut rng = rand::thread_rng();
    let countries = index.countries.iter().choose_multiple(&mut rng, 10);

    let t0 = Instant::now();
    for (country, entry) in &countries {
        let k = rng.gen_range(0..entry.count);
        let offset = index.offset_of(country, k).unwrap();
        let station = read_station_from_file(&data_path, &index, country, k).unwrap();
        println!(
            "{country} #{k} @ bytes={}-{}: {}",
            offset,
            offset + index.line_length() as u64 - 1,
            station["channel_name"].as_str().unwrap_or("?")
        );
    }

    println!(
        "{} lookups in {:.4} seconds (line length {}, {} stations total).",
        countries.len(),
        t0.elapsed().as_secs_f64(),
        index.line_length(),
        index.total_records()
    );
}
