//! Fixed-width JSONL packing with a per-country byte index.
//!
//! Every record is written as one JSON object right-padded with spaces to a
//! shared line length, so the k-th station of a country starts at
//! `start + k * line_length`. A client can fetch any single station with one
//! HTTP range request and no scanning.
//!
//! Packing runs in two phases. [`scan_line_length`] walks the whole dataset
//! and returns the line length; [`pack_lines`] is then a pure function of that
//! value. A record that does not fit aborts the run instead of being
//! truncated.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::datasets::stage;
use crate::error::{PrepError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub line_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryIndexEntry {
    pub start: u64,
    pub count: usize,
}

/// The index file: shared line length plus one byte range per country.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryIndex {
    pub config: IndexConfig,
    pub countries: BTreeMap<String, CountryIndexEntry>,
}

impl CountryIndex {
    pub fn line_length(&self) -> usize {
        self.config.line_length
    }

    /// Byte offset of the k-th station of `country`.
    pub fn offset_of(&self, country: &str, k: usize) -> Result<u64> {
        let entry = self
            .countries
            .get(country)
            .ok_or_else(|| PrepError::UnknownCountry(country.to_string()))?;
        if k >= entry.count {
            return Err(PrepError::StationOutOfRange {
                country: country.to_string(),
                index: k,
                count: entry.count,
            });
        }
        Ok(entry.start + (k * self.config.line_length) as u64)
    }

    pub fn total_records(&self) -> usize {
        self.countries.values().map(|e| e.count).sum()
    }
}

/// One serialized record with the key it is grouped under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedRecord {
    pub key: String,
    pub json: String,
}

impl SerializedRecord {
    /// Bytes the record occupies before padding, newline included.
    pub fn line_bytes(&self) -> usize {
        self.json.len() + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedDataset {
    pub data: Vec<u8>,
    pub index: CountryIndex,
}

impl PackedDataset {
    /// Write the data and index files. The index is renamed last; if that
    /// fails, no index is left beside the new data.
    pub fn write(&self, data_path: &Path, index_path: &Path) -> Result<()> {
        let index_json = serde_json::to_vec(&self.index)?;
        let data_tmp = stage(data_path, &self.data)?;
        let index_tmp = stage(index_path, &index_json)?;

        data_tmp
            .persist(data_path)
            .map_err(|e| PrepError::io(data_path, e.error))?;
        if let Err(e) = index_tmp.persist(index_path) {
            let _ = fs::remove_file(index_path);
            return Err(PrepError::io(index_path, e.error));
        }
        info!(
            "Wrote {} ({} bytes) and {}",
            data_path.display(),
            self.data.len(),
            index_path.display()
        );
        Ok(())
    }
}

/// Serialize records and stable-sort them by their `group_key` field.
pub fn serialize_sorted<T: Serialize>(records: &[T], group_key: &str) -> Result<Vec<SerializedRecord>> {
    let mut serialized = records
        .iter()
        .enumerate()
        .map(|(line, record)| -> Result<SerializedRecord> {
            let value = serde_json::to_value(record)?;
            let key = value
                .get(group_key)
                .and_then(Value::as_str)
                .ok_or_else(|| PrepError::MissingGroupKey {
                    line,
                    key: group_key.to_string(),
                })?
                .to_string();
            let json = serde_json::to_string(&value)?;
            Ok(SerializedRecord { key, json })
        })
        .collect::<Result<Vec<_>>>()?;
    serialized.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(serialized)
}

/// First phase: the longest line in the dataset plus `padding_slack`.
pub fn scan_line_length(records: &[SerializedRecord], padding_slack: usize) -> usize {
    let longest = records.iter().map(SerializedRecord::line_bytes).max().unwrap_or(1);
    longest + padding_slack
}

/// Second phase: pad every record to `line_length` and index the groups.
///
/// `records` must already be sorted by key; a key that reappears after
/// another group is rejected.
pub fn pack_lines(records: &[SerializedRecord], line_length: usize) -> Result<PackedDataset> {
    let mut data = Vec::with_capacity(records.len() * line_length);
    let mut countries: BTreeMap<String, CountryIndexEntry> = BTreeMap::new();
    let mut current: Option<&str> = None;

    for (line, record) in records.iter().enumerate() {
        let length = record.line_bytes();
        if length > line_length {
            return Err(PrepError::RecordTooLong {
                line,
                length,
                line_length,
            });
        }
        let offset = data.len() as u64;
        if current == Some(record.key.as_str()) {
            if let Some(entry) = countries.get_mut(&record.key) {
                entry.count += 1;
            }
        } else if countries.contains_key(&record.key) {
            return Err(PrepError::UnsortedInput {
                line,
                key: record.key.clone(),
            });
        } else {
            countries.insert(
                record.key.clone(),
                CountryIndexEntry {
                    start: offset,
                    count: 1,
                },
            );
            current = Some(record.key.as_str());
        }

        data.extend_from_slice(record.json.as_bytes());
        data.resize(offset as usize + line_length - 1, b' ');
        data.push(b'\n');
    }

    Ok(PackedDataset {
        data,
        index: CountryIndex {
            config: IndexConfig { line_length },
            countries,
        },
    })
}

/// Sort, scan and pack in one call.
pub fn pack<T: Serialize>(records: &[T], group_key: &str, padding_slack: usize) -> Result<PackedDataset> {
    let serialized = serialize_sorted(records, group_key)?;
    let line_length = scan_line_length(&serialized, padding_slack);
    let packed = pack_lines(&serialized, line_length)?;

    let average = if serialized.is_empty() {
        0.0
    } else {
        serialized.iter().map(|r| r.line_bytes()).sum::<usize>() as f64 / serialized.len() as f64
    };
    info!(
        "Packed {} records into {} groups, line length {} (average record {:.1} bytes)",
        serialized.len(),
        packed.index.countries.len(),
        line_length,
        average
    );
    Ok(packed)
}

/// Parse one fixed-width line, ignoring the padding and newline.
pub fn parse_line(line: &[u8]) -> Result<Value> {
    let end = line
        .iter()
        .rposition(|b| !matches!(b, b' ' | b'\n' | b'\r'))
        .map(|i| i + 1)
        .unwrap_or(0);
    Ok(serde_json::from_slice(&line[..end])?)
}

/// Read the k-th station of `country` from an in-memory data blob.
pub fn read_station(data: &[u8], index: &CountryIndex, country: &str, k: usize) -> Result<Value> {
    let start = index.offset_of(country, k)? as usize;
    let end = start + index.line_length();
    let line = data.get(start..end).ok_or_else(|| PrepError::StationOutOfRange {
        country: country.to_string(),
        index: k,
        count: index.countries.get(country).map(|e| e.count).unwrap_or(0),
    })?;
    parse_line(line)
}

/// Read the k-th station of `country` from the data file with a single seek,
/// the same access a range request makes.
pub fn read_station_from_file(path: &Path, index: &CountryIndex, country: &str, k: usize) -> Result<Value> {
    let start = index.offset_of(country, k)?;
    let mut file = File::open(path).map_err(|e| PrepError::io(path, e))?;
    file.seek(SeekFrom::Start(start))
        .map_err(|e| PrepError::io(path, e))?;
    let mut line = vec![0u8; index.line_length()];
    file.read_exact(&mut line).map_err(|e| PrepError::io(path, e))?;
    parse_line(&line)
}

pub fn load_index(path: &Path) -> Result<CountryIndex> {
    let text = fs::read_to_string(path).map_err(|e| PrepError::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}
