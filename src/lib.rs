//! # hearo-prep
//! Prepares radio station data for a "listen around the world" map client.
//!
//! ## Usage
//! Country boundaries are reduced to one representative point each (mainland
//! selection in an equal-area projection, then the area centroid, falling back
//! to the pole of inaccessibility when the centroid lies outside). Crawled
//! stations are assigned to countries with a `LabeledPartitionTree`
//! point-in-polygon lookup, filtered, sampled and finally packed into a
//! fixed-width JSONL file plus a byte index, so a client can fetch any single
//! station with one HTTP range request.
//!
//! The `pipeline` module chains the stages; each stage can also be used on its
//! own. See `demos/` for reading a station back out of the packed output.

pub mod config;
pub mod datasets;
pub mod error;
pub mod filtering;
pub mod geometry;
pub mod labeling;
pub mod matching;
pub mod model;
pub mod packing;
pub mod pipeline;
pub mod sampling;
pub mod serve;

pub use error::{PrepError, Result};
