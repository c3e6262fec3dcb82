//! noderate-core - sampling and differencing engine for node-exporter scrapes.
//!
//! Provides:
//! - `exposition` - Prometheus text format parser (one metric family per call)
//! - `rates` - two-snapshot counter differencing
//! - `collector` - per-domain collectors (CPU, memory, disk, network)
//! - `record` - normalized output rows and remap tables
//! - `scrape` - metrics source abstraction (HTTP, mock)
//! - `cycle` - one fetch/wait/fetch/collect/emit pass
//! - `sink` - persistence contract and adapters
//!
//! With `http` feature (default):
//! - `scrape::HttpSource` - blocking HTTP scraper
//!
//! With `postgres` feature (default):
//! - `sink::PostgresSink` - append-only PostgreSQL writer

pub mod collector;
pub mod cycle;
pub mod exposition;
pub mod rates;
pub mod record;
pub mod scrape;
pub mod sink;

pub use cycle::{Cycle, CycleConfig, CycleError, CycleReport, DestinationStatus, ReportEntry};
pub use exposition::{FamilyMatcher, LabelShape, Labels, Sample, Snapshot, parse_family};
pub use rates::{RateError, RatePair, RateSet, compute_rates};
pub use record::{NormalizedRecord, RecordSet, RemapTable, Scalar};
