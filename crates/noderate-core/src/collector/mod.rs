//! Per-domain metric collectors.
//!
//! Each collector picks the metric families it needs out of a
//! [`ScrapePair`], differences counters or reads gauges, and shapes the
//! result into [`RecordSet`]s for the sink.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          ScrapePair                          │
//! │            older body ── measured elapsed ── newer body      │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ parse_family (×2 per family)
//!        ┌──────────────┬────────┴─────┬──────────────┬─────────────┐
//! ┌──────▼──────┐┌──────▼──────┐┌──────▼──────┐┌──────▼──────┐┌─────▼──────┐
//! │CpuCollector ││MemoryColl.  ││DiskFreeColl.││DiskIoColl.  ││NetworkColl.│
//! │ counters    ││ gauge       ││ gauge+remap ││ counters    ││ counters   │
//! └──────┬──────┘└──────┬──────┘└──────┬──────┘└──────┬──────┘└─────┬──────┘
//!        └──────────────┴──────────────┼──────────────┴─────────────┘
//!                                      │ Vec<TableOutcome>
//!                               ┌──────▼──────┐
//!                               │    Sink     │ (trait)
//!                               └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use std::time::Duration;
//! use noderate_core::collector::{CollectContext, CpuCollector, MetricCollector, TableOutcome, fixtures};
//! use noderate_core::scrape::ScrapePair;
//!
//! let pair = ScrapePair::with_elapsed(fixtures::SCRAPE_OLDER, fixtures::SCRAPE_NEWER, Duration::from_secs(10));
//! let outcomes = CpuCollector.collect(&pair, &CollectContext::default());
//! assert!(matches!(outcomes[0], TableOutcome::Rows(_)));
//! ```

mod cpu;
mod disk;
pub mod fixtures;
mod memory;
mod network;

pub use cpu::{CpuCollector, CpuUtilization, cpu_utilization};
pub use disk::{DiskFreeCollector, DiskIoCollector};
pub use memory::MemoryCollector;
pub use network::NetworkCollector;

use tracing::{debug, warn};

use crate::exposition::{FamilyMatcher, Snapshot, parse_family};
use crate::rates::{RateError, RateSet, compute_rates};
use crate::record::{RecordSet, RemapTable};
use crate::scrape::ScrapePair;

/// Label carrying the scrape target identity.
pub const INSTANCE_LABEL: &str = "instance";

/// Deployment-specific settings shared by all collectors.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectContext {
    /// Substituted for `instance` on samples that lack it.
    pub default_instance: String,
    /// Used as `ip` when the instance carries no IPv4 address.
    pub default_ip: String,
    /// Kernel block device → volume label (e.g. `sda` → `C`).
    pub device_map: RemapTable,
    /// Mountpoint → volume label (e.g. `/` → `C`).
    pub mount_map: RemapTable,
}

impl Default for CollectContext {
    fn default() -> Self {
        Self {
            default_instance: "localhost:9100".to_string(),
            default_ip: "127.0.0.1".to_string(),
            device_map: RemapTable::default(),
            mount_map: RemapTable::default(),
        }
    }
}

/// What a collector produced for one destination.
#[derive(Debug, Clone, PartialEq)]
pub enum TableOutcome {
    /// Rows ready for the sink.
    Rows(RecordSet),
    /// Required data missing from the scrape; nothing to emit.
    Absent { destination: String, reason: String },
    /// Collection itself failed.
    Failed { destination: String, error: String },
}

impl TableOutcome {
    pub fn destination(&self) -> &str {
        match self {
            TableOutcome::Rows(set) => &set.destination,
            TableOutcome::Absent { destination, .. } => destination,
            TableOutcome::Failed { destination, .. } => destination,
        }
    }

    /// Wraps a set, turning an empty one into `Absent`.
    pub(crate) fn from_set(set: RecordSet, reason: &str) -> Self {
        if set.is_empty() {
            TableOutcome::Absent {
                destination: set.destination,
                reason: reason.to_string(),
            }
        } else {
            TableOutcome::Rows(set)
        }
    }
}

/// A domain collector. Implementations hold no mutable state, so several
/// can run concurrently over the same scrape pair.
pub trait MetricCollector: Send + Sync {
    /// Short domain name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Produces one outcome per destination this collector writes.
    fn collect(&self, pair: &ScrapePair, ctx: &CollectContext) -> Vec<TableOutcome>;
}

/// All collectors in their default order.
pub fn default_collectors() -> Vec<Box<dyn MetricCollector>> {
    vec![
        Box::new(NetworkCollector),
        Box::new(MemoryCollector),
        Box::new(DiskFreeCollector),
        Box::new(CpuCollector),
        Box::new(DiskIoCollector),
    ]
}

/// Why a family produced no usable data.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Missing {
    Family(String),
    Rate(RateError),
}

impl Missing {
    pub(crate) fn outcome(&self, destination: &str) -> TableOutcome {
        match self {
            Missing::Family(reason) => {
                warn!(destination, reason = %reason, "no data for destination");
                TableOutcome::Absent {
                    destination: destination.to_string(),
                    reason: reason.clone(),
                }
            }
            Missing::Rate(e) => TableOutcome::Failed {
                destination: destination.to_string(),
                error: e.to_string(),
            },
        }
    }
}

/// Parses a labeled counter family from both scrapes and differences it.
///
/// `instance` is defaulted on both sides before the join.
pub(crate) fn family_rates(
    pair: &ScrapePair,
    family: &str,
    join_key: &[&str],
    ctx: &CollectContext,
) -> Result<RateSet, Missing> {
    let matcher = FamilyMatcher::labeled(family);
    let mut older = parse_family(&pair.older.body, &matcher);
    let mut newer = parse_family(&pair.newer.body, &matcher);

    if older.is_empty() || newer.is_empty() {
        return Err(Missing::Family(format!(
            "{} absent from {} scrape",
            family,
            if older.is_empty() { "older" } else { "newer" }
        )));
    }

    older.fill_missing_label(INSTANCE_LABEL, &ctx.default_instance);
    newer.fill_missing_label(INSTANCE_LABEL, &ctx.default_instance);

    let set = compute_rates(&older, &newer, join_key, pair.elapsed_secs()).map_err(Missing::Rate)?;
    debug!(
        family,
        pairs = set.len(),
        discarded = set.discarded,
        unmatched_older = set.unmatched_older,
        unmatched_newer = set.unmatched_newer,
        skipped = older.skipped() + newer.skipped(),
        "computed rates"
    );
    Ok(set)
}

/// Parses a gauge family from the newer scrape only.
pub(crate) fn family_gauge(
    pair: &ScrapePair,
    matcher: &FamilyMatcher,
    ctx: &CollectContext,
) -> Result<Snapshot, Missing> {
    let mut snapshot = parse_family(&pair.newer.body, matcher);
    if snapshot.is_empty() {
        return Err(Missing::Family(format!(
            "{} absent from newer scrape",
            matcher.name
        )));
    }
    snapshot.fill_missing_label(INSTANCE_LABEL, &ctx.default_instance);
    debug!(
        family = %matcher.name,
        samples = snapshot.len(),
        skipped = snapshot.skipped(),
        "read gauge"
    );
    Ok(snapshot)
}

const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

pub fn bytes_to_gb(bytes: f64) -> f64 {
    bytes / GIB
}

pub fn bytes_per_sec_to_mbps(bytes_per_sec: f64) -> f64 {
    bytes_per_sec * 8.0 / MIB
}
