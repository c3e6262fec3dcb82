//! CPU time collector.
//!
//! Differences `node_cpu_seconds_total` per instance, core and mode, and
//! derives overall utilization from the idle share.

use std::collections::BTreeMap;

use super::{CollectContext, MetricCollector, TableOutcome, family_rates};
use crate::rates::RateSet;
use crate::record::{NormalizedRecord, RecordSet};
use crate::scrape::ScrapePair;

const CPU_FAMILY: &str = "node_cpu_seconds_total";
const JOIN_KEY: [&str; 3] = ["instance", "cpu", "mode"];

/// Modes counted as not doing work.
const IDLE_MODES: [&str; 2] = ["idle", "iowait"];

pub const CSTATE_DESTINATION: &str = "cpu_cstate_rates";
pub const UTILIZATION_DESTINATION: &str = "cpu_utilization";

/// Aggregated CPU rates for one instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuUtilization {
    /// Sum of per-core, per-mode rates (CPU-seconds per second).
    pub total_rate: f64,
    /// Share of `total_rate` spent in idle or iowait.
    pub idle_rate: f64,
    /// `100 × (1 − idle/total)`, clamped to [0, 100]. Zero when total is zero.
    pub percent: f64,
}

/// Computes utilization from `(mode, rate)` pairs.
pub fn cpu_utilization<'a>(rates: impl IntoIterator<Item = (&'a str, f64)>) -> CpuUtilization {
    let (mut total_rate, mut idle_rate) = (0.0, 0.0);
    for (mode, rate) in rates {
        total_rate += rate;
        if IDLE_MODES.contains(&mode) {
            idle_rate += rate;
        }
    }

    let percent = if total_rate > 0.0 {
        (100.0 * (1.0 - idle_rate / total_rate)).clamp(0.0, 100.0)
    } else {
        0.0
    };

    CpuUtilization {
        total_rate,
        idle_rate,
        percent,
    }
}

/// Collects per-state CPU rates and overall utilization.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuCollector;

impl MetricCollector for CpuCollector {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn collect(&self, pair: &ScrapePair, ctx: &CollectContext) -> Vec<TableOutcome> {
        let rates = match family_rates(pair, CPU_FAMILY, &JOIN_KEY, ctx) {
            Ok(rates) => rates,
            Err(missing) => {
                return vec![
                    missing.outcome(CSTATE_DESTINATION),
                    missing.outcome(UTILIZATION_DESTINATION),
                ];
            }
        };

        vec![
            TableOutcome::from_set(
                cstate_rows(&rates, pair, ctx),
                "no CPU series matched between scrapes",
            ),
            TableOutcome::from_set(
                utilization_rows(&rates, pair, ctx),
                "no CPU series matched between scrapes",
            ),
        ]
    }
}

fn cstate_rows(rates: &RateSet, pair: &ScrapePair, ctx: &CollectContext) -> RecordSet {
    let mut set = RecordSet::new(CSTATE_DESTINATION, &["core", "state", "rate_per_sec"]);
    for p in &rates.pairs {
        let [instance, core, state] = p.key.as_slice() else {
            continue;
        };
        set.push(
            NormalizedRecord::new(pair.timestamp(), instance.as_str(), &ctx.default_ip)
                .with("core", core.as_str())
                .with("state", state.as_str())
                .with("rate_per_sec", p.rate),
        );
    }
    set
}

fn utilization_rows(rates: &RateSet, pair: &ScrapePair, ctx: &CollectContext) -> RecordSet {
    let mut by_instance: BTreeMap<&str, Vec<(&str, f64)>> = BTreeMap::new();
    for p in &rates.pairs {
        if let [instance, _core, mode] = p.key.as_slice() {
            by_instance
                .entry(instance.as_str())
                .or_default()
                .push((mode.as_str(), p.rate));
        }
    }

    let mut set = RecordSet::new(
        UTILIZATION_DESTINATION,
        &["total_rate", "idle_rate", "cpu_util_percent"],
    );
    for (instance, modes) in by_instance {
        let util = cpu_utilization(modes);
        set.push(
            NormalizedRecord::new(pair.timestamp(), instance, &ctx.default_ip)
                .with("total_rate", util.total_rate)
                .with("idle_rate", util.idle_rate)
                .with("cpu_util_percent", util.percent),
        );
    }
    set
}
