//! Network bandwidth per interface.

use super::{CollectContext, MetricCollector, TableOutcome, bytes_per_sec_to_mbps, family_rates};
use crate::record::{NormalizedRecord, RecordSet};
use crate::scrape::ScrapePair;

const JOIN_KEY: [&str; 2] = ["instance", "device"];

/// `(family, mode)` for each direction. Each direction is reported as its
/// own outcome so a missing direction stays visible.
const DIRECTIONS: [(&str, &str); 2] = [
    ("node_network_receive_bytes_total", "receive"),
    ("node_network_transmit_bytes_total", "transmit"),
];

pub const BANDWIDTH_DESTINATION: &str = "bandwidth";

#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkCollector;

impl MetricCollector for NetworkCollector {
    fn name(&self) -> &'static str {
        "network"
    }

    fn collect(&self, pair: &ScrapePair, ctx: &CollectContext) -> Vec<TableOutcome> {
        DIRECTIONS
            .iter()
            .map(|&(family, mode)| {
                let rates = match family_rates(pair, family, &JOIN_KEY, ctx) {
                    Ok(rates) => rates,
                    Err(missing) => return missing.outcome(BANDWIDTH_DESTINATION),
                };

                let mut set = RecordSet::new(
                    BANDWIDTH_DESTINATION,
                    &["metric_name", "mode", "device", "value", "value_mbps"],
                );
                for p in &rates.pairs {
                    let [instance, device] = p.key.as_slice() else {
                        continue;
                    };
                    set.push(
                        NormalizedRecord::new(pair.timestamp(), instance.as_str(), &ctx.default_ip)
                            .with("metric_name", family)
                            .with("mode", mode)
                            .with("device", device.as_str())
                            .with("value", p.rate)
                            .with("value_mbps", bytes_per_sec_to_mbps(p.rate)),
                    );
                }
                TableOutcome::from_set(set, "no interface matched between scrapes")
            })
            .collect()
    }
}
