//! Available memory gauge.

use super::{CollectContext, INSTANCE_LABEL, MetricCollector, TableOutcome, bytes_to_gb, family_gauge};
use crate::exposition::FamilyMatcher;
use crate::record::{NormalizedRecord, RecordSet};
use crate::scrape::ScrapePair;

const MEM_AVAILABLE_FAMILY: &str = "node_memory_MemAvailable_bytes";

pub const RAM_DESTINATION: &str = "ram_stats";

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryCollector;

impl MetricCollector for MemoryCollector {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn collect(&self, pair: &ScrapePair, ctx: &CollectContext) -> Vec<TableOutcome> {
        // node_exporter emits this unlabeled, but a relabeling proxy may add labels.
        let matcher = FamilyMatcher::either(MEM_AVAILABLE_FAMILY);
        let snapshot = match family_gauge(pair, &matcher, ctx) {
            Ok(snapshot) => snapshot,
            Err(missing) => return vec![missing.outcome(RAM_DESTINATION)],
        };

        let mut set = RecordSet::new(RAM_DESTINATION, &["metric", "bytes", "bytes_gb"]);
        for (labels, bytes) in snapshot.iter() {
            let instance = labels
                .get(INSTANCE_LABEL)
                .map(String::as_str)
                .unwrap_or(&ctx.default_instance);
            set.push(
                NormalizedRecord::new(pair.timestamp(), instance, &ctx.default_ip)
                    .with("metric", "MemAvailable")
                    .with("bytes", bytes)
                    .with("bytes_gb", bytes_to_gb(bytes)),
            );
        }

        vec![TableOutcome::Rows(set)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::fixtures;
    use crate::record::Scalar;
    use std::time::Duration;

    #[test]
    fn test_memory_from_newer_snapshot_only() {
        let pair = ScrapePair::with_elapsed(
            fixtures::SCRAPE_OLDER,
            fixtures::SCRAPE_NEWER,
            Duration::from_secs(10),
        );
        let outcomes = MemoryCollector.collect(&pair, &CollectContext::default());
        let TableOutcome::Rows(set) = &outcomes[0] else {
            panic!("expected rows, got {:?}", outcomes[0]);
        };
        assert_eq!(set.len(), 1);
        let rec = &set.records[0];
        assert_eq!(rec.get("metric"), Some(Scalar::from("MemAvailable")));
        assert_eq!(rec.get_f64("bytes"), Some(4294967296.0));
        assert_eq!(rec.get_f64("bytes_gb"), Some(4.0));
    }

    #[test]
    fn test_memory_labeled_instance() {
        let body = "node_memory_MemAvailable_bytes{instance=\"10.0.0.7:9100\"} 1073741824\n";
        let pair = ScrapePair::with_elapsed("", body, Duration::from_secs(10));
        let outcomes = MemoryCollector.collect(&pair, &CollectContext::default());
        let TableOutcome::Rows(set) = &outcomes[0] else {
            panic!("expected rows");
        };
        assert_eq!(set.records[0].ip, "10.0.0.7");
        assert_eq!(set.records[0].instance, "10.0.0.7:9100");
    }

    #[test]
    fn test_memory_absent() {
        let pair = ScrapePair::with_elapsed(fixtures::SCRAPE_NEWER, "up 1\n", Duration::from_secs(10));
        let outcomes = MemoryCollector.collect(&pair, &CollectContext::default());
        assert!(matches!(&outcomes[0], TableOutcome::Absent { destination, .. } if destination == "ram_stats"));
    }
}
