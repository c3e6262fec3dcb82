//! Disk collectors: free space per mountpoint, IOPS and throughput per device.

use super::{
    CollectContext, INSTANCE_LABEL, MetricCollector, Missing, TableOutcome,
    bytes_per_sec_to_mbps, bytes_to_gb, family_gauge, family_rates,
};
use crate::exposition::FamilyMatcher;
use crate::rates::RateSet;
use crate::record::{NormalizedRecord, RecordSet};
use crate::scrape::ScrapePair;

const FREE_BYTES_FAMILY: &str = "node_filesystem_free_bytes";
const MOUNTPOINT_LABEL: &str = "mountpoint";

const READS_FAMILY: &str = "node_disk_reads_completed_total";
const WRITES_FAMILY: &str = "node_disk_writes_completed_total";
const READ_BYTES_FAMILY: &str = "node_disk_read_bytes_total";
const WRITTEN_BYTES_FAMILY: &str = "node_disk_written_bytes_total";
const JOIN_KEY: [&str; 2] = ["instance", "device"];

pub const FREE_SPACE_DESTINATION: &str = "disk_free_space";
pub const IOPS_DESTINATION: &str = "disk_iops";
pub const THROUGHPUT_DESTINATION: &str = "disk_throughput";

/// Free bytes per filesystem, with mountpoints remapped to volume labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFreeCollector;

impl MetricCollector for DiskFreeCollector {
    fn name(&self) -> &'static str {
        "disk_free"
    }

    fn collect(&self, pair: &ScrapePair, ctx: &CollectContext) -> Vec<TableOutcome> {
        let matcher = FamilyMatcher::labeled(FREE_BYTES_FAMILY);
        let snapshot = match family_gauge(pair, &matcher, ctx) {
            Ok(snapshot) => snapshot,
            Err(missing) => return vec![missing.outcome(FREE_SPACE_DESTINATION)],
        };
        if !snapshot.has_label(MOUNTPOINT_LABEL) {
            return vec![
                Missing::Family(format!("{} has no {} label", FREE_BYTES_FAMILY, MOUNTPOINT_LABEL))
                    .outcome(FREE_SPACE_DESTINATION),
            ];
        }

        let mut set = RecordSet::new(FREE_SPACE_DESTINATION, &["volume", "bytes", "bytes_gb"]);
        for (labels, bytes) in snapshot.iter() {
            let Some(mountpoint) = labels.get(MOUNTPOINT_LABEL) else {
                continue;
            };
            let instance = labels
                .get(INSTANCE_LABEL)
                .map(String::as_str)
                .unwrap_or(&ctx.default_instance);
            set.push(
                NormalizedRecord::new(pair.timestamp(), instance, &ctx.default_ip)
                    .with("volume", ctx.mount_map.apply(mountpoint))
                    .with("bytes", bytes)
                    .with("bytes_gb", bytes_to_gb(bytes)),
            );
        }

        vec![TableOutcome::Rows(set)]
    }
}

/// Read/write operation and byte rates per block device.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskIoCollector;

impl MetricCollector for DiskIoCollector {
    fn name(&self) -> &'static str {
        "disk_io"
    }

    fn collect(&self, pair: &ScrapePair, ctx: &CollectContext) -> Vec<TableOutcome> {
        vec![
            read_write_table(
                pair,
                ctx,
                (READS_FAMILY, WRITES_FAMILY),
                IOPS_DESTINATION,
                &["volume", "read_iops", "write_iops", "iops"],
                |read, write| vec![read, write, read + write],
            ),
            read_write_table(
                pair,
                ctx,
                (READ_BYTES_FAMILY, WRITTEN_BYTES_FAMILY),
                THROUGHPUT_DESTINATION,
                &[
                    "volume",
                    "read_bytes_per_sec",
                    "write_bytes_per_sec",
                    "throughput_mbps",
                ],
                |read, write| vec![read, write, bytes_per_sec_to_mbps(read + write)],
            ),
        ]
    }
}

/// Differences a read and a write family and joins them per device.
///
/// `columns[0]` is the volume column; `derive` produces the remaining
/// numeric columns from the read and write rates.
fn read_write_table(
    pair: &ScrapePair,
    ctx: &CollectContext,
    (read_family, write_family): (&str, &str),
    destination: &str,
    columns: &[&str],
    derive: impl Fn(f64, f64) -> Vec<f64>,
) -> TableOutcome {
    let rates = family_rates(pair, read_family, &JOIN_KEY, ctx)
        .and_then(|reads| Ok((reads, family_rates(pair, write_family, &JOIN_KEY, ctx)?)));
    let (reads, writes) = match rates {
        Ok(rates) => rates,
        Err(missing) => return missing.outcome(destination),
    };

    TableOutcome::from_set(
        join_read_write(&reads, &writes, pair, ctx, destination, columns, derive),
        "no device present in both read and write series",
    )
}

fn join_read_write(
    reads: &RateSet,
    writes: &RateSet,
    pair: &ScrapePair,
    ctx: &CollectContext,
    destination: &str,
    columns: &[&str],
    derive: impl Fn(f64, f64) -> Vec<f64>,
) -> RecordSet {
    let writes = writes.rates_by_key();
    let mut set = RecordSet::new(destination, columns);

    for read in &reads.pairs {
        let Some(&write_rate) = writes.get(read.key.as_slice()) else {
            continue;
        };
        let [instance, device] = read.key.as_slice() else {
            continue;
        };

        let mut record = NormalizedRecord::new(pair.timestamp(), instance.as_str(), &ctx.default_ip)
            .with(columns[0], ctx.device_map.apply(device));
        for (column, value) in columns[1..].iter().zip(derive(read.rate, write_rate)) {
            record = record.with(column, value);
        }
        set.push(record);
    }

    set
}
