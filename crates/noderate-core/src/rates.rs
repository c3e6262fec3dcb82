//! Two-snapshot counter differencing.
//!
//! Joins an older and a newer [`Snapshot`] on a caller-chosen subset of
//! labels and turns each matched pair into a per-second rate. There is no
//! running state: every call sees exactly two snapshots.

use std::collections::BTreeMap;

use tracing::debug;

use crate::exposition::{Labels, Snapshot};

/// Compute f64 delta, returning `None` on counter regression (counter reset).
pub fn df64(curr: f64, prev: f64) -> Option<f64> {
    (curr >= prev).then_some(curr - prev)
}

/// Error type for rate computation.
#[derive(Debug, Clone, PartialEq)]
pub enum RateError {
    /// Elapsed time between snapshots is zero, negative or not finite.
    InvalidElapsed(f64),
}

impl std::fmt::Display for RateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateError::InvalidElapsed(secs) => {
                write!(f, "invalid elapsed time between snapshots: {}s", secs)
            }
        }
    }
}

impl std::error::Error for RateError {}

/// One joined series.
#[derive(Debug, Clone, PartialEq)]
pub struct RatePair {
    /// Join-key label values, in join-key order.
    pub key: Vec<String>,
    pub older: f64,
    pub newer: f64,
    /// Per-second rate; never negative.
    pub rate: f64,
}

/// Result of joining two snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateSet {
    /// Pairs ordered by key.
    pub pairs: Vec<RatePair>,
    /// Pairs dropped because the counter went backwards.
    pub discarded: usize,
    /// Older series with no counterpart in the newer snapshot.
    pub unmatched_older: usize,
    /// Newer series with no counterpart in the older snapshot.
    pub unmatched_newer: usize,
}

impl RateSet {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Looks up the pair for a key given in join-key order.
    pub fn get(&self, key: &[&str]) -> Option<&RatePair> {
        self.pairs
            .iter()
            .find(|p| p.key.iter().map(String::as_str).eq(key.iter().copied()))
    }

    /// Rates indexed by key, for joining two rate sets on the same key.
    pub fn rates_by_key(&self) -> BTreeMap<&[String], f64> {
        self.pairs
            .iter()
            .map(|p| (p.key.as_slice(), p.rate))
            .collect()
    }
}

/// Validates an elapsed time before any division happens.
pub fn check_elapsed(elapsed_secs: f64) -> Result<(), RateError> {
    if elapsed_secs.is_finite() && elapsed_secs > 0.0 {
        Ok(())
    } else {
        Err(RateError::InvalidElapsed(elapsed_secs))
    }
}

/// Projects a label set onto the join key. `None` if any key label is missing.
fn project(labels: &Labels, join_key: &[&str]) -> Option<Vec<String>> {
    join_key
        .iter()
        .map(|name| labels.get(*name).cloned())
        .collect()
}

/// Indexes a snapshot by join key. Series that collapse onto the same key
/// keep the last value; series lacking a key label are counted separately.
fn index(snapshot: &Snapshot, join_key: &[&str]) -> (BTreeMap<Vec<String>, f64>, usize) {
    let mut indexed = BTreeMap::new();
    let mut unkeyed = 0;
    for (labels, value) in snapshot.iter() {
        match project(labels, join_key) {
            Some(key) => {
                if indexed.insert(key, value).is_some() {
                    debug!(family = snapshot.family(), ?join_key, "join key collision, keeping last");
                }
            }
            None => unkeyed += 1,
        }
    }
    (indexed, unkeyed)
}

/// Inner-joins two snapshots on `join_key` and computes
/// `(newer - older) / elapsed_secs` per series.
///
/// Negative deltas are treated as counter resets and discarded. Fails fast
/// on a non-positive elapsed time.
pub fn compute_rates(
    older: &Snapshot,
    newer: &Snapshot,
    join_key: &[&str],
    elapsed_secs: f64,
) -> Result<RateSet, RateError> {
    check_elapsed(elapsed_secs)?;

    let (old_index, old_unkeyed) = index(older, join_key);
    let (new_index, new_unkeyed) = index(newer, join_key);

    let mut set = RateSet {
        unmatched_older: old_unkeyed,
        unmatched_newer: new_unkeyed,
        ..Default::default()
    };

    for (key, &prev) in &old_index {
        let Some(&curr) = new_index.get(key) else {
            set.unmatched_older += 1;
            continue;
        };

        match df64(curr, prev).map(|d| d / elapsed_secs) {
            Some(rate) if rate.is_finite() => set.pairs.push(RatePair {
                key: key.clone(),
                older: prev,
                newer: curr,
                rate,
            }),
            _ => {
                set.discarded += 1;
                debug!(
                    family = newer.family(),
                    ?key,
                    prev,
                    curr,
                    "discarding pair: counter went backwards"
                );
            }
        }
    }

    set.unmatched_newer += new_index
        .keys()
        .filter(|key| !old_index.contains_key(*key))
        .count();

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposition::{FamilyMatcher, Sample, parse_family};

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn series(pairs: &[(&str, &str)], value: f64) -> Sample {
        Sample::new(labels(pairs), value)
    }

    fn snap(samples: Vec<Sample>) -> Snapshot {
        Snapshot::from_samples("fam", samples)
    }

    #[test]
    fn test_df64() {
        assert_eq!(df64(10.0, 4.0), Some(6.0));
        assert_eq!(df64(4.0, 4.0), Some(0.0));
        assert_eq!(df64(3.0, 4.0), None);
    }

    #[test]
    fn test_cpu_scenario_rates() {
        let matcher = FamilyMatcher::labeled("node_cpu_seconds_total");
        let t1 = "node_cpu_seconds_total{cpu=\"0\",mode=\"idle\"} 100\nnode_cpu_seconds_total{cpu=\"0\",mode=\"user\"} 50\n";
        let t2 = "node_cpu_seconds_total{cpu=\"0\",mode=\"idle\"} 130\nnode_cpu_seconds_total{cpu=\"0\",mode=\"user\"} 80\n";
        let set = compute_rates(
            &parse_family(t1, &matcher),
            &parse_family(t2, &matcher),
            &["cpu", "mode"],
            60.0,
        )
        .unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.get(&["0", "idle"]).unwrap().rate, 0.5);
        let user = set.get(&["0", "user"]).unwrap();
        assert_eq!((user.older, user.newer, user.rate), (50.0, 80.0, 0.5));
        let total: f64 = set.pairs.iter().map(|p| p.rate).sum();
        assert_eq!(total, 1.0);
    }

    #[test]
    fn test_negative_delta_is_discarded() {
        let older = snap(vec![series(&[("device", "eth0")], 1000.0), series(&[("device", "eth1")], 10.0)]);
        let newer = snap(vec![series(&[("device", "eth0")], 5.0), series(&[("device", "eth1")], 30.0)]);
        let set = compute_rates(&older, &newer, &["device"], 10.0).unwrap();

        assert_eq!(set.discarded, 1);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(&["eth1"]).unwrap().rate, 2.0);
        assert!(set.get(&["eth0"]).is_none());
    }

    #[test]
    fn test_rates_never_negative() {
        let values = [0.0, 1.0, 7.5, 1e9, 3.0, 0.5, 42.0, 1e-3];
        for (i, &a) in values.iter().enumerate() {
            for &b in values.iter().skip(i) {
                let older = snap(vec![series(&[("k", "x")], a), series(&[("k", "y")], b)]);
                let newer = snap(vec![series(&[("k", "x")], b), series(&[("k", "y")], a)]);
                let set = compute_rates(&older, &newer, &["k"], 2.5).unwrap();
                assert!(set.pairs.iter().all(|p| p.rate >= 0.0));
                assert_eq!(set.len() + set.discarded, 2);
            }
        }
    }

    #[test]
    fn test_join_completeness() {
        let older = snap(vec![series(&[("device", "sda")], 1.0), series(&[("device", "sdc")], 1.0), series(&[("device", "sdd")], 1.0)]);
        let newer = snap(vec![series(&[("device", "sda")], 2.0), series(&[("device", "sdb")], 9.0), series(&[("device", "sdd")], 4.0)]);
        let set = compute_rates(&older, &newer, &["device"], 1.0).unwrap();

        let keys: Vec<&str> = set.pairs.iter().map(|p| p.key[0].as_str()).collect();
        assert_eq!(keys, vec!["sda", "sdd"]);
        assert_eq!(set.unmatched_older, 1);
        assert_eq!(set.unmatched_newer, 1);
    }

    #[test]
    fn test_device_appearing_in_newer_only() {
        let older = snap(vec![series(&[("device", "sda")], 100.0)]);
        let newer = snap(vec![series(&[("device", "sda")], 150.0), series(&[("device", "sdb")], 10.0)]);
        let set = compute_rates(&older, &newer, &["device"], 10.0).unwrap();

        assert!(set.get(&["sdb"]).is_none());
        assert_eq!(set.get(&["sda"]).unwrap().rate, 5.0);
        assert_eq!(set.unmatched_newer, 1);
    }

    #[test]
    fn test_join_on_label_subset() {
        // Extra labels (e.g. differing `job`) do not prevent the join.
        let older = snap(vec![series(&[("device", "sda"), ("job", "a")], 10.0)]);
        let newer = snap(vec![series(&[("device", "sda"), ("job", "b")], 20.0)]);
        let set = compute_rates(&older, &newer, &["device"], 5.0).unwrap();
        assert_eq!(set.get(&["sda"]).unwrap().rate, 2.0);
    }

    #[test]
    fn test_missing_key_label_is_unmatched() {
        let older = snap(vec![series(&[("cpu", "0"), ("mode", "idle")], 1.0)]);
        let newer = snap(vec![series(&[("cpu", "0"), ("mode", "idle")], 2.0)]);
        let set = compute_rates(&older, &newer, &["instance", "cpu", "mode"], 1.0).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.unmatched_older, 1);
        assert_eq!(set.unmatched_newer, 1);
    }

    #[test]
    fn test_zero_elapsed_fails_fast() {
        let s = snap(vec![series(&[("k", "x")], 1.0)]);
        assert_eq!(
            compute_rates(&s, &s, &["k"], 0.0),
            Err(RateError::InvalidElapsed(0.0))
        );
        assert!(compute_rates(&s, &s, &["k"], -1.0).is_err());
        assert!(compute_rates(&s, &s, &["k"], f64::NAN).is_err());
    }

    #[test]
    fn test_rates_by_key() {
        let older = snap(vec![series(&[("device", "sda")], 0.0), series(&[("device", "sdb")], 0.0)]);
        let newer = snap(vec![series(&[("device", "sda")], 4.0), series(&[("device", "sdb")], 8.0)]);
        let set = compute_rates(&older, &newer, &["device"], 4.0).unwrap();
        let by_key = set.rates_by_key();
        assert_eq!(by_key.get(["sdb".to_string()].as_slice()), Some(&2.0));
    }
}
