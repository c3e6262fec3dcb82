//! Normalized output rows and identifier remapping.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::ser::SerializeMap;

/// Implicit provenance columns appended after a record's data columns.
pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const IP_COLUMN: &str = "ip";

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Float(f64),
    Timestamp(DateTime<Utc>),
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<DateTime<Utc>> for Scalar {
    fn from(t: DateTime<Utc>) -> Self {
        Scalar::Timestamp(t)
    }
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One output row of a collector.
///
/// Data fields keep insertion order. `timestamp` and `ip` are provenance and
/// are always present.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub timestamp: DateTime<Utc>,
    pub instance: String,
    pub ip: String,
    fields: Vec<(String, Scalar)>,
}

impl NormalizedRecord {
    pub fn new(timestamp: DateTime<Utc>, instance: impl Into<String>, default_ip: &str) -> Self {
        let instance = instance.into();
        let ip = extract_ipv4(&instance).unwrap_or_else(|| default_ip.to_string());
        Self {
            timestamp,
            instance,
            ip,
            fields: Vec::new(),
        }
    }

    /// Appends a data field.
    pub fn with(mut self, column: &str, value: impl Into<Scalar>) -> Self {
        self.fields.push((column.to_string(), value.into()));
        self
    }

    pub fn fields(&self) -> &[(String, Scalar)] {
        &self.fields
    }

    /// Looks up any column, including the implicit ones.
    pub fn get(&self, column: &str) -> Option<Scalar> {
        match column {
            TIMESTAMP_COLUMN => Some(Scalar::Timestamp(self.timestamp)),
            IP_COLUMN => Some(Scalar::Text(self.ip.clone())),
            _ => self
                .fields
                .iter()
                .find(|(name, _)| name == column)
                .map(|(_, v)| v.clone()),
        }
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(|v| v.as_f64())
    }
}

impl Serialize for NormalizedRecord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 2))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.serialize_entry(TIMESTAMP_COLUMN, &self.timestamp)?;
        map.serialize_entry(IP_COLUMN, &self.ip)?;
        map.end()
    }
}

/// Rows bound for one destination, with their ordered column list.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet {
    pub destination: String,
    pub columns: Vec<String>,
    pub records: Vec<NormalizedRecord>,
}

impl RecordSet {
    /// Creates an empty set. `data_columns` is extended with the implicit
    /// `timestamp` and `ip` columns.
    pub fn new(destination: impl Into<String>, data_columns: &[&str]) -> Self {
        let mut columns: Vec<String> = data_columns.iter().map(|c| c.to_string()).collect();
        columns.push(TIMESTAMP_COLUMN.to_string());
        columns.push(IP_COLUMN.to_string());
        Self {
            destination: destination.into(),
            columns,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: NormalizedRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Values of one column across all rows, in row order.
    pub fn column(&self, column: &str) -> Vec<Option<Scalar>> {
        self.records.iter().map(|r| r.get(column)).collect()
    }
}

/// Finds the first dotted-quad IPv4 address inside an `instance` label
/// (e.g. `10.0.0.5:9100`).
pub fn extract_ipv4(instance: &str) -> Option<String> {
    instance
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|token| token.split('.').count() == 4)
        .find_map(|token| token.parse::<Ipv4Addr>().ok())
        .map(|ip| ip.to_string())
}

/// Error type for configuration problems.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Remap entry not in `from=to` form.
    InvalidEntry(String),
    /// A target that is itself remapped elsewhere (`a=b`, `b=c`).
    Chain { from: String, to: String },
    /// The same identifier mapped to two different labels (`a=b`, `a=c`).
    Conflict { from: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidEntry(entry) => {
                write!(f, "invalid remap entry '{}', expected FROM=TO", entry)
            }
            ConfigError::Chain { from, to } => {
                write!(f, "remap target '{}' of '{}' is itself remapped", to, from)
            }
            ConfigError::Conflict { from } => {
                write!(f, "'{}' is mapped to more than one label", from)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Maps kernel identifiers (devices, mountpoints) to caller-facing labels.
///
/// Unmapped identifiers pass through unchanged. No target may also be a key
/// mapping somewhere else, which makes `apply` idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemapTable {
    entries: HashMap<String, String>,
}

impl RemapTable {
    pub fn new<I, K, V>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map: HashMap<String, String> = HashMap::new();
        for (from, to) in entries {
            let (from, to) = (from.into(), to.into());
            match map.get(&from) {
                Some(existing) if *existing != to => return Err(ConfigError::Conflict { from }),
                Some(_) => {}
                None => {
                    map.insert(from, to);
                }
            }
        }
        let entries = map;

        for (from, to) in &entries {
            if let Some(next) = entries.get(to)
                && next != to
            {
                return Err(ConfigError::Chain {
                    from: from.clone(),
                    to: to.clone(),
                });
            }
        }

        Ok(Self { entries })
    }

    /// Parses `from=to` entries (as given on the command line).
    pub fn parse_entries<S: AsRef<str>>(entries: &[S]) -> Result<Self, ConfigError> {
        let pairs = entries
            .iter()
            .map(|entry| parse_entry(entry.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(pairs)
    }

    pub fn apply<'a>(&'a self, id: &'a str) -> &'a str {
        self.entries.get(id).map(String::as_str).unwrap_or(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Splits on the last `=` so mountpoints containing `=` still work.
fn parse_entry(entry: &str) -> Result<(String, String), ConfigError> {
    let (from, to) = entry
        .rsplit_once('=')
        .ok_or_else(|| ConfigError::InvalidEntry(entry.to_string()))?;
    let (from, to) = (from.trim(), to.trim());
    if from.is_empty() || to.is_empty() {
        return Err(ConfigError::InvalidEntry(entry.to_string()));
    }
    Ok((from.to_string(), to.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_extract_ipv4() {
        assert_eq!(extract_ipv4("10.0.0.5:9100").as_deref(), Some("10.0.0.5"));
        assert_eq!(extract_ipv4("http://192.168.1.20:9100/metrics").as_deref(), Some("192.168.1.20"));
        assert_eq!(extract_ipv4("localhost:9100"), None);
        assert_eq!(extract_ipv4("999.1.1.1:9100"), None);
        assert_eq!(extract_ipv4("1.2.3:9100"), None);
    }

    #[test]
    fn test_record_provenance() {
        let rec = NormalizedRecord::new(ts(), "localhost:9100", "127.0.0.1").with("bytes", 5.0);
        assert_eq!(rec.ip, "127.0.0.1");
        assert_eq!(rec.get("ip"), Some(Scalar::Text("127.0.0.1".into())));
        assert_eq!(rec.get("timestamp"), Some(Scalar::Timestamp(ts())));
        assert_eq!(rec.get_f64("bytes"), Some(5.0));
        assert_eq!(rec.get("missing"), None);

        let rec = NormalizedRecord::new(ts(), "10.1.2.3:9100", "127.0.0.1");
        assert_eq!(rec.ip, "10.1.2.3");
    }

    #[test]
    fn test_record_set_columns() {
        let set = RecordSet::new("disk_free_space", &["volume", "bytes"]);
        assert_eq!(set.columns, vec!["volume", "bytes", "timestamp", "ip"]);
        assert!(set.is_empty());
    }

    #[test]
    fn test_record_serializes_in_column_order() {
        let rec = NormalizedRecord::new(ts(), "localhost:9100", "127.0.0.1")
            .with("volume", "C")
            .with("bytes", 5e9);
        let json = serde_json::to_string(&rec).unwrap();
        assert_eq!(
            json,
            r#"{"volume":"C","bytes":5000000000.0,"timestamp":"2025-03-01T12:00:00Z","ip":"127.0.0.1"}"#
        );
    }

    #[test]
    fn test_remap_passthrough() {
        let table = RemapTable::new([("sda", "C"), ("sdb", "D")]).unwrap();
        assert_eq!(table.apply("sda"), "C");
        assert_eq!(table.apply("sdb"), "D");
        assert_eq!(table.apply("nvme0n1"), "nvme0n1");
    }

    #[test]
    fn test_remap_idempotent() {
        let table = RemapTable::parse_entries(&[
            "/=C",
            "/run=D",
            "/run/user/1000=E",
            "/run/lock=F",
            "/run/snapd/ns=G",
        ])
        .unwrap();
        for id in ["/", "/run", "/run/lock", "/boot", "C", "G", ""] {
            let once = table.apply(id);
            assert_eq!(table.apply(once), once, "remap of {:?} not idempotent", id);
        }
    }

    #[test]
    fn test_remap_rejects_chains() {
        let err = RemapTable::new([("sda", "sdb"), ("sdb", "D")]).unwrap_err();
        assert!(matches!(err, ConfigError::Chain { .. }));
        // Self-mapping is harmless.
        assert!(RemapTable::new([("C", "C"), ("sda", "C")]).is_ok());
    }

    #[test]
    fn test_parse_entries_errors() {
        assert!(matches!(
            RemapTable::parse_entries(&["sda"]),
            Err(ConfigError::InvalidEntry(_))
        ));
        assert!(RemapTable::parse_entries(&["=C"]).is_err());
        let table = RemapTable::parse_entries(&["/mnt/a=b=X"]).unwrap();
        assert_eq!(table.apply("/mnt/a=b"), "X");
    }

    #[test]
    fn test_remap_rejects_conflicting_keys() {
        let err = RemapTable::parse_entries(&["sda=C", "sdb=D", "sda=E"]).unwrap_err();
        assert_eq!(err, ConfigError::Conflict { from: "sda".to_string() });
        // Repeating an identical entry is not a conflict.
        let table = RemapTable::parse_entries(&["sda=C", "sda=C"]).unwrap();
        assert_eq!(table.len(), 1);
    }
}
