//! Parser for the Prometheus text exposition format.
//!
//! Pure functions over scrape text. Each call extracts the samples of one
//! metric family; everything else in the body is ignored. Malformed lines of
//! the requested family are skipped and counted, never fatal: real exporters
//! emit plenty of lines this parser has no interest in.

use std::collections::BTreeMap;

use tracing::{debug, trace};

/// Label set of one series. Ordered, so identity does not depend on the
/// order labels appeared in the scrape.
pub type Labels = BTreeMap<String, String>;

/// One observation of a metric family.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: Labels,
    pub value: f64,
}

impl Sample {
    pub fn new(labels: Labels, value: f64) -> Self {
        Self { labels, value }
    }
}

/// Whether the family is expected to carry a `{...}` label block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelShape {
    /// `name{...} value` only.
    Labeled,
    /// `name value` only.
    Unlabeled,
    /// Either form.
    Either,
}

/// Selects one metric family out of a scrape body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyMatcher {
    pub name: String,
    pub shape: LabelShape,
}

impl FamilyMatcher {
    pub fn new(name: impl Into<String>, shape: LabelShape) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }

    pub fn labeled(name: impl Into<String>) -> Self {
        Self::new(name, LabelShape::Labeled)
    }

    pub fn unlabeled(name: impl Into<String>) -> Self {
        Self::new(name, LabelShape::Unlabeled)
    }

    pub fn either(name: impl Into<String>) -> Self {
        Self::new(name, LabelShape::Either)
    }

    fn accepts(&self, has_label_block: bool) -> bool {
        match self.shape {
            LabelShape::Labeled => has_label_block,
            LabelShape::Unlabeled => !has_label_block,
            LabelShape::Either => true,
        }
    }
}

/// All samples of one metric family captured from a single scrape.
///
/// Samples are keyed by their label set. When two lines carry the same label
/// set, the later line wins and [`Snapshot::duplicates`] is incremented.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    family: String,
    samples: BTreeMap<Labels, f64>,
    skipped: usize,
    duplicates: usize,
}

impl Snapshot {
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            ..Default::default()
        }
    }

    /// Builds a snapshot from already parsed samples (last write wins).
    pub fn from_samples(family: impl Into<String>, samples: impl IntoIterator<Item = Sample>) -> Self {
        let mut snapshot = Self::new(family);
        for sample in samples {
            snapshot.insert(sample);
        }
        snapshot
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    /// Inserts a sample. Returns `true` if it replaced an existing series.
    pub fn insert(&mut self, sample: Sample) -> bool {
        let replaced = self.samples.insert(sample.labels, sample.value).is_some();
        if replaced {
            self.duplicates += 1;
        }
        replaced
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, labels: &Labels) -> Option<f64> {
        self.samples.get(labels).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Labels, f64)> {
        self.samples.iter().map(|(labels, value)| (labels, *value))
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.iter()
            .map(|(labels, value)| Sample::new(labels.clone(), value))
            .collect()
    }

    /// Number of lines of this family that were skipped as malformed.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Number of samples overwritten by a later line with the same labels.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Returns `true` if at least one sample carries the label.
    pub fn has_label(&self, name: &str) -> bool {
        self.samples.keys().any(|labels| labels.contains_key(name))
    }

    /// Sets `name=default` on every sample that lacks the label.
    ///
    /// Series that collide after the substitution follow last-write-wins.
    pub fn fill_missing_label(&mut self, name: &str, default: &str) {
        if self.samples.keys().all(|labels| labels.contains_key(name)) {
            return;
        }
        let samples = std::mem::take(&mut self.samples);
        for (mut labels, value) in samples {
            labels
                .entry(name.to_string())
                .or_insert_with(|| default.to_string());
            self.insert(Sample::new(labels, value));
        }
    }
}

/// Why a sample line was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum LineError {
    /// Label block not closed, or a quoted value not terminated.
    Unterminated,
    /// Label name empty or containing illegal characters.
    LabelName,
    MissingEquals,
    MissingQuote,
    DuplicateLabel(String),
    /// Label block present where none is expected, or vice versa.
    Shape,
    MissingValue,
    InvalidValue(String),
    TrailingGarbage,
}

impl std::fmt::Display for LineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineError::Unterminated => write!(f, "unterminated label block"),
            LineError::LabelName => write!(f, "invalid label name"),
            LineError::MissingEquals => write!(f, "expected '=' after label name"),
            LineError::MissingQuote => write!(f, "expected '\"' before label value"),
            LineError::DuplicateLabel(name) => write!(f, "duplicate label '{}'", name),
            LineError::Shape => write!(f, "unexpected label shape"),
            LineError::MissingValue => write!(f, "missing sample value"),
            LineError::InvalidValue(v) => write!(f, "invalid sample value '{}'", v),
            LineError::TrailingGarbage => write!(f, "unexpected trailing content"),
        }
    }
}

impl std::error::Error for LineError {}

/// Extracts every sample of `matcher`'s family from scrape text.
///
/// Returns an empty snapshot if no line matches; callers treat that as
/// "family absent".
pub fn parse_family(text: &str, matcher: &FamilyMatcher) -> Snapshot {
    let mut snapshot = Snapshot::new(&matcher.name);

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Exact name match: the name must be followed by '{' or whitespace.
        let Some(rest) = line.strip_prefix(matcher.name.as_str()) else {
            continue;
        };
        if !rest.starts_with(|c: char| c == '{' || c.is_whitespace()) {
            continue;
        }

        match parse_sample(rest, matcher) {
            Ok(sample) => {
                if snapshot.insert(sample) {
                    debug!(family = %matcher.name, line, "duplicate series, keeping last");
                }
            }
            Err(e) => {
                snapshot.skipped += 1;
                trace!(family = %matcher.name, line, error = %e, "skipping sample line");
            }
        }
    }

    snapshot
}

/// Parses the part of a sample line after the metric name.
fn parse_sample(rest: &str, matcher: &FamilyMatcher) -> Result<Sample, LineError> {
    let (labels, rest) = match rest.strip_prefix('{') {
        Some(block) => {
            let (labels, after) = parse_label_block(block)?;
            (Some(labels), after)
        }
        None => (None, rest),
    };

    if !matcher.accepts(labels.is_some()) {
        return Err(LineError::Shape);
    }
    if !rest.starts_with(char::is_whitespace) {
        return Err(if rest.is_empty() {
            LineError::MissingValue
        } else {
            LineError::TrailingGarbage
        });
    }

    let mut fields = rest.split_whitespace();
    let value = parse_value(fields.next().ok_or(LineError::MissingValue)?)?;

    // Optional millisecond timestamp; accepted and ignored.
    if let Some(ts) = fields.next() {
        ts.parse::<i64>().map_err(|_| LineError::TrailingGarbage)?;
    }
    if fields.next().is_some() {
        return Err(LineError::TrailingGarbage);
    }

    Ok(Sample::new(labels.unwrap_or_default(), value))
}

/// Parses `k="v",...}` and returns the labels plus the text after `}`.
fn parse_label_block(input: &str) -> Result<(Labels, &str), LineError> {
    let mut labels = Labels::new();
    let mut rest = input.trim_start();

    loop {
        if rest.is_empty() {
            return Err(LineError::Unterminated);
        }
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }

        let name_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let name = &rest[..name_len];
        if !is_label_name(name) {
            return Err(LineError::LabelName);
        }

        rest = rest[name_len..].trim_start();
        rest = rest
            .strip_prefix('=')
            .ok_or(LineError::MissingEquals)?
            .trim_start();
        rest = rest.strip_prefix('"').ok_or(LineError::MissingQuote)?;

        let (value, after) = parse_quoted(rest)?;
        if labels.insert(name.to_string(), value).is_some() {
            return Err(LineError::DuplicateLabel(name.to_string()));
        }

        rest = after.trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after.trim_start();
        } else if !rest.starts_with('}') {
            return Err(LineError::Unterminated);
        }
    }
}

/// Reads a label value up to the closing quote, decoding escapes.
fn parse_quoted(input: &str) -> Result<(String, &str), LineError> {
    let mut value = String::new();
    let mut chars = input.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((value, &input[i + 1..])),
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, '\\')) => value.push('\\'),
                Some((_, '"')) => value.push('"'),
                Some((_, other)) => {
                    value.push('\\');
                    value.push(other);
                }
                None => return Err(LineError::Unterminated),
            },
            c => value.push(c),
        }
    }

    Err(LineError::Unterminated)
}

fn is_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Standard or scientific notation. Non-finite values are rejected: they
/// cannot produce a meaningful rate or gauge row.
fn parse_value(s: &str) -> Result<f64, LineError> {
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(LineError::InvalidValue(s.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn escape(v: &str) -> String {
        v.replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('\n', "\\n")
    }

    fn render(name: &str, samples: &[Sample]) -> String {
        let mut out = format!("# HELP {name} test family\n# TYPE {name} counter\n");
        for s in samples {
            if s.labels.is_empty() {
                out.push_str(&format!("{} {}\n", name, s.value));
            } else {
                let block: Vec<String> = s
                    .labels
                    .iter()
                    .map(|(k, v)| format!("{}=\"{}\"", k, escape(v)))
                    .collect();
                out.push_str(&format!("{}{{{}}} {}\n", name, block.join(","), s.value));
            }
        }
        out
    }

    #[test]
    fn test_parse_labeled_family() {
        let text = "\
# HELP node_cpu_seconds_total Seconds the CPUs spent in each mode.
# TYPE node_cpu_seconds_total counter
node_cpu_seconds_total{cpu=\"0\",mode=\"idle\"} 12345.67
node_cpu_seconds_total{cpu=\"0\",mode=\"user\"} 1.5e+03
node_memory_MemAvailable_bytes 8.123e+09
";
        let snap = parse_family(text, &FamilyMatcher::labeled("node_cpu_seconds_total"));
        assert_eq!(snap.family(), "node_cpu_seconds_total");
        assert_eq!(snap.len(), 2);
        assert_eq!(
            snap.get(&labels(&[("cpu", "0"), ("mode", "idle")])),
            Some(12345.67)
        );
        assert_eq!(
            snap.get(&labels(&[("mode", "user"), ("cpu", "0")])),
            Some(1500.0)
        );
        assert_eq!(snap.skipped(), 0);
    }

    #[test]
    fn test_parse_unlabeled_and_either() {
        let text = "node_memory_MemAvailable_bytes 8.123e+09\n";
        let either = parse_family(text, &FamilyMatcher::either("node_memory_MemAvailable_bytes"));
        assert_eq!(either.get(&Labels::new()), Some(8.123e9));

        let labeled = parse_family(text, &FamilyMatcher::labeled("node_memory_MemAvailable_bytes"));
        assert!(labeled.is_empty());
        assert_eq!(labeled.skipped(), 1);

        let unlabeled =
            parse_family(text, &FamilyMatcher::unlabeled("node_memory_MemAvailable_bytes"));
        assert_eq!(unlabeled.len(), 1);
    }

    #[test]
    fn test_exact_name_match() {
        let text = "\
node_disk_read_bytes_total{device=\"sda\"} 100
node_disk_read_bytes_total_extra{device=\"sda\"} 999
xnode_disk_read_bytes_total{device=\"sdb\"} 5
";
        let snap = parse_family(text, &FamilyMatcher::labeled("node_disk_read_bytes_total"));
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.get(&labels(&[("device", "sda")])), Some(100.0));
        assert_eq!(snap.skipped(), 0);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let text = "\
garbage{unterminated
node_network_receive_bytes_total{device=\"eth0\"} 1000
node_network_receive_bytes_total{device=\"eth1\" 2000
node_network_receive_bytes_total{device=eth2} 3000
node_network_receive_bytes_total{device=\"lo\"} not_a_number
node_network_receive_bytes_total{device=\"lo\",device=\"x\"} 1
node_network_receive_bytes_total{9bad=\"x\"} 1
node_network_receive_bytes_total{device=\"wg0\"} NaN
node_network_receive_bytes_total{device=\"wg1\"} 5 6 7
node_network_receive_bytes_total{device=\"docker0\"} 4.5e2
";
        let snap = parse_family(
            text,
            &FamilyMatcher::labeled("node_network_receive_bytes_total"),
        );
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get(&labels(&[("device", "eth0")])), Some(1000.0));
        assert_eq!(snap.get(&labels(&[("device", "docker0")])), Some(450.0));
        assert_eq!(snap.skipped(), 7);
    }

    #[test]
    fn test_label_values_with_special_chars() {
        let text = r#"node_filesystem_free_bytes{device="/dev/sda1",fstype="ext4",mountpoint="/mnt/a,b {x}=\"q\""} 42"#;
        let snap = parse_family(text, &FamilyMatcher::labeled("node_filesystem_free_bytes"));
        assert_eq!(snap.len(), 1);
        let (l, v) = snap.iter().next().unwrap();
        assert_eq!(l["mountpoint"], "/mnt/a,b {x}=\"q\"");
        assert_eq!(l["fstype"], "ext4");
        assert_eq!(v, 42.0);
    }

    #[test]
    fn test_empty_block_trailing_comma_and_timestamp() {
        let text = "\
up{} 1
up{job=\"node\",} 1 1700000000000
";
        let snap = parse_family(text, &FamilyMatcher::either("up"));
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get(&labels(&[("job", "node")])), Some(1.0));
        assert_eq!(snap.get(&Labels::new()), Some(1.0));
    }

    #[test]
    fn test_duplicates_last_write_wins() {
        let text = "\
node_cpu_seconds_total{cpu=\"0\",mode=\"idle\"} 1
node_cpu_seconds_total{mode=\"idle\",cpu=\"0\"} 2
";
        let snap = parse_family(text, &FamilyMatcher::labeled("node_cpu_seconds_total"));
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.duplicates(), 1);
        assert_eq!(snap.get(&labels(&[("cpu", "0"), ("mode", "idle")])), Some(2.0));
    }

    #[test]
    fn test_absent_family_is_empty() {
        let snap = parse_family("# nothing here\n\n", &FamilyMatcher::labeled("node_cpu_seconds_total"));
        assert!(snap.is_empty());
        assert_eq!(snap.skipped(), 0);
    }

    #[test]
    fn test_round_trip_recovers_samples() {
        let samples = vec![
            Sample::new(labels(&[("cpu", "0"), ("mode", "idle")]), 100.0),
            Sample::new(labels(&[("cpu", "0"), ("mode", "user")]), 50.25),
            Sample::new(labels(&[("cpu", "1"), ("mode", "idle")]), 1.0e-7),
            Sample::new(labels(&[("cpu", "1"), ("mode", "weird \"q\" \\ \n")]), 3.0e12),
            Sample::new(Labels::new(), 0.0),
        ];
        // Order of lines must not matter.
        let mut shuffled = samples.clone();
        shuffled.reverse();
        let text = render("fam", &shuffled);

        let snap = parse_family(&text, &FamilyMatcher::either("fam"));
        assert_eq!(snap.skipped(), 0);
        assert_eq!(snap, Snapshot::from_samples("fam", samples));
    }

    #[test]
    fn test_fill_missing_label() {
        let mut snap = Snapshot::from_samples(
            "fam",
            vec![
                Sample::new(labels(&[("cpu", "0")]), 1.0),
                Sample::new(labels(&[("cpu", "1"), ("instance", "10.0.0.5:9100")]), 2.0),
            ],
        );
        assert!(snap.has_label("instance"));
        snap.fill_missing_label("instance", "localhost:9100");
        assert_eq!(
            snap.get(&labels(&[("cpu", "0"), ("instance", "localhost:9100")])),
            Some(1.0)
        );
        assert_eq!(
            snap.get(&labels(&[("cpu", "1"), ("instance", "10.0.0.5:9100")])),
            Some(2.0)
        );
    }
}
