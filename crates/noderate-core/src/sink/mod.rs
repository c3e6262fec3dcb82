//! Persistence boundary.
//!
//! A `Sink` accepts a [`RecordSet`] and appends it to the named destination.
//! The collection engine never depends on what sits behind it.
//!
//! With `postgres` feature (default):
//! - [`PostgresSink`] - one table per destination, append-only

#[cfg(feature = "postgres")]
mod pg;

#[cfg(feature = "postgres")]
pub use pg::PostgresSink;

use std::io::Write;

use serde::Serialize;

use crate::record::{NormalizedRecord, RecordSet};

/// Error type for sink failures.
#[derive(Debug)]
pub enum SinkError {
    /// Environment variable not set.
    EnvNotSet(String),
    /// Could not reach the store.
    Connect(String),
    /// Statement or write rejected.
    Query(String),
    /// Local I/O failure.
    Io(std::io::Error),
    /// Row could not be encoded.
    Serialize(String),
    /// Sink kind not compiled in.
    Unsupported(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::EnvNotSet(var) => write!(f, "sink: {} not set", var),
            SinkError::Connect(msg) => write!(f, "sink connection failed: {}", msg),
            SinkError::Query(msg) => write!(f, "sink query error: {}", msg),
            SinkError::Io(e) => write!(f, "sink I/O error: {}", e),
            SinkError::Serialize(msg) => write!(f, "sink serialization error: {}", msg),
            SinkError::Unsupported(kind) => write!(f, "sink '{}' not available in this build", kind),
        }
    }
}

impl std::error::Error for SinkError {}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        SinkError::Io(e)
    }
}

/// Destination for normalized rows. Append semantics only.
pub trait Sink {
    fn append(&mut self, set: &RecordSet) -> Result<(), SinkError>;
}

/// How to open a sink for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkConfig {
    Postgres { connection_string: String },
    Stdout,
}

impl SinkConfig {
    /// PostgreSQL configuration from the environment.
    ///
    /// `PG_CONNECTION_STRING` wins if set. Otherwise the standard libpq
    /// variables are used:
    /// - PGHOST (default: localhost)
    /// - PGPORT (default: 5432)
    /// - PGUSER (default: $USER)
    /// - PGPASSWORD (default: empty)
    /// - PGDATABASE (default: same as PGUSER)
    pub fn postgres_from_env() -> Result<Self, SinkError> {
        if let Ok(connection_string) = std::env::var("PG_CONNECTION_STRING") {
            return Ok(SinkConfig::Postgres { connection_string });
        }

        let user = std::env::var("PGUSER")
            .or_else(|_| std::env::var("USER"))
            .map_err(|_| SinkError::EnvNotSet("PGUSER or USER".to_string()))?;
        let host = std::env::var("PGHOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("PGPORT").unwrap_or_else(|_| "5432".to_string());
        let password = std::env::var("PGPASSWORD").unwrap_or_default();
        let database = std::env::var("PGDATABASE").unwrap_or_else(|_| user.clone());

        Ok(SinkConfig::Postgres {
            connection_string: connection_string(&host, &port, &user, &password, &database),
        })
    }

    /// Opens the sink. The returned handle lives for one cycle.
    pub fn open(&self) -> Result<Box<dyn Sink>, SinkError> {
        match self {
            #[cfg(feature = "postgres")]
            SinkConfig::Postgres { connection_string } => {
                Ok(Box::new(PostgresSink::connect(connection_string)?))
            }
            #[cfg(not(feature = "postgres"))]
            SinkConfig::Postgres { .. } => Err(SinkError::Unsupported("postgres".to_string())),
            SinkConfig::Stdout => Ok(Box::new(StdoutSink::new(std::io::stdout()))),
        }
    }

    /// Short description without credentials, for logging.
    pub fn describe(&self) -> String {
        match self {
            SinkConfig::Postgres { connection_string } if connection_string.contains("://") => {
                "postgres (url)".to_string()
            }
            SinkConfig::Postgres { connection_string } => {
                let visible: Vec<&str> = connection_string
                    .split_whitespace()
                    .filter(|kv| !kv.starts_with("password="))
                    .collect();
                format!("postgres ({})", visible.join(" "))
            }
            SinkConfig::Stdout => "stdout".to_string(),
        }
    }
}

fn connection_string(host: &str, port: &str, user: &str, password: &str, database: &str) -> String {
    if password.is_empty() {
        format!(
            "host={} port={} user={} dbname={}",
            host, port, user, database
        )
    } else {
        format!(
            "host={} port={} user={} password={} dbname={}",
            host, port, user, password, database
        )
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    destination: &'a str,
    row: &'a NormalizedRecord,
}

/// Writes each row as one JSON object per line, tagged with its destination.
pub struct StdoutSink<W: Write> {
    out: W,
}

impl<W: Write> StdoutSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Sink for StdoutSink<W> {
    fn append(&mut self, set: &RecordSet) -> Result<(), SinkError> {
        for record in &set.records {
            let line = JsonLine {
                destination: &set.destination,
                row: record,
            };
            serde_json::to_writer(&mut self.out, &line)
                .map_err(|e| SinkError::Serialize(e.to_string()))?;
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        Ok(())
    }
}

/// In-memory sink for testing. Optionally rejects chosen destinations.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub sets: Vec<RecordSet>,
    fail_destinations: Vec<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every append to `destination` fail.
    pub fn failing_on(mut self, destination: &str) -> Self {
        self.fail_destinations.push(destination.to_string());
        self
    }

    /// All stored sets for a destination.
    pub fn destination(&self, destination: &str) -> Vec<&RecordSet> {
        self.sets
            .iter()
            .filter(|s| s.destination == destination)
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.sets.iter().map(RecordSet::len).sum()
    }
}

impl Sink for MemorySink {
    fn append(&mut self, set: &RecordSet) -> Result<(), SinkError> {
        if self.fail_destinations.iter().any(|d| *d == set.destination) {
            return Err(SinkError::Query(format!(
                "destination '{}' rejected",
                set.destination
            )));
        }
        self.sets.push(set.clone());
        Ok(())
    }
}
