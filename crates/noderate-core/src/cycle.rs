//! One collection cycle: fetch, wait, fetch, collect, emit.
//!
//! Nothing is written before both scrapes succeed, so a cycle abandoned
//! early leaves no partial state behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::collector::{CollectContext, MetricCollector, TableOutcome, default_collectors};
use crate::rates::{RateError, check_elapsed};
use crate::scrape::{MetricsSource, RawScrape, ScrapeError, ScrapePair};
use crate::sink::Sink;

const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Error type for a cycle that produced no output at all.
#[derive(Debug)]
pub enum CycleError {
    Scrape(ScrapeError),
    Rate(RateError),
    /// Shutdown requested between the two scrapes.
    Cancelled,
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleError::Scrape(e) => write!(f, "{}", e),
            CycleError::Rate(e) => write!(f, "{}", e),
            CycleError::Cancelled => write!(f, "cycle cancelled"),
        }
    }
}

impl std::error::Error for CycleError {}

impl From<ScrapeError> for CycleError {
    fn from(e: ScrapeError) -> Self {
        CycleError::Scrape(e)
    }
}

impl From<RateError> for CycleError {
    fn from(e: RateError) -> Self {
        CycleError::Rate(e)
    }
}

#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// Nominal gap between the two scrapes. The actual gap is measured.
    pub wait: Duration,
    pub context: CollectContext,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(10),
            context: CollectContext::default(),
        }
    }
}

/// Final state of one destination after the emit stage.
#[derive(Debug, Clone, PartialEq)]
pub enum DestinationStatus {
    /// Rows handed to the sink.
    Stored(usize),
    Absent(String),
    CollectFailed(String),
    SinkFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    pub collector: &'static str,
    pub destination: String,
    pub status: DestinationStatus,
}

/// What a completed cycle did, one entry per destination.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub entries: Vec<ReportEntry>,
    /// Measured gap between the scrapes.
    pub elapsed: Duration,
    /// Capture time of the newer scrape.
    pub timestamp: DateTime<Utc>,
}

impl CycleReport {
    pub fn all_stored(&self) -> bool {
        self.entries
            .iter()
            .all(|e| matches!(e.status, DestinationStatus::Stored(_)))
    }

    /// True if any destination failed to collect or store. Absent
    /// destinations are not failures.
    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|e| {
            matches!(
                e.status,
                DestinationStatus::CollectFailed(_) | DestinationStatus::SinkFailed(_)
            )
        })
    }

    pub fn rows_stored(&self) -> usize {
        self.entries
            .iter()
            .map(|e| match e.status {
                DestinationStatus::Stored(n) => n,
                _ => 0,
            })
            .sum()
    }

    /// Status of the first entry for `destination`.
    pub fn status(&self, destination: &str) -> Option<&DestinationStatus> {
        self.entries
            .iter()
            .find(|e| e.destination == destination)
            .map(|e| &e.status)
    }

    /// One-line summary for logging.
    pub fn describe(&self) -> String {
        let mut stored = 0;
        let mut absent = 0;
        let mut failed = 0;
        for entry in &self.entries {
            match entry.status {
                DestinationStatus::Stored(_) => stored += 1,
                DestinationStatus::Absent(_) => absent += 1,
                DestinationStatus::CollectFailed(_) | DestinationStatus::SinkFailed(_) => {
                    failed += 1
                }
            }
        }
        format!(
            "{} rows stored over {:.3}s window ({} stored, {} absent, {} failed)",
            self.rows_stored(),
            self.elapsed.as_secs_f64(),
            stored,
            absent,
            failed
        )
    }
}

/// Runs collection cycles against a source and a sink.
pub struct Cycle {
    config: CycleConfig,
    collectors: Vec<Box<dyn MetricCollector>>,
}

impl Cycle {
    /// Cycle running every built-in collector.
    pub fn new(config: CycleConfig) -> Self {
        Self::with_collectors(config, default_collectors())
    }

    pub fn with_collectors(config: CycleConfig, collectors: Vec<Box<dyn MetricCollector>>) -> Self {
        Self { config, collectors }
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    /// Runs one cycle. Returns early with `Cancelled` if `running` drops
    /// to false before the second scrape.
    pub fn run(
        &self,
        source: &dyn MetricsSource,
        sink: &mut dyn Sink,
        running: &AtomicBool,
    ) -> Result<CycleReport, CycleError> {
        let older = RawScrape::capture(source)?;
        debug!(bytes = older.body.len(), "first scrape captured");

        if !wait(self.config.wait, running) {
            info!("shutdown requested, abandoning cycle");
            return Err(CycleError::Cancelled);
        }

        let newer = RawScrape::capture(source)?;
        let pair = ScrapePair::measured(older, newer);
        check_elapsed(pair.elapsed_secs())?;
        debug!(
            bytes = pair.newer.body.len(),
            elapsed_ms = pair.elapsed.as_millis() as u64,
            "second scrape captured"
        );

        let outcomes = self.collect(&pair);
        let entries = emit(outcomes, sink);

        Ok(CycleReport {
            entries,
            elapsed: pair.elapsed,
            timestamp: pair.timestamp(),
        })
    }

    /// Runs every collector over `pair` on its own scoped thread.
    ///
    /// Output keeps collector order so reports are stable.
    pub fn collect(&self, pair: &ScrapePair) -> Vec<(&'static str, TableOutcome)> {
        let ctx = &self.config.context;
        let start = Instant::now();

        let outcomes = thread::scope(|s| {
            let handles: Vec<_> = self
                .collectors
                .iter()
                .map(|c| (c.name(), s.spawn(move || c.collect(pair, ctx))))
                .collect();

            handles
                .into_iter()
                .flat_map(|(name, handle)| {
                    let outcomes = handle.join().unwrap_or_else(|_| {
                        error!(collector = name, "collector panicked");
                        vec![TableOutcome::Failed {
                            destination: name.to_string(),
                            error: "collector panicked".to_string(),
                        }]
                    });
                    outcomes.into_iter().map(move |o| (name, o))
                })
                .collect::<Vec<_>>()
        });

        debug!(
            collectors = self.collectors.len(),
            outcomes = outcomes.len(),
            duration_us = start.elapsed().as_micros() as u64,
            "collectors finished"
        );
        outcomes
    }
}

/// Sleeps for `total` in short slices. Returns false if `running` drops.
fn wait(total: Duration, running: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(WAIT_SLICE.min(deadline - now));
    }
}

/// Hands each outcome to the sink. A failing destination does not stop
/// its siblings.
fn emit(outcomes: Vec<(&'static str, TableOutcome)>, sink: &mut dyn Sink) -> Vec<ReportEntry> {
    outcomes
        .into_iter()
        .map(|(collector, outcome)| {
            let destination = outcome.destination().to_string();
            let status = match outcome {
                TableOutcome::Rows(set) => match sink.append(&set) {
                    Ok(()) => {
                        debug!(collector, destination = %destination, rows = set.len(), "stored");
                        DestinationStatus::Stored(set.len())
                    }
                    Err(e) => {
                        error!(collector, destination = %destination, error = %e, "sink rejected rows");
                        DestinationStatus::SinkFailed(e.to_string())
                    }
                },
                TableOutcome::Absent { reason, .. } => DestinationStatus::Absent(reason),
                TableOutcome::Failed { error, .. } => {
                    warn!(collector, destination = %destination, error = %error, "collection failed");
                    DestinationStatus::CollectFailed(error)
                }
            };
            ReportEntry {
                collector,
                destination,
                status,
            }
        })
        .collect()
}
