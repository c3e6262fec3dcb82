//! Abstractions for fetching exposition text.
//!
//! The `MetricsSource` trait lets the cycle run against a real HTTP endpoint
//! or against canned bodies in tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Error type for scrape failures. Any of these aborts the cycle.
#[derive(Debug)]
pub enum ScrapeError {
    /// Connection refused, DNS failure, timeout, ...
    Transport(String),
    /// Target answered with a non-2xx status.
    Status(u16),
    /// Response body could not be read.
    Body(String),
}

impl std::fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeError::Transport(msg) => write!(f, "scrape failed: {}", msg),
            ScrapeError::Status(code) => write!(f, "scrape target returned HTTP {}", code),
            ScrapeError::Body(msg) => write!(f, "failed to read scrape body: {}", msg),
        }
    }
}

impl std::error::Error for ScrapeError {}

/// Source of exposition-format text.
pub trait MetricsSource: Send + Sync {
    /// Fetches one complete scrape body.
    fn fetch(&self) -> Result<String, ScrapeError>;
}

/// One scrape body with its capture times.
#[derive(Debug, Clone)]
pub struct RawScrape {
    pub body: String,
    /// Wall-clock capture time, stamped on emitted records.
    pub captured_at: DateTime<Utc>,
    /// Monotonic capture time, used for elapsed-time measurement.
    pub taken: Instant,
}

impl RawScrape {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            captured_at: Utc::now(),
            taken: Instant::now(),
        }
    }

    /// Fetches from `source` and timestamps the body on arrival.
    pub fn capture(source: &dyn MetricsSource) -> Result<Self, ScrapeError> {
        let body = source.fetch()?;
        Ok(Self::new(body))
    }
}

/// The older and newer scrape of one cycle plus the measured gap.
#[derive(Debug, Clone)]
pub struct ScrapePair {
    pub older: RawScrape,
    pub newer: RawScrape,
    pub elapsed: Duration,
}

impl ScrapePair {
    /// Pairs two scrapes, measuring the gap on the monotonic clock.
    pub fn measured(older: RawScrape, newer: RawScrape) -> Self {
        let elapsed = newer.taken.saturating_duration_since(older.taken);
        Self {
            older,
            newer,
            elapsed,
        }
    }

    /// Pairs two bodies with an explicit gap (fixtures, replays).
    pub fn with_elapsed(older: &str, newer: &str, elapsed: Duration) -> Self {
        Self {
            older: RawScrape::new(older),
            newer: RawScrape::new(newer),
            elapsed,
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// Capture time of the newer snapshot.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.newer.captured_at
    }
}

/// Blocking HTTP scraper with a bounded request timeout.
#[cfg(feature = "http")]
pub struct HttpSource {
    url: String,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl HttpSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ScrapeError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScrapeError::Transport(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(feature = "http")]
impl MetricsSource for HttpSource {
    fn fetch(&self) -> Result<String, ScrapeError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .map_err(|e| ScrapeError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status(status.as_u16()));
        }

        response.text().map_err(|e| ScrapeError::Body(e.to_string()))
    }
}

/// In-memory source for testing. Hands out queued responses in order.
#[derive(Debug, Default)]
pub struct MockSource {
    responses: Mutex<VecDeque<Result<String, ScrapeError>>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful body.
    pub fn push_body(self, body: impl Into<String>) -> Self {
        self.push(Ok(body.into()))
    }

    /// Queues a failure.
    pub fn push_error(self, error: ScrapeError) -> Self {
        self.push(Err(error))
    }

    fn push(self, response: Result<String, ScrapeError>) -> Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
        self
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl MetricsSource for MockSource {
    fn fetch(&self) -> Result<String, ScrapeError> {
        let mut queue = self
            .responses
            .lock()
            .map_err(|_| ScrapeError::Transport("mock source poisoned".to_string()))?;
        queue
            .pop_front()
            .unwrap_or_else(|| Err(ScrapeError::Transport("mock source exhausted".to_string())))
    }
}
