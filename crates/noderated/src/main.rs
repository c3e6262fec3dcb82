//! noderated - node-exporter rate sampler daemon.
//!
//! Scrapes a node-exporter endpoint twice per cycle, turns counter deltas
//! into per-second rates and appends the normalized rows to a sink.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use noderate_core::collector::CollectContext;
use noderate_core::scrape::HttpSource;
use noderate_core::sink::SinkConfig;
use noderate_core::{Cycle, CycleConfig, CycleError, CycleReport, DestinationStatus, RemapTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SinkKind {
    Postgres,
    Stdout,
}

/// Node-exporter rate sampler daemon.
#[derive(Parser, Debug)]
#[command(name = "noderated", about = "Node-exporter rate sampler daemon", version)]
struct Args {
    /// Metrics endpoint to scrape.
    #[arg(
        long,
        env = "NODE_EXPORTER_METRICS_URL",
        default_value = "http://localhost:9100/metrics"
    )]
    url: String,

    /// Seconds between the two scrapes of a cycle.
    #[arg(short, long, default_value = "10")]
    wait: u64,

    /// Seconds between cycles.
    #[arg(short, long, default_value = "60")]
    interval: u64,

    /// Scrape request timeout in seconds.
    #[arg(long, default_value = "5")]
    timeout: u64,

    /// Run a single cycle and exit. Exit code is non-zero if it failed.
    #[arg(long)]
    once: bool,

    /// Block device to volume label, e.g. sda=C. Repeatable.
    #[arg(long = "device-map", value_name = "DEV=LABEL", value_delimiter = ',',
          default_values = ["sda=C", "sdb=D", "sdc=E"])]
    device_map: Vec<String>,

    /// Mountpoint to volume label, e.g. /=C. Repeatable.
    #[arg(long = "mount-map", value_name = "PATH=LABEL", value_delimiter = ',',
          default_values = ["/=C", "/run=D", "/run/user/1000=E", "/run/lock=F", "/run/snapd/ns=G"])]
    mount_map: Vec<String>,

    /// Instance used for samples without an `instance` label.
    #[arg(long, default_value = "localhost:9100")]
    default_instance: String,

    /// IP used when the instance carries no IPv4 address.
    #[arg(long, default_value = "127.0.0.1")]
    default_ip: String,

    /// Where rows go. Postgres reads PG_CONNECTION_STRING or PGHOST/PGPORT/PGUSER/PGPASSWORD/PGDATABASE.
    #[arg(long, value_enum, default_value = "postgres")]
    sink: SinkKind,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn cycle_config(&self) -> Result<CycleConfig, String> {
        let device_map = RemapTable::parse_entries(self.device_map.as_slice())
            .map_err(|e| format!("--device-map: {}", e))?;
        let mount_map = RemapTable::parse_entries(self.mount_map.as_slice())
            .map_err(|e| format!("--mount-map: {}", e))?;
        Ok(CycleConfig {
            wait: Duration::from_secs(self.wait),
            context: CollectContext {
                default_instance: self.default_instance.clone(),
                default_ip: self.default_ip.clone(),
                device_map,
                mount_map,
            },
        })
    }

    fn sink_config(&self) -> Result<SinkConfig, String> {
        match self.sink {
            SinkKind::Postgres => SinkConfig::postgres_from_env().map_err(|e| e.to_string()),
            SinkKind::Stdout => Ok(SinkConfig::Stdout),
        }
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["noderated", "noderate_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Level a destination's outcome is logged at. Anything short of stored
/// rows is visible at the default level.
fn status_level(status: &DestinationStatus) -> Level {
    match status {
        DestinationStatus::Stored(_) => Level::DEBUG,
        DestinationStatus::Absent(_)
        | DestinationStatus::CollectFailed(_)
        | DestinationStatus::SinkFailed(_) => Level::WARN,
    }
}

fn log_report(cycle_no: u64, report: &CycleReport) {
    info!("Cycle #{}: {}", cycle_no, report.describe());
    for entry in &report.entries {
        let detail = match &entry.status {
            DestinationStatus::Stored(n) => format!("{} rows", n),
            DestinationStatus::Absent(reason) => format!("no data ({})", reason),
            DestinationStatus::CollectFailed(msg) | DestinationStatus::SinkFailed(msg) => msg.clone(),
        };
        if status_level(&entry.status) == Level::WARN {
            warn!("{}/{}: {}", entry.collector, entry.destination, detail);
        } else {
            debug!("{}/{}: {}", entry.collector, entry.destination, detail);
        }
    }
}

/// Opens the sink and runs one cycle. Returns false if the cycle failed or
/// any destination could not be collected or stored.
fn run_cycle(
    cycle_no: u64,
    cycle: &Cycle,
    source: &HttpSource,
    sink_config: &SinkConfig,
    running: &AtomicBool,
) -> bool {
    let mut sink = match sink_config.open() {
        Ok(sink) => sink,
        Err(e) => {
            error!("Cycle #{}: cannot open sink: {}", cycle_no, e);
            return false;
        }
    };

    match cycle.run(source, sink.as_mut(), running) {
        Ok(report) => {
            log_report(cycle_no, &report);
            !report.has_failures()
        }
        Err(CycleError::Cancelled) => {
            info!("Cycle #{} cancelled", cycle_no);
            false
        }
        Err(e) => {
            error!("Cycle #{} failed: {}", cycle_no, e);
            false
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    info!("noderated {} starting", env!("CARGO_PKG_VERSION"));

    let config = match args.cycle_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };
    let sink_config = match args.sink_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid sink configuration: {}", e);
            return ExitCode::from(2);
        }
    };
    let source = match HttpSource::new(&args.url, Duration::from_secs(args.timeout)) {
        Ok(source) => source,
        Err(e) => {
            error!("Cannot build HTTP client: {}", e);
            return ExitCode::from(2);
        }
    };

    info!(
        "Config: url={}, wait={}s, interval={}s, timeout={}s, sink={}",
        args.url,
        args.wait,
        args.interval,
        args.timeout,
        sink_config.describe()
    );
    debug!(
        "Remap tables: {} devices, {} mountpoints",
        config.context.device_map.len(),
        config.context.mount_map.len()
    );

    let cycle = Cycle::new(config);

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    if args.once {
        return if run_cycle(1, &cycle, &source, &sink_config, &running) {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    info!("Starting collection loop");

    let interval = Duration::from_secs(args.interval);
    let mut cycle_no: u64 = 0;

    while running.load(Ordering::SeqCst) {
        cycle_no += 1;
        run_cycle(cycle_no, &cycle, &source, &sink_config, &running);

        // Sleep with periodic checks for shutdown signal
        let sleep_interval = Duration::from_millis(100);
        let mut remaining = interval;
        while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
            let sleep_time = remaining.min(sleep_interval);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
    }

    info!("Shutting down after {} cycles", cycle_no);
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["noderated", "--url", "http://node:9100/metrics"]).unwrap();
        assert_eq!(args.url, "http://node:9100/metrics");
        assert_eq!(args.wait, 10);
        assert_eq!(args.interval, 60);
        assert_eq!(args.sink, SinkKind::Postgres);
        assert_eq!(args.device_map, vec!["sda=C", "sdb=D", "sdc=E"]);
        assert_eq!(args.mount_map.len(), 5);

        let config = args.cycle_config().unwrap();
        assert_eq!(config.wait, Duration::from_secs(10));
        assert_eq!(config.context.device_map.apply("sdb"), "D");
        assert_eq!(config.context.mount_map.apply("/run/lock"), "F");
        assert_eq!(config.context.default_instance, "localhost:9100");
    }

    #[test]
    fn test_remap_overrides() {
        let args = Args::try_parse_from([
            "noderated",
            "--device-map",
            "nvme0n1=C",
            "--device-map",
            "nvme1n1=D,sda=E",
            "--sink",
            "stdout",
            "-vv",
        ])
        .unwrap();
        assert_eq!(args.device_map, vec!["nvme0n1=C", "nvme1n1=D", "sda=E"]);
        assert_eq!(args.sink, SinkKind::Stdout);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.sink_config().unwrap(), SinkConfig::Stdout);

        let config = args.cycle_config().unwrap();
        assert_eq!(config.context.device_map.apply("nvme0n1"), "C");
        // Overriding replaces the defaults entirely.
        assert_eq!(config.context.device_map.apply("sdb"), "sdb");
    }

    #[test]
    fn test_invalid_remap_rejected() {
        let args = Args::try_parse_from(["noderated", "--mount-map", "/=C", "--mount-map", "C=D"]).unwrap();
        let err = args.cycle_config().unwrap_err();
        assert!(err.starts_with("--mount-map"));

        let args = Args::try_parse_from(["noderated", "--device-map", "sda"]).unwrap();
        assert!(args.cycle_config().is_err());
    }

    #[test]
    fn test_absent_destinations_logged_as_warnings() {
        assert_eq!(status_level(&DestinationStatus::Stored(3)), Level::DEBUG);
        assert_eq!(
            status_level(&DestinationStatus::Absent("all series reset".to_string())),
            Level::WARN
        );
        assert_eq!(
            status_level(&DestinationStatus::SinkFailed("rejected".to_string())),
            Level::WARN
        );
    }

    #[test]
    fn test_unknown_sink_rejected() {
        assert!(Args::try_parse_from(["noderated", "--sink", "csv"]).is_err());
    }
}
