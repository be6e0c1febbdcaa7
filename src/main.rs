//! # SENTINEL Telemetry - CLI Entry Point
//!
//! Command-line interface for the SENTINEL Telemetry pipeline.
//!
//! Commands:
//! - `ingest`      - Follow the spool file and feed events through the pipeline
//! - `show`        - Print stored events
//! - `status`      - Show store, audit and ingest status
//! - `init-config` - Generate a default configuration file

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sentinel_telemetry::spool::SpoolReader;
use sentinel_telemetry::store::EventStore;
use sentinel_telemetry::{
    build_pipeline, SecurityEvent, TelemetryConfig, TelemetryError, TelemetryResult,
};

/// SENTINEL Telemetry - security event pipeline.
///
/// Stores security events, correlates them over sliding windows, learns
/// per-user baselines and answers alerts with audited containment.
#[derive(Parser, Debug)]
#[command(name = "sentinel-telemetry")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "sentinel-telemetry.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow the spool file until Ctrl-C, emitting every event it receives.
    Ingest {
        /// Replay lines already in the spool instead of starting at its end.
        #[arg(long)]
        from_start: bool,
    },

    /// Print stored events.
    Show {
        /// UTC day to print (YYYY-MM-DD). Defaults to the newest events overall.
        #[arg(long)]
        day: Option<String>,

        /// Maximum number of events to print.
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Show store, audit and ingest status.
    Status,

    /// Generate a default configuration file.
    InitConfig,
}

fn main() -> TelemetryResult<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest { from_start } => cmd_ingest(&cli.config, from_start),
        Commands::Show { day, limit } => cmd_show(&cli.config, day.as_deref(), limit),
        Commands::Status => cmd_status(&cli.config),
        Commands::InitConfig => cmd_init_config(&cli.config),
    }
}

/// Follow the spool file and feed the pipeline.
///
/// 1. Load configuration (an invalid file leaves the pipeline disabled)
/// 2. Wire store, correlation, analytics and incident response
/// 3. Write PID file and install the Ctrl-C handler
/// 4. Poll the spool until shutdown
fn cmd_ingest(config_path: &Path, from_start: bool) -> TelemetryResult<()> {
    info!("SENTINEL Telemetry starting...");

    let config = TelemetryConfig::load_or_disabled(config_path);
    std::fs::create_dir_all(&config.store.directory)?;

    let pid_path = pid_path(&config);
    write_pid_file(&pid_path)?;
    info!("PID file written to: {}", pid_path.display());

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!("Could not install signal handler: {}. Use kill to stop.", e);
    }

    let pipeline = build_pipeline(&config);
    info!(
        "Pipeline ready (enabled={}, listeners={}, auto_block={})",
        pipeline.is_enabled(),
        pipeline.listener_count(),
        config.response.auto_block_enabled
    );

    let mut spool = SpoolReader::new(&config.ingest.spool_path);
    if !from_start {
        spool.seek_to_end();
    }
    info!("Following spool {}", spool.path().display());

    let poll_interval = std::time::Duration::from_millis(config.ingest.poll_interval_ms);
    let mut total_events: u64 = 0;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            info!("Shutdown signal received. Stopping gracefully...");
            break;
        }

        total_events += spool.drain_into(&pipeline) as u64;
        std::thread::sleep(poll_interval);
    }

    if let Err(e) = std::fs::remove_file(&pid_path) {
        warn!("Could not remove PID file: {}", e);
    }

    let stats = pipeline.stats();
    info!(
        "SENTINEL Telemetry stopped. Ingested {} spool events; {} stored, {} alerts, \
         {} store failures, {} listener failures.",
        total_events,
        stats.events_stored,
        stats.alerts_generated,
        stats.store_failures,
        stats.listener_failures,
    );

    Ok(())
}

/// Print stored events for one day, or the newest events overall.
fn cmd_show(config_path: &Path, day: Option<&str>, limit: usize) -> TelemetryResult<()> {
    let config = load_config(config_path)?;
    let store = EventStore::new(&config.store.directory);

    let events: Vec<SecurityEvent> = match day {
        Some(day) => {
            let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|e| {
                TelemetryError::Config(format!(
                    "Invalid --day {:?} (expected YYYY-MM-DD): {}",
                    day, e
                ))
            })?;
            store.iterate(&[date], limit).collect()
        }
        None => store.recent(limit),
    };

    if events.is_empty() {
        println!("No events found in {}", store.directory().display());
        return Ok(());
    }

    for event in &events {
        println!("{}", format_event(event));
    }
    Ok(())
}

fn format_event(event: &SecurityEvent) -> String {
    let mut line = format!(
        "{} {:<8} {:<18} {:<18} {}",
        event.timestamp().format("%Y-%m-%dT%H:%M:%SZ"),
        event.severity(),
        event.event_type(),
        event.source(),
        event.message()
    );
    if let Some(user) = event.user_id() {
        line.push_str(&format!(" user={}", user));
    }
    if let Some(origin) = event.origin() {
        line.push_str(&format!(" origin={}", origin));
    }
    if !event.tags().is_empty() {
        line.push_str(&format!(" [{}]", event.tags().join(",")));
    }
    line
}

/// Show ingest, store and audit status.
fn cmd_status(config_path: &Path) -> TelemetryResult<()> {
    let config = load_config(config_path)?;
    let pid_path = pid_path(&config);

    match read_pid_file(&pid_path) {
        Some(pid) => {
            if is_process_running(pid) {
                println!("SENTINEL Telemetry ingest is RUNNING (PID: {})", pid);
            } else {
                println!(
                    "SENTINEL Telemetry ingest is NOT RUNNING (stale PID file, PID {} not found)",
                    pid
                );
                println!(
                    "  The process may have crashed. Remove {} to clear.",
                    pid_path.display()
                );
            }
        }
        None => {
            println!("SENTINEL Telemetry ingest is NOT RUNNING (no PID file)");
        }
    }

    let store = EventStore::new(&config.store.directory);
    let days = store.days();
    if days.is_empty() {
        println!("Event store: {} (empty)", store.directory().display());
    } else {
        println!("Event store: {} ({} partitions)", store.directory().display(), days.len());
        for day in days.iter().rev().take(7) {
            println!("  {}: {} events", day, store.count(*day));
        }
        let today = Utc::now().date_naive();
        if !days.contains(&today) {
            println!("  (no events today)");
        }
    }

    if let Some(ref audit_path) = config.response.audit_log_path {
        match std::fs::metadata(audit_path) {
            Ok(metadata) => println!(
                "Audit log: {} ({} bytes)",
                audit_path.display(),
                metadata.len()
            ),
            Err(_) => println!("Audit log: {} (not written yet)", audit_path.display()),
        }
    } else {
        println!("Audit log: application log");
    }

    println!();
    println!("Configuration:");
    println!("  Pipeline enabled: {}", config.pipeline.enabled);
    println!(
        "  Correlation window: {}s (bruteforce {}, firewall {}, data-loss {})",
        config.correlation.window_secs,
        config.correlation.bruteforce_threshold,
        config.correlation.firewall_block_threshold,
        config.correlation.data_loss_block_threshold,
    );
    println!(
        "  Baseline: {} events, rate {}/{}s, auth failures {}",
        config.analytics.min_baseline_events,
        config.analytics.rate_threshold_per_minute,
        config.analytics.window_secs,
        config.analytics.auth_fail_threshold,
    );
    println!(
        "  Auto-block: {} ({:?})",
        config.response.auto_block_enabled, config.response.blocklist
    );
    println!("  Spool: {}", config.ingest.spool_path.display());

    Ok(())
}

/// Generate a default configuration file.
fn cmd_init_config(config_path: &Path) -> TelemetryResult<()> {
    if config_path.exists() {
        return Err(TelemetryError::Config(format!(
            "Configuration file already exists: {}. Remove it first or use a different path.",
            config_path.display()
        )));
    }

    TelemetryConfig::write_default(config_path)?;
    println!("Default configuration written to: {}", config_path.display());
    println!();
    println!("Key settings to configure:");
    println!("  [store]       - Dedicated telemetry directory");
    println!("  [correlation] - Window length and rule thresholds");
    println!("  [analytics]   - Baseline size and rate thresholds");
    println!("  [response]    - Enable auto_block_enabled when ready (default: notify only)");

    Ok(())
}

fn load_config(config_path: &Path) -> TelemetryResult<TelemetryConfig> {
    if config_path.exists() {
        TelemetryConfig::from_file(config_path)
    } else {
        Ok(TelemetryConfig::default())
    }
}

// ---------------------------------------------------------------------------
// PID file management
// ---------------------------------------------------------------------------

fn pid_path(config: &TelemetryConfig) -> PathBuf {
    config.store.directory.join("sentinel-telemetry.pid")
}

fn write_pid_file(path: &Path) -> TelemetryResult<()> {
    std::fs::write(path, std::process::id().to_string())?;
    Ok(())
}

/// Read a PID from a PID file. Returns None if file doesn't exist or is invalid.
fn read_pid_file(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<u32>()
        .ok()
}

/// Check if a process with the given PID is still running.
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // kill -0 checks existence without sending a signal.
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    {
        let output = std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH"])
            .output();
        match output {
            Ok(out) => {
                let stdout = String::from_utf8_lossy(&out.stdout);
                !stdout.contains("No tasks") && stdout.contains(&pid.to_string())
            }
            Err(_) => false,
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        false
    }
}
