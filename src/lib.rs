//! # SENTINEL Telemetry - Core Library
//!
//! In-process security telemetry pipeline for the practice management
//! application. Producers (authentication, firewall, data-loss and
//! database-activity hooks) hand events to a single bus which persists
//! them, runs sliding-window correlation rules, and dispatches both raw
//! events and derived alerts to reactive consumers.
//!
//! ## Design Philosophy
//! - **Telemetry never breaks the host.** `emit` is infallible; every fault
//!   inside the pipeline is logged and swallowed at its own boundary.
//! - **Append only.** Events are written once, to one file per UTC day.
//! - **Explainable rules.** Correlation is threshold counting over a
//!   shared recent-event window, nothing else.
//! - **Bounded feedback.** Reactive consumers ignore events they produced
//!   themselves, so emit -> listen -> emit cannot ping-pong.

pub mod analytics;
pub mod correlation;
pub mod event;
pub mod pipeline;
pub mod response;
pub mod spool;
pub mod store;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub use event::{EventDetails, EventType, SecurityEvent, Severity};
pub use pipeline::{EventListener, PipelineStats, TelemetryPipeline};

use analytics::BehaviorAnalytics;
use correlation::CorrelationEngine;
use response::audit::{AuditLog, JsonlAuditLog, LogAuditLog};
use response::blocker::{Blocklist, FirewallBlocklist, MemoryBlocklist};
use response::IncidentResponder;
use store::EventStore;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for SENTINEL Telemetry.
///
/// These never cross `TelemetryPipeline::emit`; they exist so internal
/// boundaries can report what went wrong before the bus logs it.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Event store error: {0}")]
    Store(String),

    #[error("Correlation rule {rule} failed: {reason}")]
    Rule { rule: String, reason: String },

    #[error("Listener {listener} failed: {reason}")]
    Listener { listener: String, reason: String },

    #[error("Response action failed: {0}")]
    Response(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Longest accepted sliding window (30 days).
pub const MAX_WINDOW_SECS: u64 = 30 * 24 * 3600;

/// Longest accepted in-memory block (10 years).
pub const MAX_BLOCK_DURATION_SECS: u64 = 10 * 365 * 24 * 3600;

/// Whole seconds as a `chrono::Duration`, saturating instead of panicking.
pub(crate) fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Top-level configuration for SENTINEL Telemetry.
///
/// Loaded from `sentinel-telemetry.toml` in the working directory or a path
/// supplied via CLI flag. Every section has defaults, so a partial file is
/// valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Process-wide pipeline switch.
    pub pipeline: PipelineConfig,

    /// Where the day partitions live.
    pub store: StoreConfig,

    /// Correlation window and rule thresholds.
    pub correlation: CorrelationConfig,

    /// Behavioral baselining thresholds.
    pub analytics: AnalyticsConfig,

    /// Automated containment and audit trail.
    pub response: ResponseConfig,

    /// Spool file ingestion for out-of-process producers.
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// When false, `emit` is a complete no-op.
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Dedicated telemetry directory holding `events-YYYY-MM-DD.jsonl`.
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Sliding window length in seconds shared by every rule.
    pub window_secs: u64,

    /// Maximum number of buffered events; oldest are evicted first.
    pub buffer_capacity: usize,

    /// Failed AUTH events from one origin before a brute-force alert.
    pub bruteforce_threshold: usize,

    /// FIREWALL_BLOCK events from one origin before a web-attack alert.
    pub firewall_block_threshold: usize,

    /// Blocked DATA_LOSS events per (user, origin) before an exfiltration alert.
    pub data_loss_block_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Sliding window for request and auth-failure rates.
    pub window_secs: u64,

    /// Requests inside the window that count as a spike.
    pub rate_threshold_per_minute: usize,

    /// Events a subject must produce before anomalies are reported.
    pub min_baseline_events: u64,

    /// Failed authentications inside the window that count as a spike.
    pub auth_fail_threshold: usize,
}

/// Which blocklist backend incident response talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlocklistKind {
    /// In-process blocklist, consulted by the host's own request filter.
    Memory,
    /// System firewall rules (iptables / netsh).
    Firewall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// Whether correlation alerts may block origins (false = notify only).
    pub auto_block_enabled: bool,

    /// Blocklist backend.
    pub blocklist: BlocklistKind,

    /// How many seconds an in-memory block lasts.
    /// None = permanent until manual unblock.
    pub block_duration_secs: Option<u64>,

    /// Append-only JSONL audit trail. When absent, audit records go to the
    /// application log instead.
    pub audit_log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Spool file that out-of-process producers append JSON events to.
    pub spool_path: PathBuf,

    /// How often the spool file is polled, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./telemetry"),
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            buffer_capacity: 5000,
            bruteforce_threshold: 5,
            firewall_block_threshold: 3,
            data_loss_block_threshold: 2,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            rate_threshold_per_minute: 120,
            min_baseline_events: 3,
            auth_fail_threshold: 5,
        }
    }
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            auto_block_enabled: false,
            blocklist: BlocklistKind::Memory,
            block_duration_secs: Some(3600),
            audit_log_path: Some(PathBuf::from("./telemetry/audit.jsonl")),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            spool_path: PathBuf::from("./telemetry/spool.jsonl"),
            poll_interval_ms: 500,
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> TelemetryResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TelemetryConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default configuration to a TOML file.
    pub fn write_default(path: &Path) -> TelemetryResult<()> {
        let config = Self::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| TelemetryError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration, never failing process startup.
    ///
    /// A missing file yields defaults. A file that cannot be read or parsed
    /// yields defaults with the pipeline disabled, so the host keeps running
    /// without telemetry rather than refusing to start.
    pub fn load_or_disabled(path: &Path) -> Self {
        if !path.exists() {
            log::info!(
                "[CONFIG] No telemetry config at {}, using defaults",
                path.display()
            );
            return Self::default();
        }

        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!(
                    "[CONFIG] Invalid telemetry config {} ({}), pipeline starts disabled",
                    path.display(),
                    e
                );
                let mut config = Self::default();
                config.pipeline.enabled = false;
                config
            }
        }
    }

    /// Reject values that would make a rule or window meaningless.
    pub fn validate(&self) -> TelemetryResult<()> {
        if self.correlation.window_secs == 0 || self.analytics.window_secs == 0 {
            return Err(TelemetryError::Config(
                "window_secs must be greater than zero".to_string(),
            ));
        }
        if self.correlation.window_secs > MAX_WINDOW_SECS
            || self.analytics.window_secs > MAX_WINDOW_SECS
        {
            return Err(TelemetryError::Config(format!(
                "window_secs must not exceed {}",
                MAX_WINDOW_SECS
            )));
        }
        if self
            .response
            .block_duration_secs
            .is_some_and(|secs| secs > MAX_BLOCK_DURATION_SECS)
        {
            return Err(TelemetryError::Config(format!(
                "response.block_duration_secs must not exceed {}",
                MAX_BLOCK_DURATION_SECS
            )));
        }
        if self.correlation.buffer_capacity == 0 {
            return Err(TelemetryError::Config(
                "correlation.buffer_capacity must be greater than zero".to_string(),
            ));
        }
        if self.correlation.bruteforce_threshold == 0
            || self.correlation.firewall_block_threshold == 0
            || self.correlation.data_loss_block_threshold == 0
        {
            return Err(TelemetryError::Config(
                "correlation thresholds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Build the blocklist backend named in the configuration.
pub fn build_blocklist(config: &ResponseConfig) -> Arc<dyn Blocklist> {
    match config.blocklist {
        BlocklistKind::Memory => Arc::new(MemoryBlocklist::new(config.block_duration_secs)),
        BlocklistKind::Firewall => Arc::new(FirewallBlocklist::new()),
    }
}

/// Build the audit sink named in the configuration.
pub fn build_audit_log(config: &ResponseConfig) -> Arc<dyn AuditLog> {
    match config.audit_log_path {
        Some(ref path) => Arc::new(JsonlAuditLog::new(path.clone())),
        None => {
            log::warn!("[CONFIG] No audit_log_path configured, auditing to the application log");
            Arc::new(LogAuditLog)
        }
    }
}

/// Construct a fully wired pipeline: store, correlation engine, behavioral
/// analytics and incident response, in that registration order.
///
/// This is the host's initialization routine; the returned handle is
/// cloned into every producer.
pub fn build_pipeline(config: &TelemetryConfig) -> Arc<TelemetryPipeline> {
    build_pipeline_with(
        config,
        build_blocklist(&config.response),
        build_audit_log(&config.response),
    )
}

/// Same as [`build_pipeline`] with caller-supplied external collaborators.
pub fn build_pipeline_with(
    config: &TelemetryConfig,
    blocklist: Arc<dyn Blocklist>,
    audit: Arc<dyn AuditLog>,
) -> Arc<TelemetryPipeline> {
    let store = EventStore::new(&config.store.directory);
    let engine = CorrelationEngine::new(&config.correlation);
    let pipeline = Arc::new(TelemetryPipeline::new(store, engine));

    pipeline.register_listener(Arc::new(BehaviorAnalytics::new(&config.analytics)));
    pipeline.register_listener(Arc::new(IncidentResponder::new(
        &config.response,
        blocklist,
        audit,
    )));

    if config.pipeline.enabled {
        pipeline.enable();
    } else {
        log::warn!("[PIPELINE] Telemetry disabled by configuration");
        pipeline.disable();
    }

    pipeline
}
