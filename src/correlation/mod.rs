//! # Correlation Engine
//!
//! Detects multi-event attack patterns with simple, explainable threshold
//! rules over one shared buffer of recently ingested events.
//!
//! Every ingestion appends to the buffer, evicts entries older than the
//! window (and the oldest entries beyond capacity), then runs every rule
//! against what is left. The buffer lock is held across all three steps so
//! a rule never observes a buffer being mutated by another producer thread.
//!
//! Rules recompute over the live buffer on every ingestion instead of
//! keeping counters, which keeps them correct under any interleaving of
//! concurrent `emit` calls. The consequence is that a sustained pattern
//! re-alerts on every ingestion while it stays above threshold.

pub mod rules;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::event::SecurityEvent;
use crate::{CorrelationConfig, TelemetryResult};

/// Source name carried by every alert this engine produces.
pub const SOURCE: &str = "correlation";

/// A buffered event and the instant it was ingested.
#[derive(Debug, Clone)]
struct WindowEntry {
    arrived_at: DateTime<Utc>,
    event: SecurityEvent,
}

/// Read-only view of the live buffer handed to each rule.
#[derive(Debug)]
pub struct CorrelationWindow<'a> {
    events: Vec<&'a SecurityEvent>,
    window_secs: u64,
    now: DateTime<Utc>,
}

impl<'a> CorrelationWindow<'a> {
    pub fn new(events: Vec<&'a SecurityEvent>, window_secs: u64, now: DateTime<Utc>) -> Self {
        Self {
            events,
            window_secs,
            now,
        }
    }

    /// Events inside the window, oldest arrival first.
    pub fn events(&self) -> &[&'a SecurityEvent] {
        &self.events
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    /// The ingestion instant this evaluation runs at.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

/// One independent detection rule.
///
/// A rule may fail; the engine logs the failure and keeps running the
/// remaining rules.
pub trait CorrelationRule: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, window: &CorrelationWindow<'_>) -> TelemetryResult<Vec<SecurityEvent>>;
}

/// Shared sliding-window correlation engine.
pub struct CorrelationEngine {
    window_secs: u64,
    capacity: usize,
    buffer: Mutex<VecDeque<WindowEntry>>,
    rules: Vec<Box<dyn CorrelationRule>>,
}

impl CorrelationEngine {
    /// Create an engine running the built-in rule set.
    pub fn new(config: &CorrelationConfig) -> Self {
        Self::with_rules(config, rules::default_rules(config))
    }

    /// Create an engine running a caller-supplied rule set.
    pub fn with_rules(config: &CorrelationConfig, rules: Vec<Box<dyn CorrelationRule>>) -> Self {
        Self {
            window_secs: config.window_secs,
            capacity: config.buffer_capacity.max(1),
            buffer: Mutex::new(VecDeque::new()),
            rules,
        }
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Number of events currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Ingest an event arriving now. Returns the alerts it produced.
    pub fn ingest(&self, event: &SecurityEvent) -> Vec<SecurityEvent> {
        self.ingest_at(event, Utc::now())
    }

    /// Ingest an event with an explicit arrival instant.
    pub fn ingest_at(&self, event: &SecurityEvent, now: DateTime<Utc>) -> Vec<SecurityEvent> {
        let mut buffer = self.buffer.lock();

        buffer.push_back(WindowEntry {
            arrived_at: now,
            event: event.clone(),
        });
        while buffer.len() > self.capacity {
            buffer.pop_front();
        }

        let cutoff = now
            .checked_sub_signed(crate::seconds(self.window_secs))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        buffer.retain(|entry| entry.arrived_at >= cutoff);

        let window = CorrelationWindow::new(
            buffer.iter().map(|entry| &entry.event).collect(),
            self.window_secs,
            now,
        );

        let mut alerts = Vec::new();
        for rule in &self.rules {
            match rule.evaluate(&window) {
                Ok(mut produced) => {
                    for alert in &produced {
                        log::warn!(
                            "[CORRELATION] {} fired: {}",
                            rule.name(),
                            alert.message()
                        );
                    }
                    alerts.append(&mut produced);
                }
                Err(e) => {
                    log::error!("[CORRELATION] Rule {} failed: {}", rule.name(), e);
                }
            }
        }

        alerts
    }
}
