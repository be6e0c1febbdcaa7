//! # Telemetry Pipeline
//!
//! The single entry point for producers. `emit` persists an event, runs it
//! through correlation, persists every alert, then dispatches the event and
//! its alerts to the registered listeners, all inline on the caller's
//! thread.
//!
//! Listener follow-ups are persisted and dispatched to listeners again, but
//! never correlated. They flow through a FIFO work queue; an event more than
//! [`MAX_CASCADE_DEPTH`] hops away from the producer is stored and not
//! dispatched. Listeners still ignore their own events, which keeps a
//! healthy cascade to one or two hops.
//!
//! `emit` never fails. Store faults, rule faults and listener faults are
//! logged at their own boundary and counted in [`PipelineStats`].
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::correlation::CorrelationEngine;
use crate::event::{EventType, SecurityEvent, Severity};
use crate::store::EventStore;
use crate::TelemetryResult;

/// Follow-up hops dispatched before the cascade is cut off.
pub const MAX_CASCADE_DEPTH: usize = 8;

/// A registered consumer of pipeline events.
///
/// Implementations that also produce events must return immediately, with
/// no follow-ups, for any event whose `source` equals their own `name`.
pub trait EventListener: Send + Sync {
    /// Identity used in logs and as the `source` of produced events.
    fn name(&self) -> &str;

    /// React to one event, optionally returning follow-up events.
    fn on_event(&self, event: &SecurityEvent) -> TelemetryResult<Vec<SecurityEvent>>;
}

/// Point-in-time counters for the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub events_emitted: u64,
    pub events_stored: u64,
    pub store_failures: u64,
    pub alerts_generated: u64,
    pub listener_invocations: u64,
    pub listener_failures: u64,
    pub follow_ups: u64,
    pub cascades_truncated: u64,
}

#[derive(Default)]
struct Counters {
    events_emitted: AtomicU64,
    events_stored: AtomicU64,
    store_failures: AtomicU64,
    alerts_generated: AtomicU64,
    listener_invocations: AtomicU64,
    listener_failures: AtomicU64,
    follow_ups: AtomicU64,
    cascades_truncated: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

/// The telemetry bus. Shared across producer threads behind an `Arc`.
pub struct TelemetryPipeline {
    enabled: AtomicBool,
    store: EventStore,
    engine: CorrelationEngine,
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    counters: Counters,
}

impl TelemetryPipeline {
    /// Create an enabled pipeline with no listeners.
    pub fn new(store: EventStore, engine: CorrelationEngine) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            store,
            engine,
            listeners: RwLock::new(Vec::new()),
            counters: Counters::default(),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        log::info!("[PIPELINE] Telemetry enabled");
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        log::info!("[PIPELINE] Telemetry disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Append a listener. Listeners run in registration order; a listener
    /// registered mid-dispatch sees events from the next dispatch on.
    pub fn register_listener(&self, listener: Arc<dyn EventListener>) {
        log::debug!("[PIPELINE] Registered listener {}", listener.name());
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn engine(&self) -> &CorrelationEngine {
        &self.engine
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            events_emitted: c.events_emitted.load(Ordering::Relaxed),
            events_stored: c.events_stored.load(Ordering::Relaxed),
            store_failures: c.store_failures.load(Ordering::Relaxed),
            alerts_generated: c.alerts_generated.load(Ordering::Relaxed),
            listener_invocations: c.listener_invocations.load(Ordering::Relaxed),
            listener_failures: c.listener_failures.load(Ordering::Relaxed),
            follow_ups: c.follow_ups.load(Ordering::Relaxed),
            cascades_truncated: c.cascades_truncated.load(Ordering::Relaxed),
        }
    }

    /// Ingest one event. A complete no-op while the pipeline is disabled.
    pub fn emit(&self, event: SecurityEvent) {
        if !self.is_enabled() {
            return;
        }
        bump(&self.counters.events_emitted, 1);

        self.persist(&event);

        let alerts = self.engine.ingest(&event);
        for alert in &alerts {
            self.persist(alert);
        }
        bump(&self.counters.alerts_generated, alerts.len() as u64);

        // (event, hops from the producer). Alerts sit at the same depth as
        // the event that triggered them.
        let mut queue: VecDeque<(SecurityEvent, usize)> = VecDeque::with_capacity(1 + alerts.len());
        queue.push_back((event, 0));
        queue.extend(alerts.into_iter().map(|alert| (alert, 0)));

        while let Some((current, depth)) = queue.pop_front() {
            for follow_up in self.dispatch(&current) {
                bump(&self.counters.follow_ups, 1);
                self.persist(&follow_up);

                if depth + 1 > MAX_CASCADE_DEPTH {
                    bump(&self.counters.cascades_truncated, 1);
                    log::warn!(
                        "[PIPELINE] Cascade depth {} exceeded, {} from {} stored, not dispatched",
                        MAX_CASCADE_DEPTH,
                        follow_up.event_type(),
                        follow_up.source()
                    );
                    continue;
                }
                queue.push_back((follow_up, depth + 1));
            }
        }
    }

    /// Build an event from loose parts and emit it.
    #[allow(clippy::too_many_arguments)]
    pub fn emit_simple(
        &self,
        event_type: EventType,
        severity: Severity,
        source: &str,
        message: &str,
        user_id: Option<&str>,
        origin: Option<&str>,
        endpoint: Option<&str>,
        metadata: Option<serde_json::Map<String, Value>>,
        tags: &[&str],
    ) {
        if !self.is_enabled() {
            return;
        }

        let event = SecurityEvent::builder(event_type, severity, source, message)
            .subject(
                user_id.map(str::to_string),
                origin.map(str::to_string),
                endpoint.map(str::to_string),
            )
            .tags(tags.iter().copied())
            .metadata_map(metadata.unwrap_or_default())
            .build();

        self.emit(event);
    }

    fn persist(&self, event: &SecurityEvent) {
        if self.store.append(event) {
            bump(&self.counters.events_stored, 1);
        } else {
            bump(&self.counters.store_failures, 1);
        }
    }

    /// Run every listener in a snapshot of the registry against one event.
    fn dispatch(&self, event: &SecurityEvent) -> Vec<SecurityEvent> {
        let listeners: Vec<Arc<dyn EventListener>> = self.listeners.read().clone();

        let mut follow_ups = Vec::new();
        for listener in &listeners {
            bump(&self.counters.listener_invocations, 1);
            match listener.on_event(event) {
                Ok(mut produced) => follow_ups.append(&mut produced),
                Err(e) => {
                    bump(&self.counters.listener_failures, 1);
                    log::error!(
                        "[PIPELINE] Listener {} failed on {} event from {}: {}",
                        listener.name(),
                        event.event_type(),
                        event.source(),
                        e
                    );
                }
            }
        }
        follow_ups
    }
}
