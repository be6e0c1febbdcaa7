//! # Behavioral Analytics
//!
//! A pipeline listener that learns, per user id, which network origins and
//! endpoints are normal and how fast requests and failed logins usually
//! arrive, then reports deviations as THREAT events.
//!
//! Nothing is reported until a subject has produced `min_baseline_events`
//! events, so a cold start does not flood the bus. Learning continues while
//! flagging: a new origin is reported once and then becomes known.
//!
//! Rate windows are keyed on the triggering event's timestamp, so replayed
//! history is judged by when it happened rather than when it was read.

pub mod profile;

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::event::{AnomalyKind, EventDetails, EventType, SecurityEvent, Severity};
use crate::pipeline::EventListener;
use crate::{AnalyticsConfig, TelemetryResult};

pub use profile::{ProfileSnapshot, SubjectBehaviorProfile};

/// Listener name and `source` of every anomaly this consumer emits.
pub const SOURCE: &str = "uba";

/// Per-subject baselining consumer.
pub struct BehaviorAnalytics {
    config: AnalyticsConfig,
    profiles: Mutex<HashMap<String, SubjectBehaviorProfile>>,
}

impl BehaviorAnalytics {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            config: config.clone(),
            profiles: Mutex::new(HashMap::new()),
        }
    }

    /// Number of subjects with a profile.
    pub fn subject_count(&self) -> usize {
        self.profiles.lock().len()
    }

    /// Copy of one subject's profile, if it has been seen.
    pub fn profile_snapshot(&self, user_id: &str) -> Option<ProfileSnapshot> {
        let profiles = self.profiles.lock();
        let profile = profiles.get(user_id)?;
        Some(ProfileSnapshot {
            user_id: user_id.to_string(),
            events_seen: profile.events_seen,
            baseline_established: profile.baseline_established(self.config.min_baseline_events),
            known_origins: profile.known_origins.to_vec(),
            known_endpoints: profile.known_endpoints.to_vec(),
            requests_in_window: profile.requests.len(),
            auth_failures_in_window: profile.auth_failures.len(),
        })
    }

    /// Update the subject's profile with one event and collect anomalies.
    fn observe(&self, user_id: &str, event: &SecurityEvent) -> Vec<SecurityEvent> {
        let mut anomalies = Vec::new();

        let mut profiles = self.profiles.lock();
        let profile = profiles.entry(user_id.to_string()).or_default();

        profile.events_seen += 1;
        let established = profile.baseline_established(self.config.min_baseline_events);

        if let Some(origin) = event.origin() {
            if profile.known_origins.insert(origin) && established {
                anomalies.push(anomaly(
                    event,
                    AnomalyKind::NewOrigin,
                    Severity::Warning,
                    None,
                    format!("New network origin {} for user {}", origin, user_id),
                ));
            }
        }

        if let Some(endpoint) = event.endpoint() {
            if profile.known_endpoints.insert(endpoint) && established {
                anomalies.push(anomaly(
                    event,
                    AnomalyKind::NewEndpoint,
                    Severity::Warning,
                    None,
                    format!("New endpoint {} for user {}", endpoint, user_id),
                ));
            }
        }

        if event.event_type() == EventType::Request {
            let count = profile
                .requests
                .record(event.timestamp(), self.config.window_secs);
            if established && count >= self.config.rate_threshold_per_minute {
                anomalies.push(anomaly(
                    event,
                    AnomalyKind::RequestRateSpike,
                    Severity::High,
                    Some(count),
                    format!(
                        "Request rate spike for user {}: {} requests in {}s",
                        user_id, count, self.config.window_secs
                    ),
                ));
            }
        }

        if event.is_failed_auth() {
            let count = profile
                .auth_failures
                .record(event.timestamp(), self.config.window_secs);
            if established && count >= self.config.auth_fail_threshold {
                anomalies.push(anomaly(
                    event,
                    AnomalyKind::AuthFailureSpike,
                    Severity::High,
                    Some(count),
                    format!(
                        "Authentication failure spike for user {}: {} failures in {}s",
                        user_id, count, self.config.window_secs
                    ),
                ));
            }
        }

        anomalies
    }
}

fn anomaly(
    trigger: &SecurityEvent,
    kind: AnomalyKind,
    severity: Severity,
    observed: Option<usize>,
    message: String,
) -> SecurityEvent {
    SecurityEvent::builder(EventType::Threat, severity, SOURCE, message)
        .subject(
            trigger.user_id().map(str::to_string),
            trigger.origin().map(str::to_string),
            trigger.endpoint().map(str::to_string),
        )
        .tags(["uba", "anomaly", kind.tag()])
        .details(EventDetails::Anomaly {
            anomaly: kind,
            observed,
        })
        .build()
}

impl EventListener for BehaviorAnalytics {
    fn name(&self) -> &str {
        SOURCE
    }

    fn on_event(&self, event: &SecurityEvent) -> TelemetryResult<Vec<SecurityEvent>> {
        if event.source() == SOURCE {
            return Ok(Vec::new());
        }

        // Derived events describe the system's reaction, not the subject.
        if matches!(
            event.event_type(),
            EventType::CorrelationAlert | EventType::IncidentResponse
        ) {
            return Ok(Vec::new());
        }

        let Some(user_id) = event.user_id() else {
            return Ok(Vec::new());
        };

        let anomalies = self.observe(user_id, event);
        for a in &anomalies {
            log::warn!("[UBA] {} ({})", a.message(), a.severity());
        }
        Ok(anomalies)
    }
}
