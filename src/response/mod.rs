//! # Incident Response
//!
//! A pipeline listener that turns high-confidence alerts into containment
//! and always leaves an audit trail.
//! DEFENSE ONLY - the response module can block and notify, never retaliate.
//!
//! | Trigger                                          | Decision                      |
//! |--------------------------------------------------|-------------------------------|
//! | CORRELATION_ALERT, origin, auto-block, >= HIGH   | block (or `already_blocked`)  |
//! | any other CORRELATION_ALERT                      | notify                        |
//! | DATA_LOSS with `action=block`                    | notify, never escalated       |
//! | THREAT from behavioral analytics, >= HIGH        | notify                        |
//!
//! Each trigger yields exactly one INCIDENT_RESPONSE event, and each of
//! those is summarized into the audit log.

pub mod audit;
pub mod blocker;

use serde_json::Value;
use std::sync::Arc;

use crate::analytics;
use crate::event::{EventDetails, EventType, Metadata, ResponseAction, SecurityEvent, Severity};
use crate::pipeline::EventListener;
use crate::{ResponseConfig, TelemetryResult};

use audit::AuditLog;
use blocker::Blocklist;

/// Listener name and `source` of every response event.
pub const SOURCE: &str = "incident_response";

/// Audit category for every response record.
const AUDIT_CATEGORY: &str = "incident_response";

/// Reacts to alerts through an external blocklist and audit log.
pub struct IncidentResponder {
    auto_block_enabled: bool,
    blocklist: Arc<dyn Blocklist>,
    audit: Arc<dyn AuditLog>,
}

impl IncidentResponder {
    pub fn new(
        config: &ResponseConfig,
        blocklist: Arc<dyn Blocklist>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            auto_block_enabled: config.auto_block_enabled,
            blocklist,
            audit,
        }
    }

    /// Decide what to do about one trigger, or None if it is not ours.
    fn decide(&self, event: &SecurityEvent) -> Option<(ResponseAction, bool)> {
        match event.event_type() {
            EventType::CorrelationAlert => Some(self.respond_to_alert(event)),
            EventType::DataLoss if event.is_data_loss_block() => {
                Some((ResponseAction::Notify, true))
            }
            EventType::Threat
                if event.source() == analytics::SOURCE && event.severity() >= Severity::High =>
            {
                Some((ResponseAction::Notify, true))
            }
            _ => None,
        }
    }

    fn respond_to_alert(&self, alert: &SecurityEvent) -> (ResponseAction, bool) {
        let origin = match alert.origin() {
            Some(origin) if self.auto_block_enabled && alert.severity() >= Severity::High => origin,
            _ => return (ResponseAction::Notify, true),
        };

        if self.blocklist.is_blocked(origin) {
            log::info!("[RESPONSE] {} already blocked, skipping duplicate", origin);
            return (ResponseAction::AlreadyBlocked, true);
        }

        let success = self.blocklist.block_origin(origin, alert.message());
        if success {
            log::warn!("[RESPONSE] Blocked {}: {}", origin, alert.message());
        } else {
            log::error!("[RESPONSE] Failed to block {}: {}", origin, alert.message());
        }
        (ResponseAction::Block, success)
    }

    fn record(
        &self,
        trigger: &SecurityEvent,
        action: ResponseAction,
        success: bool,
    ) -> SecurityEvent {
        let target = trigger.origin().unwrap_or("-");
        let (severity, message) = match action {
            ResponseAction::Block if success => (
                Severity::High,
                format!("Blocked origin {}", target),
            ),
            ResponseAction::Block => (
                Severity::High,
                format!("Block of origin {} failed, manual review required", target),
            ),
            ResponseAction::AlreadyBlocked => (
                Severity::Info,
                format!("Origin {} already blocked", target),
            ),
            ResponseAction::Notify => (
                Severity::Warning,
                format!("Notify: {} from {}", trigger.event_type(), trigger.source()),
            ),
        };

        let mut builder =
            SecurityEvent::builder(EventType::IncidentResponse, severity, SOURCE, message)
                .subject(
                    trigger.user_id().map(str::to_string),
                    trigger.origin().map(str::to_string),
                    trigger.endpoint().map(str::to_string),
                )
                .tags(["incident-response", action.as_str()])
                .details(EventDetails::Response {
                    action,
                    success,
                    trigger: trigger.event_type(),
                });
        if let Some(rule) = trigger_rule(trigger) {
            builder = builder.metadata("rule", rule);
        }
        builder.build()
    }

    fn audit(&self, trigger: &SecurityEvent, action: ResponseAction, success: bool) {
        let mut metadata = Metadata::new();
        if let Some(origin) = trigger.origin() {
            metadata.insert("origin".to_string(), Value::from(origin));
        }
        if let Some(rule) = trigger_rule(trigger) {
            metadata.insert("rule".to_string(), Value::from(rule));
        }
        metadata.insert("success".to_string(), Value::from(success));
        metadata.insert("trigger".to_string(), Value::from(trigger.event_type().as_str()));

        let severity = match action {
            ResponseAction::Block => Some("high"),
            ResponseAction::AlreadyBlocked | ResponseAction::Notify => None,
        };

        if let Err(e) = self.audit.log_event(
            AUDIT_CATEGORY,
            trigger.user_id(),
            action.as_str(),
            severity,
            &metadata,
        ) {
            log::error!("[RESPONSE] Failed to write audit record: {}", e);
        }
    }
}

/// Name of the correlation rule behind a trigger, if any.
fn trigger_rule(trigger: &SecurityEvent) -> Option<String> {
    match trigger.details() {
        EventDetails::Correlation { rule, .. } => Some(rule.clone()),
        EventDetails::Anomaly { anomaly, .. } => Some(anomaly.tag().to_string()),
        _ => None,
    }
}

impl EventListener for IncidentResponder {
    fn name(&self) -> &str {
        SOURCE
    }

    fn on_event(&self, event: &SecurityEvent) -> TelemetryResult<Vec<SecurityEvent>> {
        if event.source() == SOURCE {
            return Ok(Vec::new());
        }

        let Some((action, success)) = self.decide(event) else {
            return Ok(Vec::new());
        };

        let response = self.record(event, action, success);
        self.audit(event, action, success);
        Ok(vec![response])
    }
}
