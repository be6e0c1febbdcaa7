//! # Event Model
//!
//! `SecurityEvent` is the one record shape that flows through the whole
//! pipeline: producers build it, the store persists it, the correlation
//! engine counts it, listeners react to it.
//!
//! Events are immutable once built. Fields are private and only reachable
//! through accessors; alerts and responses are new events, never edits.
//! Construction goes through [`EventBuilder`], which applies metadata
//! redaction and the message/tag caps exactly once, so the persisted and
//! dispatched forms of an event are always identical.

pub mod redact;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub use redact::{Metadata, REDACTION_MARKER};

/// Maximum length of `message`, in characters.
pub const MAX_MESSAGE_LEN: usize = 512;

/// Maximum length of a single tag, in characters.
pub const MAX_TAG_LEN: usize = 64;

/// Maximum number of tags carried by one event.
pub const MAX_TAGS: usize = 32;

/// Closed set of event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// An inbound request reached the application.
    Request,

    /// An authentication attempt, successful or not.
    Auth,

    /// The web firewall rejected a request.
    FirewallBlock,

    /// A detected threat, including behavioral anomalies.
    Threat,

    /// A data-loss-prevention hook fired.
    DataLoss,

    /// Notable database activity (bulk reads, schema changes).
    DbActivity,

    /// A compliance control was checked or violated.
    Compliance,

    /// Generic audit record.
    Audit,

    /// An automated containment or notification decision.
    IncidentResponse,

    /// Derived alert produced by the correlation engine.
    CorrelationAlert,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Request => "REQUEST",
            EventType::Auth => "AUTH",
            EventType::FirewallBlock => "FIREWALL_BLOCK",
            EventType::Threat => "THREAT",
            EventType::DataLoss => "DATA_LOSS",
            EventType::DbActivity => "DB_ACTIVITY",
            EventType::Compliance => "COMPLIANCE",
            EventType::Audit => "AUDIT",
            EventType::IncidentResponse => "INCIDENT_RESPONSE",
            EventType::CorrelationAlert => "CORRELATION_ALERT",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Event severity. Ordered: `Info < Warning < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        })
    }
}

/// What a data-loss hook did with the flagged transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataLossAction {
    Block,
    Warn,
    Allow,
}

/// Kinds of behavioral anomaly reported by the analytics consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    NewOrigin,
    NewEndpoint,
    RequestRateSpike,
    AuthFailureSpike,
}

impl AnomalyKind {
    /// Tag attached to anomaly events of this kind.
    pub fn tag(&self) -> &'static str {
        match self {
            AnomalyKind::NewOrigin => "new-origin",
            AnomalyKind::NewEndpoint => "new-endpoint",
            AnomalyKind::RequestRateSpike => "request-rate",
            AnomalyKind::AuthFailureSpike => "auth-failures",
        }
    }
}

/// What incident response did about a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    /// A block was attempted; `success` says whether it took.
    Block,
    /// The origin was already on the blocklist.
    AlreadyBlocked,
    /// No containment, audit trail only.
    Notify,
}

impl ResponseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseAction::Block => "block",
            ResponseAction::AlreadyBlocked => "already_blocked",
            ResponseAction::Notify => "notify",
        }
    }
}

/// Typed payload for the event kinds the pipeline itself interprets.
///
/// Producers that only have loose key/values can leave this as `None` and
/// use the metadata side channel; the predicates on [`SecurityEvent`]
/// check both.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetails {
    #[default]
    None,
    Auth {
        success: bool,
    },
    DataLoss {
        action: DataLossAction,
    },
    Correlation {
        rule: String,
        count: usize,
        window_secs: u64,
    },
    Anomaly {
        anomaly: AnomalyKind,
        observed: Option<usize>,
    },
    Response {
        action: ResponseAction,
        success: bool,
        trigger: EventType,
    },
}

impl EventDetails {
    pub fn is_none(&self) -> bool {
        matches!(self, EventDetails::None)
    }
}

/// A single security-relevant occurrence. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "EventRecord")]
pub struct SecurityEvent {
    timestamp: DateTime<Utc>,
    event_type: EventType,
    severity: Severity,
    source: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(skip_serializing_if = "EventDetails::is_none")]
    details: EventDetails,
    #[serde(skip_serializing_if = "Metadata::is_empty")]
    metadata: Metadata,
}

/// Wire form of an event. Decoding goes through the builder so a record
/// read back from disk or a spool file obeys the same caps and redaction
/// as one built in process.
#[derive(Deserialize)]
struct EventRecord {
    timestamp: DateTime<Utc>,
    event_type: EventType,
    severity: Severity,
    source: String,
    message: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    details: EventDetails,
    #[serde(default)]
    metadata: serde_json::Map<String, Value>,
}

impl From<EventRecord> for SecurityEvent {
    fn from(record: EventRecord) -> Self {
        let mut builder = SecurityEvent::builder(
            record.event_type,
            record.severity,
            record.source,
            record.message,
        )
        .timestamp(record.timestamp)
        .details(record.details)
        .tags(record.tags)
        .metadata_map(record.metadata);
        builder.user_id = record.user_id;
        builder.origin = record.origin;
        builder.endpoint = record.endpoint;
        builder.build()
    }
}

impl SecurityEvent {
    /// Start building an event. The timestamp defaults to now.
    pub fn builder(
        event_type: EventType,
        severity: Severity,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> EventBuilder {
        EventBuilder {
            timestamp: Utc::now(),
            event_type,
            severity,
            source: source.into(),
            message: message.into(),
            user_id: None,
            origin: None,
            endpoint: None,
            tags: Vec::new(),
            details: EventDetails::None,
            metadata: Vec::new(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Identity of the producer or consumer that created this event.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn details(&self) -> &EventDetails {
        &self.details
    }

    /// Redacted metadata side channel.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// String value of a metadata key, if present and a string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// True for an AUTH event that reports `success=false`.
    pub fn is_failed_auth(&self) -> bool {
        if self.event_type != EventType::Auth {
            return false;
        }
        match self.details {
            EventDetails::Auth { success } => !success,
            _ => metadata_flag(&self.metadata, "success") == Some(false),
        }
    }

    /// True for a DATA_LOSS event whose action was `block`.
    pub fn is_data_loss_block(&self) -> bool {
        if self.event_type != EventType::DataLoss {
            return false;
        }
        match self.details {
            EventDetails::DataLoss { action } => action == DataLossAction::Block,
            _ => self
                .metadata_str("action")
                .map(|a| a.eq_ignore_ascii_case("block"))
                .unwrap_or(false),
        }
    }

    /// One-line JSON encoding used by the store and the audit log.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Read a boolean-ish metadata value (`true`, `"false"`, `0`).
fn metadata_flag(metadata: &Metadata, key: &str) -> Option<bool> {
    match metadata.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}

/// Builder for [`SecurityEvent`]. `build()` applies redaction and caps.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    timestamp: DateTime<Utc>,
    event_type: EventType,
    severity: Severity,
    source: String,
    message: String,
    user_id: Option<String>,
    origin: Option<String>,
    endpoint: Option<String>,
    tags: Vec<String>,
    details: EventDetails,
    metadata: Vec<(String, Value)>,
}

impl EventBuilder {
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the optional subject fields in one call.
    pub fn subject(
        mut self,
        user_id: Option<String>,
        origin: Option<String>,
        endpoint: Option<String>,
    ) -> Self {
        self.user_id = user_id;
        self.origin = origin;
        self.endpoint = endpoint;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn details(mut self, details: EventDetails) -> Self {
        self.details = details;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    pub fn metadata_map<I>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.metadata.extend(entries);
        self
    }

    pub fn build(self) -> SecurityEvent {
        let tags = self
            .tags
            .into_iter()
            .map(|t| truncate_chars(t.trim(), MAX_TAG_LEN))
            .filter(|t| !t.is_empty())
            .take(MAX_TAGS)
            .collect();

        SecurityEvent {
            timestamp: self.timestamp,
            event_type: self.event_type,
            severity: self.severity,
            source: self.source,
            message: truncate_chars(&self.message, MAX_MESSAGE_LEN),
            user_id: non_empty(self.user_id),
            origin: non_empty(self.origin),
            endpoint: non_empty(self.endpoint),
            tags,
            details: self.details,
            metadata: redact::redact_metadata(self.metadata),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Truncate to at most `max` characters without splitting a code point.
fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
