//! # Audit Trail
//!
//! Every incident-response decision is summarized into an audit sink owned
//! by the compliance side of the host. Two sinks ship with the crate:
//!
//! - [`JsonlAuditLog`]: one JSON object per line, appended to a dedicated
//!   file (easy to parse with jq, grep, etc.);
//! - [`LogAuditLog`]: structured `log` records, used when no audit path is
//!   configured.
//!
//! Callers pass metadata that is already redacted; sinks never add fields
//! from the triggering event themselves.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

use crate::event::Metadata;
use crate::TelemetryResult;

/// External audit log interface.
pub trait AuditLog: Send + Sync {
    fn log_event(
        &self,
        category: &str,
        user_id: Option<&str>,
        action: &str,
        severity: Option<&str>,
        metadata: &Metadata,
    ) -> TelemetryResult<()>;
}

/// One line of the JSONL audit file.
#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    timestamp: DateTime<Utc>,
    category: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    action: &'a str,
    severity: Option<&'a str>,
    metadata: &'a Metadata,
}

/// Append-only JSONL audit file.
pub struct JsonlAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl AuditLog for JsonlAuditLog {
    fn log_event(
        &self,
        category: &str,
        user_id: Option<&str>,
        action: &str,
        severity: Option<&str>,
        metadata: &Metadata,
    ) -> TelemetryResult<()> {
        let record = AuditRecord {
            timestamp: Utc::now(),
            category,
            user_id,
            action,
            severity,
            metadata,
        };
        let json_line = serde_json::to_string(&record)?;

        let _guard = self.write_lock.lock();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", json_line)?;
        file.flush()?;

        Ok(())
    }
}

/// Audit sink that writes to the application log.
pub struct LogAuditLog;

impl AuditLog for LogAuditLog {
    fn log_event(
        &self,
        category: &str,
        user_id: Option<&str>,
        action: &str,
        severity: Option<&str>,
        metadata: &Metadata,
    ) -> TelemetryResult<()> {
        log::info!(
            "[AUDIT] {} | {} | user={} | severity={} | {}",
            category,
            action,
            user_id.unwrap_or("-"),
            severity.unwrap_or("-"),
            serde_json::to_string(metadata)?,
        );
        Ok(())
    }
}
