//! Spool file ingestion for out-of-process producers.
//!
//! Producers that cannot link the pipeline (cron jobs, database triggers,
//! a reverse proxy) append one JSON event description per line to a spool
//! file. [`SpoolReader`] tails that file by byte offset, turns each complete
//! line into a [`SecurityEvent`] and hands it to the pipeline.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::event::{EventDetails, EventType, SecurityEvent, Severity};
use crate::pipeline::TelemetryPipeline;

/// One line of the spool file. Only `event_type`, `source` and `message`
/// are required.
#[derive(Debug, Clone, Deserialize)]
pub struct EventDescription {
    pub event_type: EventType,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    pub source: String,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub details: EventDetails,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

fn default_severity() -> Severity {
    Severity::Info
}

impl EventDescription {
    pub fn into_event(self) -> SecurityEvent {
        let mut builder =
            SecurityEvent::builder(self.event_type, self.severity, self.source, self.message)
                .subject(self.user_id, self.origin, self.endpoint)
                .tags(self.tags)
                .details(self.details)
                .metadata_map(self.metadata);
        if let Some(ts) = self.timestamp {
            builder = builder.timestamp(ts);
        }
        builder.build()
    }
}

/// Tails a spool file by byte offset. A file that shrinks is treated as
/// rotated and re-read from the start.
pub struct SpoolReader {
    path: PathBuf,
    offset: u64,
}

impl SpoolReader {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            offset: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Skip everything already in the file. Call once at startup to only
    /// ingest lines written from now on.
    pub fn seek_to_end(&mut self) {
        self.offset = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
    }

    /// Complete lines appended since the last read.
    ///
    /// A trailing line without a newline is left for the next poll, so a
    /// producer caught mid-write is never read half way.
    fn read_new_lines(&mut self) -> Vec<String> {
        let file_size = match std::fs::metadata(&self.path) {
            Ok(m) => m.len(),
            Err(e) => {
                log::debug!("[SPOOL] Cannot stat {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        if file_size < self.offset {
            log::info!(
                "[SPOOL] Rotation detected for {} (size {} < offset {}), resetting",
                self.path.display(),
                file_size,
                self.offset
            );
            self.offset = 0;
        }
        if file_size == self.offset {
            return Vec::new();
        }

        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("[SPOOL] Cannot open {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        let mut reader = BufReader::new(file);
        if let Err(e) = reader.seek(SeekFrom::Start(self.offset)) {
            log::warn!("[SPOOL] Cannot seek in {}: {}", self.path.display(), e);
            return Vec::new();
        }

        let mut lines = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(bytes_read) => {
                    if buf.last() != Some(&b'\n') {
                        break;
                    }
                    self.offset += bytes_read as u64;
                    let line = match std::str::from_utf8(&buf) {
                        Ok(line) => line,
                        Err(e) => {
                            log::warn!(
                                "[SPOOL] Skipping undecodable line in {}: {}",
                                self.path.display(),
                                e
                            );
                            continue;
                        }
                    };
                    let trimmed = line.trim_end_matches(['\n', '\r']);
                    if !trimmed.trim().is_empty() {
                        lines.push(trimmed.to_string());
                    }
                }
                Err(e) => {
                    log::warn!("[SPOOL] Read error in {}: {}", self.path.display(), e);
                    break;
                }
            }
        }
        lines
    }

    /// Decode every new complete line. Malformed lines are logged and skipped.
    pub fn poll_new_events(&mut self) -> Vec<SecurityEvent> {
        self.read_new_lines()
            .into_iter()
            .filter_map(|line| match serde_json::from_str::<EventDescription>(&line) {
                Ok(description) => Some(description.into_event()),
                Err(e) => {
                    log::warn!("[SPOOL] Skipping malformed spool line: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Poll once and emit everything found. Returns the number of events.
    pub fn drain_into(&mut self, pipeline: &TelemetryPipeline) -> usize {
        let events = self.poll_new_events();
        let count = events.len();
        for event in events {
            pipeline.emit(event);
        }
        if count > 0 {
            log::debug!("[SPOOL] Ingested {} events from {}", count, self.path.display());
        }
        count
    }
}
