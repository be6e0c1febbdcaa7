//! # Event Store
//!
//! Durable, append-only persistence for every event that passes through
//! the pipeline.
//!
//! One file per UTC calendar day, named `events-YYYY-MM-DD.jsonl`, each line
//! a self-contained JSON object. Files are only ever opened in append mode,
//! so a partition is never rewritten in place; that is what keeps the store
//! tamper-evident by convention and greppable with standard tools (jq,
//! grep, etc.).
//!
//! Writes from concurrent producers serialize through one store-scoped
//! mutex held for the duration of a single line write, so lines never
//! interleave. A write failure is logged and reported as `false`; it is
//! never raised to the producer.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};

use crate::event::SecurityEvent;
use crate::TelemetryResult;

const PARTITION_PREFIX: &str = "events-";
const PARTITION_SUFFIX: &str = ".jsonl";
const PARTITION_DATE_FORMAT: &str = "%Y-%m-%d";

/// Append-only, day-partitioned event store.
#[derive(Debug)]
pub struct EventStore {
    /// Dedicated telemetry directory.
    directory: PathBuf,

    /// Serializes appends from concurrent producers.
    write_lock: Mutex<()>,
}

impl EventStore {
    /// Create a store rooted at `directory`. Nothing touches the disk until
    /// the first append.
    pub fn new(directory: &Path) -> Self {
        Self {
            directory: directory.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the partition file for a UTC day.
    pub fn partition_path(&self, day: NaiveDate) -> PathBuf {
        self.directory.join(format!(
            "{}{}{}",
            PARTITION_PREFIX,
            day.format(PARTITION_DATE_FORMAT),
            PARTITION_SUFFIX
        ))
    }

    /// Append one event to its day partition.
    ///
    /// Returns true if the line was written. Never fails: any I/O or
    /// encoding error is logged and swallowed, because telemetry must not
    /// crash the host.
    pub fn append(&self, event: &SecurityEvent) -> bool {
        match self.try_append(event) {
            Ok(()) => true,
            Err(e) => {
                log::error!(
                    "[STORE] Failed to persist {} event from {}: {}",
                    event.event_type(),
                    event.source(),
                    e
                );
                false
            }
        }
    }

    fn try_append(&self, event: &SecurityEvent) -> TelemetryResult<()> {
        let mut line = event.to_json_line()?;
        line.push('\n');

        let path = self.partition_path(event.timestamp().date_naive());

        let _guard = self.write_lock.lock();

        if !self.directory.exists() {
            std::fs::create_dir_all(&self.directory)?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        // One write_all per record keeps each line whole under O_APPEND.
        file.write_all(line.as_bytes())?;
        file.flush()?;

        Ok(())
    }

    /// Lazily read decoded events from the given day partitions, in the
    /// order given, stopping after `limit` records.
    ///
    /// Missing partitions are skipped. Malformed lines are skipped rather
    /// than aborting the scan. Every call starts a fresh scan.
    pub fn iterate(&self, days: &[NaiveDate], limit: usize) -> StoredEvents {
        StoredEvents {
            pending: days.iter().map(|d| self.partition_path(*d)).collect(),
            current: None,
            remaining: limit,
        }
    }

    /// Dates of every partition present on disk, oldest first.
    pub fn days(&self) -> Vec<NaiveDate> {
        let entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!(
                    "[STORE] Cannot list telemetry directory {}: {}",
                    self.directory.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut days: Vec<NaiveDate> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                parse_partition_name(&name)
            })
            .collect();
        days.sort_unstable();
        days
    }

    /// Number of decodable records in one day partition.
    pub fn count(&self, day: NaiveDate) -> usize {
        self.iterate(&[day], usize::MAX).count()
    }

    /// The newest `limit` records across all partitions, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        let mut collected: VecDeque<SecurityEvent> = VecDeque::new();

        for day in self.days().into_iter().rev() {
            let mut day_events: Vec<SecurityEvent> = self.iterate(&[day], usize::MAX).collect();
            while let Some(event) = day_events.pop() {
                if collected.len() >= limit {
                    break;
                }
                collected.push_front(event);
            }
            if collected.len() >= limit {
                break;
            }
        }

        collected.into_iter().collect()
    }
}

/// Parse `events-YYYY-MM-DD.jsonl` back into its date.
fn parse_partition_name(name: &str) -> Option<NaiveDate> {
    let date = name
        .strip_prefix(PARTITION_PREFIX)?
        .strip_suffix(PARTITION_SUFFIX)?;
    NaiveDate::parse_from_str(date, PARTITION_DATE_FORMAT).ok()
}

/// Lazy scan over stored records. Produced by [`EventStore::iterate`].
pub struct StoredEvents {
    pending: VecDeque<PathBuf>,
    current: Option<(PathBuf, Lines<BufReader<File>>)>,
    remaining: usize,
}

impl StoredEvents {
    /// Open the next partition that exists.
    fn advance_file(&mut self) -> bool {
        while let Some(path) = self.pending.pop_front() {
            match File::open(&path) {
                Ok(file) => {
                    self.current = Some((path, BufReader::new(file).lines()));
                    return true;
                }
                Err(e) => {
                    log::debug!("[STORE] Skipping partition {}: {}", path.display(), e);
                }
            }
        }
        false
    }
}

impl Iterator for StoredEvents {
    type Item = SecurityEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        loop {
            if self.current.is_none() && !self.advance_file() {
                return None;
            }

            let (path, lines) = self.current.as_mut()?;
            match lines.next() {
                Some(Ok(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<SecurityEvent>(trimmed) {
                        Ok(event) => {
                            self.remaining -= 1;
                            return Some(event);
                        }
                        Err(e) => {
                            log::debug!(
                                "[STORE] Skipping malformed record in {}: {}",
                                path.display(),
                                e
                            );
                        }
                    }
                }
                Some(Err(e)) => {
                    log::warn!("[STORE] Read error in {}: {}", path.display(), e);
                    self.current = None;
                }
                None => {
                    self.current = None;
                }
            }
        }
    }
}
