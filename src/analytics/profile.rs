//! Per-subject behavior profile and its bounded containers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

/// Most distinct origins remembered per subject.
pub const MAX_KNOWN_ORIGINS: usize = 256;

/// Most distinct endpoints remembered per subject.
pub const MAX_KNOWN_ENDPOINTS: usize = 512;

/// Most timestamps kept in one rate window.
pub const MAX_WINDOW_ENTRIES: usize = 4096;

/// Insertion-ordered set that forgets its oldest member when full.
#[derive(Debug, Clone)]
pub struct BoundedSet {
    members: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl BoundedSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            members: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, value: &str) -> bool {
        self.members.contains(value)
    }

    /// Insert a value. Returns true if it was not already present.
    pub fn insert(&mut self, value: &str) -> bool {
        if self.members.contains(value) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.members.insert(value.to_string());
        self.order.push_back(value.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Members, oldest first.
    pub fn to_vec(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }
}

/// Timestamps within a trailing time window.
#[derive(Debug, Clone, Default)]
pub struct RateWindow {
    stamps: VecDeque<DateTime<Utc>>,
}

impl RateWindow {
    /// Record `at`, drop everything older than `window_secs` before it, and
    /// return how many entries remain.
    pub fn record(&mut self, at: DateTime<Utc>, window_secs: u64) -> usize {
        self.stamps.push_back(at);
        while self.stamps.len() > MAX_WINDOW_ENTRIES {
            self.stamps.pop_front();
        }
        self.evict(at, window_secs);
        self.stamps.len()
    }

    fn evict(&mut self, now: DateTime<Utc>, window_secs: u64) {
        let cutoff = now
            .checked_sub_signed(crate::seconds(window_secs))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.stamps.retain(|stamp| *stamp >= cutoff);
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}

/// Learned baseline for one user id.
#[derive(Debug, Clone)]
pub struct SubjectBehaviorProfile {
    pub events_seen: u64,
    pub known_origins: BoundedSet,
    pub known_endpoints: BoundedSet,
    pub requests: RateWindow,
    pub auth_failures: RateWindow,
}

impl Default for SubjectBehaviorProfile {
    fn default() -> Self {
        Self {
            events_seen: 0,
            known_origins: BoundedSet::new(MAX_KNOWN_ORIGINS),
            known_endpoints: BoundedSet::new(MAX_KNOWN_ENDPOINTS),
            requests: RateWindow::default(),
            auth_failures: RateWindow::default(),
        }
    }
}

impl SubjectBehaviorProfile {
    pub fn baseline_established(&self, min_baseline_events: u64) -> bool {
        self.events_seen >= min_baseline_events
    }
}

/// Read-only copy of a profile for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSnapshot {
    pub user_id: String,
    pub events_seen: u64,
    pub baseline_established: bool,
    pub known_origins: Vec<String>,
    pub known_endpoints: Vec<String>,
    pub requests_in_window: usize,
    pub auth_failures_in_window: usize,
}
