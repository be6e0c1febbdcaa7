//! # SENTINEL Telemetry - Integration Tests
//!
//! End-to-end tests that drive the fully wired pipeline the way the host
//! does: producer -> emit -> store -> correlation -> analytics -> incident
//! response -> audit.
//!
//! Each test gets its own directory under the system temp dir, a scripted
//! blocklist and a recording audit sink, so assertions can be made on what
//! was stored, what was dispatched and what containment was attempted.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

use sentinel_telemetry::event::{
    DataLossAction, EventDetails, Metadata, ResponseAction, REDACTION_MARKER,
};
use sentinel_telemetry::response::audit::AuditLog;
use sentinel_telemetry::response::blocker::{Blocklist, MemoryBlocklist};
use sentinel_telemetry::spool::SpoolReader;
use sentinel_telemetry::{
    build_pipeline_with, EventListener, EventType, SecurityEvent, Severity, TelemetryConfig,
    TelemetryError, TelemetryPipeline, TelemetryResult,
};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a temporary directory for test files. The caller cleans up.
fn create_test_dir(test_name: &str) -> PathBuf {
    let dir = std::env::temp_dir()
        .join("sentinel-telemetry-test")
        .join(test_name);
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("create test dir");
    dir
}

fn cleanup_test_dir(dir: &Path) {
    let _ = fs::remove_dir_all(dir);
}

fn test_config(dir: &Path, auto_block: bool) -> TelemetryConfig {
    let mut config = TelemetryConfig::default();
    config.store.directory = dir.join("telemetry");
    config.response.auto_block_enabled = auto_block;
    config.response.audit_log_path = Some(dir.join("audit.jsonl"));
    config.ingest.spool_path = dir.join("spool.jsonl");
    config
}

/// Every record in the store, across all partitions.
fn stored(pipeline: &TelemetryPipeline) -> Vec<SecurityEvent> {
    let store = pipeline.store();
    store.iterate(&store.days(), usize::MAX).collect()
}

fn of_type(events: &[SecurityEvent], event_type: EventType) -> Vec<SecurityEvent> {
    events
        .iter()
        .filter(|e| e.event_type() == event_type)
        .cloned()
        .collect()
}

/// Blocklist fake that records calls and answers with a scripted result.
struct ScriptedBlocklist {
    succeed: bool,
    calls: Mutex<Vec<String>>,
    blocked: Mutex<Vec<String>>,
}

impl ScriptedBlocklist {
    fn new(succeed: bool) -> Self {
        Self {
            succeed,
            calls: Mutex::new(Vec::new()),
            blocked: Mutex::new(Vec::new()),
        }
    }
}

impl Blocklist for ScriptedBlocklist {
    fn block_origin(&self, origin: &str, _reason: &str) -> bool {
        self.calls.lock().push(origin.to_string());
        if self.succeed {
            self.blocked.lock().push(origin.to_string());
        }
        self.succeed
    }

    fn is_blocked(&self, origin: &str) -> bool {
        self.blocked.lock().iter().any(|o| o == origin)
    }
}

#[derive(Default)]
struct RecordingAudit {
    records: Mutex<Vec<(String, Option<String>, String, Option<String>, Metadata)>>,
}

impl AuditLog for RecordingAudit {
    fn log_event(
        &self,
        category: &str,
        user_id: Option<&str>,
        action: &str,
        severity: Option<&str>,
        metadata: &Metadata,
    ) -> TelemetryResult<()> {
        self.records.lock().push((
            category.to_string(),
            user_id.map(str::to_string),
            action.to_string(),
            severity.map(str::to_string),
            metadata.clone(),
        ));
        Ok(())
    }
}

/// Listener that keeps a copy of everything dispatched to it.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<SecurityEvent>>,
}

impl Recorder {
    fn of_type(&self, event_type: EventType) -> Vec<SecurityEvent> {
        of_type(&self.seen.lock(), event_type)
    }
}

impl EventListener for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn on_event(&self, event: &SecurityEvent) -> TelemetryResult<Vec<SecurityEvent>> {
        self.seen.lock().push(event.clone());
        Ok(Vec::new())
    }
}

struct Broken;

impl EventListener for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn on_event(&self, _event: &SecurityEvent) -> TelemetryResult<Vec<SecurityEvent>> {
        Err(TelemetryError::Listener {
            listener: "broken".to_string(),
            reason: "downstream unavailable".to_string(),
        })
    }
}

struct Harness {
    pipeline: Arc<TelemetryPipeline>,
    blocklist: Arc<ScriptedBlocklist>,
    audit: Arc<RecordingAudit>,
    recorder: Arc<Recorder>,
}

fn harness(config: &TelemetryConfig, block_succeeds: bool) -> Harness {
    let blocklist = Arc::new(ScriptedBlocklist::new(block_succeeds));
    let audit = Arc::new(RecordingAudit::default());
    let pipeline = build_pipeline_with(config, blocklist.clone(), audit.clone());
    let recorder = Arc::new(Recorder::default());
    pipeline.register_listener(recorder.clone());
    Harness {
        pipeline,
        blocklist,
        audit,
        recorder,
    }
}

fn failed_auth(origin: &str, secs_ago: i64) -> SecurityEvent {
    SecurityEvent::builder(EventType::Auth, Severity::Warning, "auth", "Login failed")
        .origin(origin)
        .timestamp(Utc::now() - Duration::seconds(secs_ago))
        .details(EventDetails::Auth { success: false })
        .build()
}

fn request(user: &str, origin: &str) -> SecurityEvent {
    SecurityEvent::builder(EventType::Request, Severity::Info, "http", "GET /patients")
        .user_id(user)
        .origin(origin)
        .build()
}

fn response_of(event: &SecurityEvent) -> (ResponseAction, bool, EventType) {
    match event.details() {
        EventDetails::Response {
            action,
            success,
            trigger,
        } => (*action, *success, *trigger),
        other => panic!("expected response details, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Five failed logins from one origin produce exactly one brute-force alert,
/// stored and dispatched, on the fifth emit.
#[test]
fn test_bruteforce_alert_after_fifth_failure() {
    let dir = create_test_dir("bruteforce");
    let h = harness(&test_config(&dir, false), true);

    for i in 0..4 {
        h.pipeline.emit(failed_auth("10.0.0.5", 4 - i));
        assert!(
            h.recorder.of_type(EventType::CorrelationAlert).is_empty(),
            "no alert expected after failure {}",
            i + 1
        );
    }
    h.pipeline.emit(failed_auth("10.0.0.5", 0));

    let dispatched = h.recorder.of_type(EventType::CorrelationAlert);
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].severity(), Severity::High);
    assert_eq!(dispatched[0].origin(), Some("10.0.0.5"));
    assert!(dispatched[0].has_tag("bruteforce"));

    let stored_alerts = of_type(&stored(&h.pipeline), EventType::CorrelationAlert);
    assert_eq!(stored_alerts, dispatched);

    // Auto-block is off: the alert is answered with a notify trail only.
    assert!(h.blocklist.calls.lock().is_empty());
    let responses = h.recorder.of_type(EventType::IncidentResponse);
    assert_eq!(responses.len(), 1);
    assert_eq!(
        response_of(&responses[0]),
        (ResponseAction::Notify, true, EventType::CorrelationAlert)
    );

    cleanup_test_dir(&dir);
}

/// A fourth request from a new origin, after a three-event baseline, is
/// reported exactly once.
#[test]
fn test_new_origin_anomaly_after_baseline() {
    let dir = create_test_dir("new_origin");
    let h = harness(&test_config(&dir, false), true);

    for _ in 0..3 {
        h.pipeline.emit(request("42", "A"));
    }
    assert!(h.recorder.of_type(EventType::Threat).is_empty());

    h.pipeline.emit(request("42", "B"));

    let threats = h.recorder.of_type(EventType::Threat);
    assert_eq!(threats.len(), 1);
    assert_eq!(threats[0].severity(), Severity::Warning);
    assert_eq!(threats[0].source(), "uba");
    assert_eq!(threats[0].origin(), Some("B"));
    assert!(threats[0].has_tag("new-origin"));
    assert_eq!(of_type(&stored(&h.pipeline), EventType::Threat).len(), 1);

    // WARNING anomalies do not reach incident response.
    assert!(h.recorder.of_type(EventType::IncidentResponse).is_empty());

    cleanup_test_dir(&dir);
}

/// A disabled pipeline stores nothing and invokes no listener.
#[test]
fn test_disabled_pipeline_stores_nothing() {
    let dir = create_test_dir("disabled");
    let mut config = test_config(&dir, true);
    config.pipeline.enabled = false;
    let h = harness(&config, true);

    for i in 0..6 {
        h.pipeline.emit(failed_auth("10.0.0.5", i));
    }
    h.pipeline.emit_simple(
        EventType::Audit,
        Severity::Info,
        "billing",
        "Invoice exported",
        Some("42"),
        None,
        None,
        None,
        &[],
    );

    assert!(!config.store.directory.exists());
    assert!(h.pipeline.store().days().is_empty());
    assert!(h.recorder.seen.lock().is_empty());
    assert!(h.blocklist.calls.lock().is_empty());
    assert!(h.audit.records.lock().is_empty());

    cleanup_test_dir(&dir);
}

/// A HIGH correlation alert with auto-block enabled blocks its origin and
/// records exactly one response.
#[test]
fn test_high_alert_blocks_origin() {
    let dir = create_test_dir("auto_block");
    let h = harness(&test_config(&dir, true), true);

    let alert = SecurityEvent::builder(
        EventType::CorrelationAlert,
        Severity::High,
        "waf",
        "Repeated SQL injection attempts",
    )
    .origin("203.0.113.9")
    .build();
    h.pipeline.emit(alert);

    assert_eq!(*h.blocklist.calls.lock(), vec!["203.0.113.9".to_string()]);

    let responses = of_type(&stored(&h.pipeline), EventType::IncidentResponse);
    assert_eq!(responses.len(), 1);
    assert_eq!(
        response_of(&responses[0]),
        (ResponseAction::Block, true, EventType::CorrelationAlert)
    );
    assert_eq!(responses[0].source(), "incident_response");

    let records = h.audit.records.lock();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, "incident_response");
    assert_eq!(records[0].2, "block");
    assert_eq!(records[0].3.as_deref(), Some("high"));
    assert_eq!(records[0].4["origin"], json!("203.0.113.9"));
    assert_eq!(records[0].4["success"], json!(true));

    cleanup_test_dir(&dir);
}

#[test]
fn test_failed_block_still_leaves_trail() {
    let dir = create_test_dir("failed_block");
    let h = harness(&test_config(&dir, true), false);

    for i in 0..5 {
        h.pipeline.emit(failed_auth("203.0.113.9", 4 - i));
    }

    let responses = h.recorder.of_type(EventType::IncidentResponse);
    assert_eq!(responses.len(), 1);
    assert_eq!(
        response_of(&responses[0]),
        (ResponseAction::Block, false, EventType::CorrelationAlert)
    );
    assert_eq!(h.audit.records.lock()[0].4["success"], json!(false));

    cleanup_test_dir(&dir);
}

/// Sustained attack: the rule re-fires, the second response sees the
/// origin already blocked and does not block again.
#[test]
fn test_sustained_bruteforce_blocks_once() {
    let dir = create_test_dir("sustained");
    let config = test_config(&dir, true);
    let blocklist = Arc::new(MemoryBlocklist::new(Some(3600)));
    let audit = Arc::new(RecordingAudit::default());
    let pipeline = build_pipeline_with(&config, blocklist.clone(), audit.clone());

    for i in 0..6 {
        pipeline.emit(failed_auth("10.0.0.5", 5 - i));
    }

    assert!(blocklist.is_blocked("10.0.0.5"));
    let responses = of_type(&stored(&pipeline), EventType::IncidentResponse);
    let actions: Vec<ResponseAction> = responses.iter().map(|r| response_of(r).0).collect();
    assert_eq!(
        actions,
        vec![ResponseAction::Block, ResponseAction::AlreadyBlocked]
    );

    cleanup_test_dir(&dir);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// Secret-like keys are redacted in both the stored and dispatched forms,
/// whatever the value type.
#[test]
fn test_metadata_redacted_before_store_and_dispatch() {
    let dir = create_test_dir("redaction");
    let h = harness(&test_config(&dir, false), true);

    let mut metadata = serde_json::Map::new();
    metadata.insert("password".to_string(), json!("hunter2"));
    metadata.insert("SessionCookie".to_string(), json!(918273645));
    metadata.insert("form".to_string(), json!({"ssn": "123-45-6789"}));
    metadata.insert("path".to_string(), json!("/login"));
    h.pipeline.emit_simple(
        EventType::Auth,
        Severity::Warning,
        "auth",
        "Login failed",
        Some("42"),
        Some("10.0.0.5"),
        Some("/login"),
        Some(metadata),
        &["login"],
    );

    let dispatched = h.recorder.seen.lock()[0].clone();
    let persisted = stored(&h.pipeline).remove(0);
    for event in [&dispatched, &persisted] {
        assert_eq!(event.metadata()["password"], json!(REDACTION_MARKER));
        assert_eq!(event.metadata()["SessionCookie"], json!(REDACTION_MARKER));
        assert_eq!(event.metadata()["form"], json!(REDACTION_MARKER));
        assert_eq!(event.metadata_str("path"), Some("/login"));
    }

    let day = persisted.timestamp().date_naive();
    let raw = fs::read_to_string(h.pipeline.store().partition_path(day)).unwrap();
    assert!(!raw.contains("hunter2"));
    assert!(!raw.contains("918273645"));
    assert!(!raw.contains("123-45-6789"));

    cleanup_test_dir(&dir);
}

/// Five failures spread wider than the window never alert.
#[test]
fn test_failures_outside_window_do_not_alert() {
    let dir = create_test_dir("window");
    let config = test_config(&dir, true);
    let h = harness(&config, true);
    let engine = h.pipeline.engine();

    let start = Utc::now();
    for i in 0..5 {
        let alerts = engine.ingest_at(
            &failed_auth("10.0.0.5", 0),
            start + Duration::seconds(i * 100),
        );
        assert!(alerts.is_empty());
    }

    cleanup_test_dir(&dir);
}

/// Events from incident response itself never trigger incident response.
#[test]
fn test_incident_response_ignores_own_events() {
    let dir = create_test_dir("loop_prevention");
    let h = harness(&test_config(&dir, true), true);

    let own = SecurityEvent::builder(
        EventType::CorrelationAlert,
        Severity::Critical,
        "incident_response",
        "Looks like an alert",
    )
    .origin("203.0.113.9")
    .build();
    h.pipeline.emit(own);

    assert!(h.blocklist.calls.lock().is_empty());
    assert!(h.audit.records.lock().is_empty());
    assert!(h.recorder.of_type(EventType::IncidentResponse).is_empty());
    assert_eq!(stored(&h.pipeline).len(), 1);

    cleanup_test_dir(&dir);
}

/// The store holds exactly the emitted events plus everything derived from
/// them, and earlier bytes are never rewritten.
#[test]
fn test_store_is_append_only() {
    let dir = create_test_dir("append_only");
    let h = harness(&test_config(&dir, false), true);

    for i in 0..3 {
        h.pipeline.emit(failed_auth("10.0.0.5", 10 - i));
    }
    let partitions_before: Vec<(PathBuf, String)> = h
        .pipeline
        .store()
        .days()
        .into_iter()
        .map(|d| {
            let path = h.pipeline.store().partition_path(d);
            let content = fs::read_to_string(&path).unwrap();
            (path, content)
        })
        .collect();

    for i in 3..7 {
        h.pipeline.emit(failed_auth("10.0.0.5", 10 - i));
    }
    h.pipeline.emit(request("42", "10.0.0.5"));

    for (path, before) in &partitions_before {
        let after = fs::read_to_string(path).unwrap();
        assert!(after.starts_with(before.as_str()));
    }

    let stats = h.pipeline.stats();
    assert_eq!(stats.events_emitted, 8);
    assert_eq!(stats.store_failures, 0);
    assert_eq!(
        stats.events_stored,
        stats.events_emitted + stats.alerts_generated + stats.follow_ups
    );
    assert_eq!(stored(&h.pipeline).len() as u64, stats.events_stored);
    // Failures five through seven cross the threshold, and the request
    // re-evaluates with all seven still in the window.
    assert_eq!(stats.alerts_generated, 4);

    cleanup_test_dir(&dir);
}

// ---------------------------------------------------------------------------
// Failure isolation and feedback
// ---------------------------------------------------------------------------

#[test]
fn test_broken_listener_does_not_affect_others() {
    let dir = create_test_dir("broken_listener");
    let config = test_config(&dir, false);
    let pipeline = build_pipeline_with(
        &config,
        Arc::new(ScriptedBlocklist::new(true)),
        Arc::new(RecordingAudit::default()),
    );
    let recorder = Arc::new(Recorder::default());
    pipeline.register_listener(Arc::new(Broken));
    pipeline.register_listener(recorder.clone());

    pipeline.emit(request("42", "A"));

    assert_eq!(recorder.seen.lock().len(), 1);
    assert_eq!(pipeline.stats().listener_failures, 1);
    assert_eq!(stored(&pipeline).len(), 1);

    cleanup_test_dir(&dir);
}

#[test]
fn test_store_failure_does_not_stop_dispatch() {
    let dir = create_test_dir("store_failure");
    let mut config = test_config(&dir, false);
    // A regular file where the telemetry directory should be.
    let blocker_file = dir.join("not-a-dir");
    fs::write(&blocker_file, b"x").unwrap();
    config.store.directory = blocker_file;
    let h = harness(&config, true);

    for i in 0..5 {
        h.pipeline.emit(failed_auth("10.0.0.5", 4 - i));
    }

    assert_eq!(h.recorder.of_type(EventType::CorrelationAlert).len(), 1);
    let stats = h.pipeline.stats();
    assert_eq!(stats.events_stored, 0);
    assert!(stats.store_failures >= 6);

    cleanup_test_dir(&dir);
}

/// An auth-failure spike for a known user feeds analytics and correlation
/// at once; every reaction settles without a runaway cascade.
#[test]
fn test_feedback_settles() {
    let dir = create_test_dir("feedback");
    let h = harness(&test_config(&dir, false), true);

    for i in 0..5 {
        let event =
            SecurityEvent::builder(EventType::Auth, Severity::Warning, "auth", "Login failed")
                .user_id("42")
                .origin("10.0.0.5")
                .timestamp(Utc::now() - Duration::seconds(4 - i))
                .details(EventDetails::Auth { success: false })
                .build();
        h.pipeline.emit(event);
    }

    let threats = h.recorder.of_type(EventType::Threat);
    assert_eq!(threats.len(), 1);
    assert!(threats[0].has_tag("auth-failures"));
    assert_eq!(threats[0].severity(), Severity::High);

    let responses = h.recorder.of_type(EventType::IncidentResponse);
    let triggers: Vec<EventType> = responses.iter().map(|r| response_of(r).2).collect();
    assert_eq!(triggers.len(), 2);
    assert!(triggers.contains(&EventType::CorrelationAlert));
    assert!(triggers.contains(&EventType::Threat));

    assert_eq!(h.pipeline.stats().cascades_truncated, 0);

    cleanup_test_dir(&dir);
}

#[test]
fn test_data_loss_blocks_escalate_to_exfiltration_without_blocking() {
    let dir = create_test_dir("exfiltration");
    let h = harness(&test_config(&dir, false), true);

    for _ in 0..2 {
        let blocked =
            SecurityEvent::builder(EventType::DataLoss, Severity::High, "dlp", "Export blocked")
                .user_id("42")
                .origin("203.0.113.9")
                .details(EventDetails::DataLoss {
                    action: DataLossAction::Block,
                })
                .build();
        h.pipeline.emit(blocked);
    }

    let alerts = h.recorder.of_type(EventType::CorrelationAlert);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity(), Severity::Critical);
    assert!(alerts[0].has_tag("exfiltration"));

    // Two notifies for the data-loss events, one for the alert.
    let actions: Vec<ResponseAction> = h
        .recorder
        .of_type(EventType::IncidentResponse)
        .iter()
        .map(|r| response_of(r).0)
        .collect();
    assert_eq!(actions.len(), 3);
    assert!(actions.iter().all(|a| *a == ResponseAction::Notify));
    assert!(h.blocklist.calls.lock().is_empty());

    cleanup_test_dir(&dir);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn test_concurrent_producers() {
    let dir = create_test_dir("concurrent");
    let h = harness(&test_config(&dir, false), true);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let pipeline = Arc::clone(&h.pipeline);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    pipeline.emit(request(&format!("user-{}", t), "198.51.100.20"));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("producer thread");
    }

    let stats = h.pipeline.stats();
    assert_eq!(stats.events_emitted, 400);
    assert_eq!(stats.events_stored, 400);
    assert_eq!(stored(&h.pipeline).len(), 400);
    assert_eq!(h.recorder.seen.lock().len(), 400);

    // Every line in every partition is a whole record.
    for day in h.pipeline.store().days() {
        let raw = fs::read_to_string(h.pipeline.store().partition_path(day)).unwrap();
        for line in raw.lines() {
            let _: Value = serde_json::from_str(line).expect("whole JSON line");
        }
    }

    cleanup_test_dir(&dir);
}

// ---------------------------------------------------------------------------
// Configuration and ingestion
// ---------------------------------------------------------------------------

#[test]
fn test_default_config_file_round_trip() {
    let dir = create_test_dir("config");
    let path = dir.join("sentinel-telemetry.toml");

    TelemetryConfig::write_default(&path).unwrap();
    let config = TelemetryConfig::load_or_disabled(&path);
    assert!(config.pipeline.enabled);
    assert_eq!(config.correlation.window_secs, 300);
    assert!(!config.response.auto_block_enabled);

    cleanup_test_dir(&dir);
}

#[test]
fn test_spool_ingestion_end_to_end() {
    let dir = create_test_dir("spool");
    let config = test_config(&dir, false);
    let h = harness(&config, true);

    let mut lines = String::new();
    for _ in 0..5 {
        lines.push_str(
            "{\"event_type\":\"AUTH\",\"severity\":\"WARNING\",\"source\":\"sshd\",\"message\":\"Failed password\",\"origin\":\"10.0.0.5\",\"metadata\":{\"success\":false}}\n",
        );
    }
    lines.push_str("not json\n");
    fs::write(&config.ingest.spool_path, lines).unwrap();

    let mut spool = SpoolReader::new(&config.ingest.spool_path);
    assert_eq!(spool.drain_into(&h.pipeline), 5);
    assert_eq!(spool.drain_into(&h.pipeline), 0);

    let alerts = of_type(&stored(&h.pipeline), EventType::CorrelationAlert);
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].has_tag("bruteforce"));

    cleanup_test_dir(&dir);
}
