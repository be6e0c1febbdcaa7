//! Built-in correlation rules.
//!
//! Each rule groups the window by network origin (or user and origin),
//! counts matching events, and emits one alert per group at or above its
//! threshold. Groups are visited in sorted order so output is deterministic.

use std::collections::BTreeMap;

use super::{CorrelationRule, CorrelationWindow, SOURCE};
use crate::event::{EventDetails, EventType, SecurityEvent, Severity};
use crate::{CorrelationConfig, TelemetryResult};

/// The rule set every engine built from configuration runs.
pub fn default_rules(config: &CorrelationConfig) -> Vec<Box<dyn CorrelationRule>> {
    vec![
        Box::new(BruteForceRule {
            threshold: config.bruteforce_threshold,
        }),
        Box::new(FirewallBlockRule {
            threshold: config.firewall_block_threshold,
        }),
        Box::new(DataLossRule {
            threshold: config.data_loss_block_threshold,
        }),
    ]
}

/// Count matching events per origin. Events without an origin never count.
fn count_by_origin<F>(window: &CorrelationWindow<'_>, matches: F) -> BTreeMap<String, usize>
where
    F: Fn(&SecurityEvent) -> bool,
{
    let mut counts = BTreeMap::new();
    for &event in window.events() {
        if !matches(event) {
            continue;
        }
        if let Some(origin) = event.origin() {
            *counts.entry(origin.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

struct AlertSpec<'a> {
    rule: &'a str,
    severity: Severity,
    tag: &'a str,
    message: String,
    user_id: Option<String>,
    origin: String,
    count: usize,
}

fn build_alert(spec: AlertSpec<'_>, window: &CorrelationWindow<'_>) -> SecurityEvent {
    SecurityEvent::builder(EventType::CorrelationAlert, spec.severity, SOURCE, spec.message)
        .timestamp(window.now())
        .subject(spec.user_id, Some(spec.origin), None)
        .tags(["correlation", spec.tag])
        .details(EventDetails::Correlation {
            rule: spec.rule.to_string(),
            count: spec.count,
            window_secs: window.window_secs(),
        })
        .build()
}

/// Failed logins from one origin.
pub struct BruteForceRule {
    pub threshold: usize,
}

impl CorrelationRule for BruteForceRule {
    fn name(&self) -> &str {
        "bruteforce"
    }

    fn evaluate(&self, window: &CorrelationWindow<'_>) -> TelemetryResult<Vec<SecurityEvent>> {
        let counts = count_by_origin(window, SecurityEvent::is_failed_auth);

        Ok(counts
            .into_iter()
            .filter(|(_, count)| *count >= self.threshold)
            .map(|(origin, count)| {
                build_alert(
                    AlertSpec {
                        rule: self.name(),
                        severity: Severity::High,
                        tag: "bruteforce",
                        message: format!(
                            "Possible brute force: {} failed logins from {} in {}s",
                            count,
                            origin,
                            window.window_secs()
                        ),
                        user_id: None,
                        origin,
                        count,
                    },
                    window,
                )
            })
            .collect())
    }
}

/// Web firewall rejections from one origin.
pub struct FirewallBlockRule {
    pub threshold: usize,
}

impl CorrelationRule for FirewallBlockRule {
    fn name(&self) -> &str {
        "repeated_firewall_blocks"
    }

    fn evaluate(&self, window: &CorrelationWindow<'_>) -> TelemetryResult<Vec<SecurityEvent>> {
        let counts = count_by_origin(window, |e| e.event_type() == EventType::FirewallBlock);

        Ok(counts
            .into_iter()
            .filter(|(_, count)| *count >= self.threshold)
            .map(|(origin, count)| {
                build_alert(
                    AlertSpec {
                        rule: self.name(),
                        severity: Severity::High,
                        tag: "web-attack",
                        message: format!(
                            "Repeated firewall blocks: {} requests from {} rejected in {}s",
                            count,
                            origin,
                            window.window_secs()
                        ),
                        user_id: None,
                        origin,
                        count,
                    },
                    window,
                )
            })
            .collect())
    }
}

/// Blocked data-loss transfers by one user from one origin.
pub struct DataLossRule {
    pub threshold: usize,
}

impl CorrelationRule for DataLossRule {
    fn name(&self) -> &str {
        "repeated_data_loss_blocks"
    }

    fn evaluate(&self, window: &CorrelationWindow<'_>) -> TelemetryResult<Vec<SecurityEvent>> {
        let mut counts: BTreeMap<(Option<String>, String), usize> = BTreeMap::new();
        for &event in window.events() {
            if !event.is_data_loss_block() {
                continue;
            }
            if let Some(origin) = event.origin() {
                let key = (event.user_id().map(str::to_string), origin.to_string());
                *counts.entry(key).or_insert(0) += 1;
            }
        }

        Ok(counts
            .into_iter()
            .filter(|(_, count)| *count >= self.threshold)
            .map(|((user_id, origin), count)| {
                let who = user_id.as_deref().unwrap_or("unknown user");
                build_alert(
                    AlertSpec {
                        rule: self.name(),
                        severity: Severity::Critical,
                        tag: "exfiltration",
                        message: format!(
                            "Possible exfiltration: {} blocked transfers by {} from {} in {}s",
                            count,
                            who,
                            origin,
                            window.window_secs()
                        ),
                        user_id,
                        origin,
                        count,
                    },
                    window,
                )
            })
            .collect())
    }
}
