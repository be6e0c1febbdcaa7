//! # Origin Blocklist
//!
//! Containment backends for incident response.
//! DEFENSE ONLY - block and log, never retaliate.
//!
//! - [`MemoryBlocklist`]: in-process set consulted by the host's own request
//!   filter, with optional expiry.
//! - [`FirewallBlocklist`]: system firewall rules (iptables on Linux, netsh
//!   advfirewall on Windows) tagged `SENTINEL-TELEMETRY-BLOCK` so they can
//!   be found and removed without touching existing rules.
//!
//! ## Safety
//! - The firewall backend never blocks private/loopback addresses
//! - Origins are parsed into `std::net::IpAddr` before any command runs
//! - Every block and unblock is logged
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::process::Command;

use crate::{TelemetryError, TelemetryResult};

/// The rule tag/comment used to identify SENTINEL Telemetry firewall rules.
const RULE_TAG: &str = "SENTINEL-TELEMETRY-BLOCK";

/// External blocklist interface. Both calls are best effort and never fail.
pub trait Blocklist: Send + Sync {
    /// Block an origin. Returns true if the block is in place afterwards.
    fn block_origin(&self, origin: &str, reason: &str) -> bool;

    fn is_blocked(&self, origin: &str) -> bool;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct BlockEntry {
    expires_at: Option<DateTime<Utc>>,
    reason: String,
}

impl BlockEntry {
    fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| now < t).unwrap_or(true)
    }
}

/// In-process blocklist keyed by origin string.
pub struct MemoryBlocklist {
    /// None = permanent until manual unblock.
    block_duration_secs: Option<u64>,
    entries: Mutex<HashMap<String, BlockEntry>>,
}

impl MemoryBlocklist {
    pub fn new(block_duration_secs: Option<u64>) -> Self {
        Self {
            block_duration_secs,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Lift a block. Returns true if the origin was blocked.
    pub fn unblock(&self, origin: &str) -> bool {
        let removed = self.entries.lock().remove(origin).is_some();
        if removed {
            log::info!("[UNBLOCK] Removed in-memory block for {}", origin);
        }
        removed
    }

    /// Origins currently blocked, sorted, with their reasons.
    pub fn blocked(&self) -> Vec<(String, String)> {
        let now = Utc::now();
        let mut out: Vec<(String, String)> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.is_active(now))
            .map(|(origin, entry)| (origin.clone(), entry.reason.clone()))
            .collect();
        out.sort();
        out
    }

    /// Drop expired entries.
    pub fn prune_expired(&self) {
        let now = Utc::now();
        self.entries.lock().retain(|_, entry| entry.is_active(now));
    }
}

impl Blocklist for MemoryBlocklist {
    fn block_origin(&self, origin: &str, reason: &str) -> bool {
        let origin = origin.trim();
        if origin.is_empty() {
            return false;
        }

        let expires_at = self
            .block_duration_secs
            .and_then(|secs| Utc::now().checked_add_signed(crate::seconds(secs)));
        self.entries.lock().insert(
            origin.to_string(),
            BlockEntry {
                expires_at,
                reason: reason.to_string(),
            },
        );

        log::info!(
            "[BLOCK] Blocked {} in memory ({}){}",
            origin,
            reason,
            match self.block_duration_secs {
                Some(secs) => format!(" for {}s", secs),
                None => String::new(),
            }
        );
        true
    }

    fn is_blocked(&self, origin: &str) -> bool {
        let now = Utc::now();
        self.entries
            .lock()
            .get(origin.trim())
            .map(|entry| entry.is_active(now))
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// System firewall
// ---------------------------------------------------------------------------

/// Check if an IP address is in a private/reserved range.
///
/// Private addresses are never blocked, to prevent accidental lockout of
/// internal services or the administrator's own connection.
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

/// Canonical IP text. `IpAddr::to_string()` never yields shell metacharacters.
fn safe_ip_string(ip: &IpAddr) -> String {
    ip.to_string()
}

/// Build the firewall rule name for a given IP.
fn rule_name(ip: &IpAddr) -> String {
    format!("{}-{}", RULE_TAG, safe_ip_string(ip))
}

/// Blocklist backed by system firewall rules.
#[derive(Default)]
pub struct FirewallBlocklist {
    /// Addresses this process has blocked.
    blocked: Mutex<HashSet<IpAddr>>,
}

impl FirewallBlocklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and vet an origin before any command runs.
    fn parse_origin(origin: &str) -> TelemetryResult<IpAddr> {
        let ip: IpAddr = origin.trim().parse().map_err(|_| {
            TelemetryError::Response(format!("Origin is not an IP address: {:?}", origin))
        })?;
        if is_private_ip(&ip) {
            return Err(TelemetryError::Response(format!(
                "Refusing to block private/reserved IP: {}",
                ip
            )));
        }
        Ok(ip)
    }

    /// Remove a block this process placed. Returns true on success.
    pub fn unblock(&self, origin: &str) -> bool {
        let Ok(ip) = origin.trim().parse::<IpAddr>() else {
            return false;
        };
        if !self.blocked.lock().contains(&ip) {
            return false;
        }
        match remove_rule(&ip) {
            Ok(()) => {
                self.blocked.lock().remove(&ip);
                true
            }
            Err(e) => {
                log::error!("[UNBLOCK] Failed to unblock {}: {}", ip, e);
                false
            }
        }
    }
}

impl Blocklist for FirewallBlocklist {
    fn block_origin(&self, origin: &str, reason: &str) -> bool {
        let ip = match Self::parse_origin(origin) {
            Ok(ip) => ip,
            Err(e) => {
                log::warn!("[BLOCK] {}", e);
                return false;
            }
        };

        if self.blocked.lock().contains(&ip) {
            return true;
        }

        match add_rule(&ip) {
            Ok(()) => {
                log::info!("[BLOCK] {} blocked by firewall ({})", ip, reason);
                self.blocked.lock().insert(ip);
                true
            }
            Err(e) => {
                log::error!("[BLOCK] Failed to block {}: {}", ip, e);
                false
            }
        }
    }

    fn is_blocked(&self, origin: &str) -> bool {
        origin
            .trim()
            .parse::<IpAddr>()
            .map(|ip| self.blocked.lock().contains(&ip))
            .unwrap_or(false)
    }
}

/// Run a firewall command, turning a spawn failure or non-zero exit into an error.
fn run_firewall(program: &str, args: &[&str], what: &str) -> TelemetryResult<()> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| TelemetryError::Response(format!("Failed to execute {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TelemetryError::Response(format!(
            "{} {} failed: {}",
            program,
            what,
            stderr.trim()
        )));
    }
    Ok(())
}

fn add_rule(ip: &IpAddr) -> TelemetryResult<()> {
    let ip_str = safe_ip_string(ip);

    if cfg!(target_os = "linux") {
        run_firewall(
            "iptables",
            &[
                "-A", "INPUT", "-s", &ip_str, "-j", "DROP", "-m", "comment", "--comment", RULE_TAG,
            ],
            "block",
        )
    } else if cfg!(target_os = "windows") {
        let name = format!("name={}", rule_name(ip));
        let remote = format!("remoteip={}", ip_str);
        run_firewall(
            "netsh",
            &[
                "advfirewall", "firewall", "add", "rule", &name, "dir=in", "action=block", &remote,
            ],
            "block",
        )
    } else {
        Err(TelemetryError::Response(
            "IP blocking not supported on this platform".to_string(),
        ))
    }
}

fn remove_rule(ip: &IpAddr) -> TelemetryResult<()> {
    let ip_str = safe_ip_string(ip);

    if cfg!(target_os = "linux") {
        run_firewall(
            "iptables",
            &[
                "-D", "INPUT", "-s", &ip_str, "-j", "DROP", "-m", "comment", "--comment", RULE_TAG,
            ],
            "unblock",
        )?;
    } else if cfg!(target_os = "windows") {
        let name = format!("name={}", rule_name(ip));
        run_firewall(
            "netsh",
            &["advfirewall", "firewall", "delete", "rule", &name],
            "unblock",
        )?;
    } else {
        return Err(TelemetryError::Response(
            "IP unblocking not supported on this platform".to_string(),
        ));
    }

    log::info!("[UNBLOCK] Removed firewall rule for {}", ip_str);
    Ok(())
}
