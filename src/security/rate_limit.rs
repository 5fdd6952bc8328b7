//! Fixed-window rate limiting with escalation to temporary bans.
//!
//! # Algorithm
//! ```text
//! check(id):
//!     banned(id)                  → deny, remaining 0
//!     no record | window expired  → open window (count = 1), allow
//!     count >= max                → count += 1, deny
//!                                   count > max * ban_multiplier → ban(id)
//!     otherwise                   → count += 1, allow
//! ```
//!
//! Attempts keep counting while denied so that sustained abuse can reach the
//! escalation threshold. Every read-modify-write of one identifier's record
//! happens under that record's `DashMap` shard lock; unrelated identifiers
//! only contend when they hash to the same shard.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::RateLimitConfig;
use crate::observability::metrics;
use crate::security::clock::{Clock, SystemClock};

/// Request count for one identifier inside its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRecord {
    pub count: u64,
    /// Epoch milliseconds at which the window closes.
    pub window_reset_at: u64,
}

impl RateRecord {
    fn open(now: u64, window_ms: u64) -> Self {
        Self {
            count: 1,
            window_reset_at: now.saturating_add(window_ms),
        }
    }
}

/// Why an identifier is banned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BanSource {
    /// Exceeded `ban_multiplier * max_requests` in one window.
    Escalation,
    /// Operator action.
    Manual,
}

impl BanSource {
    fn as_str(&self) -> &'static str {
        match self {
            BanSource::Escalation => "escalation",
            BanSource::Manual => "manual",
        }
    }
}

/// A ban on one identifier. `expires_at == None` lasts until removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BanEntry {
    pub expires_at: Option<u64>,
    pub source: BanSource,
}

impl BanEntry {
    pub fn is_active(&self, now: u64) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }

    /// Still active and ends no earlier than `other`.
    fn outlasts(&self, other: &BanEntry, now: u64) -> bool {
        if !self.is_active(now) {
            return false;
        }
        match (self.expires_at, other.expires_at) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(theirs)) => mine >= theirs,
        }
    }
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Epoch milliseconds. For banned identifiers this is informational only.
    pub reset_at: u64,
    /// Seconds until `reset_at`, rounded up.
    pub retry_after_secs: u64,
    pub banned: bool,
}

impl RateDecision {
    fn new(allowed: bool, limit: u64, remaining: u64, reset_at: u64, now: u64, banned: bool) -> Self {
        Self {
            allowed,
            limit,
            remaining,
            reset_at,
            retry_after_secs: reset_at.saturating_sub(now).div_ceil(1000),
            banned,
        }
    }
}

/// Aggregate counters for observability. Never consulted by admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub active_windows: usize,
    pub banned_identifiers: usize,
}

/// What one sweep reclaimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub windows_evicted: usize,
    pub bans_expired: usize,
}

struct SweepTrigger {
    threshold: u64,
    checks: AtomicU64,
    tx: mpsc::Sender<()>,
}

/// Process-local store of per-identifier windows and bans.
pub struct RateLimiter {
    records: DashMap<String, RateRecord>,
    bans: DashMap<String, BanEntry>,
    clock: Arc<dyn Clock>,
    sweep_trigger: Option<SweepTrigger>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            bans: DashMap::new(),
            clock,
            sweep_trigger: None,
        }
    }

    /// Ask for a sweep every `threshold` checks. The returned receiver is
    /// meant for a [`Sweeper`](crate::security::sweeper::Sweeper).
    pub fn with_sweep_trigger(mut self, threshold: u64) -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        self.sweep_trigger = Some(SweepTrigger {
            threshold: threshold.max(1),
            checks: AtomicU64::new(0),
            tx,
        });
        (self, rx)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Count one request for `identifier` and decide whether it may proceed.
    pub fn check(&self, identifier: &str, config: &RateLimitConfig) -> RateDecision {
        let now = self.clock.now_ms();
        let max = config.max_requests;
        self.note_check();

        if self.is_banned(identifier, now) {
            return RateDecision::new(false, max, 0, now.saturating_add(config.window_ms), now, true);
        }

        let mut escalate = false;
        let decision = match self.records.entry(identifier.to_string()) {
            Entry::Vacant(slot) => {
                let record = slot.insert(RateRecord::open(now, config.window_ms));
                RateDecision::new(true, max, max.saturating_sub(1), record.window_reset_at, now, false)
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                if now >= record.window_reset_at {
                    *record = RateRecord::open(now, config.window_ms);
                    RateDecision::new(true, max, max.saturating_sub(1), record.window_reset_at, now, false)
                } else if record.count >= max {
                    record.count += 1;
                    escalate = record.count > max.saturating_mul(config.ban_multiplier);
                    RateDecision::new(false, max, 0, record.window_reset_at, now, false)
                } else {
                    record.count += 1;
                    RateDecision::new(true, max, max - record.count, record.window_reset_at, now, false)
                }
            }
        };

        if escalate {
            tracing::warn!(
                identifier = %identifier,
                threshold = max.saturating_mul(config.ban_multiplier),
                ban_ms = config.ban_duration_ms,
                "Sustained abuse, banning identifier"
            );
            self.block(identifier, Some(config.ban_duration_ms), BanSource::Escalation);
        }

        decision
    }

    /// Operator ban. `None` bans until [`unblock`](Self::unblock) is called.
    pub fn block_manually(&self, identifier: &str, duration_ms: Option<u64>) {
        tracing::info!(identifier = %identifier, duration_ms = ?duration_ms, "Manual ban");
        self.block(identifier, duration_ms, BanSource::Manual);
    }

    /// Remove a ban. Returns whether one existed.
    pub fn unblock(&self, identifier: &str) -> bool {
        let removed = self.bans.remove(identifier).is_some();
        if removed {
            tracing::info!(identifier = %identifier, "Ban lifted");
            metrics::record_banned_identifiers(self.bans.len());
        }
        removed
    }

    /// Active bans, sorted by identifier.
    pub fn banned(&self) -> Vec<(String, BanEntry)> {
        let now = self.clock.now_ms();
        let mut bans: Vec<_> = self
            .bans
            .iter()
            .filter(|b| b.value().is_active(now))
            .map(|b| (b.key().clone(), b.value().clone()))
            .collect();
        bans.sort_by(|a, b| a.0.cmp(&b.0));
        bans
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            total_requests: self.records.iter().map(|r| r.value().count).sum(),
            active_windows: self.records.len(),
            banned_identifiers: self.bans.len(),
        }
    }

    /// Evict closed windows and expired bans.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now_ms();

        let windows_before = self.records.len();
        self.records.retain(|_, record| now < record.window_reset_at);
        let bans_before = self.bans.len();
        self.bans.retain(|_, ban| ban.is_active(now));

        let report = SweepReport {
            windows_evicted: windows_before.saturating_sub(self.records.len()),
            bans_expired: bans_before.saturating_sub(self.bans.len()),
        };
        metrics::record_sweep(report.windows_evicted + report.bans_expired);
        metrics::record_active_windows(self.records.len());
        metrics::record_banned_identifiers(self.bans.len());
        report
    }

    /// Operator bans always replace the current entry. Escalation never
    /// shortens a ban that is already in place.
    fn block(&self, identifier: &str, duration_ms: Option<u64>, source: BanSource) {
        let now = self.clock.now_ms();
        let ban = BanEntry {
            expires_at: duration_ms.map(|d| now.saturating_add(d)),
            source,
        };
        match self.bans.entry(identifier.to_string()) {
            Entry::Occupied(slot) if source == BanSource::Escalation && slot.get().outlasts(&ban, now) => return,
            Entry::Occupied(mut slot) => {
                slot.insert(ban);
            }
            Entry::Vacant(slot) => {
                slot.insert(ban);
            }
        }
        metrics::record_ban(source.as_str());
        metrics::record_banned_identifiers(self.bans.len());
    }

    fn is_banned(&self, identifier: &str, now: u64) -> bool {
        let expired = match self.bans.get(identifier) {
            None => return false,
            Some(ban) if ban.is_active(now) => return true,
            Some(_) => true,
        };
        if expired {
            self.bans.remove_if(identifier, |_, ban| !ban.is_active(now));
        }
        false
    }

    fn note_check(&self) {
        let Some(trigger) = &self.sweep_trigger else {
            return;
        };
        let seen = trigger.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if seen >= trigger.threshold {
            trigger.checks.store(0, Ordering::Relaxed);
            // A sweep already queued covers this one.
            let _ = trigger.tx.try_send(());
        }
    }
}
