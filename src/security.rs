//! Rate limiting, failed-attempt banning, and session bookkeeping.
//!
//! DESIGN
//! ======
//! `SecurityPolicy` owns an injected `SecurityStore` instead of reaching for
//! process-wide maps, so every test and every tenant gets its own counters.
//! Three keyed tables live in the store:
//! - rate-limit windows: fixed window per client, count + window start
//! - failed attempts: counter with optional `ban_until`
//! - sessions: last activity and the set of rooms a client is in
//!
//! Bans expire lazily on read. `cleanup_security_store` sweeps everything
//! else and must be driven by the host, see `spawn_cleanup_task`.
//!
//! ERROR MAPPING
//! =============
//! Rate limiting surfaces as `NETWORK_ERROR`; bans and the concurrent-room
//! cap surface as `PERMISSION_DENIED`. Only join failures against a missing
//! or expired room count toward a ban.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::{Timestamp, now_ms};
use crate::config::SecurityConfig;
use crate::error::{RoomError, RoomErrorCode, RoomResult};
use crate::room::{Room, is_room_full};

// =============================================================================
// STORE ENTRIES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedAttemptEntry {
    pub count: u32,
    pub last_attempt: Timestamp,
    pub ban_until: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub user_id: String,
    pub last_activity: Timestamp,
    pub room_ids: BTreeSet<String>,
}

// =============================================================================
// STORE
// =============================================================================

/// Keyed storage behind `SecurityPolicy`.
///
/// Each `update_*` call runs the closure atomically against the slot for
/// `key`; setting the slot to `None` deletes the entry.
pub trait SecurityStore: Send + Sync {
    fn update_rate_limit(&self, key: &str, f: &mut dyn FnMut(&mut Option<RateLimitEntry>));
    fn update_failed_attempts(&self, key: &str, f: &mut dyn FnMut(&mut Option<FailedAttemptEntry>));
    fn update_session(&self, key: &str, f: &mut dyn FnMut(&mut Option<SessionEntry>));

    /// Keep only entries for which `keep` returns true. Returns the number removed.
    fn retain_rate_limits(&self, keep: &mut dyn FnMut(&RateLimitEntry) -> bool) -> usize;
    fn retain_failed_attempts(&self, keep: &mut dyn FnMut(&FailedAttemptEntry) -> bool) -> usize;
    fn retain_sessions(&self, keep: &mut dyn FnMut(&SessionEntry) -> bool) -> usize;
}

/// In-process `SecurityStore` backed by three hash maps.
#[derive(Default)]
pub struct MemorySecurityStore {
    inner: Mutex<MemorySecurityInner>,
}

#[derive(Default)]
struct MemorySecurityInner {
    rate_limits: HashMap<String, RateLimitEntry>,
    failed_attempts: HashMap<String, FailedAttemptEntry>,
    sessions: HashMap<String, SessionEntry>,
}

impl MemorySecurityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemorySecurityInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn update_slot<V>(map: &mut HashMap<String, V>, key: &str, f: &mut dyn FnMut(&mut Option<V>)) {
    let mut slot = map.remove(key);
    f(&mut slot);
    if let Some(value) = slot {
        map.insert(key.to_owned(), value);
    }
}

fn retain_counted<V>(map: &mut HashMap<String, V>, keep: &mut dyn FnMut(&V) -> bool) -> usize {
    let before = map.len();
    map.retain(|_, v| keep(v));
    before - map.len()
}

impl SecurityStore for MemorySecurityStore {
    fn update_rate_limit(&self, key: &str, f: &mut dyn FnMut(&mut Option<RateLimitEntry>)) {
        update_slot(&mut self.lock().rate_limits, key, f);
    }

    fn update_failed_attempts(&self, key: &str, f: &mut dyn FnMut(&mut Option<FailedAttemptEntry>)) {
        update_slot(&mut self.lock().failed_attempts, key, f);
    }

    fn update_session(&self, key: &str, f: &mut dyn FnMut(&mut Option<SessionEntry>)) {
        update_slot(&mut self.lock().sessions, key, f);
    }

    fn retain_rate_limits(&self, keep: &mut dyn FnMut(&RateLimitEntry) -> bool) -> usize {
        retain_counted(&mut self.lock().rate_limits, keep)
    }

    fn retain_failed_attempts(&self, keep: &mut dyn FnMut(&FailedAttemptEntry) -> bool) -> usize {
        retain_counted(&mut self.lock().failed_attempts, keep)
    }

    fn retain_sessions(&self, keep: &mut dyn FnMut(&SessionEntry) -> bool) -> usize {
        retain_counted(&mut self.lock().sessions, keep)
    }
}

// =============================================================================
// DECISIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// When the current window closes. Present whenever a window is open.
    pub reset_time: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanStatus {
    pub banned: bool,
    pub ban_until: Option<Timestamp>,
}

/// Counts of entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub rate_limits: usize,
    pub failed_attempts: usize,
    pub sessions: usize,
}

impl CleanupReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.rate_limits + self.failed_attempts + self.sessions
    }
}

// =============================================================================
// POLICY
// =============================================================================

#[derive(Clone)]
pub struct SecurityPolicy {
    store: Arc<dyn SecurityStore>,
    config: SecurityConfig,
}

impl SecurityPolicy {
    pub fn new(store: Arc<dyn SecurityStore>, config: SecurityConfig) -> Self {
        Self { store, config }
    }

    /// Policy over a fresh `MemorySecurityStore`.
    #[must_use]
    pub fn in_memory(config: SecurityConfig) -> Self {
        Self::new(Arc::new(MemorySecurityStore::new()), config)
    }

    #[must_use]
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // rate limiting
    // -------------------------------------------------------------------------

    pub fn check_rate_limit(&self, client_id: &str) -> RateLimitDecision {
        self.check_rate_limit_at(client_id, now_ms())
    }

    /// Fixed window: the first request opens a window with count 1; once the
    /// count reaches the limit, further requests are denied until it closes.
    pub fn check_rate_limit_at(&self, client_id: &str, now: Timestamp) -> RateLimitDecision {
        let cfg = self.config;
        let mut decision = RateLimitDecision { allowed: true, remaining: 0, reset_time: None };
        self.store.update_rate_limit(client_id, &mut |slot| {
            let window_open = slot
                .as_ref()
                .is_some_and(|e| now < e.window_start.saturating_add(cfg.rate_limit_window_ms));
            if !window_open {
                *slot = Some(RateLimitEntry { count: 1, window_start: now });
                decision = RateLimitDecision {
                    allowed: true,
                    remaining: cfg.max_requests_per_window.saturating_sub(1),
                    reset_time: Some(now.saturating_add(cfg.rate_limit_window_ms)),
                };
                return;
            }
            let Some(entry) = slot.as_mut() else {
                return;
            };
            let reset_time = Some(entry.window_start.saturating_add(cfg.rate_limit_window_ms));
            if entry.count >= cfg.max_requests_per_window {
                decision = RateLimitDecision { allowed: false, remaining: 0, reset_time };
                return;
            }
            entry.count += 1;
            decision = RateLimitDecision {
                allowed: true,
                remaining: cfg.max_requests_per_window.saturating_sub(entry.count),
                reset_time,
            };
        });
        if !decision.allowed {
            debug!(client_id, reset_time = ?decision.reset_time, "rate limit exceeded");
        }
        decision
    }

    // -------------------------------------------------------------------------
    // failed attempts / bans
    // -------------------------------------------------------------------------

    pub fn record_failed_attempt(&self, client_id: &str) {
        self.record_failed_attempt_at(client_id, now_ms());
    }

    pub fn record_failed_attempt_at(&self, client_id: &str, now: Timestamp) {
        let cfg = self.config;
        let mut banned_until = None;
        self.store.update_failed_attempts(client_id, &mut |slot| {
            let entry = slot.get_or_insert(FailedAttemptEntry { count: 0, last_attempt: now, ban_until: None });
            entry.count += 1;
            entry.last_attempt = now;
            if entry.count >= cfg.max_failed_attempts && entry.ban_until.is_none() {
                entry.ban_until = Some(now.saturating_add(cfg.ban_duration_ms));
                banned_until = entry.ban_until;
            }
        });
        if let Some(until) = banned_until {
            warn!(client_id, ban_until = until, "client banned after repeated failed attempts");
        }
    }

    pub fn is_client_banned(&self, client_id: &str) -> BanStatus {
        self.is_client_banned_at(client_id, now_ms())
    }

    /// Lapsed bans are cleared on read, resetting the attempt counter.
    pub fn is_client_banned_at(&self, client_id: &str, now: Timestamp) -> BanStatus {
        let mut status = BanStatus { banned: false, ban_until: None };
        self.store.update_failed_attempts(client_id, &mut |slot| {
            let Some(until) = slot.as_ref().and_then(|e| e.ban_until) else {
                return;
            };
            if now >= until {
                *slot = None;
            } else {
                status = BanStatus { banned: true, ban_until: Some(until) };
            }
        });
        status
    }

    // -------------------------------------------------------------------------
    // rooms
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn is_room_expired(&self, room: &Room) -> bool {
        self.is_room_expired_at(room, now_ms())
    }

    #[must_use]
    pub fn is_room_expired_at(&self, room: &Room, now: Timestamp) -> bool {
        now > room.updated_at.saturating_add(self.config.room_expiry_ms)
    }

    pub fn validate_secure_room_join(
        &self,
        room_code: &str,
        user_id: &str,
        client_id: &str,
        room: Option<&Room>,
    ) -> RoomResult<()> {
        self.validate_secure_room_join_at(room_code, user_id, client_id, room, now_ms())
    }

    /// Ordered, fail-fast join checks: rate limit, ban, existence, expiry,
    /// capacity, then session bookkeeping.
    pub fn validate_secure_room_join_at(
        &self,
        room_code: &str,
        user_id: &str,
        client_id: &str,
        room: Option<&Room>,
        now: Timestamp,
    ) -> RoomResult<()> {
        self.require_rate_limit(client_id, now)?;

        let ban = self.is_client_banned_at(client_id, now);
        if ban.banned {
            return Err(banned_error(ban, now));
        }

        let Some(room) = room else {
            self.record_failed_attempt_at(client_id, now);
            return Err(RoomError::at(RoomErrorCode::RoomNotFound, format!("Room {room_code} not found"), now));
        };

        if self.is_room_expired_at(room, now) {
            self.record_failed_attempt_at(client_id, now);
            info!(room_id = %room.id, room_code, "join rejected: room expired");
            return Err(RoomError::at(RoomErrorCode::RoomNotFound, format!("Room {room_code} has expired"), now));
        }

        if is_room_full(room) {
            return Err(RoomError::at(
                RoomErrorCode::RoomFull,
                format!("Room {room_code} is full ({} members)", room.max_members),
                now,
            ));
        }

        self.track_room_at(client_id, user_id, &room.id, now);
        Ok(())
    }

    pub fn validate_secure_room_creation(&self, user_id: &str, client_id: &str) -> RoomResult<()> {
        self.validate_secure_room_creation_at(user_id, client_id, now_ms())
    }

    pub fn validate_secure_room_creation_at(&self, user_id: &str, client_id: &str, now: Timestamp) -> RoomResult<()> {
        self.require_rate_limit(client_id, now)?;

        let max_rooms = self.config.max_concurrent_rooms;
        let mut active = 0;
        self.store.update_session(client_id, &mut |slot| {
            active = slot.as_ref().map_or(0, |s| s.room_ids.len());
        });
        if active >= max_rooms {
            debug!(user_id, client_id, active, "room creation rejected: concurrent room limit");
            return Err(RoomError::at(
                RoomErrorCode::PermissionDenied,
                format!("You can be in at most {max_rooms} rooms at once"),
                now,
            ));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // sessions
    // -------------------------------------------------------------------------

    /// Record that `client_id` is now in `room_id`.
    pub fn track_room_at(&self, client_id: &str, user_id: &str, room_id: &str, now: Timestamp) {
        self.store.update_session(client_id, &mut |slot| {
            let session = slot.get_or_insert_with(|| SessionEntry {
                user_id: user_id.to_owned(),
                last_activity: now,
                room_ids: BTreeSet::new(),
            });
            session.user_id = user_id.to_owned();
            session.last_activity = now;
            session.room_ids.insert(room_id.to_owned());
        });
    }

    pub fn release_room(&self, client_id: &str, room_id: &str) {
        self.release_room_at(client_id, room_id, now_ms());
    }

    pub fn release_room_at(&self, client_id: &str, room_id: &str, now: Timestamp) {
        self.store.update_session(client_id, &mut |slot| {
            if let Some(session) = slot.as_mut() {
                session.room_ids.remove(room_id);
                session.last_activity = now;
            }
        });
    }

    /// Rooms currently tracked for `client_id`.
    #[must_use]
    pub fn session_rooms(&self, client_id: &str) -> BTreeSet<String> {
        let mut rooms = BTreeSet::new();
        self.store.update_session(client_id, &mut |slot| {
            if let Some(session) = slot.as_ref() {
                rooms.clone_from(&session.room_ids);
            }
        });
        rooms
    }

    // -------------------------------------------------------------------------
    // sweep
    // -------------------------------------------------------------------------

    pub fn cleanup_security_store(&self) -> CleanupReport {
        self.cleanup_security_store_at(now_ms())
    }

    /// Drop closed rate windows, lapsed bans, stale un-banned counters, and
    /// idle sessions.
    pub fn cleanup_security_store_at(&self, now: Timestamp) -> CleanupReport {
        let cfg = self.config;
        let report = CleanupReport {
            rate_limits: self
                .store
                .retain_rate_limits(&mut |e| now < e.window_start.saturating_add(cfg.rate_limit_window_ms)),
            failed_attempts: self.store.retain_failed_attempts(&mut |e| match e.ban_until {
                Some(until) => now < until,
                None => now < e.last_attempt.saturating_add(cfg.ban_duration_ms),
            }),
            sessions: self
                .store
                .retain_sessions(&mut |s| now < s.last_activity.saturating_add(cfg.session_idle_timeout_ms)),
        };
        if report.total() > 0 {
            debug!(
                rate_limits = report.rate_limits,
                failed_attempts = report.failed_attempts,
                sessions = report.sessions,
                "security store swept"
            );
        }
        report
    }

    fn require_rate_limit(&self, client_id: &str, now: Timestamp) -> RoomResult<()> {
        let decision = self.check_rate_limit_at(client_id, now);
        if decision.allowed {
            return Ok(());
        }
        let mut err = RoomError::at(RoomErrorCode::NetworkError, "Too many requests, please slow down", now);
        if let Some(reset_time) = decision.reset_time {
            err = err.with_details(serde_json::json!({ "resetTime": reset_time }));
        }
        Err(err)
    }
}

fn banned_error(ban: BanStatus, now: Timestamp) -> RoomError {
    let err = RoomError::at(
        RoomErrorCode::PermissionDenied,
        "Too many failed attempts, try again later",
        now,
    );
    match ban.ban_until {
        Some(until) => err.with_details(serde_json::json!({ "banUntil": until })),
        None => err,
    }
}

/// Spawn the periodic security sweep. Returns a handle for shutdown.
pub fn spawn_cleanup_task(policy: SecurityPolicy) -> JoinHandle<()> {
    let interval = policy.config.cleanup_interval;
    info!(interval = ?interval, "security sweep configured");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            policy.cleanup_security_store();
        }
    })
}

#[cfg(test)]
#[path = "security_test.rs"]
mod tests;
