//! Runtime configuration parsed from environment variables.
//!
//! Every knob has a default; a missing or unparsable variable falls back to
//! it silently. `from_lookup` takes any key lookup so tests never touch the
//! process environment.
//!
//! Variables:
//! - `RATE_LIMIT_WINDOW_MS` (60000), `MAX_REQUESTS_PER_WINDOW` (10)
//! - `MAX_FAILED_ATTEMPTS` (5), `BAN_DURATION_MINUTES` (15)
//! - `MAX_CONCURRENT_ROOMS` (3), `ROOM_EXPIRY_HOURS` (24)
//! - `SESSION_IDLE_TIMEOUT_MS` (86400000), `SECURITY_CLEANUP_INTERVAL_MS` (300000)
//! - `ROOM_OPERATION_TIMEOUT_MS` (10000), `ROOM_CODE_MAX_ATTEMPTS` (10)
//! - `VIDEO_SYNC_STALENESS_MS` (5000)
//! - `PRESENCE_HEARTBEAT_INTERVAL_MS` (15000), `PRESENCE_LEASE_TIMEOUT_MS` (45000)

use std::time::Duration;

use crate::clock::{MS_PER_HOUR, MS_PER_MINUTE};

pub const DEFAULT_RATE_LIMIT_WINDOW_MS: i64 = 60_000;
pub const DEFAULT_MAX_REQUESTS_PER_WINDOW: u32 = 10;
pub const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 5;
pub const DEFAULT_BAN_DURATION_MINUTES: i64 = 15;
pub const DEFAULT_MAX_CONCURRENT_ROOMS: usize = 3;
pub const DEFAULT_ROOM_EXPIRY_HOURS: i64 = 24;
pub const DEFAULT_SESSION_IDLE_TIMEOUT_MS: i64 = 24 * MS_PER_HOUR;
pub const DEFAULT_SECURITY_CLEANUP_INTERVAL_MS: u64 = 300_000;
pub const DEFAULT_ROOM_OPERATION_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_ROOM_CODE_MAX_ATTEMPTS: usize = 10;
pub const DEFAULT_VIDEO_SYNC_STALENESS_MS: i64 = 5_000;
pub const DEFAULT_PRESENCE_HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub const DEFAULT_PRESENCE_LEASE_TIMEOUT_MS: i64 = 45_000;

// =============================================================================
// SECTIONS
// =============================================================================

/// Limits enforced by `SecurityPolicy`. Durations are milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityConfig {
    pub rate_limit_window_ms: i64,
    pub max_requests_per_window: u32,
    pub max_failed_attempts: u32,
    pub ban_duration_ms: i64,
    pub max_concurrent_rooms: usize,
    pub room_expiry_ms: i64,
    pub session_idle_timeout_ms: i64,
    pub cleanup_interval: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limit_window_ms: DEFAULT_RATE_LIMIT_WINDOW_MS,
            max_requests_per_window: DEFAULT_MAX_REQUESTS_PER_WINDOW,
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            ban_duration_ms: DEFAULT_BAN_DURATION_MINUTES * MS_PER_MINUTE,
            max_concurrent_rooms: DEFAULT_MAX_CONCURRENT_ROOMS,
            room_expiry_ms: DEFAULT_ROOM_EXPIRY_HOURS * MS_PER_HOUR,
            session_idle_timeout_ms: DEFAULT_SESSION_IDLE_TIMEOUT_MS,
            cleanup_interval: Duration::from_millis(DEFAULT_SECURITY_CLEANUP_INTERVAL_MS),
        }
    }
}

/// Knobs for `RoomSessionService`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound on a create/join round trip before `CONNECTION_FAILED`.
    pub operation_timeout: Duration,
    /// Attempts at drawing a room code that no live room uses.
    pub code_max_attempts: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_millis(DEFAULT_ROOM_OPERATION_TIMEOUT_MS),
            code_max_attempts: DEFAULT_ROOM_CODE_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSyncConfig {
    /// Remote updates older than this on receipt are discarded.
    pub staleness_ms: i64,
}

impl Default for VideoSyncConfig {
    fn default() -> Self {
        Self { staleness_ms: DEFAULT_VIDEO_SYNC_STALENESS_MS }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceConfig {
    pub heartbeat_interval: Duration,
    pub lease_timeout_ms: i64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(DEFAULT_PRESENCE_HEARTBEAT_INTERVAL_MS),
            lease_timeout_ms: DEFAULT_PRESENCE_LEASE_TIMEOUT_MS,
        }
    }
}

// =============================================================================
// TOP-LEVEL
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchroomConfig {
    pub security: SecurityConfig,
    pub session: SessionConfig,
    pub video_sync: VideoSyncConfig,
    pub presence: PresenceConfig,
}

impl WatchroomConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key);
        let security = SecurityConfig {
            rate_limit_window_ms: parse_or(get("RATE_LIMIT_WINDOW_MS"), DEFAULT_RATE_LIMIT_WINDOW_MS),
            max_requests_per_window: parse_or(get("MAX_REQUESTS_PER_WINDOW"), DEFAULT_MAX_REQUESTS_PER_WINDOW),
            max_failed_attempts: parse_or(get("MAX_FAILED_ATTEMPTS"), DEFAULT_MAX_FAILED_ATTEMPTS),
            ban_duration_ms: parse_or(get("BAN_DURATION_MINUTES"), DEFAULT_BAN_DURATION_MINUTES)
                .saturating_mul(MS_PER_MINUTE),
            max_concurrent_rooms: parse_or(get("MAX_CONCURRENT_ROOMS"), DEFAULT_MAX_CONCURRENT_ROOMS),
            room_expiry_ms: parse_or(get("ROOM_EXPIRY_HOURS"), DEFAULT_ROOM_EXPIRY_HOURS).saturating_mul(MS_PER_HOUR),
            session_idle_timeout_ms: parse_or(get("SESSION_IDLE_TIMEOUT_MS"), DEFAULT_SESSION_IDLE_TIMEOUT_MS),
            cleanup_interval: Duration::from_millis(parse_or(
                get("SECURITY_CLEANUP_INTERVAL_MS"),
                DEFAULT_SECURITY_CLEANUP_INTERVAL_MS,
            )),
        };
        let session = SessionConfig {
            operation_timeout: Duration::from_millis(parse_or(
                get("ROOM_OPERATION_TIMEOUT_MS"),
                DEFAULT_ROOM_OPERATION_TIMEOUT_MS,
            )),
            code_max_attempts: parse_or(get("ROOM_CODE_MAX_ATTEMPTS"), DEFAULT_ROOM_CODE_MAX_ATTEMPTS),
        };
        let video_sync = VideoSyncConfig {
            staleness_ms: parse_or(get("VIDEO_SYNC_STALENESS_MS"), DEFAULT_VIDEO_SYNC_STALENESS_MS),
        };
        let presence = PresenceConfig {
            heartbeat_interval: Duration::from_millis(parse_or(
                get("PRESENCE_HEARTBEAT_INTERVAL_MS"),
                DEFAULT_PRESENCE_HEARTBEAT_INTERVAL_MS,
            )),
            lease_timeout_ms: parse_or(get("PRESENCE_LEASE_TIMEOUT_MS"), DEFAULT_PRESENCE_LEASE_TIMEOUT_MS),
        };
        Self { security, session, video_sync, presence }
    }
}

fn parse_or<T>(raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    raw.and_then(|v| v.trim().parse::<T>().ok()).unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
