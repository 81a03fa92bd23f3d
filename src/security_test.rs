use super::*;
use crate::room::{CreateRoomRequest, create_room, create_user};

const T0: Timestamp = 1_700_000_000_000;

fn policy() -> SecurityPolicy {
    SecurityPolicy::in_memory(SecurityConfig::default())
}

fn room_with_members(count: usize, max_members: usize, updated_at: Timestamp) -> Room {
    let mut room = create_room(&CreateRoomRequest::new("Alice"), "host", updated_at);
    room.max_members = max_members;
    room.members = (0..count).map(|i| create_user(&format!("user{i}"), i == 0, updated_at)).collect();
    room
}

// =============================================================================
// check_rate_limit
// =============================================================================

#[test]
fn rate_limit_allows_up_to_limit_then_denies() {
    let p = policy();
    let max = p.config().max_requests_per_window;

    for i in 0..max {
        let decision = p.check_rate_limit_at("client-a", T0);
        assert!(decision.allowed, "request {i} should be allowed");
    }
    let denied = p.check_rate_limit_at("client-a", T0);
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert_eq!(denied.reset_time, Some(T0 + p.config().rate_limit_window_ms));
}

#[test]
fn rate_limit_first_call_opens_window() {
    let p = policy();
    let decision = p.check_rate_limit_at("client-a", T0);
    assert!(decision.allowed);
    assert_eq!(decision.remaining, p.config().max_requests_per_window - 1);
}

#[test]
fn rate_limit_distinct_clients_do_not_interfere() {
    let p = policy();
    for _ in 0..p.config().max_requests_per_window {
        p.check_rate_limit_at("client-a", T0);
    }
    assert!(!p.check_rate_limit_at("client-a", T0).allowed);
    assert!(p.check_rate_limit_at("client-b", T0).allowed);
}

#[test]
fn rate_limit_window_expiry_allows_new_requests() {
    let p = policy();
    for _ in 0..p.config().max_requests_per_window {
        p.check_rate_limit_at("client-a", T0);
    }
    assert!(!p.check_rate_limit_at("client-a", T0 + 1).allowed);

    let after_window = T0 + p.config().rate_limit_window_ms;
    let decision = p.check_rate_limit_at("client-a", after_window);
    assert!(decision.allowed);
    assert_eq!(decision.reset_time, Some(after_window + p.config().rate_limit_window_ms));
}

// =============================================================================
// failed attempts / bans
// =============================================================================

#[test]
fn ban_after_max_failed_attempts() {
    let p = policy();
    let max = p.config().max_failed_attempts;
    for _ in 0..max - 1 {
        p.record_failed_attempt_at("client-a", T0);
    }
    assert!(!p.is_client_banned_at("client-a", T0).banned);

    p.record_failed_attempt_at("client-a", T0);
    let status = p.is_client_banned_at("client-a", T0);
    assert!(status.banned);
    assert_eq!(status.ban_until, Some(T0 + p.config().ban_duration_ms));
}

#[test]
fn ban_lapses_and_counter_resets() {
    let p = policy();
    let max = p.config().max_failed_attempts;
    for _ in 0..max {
        p.record_failed_attempt_at("client-a", T0);
    }
    let after = T0 + p.config().ban_duration_ms;
    assert!(!p.is_client_banned_at("client-a", after).banned);

    // Counter was reset: one more failure does not re-ban.
    p.record_failed_attempt_at("client-a", after);
    assert!(!p.is_client_banned_at("client-a", after).banned);
}

#[test]
fn ban_is_per_client() {
    let p = policy();
    for _ in 0..p.config().max_failed_attempts {
        p.record_failed_attempt_at("client-a", T0);
    }
    assert!(p.is_client_banned_at("client-a", T0).banned);
    assert!(!p.is_client_banned_at("client-b", T0).banned);
}

// =============================================================================
// is_room_expired
// =============================================================================

#[test]
fn room_expiry_is_strictly_after_window() {
    let p = policy();
    let room = room_with_members(1, 10, T0);
    let expiry = p.config().room_expiry_ms;
    assert!(!p.is_room_expired_at(&room, T0 + expiry));
    assert!(p.is_room_expired_at(&room, T0 + expiry + 1));
}

#[test]
fn unbounded_expiry_never_overflows() {
    let p = SecurityPolicy::in_memory(SecurityConfig { room_expiry_ms: i64::MAX, ..SecurityConfig::default() });
    let room = room_with_members(1, 10, T0);
    assert!(!p.is_room_expired_at(&room, i64::MAX));
}

// =============================================================================
// validate_secure_room_join
// =============================================================================

#[test]
fn join_missing_room_is_not_found_and_records_failure() {
    let p = policy();
    let err = p.validate_secure_room_join_at("ABCDEF", "u1", "client-a", None, T0).unwrap_err();
    assert_eq!(err.code, RoomErrorCode::RoomNotFound);
    assert_eq!(err.timestamp, T0);
}

#[test]
fn join_expired_room_is_not_found() {
    let p = policy();
    let room = room_with_members(1, 10, T0);
    let later = T0 + p.config().room_expiry_ms + 1;
    let err = p
        .validate_secure_room_join_at(&room.code, "u1", "client-a", Some(&room), later)
        .unwrap_err();
    assert_eq!(err.code, RoomErrorCode::RoomNotFound);
}

#[test]
fn join_full_room_is_room_full() {
    let p = policy();
    let room = room_with_members(2, 2, T0);
    let err = p
        .validate_secure_room_join_at(&room.code, "u3", "client-a", Some(&room), T0)
        .unwrap_err();
    assert_eq!(err.code, RoomErrorCode::RoomFull);
}

#[test]
fn join_success_tracks_session_room() {
    let p = policy();
    let room = room_with_members(1, 10, T0);
    p.validate_secure_room_join_at(&room.code, "u2", "client-a", Some(&room), T0)
        .unwrap();
    assert!(p.session_rooms("client-a").contains(&room.id));
}

#[test]
fn repeated_not_found_joins_accrue_a_ban() {
    let p = policy();
    let max = p.config().max_failed_attempts;
    for _ in 0..max {
        let err = p.validate_secure_room_join_at("NOPE", "u", "client-a", None, T0).unwrap_err();
        assert_eq!(err.code, RoomErrorCode::RoomNotFound);
    }
    let err = p.validate_secure_room_join_at("NOPE", "u", "client-a", None, T0).unwrap_err();
    assert_eq!(err.code, RoomErrorCode::PermissionDenied);
    assert!(err.details.unwrap().get("banUntil").is_some());
}

#[test]
fn full_room_failures_never_accrue_a_ban() {
    let p = policy();
    let room = room_with_members(2, 2, T0);
    let max = p.config().max_failed_attempts;
    // Spread across windows so the rate limit never trips.
    for i in 0..max + 2 {
        let now = T0 + i64::from(i) * p.config().rate_limit_window_ms;
        let err = p
            .validate_secure_room_join_at(&room.code, "u", "client-a", Some(&room), now)
            .unwrap_err();
        assert_eq!(err.code, RoomErrorCode::RoomFull);
    }
    assert!(!p.is_client_banned_at("client-a", T0).banned);
}

#[test]
fn rate_limited_join_is_network_error_without_failure() {
    let p = policy();
    let room = room_with_members(1, 10, T0);
    for _ in 0..p.config().max_requests_per_window {
        p.check_rate_limit_at("client-a", T0);
    }
    for _ in 0..p.config().max_failed_attempts + 1 {
        let err = p
            .validate_secure_room_join_at(&room.code, "u", "client-a", Some(&room), T0)
            .unwrap_err();
        assert_eq!(err.code, RoomErrorCode::NetworkError);
        assert!(err.details.unwrap().get("resetTime").is_some());
    }
    assert!(!p.is_client_banned_at("client-a", T0).banned);
}

#[test]
fn rate_limit_is_checked_before_existence() {
    let p = policy();
    for _ in 0..p.config().max_requests_per_window {
        p.check_rate_limit_at("client-a", T0);
    }
    let err = p.validate_secure_room_join_at("X", "u", "client-a", None, T0).unwrap_err();
    assert_eq!(err.code, RoomErrorCode::NetworkError);
}

// =============================================================================
// validate_secure_room_creation
// =============================================================================

#[test]
fn creation_rejected_at_concurrent_room_limit() {
    let p = policy();
    let max = p.config().max_concurrent_rooms;
    for i in 0..max {
        p.validate_secure_room_creation_at("u", "client-a", T0).unwrap();
        p.track_room_at("client-a", "u", &format!("room_{i}"), T0);
    }
    let err = p.validate_secure_room_creation_at("u", "client-a", T0).unwrap_err();
    assert_eq!(err.code, RoomErrorCode::PermissionDenied);

    p.release_room_at("client-a", "room_0", T0);
    assert!(p.validate_secure_room_creation_at("u", "client-a", T0).is_ok());
}

#[test]
fn creation_rate_limited_is_network_error() {
    let p = policy();
    for _ in 0..p.config().max_requests_per_window {
        p.check_rate_limit_at("client-a", T0);
    }
    let err = p.validate_secure_room_creation_at("u", "client-a", T0).unwrap_err();
    assert_eq!(err.code, RoomErrorCode::NetworkError);
    assert!(!p.is_client_banned_at("client-a", T0).banned);
}

// =============================================================================
// cleanup_security_store
// =============================================================================

#[test]
fn cleanup_sweeps_expired_entries() {
    let p = policy();
    let cfg = *p.config();
    p.check_rate_limit_at("client-a", T0);
    p.record_failed_attempt_at("client-b", T0);
    p.track_room_at("client-c", "u", "room_1", T0);

    let early = p.cleanup_security_store_at(T0 + 1);
    assert_eq!(early.total(), 0);

    let late = T0 + cfg.session_idle_timeout_ms;
    let report = p.cleanup_security_store_at(late);
    assert_eq!(report.rate_limits, 1);
    assert_eq!(report.failed_attempts, 1);
    assert_eq!(report.sessions, 1);
    assert!(p.session_rooms("client-c").is_empty());
}

#[test]
fn cleanup_keeps_active_bans() {
    let p = policy();
    for _ in 0..p.config().max_failed_attempts {
        p.record_failed_attempt_at("client-a", T0);
    }
    let report = p.cleanup_security_store_at(T0 + p.config().ban_duration_ms - 1);
    assert_eq!(report.failed_attempts, 0);
    assert!(p.is_client_banned_at("client-a", T0 + 1).banned);
}

#[tokio::test]
async fn cleanup_task_runs_on_interval() {
    let cfg = SecurityConfig { cleanup_interval: std::time::Duration::from_millis(10), ..SecurityConfig::default() };
    let p = SecurityPolicy::in_memory(cfg);
    p.check_rate_limit_at("client-a", 0);
    let handle = spawn_cleanup_task(p.clone());
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    handle.abort();
    // Window opened at epoch zero is long closed by wall-clock time.
    assert_eq!(p.cleanup_security_store_at(now_ms()).rate_limits, 0);
}
