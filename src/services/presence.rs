//! Presence leases: membership cleanup without native disconnect hooks.
//!
//! DESIGN
//! ======
//! Every member refreshes `lastSeen` on its own member record once per
//! `heartbeat_interval`. Any member may sweep the room: members whose lease
//! is older than `lease_timeout_ms` are removed, and if the host is among
//! them (or already gone) the earliest-joined survivor becomes host.
//!
//! The sweep also repairs rooms left hostless by `on_disconnect_remove`,
//! which removes the member record but cannot reassign the host.
//!
//! ERROR HANDLING
//! ==============
//! The background task logs directory failures and keeps ticking; a missed
//! heartbeat only shortens the lease.

use std::sync::Arc;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::{Timestamp, now_ms};
use crate::config::PresenceConfig;
use crate::directory::records::{RoomRecord, from_value, to_value};
use crate::directory::{RemoteDirectory, paths};
use crate::error::DirectoryError;
use crate::room::{User, elect_successor_host};
use crate::services::session::RoomSessionService;

/// Outcome of one lease sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseSweep {
    pub removed: Vec<String>,
    pub new_host: Option<String>,
    pub room_removed: bool,
}

/// Refresh `user_id`'s lease. Returns `false` when the member record is gone
/// (kicked or swept), in which case nothing is written.
///
/// # Errors
///
/// Propagates directory failures.
pub async fn refresh_lease(
    directory: &dyn RemoteDirectory,
    room_id: &str,
    user_id: &str,
    now: Timestamp,
) -> Result<bool, DirectoryError> {
    let path = paths::member(room_id, user_id);
    let Some(value) = directory.read(&path).await? else {
        return Ok(false);
    };
    let mut member: User = from_value(&path, value)?;
    member.last_seen = now;
    member.is_online = true;
    directory.write(&path, to_value(&path, &member)?).await?;
    Ok(true)
}

/// Remove members whose lease lapsed and make sure the room has a host.
///
/// # Errors
///
/// Propagates directory failures.
pub async fn sweep_expired_leases(
    directory: &dyn RemoteDirectory,
    room_id: &str,
    now: Timestamp,
    lease_timeout_ms: i64,
) -> Result<LeaseSweep, DirectoryError> {
    let path = paths::room(room_id);
    let Some(value) = directory.read(&path).await? else {
        return Ok(LeaseSweep::default());
    };
    let room = from_value::<RoomRecord>(&path, value)?.into_room();

    let (expired, survivors): (Vec<User>, Vec<User>) =
        room.members.into_iter().partition(|u| now - u.last_seen > lease_timeout_ms);
    let mut sweep = LeaseSweep { removed: expired.iter().map(|u| u.id.clone()).collect(), ..LeaseSweep::default() };

    if survivors.is_empty() {
        directory.remove(&path).await?;
        sweep.room_removed = true;
        info!(room_id, removed = sweep.removed.len(), "every lease lapsed; room removed");
        return Ok(sweep);
    }

    for user in &expired {
        directory.remove(&paths::member(room_id, &user.id)).await?;
    }

    if !survivors.iter().any(|u| u.id == room.host_id) {
        if let Some(successor) = elect_successor_host(&survivors, &room.host_id) {
            let mut successor = successor.clone();
            successor.is_host = true;
            let member_path = paths::member(room_id, &successor.id);
            directory.write(&member_path, to_value(&member_path, &successor)?).await?;
            directory.write(&paths::host_id(room_id), json!(successor.id)).await?;
            info!(room_id, new_host = %successor.id, "host lease lapsed; host reassigned");
            sweep.new_host = Some(successor.id);
        }
    }

    if !sweep.removed.is_empty() || sweep.new_host.is_some() {
        directory.write(&paths::updated_at(room_id), json!(now)).await?;
        debug!(room_id, removed = ?sweep.removed, "lapsed leases swept");
    }
    Ok(sweep)
}

/// Spawn the heartbeat loop for `session`: refresh this member's lease and
/// sweep the room on every tick. Idle while the session is not in a room.
pub fn spawn_heartbeat_task(
    directory: Arc<dyn RemoteDirectory>,
    session: Arc<RoomSessionService>,
    config: PresenceConfig,
) -> JoinHandle<()> {
    info!(interval = ?config.heartbeat_interval, lease_timeout_ms = config.lease_timeout_ms, "presence heartbeat configured");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let (Some(room_id), Some(user_id)) = (session.current_room_id(), session.current_user_id()) else {
                continue;
            };
            let now = now_ms();
            match refresh_lease(directory.as_ref(), &room_id, &user_id, now).await {
                Ok(true) => {}
                Ok(false) => debug!(%room_id, %user_id, "member record gone; lease not refreshed"),
                Err(err) => warn!(%room_id, error = %err, "lease refresh failed"),
            }
            if let Err(err) = sweep_expired_leases(directory.as_ref(), &room_id, now, config.lease_timeout_ms).await {
                warn!(%room_id, error = %err, "lease sweep failed");
            }
        }
    })
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
