//! Local room state and its reducer.
//!
//! DESIGN
//! ======
//! `reduce` is a total, pure function `(RoomState, RoomEvent) -> RoomState`.
//! Every event that depends on the clock carries its timestamp, so the
//! reducer never reads time and never performs I/O. Remote calls happen in
//! the services that produce events; `RoomStore` only holds the latest state
//! and tells listeners about it.
//!
//! Membership edits (`UpdateUser`, `TransferHost`) are optimistic local
//! projections applied after the remote write succeeded. `RoomSnapshot`
//! reconciles them: the authoritative snapshot always wins.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::directory::Subscription;
use crate::error::RoomError;
use crate::listeners::ListenerSet;
use crate::room::{Room, User};

// =============================================================================
// CONNECTION STATUS
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionStatus {
    /// Edges of the status graph. Staying put is not an edge.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionStatus::{Connected, Connecting, Disconnected, Error, Reconnecting};
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected | Error | Disconnected)
                | (Connected, Reconnecting | Error | Disconnected)
                | (Reconnecting, Connected | Error | Disconnected)
                | (Error, Connecting | Disconnected)
        )
    }
}

// =============================================================================
// STATE / EVENTS
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomState {
    pub room: Option<Room>,
    pub current_user: Option<User>,
    pub connection_status: ConnectionStatus,
    pub is_loading: bool,
    pub error: Option<RoomError>,
}

/// Partial update for one member. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub is_host: Option<bool>,
    pub is_online: Option<bool>,
    pub last_seen: Option<Timestamp>,
}

impl UserPatch {
    fn apply(&self, user: &mut User) {
        if let Some(name) = &self.name {
            user.name.clone_from(name);
        }
        if let Some(avatar) = &self.avatar {
            user.avatar = Some(avatar.clone());
        }
        if let Some(is_host) = self.is_host {
            user.is_host = is_host;
        }
        if let Some(is_online) = self.is_online {
            user.is_online = is_online;
        }
        if let Some(last_seen) = self.last_seen {
            user.last_seen = last_seen;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    CreateRoom { room: Room, user: User },
    JoinRoom { room: Room, user: User },
    LeaveRoom,
    UpdateUser { user_id: String, patch: UserPatch },
    TransferHost { new_host_id: String },
    UserConnected { user: User, at: Timestamp },
    UserDisconnected { user_id: String, at: Timestamp },
    ConnectionStatusChanged(ConnectionStatus),
    ErrorOccurred(RoomError),
    ClearError,
    SetLoading(bool),
    /// Authoritative room snapshot from the directory.
    RoomSnapshot(Room),
}

// =============================================================================
// REDUCER
// =============================================================================

#[must_use]
pub fn reduce(state: RoomState, event: RoomEvent) -> RoomState {
    match event {
        RoomEvent::CreateRoom { room, user } | RoomEvent::JoinRoom { room, user } => RoomState {
            room: Some(room),
            current_user: Some(user),
            connection_status: ConnectionStatus::Connected,
            is_loading: false,
            error: None,
        },
        RoomEvent::LeaveRoom => RoomState::default(),
        RoomEvent::UpdateUser { user_id, patch } => update_member(state, &user_id, |u| patch.apply(u)),
        RoomEvent::TransferHost { new_host_id } => transfer_host(state, &new_host_id),
        RoomEvent::UserConnected { user, at } => upsert_member(state, user, at),
        RoomEvent::UserDisconnected { user_id, at } => update_member(state, &user_id, |u| {
            u.is_online = false;
            u.last_seen = at;
        }),
        RoomEvent::ConnectionStatusChanged(next) => {
            if !state.connection_status.can_transition_to(next) {
                return state;
            }
            RoomState { connection_status: next, ..state }
        }
        RoomEvent::ErrorOccurred(error) => RoomState { error: Some(error), is_loading: false, ..state },
        RoomEvent::ClearError => RoomState { error: None, ..state },
        RoomEvent::SetLoading(is_loading) => RoomState { is_loading, ..state },
        RoomEvent::RoomSnapshot(room) => apply_snapshot(state, room),
    }
}

/// Apply `f` to the member with `user_id` and to `current_user` when it is
/// that member. Unknown ids leave state unchanged.
fn update_member(mut state: RoomState, user_id: &str, f: impl Fn(&mut User)) -> RoomState {
    if let Some(room) = state.room.as_mut() {
        for member in room.members.iter_mut().filter(|u| u.id == user_id) {
            f(member);
        }
    }
    if let Some(user) = state.current_user.as_mut().filter(|u| u.id == user_id) {
        f(user);
    }
    state
}

fn transfer_host(mut state: RoomState, new_host_id: &str) -> RoomState {
    let Some(room) = state.room.as_mut() else {
        return state;
    };
    if !room.members.iter().any(|u| u.id == new_host_id) {
        return state;
    }
    room.host_id = new_host_id.to_owned();
    for member in &mut room.members {
        member.is_host = member.id == new_host_id;
    }
    if let Some(user) = state.current_user.as_mut() {
        user.is_host = user.id == new_host_id;
    }
    state
}

fn upsert_member(mut state: RoomState, user: User, at: Timestamp) -> RoomState {
    let Some(room) = state.room.as_mut() else {
        return state;
    };
    let incoming = User { is_online: true, last_seen: at, ..user };
    match room.members.iter_mut().find(|u| u.id == incoming.id) {
        Some(existing) => *existing = incoming.clone(),
        None => room.members.push(incoming.clone()),
    }
    if let Some(current) = state.current_user.as_mut().filter(|u| u.id == incoming.id) {
        *current = incoming;
    }
    state
}

fn apply_snapshot(mut state: RoomState, room: Room) -> RoomState {
    if let Some(current) = state.current_user.as_mut() {
        if let Some(fresh) = room.members.iter().find(|u| u.id == current.id) {
            *current = fresh.clone();
        }
    }
    state.room = Some(room);
    state
}

// =============================================================================
// STORE
// =============================================================================

pub type StateListener = dyn Fn(&RoomState) + Send + Sync;

/// Dispatcher: holds the latest state, reduces events, notifies listeners.
#[derive(Default)]
pub struct RoomStore {
    state: Mutex<RoomState>,
    listeners: ListenerSet<StateListener>,
}

impl RoomStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reduce `event` into the held state and return the new state.
    pub fn dispatch(&self, event: RoomEvent) -> RoomState {
        let next = {
            let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let next = reduce(std::mem::take(&mut *guard), event);
            guard.clone_from(&next);
            next
        };
        for listener in self.listeners.snapshot() {
            listener(&next);
        }
        next
    }

    #[must_use]
    pub fn state(&self) -> RoomState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn subscribe(&self, listener: impl Fn(&RoomState) + Send + Sync + 'static) -> Subscription {
        self.listeners.insert(Arc::new(listener))
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
