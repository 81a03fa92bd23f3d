//! Room domain model: users, rooms, settings, and permission predicates.
//!
//! DESIGN
//! ======
//! These are owned snapshot values. Nothing here holds a reference into the
//! remote directory; the session service converts wire records into these
//! types on every read. All functions are pure and take `now` explicitly.

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::validation::{generate_room_code, generate_room_id, generate_user_id};

pub const DEFAULT_MAX_MEMBERS: usize = 10;

// =============================================================================
// SETTINGS
// =============================================================================

/// Per-room configuration, fixed at creation unless the host updates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    pub allow_guest_control: bool,
    pub require_approval: bool,
    pub chat_enabled: bool,
    pub max_chat_length: usize,
    pub auto_play: bool,
    /// Drift tolerated between local and remote playback positions.
    pub sync_tolerance_ms: u64,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            allow_guest_control: false,
            require_approval: false,
            chat_enabled: true,
            max_chat_length: 500,
            auto_play: true,
            sync_tolerance_ms: 1000,
        }
    }
}

/// Field-by-field overrides applied on top of `RoomSettings`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettingsOverrides {
    pub allow_guest_control: Option<bool>,
    pub require_approval: Option<bool>,
    pub chat_enabled: Option<bool>,
    pub max_chat_length: Option<usize>,
    pub auto_play: Option<bool>,
    pub sync_tolerance_ms: Option<u64>,
}

impl RoomSettings {
    #[must_use]
    pub fn merged(&self, overrides: &RoomSettingsOverrides) -> Self {
        Self {
            allow_guest_control: overrides.allow_guest_control.unwrap_or(self.allow_guest_control),
            require_approval: overrides.require_approval.unwrap_or(self.require_approval),
            chat_enabled: overrides.chat_enabled.unwrap_or(self.chat_enabled),
            max_chat_length: overrides.max_chat_length.unwrap_or(self.max_chat_length),
            auto_play: overrides.auto_play.unwrap_or(self.auto_play),
            sync_tolerance_ms: overrides.sync_tolerance_ms.unwrap_or(self.sync_tolerance_ms),
        }
    }
}

// =============================================================================
// USER / ROOM
// =============================================================================

/// A room member. `id` never changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub is_host: bool,
    pub is_online: bool,
    pub joined_at: Timestamp,
    pub last_seen: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub host_id: String,
    /// Unique by id. Ordered by join time when built from a snapshot.
    pub members: Vec<User>,
    pub created_at: Timestamp,
    /// Bumped on every membership or settings change. Sole expiry clock.
    pub updated_at: Timestamp,
    pub max_members: usize,
    pub is_private: bool,
    pub settings: RoomSettings,
}

/// Intent to create a room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub user_name: String,
    #[serde(default)]
    pub room_name: Option<String>,
    #[serde(default)]
    pub max_members: Option<usize>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub settings: RoomSettingsOverrides,
}

impl CreateRoomRequest {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self { user_name: user_name.into(), ..Self::default() }
    }
}

/// Intent to join an existing room by its shareable code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub room_code: String,
    pub user_name: String,
}

impl JoinRoomRequest {
    pub fn new(room_code: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self { room_code: room_code.into(), user_name: user_name.into() }
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Build a room with no members. The host joins separately.
#[must_use]
pub fn create_room(request: &CreateRoomRequest, host_id: &str, now: Timestamp) -> Room {
    Room {
        id: generate_room_id(),
        code: generate_room_code(),
        name: request
            .room_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(ToOwned::to_owned),
        host_id: host_id.to_owned(),
        members: Vec::new(),
        created_at: now,
        updated_at: now,
        max_members: request.max_members.unwrap_or(DEFAULT_MAX_MEMBERS),
        is_private: request.is_private,
        settings: RoomSettings::default().merged(&request.settings),
    }
}

#[must_use]
pub fn create_user(name: &str, is_host: bool, now: Timestamp) -> User {
    User {
        id: generate_user_id(),
        name: name.trim().to_owned(),
        avatar: None,
        is_host,
        is_online: true,
        joined_at: now,
        last_seen: now,
    }
}

// =============================================================================
// PERMISSIONS
// =============================================================================

/// Actions gated by `can_user_perform_action`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomAction {
    TransferHost,
    KickUser,
    UpdateRoomSettings,
    ControlVideo,
    SendMessage,
    /// Anything not listed above.
    Other(String),
}

/// Host-only actions need `is_host`; video control is open to guests when
/// the room allows it; chat follows `chat_enabled`. Unlisted actions are
/// allowed: the policy is an allow-list of restrictions, not of actions.
#[must_use]
pub fn can_user_perform_action(user: &User, room: &Room, action: &RoomAction) -> bool {
    match action {
        RoomAction::TransferHost | RoomAction::KickUser | RoomAction::UpdateRoomSettings => user.is_host,
        RoomAction::ControlVideo => user.is_host || room.settings.allow_guest_control,
        RoomAction::SendMessage => room.settings.chat_enabled,
        RoomAction::Other(_) => true,
    }
}

// =============================================================================
// LOOKUPS
// =============================================================================

#[must_use]
pub fn is_room_full(room: &Room) -> bool {
    room.members.len() >= room.max_members
}

#[must_use]
pub fn find_user_in_room<'a>(room: &'a Room, user_id: &str) -> Option<&'a User> {
    room.members.iter().find(|u| u.id == user_id)
}

/// Case-insensitive name lookup, ignoring surrounding whitespace.
#[must_use]
pub fn find_user_by_name<'a>(room: &'a Room, name: &str) -> Option<&'a User> {
    let wanted = name.trim().to_lowercase();
    room.members.iter().find(|u| u.name.trim().to_lowercase() == wanted)
}

#[must_use]
pub fn get_room_host(room: &Room) -> Option<&User> {
    room.members.iter().find(|u| u.is_host)
}

/// Earliest-joined member other than `leaving_id`, ties broken by id.
#[must_use]
pub fn elect_successor_host<'a>(members: &'a [User], leaving_id: &str) -> Option<&'a User> {
    members
        .iter()
        .filter(|u| u.id != leaving_id)
        .min_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)))
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
