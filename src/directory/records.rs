//! Wire records stored in the directory and their conversion to domain types.
//!
//! Field names are camelCase on the wire. Members live in a map keyed by
//! user id so each member has its own path (and its own disconnect hook);
//! the domain `Room` holds them as a list ordered by join time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::clock::Timestamp;
use crate::error::DirectoryError;
use crate::room::{Room, RoomSettings, User};

// =============================================================================
// VIDEO
// =============================================================================

/// Playback control verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoAction {
    Play,
    Pause,
    Seek,
    Load,
}

/// The single shared playback record per room. Last write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub current_time: f64,
    pub is_playing: bool,
    pub last_updated: Timestamp,
    pub updated_by: String,
    /// Verb of the write that produced this record. Absent on records from
    /// writers that predate the tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<VideoAction>,
}

impl VideoState {
    /// Record written when a room is created: nothing loaded, paused at zero.
    #[must_use]
    pub fn initial(updated_by: &str, now: Timestamp) -> Self {
        Self {
            url: None,
            current_time: 0.0,
            is_playing: false,
            last_updated: now,
            updated_by: updated_by.to_owned(),
            action: None,
        }
    }
}

/// Latest playback event per room, overwritten on every publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSyncEvent {
    pub action: VideoAction,
    pub current_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub timestamp: Timestamp,
    pub user_id: String,
}

// =============================================================================
// ROOM
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub id: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub host_id: String,
    #[serde(default)]
    pub members: BTreeMap<String, User>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub max_members: usize,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub settings: RoomSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_state: Option<VideoState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_sync: Option<VideoSyncEvent>,
}

impl RoomRecord {
    #[must_use]
    pub fn from_room(room: &Room, video_state: Option<VideoState>) -> Self {
        Self {
            id: room.id.clone(),
            code: room.code.clone(),
            name: room.name.clone(),
            host_id: room.host_id.clone(),
            members: room.members.iter().map(|u| (u.id.clone(), u.clone())).collect(),
            created_at: room.created_at,
            updated_at: room.updated_at,
            max_members: room.max_members,
            is_private: room.is_private,
            settings: room.settings.clone(),
            video_state,
            video_sync: None,
        }
    }

    /// Snapshot into the domain model, members ordered by join time.
    #[must_use]
    pub fn into_room(self) -> Room {
        let mut members: Vec<User> = self.members.into_values().collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
        Room {
            id: self.id,
            code: self.code,
            name: self.name,
            host_id: self.host_id,
            members,
            created_at: self.created_at,
            updated_at: self.updated_at,
            max_members: self.max_members,
            is_private: self.is_private,
            settings: self.settings,
        }
    }
}

// =============================================================================
// CODEC
// =============================================================================

pub fn to_value<T: Serialize>(path: &str, record: &T) -> Result<Value, DirectoryError> {
    serde_json::to_value(record).map_err(|source| DirectoryError::Malformed { path: path.to_owned(), source })
}

pub fn from_value<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, DirectoryError> {
    serde_json::from_value(value).map_err(|source| DirectoryError::Malformed { path: path.to_owned(), source })
}

/// Decode every child of `rooms` that parses as a room record.
///
/// Children that do not parse are skipped, such as a node left holding only
/// a late member write after its room was removed.
#[must_use]
pub fn decode_rooms(snapshot: Option<Value>) -> Vec<RoomRecord> {
    let Some(Value::Object(children)) = snapshot else {
        return Vec::new();
    };
    children
        .into_iter()
        .filter_map(|(_, child)| serde_json::from_value::<RoomRecord>(child).ok())
        .collect()
}

/// Decode a `members` snapshot into users ordered by join time, skipping
/// entries that do not parse.
#[must_use]
pub fn decode_members(snapshot: Option<Value>) -> Vec<User> {
    let Some(Value::Object(children)) = snapshot else {
        return Vec::new();
    };
    let mut members: Vec<User> = children
        .into_iter()
        .filter_map(|(_, child)| serde_json::from_value::<User>(child).ok())
        .collect();
    members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
    members
}

#[cfg(test)]
#[path = "records_test.rs"]
mod tests;
