//! Locally persisted client preferences.
//!
//! SYSTEM CONTEXT
//! ==============
//! The display name, recently joined rooms, and a session identifier
//! survive restarts as one JSON file. The contents are opaque to the rest
//! of the crate: anything missing, unreadable, or unparsable loads as the
//! default, and a failed save is logged, never surfaced.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::Timestamp;

pub const MAX_RECENT_ROOMS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentRoom {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub joined_at: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub display_name: Option<String>,
    /// Newest first, unique by code.
    pub recent_rooms: Vec<RecentRoom>,
    pub session_id: Option<String>,
}

impl Preferences {
    #[must_use]
    pub fn load(path: &Path) -> Self {
        load_json(path).unwrap_or_default()
    }

    pub fn save(&self, path: &Path) {
        save_json(path, self);
    }

    /// Move `code` to the front of the recent list, keeping at most
    /// `MAX_RECENT_ROOMS` entries.
    pub fn remember_room(&mut self, code: &str, name: Option<&str>, joined_at: Timestamp) {
        self.recent_rooms.retain(|r| !r.code.eq_ignore_ascii_case(code));
        self.recent_rooms.insert(
            0,
            RecentRoom { code: code.to_owned(), name: name.map(ToOwned::to_owned), joined_at },
        );
        self.recent_rooms.truncate(MAX_RECENT_ROOMS);
    }
}

/// Load a JSON value from `path`. Missing or malformed files yield `None`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring unparsable preferences");
            None
        }
    }
}

/// Save a JSON value to `path`, logging failures.
pub fn save_json<T: Serialize>(path: &Path, value: &T) {
    let raw = match serde_json::to_string_pretty(value) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(error = %err, "preferences did not serialize");
            return;
        }
    };
    if let Err(err) = std::fs::write(path, raw) {
        warn!(path = %path.display(), error = %err, "failed to save preferences");
    }
}

#[cfg(test)]
#[path = "preferences_test.rs"]
mod tests;
