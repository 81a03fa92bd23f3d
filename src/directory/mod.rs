//! Remote room directory: the broadcast key-value store the core runs on.
//!
//! ARCHITECTURE
//! ============
//! The directory is a hierarchical JSON store addressed by slash paths:
//! - `rooms/{roomId}`                    room record
//! - `rooms/{roomId}/members/{userId}`  member record
//! - `rooms/{roomId}/videoState`         shared playback record
//! - `rooms/{roomId}/videoSync`          latest playback event
//!
//! Writes overwrite, last write wins per path, and nothing orders writes
//! across paths. `on_disconnect_remove` registers a removal the store runs
//! by itself when this client's transport drops, until withdrawn with
//! `cancel_disconnect_remove`.
//!
//! Subscribers see subsequent changes only. The value handed to a callback
//! is the full snapshot at the subscribed path, `None` once it is gone.

pub mod memory;
pub mod records;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DirectoryError;

pub use memory::{MemoryConnection, MemoryDirectory};

/// Change notification callback. Receives the new snapshot at the path.
pub type ChangeCallback = Arc<dyn Fn(Option<Value>) + Send + Sync>;

#[async_trait]
pub trait RemoteDirectory: Send + Sync {
    /// Overwrite the value at `path`. Writing `null` removes it.
    async fn write(&self, path: &str, value: Value) -> Result<(), DirectoryError>;

    async fn read(&self, path: &str) -> Result<Option<Value>, DirectoryError>;

    async fn remove(&self, path: &str) -> Result<(), DirectoryError>;

    /// Register `on_change` for changes at or below `path`.
    fn subscribe(&self, path: &str, on_change: ChangeCallback) -> Result<Subscription, DirectoryError>;

    /// Ask the store to remove `path` if this client's transport drops.
    async fn on_disconnect_remove(&self, path: &str) -> Result<(), DirectoryError>;

    /// Withdraw a removal registered with `on_disconnect_remove`. Unknown
    /// paths are ignored.
    async fn cancel_disconnect_remove(&self, path: &str) -> Result<(), DirectoryError>;
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Handle for an active listener. Dropping it detaches the listener.
#[must_use = "dropping a Subscription detaches the listener immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self { cancel: Some(Box::new(cancel)) }
    }

    /// Detach now. Equivalent to dropping the handle.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("active", &self.cancel.is_some()).finish()
    }
}

// =============================================================================
// PATHS
// =============================================================================

pub mod paths {
    pub const ROOMS: &str = "rooms";

    #[must_use]
    pub fn room(room_id: &str) -> String {
        format!("{ROOMS}/{room_id}")
    }

    #[must_use]
    pub fn members(room_id: &str) -> String {
        format!("{ROOMS}/{room_id}/members")
    }

    #[must_use]
    pub fn member(room_id: &str, user_id: &str) -> String {
        format!("{ROOMS}/{room_id}/members/{user_id}")
    }

    #[must_use]
    pub fn updated_at(room_id: &str) -> String {
        format!("{ROOMS}/{room_id}/updatedAt")
    }

    #[must_use]
    pub fn host_id(room_id: &str) -> String {
        format!("{ROOMS}/{room_id}/hostId")
    }

    #[must_use]
    pub fn settings(room_id: &str) -> String {
        format!("{ROOMS}/{room_id}/settings")
    }

    #[must_use]
    pub fn video_state(room_id: &str) -> String {
        format!("{ROOMS}/{room_id}/videoState")
    }

    #[must_use]
    pub fn video_sync(room_id: &str) -> String {
        format!("{ROOMS}/{room_id}/videoSync")
    }

    /// Split a path into non-empty segments.
    #[must_use]
    pub fn segments(path: &str) -> Vec<&str> {
        path.split('/').filter(|s| !s.is_empty()).collect()
    }
}
