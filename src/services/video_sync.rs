//! Video sync engine: shared playback state for the joined room.
//!
//! DESIGN
//! ======
//! Each room has one `videoState` record. Publishing is read-modify-write:
//! fetch the latest record, change only the fields the action owns, stamp
//! `lastUpdated`/`updatedBy`, and overwrite. The same event is then written
//! to `videoSync` for clients that only care about the latest verb.
//!
//! Every remote change passes two filters before reaching callbacks:
//! - self-echo: records written by this member are dropped
//! - staleness: records older than `staleness_ms` on receipt are dropped
//!
//! Surviving records are classified by their `action` tag. Records without
//! a tag fall back to shape: `url` present means load, playing means play,
//! anything else is pause. A seek while paused is therefore only visible as
//! a seek to peers that read the tag.
//!
//! TRADE-OFFS
//! ==========
//! Last write wins. Two members publishing at once converge on whichever
//! write lands last; the loser's local player is corrected by its own
//! subscription. There is no drift correction loop here; `is_in_sync`
//! only reports whether two positions are within the room's tolerance.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::clock::{Timestamp, now_ms};
use crate::config::VideoSyncConfig;
use crate::directory::records::{VideoAction, VideoState, VideoSyncEvent, from_value, to_value};
use crate::directory::{RemoteDirectory, Subscription, paths};
use crate::error::{RoomError, RoomErrorCode, RoomResult};
use crate::listeners::ListenerSet;
use crate::room::{RoomAction, RoomSettings, can_user_perform_action, find_user_in_room};
use crate::services::session::RoomSessionService;

/// Callback for remote playback changes that passed the filters.
pub type VideoStateListener = dyn Fn(&VideoSyncEvent) + Send + Sync;

/// Classify a record by its tag, falling back to its shape.
#[must_use]
pub fn classify(state: &VideoState) -> VideoAction {
    if let Some(action) = state.action {
        return action;
    }
    if state.url.is_some() {
        VideoAction::Load
    } else if state.is_playing {
        VideoAction::Play
    } else {
        VideoAction::Pause
    }
}

struct BoundRoom {
    room_id: String,
    user_id: String,
    sync_tolerance_ms: u64,
    subscription: Subscription,
}

struct EngineInner {
    directory: Arc<dyn RemoteDirectory>,
    session: Arc<RoomSessionService>,
    config: VideoSyncConfig,
    bound: Mutex<Option<BoundRoom>>,
    current: Mutex<Option<VideoState>>,
    listeners: ListenerSet<VideoStateListener>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EngineInner {
    fn self_id(&self) -> Option<String> {
        lock(&self.bound).as_ref().map(|b| b.user_id.clone())
    }

    fn handle_remote_state_at(&self, state: VideoState, now: Timestamp) -> Option<VideoSyncEvent> {
        *lock(&self.current) = Some(state.clone());

        if self.self_id().as_deref() == Some(state.updated_by.as_str()) {
            debug!(updated_by = %state.updated_by, "dropping own playback echo");
            return None;
        }
        let age = now - state.last_updated;
        if age > self.config.staleness_ms {
            debug!(age_ms = age, updated_by = %state.updated_by, "dropping stale playback update");
            return None;
        }

        let event = VideoSyncEvent {
            action: classify(&state),
            current_time: state.current_time,
            url: state.url,
            timestamp: state.last_updated,
            user_id: state.updated_by,
        };
        for listener in self.listeners.snapshot() {
            listener(&event);
        }
        Some(event)
    }
}

// =============================================================================
// ENGINE
// =============================================================================

pub struct VideoSyncEngine {
    inner: Arc<EngineInner>,
}

impl VideoSyncEngine {
    pub fn new(directory: Arc<dyn RemoteDirectory>, session: Arc<RoomSessionService>, config: VideoSyncConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                directory,
                session,
                config,
                bound: Mutex::new(None),
                current: Mutex::new(None),
                listeners: ListenerSet::new(),
            }),
        }
    }

    /// Bind to the session's current room: seed the local copy of the
    /// playback record and subscribe to changes. Rebinding drops the
    /// previous subscription first.
    ///
    /// # Errors
    ///
    /// `VALIDATION_ERROR` when the session is not in a room,
    /// `ROOM_NOT_FOUND` when the room is gone, `CONNECTION_FAILED` on
    /// directory failure.
    pub async fn initialize(&self) -> RoomResult<()> {
        self.detach();
        let (Some(room_id), Some(user_id)) =
            (self.inner.session.current_room_id(), self.inner.session.current_user_id())
        else {
            return Err(RoomError::validation("Join a room before starting video sync"));
        };
        let room = self
            .inner
            .session
            .current_room()
            .await?
            .ok_or_else(|| RoomError::new(RoomErrorCode::RoomNotFound, "Room no longer exists"))?;

        let path = paths::video_state(&room_id);
        let seeded = match self.inner.directory.read(&path).await? {
            Some(value) => Some(from_value::<VideoState>(&path, value)?),
            None => None,
        };
        *lock(&self.inner.current) = seeded;

        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let decode_path = path.clone();
        let subscription = self.inner.directory.subscribe(
            &path,
            Arc::new(move |value: Option<Value>| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match value.map(|v| from_value::<VideoState>(&decode_path, v)) {
                    Some(Ok(state)) => {
                        inner.handle_remote_state_at(state, now_ms());
                    }
                    Some(Err(err)) => debug!(error = %err, "ignoring malformed playback record"),
                    None => *lock(&inner.current) = None,
                }
            }),
        )?;

        *lock(&self.inner.bound) = Some(BoundRoom {
            room_id: room_id.clone(),
            user_id,
            sync_tolerance_ms: room.settings.sync_tolerance_ms,
            subscription,
        });
        info!(room_id = %room_id, "video sync initialized");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // publish
    // -------------------------------------------------------------------------

    /// # Errors
    ///
    /// See [`VideoSyncEngine::sync_load`].
    pub async fn sync_play(&self, current_time: f64) -> RoomResult<VideoState> {
        self.publish(VideoAction::Play, current_time, None).await
    }

    /// # Errors
    ///
    /// See [`VideoSyncEngine::sync_load`].
    pub async fn sync_pause(&self, current_time: f64) -> RoomResult<VideoState> {
        self.publish(VideoAction::Pause, current_time, None).await
    }

    /// Move the shared position without changing play/pause.
    ///
    /// # Errors
    ///
    /// See [`VideoSyncEngine::sync_load`].
    pub async fn sync_seek(&self, current_time: f64) -> RoomResult<VideoState> {
        self.publish(VideoAction::Seek, current_time, None).await
    }

    /// Load `url` paused at `current_time`.
    ///
    /// # Errors
    ///
    /// `VALIDATION_ERROR` before `initialize`, `PERMISSION_DENIED` when the
    /// member may not control playback, `CONNECTION_FAILED` on directory
    /// failure.
    pub async fn sync_load(&self, url: &str, current_time: f64) -> RoomResult<VideoState> {
        self.publish(VideoAction::Load, current_time, Some(url.to_owned())).await
    }

    async fn publish(&self, action: VideoAction, current_time: f64, url: Option<String>) -> RoomResult<VideoState> {
        let Some((room_id, user_id)) = lock(&self.inner.bound).as_ref().map(|b| (b.room_id.clone(), b.user_id.clone()))
        else {
            return Err(RoomError::validation("Video sync is not initialized"));
        };

        let room = self
            .inner
            .session
            .current_room()
            .await?
            .ok_or_else(|| RoomError::new(RoomErrorCode::RoomNotFound, "Room no longer exists"))?;
        let allowed = find_user_in_room(&room, &user_id)
            .is_some_and(|user| can_user_perform_action(user, &room, &RoomAction::ControlVideo));
        if !allowed {
            return Err(RoomError::new(RoomErrorCode::PermissionDenied, "Only the host can control playback"));
        }

        let path = paths::video_state(&room_id);
        let now = now_ms();
        let mut state = match self.inner.directory.read(&path).await? {
            Some(value) => from_value::<VideoState>(&path, value)?,
            None => VideoState::initial(&user_id, now),
        };
        state.current_time = current_time;
        match action {
            VideoAction::Play => state.is_playing = true,
            VideoAction::Pause => state.is_playing = false,
            VideoAction::Seek => {}
            VideoAction::Load => {
                state.url = url;
                state.is_playing = false;
            }
        }
        state.last_updated = now;
        state.updated_by.clone_from(&user_id);
        state.action = Some(action);

        self.inner.directory.write(&path, to_value(&path, &state)?).await?;
        let event = VideoSyncEvent {
            action,
            current_time,
            url: state.url.clone(),
            timestamp: now,
            user_id,
        };
        let sync_path = paths::video_sync(&room_id);
        self.inner.directory.write(&sync_path, to_value(&sync_path, &event)?).await?;

        *lock(&self.inner.current) = Some(state.clone());
        debug!(room_id = %room_id, ?action, current_time, "playback published");
        Ok(state)
    }

    // -------------------------------------------------------------------------
    // subscribe / query
    // -------------------------------------------------------------------------

    pub fn on_video_state_change(&self, listener: impl Fn(&VideoSyncEvent) + Send + Sync + 'static) -> Subscription {
        self.inner.listeners.insert(Arc::new(listener))
    }

    /// Run the echo and staleness filters on `state` as if it had arrived at
    /// `now`, then classify and notify.
    pub fn handle_remote_state_at(&self, state: VideoState, now: Timestamp) -> Option<VideoSyncEvent> {
        self.inner.handle_remote_state_at(state, now)
    }

    /// Latest playback record seen, local or remote.
    #[must_use]
    pub fn current_video_state(&self) -> Option<VideoState> {
        lock(&self.inner.current).clone()
    }

    /// Whether two positions, in seconds, are within the room's tolerance.
    #[must_use]
    pub fn is_in_sync(&self, local_time: f64, remote_time: f64) -> bool {
        let tolerance_ms = lock(&self.inner.bound)
            .as_ref()
            .map_or(RoomSettings::default().sync_tolerance_ms, |b| b.sync_tolerance_ms);
        (local_time - remote_time).abs() <= Duration::from_millis(tolerance_ms).as_secs_f64()
    }

    /// Detach from the room: drop the subscription, every registered
    /// callback, and the local playback copy.
    pub fn cleanup(&self) {
        self.detach();
        self.inner.listeners.clear();
        *lock(&self.inner.current) = None;
    }

    fn detach(&self) {
        let bound = lock(&self.inner.bound).take();
        if let Some(bound) = bound {
            debug!(room_id = %bound.room_id, "video sync detached");
            drop(bound.subscription);
        }
    }
}

#[cfg(test)]
#[path = "video_sync_test.rs"]
mod tests;
