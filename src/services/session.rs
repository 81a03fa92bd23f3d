//! Room session service: create, join, leave, and host-only room edits.
//!
//! ARCHITECTURE
//! ============
//! One `RoomSessionService` per client session. It owns the local session
//! pointer (which room, which member) and the single room listener armed
//! for that room. Every remote call goes through the injected
//! `RemoteDirectory`; every policy decision goes through `SecurityPolicy`.
//!
//! TRADE-OFFS
//! ==========
//! The directory has no transactions. Capacity and duplicate-name checks
//! read the latest membership and then write, so two clients racing into
//! the last seat can both succeed. The in-flight creation guard is a flag,
//! not a queue: an overlapping `create_room` is rejected, never deferred.
//!
//! ERROR HANDLING
//! ==============
//! Every method returns `RoomResult`. Directory failures are converted to
//! `CONNECTION_FAILED` via `From<DirectoryError>`, and create/join past
//! `operation_timeout` surface the same code.
//!
//! Create and join set the session pointer before their first remote write.
//! When either fails after that point, the partial work is rolled back
//! through `leave_room`, which also releases the security bookkeeping.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::clock::{Timestamp, now_ms};
use crate::config::SessionConfig;
use crate::directory::records::{RoomRecord, VideoState, decode_members, decode_rooms, from_value, to_value};
use crate::directory::{RemoteDirectory, Subscription, paths};
use crate::error::{RoomError, RoomErrorCode, RoomResult};
use crate::listeners::ListenerSet;
use crate::room::{
    CreateRoomRequest, JoinRoomRequest, Room, RoomAction, RoomSettingsOverrides, User, can_user_perform_action,
    create_room, create_user, elect_successor_host, find_user_by_name, find_user_in_room,
};
use crate::security::SecurityPolicy;
use crate::validation::{
    generate_room_code, normalize_room_code, sanitize_input, validate_room_code, validate_room_name,
    validate_user_name,
};

/// Callback for room snapshots. `None` means the room record is gone.
pub type RoomListener = dyn Fn(Option<&Room>) + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SessionPointer {
    room_id: String,
    user_id: String,
    /// Whether `on_disconnect_remove` was registered for this member.
    disconnect_hook: bool,
}

/// Holds the in-flight creation flag; releases it on drop, including when
/// the creating future is cancelled or times out.
struct CreationGuard<'a>(&'a AtomicBool);

impl<'a> CreationGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then_some(Self(flag))
    }
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// SERVICE
// =============================================================================

pub struct RoomSessionService {
    directory: Arc<dyn RemoteDirectory>,
    security: SecurityPolicy,
    client_id: String,
    config: SessionConfig,
    current: Mutex<Option<SessionPointer>>,
    creating: AtomicBool,
    listeners: ListenerSet<RoomListener>,
    room_subscription: Mutex<Option<Subscription>>,
}

impl RoomSessionService {
    pub fn new(
        directory: Arc<dyn RemoteDirectory>,
        security: SecurityPolicy,
        client_id: impl Into<String>,
        config: SessionConfig,
    ) -> Self {
        Self {
            directory,
            security,
            client_id: client_id.into(),
            config,
            current: Mutex::new(None),
            creating: AtomicBool::new(false),
            listeners: ListenerSet::new(),
            room_subscription: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn current_user_id(&self) -> Option<String> {
        lock(&self.current).as_ref().map(|p| p.user_id.clone())
    }

    #[must_use]
    pub fn current_room_id(&self) -> Option<String> {
        lock(&self.current).as_ref().map(|p| p.room_id.clone())
    }

    /// Register a callback for snapshots of the current room.
    ///
    /// Registrations survive leave and rejoin; they are fed by whichever
    /// room listener is armed at the time.
    pub fn on_room_update(&self, listener: impl Fn(Option<&Room>) + Send + Sync + 'static) -> Subscription {
        self.listeners.insert(Arc::new(listener))
    }

    /// Fresh snapshot of the current room, `None` when not in one.
    ///
    /// # Errors
    ///
    /// Returns `CONNECTION_FAILED` if the directory read fails.
    pub async fn current_room(&self) -> RoomResult<Option<Room>> {
        let Some(pointer) = self.pointer() else {
            return Ok(None);
        };
        self.fetch_room(&pointer.room_id).await
    }

    // -------------------------------------------------------------------------
    // create
    // -------------------------------------------------------------------------

    /// Create a room hosted by a new member named `request.user_name`.
    ///
    /// # Errors
    ///
    /// - `INVALID_USER_NAME` / `VALIDATION_ERROR` for bad names
    /// - `VALIDATION_ERROR` while another creation is in flight
    /// - `NETWORK_ERROR` / `PERMISSION_DENIED` from the security policy
    /// - `CONNECTION_FAILED` on directory failure or timeout
    pub async fn create_room(&self, request: CreateRoomRequest) -> RoomResult<Room> {
        let mut request = request;
        request.user_name = sanitize_input(&request.user_name);
        require_valid(validate_user_name(&request.user_name).errors, RoomErrorCode::InvalidUserName)?;
        if let Some(room_name) = request.room_name.as_deref() {
            let room_name = sanitize_input(room_name);
            require_valid(validate_room_name(&room_name).errors, RoomErrorCode::ValidationError)?;
            request.room_name = Some(room_name);
        }
        if request.max_members == Some(0) {
            return Err(RoomError::validation("A room must allow at least one member"));
        }

        let Some(_guard) = CreationGuard::acquire(&self.creating) else {
            debug!(client_id = %self.client_id, "overlapping room creation rejected");
            return Err(RoomError::validation("A room is already being created"));
        };

        let now = now_ms();
        let host = create_user(&request.user_name, true, now);
        self.security.validate_secure_room_creation_at(&host.id, &self.client_id, now)?;

        let result = self.bounded("create_room", self.create_remote(&request, host, now)).await;
        if let Err(err) = &result {
            warn!(client_id = %self.client_id, code = %err.code, error = %err.message, "room creation failed");
            self.roll_back("create_room").await;
        }
        result
    }

    async fn create_remote(&self, request: &CreateRoomRequest, host: User, now: Timestamp) -> RoomResult<Room> {
        self.leave_room().await?;

        let taken: HashSet<String> = decode_rooms(self.directory.read(paths::ROOMS).await?)
            .into_iter()
            .map(|r| r.code)
            .collect();

        let mut room = create_room(request, &host.id, now);
        let mut attempts = 1;
        while taken.contains(&room.code) {
            if attempts >= self.config.code_max_attempts {
                return Err(RoomError::connection_failed("Could not allocate a unique room code"));
            }
            room.code = generate_room_code();
            attempts += 1;
        }
        room.members.push(host.clone());

        let path = paths::room(&room.id);
        let record = RoomRecord::from_room(&room, Some(VideoState::initial(&host.id, now)));
        let value = to_value(&path, &record)?;

        self.set_pointer(&room.id, &host.id);
        self.security.track_room_at(&self.client_id, &host.id, &room.id, now);
        self.directory.write(&path, value).await?;
        self.arm_disconnect_hook(&room.id, &host.id).await?;
        self.arm_room_listener(&room.id)?;
        info!(room_id = %room.id, room_code = %room.code, user_id = %host.id, "room created");
        Ok(room)
    }

    // -------------------------------------------------------------------------
    // join
    // -------------------------------------------------------------------------

    /// Join the room whose code matches `request.room_code` (any case).
    ///
    /// # Errors
    ///
    /// - `INVALID_ROOM_CODE` / `INVALID_USER_NAME` for malformed input
    /// - `ROOM_NOT_FOUND`, `ROOM_FULL`, `NETWORK_ERROR`, `PERMISSION_DENIED`
    ///   from the security policy
    /// - `USER_ALREADY_EXISTS` when the name is taken, ignoring case
    /// - `CONNECTION_FAILED` on directory failure or timeout
    pub async fn join_room(&self, request: JoinRoomRequest) -> RoomResult<Room> {
        let code = normalize_room_code(&sanitize_input(&request.room_code));
        require_valid(validate_room_code(&code).errors, RoomErrorCode::InvalidRoomCode)?;
        let user_name = sanitize_input(&request.user_name);
        require_valid(validate_user_name(&user_name).errors, RoomErrorCode::InvalidUserName)?;

        let result = self.bounded("join_room", self.join_remote(&code, &user_name)).await;
        if let Err(err) = &result {
            warn!(client_id = %self.client_id, room_code = %code, code = %err.code, "join failed");
            self.roll_back("join_room").await;
        }
        result
    }

    async fn join_remote(&self, code: &str, user_name: &str) -> RoomResult<Room> {
        self.leave_room().await?;

        let found = decode_rooms(self.directory.read(paths::ROOMS).await?)
            .into_iter()
            .find(|r| r.code.eq_ignore_ascii_case(code));
        let room = match found {
            Some(record) => {
                // The scan may be stale; membership is re-read on its own path.
                let members = decode_members(self.directory.read(&paths::members(&record.id)).await?);
                let mut room = record.into_room();
                room.members = members;
                Some(room).filter(|r| !r.members.is_empty())
            }
            None => None,
        };

        let now = now_ms();
        let user = create_user(user_name, false, now);
        self.security
            .validate_secure_room_join_at(code, &user.id, &self.client_id, room.as_ref(), now)?;
        let Some(mut room) = room else {
            return Err(RoomError::at(RoomErrorCode::RoomNotFound, format!("Room {code} not found"), now));
        };

        if find_user_by_name(&room, user_name).is_some() {
            self.security.release_room_at(&self.client_id, &room.id, now);
            return Err(RoomError::at(
                RoomErrorCode::UserAlreadyExists,
                format!("The name {user_name} is already taken in this room"),
                now,
            ));
        }

        self.set_pointer(&room.id, &user.id);
        self.write_member(&room.id, &user).await?;
        self.touch(&room.id, now).await?;
        self.arm_disconnect_hook(&room.id, &user.id).await?;
        self.arm_room_listener(&room.id)?;
        room.members.push(user.clone());
        room.updated_at = now;
        info!(room_id = %room.id, user_id = %user.id, members = room.members.len(), "joined room");
        Ok(room)
    }

    // -------------------------------------------------------------------------
    // leave
    // -------------------------------------------------------------------------

    /// Leave the current room. Succeeds without doing anything when not in one.
    ///
    /// The room listener is detached before any remote call. A leaving host
    /// hands the room to the earliest-joined remaining member; the last
    /// member out removes the room record. Once the member is gone its
    /// disconnect hook is withdrawn.
    ///
    /// # Errors
    ///
    /// Returns `CONNECTION_FAILED` if a directory call fails. The local
    /// session is cleared regardless.
    pub async fn leave_room(&self) -> RoomResult<()> {
        let Some(pointer) = lock(&self.current).take() else {
            return Ok(());
        };
        self.detach_room_listener();
        self.security.release_room(&self.client_id, &pointer.room_id);
        let result = match self.leave_remote(&pointer).await {
            Ok(()) if pointer.disconnect_hook => self
                .directory
                .cancel_disconnect_remove(&paths::member(&pointer.room_id, &pointer.user_id))
                .await
                .map_err(RoomError::from),
            other => other,
        };
        if result.is_ok() {
            info!(room_id = %pointer.room_id, user_id = %pointer.user_id, "left room");
        }
        result
    }

    async fn leave_remote(&self, pointer: &SessionPointer) -> RoomResult<()> {
        let Some(room) = self.fetch_room(&pointer.room_id).await? else {
            return Ok(());
        };
        let remaining: Vec<&User> = room.members.iter().filter(|u| u.id != pointer.user_id).collect();
        if remaining.is_empty() {
            self.directory.remove(&paths::room(&room.id)).await?;
            debug!(room_id = %room.id, "last member left; room removed");
            return Ok(());
        }

        self.directory.remove(&paths::member(&room.id, &pointer.user_id)).await?;
        let now = now_ms();
        if room.host_id == pointer.user_id {
            if let Some(successor) = elect_successor_host(&room.members, &pointer.user_id) {
                let mut successor = successor.clone();
                successor.is_host = true;
                self.write_member(&room.id, &successor).await?;
                self.directory.write(&paths::host_id(&room.id), json!(successor.id)).await?;
                info!(room_id = %room.id, new_host = %successor.id, "host left; host reassigned");
            }
        }
        self.touch(&room.id, now).await
    }

    // -------------------------------------------------------------------------
    // host-only edits
    // -------------------------------------------------------------------------

    /// Hand the host role to another member.
    ///
    /// # Errors
    ///
    /// `HOST_REQUIRED` when the caller is not the host, `VALIDATION_ERROR`
    /// when `new_host_id` is not a member.
    pub async fn transfer_host(&self, new_host_id: &str) -> RoomResult<Room> {
        let (pointer, mut room) = self.authorize(&RoomAction::TransferHost).await?;
        if new_host_id == pointer.user_id {
            return Ok(room);
        }
        if find_user_in_room(&room, new_host_id).is_none() {
            return Err(RoomError::validation(format!("User {new_host_id} is not in this room")));
        }

        let now = now_ms();
        for member in &mut room.members {
            if member.id == pointer.user_id || member.id == new_host_id {
                member.is_host = member.id == new_host_id;
                self.write_member(&room.id, member).await?;
            }
        }
        self.directory.write(&paths::host_id(&room.id), json!(new_host_id)).await?;
        self.touch(&room.id, now).await?;
        room.host_id = new_host_id.to_owned();
        room.updated_at = now;
        info!(room_id = %room.id, from = %pointer.user_id, to = %new_host_id, "host transferred");
        Ok(room)
    }

    /// Remove another member from the room.
    ///
    /// # Errors
    ///
    /// `HOST_REQUIRED` when the caller is not the host, `VALIDATION_ERROR`
    /// when the target is the caller or not a member.
    pub async fn kick_user(&self, user_id: &str) -> RoomResult<Room> {
        let (pointer, mut room) = self.authorize(&RoomAction::KickUser).await?;
        if user_id == pointer.user_id {
            return Err(RoomError::validation("Use leave to remove yourself"));
        }
        if find_user_in_room(&room, user_id).is_none() {
            return Err(RoomError::validation(format!("User {user_id} is not in this room")));
        }

        let now = now_ms();
        self.directory.remove(&paths::member(&room.id, user_id)).await?;
        self.touch(&room.id, now).await?;
        room.members.retain(|u| u.id != user_id);
        room.updated_at = now;
        info!(room_id = %room.id, user_id, "member kicked");
        Ok(room)
    }

    /// Merge `overrides` into the room settings.
    ///
    /// # Errors
    ///
    /// `HOST_REQUIRED` when the caller is not the host.
    pub async fn update_room_settings(&self, overrides: &RoomSettingsOverrides) -> RoomResult<Room> {
        let (_, mut room) = self.authorize(&RoomAction::UpdateRoomSettings).await?;
        let now = now_ms();
        room.settings = room.settings.merged(overrides);
        let path = paths::settings(&room.id);
        self.directory.write(&path, to_value(&path, &room.settings)?).await?;
        self.touch(&room.id, now).await?;
        room.updated_at = now;
        debug!(room_id = %room.id, "room settings updated");
        Ok(room)
    }

    // -------------------------------------------------------------------------
    // internals
    // -------------------------------------------------------------------------

    fn pointer(&self) -> Option<SessionPointer> {
        lock(&self.current).clone()
    }

    async fn bounded<T>(&self, operation: &'static str, fut: impl Future<Output = RoomResult<T>>) -> RoomResult<T> {
        let limit = self.config.operation_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout = ?limit, "room operation timed out");
                Err(RoomError::connection_failed(format!("{operation} timed out after {limit:?}")))
            }
        }
    }

    /// Undo a create or join that failed after setting the session pointer.
    async fn roll_back(&self, operation: &'static str) {
        let Some(room_id) = self.current_room_id() else {
            return;
        };
        match self.bounded(operation, self.leave_room()).await {
            Ok(()) => debug!(%room_id, operation, "partial room state rolled back"),
            Err(err) => warn!(%room_id, operation, error = %err.message, "rollback incomplete"),
        }
    }

    /// Current pointer and room, provided the caller may perform `action`.
    async fn authorize(&self, action: &RoomAction) -> RoomResult<(SessionPointer, Room)> {
        let pointer = self.pointer().ok_or_else(|| RoomError::validation("Not in a room"))?;
        let room = self
            .fetch_room(&pointer.room_id)
            .await?
            .ok_or_else(|| RoomError::new(RoomErrorCode::RoomNotFound, "Room no longer exists"))?;
        let actor = find_user_in_room(&room, &pointer.user_id)
            .ok_or_else(|| RoomError::new(RoomErrorCode::PermissionDenied, "You are not a member of this room"))?;
        if !can_user_perform_action(actor, &room, action) {
            return Err(RoomError::new(RoomErrorCode::HostRequired, "Only the host can do that"));
        }
        Ok((pointer, room))
    }

    async fn fetch_room(&self, room_id: &str) -> RoomResult<Option<Room>> {
        let path = paths::room(room_id);
        let Some(value) = self.directory.read(&path).await? else {
            return Ok(None);
        };
        let room = from_value::<RoomRecord>(&path, value)?.into_room();
        Ok(Some(room).filter(|r| !r.members.is_empty()))
    }

    async fn write_member(&self, room_id: &str, user: &User) -> RoomResult<()> {
        let path = paths::member(room_id, &user.id);
        self.directory.write(&path, to_value(&path, user)?).await?;
        Ok(())
    }

    async fn touch(&self, room_id: &str, now: Timestamp) -> RoomResult<()> {
        self.directory.write(&paths::updated_at(room_id), json!(now)).await?;
        Ok(())
    }

    fn set_pointer(&self, room_id: &str, user_id: &str) {
        *lock(&self.current) = Some(SessionPointer {
            room_id: room_id.to_owned(),
            user_id: user_id.to_owned(),
            disconnect_hook: false,
        });
    }

    async fn arm_disconnect_hook(&self, room_id: &str, user_id: &str) -> RoomResult<()> {
        self.directory.on_disconnect_remove(&paths::member(room_id, user_id)).await?;
        if let Some(pointer) = lock(&self.current).as_mut() {
            pointer.disconnect_hook = true;
        }
        Ok(())
    }

    fn arm_room_listener(&self, room_id: &str) -> RoomResult<()> {
        let path = paths::room(room_id);
        let listeners = self.listeners.clone();
        let decode_path = path.clone();
        let subscription = self.directory.subscribe(
            &path,
            Arc::new(move |value: Option<Value>| {
                let room = value.and_then(|v| decode_room(&decode_path, v));
                for listener in listeners.snapshot() {
                    listener(room.as_ref());
                }
            }),
        )?;
        *lock(&self.room_subscription) = Some(subscription);
        Ok(())
    }

    fn detach_room_listener(&self) {
        let subscription = lock(&self.room_subscription).take();
        drop(subscription);
    }
}

fn decode_room(path: &str, value: Value) -> Option<Room> {
    match from_value::<RoomRecord>(path, value) {
        Ok(record) => Some(record.into_room()).filter(|r| !r.members.is_empty()),
        Err(err) => {
            debug!(path, error = %err, "room snapshot did not decode; treating as removed");
            None
        }
    }
}

fn require_valid(errors: Vec<String>, code: RoomErrorCode) -> RoomResult<()> {
    if errors.is_empty() {
        return Ok(());
    }
    Err(RoomError::new(code, errors.join("; ")))
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
