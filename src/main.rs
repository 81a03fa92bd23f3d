use std::sync::Arc;

use tracing::{debug, info};

use watchroom::config::WatchroomConfig;
use watchroom::directory::{MemoryDirectory, RemoteDirectory};
use watchroom::room::{CreateRoomRequest, JoinRoomRequest, find_user_in_room};
use watchroom::security::{SecurityPolicy, spawn_cleanup_task};
use watchroom::services::presence::spawn_heartbeat_task;
use watchroom::services::session::RoomSessionService;
use watchroom::services::video_sync::VideoSyncEngine;
use watchroom::state::{RoomEvent, RoomStore};

struct Client {
    session: Arc<RoomSessionService>,
    video: VideoSyncEngine,
    directory: Arc<dyn RemoteDirectory>,
}

fn client(store: &MemoryDirectory, policy: &SecurityPolicy, config: &WatchroomConfig, client_id: &str) -> Client {
    let directory: Arc<dyn RemoteDirectory> = Arc::new(store.connect());
    let session = Arc::new(RoomSessionService::new(
        Arc::clone(&directory),
        policy.clone(),
        client_id,
        config.session,
    ));
    let video = VideoSyncEngine::new(Arc::clone(&directory), Arc::clone(&session), config.video_sync);
    Client { session, video, directory }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    if let Err(err) = dotenvy::dotenv() {
        debug!(error = %err, "no .env loaded");
    }

    let config = WatchroomConfig::from_env();
    let policy = SecurityPolicy::in_memory(config.security);
    let sweep = spawn_cleanup_task(policy.clone());

    let store = MemoryDirectory::new();
    let alice = client(&store, &policy, &config, "client-alice");
    let bob = client(&store, &policy, &config, "client-bob");

    let room = alice.session.create_room(CreateRoomRequest::new("Alice")).await?;
    info!(room_code = %room.code, "alice created a room");
    let heartbeat = spawn_heartbeat_task(Arc::clone(&alice.directory), Arc::clone(&alice.session), config.presence);

    let joined = bob.session.join_room(JoinRoomRequest::new(room.code.to_lowercase(), "Bob")).await?;
    let bob_id = bob.session.current_user_id().unwrap_or_default();
    let room_state = Arc::new(RoomStore::new());
    if let Some(me) = find_user_in_room(&joined, &bob_id).cloned() {
        room_state.dispatch(RoomEvent::JoinRoom { room: joined.clone(), user: me });
    }
    let snapshots = Arc::clone(&room_state);
    let _room_updates = bob.session.on_room_update(move |room| {
        if let Some(room) = room {
            snapshots.dispatch(RoomEvent::RoomSnapshot(room.clone()));
        }
    });
    info!(members = joined.members.len(), "bob joined");

    alice.video.initialize().await?;
    bob.video.initialize().await?;
    let _playback = bob.video.on_video_state_change(|event| {
        info!(action = ?event.action, at = event.current_time, from = %event.user_id, "bob applies remote playback");
    });

    alice.video.sync_load("https://media.example/trailer.mp4", 0.0).await?;
    alice.video.sync_play(0.0).await?;
    alice.video.sync_seek(42.5).await?;
    alice.video.sync_pause(43.0).await?;

    bob.session.leave_room().await?;
    let remaining = alice.session.current_room().await?.map_or(0, |r| r.members.len());
    info!(remaining, "bob left");
    room_state.dispatch(RoomEvent::LeaveRoom);

    alice.video.cleanup();
    bob.video.cleanup();
    alice.session.leave_room().await?;
    heartbeat.abort();
    sweep.abort();
    info!("demo finished");
    Ok(())
}
