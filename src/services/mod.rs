//! Services that orchestrate the remote directory.
//!
//! ARCHITECTURE
//! ============
//! `session` owns membership: create, join, leave, and host-only edits.
//! `video_sync` publishes and filters playback state for the joined room.
//! `presence` refreshes member leases and sweeps lapsed ones for stores
//! without native disconnect hooks.
//!
//! Each service is an explicitly constructed value scoped to one client
//! session. Nothing here is a process-wide singleton.

pub mod presence;
pub mod session;
pub mod video_sync;
