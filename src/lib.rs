//! Watch-party rooms over a shared key-value directory.
//!
//! ARCHITECTURE
//! ============
//! - `validation`, `room`: pure identity, shape checks, and the room model
//! - `security`: rate limits, bans, and per-client session bookkeeping
//! - `directory`: the remote store contract plus an in-memory implementation
//! - `services`: session membership, video sync, and presence leases
//! - `state`: the pure room reducer and its dispatcher
//! - `preferences`: locally persisted client preferences
//!
//! All remote effects go through `directory::RemoteDirectory`; everything
//! above it is constructed per client session and injected explicitly.

pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod listeners;
pub mod preferences;
pub mod room;
pub mod security;
pub mod services;
pub mod state;
pub mod validation;

pub use error::{ErrorCode, RoomError, RoomErrorCode, RoomResult};
