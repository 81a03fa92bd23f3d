//! Error types shared by every layer.
//!
//! DESIGN
//! ======
//! `RoomError` is a value object. Services return it, the state machine
//! stores it, and nothing unwinds with it. Transport failures from the
//! directory are a separate `DirectoryError` that never crosses the session
//! service boundary: they are converted to `CONNECTION_FAILED` on the way out.

use serde::{Deserialize, Serialize};

use crate::clock::{Timestamp, now_ms};

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured errors.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Closed taxonomy of room errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomErrorCode {
    RoomNotFound,
    RoomFull,
    InvalidRoomCode,
    InvalidUserName,
    PermissionDenied,
    ConnectionFailed,
    UserAlreadyExists,
    HostRequired,
    NetworkError,
    ValidationError,
}

impl RoomErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoomNotFound => "ROOM_NOT_FOUND",
            Self::RoomFull => "ROOM_FULL",
            Self::InvalidRoomCode => "INVALID_ROOM_CODE",
            Self::InvalidUserName => "INVALID_USER_NAME",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::UserAlreadyExists => "USER_ALREADY_EXISTS",
            Self::HostRequired => "HOST_REQUIRED",
            Self::NetworkError => "NETWORK_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
        }
    }

    /// Transient failures worth offering a retry for.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ConnectionFailed | Self::NetworkError)
    }
}

impl std::fmt::Display for RoomErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ROOM ERROR
// =============================================================================

/// A room-level failure surfaced to callers and stored in `RoomState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RoomError {
    pub code: RoomErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: Timestamp,
}

impl RoomError {
    pub fn new(code: RoomErrorCode, message: impl Into<String>) -> Self {
        Self::at(code, message, now_ms())
    }

    /// Build an error stamped with an explicit time (simulated clocks).
    pub fn at(code: RoomErrorCode, message: impl Into<String>, timestamp: Timestamp) -> Self {
        Self { code, message: message.into(), details: None, timestamp }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(RoomErrorCode::ValidationError, message)
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(RoomErrorCode::ConnectionFailed, message)
    }
}

impl ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        self.code.as_str()
    }

    fn retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

/// Uniform result returned across the session and sync service boundaries.
pub type RoomResult<T> = Result<T, RoomError>;

// =============================================================================
// DIRECTORY ERROR
// =============================================================================

/// Failures reported by a `RemoteDirectory` implementation.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The transport is down or the store refused the call.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
    /// A snapshot did not match the expected record shape.
    #[error("malformed record at {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// The path could not be addressed.
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl ErrorCode for DirectoryError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "E_DIRECTORY_UNAVAILABLE",
            Self::Malformed { .. } => "E_DIRECTORY_MALFORMED",
            Self::InvalidPath(_) => "E_DIRECTORY_PATH",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<DirectoryError> for RoomError {
    fn from(err: DirectoryError) -> Self {
        let details = serde_json::json!({ "source": err.error_code() });
        RoomError::connection_failed(format!("remote directory call failed: {err}")).with_details(details)
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
