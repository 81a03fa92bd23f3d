//! Wall-clock helpers.
//!
//! Every timestamp in the crate is milliseconds since the Unix epoch, the
//! same encoding the directory records carry on the wire.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

pub const MS_PER_MINUTE: i64 = 60_000;
pub const MS_PER_HOUR: i64 = 3_600_000;

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> Timestamp {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}
