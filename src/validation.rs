//! Identifier generation and input shape validation.
//!
//! Pure functions only. Validation accumulates every violated rule instead of
//! stopping at the first, so callers can show all problems at once.
//! `sanitize_input` and `normalize_room_code` are string transforms, not a
//! security boundary.

use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

pub const ROOM_CODE_LENGTH: usize = 6;
pub const MIN_ROOM_CODE_LENGTH: usize = 4;
pub const MAX_ROOM_CODE_LENGTH: usize = 8;
pub const MIN_USER_NAME_LENGTH: usize = 1;
pub const MAX_USER_NAME_LENGTH: usize = 20;

const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Outcome of a shape check. `errors` holds one message per violated rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<String>) -> Self {
        Self { is_valid: errors.is_empty(), errors }
    }
}

// =============================================================================
// GENERATION
// =============================================================================

/// Generate a 6-character room code from `A-Z0-9`.
#[must_use]
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LENGTH)
        .map(|_| char::from(ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())]))
        .collect()
}

#[must_use]
pub fn generate_user_id() -> String {
    format!("user_{}", Uuid::new_v4().simple())
}

#[must_use]
pub fn generate_room_id() -> String {
    format!("room_{}", Uuid::new_v4().simple())
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Check a room code's length and alphabet. Expects an already-normalized code.
#[must_use]
pub fn validate_room_code(code: &str) -> ValidationResult {
    let mut errors = Vec::new();
    let len = code.chars().count();
    if len < MIN_ROOM_CODE_LENGTH {
        errors.push(format!("Room code must be at least {MIN_ROOM_CODE_LENGTH} characters"));
    }
    if len > MAX_ROOM_CODE_LENGTH {
        errors.push(format!("Room code must be at most {MAX_ROOM_CODE_LENGTH} characters"));
    }
    if !code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
        errors.push("Room code can only contain uppercase letters and numbers".to_string());
    }
    ValidationResult::from_errors(errors)
}

#[must_use]
pub fn validate_user_name(name: &str) -> ValidationResult {
    validate_display_name(name, "User name")
}

#[must_use]
pub fn validate_room_name(name: &str) -> ValidationResult {
    validate_display_name(name, "Room name")
}

fn validate_display_name(name: &str, label: &str) -> ValidationResult {
    let trimmed = name.trim();
    let len = trimmed.chars().count();
    let mut errors = Vec::new();
    if len < MIN_USER_NAME_LENGTH {
        errors.push(format!("{label} is required"));
    }
    if len > MAX_USER_NAME_LENGTH {
        errors.push(format!("{label} must be at most {MAX_USER_NAME_LENGTH} characters"));
    }
    if len > 0 && !trimmed.chars().all(is_name_char) {
        errors.push(format!(
            "{label} can only contain letters, numbers, spaces, underscores and hyphens"
        ));
    }
    ValidationResult::from_errors(errors)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-')
}

// =============================================================================
// TRANSFORMS
// =============================================================================

/// Trim and strip angle brackets.
#[must_use]
pub fn sanitize_input(input: &str) -> String {
    input.trim().chars().filter(|c| !matches!(c, '<' | '>')).collect()
}

/// Uppercase and remove all whitespace. Idempotent.
#[must_use]
pub fn normalize_room_code(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

#[cfg(test)]
#[path = "validation_test.rs"]
mod tests;
