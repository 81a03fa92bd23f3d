use std::collections::HashSet;

use super::*;

// =============================================================================
// generate_room_code
// =============================================================================

#[test]
fn generated_codes_are_six_uppercase_alphanumerics() {
    for _ in 0..200 {
        let code = generate_room_code();
        assert_eq!(code.len(), ROOM_CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()), "bad code {code}");
        assert!(validate_room_code(&code).is_valid);
    }
}

#[test]
fn generated_codes_vary() {
    let codes: HashSet<String> = (0..1000).map(|_| generate_room_code()).collect();
    assert!(codes.len() >= 2);
}

#[test]
fn generated_ids_are_prefixed_and_unique() {
    let a = generate_user_id();
    let b = generate_user_id();
    assert!(a.starts_with("user_"));
    assert_ne!(a, b);
    assert!(generate_room_id().starts_with("room_"));
}

// =============================================================================
// validate_room_code
// =============================================================================

#[test]
fn valid_codes_pass() {
    for code in ["ABCD", "ABC123", "ZZZZ9999"] {
        let result = validate_room_code(code);
        assert!(result.is_valid, "{code} should be valid");
        assert!(result.errors.is_empty());
    }
}

#[test]
fn short_code_fails_length_rule() {
    let result = validate_room_code("AB1");
    assert!(!result.is_valid);
    assert_eq!(result.errors.len(), 1);
}

#[test]
fn long_code_fails_length_rule() {
    let result = validate_room_code("ABCDEFGHI");
    assert!(!result.is_valid);
    assert_eq!(result.errors.len(), 1);
}

#[test]
fn code_failing_two_rules_reports_both() {
    let result = validate_room_code("a!");
    assert!(!result.is_valid);
    assert_eq!(result.errors.len(), 2);
    assert_ne!(result.errors[0], result.errors[1]);
}

#[test]
fn long_code_with_symbols_reports_both() {
    let result = validate_room_code("ABCD-EFGH-1");
    assert_eq!(result.errors.len(), 2);
}

#[test]
fn lowercase_code_is_rejected_until_normalized() {
    assert!(!validate_room_code("abc123").is_valid);
    assert!(validate_room_code(&normalize_room_code("abc123")).is_valid);
}

// =============================================================================
// validate_user_name
// =============================================================================

#[test]
fn user_name_accepts_allowed_characters() {
    assert!(validate_user_name("Alice_B-2 x").is_valid);
    assert!(validate_user_name("  Bob  ").is_valid);
}

#[test]
fn user_name_empty_after_trim_fails() {
    let result = validate_user_name("   ");
    assert!(!result.is_valid);
    assert_eq!(result.errors.len(), 1);
}

#[test]
fn user_name_too_long_with_bad_chars_reports_both() {
    let result = validate_user_name("<script>alert('x')</script>");
    assert!(!result.is_valid);
    assert_eq!(result.errors.len(), 2);
}

#[test]
fn room_name_uses_its_own_label() {
    let result = validate_room_name("");
    assert!(result.errors[0].starts_with("Room name"));
}

// =============================================================================
// transforms
// =============================================================================

#[test]
fn normalize_room_code_uppercases_and_strips_whitespace() {
    assert_eq!(normalize_room_code("  abc 123 "), "ABC123");
    assert_eq!(normalize_room_code("a\tb\nc"), "ABC");
}

#[test]
fn normalize_room_code_is_idempotent() {
    for input in ["  abc 123 ", "XyZ", "", "r1 r2"] {
        let once = normalize_room_code(input);
        assert_eq!(normalize_room_code(&once), once);
    }
}

#[test]
fn sanitize_input_trims_and_strips_angle_brackets() {
    assert_eq!(sanitize_input("  <b>hi</b> "), "bhi/b");
    assert_eq!(sanitize_input("plain"), "plain");
}
