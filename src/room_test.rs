use super::*;

fn member(name: &str, is_host: bool, joined_at: Timestamp) -> User {
    let mut user = create_user(name, is_host, joined_at);
    user.id = format!("user_{}", name.to_lowercase());
    user
}

fn room_with(members: Vec<User>) -> Room {
    let mut room = create_room(&CreateRoomRequest::new("Alice"), "user_alice", 1_000);
    room.members = members;
    room
}

// =============================================================================
// create_room / create_user
// =============================================================================

#[test]
fn create_room_starts_empty_with_defaults() {
    let room = create_room(&CreateRoomRequest::new("Alice"), "host-1", 1_000);
    assert!(room.members.is_empty());
    assert_eq!(room.host_id, "host-1");
    assert_eq!(room.max_members, 10);
    assert_eq!(room.created_at, 1_000);
    assert_eq!(room.updated_at, 1_000);
    assert_eq!(room.code.len(), 6);
    assert!(room.id.starts_with("room_"));
    assert_eq!(room.settings, RoomSettings::default());
    assert_eq!(room.name, None);
}

#[test]
fn create_room_merges_overrides_per_field() {
    let request = CreateRoomRequest {
        user_name: "Alice".into(),
        room_name: Some("  Movie Night ".into()),
        max_members: Some(4),
        is_private: true,
        settings: RoomSettingsOverrides {
            allow_guest_control: Some(true),
            sync_tolerance_ms: Some(250),
            ..RoomSettingsOverrides::default()
        },
    };
    let room = create_room(&request, "host-1", 0);
    assert_eq!(room.name.as_deref(), Some("Movie Night"));
    assert_eq!(room.max_members, 4);
    assert!(room.is_private);
    assert!(room.settings.allow_guest_control);
    assert_eq!(room.settings.sync_tolerance_ms, 250);
    assert!(room.settings.chat_enabled);
    assert_eq!(room.settings.max_chat_length, 500);
}

#[test]
fn create_user_trims_name_and_marks_online() {
    let user = create_user("  Bob ", false, 77);
    assert_eq!(user.name, "Bob");
    assert!(user.is_online);
    assert!(!user.is_host);
    assert_eq!(user.joined_at, 77);
    assert_eq!(user.last_seen, 77);
}

#[test]
fn user_serializes_camel_case() {
    let user = member("Alice", true, 5);
    let json = serde_json::to_value(&user).unwrap();
    assert_eq!(json["isHost"], true);
    assert_eq!(json["joinedAt"], 5);
    assert!(json.get("avatar").is_none());
}

// =============================================================================
// can_user_perform_action
// =============================================================================

#[test]
fn host_only_actions_require_host() {
    let host = member("Alice", true, 0);
    let guest = member("Bob", false, 1);
    let room = room_with(vec![host.clone(), guest.clone()]);
    for action in [RoomAction::TransferHost, RoomAction::KickUser, RoomAction::UpdateRoomSettings] {
        assert!(can_user_perform_action(&host, &room, &action));
        assert!(!can_user_perform_action(&guest, &room, &action));
    }
}

#[test]
fn video_control_follows_guest_setting() {
    let host = member("Alice", true, 0);
    let guest = member("Bob", false, 1);
    let mut room = room_with(vec![host.clone(), guest.clone()]);
    assert!(can_user_perform_action(&host, &room, &RoomAction::ControlVideo));
    assert!(!can_user_perform_action(&guest, &room, &RoomAction::ControlVideo));
    room.settings.allow_guest_control = true;
    assert!(can_user_perform_action(&guest, &room, &RoomAction::ControlVideo));
}

#[test]
fn send_message_follows_chat_setting() {
    let host = member("Alice", true, 0);
    let mut room = room_with(vec![host.clone()]);
    assert!(can_user_perform_action(&host, &room, &RoomAction::SendMessage));
    room.settings.chat_enabled = false;
    assert!(!can_user_perform_action(&host, &room, &RoomAction::SendMessage));
}

#[test]
fn unknown_actions_are_allowed() {
    let guest = member("Bob", false, 1);
    let room = room_with(vec![guest.clone()]);
    assert!(can_user_perform_action(&guest, &room, &RoomAction::Other("WAVE".into())));
}

// =============================================================================
// lookups
// =============================================================================

#[test]
fn room_full_at_capacity() {
    let mut room = room_with(vec![member("Alice", true, 0)]);
    room.max_members = 2;
    assert!(!is_room_full(&room));
    room.members.push(member("Bob", false, 1));
    assert!(is_room_full(&room));
}

#[test]
fn find_user_by_name_ignores_case() {
    let room = room_with(vec![member("Alice", true, 0), member("Bob", false, 1)]);
    assert_eq!(find_user_by_name(&room, "bob").map(|u| u.id.as_str()), Some("user_bob"));
    assert_eq!(find_user_by_name(&room, " ALICE ").map(|u| u.id.as_str()), Some("user_alice"));
    assert!(find_user_by_name(&room, "carol").is_none());
}

#[test]
fn find_user_in_room_by_id() {
    let room = room_with(vec![member("Alice", true, 0)]);
    assert!(find_user_in_room(&room, "user_alice").is_some());
    assert!(find_user_in_room(&room, "user_zed").is_none());
}

#[test]
fn get_room_host_returns_first_host_or_none() {
    let room = room_with(vec![member("Bob", false, 1), member("Alice", true, 0)]);
    assert_eq!(get_room_host(&room).map(|u| u.name.as_str()), Some("Alice"));
    let hostless = room_with(vec![member("Bob", false, 1)]);
    assert!(get_room_host(&hostless).is_none());
}

#[test]
fn successor_host_is_earliest_remaining_member() {
    let members = vec![member("Alice", true, 0), member("Carol", false, 30), member("Bob", false, 10)];
    let next = elect_successor_host(&members, "user_alice").unwrap();
    assert_eq!(next.name, "Bob");
    assert!(elect_successor_host(&members[..1], "user_alice").is_none());
}
