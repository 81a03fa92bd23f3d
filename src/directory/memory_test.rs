use std::sync::Mutex as StdMutex;

use serde_json::json;

use super::*;

type Seen = Arc<StdMutex<Vec<Option<Value>>>>;

fn recorder() -> (Seen, ChangeCallback) {
    let seen: Seen = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: ChangeCallback = Arc::new(move |value| sink.lock().unwrap().push(value));
    (seen, callback)
}

// =============================================================================
// read / write / remove
// =============================================================================

#[tokio::test]
async fn write_then_read_nested_path() {
    let dir = MemoryDirectory::new();
    let conn = dir.connect();
    conn.write("rooms/r1", json!({"id": "r1", "members": {"u1": {"name": "Alice"}}})).await.unwrap();

    let member = conn.read("rooms/r1/members/u1").await.unwrap().unwrap();
    assert_eq!(member["name"], "Alice");
    assert!(conn.read("rooms/r2").await.unwrap().is_none());
}

#[tokio::test]
async fn write_creates_intermediate_nodes() {
    let dir = MemoryDirectory::new();
    let conn = dir.connect();
    conn.write("rooms/r1/members/u1", json!({"name": "Bob"})).await.unwrap();
    let room = dir.snapshot("rooms/r1").unwrap();
    assert_eq!(room["members"]["u1"]["name"], "Bob");
}

#[tokio::test]
async fn remove_prunes_empty_parents() {
    let dir = MemoryDirectory::new();
    let conn = dir.connect();
    conn.write("rooms/r1/members/u1", json!({"name": "Bob"})).await.unwrap();
    conn.remove("rooms/r1/members/u1").await.unwrap();
    assert!(dir.snapshot("rooms/r1").is_none());
    assert!(dir.snapshot("rooms").is_none());
}

#[tokio::test]
async fn writing_null_removes_and_nulls_are_stripped() {
    let dir = MemoryDirectory::new();
    let conn = dir.connect();
    conn.write("a/b", json!({"x": 1, "y": null})).await.unwrap();
    assert_eq!(dir.snapshot("a/b").unwrap(), json!({"x": 1}));
    conn.write("a/b", Value::Null).await.unwrap();
    assert!(dir.snapshot("a/b").is_none());
}

#[tokio::test]
async fn empty_path_is_rejected() {
    let dir = MemoryDirectory::new();
    let conn = dir.connect();
    let err = conn.write("/", json!(1)).await.unwrap_err();
    assert!(matches!(err, DirectoryError::InvalidPath(_)));
}

// =============================================================================
// subscribe
// =============================================================================

#[tokio::test]
async fn subscriber_sees_descendant_and_ancestor_writes() {
    let dir = MemoryDirectory::new();
    let writer = dir.connect();
    let reader = dir.connect();
    let (seen, callback) = recorder();
    let _sub = reader.subscribe("rooms/r1/videoState", callback).unwrap();

    writer.write("rooms/r1/videoState/currentTime", json!(3.5)).await.unwrap();
    writer.write("rooms/r1", json!({"videoState": {"currentTime": 9.0}})).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].as_ref().unwrap()["currentTime"], 3.5);
    assert_eq!(seen[1].as_ref().unwrap()["currentTime"], 9.0);
}

#[tokio::test]
async fn unrelated_and_unchanged_writes_do_not_notify() {
    let dir = MemoryDirectory::new();
    let conn = dir.connect();
    conn.write("rooms/r1/videoState", json!({"currentTime": 1})).await.unwrap();
    let (seen, callback) = recorder();
    let _sub = conn.subscribe("rooms/r1/videoState", callback).unwrap();

    conn.write("rooms/r2/videoState", json!({"currentTime": 1})).await.unwrap();
    conn.write("rooms/r1/members/u1", json!({"name": "x"})).await.unwrap();
    conn.write("rooms/r1/videoState", json!({"currentTime": 1})).await.unwrap();

    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn removal_notifies_with_none() {
    let dir = MemoryDirectory::new();
    let conn = dir.connect();
    conn.write("rooms/r1", json!({"id": "r1"})).await.unwrap();
    let (seen, callback) = recorder();
    let _sub = conn.subscribe("rooms/r1", callback).unwrap();
    conn.remove("rooms/r1").await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![None]);
}

#[tokio::test]
async fn dropping_subscription_detaches() {
    let dir = MemoryDirectory::new();
    let conn = dir.connect();
    let (seen, callback) = recorder();
    let sub = conn.subscribe("k", callback).unwrap();
    assert_eq!(dir.subscriber_count(), 1);
    sub.unsubscribe();
    assert_eq!(dir.subscriber_count(), 0);
    conn.write("k", json!(1)).await.unwrap();
    assert!(seen.lock().unwrap().is_empty());
}

// =============================================================================
// transport simulation
// =============================================================================

#[tokio::test]
async fn offline_connection_fails_calls() {
    let dir = MemoryDirectory::new();
    let conn = dir.connect();
    conn.set_online(false);
    assert!(matches!(conn.write("k", json!(1)).await, Err(DirectoryError::Unavailable(_))));
    assert!(matches!(conn.read("k").await, Err(DirectoryError::Unavailable(_))));
    assert_eq!(dir.mutation_count(), 0);
    conn.set_online(true);
    conn.write("k", json!(1)).await.unwrap();
    assert_eq!(dir.mutation_count(), 1);
}

#[tokio::test]
async fn disconnect_runs_hooks_and_notifies_peers() {
    let dir = MemoryDirectory::new();
    let leaver = dir.connect();
    let peer = dir.connect();
    leaver.write("rooms/r1/members/u1", json!({"name": "Alice"})).await.unwrap();
    peer.write("rooms/r1/members/u2", json!({"name": "Bob"})).await.unwrap();
    leaver.on_disconnect_remove("rooms/r1/members/u1").await.unwrap();
    leaver.on_disconnect_remove("rooms/r1/members/u1").await.unwrap();
    assert_eq!(dir.disconnect_hooks(&leaver).len(), 1);

    let (seen, callback) = recorder();
    let _sub = peer.subscribe("rooms/r1/members", callback).unwrap();
    let (leaver_seen, leaver_cb) = recorder();
    let _leaver_sub = leaver.subscribe("rooms/r1/members", leaver_cb).unwrap();

    dir.disconnect(&leaver);

    let members = dir.snapshot("rooms/r1/members").unwrap();
    assert!(members.get("u1").is_none());
    assert!(members.get("u2").is_some());
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(leaver_seen.lock().unwrap().is_empty());
    assert!(leaver.read("rooms").await.is_err());
}

#[tokio::test]
async fn cancelled_hook_does_not_run_on_disconnect() {
    let dir = MemoryDirectory::new();
    let conn = dir.connect();
    conn.write("rooms/r1/members/u1", json!({"name": "Alice"})).await.unwrap();
    conn.on_disconnect_remove("rooms/r1/members/u1").await.unwrap();
    conn.on_disconnect_remove("rooms/r1/members/u9").await.unwrap();

    conn.cancel_disconnect_remove("rooms/r1/members/u1").await.unwrap();
    conn.cancel_disconnect_remove("rooms/r1/members/unknown").await.unwrap();
    assert_eq!(dir.disconnect_hooks(&conn), vec!["rooms/r1/members/u9".to_string()]);

    dir.disconnect(&conn);
    assert!(dir.snapshot("rooms/r1/members/u1").is_some());
}

#[tokio::test]
async fn latency_delays_calls() {
    let dir = MemoryDirectory::new();
    let conn = dir.connect();
    conn.set_latency(Duration::from_millis(50));
    let started = tokio::time::Instant::now();
    conn.write("k", json!(1)).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(50));
}
