// ABOUTME: Tests for the debounced store writer using paused tokio time
// ABOUTME: Covers burst coalescing, re-arming, the periodic backstop, and final flush

use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use warble::persist::{DEBOUNCE_WINDOW, FLUSH_INTERVAL};
use warble::store::{CacheStore, MessageRecord, StoreHandle};
use warble::transport::MessageKey;

fn record(id: &str) -> MessageRecord {
    MessageRecord {
        key: MessageKey {
            id: id.to_string(),
            remote_jid: "a@g.us".to_string(),
            participant: None,
            from_me: false,
        },
        message_timestamp: Some(1_700_000_000),
        push_name: None,
        message: Some(json!({"conversation": "hi"})),
    }
}

fn store_path(dir: &Path) -> PathBuf {
    dir.join("store.json")
}

fn persisted_message_count(path: &Path) -> usize {
    let store = CacheStore::load(path);
    store.messages.values().map(Vec::len).sum()
}

#[tokio::test(start_paused = true)]
async fn burst_of_mutations_coalesces_into_one_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(dir.path());
    let handle = StoreHandle::spawn(CacheStore::default(), path.clone());

    for i in 0..10 {
        handle.record_message("a@g.us", record(&format!("m{i}"))).unwrap();
    }

    // Still inside the quiet period: nothing on disk yet
    tokio::time::sleep(DEBOUNCE_WINDOW - Duration::from_secs(1)).await;
    assert!(!path.exists());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(path.exists());
    assert_eq!(persisted_message_count(&path), 10);
}

#[tokio::test(start_paused = true)]
async fn each_mutation_rearms_the_debounce_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(dir.path());
    let handle = StoreHandle::spawn(CacheStore::default(), path.clone());

    handle.record_message("a@g.us", record("m0")).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    // Second mutation at t=2s pushes the deadline out to t=5s
    handle.record_message("a@g.us", record("m1")).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!path.exists(), "write fired before the rearmed deadline");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(path.exists());
    assert_eq!(persisted_message_count(&path), 2);
}

#[tokio::test(start_paused = true)]
async fn periodic_flush_fires_without_mutations() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(dir.path());
    let _handle = StoreHandle::spawn(CacheStore::default(), path.clone());

    // The 30s tick arms the same debounced write path
    tokio::time::sleep(FLUSH_INTERVAL - Duration::from_secs(1)).await;
    assert!(!path.exists());

    tokio::time::sleep(DEBOUNCE_WINDOW + Duration::from_secs(2)).await;
    assert!(path.exists());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_flushes_a_final_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(dir.path());
    let handle = StoreHandle::spawn(CacheStore::default(), path.clone());

    handle.record_message("a@g.us", record("m0")).unwrap();
    drop(handle);

    // Give the writer task a chance to observe the closed channel
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(path.exists());
    assert_eq!(persisted_message_count(&path), 1);
}

#[tokio::test(start_paused = true)]
async fn unwritable_target_keeps_the_agent_alive_and_retries() {
    let dir = tempfile::tempdir().unwrap();
    // A directory at the target path makes the rename fail
    let path = store_path(dir.path());
    std::fs::create_dir_all(&path).unwrap();
    let handle = StoreHandle::spawn(CacheStore::default(), path.clone());

    handle.record_message("a@g.us", record("m0")).unwrap();
    tokio::time::sleep(DEBOUNCE_WINDOW + Duration::from_secs(1)).await;

    // The write failed but in-memory state is intact and mutations still work
    handle.record_message("a@g.us", record("m1")).unwrap();
    let count = handle
        .with(|store| store.messages["a@g.us"].len())
        .unwrap();
    assert_eq!(count, 2);
}
