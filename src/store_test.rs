use super::*;
use crate::types::MessageId;

fn msg(id: i64, content: &str) -> ThreadMessage {
    ThreadMessage { id: MessageId::Server(id), content: content.to_owned(), is_bot: false, timestamp: String::new() }
}

#[test]
fn unknown_thread_reads_empty() {
    let store = ThreadMessageStore::new();
    assert!(store.get(1).is_empty());
    assert!(!store.contains(1));
    assert!(store.threads().is_empty());
}

#[test]
fn replace_publishes_new_snapshot() {
    let store = ThreadMessageStore::new();
    store.replace(1, vec![msg(1, "a")]);
    assert_eq!(store.get(1).len(), 1);
    assert!(store.contains(1));
}

#[test]
fn old_snapshot_is_unaffected_by_later_writes() {
    let store = ThreadMessageStore::new();
    store.replace(1, vec![msg(1, "a")]);
    let before = store.get(1);

    store.replace(1, vec![msg(1, "a"), msg(2, "b")]);
    assert_eq!(before.len(), 1);
    assert_eq!(store.get(1).len(), 2);
}

#[test]
fn threads_are_independent() {
    let store = ThreadMessageStore::new();
    store.replace(1, vec![msg(1, "a")]);
    store.replace(2, vec![msg(1, "other")]);

    store.clear(1);
    assert!(store.get(1).is_empty());
    assert_eq!(store.get(2)[0].content, "other");
    assert_eq!(store.threads(), vec![2]);
}

#[test]
fn clear_all_empties_store() {
    let store = ThreadMessageStore::new();
    store.replace(3, vec![msg(1, "a")]);
    store.replace(1, vec![msg(1, "b")]);
    assert_eq!(store.threads(), vec![1, 3]);

    store.clear_all();
    assert!(store.threads().is_empty());
}

#[test]
fn clones_share_state() {
    let store = ThreadMessageStore::new();
    let reader = store.clone();
    store.replace(1, vec![msg(1, "a")]);
    assert_eq!(reader.get(1).len(), 1);
}

#[test]
fn revision_counts_effective_writes() {
    let store = ThreadMessageStore::new();
    assert_eq!(store.revision(), 0);
    store.replace(1, vec![msg(1, "a")]);
    assert_eq!(store.revision(), 1);
    store.clear(99);
    assert_eq!(store.revision(), 1, "clearing an unknown thread is not a write");
    store.clear(1);
    assert_eq!(store.revision(), 2);
}

#[tokio::test]
async fn watch_wakes_on_write() {
    let store = ThreadMessageStore::new();
    let mut rx = store.watch();
    let writer = store.clone();
    tokio::spawn(async move {
        writer.replace(5, vec![msg(1, "a")]);
    });
    rx.changed().await.expect("store dropped");
    assert_eq!(*rx.borrow(), 1);
}
