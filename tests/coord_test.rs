//! Contract tests for the in-process coordination service.

use std::sync::Arc;
use tokio::sync::mpsc;
use workq::Error;
use workq::coord::{
    Coordinator, EventKind, MemoryStore, NodeExistsPolicy, NodeMissingPolicy, SessionState,
    WatchedEvent, Watcher, join_path, parent_path, validate_path,
};
use workq::watch::ChildWatch;

fn watcher() -> (Watcher, mpsc::UnboundedReceiver<WatchedEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Watcher::new(tx), rx)
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

#[test]
fn path_helpers() {
    assert_eq!(join_path("/", "a"), "/a");
    assert_eq!(join_path("/a/b", "c"), "/a/b/c");
    assert_eq!(parent_path("/a/b"), Some("/a"));
    assert_eq!(parent_path("/a"), Some("/"));
    assert_eq!(parent_path("/"), None);

    assert!(validate_path("/a/b").is_ok());
    assert!(validate_path("a/b").is_err());
    assert!(validate_path("/").is_err());
    assert!(validate_path("/a//b").is_err());
    assert!(validate_path("/a/").is_err());
}

// ---------------------------------------------------------------------------
// Persistent nodes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ensure_path_creates_ancestors_and_is_idempotent() {
    let session = MemoryStore::new().session();

    session.ensure_path("/a/b/c").await.unwrap();
    session.ensure_path("/a/b/c").await.unwrap();

    assert!(session.exists("/a").await.unwrap());
    assert!(session.exists("/a/b").await.unwrap());
    assert_eq!(session.get_children("/a/b", None).await.unwrap(), vec!["c"]);
}

#[tokio::test]
async fn create_persistent_honours_exists_policy() {
    let session = MemoryStore::new().session();
    session.ensure_path("/q").await.unwrap();

    session
        .create_persistent("/q/x", b"first", NodeExistsPolicy::Fail)
        .await
        .unwrap();

    session
        .create_persistent("/q/x", b"second", NodeExistsPolicy::Skip)
        .await
        .unwrap();
    assert_eq!(session.get_data("/q/x").await.unwrap(), b"first");

    let err = session
        .create_persistent("/q/x", b"third", NodeExistsPolicy::Fail)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NodeExists(_)));

    session
        .create_persistent("/q/x", b"fourth", NodeExistsPolicy::Overwrite)
        .await
        .unwrap();
    assert_eq!(session.get_data("/q/x").await.unwrap(), b"fourth");
}

#[tokio::test]
async fn create_requires_parent() {
    let session = MemoryStore::new().session();
    let err = session
        .create_persistent("/missing/x", b"", NodeExistsPolicy::Fail)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoNode(_)));
}

#[tokio::test]
async fn delete_recursive_removes_subtree() {
    let session = MemoryStore::new().session();
    session.ensure_path("/q/a/deep").await.unwrap();
    session.ensure_path("/q/b").await.unwrap();

    session
        .delete_recursive("/q/a", NodeMissingPolicy::Fail)
        .await
        .unwrap();

    assert!(!session.exists("/q/a/deep").await.unwrap());
    assert!(!session.exists("/q/a").await.unwrap());
    assert_eq!(session.get_children("/q", None).await.unwrap(), vec!["b"]);

    session
        .delete_recursive("/q/a", NodeMissingPolicy::Skip)
        .await
        .unwrap();
    let err = session
        .delete_recursive("/q/a", NodeMissingPolicy::Fail)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoNode(_)));
}

// ---------------------------------------------------------------------------
// Ephemeral nodes and sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ephemeral_create_is_exclusive_across_sessions() {
    let store = MemoryStore::new();
    let a = store.session();
    let b = store.session();
    a.ensure_path("/locks").await.unwrap();

    a.create_ephemeral("/locks/x", b"").await.unwrap();
    let err = b.create_ephemeral("/locks/x", b"").await.unwrap_err();
    assert!(matches!(err, Error::NodeExists(_)));
}

#[tokio::test]
async fn session_expiry_releases_ephemerals_and_notifies() {
    let store = MemoryStore::new();
    let owner = store.session();
    let observer = store.session();
    owner.ensure_path("/locks").await.unwrap();
    owner.create_ephemeral("/locks/x", b"").await.unwrap();

    let (own_watch, mut own_events) = watcher();
    owner.get_children("/locks", Some(own_watch)).await.unwrap();
    let (other_watch, mut other_events) = watcher();
    observer
        .get_children("/locks", Some(other_watch))
        .await
        .unwrap();

    owner.expire();

    assert!(owner.is_expired());
    assert!(!observer.exists("/locks/x").await.unwrap());
    assert_eq!(
        other_events.try_recv().unwrap(),
        WatchedEvent::node(EventKind::ChildrenChanged, "/locks")
    );

    // The owner's watch hears only about its session.
    assert_eq!(
        own_events.try_recv().unwrap(),
        WatchedEvent::session(SessionState::Expired)
    );
    assert!(own_events.try_recv().is_err());

    let err = owner.exists("/locks").await.unwrap_err();
    assert!(matches!(err, Error::SessionExpired));
}

#[tokio::test]
async fn dropping_a_session_releases_its_ephemerals() {
    let store = MemoryStore::new();
    let observer = store.session();
    observer.ensure_path("/locks").await.unwrap();

    {
        let owner = store.session();
        owner.create_ephemeral("/locks/x", b"").await.unwrap();
        assert!(observer.exists("/locks/x").await.unwrap());
    }

    assert!(!observer.exists("/locks/x").await.unwrap());
}

#[tokio::test]
async fn expiry_is_tracked_per_session() {
    let store = MemoryStore::new();
    let survivor = store.session();
    survivor.ensure_path("/locks").await.unwrap();

    for i in 0..100 {
        let session = store.session();
        session
            .create_ephemeral(&format!("/locks/{i}"), b"")
            .await
            .unwrap();
        if i % 2 == 0 {
            session.expire();
            let err = session.exists("/locks").await.unwrap_err();
            assert!(matches!(err, Error::SessionExpired));
        }
    }

    assert!(!survivor.is_expired());
    assert!(survivor.get_children("/locks", None).await.unwrap().is_empty());
    survivor.create_ephemeral("/locks/mine", b"").await.unwrap();

    let late = store.session();
    assert!(!late.is_expired());
    late.create_ephemeral("/locks/late", b"").await.unwrap();
}

#[tokio::test]
async fn ephemeral_nodes_cannot_have_children() {
    let session = MemoryStore::new().session();
    session.ensure_path("/q").await.unwrap();
    session.create_ephemeral("/q/e", b"").await.unwrap();

    let err = session.create_ephemeral("/q/e/child", b"").await.unwrap_err();
    assert!(matches!(err, Error::Coordination(_)));
}

// ---------------------------------------------------------------------------
// Watches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn child_watch_fires_once() {
    let session = MemoryStore::new().session();
    session.ensure_path("/q").await.unwrap();

    let (w, mut events) = watcher();
    session.get_children("/q", Some(w.clone())).await.unwrap();
    // Same watcher again: still one notification.
    session.get_children("/q", Some(w)).await.unwrap();

    session.ensure_path("/q/a").await.unwrap();
    session.ensure_path("/q/b").await.unwrap();

    assert_eq!(
        events.try_recv().unwrap(),
        WatchedEvent::node(EventKind::ChildrenChanged, "/q")
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn abandoned_watchers_are_pruned() {
    let store = MemoryStore::new();
    let session = store.session();
    session.ensure_path("/q").await.unwrap();

    for _ in 0..20 {
        let (w, events) = watcher();
        session.get_children("/q", Some(w)).await.unwrap();
        drop(events);
    }
    assert_eq!(store.watch_count(), 1);

    let (w, mut events) = watcher();
    session.get_children("/q", Some(w)).await.unwrap();
    assert_eq!(store.watch_count(), 1);

    session.ensure_path("/q/a").await.unwrap();
    assert_eq!(
        events.try_recv().unwrap(),
        WatchedEvent::node(EventKind::ChildrenChanged, "/q")
    );
    assert_eq!(store.watch_count(), 0);
}

#[tokio::test]
async fn deleting_a_watched_node_fires_node_deleted() {
    let session = MemoryStore::new().session();
    session.ensure_path("/q/a").await.unwrap();

    let (w, mut events) = watcher();
    session.get_children("/q/a", Some(w)).await.unwrap();
    session
        .delete_recursive("/q/a", NodeMissingPolicy::Fail)
        .await
        .unwrap();

    assert_eq!(
        events.try_recv().unwrap(),
        WatchedEvent::node(EventKind::NodeDeleted, "/q/a")
    );
}

#[tokio::test]
async fn child_watch_rearms_on_every_read() {
    let store = MemoryStore::new();
    let writer = store.session();
    writer.ensure_path("/q").await.unwrap();

    let client: Arc<dyn Coordinator> = Arc::new(store.session());
    let mut watch = ChildWatch::new(client, "/q");

    assert!(watch.children().await.unwrap().is_empty());
    writer.ensure_path("/q/a").await.unwrap();
    let event = watch.next_event().await.unwrap();
    assert_eq!(event.kind, EventKind::ChildrenChanged);

    assert_eq!(watch.children().await.unwrap(), vec!["a"]);
    writer.ensure_path("/q/b").await.unwrap();
    let event = watch.next_event().await.unwrap();
    assert_eq!(event.path.as_deref(), Some("/q"));
    assert_eq!(watch.children().await.unwrap(), vec!["a", "b"]);
}
