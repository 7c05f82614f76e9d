//! Lifecycle and failure edge cases

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use feedswarm_core::{
    FeedRegistry, JoinOptions, MemoryRecordLog, PeerConnection, PeerInfo, RegistryOptions,
    TopicKey,
};

/// A disconnect flagged as a duplicate must not tear down the sessions of
/// the connection that stays up.
#[tokio::test]
async fn test_duplicate_disconnect_is_ignored() {
    init_tracing();
    let node_a = Node::new();
    let node_b = Node::new();
    let topic = TopicKey::new();

    let registry_a = node_a.open_registry(topic).await;
    let registry_b = node_b.open_registry(topic).await;
    node_a.swarm.swarm(&registry_a).await.unwrap();
    node_b.swarm.swarm(&registry_b).await.unwrap();

    let (conn_a, _conn_b) = connect(&node_a, &node_b);
    wait_for_session_count(&registry_a.muxer(), 1).await;

    node_a.discovery.disconnect(
        conn_a.peer_id(),
        PeerInfo { duplicate: true },
        true,
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(registry_a.muxer().session_count().await, 1);

    // A real disconnect detaches.
    node_a
        .discovery
        .disconnect(conn_a.peer_id(), PeerInfo::default(), true);
    let deadline = tokio::time::Instant::now() + CONVERGE_TIMEOUT;
    while registry_a.muxer().session_count().await != 0 {
        assert!(tokio::time::Instant::now() < deadline, "session never detached");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A disconnect whose handshake never completed is ignored entirely.
#[tokio::test]
async fn test_disconnect_without_handshake_is_ignored() {
    init_tracing();
    let node_a = Node::new();
    let node_b = Node::new();
    let topic = TopicKey::new();

    let registry_a = node_a.open_registry(topic).await;
    node_a.swarm.swarm(&registry_a).await.unwrap();
    let registry_b = node_b.open_registry(topic).await;
    node_b.swarm.swarm(&registry_b).await.unwrap();

    let (conn_a, _conn_b) = connect(&node_a, &node_b);
    wait_for_session_count(&registry_a.muxer(), 1).await;

    node_a
        .discovery
        .disconnect(conn_a.peer_id(), PeerInfo::default(), false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(registry_a.muxer().session_count().await, 1);
}

/// Closing the raw connection tears down sessions on both sides without
/// explicit detach calls.
#[tokio::test]
async fn test_connection_close_ends_sessions_on_both_sides() {
    init_tracing();
    let node_a = Node::new();
    let node_b = Node::new();
    let topic = TopicKey::new();

    let registry_a = node_a.open_registry(topic).await;
    let registry_b = node_b.open_registry(topic).await;
    node_a.swarm.swarm(&registry_a).await.unwrap();
    node_b.swarm.swarm(&registry_b).await.unwrap();

    let (conn_a, _conn_b) = connect(&node_a, &node_b);
    wait_for_session_count(&registry_a.muxer(), 1).await;
    wait_for_session_count(&registry_b.muxer(), 1).await;

    conn_a.close();
    wait_for_session_count(&registry_a.muxer(), 0).await;
    wait_for_session_count(&registry_b.muxer(), 0).await;
}

/// Joining a topic twice on a live swarm keeps exactly one session per
/// peer, and both join calls see the same muxer.
#[tokio::test]
async fn test_rejoining_topic_is_idempotent_with_connections() {
    init_tracing();
    let node_a = Node::new();
    let node_b = Node::new();
    let topic = TopicKey::new();

    let registry_a = node_a.open_registry(topic).await;
    let registry_b = node_b.open_registry(topic).await;
    let first = node_a.swarm.swarm(&registry_a).await.unwrap();
    node_b.swarm.swarm(&registry_b).await.unwrap();

    connect(&node_a, &node_b);
    wait_for_session_count(&registry_a.muxer(), 1).await;

    let second = node_a.swarm.join(topic, JoinOptions::default()).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry_a.muxer().session_count().await, 1);
}

/// Two peers that both opt in to the insecure default topic find the same
/// topic and replicate.
#[tokio::test]
async fn test_default_topic_opt_in_connects_peers() {
    init_tracing();
    let node_a = Node::new();
    let node_b = Node::new();

    let options = RegistryOptions {
        topic: None,
        allow_default_topic: true,
    };
    let registry_a = FeedRegistry::open(
        node_a.store.clone(),
        Arc::new(MemoryRecordLog::new()),
        options.clone(),
    )
    .await
    .unwrap();
    let registry_b = FeedRegistry::open(
        node_b.store.clone(),
        Arc::new(MemoryRecordLog::new()),
        options,
    )
    .await
    .unwrap();
    assert_eq!(registry_a.topic(), registry_b.topic());

    node_a.swarm.swarm(&registry_a).await.unwrap();
    node_b.swarm.swarm(&registry_b).await.unwrap();

    let feed = registry_a.create_writer(Some("shared")).await.unwrap();
    connect(&node_a, &node_b);
    wait_for_feed_count(&registry_b, 1).await;
    assert!(registry_b.by_key(&feed.key).await.is_some());
}

/// One topic failing to open leaves other topics untouched.
#[tokio::test]
async fn test_topic_failures_are_isolated() {
    init_tracing();
    let node = Node::new();

    // A registry with no topic key fails to open...
    let failed = FeedRegistry::open(
        node.store.clone(),
        Arc::new(MemoryRecordLog::new()),
        RegistryOptions::default(),
    )
    .await;
    assert!(failed.is_err());

    // ...while a healthy topic on the same node works end to end.
    let topic = TopicKey::new();
    let registry = node.open_registry(topic).await;
    node.swarm.swarm(&registry).await.unwrap();
    let feed = registry.create_writer(Some("fine")).await.unwrap();
    assert!(registry.by_key(&feed.key).await.is_some());
}
