//! End-to-end routing tests against in-process mock nodes.
//!
//! Run with:
//! ```bash
//! cargo test --test cluster_integration --features test-utils
//! ```

#![cfg(feature = "test-utils")]

mod common;

use std::time::Duration;

use bytes::Bytes;
use shardmux::cluster::{NodeRole, SLOT_COUNT};
use shardmux::testing::MockNode;
use shardmux::{key_slot, ClusterBuilder, Error, RefreshOutcome};

use common::{master_line, replica_line, two_masters};

#[tokio::test]
async fn test_every_key_routes_to_its_slot_owner() {
    let (a, b) = two_masters().await;
    let pool = ClusterBuilder::new()
        .address(a.address())
        .diagnostics(true)
        .build_pool()
        .await
        .expect("failed to connect");

    assert_eq!(pool.covered_slots().await, usize::from(SLOT_COUNT));

    for i in 0..10_000 {
        let key = format!("key:{}", i);
        let conn = pool.resolve(&key).await.expect("unrouted key");
        let expected = if key_slot(&key) < 8192 { a.port() } else { b.port() };
        assert_eq!(conn.port(), expected, "wrong owner for {}", key);

        // Same table, same answer.
        assert_eq!(pool.resolve(&key).await, Some(conn));
    }
}

#[tokio::test]
async fn test_builder_resolves_host_names() {
    let (a, _b) = two_masters().await;
    let pool = ClusterBuilder::new()
        .address(format!("redis://localhost:{}", a.port()))
        .build_pool()
        .await
        .expect("failed to connect");

    let seed = pool.slot_owner(0).await.expect("slot 0 unrouted");
    assert_eq!(seed.host(), "127.0.0.1");
}

#[tokio::test]
async fn test_seed_failure_fails_construction() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let result = ClusterBuilder::new()
        .address(format!("127.0.0.1:{}", port))
        .connection_timeout(Some(Duration::from_secs(1)))
        .build_pool()
        .await;
    assert!(matches!(result, Err(Error::Io { .. }) | Err(Error::Timeout { .. })));
}

#[tokio::test]
async fn test_standalone_node_serves_every_slot() {
    let node = MockNode::start().await;
    let client = ClusterBuilder::new()
        .address(node.address())
        .build()
        .await
        .expect("failed to connect");

    assert!(client.pool().is_standalone().await);
    assert!(client.set("foo", Bytes::from("bar")).await.unwrap());
    assert!(client.set("somekey", Bytes::from("x")).await.unwrap());
    assert_eq!(node.command_count("SET"), 2);
    assert_eq!(client.refresh().await.unwrap(), RefreshOutcome::Standalone);
}

#[tokio::test]
async fn test_replicas_are_linked_to_masters() {
    let master = MockNode::start().await;
    let replica = MockNode::start().await;
    let text = format!(
        "{}{}",
        replica_line("replica-1", &replica, "master-1"),
        master_line("master-1", &master, "0-16383"),
    );
    master.set_cluster_nodes(&text);

    let pool = ClusterBuilder::new()
        .address(master.address())
        .build_pool()
        .await
        .expect("failed to connect");

    let nodes = pool.nodes().await;
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].id().as_str(), "replica-1");

    let replica_record = pool.node("replica-1").await.unwrap();
    assert_eq!(replica_record.role(), NodeRole::Replica);
    assert_eq!(
        replica_record.master_id().map(|id| id.as_str()),
        Some("master-1")
    );
    assert!(replica_record.slots().is_empty());

    let master_record = pool.node("master-1").await.unwrap();
    assert!(master_record.is_master());
    assert_eq!(master_record.replicas().count(), 1);

    // Only the master owns slots.
    let owner = pool.slot_owner(100).await.unwrap();
    assert_eq!(owner.port(), master.port());
}

#[tokio::test]
async fn test_commands_reach_the_owning_node() {
    let (a, b) = two_masters().await;
    let client = ClusterBuilder::new()
        .address(a.address())
        .build()
        .await
        .expect("failed to connect");

    // "bar" hashes to 5061, "foo" to 12182.
    assert!(client.set("bar", Bytes::from("1")).await.unwrap());
    assert!(client.set("foo", Bytes::from("2")).await.unwrap());
    assert_eq!(a.command_count("SET"), 1);
    assert_eq!(b.command_count("SET"), 1);

    assert_eq!(client.get("bar").await.unwrap(), Some(Bytes::from("1")));
    assert_eq!(client.incr("foo").await.unwrap(), 3);

    assert!(client.flush_all().await);
    assert_eq!(client.get("foo").await.unwrap(), None);
}

#[tokio::test]
async fn test_resolve_all_with_hash_tags() {
    let (a, _b) = two_masters().await;
    let pool = ClusterBuilder::new()
        .address(a.address())
        .hash_tags(true)
        .diagnostics(true)
        .build_pool()
        .await
        .expect("failed to connect");

    let same = ["{user1000}.following", "{user1000}.followers"];
    let conn = pool.resolve_all(&same).await.expect("tagged keys split");
    assert_eq!(Some(conn), pool.resolve("user1000").await);

    assert!(pool.resolve_all(&["foo", "bar"]).await.is_none());
}

#[tokio::test]
async fn test_refresh_after_failover() {
    let (a, b) = two_masters().await;
    let client = ClusterBuilder::new()
        .address(a.address())
        .build()
        .await
        .expect("failed to connect");
    assert_eq!(client.pool().slot_owner(9000).await.unwrap().port(), b.port());

    // b's slots move to a; b stays known but reports a broken link.
    a.set_cluster_nodes(&format!(
        "{}node-b 127.0.0.1:{} master,fail - 0 0 1 disconnected\n",
        master_line("node-a", &a, "0-16383"),
        b.port()
    ));
    let outcome = client.refresh().await.unwrap();
    assert_eq!(
        outcome,
        RefreshOutcome::Updated {
            nodes: 2,
            covered: 16384
        }
    );
    assert_eq!(client.pool().slot_owner(9000).await.unwrap().port(), a.port());
    assert!(!client.pool().node("node-b").await.unwrap().is_connected());
}

#[tokio::test]
async fn test_password_is_sent_on_connect() {
    let node = MockNode::start().await;
    node.set_password("secret");
    node.set_cluster_nodes(&master_line("solo", &node, "0-16383"));

    let client = ClusterBuilder::new()
        .address(node.address())
        .password("secret")
        .build()
        .await
        .expect("failed to connect");

    assert_eq!(node.command_count("AUTH"), 1);
    assert_eq!(client.pool().covered_slots().await, usize::from(SLOT_COUNT));
    assert!(client.set("k", Bytes::from("v")).await.unwrap());
}

#[tokio::test]
async fn test_describe_lists_every_node() {
    let (a, b) = two_masters().await;
    let pool = ClusterBuilder::new()
        .address(a.address())
        .build_pool()
        .await
        .expect("failed to connect");

    let description = pool.describe().await;
    let lines: Vec<&str> = description.split("\r\n").collect();
    assert_eq!(
        lines,
        vec![
            format!("node-a 127.0.0.1:{}(1) Master 0-8191 Connected 0|0", a.port()),
            format!("node-b 127.0.0.1:{}(1) Master 8192-16383 Connected 0|0", b.port()),
        ]
    );
}
