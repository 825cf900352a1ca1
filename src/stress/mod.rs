//! Internal stress tests for routing under concurrency.
//!
//! Lookups run while refreshes swap the topology back and forth; every
//! lookup must see either the old or the new table, never a gap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cluster::ConnectionPool;
use crate::core::PoolConfig;
use crate::testing::MockNode;

fn layout(a: &MockNode, b: &MockNode, split: u16) -> String {
    format!(
        "a1 127.0.0.1:{} myself,master - 0 0 1 connected 0-{}\n\
         b2 127.0.0.1:{} master - 0 0 2 connected {}-16383\n",
        a.port(),
        split - 1,
        b.port(),
        split
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resolve_during_refresh() {
    let a = MockNode::start().await;
    let b = MockNode::start().await;
    a.set_cluster_nodes(&layout(&a, &b, 8192));

    let pool = Arc::new(
        ConnectionPool::connect("127.0.0.1", a.port(), PoolConfig::default())
            .await
            .unwrap(),
    );
    assert_eq!(pool.covered_slots().await, 16384);

    let done = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for task in 0..8 {
        let pool = pool.clone();
        let done = done.clone();
        readers.push(tokio::spawn(async move {
            let mut lookups = 0u64;
            while !done.load(Ordering::Relaxed) {
                for i in 0..100 {
                    let key = format!("stress:{}:{}", task, i);
                    assert!(pool.resolve(&key).await.is_some(), "miss for {}", key);
                    lookups += 1;
                }
                tokio::task::yield_now().await;
            }
            lookups
        }));
    }

    for round in 0..50u16 {
        let split = if round % 2 == 0 { 4096 } else { 12288 };
        a.set_cluster_nodes(&layout(&a, &b, split));
        pool.refresh().await.unwrap();
    }
    done.store(true, Ordering::Relaxed);

    let mut total = 0;
    for reader in readers {
        total += reader.await.unwrap();
    }
    assert!(total > 0);
    assert_eq!(pool.connections().await.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commands_over_shared_connections() {
    let a = MockNode::start().await;
    let pool = ConnectionPool::new(PoolConfig::default());
    pool.set_slots("127.0.0.1", a.port(), 0, 16383).await;
    let client = crate::ClusterClient::new(pool);

    let mut handles = Vec::new();
    for i in 0..1000 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let key = format!("counter:{}", i % 10);
            client.incr(&key).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut sum = 0;
    for i in 0..10 {
        let value = client.get(&format!("counter:{}", i)).await.unwrap().unwrap();
        sum += std::str::from_utf8(&value).unwrap().parse::<i64>().unwrap();
    }
    assert_eq!(sum, 1000);
    assert_eq!(a.connections_accepted(), 1);
}
