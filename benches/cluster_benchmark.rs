//! Benchmarks for slot hashing, topology parsing and key routing.
//!
//! Run benchmarks:
//! ```bash
//! cargo bench --bench cluster_benchmark
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shardmux::cluster::{hash_slot, parse_cluster_nodes, NodeRegistry};
use shardmux::{key_slot, AddressKey, ConnectionPool, PoolConfig};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

/// Builds a `CLUSTER NODES` reply with `masters` masters, one replica each.
fn cluster_nodes_text(masters: u16) -> String {
    let per_master = 16384 / masters;
    let mut text = String::new();
    for i in 0..masters {
        let start = i * per_master;
        let end = if i + 1 == masters { 16383 } else { start + per_master - 1 };
        text.push_str(&format!(
            "master{:036} 10.0.0.{}:7000@17000 master - 0 1700000000000 {} connected {}-{}\n",
            i,
            i + 1,
            i + 1,
            start,
            end
        ));
        text.push_str(&format!(
            "replica{:035} 10.0.1.{}:7000@17000 slave master{:036} 0 1700000000000 {} connected\n",
            i,
            i + 1,
            i,
            i + 1
        ));
    }
    text
}

/// Benchmark: slot calculation for different key lengths.
fn bench_key_slot(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_slot");

    for size in [8, 32, 128, 1024].iter() {
        let key = vec![b'k'; *size];
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &key, |b, key| {
            b.iter(|| key_slot(black_box(key)));
        });
    }

    group.bench_function("hash_tag", |b| {
        b.iter(|| hash_slot(black_box(b"{user1000}.following"), true));
    });

    group.finish();
}

/// Benchmark: packing an address into its key.
fn bench_address_key(c: &mut Criterion) {
    c.bench_function("address_key", |b| {
        b.iter(|| AddressKey::new(black_box("192.168.100.200"), black_box(7000)));
    });
}

/// Benchmark: parsing `CLUSTER NODES` replies of different sizes.
fn bench_parse_cluster_nodes(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_cluster_nodes");

    for masters in [3u16, 16, 64].iter() {
        let text = cluster_nodes_text(*masters);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(masters), &text, |b, text| {
            b.iter(|| {
                let mut registry = NodeRegistry::new();
                parse_cluster_nodes(&mut registry, black_box(text), Some("10.0.0.1"))
                    .expect("parse failed")
            });
        });
    }

    group.finish();
}

/// Benchmark: resolving keys through a pool whose slots point at local
/// listeners that never answer.
fn bench_resolve(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let pool = rt.block_on(async {
        let pool = ConnectionPool::new(PoolConfig::default());
        let mut start = 0;
        for _ in 0..3 {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            tokio::spawn(async move {
                let mut sockets = Vec::new();
                while let Ok((socket, _)) = listener.accept().await {
                    sockets.push(socket);
                }
            });
            let end = (start + 5461).min(16383);
            pool.set_slots("127.0.0.1", port, start, end).await;
            start = end + 1;
        }
        pool
    });

    let keys: Vec<String> = (0..1024).map(|i| format!("bench:key:{}", i)).collect();

    c.bench_function("resolve", |b| {
        let mut i = 0;
        b.to_async(&rt).iter(|| {
            i = (i + 1) % keys.len();
            let key = &keys[i];
            let pool = &pool;
            async move { pool.resolve(black_box(key)).await }
        });
    });

    c.bench_function("resolve_all", |b| {
        let pair = ["{bench}:a", "{bench}:b"];
        b.to_async(&rt)
            .iter(|| async { pool.resolve_all(black_box(&pair)).await });
    });
}

criterion_group!(
    benches,
    bench_key_slot,
    bench_address_key,
    bench_parse_cluster_nodes,
    bench_resolve
);
criterion_main!(benches);
