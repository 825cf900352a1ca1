//! Shared fixtures for the mock-backed integration tests.

#![allow(dead_code)]

use shardmux::testing::MockNode;

/// A `CLUSTER NODES` line for a connected master on a mock node.
pub fn master_line(id: &str, node: &MockNode, ranges: &str) -> String {
    format!(
        "{} 127.0.0.1:{}@{} master - 0 0 1 connected {}\n",
        id,
        node.port(),
        u32::from(node.port()) + 10000,
        ranges
    )
}

/// A `CLUSTER NODES` line for a connected replica of `master`.
pub fn replica_line(id: &str, node: &MockNode, master: &str) -> String {
    format!(
        "{} 127.0.0.1:{} slave {} 0 0 1 connected\n",
        id,
        node.port(),
        master
    )
}

/// Two masters splitting the slot space at 8192; `a` answers CLUSTER NODES.
pub async fn two_masters() -> (MockNode, MockNode) {
    let a = MockNode::start().await;
    let b = MockNode::start().await;
    let text = format!(
        "{}{}",
        master_line("node-a", &a, "0-8191"),
        master_line("node-b", &b, "8192-16383")
    );
    a.set_cluster_nodes(&text);
    b.set_cluster_nodes(&text);
    (a, b)
}
