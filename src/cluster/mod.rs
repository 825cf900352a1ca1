//! # Cluster
//!
//! Client-side routing for a Redis-protocol cluster.
//!
//! ## Features
//!
//! - **Slot routing**: keys hash to one of 16384 slots (CRC16/XMODEM), each
//!   slot points at the connection of the master serving it
//! - **Topology discovery**: `CLUSTER NODES` is parsed into node records and
//!   a slot table, swapped in atomically on every refresh
//! - **Standalone fallback**: a node without cluster support serves every slot
//! - **Connection registry**: one multiplexed connection per node address,
//!   keyed by a packed IPv4/port value
//!
//! ## Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use shardmux::ClusterBuilder;
//!
//! # async fn example() -> shardmux::Result<()> {
//! let client = ClusterBuilder::new()
//!     .address("10.0.0.5:7000")
//!     .password("secret")
//!     .build()
//!     .await?;
//!
//! client.set("user:1000", Bytes::from("alice")).await?;
//! let pool = client.pool();
//! println!("{}", pool.describe().await);
//! # Ok(())
//! # }
//! ```

pub mod address;
mod client;
pub mod commands;
mod connection;
pub mod errors;
pub mod node;
mod pool;
pub mod slot;
pub mod topology;

pub use address::AddressKey;
pub use client::{ClusterClient, MAX_VALUE_LEN};
pub use connection::NodeConnection;
pub use node::{LinkState, NodeId, NodeRecord, NodeRole};
pub use pool::{ConnectionPool, RefreshOutcome};
pub use slot::{hash_slot, key_slot, SlotRange, SlotTable, SLOT_COUNT};
pub use topology::{parse_cluster_nodes, NodeRegistry, SlotAssignment};
