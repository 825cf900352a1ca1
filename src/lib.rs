//! # Shardmux
//!
//! Slot-aware connection routing for Redis-protocol clusters.
//!
//! The [`ConnectionPool`] learns the cluster layout from `CLUSTER NODES`,
//! keeps one multiplexed connection per node and answers "which connection
//! owns this key?". [`ClusterClient`] forwards commands over it.
//!
//! ## Features
//!
//! - `test-utils` - in-process mock node for downstream tests
//!
//! ## Example
//!
//! ```no_run
//! use shardmux::ClusterBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = ClusterBuilder::new()
//!         .address("redis://10.0.0.5:7000")
//!         .build_pool()
//!         .await?;
//!
//!     if let Some(conn) = pool.resolve("user:1000").await {
//!         let _ = conn.get("user:1000").await?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod cluster;
pub mod core;
pub mod proto;

#[cfg(test)]
mod stress;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use crate::cluster::{
    key_slot, AddressKey, ClusterClient, ConnectionPool, NodeConnection, NodeRecord,
    RefreshOutcome,
};
pub use crate::core::{ClusterBuilder, Error, PoolConfig, Result};
