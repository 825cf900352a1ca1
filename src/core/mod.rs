//! # Core
//!
//! Connection handling and multiplexing shared by every node connection of
//! the cluster pool.
//!
//! ## Modules
//!
//! - [`connection`] - Framed single connection
//! - [`command`] - Command builders and reply conversions
//! - [`builder`] - Pool configuration and cluster builder
//! - [`multiplexed`] - Multiplexed connection for concurrent requests
//!

use std::net::{IpAddr, Ipv4Addr};

use tokio::net::TcpStream;
use tracing::debug;

pub use crate::proto::error::{Error, Result};

/// Pool configuration and cluster builder.
pub mod builder;
/// Command construction helpers.
pub mod command;
/// Low-level connection management.
pub mod connection;
/// Multiplexing logic.
pub mod multiplexed;

pub use builder::{ClusterBuilder, PoolConfig};
pub use multiplexed::MultiplexedConnection;

/// Opens a TCP connection to a node and wraps it in a multiplexed handle.
///
/// Establishment is bounded by `config.connection_timeout`. No command is
/// sent; authentication is left to the caller.
pub async fn connect_node(
    host: &str,
    port: u16,
    config: &PoolConfig,
) -> Result<MultiplexedConnection> {
    let stream = connection::with_timeout(config.connection_timeout, "connect", async {
        TcpStream::connect((host, port)).await.map_err(Error::from)
    })
    .await?;
    stream.set_nodelay(true)?;
    debug!(host, port, "connected to node");

    let connection = connection::Connection::new(stream);
    Ok(MultiplexedConnection::new(connection, config.queue_size))
}

/// Resolves `host` to a dotted-quad IPv4 address.
///
/// Literal IPv4 addresses are returned unchanged; host names are looked up
/// and the first IPv4 result wins.
pub async fn resolve_ipv4(host: &str, port: u16) -> Result<String> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip.to_string());
    }

    let addrs = tokio::net::lookup_host((host, port)).await?;
    for addr in addrs {
        if let IpAddr::V4(ip) = addr.ip() {
            return Ok(ip.to_string());
        }
    }

    Err(Error::InvalidArgument {
        message: format!("no IPv4 address found for {}", host),
    })
}
