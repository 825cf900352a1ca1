//! Slot-aware connection pool.
//!
//! The pool owns one [`NodeConnection`] per node address, the node registry
//! and the slot table. Lookups take a read lock on the routing state; a
//! refresh builds the new registry and table off to the side and publishes
//! both with a single write.

use std::collections::{HashMap, HashSet};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::cluster::address::AddressKey;
use crate::cluster::commands::cluster_nodes;
use crate::cluster::connection::NodeConnection;
use crate::cluster::errors::parse_server_error;
use crate::cluster::node::NodeRecord;
use crate::cluster::slot::{hash_slot, SlotTable};
use crate::cluster::topology::{parse_cluster_nodes, NodeRegistry, SlotAssignment};
use crate::core::connection::with_timeout;
use crate::core::{connect_node, resolve_ipv4, PoolConfig};
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// What a call to [`ConnectionPool::refresh`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A `CLUSTER NODES` reply was parsed and published.
    Updated {
        /// Nodes known after the refresh.
        nodes: usize,
        /// Slots with an owner after the refresh.
        covered: usize,
    },
    /// The node runs without cluster support; it now owns every slot.
    Standalone,
    /// Nothing to do: no connected node, or a reply without text.
    Skipped,
}

#[derive(Default)]
struct RoutingState {
    nodes: NodeRegistry,
    slots: SlotTable<NodeConnection>,
    standalone: Option<NodeConnection>,
}

#[derive(Default)]
struct Links {
    connections: HashMap<AddressKey, NodeConnection>,
    disconnected: HashSet<AddressKey>,
}

/// Routes keys to the connection owning their slot.
///
/// # Example
///
/// ```no_run
/// use shardmux::cluster::ConnectionPool;
/// use shardmux::core::PoolConfig;
///
/// # async fn example() -> shardmux::Result<()> {
/// let pool = ConnectionPool::connect("10.0.0.5", 7000, PoolConfig::default()).await?;
/// if let Some(conn) = pool.resolve("user:1000").await {
///     let value = conn.get("user:1000").await?;
///     # let _ = value;
/// }
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool {
    config: PoolConfig,
    routing: RwLock<RoutingState>,
    links: Mutex<Links>,
    refresh_lock: Mutex<()>,
}

impl ConnectionPool {
    /// Creates an empty pool. No slot is routed until a topology is
    /// loaded with [`refresh`](Self::refresh),
    /// [`apply_cluster_nodes`](Self::apply_cluster_nodes) or
    /// [`set_slots`](Self::set_slots).
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            routing: RwLock::new(RoutingState::default()),
            links: Mutex::new(Links::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Connects to a seed node and loads the initial topology from it.
    ///
    /// Host names are resolved to IPv4. A failed topology query is logged
    /// and the pool is returned anyway.
    ///
    /// # Errors
    ///
    /// Fails only if the seed cannot be resolved or connected to.
    pub async fn connect(host: &str, port: u16, config: PoolConfig) -> Result<Self> {
        let ip = resolve_ipv4(host, port).await?;
        let pool = Self::new(config);
        let seed = pool.get_or_create_connection(&ip, port).await?;

        let guard = pool.refresh_lock.lock().await;
        if let Err(e) = pool.update(&seed).await {
            warn!(seed = %seed, error = %e, "initial topology load failed");
        }
        drop(guard);

        Ok(pool)
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Returns the connection owning the slot of `key`.
    ///
    /// Returns `None` for an empty key or an unassigned slot.
    pub async fn resolve(&self, key: impl AsRef<[u8]>) -> Option<NodeConnection> {
        let key = key.as_ref();
        if key.is_empty() {
            return None;
        }

        let slot = hash_slot(key, self.config.hash_tags);
        let conn = self.routing.read().await.slots.get(slot).cloned();
        if conn.is_none() && self.config.diagnostics {
            error!(key = %String::from_utf8_lossy(key), slot, "no connection owns slot");
        }
        conn
    }

    /// Returns the connection owning every key, or `None` if the keys are
    /// spread over several connections (or any of them is unroutable).
    pub async fn resolve_all<K: AsRef<[u8]>>(&self, keys: &[K]) -> Option<NodeConnection> {
        if keys.is_empty() {
            return None;
        }

        let routing = self.routing.read().await;
        let mut owner: Option<&NodeConnection> = None;

        for (i, key) in keys.iter().enumerate() {
            let key = key.as_ref();
            if key.is_empty() {
                return None;
            }

            let slot = hash_slot(key, self.config.hash_tags);
            let Some(conn) = routing.slots.get(slot) else {
                if self.config.diagnostics {
                    error!(key = %String::from_utf8_lossy(key), slot, "no connection owns slot");
                }
                return None;
            };

            match owner {
                None => owner = Some(conn),
                Some(first) if first != conn => {
                    if self.config.diagnostics {
                        error!(
                            first = %String::from_utf8_lossy(keys[i - 1].as_ref()),
                            second = %String::from_utf8_lossy(key),
                            "keys map to different connections"
                        );
                    }
                    return None;
                }
                Some(_) => {}
            }
        }

        owner.cloned()
    }

    /// Returns the connection to `host:port`, opening and authenticating it
    /// if needed.
    ///
    /// A rejected password is logged; the connection is still returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `host` is not a dotted-quad
    /// IPv4 address or `port` is 0, and an IO or timeout error if the node
    /// is unreachable.
    pub async fn get_or_create_connection(&self, host: &str, port: u16) -> Result<NodeConnection> {
        let key = address_key(host, port)?;
        let mut links = self.links.lock().await;
        self.connection_locked(&mut links, key, host, port).await
    }

    async fn connection_locked(
        &self,
        links: &mut Links,
        key: AddressKey,
        host: &str,
        port: u16,
    ) -> Result<NodeConnection> {
        if let Some(conn) = links.connections.get(&key) {
            return Ok(conn.clone());
        }

        let multiplexed = connect_node(host, port, &self.config).await?;
        let conn = NodeConnection::new(key, host, port, multiplexed, self.config.command_timeout);

        if let Some(password) = &self.config.password {
            let auth = conn.authenticate(password);
            match with_timeout(self.config.connection_timeout, "auth", auth).await {
                Ok(true) => debug!(node = %conn, "authenticated"),
                Ok(false) => error!(node = %conn, "authentication rejected"),
                Err(e) => error!(node = %conn, error = %e, "authentication failed"),
            }
        }

        links.connections.insert(key, conn.clone());
        Ok(conn)
    }

    /// Returns the connection to `host:port`, replacing it first if it was
    /// marked disconnected or its socket is closed.
    ///
    /// Used for the refresh candidate and for every slot owner a refresh
    /// publishes.
    async fn repair_connection(&self, host: &str, port: u16) -> Result<NodeConnection> {
        let key = address_key(host, port)?;
        let mut links = self.links.lock().await;

        let closed = links.connections.get(&key).is_some_and(NodeConnection::is_closed);
        if links.disconnected.remove(&key) || closed {
            warn!(host, port, "replacing disconnected connection");
            if let Some(old) = links.connections.remove(&key) {
                old.close().await;
            }
        }

        self.connection_locked(&mut links, key, host, port).await
    }

    /// Reports that `conn` failed; the next refresh replaces it.
    pub async fn mark_disconnected(&self, conn: &NodeConnection) {
        let mut links = self.links.lock().await;
        let current = links.connections.get(&conn.key()) == Some(conn);
        if current && links.disconnected.insert(conn.key()) {
            warn!(node = %conn, "connection marked disconnected");
        }
    }

    /// Returns true if `conn` is waiting to be replaced.
    pub async fn is_disconnected(&self, conn: &NodeConnection) -> bool {
        self.links.lock().await.disconnected.contains(&conn.key())
    }

    /// Reloads the topology from the first connected node.
    ///
    /// Nodes are tried in registry order; in standalone mode the standalone
    /// node is queried. A disconnected connection is replaced before use.
    ///
    /// # Errors
    ///
    /// Returns the error that abandoned this cycle (timeout, IO, error
    /// reply, malformed reply). The previous topology stays in place.
    #[instrument(skip(self), level = "debug")]
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let _guard = self.refresh_lock.lock().await;

        let candidates: Vec<(String, u16)> = {
            let routing = self.routing.read().await;
            match &routing.standalone {
                Some(conn) => vec![(conn.host().to_string(), conn.port())],
                None => routing
                    .nodes
                    .iter()
                    .filter(|node| node.is_connected())
                    .map(|node| (node.address.clone(), node.port))
                    .collect(),
            }
        };

        for (host, port) in candidates {
            match self.repair_connection(&host, port).await {
                Ok(conn) => return self.update(&conn).await,
                Err(e) => warn!(%host, port, error = %e, "refresh candidate unreachable"),
            }
        }

        debug!("no connected node to refresh from");
        Ok(RefreshOutcome::Skipped)
    }

    /// Queries `conn` for `CLUSTER NODES` and publishes the result.
    async fn update(&self, conn: &NodeConnection) -> Result<RefreshOutcome> {
        let reply = conn
            .send_with_timeout(cluster_nodes(), self.config.topology_timeout)
            .await;

        let frame = match reply {
            Ok(frame) => frame,
            Err(e) => {
                if e.is_connection_failure() {
                    self.mark_disconnected(conn).await;
                }
                error!(node = %conn, error = %e, "CLUSTER NODES failed");
                return Err(e);
            }
        };

        let text = match frame {
            Frame::Error(message) => match parse_server_error(&message) {
                Error::ClusterSupportDisabled => {
                    self.enter_standalone(conn).await;
                    return Ok(RefreshOutcome::Standalone);
                }
                e => {
                    error!(node = %conn, error = %e, "CLUSTER NODES rejected");
                    return Err(e);
                }
            },
            frame => match frame.as_text() {
                Some(text) => text,
                None => {
                    debug!(node = %conn, "ignoring CLUSTER NODES reply without text");
                    return Ok(RefreshOutcome::Skipped);
                }
            },
        };

        self.publish(&text, conn.host()).await
    }

    /// Parses a `CLUSTER NODES` reply and publishes the result, as if it had
    /// been fetched through `origin`.
    ///
    /// Connections to the masters it names are opened as needed.
    pub async fn apply_cluster_nodes(&self, text: &str, origin: &str) -> Result<RefreshOutcome> {
        let _guard = self.refresh_lock.lock().await;
        self.publish(text, origin).await
    }

    async fn publish(&self, text: &str, origin: &str) -> Result<RefreshOutcome> {
        let (mut nodes, mut slots) = {
            let routing = self.routing.read().await;
            (routing.nodes.clone(), routing.slots.clone())
        };

        let assignments = match parse_cluster_nodes(&mut nodes, text, Some(origin)) {
            Ok(assignments) => assignments,
            Err(e) => {
                error!(%origin, error = %e, "malformed CLUSTER NODES reply");
                return Err(e);
            }
        };

        for SlotAssignment {
            address,
            port,
            range,
        } in assignments
        {
            match self.repair_connection(&address, port).await {
                Ok(conn) => {
                    slots.assign_range(usize::from(range.start), usize::from(range.end), &conn);
                }
                Err(e) => warn!(%address, port, %range, error = %e, "cannot reach slot owner"),
            }
        }

        let outcome = RefreshOutcome::Updated {
            nodes: nodes.len(),
            covered: slots.covered(),
        };

        let mut routing = self.routing.write().await;
        routing.nodes = nodes;
        routing.slots = slots;
        routing.standalone = None;
        drop(routing);

        info!(%origin, ?outcome, "topology refreshed");
        Ok(outcome)
    }

    async fn enter_standalone(&self, conn: &NodeConnection) {
        info!(node = %conn, "switching to non-cluster mode");
        let mut routing = self.routing.write().await;
        routing.slots.fill(conn);
        routing.standalone = Some(conn.clone());
    }

    /// Points slots `start..=end` at the connection to `host:port`.
    ///
    /// Returns how many slots were assigned: 0 if the connection cannot be
    /// created or `start > end`; slots past 16383 are skipped.
    pub async fn set_slots(&self, host: &str, port: u16, start: usize, end: usize) -> usize {
        let _guard = self.refresh_lock.lock().await;
        let conn = match self.get_or_create_connection(host, port).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(host, port, error = %e, "cannot assign slots");
                return 0;
            }
        };
        self.routing.write().await.slots.assign_range(start, end, &conn)
    }

    /// Closes every connection and forgets the topology.
    ///
    /// The pool can be reused afterwards as if freshly created with
    /// [`new`](Self::new). Calling this twice is harmless.
    pub async fn close(&self) {
        let _guard = self.refresh_lock.lock().await;

        let connections: Vec<NodeConnection> = {
            let mut links = self.links.lock().await;
            links.disconnected.clear();
            links.connections.drain().map(|(_, conn)| conn).collect()
        };
        for conn in &connections {
            conn.close().await;
        }

        let mut routing = self.routing.write().await;
        routing.nodes.clear();
        routing.slots.clear();
        routing.standalone = None;
        drop(routing);

        debug!(closed = connections.len(), "pool closed");
    }

    /// Sends FLUSHALL to every slot owner.
    ///
    /// Returns true if every owner acknowledged. Failing connections are
    /// marked disconnected.
    pub async fn flush_all(&self) -> bool {
        let owners = self.routing.read().await.slots.owners();
        let results = futures::future::join_all(owners.iter().map(|conn| conn.flush_all())).await;

        let mut all = true;
        for (conn, result) in owners.iter().zip(results) {
            match result {
                Ok(true) => {}
                Ok(false) => all = false,
                Err(e) => {
                    all = false;
                    if e.is_connection_failure() {
                        self.mark_disconnected(conn).await;
                    }
                    error!(node = %conn, error = %e, "FLUSHALL failed");
                }
            }
        }
        all
    }

    /// Returns a snapshot of every known node, in discovery order.
    pub async fn nodes(&self) -> Vec<NodeRecord> {
        self.routing.read().await.nodes.iter().cloned().collect()
    }

    /// Returns a snapshot of one node.
    pub async fn node(&self, id: &str) -> Option<NodeRecord> {
        self.routing.read().await.nodes.get(id).cloned()
    }

    /// Returns every open connection.
    pub async fn connections(&self) -> Vec<NodeConnection> {
        self.links.lock().await.connections.values().cloned().collect()
    }

    /// Returns the number of slots with an owner.
    pub async fn covered_slots(&self) -> usize {
        self.routing.read().await.slots.covered()
    }

    /// Returns the owner of `slot`.
    pub async fn slot_owner(&self, slot: u16) -> Option<NodeConnection> {
        self.routing.read().await.slots.get(slot).cloned()
    }

    /// Returns true if the cluster reported that clustering is disabled.
    pub async fn is_standalone(&self) -> bool {
        self.routing.read().await.standalone.is_some()
    }

    /// Returns one line per known node, joined with `\r\n`.
    pub async fn describe(&self) -> String {
        let routing = self.routing.read().await;
        routing
            .nodes
            .iter()
            .map(NodeRecord::to_string)
            .collect::<Vec<_>>()
            .join("\r\n")
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn address_key(host: &str, port: u16) -> Result<AddressKey> {
    AddressKey::new(host, port).ok_or_else(|| Error::InvalidArgument {
        message: format!("invalid node address {}:{}", host, port),
    })
}
