//! Records describing the members of a cluster.

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;

use crate::cluster::slot::SlotRange;

/// Unique identifier of a cluster node.
///
/// Node IDs are 40-character hex strings assigned by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a new NodeId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the node ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeRole {
    /// Owns slots.
    Master,
    /// Mirrors a master.
    #[default]
    Replica,
}

/// Link state of a node as last reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// The reporting node has a live link to this node.
    Connected,
    /// The link is down.
    #[default]
    Disconnected,
}

/// Everything known about one cluster member.
///
/// Records are updated in place on every refresh; the identity never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    id: NodeId,
    /// IPv4 address the node is reachable at.
    pub address: String,
    /// Client port.
    pub port: u16,
    /// Configuration epoch.
    pub epoch: u64,
    /// Time the last PING was sent.
    pub ping_sent: u64,
    /// Time the last PONG was received.
    pub pong_received: u64,
    role: NodeRole,
    master_id: Option<NodeId>,
    replicas: BTreeSet<NodeId>,
    link: LinkState,
    slots: Vec<SlotRange>,
}

impl NodeRecord {
    /// Creates an empty record for `id`.
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            address: String::new(),
            port: 0,
            epoch: 0,
            ping_sent: 0,
            pong_received: 0,
            role: NodeRole::default(),
            master_id: None,
            replicas: BTreeSet::new(),
            link: LinkState::default(),
            slots: Vec::new(),
        }
    }

    /// Returns the node ID.
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Returns the role.
    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Returns true if the node is a master.
    pub fn is_master(&self) -> bool {
        self.role == NodeRole::Master
    }

    /// Returns the master this node replicates, if it is a replica.
    pub fn master_id(&self) -> Option<&NodeId> {
        self.master_id.as_ref()
    }

    /// Returns the replicas known to follow this node.
    pub fn replicas(&self) -> impl Iterator<Item = &NodeId> {
        self.replicas.iter()
    }

    /// Returns the link state.
    pub fn link(&self) -> LinkState {
        self.link
    }

    /// Returns true if the link is up.
    pub fn is_connected(&self) -> bool {
        self.link == LinkState::Connected
    }

    /// Returns every slot range the node serves.
    pub fn slots(&self) -> &[SlotRange] {
        &self.slots
    }

    /// Returns the first slot range the node serves.
    pub fn slot_range(&self) -> Option<SlotRange> {
        self.slots.first().copied()
    }

    /// Marks the node as a master, dropping the master link and replicas.
    pub fn set_master(&mut self) {
        self.role = NodeRole::Master;
        self.master_id = None;
        self.replicas.clear();
    }

    /// Marks the node as a replica of `master_id`. A replica serves no
    /// slots and has no replicas of its own.
    pub fn set_replica(&mut self, master_id: Option<NodeId>) {
        self.role = NodeRole::Replica;
        self.master_id = master_id;
        self.replicas.clear();
        self.slots.clear();
    }

    /// Marks the link as up.
    pub fn set_connected(&mut self) {
        self.link = LinkState::Connected;
    }

    /// Marks the link as down. Slot ranges are kept as last reported.
    pub fn set_disconnected(&mut self) {
        self.link = LinkState::Disconnected;
    }

    /// Registers a replica; having one makes this node a master.
    pub fn add_replica(&mut self, replica: NodeId) {
        self.replicas.insert(replica);
        self.role = NodeRole::Master;
    }

    /// Replaces the served slot ranges.
    pub fn set_slots(&mut self, slots: Vec<SlotRange>) {
        self.slots = slots;
    }

    /// Resets every field except the ID.
    pub fn clear(&mut self) {
        *self = Self::new(self.id.clone());
    }
}

impl fmt::Display for NodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}({})", self.id, self.address, self.port, self.epoch)?;

        match self.role {
            NodeRole::Master => {
                let range = self.slot_range().unwrap_or(SlotRange::new(0, 0));
                write!(f, " Master {}", range)?;
            }
            NodeRole::Replica => {
                let master = self.master_id.as_ref().map(NodeId::as_str).unwrap_or("");
                write!(f, " Slave {}", master)?;
            }
        }

        match self.link {
            LinkState::Connected => f.write_str(" Connected")?,
            LinkState::Disconnected => f.write_str(" Disconnected")?,
        }

        write!(f, " {}|{}", self.ping_sent, self.pong_received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> NodeRecord {
        NodeRecord::new(NodeId::new(id))
    }

    #[test]
    fn test_node_id() {
        let id: NodeId = "abc123".into();
        assert_eq!(id.as_str(), "abc123");
        assert_eq!(id.to_string(), "abc123");
    }

    #[test]
    fn test_new_record_defaults() {
        let node = record("a");
        assert_eq!(node.role(), NodeRole::Replica);
        assert_eq!(node.link(), LinkState::Disconnected);
        assert!(node.master_id().is_none());
        assert!(node.slot_range().is_none());
    }

    #[test]
    fn test_add_replica_promotes_to_master() {
        let mut node = record("a");
        node.set_replica(Some(NodeId::new("m")));
        node.add_replica(NodeId::new("x"));
        assert!(node.is_master());
        assert_eq!(node.replicas().count(), 1);
    }

    #[test]
    fn test_set_master_clears_replicas() {
        let mut node = record("a");
        node.set_master();
        node.add_replica(NodeId::new("x"));
        assert!(node.is_master());
        assert_eq!(
            node.replicas().cloned().collect::<Vec<_>>(),
            vec![NodeId::new("x")]
        );

        node.set_master();
        assert!(node.is_master());
        assert_eq!(node.replicas().count(), 0);
    }

    #[test]
    fn test_set_replica_drops_slots_and_replicas() {
        let mut node = record("a");
        node.set_master();
        node.add_replica(NodeId::new("x"));
        node.set_slots(vec![SlotRange::new(0, 100)]);

        node.set_replica(Some(NodeId::new("m")));
        assert_eq!(node.role(), NodeRole::Replica);
        assert_eq!(node.master_id(), Some(&NodeId::new("m")));
        assert_eq!(node.replicas().count(), 0);
        assert!(node.slots().is_empty());
    }

    #[test]
    fn test_disconnect_keeps_stale_slots() {
        let mut node = record("a");
        node.set_master();
        node.set_connected();
        node.set_slots(vec![SlotRange::new(0, 100)]);
        node.set_disconnected();
        assert!(!node.is_connected());
        assert_eq!(node.slot_range(), Some(SlotRange::new(0, 100)));
    }

    #[test]
    fn test_clear_keeps_identity() {
        let mut node = record("a");
        node.address = "10.0.0.5".to_string();
        node.port = 7000;
        node.epoch = 3;
        node.set_master();
        node.set_connected();
        node.set_slots(vec![SlotRange::new(0, 100)]);

        node.clear();
        assert_eq!(node, record("a"));
        assert_eq!(node.id().as_str(), "a");
    }

    #[test]
    fn test_display_master() {
        let mut node = record("abc");
        node.address = "10.0.0.5".to_string();
        node.port = 7000;
        node.epoch = 1;
        node.ping_sent = 10;
        node.pong_received = 20;
        node.set_master();
        node.set_connected();
        node.set_slots(vec![SlotRange::new(0, 8191), SlotRange::new(9000, 9001)]);
        assert_eq!(
            node.to_string(),
            "abc 10.0.0.5:7000(1) Master 0-8191 Connected 10|20"
        );
    }

    #[test]
    fn test_display_replica() {
        let mut node = record("def");
        node.address = "10.0.0.6".to_string();
        node.port = 7001;
        node.set_replica(Some(NodeId::new("abc")));
        assert_eq!(
            node.to_string(),
            "def 10.0.0.6:7001(0) Slave abc Disconnected 0|0"
        );
    }
}
