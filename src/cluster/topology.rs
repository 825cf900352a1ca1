//! Cluster topology registry and the `CLUSTER NODES` parser.
//!
//! Each line of a `CLUSTER NODES` reply describes one node:
//!
//! ```text
//! <id> <ip:port[@cport]> <flags> <master|-> <ping> <pong> <epoch> <link> [<slot> ...]
//! ```
//!
//! Parsing updates [`NodeRecord`]s in a [`NodeRegistry`] in place and
//! returns the slot ranges of connected masters in scan order, so that a
//! later line claiming the same slots wins.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::cluster::node::{NodeId, NodeRecord};
use crate::cluster::slot::SlotRange;
use crate::{Error, Result};

/// Address nodes report for themselves when bound to loopback.
pub const LOOPBACK: &str = "127.0.0.1";

const MIN_FIELDS: usize = 8;

/// Arena of node records keyed by node ID.
///
/// Records are never removed by a refresh; a node missing from a later reply
/// keeps its last known state. Iteration follows insertion order.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: Vec<NodeRecord>,
    index: HashMap<NodeId, usize>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `id`, creating an empty one if needed.
    pub fn get_or_create(&mut self, id: &str) -> &mut NodeRecord {
        let slot = match self.index.get(id) {
            Some(&slot) => slot,
            None => {
                let id = NodeId::new(id);
                self.nodes.push(NodeRecord::new(id.clone()));
                self.index.insert(id, self.nodes.len() - 1);
                self.nodes.len() - 1
            }
        };
        &mut self.nodes[slot]
    }

    /// Returns the record for `id`.
    pub fn get(&self, id: &str) -> Option<&NodeRecord> {
        self.index.get(id).map(|&slot| &self.nodes[slot])
    }

    /// Returns the record for `id` mutably.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut NodeRecord> {
        match self.index.get(id) {
            Some(&slot) => Some(&mut self.nodes[slot]),
            None => None,
        }
    }

    /// Iterates over records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.iter()
    }

    /// Returns the number of known nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no node is known.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Forgets every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.index.clear();
    }
}

/// A slot range owned by the node at `address:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAssignment {
    /// IPv4 address of the owner.
    pub address: String,
    /// Port of the owner.
    pub port: u16,
    /// The owned range.
    pub range: SlotRange,
}

/// Parses a `CLUSTER NODES` reply into `registry`.
///
/// `origin` is the address the reply was fetched through; nodes reporting
/// [`LOOPBACK`] are rewritten to it. Lines with missing fields are skipped
/// with a warning. Empty input is a no-op.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if a port, ping, pong, epoch or slot field is
/// not a valid number. The registry may have been partially updated.
pub fn parse_cluster_nodes(
    registry: &mut NodeRegistry,
    text: &str,
    origin: Option<&str>,
) -> Result<Vec<SlotAssignment>> {
    let mut assignments = Vec::new();
    let mut replica_links = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < MIN_FIELDS {
            warn!(line, "skipping truncated node line");
            continue;
        }

        let (ip, port) = parse_address(fields[1])?;
        let ip = match origin {
            Some(origin) if ip == LOOPBACK => origin,
            _ => ip,
        };
        let is_master = fields[2].contains("master");
        let ping_sent = parse_number(fields[4], "ping")?;
        let pong_received = parse_number(fields[5], "pong")?;
        let epoch = parse_number(fields[6], "epoch")?;
        let connected = fields[7] == "connected";

        let node = registry.get_or_create(fields[0]);
        node.address = ip.to_string();
        node.port = port;
        if is_master {
            node.set_master();
        } else {
            let master_id = match fields[3] {
                "-" => None,
                id => Some(NodeId::new(id)),
            };
            if let Some(master_id) = &master_id {
                replica_links.push((master_id.clone(), node.id().clone()));
            }
            node.set_replica(master_id);
        }
        node.ping_sent = ping_sent;
        node.pong_received = pong_received;
        node.epoch = epoch;

        if connected {
            node.set_connected();
            if node.is_master() {
                let ranges = parse_slots(&fields[MIN_FIELDS..])?;
                assignments.extend(ranges.iter().map(|&range| SlotAssignment {
                    address: node.address.clone(),
                    port,
                    range,
                }));
                node.set_slots(ranges);
            }
        } else {
            node.set_disconnected();
        }

        debug!(node = %node, "parsed node line");
    }

    for (master_id, replica_id) in replica_links {
        if let Some(master) = registry.get_mut(master_id.as_str()) {
            master.add_replica(replica_id);
        }
    }

    Ok(assignments)
}

/// Splits `ip:port[@cport][,hostname]`.
fn parse_address(field: &str) -> Result<(&str, u16)> {
    let (ip, rest) = field.split_once(':').ok_or_else(|| Error::Protocol {
        message: format!("invalid node address: {}", field),
    })?;
    let port = rest.split(['@', ',']).next().unwrap_or(rest);
    let port = port.parse::<u16>().map_err(|_| Error::Protocol {
        message: format!("invalid node port: {}", field),
    })?;
    Ok((ip, port))
}

fn parse_number(field: &str, name: &str) -> Result<u64> {
    field.parse::<u64>().map_err(|_| Error::Protocol {
        message: format!("invalid {}: {}", name, field),
    })
}

/// Parses `start-end` and single-slot tokens, skipping `[...]` migration
/// markers.
fn parse_slots(tokens: &[&str]) -> Result<Vec<SlotRange>> {
    let mut ranges = Vec::with_capacity(tokens.len());
    for token in tokens {
        if token.starts_with('[') {
            continue;
        }
        let range = match token.split_once('-') {
            Some((start, end)) => SlotRange::new(parse_slot(start)?, parse_slot(end)?),
            None => {
                let slot = parse_slot(token)?;
                SlotRange::new(slot, slot)
            }
        };
        ranges.push(range);
    }
    Ok(ranges)
}

fn parse_slot(field: &str) -> Result<u16> {
    field.parse::<u16>().map_err(|_| Error::Protocol {
        message: format!("invalid slot: {}", field),
    })
}
