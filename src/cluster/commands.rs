//! Cluster management command builders.

use crate::core::command::Cmd;

/// Creates a CLUSTER NODES command.
///
/// The reply is a bulk string with one line per known node: its ID,
/// address, flags, master ID, ping/pong times, epoch, link state and the
/// slots it serves.
pub fn cluster_nodes() -> Cmd {
    Cmd::new("CLUSTER").arg("NODES")
}
