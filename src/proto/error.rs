use std::io;

use thiserror::Error;

/// Result type alias for shardmux operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while routing to or talking with cluster nodes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An IO error occurred.
    #[error("IO error: {source}")]
    Io {
        /// The underlying IO error.
        #[from]
        source: io::Error,
    },

    /// A protocol error occurred.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the error.
        message: String,
    },

    /// The server returned an error.
    #[error("server error: {message}")]
    Server {
        /// Error message from server.
        message: String,
    },

    /// Authentication failed.
    #[error("authentication failed")]
    Auth,

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of invalid argument.
        message: String,
    },

    /// Decoding failed.
    #[error("decode error: {source}")]
    Decode {
        /// Underlying decode error.
        #[from]
        source: DecodeError,
    },

    /// A bounded operation did not finish in time.
    #[error("{operation} timed out")]
    Timeout {
        /// The operation that timed out (e.g. "connect", "CLUSTER NODES").
        operation: &'static str,
    },

    /// The connection was closed before the command could complete.
    #[error("connection closed")]
    Closed,

    /// The node runs standalone and rejected a cluster command.
    ///
    /// The connection pool treats this as a capability signal and routes
    /// every slot to the queried node.
    #[error("cluster support disabled")]
    ClusterSupportDisabled,

    /// No connection owns the slot a key hashes to.
    #[error("slot {slot} is not covered by any node")]
    SlotNotCovered {
        /// The slot number (0-16383).
        slot: u16,
    },

    /// Keys of a multi-key command live on different connections.
    #[error("CROSSSLOT keys {first} and {second} map to different nodes")]
    CrossSlot {
        /// A key routed to the first connection.
        first: String,
        /// The first key routed elsewhere.
        second: String,
    },
}

impl Error {
    /// Returns true if the error means the underlying socket is unusable.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Error::Io { .. } | Error::Closed | Error::Timeout { .. } | Error::Decode { .. }
        )
    }
}

/// Error returned when frame decoding fails.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    /// Creates a new decode error with the given description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
