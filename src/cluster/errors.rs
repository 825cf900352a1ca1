//! Classification of error replies sent by cluster nodes.
//!
//! Two replies carry meaning beyond a plain server error:
//! - `... cluster support disabled` - the node runs standalone
//! - `NOAUTH` / `WRONGPASS` / `invalid password` - the credential was rejected

use crate::Error;

const CLUSTER_DISABLED: &str = "cluster support disabled";

/// Converts an error reply into a typed [`Error`].
///
/// # Arguments
///
/// * `error_msg` - The error message bytes
///   (e.g., `b"ERR This instance has cluster support disabled"`)
///
/// # Returns
///
/// - `Error::ClusterSupportDisabled` for standalone nodes answering a cluster command
/// - `Error::Auth` for rejected credentials
/// - `Error::Server` for other errors
pub fn parse_server_error(error_msg: &[u8]) -> Error {
    let msg = String::from_utf8_lossy(error_msg);
    let msg = msg.trim();

    if msg.contains(CLUSTER_DISABLED) {
        return Error::ClusterSupportDisabled;
    }

    if msg.starts_with("NOAUTH")
        || msg.starts_with("WRONGPASS")
        || msg.to_ascii_lowercase().contains("invalid password")
    {
        return Error::Auth;
    }

    Error::Server {
        message: msg.to_string(),
    }
}
