//! RESP (Redis Serialization Protocol) codec.
//!
//! Encodes commands sent to cluster nodes and decodes their replies.
//!
//! ## Modules
//!
//! - [`codec`] - Encoder and decoder for RESP protocol
//! - [`error`] - Error types shared by the whole crate
//! - [`frame`] - Frame types representing RESP data structures

pub mod codec;
/// Error types.
pub mod error;
pub mod frame;
