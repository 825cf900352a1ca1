use bytes::Bytes;

/// A RESP (Redis Serialization Protocol) frame.
///
/// Covers the RESP2 frame kinds a cluster node replies with:
/// - SimpleString: status replies like "OK"
/// - Error: error replies from the node
/// - Integer: numeric replies
/// - BulkString: binary-safe payloads, including the `CLUSTER NODES` report
/// - Array: command arguments and multi-value replies
/// - Null: the null array (`*-1`)
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string (+OK).
    SimpleString(Vec<u8>),
    /// Error (-ERR).
    Error(Vec<u8>),
    /// Integer (:1000).
    Integer(i64),
    /// Bulk string ($6\r\nfoobar).
    BulkString(Option<Bytes>),
    /// Array (*2\r\n...).
    Array(Vec<Frame>),
    /// Null ($-1 or *-1).
    Null,
}

impl Frame {
    /// Returns the textual payload of a string-like frame.
    ///
    /// Simple strings and non-null bulk strings yield their content (lossily
    /// decoded as UTF-8); every other frame kind yields `None`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Frame::SimpleString(s) => Some(String::from_utf8_lossy(s).into_owned()),
            Frame::BulkString(Some(b)) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    /// Returns true if this frame is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }

    /// Returns true if this frame is Null or a null bulk string.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null | Frame::BulkString(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_as_text() {
        let frame = Frame::SimpleString(b"OK".to_vec());
        assert_eq!(frame.as_text(), Some("OK".to_string()));

        let frame = Frame::BulkString(Some(Bytes::from("abc 127.0.0.1:7000")));
        assert_eq!(frame.as_text(), Some("abc 127.0.0.1:7000".to_string()));

        assert_eq!(Frame::Integer(42).as_text(), None);
        assert_eq!(Frame::BulkString(None).as_text(), None);
        assert_eq!(Frame::Error(b"ERR".to_vec()).as_text(), None);
    }

    #[test]
    fn test_frame_is_error() {
        assert!(Frame::Error(b"ERR".to_vec()).is_error());
        assert!(!Frame::SimpleString(b"OK".to_vec()).is_error());
    }

    #[test]
    fn test_frame_is_null() {
        assert!(Frame::Null.is_null());
        assert!(Frame::BulkString(None).is_null());
        assert!(!Frame::Integer(42).is_null());
    }
}
