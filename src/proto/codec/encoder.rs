use std::fmt::Write as _;

use bytes::{BufMut, BytesMut};

use crate::proto::frame::Frame;

const CRLF: &[u8] = b"\r\n";

/// A RESP encoder that converts [`Frame`] types to bytes.
///
/// The encoder accumulates data in an internal buffer; [`take`](Encoder::take)
/// hands the bytes out and leaves the encoder ready for the next frame.
///
/// # Example
///
/// ```
/// use shardmux::proto::codec::Encoder;
/// use shardmux::proto::frame::Frame;
///
/// let mut encoder = Encoder::new();
/// encoder.encode(&Frame::SimpleString(b"OK".to_vec()));
/// assert_eq!(encoder.take().as_ref(), b"+OK\r\n");
/// ```
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Creates a new encoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes a frame into the internal buffer.
    pub fn encode(&mut self, frame: &Frame) {
        match frame {
            Frame::SimpleString(s) => self.put_line(b'+', s),
            Frame::Error(e) => self.put_line(b'-', e),
            Frame::Integer(n) => self.put_number(b':', *n),
            Frame::BulkString(Some(data)) => {
                self.put_number(b'$', data.len() as i64);
                self.buf.extend_from_slice(data);
                self.buf.extend_from_slice(CRLF);
            }
            Frame::BulkString(None) | Frame::Null => self.put_number(b'$', -1),
            Frame::Array(items) => {
                self.put_number(b'*', items.len() as i64);
                for item in items {
                    self.encode(item);
                }
            }
        }
    }

    /// Takes the encoded data from the buffer, leaving it empty.
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }

    fn put_line(&mut self, prefix: u8, payload: &[u8]) {
        self.buf.put_u8(prefix);
        self.buf.extend_from_slice(payload);
        self.buf.extend_from_slice(CRLF);
    }

    fn put_number(&mut self, prefix: u8, n: i64) {
        self.buf.put_u8(prefix);
        // Writing into BytesMut cannot fail.
        let _ = write!(self.buf, "{}", n);
        self.buf.extend_from_slice(CRLF);
    }
}
