use bytes::{Buf, Bytes, BytesMut};

use crate::proto::error::DecodeError;
use crate::proto::frame::Frame;

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024; // 512 MB default

/// A streaming RESP decoder that converts bytes to [`Frame`] types.
///
/// Call [`append`](Decoder::append) when data arrives, then
/// [`decode`](Decoder::decode) until it returns `Ok(None)`. Nothing is
/// consumed from the buffer until a whole frame (including every nested
/// array element) is available.
///
/// # Example
///
/// ```
/// use shardmux::proto::codec::Decoder;
/// use shardmux::proto::frame::Frame;
///
/// let mut decoder = Decoder::new();
/// decoder.append(b"+OK\r\n");
/// let frame = decoder.decode().unwrap().unwrap();
/// assert_eq!(frame, Frame::SimpleString(b"OK".to_vec()));
/// ```
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    max_frame_size: usize,
}

impl Decoder {
    /// Creates a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a new decoder with a custom maximum frame size in bytes.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Appends raw bytes received from the network.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Attempts to decode one frame from the buffer.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, and an error if the data is
    /// malformed or exceeds the configured frame size.
    pub fn decode(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        if self.buf.len() > self.max_frame_size {
            return Err(DecodeError::new("buffer size exceeded maximum frame size"));
        }

        match self.parse(0)? {
            Some((frame, consumed)) => {
                self.buf.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    /// Parses the frame starting at `pos`, returning it with the position
    /// just past its end.
    fn parse(&self, pos: usize) -> Result<Option<(Frame, usize)>, DecodeError> {
        let Some(line_end) = self.find_crlf(pos + 1) else {
            return Ok(None);
        };
        let Some(&kind) = self.buf.get(pos) else {
            return Ok(None);
        };
        let line = &self.buf[pos + 1..line_end];
        let next = line_end + 2;

        match kind {
            b'+' => Ok(Some((Frame::SimpleString(line.to_vec()), next))),
            b'-' => Ok(Some((Frame::Error(line.to_vec()), next))),
            b':' => Ok(Some((Frame::Integer(parse_int(line)?), next))),
            b'$' => {
                let len = parse_int(line)?;
                if len < 0 {
                    return Ok(Some((Frame::BulkString(None), next)));
                }
                let len = len as usize;
                if len > self.max_frame_size {
                    return Err(DecodeError::new(
                        "bulk string length exceeds maximum frame size",
                    ));
                }
                if self.buf.len() < next + len + 2 {
                    return Ok(None);
                }
                if &self.buf[next + len..next + len + 2] != b"\r\n" {
                    return Err(DecodeError::new("bulk string missing CRLF terminator"));
                }
                let data = Bytes::copy_from_slice(&self.buf[next..next + len]);
                Ok(Some((Frame::BulkString(Some(data)), next + len + 2)))
            }
            b'*' => {
                let len = parse_int(line)?;
                if len < 0 {
                    return Ok(Some((Frame::Null, next)));
                }
                let len = len as usize;
                // Assume at least 16 bytes per element.
                if len > self.max_frame_size / 16 {
                    return Err(DecodeError::new("array length exceeds reasonable maximum"));
                }
                let mut items = Vec::with_capacity(len);
                let mut cursor = next;
                for _ in 0..len {
                    match self.parse(cursor)? {
                        Some((item, after)) => {
                            items.push(item);
                            cursor = after;
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some((Frame::Array(items), cursor)))
            }
            other => Err(DecodeError::new(format!(
                "unknown frame type: {}",
                other as char
            ))),
        }
    }

    /// Finds the index of the next `\r\n` at or after `from`.
    fn find_crlf(&self, from: usize) -> Option<usize> {
        if self.buf.len() < from + 2 {
            return None;
        }
        self.buf[from..]
            .windows(2)
            .position(|w| w == b"\r\n")
            .map(|i| from + i)
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_int(line: &[u8]) -> Result<i64, DecodeError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            DecodeError::new(format!(
                "invalid integer: {}",
                String::from_utf8_lossy(line)
            ))
        })
}
