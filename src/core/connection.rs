use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::proto::codec::{Decoder, Encoder};
use crate::proto::frame::Frame;
use crate::{Error, Result};

const READ_CHUNK: usize = 4096;

/// A framed connection to a cluster node.
///
/// Wraps an underlying stream (usually TCP) and handles RESP frame encoding
/// and decoding, with optional per-operation read and write timeouts.
///
/// # Example
///
/// ```no_run
/// use shardmux::core::connection::Connection;
/// use shardmux::proto::frame::Frame;
/// use tokio::net::TcpStream;
///
/// # async fn example() -> shardmux::Result<()> {
/// let stream = TcpStream::connect("127.0.0.1:7000").await?;
/// let mut conn = Connection::new(stream);
/// conn.write_frame(&Frame::Array(vec![Frame::BulkString(Some("PING".into()))]))
///     .await?;
/// let reply = conn.read_frame().await?;
/// # let _ = reply;
/// # Ok(())
/// # }
/// ```
pub struct Connection<S> {
    stream: S,
    decoder: Decoder,
    encoder: Encoder,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection with no timeouts configured.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: Decoder::new(),
            encoder: Encoder::new(),
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// Configures read and write timeouts for this connection.
    pub fn with_timeouts(
        mut self,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Self {
        self.read_timeout = read_timeout;
        self.write_timeout = write_timeout;
        self
    }

    /// Encodes and writes a frame.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        write_frame(
            &mut self.stream,
            &mut self.encoder,
            frame,
            self.write_timeout,
        )
        .await
    }

    /// Reads one complete frame, buffering partial reads internally.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        read_frame(&mut self.stream, &mut self.decoder, self.read_timeout).await
    }

    /// Splits the connection into independently owned reader and writer
    /// halves, carrying over buffered input and configured timeouts.
    pub fn split(self) -> (ConnectionReader<S>, ConnectionWriter<S>) {
        let (read_half, write_half) = tokio::io::split(self.stream);
        (
            ConnectionReader {
                stream: read_half,
                decoder: self.decoder,
                read_timeout: self.read_timeout,
            },
            ConnectionWriter {
                stream: write_half,
                encoder: self.encoder,
                write_timeout: self.write_timeout,
            },
        )
    }
}

impl<S> fmt::Debug for Connection<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("stream", &self.stream)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

/// Reading half of a split [`Connection`].
pub struct ConnectionReader<S> {
    stream: ReadHalf<S>,
    decoder: Decoder,
    read_timeout: Option<Duration>,
}

impl<S> ConnectionReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Reads one complete frame.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        read_frame(&mut self.stream, &mut self.decoder, self.read_timeout).await
    }
}

/// Writing half of a split [`Connection`].
pub struct ConnectionWriter<S> {
    stream: WriteHalf<S>,
    encoder: Encoder,
    write_timeout: Option<Duration>,
}

impl<S> ConnectionWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Encodes and writes a frame.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        write_frame(
            &mut self.stream,
            &mut self.encoder,
            frame,
            self.write_timeout,
        )
        .await
    }

    /// Shuts down the write side of the socket.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

async fn write_frame<W>(
    stream: &mut W,
    encoder: &mut Encoder,
    frame: &Frame,
    limit: Option<Duration>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    encoder.encode(frame);
    let data = encoder.take();
    with_timeout(limit, "write", async {
        stream.write_all(&data).await?;
        stream.flush().await?;
        Ok(())
    })
    .await
}

async fn read_frame<R>(
    stream: &mut R,
    decoder: &mut Decoder,
    limit: Option<Duration>,
) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_CHUNK];
    loop {
        if let Some(frame) = decoder.decode()? {
            return Ok(frame);
        }
        let n = with_timeout(limit, "read", async {
            stream.read(&mut buf).await.map_err(Error::from)
        })
        .await?;
        if n == 0 {
            return Err(Error::Closed);
        }
        decoder.append(&buf[..n]);
    }
}

/// Runs `fut`, failing with [`Error::Timeout`] if `limit` elapses first.
pub(crate) async fn with_timeout<T, F>(
    limit: Option<Duration>,
    operation: &'static str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout { operation })?,
        None => fut.await,
    }
}
