use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, instrument};

use crate::core::connection::{Connection, ConnectionReader, ConnectionWriter};
use crate::proto::frame::Frame;
use crate::{Error, Result};

type ResponseTx = oneshot::Sender<Result<Frame>>;

/// Messages consumed by the writer task.
enum Request {
    Command { frame: Frame, response_tx: ResponseTx },
    Shutdown,
}

/// A handle to a multiplexed connection.
///
/// Cheap to clone and shareable across tasks; every clone pipelines its
/// commands over the same socket. Replies are matched to requests in order.
#[derive(Clone)]
pub struct MultiplexedConnection {
    sender: mpsc::Sender<Request>,
    closed: Arc<AtomicBool>,
}

impl MultiplexedConnection {
    /// Creates a new multiplexed connection, spawning its writer and reader
    /// tasks on the current tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `connection` - The underlying connection to multiplex.
    /// * `queue_size` - The maximum number of pending requests.
    pub fn new<S>(connection: Connection<S>, queue_size: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = connection.split();
        let (request_tx, request_rx) = mpsc::channel(queue_size);
        let (waiter_tx, waiter_rx) = mpsc::channel(queue_size);
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_writer(writer, request_rx, waiter_tx, closed.clone()));
        tokio::spawn(run_reader(reader, waiter_rx, closed.clone()));

        Self {
            sender: request_tx,
            closed,
        }
    }

    /// Sends a command to the server and awaits the response.
    #[instrument(skip(self), level = "debug")]
    pub async fn send_command(&self, frame: Frame) -> Result<Frame> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let (response_tx, response_rx) = oneshot::channel();
        self.sender
            .send(Request::Command { frame, response_tx })
            .await
            .map_err(|_| Error::Closed)?;

        response_rx.await.map_err(|_| Error::Closed)?
    }

    /// Closes the connection.
    ///
    /// Pending requests already handed to the writer still receive their
    /// replies; later calls to [`send_command`](Self::send_command) fail with
    /// [`Error::Closed`]. Calling this more than once is harmless.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.sender.send(Request::Shutdown).await;
    }

    /// Returns true once the connection was closed or its socket failed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.sender.is_closed()
    }
}

impl fmt::Debug for MultiplexedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiplexedConnection")
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn run_writer<S>(
    mut writer: ConnectionWriter<S>,
    mut request_rx: mpsc::Receiver<Request>,
    waiter_tx: mpsc::Sender<ResponseTx>,
    closed: Arc<AtomicBool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(request) = request_rx.recv().await {
        let (frame, response_tx) = match request {
            Request::Command { frame, response_tx } => (frame, response_tx),
            Request::Shutdown => {
                debug!("shutting down connection");
                let _ = writer.shutdown().await;
                break;
            }
        };

        debug!(?frame, "sending frame");
        if let Err(e) = writer.write_frame(&frame).await {
            error!(error = ?e, "failed to write frame");
            let _ = response_tx.send(Err(e));
            break;
        }

        // The reader task is gone once this fails.
        if waiter_tx.send(response_tx).await.is_err() {
            break;
        }
    }
    closed.store(true, Ordering::Release);
}

async fn run_reader<S>(
    mut reader: ConnectionReader<S>,
    mut waiter_rx: mpsc::Receiver<ResponseTx>,
    closed: Arc<AtomicBool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(tx) = waiter_rx.recv().await {
        match reader.read_frame().await {
            Ok(frame) => {
                debug!(?frame, "received frame");
                let _ = tx.send(Ok(frame));
            }
            Err(e) => {
                error!(error = ?e, "failed to read frame");
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
    closed.store(true, Ordering::Release);
}
