//! Dedicated writer task that owns the write half of a connection.
//!
//! Requests are built into whole frames by the caller and handed to the task
//! over an mpsc channel. The task writes each frame to completion, so a
//! caller that gives up while its frame is in flight cannot leave a partial
//! frame on the wire.
//!
//! ```text
//! send 1 ─┐
//! send 2 ─┼─► mpsc::Sender<WriterCommand> ─► Writer Task ─► socket
//! send N ─┘
//! ```

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::connection::ConnectionId;
use crate::error::{DriverError, Result};
use crate::transport::CountingStream;

/// Frames that may queue up behind the one being written.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames written before a single flush.
const MAX_BATCH_SIZE: usize = 64;

/// A fully built request frame and where to report its write result.
#[derive(Debug)]
pub(crate) struct OutboundFrame {
    sync: u64,
    bytes: Bytes,
    written: oneshot::Sender<Result<()>>,
}

#[derive(Debug)]
enum WriterCommand {
    Frame(OutboundFrame),
    Shutdown(oneshot::Sender<Result<()>>),
}

/// Handle for queueing frames on the writer task.
#[derive(Debug, Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::Sender<WriterCommand>,
}

impl WriterHandle {
    /// Queue `bytes` and wait until the task has written and flushed it.
    ///
    /// Once queued, the frame is written in full even if this future is
    /// dropped.
    ///
    /// # Errors
    ///
    /// The write error for this frame, or `ConnectionClosed` if the task has
    /// stopped.
    pub async fn write(&self, sync: u64, bytes: Bytes) -> Result<()> {
        let (written, done) = oneshot::channel();
        let frame = OutboundFrame {
            sync,
            bytes,
            written,
        };
        self.tx
            .send(WriterCommand::Frame(frame))
            .await
            .map_err(|_| DriverError::ConnectionClosed)?;
        done.await.map_err(|_| DriverError::ConnectionClosed)?
    }

    /// Flush queued frames, then shut down the write half.
    pub async fn shutdown(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(WriterCommand::Shutdown(ack))
            .await
            .map_err(|_| DriverError::ConnectionClosed)?;
        done.await.map_err(|_| DriverError::ConnectionClosed)?
    }
}

/// Spawn the writer task over `writer`.
pub(crate) fn spawn_writer_task<W>(writer: W, id: ConnectionId) -> (WriterHandle, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
    let task = tokio::spawn(writer_loop(rx, CountingStream::new(writer), id));
    (WriterHandle { tx }, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<WriterCommand>,
    mut writer: CountingStream<W>,
    id: ConnectionId,
) where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while let Some(first) = rx.recv().await {
        let mut shutdown = None;
        match first {
            WriterCommand::Frame(frame) => batch.push(frame),
            WriterCommand::Shutdown(ack) => shutdown = Some(ack),
        }
        while shutdown.is_none() && batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(WriterCommand::Frame(frame)) => batch.push(frame),
                Ok(WriterCommand::Shutdown(ack)) => shutdown = Some(ack),
                Err(_) => break,
            }
        }

        match write_batch(&mut writer, &batch).await {
            Ok(()) => {
                tracing::trace!(
                    connection = %id,
                    frames = batch.len(),
                    bytes = writer.bytes_written(),
                    "requests written"
                );
                for frame in batch.drain(..) {
                    let _ = frame.written.send(Ok(()));
                }
            }
            Err(err) => {
                // the first frame gets the error; the rest see ConnectionClosed
                let mut frames = batch.drain(..);
                if let Some(frame) = frames.next() {
                    tracing::error!(connection = %id, sync = frame.sync, error = %err, "writer task stopped");
                    let _ = frame.written.send(Err(err));
                }
                return;
            }
        }

        if let Some(ack) = shutdown {
            let _ = ack.send(writer.shutdown().await.map_err(DriverError::from));
            return;
        }
    }
}

async fn write_batch<W>(writer: &mut CountingStream<W>, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }
    writer.reset_counters();
    for frame in batch {
        writer.write_all(&frame.bytes).await?;
    }
    writer.flush().await?;
    Ok(())
}
