//! Read side of a connection.
//!
//! The [`Session`] owns the read half of the socket behind one async mutex,
//! the reader lock. [`Session::read_next`] takes that lock and hands it to
//! the returned [`ResponseHandle`], which keeps it until it is dropped. The
//! frame body therefore cannot interleave with any other read, and every
//! exit path (success, error, panic unwinding, cancellation) releases the
//! lock simply by dropping the handle.
//!
//! Body bytes that nobody consumed are recorded in the reader state and
//! skipped before the next length prefix is read, which keeps the stream
//! frame-aligned even when a handle is dropped early.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::codec::{capture_value, decode_struct, KeyedStruct};
use crate::error::{eof_as_closed, DriverError, Result};
use crate::protocol::{
    decode_length_prefix, parse_greeting, ConnectionInfo, ErrorCode, ErrorResponse, Header,
    GREETING_SIZE, LENGTH_PREFIX_SIZE,
};
use crate::transport::CountingStream;

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// State guarded by the reader lock.
struct ReaderState {
    stream: CountingStream<BoxedReader>,
    /// Bytes of the current frame not yet read off the wire.
    unread: u64,
}

impl ReaderState {
    /// Capture one value from the current frame body.
    async fn capture(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let mark = self.stream.bytes_read();
        let limit = usize::try_from(self.unread).unwrap_or(usize::MAX);
        let result = capture_value(&mut self.stream, limit, out).await;
        self.unread -= self.stream.bytes_read() - mark;
        result
    }

    /// Copy whatever is left of the current frame into `sink`.
    async fn copy_unread<W>(&mut self, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if self.unread == 0 {
            return Ok(0);
        }
        let mut body = (&mut self.stream).take(self.unread);
        let copied = tokio::io::copy(&mut body, sink).await?;
        self.unread -= copied;
        if self.unread > 0 {
            return Err(DriverError::ConnectionClosed);
        }
        Ok(copied)
    }

    async fn skip_unread(&mut self) -> Result<u64> {
        self.copy_unread(&mut tokio::io::sink()).await
    }
}

/// Frame reader for one connection.
pub struct Session {
    state: Arc<Mutex<ReaderState>>,
    max_frame_size: u32,
}

impl Session {
    /// Wrap the read half of a connection.
    pub fn new<R>(reader: R, max_frame_size: u32) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(ReaderState {
                stream: CountingStream::new(Box::new(reader)),
                unread: 0,
            })),
            max_frame_size,
        }
    }

    /// Read and parse the 128-byte server greeting.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the peer closes before sending 128 bytes,
    /// `Protocol` if the salt is not valid base64.
    pub async fn read_greeting(&self) -> Result<ConnectionInfo> {
        let mut state = self.state.lock().await;
        let mut raw = [0u8; GREETING_SIZE];
        state.stream.read_exact(&mut raw).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                DriverError::InvalidOperation(format!(
                    "connection closed during greeting: expected {GREETING_SIZE} bytes"
                ))
            } else {
                DriverError::Io(err)
            }
        })?;
        parse_greeting(&raw)
    }

    /// Read the next frame header and return a handle holding the reader lock.
    ///
    /// Leftovers of the previous frame are skipped first.
    ///
    /// # Errors
    ///
    /// Fatal (`Io`, `ConnectionClosed`) when the stream breaks or loses its
    /// framing; `Protocol` when only this frame's header is bad, in which case
    /// its remaining bytes are skipped on the next call.
    pub async fn read_next(&self) -> Result<ResponseHandle> {
        let mut state = Arc::clone(&self.state).lock_owned().await;
        state.skip_unread().await?;
        state.stream.reset_counters();

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        state
            .stream
            .read_exact(&mut prefix)
            .await
            .map_err(eof_as_closed)?;
        let total = decode_length_prefix(&prefix)?;
        state.unread = u64::from(total);

        let mut raw = Vec::new();
        let limit = total.min(self.max_frame_size) as usize;
        let captured = capture_value(&mut state.stream, limit, &mut raw).await;

        // the capture limit keeps this within the frame
        let header_size = state.stream.bytes_read() - LENGTH_PREFIX_SIZE as u64;
        state.unread = u64::from(total) - header_size;
        captured?;

        let header: Header = decode_struct(&mut raw.as_slice())?;
        let body_size = state.unread;
        Ok(ResponseHandle {
            header,
            body_size,
            max_frame_size: self.max_frame_size,
            state,
        })
    }
}

/// The frame currently being consumed, with the reader lock held.
///
/// Dropping the handle releases the lock. Unread body bytes are skipped by
/// the next [`Session::read_next`].
pub struct ResponseHandle {
    header: Header,
    body_size: u64,
    max_frame_size: u32,
    state: OwnedMutexGuard<ReaderState>,
}

impl std::fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("header", &self.header)
            .field("body_size", &self.body_size)
            .field("remaining", &self.state.unread)
            .finish()
    }
}

impl ResponseHandle {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn sync(&self) -> u64 {
        self.header.sync
    }

    /// Body size: declared frame length minus the header bytes consumed.
    pub fn body_size(&self) -> u64 {
        self.body_size
    }

    /// Body bytes not yet read off the wire.
    pub fn remaining(&self) -> u64 {
        self.state.unread
    }

    /// Decode the error body if the header carries the error bit.
    ///
    /// Consumes nothing for success responses.
    pub async fn try_read_error(&mut self) -> Result<Option<ErrorResponse>> {
        if !self.header.is_error() {
            return Ok(None);
        }
        let mut raw = Vec::new();
        self.state.capture(&mut raw).await?;
        let error: ErrorResponse = decode_struct(&mut raw.as_slice())?;
        Ok(Some(error))
    }

    /// Turn an error response into `Remote`, pass anything else through.
    pub async fn ensure_success(&mut self) -> Result<()> {
        if let Some(error) = self.try_read_error().await? {
            return Err(DriverError::Remote {
                code: self.header.error_code().unwrap_or(ErrorCode::UNKNOWN),
                message: error.message,
            });
        }
        Ok(())
    }

    /// Decode a keyed body, then skip anything the codec left behind.
    pub async fn decode_body<T: KeyedStruct>(mut self) -> Result<T> {
        self.ensure_success().await?;
        let mut raw = Vec::new();
        self.state.capture(&mut raw).await?;
        let value = decode_struct(&mut raw.as_slice())?;
        self.state.skip_unread().await?;
        Ok(value)
    }

    /// Check for an error response and skip the rest of the body.
    pub async fn finish(mut self) -> Result<()> {
        self.ensure_success().await?;
        self.state.skip_unread().await?;
        Ok(())
    }

    /// Copy the remaining body bytes verbatim into `sink`.
    pub async fn copy_body_to<W>(&mut self, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.state.copy_unread(sink).await
    }

    /// What the waiter for this frame should receive.
    ///
    /// Oversized bodies and error responses become errors; their bytes are
    /// skipped when the handle is dropped.
    pub(crate) async fn into_outcome(mut self) -> Result<ResponseHandle> {
        if self.body_size > u64::from(self.max_frame_size) {
            return Err(DriverError::protocol(format!(
                "response body of {} bytes exceeds limit of {}",
                self.body_size, self.max_frame_size
            )));
        }
        self.ensure_success().await?;
        Ok(self)
    }
}
