//! Byte-counting stream wrapper.
//!
//! A pure pass-through over any async stream that keeps running totals of
//! bytes read and written since the last [`CountingStream::reset_counters`].
//! The session resets before each frame so that "bytes consumed by the
//! header" is simply the read counter after the header minus the prefix.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Stream wrapper with read/write byte counters.
#[derive(Debug)]
pub struct CountingStream<S> {
    inner: S,
    bytes_read: u64,
    bytes_written: u64,
}

impl<S> CountingStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    /// Zero both counters.
    #[inline]
    pub fn reset_counters(&mut self) {
        self.bytes_read = 0;
        self.bytes_written = 0;
    }

    /// Bytes read since the last reset.
    #[inline]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Bytes written since the last reset.
    #[inline]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CountingStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            this.bytes_read += (buf.filled().len() - before) as u64;
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CountingStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            this.bytes_written += *n as u64;
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_counts_reads_and_writes() {
        let (client, server) = tokio::io::duplex(64);
        let mut client = CountingStream::new(client);
        let mut server = CountingStream::new(server);

        client.write_all(b"hello world").await.unwrap();
        assert_eq!(client.bytes_written(), 11);

        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(server.bytes_read(), 5);

        server.reset_counters();
        assert_eq!(server.bytes_read(), 0);

        let mut rest = [0u8; 6];
        server.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b" world");
        assert_eq!(server.bytes_read(), 6);
    }

    #[tokio::test]
    async fn test_pass_through_is_byte_exact() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let (client, server) = tokio::io::duplex(16);
        let mut server = CountingStream::new(server);

        let writer = tokio::spawn(async move {
            let mut client = client;
            client.write_all(&payload).await.unwrap();
            payload
        });

        let mut received = vec![0u8; 256];
        server.read_exact(&mut received).await.unwrap();
        let sent = writer.await.unwrap();

        assert_eq!(received, sent);
        assert_eq!(server.bytes_read(), 256);
        assert_eq!(server.bytes_written(), 0);
    }
}
