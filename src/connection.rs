//! Connection engine: one socket shared by many concurrent requests.
//!
//! The lifecycle:
//! 1. Connect and read the greeting (`open` / `open_stream`)
//! 2. Spawn the frame pump, which owns the read half
//! 3. Optionally authenticate
//! 4. Issue requests; each gets a sync id and a [`PendingResponse`]
//!
//! Requests are written whole by the writer task. Responses are matched
//! to waiters by sync id through the correlation table, never by arrival
//! order.
//!
//! # Example
//!
//! ```ignore
//! use tarantool_driver::{Connection, SelectRequest};
//!
//! let conn = Connection::new();
//! conn.open("127.0.0.1", 3301).await?;
//! conn.authenticate("admin", "secret").await?;
//!
//! let rows = conn
//!     .select::<(u32, String)>(&SelectRequest::new(512, 0).key((1u32,))?)
//!     .await?;
//! for row in rows {
//!     println!("{:?}", row?);
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, OnceCell};
use tokio::task::JoinHandle;

use crate::auth::AuthenticationInfo;
use crate::codec::KeyedStruct;
use crate::config::{ConnectionBuilder, ConnectionConfig};
use crate::cursor::RowCursor;
use crate::error::{DriverError, Result};
use crate::protocol::{build_frame, ConnectionInfo, Empty, Header, RequestType, SelectRequest};
use crate::session::{ResponseHandle, Session};
use crate::transport::connect;
use crate::writer::{spawn_writer_task, WriterHandle};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier, used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Sync id to waiter mapping.
pub(crate) struct Correlations {
    slots: DashMap<u64, oneshot::Sender<Result<ResponseHandle>>>,
    closed: AtomicBool,
}

impl Correlations {
    fn new() -> Self {
        Self {
            slots: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a waiter for `sync`.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if `sync` already has a waiter, `ConnectionClosed`
    /// once the pump has stopped.
    fn register(self: &Arc<Self>, sync: u64) -> Result<PendingResponse> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        match self.slots.entry(sync) {
            Entry::Occupied(_) => {
                return Err(DriverError::InvalidOperation(format!(
                    "sync {sync} already has a pending request"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }

        let pending = PendingResponse {
            sync,
            rx,
            correlations: Arc::clone(self),
        };
        // lost a race with fail_all: dropping `pending` removes the slot
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::ConnectionClosed);
        }
        Ok(pending)
    }

    fn take(&self, sync: u64) -> Option<oneshot::Sender<Result<ResponseHandle>>> {
        self.slots.remove(&sync).map(|(_, tx)| tx)
    }

    /// Stop accepting waiters and wake every pending one with `ConnectionClosed`.
    fn fail_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.slots.clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Future resolving to the response frame for one request.
///
/// Dropping it before completion removes its correlation slot; a response
/// that arrives later is dropped by the pump.
///
/// The pump hands over a response while still holding the reader, and reads
/// nothing else until that [`ResponseHandle`] is consumed or dropped. Await
/// (or drop) every pending response promptly. When holding several, await
/// them together (`tokio::join!`, spawned tasks) rather than one after the
/// other: awaiting them in an order that differs from arrival order
/// deadlocks the connection.
#[must_use = "the response is only read when the future is awaited"]
pub struct PendingResponse {
    sync: u64,
    rx: oneshot::Receiver<Result<ResponseHandle>>,
    correlations: Arc<Correlations>,
}

impl PendingResponse {
    pub fn sync(&self) -> u64 {
        self.sync
    }
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse").field("sync", &self.sync).finish()
    }
}

impl Future for PendingResponse {
    type Output = Result<ResponseHandle>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(DriverError::ConnectionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.correlations.slots.remove(&self.sync);
    }
}

/// Everything that exists once the greeting has been read.
struct Link {
    info: ConnectionInfo,
    writer: WriterHandle,
    writer_task: JoinHandle<()>,
    pump: JoinHandle<()>,
}

/// A multiplexed connection to one server.
pub struct Connection {
    id: ConnectionId,
    config: ConnectionConfig,
    sync: AtomicU64,
    correlations: Arc<Correlations>,
    link: OnceCell<Link>,
    auth: OnceCell<AuthenticationInfo>,
    shut_down: AtomicBool,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("open", &self.link.initialized())
            .field("authenticated", &self.auth.get().map(|a| a.user_name.as_str()))
            .field("pending", &self.correlations.len())
            .finish()
    }
}

impl Connection {
    /// Create an unopened connection with default settings.
    pub fn new() -> Self {
        Self::with_config(ConnectionConfig::default())
    }

    pub fn with_config(config: ConnectionConfig) -> Self {
        Self {
            id: ConnectionId::next(),
            config,
            sync: AtomicU64::new(0),
            correlations: Arc::new(Correlations::new()),
            link: OnceCell::new(),
            auth: OnceCell::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Fluent builder: connect, then authenticate if credentials are set.
    pub fn builder(host: impl Into<String>, port: u16) -> ConnectionBuilder {
        ConnectionBuilder::new(host, port)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Greeting info, once open.
    pub fn info(&self) -> Option<&ConnectionInfo> {
        self.link.get().map(|link| &link.info)
    }

    /// Credential in use, once authenticated.
    pub fn authentication(&self) -> Option<&AuthenticationInfo> {
        self.auth.get()
    }

    /// Connect over TCP and read the greeting.
    ///
    /// Idempotent: once open, returns the cached greeting info.
    pub async fn open(&self, host: &str, port: u16) -> Result<ConnectionInfo> {
        self.ensure_not_shut_down()?;
        let link = self
            .link
            .get_or_try_init(|| async {
                let stream = connect(host, port, self.config.connect_timeout).await?;
                self.attach(stream).await
            })
            .await?;
        Ok(link.info.clone())
    }

    /// Read the greeting over an already-established stream.
    ///
    /// Idempotent like [`Connection::open`]; if the connection is already
    /// open, `stream` is dropped unused.
    pub async fn open_stream<S>(&self, stream: S) -> Result<ConnectionInfo>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.ensure_not_shut_down()?;
        let link = self.link.get_or_try_init(|| self.attach(stream)).await?;
        Ok(link.info.clone())
    }

    async fn attach<S>(&self, stream: S) -> Result<Link>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let session = Session::new(read_half, self.config.max_frame_size);
        let info = session.read_greeting().await?;
        tracing::debug!(connection = %self.id, version = %info.version, "greeting received");

        let pump = tokio::spawn(pump(session, Arc::clone(&self.correlations), self.id));
        let (writer, writer_task) = spawn_writer_task(write_half, self.id);
        Ok(Link {
            info,
            writer,
            writer_task,
            pump,
        })
    }

    fn ensure_not_shut_down(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(DriverError::InvalidOperation("connection is closed".to_string()));
        }
        Ok(())
    }

    fn link(&self) -> Result<&Link> {
        self.ensure_not_shut_down()?;
        let link = self
            .link
            .get()
            .ok_or_else(|| DriverError::InvalidOperation("connection is not open".to_string()))?;
        if self.correlations.is_closed() {
            return Err(DriverError::ConnectionClosed);
        }
        Ok(link)
    }

    /// Authenticate with chap-sha1 against the greeting salt.
    ///
    /// Idempotent: once authenticated, returns the cached credential without
    /// talking to the server.
    pub async fn authenticate(&self, user_name: &str, password: &str) -> Result<AuthenticationInfo> {
        let link = self.link()?;
        let auth = self
            .auth
            .get_or_try_init(|| async {
                let info = AuthenticationInfo::chap_sha1(user_name, password, &link.info.salt)?;
                let handle = self.send(RequestType::Auth, None, &info.to_request()).await?.await?;
                handle.finish().await?;
                tracing::debug!(connection = %self.id, user = %user_name, "authenticated");
                Ok::<_, DriverError>(info)
            })
            .await?;
        Ok(auth.clone())
    }

    /// Next sync id: starts at 1, never repeats for this connection.
    pub fn next_sync(&self) -> u64 {
        self.sync.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Write one request and return the future for its response.
    ///
    /// The waiter is registered before any byte is written, so a fast
    /// response cannot slip past it. Once handed to the writer task the
    /// frame goes out whole, even if this future is dropped.
    pub async fn send<B: KeyedStruct>(
        &self,
        request_type: RequestType,
        schema_id: Option<u32>,
        body: &B,
    ) -> Result<PendingResponse> {
        let link = self.link()?;
        let sync = self.next_sync();
        let pending = self.correlations.register(sync)?;

        let frame = build_frame(&Header::request(request_type, sync, schema_id), body)?;

        tracing::trace!(
            connection = %self.id,
            sync,
            request = ?request_type,
            bytes = frame.len(),
            "sending request"
        );
        link.writer.write(sync, frame).await?;

        Ok(pending)
    }

    /// Run a select and return a cursor over its rows.
    ///
    /// The body is copied off the wire as soon as the response arrives, so
    /// the cursor holds no lock and can be consumed at leisure.
    pub async fn select<T: DeserializeOwned>(&self, request: &SelectRequest) -> Result<RowCursor<T>> {
        let mut handle = self.send(RequestType::Select, None, request).await?.await?;
        let mut body = Vec::with_capacity(usize::try_from(handle.remaining()).unwrap_or(0));
        handle.copy_body_to(&mut body).await?;
        Ok(RowCursor::new(body))
    }

    /// Round-trip an empty `Ping` request.
    pub async fn ping(&self) -> Result<()> {
        self.send(RequestType::Ping, None, &Empty {}).await?.await?.finish().await
    }

    /// Stop the pump, fail pending requests and shut down the write half.
    ///
    /// Any later operation fails with `InvalidOperation`.
    pub async fn close(&self) -> Result<()> {
        self.ensure_not_shut_down()?;
        let link = self
            .link
            .get()
            .ok_or_else(|| DriverError::InvalidOperation("connection is not open".to_string()))?;
        self.shut_down.store(true, Ordering::SeqCst);
        link.pump.abort();
        self.correlations.fail_all();

        match link.writer.shutdown().await {
            // writer already stopped on an earlier error
            Ok(()) | Err(DriverError::ConnectionClosed) => {}
            Err(err) => return Err(err),
        }
        tracing::debug!(connection = %self.id, "connection closed");
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(link) = self.link.get() {
            link.pump.abort();
            link.writer_task.abort();
        }
    }
}

/// Read frames until the stream fails, handing each to its waiter.
async fn pump(session: Session, correlations: Arc<Correlations>, id: ConnectionId) {
    loop {
        let handle = match session.read_next().await {
            Ok(handle) => handle,
            Err(err) if err.is_fatal() => {
                match err {
                    DriverError::ConnectionClosed => {
                        tracing::debug!(connection = %id, "server closed the connection")
                    }
                    err => tracing::error!(connection = %id, error = %err, "frame pump stopped"),
                }
                break;
            }
            Err(err) => {
                tracing::warn!(connection = %id, error = %err, "skipping malformed frame");
                continue;
            }
        };

        let sync = handle.sync();
        let Some(waiter) = correlations.take(sync) else {
            tracing::debug!(
                connection = %id,
                sync,
                bytes = handle.body_size(),
                "dropping response with no waiter"
            );
            continue;
        };

        let outcome = handle.into_outcome().await;
        let fatal = matches!(&outcome, Err(err) if err.is_fatal());
        if let Err(err) = &outcome {
            tracing::trace!(connection = %id, sync, error = %err, "request failed");
        }
        // a dropped receiver hands the handle back; dropping it frees the lock
        let _ = waiter.send(outcome);
        if fatal {
            break;
        }
    }
    correlations.fail_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{parse_frame, GREETING_SALT_OFFSET, GREETING_SIZE, LENGTH_PREFIX_SIZE};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    const SALT_B64: &str = "QK2HoFZGXTXBq2vFj7soCsHqTo6PGTF575ssUBAJLAI=";

    fn greeting() -> Vec<u8> {
        let mut raw = vec![b' '; GREETING_SIZE];
        let version = b"Tarantool 2.11.1 (Binary)";
        raw[..version.len()].copy_from_slice(version);
        raw[GREETING_SALT_OFFSET..GREETING_SALT_OFFSET + SALT_B64.len()]
            .copy_from_slice(SALT_B64.as_bytes());
        raw
    }

    fn ok_frame(sync: u64, body: &[u8]) -> Vec<u8> {
        crate::session::tests::response_frame(0, sync, body)
    }

    async fn read_request(server: &mut DuplexStream) -> (Header, Vec<u8>) {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        server.read_exact(&mut prefix).await.unwrap();
        let len = u32::from_be_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]) as usize;
        let mut frame = prefix.to_vec();
        frame.resize(LENGTH_PREFIX_SIZE + len, 0);
        server.read_exact(&mut frame[LENGTH_PREFIX_SIZE..]).await.unwrap();
        let (header, body) = parse_frame(&frame).unwrap();
        (header, body.to_vec())
    }

    async fn opened() -> (Connection, DuplexStream) {
        opened_with_capacity(64 * 1024).await
    }

    async fn opened_with_capacity(capacity: usize) -> (Connection, DuplexStream) {
        let (client, mut server) = tokio::io::duplex(capacity);
        server.write_all(&greeting()).await.unwrap();
        let conn = Connection::new();
        let info = conn.open_stream(client).await.unwrap();
        assert_eq!(info.version, "Tarantool 2.11.1 (Binary)");
        (conn, server)
    }

    #[test]
    fn test_sync_is_monotonic_from_one() {
        let conn = Connection::new();
        assert_eq!(conn.next_sync(), 1);
        assert_eq!(conn.next_sync(), 2);
        assert_eq!(conn.next_sync(), 3);
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = Connection::new();
        let b = Connection::new();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let correlations = Arc::new(Correlations::new());
        let first = correlations.register(5).unwrap();
        assert_eq!(format!("{first:?}"), "PendingResponse { sync: 5 }");
        let err = correlations.register(5).unwrap_err();
        assert!(matches!(err, DriverError::InvalidOperation(_)));
        drop(first);
        assert!(correlations.register(5).is_ok());
    }

    #[tokio::test]
    async fn test_dropped_waiter_frees_slot() {
        let correlations = Arc::new(Correlations::new());
        let pending = correlations.register(1).unwrap();
        assert_eq!(correlations.len(), 1);
        drop(pending);
        assert_eq!(correlations.len(), 0);
    }

    #[tokio::test]
    async fn test_fail_all_wakes_waiters() {
        let correlations = Arc::new(Correlations::new());
        let pending = correlations.register(1).unwrap();
        correlations.fail_all();
        assert!(matches!(pending.await, Err(DriverError::ConnectionClosed)));
        assert!(matches!(
            correlations.register(2),
            Err(DriverError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_send_before_open() {
        let conn = Connection::new();
        let err = conn.ping().await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidOperation(_)));
        let err = conn.authenticate("admin", "secret").await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let (conn, _server) = opened().await;
        let (other, _unused) = tokio::io::duplex(16);
        let info = conn.open_stream(other).await.unwrap();
        assert_eq!(info.salt.len(), 32);
    }

    #[tokio::test]
    async fn test_ping_roundtrip() {
        let (conn, mut server) = opened().await;

        let ping = tokio::spawn(async move {
            conn.ping().await.unwrap();
            conn
        });

        let (header, body) = read_request(&mut server).await;
        assert_eq!(header.code, RequestType::Ping.code());
        assert_eq!(header.sync, 1);
        assert_eq!(body, vec![0x80]);
        server.write_all(&ok_frame(header.sync, &[0x80])).await.unwrap();

        ping.await.unwrap();
    }

    #[tokio::test]
    async fn test_unmatched_response_is_dropped() {
        let (conn, mut server) = opened().await;

        // nobody is waiting for sync 99
        server.write_all(&ok_frame(99, &[0x81, 0x30, 0x90])).await.unwrap();

        let ping = tokio::spawn(async move { conn.ping().await });
        let (header, _) = read_request(&mut server).await;
        server.write_all(&ok_frame(header.sync, &[0x80])).await.unwrap();

        ping.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_server_close_fails_pending() {
        let (conn, mut server) = opened().await;
        let pending = conn.send(RequestType::Ping, None, &Empty {}).await.unwrap();
        read_request(&mut server).await;
        drop(server);

        assert!(matches!(pending.await, Err(DriverError::ConnectionClosed)));
        assert!(matches!(conn.ping().await, Err(DriverError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_close_then_use() {
        let (conn, _server) = opened().await;
        conn.close().await.unwrap();
        assert!(matches!(
            conn.ping().await,
            Err(DriverError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_open_after_close_rejected() {
        let (conn, _server) = opened().await;
        conn.close().await.unwrap();

        let (other, mut other_server) = tokio::io::duplex(1024);
        other_server.write_all(&greeting()).await.unwrap();
        assert!(matches!(
            conn.open_stream(other).await,
            Err(DriverError::InvalidOperation(_))
        ));
        assert!(matches!(
            conn.open("127.0.0.1", 1).await,
            Err(DriverError::InvalidOperation(_))
        ));
        assert!(conn.info().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_send_keeps_frames_whole() {
        let (conn, mut server) = opened_with_capacity(256).await;
        let conn = Arc::new(conn);

        let big = "x".repeat(4096);
        let request = SelectRequest::new(512, 0).key((big.clone(),)).unwrap();
        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            conn.send(RequestType::Select, None, &request),
        )
        .await;
        assert!(cancelled.is_err());

        let ping = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.ping().await })
        };

        let (header, body) = read_request(&mut server).await;
        assert_eq!(header.code, RequestType::Select.code());
        let decoded: SelectRequest = crate::codec::decode_struct(&mut body.as_slice()).unwrap();
        assert_eq!(decoded.key.0, vec![rmpv::Value::from(big)]);

        let (header, _) = read_request(&mut server).await;
        assert_eq!(header.code, RequestType::Ping.code());
        server.write_all(&ok_frame(header.sync, &[0x80])).await.unwrap();
        ping.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_authenticate_is_cached() {
        let (conn, mut server) = opened().await;
        let conn = Arc::new(conn);

        let task = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.authenticate("admin", "secret").await })
        };
        let (header, _) = read_request(&mut server).await;
        assert_eq!(header.code, RequestType::Auth.code());
        server.write_all(&ok_frame(header.sync, &[0x80])).await.unwrap();
        let first = task.await.unwrap().unwrap();

        // no second request goes out
        let again = conn.authenticate("admin", "secret").await.unwrap();
        assert_eq!(first, again);
        assert_eq!(conn.next_sync(), 2);
    }
}
