//! # tarantool-driver
//!
//! Async client for the Tarantool binary protocol.
//!
//! One TCP socket carries many concurrent requests. Each request gets a sync
//! id; a background frame pump reads responses and hands each one to the
//! caller waiting on that id, whatever order they arrive in.
//!
//! ## Layers
//!
//! - **Transport**: TCP connect, byte-counting stream wrapper
//! - **Codec**: keyed-map structure codec, envelope reader, row codec
//! - **Protocol**: greeting, length-prefixed frames, request/response bodies
//! - **Session**: the read side, one frame at a time under the reader lock
//! - **Writer**: dedicated task that writes whole request frames
//! - **Connection**: correlation table, auth, select, ping
//!
//! ## Example
//!
//! ```ignore
//! use tarantool_driver::{Connection, SelectRequest};
//!
//! #[tokio::main]
//! async fn main() -> tarantool_driver::Result<()> {
//!     let conn = Connection::builder("127.0.0.1", 3301)
//!         .credentials("admin", "secret")
//!         .connect()
//!         .await?;
//!
//!     let rows = conn
//!         .select::<(u32, String)>(&SelectRequest::new(512, 0).limit(10))
//!         .await?;
//!     for row in rows {
//!         let (id, name) = row?;
//!         println!("{id}: {name}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

mod connection;
mod cursor;
mod writer;

pub use auth::AuthenticationInfo;
pub use config::{ConnectionBuilder, ConnectionConfig, ConnectionOptions, Credentials};
pub use connection::{Connection, ConnectionId, PendingResponse};
pub use cursor::RowCursor;
pub use error::{DriverError, Result};
pub use protocol::{ConnectionInfo, ErrorCode, IteratorType, RequestType, SelectRequest};
pub use session::ResponseHandle;
