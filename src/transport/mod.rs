//! Transport module - socket setup and byte accounting.
//!
//! - [`connect`] - TCP connect with timeout and `TCP_NODELAY`
//! - [`CountingStream`] - pass-through stream that counts bytes read/written

mod counting;
mod tcp;

pub use counting::CountingStream;
pub use tcp::connect;
