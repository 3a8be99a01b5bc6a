//! Wire format encoding and decoding.
//!
//! Every message after the greeting is a frame:
//! ```text
//! ┌──────────────┬────────────────┬──────────────┐
//! │ Length       │ Header         │ Body         │
//! │ 0xce + u32 BE│ keyed map      │ keyed map    │
//! │ 5 bytes      │ variable       │ variable     │
//! └──────────────┴────────────────┴──────────────┘
//! ```
//!
//! The length counts header and body. The body size is never on the wire;
//! readers get it by subtracting the header bytes they consumed.

use base64::Engine;

use super::constants::{ErrorCode, Key, RequestType};
use crate::error::{DriverError, Result};
use crate::keyed_struct;

/// Size of the length prefix: a MsgPack `uint32` marker plus 4 bytes.
pub const LENGTH_PREFIX_SIZE: usize = 5;

/// Size of the server greeting sent once per connection.
pub const GREETING_SIZE: usize = 128;

/// Length of the version line inside the greeting.
pub const GREETING_VERSION_SIZE: usize = 63;

/// Offset of the base64 salt line inside the greeting.
pub const GREETING_SALT_OFFSET: usize = 64;

keyed_struct! {
    /// Frame header shared by requests and responses.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Header {
        /// Request type on the way out, response code on the way back.
        Key::RequestType => pub code: u32,
        Key::Sync => pub sync: u64,
        Key::SchemaVersion => pub schema_version: Option<u32>,
    }
}

impl Header {
    /// Build a request header.
    pub fn request(request_type: RequestType, sync: u64, schema_version: Option<u32>) -> Self {
        Self {
            code: request_type.code(),
            sync,
            schema_version,
        }
    }

    /// Whether the response code carries the error bit.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.error_code().is_some()
    }

    /// Server error code implied by the response code, if any.
    #[inline]
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_response_code(self.code)
    }

    /// Interpret the code as a request type.
    ///
    /// # Errors
    ///
    /// `Protocol` for error responses and unknown codes.
    pub fn request_type(&self) -> Result<RequestType> {
        RequestType::try_from(self.code)
    }
}

/// What the server told us in its greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Version line, e.g. `Tarantool 2.11.1 (Binary) 0d1e...`.
    pub version: String,
    /// Per-connection random salt used for authentication.
    pub salt: Vec<u8>,
}

fn trim_padding(bytes: &[u8]) -> &[u8] {
    let is_pad = |b: &u8| *b == 0 || b.is_ascii_whitespace();
    let start = bytes.iter().position(|b| !is_pad(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !is_pad(b)).map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Parse the 128-byte greeting into version and salt.
///
/// # Errors
///
/// `Protocol` if the buffer is not exactly 128 bytes or the salt is not
/// valid base64.
pub fn parse_greeting(raw: &[u8]) -> Result<ConnectionInfo> {
    if raw.len() != GREETING_SIZE {
        return Err(DriverError::protocol(format!(
            "greeting must be {GREETING_SIZE} bytes, got {}",
            raw.len()
        )));
    }

    let version = String::from_utf8_lossy(trim_padding(&raw[..GREETING_VERSION_SIZE])).into_owned();
    let salt = base64::engine::general_purpose::STANDARD
        .decode(trim_padding(&raw[GREETING_SALT_OFFSET..]))
        .map_err(|e| DriverError::protocol(format!("greeting salt is not base64: {e}")))?;

    Ok(ConnectionInfo { version, salt })
}

/// Write the length prefix for a frame of `len` bytes into `buf[..5]`.
///
/// # Panics
///
/// Panics if `buf` is shorter than [`LENGTH_PREFIX_SIZE`].
pub fn encode_length_prefix(buf: &mut [u8], len: u32) {
    debug_assert!(buf.len() >= LENGTH_PREFIX_SIZE);
    buf[0] = rmp::Marker::U32.to_u8();
    buf[1..LENGTH_PREFIX_SIZE].copy_from_slice(&len.to_be_bytes());
}

/// Decode a length prefix.
///
/// A prefix that is not a `uint32` means the stream has lost its framing,
/// so this is reported as an I/O error rather than a per-frame one.
pub fn decode_length_prefix(prefix: &[u8; LENGTH_PREFIX_SIZE]) -> Result<u32> {
    match rmp::Marker::from_u8(prefix[0]) {
        rmp::Marker::U32 => Ok(u32::from_be_bytes([prefix[1], prefix[2], prefix[3], prefix[4]])),
        other => Err(DriverError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length prefix must be uint32, found {other:?}"),
        ))),
    }
}
