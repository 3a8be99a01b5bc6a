//! Frame assembly and splitting.
//!
//! [`build_frame`] serializes header and body in one pass: it reserves the
//! length prefix at offset 0, writes both maps after it, then backpatches
//! the length once the total is known.
//!
//! # Example
//!
//! ```
//! use tarantool_driver::protocol::{build_frame, parse_frame, Empty, Header, RequestType};
//!
//! let header = Header::request(RequestType::Ping, 1, None);
//! let frame = build_frame(&header, &Empty::default()).unwrap();
//!
//! let (decoded, body) = parse_frame(&frame).unwrap();
//! assert_eq!(decoded, header);
//! assert_eq!(body, &[0x80]);
//! ```

use bytes::Bytes;

use super::wire_format::{decode_length_prefix, encode_length_prefix, Header, LENGTH_PREFIX_SIZE};
use crate::codec::{decode_struct, encode_struct, KeyedStruct};
use crate::error::{DriverError, Result};

/// Build a complete frame: length prefix, header map, body map.
///
/// # Errors
///
/// Returns error if a field fails to encode or the frame does not fit in a
/// `u32` length.
pub fn build_frame<B: KeyedStruct>(header: &Header, body: &B) -> Result<Bytes> {
    let mut buf = Vec::with_capacity(64);
    buf.resize(LENGTH_PREFIX_SIZE, 0);

    encode_struct(Some(header), &mut buf)?;
    encode_struct(Some(body), &mut buf)?;

    let len = u32::try_from(buf.len() - LENGTH_PREFIX_SIZE).map_err(|_| {
        DriverError::protocol(format!("frame of {} bytes is too large", buf.len()))
    })?;
    encode_length_prefix(&mut buf[..LENGTH_PREFIX_SIZE], len);

    Ok(Bytes::from(buf))
}

/// Split a complete in-memory frame into its header and raw body bytes.
///
/// The body size is computed as declared length minus the header bytes
/// consumed, and must match the bytes actually present.
///
/// # Errors
///
/// `Protocol` if the frame is truncated, has trailing bytes, or the header
/// does not decode.
pub fn parse_frame(frame: &[u8]) -> Result<(Header, &[u8])> {
    if frame.len() < LENGTH_PREFIX_SIZE {
        return Err(DriverError::protocol("frame shorter than its length prefix"));
    }
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&frame[..LENGTH_PREFIX_SIZE]);
    let total = decode_length_prefix(&prefix)? as usize;

    let rest = &frame[LENGTH_PREFIX_SIZE..];
    if rest.len() != total {
        return Err(DriverError::protocol(format!(
            "frame declares {total} bytes but carries {}",
            rest.len()
        )));
    }

    let mut rd = rest;
    let header: Header = decode_struct(&mut rd)?;
    let header_size = rest.len() - rd.len();
    let body_size = total - header_size;
    debug_assert_eq!(body_size, rd.len());

    Ok((header, rd))
}
