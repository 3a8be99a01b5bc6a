//! Primitive structure reading directly off a byte source.
//!
//! Two flavours live here:
//!
//! - [`StructureReader`] walks map/array headers and small integers over a
//!   synchronous [`Read`], used to step through response envelopes.
//! - [`capture_value`] pulls exactly one MsgPack value off an async stream,
//!   marker by marker, so the framing layer never reads past the value it
//!   asked for.

use std::io::{self, Read};

use rmp::decode::{self, NumValueReadError, ValueReadError};
use rmp::Marker;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{eof_as_closed, DriverError, Result};

/// Sequential reader of envelope tokens.
#[derive(Debug)]
pub struct StructureReader<R> {
    inner: R,
}

impl<R: Read> StructureReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read a map header and return its entry count.
    pub fn read_map_header(&mut self) -> Result<u32> {
        read_map_header(&mut self.inner)
    }

    /// Read an array header and return its element count.
    pub fn read_array_header(&mut self) -> Result<u32> {
        read_array_header(&mut self.inner)
    }

    /// Read any integer that fits in `i64`.
    pub fn read_small_int(&mut self) -> Result<i64> {
        read_small_int(&mut self.inner)
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

fn value_error(expected: &'static str) -> impl FnOnce(ValueReadError<io::Error>) -> DriverError {
    move |err| match err {
        ValueReadError::TypeMismatch(found) => {
            DriverError::protocol(format!("expected {expected}, found {found:?}"))
        }
        ValueReadError::InvalidMarkerRead(err) | ValueReadError::InvalidDataRead(err) => {
            DriverError::protocol(format!("truncated {expected}: {err}"))
        }
    }
}

/// Read a map header from `rd`.
pub fn read_map_header<R: Read>(rd: &mut R) -> Result<u32> {
    decode::read_map_len(rd).map_err(value_error("map header"))
}

/// Read an array header from `rd`.
pub fn read_array_header<R: Read>(rd: &mut R) -> Result<u32> {
    decode::read_array_len(rd).map_err(value_error("array header"))
}

/// Read an integer of any width from `rd`.
pub fn read_small_int<R: Read>(rd: &mut R) -> Result<i64> {
    decode::read_int(rd).map_err(|err| match err {
        NumValueReadError::TypeMismatch(found) => {
            DriverError::protocol(format!("expected integer, found {found:?}"))
        }
        NumValueReadError::OutOfRange => DriverError::protocol("integer does not fit in i64"),
        NumValueReadError::InvalidMarkerRead(err) | NumValueReadError::InvalidDataRead(err) => {
            DriverError::protocol(format!("truncated integer: {err}"))
        }
    })
}

/// Append `n` bytes from `rd` to `out`, refusing to grow `out` past `limit`.
async fn take<R: AsyncRead + Unpin>(
    rd: &mut R,
    n: usize,
    limit: usize,
    out: &mut Vec<u8>,
) -> Result<()> {
    if out.len().saturating_add(n) > limit {
        return Err(DriverError::protocol(format!(
            "value overruns its frame: needs {} bytes, {} available",
            out.len().saturating_add(n),
            limit
        )));
    }
    let start = out.len();
    out.resize(start + n, 0);
    rd.read_exact(&mut out[start..]).await.map_err(eof_as_closed)?;
    Ok(())
}

/// Append a big-endian length field of `width` bytes and return its value.
async fn take_len<R: AsyncRead + Unpin>(
    rd: &mut R,
    width: usize,
    limit: usize,
    out: &mut Vec<u8>,
) -> Result<usize> {
    take(rd, width, limit, out).await?;
    let len = out[out.len() - width..]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
    Ok(len)
}

/// Copy exactly one MsgPack value from `rd` into `out`.
///
/// The walk is iterative: containers add their children to a pending count
/// instead of recursing. `limit` bounds the total number of bytes appended,
/// which is what keeps a lying container header from running past the frame.
///
/// # Errors
///
/// `Protocol` if the value is malformed or larger than `limit`;
/// `ConnectionClosed` / `Io` if the stream fails mid-value.
pub async fn capture_value<R: AsyncRead + Unpin>(
    rd: &mut R,
    limit: usize,
    out: &mut Vec<u8>,
) -> Result<()> {
    let limit = out.len().saturating_add(limit);
    let mut pending: u64 = 1;

    while pending > 0 {
        pending -= 1;
        take(rd, 1, limit, out).await?;
        let marker = Marker::from_u8(out[out.len() - 1]);

        match marker {
            Marker::FixPos(_) | Marker::FixNeg(_) | Marker::Null | Marker::True | Marker::False => {}
            Marker::U8 | Marker::I8 => take(rd, 1, limit, out).await?,
            Marker::U16 | Marker::I16 => take(rd, 2, limit, out).await?,
            Marker::U32 | Marker::I32 | Marker::F32 => take(rd, 4, limit, out).await?,
            Marker::U64 | Marker::I64 | Marker::F64 => take(rd, 8, limit, out).await?,
            Marker::FixStr(n) => take(rd, usize::from(n), limit, out).await?,
            Marker::Str8 | Marker::Bin8 => {
                let n = take_len(rd, 1, limit, out).await?;
                take(rd, n, limit, out).await?;
            }
            Marker::Str16 | Marker::Bin16 => {
                let n = take_len(rd, 2, limit, out).await?;
                take(rd, n, limit, out).await?;
            }
            Marker::Str32 | Marker::Bin32 => {
                let n = take_len(rd, 4, limit, out).await?;
                take(rd, n, limit, out).await?;
            }
            Marker::FixArray(n) => pending += u64::from(n),
            Marker::Array16 => pending += take_len(rd, 2, limit, out).await? as u64,
            Marker::Array32 => pending += take_len(rd, 4, limit, out).await? as u64,
            Marker::FixMap(n) => pending += 2 * u64::from(n),
            Marker::Map16 => pending += 2 * take_len(rd, 2, limit, out).await? as u64,
            Marker::Map32 => pending += 2 * take_len(rd, 4, limit, out).await? as u64,
            // ext payloads carry a one-byte type tag before the data
            Marker::FixExt1 => take(rd, 2, limit, out).await?,
            Marker::FixExt2 => take(rd, 3, limit, out).await?,
            Marker::FixExt4 => take(rd, 5, limit, out).await?,
            Marker::FixExt8 => take(rd, 9, limit, out).await?,
            Marker::FixExt16 => take(rd, 17, limit, out).await?,
            Marker::Ext8 => {
                let n = take_len(rd, 1, limit, out).await?;
                take(rd, n + 1, limit, out).await?;
            }
            Marker::Ext16 => {
                let n = take_len(rd, 2, limit, out).await?;
                take(rd, n + 1, limit, out).await?;
            }
            Marker::Ext32 => {
                let n = take_len(rd, 4, limit, out).await?;
                take(rd, n + 1, limit, out).await?;
            }
            Marker::Reserved => {
                return Err(DriverError::protocol("reserved marker 0xc1 in value"));
            }
        }
    }

    Ok(())
}
