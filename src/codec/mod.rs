//! Codec module - MsgPack encoding for envelopes and tuples.
//!
//! - [`encode_struct`] / [`decode_struct`] - keyed-map codec for headers and
//!   request/response bodies, driven by [`keyed_struct!`](crate::keyed_struct)
//! - [`StructureReader`] - map/array/int token reader for response envelopes
//! - [`capture_value`] - reads exactly one value off an async stream
//! - [`MsgPackCodec`] - `rmp-serde` codec for positional tuples and rows

mod keyed;
mod msgpack;
mod structure;

pub use keyed::{decode_struct, encode_struct, Field, KeyedStruct, WireField};
pub use msgpack::MsgPackCodec;
pub use structure::{
    capture_value, read_array_header, read_map_header, read_small_int, StructureReader,
};
