//! MsgPack codec for tuples, keys and rows using `rmp-serde`.
//!
//! Tuples on the wire are positional arrays, so structs go through
//! `to_vec` (struct-as-array) and never `to_vec_named`. A row type such as
//! `(u32, String)` or a `#[derive(Deserialize)]` struct with fields in
//! column order decodes straight from a stored tuple.
//!
//! # Example
//!
//! ```
//! use tarantool_driver::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct User {
//!     id: u32,
//!     name: String,
//! }
//!
//! let user = User { id: 1, name: "a".to_string() };
//! let encoded = MsgPackCodec::encode(&user).unwrap();
//! assert_eq!(encoded[0], 0x92);
//! let decoded: User = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, user);
//! ```

use std::io::Read;

use crate::error::{malformed, Result};

/// MessagePack codec for positional tuples.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes, structs as arrays.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Decode exactly one value from a reader, leaving it positioned after it.
    ///
    /// # Errors
    ///
    /// Returns error if the next value cannot be deserialized to type T.
    #[inline]
    pub fn decode_from<T, R>(rd: &mut R) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        R: Read,
    {
        Ok(rmp_serde::from_read(rd)?)
    }

    /// Convert any serializable value into a dynamic MsgPack value.
    ///
    /// Used for select keys, which are stored untyped in the request.
    pub fn to_value<T: serde::Serialize>(value: T) -> Result<rmpv::Value> {
        rmpv::ext::to_value(value).map_err(malformed("convert to msgpack value"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::io::Cursor;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Row {
        id: u32,
        name: String,
        active: bool,
    }

    #[test]
    fn test_struct_encodes_positionally() {
        let row = Row {
            id: 1,
            name: "x".to_string(),
            active: false,
        };

        let encoded = MsgPackCodec::encode(&row).unwrap();
        // fixarray of three, not a fixmap
        assert_eq!(encoded[0], 0x93);
        assert_eq!(MsgPackCodec::decode::<Row>(&encoded).unwrap(), row);
    }

    #[test]
    fn test_tuple_row_from_stored_tuple() {
        let stored = vec![
            rmpv::Value::from(2),
            rmpv::Value::from("b"),
        ];
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &rmpv::Value::Array(stored)).unwrap();

        let decoded: (u32, String) = MsgPackCodec::decode(&bytes).unwrap();
        assert_eq!(decoded, (2, "b".to_string()));
    }

    #[test]
    fn test_decode_from_reads_one_value() {
        let mut bytes = MsgPackCodec::encode(&(1u32, "a")).unwrap();
        bytes.extend(MsgPackCodec::encode(&(2u32, "b")).unwrap());

        let mut rd = Cursor::new(bytes);
        let first: (u32, String) = MsgPackCodec::decode_from(&mut rd).unwrap();
        let second: (u32, String) = MsgPackCodec::decode_from(&mut rd).unwrap();
        assert_eq!(first, (1, "a".to_string()));
        assert_eq!(second, (2, "b".to_string()));
    }

    #[test]
    fn test_binary_column() {
        let data: Vec<u8> = vec![0x01, 0x02, 0x03];
        let encoded = MsgPackCodec::encode(&(7u32, serde_bytes::Bytes::new(&data))).unwrap();

        let decoded: (u32, serde_bytes::ByteBuf) = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.0, 7);
        assert_eq!(decoded.1.as_ref(), &data[..]);
    }

    #[test]
    fn test_to_value_key() {
        let key = MsgPackCodec::to_value((512u32, "a")).unwrap();
        assert_eq!(
            key,
            rmpv::Value::Array(vec![rmpv::Value::from(512u32), rmpv::Value::from("a")])
        );
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Row> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(result.is_err());
    }
}
