//! Request and response bodies.

use serde::Serialize;

use super::constants::{IteratorType, Key};
use crate::codec::{read_array_header, MsgPackCodec, WireField};
use crate::error::{malformed, DriverError, Result};
use crate::keyed_struct;

/// Positional tuple of dynamic values, used for select keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tuple(pub Vec<rmpv::Value>);

fn array_len(len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| DriverError::protocol(format!("tuple of {len} values does not fit a u32 length")))
}

impl WireField for Tuple {
    fn write_field(&self, buf: &mut Vec<u8>) -> Result<()> {
        rmp::encode::write_array_len(buf, array_len(self.0.len())?).map_err(malformed("encode tuple"))?;
        for value in &self.0 {
            value.write_field(buf)?;
        }
        Ok(())
    }

    fn read_field(rd: &mut &[u8]) -> Result<Self> {
        let len = read_array_header(rd)?;
        let mut values = Vec::with_capacity(len.min(64) as usize);
        for _ in 0..len {
            values.push(rmpv::Value::read_field(rd)?);
        }
        Ok(Tuple(values))
    }
}

/// `[method, scramble]` pair carried under [`Key::Tuple`] in an auth request.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthTuple {
    pub method: String,
    pub scramble: Vec<u8>,
}

impl std::fmt::Debug for AuthTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTuple")
            .field("method", &self.method)
            .field("scramble", &"[redacted]")
            .finish()
    }
}

impl WireField for AuthTuple {
    fn write_field(&self, buf: &mut Vec<u8>) -> Result<()> {
        rmp::encode::write_array_len(buf, 2).map_err(malformed("encode auth tuple"))?;
        rmp::encode::write_str(buf, &self.method).map_err(malformed("encode auth method"))?;
        rmp::encode::write_bin(buf, &self.scramble).map_err(malformed("encode scramble"))?;
        Ok(())
    }

    fn read_field(rd: &mut &[u8]) -> Result<Self> {
        match rmpv::Value::read_field(rd)? {
            rmpv::Value::Array(items) => match items.as_slice() {
                [rmpv::Value::String(method), rmpv::Value::Binary(scramble)] => Ok(AuthTuple {
                    method: method.as_str().unwrap_or_default().to_string(),
                    scramble: scramble.clone(),
                }),
                _ => Err(DriverError::protocol("auth tuple must be [method, scramble]")),
            },
            other => Err(DriverError::protocol(format!("auth tuple must be an array, found {other:?}"))),
        }
    }
}

keyed_struct! {
    /// Body of an `Auth` request.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct AuthRequest {
        Key::Tuple => pub tuple: AuthTuple,
        Key::UserName => pub user_name: String,
    }
}

keyed_struct! {
    /// Body of a `Select` request.
    ///
    /// Built fluently:
    ///
    /// ```
    /// use tarantool_driver::protocol::{IteratorType, SelectRequest};
    ///
    /// let request = SelectRequest::new(512, 0)
    ///     .iterator(IteratorType::Ge)
    ///     .limit(100)
    ///     .key((10u32,))
    ///     .unwrap();
    /// assert_eq!(request.limit, Some(100));
    /// ```
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct SelectRequest {
        Key::SpaceId => pub space_id: u32,
        Key::IndexId => pub index_id: u32,
        Key::Limit => pub limit: Option<u32>,
        Key::Offset => pub offset: Option<u32>,
        Key::Iterator => pub iterator: IteratorType,
        Key::SearchKey => pub key: Tuple,
    }
}

impl SelectRequest {
    /// Select everything matching an empty key on `index_id` of `space_id`.
    pub fn new(space_id: u32, index_id: u32) -> Self {
        Self {
            space_id,
            index_id,
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn iterator(mut self, iterator: IteratorType) -> Self {
        self.iterator = iterator;
        self
    }

    /// Set the search key from any value that serializes to an array.
    ///
    /// # Errors
    ///
    /// `Protocol` if the key does not serialize to a MsgPack array.
    pub fn key<K: Serialize>(mut self, key: K) -> Result<Self> {
        match MsgPackCodec::to_value(key)? {
            rmpv::Value::Array(values) => {
                self.key = Tuple(values);
                Ok(self)
            }
            other => Err(DriverError::protocol(format!("select key must be an array, got {other:?}"))),
        }
    }
}

keyed_struct! {
    /// Body of an error response.
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct ErrorResponse {
        Key::Error => pub message: String,
        /// Structured error stack, present on newer servers.
        Key::ErrorStack => pub stack: Option<rmpv::Value>,
    }
}

keyed_struct! {
    /// Empty body map, used by `Ping`.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Empty {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_struct, encode_struct};

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_tuple_length_must_fit_u32() {
        assert_eq!(array_len(3).unwrap(), 3);
        assert!(matches!(
            array_len(u32::MAX as usize + 1),
            Err(DriverError::Protocol(_))
        ));
    }

    #[test]
    fn test_auth_request_layout() {
        let request = AuthRequest {
            tuple: AuthTuple {
                method: "chap-sha1".to_string(),
                scramble: vec![0xaa; 20],
            },
            user_name: "admin".to_string(),
        };
        let mut buf = Vec::new();
        encode_struct(Some(&request), &mut buf).unwrap();

        let mut expected = vec![0x82, 0x21, 0x92, 0xa9];
        expected.extend_from_slice(b"chap-sha1");
        expected.extend_from_slice(&[0xc4, 20]);
        expected.extend_from_slice(&[0xaa; 20]);
        expected.extend_from_slice(&[0x23, 0xa5]);
        expected.extend_from_slice(b"admin");
        assert_eq!(buf, expected);

        let decoded: AuthRequest = decode_struct(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_auth_tuple_debug_is_redacted() {
        let tuple = AuthTuple {
            method: "chap-sha1".to_string(),
            scramble: vec![0x42; 20],
        };
        let debug = format!("{tuple:?}");
        assert!(debug.contains("redacted"));
        assert!(!debug.contains("66"));
    }

    #[test]
    fn test_select_request_fields() {
        let request = SelectRequest::new(512, 1)
            .offset(5)
            .iterator(IteratorType::All)
            .key(("a", 2u8))
            .unwrap();
        let mut buf = Vec::new();
        encode_struct(Some(&request), &mut buf).unwrap();

        // space, index, offset, iterator, key: limit is left out
        assert_eq!(buf[0], 0x85);
        let decoded: SelectRequest = decode_struct(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.key.0.len(), 2);
    }

    #[test]
    fn test_select_key_must_be_array() {
        let err = SelectRequest::new(1, 0).key(5u32).unwrap_err();
        assert!(matches!(err, DriverError::Protocol(_)));
    }

    #[test]
    fn test_error_response_with_stack() {
        let mut buf = Vec::new();
        rmp::encode::write_map_len(&mut buf, 2).unwrap();
        rmp::encode::write_uint(&mut buf, 0x31).unwrap();
        rmp::encode::write_str(&mut buf, "Space '512' does not exist").unwrap();
        rmp::encode::write_uint(&mut buf, 0x52).unwrap();
        rmp::encode::write_map_len(&mut buf, 0).unwrap();

        let decoded: ErrorResponse = decode_struct(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded.message, "Space '512' does not exist");
        assert!(decoded.stack.is_some());
    }

    #[test]
    fn test_empty_body() {
        let mut buf = Vec::new();
        encode_struct(Some(&Empty {}), &mut buf).unwrap();
        assert_eq!(buf, vec![0x80]);
    }
}
