//! Protocol constant tables: map keys, request types, iterators, error codes.

use std::fmt;

use crate::codec::{read_small_int, WireField};
use crate::error::{malformed, DriverError, Result};

/// Small-integer keys used in header and body maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Key {
    RequestType = 0x00,
    Sync = 0x01,
    SchemaVersion = 0x05,
    SpaceId = 0x10,
    IndexId = 0x11,
    Limit = 0x12,
    Offset = 0x13,
    Iterator = 0x14,
    SearchKey = 0x20,
    Tuple = 0x21,
    FunctionName = 0x22,
    UserName = 0x23,
    Expression = 0x27,
    Data = 0x30,
    Error = 0x31,
    /// Extended error stack sent by newer servers next to `Error`.
    ErrorStack = 0x52,
}

impl Key {
    /// Wire value of the key.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Request and response type tags carried under [`Key::RequestType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RequestType {
    Ok = 0,
    Select = 1,
    Insert = 2,
    Replace = 3,
    Update = 4,
    Delete = 5,
    Call16 = 6,
    Auth = 7,
    Eval = 8,
    Upsert = 9,
    Call = 10,
    Ping = 64,
}

impl RequestType {
    /// High bit of a response type tag; the remaining bits are the error code.
    pub const TYPE_ERROR: u32 = 1 << 15;

    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for RequestType {
    type Error = DriverError;

    fn try_from(code: u32) -> Result<Self> {
        Ok(match code {
            0 => RequestType::Ok,
            1 => RequestType::Select,
            2 => RequestType::Insert,
            3 => RequestType::Replace,
            4 => RequestType::Update,
            5 => RequestType::Delete,
            6 => RequestType::Call16,
            7 => RequestType::Auth,
            8 => RequestType::Eval,
            9 => RequestType::Upsert,
            10 => RequestType::Call,
            64 => RequestType::Ping,
            other => return Err(DriverError::protocol(format!("unknown request type {other}"))),
        })
    }
}

/// Index iteration strategy for select requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum IteratorType {
    #[default]
    Eq = 0,
    Req = 1,
    All = 2,
    Lt = 3,
    Le = 4,
    Ge = 5,
    Gt = 6,
    BitsAllSet = 7,
    BitsAnySet = 8,
    BitsAllNotSet = 9,
    Overlaps = 10,
    Neighbor = 11,
}

impl TryFrom<u32> for IteratorType {
    type Error = DriverError;

    fn try_from(code: u32) -> Result<Self> {
        const ALL: [IteratorType; 12] = [
            IteratorType::Eq,
            IteratorType::Req,
            IteratorType::All,
            IteratorType::Lt,
            IteratorType::Le,
            IteratorType::Ge,
            IteratorType::Gt,
            IteratorType::BitsAllSet,
            IteratorType::BitsAnySet,
            IteratorType::BitsAllNotSet,
            IteratorType::Overlaps,
            IteratorType::Neighbor,
        ];
        ALL.get(code as usize)
            .copied()
            .ok_or_else(|| DriverError::protocol(format!("unknown iterator type {code}")))
    }
}

impl WireField for IteratorType {
    fn write_field(&self, buf: &mut Vec<u8>) -> Result<()> {
        rmp::encode::write_uint(buf, *self as u64).map_err(malformed("encode iterator"))?;
        Ok(())
    }

    fn read_field(rd: &mut &[u8]) -> Result<Self> {
        let code = read_small_int(rd)?;
        let code = u32::try_from(code).map_err(malformed("iterator type out of range"))?;
        IteratorType::try_from(code)
    }
}

/// Server error code, taken from a response type tag with the error bit cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const UNKNOWN: ErrorCode = ErrorCode(0);
    pub const ILLEGAL_PARAMS: ErrorCode = ErrorCode(1);
    pub const TUPLE_FOUND: ErrorCode = ErrorCode(3);
    pub const READONLY: ErrorCode = ErrorCode(7);
    pub const INVALID_MSGPACK: ErrorCode = ErrorCode(20);
    pub const NO_SUCH_PROC: ErrorCode = ErrorCode(33);
    pub const NO_SUCH_INDEX: ErrorCode = ErrorCode(35);
    pub const NO_SUCH_SPACE: ErrorCode = ErrorCode(36);
    pub const ACCESS_DENIED: ErrorCode = ErrorCode(42);
    pub const NO_SUCH_USER: ErrorCode = ErrorCode(45);
    pub const PASSWORD_MISMATCH: ErrorCode = ErrorCode(47);
    pub const UNKNOWN_REQUEST_TYPE: ErrorCode = ErrorCode(48);
    pub const TIMEOUT: ErrorCode = ErrorCode(78);
    pub const WRONG_SCHEMA_VERSION: ErrorCode = ErrorCode(109);
    pub const LOADING: ErrorCode = ErrorCode(116);

    /// Extract the error code from a response type tag.
    ///
    /// Returns `None` when the error bit is not set.
    pub fn from_response_code(code: u32) -> Option<ErrorCode> {
        if code & RequestType::TYPE_ERROR != 0 {
            Some(ErrorCode(code ^ RequestType::TYPE_ERROR))
        } else {
            None
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_codes() {
        assert_eq!(Key::RequestType.code(), 0x00);
        assert_eq!(Key::SchemaVersion.code(), 0x05);
        assert_eq!(Key::Data.code(), 0x30);
        assert_eq!(Key::ErrorStack.code(), 0x52);
    }

    #[test]
    fn test_error_code_from_response() {
        assert_eq!(
            ErrorCode::from_response_code(0x8000 | 36),
            Some(ErrorCode::NO_SUCH_SPACE)
        );
        assert_eq!(ErrorCode::from_response_code(0), None);
        assert_eq!(ErrorCode::from_response_code(RequestType::Ping.code()), None);
    }

    #[test]
    fn test_iterator_roundtrip_through_field() {
        let mut buf = Vec::new();
        IteratorType::Ge.write_field(&mut buf).unwrap();
        assert_eq!(buf, vec![0x05]);

        let mut rd = buf.as_slice();
        assert_eq!(IteratorType::read_field(&mut rd).unwrap(), IteratorType::Ge);
        assert!(rd.is_empty());
    }

    #[test]
    fn test_unknown_iterator_rejected() {
        let err = IteratorType::try_from(12).unwrap_err();
        assert!(matches!(err, DriverError::Protocol(_)));
    }

    #[test]
    fn test_request_type_try_from() {
        assert_eq!(RequestType::try_from(7).unwrap(), RequestType::Auth);
        assert_eq!(RequestType::try_from(64).unwrap(), RequestType::Ping);
        assert!(RequestType::try_from(65).is_err());
    }
}
