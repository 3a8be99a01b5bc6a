//! Protocol module - constants, wire format, framing and message bodies.
//!
//! - Length-prefixed frames carrying a keyed header map and a keyed body map
//! - 128-byte greeting with version line and base64 salt
//! - Request/response bodies declared with [`keyed_struct!`](crate::keyed_struct)

mod constants;
mod frame;
mod messages;
mod wire_format;

pub use constants::{ErrorCode, IteratorType, Key, RequestType};
pub use frame::{build_frame, parse_frame};
pub use messages::{AuthRequest, AuthTuple, Empty, ErrorResponse, SelectRequest, Tuple};
pub use wire_format::{
    decode_length_prefix, encode_length_prefix, parse_greeting, ConnectionInfo, Header,
    GREETING_SALT_OFFSET, GREETING_SIZE, GREETING_VERSION_SIZE, LENGTH_PREFIX_SIZE,
};
