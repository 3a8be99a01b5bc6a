//! Keyed-map structure codec.
//!
//! Structured values travel as MsgPack maps keyed by small integers
//! ([`Key`]). Each type declares its fields once with [`keyed_struct!`],
//! which builds a static field table: `(key, accessor)` pairs in declaration
//! order. [`encode_struct`] and [`decode_struct`] walk that table, so no type
//! carries a hand-written encoder or decoder.
//!
//! ```
//! use tarantool_driver::keyed_struct;
//! use tarantool_driver::codec::{decode_struct, encode_struct};
//! use tarantool_driver::protocol::Key;
//!
//! keyed_struct! {
//!     #[derive(Debug, Default, PartialEq)]
//!     pub struct Target {
//!         Key::SpaceId => pub space_id: u32,
//!         Key::Limit => pub limit: Option<u32>,
//!     }
//! }
//!
//! let mut buf = Vec::new();
//! let value = Target { space_id: 512, limit: None };
//! encode_struct(Some(&value), &mut buf).unwrap();
//! assert_eq!(buf, vec![0x81, 0x10, 0xcd, 0x02, 0x00]);
//!
//! let decoded: Target = decode_struct(&mut buf.as_slice()).unwrap();
//! assert_eq!(decoded, value);
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::structure::{read_map_header, read_small_int};
use crate::error::{malformed, DriverError, Result};
use crate::protocol::Key;

/// A value that can sit behind a key in a keyed map.
pub trait WireField: Sized {
    fn write_field(&self, buf: &mut Vec<u8>) -> Result<()>;

    fn read_field(rd: &mut &[u8]) -> Result<Self>;

    /// Absent fields are left out of the encoded map entirely.
    fn is_absent(&self) -> bool {
        false
    }
}

/// One entry of a type's field table.
pub struct Field<T> {
    pub key: Key,
    pub name: &'static str,
    pub is_absent: fn(&T) -> bool,
    pub write: fn(&T, &mut Vec<u8>) -> Result<()>,
    pub read: fn(&mut T, &mut &[u8]) -> Result<()>,
}

/// A record type with a static table of keyed fields.
///
/// Implemented by [`keyed_struct!`]; decoding starts from `Default` and
/// fills in whatever keys arrive.
pub trait KeyedStruct: Default + Sized + 'static {
    fn fields() -> &'static [Field<Self>];

    fn field_for(key: i64) -> Option<&'static Field<Self>> {
        Self::fields().iter().find(|f| i64::from(f.key.code()) == key)
    }
}

/// Encode `value` as a keyed map, or as a single nil when there is none.
///
/// Fields are written in declaration order; absent ones are skipped and the
/// map length counts only what was written.
pub fn encode_struct<T: KeyedStruct>(value: Option<&T>, buf: &mut Vec<u8>) -> Result<()> {
    let Some(value) = value else {
        rmp::encode::write_nil(buf).map_err(malformed("encode nil"))?;
        return Ok(());
    };

    let present: Vec<&Field<T>> = T::fields()
        .iter()
        .filter(|field| !(field.is_absent)(value))
        .collect();

    rmp::encode::write_map_len(buf, present.len() as u32).map_err(malformed("encode map header"))?;
    for field in present {
        rmp::encode::write_uint(buf, u64::from(field.key.code())).map_err(malformed("encode key"))?;
        (field.write)(value, buf)?;
    }
    Ok(())
}

/// Decode a keyed map into `T`.
///
/// Every key on the wire must belong to one of `T`'s fields; anything else
/// is a `Protocol` error. Keys missing from the wire keep their default.
pub fn decode_struct<T: KeyedStruct>(rd: &mut &[u8]) -> Result<T> {
    let mut value = T::default();
    let len = read_map_header(rd)?;
    for _ in 0..len {
        let key = read_small_int(rd)?;
        let field = T::field_for(key).ok_or_else(|| {
            DriverError::protocol(format!(
                "unknown field key {key:#04x} for {}",
                std::any::type_name::<T>()
            ))
        })?;
        (field.read)(&mut value, rd)
            .map_err(|err| DriverError::protocol(format!("field `{}`: {err}", field.name)))?;
    }
    Ok(value)
}

fn write_serde<T: Serialize + ?Sized>(value: &T, buf: &mut Vec<u8>) -> Result<()> {
    rmp_serde::encode::write(buf, value)?;
    Ok(())
}

fn read_serde<T: DeserializeOwned>(rd: &mut &[u8]) -> Result<T> {
    Ok(rmp_serde::from_read(&mut *rd)?)
}

macro_rules! serde_wire_field {
    ($($ty:ty),* $(,)?) => {
        $(
            impl WireField for $ty {
                #[inline]
                fn write_field(&self, buf: &mut Vec<u8>) -> Result<()> {
                    write_serde(self, buf)
                }

                #[inline]
                fn read_field(rd: &mut &[u8]) -> Result<Self> {
                    read_serde(rd)
                }
            }
        )*
    };
}

serde_wire_field!(bool, u8, u16, u32, u64, i8, i16, i32, i64, f64, String);

impl<T: WireField> WireField for Option<T> {
    fn write_field(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Some(inner) => inner.write_field(buf),
            None => {
                rmp::encode::write_nil(buf).map_err(malformed("encode nil"))?;
                Ok(())
            }
        }
    }

    fn read_field(rd: &mut &[u8]) -> Result<Self> {
        if rd.first() == Some(&0xc0) {
            *rd = &rd[1..];
            return Ok(None);
        }
        T::read_field(rd).map(Some)
    }

    fn is_absent(&self) -> bool {
        self.is_none()
    }
}

impl WireField for rmpv::Value {
    fn write_field(&self, buf: &mut Vec<u8>) -> Result<()> {
        rmpv::encode::write_value(buf, self).map_err(malformed("encode value"))
    }

    fn read_field(rd: &mut &[u8]) -> Result<Self> {
        rmpv::decode::read_value(rd).map_err(malformed("decode value"))
    }
}

/// Declare a struct whose fields are carried as a keyed map.
///
/// Each field is written `Key::Variant => visibility name: Type`. The macro
/// emits the struct, its [`KeyedStruct`] field table and a [`WireField`]
/// impl so the type can itself be nested as a field.
///
/// [`KeyedStruct`]: crate::codec::KeyedStruct
/// [`WireField`]: crate::codec::WireField
#[macro_export]
macro_rules! keyed_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $key:path => $fvis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $fvis $field: $ty,
            )*
        }

        impl $crate::codec::KeyedStruct for $name {
            fn fields() -> &'static [$crate::codec::Field<Self>] {
                static FIELDS: &[$crate::codec::Field<$name>] = &[
                    $(
                        $crate::codec::Field {
                            key: $key,
                            name: stringify!($field),
                            is_absent: |value: &$name| -> bool {
                                $crate::codec::WireField::is_absent(&value.$field)
                            },
                            write: |value: &$name, buf: &mut ::std::vec::Vec<u8>| -> $crate::error::Result<()> {
                                $crate::codec::WireField::write_field(&value.$field, buf)
                            },
                            read: |value: &mut $name, rd: &mut &[u8]| -> $crate::error::Result<()> {
                                value.$field = <$ty as $crate::codec::WireField>::read_field(rd)?;
                                Ok(())
                            },
                        },
                    )*
                ];
                FIELDS
            }
        }

        impl $crate::codec::WireField for $name {
            fn write_field(&self, buf: &mut ::std::vec::Vec<u8>) -> $crate::error::Result<()> {
                $crate::codec::encode_struct(Some(self), buf)
            }

            fn read_field(rd: &mut &[u8]) -> $crate::error::Result<Self> {
                $crate::codec::decode_struct(rd)
            }
        }
    };
}
