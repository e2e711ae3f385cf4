//! Body codec shared by every command and descriptor.
//!
//! Bodies are bincode with fixed-width little-endian integers. Encoding is
//! two-pass: [`body_size`] computes the exact byte count, the caller obtains
//! that much space from the transport, then [`encode_body`] fills it.
//! Decoding is limited to the bytes of the command being decoded, so a
//! declared length is checked against what is actually present before
//! anything is allocated or copied.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::WireError;

/// Every serialized command occupies a multiple of this many bytes.
pub const WIRE_ALIGNMENT: usize = 8;

/// Round `value` up to `alignment`, saturating instead of overflowing.
pub const fn align_up(value: usize, alignment: usize) -> usize {
    match value.checked_add(alignment - 1) {
        Some(v) => v & !(alignment - 1),
        None => usize::MAX & !(alignment - 1),
    }
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

fn malformed(command: &'static str, err: &bincode::Error) -> WireError {
    WireError::Serialization {
        command,
        reason: err.to_string(),
    }
}

/// Exact encoded size of `body`. A body that cannot be sized reports
/// `usize::MAX`, which no transport can hand out.
pub fn body_size<T: Serialize + ?Sized>(body: &T) -> usize {
    options()
        .serialized_size(body)
        .ok()
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(usize::MAX)
}

/// Write `body` to the front of `out`, which must hold [`body_size`] bytes.
pub fn encode_body<T: Serialize + ?Sized>(
    command: &'static str,
    body: &T,
    out: &mut [u8],
) -> Result<(), WireError> {
    options()
        .serialize_into(out, body)
        .map_err(|e| malformed(command, &e))
}

/// Decode one `T` from the front of `bytes` and return it with the unread
/// tail. Nothing past the end of `bytes` is ever read or reserved.
pub fn decode_body<'a, T: DeserializeOwned>(
    command: &'static str,
    bytes: &'a [u8],
) -> Result<(T, &'a [u8]), WireError> {
    let mut rest = bytes;
    let value = options()
        .with_limit(bytes.len() as u64)
        .deserialize_from(&mut rest)
        .map_err(|e| malformed(command, &e))?;
    Ok((value, rest))
}

/// Declares a closed `u32`-valued enum. Unknown values are rejected on decode.
#[macro_export]
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
        )]
        #[serde(try_from = "u32", into = "u32")]
        #[repr(u32)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value ),*
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value as u32
            }
        }

        impl TryFrom<u32> for $name {
            type Error = $crate::error::WireError;

            fn try_from(value: u32) -> Result<Self, $crate::error::WireError> {
                match value {
                    $( $value => Ok(Self::$variant), )*
                    _ => Err($crate::error::WireError::InvalidEnum {
                        name: stringify!($name),
                        value,
                    }),
                }
            }
        }
    };
}

/// Bitmask fields are copied verbatim: unknown bits survive the round trip
/// and value validation is left to the backend.
#[macro_export]
macro_rules! wire_bitflags {
    ($($name:ident),* $(,)?) => {
        $(
            impl serde::Serialize for $name {
                fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                    s.serialize_u32(self.bits())
                }
            }

            impl<'de> serde::Deserialize<'de> for $name {
                fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                    <u32 as serde::Deserialize>::deserialize(d).map(Self::from_bits_retain)
                }
            }
        )*
    };
}
