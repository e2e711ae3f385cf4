//! Command framing.
//!
//! Every command is `CmdHeader` followed by its body, zero-padded so the
//! whole command is a multiple of [`WIRE_ALIGNMENT`] bytes. Both directions
//! use the same framing; the command enums are generated by
//! [`wire_commands!`](crate::wire_commands).

use crate::codec::WIRE_ALIGNMENT;
use crate::error::WireError;

/// Header in front of every command: `command_size` covers header, body
/// and padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdHeader {
    pub command_size: u32,
    pub command_id: u32,
}

impl CmdHeader {
    pub const SIZE: usize = 8;

    /// Read a header from the front of `bytes`, if enough bytes are present.
    pub fn peek(bytes: &[u8]) -> Option<CmdHeader> {
        let b = bytes.get(..Self::SIZE)?;
        Some(CmdHeader {
            command_size: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            command_id: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
        })
    }

    /// Write the header into the first [`SIZE`](Self::SIZE) bytes of `out`.
    pub fn write(&self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.command_size.to_le_bytes());
        out[4..Self::SIZE].copy_from_slice(&self.command_id.to_le_bytes());
    }

    /// Check the declared size against the header length, the alignment,
    /// and the number of bytes available.
    pub fn validate(&self, available: usize) -> Result<usize, WireError> {
        let size = self.command_size as usize;
        if size < Self::SIZE || size % WIRE_ALIGNMENT != 0 || size > available {
            return Err(WireError::InvalidCommandSize {
                size: self.command_size,
                header: Self::SIZE,
                available,
            });
        }
        Ok(size)
    }
}

/// Declares a closed command enum together with its id enum and codec.
///
/// A command's body is the tuple of its fields in declaration order.
/// Generated items on the command enum:
///
/// - `id()` / `name()`
/// - `encoded_size()`: aligned size of the whole command
/// - `serialize(&mut [u8])`: writes exactly `encoded_size()` bytes
/// - `deserialize(&[u8])`: decodes one command from the front of the input
///   and returns it with the number of bytes consumed
#[macro_export]
macro_rules! wire_commands {
    (
        $(#[$meta:meta])*
        pub enum $name:ident / $id_name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $id:literal {
                    $( $field:ident : $ty:ty ),+ $(,)?
                }
            ),* $(,)?
        }
    ) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum $id_name {
            $( $variant = $id ),*
        }

        impl $id_name {
            pub fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $( $id => Some(Self::$variant), )*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => stringify!($variant), )*
                }
            }
        }

        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant { $( $field: $ty ),+ }
            ),*
        }

        impl $name {
            pub fn id(&self) -> $id_name {
                match self {
                    $( Self::$variant { .. } => $id_name::$variant, )*
                }
            }

            pub fn name(&self) -> &'static str {
                self.id().name()
            }

            pub fn encoded_size(&self) -> usize {
                let body = match self {
                    $(
                        Self::$variant { $( $field ),+ } => {
                            $crate::codec::body_size(&( $( $field, )+ ))
                        }
                    )*
                };
                $crate::codec::align_up(
                    $crate::wire::CmdHeader::SIZE.saturating_add(body),
                    $crate::codec::WIRE_ALIGNMENT,
                )
            }

            pub fn serialize(&self, buf: &mut [u8]) -> Result<usize, $crate::error::WireError> {
                let size = self.encoded_size();
                if buf.len() < size {
                    return Err($crate::error::WireError::BufferTooSmall {
                        needed: size,
                        available: buf.len(),
                    });
                }
                let command_size = u32::try_from(size).map_err(|_| {
                    $crate::error::WireError::CommandTooLarge { command: self.name(), size }
                })?;

                let (head, body) = buf[..size].split_at_mut($crate::wire::CmdHeader::SIZE);
                $crate::wire::CmdHeader {
                    command_size,
                    command_id: self.id() as u32,
                }
                .write(head);
                body.fill(0);
                match self {
                    $(
                        Self::$variant { $( $field ),+ } => {
                            $crate::codec::encode_body(self.name(), &( $( $field, )+ ), body)?
                        }
                    )*
                }
                Ok(size)
            }

            pub fn deserialize(bytes: &[u8]) -> Result<(Self, usize), $crate::error::WireError> {
                let header = $crate::wire::CmdHeader::peek(bytes).ok_or(
                    $crate::error::WireError::Truncated {
                        needed: $crate::wire::CmdHeader::SIZE,
                        remaining: bytes.len(),
                    },
                )?;
                let size = header.validate(bytes.len())?;
                let id = $id_name::from_u32(header.command_id)
                    .ok_or($crate::error::WireError::UnknownCommand(header.command_id))?;

                let body = &bytes[$crate::wire::CmdHeader::SIZE..size];
                let (command, rest) = match id {
                    $(
                        $id_name::$variant => {
                            let (( $( $field, )+ ), rest): (( $( $ty, )+ ), &[u8]) =
                                $crate::codec::decode_body(id.name(), body)?;
                            (Self::$variant { $( $field ),+ }, rest)
                        }
                    )*
                };

                if rest.len() >= $crate::codec::WIRE_ALIGNMENT || rest.iter().any(|b| *b != 0) {
                    return Err($crate::error::WireError::TrailingBytes {
                        command: id.name(),
                        extra: rest.len(),
                    });
                }
                Ok((command, size))
            }
        }
    };
}
