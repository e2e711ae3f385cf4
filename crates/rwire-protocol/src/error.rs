use crate::handle::{ObjectId, ObjectType};

/// Shape errors found while encoding or decoding the wire.
///
/// Every variant is fatal to the connection that produced the bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("invalid command size {size} (header {header}, available {available})")]
    InvalidCommandSize {
        size: u32,
        header: usize,
        available: usize,
    },

    #[error("{command}: command of {size} bytes does not fit a u32 header")]
    CommandTooLarge { command: &'static str, size: usize },

    #[error("unknown command id: {0}")]
    UnknownCommand(u32),

    #[error("{command}: serialization error: {reason}")]
    Serialization { command: &'static str, reason: String },

    #[error("{command}: {extra} trailing bytes inside command")]
    TrailingBytes { command: &'static str, extra: usize },

    #[error("invalid value {value} for {name}")]
    InvalidEnum { name: &'static str, value: u32 },

    #[error("invalid {object_type:?} id {id}")]
    InvalidObject { object_type: ObjectType, id: ObjectId },

    #[error("object belongs to a different connection")]
    ForeignObject,

    #[error("destination buffer too small: need {needed}, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}
