use rwire_protocol::WireError;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("connection is disconnected")]
    Disconnected,

    #[error("{command} needs {size} bytes, more than the transport can carry")]
    CommandTooLarge { command: &'static str, size: usize },

    #[error("object belongs to a different connection")]
    ForeignObject,

    #[error("buffer is not mapped for this access")]
    NotMapped,

    #[error("range {offset}+{size} is outside the mapped range")]
    OutOfRange { offset: u64, size: u64 },

    #[error("{command} for serial {serial} that is not pending")]
    UnknownSerial { command: &'static str, serial: u64 },

    #[error("malformed {command}: {reason}")]
    MalformedReply {
        command: &'static str,
        reason: &'static str,
    },

    #[error("wire error: {0}")]
    Wire(WireError),
}

impl From<WireError> for ClientError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::ForeignObject => ClientError::ForeignObject,
            other => ClientError::Wire(other),
        }
    }
}
