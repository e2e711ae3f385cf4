#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("wire format error: {0}")]
    Wire(#[from] rwire_protocol::WireError),

    #[error("invalid command size in header: {0}")]
    InvalidCommandSize(u32),

    #[error("command too large: {size} bytes (max {max})")]
    CommandTooLarge { size: usize, max: usize },

    #[error("handler rejected the command stream")]
    HandlerRejected,

    #[error("channel closed")]
    ChannelClosed,
}
