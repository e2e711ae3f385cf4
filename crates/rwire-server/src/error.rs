use rwire_core::CoreError;
use rwire_protocol::WireError;

/// Dispatch failures. Every variant is fatal to the connection.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("registry error: {0}")]
    Registry(#[from] CoreError),

    #[error("no room for {command} reply of {size} bytes")]
    ReplyTooLarge { command: &'static str, size: usize },
}
