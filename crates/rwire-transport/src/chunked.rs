use rwire_core::config::TransportConfig;
use rwire_protocol::CmdHeader;
use tracing::error;

use crate::error::TransportError;
use crate::serializer::CommandHandler;

/// Receive-side reassembly for transports that split commands at arbitrary
/// byte boundaries.
///
/// Only whole commands are forwarded to the inner handler; a trailing
/// partial command is kept until the rest of it arrives.
pub struct ChunkedCommandHandler<H> {
    inner: H,
    pending: Vec<u8>,
    max_command_size: usize,
    error: Option<TransportError>,
}

impl<H: CommandHandler> ChunkedCommandHandler<H> {
    pub fn new(inner: H, max_command_size: usize) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            max_command_size,
            error: None,
        }
    }

    /// Accept commands up to `config.max_command_size` bytes.
    pub fn from_config(inner: H, config: &TransportConfig) -> Self {
        Self::new(inner, config.max_command_size)
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut H {
        &mut self.inner
    }

    /// Bytes held back waiting for the rest of a command.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn error(&self) -> Option<&TransportError> {
        self.error.as_ref()
    }

    /// Length of the longest prefix of `bytes` made of whole commands.
    fn complete_prefix(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        let mut end = 0;
        while let Some(header) = CmdHeader::peek(&bytes[end..]) {
            let size = header.command_size as usize;
            if size < CmdHeader::SIZE {
                return Err(TransportError::InvalidCommandSize(header.command_size));
            }
            if size > self.max_command_size {
                return Err(TransportError::CommandTooLarge {
                    size,
                    max: self.max_command_size,
                });
            }
            if bytes.len() - end < size {
                break;
            }
            end += size;
        }
        Ok(end)
    }

    fn fail(&mut self, err: TransportError) -> bool {
        error!("chunked receive failed: {}", err);
        self.error = Some(err);
        self.pending.clear();
        false
    }
}

impl<H: CommandHandler> CommandHandler for ChunkedCommandHandler<H> {
    fn handle_commands(&mut self, data: &[u8]) -> bool {
        if self.error.is_some() {
            return false;
        }

        // Fast path: nothing buffered and the chunk ends on a command boundary.
        if self.pending.is_empty() {
            match self.complete_prefix(data) {
                Ok(end) if end == data.len() => {
                    if end > 0 && !self.inner.handle_commands(data) {
                        return self.fail(TransportError::HandlerRejected);
                    }
                    return true;
                }
                Ok(_) => {}
                Err(err) => return self.fail(err),
            }
        }

        self.pending.extend_from_slice(data);
        let end = match self.complete_prefix(&self.pending) {
            Ok(end) => end,
            Err(err) => return self.fail(err),
        };
        if end == 0 {
            return true;
        }

        let whole: Vec<u8> = self.pending.drain(..end).collect();
        if !self.inner.handle_commands(&whole) {
            return self.fail(TransportError::HandlerRejected);
        }
        true
    }
}
