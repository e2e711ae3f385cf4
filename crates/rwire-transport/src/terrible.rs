use std::rc::Rc;

use rwire_core::config::TransportConfig;
use tracing::{debug, warn};

use crate::serializer::{CommandSerializer, Deliver};

/// Default capacity, matching the in-process test transport of the wire.
pub const DEFAULT_BUFFER_SIZE: usize = 1_000_000;

/// In-process synchronous transport: a fixed-size byte buffer whose
/// contents are handed to the peer on flush.
pub struct TerribleCommandBuffer {
    buffer: Box<[u8]>,
    offset: usize,
    handler: Option<Rc<dyn Deliver>>,
    failed: bool,
}

impl TerribleCommandBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity].into_boxed_slice(),
            offset: 0,
            handler: None,
            failed: false,
        }
    }

    /// Buffer of `config.buffer_size` bytes.
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.buffer_size)
    }

    pub fn with_handler(capacity: usize, handler: Rc<dyn Deliver>) -> Self {
        let mut buffer = Self::new(capacity);
        buffer.set_handler(handler);
        buffer
    }

    pub fn set_handler(&mut self, handler: Rc<dyn Deliver>) {
        self.handler = Some(handler);
    }

    /// Bytes reserved and not yet flushed.
    pub fn pending(&self) -> usize {
        self.offset
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }
}

impl Default for TerribleCommandBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl CommandSerializer for TerribleCommandBuffer {
    fn maximum_allocation_size(&self) -> usize {
        self.buffer.len()
    }

    fn get_cmd_space(&mut self, size: usize) -> Option<&mut [u8]> {
        if size > self.buffer.len() {
            warn!(size, capacity = self.buffer.len(), "command larger than transport buffer");
            return None;
        }
        if size > self.buffer.len() - self.offset && !self.flush() {
            return None;
        }
        let start = self.offset;
        self.offset += size;
        Some(&mut self.buffer[start..start + size])
    }

    fn flush(&mut self) -> bool {
        if self.failed {
            return false;
        }
        let Some(handler) = self.handler.clone() else {
            if self.offset > 0 {
                warn!(bytes = self.offset, "flush without a handler, dropping bytes");
            }
            self.offset = 0;
            return true;
        };

        // Copy out first: the handler may reenter and reserve more space.
        // An empty flush is still delivered, as an empty send.
        let data = self.buffer[..self.offset].to_vec();
        self.offset = 0;
        debug!(bytes = data.len(), "flushing terrible command buffer");

        if !handler.deliver(&data) {
            self.failed = true;
            return false;
        }
        true
    }
}
