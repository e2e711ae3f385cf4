//! Queue-based transport modelling a socket: flushed bytes are cut into
//! fragments and sent over a channel, and the receiver drains the queue
//! explicitly.

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use rwire_core::config::TransportConfig;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::serializer::{CommandSerializer, Deliver};

pub const DEFAULT_FRAGMENT_SIZE: usize = 4096;

/// Create a connected sender/receiver pair.
pub fn channel(capacity: usize, fragment_size: usize) -> (ChannelCommandBuffer, ChannelReceiver) {
    let (tx, rx) = unbounded();
    (
        ChannelCommandBuffer {
            buffer: vec![0; capacity],
            offset: 0,
            fragment_size: fragment_size.max(1),
            tx,
            closed: false,
        },
        ChannelReceiver { rx },
    )
}

/// [`channel`] sized by `config.buffer_size` and `config.fragment_size`.
pub fn channel_from_config(config: &TransportConfig) -> (ChannelCommandBuffer, ChannelReceiver) {
    channel(config.buffer_size, config.fragment_size)
}

pub struct ChannelCommandBuffer {
    buffer: Vec<u8>,
    offset: usize,
    fragment_size: usize,
    tx: Sender<Vec<u8>>,
    closed: bool,
}

impl CommandSerializer for ChannelCommandBuffer {
    fn maximum_allocation_size(&self) -> usize {
        self.buffer.len()
    }

    fn get_cmd_space(&mut self, size: usize) -> Option<&mut [u8]> {
        if size > self.buffer.len() {
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
        if self.closed {
            return false;
        }
        let data = &self.buffer[..self.offset];
        let mut fragments: Vec<&[u8]> = data.chunks(self.fragment_size).collect();
        if fragments.is_empty() {
            fragments.push(&[]);
        }
        for fragment in fragments {
            if self.tx.send(fragment.to_vec()).is_err() {
                warn!("{}", TransportError::ChannelClosed);
                self.closed = true;
                self.offset = 0;
                return false;
            }
        }
        debug!(bytes = self.offset, fragment_size = self.fragment_size, "flushed to channel");
        self.offset = 0;
        true
    }
}

pub struct ChannelReceiver {
    rx: Receiver<Vec<u8>>,
}

impl ChannelReceiver {
    /// Deliver every queued fragment, in order. Returns how many fragments
    /// were delivered. Fragments left behind after a failure stay queued.
    pub fn pump(&self, target: &dyn Deliver) -> Result<usize, TransportError> {
        let mut delivered = 0;
        loop {
            match self.rx.try_recv() {
                Ok(fragment) => {
                    if !target.deliver(&fragment) {
                        return Err(TransportError::HandlerRejected);
                    }
                    delivered += 1;
                }
                Err(TryRecvError::Empty) => return Ok(delivered),
                Err(TryRecvError::Disconnected) if delivered > 0 => return Ok(delivered),
                Err(TryRecvError::Disconnected) => return Err(TransportError::ChannelClosed),
            }
        }
    }

    pub fn queued(&self) -> usize {
        self.rx.len()
    }
}
