//! Buffer mapping.
//!
//! Read maps copy the server's bytes into the client when the map
//! completes. Write maps hand out a zeroed shadow that is sent back in one
//! `BufferUpdateMappedData` right before the unmap.

use std::mem;

use rwire_protocol::types::{BufferUsage, MapAsyncStatus, MapMode};
use rwire_protocol::Command;
use tracing::debug;

use crate::client::MapState;
use crate::error::ClientError;
use crate::objects::Buffer;
use crate::requests::{LocalResolution, PendingRequest};

/// Map state as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMapState {
    Unmapped,
    Pending,
    Mapped,
}

impl Buffer {
    pub fn size(&self) -> u64 {
        self.with_state(|b| b.size).unwrap_or(0)
    }

    pub fn usage(&self) -> BufferUsage {
        self.with_state(|b| b.usage).unwrap_or(BufferUsage::empty())
    }

    pub fn map_state(&self) -> BufferMapState {
        self.with_state(|b| match b.map {
            MapState::Unmapped => BufferMapState::Unmapped,
            MapState::Pending { .. } => BufferMapState::Pending,
            MapState::Mapped { .. } => BufferMapState::Mapped,
        })
        .unwrap_or(BufferMapState::Unmapped)
    }

    fn with_state<R>(&self, f: impl FnOnce(&crate::client::BufferState) -> R) -> Option<R> {
        let client = self.0.client().ok()?;
        let state = client.state.borrow();
        state.buffer(self.0.handle().id).map(f)
    }

    /// Request `size` bytes at `offset` for reading or writing. `callback`
    /// runs exactly once: with the server's answer, or earlier if the map
    /// is abandoned by an unmap, a destroy or a disconnect.
    pub fn map_async(
        &self,
        mode: MapMode,
        offset: u64,
        size: u64,
        callback: impl FnOnce(MapAsyncStatus, String) + 'static,
    ) -> Result<(), ClientError> {
        let client = match self.0.client().and_then(|c| c.check_connected().map(|_| c)) {
            Ok(client) => client,
            Err(err) => {
                callback(MapAsyncStatus::Disconnected, "disconnected".to_string());
                return Err(err);
            }
        };
        let handle = self.0.handle();

        let checked = {
            let state = client.state.borrow();
            match state.buffer(handle.id) {
                Some(b) if !b.destroyed && matches!(b.map, MapState::Unmapped) => {
                    let in_range = offset.checked_add(size).map_or(false, |end| end <= b.size);
                    Some((b.device, in_range))
                }
                _ => None,
            }
        };
        let Some((device, in_range)) = checked else {
            debug!(buffer = %handle, "map requested while mapped, pending or destroyed");
            callback(
                MapAsyncStatus::ValidationError,
                "buffer is not in a mappable state".to_string(),
            );
            return Ok(());
        };
        if !in_range {
            debug!(buffer = %handle, offset, size, "map range outside the buffer");
            callback(
                MapAsyncStatus::ValidationError,
                format!("map range {}+{} is outside the buffer", offset, size),
            );
            return Ok(());
        }

        let entry = PendingRequest::Map {
            device,
            buffer: handle,
            mode,
            offset,
            size,
            callback: Box::new(callback),
        };
        client.send_request(entry, |request_serial| Command::BufferMapAsync {
            buffer: handle.id,
            request_serial,
            mode,
            offset,
            size,
        })?;
        Ok(())
    }

    /// Copy of `size` bytes of the mapped range starting at buffer offset
    /// `offset`.
    pub fn get_mapped_range(&self, offset: u64, size: u64) -> Result<Vec<u8>, ClientError> {
        let client = self.0.client()?;
        let state = client.state.borrow();
        let Some(MapState::Mapped {
            offset: base, data, ..
        }) = state.buffer(self.0.handle().id).map(|b| &b.map)
        else {
            return Err(ClientError::NotMapped);
        };
        let start = mapped_start(*base, data.len(), offset, size)?;
        Ok(data[start..start + size as usize].to_vec())
    }

    /// Write into a range mapped for writing. The bytes reach the server
    /// on [`unmap`](Buffer::unmap).
    pub fn write_mapped_range(&self, offset: u64, bytes: &[u8]) -> Result<(), ClientError> {
        let client = self.0.client()?;
        let mut state = client.state.borrow_mut();
        let Some(MapState::Mapped {
            mode,
            offset: base,
            data,
        }) = state.buffer_mut(self.0.handle().id).map(|b| &mut b.map)
        else {
            return Err(ClientError::NotMapped);
        };
        if !mode.contains(MapMode::WRITE) {
            return Err(ClientError::NotMapped);
        }
        let start = mapped_start(*base, data.len(), offset, bytes.len() as u64)?;
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn unmap(&self) -> Result<(), ClientError> {
        let client = self.0.client()?;
        let handle = self.0.handle();

        let (previous, taken) = {
            let mut state = client.state.borrow_mut();
            let previous = match state.buffer_mut(handle.id) {
                Some(b) if matches!(b.map, MapState::Mapped { .. }) => {
                    mem::replace(&mut b.map, MapState::Unmapped)
                }
                _ => MapState::Unmapped,
            };
            let taken = state.take_requests(true, |entry| entry.mapped_buffer() == Some(handle));
            (previous, taken)
        };

        let mut result = Ok(());
        if let MapState::Mapped { mode, offset, data } = previous {
            if mode.contains(MapMode::WRITE) {
                result = client.encode(&Command::BufferUpdateMappedData {
                    buffer: handle.id,
                    offset,
                    data,
                });
            }
        }
        if result.is_ok() {
            result = client.encode(&Command::BufferUnmap { buffer: handle.id });
        }

        for (serial, entry) in taken {
            debug!(serial, buffer = %handle, "map resolved by unmap");
            entry.resolve_locally(LocalResolution::UnmappedBeforeCallback);
        }
        result
    }

    /// Destroy the storage now. The handle stays valid until dropped.
    pub fn destroy(&self) -> Result<(), ClientError> {
        let client = self.0.client()?;
        let handle = self.0.handle();

        let taken = {
            let mut state = client.state.borrow_mut();
            if let Some(b) = state.buffer_mut(handle.id) {
                b.destroyed = true;
                if matches!(b.map, MapState::Mapped { .. }) {
                    b.map = MapState::Unmapped;
                }
            }
            state.take_requests(true, |entry| entry.mapped_buffer() == Some(handle))
        };

        let result = client.encode(&Command::BufferDestroy { buffer: handle.id });
        for (serial, entry) in taken {
            debug!(serial, buffer = %handle, "map resolved by destroy");
            entry.resolve_locally(LocalResolution::DestroyedBeforeCallback);
        }
        result
    }
}

/// Index into a mapped range of `len` bytes starting at buffer offset
/// `base`.
fn mapped_start(base: u64, len: usize, offset: u64, size: u64) -> Result<usize, ClientError> {
    let end = offset.checked_add(size);
    match end {
        Some(end) if offset >= base && end <= base + len as u64 => Ok((offset - base) as usize),
        _ => Err(ClientError::OutOfRange { offset, size }),
    }
}
