use rwire_protocol::descriptors::CommandBufferDescriptor;
use rwire_protocol::types::QueueWorkDoneStatus;
use rwire_protocol::{Command, ObjectType};

use crate::client::ObjectState;
use crate::error::ClientError;
use crate::objects::{Buffer, CommandBuffer, CommandEncoder, Queue};
use crate::requests::PendingRequest;

impl Queue {
    pub fn submit(&self, command_buffers: &[&CommandBuffer]) -> Result<(), ClientError> {
        let client = self.0.client()?;
        let queue = client.get_wire_id(self)?;
        let mut ids = Vec::with_capacity(command_buffers.len());
        for buffer in command_buffers {
            ids.push(client.get_wire_id(*buffer)?);
        }
        client.encode(&Command::QueueSubmit {
            queue,
            command_buffers: ids,
        })
    }

    pub fn write_buffer(&self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<(), ClientError> {
        let client = self.0.client()?;
        client.encode(&Command::QueueWriteBuffer {
            queue: client.get_wire_id(self)?,
            buffer: client.get_wire_id(buffer)?,
            buffer_offset: offset,
            data: data.to_vec(),
        })
    }

    /// `callback` runs once everything submitted so far has finished.
    pub fn on_submitted_work_done(
        &self,
        callback: impl FnOnce(QueueWorkDoneStatus) + 'static,
    ) -> Result<(), ClientError> {
        let client = match self.0.client().and_then(|c| c.check_connected().map(|_| c)) {
            Ok(client) => client,
            Err(err) => {
                callback(QueueWorkDoneStatus::Disconnected);
                return Err(err);
            }
        };
        let queue = self.0.handle();
        let device = client.device_id();
        let entry = PendingRequest::QueueWorkDone {
            device,
            queue,
            callback: Box::new(callback),
        };
        client.send_request(entry, |request_serial| Command::QueueOnSubmittedWorkDone {
            queue: queue.id,
            request_serial,
        })?;
        Ok(())
    }
}

impl CommandEncoder {
    pub fn copy_buffer_to_buffer(
        &self,
        source: &Buffer,
        source_offset: u64,
        destination: &Buffer,
        destination_offset: u64,
        size: u64,
    ) -> Result<(), ClientError> {
        let client = self.0.client()?;
        client.encode(&Command::CommandEncoderCopyBufferToBuffer {
            encoder: client.get_wire_id(self)?,
            source: client.get_wire_id(source)?,
            source_offset,
            destination: client.get_wire_id(destination)?,
            destination_offset,
            size,
        })
    }

    pub fn finish(&self, label: Option<&str>) -> Result<CommandBuffer, ClientError> {
        let client = self.0.client()?;
        let encoder = client.get_wire_id(self)?;
        let descriptor = CommandBufferDescriptor {
            label: label.map(str::to_string),
        };
        let base = client.create_object(ObjectType::CommandBuffer, ObjectState::Plain, |result| {
            Command::CommandEncoderFinish {
                encoder,
                result,
                descriptor,
            }
        })?;
        Ok(CommandBuffer::from_base(base))
    }
}
