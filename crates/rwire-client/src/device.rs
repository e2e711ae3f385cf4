//! Device methods and the descriptors that reference client objects.

use std::cell::RefCell;
use std::rc::Rc;

use rwire_protocol::descriptors::{
    self as wire, BindGroupLayoutDescriptor, BufferDescriptor, ColorTargetState,
    CommandEncoderDescriptor, ConstantEntry, SamplerDescriptor, ShaderModuleDescriptor,
    TextureDescriptor,
};
use rwire_protocol::types::{
    CreatePipelineAsyncStatus, DeviceLostReason, ErrorFilter, ErrorType, FeatureName, Limits,
    LoggingType, MapMode, PopErrorScopeStatus, PrimitiveTopology,
};
use rwire_protocol::{Command, ObjectId, ObjectType, WireObject};
use tracing::{debug, warn};

use crate::client::{BufferState, ClientInner, MapState, ObjectState};
use crate::error::ClientError;
use crate::objects::{
    BindGroup, BindGroupLayout, Buffer, CommandEncoder, ComputePipeline, Device, PipelineLayout,
    Queue, RenderPipeline, Sampler, ShaderModule, Texture, TextureView,
};
use crate::requests::{LoggingCallback, PendingRequest, UncapturedErrorCallback};

pub enum BindingResource<'a> {
    Buffer {
        buffer: &'a Buffer,
        offset: u64,
        size: u64,
    },
    Sampler(&'a Sampler),
    TextureView(&'a TextureView),
}

pub struct BindGroupEntry<'a> {
    pub binding: u32,
    pub resource: BindingResource<'a>,
}

pub struct BindGroupDescriptor<'a> {
    pub label: Option<&'a str>,
    pub layout: &'a BindGroupLayout,
    pub entries: &'a [BindGroupEntry<'a>],
}

pub struct PipelineLayoutDescriptor<'a> {
    pub label: Option<&'a str>,
    pub bind_group_layouts: &'a [&'a BindGroupLayout],
}

pub struct ProgrammableStage<'a> {
    pub module: &'a ShaderModule,
    pub entry_point: Option<&'a str>,
    pub constants: &'a [ConstantEntry],
}

pub struct ComputePipelineDescriptor<'a> {
    pub label: Option<&'a str>,
    /// `None` derives the layout from the shader.
    pub layout: Option<&'a PipelineLayout>,
    pub compute: ProgrammableStage<'a>,
}

pub struct FragmentState<'a> {
    pub stage: ProgrammableStage<'a>,
    pub targets: &'a [ColorTargetState],
}

pub struct RenderPipelineDescriptor<'a> {
    pub label: Option<&'a str>,
    pub layout: Option<&'a PipelineLayout>,
    pub vertex: ProgrammableStage<'a>,
    pub fragment: Option<FragmentState<'a>>,
    pub topology: PrimitiveTopology,
}

fn label(label: Option<&str>) -> Option<String> {
    label.map(str::to_string)
}

fn mapped_shadow(size: u64) -> MapState {
    MapState::Mapped {
        mode: MapMode::WRITE,
        offset: 0,
        data: vec![0; size as usize],
    }
}

fn buffer_state(device: ObjectId, descriptor: &BufferDescriptor, map: MapState) -> ObjectState {
    ObjectState::Buffer(BufferState {
        device,
        size: descriptor.size,
        usage: descriptor.usage,
        map,
        destroyed: false,
    })
}

fn wire_stage(
    client: &ClientInner,
    stage: &ProgrammableStage<'_>,
) -> Result<wire::ProgrammableStage, ClientError> {
    Ok(wire::ProgrammableStage {
        module: client.get_wire_id(stage.module)?,
        entry_point: label(stage.entry_point),
        constants: stage.constants.to_vec(),
    })
}

fn optional_id<T: WireObject>(
    client: &ClientInner,
    object: Option<&T>,
) -> Result<ObjectId, ClientError> {
    client.get_optional_wire_id(object.map(|o| o as &dyn WireObject))
}

fn wire_compute(
    client: &ClientInner,
    desc: &ComputePipelineDescriptor<'_>,
) -> Result<wire::ComputePipelineDescriptor, ClientError> {
    Ok(wire::ComputePipelineDescriptor {
        label: label(desc.label),
        layout: optional_id(client, desc.layout)?,
        compute: wire_stage(client, &desc.compute)?,
    })
}

fn wire_render(
    client: &ClientInner,
    desc: &RenderPipelineDescriptor<'_>,
) -> Result<wire::RenderPipelineDescriptor, ClientError> {
    let fragment = match &desc.fragment {
        Some(fragment) => Some(wire::FragmentState {
            stage: wire_stage(client, &fragment.stage)?,
            targets: fragment.targets.to_vec(),
        }),
        None => None,
    };
    Ok(wire::RenderPipelineDescriptor {
        label: label(desc.label),
        layout: optional_id(client, desc.layout)?,
        vertex: wire_stage(client, &desc.vertex)?,
        fragment,
        topology: desc.topology,
    })
}

impl Device {
    fn device_id(&self) -> ObjectId {
        self.0.handle().id
    }

    /// Limits pushed by the server. Baseline limits until they arrive.
    pub fn limits(&self) -> Limits {
        let Ok(client) = self.0.client() else {
            return Limits::default();
        };
        let state = client.state.borrow();
        state
            .device(self.device_id())
            .map(|d| d.limits.clone())
            .unwrap_or_default()
    }

    pub fn features(&self) -> Vec<FeatureName> {
        let Ok(client) = self.0.client() else {
            return Vec::new();
        };
        let state = client.state.borrow();
        state
            .device(self.device_id())
            .map(|d| d.features.clone())
            .unwrap_or_default()
    }

    pub fn has_feature(&self, feature: FeatureName) -> bool {
        self.features().contains(&feature)
    }

    pub fn is_lost(&self) -> bool {
        let Ok(client) = self.0.client() else {
            return true;
        };
        let state = client.state.borrow();
        state.device(self.device_id()).map_or(true, |d| d.lost)
    }

    // ── Object creation ─────────────────────────────────────

    /// Create a buffer. A `mapped_at_creation` buffer too large for a
    /// mapping shadow raises an out-of-memory error and comes back as an
    /// error buffer.
    pub fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<Buffer, ClientError> {
        let client = self.0.client()?;
        let device = self.device_id();
        let max_size = self.limits().max_buffer_size;

        if descriptor.mapped_at_creation && descriptor.size > max_size {
            warn!(size = descriptor.size, max_size, "no shadow for mapped_at_creation buffer");
            client.encode(&Command::DeviceInjectError {
                device,
                error_type: ErrorType::OutOfMemory,
                message: format!(
                    "failed to allocate a {} byte mapping for mapped_at_creation",
                    descriptor.size
                ),
            })?;
            return self.create_error_buffer(descriptor);
        }

        // Misaligned buffers fail on the server; no shadow for them.
        let map = if descriptor.mapped_at_creation && descriptor.size % 4 == 0 {
            mapped_shadow(descriptor.size)
        } else {
            MapState::Unmapped
        };
        let state = buffer_state(device, descriptor, map);
        let base = client.create_object(ObjectType::Buffer, state, |result| {
            Command::DeviceCreateBuffer {
                device,
                result,
                descriptor: descriptor.clone(),
            }
        })?;
        Ok(Buffer::from_base(base))
    }

    /// Create a buffer that is invalid from the start. No error is raised;
    /// every later use of it fails validation on the server.
    pub fn create_error_buffer(
        &self,
        descriptor: &BufferDescriptor,
    ) -> Result<Buffer, ClientError> {
        let client = self.0.client()?;
        let device = self.device_id();
        let max_size = self.limits().max_buffer_size;
        let map = if descriptor.mapped_at_creation && descriptor.size <= max_size {
            mapped_shadow(descriptor.size)
        } else {
            MapState::Unmapped
        };
        let state = buffer_state(device, descriptor, map);
        let base = client.create_object(ObjectType::Buffer, state, |result| {
            Command::DeviceCreateErrorBuffer {
                device,
                result,
                descriptor: descriptor.clone(),
            }
        })?;
        Ok(Buffer::from_base(base))
    }

    pub fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<Texture, ClientError> {
        let client = self.0.client()?;
        let device = self.device_id();
        let base = client.create_object(ObjectType::Texture, ObjectState::Plain, |result| {
            Command::DeviceCreateTexture {
                device,
                result,
                descriptor: descriptor.clone(),
            }
        })?;
        Ok(Texture::from_base(base))
    }

    pub fn create_sampler(
        &self,
        descriptor: Option<&SamplerDescriptor>,
    ) -> Result<Sampler, ClientError> {
        let client = self.0.client()?;
        let device = self.device_id();
        let base = client.create_object(ObjectType::Sampler, ObjectState::Plain, |result| {
            Command::DeviceCreateSampler {
                device,
                result,
                descriptor: descriptor.cloned(),
            }
        })?;
        Ok(Sampler::from_base(base))
    }

    pub fn create_shader_module(
        &self,
        descriptor: &ShaderModuleDescriptor,
    ) -> Result<ShaderModule, ClientError> {
        let client = self.0.client()?;
        let device = self.device_id();
        let base = client.create_object(ObjectType::ShaderModule, ObjectState::Plain, |result| {
            Command::DeviceCreateShaderModule {
                device,
                result,
                descriptor: descriptor.clone(),
            }
        })?;
        Ok(ShaderModule::from_base(base))
    }

    pub fn create_bind_group_layout(
        &self,
        descriptor: &BindGroupLayoutDescriptor,
    ) -> Result<BindGroupLayout, ClientError> {
        let client = self.0.client()?;
        let device = self.device_id();
        let base =
            client.create_object(ObjectType::BindGroupLayout, ObjectState::Plain, |result| {
                Command::DeviceCreateBindGroupLayout {
                    device,
                    result,
                    descriptor: descriptor.clone(),
                }
            })?;
        Ok(BindGroupLayout::from_base(base))
    }

    pub fn create_bind_group(
        &self,
        descriptor: &BindGroupDescriptor<'_>,
    ) -> Result<BindGroup, ClientError> {
        let client = self.0.client()?;
        let device = self.device_id();

        let mut entries = Vec::with_capacity(descriptor.entries.len());
        for entry in descriptor.entries {
            let mut wire_entry = wire::BindGroupEntry {
                binding: entry.binding,
                buffer: 0,
                offset: 0,
                size: 0,
                sampler: 0,
                texture_view: 0,
            };
            match &entry.resource {
                BindingResource::Buffer {
                    buffer,
                    offset,
                    size,
                } => {
                    wire_entry.buffer = client.get_wire_id(*buffer)?;
                    wire_entry.offset = *offset;
                    wire_entry.size = *size;
                }
                BindingResource::Sampler(sampler) => {
                    wire_entry.sampler = client.get_wire_id(*sampler)?
                }
                BindingResource::TextureView(view) => {
                    wire_entry.texture_view = client.get_wire_id(*view)?
                }
            }
            entries.push(wire_entry);
        }
        let descriptor = wire::BindGroupDescriptor {
            label: label(descriptor.label),
            layout: client.get_wire_id(descriptor.layout)?,
            entries,
        };

        let base = client.create_object(ObjectType::BindGroup, ObjectState::Plain, |result| {
            Command::DeviceCreateBindGroup {
                device,
                result,
                descriptor,
            }
        })?;
        Ok(BindGroup::from_base(base))
    }

    pub fn create_pipeline_layout(
        &self,
        descriptor: &PipelineLayoutDescriptor<'_>,
    ) -> Result<PipelineLayout, ClientError> {
        let client = self.0.client()?;
        let device = self.device_id();
        let mut bind_group_layouts = Vec::with_capacity(descriptor.bind_group_layouts.len());
        for layout in descriptor.bind_group_layouts {
            bind_group_layouts.push(client.get_wire_id(*layout)?);
        }
        let descriptor = wire::PipelineLayoutDescriptor {
            label: label(descriptor.label),
            bind_group_layouts,
        };
        let base =
            client.create_object(ObjectType::PipelineLayout, ObjectState::Plain, |result| {
                Command::DeviceCreatePipelineLayout {
                    device,
                    result,
                    descriptor,
                }
            })?;
        Ok(PipelineLayout::from_base(base))
    }

    pub fn create_compute_pipeline(
        &self,
        descriptor: &ComputePipelineDescriptor<'_>,
    ) -> Result<ComputePipeline, ClientError> {
        let client = self.0.client()?;
        let device = self.device_id();
        let descriptor = wire_compute(&client, descriptor)?;
        let base =
            client.create_object(ObjectType::ComputePipeline, ObjectState::Plain, |result| {
                Command::DeviceCreateComputePipeline {
                    device,
                    result,
                    descriptor,
                }
            })?;
        Ok(ComputePipeline::from_base(base))
    }

    /// Create a compute pipeline in the background. `callback` receives the
    /// pipeline only on success.
    pub fn create_compute_pipeline_async(
        &self,
        descriptor: &ComputePipelineDescriptor<'_>,
        callback: impl FnOnce(CreatePipelineAsyncStatus, Option<ComputePipeline>, String) + 'static,
    ) -> Result<(), ClientError> {
        let client = match self.0.client().and_then(|c| c.check_connected().map(|_| c)) {
            Ok(client) => client,
            Err(err) => {
                callback(CreatePipelineAsyncStatus::Disconnected, None, "disconnected".into());
                return Err(err);
            }
        };
        let device = self.device_id();
        let descriptor = match wire_compute(&client, descriptor) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                callback(CreatePipelineAsyncStatus::ValidationError, None, err.to_string());
                return Err(err);
            }
        };
        let base = client.reserve_object(ObjectType::ComputePipeline, ObjectState::Plain)?;
        let result = base.handle();
        let entry = PendingRequest::CreateComputePipeline {
            device,
            pipeline: ComputePipeline::from_base(base),
            callback: Box::new(callback),
        };
        client.send_request(entry, |request_serial| {
            Command::DeviceCreateComputePipelineAsync {
                device,
                request_serial,
                result,
                descriptor,
            }
        })?;
        Ok(())
    }

    pub fn create_render_pipeline(
        &self,
        descriptor: &RenderPipelineDescriptor<'_>,
    ) -> Result<RenderPipeline, ClientError> {
        let client = self.0.client()?;
        let device = self.device_id();
        let descriptor = wire_render(&client, descriptor)?;
        let base =
            client.create_object(ObjectType::RenderPipeline, ObjectState::Plain, |result| {
                Command::DeviceCreateRenderPipeline {
                    device,
                    result,
                    descriptor,
                }
            })?;
        Ok(RenderPipeline::from_base(base))
    }

    pub fn create_render_pipeline_async(
        &self,
        descriptor: &RenderPipelineDescriptor<'_>,
        callback: impl FnOnce(CreatePipelineAsyncStatus, Option<RenderPipeline>, String) + 'static,
    ) -> Result<(), ClientError> {
        let client = match self.0.client().and_then(|c| c.check_connected().map(|_| c)) {
            Ok(client) => client,
            Err(err) => {
                callback(CreatePipelineAsyncStatus::Disconnected, None, "disconnected".into());
                return Err(err);
            }
        };
        let device = self.device_id();
        let descriptor = match wire_render(&client, descriptor) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                callback(CreatePipelineAsyncStatus::ValidationError, None, err.to_string());
                return Err(err);
            }
        };
        let base = client.reserve_object(ObjectType::RenderPipeline, ObjectState::Plain)?;
        let result = base.handle();
        let entry = PendingRequest::CreateRenderPipeline {
            device,
            pipeline: RenderPipeline::from_base(base),
            callback: Box::new(callback),
        };
        client.send_request(entry, |request_serial| {
            Command::DeviceCreateRenderPipelineAsync {
                device,
                request_serial,
                result,
                descriptor,
            }
        })?;
        Ok(())
    }

    pub fn create_command_encoder(&self, label: Option<&str>) -> Result<CommandEncoder, ClientError> {
        let client = self.0.client()?;
        let device = self.device_id();
        let descriptor = CommandEncoderDescriptor {
            label: label.map(str::to_string),
        };
        let base =
            client.create_object(ObjectType::CommandEncoder, ObjectState::Plain, |result| {
                Command::DeviceCreateCommandEncoder {
                    device,
                    result,
                    descriptor,
                }
            })?;
        Ok(CommandEncoder::from_base(base))
    }

    /// The device's queue. Only the first call reaches the server.
    pub fn get_queue(&self) -> Result<Queue, ClientError> {
        let client = self.0.client()?;
        let device = self.device_id();
        let cached = client
            .state
            .borrow()
            .device(device)
            .and_then(|d| d.queue.clone());
        if let Some(queue) = cached {
            return Ok(queue);
        }
        let base = client.create_object(ObjectType::Queue, ObjectState::Plain, |result| {
            Command::DeviceGetQueue { device, result }
        })?;
        let queue = Queue::from_base(base);
        if let Some(d) = client.state.borrow_mut().device_mut(device) {
            d.queue = Some(queue.clone());
        }
        Ok(queue)
    }

    // ── Errors and lifetime ─────────────────────────────────

    pub fn push_error_scope(&self, filter: ErrorFilter) -> Result<(), ClientError> {
        let client = self.0.client()?;
        client.encode(&Command::DevicePushErrorScope {
            device: self.device_id(),
            filter,
        })
    }

    pub fn pop_error_scope(
        &self,
        callback: impl FnOnce(PopErrorScopeStatus, ErrorType, String) + 'static,
    ) -> Result<(), ClientError> {
        let client = match self.0.client().and_then(|c| c.check_connected().map(|_| c)) {
            Ok(client) => client,
            Err(err) => {
                callback(PopErrorScopeStatus::Disconnected, ErrorType::NoError, String::new());
                return Err(err);
            }
        };
        let device = self.device_id();
        let entry = PendingRequest::PopErrorScope {
            device,
            callback: Box::new(callback),
        };
        client.send_request(entry, |request_serial| Command::DevicePopErrorScope {
            device,
            request_serial,
        })?;
        Ok(())
    }

    pub fn inject_error(&self, error_type: ErrorType, message: &str) -> Result<(), ClientError> {
        let client = self.0.client()?;
        client.encode(&Command::DeviceInjectError {
            device: self.device_id(),
            error_type,
            message: message.to_string(),
        })
    }

    /// Called for errors not captured by an error scope.
    pub fn set_uncaptured_error_callback(
        &self,
        callback: impl FnMut(ErrorType, String) + 'static,
    ) {
        let Ok(client) = self.0.client() else {
            return;
        };
        let callback: UncapturedErrorCallback = Box::new(callback);
        let mut state = client.state.borrow_mut();
        if let Some(device) = state.device_mut(self.device_id()) {
            device.uncaptured_callback = Some(Rc::new(RefCell::new(callback)));
        }
    }

    /// Receives the backend's log messages for this device.
    pub fn set_logging_callback(&self, callback: impl FnMut(LoggingType, String) + 'static) {
        let Ok(client) = self.0.client() else {
            return;
        };
        let callback: LoggingCallback = Box::new(callback);
        let mut state = client.state.borrow_mut();
        if let Some(device) = state.device_mut(self.device_id()) {
            device.logging_callback = Some(Rc::new(RefCell::new(callback)));
        }
    }

    /// Called once when the device is lost, destroyed, or disconnected.
    pub fn set_device_lost_callback(
        &self,
        callback: impl FnOnce(DeviceLostReason, String) + 'static,
    ) {
        let Ok(client) = self.0.client() else {
            return;
        };
        let previous = {
            let mut state = client.state.borrow_mut();
            match state.device_mut(self.device_id()) {
                Some(device) if !device.lost => device.lost_callback.replace(Box::new(callback)),
                _ => None,
            }
        };
        drop(previous);
    }

    /// Destroy the device. Its pending requests resolve with their
    /// device-lost status right away.
    pub fn destroy(&self) -> Result<(), ClientError> {
        let client = self.0.client()?;
        client.encode(&Command::DeviceDestroy {
            device: self.device_id(),
        })?;
        debug!(device = %self.0.handle(), "device destroyed by the client");
        client.lose_device(
            self.0.handle(),
            DeviceLostReason::Destroyed,
            "device destroyed".to_string(),
        );
        Ok(())
    }

    /// Let the server run deferred backend work and deliver its callbacks.
    pub fn tick(&self) -> Result<(), ClientError> {
        let client = self.0.client()?;
        client.encode(&Command::DeviceTick {
            device: self.device_id(),
        })
    }
}
