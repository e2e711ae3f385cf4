use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{debug, error, info, warn};

use rwire_core::config::{ServerConfig, WireConfig};
use rwire_protocol::descriptors::{
    BindGroupDescriptor, ComputePipelineDescriptor, PipelineLayoutDescriptor, ProgrammableStage,
    RenderPipelineDescriptor,
};
use rwire_protocol::types::{
    CreatePipelineAsyncStatus, DeviceLostReason, ErrorType, LoggingType, MapAsyncStatus, MapMode,
    PopErrorScopeStatus, QueueWorkDoneStatus,
};
use rwire_protocol::{
    Command, ObjectHandle, ObjectId, ObjectIdResolver, ObjectType, Resolved, ReturnCommand,
};
use rwire_transport::{CommandHandler, CommandSerializer};

use crate::error::ServerError;
use crate::procs::{
    NativeBindGroupDescriptor, NativeBindGroupEntry, NativeComputePipelineDescriptor,
    NativeFragmentState, NativeObject, NativePipelineLayoutDescriptor, NativeProgrammableStage,
    NativeRenderPipelineDescriptor, Procs,
};
use crate::registry::Registry;

/// Handle of the device every connection starts with.
pub const DEVICE_HANDLE: ObjectHandle = ObjectHandle::new(1, 0);

/// Fixed part of a read-map reply on top of the mapped bytes.
const READ_MAP_REPLY_OVERHEAD: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineKind {
    Compute,
    Render,
}

impl PipelineKind {
    fn object_type(self) -> ObjectType {
        match self {
            PipelineKind::Compute => ObjectType::ComputePipeline,
            PipelineKind::Render => ObjectType::RenderPipeline,
        }
    }
}

/// Backend completion waiting to be turned into a return command.
enum Completion {
    Map {
        buffer: ObjectHandle,
        serial: u64,
        mode: MapMode,
        offset: u64,
        size: u64,
        status: MapAsyncStatus,
        message: String,
    },
    Pipeline {
        kind: PipelineKind,
        device: ObjectHandle,
        serial: u64,
        result: ObjectHandle,
        status: CreatePipelineAsyncStatus,
        native: Option<NativeObject>,
        message: String,
    },
    PopErrorScope {
        device: ObjectHandle,
        serial: u64,
        status: PopErrorScopeStatus,
        error_type: ErrorType,
        message: String,
    },
    WorkDone {
        queue: ObjectHandle,
        serial: u64,
        status: QueueWorkDoneStatus,
    },
    UncapturedError {
        device: ObjectHandle,
        error_type: ErrorType,
        message: String,
    },
    DeviceLost {
        device: ObjectHandle,
        reason: DeviceLostReason,
        message: String,
    },
    Logging {
        device: ObjectHandle,
        logging_type: LoggingType,
        message: String,
    },
}

type CompletionQueue = Rc<RefCell<VecDeque<Completion>>>;

/// Resolved inputs of one command. Any error object among them poisons
/// the command.
#[derive(Default)]
struct Inputs {
    poisoned: bool,
}

impl Inputs {
    fn take(&mut self, resolved: Resolved<NativeObject>) -> NativeObject {
        match resolved {
            Resolved::Object(native) => native,
            Resolved::Error => {
                self.poisoned = true;
                0
            }
        }
    }

    fn take_optional(&mut self, resolved: Option<Resolved<NativeObject>>) -> Option<NativeObject> {
        resolved.map(|r| self.take(r))
    }
}

/// Server side of one wire connection: decodes commands, executes them
/// against the backend, and encodes return commands.
pub struct Server<P: Procs> {
    procs: P,
    registry: Registry,
    serializer: Box<dyn CommandSerializer>,
    completions: CompletionQueue,
    config: ServerConfig,
    device: NativeObject,
    fatal: bool,
}

impl<P: Procs> Server<P> {
    /// Create the server, register its device at [`DEVICE_HANDLE`], and
    /// queue the device info for the client.
    pub fn new(
        mut procs: P,
        serializer: Box<dyn CommandSerializer>,
        config: &WireConfig,
    ) -> Result<Self, ServerError> {
        let device = procs.create_device();
        let mut registry = Registry::new();
        let devices = registry.table_mut(ObjectType::Device);
        devices.allocate(DEVICE_HANDLE)?;
        devices.set_native(DEVICE_HANDLE.id, device);

        let completions: CompletionQueue = Rc::new(RefCell::new(VecDeque::new()));
        let sink = completions.clone();
        procs.device_set_uncaptured_error_callback(
            device,
            Box::new(move |error_type, message| {
                sink.borrow_mut().push_back(Completion::UncapturedError {
                    device: DEVICE_HANDLE,
                    error_type,
                    message,
                })
            }),
        );
        let sink = completions.clone();
        procs.device_set_device_lost_callback(
            device,
            Box::new(move |reason, message| {
                sink.borrow_mut().push_back(Completion::DeviceLost {
                    device: DEVICE_HANDLE,
                    reason,
                    message,
                })
            }),
        );
        let sink = completions.clone();
        procs.device_set_logging_callback(
            device,
            Box::new(move |logging_type, message| {
                sink.borrow_mut().push_back(Completion::Logging {
                    device: DEVICE_HANDLE,
                    logging_type,
                    message,
                })
            }),
        );

        let limits = procs.device_limits(device);
        let features = procs.device_features(device);
        let mut server = Self {
            procs,
            registry,
            serializer,
            completions,
            config: config.server.clone(),
            device,
            fatal: false,
        };
        server.send(ReturnCommand::DeviceInfo {
            device: DEVICE_HANDLE,
            limits,
            features,
        })?;
        info!(device, "wire server ready");
        Ok(server)
    }

    pub fn procs(&self) -> &P {
        &self.procs
    }

    pub fn procs_mut(&mut self) -> &mut P {
        &mut self.procs
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Backend object behind [`DEVICE_HANDLE`].
    pub fn device_native(&self) -> NativeObject {
        self.device
    }

    /// Register a texture created outside the wire at a handle the client
    /// reserved with `Client::reserve_texture`. The server takes over one
    /// reference to `native`; it is released when the client drops the
    /// texture. Fails if the handle is already in use.
    pub fn inject_texture(&mut self, handle: ObjectHandle, native: NativeObject) -> Result<(), ServerError> {
        let table = self.registry.table_mut(ObjectType::Texture);
        table.allocate(handle)?;
        table.set_native(handle.id, native);
        debug!(%handle, native, "injected texture");
        Ok(())
    }

    /// Whether a fatal error has killed the connection.
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Push queued return commands to the client.
    pub fn flush(&mut self) -> bool {
        self.serializer.flush()
    }

    /// Turn every queued backend completion into a return command.
    pub fn drain_completions(&mut self) -> Result<(), ServerError> {
        loop {
            let Some(completion) = self.completions.borrow_mut().pop_front() else {
                return Ok(());
            };
            let reply = self.completion_reply(completion);
            self.send(reply)?;
        }
    }

    fn send(&mut self, reply: ReturnCommand) -> Result<(), ServerError> {
        let size = reply.encoded_size();
        let Some(space) = self.serializer.get_cmd_space(size) else {
            return Err(ServerError::ReplyTooLarge {
                command: reply.name(),
                size,
            });
        };
        reply.serialize(space)?;
        Ok(())
    }

    fn resolve(&self, object_type: ObjectType, id: ObjectId) -> Result<Resolved<NativeObject>, ServerError> {
        Ok(self.registry.get_from_id(object_type, id)?)
    }

    fn resolve_optional(
        &self,
        object_type: ObjectType,
        id: ObjectId,
    ) -> Result<Option<Resolved<NativeObject>>, ServerError> {
        Ok(self.registry.get_optional_from_id(object_type, id)?)
    }

    /// Full handle of a live id, used to address return commands.
    fn handle_of(&self, object_type: ObjectType, id: ObjectId) -> Result<ObjectHandle, ServerError> {
        self.resolve(object_type, id)?;
        self.registry
            .table(object_type)
            .handle_of(id)
            .ok_or(ServerError::Wire(rwire_protocol::WireError::InvalidObject { object_type, id }))
    }

    /// Register `result` and, unless an input is an error object, build its
    /// backend object.
    fn create(
        &mut self,
        object_type: ObjectType,
        result: ObjectHandle,
        inputs: Inputs,
        make: impl FnOnce(&mut P) -> NativeObject,
    ) -> Result<(), ServerError> {
        self.registry.table_mut(object_type).allocate(result)?;
        if inputs.poisoned {
            debug!(?object_type, %result, "input is an error object, result is an error object");
            return Ok(());
        }
        let native = make(&mut self.procs);
        if native == 0 {
            debug!(?object_type, %result, "backend returned no object, result is an error object");
            return Ok(());
        }
        self.registry.table_mut(object_type).set_native(result.id, native);
        Ok(())
    }

    /// A non-creating command got an error object: skip the backend and
    /// surface a validation error on the device.
    fn reject_poisoned(&mut self, command: &str) {
        debug!(command, "skipping command with error-object input");
        if self.registry.native_of(ObjectType::Device, DEVICE_HANDLE) == Some(self.device) {
            let message = format!("{} uses an invalid object", command);
            self.procs
                .device_inject_error(self.device, ErrorType::Validation, &message);
        }
    }

    fn native_stage(
        &self,
        stage: &ProgrammableStage,
        inputs: &mut Inputs,
    ) -> Result<NativeProgrammableStage, ServerError> {
        Ok(NativeProgrammableStage {
            module: inputs.take(self.resolve(ObjectType::ShaderModule, stage.module)?),
            entry_point: stage.entry_point.clone(),
            constants: stage.constants.clone(),
        })
    }

    fn native_compute(
        &self,
        desc: &ComputePipelineDescriptor,
        inputs: &mut Inputs,
    ) -> Result<NativeComputePipelineDescriptor, ServerError> {
        Ok(NativeComputePipelineDescriptor {
            label: desc.label.clone(),
            layout: inputs.take_optional(self.resolve_optional(ObjectType::PipelineLayout, desc.layout)?),
            compute: self.native_stage(&desc.compute, inputs)?,
        })
    }

    fn native_render(
        &self,
        desc: &RenderPipelineDescriptor,
        inputs: &mut Inputs,
    ) -> Result<NativeRenderPipelineDescriptor, ServerError> {
        let fragment = match &desc.fragment {
            Some(fragment) => Some(NativeFragmentState {
                stage: self.native_stage(&fragment.stage, inputs)?,
                targets: fragment.targets.clone(),
            }),
            None => None,
        };
        Ok(NativeRenderPipelineDescriptor {
            label: desc.label.clone(),
            layout: inputs.take_optional(self.resolve_optional(ObjectType::PipelineLayout, desc.layout)?),
            vertex: self.native_stage(&desc.vertex, inputs)?,
            fragment,
            topology: desc.topology,
        })
    }

    fn native_bind_group(
        &self,
        desc: &BindGroupDescriptor,
        inputs: &mut Inputs,
    ) -> Result<NativeBindGroupDescriptor, ServerError> {
        let layout = inputs.take(self.resolve(ObjectType::BindGroupLayout, desc.layout)?);
        let mut entries = Vec::with_capacity(desc.entries.len());
        for entry in &desc.entries {
            entries.push(NativeBindGroupEntry {
                binding: entry.binding,
                buffer: inputs.take_optional(self.resolve_optional(ObjectType::Buffer, entry.buffer)?),
                offset: entry.offset,
                size: entry.size,
                sampler: inputs.take_optional(self.resolve_optional(ObjectType::Sampler, entry.sampler)?),
                texture_view: inputs
                    .take_optional(self.resolve_optional(ObjectType::TextureView, entry.texture_view)?),
            });
        }
        Ok(NativeBindGroupDescriptor {
            label: desc.label.clone(),
            layout,
            entries,
        })
    }

    fn native_pipeline_layout(
        &self,
        desc: &PipelineLayoutDescriptor,
        inputs: &mut Inputs,
    ) -> Result<NativePipelineLayoutDescriptor, ServerError> {
        let mut bind_group_layouts = Vec::with_capacity(desc.bind_group_layouts.len());
        for id in &desc.bind_group_layouts {
            bind_group_layouts.push(inputs.take(self.resolve(ObjectType::BindGroupLayout, *id)?));
        }
        Ok(NativePipelineLayoutDescriptor {
            label: desc.label.clone(),
            bind_group_layouts,
        })
    }

    fn pipeline_async(
        &mut self,
        kind: PipelineKind,
        device: ObjectId,
        serial: u64,
        result: ObjectHandle,
        start: impl FnOnce(&mut P, NativeObject, crate::procs::CreatePipelineCallback),
        inputs: Inputs,
        device_native: NativeObject,
    ) -> Result<(), ServerError> {
        let device = self.handle_of(ObjectType::Device, device)?;
        let object_type = kind.object_type();
        self.registry.table_mut(object_type).reserve(result)?;

        if inputs.poisoned {
            self.registry.table_mut(object_type).mark_error(result.id);
            self.completions.borrow_mut().push_back(Completion::Pipeline {
                kind,
                device,
                serial,
                result,
                status: CreatePipelineAsyncStatus::ValidationError,
                native: None,
                message: "pipeline descriptor references an invalid object".to_string(),
            });
            return Ok(());
        }

        let sink = self.completions.clone();
        start(
            &mut self.procs,
            device_native,
            Box::new(move |status, native, message| {
                sink.borrow_mut().push_back(Completion::Pipeline {
                    kind,
                    device,
                    serial,
                    result,
                    status,
                    native,
                    message,
                })
            }),
        );
        Ok(())
    }

    fn map_async(
        &mut self,
        buffer: ObjectId,
        serial: u64,
        mode: MapMode,
        offset: u64,
        size: u64,
    ) -> Result<(), ServerError> {
        let handle = self.handle_of(ObjectType::Buffer, buffer)?;
        let reject = |status, message: &str| Completion::Map {
            buffer: handle,
            serial,
            mode,
            offset,
            size,
            status,
            message: message.to_string(),
        };

        let Resolved::Object(native) = self.resolve(ObjectType::Buffer, buffer)? else {
            let completion = reject(MapAsyncStatus::ValidationError, "buffer is an invalid object");
            self.completions.borrow_mut().push_back(completion);
            return Ok(());
        };
        if mode.contains(MapMode::READ) {
            let transport_max = self.serializer.maximum_allocation_size() as u64;
            let too_large = size > self.config.max_read_map_size
                || size.saturating_add(READ_MAP_REPLY_OVERHEAD) > transport_max;
            if too_large {
                warn!(size, "read map larger than a single reply can carry");
                let completion = reject(MapAsyncStatus::ValidationError, "map range too large");
                self.completions.borrow_mut().push_back(completion);
                return Ok(());
            }
        }

        let sink = self.completions.clone();
        self.procs.buffer_map_async(
            native,
            mode,
            offset,
            size,
            Box::new(move |status, message| {
                sink.borrow_mut().push_back(Completion::Map {
                    buffer: handle,
                    serial,
                    mode,
                    offset,
                    size,
                    status,
                    message,
                })
            }),
        );
        Ok(())
    }

    fn handle_command(&mut self, command: Command) -> Result<(), ServerError> {
        let name = command.name();
        let mut inputs = Inputs::default();
        match command {
            // ── Object creation ─────────────────────────────────
            Command::DeviceCreateBuffer {
                device,
                result,
                descriptor,
            } => {
                let device = inputs.take(self.resolve(ObjectType::Device, device)?);
                self.create(ObjectType::Buffer, result, inputs, |p| {
                    p.device_create_buffer(device, &descriptor)
                })
            }

            Command::DeviceCreateErrorBuffer {
                device,
                result,
                descriptor,
            } => {
                let device = inputs.take(self.resolve(ObjectType::Device, device)?);
                self.create(ObjectType::Buffer, result, inputs, |p| {
                    p.device_create_error_buffer(device, &descriptor)
                })
            }

            Command::DeviceCreateTexture {
                device,
                result,
                descriptor,
            } => {
                let device = inputs.take(self.resolve(ObjectType::Device, device)?);
                self.create(ObjectType::Texture, result, inputs, |p| {
                    p.device_create_texture(device, &descriptor)
                })
            }

            Command::TextureCreateView {
                texture,
                result,
                descriptor,
            } => {
                let texture = inputs.take(self.resolve(ObjectType::Texture, texture)?);
                self.create(ObjectType::TextureView, result, inputs, |p| {
                    p.texture_create_view(texture, descriptor.as_ref())
                })
            }

            Command::DeviceCreateSampler {
                device,
                result,
                descriptor,
            } => {
                let device = inputs.take(self.resolve(ObjectType::Device, device)?);
                self.create(ObjectType::Sampler, result, inputs, |p| {
                    p.device_create_sampler(device, descriptor.as_ref())
                })
            }

            Command::DeviceCreateShaderModule {
                device,
                result,
                descriptor,
            } => {
                let device = inputs.take(self.resolve(ObjectType::Device, device)?);
                self.create(ObjectType::ShaderModule, result, inputs, |p| {
                    p.device_create_shader_module(device, &descriptor)
                })
            }

            Command::DeviceCreateBindGroupLayout {
                device,
                result,
                descriptor,
            } => {
                let device = inputs.take(self.resolve(ObjectType::Device, device)?);
                self.create(ObjectType::BindGroupLayout, result, inputs, |p| {
                    p.device_create_bind_group_layout(device, &descriptor)
                })
            }

            Command::DeviceCreateBindGroup {
                device,
                result,
                descriptor,
            } => {
                let device = inputs.take(self.resolve(ObjectType::Device, device)?);
                let desc = self.native_bind_group(&descriptor, &mut inputs)?;
                self.create(ObjectType::BindGroup, result, inputs, |p| {
                    p.device_create_bind_group(device, &desc)
                })
            }

            Command::DeviceCreatePipelineLayout {
                device,
                result,
                descriptor,
            } => {
                let device = inputs.take(self.resolve(ObjectType::Device, device)?);
                let desc = self.native_pipeline_layout(&descriptor, &mut inputs)?;
                self.create(ObjectType::PipelineLayout, result, inputs, |p| {
                    p.device_create_pipeline_layout(device, &desc)
                })
            }

            Command::DeviceCreateComputePipeline {
                device,
                result,
                descriptor,
            } => {
                let device = inputs.take(self.resolve(ObjectType::Device, device)?);
                let desc = self.native_compute(&descriptor, &mut inputs)?;
                self.create(ObjectType::ComputePipeline, result, inputs, |p| {
                    p.device_create_compute_pipeline(device, &desc)
                })
            }

            Command::DeviceCreateComputePipelineAsync {
                device,
                request_serial,
                result,
                descriptor,
            } => {
                let device_native = inputs.take(self.resolve(ObjectType::Device, device)?);
                let desc = self.native_compute(&descriptor, &mut inputs)?;
                self.pipeline_async(
                    PipelineKind::Compute,
                    device,
                    request_serial,
                    result,
                    |p, d, callback| p.device_create_compute_pipeline_async(d, &desc, callback),
                    inputs,
                    device_native,
                )
            }

            Command::DeviceCreateRenderPipeline {
                device,
                result,
                descriptor,
            } => {
                let device = inputs.take(self.resolve(ObjectType::Device, device)?);
                let desc = self.native_render(&descriptor, &mut inputs)?;
                self.create(ObjectType::RenderPipeline, result, inputs, |p| {
                    p.device_create_render_pipeline(device, &desc)
                })
            }

            Command::DeviceCreateRenderPipelineAsync {
                device,
                request_serial,
                result,
                descriptor,
            } => {
                let device_native = inputs.take(self.resolve(ObjectType::Device, device)?);
                let desc = self.native_render(&descriptor, &mut inputs)?;
                self.pipeline_async(
                    PipelineKind::Render,
                    device,
                    request_serial,
                    result,
                    |p, d, callback| p.device_create_render_pipeline_async(d, &desc, callback),
                    inputs,
                    device_native,
                )
            }

            Command::DeviceCreateCommandEncoder {
                device,
                result,
                descriptor,
            } => {
                let device = inputs.take(self.resolve(ObjectType::Device, device)?);
                self.create(ObjectType::CommandEncoder, result, inputs, |p| {
                    p.device_create_command_encoder(device, &descriptor)
                })
            }

            Command::DeviceGetQueue { device, result } => {
                let device = inputs.take(self.resolve(ObjectType::Device, device)?);
                self.create(ObjectType::Queue, result, inputs, |p| p.device_get_queue(device))
            }

            // ── Encoding and submission ─────────────────────────
            Command::CommandEncoderCopyBufferToBuffer {
                encoder,
                source,
                source_offset,
                destination,
                destination_offset,
                size,
            } => {
                let encoder = inputs.take(self.resolve(ObjectType::CommandEncoder, encoder)?);
                let source = inputs.take(self.resolve(ObjectType::Buffer, source)?);
                let destination = inputs.take(self.resolve(ObjectType::Buffer, destination)?);
                if inputs.poisoned {
                    self.reject_poisoned(name);
                } else {
                    self.procs.command_encoder_copy_buffer_to_buffer(
                        encoder,
                        source,
                        source_offset,
                        destination,
                        destination_offset,
                        size,
                    );
                }
                Ok(())
            }

            Command::CommandEncoderFinish {
                encoder,
                result,
                descriptor,
            } => {
                let encoder = inputs.take(self.resolve(ObjectType::CommandEncoder, encoder)?);
                self.create(ObjectType::CommandBuffer, result, inputs, |p| {
                    p.command_encoder_finish(encoder, &descriptor)
                })
            }

            Command::QueueSubmit {
                queue,
                command_buffers,
            } => {
                let queue = inputs.take(self.resolve(ObjectType::Queue, queue)?);
                let mut natives = Vec::with_capacity(command_buffers.len());
                for id in command_buffers {
                    natives.push(inputs.take(self.resolve(ObjectType::CommandBuffer, id)?));
                }
                if inputs.poisoned {
                    self.reject_poisoned(name);
                } else {
                    self.procs.queue_submit(queue, &natives);
                }
                Ok(())
            }

            Command::QueueWriteBuffer {
                queue,
                buffer,
                buffer_offset,
                data,
            } => {
                let queue = inputs.take(self.resolve(ObjectType::Queue, queue)?);
                let buffer = inputs.take(self.resolve(ObjectType::Buffer, buffer)?);
                if inputs.poisoned {
                    self.reject_poisoned(name);
                } else {
                    self.procs.queue_write_buffer(queue, buffer, buffer_offset, &data);
                }
                Ok(())
            }

            Command::QueueOnSubmittedWorkDone {
                queue,
                request_serial,
            } => {
                let handle = self.handle_of(ObjectType::Queue, queue)?;
                let native = inputs.take(self.resolve(ObjectType::Queue, queue)?);
                if inputs.poisoned {
                    self.completions.borrow_mut().push_back(Completion::WorkDone {
                        queue: handle,
                        serial: request_serial,
                        status: QueueWorkDoneStatus::Error,
                    });
                    return Ok(());
                }
                let sink = self.completions.clone();
                self.procs.queue_on_submitted_work_done(
                    native,
                    Box::new(move |status| {
                        sink.borrow_mut().push_back(Completion::WorkDone {
                            queue: handle,
                            serial: request_serial,
                            status,
                        })
                    }),
                );
                Ok(())
            }

            // ── Buffer mapping ──────────────────────────────────
            Command::BufferMapAsync {
                buffer,
                request_serial,
                mode,
                offset,
                size,
            } => self.map_async(buffer, request_serial, mode, offset, size),

            Command::BufferUpdateMappedData {
                buffer,
                offset,
                data,
            } => {
                if let Resolved::Object(native) = self.resolve(ObjectType::Buffer, buffer)? {
                    if !self.procs.buffer_write_mapped_range(native, offset, &data) {
                        warn!(buffer, offset, len = data.len(), "dropping write to a range that is not mapped for writing");
                    }
                }
                Ok(())
            }

            Command::BufferUnmap { buffer } => {
                if let Resolved::Object(native) = self.resolve(ObjectType::Buffer, buffer)? {
                    self.procs.buffer_unmap(native);
                }
                Ok(())
            }

            Command::BufferDestroy { buffer } => {
                if let Resolved::Object(native) = self.resolve(ObjectType::Buffer, buffer)? {
                    self.procs.buffer_destroy(native);
                }
                Ok(())
            }

            // ── Device ──────────────────────────────────────────
            Command::DevicePushErrorScope { device, filter } => {
                let device = inputs.take(self.resolve(ObjectType::Device, device)?);
                self.procs.device_push_error_scope(device, filter);
                Ok(())
            }

            Command::DevicePopErrorScope {
                device,
                request_serial,
            } => {
                let handle = self.handle_of(ObjectType::Device, device)?;
                let native = inputs.take(self.resolve(ObjectType::Device, device)?);
                let sink = self.completions.clone();
                self.procs.device_pop_error_scope(
                    native,
                    Box::new(move |status, error_type, message| {
                        sink.borrow_mut().push_back(Completion::PopErrorScope {
                            device: handle,
                            serial: request_serial,
                            status,
                            error_type,
                            message,
                        })
                    }),
                );
                Ok(())
            }

            Command::DeviceInjectError {
                device,
                error_type,
                message,
            } => {
                let device = inputs.take(self.resolve(ObjectType::Device, device)?);
                self.procs.device_inject_error(device, error_type, &message);
                Ok(())
            }

            Command::DeviceDestroy { device } => {
                let device = inputs.take(self.resolve(ObjectType::Device, device)?);
                self.procs.device_destroy(device);
                Ok(())
            }

            Command::DeviceTick { device } => {
                let device = inputs.take(self.resolve(ObjectType::Device, device)?);
                self.procs.device_tick(device);
                Ok(())
            }

            Command::DestroyObject {
                object_type,
                object_id,
            } => {
                let data = self.registry.table_mut(object_type).free(object_id)?;
                if let Some(native) = data.native {
                    self.procs.release(object_type, native);
                }
                debug!(?object_type, object_id, "released object");
                Ok(())
            }
        }
    }

    fn completion_reply(&mut self, completion: Completion) -> ReturnCommand {
        match completion {
            Completion::Map {
                buffer,
                serial,
                mode,
                offset,
                size,
                mut status,
                mut message,
            } => {
                let mut read_data = None;
                if status == MapAsyncStatus::Success && mode.contains(MapMode::READ) {
                    read_data = self
                        .registry
                        .native_of(ObjectType::Buffer, buffer)
                        .and_then(|native| self.procs.buffer_get_mapped_range(native, offset, size))
                        .map(<[u8]>::to_vec);
                    if read_data.is_none() {
                        status = MapAsyncStatus::Unknown;
                        message = "mapped range is no longer available".to_string();
                    }
                }
                ReturnCommand::BufferMapAsyncCallback {
                    buffer,
                    request_serial: serial,
                    status,
                    message,
                    read_data,
                }
            }

            Completion::Pipeline {
                kind,
                device,
                serial,
                result,
                status,
                native,
                message,
            } => {
                let object_type = kind.object_type();
                let table = self.registry.table_mut(object_type);
                if table.is_reserved(result) {
                    match native {
                        Some(native) if status == CreatePipelineAsyncStatus::Success => {
                            table.set_native(result.id, native)
                        }
                        _ => table.mark_error(result.id),
                    }
                } else if let Some(native) = native {
                    // The client released the pipeline before it was ready.
                    self.procs.release(object_type, native);
                }
                match kind {
                    PipelineKind::Compute => ReturnCommand::DeviceCreateComputePipelineAsyncCallback {
                        device,
                        request_serial: serial,
                        status,
                        message,
                    },
                    PipelineKind::Render => ReturnCommand::DeviceCreateRenderPipelineAsyncCallback {
                        device,
                        request_serial: serial,
                        status,
                        message,
                    },
                }
            }

            Completion::PopErrorScope {
                device,
                serial,
                status,
                error_type,
                message,
            } => ReturnCommand::DevicePopErrorScopeCallback {
                device,
                request_serial: serial,
                status,
                error_type,
                message,
            },

            Completion::WorkDone {
                queue,
                serial,
                status,
            } => ReturnCommand::QueueWorkDoneCallback {
                queue,
                request_serial: serial,
                status,
            },

            Completion::UncapturedError {
                device,
                error_type,
                message,
            } => ReturnCommand::DeviceUncapturedError {
                device,
                error_type,
                message,
            },

            Completion::DeviceLost {
                device,
                reason,
                message,
            } => ReturnCommand::DeviceLost {
                device,
                reason,
                message,
            },

            Completion::Logging {
                device,
                logging_type,
                message,
            } => ReturnCommand::DeviceLogging {
                device,
                logging_type,
                message,
            },
        }
    }

    fn fail(&mut self, command: &str, err: ServerError) -> bool {
        error!(command, "fatal wire error: {}", err);
        self.fatal = true;
        false
    }
}

impl<P: Procs> CommandHandler for Server<P> {
    fn handle_commands(&mut self, mut data: &[u8]) -> bool {
        if self.fatal {
            return false;
        }
        while !data.is_empty() {
            let (command, used) = match Command::deserialize(data) {
                Ok(decoded) => decoded,
                Err(err) => return self.fail("<decode>", err.into()),
            };
            data = &data[used..];

            let name = command.name();
            debug!(command = name, "handling command");
            if let Err(err) = self.handle_command(command) {
                return self.fail(name, err);
            }
            if let Err(err) = self.drain_completions() {
                return self.fail(name, err);
            }
        }
        true
    }
}
