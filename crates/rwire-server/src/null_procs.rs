//! In-memory backend.
//!
//! Buffers have real storage, copies and writes really happen, and the
//! common validation rules are enforced so error paths can be exercised
//! without a GPU. Asynchronous completions run immediately, or on
//! `device_tick` when built with [`NullProcs::with_deferred_callbacks`].
//! Buffers larger than `max_buffer_size` fail with an out-of-memory error
//! and no object (0).

use std::collections::{HashMap, VecDeque};

use rwire_protocol::descriptors::{
    BindGroupLayoutDescriptor, BufferDescriptor, ChainedStruct, CommandBufferDescriptor,
    CommandEncoderDescriptor, SamplerDescriptor, ShaderModuleDescriptor, TextureDescriptor,
    TextureViewDescriptor,
};
use rwire_protocol::types::{
    BufferUsage, CreatePipelineAsyncStatus, DeviceLostReason, ErrorFilter, ErrorType,
    FeatureName, Limits, LoggingType, MapAsyncStatus, MapMode, PopErrorScopeStatus,
    QueueWorkDoneStatus,
};
use rwire_protocol::ObjectType;
use tracing::{debug, trace};

use crate::procs::{
    CreatePipelineCallback, DeviceLostCallback, LoggingCallback, MapCallback, NativeBindGroupDescriptor,
    NativeComputePipelineDescriptor, NativeObject, NativePipelineLayoutDescriptor,
    NativeRenderPipelineDescriptor, PopErrorScopeCallback, Procs, UncapturedErrorCallback,
    WorkDoneCallback,
};

const SPIRV_MAGIC: u32 = 0x0723_0203;

struct ErrorScope {
    filter: ErrorFilter,
    error: Option<(ErrorType, String)>,
}

#[derive(Default)]
struct DeviceState {
    lost: bool,
    uncaptured: Option<UncapturedErrorCallback>,
    lost_callback: Option<DeviceLostCallback>,
    logging: Option<LoggingCallback>,
    scopes: Vec<ErrorScope>,
}

enum MapState {
    Unmapped,
    Pending {
        mode: MapMode,
        offset: u64,
        size: u64,
        callback: MapCallback,
    },
    Mapped {
        mode: MapMode,
        offset: u64,
        size: u64,
    },
}

struct BufferState {
    device: NativeObject,
    valid: bool,
    destroyed: bool,
    usage: BufferUsage,
    data: Vec<u8>,
    map: MapState,
}

#[derive(Debug, Clone, Copy)]
struct CopyOp {
    source: NativeObject,
    source_offset: u64,
    destination: NativeObject,
    destination_offset: u64,
    size: u64,
}

enum NullObject {
    Device(DeviceState),
    Buffer(BufferState),
    Queue {
        device: NativeObject,
    },
    Encoder {
        device: NativeObject,
        valid: bool,
        finished: bool,
        copies: Vec<CopyOp>,
    },
    CommandBuffer {
        device: NativeObject,
        valid: bool,
        submitted: bool,
        copies: Vec<CopyOp>,
    },
    Other {
        device: NativeObject,
        object_type: ObjectType,
        valid: bool,
    },
}

enum Deferred {
    Map(NativeObject),
    Call(Box<dyn FnOnce()>),
}

pub struct NullProcs {
    next_id: NativeObject,
    objects: HashMap<NativeObject, NullObject>,
    limits: Limits,
    features: Vec<FeatureName>,
    deferred: bool,
    queue: VecDeque<Deferred>,
    calls: Vec<&'static str>,
}

impl NullProcs {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            objects: HashMap::new(),
            limits: Limits::default(),
            features: Vec::new(),
            deferred: false,
            queue: VecDeque::new(),
            calls: Vec::new(),
        }
    }

    /// Async completions wait for `device_tick` instead of running inline.
    pub fn with_deferred_callbacks() -> Self {
        Self {
            deferred: true,
            ..Self::new()
        }
    }

    pub fn with_limits(mut self, limits: Limits, features: Vec<FeatureName>) -> Self {
        self.limits = limits;
        self.features = features;
        self
    }

    /// Names of the procs called so far, in order.
    pub fn calls(&self) -> &[&'static str] {
        &self.calls
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.iter().filter(|c| **c == name).count()
    }

    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn buffer_contents(&self, buffer: NativeObject) -> Option<&[u8]> {
        match self.objects.get(&buffer)? {
            NullObject::Buffer(b) => Some(&b.data),
            _ => None,
        }
    }

    pub fn is_valid(&self, object: NativeObject) -> bool {
        match self.objects.get(&object) {
            Some(NullObject::Device(d)) => !d.lost,
            Some(NullObject::Buffer(b)) => b.valid,
            Some(NullObject::Queue { .. }) => true,
            Some(NullObject::Encoder { valid, .. }) => *valid,
            Some(NullObject::CommandBuffer { valid, .. }) => *valid,
            Some(NullObject::Other { valid, .. }) => *valid,
            None => false,
        }
    }

    /// Simulate the backend losing a device.
    pub fn lose_device(&mut self, device: NativeObject, message: &str) {
        self.lose(device, DeviceLostReason::Unknown, message);
    }

    /// Simulate a backend log message. Dropped when no logging callback is
    /// set or the device is lost.
    pub fn emit_log(&mut self, device: NativeObject, logging_type: LoggingType, message: &str) {
        let Some(state) = self.device_state(device) else {
            return;
        };
        if state.lost {
            return;
        }
        if let Some(callback) = state.logging.as_mut() {
            callback(logging_type, message.to_string());
        }
    }

    /// Number of completions waiting for a tick.
    pub fn queued_callbacks(&self) -> usize {
        self.queue.len()
    }

    fn record(&mut self, name: &'static str) {
        trace!(proc = name, "null backend call");
        self.calls.push(name);
    }

    fn insert(&mut self, object: NullObject) -> NativeObject {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, object);
        id
    }

    fn other(&mut self, device: NativeObject, object_type: ObjectType, valid: bool) -> NativeObject {
        self.insert(NullObject::Other {
            device,
            object_type,
            valid,
        })
    }

    fn device_of(&self, object: NativeObject) -> Option<NativeObject> {
        match self.objects.get(&object)? {
            NullObject::Device(_) => Some(object),
            NullObject::Buffer(b) => Some(b.device),
            NullObject::Queue { device }
            | NullObject::Encoder { device, .. }
            | NullObject::CommandBuffer { device, .. }
            | NullObject::Other { device, .. } => Some(*device),
        }
    }

    fn device_lost(&self, device: NativeObject) -> bool {
        match self.objects.get(&device) {
            Some(NullObject::Device(d)) => d.lost,
            _ => true,
        }
    }

    fn device_state(&mut self, device: NativeObject) -> Option<&mut DeviceState> {
        match self.objects.get_mut(&device)? {
            NullObject::Device(d) => Some(d),
            _ => None,
        }
    }

    fn buffer(&self, buffer: NativeObject) -> Option<&BufferState> {
        match self.objects.get(&buffer)? {
            NullObject::Buffer(b) => Some(b),
            _ => None,
        }
    }

    fn buffer_mut(&mut self, buffer: NativeObject) -> Option<&mut BufferState> {
        match self.objects.get_mut(&buffer)? {
            NullObject::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// Route an error to the innermost matching scope, else to the
    /// uncaptured-error callback. Errors on a lost device are dropped.
    fn report(&mut self, device: NativeObject, error_type: ErrorType, message: String) {
        let Some(state) = self.device_state(device) else {
            return;
        };
        if state.lost {
            return;
        }
        let filter = match error_type {
            ErrorType::Validation => Some(ErrorFilter::VALIDATION),
            ErrorType::OutOfMemory => Some(ErrorFilter::OUT_OF_MEMORY),
            ErrorType::Internal => Some(ErrorFilter::INTERNAL),
            _ => None,
        };
        if let Some(scope) = state
            .scopes
            .iter_mut()
            .rev()
            .find(|s| Some(s.filter) == filter)
        {
            if scope.error.is_none() {
                scope.error = Some((error_type, message));
            }
            return;
        }
        debug!(device, ?error_type, %message, "uncaptured error");
        if let Some(callback) = state.uncaptured.as_mut() {
            callback(error_type, message);
        }
    }

    fn validation(&mut self, device: NativeObject, message: impl Into<String>) {
        self.report(device, ErrorType::Validation, message.into());
    }

    fn schedule(&mut self, call: Box<dyn FnOnce()>) {
        if self.deferred {
            self.queue.push_back(Deferred::Call(call));
        } else {
            call();
        }
    }

    fn complete_map(&mut self, buffer: NativeObject) {
        let Some(b) = self.buffer_mut(buffer) else {
            return;
        };
        if !matches!(b.map, MapState::Pending { .. }) {
            return;
        }
        if let MapState::Pending {
            mode,
            offset,
            size,
            callback,
        } = std::mem::replace(&mut b.map, MapState::Unmapped)
        {
            b.map = MapState::Mapped { mode, offset, size };
            callback(MapAsyncStatus::Success, String::new());
        }
    }

    /// Abort a pending map with `status`, leaving the buffer unmapped.
    fn abort_map(&mut self, buffer: NativeObject, status: MapAsyncStatus, message: &str) {
        let Some(b) = self.buffer_mut(buffer) else {
            return;
        };
        if let MapState::Pending { callback, .. } = std::mem::replace(&mut b.map, MapState::Unmapped) {
            callback(status, message.to_string());
        }
    }

    fn lose(&mut self, device: NativeObject, reason: DeviceLostReason, message: &str) {
        let Some(state) = self.device_state(device) else {
            return;
        };
        if state.lost {
            return;
        }
        state.lost = true;
        let callback = state.lost_callback.take();

        let mut pending: Vec<NativeObject> = self
            .objects
            .iter()
            .filter_map(|(id, o)| match o {
                NullObject::Buffer(b)
                    if b.device == device && matches!(b.map, MapState::Pending { .. }) =>
                {
                    Some(*id)
                }
                _ => None,
            })
            .collect();
        pending.sort_unstable();
        for buffer in pending {
            self.abort_map(buffer, MapAsyncStatus::DeviceLost, "device lost");
        }

        debug!(device, ?reason, message, "device lost");
        if let Some(callback) = callback {
            callback(reason, message.to_string());
        }
    }

    fn check_copy(&self, op: &CopyOp) -> Result<(), String> {
        let source = self.buffer(op.source).ok_or("copy source is not a buffer")?;
        let destination = self
            .buffer(op.destination)
            .ok_or("copy destination is not a buffer")?;
        if !source.valid || !destination.valid {
            return Err("copy uses an invalid buffer".into());
        }
        if op.source == op.destination {
            return Err("copy source and destination are the same buffer".into());
        }
        if !source.usage.contains(BufferUsage::COPY_SRC) {
            return Err("copy source lacks COPY_SRC usage".into());
        }
        if !destination.usage.contains(BufferUsage::COPY_DST) {
            return Err("copy destination lacks COPY_DST usage".into());
        }
        if op.size % 4 != 0 || op.source_offset % 4 != 0 || op.destination_offset % 4 != 0 {
            return Err("copy offsets and size must be multiples of 4".into());
        }
        let in_bounds = |offset: u64, len: usize| {
            offset
                .checked_add(op.size)
                .is_some_and(|end| end <= len as u64)
        };
        if !in_bounds(op.source_offset, source.data.len())
            || !in_bounds(op.destination_offset, destination.data.len())
        {
            return Err("copy range out of bounds".into());
        }
        Ok(())
    }

    fn check_pipeline(
        &self,
        layout: Option<NativeObject>,
        modules: &[NativeObject],
    ) -> Result<(), String> {
        if layout.is_some_and(|l| !self.is_valid(l)) {
            return Err("pipeline layout is invalid".into());
        }
        if modules.iter().any(|m| !self.is_valid(*m)) {
            return Err("shader module is invalid".into());
        }
        Ok(())
    }

    fn create_pipeline_async(
        &mut self,
        device: NativeObject,
        object_type: ObjectType,
        check: Result<(), String>,
        callback: CreatePipelineCallback,
    ) {
        if self.device_lost(device) {
            self.schedule(Box::new(move || {
                callback(CreatePipelineAsyncStatus::DeviceLost, None, "device lost".into())
            }));
            return;
        }
        match check {
            Ok(()) => {
                let pipeline = self.other(device, object_type, true);
                self.schedule(Box::new(move || {
                    callback(CreatePipelineAsyncStatus::Success, Some(pipeline), String::new())
                }));
            }
            Err(message) => self.schedule(Box::new(move || {
                callback(CreatePipelineAsyncStatus::ValidationError, None, message)
            })),
        }
    }
}

impl Default for NullProcs {
    fn default() -> Self {
        Self::new()
    }
}

fn buffer_usage_error(desc: &BufferDescriptor) -> Option<String> {
    let usage = desc.usage;
    if usage.contains(BufferUsage::MAP_READ | BufferUsage::MAP_WRITE) {
        return Some("buffer usage has both MAP_READ and MAP_WRITE".into());
    }
    if usage.contains(BufferUsage::MAP_READ)
        && !(usage - BufferUsage::MAP_READ - BufferUsage::COPY_DST).is_empty()
    {
        return Some("MAP_READ may only be combined with COPY_DST".into());
    }
    if usage.contains(BufferUsage::MAP_WRITE)
        && !(usage - BufferUsage::MAP_WRITE - BufferUsage::COPY_SRC).is_empty()
    {
        return Some("MAP_WRITE may only be combined with COPY_SRC".into());
    }
    if desc.mapped_at_creation && desc.size % 4 != 0 {
        return Some("mapped_at_creation requires a size that is a multiple of 4".into());
    }
    None
}

fn shader_source_error(desc: &ShaderModuleDescriptor) -> Option<&'static str> {
    match desc.chain.as_slice() {
        [ChainedStruct::ShaderSourceWgsl { code }] if code.trim().is_empty() => {
            Some("empty WGSL source")
        }
        [ChainedStruct::ShaderSourceSpirv { code }] if code.first() != Some(&SPIRV_MAGIC) => {
            Some("SPIR-V source does not start with the magic number")
        }
        [_] => None,
        [] => Some("shader module has no source"),
        _ => Some("shader module has more than one source"),
    }
}

impl Procs for NullProcs {
    fn create_device(&mut self) -> NativeObject {
        self.record("create_device");
        self.insert(NullObject::Device(DeviceState::default()))
    }

    fn device_limits(&self, _device: NativeObject) -> Limits {
        self.limits.clone()
    }

    fn device_features(&self, _device: NativeObject) -> Vec<FeatureName> {
        self.features.clone()
    }

    fn device_set_uncaptured_error_callback(
        &mut self,
        device: NativeObject,
        callback: UncapturedErrorCallback,
    ) {
        self.record("device_set_uncaptured_error_callback");
        if let Some(state) = self.device_state(device) {
            state.uncaptured = Some(callback);
        }
    }

    fn device_set_device_lost_callback(&mut self, device: NativeObject, callback: DeviceLostCallback) {
        self.record("device_set_device_lost_callback");
        if let Some(state) = self.device_state(device) {
            state.lost_callback = Some(callback);
        }
    }

    fn device_set_logging_callback(&mut self, device: NativeObject, callback: LoggingCallback) {
        self.record("device_set_logging_callback");
        if let Some(state) = self.device_state(device) {
            state.logging = Some(callback);
        }
    }

    fn device_push_error_scope(&mut self, device: NativeObject, filter: ErrorFilter) {
        self.record("device_push_error_scope");
        if let Some(state) = self.device_state(device) {
            state.scopes.push(ErrorScope {
                filter,
                error: None,
            });
        }
    }

    fn device_pop_error_scope(&mut self, device: NativeObject, callback: PopErrorScopeCallback) {
        self.record("device_pop_error_scope");
        let (status, error_type, message) = match self.device_state(device) {
            Some(state) if state.lost => (PopErrorScopeStatus::Success, ErrorType::NoError, String::new()),
            Some(state) => match state.scopes.pop() {
                Some(ErrorScope {
                    error: Some((error_type, message)),
                    ..
                }) => (PopErrorScopeStatus::Success, error_type, message),
                Some(_) => (PopErrorScopeStatus::Success, ErrorType::NoError, String::new()),
                None => (
                    PopErrorScopeStatus::EmptyStack,
                    ErrorType::NoError,
                    "no error scope to pop".to_string(),
                ),
            },
            None => (PopErrorScopeStatus::EmptyStack, ErrorType::Unknown, String::new()),
        };
        self.schedule(Box::new(move || callback(status, error_type, message)));
    }

    fn device_inject_error(&mut self, device: NativeObject, error_type: ErrorType, message: &str) {
        self.record("device_inject_error");
        self.report(device, error_type, message.to_string());
    }

    fn device_destroy(&mut self, device: NativeObject) {
        self.record("device_destroy");
        self.lose(device, DeviceLostReason::Destroyed, "device destroyed");
    }

    fn device_tick(&mut self, _device: NativeObject) {
        self.record("device_tick");
        let queued = std::mem::take(&mut self.queue);
        for item in queued {
            match item {
                Deferred::Map(buffer) => self.complete_map(buffer),
                Deferred::Call(call) => call(),
            }
        }
    }

    fn device_create_buffer(&mut self, device: NativeObject, desc: &BufferDescriptor) -> NativeObject {
        self.record("device_create_buffer");
        if desc.size > self.limits.max_buffer_size {
            let message = format!(
                "buffer size {} exceeds max_buffer_size {}",
                desc.size, self.limits.max_buffer_size
            );
            self.report(device, ErrorType::OutOfMemory, message);
            return 0;
        }
        let error = if self.device_lost(device) {
            Some(String::new())
        } else {
            buffer_usage_error(desc)
        };
        let valid = error.is_none();
        if let Some(message) = error.filter(|m| !m.is_empty()) {
            self.validation(device, message);
        }
        let map = if valid && desc.mapped_at_creation {
            MapState::Mapped {
                mode: MapMode::WRITE,
                offset: 0,
                size: desc.size,
            }
        } else {
            MapState::Unmapped
        };
        self.insert(NullObject::Buffer(BufferState {
            device,
            valid,
            destroyed: false,
            usage: desc.usage,
            data: if valid { vec![0; desc.size as usize] } else { Vec::new() },
            map,
        }))
    }

    fn device_create_error_buffer(&mut self, device: NativeObject, desc: &BufferDescriptor) -> NativeObject {
        self.record("device_create_error_buffer");
        self.insert(NullObject::Buffer(BufferState {
            device,
            valid: false,
            destroyed: false,
            usage: desc.usage,
            data: Vec::new(),
            map: MapState::Unmapped,
        }))
    }

    fn device_create_texture(&mut self, device: NativeObject, desc: &TextureDescriptor) -> NativeObject {
        self.record("device_create_texture");
        let max = self.limits.max_texture_dimension_2d;
        let size = &desc.size;
        let valid = size.width > 0
            && size.height > 0
            && size.depth_or_array_layers > 0
            && size.width <= max
            && size.height <= max
            && desc.mip_level_count > 0
            && desc.sample_count > 0;
        if !valid {
            self.validation(device, "invalid texture size or level count");
        }
        let valid = valid && !self.device_lost(device);
        self.other(device, ObjectType::Texture, valid)
    }

    fn texture_create_view(
        &mut self,
        texture: NativeObject,
        _desc: Option<&TextureViewDescriptor>,
    ) -> NativeObject {
        self.record("texture_create_view");
        let device = self.device_of(texture).unwrap_or(0);
        let valid = self.is_valid(texture);
        if !valid {
            self.validation(device, "texture is invalid");
        }
        self.other(device, ObjectType::TextureView, valid)
    }

    fn device_create_sampler(
        &mut self,
        device: NativeObject,
        desc: Option<&SamplerDescriptor>,
    ) -> NativeObject {
        self.record("device_create_sampler");
        let valid = desc.map_or(true, |d| d.lod_min_clamp <= d.lod_max_clamp);
        if !valid {
            self.validation(device, "lod_min_clamp is greater than lod_max_clamp");
        }
        self.other(device, ObjectType::Sampler, valid)
    }

    fn device_create_shader_module(
        &mut self,
        device: NativeObject,
        desc: &ShaderModuleDescriptor,
    ) -> NativeObject {
        self.record("device_create_shader_module");
        let error = shader_source_error(desc);
        if let Some(message) = error {
            self.validation(device, message);
        }
        self.other(device, ObjectType::ShaderModule, error.is_none())
    }

    fn device_create_bind_group_layout(
        &mut self,
        device: NativeObject,
        desc: &BindGroupLayoutDescriptor,
    ) -> NativeObject {
        self.record("device_create_bind_group_layout");
        let mut bindings: Vec<u32> = desc.entries.iter().map(|e| e.binding).collect();
        bindings.sort_unstable();
        let valid = bindings.windows(2).all(|w| w[0] != w[1])
            && desc.entries.len() <= self.limits.max_bindings_per_bind_group as usize;
        if !valid {
            self.validation(device, "duplicate or too many bind group layout entries");
        }
        self.other(device, ObjectType::BindGroupLayout, valid)
    }

    fn device_create_bind_group(
        &mut self,
        device: NativeObject,
        desc: &NativeBindGroupDescriptor,
    ) -> NativeObject {
        self.record("device_create_bind_group");
        let resources_valid = desc.entries.iter().all(|e| {
            let resources = [e.buffer, e.sampler, e.texture_view];
            resources.iter().flatten().count() == 1
                && resources.iter().flatten().all(|r| self.is_valid(*r))
        });
        let valid = self.is_valid(desc.layout) && resources_valid;
        if !valid {
            self.validation(device, "bind group has an invalid layout or resource");
        }
        self.other(device, ObjectType::BindGroup, valid)
    }

    fn device_create_pipeline_layout(
        &mut self,
        device: NativeObject,
        desc: &NativePipelineLayoutDescriptor,
    ) -> NativeObject {
        self.record("device_create_pipeline_layout");
        let valid = desc.bind_group_layouts.len() <= self.limits.max_bind_groups as usize
            && desc.bind_group_layouts.iter().all(|l| self.is_valid(*l));
        if !valid {
            self.validation(device, "invalid pipeline layout");
        }
        self.other(device, ObjectType::PipelineLayout, valid)
    }

    fn device_create_compute_pipeline(
        &mut self,
        device: NativeObject,
        desc: &NativeComputePipelineDescriptor,
    ) -> NativeObject {
        self.record("device_create_compute_pipeline");
        let check = self.check_pipeline(desc.layout, &[desc.compute.module]);
        let valid = check.is_ok();
        if let Err(message) = check {
            self.validation(device, message);
        }
        self.other(device, ObjectType::ComputePipeline, valid)
    }

    fn device_create_compute_pipeline_async(
        &mut self,
        device: NativeObject,
        desc: &NativeComputePipelineDescriptor,
        callback: CreatePipelineCallback,
    ) {
        self.record("device_create_compute_pipeline_async");
        let check = self.check_pipeline(desc.layout, &[desc.compute.module]);
        self.create_pipeline_async(device, ObjectType::ComputePipeline, check, callback);
    }

    fn device_create_render_pipeline(
        &mut self,
        device: NativeObject,
        desc: &NativeRenderPipelineDescriptor,
    ) -> NativeObject {
        self.record("device_create_render_pipeline");
        let modules: Vec<NativeObject> = std::iter::once(desc.vertex.module)
            .chain(desc.fragment.as_ref().map(|f| f.stage.module))
            .collect();
        let check = self.check_pipeline(desc.layout, &modules);
        let valid = check.is_ok();
        if let Err(message) = check {
            self.validation(device, message);
        }
        self.other(device, ObjectType::RenderPipeline, valid)
    }

    fn device_create_render_pipeline_async(
        &mut self,
        device: NativeObject,
        desc: &NativeRenderPipelineDescriptor,
        callback: CreatePipelineCallback,
    ) {
        self.record("device_create_render_pipeline_async");
        let modules: Vec<NativeObject> = std::iter::once(desc.vertex.module)
            .chain(desc.fragment.as_ref().map(|f| f.stage.module))
            .collect();
        let check = self.check_pipeline(desc.layout, &modules);
        self.create_pipeline_async(device, ObjectType::RenderPipeline, check, callback);
    }

    fn device_create_command_encoder(
        &mut self,
        device: NativeObject,
        _desc: &CommandEncoderDescriptor,
    ) -> NativeObject {
        self.record("device_create_command_encoder");
        let valid = !self.device_lost(device);
        self.insert(NullObject::Encoder {
            device,
            valid,
            finished: false,
            copies: Vec::new(),
        })
    }

    fn device_get_queue(&mut self, device: NativeObject) -> NativeObject {
        self.record("device_get_queue");
        self.insert(NullObject::Queue { device })
    }

    fn command_encoder_copy_buffer_to_buffer(
        &mut self,
        encoder: NativeObject,
        source: NativeObject,
        source_offset: u64,
        destination: NativeObject,
        destination_offset: u64,
        size: u64,
    ) {
        self.record("command_encoder_copy_buffer_to_buffer");
        let op = CopyOp {
            source,
            source_offset,
            destination,
            destination_offset,
            size,
        };
        let check = self.check_copy(&op);
        if let Some(NullObject::Encoder {
            valid,
            finished,
            copies,
            ..
        }) = self.objects.get_mut(&encoder)
        {
            if *finished || check.is_err() {
                // Reported when the encoder is finished.
                *valid = false;
            } else {
                copies.push(op);
            }
        }
    }

    fn command_encoder_finish(
        &mut self,
        encoder: NativeObject,
        _desc: &CommandBufferDescriptor,
    ) -> NativeObject {
        self.record("command_encoder_finish");
        let (device, valid, copies) = match self.objects.get_mut(&encoder) {
            Some(NullObject::Encoder {
                device,
                valid,
                finished,
                copies,
            }) => {
                let ok = *valid && !*finished;
                *finished = true;
                (*device, ok, std::mem::take(copies))
            }
            _ => (0, false, Vec::new()),
        };
        if !valid {
            self.validation(device, "command encoder is invalid");
        }
        self.insert(NullObject::CommandBuffer {
            device,
            valid,
            submitted: false,
            copies,
        })
    }

    fn queue_submit(&mut self, queue: NativeObject, command_buffers: &[NativeObject]) {
        self.record("queue_submit");
        let device = self.device_of(queue).unwrap_or(0);
        if self.device_lost(device) {
            return;
        }

        let mut ops = Vec::new();
        for cb in command_buffers {
            match self.objects.get_mut(cb) {
                Some(NullObject::CommandBuffer {
                    valid: true,
                    submitted,
                    copies,
                    ..
                }) if !*submitted => {
                    *submitted = true;
                    ops.extend(copies.iter().copied());
                }
                _ => {
                    self.validation(device, "submitted an invalid or already submitted command buffer");
                    return;
                }
            }
        }

        for op in ops {
            let busy = [op.source, op.destination].iter().any(|b| {
                self.buffer(*b)
                    .map_or(true, |b| b.destroyed || !matches!(b.map, MapState::Unmapped))
            });
            if busy {
                self.validation(device, "submitted copy uses a mapped or destroyed buffer");
                return;
            }
            let src = op.source_offset as usize;
            let bytes = match self.buffer(op.source) {
                Some(b) => b.data[src..src + op.size as usize].to_vec(),
                None => continue,
            };
            if let Some(dst) = self.buffer_mut(op.destination) {
                let at = op.destination_offset as usize;
                dst.data[at..at + bytes.len()].copy_from_slice(&bytes);
            }
        }
    }

    fn queue_write_buffer(&mut self, queue: NativeObject, buffer: NativeObject, offset: u64, data: &[u8]) {
        self.record("queue_write_buffer");
        let device = self.device_of(queue).unwrap_or(0);
        if self.device_lost(device) {
            return;
        }
        let error = match self.buffer(buffer) {
            None => Some("write target is not a buffer"),
            Some(b) if !b.valid || b.destroyed => Some("write target is invalid or destroyed"),
            Some(b) if !b.usage.contains(BufferUsage::COPY_DST) => {
                Some("write target lacks COPY_DST usage")
            }
            Some(b) if !matches!(b.map, MapState::Unmapped) => Some("write target is mapped"),
            Some(_) if offset % 4 != 0 || data.len() % 4 != 0 => {
                Some("write offset and size must be multiples of 4")
            }
            Some(b)
                if offset
                    .checked_add(data.len() as u64)
                    .map_or(true, |end| end > b.data.len() as u64) =>
            {
                Some("write range out of bounds")
            }
            Some(_) => None,
        };
        if let Some(message) = error {
            self.validation(device, message);
            return;
        }
        if let Some(b) = self.buffer_mut(buffer) {
            let at = offset as usize;
            b.data[at..at + data.len()].copy_from_slice(data);
        }
    }

    fn queue_on_submitted_work_done(&mut self, _queue: NativeObject, callback: WorkDoneCallback) {
        self.record("queue_on_submitted_work_done");
        self.schedule(Box::new(move || callback(QueueWorkDoneStatus::Success)));
    }

    fn buffer_map_async(
        &mut self,
        buffer: NativeObject,
        mode: MapMode,
        offset: u64,
        size: u64,
        callback: MapCallback,
    ) {
        self.record("buffer_map_async");
        let device = self.device_of(buffer).unwrap_or(0);
        let rejection = match self.buffer(buffer) {
            None => Some((MapAsyncStatus::ValidationError, "not a buffer")),
            Some(_) if self.device_lost(device) => Some((MapAsyncStatus::DeviceLost, "device lost")),
            Some(b) if !b.valid => Some((MapAsyncStatus::ValidationError, "buffer is invalid")),
            Some(b) if b.destroyed => Some((MapAsyncStatus::ValidationError, "buffer is destroyed")),
            Some(b) if !matches!(b.map, MapState::Unmapped) => Some((
                MapAsyncStatus::ValidationError,
                "buffer is already mapped or has a pending map",
            )),
            Some(b) => {
                let usage_ok = (mode == MapMode::READ && b.usage.contains(BufferUsage::MAP_READ))
                    || (mode == MapMode::WRITE && b.usage.contains(BufferUsage::MAP_WRITE));
                let range_ok = offset % 8 == 0
                    && size % 4 == 0
                    && offset
                        .checked_add(size)
                        .is_some_and(|end| end <= b.data.len() as u64);
                if !usage_ok {
                    Some((MapAsyncStatus::ValidationError, "map mode not allowed by buffer usage"))
                } else if !range_ok {
                    Some((MapAsyncStatus::ValidationError, "invalid map range"))
                } else {
                    None
                }
            }
        };

        if let Some((status, message)) = rejection {
            self.schedule(Box::new(move || callback(status, message.to_string())));
            return;
        }
        if let Some(b) = self.buffer_mut(buffer) {
            b.map = MapState::Pending {
                mode,
                offset,
                size,
                callback,
            };
        }
        if self.deferred {
            self.queue.push_back(Deferred::Map(buffer));
        } else {
            self.complete_map(buffer);
        }
    }

    fn buffer_get_mapped_range(&self, buffer: NativeObject, offset: u64, size: u64) -> Option<&[u8]> {
        let b = self.buffer(buffer)?;
        let MapState::Mapped {
            offset: start,
            size: len,
            ..
        } = b.map
        else {
            return None;
        };
        let end = offset.checked_add(size)?;
        if offset < start || end > start + len {
            return None;
        }
        b.data.get(offset as usize..end as usize)
    }

    fn buffer_write_mapped_range(&mut self, buffer: NativeObject, offset: u64, data: &[u8]) -> bool {
        self.record("buffer_write_mapped_range");
        let Some(b) = self.buffer_mut(buffer) else {
            return false;
        };
        let MapState::Mapped {
            mode,
            offset: start,
            size: len,
        } = b.map
        else {
            return false;
        };
        let Some(end) = offset.checked_add(data.len() as u64) else {
            return false;
        };
        if !mode.contains(MapMode::WRITE) || offset < start || end > start + len {
            return false;
        }
        b.data[offset as usize..end as usize].copy_from_slice(data);
        true
    }

    fn buffer_unmap(&mut self, buffer: NativeObject) {
        self.record("buffer_unmap");
        self.abort_map(buffer, MapAsyncStatus::UnmappedBeforeCallback, "unmapped before callback");
        if let Some(b) = self.buffer_mut(buffer) {
            b.map = MapState::Unmapped;
        }
    }

    fn buffer_destroy(&mut self, buffer: NativeObject) {
        self.record("buffer_destroy");
        self.abort_map(buffer, MapAsyncStatus::DestroyedBeforeCallback, "destroyed before callback");
        if let Some(b) = self.buffer_mut(buffer) {
            b.map = MapState::Unmapped;
            b.destroyed = true;
        }
    }

    fn release(&mut self, object_type: ObjectType, object: NativeObject) {
        self.record("release");
        if object_type == ObjectType::Buffer {
            self.abort_map(object, MapAsyncStatus::DestroyedBeforeCallback, "buffer released");
        }
        self.objects.remove(&object);
    }
}
