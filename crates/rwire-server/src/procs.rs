//! Backend procedure table executed by the server.
//!
//! Every entry point of the command set has a method here. Object arguments
//! are backend objects ([`NativeObject`]), never wire ids; the server does
//! the translation. Asynchronous entry points take a boxed completion that
//! the backend calls exactly once.

use rwire_protocol::descriptors::{
    BindGroupLayoutDescriptor, BufferDescriptor, ColorTargetState, CommandBufferDescriptor,
    CommandEncoderDescriptor, ConstantEntry, SamplerDescriptor, ShaderModuleDescriptor,
    TextureDescriptor, TextureViewDescriptor,
};
use rwire_protocol::types::{
    CreatePipelineAsyncStatus, DeviceLostReason, ErrorFilter, ErrorType, FeatureName, Limits,
    LoggingType, MapAsyncStatus, MapMode, PopErrorScopeStatus, PrimitiveTopology,
    QueueWorkDoneStatus,
};
use rwire_protocol::ObjectType;

/// Opaque backend object. 0 means creation failed.
pub type NativeObject = u64;

pub type MapCallback = Box<dyn FnOnce(MapAsyncStatus, String)>;
pub type CreatePipelineCallback =
    Box<dyn FnOnce(CreatePipelineAsyncStatus, Option<NativeObject>, String)>;
pub type PopErrorScopeCallback = Box<dyn FnOnce(PopErrorScopeStatus, ErrorType, String)>;
pub type WorkDoneCallback = Box<dyn FnOnce(QueueWorkDoneStatus)>;
pub type UncapturedErrorCallback = Box<dyn FnMut(ErrorType, String)>;
pub type DeviceLostCallback = Box<dyn FnOnce(DeviceLostReason, String)>;
pub type LoggingCallback = Box<dyn FnMut(LoggingType, String)>;

#[derive(Debug, Clone, PartialEq)]
pub struct NativeBindGroupEntry {
    pub binding: u32,
    pub buffer: Option<NativeObject>,
    pub offset: u64,
    pub size: u64,
    pub sampler: Option<NativeObject>,
    pub texture_view: Option<NativeObject>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeBindGroupDescriptor {
    pub label: Option<String>,
    pub layout: NativeObject,
    pub entries: Vec<NativeBindGroupEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativePipelineLayoutDescriptor {
    pub label: Option<String>,
    pub bind_group_layouts: Vec<NativeObject>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeProgrammableStage {
    pub module: NativeObject,
    pub entry_point: Option<String>,
    pub constants: Vec<ConstantEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeComputePipelineDescriptor {
    pub label: Option<String>,
    /// `None` requests an automatic layout.
    pub layout: Option<NativeObject>,
    pub compute: NativeProgrammableStage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeFragmentState {
    pub stage: NativeProgrammableStage,
    pub targets: Vec<ColorTargetState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeRenderPipelineDescriptor {
    pub label: Option<String>,
    pub layout: Option<NativeObject>,
    pub vertex: NativeProgrammableStage,
    pub fragment: Option<NativeFragmentState>,
    pub topology: PrimitiveTopology,
}

pub trait Procs {
    // ── Device ──────────────────────────────────────────────
    fn create_device(&mut self) -> NativeObject;
    fn device_limits(&self, device: NativeObject) -> Limits;
    fn device_features(&self, device: NativeObject) -> Vec<FeatureName>;
    fn device_set_uncaptured_error_callback(
        &mut self,
        device: NativeObject,
        callback: UncapturedErrorCallback,
    );
    fn device_set_device_lost_callback(&mut self, device: NativeObject, callback: DeviceLostCallback);
    fn device_set_logging_callback(&mut self, device: NativeObject, callback: LoggingCallback);
    fn device_push_error_scope(&mut self, device: NativeObject, filter: ErrorFilter);
    fn device_pop_error_scope(&mut self, device: NativeObject, callback: PopErrorScopeCallback);
    fn device_inject_error(&mut self, device: NativeObject, error_type: ErrorType, message: &str);
    fn device_destroy(&mut self, device: NativeObject);
    fn device_tick(&mut self, device: NativeObject);

    // ── Object creation ─────────────────────────────────────
    fn device_create_buffer(&mut self, device: NativeObject, desc: &BufferDescriptor) -> NativeObject;
    /// A buffer object that is invalid from the start. Raises no error.
    fn device_create_error_buffer(&mut self, device: NativeObject, desc: &BufferDescriptor) -> NativeObject;
    fn device_create_texture(&mut self, device: NativeObject, desc: &TextureDescriptor) -> NativeObject;
    fn texture_create_view(
        &mut self,
        texture: NativeObject,
        desc: Option<&TextureViewDescriptor>,
    ) -> NativeObject;
    fn device_create_sampler(
        &mut self,
        device: NativeObject,
        desc: Option<&SamplerDescriptor>,
    ) -> NativeObject;
    fn device_create_shader_module(
        &mut self,
        device: NativeObject,
        desc: &ShaderModuleDescriptor,
    ) -> NativeObject;
    fn device_create_bind_group_layout(
        &mut self,
        device: NativeObject,
        desc: &BindGroupLayoutDescriptor,
    ) -> NativeObject;
    fn device_create_bind_group(
        &mut self,
        device: NativeObject,
        desc: &NativeBindGroupDescriptor,
    ) -> NativeObject;
    fn device_create_pipeline_layout(
        &mut self,
        device: NativeObject,
        desc: &NativePipelineLayoutDescriptor,
    ) -> NativeObject;
    fn device_create_compute_pipeline(
        &mut self,
        device: NativeObject,
        desc: &NativeComputePipelineDescriptor,
    ) -> NativeObject;
    fn device_create_compute_pipeline_async(
        &mut self,
        device: NativeObject,
        desc: &NativeComputePipelineDescriptor,
        callback: CreatePipelineCallback,
    );
    fn device_create_render_pipeline(
        &mut self,
        device: NativeObject,
        desc: &NativeRenderPipelineDescriptor,
    ) -> NativeObject;
    fn device_create_render_pipeline_async(
        &mut self,
        device: NativeObject,
        desc: &NativeRenderPipelineDescriptor,
        callback: CreatePipelineCallback,
    );
    fn device_create_command_encoder(
        &mut self,
        device: NativeObject,
        desc: &CommandEncoderDescriptor,
    ) -> NativeObject;
    fn device_get_queue(&mut self, device: NativeObject) -> NativeObject;

    // ── Command encoding and submission ─────────────────────
    fn command_encoder_copy_buffer_to_buffer(
        &mut self,
        encoder: NativeObject,
        source: NativeObject,
        source_offset: u64,
        destination: NativeObject,
        destination_offset: u64,
        size: u64,
    );
    fn command_encoder_finish(
        &mut self,
        encoder: NativeObject,
        desc: &CommandBufferDescriptor,
    ) -> NativeObject;
    fn queue_submit(&mut self, queue: NativeObject, command_buffers: &[NativeObject]);
    fn queue_write_buffer(&mut self, queue: NativeObject, buffer: NativeObject, offset: u64, data: &[u8]);
    fn queue_on_submitted_work_done(&mut self, queue: NativeObject, callback: WorkDoneCallback);

    // ── Buffer mapping ──────────────────────────────────────
    fn buffer_map_async(
        &mut self,
        buffer: NativeObject,
        mode: MapMode,
        offset: u64,
        size: u64,
        callback: MapCallback,
    );
    /// Contents of a mapped range, if `offset..offset + size` lies inside
    /// the current mapping.
    fn buffer_get_mapped_range(&self, buffer: NativeObject, offset: u64, size: u64) -> Option<&[u8]>;
    /// Write into a range mapped for writing. `false` if the range is not
    /// writable.
    fn buffer_write_mapped_range(&mut self, buffer: NativeObject, offset: u64, data: &[u8]) -> bool;
    fn buffer_unmap(&mut self, buffer: NativeObject);
    fn buffer_destroy(&mut self, buffer: NativeObject);

    /// Drop the server's reference to a backend object.
    fn release(&mut self, object_type: ObjectType, object: NativeObject);
}
