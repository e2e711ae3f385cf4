//! Client → server commands.

use crate::descriptors::{
    BindGroupDescriptor, BindGroupLayoutDescriptor, BufferDescriptor, CommandBufferDescriptor,
    CommandEncoderDescriptor, ComputePipelineDescriptor, PipelineLayoutDescriptor,
    RenderPipelineDescriptor, SamplerDescriptor, ShaderModuleDescriptor, TextureDescriptor,
    TextureViewDescriptor,
};
use crate::handle::{ObjectHandle, ObjectId, ObjectType};
use crate::types::{ErrorFilter, ErrorType, MapMode};
use crate::wire_commands;

wire_commands! {
    /// A decoded client → server command.
    ///
    /// `result` fields are the client-chosen handles of objects being
    /// created; every other object field refers to a live object by id.
    pub enum Command / CommandId {
        DeviceCreateBuffer = 1 {
            device: ObjectId,
            result: ObjectHandle,
            descriptor: BufferDescriptor,
        },
        DeviceCreateTexture = 2 {
            device: ObjectId,
            result: ObjectHandle,
            descriptor: TextureDescriptor,
        },
        TextureCreateView = 3 {
            texture: ObjectId,
            result: ObjectHandle,
            descriptor: Option<TextureViewDescriptor>,
        },
        DeviceCreateSampler = 4 {
            device: ObjectId,
            result: ObjectHandle,
            descriptor: Option<SamplerDescriptor>,
        },
        DeviceCreateShaderModule = 5 {
            device: ObjectId,
            result: ObjectHandle,
            descriptor: ShaderModuleDescriptor,
        },
        DeviceCreateBindGroupLayout = 6 {
            device: ObjectId,
            result: ObjectHandle,
            descriptor: BindGroupLayoutDescriptor,
        },
        DeviceCreateBindGroup = 7 {
            device: ObjectId,
            result: ObjectHandle,
            descriptor: BindGroupDescriptor,
        },
        DeviceCreatePipelineLayout = 8 {
            device: ObjectId,
            result: ObjectHandle,
            descriptor: PipelineLayoutDescriptor,
        },
        DeviceCreateComputePipeline = 9 {
            device: ObjectId,
            result: ObjectHandle,
            descriptor: ComputePipelineDescriptor,
        },
        DeviceCreateComputePipelineAsync = 10 {
            device: ObjectId,
            request_serial: u64,
            result: ObjectHandle,
            descriptor: ComputePipelineDescriptor,
        },
        DeviceCreateRenderPipeline = 11 {
            device: ObjectId,
            result: ObjectHandle,
            descriptor: RenderPipelineDescriptor,
        },
        DeviceCreateRenderPipelineAsync = 12 {
            device: ObjectId,
            request_serial: u64,
            result: ObjectHandle,
            descriptor: RenderPipelineDescriptor,
        },
        DeviceCreateCommandEncoder = 13 {
            device: ObjectId,
            result: ObjectHandle,
            descriptor: CommandEncoderDescriptor,
        },
        CommandEncoderCopyBufferToBuffer = 14 {
            encoder: ObjectId,
            source: ObjectId,
            source_offset: u64,
            destination: ObjectId,
            destination_offset: u64,
            size: u64,
        },
        CommandEncoderFinish = 15 {
            encoder: ObjectId,
            result: ObjectHandle,
            descriptor: CommandBufferDescriptor,
        },
        DeviceGetQueue = 16 {
            device: ObjectId,
            result: ObjectHandle,
        },
        QueueSubmit = 17 {
            queue: ObjectId,
            command_buffers: Vec<ObjectId>,
        },
        QueueWriteBuffer = 18 {
            queue: ObjectId,
            buffer: ObjectId,
            buffer_offset: u64,
            data: Vec<u8>,
        },
        QueueOnSubmittedWorkDone = 19 {
            queue: ObjectId,
            request_serial: u64,
        },
        BufferMapAsync = 20 {
            buffer: ObjectId,
            request_serial: u64,
            mode: MapMode,
            offset: u64,
            size: u64,
        },
        /// Contents of a write-mapped range, sent right before `BufferUnmap`.
        BufferUpdateMappedData = 21 {
            buffer: ObjectId,
            offset: u64,
            data: Vec<u8>,
        },
        BufferUnmap = 22 {
            buffer: ObjectId,
        },
        BufferDestroy = 23 {
            buffer: ObjectId,
        },
        DevicePushErrorScope = 24 {
            device: ObjectId,
            filter: ErrorFilter,
        },
        DevicePopErrorScope = 25 {
            device: ObjectId,
            request_serial: u64,
        },
        DeviceInjectError = 26 {
            device: ObjectId,
            error_type: ErrorType,
            message: String,
        },
        DeviceDestroy = 27 {
            device: ObjectId,
        },
        /// Lets the backend make progress and flush pending completions.
        DeviceTick = 28 {
            device: ObjectId,
        },
        /// The client dropped its last reference to an object.
        DestroyObject = 29 {
            object_type: ObjectType,
            object_id: ObjectId,
        },
        /// A buffer that is invalid from the start. Used where the client
        /// cannot honor the descriptor itself, such as an unallocatable
        /// mapping shadow.
        DeviceCreateErrorBuffer = 30 {
            device: ObjectId,
            result: ObjectHandle,
            descriptor: BufferDescriptor,
        },
    }
}
