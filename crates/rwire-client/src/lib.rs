pub mod buffer;
pub mod client;
pub mod device;
pub mod error;
pub mod objects;
pub mod queue;
pub mod requests;

pub use buffer::BufferMapState;
pub use client::{Client, ClientHandler};
pub use device::{
    BindGroupDescriptor, BindGroupEntry, BindingResource, ComputePipelineDescriptor,
    FragmentState, PipelineLayoutDescriptor, ProgrammableStage, RenderPipelineDescriptor,
};
pub use error::ClientError;
pub use objects::{
    BindGroup, BindGroupLayout, Buffer, CommandBuffer, CommandEncoder, ComputePipeline, Device,
    PipelineLayout, Queue, RenderPipeline, Sampler, ShaderModule, Texture, TextureView,
};
