use serde::{Deserialize, Serialize};

use crate::wire_enum;

/// Identifier of an object within one object-type category. 0 is null.
pub type ObjectId = u32;

/// A network-safe handle naming one incarnation of an object.
///
/// The id is recycled after the object is released; the generation tells
/// the incarnations apart so late replies to a dead object can be detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ObjectHandle {
    pub id: ObjectId,
    pub generation: u32,
}

impl ObjectHandle {
    pub const fn new(id: ObjectId, generation: u32) -> Self {
        Self { id, generation }
    }

    /// Create a null/invalid handle.
    pub const fn null() -> Self {
        Self { id: 0, generation: 0 }
    }

    pub fn is_null(&self) -> bool {
        self.id == 0
    }
}

impl std::fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.generation)
    }
}

wire_enum! {
    /// Object-type category. Every category has its own id space.
    pub enum ObjectType {
        Device = 1,
        Queue = 2,
        Buffer = 3,
        Texture = 4,
        TextureView = 5,
        Sampler = 6,
        ShaderModule = 7,
        BindGroupLayout = 8,
        BindGroup = 9,
        PipelineLayout = 10,
        ComputePipeline = 11,
        RenderPipeline = 12,
        CommandEncoder = 13,
        CommandBuffer = 14,
    }
}

impl ObjectType {
    pub const ALL: [ObjectType; 14] = [
        ObjectType::Device,
        ObjectType::Queue,
        ObjectType::Buffer,
        ObjectType::Texture,
        ObjectType::TextureView,
        ObjectType::Sampler,
        ObjectType::ShaderModule,
        ObjectType::BindGroupLayout,
        ObjectType::BindGroup,
        ObjectType::PipelineLayout,
        ObjectType::ComputePipeline,
        ObjectType::RenderPipeline,
        ObjectType::CommandEncoder,
        ObjectType::CommandBuffer,
    ];

    /// Dense index in `0..ALL.len()`, for per-category tables.
    pub const fn index(self) -> usize {
        self as usize - 1
    }
}
