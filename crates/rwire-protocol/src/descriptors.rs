//! Creation descriptors carried inside commands.
//!
//! Object references inside descriptors are bare [`ObjectId`]s. Optional
//! references use 0 for "none".

use serde::{Deserialize, Serialize};

use crate::handle::ObjectId;
use crate::types::{
    AddressMode, BindingType, BufferUsage, ColorWriteMask, Extent3d, FilterMode,
    PrimitiveTopology, ShaderStage, TextureDimension, TextureFormat, TextureUsage,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub usage: BufferUsage,
    pub size: u64,
    pub mapped_at_creation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub usage: TextureUsage,
    pub dimension: TextureDimension,
    pub size: Extent3d,
    pub format: TextureFormat,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub view_formats: Vec<TextureFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureViewDescriptor {
    pub label: Option<String>,
    pub format: TextureFormat,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub base_array_layer: u32,
    pub array_layer_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerDescriptor {
    pub label: Option<String>,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub lod_min_clamp: f32,
    pub lod_max_clamp: f32,
}

/// Extension struct attached to a descriptor's chain. The variant index is
/// the chain tag; unknown tags fail to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChainedStruct {
    ShaderSourceWgsl { code: String },
    ShaderSourceSpirv { code: Vec<u32> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderModuleDescriptor {
    pub label: Option<String>,
    pub chain: Vec<ChainedStruct>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStage,
    pub binding_type: BindingType,
    pub has_dynamic_offset: bool,
    pub min_binding_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindGroupLayoutDescriptor {
    pub label: Option<String>,
    pub entries: Vec<BindGroupLayoutEntry>,
}

/// Exactly one of `buffer`, `sampler` or `texture_view` is expected to
/// be non-zero; the backend validates that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindGroupEntry {
    pub binding: u32,
    pub buffer: ObjectId,
    pub offset: u64,
    pub size: u64,
    pub sampler: ObjectId,
    pub texture_view: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindGroupDescriptor {
    pub label: Option<String>,
    pub layout: ObjectId,
    pub entries: Vec<BindGroupEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineLayoutDescriptor {
    pub label: Option<String>,
    pub bind_group_layouts: Vec<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantEntry {
    pub key: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgrammableStage {
    pub module: ObjectId,
    pub entry_point: Option<String>,
    pub constants: Vec<ConstantEntry>,
}

/// `layout == 0` requests an automatically derived layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputePipelineDescriptor {
    pub label: Option<String>,
    pub layout: ObjectId,
    pub compute: ProgrammableStage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorTargetState {
    pub format: TextureFormat,
    pub write_mask: ColorWriteMask,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentState {
    pub stage: ProgrammableStage,
    pub targets: Vec<ColorTargetState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    pub layout: ObjectId,
    pub vertex: ProgrammableStage,
    pub fragment: Option<FragmentState>,
    pub topology: PrimitiveTopology,
}

impl RenderPipelineDescriptor {
    /// Shader modules referenced by the vertex and fragment stages.
    pub fn modules(&self) -> impl Iterator<Item = ObjectId> + '_ {
        std::iter::once(self.vertex.module)
            .chain(self.fragment.as_ref().map(|f| f.stage.module))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEncoderDescriptor {
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandBufferDescriptor {
    pub label: Option<String>,
}

impl Default for CommandEncoderDescriptor {
    fn default() -> Self {
        Self { label: None }
    }
}

impl Default for CommandBufferDescriptor {
    fn default() -> Self {
        Self { label: None }
    }
}
