//! Value types shared by descriptors and commands.

use serde::{Deserialize, Serialize};

use crate::{wire_bitflags, wire_enum};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const MAP_READ      = 0x0001;
        const MAP_WRITE     = 0x0002;
        const COPY_SRC      = 0x0004;
        const COPY_DST      = 0x0008;
        const INDEX         = 0x0010;
        const VERTEX        = 0x0020;
        const UNIFORM       = 0x0040;
        const STORAGE       = 0x0080;
        const INDIRECT      = 0x0100;
        const QUERY_RESOLVE = 0x0200;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapMode: u32 {
        const READ  = 0x1;
        const WRITE = 0x2;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC          = 0x01;
        const COPY_DST          = 0x02;
        const TEXTURE_BINDING   = 0x04;
        const STORAGE_BINDING   = 0x08;
        const RENDER_ATTACHMENT = 0x10;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStage: u32 {
        const VERTEX   = 0x1;
        const FRAGMENT = 0x2;
        const COMPUTE  = 0x4;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWriteMask: u32 {
        const RED   = 0x1;
        const GREEN = 0x2;
        const BLUE  = 0x4;
        const ALPHA = 0x8;
        const ALL   = 0xF;
    }
}

wire_bitflags!(BufferUsage, MapMode, TextureUsage, ShaderStage, ColorWriteMask);

/// Declares a `u32` newtype copied verbatim over the wire.
macro_rules! wire_value {
    ($(#[$meta:meta])* $name:ident { $($konst:ident = $value:literal),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            $(pub const $konst: Self = Self($value);)*
        }
    };
}

wire_value!(
    /// Texture format. Only a handful are named; others pass through untouched.
    TextureFormat {
        UNDEFINED = 0,
        R8_UNORM = 1,
        RGBA8_UNORM = 0x12,
        BGRA8_UNORM = 0x17,
        RGBA32_FLOAT = 0x23,
        DEPTH32_FLOAT = 0x2A,
    }
);

wire_value!(
    ErrorFilter {
        VALIDATION = 1,
        OUT_OF_MEMORY = 2,
        INTERNAL = 3,
    }
);

wire_value!(
    PrimitiveTopology {
        POINT_LIST = 1,
        LINE_LIST = 2,
        LINE_STRIP = 3,
        TRIANGLE_LIST = 4,
        TRIANGLE_STRIP = 5,
    }
);

wire_value!(
    TextureDimension {
        D1 = 1,
        D2 = 2,
        D3 = 3,
    }
);

wire_value!(
    FilterMode {
        NEAREST = 1,
        LINEAR = 2,
    }
);

wire_value!(
    AddressMode {
        CLAMP_TO_EDGE = 1,
        REPEAT = 2,
        MIRROR_REPEAT = 3,
    }
);

wire_value!(
    BindingType {
        UNIFORM_BUFFER = 1,
        STORAGE_BUFFER = 2,
        READ_ONLY_STORAGE_BUFFER = 3,
        SAMPLER = 4,
        TEXTURE = 5,
        STORAGE_TEXTURE = 6,
    }
);

wire_enum! {
    pub enum ErrorType {
        NoError = 1,
        Validation = 2,
        OutOfMemory = 3,
        Internal = 4,
        Unknown = 5,
        DeviceLost = 6,
    }
}

wire_enum! {
    pub enum MapAsyncStatus {
        Success = 1,
        ValidationError = 2,
        DestroyedBeforeCallback = 3,
        UnmappedBeforeCallback = 4,
        DeviceLost = 5,
        Disconnected = 6,
        Unknown = 7,
    }
}

wire_enum! {
    pub enum CreatePipelineAsyncStatus {
        Success = 1,
        ValidationError = 2,
        InternalError = 3,
        DeviceLost = 4,
        DeviceDestroyed = 5,
        Disconnected = 6,
        Unknown = 7,
    }
}

wire_enum! {
    pub enum PopErrorScopeStatus {
        Success = 1,
        EmptyStack = 2,
        DeviceLost = 3,
        Disconnected = 4,
    }
}

wire_enum! {
    pub enum QueueWorkDoneStatus {
        Success = 1,
        Error = 2,
        DeviceLost = 3,
        Disconnected = 4,
    }
}

wire_enum! {
    pub enum DeviceLostReason {
        Unknown = 1,
        Destroyed = 2,
        Disconnected = 3,
        FailedCreation = 4,
    }
}

wire_enum! {
    pub enum LoggingType {
        Verbose = 1,
        Info = 2,
        Warning = 3,
        Error = 4,
    }
}

wire_enum! {
    pub enum FeatureName {
        DepthClipControl = 1,
        Depth32FloatStencil8 = 2,
        TimestampQuery = 3,
        TextureCompressionBc = 4,
        IndirectFirstInstance = 5,
        ShaderF16 = 6,
        Float32Filterable = 7,
    }
}

/// Device limits. Defaults are the baseline every adapter must support.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub max_texture_dimension_1d: u32,
    pub max_texture_dimension_2d: u32,
    pub max_texture_dimension_3d: u32,
    pub max_bind_groups: u32,
    pub max_bindings_per_bind_group: u32,
    pub max_uniform_buffer_binding_size: u64,
    pub max_storage_buffer_binding_size: u64,
    pub max_buffer_size: u64,
    pub max_vertex_buffers: u32,
    pub max_compute_workgroup_size_x: u32,
    pub max_compute_workgroup_size_y: u32,
    pub max_compute_workgroup_size_z: u32,
    pub max_compute_workgroups_per_dimension: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_texture_dimension_1d: 8192,
            max_texture_dimension_2d: 8192,
            max_texture_dimension_3d: 2048,
            max_bind_groups: 4,
            max_bindings_per_bind_group: 1000,
            max_uniform_buffer_binding_size: 64 * 1024,
            max_storage_buffer_binding_size: 128 * 1024 * 1024,
            max_buffer_size: 256 * 1024 * 1024,
            max_vertex_buffers: 8,
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            max_compute_workgroup_size_z: 64,
            max_compute_workgroups_per_dimension: 65535,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
}
