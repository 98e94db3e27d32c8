//! Backend-agnostic value types shared by commands, creation arguments and
//! both backend translators.

use bitflags::bitflags;

use crate::format::Format;
use crate::handle;

/// The queue class a command list is recorded for and submitted on.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum QueueType {
    /// Graphics + compute + copy + present.
    Direct,
    Compute,
    Copy,
}

/// A single shader within a pipeline.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ShaderStage {
    Vertex,
    Hull,
    Domain,
    Geometry,
    Pixel,

    Compute,

    RayGen,
    RayMiss,
    RayClosestHit,
    RayIntersect,
    RayAnyHit,
    RayCallable,
}

bitflags! {
    /// A set of shader stages, used for resource-state dependencies and
    /// descriptor visibility.
    #[derive(Default)]
    pub struct ShaderStageFlags: u16 {
        const VERTEX = 1 << 0;
        const HULL = 1 << 1;
        const DOMAIN = 1 << 2;
        const GEOMETRY = 1 << 3;
        const PIXEL = 1 << 4;

        const COMPUTE = 1 << 5;

        const RAY_GEN = 1 << 6;
        const RAY_MISS = 1 << 7;
        const RAY_CLOSEST_HIT = 1 << 8;
        const RAY_INTERSECT = 1 << 9;
        const RAY_ANY_HIT = 1 << 10;
        const RAY_CALLABLE = 1 << 11;

        const ALL_GRAPHICS = Self::VERTEX.bits | Self::HULL.bits | Self::DOMAIN.bits
            | Self::GEOMETRY.bits | Self::PIXEL.bits;
        const RAY_IDENTIFIABLE = Self::RAY_GEN.bits | Self::RAY_MISS.bits | Self::RAY_CALLABLE.bits;
        const RAY_HITGROUP = Self::RAY_CLOSEST_HIT.bits | Self::RAY_ANY_HIT.bits
            | Self::RAY_INTERSECT.bits;
        const ALL_RAY = Self::RAY_IDENTIFIABLE.bits | Self::RAY_HITGROUP.bits;
    }
}

impl From<ShaderStage> for ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        ShaderStageFlags::from_bits_truncate(1 << stage as u16)
    }
}

/// The master/per-list state of a resource, determining legal operations.
///
/// D3D12 maps these to resource states, Vulkan to (access mask, image
/// layout, pipeline stages) triples.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ResourceState {
    /// Never observed by the backend.
    Unknown = 0,
    /// Undefined in API semantics; the initial state of most resources.
    Undefined,

    VertexBuffer,
    IndexBuffer,

    /// Accessed through a CBV in any shader.
    ConstantBuffer,
    /// Accessed through an SRV in any shader.
    ShaderResource,
    /// Accessed through an SRV in non-pixel shaders only.
    ShaderResourceNonPixel,
    /// Accessed through a UAV in any shader.
    UnorderedAccess,

    RenderTarget,
    DepthRead,
    DepthWrite,

    IndirectArgument,

    CopySrc,
    CopyDest,

    ResolveSrc,
    ResolveDest,

    Present,

    RaytraceAccelStruct,
}

impl ResourceState {
    /// States whose Vulkan stage mask depends on the consuming shaders.
    /// Transitions into these must name the depending stages.
    pub fn needs_shader_dependency(self) -> bool {
        matches!(
            self,
            ResourceState::ConstantBuffer
                | ResourceState::ShaderResource
                | ResourceState::ShaderResourceNonPixel
                | ResourceState::UnorderedAccess
        )
    }
}

/// A single resource transition, naming only the target state.
/// The source state is tracked internally and synthesized at submit.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TransitionInfo {
    pub resource: handle::Resource,
    pub target_state: ResourceState,
    /// Shader stages accessing the resource afterwards; required when the
    /// target state is a CBV/SRV/UAV state (may be empty on D3D12).
    pub dependent_shaders: ShaderStageFlags,
}

/// A fully explicit transition of a single image subresource.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SliceTransitionInfo {
    pub resource: handle::Resource,
    pub source_state: ResourceState,
    pub target_state: ResourceState,
    pub source_dependencies: ShaderStageFlags,
    pub target_dependencies: ShaderStageFlags,
    pub mip_level: u32,
    pub array_slice: u32,
}

/// One of up to four resource bundles bound to a draw or dispatch.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ShaderArgument {
    pub constant_buffer: handle::Resource,
    pub constant_buffer_offset: u32,
    pub shader_view: handle::ShaderView,
}

/// A single signal- or wait-operation on a fence, ordered around a submit.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FenceOperation {
    pub fence: handle::Fence,
    pub value: u64,
}

/// Memory class a buffer is allocated in.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ResourceHeap {
    /// Device-local, fastest for the GPU.
    Gpu,
    /// CPU to GPU transfer; host-visible and persistently mapped.
    Upload,
    /// GPU to CPU transfer; host-visible and persistently mapped.
    Readback,
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TextureDimension {
    D1,
    D2,
    D3,
}

/// The shape of a [`ResourceView`].
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ResourceViewDimension {
    None = 0,

    Buffer,
    RawBuffer,
    Texture1d,
    Texture1dArray,
    Texture2d,
    Texture2dMs,
    Texture2dArray,
    Texture2dMsArray,
    Texture3d,
    TextureCube,
    TextureCubeArray,
    RaytracingAccelStruct,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TextureViewInfo {
    pub pixel_format: Format,
    /// First visible mip.
    pub mip_start: u32,
    /// Number of visible mips; `u32::MAX` means all remaining.
    pub mip_size: u32,
    pub array_start: u32,
    pub array_size: u32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BufferViewInfo {
    /// First element (first byte for raw buffers).
    pub element_start: u32,
    /// Number of elements (bytes for raw buffers).
    pub num_elements: u32,
    /// Element stride in bytes; ignored for raw buffers.
    pub element_stride_bytes: u32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ResourceViewInfo {
    None,
    Texture(TextureViewInfo),
    Buffer(BufferViewInfo),
    AccelStruct(handle::AccelStruct),
}

/// Describes one SRV or UAV element of a shader view, or a render target.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ResourceView {
    pub resource: handle::Resource,
    pub dimension: ResourceViewDimension,
    pub info: ResourceViewInfo,
}

impl ResourceView {
    pub fn null() -> Self {
        ResourceView {
            resource: handle::Resource::NULL,
            dimension: ResourceViewDimension::None,
            info: ResourceViewInfo::None,
        }
    }

    /// View onto the currently acquired backbuffer. The translator detects
    /// this case and substitutes the swapchain's own format and view.
    pub fn backbuffer(resource: handle::Resource) -> Self {
        ResourceView {
            resource,
            dimension: ResourceViewDimension::Texture2d,
            info: ResourceViewInfo::Texture(TextureViewInfo {
                pixel_format: Format::Bgra8Un,
                mip_start: 0,
                mip_size: u32::MAX,
                array_start: 0,
                array_size: 1,
            }),
        }
    }

    pub fn tex2d(resource: handle::Resource, format: Format) -> Self {
        Self::tex2d_mips(resource, format, 0, u32::MAX)
    }

    pub fn tex2d_mips(resource: handle::Resource, format: Format, mip_start: u32, mip_size: u32) -> Self {
        ResourceView {
            resource,
            dimension: ResourceViewDimension::Texture2d,
            info: ResourceViewInfo::Texture(TextureViewInfo {
                pixel_format: format,
                mip_start,
                mip_size,
                array_start: 0,
                array_size: 1,
            }),
        }
    }

    pub fn tex2d_ms(resource: handle::Resource, format: Format) -> Self {
        ResourceView {
            dimension: ResourceViewDimension::Texture2dMs,
            ..Self::tex2d(resource, format)
        }
    }

    pub fn tex2d_array(
        resource: handle::Resource,
        format: Format,
        array_start: u32,
        array_size: u32,
    ) -> Self {
        ResourceView {
            resource,
            dimension: ResourceViewDimension::Texture2dArray,
            info: ResourceViewInfo::Texture(TextureViewInfo {
                pixel_format: format,
                mip_start: 0,
                mip_size: u32::MAX,
                array_start,
                array_size,
            }),
        }
    }

    pub fn tex3d(resource: handle::Resource, format: Format, array_start: u32, array_size: u32) -> Self {
        ResourceView {
            dimension: ResourceViewDimension::Texture3d,
            ..Self::tex2d_array(resource, format, array_start, array_size)
        }
    }

    pub fn texcube(resource: handle::Resource, format: Format) -> Self {
        ResourceView {
            resource,
            dimension: ResourceViewDimension::TextureCube,
            info: ResourceViewInfo::Texture(TextureViewInfo {
                pixel_format: format,
                mip_start: 0,
                mip_size: u32::MAX,
                array_start: 0,
                array_size: 6,
            }),
        }
    }

    pub fn structured_buffer(
        resource: handle::Resource,
        num_elements: u32,
        stride_bytes: u32,
    ) -> Self {
        ResourceView {
            resource,
            dimension: ResourceViewDimension::Buffer,
            info: ResourceViewInfo::Buffer(BufferViewInfo {
                element_start: 0,
                num_elements,
                element_stride_bytes: stride_bytes,
            }),
        }
    }

    pub fn byte_address_buffer(resource: handle::Resource, num_bytes: u32, offset_bytes: u32) -> Self {
        ResourceView {
            resource,
            dimension: ResourceViewDimension::RawBuffer,
            info: ResourceViewInfo::Buffer(BufferViewInfo {
                element_start: offset_bytes,
                num_elements: num_bytes,
                element_stride_bytes: 0,
            }),
        }
    }

    pub fn accel_struct(accel_struct: handle::AccelStruct) -> Self {
        ResourceView {
            resource: handle::Resource::NULL,
            dimension: ResourceViewDimension::RaytracingAccelStruct,
            info: ResourceViewInfo::AccelStruct(accel_struct),
        }
    }
}

//
// Samplers
//

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SamplerFilter {
    MinMagMipPoint,
    MinPointMagLinearMipPoint,
    MinLinearMagMipPoint,
    MinMagLinearMipPoint,
    MinPointMagMipLinear,
    MinLinearMagPointMipLinear,
    MinMagPointMipLinear,
    MinMagMipLinear,
    Anisotropic,
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SamplerAddressMode {
    Wrap,
    Clamp,
    ClampBorder,
    Mirror,
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SamplerCompareFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
    Disabled,
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SamplerBorderColor {
    BlackTransparentFloat,
    BlackTransparentInt,
    BlackFloat,
    BlackInt,
    WhiteFloat,
    WhiteInt,
}

/// Configuration a sampler is created from, as part of a shader view.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SamplerConfig {
    pub filter: SamplerFilter,
    pub address_u: SamplerAddressMode,
    pub address_v: SamplerAddressMode,
    pub address_w: SamplerAddressMode,
    pub min_lod: f32,
    pub max_lod: f32,
    /// Offset from the calculated mip level.
    pub lod_bias: f32,
    /// In [1, 16]; only meaningful with [`SamplerFilter::Anisotropic`].
    pub max_anisotropy: u32,
    pub compare_func: SamplerCompareFunc,
    pub border_color: SamplerBorderColor,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            filter: SamplerFilter::MinMagMipLinear,
            address_u: SamplerAddressMode::Wrap,
            address_v: SamplerAddressMode::Wrap,
            address_w: SamplerAddressMode::Wrap,
            min_lod: 0.0,
            max_lod: 100_000.0,
            lod_bias: 0.0,
            max_anisotropy: 16,
            compare_func: SamplerCompareFunc::Disabled,
            border_color: SamplerBorderColor::WhiteFloat,
        }
    }
}

impl SamplerConfig {
    pub fn filtered(filter: SamplerFilter) -> Self {
        SamplerConfig {
            filter,
            ..Default::default()
        }
    }
}

//
// Pipeline configuration
//

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PrimitiveTopology {
    Triangles,
    Lines,
    Points,
    Patches,
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DepthFunction {
    None,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    Always,
    Never,
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CullMode {
    None,
    Back,
    Front,
}

/// Fixed-function state of a graphics pipeline.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub topology: PrimitiveTopology,
    pub depth: DepthFunction,
    pub depth_readonly: bool,
    pub cull: CullMode,
    pub samples: u32,
    pub conservative_raster: bool,
    pub frontface_counterclockwise: bool,
    pub wireframe: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            topology: PrimitiveTopology::Triangles,
            depth: DepthFunction::None,
            depth_readonly: false,
            cull: CullMode::None,
            samples: 1,
            conservative_raster: false,
            frontface_counterclockwise: true,
            wireframe: false,
        }
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BlendLogicOp {
    NoOp,
    Clear,
    Set,
    Copy,
    CopyInverted,
    Invert,
    And,
    Nand,
    AndInverted,
    AndReverse,
    Or,
    Nor,
    Xor,
    OrReverse,
    OrInverted,
    Equiv,
}

impl Default for BlendLogicOp {
    fn default() -> Self {
        BlendLogicOp::NoOp
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DestColor,
    InvDestColor,
    DestAlpha,
    InvDestAlpha,
}

/// Operation performed on a render target at render-pass begin.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RtClearType {
    Clear,
    DontCare,
    Load,
}

/// Value a render target is cleared to (8-bit normalized channels).
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RtClearValue {
    pub red_or_depth: u8,
    pub green_or_stencil: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl RtClearValue {
    pub fn color(r: f32, g: f32, b: f32, a: f32) -> Self {
        RtClearValue {
            red_or_depth: (r * 255.0) as u8,
            green_or_stencil: (g * 255.0) as u8,
            blue: (b * 255.0) as u8,
            alpha: (a * 255.0) as u8,
        }
    }

    pub fn depth_stencil(depth: f32, stencil: u8) -> Self {
        RtClearValue {
            red_or_depth: (depth * 255.0) as u8,
            green_or_stencil: stencil,
            blue: 0,
            alpha: 0,
        }
    }
}

//
// Queries
//

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum QueryType {
    Timestamp,
    Occlusion,
    PipelineStats,
}

//
// Indirect draw/dispatch argument layouts (bit-exact GPU buffer contents)
//

/// Non-indexed indirect draw record, as laid out in a GPU buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IndirectDrawArgs {
    pub num_vertices: u32,
    pub num_instances: u32,
    pub vertex_offset: u32,
    pub first_instance: u32,
}

/// Indexed indirect draw record, as laid out in a GPU buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IndirectDrawIndexedArgs {
    pub num_indices: u32,
    pub num_instances: u32,
    pub index_offset: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

/// Indexed indirect draw record with a leading draw id.
///
/// On D3D12 the draw id overwrites the first four root-constant bytes per
/// call; on Vulkan the field is unused and the draw id is carried in
/// `first_instance` instead.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IndirectDrawIndexedWithIdArgs {
    pub draw_id: u32,
    pub num_indices: u32,
    pub num_instances: u32,
    pub index_offset: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

/// Indirect compute dispatch record, as laid out in a GPU buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IndirectDispatchArgs {
    pub dispatch_x: u32,
    pub dispatch_y: u32,
    pub dispatch_z: u32,
}

//
// Raytracing
//

bitflags! {
    /// Build options for acceleration structures.
    #[derive(Default)]
    pub struct AccelStructBuildFlags: u16 {
        /// Build so the structure supports future updates.
        const ALLOW_UPDATE = 1 << 0;
        const ALLOW_COMPACTION = 1 << 1;
        /// Maximize trace performance at the cost of build time.
        const PREFER_FAST_TRACE = 1 << 2;
        /// Minimize build time at the cost of trace performance.
        const PREFER_FAST_BUILD = 1 << 3;
        const MINIMIZE_MEMORY = 1 << 4;
    }
}

bitflags! {
    /// Per-instance flags; numerically identical on both APIs and written
    /// to the GPU unconverted.
    #[derive(Default)]
    pub struct AccelStructInstanceFlags: u32 {
        const TRIANGLE_CULL_DISABLE = 1 << 0;
        const TRIANGLE_FRONT_COUNTERCLOCKWISE = 1 << 1;
        const FORCE_OPAQUE = 1 << 2;
        const FORCE_NO_OPAQUE = 1 << 3;
    }
}

/// One bottom-level instance inside a top-level acceleration structure.
/// Layout dictated by DXR and the Vulkan raytracing extension: exactly
/// 64 bytes, no padding.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AccelStructInstance {
    /// Transposed affine transform: the top three rows, as three 4-vectors.
    pub transposed_transform: [f32; 12],
    /// `instance_id:24 | visibility_mask:8 << 24`
    pub instance_id_and_mask: u32,
    /// `hit_group_index:24 | flags:8 << 24`
    pub hit_group_index_and_flags: u32,
    /// Opaque BLAS handle as returned from bottom-level creation.
    pub native_bottom_level_handle: u64,
}

impl AccelStructInstance {
    pub fn new(
        transposed_transform: [f32; 12],
        instance_id: u32,
        visibility_mask: u8,
        hit_group_index: u32,
        flags: AccelStructInstanceFlags,
        native_bottom_level_handle: u64,
    ) -> Self {
        debug_assert!(instance_id < (1 << 24));
        debug_assert!(hit_group_index < (1 << 24));
        AccelStructInstance {
            transposed_transform,
            instance_id_and_mask: (instance_id & 0x00ff_ffff) | (u32::from(visibility_mask) << 24),
            hit_group_index_and_flags: (hit_group_index & 0x00ff_ffff) | (flags.bits() << 24),
            native_bottom_level_handle,
        }
    }
}

/// Sizes and strides of the four shader-table sections.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ShaderTableStrides {
    /// Ray generation: a single record.
    pub size_ray_gen: u32,
    pub size_miss: u32,
    pub stride_miss: u32,
    pub size_hit_group: u32,
    pub stride_hit_group: u32,
    pub size_callable: u32,
    pub stride_callable: u32,
}

/// A buffer region handed to `dispatch_rays`.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BufferRange {
    pub buffer: handle::Resource,
    pub offset_bytes: u32,
    pub size_bytes: u32,
}

/// A strided buffer region handed to `dispatch_rays`.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BufferRangeAndStride {
    pub buffer: handle::Resource,
    pub offset_bytes: u32,
    pub size_bytes: u32,
    pub stride_bytes: u32,
}

/// Information about a single vertex attribute.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VertexAttributeInfo {
    pub semantic_name: &'static str,
    pub offset: u32,
    pub format: Format,
    pub vertex_buffer_index: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn accel_struct_instance_is_64_bytes() {
        assert_eq!(mem::size_of::<AccelStructInstance>(), 64);
        assert_eq!(mem::align_of::<AccelStructInstance>(), 8);
    }

    #[test]
    fn accel_struct_instance_packs_fields() {
        let inst = AccelStructInstance::new(
            [0.0; 12],
            0x00AB_CDEF,
            0xFF,
            0x0012_3456,
            AccelStructInstanceFlags::FORCE_OPAQUE,
            0xDEAD_BEEF,
        );
        assert_eq!(inst.instance_id_and_mask, 0xFFAB_CDEF);
        assert_eq!(inst.hit_group_index_and_flags, 0x0412_3456);
    }

    #[test]
    fn indirect_layouts_are_word_exact() {
        assert_eq!(mem::size_of::<IndirectDrawArgs>(), 16);
        assert_eq!(mem::size_of::<IndirectDrawIndexedArgs>(), 20);
        assert_eq!(mem::size_of::<IndirectDrawIndexedWithIdArgs>(), 24);
        assert_eq!(mem::size_of::<IndirectDispatchArgs>(), 12);
    }

    #[test]
    fn shader_dependency_states() {
        assert!(ResourceState::ShaderResource.needs_shader_dependency());
        assert!(ResourceState::UnorderedAccess.needs_shader_dependency());
        assert!(!ResourceState::CopyDest.needs_shader_dependency());
    }
}
