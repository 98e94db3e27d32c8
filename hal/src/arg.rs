//! Creation arguments: the descriptor structs passed to the create-family
//! of backend operations.

use arrayvec::ArrayVec;

use crate::format::Format;
use crate::handle;
use crate::limits;
use crate::types::{
    BlendFactor, BlendLogicOp, BlendOp, ResourceHeap, RtClearValue, ShaderArgument, ShaderStage,
    TextureDimension, VertexAttributeInfo,
};

/// Blend state of a single render-target slot.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RenderTargetConfig {
    pub format: Format,
    pub blend_enable: bool,
    pub blend_color_src: BlendFactor,
    pub blend_color_dest: BlendFactor,
    pub blend_op_color: BlendOp,
    pub blend_alpha_src: BlendFactor,
    pub blend_alpha_dest: BlendFactor,
    pub blend_op_alpha: BlendOp,
}

impl RenderTargetConfig {
    pub fn from_format(format: Format) -> Self {
        RenderTargetConfig {
            format,
            blend_enable: false,
            blend_color_src: BlendFactor::One,
            blend_color_dest: BlendFactor::Zero,
            blend_op_color: BlendOp::Add,
            blend_alpha_src: BlendFactor::One,
            blend_alpha_dest: BlendFactor::Zero,
            blend_op_alpha: BlendOp::Add,
        }
    }
}

/// The attachment formats a graphics pipeline renders to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FramebufferConfig {
    pub render_targets: ArrayVec<RenderTargetConfig, { limits::MAX_RENDER_TARGETS }>,
    pub logic_op_enable: bool,
    pub logic_op: BlendLogicOp,
    /// Depth-stencil format, or [`Format::None`] for no depth target.
    pub depth_target: Format,
}

impl FramebufferConfig {
    pub fn add_render_target(&mut self, format: Format) -> &mut Self {
        self.render_targets.push(RenderTargetConfig::from_format(format));
        self
    }

    pub fn set_depth_target(&mut self, format: Format) -> &mut Self {
        self.depth_target = format;
        self
    }
}

/// Vertex layout a graphics pipeline consumes.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct VertexFormat<'a> {
    pub attributes: &'a [VertexAttributeInfo],
    pub vertex_size_bytes: u32,
}

/// The declared shape of a single shader argument slot: how many SRVs,
/// UAVs and samplers its shader view holds, and whether a CBV is bound.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ShaderArgShape {
    pub num_srvs: u32,
    pub num_uavs: u32,
    pub num_samplers: u32,
    pub has_cbv: bool,
}

impl ShaderArgShape {
    pub fn new(num_srvs: u32, num_uavs: u32, num_samplers: u32, has_cbv: bool) -> Self {
        ShaderArgShape {
            num_srvs,
            num_uavs,
            num_samplers,
            has_cbv,
        }
    }
}

/// A backend-dependent shader binary (DXIL for D3D12, SPIR-V for Vulkan).
#[derive(Copy, Clone, Debug)]
pub struct ShaderBinary<'a> {
    pub data: &'a [u8],
}

/// One stage of a graphics pipeline.
#[derive(Copy, Clone, Debug)]
pub struct GraphicsShader<'a> {
    pub binary: ShaderBinary<'a>,
    pub stage: ShaderStage,
}

/// One triangle-geometry element of a bottom-level acceleration structure.
#[derive(Copy, Clone, Debug)]
pub struct BlasElement {
    pub vertex_buffer: handle::Resource,
    /// Optional.
    pub index_buffer: handle::Resource,
    pub num_vertices: u32,
    pub num_indices: u32,
    /// Optional 3x4 transform, fetched at build time.
    pub transform_buffer: handle::Resource,
    pub transform_buffer_offset_bytes: u32,
    pub vertex_pos_format: Format,
    pub is_opaque: bool,
}

impl Default for BlasElement {
    fn default() -> Self {
        BlasElement {
            vertex_buffer: handle::Resource::NULL,
            index_buffer: handle::Resource::NULL,
            num_vertices: 0,
            num_indices: 0,
            transform_buffer: handle::Resource::NULL,
            transform_buffer_offset_bytes: 0,
            vertex_pos_format: Format::Rgb32F,
            is_opaque: true,
        }
    }
}

/// A symbol exported from a raytracing shader library.
#[derive(Copy, Clone, Debug)]
pub struct RaytracingLibraryExport<'a> {
    pub stage: ShaderStage,
    pub entrypoint: &'a str,
}

/// A raytracing shader library with its exported symbols.
#[derive(Clone, Debug)]
pub struct RaytracingShaderLibrary<'a> {
    pub binary: ShaderBinary<'a>,
    pub exports: ArrayVec<RaytracingLibraryExport<'a>, { limits::MAX_RAYTRACING_LIBRARY_EXPORTS }>,
}

/// Associates exports of one library with argument shapes.
#[derive(Clone, Debug)]
pub struct RaytracingArgumentAssociation {
    pub library_index: u32,
    /// Indices into the library's export list.
    pub export_indices: ArrayVec<u32, { limits::MAX_RAYTRACING_LIBRARY_EXPORTS }>,
    pub argument_shapes: ArrayVec<ShaderArgShape, { limits::MAX_SHADER_ARGUMENTS }>,
    pub has_root_constants: bool,
}

/// A hit group naming the shaders invoked on ray intersections.
#[derive(Copy, Clone, Debug, Default)]
pub struct RaytracingHitGroup<'a> {
    pub name: &'a str,
    pub closest_hit: &'a str,
    /// Optional.
    pub any_hit: &'a str,
    /// Optional.
    pub intersection: &'a str,
}

/// Target of a shader-table record: an identifiable shader (ray-gen, miss
/// or callable, indexed contiguously across libraries) or a hit group.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShaderTableTarget {
    IdentifiableShader(u32),
    HitGroup(u32),
}

/// A single shader-table record: its target plus inline root arguments.
#[derive(Clone, Debug)]
pub struct ShaderTableRecord<'a> {
    pub target: ShaderTableTarget,
    /// Optional inline root-constant bytes copied after the identifier.
    pub root_arg_data: &'a [u8],
    pub shader_arguments: ArrayVec<ShaderArgument, { limits::MAX_SHADER_ARGUMENTS }>,
}

//
// Resource creation info
//

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TextureInfo {
    pub format: Format,
    pub dim: TextureDimension,
    pub width: u32,
    pub height: u32,
    pub depth_or_array_size: u32,
    /// 0 requests the full mip chain.
    pub num_mips: u32,
    pub allow_uav: bool,
}

impl TextureInfo {
    pub fn tex2d(format: Format, width: u32, height: u32, num_mips: u32) -> Self {
        TextureInfo {
            format,
            dim: TextureDimension::D2,
            width,
            height,
            depth_or_array_size: 1,
            num_mips,
            allow_uav: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RenderTargetInfo {
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub num_samples: u32,
    pub array_size: u32,
    pub clear_value: RtClearValue,
}

impl RenderTargetInfo {
    pub fn new(format: Format, width: u32, height: u32) -> Self {
        RenderTargetInfo {
            format,
            width,
            height,
            num_samples: 1,
            array_size: 1,
            clear_value: RtClearValue::color(0.0, 0.0, 0.0, 1.0),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BufferInfo {
    pub size_bytes: u64,
    /// Vertex or index stride; 0 for untyped buffers.
    pub stride_bytes: u32,
    pub heap: ResourceHeap,
    pub allow_uav: bool,
}

impl BufferInfo {
    pub fn gpu(size_bytes: u64, stride_bytes: u32) -> Self {
        BufferInfo {
            size_bytes,
            stride_bytes,
            heap: ResourceHeap::Gpu,
            allow_uav: false,
        }
    }

    pub fn upload(size_bytes: u64) -> Self {
        BufferInfo {
            size_bytes,
            stride_bytes: 0,
            heap: ResourceHeap::Upload,
            allow_uav: false,
        }
    }

    pub fn readback(size_bytes: u64) -> Self {
        BufferInfo {
            size_bytes,
            stride_bytes: 0,
            heap: ResourceHeap::Readback,
            allow_uav: false,
        }
    }
}
