//! Translation of backend-agnostic enums into their Vulkan equivalents.

use ash::vk;

use arclight_hal::format::Format;
use arclight_hal::types::{
    BlendFactor, BlendLogicOp, BlendOp, CullMode, DepthFunction, PrimitiveTopology, ResourceState,
    RtClearType, SamplerAddressMode, SamplerBorderColor, SamplerCompareFunc, SamplerFilter,
    ShaderStage, ShaderStageFlags,
};

/// Image layout a resource state corresponds to. Only meaningful for
/// image-backed resources.
pub fn image_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Unknown | ResourceState::Undefined => vk::ImageLayout::UNDEFINED,

        ResourceState::ShaderResource | ResourceState::ShaderResourceNonPixel => {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        }
        ResourceState::UnorderedAccess => vk::ImageLayout::GENERAL,

        ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::DepthRead => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ResourceState::DepthWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,

        ResourceState::CopySrc | ResourceState::ResolveSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::CopyDest | ResourceState::ResolveDest => {
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        }

        ResourceState::Present => vk::ImageLayout::PRESENT_SRC_KHR,

        // buffer-only states
        ResourceState::VertexBuffer
        | ResourceState::IndexBuffer
        | ResourceState::ConstantBuffer
        | ResourceState::IndirectArgument
        | ResourceState::RaytraceAccelStruct => vk::ImageLayout::UNDEFINED,
    }
}

/// Access mask of a resource state.
pub fn access_flags(state: ResourceState) -> vk::AccessFlags {
    match state {
        ResourceState::Unknown | ResourceState::Undefined => vk::AccessFlags::empty(),

        ResourceState::VertexBuffer => vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        ResourceState::IndexBuffer => vk::AccessFlags::INDEX_READ,
        ResourceState::ConstantBuffer => vk::AccessFlags::UNIFORM_READ,
        ResourceState::ShaderResource | ResourceState::ShaderResourceNonPixel => {
            vk::AccessFlags::SHADER_READ
        }
        ResourceState::UnorderedAccess => {
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE
        }

        ResourceState::RenderTarget => {
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        }
        ResourceState::DepthRead => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ResourceState::DepthWrite => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }

        ResourceState::IndirectArgument => vk::AccessFlags::INDIRECT_COMMAND_READ,

        ResourceState::CopySrc | ResourceState::ResolveSrc => vk::AccessFlags::TRANSFER_READ,
        ResourceState::CopyDest | ResourceState::ResolveDest => vk::AccessFlags::TRANSFER_WRITE,

        ResourceState::Present => vk::AccessFlags::MEMORY_READ,

        ResourceState::RaytraceAccelStruct => {
            vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR
                | vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR
        }
    }
}

/// Pipeline stages touched by a resource state. For CBV/SRV/UAV states the
/// result is exactly `shader_dep` (the stages consuming the resource), so
/// an empty mask there means the caller violated the transition contract.
pub fn pipeline_stage_dependency(
    state: ResourceState,
    shader_dep: vk::PipelineStageFlags,
) -> vk::PipelineStageFlags {
    match state {
        ResourceState::Unknown | ResourceState::Undefined => vk::PipelineStageFlags::TOP_OF_PIPE,

        ResourceState::VertexBuffer | ResourceState::IndexBuffer => {
            vk::PipelineStageFlags::VERTEX_INPUT
        }

        ResourceState::ConstantBuffer
        | ResourceState::ShaderResource
        | ResourceState::ShaderResourceNonPixel
        | ResourceState::UnorderedAccess => shader_dep,

        ResourceState::RenderTarget => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ResourceState::DepthRead | ResourceState::DepthWrite => {
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        }

        ResourceState::IndirectArgument => vk::PipelineStageFlags::DRAW_INDIRECT,

        ResourceState::CopySrc
        | ResourceState::CopyDest
        | ResourceState::ResolveSrc
        | ResourceState::ResolveDest => vk::PipelineStageFlags::TRANSFER,

        ResourceState::Present => vk::PipelineStageFlags::BOTTOM_OF_PIPE,

        ResourceState::RaytraceAccelStruct => {
            vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR
                | vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR
        }
    }
}

/// Shader stages as pipeline-stage bits, for barrier dependencies.
pub fn shader_stages_to_pipeline_stages(stages: ShaderStageFlags) -> vk::PipelineStageFlags {
    let mut res = vk::PipelineStageFlags::empty();
    if stages.contains(ShaderStageFlags::VERTEX) {
        res |= vk::PipelineStageFlags::VERTEX_SHADER;
    }
    if stages.contains(ShaderStageFlags::HULL) {
        res |= vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER;
    }
    if stages.contains(ShaderStageFlags::DOMAIN) {
        res |= vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER;
    }
    if stages.contains(ShaderStageFlags::GEOMETRY) {
        res |= vk::PipelineStageFlags::GEOMETRY_SHADER;
    }
    if stages.contains(ShaderStageFlags::PIXEL) {
        res |= vk::PipelineStageFlags::FRAGMENT_SHADER;
    }
    if stages.contains(ShaderStageFlags::COMPUTE) {
        res |= vk::PipelineStageFlags::COMPUTE_SHADER;
    }
    if stages.intersects(ShaderStageFlags::ALL_RAY) {
        res |= vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR;
    }
    res
}

pub fn shader_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Hull => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ShaderStage::Domain => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::Pixel => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        ShaderStage::RayGen => vk::ShaderStageFlags::RAYGEN_KHR,
        ShaderStage::RayMiss => vk::ShaderStageFlags::MISS_KHR,
        ShaderStage::RayClosestHit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        ShaderStage::RayIntersect => vk::ShaderStageFlags::INTERSECTION_KHR,
        ShaderStage::RayAnyHit => vk::ShaderStageFlags::ANY_HIT_KHR,
        ShaderStage::RayCallable => vk::ShaderStageFlags::CALLABLE_KHR,
    }
}

pub fn shader_stage_flags(stages: ShaderStageFlags) -> vk::ShaderStageFlags {
    let mut res = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStageFlags::VERTEX) {
        res |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStageFlags::HULL) {
        res |= vk::ShaderStageFlags::TESSELLATION_CONTROL;
    }
    if stages.contains(ShaderStageFlags::DOMAIN) {
        res |= vk::ShaderStageFlags::TESSELLATION_EVALUATION;
    }
    if stages.contains(ShaderStageFlags::GEOMETRY) {
        res |= vk::ShaderStageFlags::GEOMETRY;
    }
    if stages.contains(ShaderStageFlags::PIXEL) {
        res |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStageFlags::COMPUTE) {
        res |= vk::ShaderStageFlags::COMPUTE;
    }
    if stages.contains(ShaderStageFlags::RAY_GEN) {
        res |= vk::ShaderStageFlags::RAYGEN_KHR;
    }
    if stages.contains(ShaderStageFlags::RAY_MISS) {
        res |= vk::ShaderStageFlags::MISS_KHR;
    }
    if stages.contains(ShaderStageFlags::RAY_CLOSEST_HIT) {
        res |= vk::ShaderStageFlags::CLOSEST_HIT_KHR;
    }
    if stages.contains(ShaderStageFlags::RAY_INTERSECT) {
        res |= vk::ShaderStageFlags::INTERSECTION_KHR;
    }
    if stages.contains(ShaderStageFlags::RAY_ANY_HIT) {
        res |= vk::ShaderStageFlags::ANY_HIT_KHR;
    }
    if stages.contains(ShaderStageFlags::RAY_CALLABLE) {
        res |= vk::ShaderStageFlags::CALLABLE_KHR;
    }
    res
}

pub fn format(format: Format) -> vk::Format {
    use Format::*;
    match format {
        None => vk::Format::UNDEFINED,

        Rgba32F => vk::Format::R32G32B32A32_SFLOAT,
        Rgb32F => vk::Format::R32G32B32_SFLOAT,
        Rg32F => vk::Format::R32G32_SFLOAT,
        R32F => vk::Format::R32_SFLOAT,
        Rgba32I => vk::Format::R32G32B32A32_SINT,
        Rgb32I => vk::Format::R32G32B32_SINT,
        Rg32I => vk::Format::R32G32_SINT,
        R32I => vk::Format::R32_SINT,
        Rgba32U => vk::Format::R32G32B32A32_UINT,
        Rgb32U => vk::Format::R32G32B32_UINT,
        Rg32U => vk::Format::R32G32_UINT,
        R32U => vk::Format::R32_UINT,
        Rgba16I => vk::Format::R16G16B16A16_SINT,
        Rg16I => vk::Format::R16G16_SINT,
        R16I => vk::Format::R16_SINT,
        Rgba16U => vk::Format::R16G16B16A16_UINT,
        Rg16U => vk::Format::R16G16_UINT,
        R16U => vk::Format::R16_UINT,
        Rgba16F => vk::Format::R16G16B16A16_SFLOAT,
        Rg16F => vk::Format::R16G16_SFLOAT,
        R16F => vk::Format::R16_SFLOAT,
        Rgba16Un => vk::Format::R16G16B16A16_UNORM,
        Rg16Un => vk::Format::R16G16_UNORM,
        R16Un => vk::Format::R16_UNORM,
        Rgba8I => vk::Format::R8G8B8A8_SINT,
        Rg8I => vk::Format::R8G8_SINT,
        R8I => vk::Format::R8_SINT,
        Rgba8U => vk::Format::R8G8B8A8_UINT,
        Rg8U => vk::Format::R8G8_UINT,
        R8U => vk::Format::R8_UINT,
        Rgba8Un => vk::Format::R8G8B8A8_UNORM,
        Rg8Un => vk::Format::R8G8_UNORM,
        R8Un => vk::Format::R8_UNORM,

        Rgba8UnSrgb => vk::Format::R8G8B8A8_SRGB,

        Bgra8Un => vk::Format::B8G8R8A8_UNORM,
        Bgra4Un => vk::Format::B4G4R4A4_UNORM_PACK16,
        B10G11R11Uf => vk::Format::B10G11R11_UFLOAT_PACK32,
        R10G10B10A2U => vk::Format::A2B10G10R10_UINT_PACK32,
        R10G10B10A2Un => vk::Format::A2B10G10R10_UNORM_PACK32,
        B5G6R5Un => vk::Format::B5G6R5_UNORM_PACK16,
        B5G5R5A1Un => vk::Format::B5G5R5A1_UNORM_PACK16,
        R9G9B9E5SharedExpUf => vk::Format::E5B9G9R9_UFLOAT_PACK32,

        Bc1 => vk::Format::BC1_RGBA_UNORM_BLOCK,
        Bc1Srgb => vk::Format::BC1_RGBA_SRGB_BLOCK,
        Bc2 => vk::Format::BC2_UNORM_BLOCK,
        Bc2Srgb => vk::Format::BC2_SRGB_BLOCK,
        Bc3 => vk::Format::BC3_UNORM_BLOCK,
        Bc3Srgb => vk::Format::BC3_SRGB_BLOCK,
        Bc6H16F => vk::Format::BC6H_SFLOAT_BLOCK,
        Bc6H16Uf => vk::Format::BC6H_UFLOAT_BLOCK,
        Bc7 => vk::Format::BC7_UNORM_BLOCK,
        Bc7Srgb => vk::Format::BC7_SRGB_BLOCK,

        // views onto the packed depth-stencil format
        R24UnG8T | R24TG8U => vk::Format::D24_UNORM_S8_UINT,

        Depth32F => vk::Format::D32_SFLOAT,
        Depth16Un => vk::Format::D16_UNORM,
        Depth32FStencil8U => vk::Format::D32_SFLOAT_S8_UINT,
        Depth24UnStencil8U => vk::Format::D24_UNORM_S8_UINT,
    }
}

/// Aspect mask of the native image behind `format`.
pub fn image_aspect(fmt: Format) -> vk::ImageAspectFlags {
    if fmt == Format::R24TG8U {
        vk::ImageAspectFlags::STENCIL
    } else if fmt.has_depth_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if fmt.has_depth() || fmt == Format::R24UnG8T {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub fn primitive_topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::Triangles => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::Lines => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::Points => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::Patches => vk::PrimitiveTopology::PATCH_LIST,
    }
}

pub fn cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Back => vk::CullModeFlags::BACK,
        CullMode::Front => vk::CullModeFlags::FRONT,
    }
}

pub fn compare_op(func: DepthFunction) -> vk::CompareOp {
    match func {
        DepthFunction::None | DepthFunction::Never => vk::CompareOp::NEVER,
        DepthFunction::Less => vk::CompareOp::LESS,
        DepthFunction::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        DepthFunction::Greater => vk::CompareOp::GREATER,
        DepthFunction::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        DepthFunction::Equal => vk::CompareOp::EQUAL,
        DepthFunction::NotEqual => vk::CompareOp::NOT_EQUAL,
        DepthFunction::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn sampler_compare_op(func: SamplerCompareFunc) -> vk::CompareOp {
    match func {
        SamplerCompareFunc::Never | SamplerCompareFunc::Disabled => vk::CompareOp::NEVER,
        SamplerCompareFunc::Less => vk::CompareOp::LESS,
        SamplerCompareFunc::Equal => vk::CompareOp::EQUAL,
        SamplerCompareFunc::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        SamplerCompareFunc::Greater => vk::CompareOp::GREATER,
        SamplerCompareFunc::NotEqual => vk::CompareOp::NOT_EQUAL,
        SamplerCompareFunc::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        SamplerCompareFunc::Always => vk::CompareOp::ALWAYS,
    }
}

/// (min filter, mag filter, mipmap mode, anisotropy enabled)
pub fn sampler_filter(
    filter: SamplerFilter,
) -> (vk::Filter, vk::Filter, vk::SamplerMipmapMode, bool) {
    let linear = vk::Filter::LINEAR;
    let nearest = vk::Filter::NEAREST;
    match filter {
        SamplerFilter::MinMagMipPoint => (nearest, nearest, vk::SamplerMipmapMode::NEAREST, false),
        SamplerFilter::MinPointMagLinearMipPoint => {
            (nearest, linear, vk::SamplerMipmapMode::NEAREST, false)
        }
        SamplerFilter::MinLinearMagMipPoint => {
            (linear, nearest, vk::SamplerMipmapMode::NEAREST, false)
        }
        SamplerFilter::MinMagLinearMipPoint => {
            (linear, linear, vk::SamplerMipmapMode::NEAREST, false)
        }
        SamplerFilter::MinPointMagMipLinear => {
            (nearest, linear, vk::SamplerMipmapMode::LINEAR, false)
        }
        SamplerFilter::MinLinearMagPointMipLinear => {
            (linear, nearest, vk::SamplerMipmapMode::LINEAR, false)
        }
        SamplerFilter::MinMagPointMipLinear => {
            (nearest, nearest, vk::SamplerMipmapMode::LINEAR, false)
        }
        SamplerFilter::MinMagMipLinear => (linear, linear, vk::SamplerMipmapMode::LINEAR, false),
        SamplerFilter::Anisotropic => (linear, linear, vk::SamplerMipmapMode::LINEAR, true),
    }
}

pub fn sampler_address_mode(mode: SamplerAddressMode) -> vk::SamplerAddressMode {
    match mode {
        SamplerAddressMode::Wrap => vk::SamplerAddressMode::REPEAT,
        SamplerAddressMode::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        SamplerAddressMode::ClampBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        SamplerAddressMode::Mirror => vk::SamplerAddressMode::MIRRORED_REPEAT,
    }
}

pub fn sampler_border_color(color: SamplerBorderColor) -> vk::BorderColor {
    match color {
        SamplerBorderColor::BlackTransparentFloat => vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        SamplerBorderColor::BlackTransparentInt => vk::BorderColor::INT_TRANSPARENT_BLACK,
        SamplerBorderColor::BlackFloat => vk::BorderColor::FLOAT_OPAQUE_BLACK,
        SamplerBorderColor::BlackInt => vk::BorderColor::INT_OPAQUE_BLACK,
        SamplerBorderColor::WhiteFloat => vk::BorderColor::FLOAT_OPAQUE_WHITE,
        SamplerBorderColor::WhiteInt => vk::BorderColor::INT_OPAQUE_WHITE,
    }
}

pub fn blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::InvSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::InvSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DestColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::InvDestColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::DestAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::InvDestAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
    }
}

pub fn blend_op(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOp::Min => vk::BlendOp::MIN,
        BlendOp::Max => vk::BlendOp::MAX,
    }
}

pub fn logic_op(op: BlendLogicOp) -> vk::LogicOp {
    match op {
        BlendLogicOp::NoOp => vk::LogicOp::NO_OP,
        BlendLogicOp::Clear => vk::LogicOp::CLEAR,
        BlendLogicOp::Set => vk::LogicOp::SET,
        BlendLogicOp::Copy => vk::LogicOp::COPY,
        BlendLogicOp::CopyInverted => vk::LogicOp::COPY_INVERTED,
        BlendLogicOp::Invert => vk::LogicOp::INVERT,
        BlendLogicOp::And => vk::LogicOp::AND,
        BlendLogicOp::Nand => vk::LogicOp::NAND,
        BlendLogicOp::AndInverted => vk::LogicOp::AND_INVERTED,
        BlendLogicOp::AndReverse => vk::LogicOp::AND_REVERSE,
        BlendLogicOp::Or => vk::LogicOp::OR,
        BlendLogicOp::Nor => vk::LogicOp::NOR,
        BlendLogicOp::Xor => vk::LogicOp::XOR,
        BlendLogicOp::OrReverse => vk::LogicOp::OR_REVERSE,
        BlendLogicOp::OrInverted => vk::LogicOp::OR_INVERTED,
        BlendLogicOp::Equiv => vk::LogicOp::EQUIVALENT,
    }
}

pub fn load_op(clear: RtClearType) -> vk::AttachmentLoadOp {
    match clear {
        RtClearType::Clear => vk::AttachmentLoadOp::CLEAR,
        RtClearType::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        RtClearType::Load => vk::AttachmentLoadOp::LOAD,
    }
}

/// Index type from a buffer's element stride.
pub fn index_type(stride_bytes: u32) -> vk::IndexType {
    if stride_bytes == 4 {
        vk::IndexType::UINT32
    } else {
        vk::IndexType::UINT16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [ResourceState; 18] = [
        ResourceState::Unknown,
        ResourceState::Undefined,
        ResourceState::VertexBuffer,
        ResourceState::IndexBuffer,
        ResourceState::ConstantBuffer,
        ResourceState::ShaderResource,
        ResourceState::ShaderResourceNonPixel,
        ResourceState::UnorderedAccess,
        ResourceState::RenderTarget,
        ResourceState::DepthRead,
        ResourceState::DepthWrite,
        ResourceState::IndirectArgument,
        ResourceState::CopySrc,
        ResourceState::CopyDest,
        ResourceState::ResolveSrc,
        ResourceState::ResolveDest,
        ResourceState::Present,
        ResourceState::RaytraceAccelStruct,
    ];

    #[test]
    fn every_state_has_a_stage_mapping() {
        for state in ALL_STATES {
            let dep = pipeline_stage_dependency(state, vk::PipelineStageFlags::FRAGMENT_SHADER);
            assert!(
                !dep.is_empty(),
                "state {:?} produced an empty stage mask",
                state
            );
        }
    }

    #[test]
    fn shader_states_take_the_supplied_dependency() {
        let dep = vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER;
        assert_eq!(pipeline_stage_dependency(ResourceState::ShaderResource, dep), dep);
        assert_eq!(pipeline_stage_dependency(ResourceState::UnorderedAccess, dep), dep);
        // and non-shader states ignore it
        assert_eq!(
            pipeline_stage_dependency(ResourceState::CopyDest, dep),
            vk::PipelineStageFlags::TRANSFER
        );
    }

    #[test]
    fn depth_formats_map_to_depth_aspects() {
        assert_eq!(image_aspect(Format::Depth32F), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            image_aspect(Format::Depth24UnStencil8U),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(image_aspect(Format::R24TG8U), vk::ImageAspectFlags::STENCIL);
        assert_eq!(image_aspect(Format::Rgba8Un), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn format_spot_checks() {
        assert_eq!(format(Format::Rgba8Un), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(format(Format::Bgra8Un), vk::Format::B8G8R8A8_UNORM);
        assert_eq!(format(Format::Depth32F), vk::Format::D32_SFLOAT);
        assert_eq!(format(Format::Bc7Srgb), vk::Format::BC7_SRGB_BLOCK);
    }
}
