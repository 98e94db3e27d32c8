//! Translation of backend-agnostic enums into their D3D12 equivalents.

use windows::Win32::Graphics::{Direct3D11, Direct3D12, Dxgi};

use arclight_hal::format::Format;
use arclight_hal::types::{
    BlendFactor, BlendOp, CullMode, DepthFunction, PrimitiveTopology, ResourceState, RtClearType,
    SamplerAddressMode, SamplerCompareFunc, SamplerFilter,
};

/// Resource-state bitmask of a state; no stage dependency required on
/// this API.
pub fn resource_states(state: ResourceState) -> Direct3D12::D3D12_RESOURCE_STATES {
    use Direct3D12::*;
    match state {
        ResourceState::Unknown | ResourceState::Undefined => D3D12_RESOURCE_STATE_COMMON,

        ResourceState::VertexBuffer | ResourceState::ConstantBuffer => {
            D3D12_RESOURCE_STATE_VERTEX_AND_CONSTANT_BUFFER
        }
        ResourceState::IndexBuffer => D3D12_RESOURCE_STATE_INDEX_BUFFER,

        ResourceState::ShaderResource => D3D12_RESOURCE_STATES(
            D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE.0
                | D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE.0,
        ),
        ResourceState::ShaderResourceNonPixel => D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE,
        ResourceState::UnorderedAccess => D3D12_RESOURCE_STATE_UNORDERED_ACCESS,

        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::DepthRead => D3D12_RESOURCE_STATE_DEPTH_READ,
        ResourceState::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,

        ResourceState::IndirectArgument => D3D12_RESOURCE_STATE_INDIRECT_ARGUMENT,

        ResourceState::CopySrc => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceState::CopyDest => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::ResolveSrc => D3D12_RESOURCE_STATE_RESOLVE_SOURCE,
        ResourceState::ResolveDest => D3D12_RESOURCE_STATE_RESOLVE_DEST,

        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,

        ResourceState::RaytraceAccelStruct => D3D12_RESOURCE_STATE_RAYTRACING_ACCELERATION_STRUCTURE,
    }
}

pub fn format(fmt: Format) -> Dxgi::DXGI_FORMAT {
    use Dxgi::*;
    use Format::*;
    match fmt {
        None => DXGI_FORMAT_UNKNOWN,

        Rgba32F => DXGI_FORMAT_R32G32B32A32_FLOAT,
        Rgb32F => DXGI_FORMAT_R32G32B32_FLOAT,
        Rg32F => DXGI_FORMAT_R32G32_FLOAT,
        R32F => DXGI_FORMAT_R32_FLOAT,
        Rgba32I => DXGI_FORMAT_R32G32B32A32_SINT,
        Rgb32I => DXGI_FORMAT_R32G32B32_SINT,
        Rg32I => DXGI_FORMAT_R32G32_SINT,
        R32I => DXGI_FORMAT_R32_SINT,
        Rgba32U => DXGI_FORMAT_R32G32B32A32_UINT,
        Rgb32U => DXGI_FORMAT_R32G32B32_UINT,
        Rg32U => DXGI_FORMAT_R32G32_UINT,
        R32U => DXGI_FORMAT_R32_UINT,
        Rgba16I => DXGI_FORMAT_R16G16B16A16_SINT,
        Rg16I => DXGI_FORMAT_R16G16_SINT,
        R16I => DXGI_FORMAT_R16_SINT,
        Rgba16U => DXGI_FORMAT_R16G16B16A16_UINT,
        Rg16U => DXGI_FORMAT_R16G16_UINT,
        R16U => DXGI_FORMAT_R16_UINT,
        Rgba16F => DXGI_FORMAT_R16G16B16A16_FLOAT,
        Rg16F => DXGI_FORMAT_R16G16_FLOAT,
        R16F => DXGI_FORMAT_R16_FLOAT,
        Rgba16Un => DXGI_FORMAT_R16G16B16A16_UNORM,
        Rg16Un => DXGI_FORMAT_R16G16_UNORM,
        R16Un => DXGI_FORMAT_R16_UNORM,
        Rgba8I => DXGI_FORMAT_R8G8B8A8_SINT,
        Rg8I => DXGI_FORMAT_R8G8_SINT,
        R8I => DXGI_FORMAT_R8_SINT,
        Rgba8U => DXGI_FORMAT_R8G8B8A8_UINT,
        Rg8U => DXGI_FORMAT_R8G8_UINT,
        R8U => DXGI_FORMAT_R8_UINT,
        Rgba8Un => DXGI_FORMAT_R8G8B8A8_UNORM,
        Rg8Un => DXGI_FORMAT_R8G8_UNORM,
        R8Un => DXGI_FORMAT_R8_UNORM,

        Rgba8UnSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,

        Bgra8Un => DXGI_FORMAT_B8G8R8A8_UNORM,
        Bgra4Un => DXGI_FORMAT_B4G4R4A4_UNORM,
        B10G11R11Uf => DXGI_FORMAT_R11G11B10_FLOAT,
        R10G10B10A2U => DXGI_FORMAT_R10G10B10A2_UINT,
        R10G10B10A2Un => DXGI_FORMAT_R10G10B10A2_UNORM,
        B5G6R5Un => DXGI_FORMAT_B5G6R5_UNORM,
        B5G5R5A1Un => DXGI_FORMAT_B5G5R5A1_UNORM,
        R9G9B9E5SharedExpUf => DXGI_FORMAT_R9G9B9E5_SHAREDEXP,

        Bc1 => DXGI_FORMAT_BC1_UNORM,
        Bc1Srgb => DXGI_FORMAT_BC1_UNORM_SRGB,
        Bc2 => DXGI_FORMAT_BC2_UNORM,
        Bc2Srgb => DXGI_FORMAT_BC2_UNORM_SRGB,
        Bc3 => DXGI_FORMAT_BC3_UNORM,
        Bc3Srgb => DXGI_FORMAT_BC3_UNORM_SRGB,
        Bc6H16F => DXGI_FORMAT_BC6H_SF16,
        Bc6H16Uf => DXGI_FORMAT_BC6H_UF16,
        Bc7 => DXGI_FORMAT_BC7_UNORM,
        Bc7Srgb => DXGI_FORMAT_BC7_UNORM_SRGB,

        R24UnG8T => DXGI_FORMAT_R24_UNORM_X8_TYPELESS,
        R24TG8U => DXGI_FORMAT_X24_TYPELESS_G8_UINT,

        Depth32F => DXGI_FORMAT_D32_FLOAT,
        Depth16Un => DXGI_FORMAT_D16_UNORM,
        Depth32FStencil8U => DXGI_FORMAT_D32_FLOAT_S8X24_UINT,
        Depth24UnStencil8U => DXGI_FORMAT_D24_UNORM_S8_UINT,
    }
}

/// SRV-compatible view format for depth resources.
pub fn view_format(fmt: Format) -> Dxgi::DXGI_FORMAT {
    use Dxgi::*;
    match fmt {
        Format::Depth32F => DXGI_FORMAT_R32_FLOAT,
        Format::Depth16Un => DXGI_FORMAT_R16_UNORM,
        Format::Depth32FStencil8U => DXGI_FORMAT_R32_FLOAT_X8X24_TYPELESS,
        Format::Depth24UnStencil8U => DXGI_FORMAT_R24_UNORM_X8_TYPELESS,
        other => format(other),
    }
}

pub fn primitive_topology_type(
    topology: PrimitiveTopology,
) -> Direct3D12::D3D12_PRIMITIVE_TOPOLOGY_TYPE {
    use Direct3D12::*;
    match topology {
        PrimitiveTopology::Triangles => D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        PrimitiveTopology::Lines => D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
        PrimitiveTopology::Points => D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
        PrimitiveTopology::Patches => D3D12_PRIMITIVE_TOPOLOGY_TYPE_PATCH,
    }
}

pub fn primitive_topology(topology: PrimitiveTopology) -> Direct3D11::D3D_PRIMITIVE_TOPOLOGY {
    use Direct3D11::*;
    match topology {
        PrimitiveTopology::Triangles => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        PrimitiveTopology::Lines => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        PrimitiveTopology::Points => D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
        PrimitiveTopology::Patches => D3D_PRIMITIVE_TOPOLOGY_1_CONTROL_POINT_PATCHLIST,
    }
}

pub fn cull_mode(mode: CullMode) -> Direct3D12::D3D12_CULL_MODE {
    use Direct3D12::*;
    match mode {
        CullMode::None => D3D12_CULL_MODE_NONE,
        CullMode::Back => D3D12_CULL_MODE_BACK,
        CullMode::Front => D3D12_CULL_MODE_FRONT,
    }
}

pub fn comparison_func(func: DepthFunction) -> Direct3D12::D3D12_COMPARISON_FUNC {
    use Direct3D12::*;
    match func {
        DepthFunction::None | DepthFunction::Never => D3D12_COMPARISON_FUNC_NEVER,
        DepthFunction::Less => D3D12_COMPARISON_FUNC_LESS,
        DepthFunction::LessEqual => D3D12_COMPARISON_FUNC_LESS_EQUAL,
        DepthFunction::Greater => D3D12_COMPARISON_FUNC_GREATER,
        DepthFunction::GreaterEqual => D3D12_COMPARISON_FUNC_GREATER_EQUAL,
        DepthFunction::Equal => D3D12_COMPARISON_FUNC_EQUAL,
        DepthFunction::NotEqual => D3D12_COMPARISON_FUNC_NOT_EQUAL,
        DepthFunction::Always => D3D12_COMPARISON_FUNC_ALWAYS,
    }
}

pub fn sampler_comparison_func(func: SamplerCompareFunc) -> Direct3D12::D3D12_COMPARISON_FUNC {
    use Direct3D12::*;
    match func {
        SamplerCompareFunc::Never | SamplerCompareFunc::Disabled => D3D12_COMPARISON_FUNC_NEVER,
        SamplerCompareFunc::Less => D3D12_COMPARISON_FUNC_LESS,
        SamplerCompareFunc::Equal => D3D12_COMPARISON_FUNC_EQUAL,
        SamplerCompareFunc::LessEqual => D3D12_COMPARISON_FUNC_LESS_EQUAL,
        SamplerCompareFunc::Greater => D3D12_COMPARISON_FUNC_GREATER,
        SamplerCompareFunc::NotEqual => D3D12_COMPARISON_FUNC_NOT_EQUAL,
        SamplerCompareFunc::GreaterEqual => D3D12_COMPARISON_FUNC_GREATER_EQUAL,
        SamplerCompareFunc::Always => D3D12_COMPARISON_FUNC_ALWAYS,
    }
}

pub fn sampler_filter(filter: SamplerFilter, compare: bool) -> Direct3D12::D3D12_FILTER {
    use Direct3D12::*;
    let base = match filter {
        SamplerFilter::MinMagMipPoint => D3D12_FILTER_MIN_MAG_MIP_POINT,
        SamplerFilter::MinPointMagLinearMipPoint => D3D12_FILTER_MIN_POINT_MAG_LINEAR_MIP_POINT,
        SamplerFilter::MinLinearMagMipPoint => D3D12_FILTER_MIN_LINEAR_MAG_MIP_POINT,
        SamplerFilter::MinMagLinearMipPoint => D3D12_FILTER_MIN_MAG_LINEAR_MIP_POINT,
        SamplerFilter::MinPointMagMipLinear => D3D12_FILTER_MIN_POINT_MAG_MIP_LINEAR,
        SamplerFilter::MinLinearMagPointMipLinear => {
            D3D12_FILTER_MIN_LINEAR_MAG_POINT_MIP_LINEAR
        }
        SamplerFilter::MinMagPointMipLinear => D3D12_FILTER_MIN_MAG_POINT_MIP_LINEAR,
        SamplerFilter::MinMagMipLinear => D3D12_FILTER_MIN_MAG_MIP_LINEAR,
        SamplerFilter::Anisotropic => D3D12_FILTER_ANISOTROPIC,
    };
    if compare {
        // comparison filters sit 0x80 above their base variants
        D3D12_FILTER(base.0 + D3D12_FILTER_COMPARISON_MIN_MAG_MIP_POINT.0)
    } else {
        base
    }
}

pub fn address_mode(mode: SamplerAddressMode) -> Direct3D12::D3D12_TEXTURE_ADDRESS_MODE {
    use Direct3D12::*;
    match mode {
        SamplerAddressMode::Wrap => D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        SamplerAddressMode::Clamp => D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        SamplerAddressMode::ClampBorder => D3D12_TEXTURE_ADDRESS_MODE_BORDER,
        SamplerAddressMode::Mirror => D3D12_TEXTURE_ADDRESS_MODE_MIRROR,
    }
}

pub fn blend_factor(factor: BlendFactor) -> Direct3D12::D3D12_BLEND {
    use Direct3D12::*;
    match factor {
        BlendFactor::Zero => D3D12_BLEND_ZERO,
        BlendFactor::One => D3D12_BLEND_ONE,
        BlendFactor::SrcColor => D3D12_BLEND_SRC_COLOR,
        BlendFactor::InvSrcColor => D3D12_BLEND_INV_SRC_COLOR,
        BlendFactor::SrcAlpha => D3D12_BLEND_SRC_ALPHA,
        BlendFactor::InvSrcAlpha => D3D12_BLEND_INV_SRC_ALPHA,
        BlendFactor::DestColor => D3D12_BLEND_DEST_COLOR,
        BlendFactor::InvDestColor => D3D12_BLEND_INV_DEST_COLOR,
        BlendFactor::DestAlpha => D3D12_BLEND_DEST_ALPHA,
        BlendFactor::InvDestAlpha => D3D12_BLEND_INV_DEST_ALPHA,
    }
}

pub fn blend_op(op: BlendOp) -> Direct3D12::D3D12_BLEND_OP {
    use Direct3D12::*;
    match op {
        BlendOp::Add => D3D12_BLEND_OP_ADD,
        BlendOp::Subtract => D3D12_BLEND_OP_SUBTRACT,
        BlendOp::ReverseSubtract => D3D12_BLEND_OP_REV_SUBTRACT,
        BlendOp::Min => D3D12_BLEND_OP_MIN,
        BlendOp::Max => D3D12_BLEND_OP_MAX,
    }
}

/// True when a begin-render-pass clear op requires an explicit clear
/// call on this API.
pub fn clears_on_begin(clear: RtClearType) -> bool {
    matches!(clear, RtClearType::Clear)
}

#[cfg(test)]
mod tests {
    use super::*;
    use windows::Win32::Graphics::Direct3D12::*;

    #[test]
    fn state_masks() {
        assert_eq!(
            resource_states(ResourceState::CopyDest),
            D3D12_RESOURCE_STATE_COPY_DEST
        );
        assert_eq!(
            resource_states(ResourceState::Undefined),
            D3D12_RESOURCE_STATE_COMMON
        );
        let srv = resource_states(ResourceState::ShaderResource);
        assert!(srv.0 & D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE.0 != 0);
        assert!(srv.0 & D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE.0 != 0);
    }

    #[test]
    fn format_spot_checks() {
        assert_eq!(format(Format::Rgba8Un), Dxgi::DXGI_FORMAT_R8G8B8A8_UNORM);
        assert_eq!(format(Format::Depth32F), Dxgi::DXGI_FORMAT_D32_FLOAT);
        assert_eq!(view_format(Format::Depth32F), Dxgi::DXGI_FORMAT_R32_FLOAT);
    }

    #[test]
    fn comparison_filters_are_offset() {
        let plain = sampler_filter(SamplerFilter::MinMagMipLinear, false);
        let compare = sampler_filter(SamplerFilter::MinMagMipLinear, true);
        assert_eq!(compare.0 - plain.0, D3D12_FILTER_COMPARISON_MIN_MAG_MIP_POINT.0);
    }
}
