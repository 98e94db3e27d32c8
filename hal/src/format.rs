//! Pixel formats and their properties.

/// Pixel format of a texture or texture view.
///
/// Naming: `f` float, `i` signed int, `u` unsigned int, `un` unorm,
/// `uf` unsigned float, `t` typeless (view-only).
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Format {
    None = 0,

    // regular formats
    Rgba32F,
    Rgb32F,
    Rg32F,
    R32F,
    Rgba32I,
    Rgb32I,
    Rg32I,
    R32I,
    Rgba32U,
    Rgb32U,
    Rg32U,
    R32U,
    Rgba16I,
    Rg16I,
    R16I,
    Rgba16U,
    Rg16U,
    R16U,
    Rgba16F,
    Rg16F,
    R16F,
    Rgba16Un,
    Rg16Un,
    R16Un,
    Rgba8I,
    Rg8I,
    R8I,
    Rgba8U,
    Rg8U,
    R8U,
    Rgba8Un,
    Rg8Un,
    R8Un,

    // sRGB
    Rgba8UnSrgb,

    // swizzled and irregular formats
    Bgra8Un,
    Bgra4Un,
    B10G11R11Uf,
    R10G10B10A2U,
    R10G10B10A2Un,
    B5G6R5Un,
    B5G5R5A1Un,
    R9G9B9E5SharedExpUf,

    // block-compressed formats
    Bc1,
    Bc1Srgb,
    Bc2,
    Bc2Srgb,
    Bc3,
    Bc3Srgb,
    Bc6H16F,
    Bc6H16Uf,
    Bc7,
    Bc7Srgb,

    // view-only formats onto Depth24UnStencil8U
    R24UnG8T,
    R24TG8U,

    // depth formats
    Depth32F,
    Depth16Un,

    // depth-stencil formats
    Depth32FStencil8U,
    Depth24UnStencil8U,
}

impl Default for Format {
    fn default() -> Self {
        Format::None
    }
}

impl Format {
    /// True for formats with a depth aspect (including depth-stencil).
    pub fn has_depth(self) -> bool {
        matches!(
            self,
            Format::Depth32F
                | Format::Depth16Un
                | Format::Depth32FStencil8U
                | Format::Depth24UnStencil8U
        )
    }

    /// True for formats with both depth and stencil aspects.
    pub fn has_depth_stencil(self) -> bool {
        matches!(self, Format::Depth32FStencil8U | Format::Depth24UnStencil8U)
    }

    /// True for BC block-compressed formats.
    pub fn is_block_compressed(self) -> bool {
        matches!(
            self,
            Format::Bc1
                | Format::Bc1Srgb
                | Format::Bc2
                | Format::Bc2Srgb
                | Format::Bc3
                | Format::Bc3Srgb
                | Format::Bc6H16F
                | Format::Bc6H16Uf
                | Format::Bc7
                | Format::Bc7Srgb
        )
    }

    /// True for sRGB-encoded formats.
    pub fn is_srgb(self) -> bool {
        matches!(
            self,
            Format::Rgba8UnSrgb
                | Format::Bc1Srgb
                | Format::Bc2Srgb
                | Format::Bc3Srgb
                | Format::Bc7Srgb
        )
    }

    /// Bytes per pixel for uncompressed formats, or per block for
    /// block-compressed ones.
    pub fn bytes_per_unit(self) -> u32 {
        use Format::*;
        match self {
            None => 0,

            Rgba32F | Rgba32I | Rgba32U => 16,
            Rgb32F | Rgb32I | Rgb32U => 12,
            Rg32F | Rg32I | Rg32U | Rgba16F | Rgba16I | Rgba16U | Rgba16Un => 8,
            R32F | R32I | R32U | Rg16F | Rg16I | Rg16U | Rg16Un | Rgba8I | Rgba8U | Rgba8Un
            | Rgba8UnSrgb | Bgra8Un | B10G11R11Uf | R10G10B10A2U | R10G10B10A2Un
            | R9G9B9E5SharedExpUf => 4,
            R16F | R16I | R16U | R16Un | Rg8I | Rg8U | Rg8Un | Bgra4Un | B5G6R5Un | B5G5R5A1Un => 2,
            R8I | R8U | R8Un => 1,

            Bc1 | Bc1Srgb => 8,
            Bc2 | Bc2Srgb | Bc3 | Bc3Srgb | Bc6H16F | Bc6H16Uf | Bc7 | Bc7Srgb => 16,

            R24UnG8T | R24TG8U => 4,
            Depth32F => 4,
            Depth16Un => 2,
            Depth32FStencil8U => 8,
            Depth24UnStencil8U => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_classification() {
        assert!(Format::Depth32F.has_depth());
        assert!(!Format::Depth32F.has_depth_stencil());
        assert!(Format::Depth24UnStencil8U.has_depth_stencil());
        assert!(!Format::Rgba8Un.has_depth());
    }

    #[test]
    fn pixel_sizes() {
        assert_eq!(Format::Rgba8Un.bytes_per_unit(), 4);
        assert_eq!(Format::Rgba32F.bytes_per_unit(), 16);
        assert_eq!(Format::Bc1.bytes_per_unit(), 8);
        assert_eq!(Format::Depth24UnStencil8U.bytes_per_unit(), 4);
    }
}
