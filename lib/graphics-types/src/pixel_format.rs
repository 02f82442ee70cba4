use strum::EnumIter;

/// Pixel formats the core understands. Each has a fixed byte stride and a
/// channel-swizzle matrix the fragment shader uses to normalize single-/two-channel
/// samples into RGBA before blending (see [`PixelFormat::swizzle_matrix`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, strum::Display)]
pub enum PixelFormat {
    R8,
    RG8,
    RGBA8,
    BGRA8,
    R16,
    RGBA16,
    R32F,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::R8 => 1,
            PixelFormat::RG8 => 2,
            PixelFormat::RGBA8 => 4,
            PixelFormat::BGRA8 => 4,
            PixelFormat::R16 => 2,
            PixelFormat::RGBA16 => 8,
            PixelFormat::R32F => 4,
        }
    }

    /// A row-major 4x4 matrix applied to the raw hardware-sampled texel (which the
    /// GPU already fills in as `(r, 0, 0, 1)` for single-channel formats and
    /// `(r, g, 0, 1)` for two-channel ones) to normalize it into the RGBA the UI and
    /// 3D fragment shaders expect. Multi-channel formats use the identity: the
    /// driver already reorders `BGRA8` memory into logical RGBA order on sample, so
    /// there is nothing left to swizzle.
    pub fn swizzle_matrix(self) -> [f32; 16] {
        const IDENTITY: [f32; 16] = [
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        // Splat the single red channel across rgb, leave alpha (already 1) alone.
        const SPLAT_RED: [f32; 16] = [
            1.0, 0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        match self {
            PixelFormat::R8 | PixelFormat::R16 | PixelFormat::R32F => SPLAT_RED,
            PixelFormat::RG8 | PixelFormat::RGBA8 | PixelFormat::BGRA8 | PixelFormat::RGBA16 => {
                IDENTITY
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_channel_formats_splat_red() {
        for f in [PixelFormat::R8, PixelFormat::R16, PixelFormat::R32F] {
            let m = f.swizzle_matrix();
            assert_eq!(m[0], 1.0);
            assert_eq!(m[4], 1.0);
            assert_eq!(m[8], 1.0);
            assert_eq!(m[15], 1.0);
        }
    }

    #[test]
    fn multi_channel_formats_are_identity() {
        for f in [
            PixelFormat::RG8,
            PixelFormat::RGBA8,
            PixelFormat::BGRA8,
            PixelFormat::RGBA16,
        ] {
            assert_eq!(f.swizzle_matrix()[5], 1.0);
        }
    }

    #[test]
    fn bytes_per_pixel_matches_format() {
        assert_eq!(PixelFormat::R8.bytes_per_pixel(), 1);
        assert_eq!(PixelFormat::RGBA8.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::RGBA16.bytes_per_pixel(), 8);
    }
}
