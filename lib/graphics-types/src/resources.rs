use crate::geometry::Extent2D;
use crate::pixel_format::PixelFormat;

/// Shared by textures and buffers: `Static` resources are uploaded once through a
/// staging buffer, `Dynamic` resources are host-mapped and persistently visible so
/// they can be refilled in place every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Static,
    Dynamic,
}

/// Descriptive attributes of a registered 2D texture. The GPU image/view/sampler
/// themselves live in the backend; this is the part the core's resource registry
/// and the public getters (`texture_kind`/`texture_size`/`texture_format`) expose.
#[derive(Debug, Clone, Copy)]
pub struct TextureAttributes {
    pub size: Extent2D,
    pub format: PixelFormat,
    pub kind: StorageKind,
}

/// Descriptive attributes of a registered buffer. A single buffer can be bound as
/// either a vertex or an index buffer; the core does not track which role a given
/// bind used last.
#[derive(Debug, Clone, Copy)]
pub struct BufferAttributes {
    pub size_bytes: u64,
    pub kind: StorageKind,
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("texture kind is Static; only Dynamic textures may be refilled in place")]
    StaticTextureRefill,
    #[error("fill region {0:?} exceeds texture bounds {1:?}")]
    RegionOutOfBounds(crate::geometry::IRect, Extent2D),
    #[error("data length {got} does not match expected {expected} bytes for this format/size")]
    DataLengthMismatch { got: usize, expected: usize },
}
