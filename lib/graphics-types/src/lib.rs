pub mod config;
pub mod geometry;
pub mod instance;
pub mod pass;
pub mod pixel_format;
pub mod resources;

pub use config::{DeviceCapabilities, GpuInfo, GpuKind, PresentMode, RendererConfig};
pub use geometry::{Extent2D, IRect, Rect};
pub use instance::{Mesh3DInstance, Mesh3DVertex, Rect2DInstance, VertexFlags};
pub use pass::{
    Batch, BatchBuilder, BatchGroup2D, BatchGroup3D, BlurParams, Mesh3DGroupKey, Mesh3DParams,
    Pass, PassList, SampleKind, Topology, UiParams, DEFAULT_MAX_BATCH_BYTES,
};
pub use pixel_format::PixelFormat;
pub use resources::{BufferAttributes, ResourceError, StorageKind, TextureAttributes};

pub use handle::{Handle, ResourceKind};
