use graphics_types::{
    Extent2D, GpuInfo, Handle, IRect, PassList, PixelFormat, PresentMode, StorageKind,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

/// A backend-internal id for a GPU resource (texture, buffer, or window
/// equipment). Opaque to the core, which only ever stores it alongside the public
/// [`graphics_types::Handle`] it backs.
pub type BackendResourceId = u64;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no suitable GPU device found")]
    NoSuitableDevice,
    #[error("device is out of memory")]
    OutOfMemory,
    #[error("invalid resource arguments: {0}")]
    InvalidArguments(String),
    #[error("surface creation failed: {0}")]
    SurfaceCreation(String),
    #[error("shader module creation failed: {0}")]
    ShaderModule(String),
    #[error("driver error: {0}")]
    Driver(String),
}

/// What the core requires of the windowing/input platform layer for one window:
/// a native window/display handle pair, the framebuffer size in physical pixels,
/// and a DPI scale. The platform layer is otherwise out of scope (spec.md §1).
pub trait WindowSurfaceTarget: HasWindowHandle + HasDisplayHandle {
    fn framebuffer_size(&self) -> Extent2D;
    fn dpi_scale(&self) -> f32;
}

/// Swapchain/drawable lifecycle state machine (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEquipState {
    Uninitialized,
    Ready,
    Rendering,
    Presenting,
    Recreating,
}

/// Result of [`Backend::window_begin_frame`]. A frame that fails to acquire an
/// image is `Skipped`: the caller must not record or submit anything for it, and
/// `window_submit`/`window_end_frame` become no-ops until the next
/// `window_begin_frame` succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBeginResult {
    Begun { image_index: u32 },
    Skipped,
}

/// Resolves the public [`Handle`]s a [`PassList`] references down to the
/// backend's own resource ids. Implemented by the core's resource registry and
/// handed to `Backend::window_submit` rather than baked into the trait, so the
/// registry itself (spec.md's "Resource registry" component) stays in the core.
pub trait ResourceResolver {
    fn resolve_texture(&self, handle: Handle) -> Option<BackendResourceId>;
    fn resolve_buffer(&self, handle: Handle) -> Option<BackendResourceId>;
}

/// The capability-set interface a concrete GPU backend implements. Exactly one
/// implementation is selected at construction (spec.md §9 "Cross-backend
/// dispatch") — this workspace ships a Vulkan implementation in
/// `graphics-backend`; Metal/GL/WebGPU implementations are additional crates
/// behind this same trait, not `cfg` branches inside it.
pub trait Backend {
    fn init(&mut self, present_mode: PresentMode) -> Result<(), BackendError>;
    fn shutdown(&mut self);

    /// The selected GPU's name/kind, available once a device has been chosen
    /// (lazily, at the first `window_equip`). `None` before then.
    fn gpu_info(&self) -> Option<GpuInfo>;

    fn texture_alloc(
        &mut self,
        kind: StorageKind,
        size: Extent2D,
        format: PixelFormat,
        data: Option<&[u8]>,
    ) -> Result<BackendResourceId, BackendError>;
    fn texture_release(&mut self, id: BackendResourceId);
    fn texture_fill_region(
        &mut self,
        id: BackendResourceId,
        subrect: IRect,
        data: &[u8],
    ) -> Result<(), BackendError>;

    fn buffer_alloc(
        &mut self,
        kind: StorageKind,
        size_bytes: u64,
        data: Option<&[u8]>,
    ) -> Result<BackendResourceId, BackendError>;
    fn buffer_release(&mut self, id: BackendResourceId);

    fn window_equip(
        &mut self,
        target: &dyn WindowSurfaceTarget,
    ) -> Result<BackendResourceId, BackendError>;
    fn window_unequip(&mut self, id: BackendResourceId);
    fn window_equip_state(&self, id: BackendResourceId) -> WindowEquipState;

    fn begin_frame(&mut self);
    fn end_frame(&mut self);

    fn window_begin_frame(&mut self, window: BackendResourceId) -> FrameBeginResult;
    fn window_submit(
        &mut self,
        window: BackendResourceId,
        passes: &PassList,
        resolver: &dyn ResourceResolver,
    ) -> Result<(), BackendError>;
    fn window_end_frame(&mut self, window: BackendResourceId);
}
