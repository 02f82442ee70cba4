//! Public entry point of the rendering runtime core: a single [`Renderer`]
//! that owns the resource registries (spec.md §4.2), dispatches to a
//! `Box<dyn Backend>` (spec.md §9 "Cross-backend dispatch"), and wires the
//! font run cache (spec.md §4.9) to that same texture registry.
//!
//! There is no CLI, no persisted state, and no environment variable read by
//! this crate (spec.md §6) — `RendererConfig` is the only input, constructed
//! and passed in by the caller.

use graphics_backend::VulkanBackend;
use graphics_backend_traits::{
    Backend, BackendError, BackendResourceId, FrameBeginResult, ResourceResolver,
    WindowEquipState, WindowSurfaceTarget,
};
use graphics_types::{
    BufferAttributes, Extent2D, GpuInfo, Handle, IRect, PassList, PixelFormat, RendererConfig,
    ResourceError, ResourceKind, StorageKind, TextureAttributes,
};
use handle::Registry;
use log::warn;
use thiserror::Error;

pub use font_atlas::{FontCache, FontTag, GlyphRasterSource, RasterFlags, Run, TextureAllocator};
pub use graphics_backend_traits::WindowSurfaceTarget as SurfaceTarget;
pub use graphics_types::PresentMode;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("handle does not refer to a live resource of the expected kind")]
    InvalidHandle,
}

struct TextureEntry {
    backend_id: BackendResourceId,
    attrs: TextureAttributes,
}

struct BufferEntry {
    backend_id: BackendResourceId,
    attrs: BufferAttributes,
}

/// Owns every GPU resource the core hands out a [`Handle`] for, dispatches
/// frame/pass submission to a concrete [`Backend`], and runs the font run
/// cache against that same texture registry (spec.md §2 components).
pub struct Renderer {
    backend: Box<dyn Backend>,
    textures: Registry<TextureEntry>,
    buffers: Registry<BufferEntry>,
    windows: Registry<BackendResourceId>,
    font_cache: FontCache,
}

impl Renderer {
    /// Creates the device, queues, command pools, and descriptor pool
    /// (spec.md §6 `renderer_init`). Pipelines are built lazily at the first
    /// `window_equip`, since they need a render pass to exist against.
    pub fn renderer_init(config: RendererConfig) -> Result<Self, RendererError> {
        let mut backend: Box<dyn Backend> =
            Box::new(VulkanBackend::new(config.preferred_gpu.clone(), config.debug_verbose));
        backend.init(config.present_mode)?;
        Ok(Self {
            backend,
            textures: Registry::new(ResourceKind::Texture),
            buffers: Registry::new(ResourceKind::Buffer),
            windows: Registry::new(ResourceKind::WindowEquipment),
            font_cache: FontCache::new(),
        })
    }

    /// Device-wait-idle then destroy in reverse order (spec.md §6
    /// `renderer_shutdown`).
    pub fn renderer_shutdown(&mut self) {
        self.backend.shutdown();
    }

    /// The GPU selected at the first `window_equip`; `None` before any window
    /// has been equipped (SPEC_FULL §3 "GPU enumeration and vendor
    /// identification").
    pub fn gpu_info(&self) -> Option<GpuInfo> {
        self.backend.gpu_info()
    }

    /// Creates surface, swapchain, render pass, framebuffers, and per-frame
    /// state for `target`. Returns the zero handle on failure (spec.md §6,
    /// §7 "resource-creation errors return the zero handle").
    pub fn window_equip(&mut self, target: &dyn WindowSurfaceTarget) -> Handle {
        match self.backend.window_equip(target) {
            Ok(id) => self.windows.insert(id),
            Err(err) => {
                warn!("window_equip failed: {err}");
                Handle::zero()
            }
        }
    }

    /// Device-wait-idle then destroy everything `window_equip` created for
    /// this window.
    pub fn window_unequip(&mut self, window: Handle) {
        if let Some(id) = self.windows.remove(window) {
            self.backend.window_unequip(id);
        }
    }

    pub fn window_equip_state(&self, window: Handle) -> WindowEquipState {
        match self.windows.get(window) {
            Some(id) => self.backend.window_equip_state(*id),
            None => WindowEquipState::Uninitialized,
        }
    }

    pub fn texture_alloc(
        &mut self,
        kind: StorageKind,
        size: Extent2D,
        format: PixelFormat,
        data: Option<&[u8]>,
    ) -> Handle {
        match self.backend.texture_alloc(kind, size, format, data) {
            Ok(backend_id) => self.textures.insert(TextureEntry {
                backend_id,
                attrs: TextureAttributes { size, format, kind },
            }),
            Err(err) => {
                warn!("texture_alloc failed: {err}");
                Handle::zero()
            }
        }
    }

    pub fn texture_release(&mut self, texture: Handle) {
        if let Some(entry) = self.textures.remove(texture) {
            self.backend.texture_release(entry.backend_id);
        }
    }

    pub fn texture_kind(&self, texture: Handle) -> Option<StorageKind> {
        self.textures.get(texture).map(|e| e.attrs.kind)
    }

    pub fn texture_size(&self, texture: Handle) -> Option<Extent2D> {
        self.textures.get(texture).map(|e| e.attrs.size)
    }

    pub fn texture_format(&self, texture: Handle) -> Option<PixelFormat> {
        self.textures.get(texture).map(|e| e.attrs.format)
    }

    /// Refills part of a `Dynamic` texture in place (spec.md §6
    /// `texture_fill_region`). Rejects `Static` textures, out-of-bounds
    /// subrects, and length-mismatched data before touching the backend
    /// (spec.md §7 "resource-creation errors").
    pub fn texture_fill_region(
        &mut self,
        texture: Handle,
        subrect: IRect,
        data: &[u8],
    ) -> Result<(), RendererError> {
        let entry = self.textures.get(texture).ok_or(RendererError::InvalidHandle)?;
        if entry.attrs.kind != StorageKind::Dynamic {
            return Err(ResourceError::StaticTextureRefill.into());
        }
        let full = IRect {
            min: (0, 0),
            max: (entry.attrs.size.width as i16, entry.attrs.size.height as i16),
        };
        if subrect.min.0 < full.min.0
            || subrect.min.1 < full.min.1
            || subrect.max.0 > full.max.0
            || subrect.max.1 > full.max.1
        {
            return Err(ResourceError::RegionOutOfBounds(subrect, entry.attrs.size).into());
        }
        let expected = entry.attrs.format.bytes_per_pixel()
            * subrect.width().max(0) as usize
            * subrect.height().max(0) as usize;
        if data.len() != expected {
            return Err(ResourceError::DataLengthMismatch {
                got: data.len(),
                expected,
            }
            .into());
        }

        let backend_id = entry.backend_id;
        self.backend
            .texture_fill_region(backend_id, subrect, data)
            .map_err(RendererError::from)
    }

    pub fn buffer_alloc(&mut self, kind: StorageKind, size_bytes: u64, data: Option<&[u8]>) -> Handle {
        match self.backend.buffer_alloc(kind, size_bytes, data) {
            Ok(backend_id) => self.buffers.insert(BufferEntry {
                backend_id,
                attrs: BufferAttributes { size_bytes, kind },
            }),
            Err(err) => {
                warn!("buffer_alloc failed: {err}");
                Handle::zero()
            }
        }
    }

    pub fn buffer_release(&mut self, buffer: Handle) {
        if let Some(entry) = self.buffers.remove(buffer) {
            self.backend.buffer_release(entry.backend_id);
        }
    }

    pub fn buffer_attributes(&self, buffer: Handle) -> Option<BufferAttributes> {
        self.buffers.get(buffer).map(|e| e.attrs)
    }

    /// Global per-frame hook, called once before any `window_begin_frame`
    /// (spec.md §6). Also advances the font cache's per-frame scratch arena.
    pub fn begin_frame(&mut self) {
        self.backend.begin_frame();
    }

    /// Global per-frame hook, called once after every window's
    /// `window_end_frame` (spec.md §6).
    pub fn end_frame(&mut self) {
        self.backend.end_frame();
        self.font_cache.end_frame();
    }

    /// Acquires the next swapchain image for `window`. A `Skipped` result
    /// means the caller must not call `window_submit`/`window_end_frame` for
    /// this window this frame (spec.md §4.7, §7 "per-frame recoverable").
    pub fn window_begin_frame(&mut self, window: Handle) -> FrameBeginResult {
        match self.windows.get(window) {
            Some(id) => self.backend.window_begin_frame(*id),
            None => FrameBeginResult::Skipped,
        }
    }

    /// Records and/or submits `passes` for `window` (spec.md §4.3-4.6).
    pub fn window_submit(&mut self, window: Handle, passes: &PassList) -> Result<(), RendererError> {
        let Some(id) = self.windows.get(window).copied() else {
            return Ok(());
        };
        let resolver = RegistryResolver {
            textures: &self.textures,
            buffers: &self.buffers,
        };
        self.backend
            .window_submit(id, passes, &resolver)
            .map_err(RendererError::from)
    }

    pub fn window_end_frame(&mut self, window: Handle) {
        if let Some(id) = self.windows.get(window) {
            self.backend.window_end_frame(*id);
        }
    }

    pub fn font_cache(&self) -> &FontCache {
        &self.font_cache
    }

    pub fn font_cache_mut(&mut self) -> &mut FontCache {
        &mut self.font_cache
    }
}

/// Bridges the registries to [`ResourceResolver`] without borrowing `self`
/// mutably, since `window_submit` only needs read access to look handles up.
struct RegistryResolver<'a> {
    textures: &'a Registry<TextureEntry>,
    buffers: &'a Registry<BufferEntry>,
}

impl ResourceResolver for RegistryResolver<'_> {
    fn resolve_texture(&self, handle: Handle) -> Option<BackendResourceId> {
        self.textures.get(handle).map(|e| e.backend_id)
    }

    fn resolve_buffer(&self, handle: Handle) -> Option<BackendResourceId> {
        self.buffers.get(handle).map(|e| e.backend_id)
    }
}

impl TextureAllocator for Renderer {
    /// Uploads a rasterized glyph run as a `Static` RGBA8 texture (spec.md
    /// §4.9: "allocate a new GPU texture, one per run").
    fn alloc_rgba(&mut self, size: (u16, u16), data: &[u8]) -> Handle {
        self.texture_alloc(
            StorageKind::Static,
            Extent2D::new(size.0 as u32, size.1 as u32),
            PixelFormat::RGBA8,
            Some(data),
        )
    }
}

/// Convenience wrapper bundling a [`Renderer`] with the resident white
/// 1x1 texture `renderer_init` is specified to create (spec.md §6), since
/// every backend needs exactly one and callers otherwise have to remember to
/// allocate it themselves.
pub struct RendererHandles {
    pub renderer: Renderer,
    pub white_texture: Handle,
}

impl RendererHandles {
    pub fn new(config: RendererConfig) -> Result<Self, RendererError> {
        let mut renderer = Renderer::renderer_init(config)?;
        let white_texture = renderer.texture_alloc(
            StorageKind::Static,
            Extent2D::new(1, 1),
            PixelFormat::RGBA8,
            Some(&[255, 255, 255, 255]),
        );
        Ok(Self {
            renderer,
            white_texture,
        })
    }
}
