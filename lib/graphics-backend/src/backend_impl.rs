//! The Vulkan implementation of [`Backend`]: device/queue selection (lazily,
//! on first window equip, matching `Pipelines` being built lazily too),
//! resource allocation, and the three pass encoders (spec.md §4.4-4.6).

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use graphics_backend_traits::{
    Backend, BackendError, BackendResourceId, FrameBeginResult, ResourceResolver,
    WindowEquipState, WindowSurfaceTarget,
};
use graphics_types::{
    BatchGroup3D, BlurParams, Extent2D, Handle, IRect, Mesh3DParams, PassList, PixelFormat,
    PresentMode, StorageKind, UiParams,
};
use log::warn;

use crate::device::LogicalDevice;
use crate::instance::Instance;
use crate::phy_device::PhyDevice;
use crate::resources::{
    pixel_format_to_vk, transition_image_layout, GpuBuffer, GpuImage, Resource, ResourceTable,
    Texture,
};
use crate::window_equip::WindowEquip;

fn swizzle_cols(format: PixelFormat) -> [[f32; 4]; 4] {
    let flat = format.swizzle_matrix();
    let mut cols = [[0.0f32; 4]; 4];
    for (col, chunk) in cols.iter_mut().zip(flat.chunks_exact(4)) {
        col.copy_from_slice(chunk);
    }
    cols
}

fn vk_format_to_pixel_format(format: vk::Format) -> PixelFormat {
    match format {
        vk::Format::R8_UNORM => PixelFormat::R8,
        vk::Format::R8G8_UNORM => PixelFormat::RG8,
        vk::Format::R8G8B8A8_UNORM => PixelFormat::RGBA8,
        vk::Format::B8G8R8A8_UNORM => PixelFormat::BGRA8,
        vk::Format::R16_UNORM => PixelFormat::R16,
        vk::Format::R16G16B16A16_UNORM => PixelFormat::RGBA16,
        vk::Format::R32_SFLOAT => PixelFormat::R32F,
        _ => PixelFormat::RGBA8,
    }
}

/// Builds the UI vertex shader's push constant block: `mat3 xform; vec2
/// viewport_size;`. Each `mat3` column occupies a 16-byte (`vec4`-aligned)
/// slot per std430 matrix layout, so the block is 14 live floats padded out
/// to 16 to fill the pipeline's 64-byte push constant range. The third
/// column carries the affine translation (`(t.x, t.y, 1.0)`), matching the
/// shader's `pc.xform * vec3(world, 1.0)`.
fn affine2_to_push_constant(xform: glam::Affine2, viewport: vk::Extent2D) -> [f32; 16] {
    let m = xform.matrix2;
    let t = xform.translation;
    [
        m.x_axis.x, m.x_axis.y, 0.0, 0.0, // col0
        m.y_axis.x, m.y_axis.y, 0.0, 0.0, // col1
        t.x, t.y, 1.0, 0.0, // col2
        viewport.width as f32, viewport.height as f32, 0.0, 0.0, // viewport_size + pad
    ]
}

fn clip_to_scissor(clip: graphics_types::Rect, extent: vk::Extent2D) -> vk::Rect2D {
    let x = clip.min.x.max(0.0) as i32;
    let y = clip.min.y.max(0.0) as i32;
    let w = (clip.width().max(0.0) as u32).min(extent.width);
    let h = (clip.height().max(0.0) as u32).min(extent.height);
    vk::Rect2D {
        offset: vk::Offset2D { x, y },
        extent: vk::Extent2D {
            width: w,
            height: h,
        },
    }
}

struct DeviceState {
    instance: Arc<Instance>,
    device: Arc<LogicalDevice>,
}

/// Owns the lazily-created Vulkan instance/device, the resource table shared
/// by every window, and one [`WindowEquip`] per equipped window.
pub struct VulkanBackend {
    state: Option<DeviceState>,
    resources: ResourceTable,
    windows: HashMap<BackendResourceId, WindowEquip>,
    next_window_id: u64,
    present_mode: PresentMode,
    preferred_gpu: Option<String>,
    debug_verbose: bool,
}

impl VulkanBackend {
    pub fn new(preferred_gpu: Option<String>, debug_verbose: bool) -> Self {
        Self {
            state: None,
            resources: ResourceTable::new(),
            windows: HashMap::new(),
            next_window_id: 1,
            present_mode: PresentMode::default(),
            preferred_gpu,
            debug_verbose,
        }
    }

    fn device(&self) -> Result<&Arc<LogicalDevice>, BackendError> {
        self.state
            .as_ref()
            .map(|s| &s.device)
            .ok_or(BackendError::NoSuitableDevice)
    }

    /// Creates the surface for `target` against `instance`.
    fn create_surface(
        instance: &Instance,
        target: &dyn WindowSurfaceTarget,
    ) -> anyhow::Result<(ash::khr::surface::Instance, vk::SurfaceKHR)> {
        let display_handle = target
            .display_handle()
            .map_err(|err| anyhow::anyhow!("no display handle: {err}"))?
            .as_raw();
        let window_handle = target
            .window_handle()
            .map_err(|err| anyhow::anyhow!("no window handle: {err}"))?
            .as_raw();
        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.vk_instance,
                display_handle,
                window_handle,
                None,
            )
        }?;
        let surface_loader =
            ash::khr::surface::Instance::new(&instance.entry, &instance.vk_instance);
        Ok((surface_loader, surface))
    }

    fn upload_via_staging(
        device: &LogicalDevice,
        data: &[u8],
        record: impl FnOnce(vk::CommandBuffer, vk::Buffer),
    ) -> anyhow::Result<()> {
        let staging = GpuBuffer::new(
            device,
            data.len().max(1) as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write(data, 0);

        let cmd = device.allocate_command_buffer()?;
        unsafe {
            device.raw.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )
        }?;
        record(cmd, staging.raw);
        unsafe { device.raw.end_command_buffer(cmd) }?;

        let cmds = [cmd];
        let submit = vk::SubmitInfo::default().command_buffers(&cmds);
        unsafe {
            device
                .raw
                .queue_submit(device.queue, &[submit], vk::Fence::null())?;
            device.raw.queue_wait_idle(device.queue)?;
            device.raw.free_command_buffers(device.command_pool, &cmds);
        }
        staging.destroy(&device.raw);
        Ok(())
    }

    fn create_texture(
        device: &LogicalDevice,
        size: Extent2D,
        format: PixelFormat,
        data: Option<&[u8]>,
    ) -> anyhow::Result<Texture> {
        let vk_format = pixel_format_to_vk(format);
        let image = GpuImage::new(
            device,
            size,
            vk_format,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            vk::ImageAspectFlags::COLOR,
        )?;

        if let Some(bytes) = data {
            Self::upload_via_staging(device, bytes, |cmd, staging_buf| {
                transition_image_layout(
                    device,
                    cmd,
                    image.raw,
                    vk::ImageAspectFlags::COLOR,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );
                let region = vk::BufferImageCopy::default()
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_extent(vk::Extent3D {
                        width: size.width,
                        height: size.height,
                        depth: 1,
                    });
                unsafe {
                    device.raw.cmd_copy_buffer_to_image(
                        cmd,
                        staging_buf,
                        image.raw,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
                transition_image_layout(
                    device,
                    cmd,
                    image.raw,
                    vk::ImageAspectFlags::COLOR,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            })?;
        } else {
            let cmd = device.allocate_command_buffer()?;
            unsafe {
                device
                    .raw
                    .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())?;
            }
            transition_image_layout(
                device,
                cmd,
                image.raw,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
            unsafe {
                device.raw.end_command_buffer(cmd)?;
                let cmds = [cmd];
                let submit = vk::SubmitInfo::default().command_buffers(&cmds);
                device
                    .raw
                    .queue_submit(device.queue, &[submit], vk::Fence::null())?;
                device.raw.queue_wait_idle(device.queue)?;
                device.raw.free_command_buffers(device.command_pool, &cmds);
            }
        }

        Ok(Texture { image })
    }
}

impl Backend for VulkanBackend {
    fn init(&mut self, present_mode: PresentMode) -> Result<(), BackendError> {
        self.present_mode = present_mode;
        Ok(())
    }

    fn gpu_info(&self) -> Option<graphics_types::GpuInfo> {
        self.state.as_ref().map(|s| s.device.phy.info.clone())
    }

    fn shutdown(&mut self) {
        if let Some(state) = &self.state {
            state.device.wait_idle();
            for (_, mut equip) in self.windows.drain() {
                equip.destroy(&state.device);
            }
            for (_, resource) in self.resources.entries.drain() {
                match resource {
                    Resource::Texture(tex) => tex.destroy(&state.device.raw),
                    Resource::Buffer(buf) => buf.destroy(&state.device.raw),
                }
            }
        }
        self.state = None;
    }

    fn texture_alloc(
        &mut self,
        _kind: StorageKind,
        size: Extent2D,
        format: PixelFormat,
        data: Option<&[u8]>,
    ) -> Result<BackendResourceId, BackendError> {
        let device = self.device()?.clone();
        let texture = Self::create_texture(&device, size, format, data)
            .map_err(|err| BackendError::Driver(err.to_string()))?;
        Ok(self.resources.insert(Resource::Texture(texture)))
    }

    fn texture_release(&mut self, id: BackendResourceId) {
        if let Some(state) = self.state.as_ref() {
            if let Some(Resource::Texture(tex)) = self.resources.remove(id) {
                state.device.wait_idle();
                tex.destroy(&state.device.raw);
            }
        }
    }

    fn texture_fill_region(
        &mut self,
        id: BackendResourceId,
        subrect: IRect,
        data: &[u8],
    ) -> Result<(), BackendError> {
        let device = self.device()?.clone();
        let image = match self.resources.get(id) {
            Some(Resource::Texture(tex)) => tex.image.raw,
            _ => {
                return Err(BackendError::InvalidArguments(format!(
                    "no texture resource {id}"
                )))
            }
        };
        let width = subrect.width().max(0) as u32;
        let height = subrect.height().max(0) as u32;

        Self::upload_via_staging(&device, data, |cmd, staging_buf| {
            transition_image_layout(
                &device,
                cmd,
                image,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            let region = vk::BufferImageCopy::default()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_offset(vk::Offset3D {
                    x: subrect.min.0 as i32,
                    y: subrect.min.1 as i32,
                    z: 0,
                })
                .image_extent(vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                });
            unsafe {
                device.raw.cmd_copy_buffer_to_image(
                    cmd,
                    staging_buf,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            transition_image_layout(
                &device,
                cmd,
                image,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        })
        .map_err(|err| BackendError::Driver(err.to_string()))
    }

    fn buffer_alloc(
        &mut self,
        kind: StorageKind,
        size_bytes: u64,
        data: Option<&[u8]>,
    ) -> Result<BackendResourceId, BackendError> {
        let device = self.device()?.clone();
        let usage = vk::BufferUsageFlags::VERTEX_BUFFER
            | vk::BufferUsageFlags::INDEX_BUFFER
            | vk::BufferUsageFlags::TRANSFER_DST;

        let buffer = match kind {
            StorageKind::Dynamic => {
                let buf = GpuBuffer::new(
                    &device,
                    size_bytes,
                    usage,
                    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                )
                .map_err(|err| BackendError::Driver(err.to_string()))?;
                if let Some(bytes) = data {
                    buf.write(bytes, 0);
                }
                buf
            }
            StorageKind::Static => {
                let buf = GpuBuffer::new(
                    &device,
                    size_bytes,
                    usage,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL,
                )
                .map_err(|err| BackendError::Driver(err.to_string()))?;
                if let Some(bytes) = data {
                    Self::upload_via_staging(&device, bytes, |cmd, staging_buf| unsafe {
                        device.raw.cmd_copy_buffer(
                            cmd,
                            staging_buf,
                            buf.raw,
                            &[vk::BufferCopy::default().size(bytes.len() as u64)],
                        );
                    })
                    .map_err(|err| BackendError::Driver(err.to_string()))?;
                }
                buf
            }
        };

        Ok(self.resources.insert(Resource::Buffer(buffer)))
    }

    fn buffer_release(&mut self, id: BackendResourceId) {
        if let Some(state) = self.state.as_ref() {
            if let Some(Resource::Buffer(buf)) = self.resources.remove(id) {
                state.device.wait_idle();
                buf.destroy(&state.device.raw);
            }
        }
    }

    fn window_equip(
        &mut self,
        target: &dyn WindowSurfaceTarget,
    ) -> Result<BackendResourceId, BackendError> {
        if self.state.is_none() {
            let instance = Arc::new(
                Instance::new(target, self.debug_verbose)
                    .map_err(|err| BackendError::SurfaceCreation(err.to_string()))?,
            );
            let (surface_loader, surface) = Self::create_surface(&instance, target)
                .map_err(|err| BackendError::SurfaceCreation(err.to_string()))?;
            let phy = Arc::new(
                PhyDevice::select(
                    instance.clone(),
                    Some((&surface_loader, surface)),
                    self.preferred_gpu.as_deref(),
                )
                .map_err(|err| BackendError::Driver(err.to_string()))?,
            );
            let device =
                LogicalDevice::new(phy).map_err(|err| BackendError::Driver(err.to_string()))?;
            self.state = Some(DeviceState { instance, device });

            let equip = WindowEquip::new(
                &self.state.as_ref().unwrap().device,
                surface_loader,
                surface,
                target.framebuffer_size(),
                self.present_mode,
            )
            .map_err(|err| BackendError::Driver(err.to_string()))?;
            let id = self.next_window_id;
            self.next_window_id += 1;
            self.windows.insert(id, equip);
            return Ok(id);
        }

        let state = self.state.as_ref().unwrap();
        let (surface_loader, surface) = Self::create_surface(&state.instance, target)
            .map_err(|err| BackendError::SurfaceCreation(err.to_string()))?;
        let equip = WindowEquip::new(
            &state.device,
            surface_loader,
            surface,
            target.framebuffer_size(),
            self.present_mode,
        )
        .map_err(|err| BackendError::Driver(err.to_string()))?;
        let id = self.next_window_id;
        self.next_window_id += 1;
        self.windows.insert(id, equip);
        Ok(id)
    }

    fn window_unequip(&mut self, id: BackendResourceId) {
        if let Some(state) = self.state.as_ref() {
            if let Some(mut equip) = self.windows.remove(&id) {
                equip.destroy(&state.device);
            }
        }
    }

    fn window_equip_state(&self, id: BackendResourceId) -> WindowEquipState {
        self.windows
            .get(&id)
            .map(|e| e.state)
            .unwrap_or(WindowEquipState::Uninitialized)
    }

    fn begin_frame(&mut self) {}

    fn end_frame(&mut self) {}

    fn window_begin_frame(&mut self, window: BackendResourceId) -> FrameBeginResult {
        let Some(state) = self.state.as_ref() else {
            return FrameBeginResult::Skipped;
        };
        let Some(equip) = self.windows.get_mut(&window) else {
            return FrameBeginResult::Skipped;
        };
        let raw_device = &state.device.raw;
        let slot = &equip.frame_slots[equip.current_frame];

        unsafe {
            let _ = raw_device.wait_for_fences(&[slot.in_flight_fence], true, u64::MAX);
        }

        let acquire = unsafe {
            equip.swapchain.loader.acquire_next_image(
                equip.swapchain.raw,
                u64::MAX,
                slot.image_available,
                vk::Fence::null(),
            )
        };
        let image_index = match acquire {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    warn!("swapchain suboptimal at acquire, will recreate after present");
                }
                index
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                let extent = Extent2D {
                    width: equip.swapchain.extent.width,
                    height: equip.swapchain.extent.height,
                };
                let _ = equip.recreate(&state.device, extent);
                return FrameBeginResult::Skipped;
            }
            Err(err) => {
                warn!("vkAcquireNextImageKHR failed: {err}");
                return FrameBeginResult::Skipped;
            }
        };

        unsafe {
            let _ = raw_device.reset_fences(&[slot.in_flight_fence]);
        }
        if let Err(err) = equip.frame_slots[equip.current_frame].begin_frame(raw_device) {
            warn!("failed to reset per-frame descriptor pool: {err}");
            return FrameBeginResult::Skipped;
        }

        let cmd = equip.frame_slots[equip.current_frame].command_buffer;
        unsafe {
            let _ = raw_device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default());
        }

        equip.acquired_image_index = Some(image_index);
        equip.state = WindowEquipState::Rendering;
        FrameBeginResult::Begun { image_index }
    }

    fn window_submit(
        &mut self,
        window: BackendResourceId,
        passes: &PassList,
        resolver: &dyn ResourceResolver,
    ) -> Result<(), BackendError> {
        let device = self.device()?.clone();
        let equip = self
            .windows
            .get_mut(&window)
            .ok_or_else(|| BackendError::InvalidArguments(format!("no window {window}")))?;
        let Some(image_index) = equip.acquired_image_index else {
            return Ok(());
        };

        let mut encoder = PassEncoder {
            device: &device,
            resources: &self.resources,
            resolver,
            equip,
            image_index,
        };
        encoder
            .encode(passes)
            .map_err(|err| BackendError::Driver(err.to_string()))
    }

    fn window_end_frame(&mut self, window: BackendResourceId) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        let Some(equip) = self.windows.get_mut(&window) else {
            return;
        };
        let Some(image_index) = equip.acquired_image_index.take() else {
            return;
        };
        let raw_device = &state.device.raw;
        let slot = &equip.frame_slots[equip.current_frame];
        let cmd = slot.command_buffer;

        unsafe {
            let _ = raw_device.end_command_buffer(cmd);
        }

        let wait_semaphores = [slot.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [slot.render_finished];
        let cmds = [cmd];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&cmds)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            let _ = raw_device.queue_submit(state.device.queue, &[submit], slot.in_flight_fence);
        }

        let swapchains = [equip.swapchain.raw];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let present_result = unsafe {
            equip
                .swapchain
                .loader
                .queue_present(state.device.queue, &present_info)
        };
        let needs_recreate = match present_result {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(err) => {
                warn!("vkQueuePresentKHR failed: {err}");
                false
            }
        };
        if needs_recreate {
            let extent = Extent2D {
                width: equip.swapchain.extent.width,
                height: equip.swapchain.extent.height,
            };
            let _ = equip.recreate(&state.device, extent);
        }

        equip.current_frame = (equip.current_frame + 1) % equip.frame_slots.len();
        equip.state = WindowEquipState::Ready;
    }
}

/// Records one window's command buffer for a submitted [`PassList`]. Bundled
/// into a struct only so the pass-encoding methods can borrow `equip`
/// mutably (for per-frame-slot scratch state) alongside shared borrows of
/// `device`/`resources`/`resolver`.
struct PassEncoder<'a> {
    device: &'a LogicalDevice,
    resources: &'a ResourceTable,
    resolver: &'a dyn ResourceResolver,
    equip: &'a mut WindowEquip,
    image_index: u32,
}

impl PassEncoder<'_> {
    fn encode(&mut self, passes: &PassList) -> anyhow::Result<()> {
        let raw = &self.device.raw;
        let current_frame = self.equip.current_frame;
        let cmd = self.equip.frame_slots[current_frame].command_buffer;
        let extent = self.equip.swapchain.extent;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.equip.render_pass_for_begin(true))
            .framebuffer(self.equip.framebuffers[self.image_index as usize])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        let viewport = vk::Viewport::default()
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);
        let full_scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            raw.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            raw.cmd_set_viewport(cmd, 0, &[viewport]);
            raw.cmd_set_scissor(cmd, 0, &[full_scissor]);
        }

        for pass in passes.iter() {
            match pass {
                graphics_types::Pass::Ui(params) => self.encode_ui(cmd, params)?,
                graphics_types::Pass::Blur(params) => self.encode_blur(cmd, params)?,
                graphics_types::Pass::Mesh3D(params) => self.encode_mesh3d(cmd, params)?,
            }
        }

        unsafe {
            raw.cmd_end_render_pass(cmd);
        }
        Ok(())
    }

    fn resolve_texture(&self, handle: Handle) -> anyhow::Result<(vk::ImageView, PixelFormat)> {
        let id = self
            .resolver
            .resolve_texture(handle)
            .ok_or_else(|| anyhow::anyhow!("unresolved texture handle"))?;
        match self.resources.get(id) {
            Some(Resource::Texture(tex)) => {
                Ok((tex.image.view, vk_format_to_pixel_format(tex.image.format)))
            }
            _ => Err(anyhow::anyhow!("resolved texture id {id} is not a texture")),
        }
    }

    /// Picks the nearest or linear sampler per the group's sample kind,
    /// except `force_nearest` (the "is font texture" instance flag) always
    /// wins regardless of the group's own setting (spec.md §4.4).
    fn pick_sampler(&self, sample_kind: graphics_types::SampleKind, force_nearest: bool) -> vk::Sampler {
        if force_nearest || sample_kind == graphics_types::SampleKind::Nearest {
            self.equip.nearest_sampler
        } else {
            self.equip.linear_sampler
        }
    }

    fn resolve_buffer(&self, handle: Handle) -> anyhow::Result<&GpuBuffer> {
        let id = self
            .resolver
            .resolve_buffer(handle)
            .ok_or_else(|| anyhow::anyhow!("unresolved buffer handle"))?;
        match self.resources.get(id) {
            Some(Resource::Buffer(buf)) => Ok(buf),
            _ => Err(anyhow::anyhow!("resolved buffer id {id} is not a buffer")),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn bind_texture(
        &mut self,
        cmd: vk::CommandBuffer,
        pipeline_layout: vk::PipelineLayout,
        set_index: u32,
        texture: Handle,
        sampler: vk::Sampler,
        opacity: f32,
    ) -> anyhow::Result<()> {
        let (image_view, format) = self.resolve_texture(texture)?;
        let swizzle = swizzle_cols(format);
        let set_layout = self.equip.descriptor_layouts.per_draw_texture;
        let current_frame = self.equip.current_frame;
        let set = self.equip.frame_slots[current_frame].write_draw_set(
            self.device,
            set_layout,
            image_view,
            sampler,
            &swizzle,
            opacity,
        )?;
        unsafe {
            self.device.raw.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline_layout,
                set_index,
                &[set],
                &[],
            );
        }
        Ok(())
    }

    fn encode_ui(&mut self, cmd: vk::CommandBuffer, params: &UiParams) -> anyhow::Result<()> {
        let raw = &self.device.raw;
        let extent = self.equip.swapchain.extent;
        let pipeline_raw = self.equip.pipelines.ui.raw;
        let pipeline_layout = self.equip.pipelines.ui.layout;
        let current_frame = self.equip.current_frame;

        unsafe {
            raw.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline_raw);
        }

        for group in params.groups.iter() {
            let scissor = clip_to_scissor(group.clip, extent);
            unsafe {
                raw.cmd_set_scissor(cmd, 0, &[scissor]);
            }
            let force_nearest = group
                .batches
                .iter()
                .find_map(|b| b.instances.first())
                .is_some_and(|inst| inst.is_font_texture());
            let sampler = self.pick_sampler(group.sample_kind, force_nearest);
            self.bind_texture(cmd, pipeline_layout, 0, group.texture, sampler, group.transparency)?;

            let push = affine2_to_push_constant(group.xform, extent);
            unsafe {
                raw.cmd_push_constants(
                    cmd,
                    pipeline_layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(&push),
                );
            }

            for batch in group.batches.iter() {
                if batch.instances.is_empty() {
                    continue;
                }
                let slot = &mut self.equip.frame_slots[current_frame];
                let bytes = bytemuck::cast_slice(batch.instances);
                slot.transient_buffer
                    .ensure_capacity(self.device, bytes.len() as u64)?;
                let offset = slot.transient_buffer.push(bytes);
                let buffers = [slot.transient_buffer.buffer.raw];
                let offsets = [offset];
                unsafe {
                    raw.cmd_bind_vertex_buffers(cmd, 0, &buffers, &offsets);
                    raw.cmd_draw(cmd, 4, batch.instances.len() as u32, 0, 0);
                }
            }
        }
        Ok(())
    }

    /// Copies the current swapchain color image into the blur scratch image
    /// outside any active render pass, so the blur fragment shader samples
    /// untouched content rather than the attachment it is about to overwrite.
    fn refresh_blur_scratch(&self, cmd: vk::CommandBuffer) -> anyhow::Result<()> {
        let extent = self.equip.swapchain.extent;
        let color_image = self.equip.swapchain.images[self.image_index as usize];
        let Some(scratch) = self.equip.blur_scratch.as_ref() else {
            return Ok(());
        };

        transition_image_layout(
            self.device,
            cmd,
            color_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        transition_image_layout(
            self.device,
            cmd,
            scratch.raw,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        let region = vk::ImageCopy::default()
            .src_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .dst_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });
        unsafe {
            self.device.raw.cmd_copy_image(
                cmd,
                color_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                scratch.raw,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        transition_image_layout(
            self.device,
            cmd,
            color_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        transition_image_layout(
            self.device,
            cmd,
            scratch.raw,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        Ok(())
    }

    fn encode_blur(&mut self, cmd: vk::CommandBuffer, params: &BlurParams) -> anyhow::Result<()> {
        let raw = &self.device.raw;
        let extent = self.equip.swapchain.extent;
        if self.equip.blur_scratch.is_none() {
            return Ok(());
        }

        unsafe {
            raw.cmd_end_render_pass(cmd);
        }
        self.refresh_blur_scratch(cmd)?;
        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.equip.render_pass_for_begin(false))
            .framebuffer(self.equip.framebuffers[self.image_index as usize])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&[]);
        unsafe {
            raw.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            raw.cmd_set_viewport(
                cmd,
                0,
                &[vk::Viewport::default()
                    .width(extent.width as f32)
                    .height(extent.height as f32)
                    .max_depth(1.0)],
            );
        }

        let pipeline_raw = self.equip.pipelines.blur.raw;
        let pipeline_layout = self.equip.pipelines.blur.layout;
        let scissor = clip_to_scissor(params.clip, extent);
        let current_frame = self.equip.current_frame;

        unsafe {
            raw.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline_raw);
            raw.cmd_set_scissor(cmd, 0, &[scissor]);
        }

        let scratch = self.equip.blur_scratch.as_ref().unwrap();
        let view = scratch.view;
        let sampler = self.equip.blur_sampler;
        let identity = swizzle_cols(PixelFormat::RGBA8);
        let set_layout = self.equip.descriptor_layouts.per_draw_texture;
        let set = self.equip.frame_slots[current_frame].write_draw_set(
            self.device,
            set_layout,
            view,
            sampler,
            &identity,
            1.0,
        )?;
        unsafe {
            raw.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline_layout,
                0,
                &[set],
                &[],
            );
        }

        let texel_size = [
            1.0 / extent.width.max(1) as f32,
            1.0 / extent.height.max(1) as f32,
        ];
        let mut push = [0u8; 12];
        push[0..8].copy_from_slice(bytemuck::bytes_of(&texel_size));
        push[8..12].copy_from_slice(&params.radius_px.to_ne_bytes());
        unsafe {
            raw.cmd_push_constants(cmd, pipeline_layout, vk::ShaderStageFlags::FRAGMENT, 0, &push);
            raw.cmd_draw(cmd, 3, 1, 0, 0);
        }
        Ok(())
    }

    fn encode_mesh3d(&mut self, cmd: vk::CommandBuffer, params: &Mesh3DParams) -> anyhow::Result<()> {
        let raw = &self.device.raw;
        let extent = self.equip.swapchain.extent;
        let pipeline_raw = self.equip.pipelines.mesh3d.raw;
        let pipeline_layout = self.equip.pipelines.mesh3d.layout;
        let current_frame = self.equip.current_frame;

        let view_proj = params.projection * params.view;
        let camera_offset = self.equip.frame_slots[current_frame]
            .push_camera_uniform(&view_proj.to_cols_array_2d());
        let camera_set = self.equip.frame_slots[current_frame].camera_descriptor_set;

        unsafe {
            raw.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline_raw);
            raw.cmd_set_scissor(cmd, 0, &[clip_to_scissor(params.clip, extent)]);
            raw.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline_layout,
                0,
                &[camera_set],
                &[camera_offset as u32],
            );
        }

        for group in params.groups.values() {
            self.encode_mesh3d_group(cmd, pipeline_layout, group)?;
        }
        Ok(())
    }

    fn encode_mesh3d_group(
        &mut self,
        cmd: vk::CommandBuffer,
        pipeline_layout: vk::PipelineLayout,
        group: &BatchGroup3D,
    ) -> anyhow::Result<()> {
        let raw = &self.device.raw;
        let sampler = self.pick_sampler(group.sample_kind, false);
        self.bind_texture(cmd, pipeline_layout, 1, group.albedo_texture, sampler, 1.0)?;

        let vertex_buffer = self.resolve_buffer(group.vertex_buffer)?.raw;
        let index_buffer_resource = self.resolve_buffer(group.index_buffer)?;
        let index_buffer = index_buffer_resource.raw;
        // Index buffers always hold u32 indices (the batching model carries
        // no separate index-count field alongside the handle).
        let index_count = (index_buffer_resource.size / 4) as u32;
        let current_frame = self.equip.current_frame;

        for batch in group.batches.iter() {
            if batch.instances.is_empty() {
                continue;
            }
            let slot = &mut self.equip.frame_slots[current_frame];
            let bytes = bytemuck::cast_slice(batch.instances);
            slot.transient_buffer
                .ensure_capacity(self.device, bytes.len() as u64)?;
            let instance_offset = slot.transient_buffer.push(bytes);

            let buffers = [vertex_buffer, slot.transient_buffer.buffer.raw];
            let offsets = [0u64, instance_offset];
            unsafe {
                raw.cmd_bind_vertex_buffers(cmd, 0, &buffers, &offsets);
                raw.cmd_bind_index_buffer(cmd, index_buffer, 0, vk::IndexType::UINT32);
                raw.cmd_draw_indexed(cmd, index_count, batch.instances.len() as u32, 0, 0, 0);
            }
        }
        Ok(())
    }
}
