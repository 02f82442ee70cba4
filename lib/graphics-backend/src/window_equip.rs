use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use graphics_backend_traits::WindowEquipState;
use graphics_types::{Extent2D, PresentMode};

use crate::device::LogicalDevice;
use crate::instance_pool::{FrameSlot, FRAMES_IN_FLIGHT};
use crate::pipelines::{DescriptorLayouts, Pipelines};
use crate::resources::{create_sampler, GpuImage};
use crate::swapchain::Swapchain;

const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// One equipped window: its surface, swapchain, render pass, per-image
/// framebuffers, and the double-buffered frame slots that back it
/// (spec.md §4.3 "Window equipment", §4.7 lifecycle).
pub struct WindowEquip {
    pub surface_loader: ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub swapchain: Swapchain,
    pub render_pass: vk::RenderPass,
    /// Same attachments as `render_pass` but with `LOAD_OP::LOAD` on both the
    /// color and depth attachments, for re-entering the render pass later in
    /// the frame (the blur pass ends it to refresh its scratch copy) without
    /// clearing work already drawn.
    pub render_pass_reload: vk::RenderPass,
    pub depth_image: GpuImage,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub frame_slots: Vec<FrameSlot>,
    pub current_frame: usize,
    pub state: WindowEquipState,
    pub present_mode_preference: PresentMode,
    pub pipelines: Pipelines,
    pub descriptor_layouts: DescriptorLayouts,
    pub acquired_image_index: Option<u32>,
    /// Scratch copy of the color attachment the blur pass reads from while it
    /// writes back into the same framebuffer (spec.md §4.5). Sized to the
    /// swapchain extent and recreated alongside it.
    pub blur_scratch: Option<GpuImage>,
    pub blur_sampler: vk::Sampler,
    pub nearest_sampler: vk::Sampler,
    pub linear_sampler: vk::Sampler,
}

impl WindowEquip {
    pub fn new(
        device: &Arc<LogicalDevice>,
        surface_loader: ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        framebuffer_size: Extent2D,
        present_mode_preference: PresentMode,
    ) -> anyhow::Result<Self> {
        let swapchain = Swapchain::new(
            device,
            &surface_loader,
            surface,
            framebuffer_size,
            present_mode_preference,
            vk::SwapchainKHR::null(),
        )?;
        device.phy.probe_surface_capabilities(swapchain.format);

        let render_pass = Self::create_render_pass(device, swapchain.format, vk::AttachmentLoadOp::CLEAR)?;
        let render_pass_reload = Self::create_render_pass(device, swapchain.format, vk::AttachmentLoadOp::LOAD)?;
        let depth_image = GpuImage::new(
            device,
            Extent2D {
                width: swapchain.extent.width,
                height: swapchain.extent.height,
            },
            DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?;
        let framebuffers =
            Self::create_framebuffers(device, render_pass, &swapchain, depth_image.view)?;

        let descriptor_layouts = DescriptorLayouts::new(device)?;
        let pipelines = Pipelines::new(device, render_pass, &descriptor_layouts)?;

        let mut frame_slots = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for _ in 0..FRAMES_IN_FLIGHT {
            frame_slots.push(FrameSlot::new(device, &descriptor_layouts)?);
        }

        let blur_sampler = create_sampler(device, vk::Filter::LINEAR)?;
        let nearest_sampler = create_sampler(device, vk::Filter::NEAREST)?;
        let linear_sampler = create_sampler(device, vk::Filter::LINEAR)?;
        let blur_scratch = Some(Self::create_blur_scratch(device, &swapchain)?);

        Ok(Self {
            surface_loader,
            surface,
            swapchain,
            render_pass,
            render_pass_reload,
            depth_image,
            framebuffers,
            frame_slots,
            current_frame: 0,
            state: WindowEquipState::Ready,
            present_mode_preference,
            pipelines,
            descriptor_layouts,
            acquired_image_index: None,
            blur_scratch,
            blur_sampler,
            nearest_sampler,
            linear_sampler,
        })
    }

    fn create_blur_scratch(device: &LogicalDevice, swapchain: &Swapchain) -> anyhow::Result<GpuImage> {
        GpuImage::new(
            device,
            Extent2D {
                width: swapchain.extent.width,
                height: swapchain.extent.height,
            },
            swapchain.format,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        )
    }

    fn create_render_pass(
        device: &LogicalDevice,
        color_format: vk::Format,
        load_op: vk::AttachmentLoadOp,
    ) -> anyhow::Result<vk::RenderPass> {
        let initial_layout = if load_op == vk::AttachmentLoadOp::LOAD {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::UNDEFINED
        };
        let depth_initial_layout = if load_op == vk::AttachmentLoadOp::LOAD {
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::UNDEFINED
        };
        let attachments = [
            vk::AttachmentDescription::default()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(load_op)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(initial_layout)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            vk::AttachmentDescription::default()
                .format(DEPTH_FORMAT)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(load_op)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(depth_initial_layout)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        ];
        let color_ref = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let depth_ref = vk::AttachmentReference::default()
            .attachment(1)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_ref)
            .depth_stencil_attachment(&depth_ref);
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );
        let subpasses = [subpass];
        let dependencies = [dependency];
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        unsafe { device.raw.create_render_pass(&info, None) }
            .map_err(|err| anyhow!("vkCreateRenderPass failed: {err}"))
    }

    fn create_framebuffers(
        device: &LogicalDevice,
        render_pass: vk::RenderPass,
        swapchain: &Swapchain,
        depth_view: vk::ImageView,
    ) -> anyhow::Result<Vec<vk::Framebuffer>> {
        swapchain
            .image_views
            .iter()
            .map(|view| {
                let attachments = [*view, depth_view];
                let info = vk::FramebufferCreateInfo::default()
                    .render_pass(render_pass)
                    .attachments(&attachments)
                    .width(swapchain.extent.width)
                    .height(swapchain.extent.height)
                    .layers(1);
                unsafe { device.raw.create_framebuffer(&info, None) }
                    .map_err(|err| anyhow!("vkCreateFramebuffer failed: {err}"))
            })
            .collect()
    }

    /// Tears down and rebuilds the swapchain, depth image, and framebuffers in
    /// place, preserving the render pass, pipelines, and frame slots
    /// (spec.md §4.7 "swapchain recreation on out-of-date/suboptimal").
    pub fn recreate(
        &mut self,
        device: &Arc<LogicalDevice>,
        framebuffer_size: Extent2D,
    ) -> anyhow::Result<()> {
        self.state = WindowEquipState::Recreating;
        device.wait_idle();

        for fb in self.framebuffers.drain(..) {
            unsafe { device.raw.destroy_framebuffer(fb, None) };
        }
        self.depth_image.destroy(&device.raw);

        let old_swapchain_raw = self.swapchain.raw;
        let new_swapchain = Swapchain::new(
            device,
            &self.surface_loader,
            self.surface,
            framebuffer_size,
            self.present_mode_preference,
            old_swapchain_raw,
        )?;
        let old_swapchain = std::mem::replace(&mut self.swapchain, new_swapchain);
        old_swapchain.destroy(&device.raw);

        self.depth_image = GpuImage::new(
            device,
            Extent2D {
                width: self.swapchain.extent.width,
                height: self.swapchain.extent.height,
            },
            DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?;
        self.framebuffers = Self::create_framebuffers(
            device,
            self.render_pass,
            &self.swapchain,
            self.depth_image.view,
        )?;

        if let Some(scratch) = self.blur_scratch.take() {
            scratch.destroy(&device.raw);
        }
        self.blur_scratch = Some(Self::create_blur_scratch(device, &self.swapchain)?);

        self.state = WindowEquipState::Ready;
        Ok(())
    }

    /// Begins `render_pass` if this is the first render-pass-begin in the
    /// frame (clearing all attachments), or `render_pass_reload` otherwise
    /// (preserving content already drawn this frame).
    pub fn render_pass_for_begin(&self, is_first_in_frame: bool) -> vk::RenderPass {
        if is_first_in_frame {
            self.render_pass
        } else {
            self.render_pass_reload
        }
    }

    pub fn destroy(&mut self, device: &LogicalDevice) {
        device.wait_idle();
        for fb in &self.framebuffers {
            unsafe { device.raw.destroy_framebuffer(*fb, None) };
        }
        for slot in &self.frame_slots {
            slot.destroy(&device.raw);
        }
        if let Some(scratch) = self.blur_scratch.take() {
            scratch.destroy(&device.raw);
        }
        unsafe {
            device.raw.destroy_sampler(self.blur_sampler, None);
            device.raw.destroy_sampler(self.nearest_sampler, None);
            device.raw.destroy_sampler(self.linear_sampler, None);
        }
        self.depth_image.destroy(&device.raw);
        self.pipelines.destroy(&device.raw);
        self.descriptor_layouts.destroy(&device.raw);
        self.swapchain.destroy(&device.raw);
        unsafe {
            device.raw.destroy_render_pass(self.render_pass_reload, None);
            device.raw.destroy_render_pass(self.render_pass, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
