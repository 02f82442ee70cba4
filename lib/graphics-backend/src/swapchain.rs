use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use graphics_types::{Extent2D, PresentMode};
use log::{info, warn};

use crate::device::LogicalDevice;

/// Present-mode fallback chain (SPEC_FULL.md "present-mode fallback chain"):
/// each preference degrades to the next entry that the surface actually
/// supports, ending in FIFO which every conformant driver must expose.
fn present_mode_chain(preferred: PresentMode) -> &'static [vk::PresentModeKHR] {
    match preferred {
        PresentMode::Immediate => &[
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ],
        PresentMode::Mailbox => &[
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ],
        PresentMode::VSync => &[
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::FIFO_RELAXED,
        ],
    }
}

fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: PresentMode,
) -> vk::PresentModeKHR {
    for candidate in present_mode_chain(preferred) {
        if available.contains(candidate) {
            return *candidate;
        }
    }
    warn!("none of the preferred present modes were available, falling back to FIFO");
    vk::PresentModeKHR::FIFO
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    if formats.len() == 1 && formats[0].format == vk::Format::UNDEFINED {
        return vk::SurfaceFormatKHR::default()
            .format(vk::Format::B8G8R8A8_UNORM)
            .color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }
    formats
        .iter()
        .find(|f| {
            f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
                && (f.format == vk::Format::B8G8R8A8_UNORM || f.format == vk::Format::R8G8B8A8_UNORM)
        })
        .copied()
        .unwrap_or(formats[0])
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, framebuffer_size: Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: framebuffer_size.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: framebuffer_size.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// An owned swapchain plus the per-image views the window equipment's
/// framebuffers are built from. Recreated wholesale on resize or
/// `VK_ERROR_OUT_OF_DATE_KHR` / `VK_SUBOPTIMAL_KHR` (spec.md §4.7).
pub struct Swapchain {
    pub loader: ash::khr::swapchain::Device,
    pub raw: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    pub fn new(
        device: &Arc<LogicalDevice>,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        framebuffer_size: Extent2D,
        preferred_present_mode: PresentMode,
        old_swapchain: vk::SwapchainKHR,
    ) -> anyhow::Result<Self> {
        let phy_raw = device.phy.raw;

        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(phy_raw, surface)
        }
        .map_err(|err| anyhow!("vkGetPhysicalDeviceSurfaceCapabilitiesKHR failed: {err}"))?;
        let formats = unsafe { surface_loader.get_physical_device_surface_formats(phy_raw, surface) }
            .map_err(|err| anyhow!("vkGetPhysicalDeviceSurfaceFormatsKHR failed: {err}"))?;
        let present_modes =
            unsafe { surface_loader.get_physical_device_surface_present_modes(phy_raw, surface) }
                .map_err(|err| anyhow!("vkGetPhysicalDeviceSurfacePresentModesKHR failed: {err}"))?;

        let surface_format = choose_surface_format(&formats);
        let present_mode = choose_present_mode(&present_modes, preferred_present_mode);
        let extent = choose_extent(&capabilities, framebuffer_size);

        let mut image_count = capabilities.min_image_count + 1;
        if capabilities.max_image_count != 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let pre_transform = if capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            capabilities.current_transform
        };

        info!(
            "swapchain: {}x{} format={:?} present_mode={:?} images={}",
            extent.width, extent.height, surface_format.format, present_mode, image_count
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let loader = ash::khr::swapchain::Device::new(&device.phy.instance.vk_instance, &device.raw);
        let raw = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(|err| anyhow!("vkCreateSwapchainKHR failed: {err}"))?;

        let images = unsafe { loader.get_swapchain_images(raw) }
            .map_err(|err| anyhow!("vkGetSwapchainImagesKHR failed: {err}"))?;

        let image_views = images
            .iter()
            .map(|image| Self::create_image_view(&device.raw, *image, surface_format.format))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            loader,
            raw,
            images,
            image_views,
            format: surface_format.format,
            extent,
            present_mode,
        })
    }

    fn create_image_view(
        raw_device: &ash::Device,
        image: vk::Image,
        format: vk::Format,
    ) -> anyhow::Result<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe { raw_device.create_image_view(&info, None) }
            .map_err(|err| anyhow!("vkCreateImageView failed: {err}"))
    }

    pub fn destroy(&self, raw_device: &ash::Device) {
        unsafe {
            for view in &self.image_views {
                raw_device.destroy_image_view(*view, None);
            }
            self.loader.destroy_swapchain(self.raw, None);
        }
    }
}
