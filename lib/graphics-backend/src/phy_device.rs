use std::ffi::CStr;
use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use graphics_types::{DeviceCapabilities, GpuInfo, GpuKind};
use log::{info, warn};
use parking_lot::RwLock;

use crate::instance::Instance;

/// Device limits the backend needs downstream, read once at selection time.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceLimits {
    pub non_coherent_mem_alignment: u64,
    pub optimal_image_copy_mem_alignment: u64,
    pub max_texture_size: u32,
    pub max_sampler_anisotropy: f32,
    pub min_uniform_align: u64,
}

fn vk_gpu_kind(ty: vk::PhysicalDeviceType) -> GpuKind {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => GpuKind::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => GpuKind::Integrated,
        vk::PhysicalDeviceType::VIRTUAL_GPU => GpuKind::Virtual,
        _ => GpuKind::Cpu,
    }
}

fn vendor_name(vendor_id: u32) -> &'static str {
    match vendor_id {
        0x1002 => "AMD",
        0x1010 => "ImgTec",
        0x106B => "Apple",
        0x10DE => "NVIDIA",
        0x13B5 => "ARM",
        0x5143 => "Qualcomm",
        0x8086 => "Intel",
        0x10005 => "Mesa",
        other => {
            warn!("unknown gpu vendor id {other:#x}");
            "unknown"
        }
    }
}

/// The selected physical device, its queue family, and the capability/limit
/// snapshot taken from it (SPEC_FULL.md "GPU enumeration & capability probing").
pub struct PhyDevice {
    pub instance: Arc<Instance>,
    pub raw: vk::PhysicalDevice,
    pub queue_family_index: u32,
    pub props: vk::PhysicalDeviceProperties,
    pub limits: DeviceLimits,
    pub info: GpuInfo,
    pub capabilities: RwLock<DeviceCapabilities>,
}

impl PhyDevice {
    pub fn select(
        instance: Arc<Instance>,
        surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
        preferred_gpu: Option<&str>,
    ) -> anyhow::Result<Self> {
        let devices = unsafe { instance.vk_instance.enumerate_physical_devices() }
            .map_err(|err| anyhow!("vkEnumeratePhysicalDevices failed: {err}"))?;
        if devices.is_empty() {
            return Err(anyhow!("no Vulkan-capable devices found"));
        }

        let mut best: Option<(usize, GpuKind, vk::PhysicalDeviceProperties, u32)> = None;
        for (index, device) in devices.iter().enumerate() {
            let props = unsafe { instance.vk_instance.get_physical_device_properties(*device) };
            let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
                .to_string_lossy()
                .to_string();
            let kind = vk_gpu_kind(props.device_type);

            let Some(queue_family_index) = Self::find_graphics_queue(instance.as_ref(), *device, surface)
            else {
                continue;
            };

            let matches_preference = preferred_gpu.is_some_and(|wanted| wanted == name);
            let is_better = match &best {
                None => true,
                Some((_, best_kind, _, _)) => {
                    matches_preference || gpu_kind_rank(kind) < gpu_kind_rank(*best_kind)
                }
            };
            if is_better {
                best = Some((index, kind, props, queue_family_index));
            }
            if matches_preference {
                break;
            }
        }

        let (index, kind, props, queue_family_index) =
            best.ok_or_else(|| anyhow!("no device exposes a graphics queue"))?;
        let raw = devices[index];

        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_string_lossy()
            .to_string();
        info!(
            "selected GPU '{name}' ({:?}), vendor {}, driver {}",
            kind,
            vendor_name(props.vendor_id),
            props.driver_version
        );

        let limits = DeviceLimits {
            non_coherent_mem_alignment: props.limits.non_coherent_atom_size,
            optimal_image_copy_mem_alignment: props.limits.optimal_buffer_copy_offset_alignment,
            max_texture_size: props.limits.max_image_dimension2_d,
            max_sampler_anisotropy: props.limits.max_sampler_anisotropy,
            min_uniform_align: props.limits.min_uniform_buffer_offset_alignment,
        };

        let device = Self {
            instance,
            raw,
            queue_family_index,
            props,
            limits,
            info: GpuInfo { name, kind },
            capabilities: RwLock::new(DeviceCapabilities::default()),
        };
        device.probe_texture_capabilities();
        Ok(device)
    }

    fn find_graphics_queue(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
    ) -> Option<u32> {
        let families = unsafe {
            instance
                .vk_instance
                .get_physical_device_queue_family_properties(device)
        };
        for (i, family) in families.iter().enumerate() {
            if family.queue_count == 0 || !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                continue;
            }
            if let Some((surface_loader, surface_khr)) = surface {
                let supports_present = unsafe {
                    surface_loader.get_physical_device_surface_support(
                        device,
                        i as u32,
                        surface_khr,
                    )
                }
                .unwrap_or(false);
                if !supports_present {
                    continue;
                }
            }
            return Some(i as u32);
        }
        None
    }

    /// Probes linear-blit and RGBA blit support, matching what the UI/blur passes
    /// need to know before they choose a mip-generation or copy strategy.
    fn probe_texture_capabilities(&self) {
        let format_props = unsafe {
            self.instance
                .vk_instance
                .get_physical_device_format_properties(self.raw, vk::Format::R8G8B8A8_UNORM)
        };
        let mut caps = self.capabilities.write();
        caps.allows_linear_blitting = format_props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR);
        caps.optimal_rgba_image_blitting = format_props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::BLIT_SRC)
            && format_props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::BLIT_DST);
        caps.linear_rgba_image_blitting = format_props
            .linear_tiling_features
            .contains(vk::FormatFeatureFlags::BLIT_DST);
    }

    pub fn probe_surface_capabilities(&self, surface_format: vk::Format) {
        let format_props = unsafe {
            self.instance
                .vk_instance
                .get_physical_device_format_properties(self.raw, surface_format)
        };
        self.capabilities.write().optimal_swap_chain_image_blitting = format_props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::BLIT_SRC);
    }
}

/// Lower ranks are preferred when auto-selecting among multiple suitable GPUs.
fn gpu_kind_rank(kind: GpuKind) -> u8 {
    match kind {
        GpuKind::Discrete => 0,
        GpuKind::Integrated => 1,
        GpuKind::Virtual => 2,
        GpuKind::Cpu => 3,
    }
}
