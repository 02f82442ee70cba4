use anyhow::anyhow;
use ash::vk;
use graphics_types::{Extent2D, PixelFormat};

use crate::device::LogicalDevice;

pub fn find_memory_type(
    device: &LogicalDevice,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> anyhow::Result<u32> {
    let mem_props = unsafe {
        device
            .phy
            .instance
            .vk_instance
            .get_physical_device_memory_properties(device.phy.raw)
    };
    for i in 0..mem_props.memory_type_count {
        let type_supported = (type_filter & (1 << i)) != 0;
        let props_supported = mem_props.memory_types[i as usize]
            .property_flags
            .contains(properties);
        if type_supported && props_supported {
            return Ok(i);
        }
    }
    Err(anyhow!("no suitable memory type for filter {type_filter:#x}"))
}

pub struct GpuBuffer {
    pub raw: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: u64,
    pub mapped: Option<*mut u8>,
}

impl GpuBuffer {
    pub fn new(
        device: &LogicalDevice,
        size: u64,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> anyhow::Result<Self> {
        let info = vk::BufferCreateInfo::default()
            .size(size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let raw = unsafe { device.raw.create_buffer(&info, None) }
            .map_err(|err| anyhow!("vkCreateBuffer failed: {err}"))?;
        let requirements = unsafe { device.raw.get_buffer_memory_requirements(raw) };
        let memory_type = find_memory_type(device, requirements.memory_type_bits, properties)?;
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = unsafe { device.raw.allocate_memory(&alloc_info, None) }
            .map_err(|err| anyhow!("vkAllocateMemory failed: {err}"))?;
        unsafe { device.raw.bind_buffer_memory(raw, memory, 0) }
            .map_err(|err| anyhow!("vkBindBufferMemory failed: {err}"))?;

        let mapped = if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            let ptr = unsafe {
                device
                    .raw
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            }
            .map_err(|err| anyhow!("vkMapMemory failed: {err}"))?;
            Some(ptr as *mut u8)
        } else {
            None
        };

        Ok(Self {
            raw,
            memory,
            size,
            mapped,
        })
    }

    /// Safety: `data.len()` must not exceed `self.size`, and the buffer must
    /// have been created with `HOST_VISIBLE` memory.
    pub fn write(&self, data: &[u8], offset: u64) {
        let ptr = self.mapped.expect("buffer is not host-visible");
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }
    }

    pub fn destroy(&self, raw_device: &ash::Device) {
        unsafe {
            if self.mapped.is_some() {
                raw_device.unmap_memory(self.memory);
            }
            raw_device.destroy_buffer(self.raw, None);
            raw_device.free_memory(self.memory, None);
        }
    }
}

pub fn pixel_format_to_vk(format: PixelFormat) -> vk::Format {
    match format {
        PixelFormat::R8 => vk::Format::R8_UNORM,
        PixelFormat::RG8 => vk::Format::R8G8_UNORM,
        PixelFormat::RGBA8 => vk::Format::R8G8B8A8_UNORM,
        PixelFormat::BGRA8 => vk::Format::B8G8R8A8_UNORM,
        PixelFormat::R16 => vk::Format::R16_UNORM,
        PixelFormat::RGBA16 => vk::Format::R16G16B16A16_UNORM,
        PixelFormat::R32F => vk::Format::R32_SFLOAT,
    }
}

pub struct GpuImage {
    pub raw: vk::Image,
    pub view: vk::ImageView,
    pub memory: vk::DeviceMemory,
    pub format: vk::Format,
    pub extent: Extent2D,
}

impl GpuImage {
    pub fn new(
        device: &LogicalDevice,
        extent: Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> anyhow::Result<Self> {
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width.max(1),
                height: extent.height.max(1),
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let raw = unsafe { device.raw.create_image(&info, None) }
            .map_err(|err| anyhow!("vkCreateImage failed: {err}"))?;

        let requirements = unsafe { device.raw.get_image_memory_requirements(raw) };
        let memory_type = find_memory_type(
            device,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = unsafe { device.raw.allocate_memory(&alloc_info, None) }
            .map_err(|err| anyhow!("vkAllocateMemory failed: {err}"))?;
        unsafe { device.raw.bind_image_memory(raw, memory, 0) }
            .map_err(|err| anyhow!("vkBindImageMemory failed: {err}"))?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(raw)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { device.raw.create_image_view(&view_info, None) }
            .map_err(|err| anyhow!("vkCreateImageView failed: {err}"))?;

        Ok(Self {
            raw,
            view,
            memory,
            format,
            extent,
        })
    }

    pub fn destroy(&self, raw_device: &ash::Device) {
        unsafe {
            raw_device.destroy_image_view(self.view, None);
            raw_device.destroy_image(self.raw, None);
            raw_device.free_memory(self.memory, None);
        }
    }
}

/// Records a pipeline barrier that transitions an image's layout, using the
/// access-mask/stage pairs appropriate for the from/to layout pair this
/// backend actually uses (undefined->transfer-dst, transfer-dst->shader-read).
pub fn transition_image_layout(
    device: &LogicalDevice,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        _ => (
            vk::AccessFlags::MEMORY_WRITE,
            vk::AccessFlags::MEMORY_READ,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    };

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);

    unsafe {
        device.raw.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// Creates a sampler with the given min/mag filter (`NEAREST` or `LINEAR`);
/// mipmap mode follows the same filter so `renderer_init`'s nearest and
/// linear samplers (spec.md §6) don't blend across mip levels differently
/// than they sample within one.
pub fn create_sampler(device: &LogicalDevice, filter: vk::Filter) -> anyhow::Result<vk::Sampler> {
    let mipmap_mode = match filter {
        vk::Filter::NEAREST => vk::SamplerMipmapMode::NEAREST,
        _ => vk::SamplerMipmapMode::LINEAR,
    };
    let info = vk::SamplerCreateInfo::default()
        .mag_filter(filter)
        .min_filter(filter)
        .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .anisotropy_enable(false)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .mipmap_mode(mipmap_mode);
    unsafe { device.raw.create_sampler(&info, None) }
        .map_err(|err| anyhow!("vkCreateSampler failed: {err}"))
}

/// A backend-allocated texture: just the GPU image. Sampling filter is chosen
/// per draw (spec.md §4.4 step 4: "nearest or linear sampler per sample-kind"),
/// not fixed at texture creation, since the same texture can be drawn through
/// either sampler depending on the batch group that references it.
pub struct Texture {
    pub image: GpuImage,
}

impl Texture {
    pub fn destroy(&self, raw_device: &ash::Device) {
        self.image.destroy(raw_device);
    }
}

pub enum Resource {
    Texture(Texture),
    Buffer(GpuBuffer),
}

pub struct ResourceTable {
    next_id: u64,
    pub entries: std::collections::HashMap<u64, Resource>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            entries: std::collections::HashMap::new(),
        }
    }

    pub fn insert(&mut self, resource: Resource) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, resource);
        id
    }

    pub fn remove(&mut self, id: u64) -> Option<Resource> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<&Resource> {
        self.entries.get(&id)
    }
}

impl Default for ResourceTable {
    fn default() -> Self {
        Self::new()
    }
}
