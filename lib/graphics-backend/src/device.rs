use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;

use crate::phy_device::PhyDevice;

/// The logical device, its single graphics/present queue, and the command &
/// descriptor pools every other Vulkan object in this backend is allocated
/// from.
pub struct LogicalDevice {
    pub phy: Arc<PhyDevice>,
    pub raw: ash::Device,
    pub queue: vk::Queue,
    pub command_pool: vk::CommandPool,
    pub descriptor_pool: vk::DescriptorPool,
}

const MAX_DESCRIPTOR_SETS: u32 = 4096;

impl LogicalDevice {
    pub fn new(phy: Arc<PhyDevice>) -> anyhow::Result<Arc<Self>> {
        let queue_priorities = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(phy.queue_family_index)
            .queue_priorities(&queue_priorities);
        let queue_infos = [queue_info];

        let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];

        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions)
            .enabled_features(&features);

        let raw = unsafe {
            phy.instance
                .vk_instance
                .create_device(phy.raw, &device_info, None)
        }
        .map_err(|err| anyhow!("vkCreateDevice failed: {err}"))?;

        let queue = unsafe { raw.get_device_queue(phy.queue_family_index, 0) };

        let command_pool = unsafe {
            raw.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(phy.queue_family_index)
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
                None,
            )
        }
        .map_err(|err| anyhow!("vkCreateCommandPool failed: {err}"))?;

        let descriptor_pool = Self::create_descriptor_pool(&raw, MAX_DESCRIPTOR_SETS)?;

        Ok(Arc::new(Self {
            phy,
            raw,
            queue,
            command_pool,
            descriptor_pool,
        }))
    }

    fn create_descriptor_pool(
        raw: &ash::Device,
        max_sets: u32,
    ) -> anyhow::Result<vk::DescriptorPool> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: max_sets,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                descriptor_count: max_sets,
            },
        ];
        let info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);
        unsafe { raw.create_descriptor_pool(&info, None) }
            .map_err(|err| anyhow!("vkCreateDescriptorPool failed: {err}"))
    }

    /// Grows the descriptor pool by recreating it at double capacity. Existing
    /// sets allocated from the old pool are invalidated; callers must re-allocate
    /// theirs afterwards (SPEC_FULL.md "descriptor-pool-exhaustion retry-after-grow").
    pub fn grow_descriptor_pool(&mut self, current_capacity: u32) -> anyhow::Result<u32> {
        let new_capacity = current_capacity.saturating_mul(2);
        let new_pool = Self::create_descriptor_pool(&self.raw, new_capacity)?;
        unsafe {
            self.raw.destroy_descriptor_pool(self.descriptor_pool, None);
        }
        self.descriptor_pool = new_pool;
        Ok(new_capacity)
    }

    pub fn allocate_command_buffer(&self) -> anyhow::Result<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.raw.allocate_command_buffers(&info) }
            .map_err(|err| anyhow!("vkAllocateCommandBuffers failed: {err}"))?;
        Ok(buffers[0])
    }

    pub fn wait_idle(&self) {
        unsafe {
            let _ = self.raw.device_wait_idle();
        }
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            self.raw.destroy_descriptor_pool(self.descriptor_pool, None);
            self.raw.destroy_command_pool(self.command_pool, None);
            self.raw.destroy_device(None);
        }
    }
}
