use std::sync::Arc;

use ash::vk;

use crate::device::LogicalDevice;
use crate::pipelines::DescriptorLayouts;
use crate::resources::GpuBuffer;

/// Minimum size a transient buffer grows to the first time it's needed
/// (spec.md §5 step 3: "grow... size doubles, minimum 16 MiB").
pub const MIN_TRANSIENT_BUFFER_SIZE: u64 = 16 * 1024 * 1024;

/// A single frame slot's growable host-visible instance buffer. Per-draw data
/// (`Rect2DInstance`, `Mesh3DInstance`, vertex streams) is copied in at an
/// increasing offset over the course of a frame and bound as a vertex buffer
/// at draw time; the offset resets to zero at the start of each frame.
pub struct TransientBuffer {
    pub buffer: GpuBuffer,
    usage: vk::BufferUsageFlags,
    floor: u64,
    cursor: u64,
}

impl TransientBuffer {
    pub fn new(device: &LogicalDevice) -> anyhow::Result<Self> {
        Self::with_usage(
            device,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::INDEX_BUFFER,
            MIN_TRANSIENT_BUFFER_SIZE,
        )
    }

    /// Same growth policy as [`TransientBuffer::new`] but for a caller-chosen
    /// usage and floor, e.g. the per-draw swizzle uniform scratch.
    pub fn with_usage(device: &LogicalDevice, usage: vk::BufferUsageFlags, floor: u64) -> anyhow::Result<Self> {
        let buffer = GpuBuffer::new(
            device,
            floor,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        Ok(Self {
            buffer,
            usage,
            floor,
            cursor: 0,
        })
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Ensures the buffer can hold `additional_bytes` more, doubling capacity
    /// (never below the floor) until it fits.
    pub fn ensure_capacity(
        &mut self,
        device: &LogicalDevice,
        additional_bytes: u64,
    ) -> anyhow::Result<()> {
        let required = self.cursor + additional_bytes;
        if required <= self.buffer.size {
            return Ok(());
        }
        let mut new_size = self.buffer.size.max(self.floor);
        while new_size < required {
            new_size *= 2;
        }
        let new_buffer = GpuBuffer::new(
            device,
            new_size,
            self.usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        self.buffer.destroy(&device.raw);
        self.buffer = new_buffer;
        Ok(())
    }

    /// Copies `data` to the next unused region and returns its byte offset.
    /// Caller must have ensured capacity first.
    pub fn push(&mut self, data: &[u8]) -> u64 {
        let offset = self.cursor;
        self.buffer.write(data, offset);
        self.cursor += data.len() as u64;
        offset
    }
}

/// Per-frame-slot resources partitioned by `FRAMES_IN_FLIGHT` so consecutive
/// frames never contend for the same descriptor pool or transient buffer
/// (spec.md §9 "Shared-resource policy").
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Camera uniform blocks live in a small dynamic-offset ring, one slot per
/// pass submission within a frame; 64 covers any plausible number of
/// mesh3d passes per frame with headroom.
const CAMERA_RING_SLOTS: u64 = 64;

/// Per-draw descriptor sets (texture + swizzle) are re-allocated every frame
/// from a pool that's reset wholesale rather than freed set-by-set (spec.md
/// §9 Open Questions: "descriptor_pool is reset every frame").
const PER_FRAME_DRAW_SETS: u32 = 1024;

pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    pub transient_buffer: TransientBuffer,
    /// Global per-pass-kind uniform data (currently only the mesh3d camera
    /// view-projection), one pre-allocated descriptor set written via
    /// dynamic offset each submission (spec.md §3 "Window Equipment").
    pub camera_uniform_buffer: GpuBuffer,
    pub camera_descriptor_set: vk::DescriptorSet,
    camera_cursor: u64,
    camera_align: u64,
    /// Scratch buffer for per-draw swizzle-matrix uniforms, one write per
    /// bound texture; reset alongside `transient_buffer` every frame.
    pub uniform_scratch: TransientBuffer,
    /// Reset at the start of every frame; holds that frame's per-draw
    /// texture/swizzle descriptor sets.
    pub draw_descriptor_pool: vk::DescriptorPool,
}

impl FrameSlot {
    pub fn new(device: &Arc<LogicalDevice>, layouts: &DescriptorLayouts) -> anyhow::Result<Self> {
        let command_buffer = device.allocate_command_buffer()?;
        let image_available = create_semaphore(device)?;
        let render_finished = create_semaphore(device)?;
        let in_flight_fence = create_fence(device)?;
        let transient_buffer = TransientBuffer::new(device)?;

        let camera_align = device.phy.limits.min_uniform_align.max(16);
        let camera_slot_stride = align_up(std::mem::size_of::<[[f32; 4]; 4]>() as u64, camera_align);
        let camera_uniform_buffer = GpuBuffer::new(
            device,
            camera_slot_stride * CAMERA_RING_SLOTS,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let camera_descriptor_set = allocate_descriptor_set(device, layouts.camera_uniform)?;
        unsafe {
            let buffer_info = [vk::DescriptorBufferInfo::default()
                .buffer(camera_uniform_buffer.raw)
                .offset(0)
                .range(std::mem::size_of::<[[f32; 4]; 4]>() as u64)];
            let write = vk::WriteDescriptorSet::default()
                .dst_set(camera_descriptor_set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .buffer_info(&buffer_info);
            device.raw.update_descriptor_sets(&[write], &[]);
        }

        let draw_descriptor_pool = create_draw_pool(&device.raw, PER_FRAME_DRAW_SETS)?;
        let uniform_scratch = TransientBuffer::with_usage(
            device,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            1024 * 1024,
        )?;

        Ok(Self {
            command_buffer,
            image_available,
            render_finished,
            in_flight_fence,
            transient_buffer,
            camera_uniform_buffer,
            camera_descriptor_set,
            camera_cursor: 0,
            camera_align: camera_slot_stride,
            uniform_scratch,
            draw_descriptor_pool,
        })
    }

    /// Resets per-frame state: the transient vertex/index buffer cursor, the
    /// camera uniform ring cursor, the swizzle scratch buffer, and the
    /// per-draw descriptor pool.
    pub fn begin_frame(&mut self, raw_device: &ash::Device) -> anyhow::Result<()> {
        self.transient_buffer.reset();
        self.uniform_scratch.reset();
        self.camera_cursor = 0;
        unsafe {
            raw_device.reset_descriptor_pool(
                self.draw_descriptor_pool,
                vk::DescriptorPoolResetFlags::empty(),
            )
        }
        .map_err(|err| anyhow::anyhow!("vkResetDescriptorPool failed: {err}"))
    }

    /// Writes one camera uniform block (a 4x4 matrix) into the ring and
    /// returns the dynamic offset to bind it at.
    pub fn push_camera_uniform(&mut self, matrix: &[[f32; 4]; 4]) -> u64 {
        let offset = self.camera_cursor;
        self.camera_uniform_buffer
            .write(bytemuck::bytes_of(matrix), offset);
        self.camera_cursor = (self.camera_cursor + self.camera_align) % (self.camera_align * CAMERA_RING_SLOTS);
        offset
    }

    /// Allocates and writes one per-draw texture+swizzle+opacity descriptor
    /// set from this frame's pool (valid until the next
    /// [`FrameSlot::begin_frame`]). `opacity` lands in the uniform block right
    /// after the swizzle matrix (spec.md §4.4 step 2: per-group transparency
    /// modulates the final alpha); callers with no notion of opacity pass
    /// `1.0`.
    pub fn write_draw_set(
        &mut self,
        device: &LogicalDevice,
        layout: vk::DescriptorSetLayout,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
        swizzle: &[[f32; 4]; 4],
        opacity: f32,
    ) -> anyhow::Result<vk::DescriptorSet> {
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.draw_descriptor_pool)
            .set_layouts(&layouts);
        let set = unsafe { device.raw.allocate_descriptor_sets(&info) }
            .map_err(|err| anyhow::anyhow!("vkAllocateDescriptorSets (per-draw) failed: {err}"))?[0];

        const BLOCK_SIZE: u64 = std::mem::size_of::<[[f32; 4]; 4]>() as u64 + 16;
        self.uniform_scratch.ensure_capacity(device, BLOCK_SIZE)?;
        let mut block = [0u8; BLOCK_SIZE as usize];
        block[..64].copy_from_slice(bytemuck::bytes_of(swizzle));
        block[64..68].copy_from_slice(&opacity.to_ne_bytes());
        let offset = self.uniform_scratch.push(&block);

        let image_info = [vk::DescriptorImageInfo::default()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_view(image_view)
            .sampler(sampler)];
        let buffer_info = [vk::DescriptorBufferInfo::default()
            .buffer(self.uniform_scratch.buffer.raw)
            .offset(offset)
            .range(BLOCK_SIZE)];
        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_info),
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info),
        ];
        unsafe { device.raw.update_descriptor_sets(&writes, &[]) };
        Ok(set)
    }

    pub fn destroy(&self, raw_device: &ash::Device) {
        unsafe {
            raw_device.destroy_semaphore(self.image_available, None);
            raw_device.destroy_semaphore(self.render_finished, None);
            raw_device.destroy_fence(self.in_flight_fence, None);
            raw_device.destroy_descriptor_pool(self.draw_descriptor_pool, None);
        }
        self.camera_uniform_buffer.destroy(raw_device);
        self.uniform_scratch.buffer.destroy(raw_device);
        self.transient_buffer.buffer.destroy(raw_device);
    }
}

fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

fn allocate_descriptor_set(
    device: &LogicalDevice,
    layout: vk::DescriptorSetLayout,
) -> anyhow::Result<vk::DescriptorSet> {
    let layouts = [layout];
    let info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(device.descriptor_pool)
        .set_layouts(&layouts);
    let sets = unsafe { device.raw.allocate_descriptor_sets(&info) }
        .map_err(|err| anyhow::anyhow!("vkAllocateDescriptorSets (camera) failed: {err}"))?;
    Ok(sets[0])
}

fn create_draw_pool(raw_device: &ash::Device, max_sets: u32) -> anyhow::Result<vk::DescriptorPool> {
    let pool_sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: max_sets,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: max_sets,
        },
    ];
    let info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(max_sets)
        .pool_sizes(&pool_sizes);
    unsafe { raw_device.create_descriptor_pool(&info, None) }
        .map_err(|err| anyhow::anyhow!("vkCreateDescriptorPool (per-draw) failed: {err}"))
}

fn create_semaphore(device: &LogicalDevice) -> anyhow::Result<vk::Semaphore> {
    unsafe {
        device
            .raw
            .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
    }
    .map_err(|err| anyhow::anyhow!("vkCreateSemaphore failed: {err}"))
}

fn create_fence(device: &LogicalDevice) -> anyhow::Result<vk::Fence> {
    let info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
    unsafe { device.raw.create_fence(&info, None) }
        .map_err(|err| anyhow::anyhow!("vkCreateFence failed: {err}"))
}
