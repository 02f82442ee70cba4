use anyhow::anyhow;
use ash::vk;
use graphics_backend_traits::{ShaderLang, ShaderSource};

use crate::device::LogicalDevice;
use crate::shader::{create_shader_module, destroy_shader_module, entry_point};
use crate::shaders;

/// Descriptor-set layouts shared by all three pipelines: one texture+sampler
/// binding and one swizzle-matrix uniform, both per-draw.
pub struct DescriptorLayouts {
    pub per_draw_texture: vk::DescriptorSetLayout,
    pub camera_uniform: vk::DescriptorSetLayout,
}

impl DescriptorLayouts {
    pub fn new(device: &LogicalDevice) -> anyhow::Result<Self> {
        let texture_bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT),
            vk::DescriptorSetLayoutBinding::default()
                .binding(1)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        ];
        let per_draw_texture = unsafe {
            device.raw.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default().bindings(&texture_bindings),
                None,
            )
        }
        .map_err(|err| anyhow!("vkCreateDescriptorSetLayout (texture) failed: {err}"))?;

        let camera_bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)];
        let camera_uniform = unsafe {
            device.raw.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default().bindings(&camera_bindings),
                None,
            )
        }
        .map_err(|err| anyhow!("vkCreateDescriptorSetLayout (camera) failed: {err}"))?;

        Ok(Self {
            per_draw_texture,
            camera_uniform,
        })
    }

    pub fn destroy(&self, raw_device: &ash::Device) {
        unsafe {
            raw_device.destroy_descriptor_set_layout(self.per_draw_texture, None);
            raw_device.destroy_descriptor_set_layout(self.camera_uniform, None);
        }
    }
}

/// One pipeline plus the layout it was built from (needed to bind push
/// constants and descriptor sets at draw time).
pub struct Pipeline {
    pub layout: vk::PipelineLayout,
    pub raw: vk::Pipeline,
}

impl Pipeline {
    pub fn destroy(&self, raw_device: &ash::Device) {
        unsafe {
            raw_device.destroy_pipeline(self.raw, None);
            raw_device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// The three fixed pipelines the core draws through. Created lazily the first
/// time a window is equipped, because pipeline creation needs a render pass
/// (spec.md §6 "Pipelines are created lazily when the first window is equipped").
pub struct Pipelines {
    pub ui: Pipeline,
    pub blur: Pipeline,
    pub mesh3d: Pipeline,
}

struct ShaderStagePair {
    vert: vk::ShaderModule,
    frag: vk::ShaderModule,
}

fn compile_stage_pair(
    raw_device: &ash::Device,
    vert_src: &str,
    frag_src: &str,
) -> anyhow::Result<ShaderStagePair> {
    let vert = create_shader_module(
        raw_device,
        &ShaderSource::Source {
            lang: ShaderLang::Glsl,
            text: vert_src.to_string(),
        },
    )
    .map_err(|err| anyhow!("vertex shader compilation failed: {err}"))?;
    let frag = create_shader_module(
        raw_device,
        &ShaderSource::Source {
            lang: ShaderLang::Glsl,
            text: frag_src.to_string(),
        },
    )
    .map_err(|err| anyhow!("fragment shader compilation failed: {err}"))?;
    Ok(ShaderStagePair { vert, frag })
}

impl Pipelines {
    pub fn new(
        device: &LogicalDevice,
        render_pass: vk::RenderPass,
        layouts: &DescriptorLayouts,
    ) -> anyhow::Result<Self> {
        let ui = Self::build_ui_pipeline(device, render_pass, layouts)?;
        let blur = Self::build_blur_pipeline(device, render_pass, layouts)?;
        let mesh3d = Self::build_mesh3d_pipeline(device, render_pass, layouts)?;
        Ok(Self { ui, blur, mesh3d })
    }

    fn stage_infos(stages: &ShaderStagePair) -> [vk::PipelineShaderStageCreateInfo<'_>; 2] {
        [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(stages.vert)
                .name(entry_point()),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(stages.frag)
                .name(entry_point()),
        ]
    }

    fn common_pipeline_state() -> (
        vk::PipelineInputAssemblyStateCreateInfo<'static>,
        vk::PipelineViewportStateCreateInfo<'static>,
        vk::PipelineMultisampleStateCreateInfo<'static>,
    ) {
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_STRIP)
            .primitive_restart_enable(false);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        (input_assembly, viewport_state, multisample)
    }

    /// Standard (non-premultiplied) alpha blending for the 3D mesh pass.
    fn alpha_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
    }

    /// Premultiplied-alpha blending for the UI rect pass: the fragment shader
    /// already multiplies color by alpha, so the color factor is `One`, not
    /// `SrcAlpha`.
    fn ui_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
    }

    fn build_ui_pipeline(
        device: &LogicalDevice,
        render_pass: vk::RenderPass,
        layouts: &DescriptorLayouts,
    ) -> anyhow::Result<Pipeline> {
        let stages = compile_stage_pair(&device.raw, shaders::UI_VERT, shaders::UI_FRAG)?;

        let binding_desc = [vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(std::mem::size_of::<graphics_types::Rect2DInstance>() as u32)
            .input_rate(vk::VertexInputRate::INSTANCE)];
        let attr_desc: Vec<vk::VertexInputAttributeDescription> = (0..8)
            .map(|i| {
                vk::VertexInputAttributeDescription::default()
                    .location(i)
                    .binding(0)
                    .format(vk::Format::R32G32B32A32_SFLOAT)
                    .offset(i * 16)
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&binding_desc)
            .vertex_attribute_descriptions(&attr_desc);

        let push_constant_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(16 * 4)];
        let set_layouts = [layouts.per_draw_texture];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let layout = unsafe { device.raw.create_pipeline_layout(&layout_info, None) }
            .map_err(|err| anyhow!("vkCreatePipelineLayout (ui) failed: {err}"))?;

        let pipeline = Self::finish_pipeline_with_topology(
            device,
            render_pass,
            layout,
            &stages,
            &vertex_input,
            vk::PrimitiveTopology::TRIANGLE_STRIP,
            false,
            vk::CullModeFlags::NONE,
            vk::FrontFace::COUNTER_CLOCKWISE,
            Self::ui_blend_attachment(),
            "ui pipeline",
        )?;
        destroy_shader_module(&device.raw, stages.vert);
        destroy_shader_module(&device.raw, stages.frag);
        Ok(Pipeline {
            layout,
            raw: pipeline,
        })
    }

    fn build_blur_pipeline(
        device: &LogicalDevice,
        render_pass: vk::RenderPass,
        layouts: &DescriptorLayouts,
    ) -> anyhow::Result<Pipeline> {
        let stages = compile_stage_pair(&device.raw, shaders::BLUR_VERT, shaders::BLUR_FRAG)?;

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();

        let push_constant_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .offset(0)
            .size(12)];
        let set_layouts = [layouts.per_draw_texture];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let layout = unsafe { device.raw.create_pipeline_layout(&layout_info, None) }
            .map_err(|err| anyhow!("vkCreatePipelineLayout (blur) failed: {err}"))?;

        let pipeline = Self::finish_pipeline_with_topology(
            device,
            render_pass,
            layout,
            &stages,
            &vertex_input,
            vk::PrimitiveTopology::TRIANGLE_STRIP,
            false,
            vk::CullModeFlags::NONE,
            vk::FrontFace::COUNTER_CLOCKWISE,
            Self::alpha_blend_attachment(),
            "blur pipeline",
        )?;
        destroy_shader_module(&device.raw, stages.vert);
        destroy_shader_module(&device.raw, stages.frag);
        Ok(Pipeline {
            layout,
            raw: pipeline,
        })
    }

    fn build_mesh3d_pipeline(
        device: &LogicalDevice,
        render_pass: vk::RenderPass,
        layouts: &DescriptorLayouts,
    ) -> anyhow::Result<Pipeline> {
        let stages = compile_stage_pair(&device.raw, shaders::MESH3D_VERT, shaders::MESH3D_FRAG)?;

        let vertex_stride = std::mem::size_of::<graphics_types::Mesh3DVertex>() as u32;
        let instance_stride = std::mem::size_of::<graphics_types::Mesh3DInstance>() as u32;
        let bindings = [
            vk::VertexInputBindingDescription::default()
                .binding(0)
                .stride(vertex_stride)
                .input_rate(vk::VertexInputRate::VERTEX),
            vk::VertexInputBindingDescription::default()
                .binding(1)
                .stride(instance_stride)
                .input_rate(vk::VertexInputRate::INSTANCE),
        ];
        let mut attrs = vec![
            vk::VertexInputAttributeDescription::default()
                .location(0)
                .binding(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(0),
            vk::VertexInputAttributeDescription::default()
                .location(1)
                .binding(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(12),
            vk::VertexInputAttributeDescription::default()
                .location(2)
                .binding(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(20),
            vk::VertexInputAttributeDescription::default()
                .location(3)
                .binding(0)
                .format(vk::Format::R32G32B32A32_SFLOAT)
                .offset(32),
        ];
        for col in 0..4u32 {
            attrs.push(
                vk::VertexInputAttributeDescription::default()
                    .location(4 + col)
                    .binding(1)
                    .format(vk::Format::R32G32B32A32_SFLOAT)
                    .offset(col * 16),
            );
        }
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attrs);

        let set_layouts = [layouts.camera_uniform, layouts.per_draw_texture];
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let layout = unsafe { device.raw.create_pipeline_layout(&layout_info, None) }
            .map_err(|err| anyhow!("vkCreatePipelineLayout (mesh3d) failed: {err}"))?;

        let pipeline = Self::finish_pipeline_with_topology(
            device,
            render_pass,
            layout,
            &stages,
            &vertex_input,
            vk::PrimitiveTopology::TRIANGLE_LIST,
            true,
            vk::CullModeFlags::BACK,
            vk::FrontFace::CLOCKWISE,
            Self::alpha_blend_attachment(),
            "mesh3d pipeline",
        )?;
        destroy_shader_module(&device.raw, stages.vert);
        destroy_shader_module(&device.raw, stages.frag);
        Ok(Pipeline {
            layout,
            raw: pipeline,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_pipeline_with_topology(
        device: &LogicalDevice,
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
        stages: &ShaderStagePair,
        vertex_input: &vk::PipelineVertexInputStateCreateInfo,
        topology: vk::PrimitiveTopology,
        depth_test: bool,
        cull_mode: vk::CullModeFlags,
        front_face: vk::FrontFace,
        blend_attachment: vk::PipelineColorBlendAttachmentState,
        debug_name: &str,
    ) -> anyhow::Result<vk::Pipeline> {
        let stage_infos = Self::stage_infos(stages);
        let (_, viewport_state, multisample) = Self::common_pipeline_state();
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(cull_mode)
            .front_face(front_face)
            .line_width(1.0);
        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(topology);

        let attachments = [blend_attachment];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(depth_test)
            .depth_write_enable(depth_test)
            .depth_compare_op(vk::CompareOp::LESS);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_infos)
            .vertex_input_state(vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .depth_stencil_state(&depth_stencil)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device
                .raw
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        }
        .map_err(|(_, err)| anyhow!("vkCreateGraphicsPipelines ({debug_name}) failed: {err}"))?;
        Ok(pipelines[0])
    }

    pub fn destroy(&self, raw_device: &ash::Device) {
        self.ui.destroy(raw_device);
        self.blur.destroy(raw_device);
        self.mesh3d.destroy(raw_device);
    }
}
