//! The forward graphics pipeline
//!
//! One pipeline draws every mesh: position/color vertices, a view/projection uniform at
//! binding 0 and a per-object model uniform at binding 1. Viewport and scissor are dynamic
//! so a swapchain resize never forces a rebuild.

use ash::{vk, Device};

use super::shader::ShaderModule;
use super::vertex_layout::Vertex;
use crate::backend::vulkan::resources::{DescriptorSetLayout, DescriptorSetLayoutBuilder};
use crate::backend::vulkan::{VulkanError, VulkanResult};

/// Binding of the per-frame view/projection uniform
pub const VIEW_PROJECTION_BINDING: u32 = 0;

/// Binding of the per-object model uniform
pub const MODEL_BINDING: u32 = 1;

/// Layout builder for the forward pipeline's single descriptor set
pub fn forward_set_layout() -> DescriptorSetLayoutBuilder {
    DescriptorSetLayoutBuilder::new()
        .add_uniform_buffer(VIEW_PROJECTION_BINDING, vk::ShaderStageFlags::VERTEX)
        .add_uniform_buffer(MODEL_BINDING, vk::ShaderStageFlags::VERTEX)
}

/// Create the descriptor set layout the forward pipeline expects
pub fn create_forward_set_layout(device: &Device) -> VulkanResult<DescriptorSetLayout> {
    forward_set_layout().build(device)
}

/// Rasterizer state shared by every forward draw
pub fn rasterization_state() -> vk::PipelineRasterizationStateCreateInfo {
    vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false)
        .build()
}

/// Graphics pipeline and its layout
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Build the forward pipeline from SPIR-V bytes
    ///
    /// The shader modules only live for the duration of this call.
    pub fn new_forward(
        device: &Device,
        render_pass: vk::RenderPass,
        vertex_spirv: &[u8],
        fragment_spirv: &[u8],
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Self> {
        let vertex_shader = ShaderModule::from_bytes(device, vertex_spirv)?;
        let fragment_shader = ShaderModule::from_bytes(device, fragment_spirv)?;

        let shader_stages = [
            vertex_shader.stage_info(vk::ShaderStageFlags::VERTEX),
            fragment_shader.stage_info(vk::ShaderStageFlags::FRAGMENT),
        ];

        let bindings = [Vertex::binding_description()];
        let attributes = Vertex::attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Counts only, the values are set per frame
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = rasterization_state();

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::api("vkCreatePipelineLayout"))?
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
        };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, result)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::from_result("vkCreateGraphicsPipelines", result));
            }
        };

        log::debug!("Created forward graphics pipeline");

        Ok(Self {
            device: device.clone(),
            pipeline,
            layout,
        })
    }

    /// Pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Pipeline layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
