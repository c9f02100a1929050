use crate::vertex::Vertex;
use anyhow::{Context, Result};
use erupt::{utils, vk1_0 as vk, DeviceLoader};
use std::ffi::CString;
use std::path::Path;

/// Per-draw data, laid out to match the shaders' push constant block
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct PushConstants {
    pub mvp: [f32; 16],
    /// Zero alpha draws the UV color instead
    pub color: [f32; 4],
}

unsafe impl bytemuck::Zeroable for PushConstants {}
unsafe impl bytemuck::Pod for PushConstants {}

pub fn push_constant_stages() -> vk::ShaderStageFlags {
    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
}

/// The scene's only shader pipeline
pub struct Material {
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
}

impl Material {
    /// Load `scene.vert.spv` and `scene.frag.spv` from `shader_dir`
    pub fn load(device: &DeviceLoader, shader_dir: &Path, render_pass: vk::RenderPass) -> Result<Self> {
        let read = |name: &str| {
            let path = shader_dir.join(name);
            std::fs::read(&path).with_context(|| format!("Reading shader {}", path.display()))
        };
        let vertex = read("scene.vert.spv")?;
        let fragment = read("scene.frag.spv")?;
        Self::new(device, &vertex, &fragment, render_pass)
    }

    pub fn new(
        device: &DeviceLoader,
        vertex_src: &[u8],
        fragment_src: &[u8],
        render_pass: vk::RenderPass,
    ) -> Result<Self> {
        // Create shader modules
        let vert_decoded = utils::decode_spv(vertex_src).context("Decoding vertex shader")?;
        let create_info = vk::ShaderModuleCreateInfoBuilder::new().code(&vert_decoded);
        let vertex = unsafe { device.create_shader_module(&create_info, None, None) }.result()?;

        let frag_decoded = utils::decode_spv(fragment_src).context("Decoding fragment shader")?;
        let create_info = vk::ShaderModuleCreateInfoBuilder::new().code(&frag_decoded);
        let fragment =
            unsafe { device.create_shader_module(&create_info, None, None) }.result()?;

        let attribute_descriptions = Vertex::get_attribute_descriptions();
        let binding_descriptions = [Vertex::binding_description()];

        // Build pipeline
        let vertex_input = vk::PipelineVertexInputStateCreateInfoBuilder::new()
            .vertex_attribute_descriptions(&attribute_descriptions[..])
            .vertex_binding_descriptions(&binding_descriptions);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfoBuilder::new()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfoBuilder::new()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfoBuilder::new().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfoBuilder::new()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

        let multisampling = vk::PipelineMultisampleStateCreateInfoBuilder::new()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlagBits::_1);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentStateBuilder::new()
            .color_write_mask(
                vk::ColorComponentFlags::R
                    | vk::ColorComponentFlags::G
                    | vk::ColorComponentFlags::B
                    | vk::ColorComponentFlags::A,
            )
            .blend_enable(false)];
        let color_blending = vk::PipelineColorBlendStateCreateInfoBuilder::new()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let entry_point = CString::new("main")?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfoBuilder::new()
                .stage(vk::ShaderStageFlagBits::VERTEX)
                .module(vertex)
                .name(&entry_point),
            vk::PipelineShaderStageCreateInfoBuilder::new()
                .stage(vk::ShaderStageFlagBits::FRAGMENT)
                .module(fragment)
                .name(&entry_point),
        ];

        let push_constant_ranges = [vk::PushConstantRangeBuilder::new()
            .stage_flags(push_constant_stages())
            .offset(0)
            .size(std::mem::size_of::<PushConstants>() as u32)];

        let create_info =
            vk::PipelineLayoutCreateInfoBuilder::new().push_constant_ranges(&push_constant_ranges);

        let pipeline_layout =
            unsafe { device.create_pipeline_layout(&create_info, None, None) }.result()?;

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfoBuilder::new()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let create_info = vk::GraphicsPipelineCreateInfoBuilder::new()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .depth_stencil_state(&depth_stencil_state)
            .dynamic_state(&dynamic_state)
            .layout(pipeline_layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe { device.create_graphics_pipelines(None, &[create_info], None) };

        unsafe {
            device.destroy_shader_module(Some(fragment), None);
            device.destroy_shader_module(Some(vertex), None);
        }

        let pipeline = pipelines.result()?[0];

        Ok(Self {
            pipeline,
            pipeline_layout,
        })
    }

    pub fn free(&mut self, device: &DeviceLoader) {
        unsafe {
            device.destroy_pipeline(Some(self.pipeline), None);
            device.destroy_pipeline_layout(Some(self.pipeline_layout), None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_fit_the_guaranteed_minimum() {
        // Vulkan guarantees at least 128 bytes of push constants
        assert_eq!(std::mem::size_of::<PushConstants>(), 80);
        assert!(std::mem::size_of::<PushConstants>() <= 128);
    }
}
