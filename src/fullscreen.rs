//! Fullscreen passes.
//!
//! A graphics pipeline over a single fullscreen triangle whose vertices are
//! generated in the vertex shader. No vertex input, no culling, no blending,
//! no depth; viewport and scissor are dynamic. Rendering is render-pass-less
//! (dynamic rendering): the target image is attached for the one draw.

use std::ffi::CStr;

use ash::vk;

use crate::device::Device;
use crate::error::{Error, Result};
use crate::image::Image;
use crate::kernel::compile_shader_module;

pub struct Fullscreen {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    push_size: u32,
}

impl Fullscreen {
    pub fn create(
        device: &Device,
        vertex_spirv: &[u32],
        fragment_spirv: &[u32],
        push_size: u32,
        color_format: vk::Format,
    ) -> Result<Fullscreen> {
        let vkd = device.pointers();

        let push_range = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: push_size,
        }];
        let set_layouts = [device.descriptor_set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_range);
        let layout = unsafe { vkd.create_pipeline_layout(&layout_info, None)? };

        let vertex_module = compile_shader_module(device, vertex_spirv)?;
        let fragment_module = compile_shader_module(device, fragment_spirv)?;

        let entry = CStr::from_bytes_with_nul(b"main\0").unwrap();
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(entry)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(entry)
                .build(),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder();
        let attachments = [vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::FALSE,
            color_write_mask: vk::ColorComponentFlags::RGBA,
            ..Default::default()
        }];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::builder().attachments(&attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let color_formats = [color_format];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::builder().color_attachment_formats(&color_formats);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info)
            .build();

        let pipeline = unsafe {
            vkd.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, result)| Error::PipelineCreation(result))?[0]
        };

        unsafe {
            vkd.destroy_shader_module(vertex_module, None);
            vkd.destroy_shader_module(fragment_module, None);
        }

        Ok(Fullscreen {
            pipeline,
            layout,
            push_size,
        })
    }

    /// Draws the fullscreen triangle into `target`, which must be in the
    /// color-attachment layout.
    pub fn render(
        &self,
        device: &Device,
        cb: vk::CommandBuffer,
        target: &Image,
        push_constants: &[u8],
    ) {
        debug_assert_eq!(push_constants.len() as u32, self.push_size);

        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: target.extent(),
        };
        let attachment = vk::RenderingAttachmentInfo::builder()
            .image_view(target.view())
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::DONT_CARE)
            .store_op(vk::AttachmentStoreOp::STORE)
            .build();
        let attachments = [attachment];
        let rendering_info = vk::RenderingInfo::builder()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&attachments);

        let vkd = device.pointers();
        unsafe {
            device.dynamic_rendering.cmd_begin_rendering(cb, &rendering_info);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: render_area.extent.width as f32,
                height: render_area.extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            vkd.cmd_set_viewport(cb, 0, &[viewport]);
            vkd.cmd_set_scissor(cb, 0, &[render_area]);

            vkd.cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout,
                0,
                &[device.descriptor_set],
                &[],
            );
            vkd.cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            vkd.cmd_push_constants(
                cb,
                self.layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                push_constants,
            );

            vkd.cmd_draw(cb, 3, 1, 0, 0);

            device.dynamic_rendering.cmd_end_rendering(cb);
        }
    }

    pub(crate) unsafe fn destroy(&mut self, device: &Device) {
        let vkd = device.pointers();
        vkd.destroy_pipeline(self.pipeline, None);
        vkd.destroy_pipeline_layout(self.layout, None);
        self.pipeline = vk::Pipeline::null();
        self.layout = vk::PipelineLayout::null();
    }
}
