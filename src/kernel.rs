//! Compute kernels.
//!
//! A kernel is a compiled compute pipeline plus its fixed workgroup size.
//! Two pipeline layouts exist, both over the single bindless descriptor set:
//! one for single-input kernels and one for compare kernels that address two
//! inputs and up to two outputs. Dispatch takes a typed push-constant value,
//! so the block layout the shader sees is explicit at the call site.

use std::ffi::CStr;

use ash::vk;

use crate::device::Device;
use crate::error::{Error, Result};

/// Reinterprets a plain-old-data value as its bytes for vkCmdPushConstants.
pub(crate) fn as_bytes<T: Copy>(value: &T) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts((value as *const T).cast::<u8>(), std::mem::size_of::<T>())
    }
}

pub(crate) fn div_round_up(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

#[repr(C)]
#[derive(Clone, Copy)]
struct SingleBlock {
    extent: [u32; 2],
    input: u32,
    output: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct PairBlock {
    extent: [u32; 2],
    input1: u32,
    input2: u32,
    output1: u32,
    // Not every compare kernel writes a second output, but the block keeps
    // the slot so the shape is stable across them.
    output2: u32,
}

/// Typed push constants for the two kernel shapes.
#[derive(Debug, Clone, Copy)]
pub enum PushConstants {
    Single {
        extent: [u32; 2],
        input: u32,
        output: u32,
    },
    Pair {
        extent: [u32; 2],
        input1: u32,
        input2: u32,
        output1: u32,
        output2: u32,
    },
}

impl PushConstants {
    pub fn extent(&self) -> [u32; 2] {
        match *self {
            PushConstants::Single { extent, .. } => extent,
            PushConstants::Pair { extent, .. } => extent,
        }
    }

    fn is_pair(&self) -> bool {
        matches!(self, PushConstants::Pair { .. })
    }
}

/// The two compute pipeline layouts, shared by every kernel.
pub struct KernelLayouts {
    pub(crate) single: vk::PipelineLayout,
    pub(crate) pair: vk::PipelineLayout,
}

impl KernelLayouts {
    pub fn new(device: &Device) -> Result<KernelLayouts> {
        let vkd = device.pointers();
        let set_layouts = [device.descriptor_set_layout];

        let single_range = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: std::mem::size_of::<SingleBlock>() as u32,
        }];
        let single_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&single_range);
        let single = unsafe { vkd.create_pipeline_layout(&single_info, None)? };

        let pair_range = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: std::mem::size_of::<PairBlock>() as u32,
        }];
        let pair_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&pair_range);
        let pair = unsafe { vkd.create_pipeline_layout(&pair_info, None)? };

        Ok(KernelLayouts { single, pair })
    }

    pub(crate) unsafe fn destroy(&mut self, device: &Device) {
        let vkd = device.pointers();
        vkd.destroy_pipeline_layout(self.single, None);
        vkd.destroy_pipeline_layout(self.pair, None);
        self.single = vk::PipelineLayout::null();
        self.pair = vk::PipelineLayout::null();
    }
}

/// A compute pipeline with a fixed per-axis workgroup size (z is always 1).
pub struct Kernel {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    workgroup: [u32; 2],
    pair: bool,
}

pub(crate) fn compile_shader_module(device: &Device, spirv: &[u32]) -> Result<vk::ShaderModule> {
    let info = vk::ShaderModuleCreateInfo::builder().code(spirv);
    let module = unsafe { device.pointers().create_shader_module(&info, None)? };
    Ok(module)
}

impl Kernel {
    pub fn create(
        device: &Device,
        layouts: &KernelLayouts,
        spirv: &[u32],
        workgroup: [u32; 2],
        pair: bool,
    ) -> Result<Kernel> {
        let vkd = device.pointers();
        let module = compile_shader_module(device, spirv)?;

        let entry = CStr::from_bytes_with_nul(b"main\0").unwrap();
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(entry)
            .build();

        let layout = if pair { layouts.pair } else { layouts.single };
        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(layout)
            .build();

        let pipeline = unsafe {
            vkd.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, result)| Error::PipelineCreation(result))?[0]
        };

        unsafe {
            vkd.destroy_shader_module(module, None);
        }

        Ok(Kernel {
            pipeline,
            layout,
            workgroup,
            pair,
        })
    }

    /// Records the dispatch: bind, push the resource indices, and launch a
    /// grid covering `extent`. The shader bounds-checks the tail workgroups.
    pub fn dispatch(&self, device: &Device, cb: vk::CommandBuffer, push: &PushConstants) {
        debug_assert_eq!(push.is_pair(), self.pair);

        let vkd = device.pointers();
        unsafe {
            vkd.cmd_bind_pipeline(cb, vk::PipelineBindPoint::COMPUTE, self.pipeline);
            vkd.cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::COMPUTE,
                self.layout,
                0,
                &[device.descriptor_set],
                &[],
            );
            match *push {
                PushConstants::Single {
                    extent,
                    input,
                    output,
                } => {
                    let block = SingleBlock {
                        extent,
                        input,
                        output,
                    };
                    vkd.cmd_push_constants(
                        cb,
                        self.layout,
                        vk::ShaderStageFlags::COMPUTE,
                        0,
                        as_bytes(&block),
                    );
                }
                PushConstants::Pair {
                    extent,
                    input1,
                    input2,
                    output1,
                    output2,
                } => {
                    let block = PairBlock {
                        extent,
                        input1,
                        input2,
                        output1,
                        output2,
                    };
                    vkd.cmd_push_constants(
                        cb,
                        self.layout,
                        vk::ShaderStageFlags::COMPUTE,
                        0,
                        as_bytes(&block),
                    );
                }
            }

            let extent = push.extent();
            vkd.cmd_dispatch(
                cb,
                div_round_up(extent[0], self.workgroup[0]),
                div_round_up(extent[1], self.workgroup[1]),
                1,
            );
        }
    }

    pub(crate) unsafe fn destroy(&mut self, device: &Device) {
        device.pointers().destroy_pipeline(self.pipeline, None);
        self.pipeline = vk::Pipeline::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constant_blocks_match_the_shader_shapes() {
        assert_eq!(std::mem::size_of::<SingleBlock>(), 16);
        assert_eq!(std::mem::size_of::<PairBlock>(), 24);
    }

    #[test]
    fn grid_rounds_up_to_cover_the_extent() {
        assert_eq!(div_round_up(256, 64), 4);
        assert_eq!(div_round_up(257, 64), 5);
        assert_eq!(div_round_up(1, 64), 1);
        assert_eq!(div_round_up(64, 64), 1);
    }

    #[test]
    fn push_constants_expose_their_extent() {
        let single = PushConstants::Single {
            extent: [640, 480],
            input: 0,
            output: 1,
        };
        assert_eq!(single.extent(), [640, 480]);
        assert!(!single.is_pair());

        let pair = PushConstants::Pair {
            extent: [64, 64],
            input1: 0,
            input2: 1,
            output1: 2,
            output2: 3,
        };
        assert_eq!(pair.extent(), [64, 64]);
        assert!(pair.is_pair());
    }
}
