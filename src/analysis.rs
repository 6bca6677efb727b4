//! The per-analysis pass schedule.
//!
//! One analyze call records a single command buffer and submits it once:
//! colorspace transform, separable CSF and feature convolutions, HyAB color
//! compare, feature amplification, histogram summarize, and the optional
//! color-mapped readback. The host waits on queue idle after the submit;
//! the latency of one analysis is GPU-bound and a single fence keeps the
//! schedule readable.

use std::path::Path;
use std::time::Instant;

use ash::vk;
use log::{debug, info};
use smallvec::SmallVec;

use crate::colormap::ColorMap;
use crate::context::Context;
use crate::device::ANALYSIS_COMMAND_BUFFER;
use crate::error::{Error, Result};
use crate::image::{codec, Image};
use crate::kernel::{as_bytes, PushConstants};

/// Buckets in the error histogram.
pub const HISTOGRAM_BINS: usize = 32;

/// HDR tonemap operators, applied before the colorspace transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tonemap {
    Aces,
    Reinhard,
    Hable,
}

impl Tonemap {
    /// The shader-side selector; 0 is reserved for "no tonemap".
    pub(crate) fn shader_index(self) -> u32 {
        match self {
            Tonemap::Aces => 1,
            Tonemap::Reinhard => 2,
            Tonemap::Hable => 3,
        }
    }

    /// The C ABI counts tonemappers from zero.
    pub fn from_abi_index(index: i32) -> Tonemap {
        match index {
            1 => Tonemap::Reinhard,
            2 => Tonemap::Hable,
            _ => Tonemap::Aces,
        }
    }
}

/// One comparison of a reference and test image.
#[derive(Debug, Clone, Copy)]
pub struct AnalyzeRequest<'a> {
    pub reference: &'a Path,
    pub test: &'a Path,
    /// Where to write the color-mapped error map; no readback when `None`.
    pub output: Option<&'a Path>,
    /// Exposure in stops, applied as a linear scale of `2^stops` to HDR
    /// sources before tonemapping.
    pub exposure_stops: f32,
    /// Tonemap for HDR sources; LDR sources ignore it.
    pub tonemap: Option<Tonemap>,
}

impl<'a> AnalyzeRequest<'a> {
    pub fn new(reference: &'a Path, test: &'a Path) -> AnalyzeRequest<'a> {
        AnalyzeRequest {
            reference,
            test,
            output: None,
            exposure_stops: 0.0,
            tonemap: None,
        }
    }
}

/// Result of one analysis.
#[derive(Debug, Clone, Copy)]
pub struct Summary {
    pub width: u32,
    pub height: u32,
    pub milliseconds_elapsed: u32,
    /// Bin `i` counts pixels whose error falls in `[i/32, (i+1)/32)`.
    pub histogram: [u32; HISTOGRAM_BINS],
}

/// Push constants of the colorspace transform pass.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct TransformPush {
    pub extent: [u32; 2],
    pub uv_offset: [f32; 2],
    pub uv_scale: f32,
    pub input: u32,
    pub tonemap: u32,
    pub exposure: f32,
    pub handle_alpha: u32,
}

/// Push constants of the error color-map pass.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct ColorMapPush {
    pub extent: [u32; 2],
    pub uv_offset: [f32; 2],
    pub uv_scale: f32,
    pub input: u32,
    pub color_map: u32,
}

fn handle_alpha(image: &Image) -> u32 {
    // Only sources that actually carried a fourth channel composite.
    u32::from(image.channels() == 4)
}

impl Context {
    /// Runs the full comparison described by `request`.
    pub fn analyze(&mut self, request: &AnalyzeRequest) -> Result<Summary> {
        if !request.reference.exists() {
            return Err(Error::InvalidReferencePath);
        }
        if !request.test.exists() {
            return Err(Error::InvalidTestPath);
        }

        let start = Instant::now();

        if !self.reference.source.is_null() {
            self.reset();
        }

        let reference_decoded = codec::decode(request.reference)?;
        let test_decoded = codec::decode(request.test)?;
        self.reference.source = Image::from_decoded(&self.device, &reference_decoded)?;
        self.test.source = Image::from_decoded(&self.device, &test_decoded)?;

        if self.reference.source.extent() != self.test.source.extent() {
            return Err(Error::ExtentMismatch);
        }
        let width = self.reference.source.width();
        let height = self.reference.source.height();
        let extent = [width, height];

        self.reference.yycxcz = Image::derived(
            &self.device,
            &self.reference.source,
            vk::Format::R32G32B32A32_SFLOAT,
            true,
        )?;
        self.reference.yycxcz_blur_x = Image::derived(
            &self.device,
            &self.reference.source,
            vk::Format::R32G32B32A32_SFLOAT,
            false,
        )?;
        self.reference.yycxcz_blurred = Image::derived(
            &self.device,
            &self.reference.source,
            vk::Format::R32G32B32A32_SFLOAT,
            false,
        )?;
        self.reference.feature_blur_x = Image::derived(
            &self.device,
            &self.reference.source,
            vk::Format::R32G32B32A32_SFLOAT,
            false,
        )?;
        self.test.yycxcz = Image::derived(
            &self.device,
            &self.test.source,
            vk::Format::R32G32B32A32_SFLOAT,
            true,
        )?;
        self.test.yycxcz_blur_x = Image::derived(
            &self.device,
            &self.test.source,
            vk::Format::R32G32B32A32_SFLOAT,
            false,
        )?;
        self.test.yycxcz_blurred = Image::derived(
            &self.device,
            &self.test.source,
            vk::Format::R32G32B32A32_SFLOAT,
            false,
        )?;
        self.test.feature_blur_x = Image::derived(
            &self.device,
            &self.test.source,
            vk::Format::R32G32B32A32_SFLOAT,
            false,
        )?;

        self.error = Image::derived(
            &self.device,
            &self.reference.source,
            vk::Format::R32_SFLOAT,
            false,
        )?;
        if request.output.is_some() {
            self.error_color = Image::derived(
                &self.device,
                &self.reference.source,
                vk::Format::R8G8B8A8_SRGB,
                true,
            )?;
            self.error_readback = Image::readback_target(
                &self.device,
                &self.reference.source,
                vk::Format::R8G8B8A8_SRGB,
            )?;
        }

        // The histogram only ever accumulates on the device; zero it here
        // so one call's counts do not leak into the next.
        self.error_histogram.zero();

        let cb = self.device.command_buffers[ANALYSIS_COMMAND_BUFFER];
        let vkd = self.device.pointers().clone();
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            vkd.begin_command_buffer(cb, &begin_info)?;
        }

        // Initial transitions: the two transform targets become color
        // attachments; every other target becomes writable.
        let attachment_transfers = [
            self.reference
                .yycxcz
                .start_barrier(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            self.test
                .yycxcz
                .start_barrier(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        ];
        unsafe {
            vkd.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &attachment_transfers,
            );
        }

        let mut storage_transfers: SmallVec<[vk::ImageMemoryBarrier; 9]> = SmallVec::new();
        storage_transfers.push(
            self.reference
                .yycxcz_blur_x
                .start_barrier(vk::ImageLayout::GENERAL),
        );
        storage_transfers.push(
            self.reference
                .yycxcz_blurred
                .start_barrier(vk::ImageLayout::GENERAL),
        );
        storage_transfers.push(
            self.reference
                .feature_blur_x
                .start_barrier(vk::ImageLayout::GENERAL),
        );
        storage_transfers.push(self.test.yycxcz_blur_x.start_barrier(vk::ImageLayout::GENERAL));
        storage_transfers.push(
            self.test
                .yycxcz_blurred
                .start_barrier(vk::ImageLayout::GENERAL),
        );
        storage_transfers.push(
            self.test
                .feature_blur_x
                .start_barrier(vk::ImageLayout::GENERAL),
        );
        storage_transfers.push(self.error.start_barrier(vk::ImageLayout::GENERAL));
        let mut storage_dst_stage = vk::PipelineStageFlags::COMPUTE_SHADER;
        if request.output.is_some() {
            storage_transfers.push(
                self.error_color
                    .start_barrier(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            );
            storage_transfers.push(self.error_readback.readback_barrier());
            storage_dst_stage |= vk::PipelineStageFlags::TRANSFER
                | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        }
        unsafe {
            vkd.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                storage_dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &storage_transfers,
            );
        }

        // Transform both sources into YyCxCz space. Exposure and tonemap
        // follow the reference side; alpha handling is per side.
        let (tonemap, exposure) = if self.reference.source.hdr() {
            (
                request.tonemap.map_or(0, Tonemap::shader_index),
                request.exposure_stops.exp2(),
            )
        } else {
            (0, 1.0)
        };
        let mut transform = TransformPush {
            extent,
            uv_offset: [0.0, 0.0],
            uv_scale: 1.0,
            input: self.reference.source.slot(),
            tonemap,
            exposure,
            handle_alpha: handle_alpha(&self.reference.source),
        };
        self.kernels
            .yycxcz
            .render(&self.device, cb, &self.reference.yycxcz, as_bytes(&transform));
        transform.input = self.test.source.slot();
        transform.handle_alpha = handle_alpha(&self.test.source);
        self.kernels
            .yycxcz
            .render(&self.device, cb, &self.test.yycxcz, as_bytes(&transform));

        // Attachment writes become readable by compute.
        let transfers = [
            self.reference
                .yycxcz
                .raw_barrier(vk::AccessFlags::COLOR_ATTACHMENT_WRITE),
            self.test
                .yycxcz
                .raw_barrier(vk::AccessFlags::COLOR_ATTACHMENT_WRITE),
        ];
        unsafe {
            vkd.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &transfers,
            );
        }

        // Horizontal feature-detection convolution of both sides at once.
        self.kernels.feature_filter_x.dispatch(
            &self.device,
            cb,
            &PushConstants::Pair {
                extent,
                input1: self.reference.yycxcz.slot(),
                input2: self.test.yycxcz.slot(),
                output1: self.reference.feature_blur_x.slot(),
                output2: self.test.feature_blur_x.slot(),
            },
        );

        // Horizontal half of the CSF filter, one dispatch per side.
        self.kernels.csf_filter_x.dispatch(
            &self.device,
            cb,
            &PushConstants::Single {
                extent,
                input: self.reference.yycxcz.slot(),
                output: self.reference.yycxcz_blur_x.slot(),
            },
        );
        self.kernels.csf_filter_x.dispatch(
            &self.device,
            cb,
            &PushConstants::Single {
                extent,
                input: self.test.yycxcz.slot(),
                output: self.test.yycxcz_blur_x.slot(),
            },
        );

        let transfers = [
            self.reference
                .yycxcz_blur_x
                .raw_barrier(vk::AccessFlags::MEMORY_WRITE),
            self.test
                .yycxcz_blur_x
                .raw_barrier(vk::AccessFlags::MEMORY_WRITE),
            self.reference
                .feature_blur_x
                .raw_barrier(vk::AccessFlags::MEMORY_WRITE),
            self.test
                .feature_blur_x
                .raw_barrier(vk::AccessFlags::MEMORY_WRITE),
        ];
        unsafe {
            vkd.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &transfers,
            );
        }

        // Vertical half of the CSF filter.
        self.kernels.csf_filter_y.dispatch(
            &self.device,
            cb,
            &PushConstants::Single {
                extent,
                input: self.reference.yycxcz_blur_x.slot(),
                output: self.reference.yycxcz_blurred.slot(),
            },
        );
        self.kernels.csf_filter_y.dispatch(
            &self.device,
            cb,
            &PushConstants::Single {
                extent,
                input: self.test.yycxcz_blur_x.slot(),
                output: self.test.yycxcz_blurred.slot(),
            },
        );

        let transfers = [
            self.reference
                .yycxcz_blurred
                .raw_barrier(vk::AccessFlags::MEMORY_WRITE),
            self.test
                .yycxcz_blurred
                .raw_barrier(vk::AccessFlags::MEMORY_WRITE),
        ];
        unsafe {
            vkd.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &transfers,
            );
        }

        // Modified HyAB color difference into the error map.
        self.kernels.color_compare.dispatch(
            &self.device,
            cb,
            &PushConstants::Pair {
                extent,
                input1: self.reference.yycxcz_blurred.slot(),
                input2: self.test.yycxcz_blurred.slot(),
                output1: self.error.slot(),
                output2: 0,
            },
        );

        let transfers = [self.error.waw_barrier()];
        unsafe {
            vkd.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &transfers,
            );
        }

        // Vertical feature-detection convolution; reads the error map and
        // writes it back amplified, so color-compare must land first.
        self.kernels.feature_filter_y.dispatch(
            &self.device,
            cb,
            &PushConstants::Pair {
                extent,
                input1: self.reference.feature_blur_x.slot(),
                input2: self.test.feature_blur_x.slot(),
                output1: self.error.slot(),
                output2: 0,
            },
        );

        let transfers = [self.error.raw_barrier(vk::AccessFlags::MEMORY_WRITE)];
        unsafe {
            vkd.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &transfers,
            );
        }

        // Bin the final error map.
        self.kernels.summarize.dispatch(
            &self.device,
            cb,
            &PushConstants::Single {
                extent,
                input: self.error.slot(),
                output: self.error_histogram.slot(),
            },
        );

        if request.output.is_some() {
            // The error map stays in the general layout its sampled
            // descriptor was registered with.
            let transfers = [self.error.rar_barrier(vk::ImageLayout::GENERAL)];
            unsafe {
                vkd.cmd_pipeline_barrier(
                    cb,
                    vk::PipelineStageFlags::COMPUTE_SHADER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &transfers,
                );
            }

            let push = ColorMapPush {
                extent,
                uv_offset: [0.0, 0.0],
                uv_scale: 1.0,
                input: self.error.slot(),
                color_map: self.color_map_buffer(ColorMap::Magma).slot(),
            };
            self.kernels
                .error_color_map
                .render(&self.device, cb, &self.error_color, as_bytes(&push));

            let mut blit = self.error_color.blit_barrier();
            blit.src_access_mask = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
            unsafe {
                vkd.cmd_pipeline_barrier(
                    cb,
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[blit],
                );
            }

            self.error_color
                .copy_to(&self.device, cb, &self.error_readback);

            // Transition the host image to general for the mapped read.
            let transfers = [self
                .error_readback
                .raw_barrier(vk::AccessFlags::TRANSFER_WRITE)];
            unsafe {
                vkd.cmd_pipeline_barrier(
                    cb,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &transfers,
                );
            }
        }

        unsafe {
            vkd.end_command_buffer(cb)?;
            let command_buffers = [cb];
            let submit = vk::SubmitInfo::builder()
                .command_buffers(&command_buffers)
                .build();
            vkd.queue_submit(self.device.graphics_queue, &[submit], vk::Fence::null())?;
            vkd.device_wait_idle()?;
        }

        if let Some(path) = request.output {
            self.error_readback.write_png(&self.device, path)?;
        }

        let mut histogram = [0u32; HISTOGRAM_BINS];
        self.error_histogram.read_u32s(&mut histogram);

        let milliseconds_elapsed = start.elapsed().as_millis() as u32;
        info!("evaluation time: {} ms", milliseconds_elapsed);
        debug!("error histogram: {:?}", histogram);

        Ok(Summary {
            width,
            height,
            milliseconds_elapsed,
            histogram,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tonemap_indices_offset_past_the_off_state() {
        assert_eq!(Tonemap::Aces.shader_index(), 1);
        assert_eq!(Tonemap::Reinhard.shader_index(), 2);
        assert_eq!(Tonemap::Hable.shader_index(), 3);
    }

    #[test]
    fn abi_tonemap_indices_count_from_zero() {
        assert_eq!(Tonemap::from_abi_index(0), Tonemap::Aces);
        assert_eq!(Tonemap::from_abi_index(1), Tonemap::Reinhard);
        assert_eq!(Tonemap::from_abi_index(2), Tonemap::Hable);
    }

    #[test]
    fn fullscreen_push_blocks_match_the_shader_shapes() {
        assert_eq!(std::mem::size_of::<TransformPush>(), 36);
        assert_eq!(std::mem::size_of::<ColorMapPush>(), 28);
    }

    #[test]
    fn exposure_stops_scale_exponentially() {
        assert_eq!((-2.0f32).exp2(), 0.25);
        assert_eq!(0.0f32.exp2(), 1.0);
        assert_eq!(3.0f32.exp2(), 8.0);
    }
}
