//! Context creation.
//!
//! A `Context` owns the instance, device, compiled pipelines, color-map
//! tables and the error-histogram buffer, plus the per-analysis image state.
//! It is created once and threaded through the API; the C shim in `capi`
//! keeps a process-global one behind a one-time initializer.

use ash::vk;
use log::debug;
use shaderc::ShaderKind;

use crate::analysis::{ColorMapPush, TransformPush, HISTOGRAM_BINS};
use crate::buffer::Buffer;
use crate::colormap::{self, ColorMap};
use crate::device::Device;
use crate::error::Result;
use crate::fullscreen::Fullscreen;
use crate::image::{Image, ImagePacket};
use crate::instance::Instance;
use crate::kernel::{Kernel, KernelLayouts};
use crate::shaders;

/// Options applied at context creation.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Enable the Khronos validation layer. Defaults on in debug builds.
    pub validation: bool,
    /// Extra instance extensions required by the host (a presenting host
    /// passes its surface extensions; this also enables the swapchain
    /// device extension).
    pub instance_extensions: Vec<String>,
    /// Case-insensitive substring selecting the adapter by name.
    pub preferred_device: Option<String>,
}

impl Default for ContextOptions {
    fn default() -> ContextOptions {
        ContextOptions {
            validation: cfg!(debug_assertions),
            instance_extensions: Vec::new(),
            preferred_device: None,
        }
    }
}

/// The compiled GPU programs.
pub(crate) struct Kernels {
    pub layouts: KernelLayouts,
    pub yycxcz: Fullscreen,
    pub error_color_map: Fullscreen,
    pub csf_filter_x: Kernel,
    pub csf_filter_y: Kernel,
    pub feature_filter_x: Kernel,
    pub feature_filter_y: Kernel,
    pub color_compare: Kernel,
    pub summarize: Kernel,
}

impl Kernels {
    fn create(device: &Device) -> Result<Kernels> {
        let compiler = shaders::Compiler::new()?;
        let compile = |source: &str, kind: ShaderKind, name: &str| -> Result<Vec<u32>> {
            debug!("compiling {}", name);
            compiler.compile(source, kind, name)
        };

        let fullscreen_vs = compile(
            shaders::FULLSCREEN_VERT,
            ShaderKind::Vertex,
            "fullscreen.vert",
        )?;
        let yycxcz = Fullscreen::create(
            device,
            &fullscreen_vs,
            &compile(shaders::YYCXCZ_FRAG, ShaderKind::Fragment, "yycxcz.frag")?,
            std::mem::size_of::<TransformPush>() as u32,
            vk::Format::R32G32B32A32_SFLOAT,
        )?;
        let error_color_map = Fullscreen::create(
            device,
            &fullscreen_vs,
            &compile(
                shaders::ERROR_COLOR_MAP_FRAG,
                ShaderKind::Fragment,
                "error_color_map.frag",
            )?,
            std::mem::size_of::<ColorMapPush>() as u32,
            vk::Format::R8G8B8A8_SRGB,
        )?;

        let layouts = KernelLayouts::new(device)?;
        let csf_filter_x = Kernel::create(
            device,
            &layouts,
            &compile(
                shaders::CSF_FILTER_X_COMP,
                ShaderKind::Compute,
                "csf_filter_x.comp",
            )?,
            [64, 1],
            false,
        )?;
        let csf_filter_y = Kernel::create(
            device,
            &layouts,
            &compile(
                shaders::CSF_FILTER_Y_COMP,
                ShaderKind::Compute,
                "csf_filter_y.comp",
            )?,
            [1, 64],
            false,
        )?;
        let feature_filter_x = Kernel::create(
            device,
            &layouts,
            &compile(
                shaders::FEATURE_FILTER_X_COMP,
                ShaderKind::Compute,
                "feature_filter_x.comp",
            )?,
            [64, 1],
            true,
        )?;
        let feature_filter_y = Kernel::create(
            device,
            &layouts,
            &compile(
                shaders::FEATURE_FILTER_Y_COMP,
                ShaderKind::Compute,
                "feature_filter_y.comp",
            )?,
            [1, 64],
            true,
        )?;
        let color_compare = Kernel::create(
            device,
            &layouts,
            &compile(
                shaders::COLOR_COMPARE_COMP,
                ShaderKind::Compute,
                "color_compare.comp",
            )?,
            [8, 8],
            true,
        )?;
        let summarize = Kernel::create(
            device,
            &layouts,
            &compile(shaders::SUMMARIZE_COMP, ShaderKind::Compute, "summarize.comp")?,
            [8, 8],
            false,
        )?;

        Ok(Kernels {
            layouts,
            yycxcz,
            error_color_map,
            csf_filter_x,
            csf_filter_y,
            feature_filter_x,
            feature_filter_y,
            color_compare,
            summarize,
        })
    }

    unsafe fn destroy(&mut self, device: &Device) {
        self.yycxcz.destroy(device);
        self.error_color_map.destroy(device);
        self.csf_filter_x.destroy(device);
        self.csf_filter_y.destroy(device);
        self.feature_filter_x.destroy(device);
        self.feature_filter_y.destroy(device);
        self.color_compare.destroy(device);
        self.summarize.destroy(device);
        self.layouts.destroy(device);
    }
}

/// The analysis engine: one per process is plenty, but nothing global.
pub struct Context {
    pub(crate) instance: Instance,
    pub(crate) device: Device,
    pub(crate) kernels: Kernels,
    pub(crate) color_maps: Vec<Buffer>,
    pub(crate) error_histogram: Buffer,
    pub(crate) reference: ImagePacket,
    pub(crate) test: ImagePacket,
    pub(crate) error: Image,
    pub(crate) error_color: Image,
    pub(crate) error_readback: Image,
}

impl Context {
    pub fn new(options: &ContextOptions) -> Result<Context> {
        let instance = Instance::new(&options.instance_extensions, options.validation)?;
        let device = Device::new(
            &instance,
            options.preferred_device.as_deref(),
            !options.instance_extensions.is_empty(),
        )?;
        let kernels = Kernels::create(&device)?;

        let mut color_maps = Vec::with_capacity(ColorMap::ALL.len());
        for map in ColorMap::ALL {
            let table = colormap::table(map);
            let mut bytes = Vec::with_capacity(table.len() * 4);
            for value in table {
                bytes.extend_from_slice(&value.to_ne_bytes());
            }
            color_maps.push(Buffer::device_local(&device, &bytes)?);
        }

        let error_histogram = Buffer::readback(&device, (HISTOGRAM_BINS * 4) as vk::DeviceSize)?;

        Ok(Context {
            instance,
            device,
            kernels,
            color_maps,
            error_histogram,
            reference: ImagePacket::default(),
            test: ImagePacket::default(),
            error: Image::default(),
            error_color: Image::default(),
            error_readback: Image::default(),
        })
    }

    pub(crate) fn color_map_buffer(&self, map: ColorMap) -> &Buffer {
        let index = ColorMap::ALL.iter().position(|&m| m == map).unwrap();
        &self.color_maps[index]
    }

    /// Releases the previous analysis' images after a device-wide idle and
    /// rewinds the image slot counter so descriptor indices stay dense.
    pub fn reset(&mut self) {
        self.device.wait_idle();
        self.reference.reset(&self.device);
        self.test.reset(&self.device);
        self.error.reset(&self.device);
        self.error_color.reset(&self.device);
        self.error_readback.reset(&self.device);
        self.device.image_slots.rewind();
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.reset();
        for mut buffer in self.color_maps.drain(..) {
            buffer.reset(&self.device);
        }
        self.error_histogram.reset(&self.device);
        unsafe {
            self.kernels.destroy(&self.device);
            self.device.destroy();
            self.instance.destroy();
        }
    }
}
