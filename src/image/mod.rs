//! Image resources.
//!
//! Three creation variants cover the pipeline: upload-from-file sources,
//! GPU-only derived images (storage + sampled, optionally renderable), and
//! linear-tiled host-readable targets. Every image carries its bindless slot
//! and a layout tracker; the barrier factories below are the only way the
//! pass schedule expresses synchronization.

use std::path::Path;

use ash::vk;

use crate::alloc::Allocation;
use crate::buffer;
use crate::device::Device;
use crate::error::Result;
use crate::handle::Bindless;

pub mod barrier;
pub mod codec;

pub use barrier::{LayoutTracker, Transition};
pub use codec::DecodedImage;

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn color_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// A 2D image bound into the bindless arrays.
pub struct Image {
    image: vk::Image,
    view: Bindless<vk::ImageView>,
    allocation: Allocation,
    layout: LayoutTracker,
    extent: vk::Extent2D,
    channels: u32,
    hdr: bool,
}

impl Default for Image {
    fn default() -> Image {
        Image {
            image: vk::Image::null(),
            view: Bindless::new(vk::ImageView::null(), 0),
            allocation: Allocation::default(),
            layout: LayoutTracker::default(),
            extent: vk::Extent2D {
                width: 0,
                height: 0,
            },
            channels: 0,
            hdr: false,
        }
    }
}

impl Image {
    /// Uploads a decoded source through a staging buffer and registers it as
    /// a sampled image. The result is left in the shader-read-only layout.
    pub fn from_decoded(device: &Device, decoded: &DecodedImage) -> Result<Image> {
        let format = if decoded.hdr {
            vk::Format::R32G32B32A32_SFLOAT
        } else {
            vk::Format::R8G8B8A8_SRGB
        };
        let extent = vk::Extent2D {
            width: decoded.width,
            height: decoded.height,
        };

        let (staging, staging_allocation) = buffer::create_staging(device, &decoded.texels)?;

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let vkd = device.pointers();
        let image = unsafe { vkd.create_image(&image_info, None)? };
        let requirements = unsafe { vkd.get_image_memory_requirements(image) };
        let allocation = device.allocator.allocate(
            vkd,
            requirements,
            vk::MemoryPropertyFlags::empty(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        unsafe {
            vkd.bind_image_memory(image, allocation.device_memory, 0)?;
        }

        device.one_time_submit(|vkd, cb| unsafe {
            let to_transfer = vk::ImageMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::NONE)
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(color_range())
                .build();
            vkd.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );

            let copy = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: color_layers(),
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                },
            };
            vkd.cmd_copy_buffer_to_image(
                cb,
                staging,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            );

            let to_sampled = vk::ImageMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::MEMORY_READ)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(color_range())
                .build();
            vkd.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_sampled],
            );
        })?;

        buffer::destroy_staging(device, staging, staging_allocation);

        let view = create_view(vkd, image, format)?;
        let slot = device.image_slots.allocate();
        device.register_sampled_image(view, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, slot);

        let mut layout = LayoutTracker::default();
        layout.assume(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        Ok(Image {
            image,
            view: Bindless::new(view, slot),
            allocation,
            layout,
            extent,
            channels: decoded.channels,
            hdr: decoded.hdr,
        })
    }

    /// Creates a GPU-only image with the extent of `other`. Derived images
    /// always carry storage, sampled and transfer usages; `attachment` adds
    /// the color-attachment usage for fullscreen targets. The sole exception
    /// is an sRGB8 attachment (the color-mapped output): sRGB formats cannot
    /// back storage images, so it drops the storage usage.
    pub fn derived(
        device: &Device,
        other: &Image,
        format: vk::Format,
        attachment: bool,
    ) -> Result<Image> {
        let mut usage = vk::ImageUsageFlags::STORAGE
            | vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::TRANSFER_SRC;
        if attachment {
            if format == vk::Format::R8G8B8A8_SRGB {
                usage = vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC;
            } else {
                usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
            }
        }

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: other.extent.width,
                height: other.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let vkd = device.pointers();
        let image = unsafe { vkd.create_image(&image_info, None)? };
        let requirements = unsafe { vkd.get_image_memory_requirements(image) };
        let allocation = device.allocator.allocate(
            vkd,
            requirements,
            vk::MemoryPropertyFlags::empty(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        unsafe {
            vkd.bind_image_memory(image, allocation.device_memory, 0)?;
        }

        let view = create_view(vkd, image, format)?;
        let slot = device.image_slots.allocate();
        if usage.contains(vk::ImageUsageFlags::STORAGE) {
            device.register_storage_image(view, slot);
        }
        // Derived images are sampled while they sit in the general layout.
        device.register_sampled_image(view, vk::ImageLayout::GENERAL, slot);

        Ok(Image {
            image,
            view: Bindless::new(view, slot),
            allocation,
            layout: LayoutTracker::default(),
            extent: other.extent,
            channels: other.channels,
            hdr: other.hdr,
        })
    }

    /// Creates a linear-tiled, host-visible copy target with the extent of
    /// `other`. Not bound into the descriptor set.
    pub fn readback_target(device: &Device, other: &Image, format: vk::Format) -> Result<Image> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: other.extent.width,
                height: other.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::LINEAR)
            .usage(vk::ImageUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let vkd = device.pointers();
        let image = unsafe { vkd.create_image(&image_info, None)? };
        let requirements = unsafe { vkd.get_image_memory_requirements(image) };
        let allocation = device.allocator.allocate(
            vkd,
            requirements,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_CACHED,
        )?;
        unsafe {
            vkd.bind_image_memory(image, allocation.device_memory, 0)?;
        }

        Ok(Image {
            image,
            view: Bindless::new(vk::ImageView::null(), 0),
            allocation,
            layout: LayoutTracker::default(),
            extent: other.extent,
            channels: other.channels,
            hdr: false,
        })
    }

    pub fn is_null(&self) -> bool {
        self.image == vk::Image::null()
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn hdr(&self) -> bool {
        self.hdr
    }

    /// Bindless slot shared by the sampled and storage views.
    pub fn slot(&self) -> u32 {
        self.view.slot()
    }

    pub fn view(&self) -> vk::ImageView {
        *self.view
    }

    /// Releases the image. Safe to call on an empty handle.
    pub fn reset(&mut self, device: &Device) {
        if self.is_null() {
            return;
        }
        let vkd = device.pointers();
        unsafe {
            if self.view() != vk::ImageView::null() {
                vkd.destroy_image_view(self.view(), None);
            }
            vkd.destroy_image(self.image, None);
        }
        device.allocator.free(vkd, self.allocation);
        *self = Image::default();
    }

    fn vk_barrier(&self, transition: Transition) -> vk::ImageMemoryBarrier {
        vk::ImageMemoryBarrier::builder()
            .src_access_mask(transition.src_access)
            .dst_access_mask(transition.dst_access)
            .old_layout(transition.old_layout)
            .new_layout(transition.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(color_range())
            .build()
    }

    pub fn start_barrier(&mut self, layout: vk::ImageLayout) -> vk::ImageMemoryBarrier {
        let transition = self.layout.start(layout);
        self.vk_barrier(transition)
    }

    pub fn raw_barrier(&mut self, src_access: vk::AccessFlags) -> vk::ImageMemoryBarrier {
        let transition = self.layout.raw(src_access);
        self.vk_barrier(transition)
    }

    pub fn war_barrier(&mut self) -> vk::ImageMemoryBarrier {
        let transition = self.layout.war();
        self.vk_barrier(transition)
    }

    pub fn waw_barrier(&mut self) -> vk::ImageMemoryBarrier {
        let transition = self.layout.waw();
        self.vk_barrier(transition)
    }

    pub fn rar_barrier(&mut self, layout: vk::ImageLayout) -> vk::ImageMemoryBarrier {
        let transition = self.layout.rar(layout);
        self.vk_barrier(transition)
    }

    pub fn sample_barrier(&mut self, src_access: vk::AccessFlags) -> vk::ImageMemoryBarrier {
        let transition = self.layout.sample(src_access);
        self.vk_barrier(transition)
    }

    pub fn blit_barrier(&mut self) -> vk::ImageMemoryBarrier {
        let transition = self.layout.blit();
        self.vk_barrier(transition)
    }

    pub fn readback_barrier(&mut self) -> vk::ImageMemoryBarrier {
        let transition = self.layout.readback();
        self.vk_barrier(transition)
    }

    /// Records a whole-image copy into `target` (transfer-src to
    /// transfer-dst layouts are the caller's responsibility).
    pub fn copy_to(&self, device: &Device, cb: vk::CommandBuffer, target: &Image) {
        let copy = vk::ImageCopy {
            src_subresource: color_layers(),
            src_offset: vk::Offset3D::default(),
            dst_subresource: color_layers(),
            dst_offset: vk::Offset3D::default(),
            extent: vk::Extent3D {
                width: target.extent.width,
                height: target.extent.height,
                depth: 1,
            },
        };
        unsafe {
            device.pointers().cmd_copy_image(
                cb,
                self.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                target.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            );
        }
    }

    /// Maps a linear readback image and encodes it as PNG at the device's
    /// row pitch.
    pub fn write_png(&self, device: &Device, path: &Path) -> Result<()> {
        let vkd = device.pointers();
        let subresource = vk::ImageSubresource {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            array_layer: 0,
        };
        let layout = unsafe { vkd.get_image_subresource_layout(self.image, subresource) };

        unsafe {
            let data = vkd.map_memory(
                self.allocation.device_memory,
                0,
                vk::WHOLE_SIZE,
                vk::MemoryMapFlags::empty(),
            )? as *const u8;
            let texels = std::slice::from_raw_parts(
                data.add(layout.offset as usize),
                (self.allocation.size - layout.offset) as usize,
            );
            let result = codec::encode_png(
                path,
                self.extent.width,
                self.extent.height,
                layout.row_pitch as usize,
                texels,
            );
            vkd.unmap_memory(self.allocation.device_memory);
            result
        }
    }
}

fn create_view(vkd: &ash::Device, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(color_range());
    let view = unsafe { vkd.create_image_view(&view_info, None)? };
    Ok(view)
}

/// The derived images of one side (reference or test) of an analysis.
#[derive(Default)]
pub struct ImagePacket {
    /// The decoded input.
    pub source: Image,
    /// Linear Yy Cx Cz, written by the colorspace fullscreen pass.
    pub yycxcz: Image,
    /// Intermediate after the horizontal CSF convolution.
    pub yycxcz_blur_x: Image,
    /// Final output of the separable CSF convolution.
    pub yycxcz_blurred: Image,
    /// Intermediate after the horizontal feature-detection convolution.
    pub feature_blur_x: Image,
}

impl ImagePacket {
    pub fn reset(&mut self, device: &Device) {
        self.source.reset(device);
        self.yycxcz.reset(device);
        self.yycxcz_blur_x.reset(device);
        self.yycxcz_blurred.reset(device);
        self.feature_blur_x.reset(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_image_is_null() {
        let image = Image::default();
        assert!(image.is_null());
        assert_eq!(image.width(), 0);
        assert_eq!(image.height(), 0);
    }
}
