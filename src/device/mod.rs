//! Device creation.
//!
//! One logical device with a single graphics queue runs every pass. The
//! device owns the bindless descriptor model: a single descriptor set with
//! four bindings (sampled images, storage images, storage buffers, one
//! immutable sampler) that is bound once per pass; shaders pick resources by
//! push-constant index. Resource creation registers descriptors with
//! update-after-bind writes, so the orchestrator never touches descriptors.

use std::ffi::CStr;
use std::os::raw::c_char;

use ash::extensions::khr::DynamicRendering;
use ash::vk;
use log::debug;

use crate::alloc::Allocator;
use crate::error::{Error, Result};
use crate::handle::SlotAllocator;
use crate::instance::Instance;

pub mod physical_device;

pub use physical_device::select_physical_device;

/// Capacity of each bindless descriptor array.
pub const BINDLESS_CAPACITY: u32 = 10_000;

/// Command buffer used for staging transfers at resource creation.
pub const STAGING_COMMAND_BUFFER: usize = 0;
/// Command buffer used to record an analysis.
pub const ANALYSIS_COMMAND_BUFFER: usize = 1;

const COMMAND_BUFFER_COUNT: u32 = 2;

/// Bindless descriptor bindings.
const SAMPLED_IMAGE_BINDING: u32 = 0;
const STORAGE_IMAGE_BINDING: u32 = 1;
const STORAGE_BUFFER_BINDING: u32 = 2;
const SAMPLER_BINDING: u32 = 3;

/// Vulkan device plus everything scoped to it: the graphics queue, the
/// allocator, the command pool, and the single bindless descriptor set.
pub struct Device {
    pointers: ash::Device,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) graphics_queue_family_index: u32,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) command_pool: vk::CommandPool,
    pub(crate) command_buffers: Vec<vk::CommandBuffer>,
    pub(crate) descriptor_pool: vk::DescriptorPool,
    pub(crate) descriptor_set_layout: vk::DescriptorSetLayout,
    pub(crate) descriptor_set: vk::DescriptorSet,
    pub(crate) sampler: vk::Sampler,
    pub(crate) dynamic_rendering: DynamicRendering,
    pub(crate) allocator: Allocator,
    /// Slot allocators for the bindless arrays. Images share one counter
    /// across the sampled and storage bindings; buffers have their own.
    pub(crate) image_slots: SlotAllocator,
    pub(crate) buffer_slots: SlotAllocator,
}

impl Device {
    pub fn new(instance: &Instance, preferred: Option<&str>, swapchain: bool) -> Result<Device> {
        let vki = instance.pointers();
        let selection = select_physical_device(vki, preferred)?;

        let queue_priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(selection.graphics_queue_family_index)
            .queue_priorities(&queue_priorities)
            .build()];

        let mut extension_names: Vec<*const c_char> = vec![
            vk::ExtDescriptorIndexingFn::name().as_ptr(),
            vk::KhrTimelineSemaphoreFn::name().as_ptr(),
            vk::ExtShaderSubgroupBallotFn::name().as_ptr(),
            vk::ExtShaderSubgroupVoteFn::name().as_ptr(),
            DynamicRendering::name().as_ptr(),
        ];
        if swapchain {
            extension_names.push(ash::extensions::khr::Swapchain::name().as_ptr());
        }

        let features = vk::PhysicalDeviceFeatures::builder()
            .robust_buffer_access(true)
            .vertex_pipeline_stores_and_atomics(true)
            .fragment_stores_and_atomics(true)
            .shader_uniform_buffer_array_dynamic_indexing(true)
            .shader_sampled_image_array_dynamic_indexing(true)
            .shader_storage_buffer_array_dynamic_indexing(true)
            .shader_storage_image_array_dynamic_indexing(true)
            .build();

        let mut dynamic_rendering_features =
            vk::PhysicalDeviceDynamicRenderingFeatures::builder().dynamic_rendering(true);

        let mut vulkan12_features = vk::PhysicalDeviceVulkan12Features::builder()
            .descriptor_indexing(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            .shader_storage_image_array_non_uniform_indexing(true)
            .descriptor_binding_uniform_buffer_update_after_bind(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .descriptor_binding_storage_image_update_after_bind(true)
            .descriptor_binding_storage_buffer_update_after_bind(true)
            .descriptor_binding_update_unused_while_pending(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_variable_descriptor_count(true)
            .runtime_descriptor_array(true)
            .timeline_semaphore(true);

        let mut features2 = vk::PhysicalDeviceFeatures2::builder()
            .features(features)
            .push_next(&mut vulkan12_features)
            .push_next(&mut dynamic_rendering_features);

        let device_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features2);

        let pointers = unsafe {
            vki.create_device(selection.physical_device, &device_info, None)
                .map_err(Error::DeviceCreation)?
        };

        let graphics_queue =
            unsafe { pointers.get_device_queue(selection.graphics_queue_family_index, 0) };

        let allocator = Allocator::new(vki, selection.physical_device);

        let command_pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(selection.graphics_queue_family_index);
        let command_pool = unsafe {
            pointers
                .create_command_pool(&command_pool_info, None)
                .map_err(Error::CommandPoolCreation)?
        };

        let command_buffer_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(COMMAND_BUFFER_COUNT);
        let command_buffers = unsafe {
            pointers
                .allocate_command_buffers(&command_buffer_info)
                .map_err(Error::CommandBufferAllocation)?
        };

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: BINDLESS_CAPACITY,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: BINDLESS_CAPACITY,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: BINDLESS_CAPACITY,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: 1,
            },
        ];
        let descriptor_pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let descriptor_pool = unsafe {
            pointers
                .create_descriptor_pool(&descriptor_pool_info, None)
                .map_err(Error::DescriptorPoolCreation)?
        };

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .anisotropy_enable(false)
            .compare_enable(false)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
            .unnormalized_coordinates(false);
        let sampler = unsafe { pointers.create_sampler(&sampler_info, None)? };

        let immutable_samplers = [sampler];
        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(SAMPLED_IMAGE_BINDING)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(BINDLESS_CAPACITY)
                .stage_flags(vk::ShaderStageFlags::COMPUTE | vk::ShaderStageFlags::FRAGMENT)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(STORAGE_IMAGE_BINDING)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(BINDLESS_CAPACITY)
                .stage_flags(vk::ShaderStageFlags::COMPUTE | vk::ShaderStageFlags::FRAGMENT)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(STORAGE_BUFFER_BINDING)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(BINDLESS_CAPACITY)
                .stage_flags(
                    vk::ShaderStageFlags::VERTEX
                        | vk::ShaderStageFlags::COMPUTE
                        | vk::ShaderStageFlags::FRAGMENT,
                )
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(SAMPLER_BINDING)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .stage_flags(vk::ShaderStageFlags::COMPUTE | vk::ShaderStageFlags::FRAGMENT)
                .immutable_samplers(&immutable_samplers)
                .build(),
        ];

        let bindless_flags = vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND;
        let binding_flags = [
            bindless_flags,
            bindless_flags,
            bindless_flags,
            vk::DescriptorBindingFlags::empty(),
        ];
        let mut binding_flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder()
            .binding_flags(&binding_flags);

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .bindings(&bindings)
            .push_next(&mut binding_flags_info);
        let descriptor_set_layout = unsafe {
            pointers
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(Error::DescriptorSetLayoutCreation)?
        };

        let set_layouts = [descriptor_set_layout];
        let set_alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&set_layouts);
        let descriptor_set = unsafe {
            pointers
                .allocate_descriptor_sets(&set_alloc_info)
                .map_err(Error::DescriptorSetAllocation)?[0]
        };

        let dynamic_rendering = DynamicRendering::new(vki, &pointers);

        Ok(Device {
            pointers,
            physical_device: selection.physical_device,
            graphics_queue_family_index: selection.graphics_queue_family_index,
            graphics_queue,
            command_pool,
            command_buffers,
            descriptor_pool,
            descriptor_set_layout,
            descriptor_set,
            sampler,
            dynamic_rendering,
            allocator,
            image_slots: SlotAllocator::new(),
            buffer_slots: SlotAllocator::new(),
        })
    }

    pub fn pointers(&self) -> &ash::Device {
        &self.pointers
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn graphics_queue_family_index(&self) -> u32 {
        self.graphics_queue_family_index
    }

    /// Writes a sampled-image descriptor at `slot` of binding 0.
    pub(crate) fn register_sampled_image(
        &self,
        view: vk::ImageView,
        layout: vk::ImageLayout,
        slot: u32,
    ) {
        let image_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: view,
            image_layout: layout,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.descriptor_set)
            .dst_binding(SAMPLED_IMAGE_BINDING)
            .dst_array_element(slot)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .image_info(&image_info)
            .build();
        unsafe {
            self.pointers.update_descriptor_sets(&[write], &[]);
        }
    }

    /// Writes a storage-image descriptor at `slot` of binding 1.
    pub(crate) fn register_storage_image(&self, view: vk::ImageView, slot: u32) {
        let image_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: view,
            image_layout: vk::ImageLayout::GENERAL,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.descriptor_set)
            .dst_binding(STORAGE_IMAGE_BINDING)
            .dst_array_element(slot)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .image_info(&image_info)
            .build();
        unsafe {
            self.pointers.update_descriptor_sets(&[write], &[]);
        }
    }

    /// Writes a storage-buffer descriptor at `slot` of binding 2.
    pub(crate) fn register_storage_buffer(
        &self,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
        slot: u32,
    ) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.descriptor_set)
            .dst_binding(STORAGE_BUFFER_BINDING)
            .dst_array_element(slot)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(&buffer_info)
            .build();
        unsafe {
            self.pointers.update_descriptor_sets(&[write], &[]);
        }
    }

    /// Records `record` into the staging command buffer, submits it to the
    /// graphics queue and waits for completion. Used by resource uploads.
    pub(crate) fn one_time_submit(
        &self,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer),
    ) -> Result<()> {
        let cb = self.command_buffers[STAGING_COMMAND_BUFFER];
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.pointers.begin_command_buffer(cb, &begin_info)?;
            record(&self.pointers, cb);
            self.pointers.end_command_buffer(cb)?;

            let command_buffers = [cb];
            let submit = vk::SubmitInfo::builder()
                .command_buffers(&command_buffers)
                .build();
            self.pointers
                .queue_submit(self.graphics_queue, &[submit], vk::Fence::null())?;
            self.pointers.queue_wait_idle(self.graphics_queue)?;
        }
        Ok(())
    }

    pub fn wait_idle(&self) {
        debug!("waiting for device idle");
        unsafe {
            // Device loss here poisons the module; nothing to recover.
            let _ = self.pointers.device_wait_idle();
        }
    }

    pub(crate) unsafe fn destroy(&mut self) {
        self.wait_idle();
        self.pointers.destroy_sampler(self.sampler, None);
        self.pointers
            .destroy_descriptor_pool(self.descriptor_pool, None);
        self.pointers
            .destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        self.pointers
            .destroy_command_pool(self.command_pool, None);
        self.pointers.destroy_device(None);
    }
}
