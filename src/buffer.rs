//! Storage buffers.
//!
//! Two flavors back the pipeline: device-local buffers filled once through a
//! staging copy (the color-map tables) and persistently mapped host-visible
//! buffers the GPU writes and the host reads (the error histogram). Both are
//! registered into the storage-buffer bindless array.

use ash::vk;

use crate::alloc::Allocation;
use crate::device::Device;
use crate::error::Result;
use crate::handle::Bindless;

/// Creates a host-visible staging buffer prefilled with `data`.
pub(crate) fn create_staging(
    device: &Device,
    data: &[u8],
) -> Result<(vk::Buffer, Allocation)> {
    let vkd = device.pointers();
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(data.len() as vk::DeviceSize)
        .usage(vk::BufferUsageFlags::TRANSFER_SRC)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let buffer = unsafe { vkd.create_buffer(&buffer_info, None)? };
    let requirements = unsafe { vkd.get_buffer_memory_requirements(buffer) };
    let allocation = device.allocator.allocate(
        vkd,
        requirements,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        vk::MemoryPropertyFlags::empty(),
    )?;
    unsafe {
        vkd.bind_buffer_memory(buffer, allocation.device_memory, 0)?;
        let mapped = vkd.map_memory(
            allocation.device_memory,
            0,
            vk::WHOLE_SIZE,
            vk::MemoryMapFlags::empty(),
        )? as *mut u8;
        std::ptr::copy_nonoverlapping(data.as_ptr(), mapped, data.len());
        vkd.unmap_memory(allocation.device_memory);
    }
    Ok((buffer, allocation))
}

pub(crate) fn destroy_staging(device: &Device, buffer: vk::Buffer, allocation: Allocation) {
    let vkd = device.pointers();
    unsafe {
        vkd.destroy_buffer(buffer, None);
    }
    device.allocator.free(vkd, allocation);
}

/// A storage buffer bound into the bindless array.
pub struct Buffer {
    buffer: Bindless<vk::Buffer>,
    allocation: Allocation,
    size: vk::DeviceSize,
    mapped: *mut u8,
}

// The mapped pointer has no thread affinity; access is serialized by the
// single-threaded analysis contract.
unsafe impl Send for Buffer {}

impl Default for Buffer {
    fn default() -> Buffer {
        Buffer {
            buffer: Bindless::new(vk::Buffer::null(), 0),
            allocation: Allocation::default(),
            size: 0,
            mapped: std::ptr::null_mut(),
        }
    }
}

impl Buffer {
    /// Creates a device-local storage buffer holding `data`, uploaded
    /// through staging memory.
    pub fn device_local(device: &Device, data: &[u8]) -> Result<Buffer> {
        let vkd = device.pointers();
        let (staging, staging_allocation) = create_staging(device, data)?;

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(data.len() as vk::DeviceSize)
            .usage(vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { vkd.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { vkd.get_buffer_memory_requirements(buffer) };
        let allocation = device.allocator.allocate(
            vkd,
            requirements,
            vk::MemoryPropertyFlags::empty(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        unsafe {
            vkd.bind_buffer_memory(buffer, allocation.device_memory, 0)?;
        }

        device.one_time_submit(|vkd, cb| unsafe {
            let copy = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: data.len() as vk::DeviceSize,
            };
            vkd.cmd_copy_buffer(cb, staging, buffer, &[copy]);
        })?;

        destroy_staging(device, staging, staging_allocation);

        let slot = device.buffer_slots.allocate();
        device.register_storage_buffer(buffer, data.len() as vk::DeviceSize, slot);

        Ok(Buffer {
            buffer: Bindless::new(buffer, slot),
            allocation,
            size: data.len() as vk::DeviceSize,
            mapped: std::ptr::null_mut(),
        })
    }

    /// Creates a host-visible storage buffer the GPU writes and the host
    /// reads. The mapping stays live for the buffer's lifetime.
    pub fn readback(device: &Device, size: vk::DeviceSize) -> Result<Buffer> {
        let vkd = device.pointers();
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk::BufferUsageFlags::STORAGE_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { vkd.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { vkd.get_buffer_memory_requirements(buffer) };
        let allocation = device.allocator.allocate(
            vkd,
            requirements,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_CACHED,
        )?;
        let mapped = unsafe {
            vkd.bind_buffer_memory(buffer, allocation.device_memory, 0)?;
            vkd.map_memory(
                allocation.device_memory,
                0,
                vk::WHOLE_SIZE,
                vk::MemoryMapFlags::empty(),
            )? as *mut u8
        };

        let slot = device.buffer_slots.allocate();
        device.register_storage_buffer(buffer, size, slot);

        Ok(Buffer {
            buffer: Bindless::new(buffer, slot),
            allocation,
            size,
            mapped,
        })
    }

    pub fn slot(&self) -> u32 {
        self.buffer.slot()
    }

    /// Zeroes the buffer through its mapping.
    pub fn zero(&mut self) {
        if !self.mapped.is_null() {
            unsafe {
                std::ptr::write_bytes(self.mapped, 0, self.size as usize);
            }
        }
    }

    /// Copies `out.len()` little-endian u32 counters out of the mapping.
    pub fn read_u32s(&self, out: &mut [u32]) {
        if self.mapped.is_null() {
            return;
        }
        debug_assert!(out.len() * 4 <= self.size as usize);
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.mapped as *const u32,
                out.as_mut_ptr(),
                out.len(),
            );
        }
    }

    pub fn reset(&mut self, device: &Device) {
        if *self.buffer == vk::Buffer::null() {
            return;
        }
        let vkd = device.pointers();
        unsafe {
            if !self.mapped.is_null() {
                vkd.unmap_memory(self.allocation.device_memory);
            }
            vkd.destroy_buffer(*self.buffer, None);
        }
        device.allocator.free(vkd, self.allocation);
        *self = Buffer::default();
    }
}
