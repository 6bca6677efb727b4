//! Device-memory allocation.
//!
//! One dedicated `VkDeviceMemory` block per resource. An analysis allocates
//! on the order of a dozen images and buffers, so sub-allocating pools would
//! buy nothing; what matters is picking the right memory type for the
//! requested host access.

use ash::vk;
use log::debug;

use crate::error::{Error, Result};

/// A block of device memory bound to a single resource.
#[derive(Debug, Default, Clone, Copy)]
pub struct Allocation {
    pub device_memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

/// Finds a memory type compatible with `memory_type_bits`, preferring types
/// that carry `preferred_flags` on top of `required_flags`.
pub fn find_compatible_memory_type_index(
    memory_types: &[vk::MemoryType],
    required_flags: vk::MemoryPropertyFlags,
    preferred_flags: vk::MemoryPropertyFlags,
    memory_type_bits: u32,
) -> Option<u32> {
    memory_types
        .iter()
        .enumerate()
        .filter(|(_, mt)| mt.property_flags.contains(required_flags | preferred_flags))
        .chain(
            memory_types
                .iter()
                .enumerate()
                .filter(|(_, mt)| mt.property_flags.contains(required_flags)),
        )
        .find(|&(mt_index, _)| (1 << (mt_index as u32)) & memory_type_bits != 0)
        .map(|(mt_index, _)| mt_index as u32)
}

/// Memory allocator for vulkan device heaps.
pub struct Allocator {
    memory_types: Vec<vk::MemoryType>,
}

impl Allocator {
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> Allocator {
        let props = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let memory_types = props.memory_types[0..props.memory_type_count as usize].to_vec();

        Allocator { memory_types }
    }

    pub fn allocate(
        &self,
        device: &ash::Device,
        requirements: vk::MemoryRequirements,
        required_flags: vk::MemoryPropertyFlags,
        preferred_flags: vk::MemoryPropertyFlags,
    ) -> Result<Allocation> {
        let memory_type_index = find_compatible_memory_type_index(
            &self.memory_types,
            required_flags,
            preferred_flags,
            requirements.memory_type_bits,
        )
        .ok_or(Error::NoSuitableMemoryType)?;

        debug!(
            "alloc: {} bytes in memory type {}",
            requirements.size, memory_type_index
        );

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let device_memory = unsafe {
            device
                .allocate_memory(&alloc_info, None)
                .map_err(Error::Allocation)?
        };

        Ok(Allocation {
            device_memory,
            size: requirements.size,
        })
    }

    pub fn free(&self, device: &ash::Device, allocation: Allocation) {
        if allocation.device_memory != vk::DeviceMemory::null() {
            unsafe {
                device.free_memory(allocation.device_memory, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_type(flags: vk::MemoryPropertyFlags) -> vk::MemoryType {
        vk::MemoryType {
            property_flags: flags,
            heap_index: 0,
        }
    }

    #[test]
    fn prefers_types_with_preferred_flags() {
        let types = [
            memory_type(vk::MemoryPropertyFlags::HOST_VISIBLE),
            memory_type(
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ),
        ];
        let picked = find_compatible_memory_type_index(
            &types,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_COHERENT,
            0b11,
        );
        assert_eq!(picked, Some(1));
    }

    #[test]
    fn falls_back_to_required_only() {
        let types = [memory_type(vk::MemoryPropertyFlags::DEVICE_LOCAL)];
        let picked = find_compatible_memory_type_index(
            &types,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_CACHED,
            0b1,
        );
        assert_eq!(picked, Some(0));
    }

    #[test]
    fn respects_memory_type_bits() {
        let types = [
            memory_type(vk::MemoryPropertyFlags::DEVICE_LOCAL),
            memory_type(vk::MemoryPropertyFlags::DEVICE_LOCAL),
        ];
        let picked = find_compatible_memory_type_index(
            &types,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::empty(),
            0b10,
        );
        assert_eq!(picked, Some(1));
    }
}
