//! Physical device selection.

use std::ffi::CStr;

use ash::vk;
use log::info;

use crate::error::{Error, Result};

pub struct PhysicalDeviceSelection {
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub graphics_queue_family_index: u32,
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    unsafe {
        CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned()
    }
}

/// Ranks adapters: discrete first, then integrated, then virtual.
fn type_rank(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        _ => 3,
    }
}

/// Case-insensitive substring match against the adapter name.
pub(crate) fn name_matches(device_name: &str, preferred: &str) -> bool {
    device_name
        .to_lowercase()
        .contains(&preferred.to_lowercase())
}

/// Selects the physical device for the analysis pipeline. When `preferred`
/// is given, the first adapter whose name contains it wins; otherwise the
/// best-ranked adapter by type does.
pub fn select_physical_device(
    instance: &ash::Instance,
    preferred: Option<&str>,
) -> Result<PhysicalDeviceSelection> {
    let physical_devices = unsafe { instance.enumerate_physical_devices()? };

    let mut selected: Option<(vk::PhysicalDevice, vk::PhysicalDeviceProperties)> = None;

    for &physical_device in &physical_devices {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = device_name(&properties);
        info!("physical device: {}", name);

        if let Some(preferred) = preferred {
            if name_matches(&name, preferred) {
                selected = Some((physical_device, properties));
                break;
            }
        } else {
            match selected {
                None => selected = Some((physical_device, properties)),
                Some((_, current)) => {
                    if type_rank(properties.device_type) < type_rank(current.device_type) {
                        selected = Some((physical_device, properties));
                    }
                }
            }
        }
    }

    // A preferred name that matched nothing falls back to the type ranking.
    if selected.is_none() && preferred.is_some() {
        return select_physical_device(instance, None);
    }

    let (physical_device, properties) = selected.ok_or(Error::NoSuitableDevice)?;
    info!("using device: {}", device_name(&properties));

    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let graphics_queue_family_index = queue_families
        .iter()
        .enumerate()
        .find(|(_, family)| {
            family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map(|(index, _)| index as u32)
        .ok_or(Error::NoSuitableDevice)?;

    Ok(PhysicalDeviceSelection {
        physical_device,
        properties,
        graphics_queue_family_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_match_is_case_insensitive_substring() {
        assert!(name_matches("NVIDIA GeForce RTX 3080", "geforce"));
        assert!(name_matches("AMD Radeon RX 6800", "RADEON"));
        assert!(!name_matches("llvmpipe (LLVM 15.0.7)", "radeon"));
    }

    #[test]
    fn discrete_outranks_integrated_and_virtual() {
        assert!(
            type_rank(vk::PhysicalDeviceType::DISCRETE_GPU)
                < type_rank(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            type_rank(vk::PhysicalDeviceType::INTEGRATED_GPU)
                < type_rank(vk::PhysicalDeviceType::VIRTUAL_GPU)
        );
    }
}
