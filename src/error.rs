//! Error taxonomy.
//!
//! Three families: initialization failures (loader through descriptor set),
//! input failures (paths, extensions, extents), and GPU failures (submission
//! or device loss). The `Display` strings of the input-failure variants are
//! part of the C ABI: `flop_get_error` hands them to callers verbatim.

use ash::vk;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to initialize Vulkan loader.")]
    Loader(#[source] ash::LoadingError),

    #[error("Failed to create Vulkan instance.")]
    InstanceCreation(#[source] vk::Result),

    #[error("No suitable physical device found.")]
    NoSuitableDevice,

    #[error("Failed to create Vulkan device.")]
    DeviceCreation(#[source] vk::Result),

    #[error("Failed to create Vulkan command pool.")]
    CommandPoolCreation(#[source] vk::Result),

    #[error("Failed to allocate Vulkan command buffers.")]
    CommandBufferAllocation(#[source] vk::Result),

    #[error("Failed to create Vulkan descriptor pool.")]
    DescriptorPoolCreation(#[source] vk::Result),

    #[error("Failed to create Vulkan descriptor set layout.")]
    DescriptorSetLayoutCreation(#[source] vk::Result),

    #[error("Failed to allocate Vulkan descriptor set.")]
    DescriptorSetAllocation(#[source] vk::Result),

    #[error("No compatible memory type for allocation.")]
    NoSuitableMemoryType,

    #[error("Failed to allocate device memory.")]
    Allocation(#[source] vk::Result),

    #[error("Failed to compile shader: {0}")]
    ShaderCompilation(String),

    #[error("Failed to create GPU pipeline.")]
    PipelineCreation(#[source] vk::Result),

    #[error("Invalid reference path.")]
    InvalidReferencePath,

    #[error("Invalid test path.")]
    InvalidTestPath,

    #[error("Unrecognized image extension.")]
    UnrecognizedExtension,

    #[error("Failed to decode image.")]
    Decode(#[source] image::ImageError),

    #[error("Failed to encode image.")]
    Encode(#[source] image::ImageError),

    #[error("Reference and test images do not have matching extents.")]
    ExtentMismatch,

    #[error("Vulkan call failed.")]
    Vk(#[from] vk::Result),
}

#[cfg(test)]
mod tests {
    use super::*;

    // These strings cross the C ABI; changing them breaks callers that
    // match on flop_get_error().
    #[test]
    fn abi_visible_messages_are_stable() {
        assert_eq!(
            Error::InvalidReferencePath.to_string(),
            "Invalid reference path."
        );
        assert_eq!(Error::InvalidTestPath.to_string(), "Invalid test path.");
        assert_eq!(
            Error::ExtentMismatch.to_string(),
            "Reference and test images do not have matching extents."
        );
    }
}
