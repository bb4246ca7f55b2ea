use crate::core::devices::SuitabilityError;

use vulkanalia::{prelude::v1_0::*, vk::KhrSurfaceExtension};
use anyhow::{anyhow, Result};

/// Returns the index of the first queue family of the device
/// that supports graphics operations and can present to the
/// given surface.
pub fn get_graphics_family_index(
    instance: &Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Result<u32> {
    // Almost every operation in Vulkan requires commands to be
    // submitted to a queue, and each queue family only allows
    // a subset of commands. The engine drives everything from
    // a single queue, so the family must accept both drawing
    // commands and presentation requests.
    let families = unsafe {
        instance.get_physical_device_queue_family_properties(physical_device)
    };

    for (index, properties) in families.iter().enumerate() {
        if !properties.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            continue;
        }

        let presentable = unsafe {
            instance.get_physical_device_surface_support_khr(
                physical_device,
                index as u32,
                surface,
            )?
        };

        if presentable {
            return Ok(index as u32);
        }
    }

    Err(anyhow!(SuitabilityError("Missing a graphics queue family able to present.")))
}
