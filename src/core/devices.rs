use std::collections::HashSet;

use crate::{
    config::Config,
    core::{
        instance::{PORTABILITY_MACOS_VERSION, VALIDATION_LAYER},
        queues::get_graphics_family_index,
        swapchain::get_swapchain_support,
    },
    error::{CheckVk, RenderError},
};

use thiserror::Error;
use vulkanalia::{prelude::v1_0::*, Version};
use anyhow::{anyhow, Result};
use log::*;

/// Required extensions:
///  - `KHR_SWAPCHAIN_EXTENSION`: required for creating a
///    swapchain. This is an extension because it isn't part of
///    the core Vulkan API, which is render-agnostic.
pub const REQUIRED_EXTENSIONS: &[vk::ExtensionName] = &[
    vk::KHR_SWAPCHAIN_EXTENSION.name,
];

/// Reason why an adapter was skipped during selection.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct SuitabilityError(pub &'static str);

/// The adapter chosen for rendering, with the queue family the
/// engine submits to.
#[derive(Debug, Clone, Copy)]
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub graphics_queue_family: u32,
}

fn check_physical_device_extensions(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<()> {
    let extensions = unsafe {
        instance
            .enumerate_device_extension_properties(physical_device, None)?
            .iter()
            .map(|e| e.extension_name)
            .collect::<HashSet<_>>()
    };

    if REQUIRED_EXTENSIONS.iter().all(|e| extensions.contains(e)) {
        Ok(())
    } else {
        Err(anyhow!(SuitabilityError("Missing required device extensions.")))
    }
}

fn check_physical_device(
    instance: &Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    min_api_version: Version,
) -> Result<u32> {
    // An adapter is only usable if it passes every check below,
    // in order of cost. The API version comes from the properties
    // already in memory; the queue families, extensions and
    // surface support each need another query to the driver.
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    if Version::from(properties.api_version) < min_api_version {
        return Err(anyhow!(SuitabilityError("API version too old.")));
    }

    // Work is submitted to queues, which come in families that
    // each support a subset of operations. One family must both
    // run graphics commands and present to this surface.
    let family = get_graphics_family_index(instance, surface, physical_device)?;
    check_physical_device_extensions(instance, physical_device)?;

    // The surface must expose at least one image format and one
    // presentation mode for a swapchain to be created.
    let support = get_swapchain_support(instance, surface, physical_device)?;
    if support.formats.is_empty() || support.present_modes.is_empty() {
        return Err(anyhow!(SuitabilityError("Insufficient swapchain support.")));
    }

    Ok(family)
}

/// Picks the first adapter that meets the minimum API version
/// and can present to the surface. There is no ranking between
/// suitable adapters.
pub fn pick_physical_device(
    instance: &Instance,
    surface: vk::SurfaceKHR,
    config: &Config,
) -> Result<SelectedDevice> {
    // Adapters are tried in the order the driver lists them.
    // Rejected ones are logged with the reason, which makes a
    // "no suitable device" failure easier to diagnose.
    for device in unsafe { instance.enumerate_physical_devices()? } {
        let properties = unsafe { instance.get_physical_device_properties(device) };

        match check_physical_device(instance, surface, device, config.min_api_version) {
            Ok(graphics_queue_family) => {
                info!("Selected physical device: {}", properties.device_name);
                return Ok(SelectedDevice {
                    physical_device: device,
                    graphics_queue_family,
                });
            },
            Err(error) => {
                warn!("Skipping physical device ({}): {}", properties.device_name, error);
            },
        }
    }

    Err(anyhow!(RenderError::NoSuitableDevice))
}

pub fn create_logical_device(
    entry: &Entry,
    instance: &Instance,
    selected: SelectedDevice,
    config: &Config,
) -> Result<(Device, vk::Queue)> {
    // The logical device is the application's connection to the
    // adapter: queues are requested when it is created, and every
    // other object is created from it. A single queue from the
    // graphics family is enough, since it also presents. Its
    // priority only matters between queues of the same device.
    let priorities = &[1.0];
    let queue_infos = &[
        vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(selected.graphics_queue_family)
            .queue_priorities(priorities)
            .build()
    ];

    // Device layers are deprecated but still set for older
    // implementations.
    let layers = if config.validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        vec![]
    };

    let mut extensions = REQUIRED_EXTENSIONS
        .iter()
        .map(|e| e.as_ptr())
        .collect::<Vec<_>>();

    if cfg!(target_os = "macos") && unsafe { entry.version()? } >= PORTABILITY_MACOS_VERSION {
        extensions.push(vk::KHR_PORTABILITY_SUBSET_EXTENSION.name.as_ptr());
    }

    // No optional feature (geometry shaders, wide lines, ...) is
    // needed to draw a triangle.
    let features = vk::PhysicalDeviceFeatures::builder();

    let info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(queue_infos)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = unsafe {
        instance
            .create_device(selected.physical_device, &info, None)
            .check("vkCreateDevice")?
    };
    let queue = unsafe { device.get_device_queue(selected.graphics_queue_family, 0) };

    info!("Logical device created.");
    Ok((device, queue))
}
