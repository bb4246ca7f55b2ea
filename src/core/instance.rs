use std::{collections::HashSet, ffi::{c_char, c_void, CStr}};

use crate::{config::Config, error::CheckVk};

use winit::window::Window;
use vulkanalia::{
    prelude::v1_0::*,
    window as vk_window,
    Version,
    vk::ExtDebugUtilsExtension,
};
use anyhow::{anyhow, Result};
use log::*;

pub const VALIDATION_LAYER: vk::ExtensionName = vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");
pub const PORTABILITY_MACOS_VERSION: Version = Version::new(1, 3, 216);

/// Creates the Vulkan instance, and the debug messenger when
/// validation is enabled (a null handle otherwise).
pub fn create_instance(
    window: &Window,
    entry: &Entry,
    config: &Config,
) -> Result<(Instance, vk::DebugUtilsMessengerEXT)> {
    let layers = instance_layers(entry, config)?;
    let (extensions, flags) = instance_extensions(window, entry, config)?;

    // The API version requested here is the highest the engine
    // uses, not the highest the loader offers. Adapters below it
    // are rejected later, during device selection.
    let version = config.min_api_version;
    let application_info = vk::ApplicationInfo::builder()
        .application_name(b"trigon-app\0")
        .application_version(vk::make_version(1, 0, 0))
        .engine_name(b"trigon\0")
        .engine_version(vk::make_version(1, 0, 0))
        .api_version(vk::make_version(version.major, version.minor, version.patch));

    let mut info = vk::InstanceCreateInfo::builder()
        .application_info(&application_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .flags(flags);

    let mut debug_info = messenger_info();
    if config.validation {
        // The messenger created below only exists once the
        // instance does. Chaining its info onto the instance info
        // covers the gap: messages raised while the instance
        // itself is created or destroyed go to the same callback.
        info = info.push_next(&mut debug_info);
    }

    let instance = unsafe {
        entry.create_instance(&info, None).check("vkCreateInstance")?
    };

    if !config.validation {
        info!("Vulkan instance created.");
        return Ok((instance, vk::DebugUtilsMessengerEXT::null()));
    }

    let messenger = unsafe { instance.create_debug_utils_messenger_ext(&debug_info, None) };
    match messenger.check("vkCreateDebugUtilsMessengerEXT") {
        Ok(messenger) => {
            info!("Vulkan instance created, with validation.");
            Ok((instance, messenger))
        },
        Err(error) => {
            unsafe { instance.destroy_instance(None) };
            Err(error.into())
        },
    }
}

/// Layers to enable on the instance: only the Khronos validation
/// layer, when validation is on.
fn instance_layers(entry: &Entry, config: &Config) -> Result<Vec<*const c_char>> {
    if !config.validation {
        return Ok(Vec::new());
    }

    // Vulkan does almost no error checking on its own, to keep the
    // driver overhead low. Validation layers hook into the API
    // calls to check their arguments and report misuse. They ship
    // with the SDK rather than with the driver, so they may be
    // missing on the machine; asking for an absent layer would
    // make instance creation fail with a less helpful error.
    let available = unsafe {
        entry
            .enumerate_instance_layer_properties()?
            .iter()
            .map(|l| l.layer_name)
            .collect::<HashSet<_>>()
    };

    if !available.contains(&VALIDATION_LAYER) {
        return Err(anyhow!("Validation layer not available."));
    }

    Ok(vec![VALIDATION_LAYER.as_ptr()])
}

/// Instance extensions and creation flags: whatever the window
/// system needs, debug utils when validating, and the
/// portability opt-in on macOS.
fn instance_extensions(
    window: &Window,
    entry: &Entry,
    config: &Config,
) -> Result<(Vec<*const c_char>, vk::InstanceCreateFlags)> {
    // Presenting to a window goes through platform-specific
    // surface extensions (Win32, Xlib, Wayland, Metal...), which
    // the window layer knows how to list.
    let mut extensions = vk_window::get_required_instance_extensions(window)
        .iter()
        .map(|e| e.as_ptr())
        .collect::<Vec<_>>();

    if config.validation {
        extensions.push(vk::EXT_DEBUG_UTILS_EXTENSION.name.as_ptr());
    }

    // On macOS, Vulkan runs on top of Metal through a layer that
    // does not implement the whole API. Since 1.3.216 the loader
    // hides such implementations unless the application opts in,
    // by enabling the portability enumeration extension and
    // setting the matching creation flag.
    let portability = cfg!(target_os = "macos")
        && unsafe { entry.version()? } >= PORTABILITY_MACOS_VERSION;

    if !portability {
        return Ok((extensions, vk::InstanceCreateFlags::empty()));
    }

    info!("Enabling extensions for macOS portability.");
    extensions.push(vk::KHR_GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION.name.as_ptr());
    extensions.push(vk::KHR_PORTABILITY_ENUMERATION_EXTENSION.name.as_ptr());

    Ok((extensions, vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR))
}

/// Routes every message type and severity to [`debug_callback`].
/// Filtering is left to the logger.
fn messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXTBuilder<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::all())
        .message_type(vk::DebugUtilsMessageTypeFlagsEXT::all())
        .user_callback(Some(debug_callback))
}

/// Log level matching the severity of a validation message.
fn message_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        Level::Error
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        Level::Warn
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        Level::Debug
    } else {
        Level::Trace
    }
}

extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    type_: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    let data = unsafe { *data };
    let message = unsafe { CStr::from_ptr(data.message) }.to_string_lossy();

    log!(message_level(severity), "({type_:?}) {message}");

    // Returning true would abort the call that triggered the
    // message.
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_map_to_log_levels() {
        type Severity = vk::DebugUtilsMessageSeverityFlagsEXT;

        assert_eq!(message_level(Severity::ERROR), Level::Error);
        assert_eq!(message_level(Severity::WARNING), Level::Warn);
        assert_eq!(message_level(Severity::INFO), Level::Debug);
        assert_eq!(message_level(Severity::VERBOSE), Level::Trace);
    }
}
