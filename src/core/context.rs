use crate::{
    config::Config,
    core::{
        allocator::Allocator,
        deletion::{DeletionQueue, Release, Resource},
        devices::{create_logical_device, pick_physical_device, SelectedDevice},
        instance::create_instance,
    },
};

use winit::window::Window;
use vulkanalia::{
    prelude::v1_0::*,
    window as vk_window,
    loader::{LibloadingLoader, LIBRARY},
    vk::ExtDebugUtilsExtension,
    vk::KhrSurfaceExtension,
    vk::KhrSwapchainExtension,
};
use anyhow::{anyhow, Result};
use log::*;

/// Everything tied to the device for the whole life of the
/// engine: instance, surface, adapter, logical device, queue and
/// memory allocator. Every other GPU object is created from it
/// and released through it.
pub struct DeviceContext {
    // The entry keeps the Vulkan library loaded.
    _entry: Entry,
    pub instance: Instance,
    pub debug_messenger: vk::DebugUtilsMessengerEXT,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub device: Device,
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub allocator: Option<Allocator>,
}

impl DeviceContext {
    /// Loads Vulkan, creates the instance and the window surface,
    /// then picks an adapter and creates the logical device and
    /// its allocator. The allocator is registered on the deletion
    /// queue; the rest is destroyed by [`DeviceContext::destroy`].
    pub fn create(
        window: &Window,
        config: &Config,
        deletion_queue: &mut DeletionQueue,
    ) -> Result<Self> {
        let entry = unsafe {
            let loader = LibloadingLoader::new(LIBRARY)?;
            Entry::new(loader).map_err(|b| anyhow!("{}", b))?
        };
        let (instance, debug_messenger) = create_instance(window, &entry, config)?;

        let release_instance = |surface: Option<vk::SurfaceKHR>| unsafe {
            if let Some(surface) = surface {
                instance.destroy_surface_khr(surface, None);
            }
            if !debug_messenger.is_null() {
                instance.destroy_debug_utils_messenger_ext(debug_messenger, None);
            }
            instance.destroy_instance(None);
        };

        let surface = match unsafe { vk_window::create_surface(&instance, window, window) } {
            Ok(surface) => surface,
            Err(error) => {
                release_instance(None);
                return Err(error.into());
            },
        };
        info!("Surface created.");

        let device = pick_physical_device(&instance, surface, config).and_then(|selected| {
            create_logical_device(&entry, &instance, selected, config)
                .map(|(device, queue)| (selected, device, queue))
        });
        let (selected, device, graphics_queue) = match device {
            Ok(device) => device,
            Err(error) => {
                release_instance(Some(surface));
                return Err(error);
            },
        };

        let allocator = Allocator::new(&instance, selected.physical_device);
        deletion_queue.push(Resource::Allocator);

        Ok(Self {
            _entry: entry,
            instance,
            debug_messenger,
            surface,
            physical_device: selected.physical_device,
            device,
            graphics_queue,
            graphics_queue_family: selected.graphics_queue_family,
            allocator: Some(allocator),
        })
    }

    pub fn selected(&self) -> SelectedDevice {
        SelectedDevice {
            physical_device: self.physical_device,
            graphics_queue_family: self.graphics_queue_family,
        }
    }

    /// Destroys the device, surface, debug messenger and instance.
    /// The context is consumed, so it can only be destroyed once:
    ///
    /// ```compile_fail
    /// # use trigon::core::context::DeviceContext;
    /// fn teardown(context: DeviceContext) {
    ///     unsafe {
    ///         context.destroy();
    ///         context.destroy();
    ///     }
    /// }
    /// ```
    ///
    /// # Safety
    ///
    /// The device must be idle, and the deletion queue holding the
    /// objects created from it must have been flushed first.
    pub unsafe fn destroy(self) {
        // Child objects go before their parents: the device before
        // the instance it was created from, and the surface and
        // messenger before the instance too.
        self.device.destroy_device(None);
        self.instance.destroy_surface_khr(self.surface, None);

        if !self.debug_messenger.is_null() {
            self.instance.destroy_debug_utils_messenger_ext(self.debug_messenger, None);
        }

        self.instance.destroy_instance(None);
        info!("Destroyed the Vulkan instance.");
    }
}

impl Release for DeviceContext {
    unsafe fn release(&mut self, resource: Resource) {
        let device = &self.device;
        match resource {
            Resource::Allocator => {
                if let Some(mut allocator) = self.allocator.take() {
                    allocator.destroy(device);
                }
            },
            Resource::Swapchain(swapchain) => device.destroy_swapchain_khr(swapchain, None),
            Resource::ImageView(view) => device.destroy_image_view(view, None),
            Resource::RenderPass(render_pass) => device.destroy_render_pass(render_pass, None),
            Resource::Framebuffer(framebuffer) => device.destroy_framebuffer(framebuffer, None),
            Resource::CommandPool(pool) => device.destroy_command_pool(pool, None),
            Resource::Fence(fence) => device.destroy_fence(fence, None),
            Resource::Semaphore(semaphore) => device.destroy_semaphore(semaphore, None),
            Resource::PipelineLayout(layout) => device.destroy_pipeline_layout(layout, None),
            Resource::Pipeline(pipeline) => device.destroy_pipeline(pipeline, None),
        }

        trace!("Released {resource:?}.");
    }
}
