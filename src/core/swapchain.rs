use crate::{
    core::{
        deletion::{DeletionQueue, Resource},
        devices::SelectedDevice,
    },
    error::CheckVk,
};

use vulkanalia::{
    prelude::v1_0::*,
    vk::KhrSurfaceExtension,
    vk::KhrSwapchainExtension,
};
use anyhow::{anyhow, Result};
use log::*;

pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

pub fn get_swapchain_support(
    instance: &Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Result<SwapchainSupport> {
    // Images are never drawn to the window directly: they are
    // rendered into a swapchain, a ring of images owned by the
    // presentation engine, then handed back to it for display.
    // What such a swapchain may look like depends on both the
    // adapter and the surface, so three things are queried here:
    // the surface capabilities (image count and size limits,
    // transforms), the pixel formats it can display, and the
    // presentation modes it supports.
    Ok(SwapchainSupport {
        capabilities: unsafe {
            instance.get_physical_device_surface_capabilities_khr(physical_device, surface)?
        },
        formats: unsafe {
            instance.get_physical_device_surface_formats_khr(physical_device, surface)?
        },
        present_modes: unsafe {
            instance.get_physical_device_surface_present_modes_khr(physical_device, surface)?
        },
    })
}

/// Prefers 8-bit BGRA in the sRGB color space, and falls back on
/// the first format the surface reports.
pub fn get_swapchain_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Option<vk::SurfaceFormatKHR> {
    // A surface format pairs a pixel layout with a color space.
    // B8G8R8A8_SRGB stores four 8-bit channels and lets the
    // hardware encode the written colors to sRGB, which matches
    // the SRGB_NONLINEAR space the display expects. Nearly every
    // desktop surface offers this pair; when it is missing, any
    // format still works for clearing and drawing a triangle, so
    // the first one reported is taken. A surface that reports no
    // format at all cannot be presented to.
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
            && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .cloned()
}

pub fn get_swapchain_present_mode(
    present_modes: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    // The presentation mode decides when a finished image reaches
    // the screen. IMMEDIATE shows it right away and may tear;
    // MAILBOX replaces whatever image is waiting with the newer
    // one, so frames can be skipped; FIFO_RELAXED behaves like
    // FIFO unless the application is late, then tears.
    //
    // FIFO queues images and shows one per vertical blank, in
    // submission order, without ever dropping a frame. When the
    // queue is full, acquiring the next image blocks, which paces
    // the render loop to the display. It is the only mode every
    // conformant implementation has to support, so the fallbacks
    // below are only there for broken drivers.
    present_modes
        .iter()
        .find(|&&m| m == vk::PresentModeKHR::FIFO)
        .or_else(|| present_modes.first())
        .cloned()
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Uses the surface's current extent, or the window size clamped
/// to the surface limits when the window manager lets the
/// swapchain decide (signaled by a current width of `u32::MAX`).
pub fn get_swapchain_extent(
    window_size: (u32, u32),
    capabilities: vk::SurfaceCapabilitiesKHR,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D::builder()
            .width(window_size.0.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ))
            .height(window_size.1.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ))
            .build()
    }
}

/// One more image than the minimum, within the maximum (0 means
/// unbounded).
pub fn get_swapchain_image_count(capabilities: vk::SurfaceCapabilitiesKHR) -> u32 {
    // With only the minimum, the driver may still hold every
    // image when the next one is requested, and acquisition has
    // to wait for it. A spare image avoids that stall.
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count != 0 && count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        count
    }
}

/// A swapchain image with the view and framebuffer rendering to
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
}

/// The swapchain and the render targets bound to its images.
/// `images[i]` always holds the view and framebuffer created for
/// swapchain image `i`.
#[derive(Debug)]
pub struct PresentationChain {
    pub swapchain: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    pub render_pass: vk::RenderPass,
    pub images: Vec<ChainImage>,
}

impl PresentationChain {
    /// Builds the swapchain, its image views, the render pass and
    /// the framebuffers. Each object is registered on the
    /// deletion queue as soon as it exists.
    pub fn create(
        instance: &Instance,
        device: &Device,
        surface: vk::SurfaceKHR,
        selected: SelectedDevice,
        window_size: (u32, u32),
        deletion_queue: &mut DeletionQueue,
    ) -> Result<Self> {
        let support = get_swapchain_support(instance, surface, selected.physical_device)?;
        let surface_format = get_swapchain_surface_format(&support.formats)
            .ok_or_else(|| anyhow!("Surface reports no image formats."))?;
        let present_mode = get_swapchain_present_mode(&support.present_modes);
        let extent = get_swapchain_extent(window_size, support.capabilities);
        let image_count = get_swapchain_image_count(support.capabilities);

        // Rendering and presentation happen on the same queue
        // family, so images never change owner and EXCLUSIVE
        // sharing applies. The remaining fields describe plain
        // color targets: one layer each (no stereo), used only as
        // color attachments, shown as-is (current transform, no
        // blending with other windows), and allowed to skip
        // pixels hidden behind other windows (clipped). There is
        // no previous swapchain to recycle.
        let queue_family_indices = &[selected.graphics_queue_family];
        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(queue_family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = unsafe {
            device.create_swapchain_khr(&info, None).check("vkCreateSwapchainKHR")?
        };
        deletion_queue.push(Resource::Swapchain(swapchain));
        info!("Swapchain created ({}x{}, {:?}, {:?}).", extent.width, extent.height, surface_format.format, present_mode);

        // The swapchain creates its images itself, possibly more
        // than requested. They are destroyed along with it.
        let images = unsafe {
            device
                .get_swapchain_images_khr(swapchain)
                .check("vkGetSwapchainImagesKHR")?
        };

        // Images can't be rendered to directly: a view describes
        // which part of an image is accessed, and how. Views are
        // registered right after the swapchain, so they are
        // released after the render pass and framebuffers that
        // use them.
        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            let view = create_image_view(device, image, surface_format.format)?;
            deletion_queue.push(Resource::ImageView(view));
            views.push(view);
        }
        info!("Swapchain image views created.");

        let render_pass = create_render_pass(device, surface_format.format)?;
        deletion_queue.push(Resource::RenderPass(render_pass));
        info!("Render pass created.");

        let images = bind_framebuffers(&images, &views, |view| {
            let framebuffer = create_framebuffer(device, render_pass, view, extent)?;
            deletion_queue.push(Resource::Framebuffer(framebuffer));
            Ok(framebuffer)
        })?;
        info!("Framebuffers created.");

        Ok(Self {
            swapchain,
            extent,
            render_pass,
            images,
        })
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.images.get(image_index as usize).map(|i| i.framebuffer)
    }
}

/// Pairs every swapchain image with its view and creates the
/// framebuffer for that view, keeping all three at the same
/// index.
pub fn bind_framebuffers<F>(
    images: &[vk::Image],
    views: &[vk::ImageView],
    mut create_framebuffer: F,
) -> Result<Vec<ChainImage>>
where
    F: FnMut(vk::ImageView) -> Result<vk::Framebuffer>,
{
    if images.len() != views.len() {
        return Err(anyhow!(
            "Got {} image views for {} swapchain images.",
            views.len(),
            images.len()
        ));
    }

    images
        .iter()
        .zip(views)
        .map(|(&image, &view)| {
            Ok(ChainImage {
                image,
                view,
                framebuffer: create_framebuffer(view)?,
            })
        })
        .collect()
}

fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView> {
    // Identity swizzling on each channel, and the whole image:
    // color aspect, single mip level, single layer.
    let components = vk::ComponentMapping::builder()
        .r(vk::ComponentSwizzle::IDENTITY)
        .g(vk::ComponentSwizzle::IDENTITY)
        .b(vk::ComponentSwizzle::IDENTITY)
        .a(vk::ComponentSwizzle::IDENTITY);

    let subresource_range = vk::ImageSubresourceRange::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1);

    let info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::_2D)
        .format(format)
        .components(components)
        .subresource_range(subresource_range);

    Ok(unsafe { device.create_image_view(&info, None).check("vkCreateImageView")? })
}

fn create_render_pass(device: &Device, format: vk::Format) -> Result<vk::RenderPass> {
    // A single color attachment, cleared on load and kept on
    // store. Its content is undefined when the pass starts and
    // ready for presentation when it ends.
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments);

    // The layout transition at the start of the pass must wait
    // for the same stage the image-acquired semaphore guards.
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

    let attachments = &[color_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];
    let info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    Ok(unsafe { device.create_render_pass(&info, None).check("vkCreateRenderPass")? })
}

fn create_framebuffer(
    device: &Device,
    render_pass: vk::RenderPass,
    view: vk::ImageView,
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    // A framebuffer binds the views used as attachments of a
    // render pass. It has to match the attachment list of the pass
    // (here a single color view) and be as large as the images.
    let attachments = &[view];
    let info = vk::FramebufferCreateInfo::builder()
        .render_pass(render_pass)
        .attachments(attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    Ok(unsafe { device.create_framebuffer(&info, None).check("vkCreateFramebuffer")? })
}
