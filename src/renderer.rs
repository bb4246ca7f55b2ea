use std::time::Duration;

use crate::{
    config::Config,
    core::{
        commands::{CommandContext, DrawTarget},
        context::DeviceContext,
        deletion::DeletionQueue,
        swapchain::PresentationChain,
        sync::FrameSync,
    },
    error::{CheckVk, RenderError},
    frame::{FrameBackend, FrameDriver},
    pipeline::{create_pipelines, PipelineVariant, Pipelines},
};

use winit::window::Window;
use vulkanalia::{prelude::v1_0::*, vk::KhrSwapchainExtension};
use anyhow::{anyhow, Result};
use log::*;

/// The rendering engine. Its life goes through three phases:
/// [`Renderer::create`] builds everything or fails,
/// [`Renderer::render`] draws a frame, and [`Renderer::destroy`]
/// consumes the renderer and releases everything in reverse
/// creation order.
pub struct Renderer {
    context: DeviceContext,
    chain: PresentationChain,
    commands: CommandContext,
    sync: FrameSync,
    pipelines: Pipelines,
    deletion_queue: DeletionQueue,
    driver: FrameDriver,
}

impl Renderer {
    pub fn create(window: &Window, config: &Config) -> Result<Self> {
        let mut deletion_queue = DeletionQueue::default();
        let mut context = DeviceContext::create(window, config, &mut deletion_queue)?;

        let size = window.inner_size();
        let resources = Self::create_resources(
            &context,
            config,
            (size.width, size.height),
            &mut deletion_queue,
        );

        match resources {
            Ok((chain, commands, sync, pipelines)) => {
                info!("Renderer initialized.");
                Ok(Self {
                    context,
                    chain,
                    commands,
                    sync,
                    pipelines,
                    deletion_queue,
                    driver: FrameDriver::new(config.frame_timeout),
                })
            },
            Err(error) => {
                // Unwind whatever was built before the failure.
                // Nothing has been submitted yet, so the device has
                // no pending work.
                unsafe {
                    deletion_queue.flush(&mut context);
                    context.destroy();
                }
                Err(error)
            },
        }
    }

    fn create_resources(
        context: &DeviceContext,
        config: &Config,
        window_size: (u32, u32),
        deletion_queue: &mut DeletionQueue,
    ) -> Result<(PresentationChain, CommandContext, FrameSync, Pipelines)> {
        let device = &context.device;

        let chain = PresentationChain::create(
            &context.instance,
            device,
            context.surface,
            context.selected(),
            window_size,
            deletion_queue,
        )?;
        let commands = CommandContext::create(device, context.graphics_queue_family, deletion_queue)?;
        let sync = FrameSync::create(device, deletion_queue)?;
        let pipelines = create_pipelines(
            device,
            config,
            chain.render_pass,
            chain.extent,
            deletion_queue,
        )?;

        Ok((chain, commands, sync, pipelines))
    }

    pub fn render(&mut self) -> Result<()> {
        let mut frame = VulkanFrame {
            device: &self.context.device,
            queue: self.context.graphics_queue,
            chain: &self.chain,
            commands: &self.commands,
            sync: &self.sync,
            pipelines: &self.pipelines,
        };

        self.driver.draw(&mut frame)
    }

    pub fn toggle_pipeline(&mut self) {
        self.driver.toggle_pipeline();
        info!("Drawing with the {} pipeline.", self.driver.selected());
    }

    /// Waits for the GPU to finish, then releases everything.
    pub fn destroy(mut self) {
        self.driver.shutdown();

        // Rendering is asynchronous: the last frame may still be
        // in flight, and nothing may be destroyed while the GPU
        // uses it. If the wait itself fails, the device is lost
        // and has no work left to complete.
        if let Err(error) = unsafe { self.context.device.device_wait_idle() } {
            warn!("Failed to wait for the device to go idle: {error}");
        }

        unsafe {
            self.deletion_queue.flush(&mut self.context);
            self.context.destroy();
        }
    }
}

/// The frame protocol carried out on the real device.
struct VulkanFrame<'a> {
    device: &'a Device,
    queue: vk::Queue,
    chain: &'a PresentationChain,
    commands: &'a CommandContext,
    sync: &'a FrameSync,
    pipelines: &'a Pipelines,
}

fn nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

impl FrameBackend for VulkanFrame<'_> {
    fn wait_frame_complete(&mut self, timeout: Duration) -> Result<bool> {
        let status = unsafe {
            self.device
                .wait_for_fences(&[self.sync.frame_complete], true, nanos(timeout))
                .check("vkWaitForFences")?
        };

        Ok(status != vk::SuccessCode::TIMEOUT)
    }

    fn reset_frame_complete(&mut self) -> Result<()> {
        unsafe {
            self.device
                .reset_fences(&[self.sync.frame_complete])
                .check("vkResetFences")?;
        }
        Ok(())
    }

    fn acquire_image(&mut self, timeout: Duration) -> Result<u32> {
        let result = unsafe {
            self.device.acquire_next_image_khr(
                self.chain.swapchain,
                nanos(timeout),
                self.sync.image_acquired,
                vk::Fence::null(),
            )
        };

        // The image may not be ready when its index is returned;
        // the semaphore covers that.
        match result {
            Ok((_, vk::SuccessCode::TIMEOUT | vk::SuccessCode::NOT_READY)) => {
                Err(anyhow!(RenderError::AcquireTimeout(timeout)))
            },
            Ok((index, code)) => {
                if code == vk::SuccessCode::SUBOPTIMAL_KHR {
                    debug!("Swapchain is suboptimal for the surface.");
                }
                Ok(index)
            },
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => Err(anyhow!(RenderError::SwapchainOutOfDate)),
            Err(code) => Err(anyhow!(RenderError::Vulkan { call: "vkAcquireNextImageKHR", code })),
        }
    }

    fn record(&mut self, image_index: u32, variant: PipelineVariant, clear_color: [f32; 4]) -> Result<()> {
        let framebuffer = self
            .chain
            .framebuffer(image_index)
            .ok_or_else(|| anyhow!("Acquired image {image_index} has no framebuffer."))?;

        let target = DrawTarget {
            render_pass: self.chain.render_pass,
            framebuffer,
            extent: self.chain.extent,
            clear_color,
        };

        // The frame driver waits on the frame-complete fence before
        // recording, so the buffer is no longer pending.
        unsafe { self.commands.record_frame(self.device, &target, self.pipelines.get(variant)) }
    }

    fn submit(&mut self) -> Result<()> {
        // Only the color output has to wait for the image; the
        // earlier stages may run before it is acquired.
        let wait_semaphores = &[self.sync.image_acquired];
        let wait_stages = &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = &[self.commands.buffer];
        let signal_semaphores = &[self.sync.render_complete];
        let info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        unsafe {
            self.device
                .queue_submit(self.queue, &[info], self.sync.frame_complete)
                .check("vkQueueSubmit")?;
        }
        Ok(())
    }

    fn present(&mut self, image_index: u32) -> Result<()> {
        let wait_semaphores = &[self.sync.render_complete];
        let swapchains = &[self.chain.swapchain];
        let image_indices = &[image_index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        match unsafe { self.device.queue_present_khr(self.queue, &info) } {
            Ok(_) => Ok(()),
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => Err(anyhow!(RenderError::SwapchainOutOfDate)),
            Err(code) => Err(anyhow!(RenderError::Vulkan { call: "vkQueuePresentKHR", code })),
        }
    }
}
