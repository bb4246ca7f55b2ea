use crate::{
    core::deletion::{DeletionQueue, Resource},
    error::CheckVk,
};

use vulkanalia::prelude::v1_0::*;
use anyhow::Result;
use log::info;

/// Where and how a frame's single draw lands.
#[derive(Debug, Clone, Copy)]
pub struct DrawTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

/// One command pool and the primary buffer allocated from it,
/// re-recorded every frame.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext {
    pub pool: vk::CommandPool,
    pub buffer: vk::CommandBuffer,
}

impl CommandContext {
    pub fn create(
        device: &Device,
        queue_family: u32,
        deletion_queue: &mut DeletionQueue,
    ) -> Result<Self> {
        // Commands are not sent to a queue one by one: they are
        // recorded into a command buffer, which is then submitted
        // as a whole. Buffers are allocated from a pool tied to the
        // queue family they will be submitted to. The buffer is
        // re-recorded every frame, and RESET_COMMAND_BUFFER allows
        // resetting it on its own instead of through the pool.
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);

        let pool = unsafe {
            device.create_command_pool(&info, None).check("vkCreateCommandPool")?
        };
        // The buffer is freed along with its pool.
        deletion_queue.push(Resource::CommandPool(pool));

        // A primary buffer can be submitted directly; secondary
        // ones are only called from primary buffers.
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = unsafe {
            device
                .allocate_command_buffers(&allocate_info)
                .check("vkAllocateCommandBuffers")?[0]
        };

        info!("Command pool and buffer created.");
        Ok(Self { pool, buffer })
    }

    /// Resets the buffer and records the frame into it: one render
    /// pass that clears the target and, if a pipeline is given,
    /// draws a 3-vertex triangle with it.
    ///
    /// # Safety
    ///
    /// The buffer must not be pending on the GPU: the fence of the
    /// last submission that used it has to be signaled.
    pub unsafe fn record_frame(
        &self,
        device: &Device,
        target: &DrawTarget,
        pipeline: Option<vk::Pipeline>,
    ) -> Result<()> {
        let buffer = self.buffer;

        // Last frame's commands are discarded, then recording
        // starts over. The buffer is submitted once before being
        // reset again, which ONE_TIME_SUBMIT tells the driver.
        device
            .reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty())
            .check("vkResetCommandBuffer")?;

        let info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device
            .begin_command_buffer(buffer, &info)
            .check("vkBeginCommandBuffer")?;

        // The render pass covers the whole framebuffer, and its
        // single attachment is cleared to the frame's color when
        // the pass begins.
        let render_area = vk::Rect2D::builder()
            .offset(vk::Offset2D::default())
            .extent(target.extent);

        let clear_values = &[vk::ClearValue {
            color: vk::ClearColorValue { float32: target.clear_color },
        }];

        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(target.render_pass)
            .framebuffer(target.framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        device.cmd_begin_render_pass(buffer, &info, vk::SubpassContents::INLINE);

        // The vertex shader derives the three corners from the
        // vertex index, so no vertex buffer is bound. Without a
        // pipeline the frame is only cleared.
        if let Some(pipeline) = pipeline {
            device.cmd_bind_pipeline(buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
            device.cmd_draw(buffer, 3, 1, 0, 0);
        }

        device.cmd_end_render_pass(buffer);
        device.end_command_buffer(buffer).check("vkEndCommandBuffer")?;

        Ok(())
    }
}

/// Background color of a frame: blue, pulsing every 120π frames.
pub fn clear_color(frame_number: u64) -> [f32; 4] {
    let flash = (frame_number as f32 / 120.0).sin().abs();
    [0.0, 0.0, flash, 1.0]
}
