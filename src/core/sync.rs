use crate::{
    core::deletion::{DeletionQueue, Resource},
    error::CheckVk,
};

use vulkanalia::prelude::v1_0::*;
use anyhow::Result;
use log::info;

/// Synchronization objects of the single frame in flight.
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    /// Signaled by the queue when the frame's commands have
    /// completed; the host waits on it before reusing the command
    /// buffer.
    pub frame_complete: vk::Fence,
    /// Signaled when the acquired swapchain image can be written.
    pub image_acquired: vk::Semaphore,
    /// Signaled when rendering is done and the image can be
    /// presented.
    pub render_complete: vk::Semaphore,
}

impl FrameSync {
    pub fn create(device: &Device, deletion_queue: &mut DeletionQueue) -> Result<Self> {
        // Acquiring an image, running the command buffer and
        // presenting all happen asynchronously, and each step
        // depends on the previous one. Semaphores order work on
        // the GPU: one is signaled once the acquired image may be
        // written, the other once rendering is done and the image
        // may be presented. Neither can be observed from the host.
        //
        // The fence is the host side of the protocol: the queue
        // signals it when the frame's commands have completed, and
        // the frame loop waits on it before touching the command
        // buffer again. Fences start unsignaled by default, which
        // would block the very first wait forever; creating it
        // signaled lets the first frame through.
        let fence_info = vk::FenceCreateInfo::builder()
            .flags(vk::FenceCreateFlags::SIGNALED);
        let frame_complete = unsafe {
            device.create_fence(&fence_info, None).check("vkCreateFence")?
        };
        deletion_queue.push(Resource::Fence(frame_complete));

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let image_acquired = unsafe {
            device.create_semaphore(&semaphore_info, None).check("vkCreateSemaphore")?
        };
        deletion_queue.push(Resource::Semaphore(image_acquired));

        let render_complete = unsafe {
            device.create_semaphore(&semaphore_info, None).check("vkCreateSemaphore")?
        };
        deletion_queue.push(Resource::Semaphore(render_complete));

        info!("Sync objects created.");
        Ok(Self {
            frame_complete,
            image_acquired,
            render_complete,
        })
    }
}
