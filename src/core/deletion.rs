use vulkanalia::prelude::v1_0::*;
use log::*;

/// A GPU object waiting to be released, tagged with its kind.
/// The owning context interprets it when the queue is flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// The memory allocator context of the device.
    Allocator,
    Swapchain(vk::SwapchainKHR),
    ImageView(vk::ImageView),
    RenderPass(vk::RenderPass),
    Framebuffer(vk::Framebuffer),
    CommandPool(vk::CommandPool),
    Fence(vk::Fence),
    Semaphore(vk::Semaphore),
    PipelineLayout(vk::PipelineLayout),
    Pipeline(vk::Pipeline),
}

/// Anything able to destroy the resources of a deletion queue.
pub trait Release {
    /// Destroys one resource.
    ///
    /// # Safety
    ///
    /// The resource must be alive, must have been created by this
    /// releaser, and must no longer be in use by the GPU. Releasing
    /// the same resource twice destroys a freed handle.
    unsafe fn release(&mut self, resource: Resource);
}

/// Records resources in creation order and releases them in
/// reverse order, so that an object is always destroyed before
/// the objects it depends on.
#[derive(Debug, Default)]
pub struct DeletionQueue {
    resources: Vec<Resource>,
}

impl DeletionQueue {
    pub fn push(&mut self, resource: Resource) {
        trace!("Registered {resource:?} for deletion.");
        self.resources.push(resource);
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Releases every recorded resource, last created first, and
    /// leaves the queue empty.
    ///
    /// # Safety
    ///
    /// Every recorded resource must satisfy the contract of
    /// [`Release::release`]: the device has to be idle (or the
    /// resources never submitted) before flushing.
    pub unsafe fn flush<R: Release>(&mut self, releaser: &mut R) {
        let count = self.resources.len();
        // Popping hands each resource out exactly once.
        while let Some(resource) = self.resources.pop() {
            releaser.release(resource);
        }

        if count > 0 {
            info!("Released {count} resources.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vulkanalia::vk::Handle;

    #[derive(Default)]
    struct Recorder(Vec<Resource>);

    impl Release for Recorder {
        unsafe fn release(&mut self, resource: Resource) {
            self.0.push(resource);
        }
    }

    fn creation_order() -> Vec<Resource> {
        vec![
            Resource::Allocator,
            Resource::Swapchain(vk::SwapchainKHR::from_raw(1)),
            Resource::ImageView(vk::ImageView::from_raw(2)),
            Resource::ImageView(vk::ImageView::from_raw(3)),
            Resource::RenderPass(vk::RenderPass::from_raw(4)),
            Resource::Framebuffer(vk::Framebuffer::from_raw(5)),
            Resource::Framebuffer(vk::Framebuffer::from_raw(6)),
            Resource::CommandPool(vk::CommandPool::from_raw(7)),
            Resource::Fence(vk::Fence::from_raw(8)),
            Resource::Semaphore(vk::Semaphore::from_raw(9)),
            Resource::Semaphore(vk::Semaphore::from_raw(10)),
            Resource::PipelineLayout(vk::PipelineLayout::from_raw(11)),
            Resource::Pipeline(vk::Pipeline::from_raw(12)),
            Resource::Pipeline(vk::Pipeline::from_raw(13)),
        ]
    }

    #[test]
    fn flush_releases_in_reverse_creation_order() {
        for n in 0..=creation_order().len() {
            let created = &creation_order()[..n];
            let mut queue = DeletionQueue::default();
            created.iter().for_each(|&r| queue.push(r));

            let mut recorder = Recorder::default();
            unsafe { queue.flush(&mut recorder) };

            let expected = created.iter().rev().copied().collect::<Vec<_>>();
            assert_eq!(recorder.0, expected);
            assert!(queue.is_empty());
        }
    }

    #[test]
    fn flushing_twice_releases_nothing_the_second_time() {
        let mut queue = DeletionQueue::default();
        queue.push(Resource::Fence(vk::Fence::from_raw(1)));

        let mut recorder = Recorder::default();
        unsafe {
            queue.flush(&mut recorder);
            queue.flush(&mut recorder);
        }

        assert_eq!(recorder.0.len(), 1);
    }

    #[test]
    fn empty_queue_makes_no_release_calls() {
        let mut recorder = Recorder::default();
        unsafe { DeletionQueue::default().flush(&mut recorder) };
        assert!(recorder.0.is_empty());
    }
}
