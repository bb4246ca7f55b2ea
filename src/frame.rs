use std::time::Duration;

use crate::{
    core::commands::clear_color,
    error::RenderError,
    pipeline::{PipelineSelector, PipelineVariant},
};

use anyhow::{anyhow, Result};
use log::*;

/// The GPU-facing steps of a frame, in the order the driver calls
/// them.
pub trait FrameBackend {
    /// Waits on the frame-complete fence. Returns `false` if the
    /// timeout elapsed first.
    fn wait_frame_complete(&mut self, timeout: Duration) -> Result<bool>;
    fn reset_frame_complete(&mut self) -> Result<()>;
    /// Requests the next swapchain image; the image-acquired
    /// semaphore is signaled once it can be written.
    fn acquire_image(&mut self, timeout: Duration) -> Result<u32>;
    fn record(&mut self, image_index: u32, variant: PipelineVariant, clear_color: [f32; 4]) -> Result<()>;
    fn submit(&mut self) -> Result<()>;
    fn present(&mut self, image_index: u32) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    WaitFence,
    Acquire,
    Record,
    Submit,
    Present,
    Shutdown,
}

/// Drives the per-frame cycle with a single frame in flight:
/// wait, acquire, record, submit, present.
#[derive(Debug)]
pub struct FrameDriver {
    state: FrameState,
    frame_number: u64,
    timeout: Duration,
    selector: PipelineSelector,
}

impl FrameDriver {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: FrameState::Idle,
            frame_number: 0,
            timeout,
            selector: PipelineSelector::default(),
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Number of frames presented so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn selected(&self) -> PipelineVariant {
        self.selector.selected()
    }

    pub fn toggle_pipeline(&mut self) {
        self.selector.toggle();
    }

    /// Moves to the terminal state. Returns `true` the first time.
    pub fn shutdown(&mut self) -> bool {
        if self.state == FrameState::Shutdown {
            return false;
        }

        info!("Frame driver shut down after {} frames.", self.frame_number);
        self.state = FrameState::Shutdown;
        true
    }

    /// Runs one full frame. Any error leaves the driver shut
    /// down; drawing after shutdown is refused without touching
    /// the backend.
    pub fn draw<B: FrameBackend>(&mut self, backend: &mut B) -> Result<()> {
        if self.state == FrameState::Shutdown {
            return Err(anyhow!("Cannot draw after shutdown."));
        }

        match self.cycle(backend) {
            Ok(()) => {
                self.state = FrameState::Idle;
                self.frame_number += 1;
                Ok(())
            },
            Err(error) => {
                warn!("Frame {} failed in state {:?}.", self.frame_number, self.state);
                self.state = FrameState::Shutdown;
                Err(error)
            },
        }
    }

    fn cycle<B: FrameBackend>(&mut self, backend: &mut B) -> Result<()> {
        // The command buffer and both semaphores are reused from
        // the previous frame, which must be done on the GPU
        // first. The fence is only reset once that is known.
        self.state = FrameState::WaitFence;
        if !backend.wait_frame_complete(self.timeout)? {
            return Err(anyhow!(RenderError::FenceTimeout(self.timeout)));
        }
        backend.reset_frame_complete()?;

        self.state = FrameState::Acquire;
        let image_index = backend.acquire_image(self.timeout)?;

        self.state = FrameState::Record;
        backend.record(image_index, self.selector.selected(), clear_color(self.frame_number))?;

        self.state = FrameState::Submit;
        backend.submit()?;

        self.state = FrameState::Present;
        backend.present(image_index)?;

        trace!("Frame {} presented on image {image_index}.", self.frame_number);
        Ok(())
    }
}
