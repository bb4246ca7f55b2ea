use std::{path::PathBuf, time::Duration};

use thiserror::Error;
use vulkanalia::vk;

/// Errors raised by the rendering core. Every one of them is
/// fatal for the engine.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Vulkan call {call} failed: {code}")]
    Vulkan {
        call: &'static str,
        code: vk::ErrorCode,
    },
    #[error("Failed to find suitable physical device.")]
    NoSuitableDevice,
    #[error("Timed out after {0:?} waiting for the frame-complete fence.")]
    FenceTimeout(Duration),
    #[error("Timed out after {0:?} waiting for a swapchain image.")]
    AcquireTimeout(Duration),
    #[error("Swapchain out of date.")]
    SwapchainOutOfDate,
}

/// Errors raised while loading a shader binary. These are the
/// only recoverable errors of the engine.
#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("Failed to read shader {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Shader {path:?} is empty.")]
    Empty { path: PathBuf },
    #[error("Shader {path:?} is {len} bytes long, which is not a whole number of 32-bit words.")]
    Misaligned { path: PathBuf, len: usize },
    #[error("Failed to create shader module from {path:?}: {code}")]
    Create { path: PathBuf, code: vk::ErrorCode },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Log, unwind the teardown record and terminate.
    Fatal,
    /// Log and carry on.
    Recoverable,
}

/// Decides whether an error ends the process. Shader loading is
/// the only recoverable path; a future swapchain rebuild would
/// be added here rather than at the call sites.
pub fn severity(error: &anyhow::Error) -> Severity {
    if error.downcast_ref::<ShaderError>().is_some() {
        Severity::Recoverable
    } else {
        Severity::Fatal
    }
}

/// Tags a raw Vulkan result with the name of the call that
/// produced it.
pub trait CheckVk<T> {
    fn check(self, call: &'static str) -> Result<T, RenderError>;
}

impl<T> CheckVk<T> for Result<T, vk::ErrorCode> {
    fn check(self, call: &'static str) -> Result<T, RenderError> {
        self.map_err(|code| RenderError::Vulkan { call, code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn shader_errors_are_recoverable() {
        let error = anyhow!(ShaderError::Empty { path: "a.spv".into() });
        assert_eq!(severity(&error), Severity::Recoverable);
    }

    #[test]
    fn render_errors_are_fatal() {
        let timeout = anyhow!(RenderError::FenceTimeout(Duration::from_secs(1)));
        assert_eq!(severity(&timeout), Severity::Fatal);

        let other = anyhow!("device lost");
        assert_eq!(severity(&other), Severity::Fatal);
    }

    #[test]
    fn check_names_the_failing_call() {
        let result: Result<(), vk::ErrorCode> = Err(vk::ErrorCode::DEVICE_LOST);
        let error = result.check("vkQueueSubmit").unwrap_err();

        assert!(matches!(
            error,
            RenderError::Vulkan { call: "vkQueueSubmit", code: vk::ErrorCode::DEVICE_LOST }
        ));
        assert!(error.to_string().contains("vkQueueSubmit"));
    }
}
