//! Bootstrap and frame loop of a minimal Vulkan renderer drawing a
//! single triangle.

pub mod app;
pub mod config;
pub mod core;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod renderer;
pub mod shaders;
mod window;
