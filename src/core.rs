pub mod allocator;
pub mod commands;
pub mod context;
pub mod deletion;
pub mod devices;
pub mod instance;
pub mod queues;
pub mod swapchain;
pub mod sync;
