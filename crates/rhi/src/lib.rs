//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! A safe layer over `ash` covering:
//! - Instance, physical device selection, and logical device creation
//! - Swap surface lifecycle and per-slot frame synchronization
//! - Command recording with pool-wide serialization
//! - Buffers, images, and the staging upload path
//! - Pipelines and descriptor management

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod queue;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
