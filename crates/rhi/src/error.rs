//! RHI-specific error types.

use thiserror::Error;

/// RHI-specific error type.
///
/// Most variants are unrecoverable configuration or environment errors that
/// propagate out of the frame loop. Transient presentation conditions
/// (out-of-date, suboptimal) are not errors; they are reported through
/// [`crate::swapchain::AcquireStatus`] and [`crate::queue::PresentOutcome`].
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error. Includes "no compatible memory type"; fatal.
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Surface format or depth format changed across a swap surface
    /// recreation. Fatal: downstream pipelines were built against the old
    /// formats.
    #[error("Surface format changed across recreation: {0}")]
    FormatChanged(String),

    /// A fence or acquire wait exceeded the GPU timeout. Treated as device
    /// loss; there is no recovery path.
    #[error("GPU timeout while waiting for {0}")]
    DeviceTimeout(&'static str),

    /// Shader loading error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface query error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swap surface error
    #[error("Swap surface error: {0}")]
    SwapchainError(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// Invalid handle or argument
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
