//! Synchronization primitives.
//!
//! - [`Semaphore`] - GPU-to-GPU ordering between queue operations, never
//!   awaited from the CPU
//! - [`Fence`] - GPU-to-CPU completion signal awaited by a blocking wait
//!
//! The CPU blocks on fences at exactly two points in the engine: at the top
//! of swap surface acquisition (waiting for the frame slot N frames ago to
//! retire) and synchronously around one-shot transfer submissions. All other
//! GPU ordering is expressed through semaphore wait/signal pairs passed to
//! submission.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Effectively-infinite wait used for all fence and acquire waits, in
/// nanoseconds (10 seconds). A wait that exceeds it means the device is lost;
/// the resulting [`RhiError::DeviceTimeout`] is fatal.
pub const GPU_TIMEOUT_NS: u64 = 10_000_000_000;

/// Vulkan semaphore wrapper.
///
/// Used for the acquire-to-submit and submit-to-present ordering chains.
/// Immutable after creation and safe to share between threads.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new semaphore in the unsignaled state.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();

        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        debug!("Created semaphore");

        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Vulkan fence wrapper.
///
/// Frame-slot fences are created signaled so the first wait on each slot
/// returns immediately; transfer fences start unsignaled.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new fence, optionally in the signaled state.
    ///
    /// # Errors
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);

        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        Ok(Self { device, fence })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled.
    ///
    /// Waits up to [`GPU_TIMEOUT_NS`]; a timeout is reported as
    /// [`RhiError::DeviceTimeout`] and the `what` label names the wait site
    /// in the diagnostic.
    ///
    /// # Errors
    /// Returns `DeviceTimeout` on timeout, or the underlying Vulkan error.
    pub fn wait(&self, what: &'static str) -> RhiResult<()> {
        let fences = [self.fence];
        let result = unsafe {
            self.device
                .handle()
                .wait_for_fences(&fences, true, GPU_TIMEOUT_NS)
        };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::DeviceTimeout(what)),
            Err(e) => Err(RhiError::VulkanError(e)),
        }
    }

    /// Resets the fence to the unsignaled state.
    ///
    /// The fence must not be pending on any queue operation.
    pub fn reset(&self) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.handle().reset_fences(&fences)? };
        Ok(())
    }

    /// Non-blocking signaled check.
    pub fn is_signaled(&self) -> bool {
        let result = unsafe { self.device.handle().get_fence_status(self.fence) };
        matches!(result, Ok(true))
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_timeout_is_finite_but_long() {
        // Long enough that only a lost device hits it, short enough that a
        // hung session terminates instead of blocking forever.
        assert!(GPU_TIMEOUT_NS >= 1_000_000_000);
        assert!(GPU_TIMEOUT_NS < u64::MAX);
    }

    #[test]
    fn test_semaphore_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
    }

    #[test]
    fn test_fence_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Fence>();
    }
}
