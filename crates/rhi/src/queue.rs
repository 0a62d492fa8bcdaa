//! Execution queues with serialized submission.
//!
//! A [`Queue`] is a submission channel to one hardware queue. Vulkan forbids
//! concurrent access to a `vk::Queue` handle, so every submit and present
//! goes through the queue's own mutex. Submission order across threads is
//! not guaranteed, only that no two submissions race on the handle.

use std::sync::{Arc, Mutex};

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Result of a presentation request.
///
/// Out-of-date and suboptimal are expected, recoverable conditions, so they
/// are outcomes rather than errors; the frame orchestrator reacts by
/// recreating the swap surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented against a surface that still matches the window.
    Optimal,
    /// Presented, but the surface no longer matches the window exactly.
    /// Recreate after this frame completes.
    Suboptimal,
    /// The surface is stale; nothing was presented. Recreate before the
    /// next acquire.
    OutOfDate,
}

impl PresentOutcome {
    /// True when the swap surface should be recreated before the next frame.
    #[inline]
    pub fn needs_recreation(self) -> bool {
        !matches!(self, PresentOutcome::Optimal)
    }
}

/// A hardware queue with its submission lock.
///
/// Shared between the frame orchestrator and one-shot transfer work; clone
/// the `Arc` to hand it to another owner.
pub struct Queue {
    device: Arc<Device>,
    handle: vk::Queue,
    family_index: u32,
    /// Guards the vk::Queue handle against concurrent submission.
    submit_lock: Mutex<()>,
}

impl Queue {
    /// Wraps a raw queue handle retrieved from the device.
    pub fn new(device: Arc<Device>, handle: vk::Queue, family_index: u32) -> Arc<Self> {
        debug!("Queue created for family {}", family_index);
        Arc::new(Self {
            device,
            handle,
            family_index,
            submit_lock: Mutex::new(()),
        })
    }

    /// Returns the queue family index this queue belongs to.
    #[inline]
    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Submits recorded work, optionally signaling `fence` on completion.
    ///
    /// Serialized against all other submissions and presents on this queue.
    ///
    /// # Errors
    /// Returns the underlying Vulkan error; submission failure is fatal.
    pub fn submit(&self, submits: &[vk::SubmitInfo], fence: vk::Fence) -> RhiResult<()> {
        let _guard = self.submit_lock.lock().unwrap_or_else(|e| e.into_inner());
        unsafe {
            self.device.handle().queue_submit(self.handle, submits, fence)?;
        }
        Ok(())
    }

    /// Presents an image, holding the submission lock for the duration.
    ///
    /// # Errors
    /// Out-of-date and suboptimal surfaces come back as [`PresentOutcome`]
    /// values, not errors. Anything else is fatal.
    pub fn present(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        present_info: &vk::PresentInfoKHR,
    ) -> RhiResult<PresentOutcome> {
        let _guard = self.submit_lock.lock().unwrap_or_else(|e| e.into_inner());
        let result = unsafe { swapchain_loader.queue_present(self.handle, present_info) };
        match result {
            Ok(false) => Ok(PresentOutcome::Optimal),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(RhiError::VulkanError(e)),
        }
    }

    /// Blocks until this queue has drained.
    pub fn wait_idle(&self) -> RhiResult<()> {
        let _guard = self.submit_lock.lock().unwrap_or_else(|e| e.into_inner());
        unsafe { self.device.handle().queue_wait_idle(self.handle)? };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_outcome_recreation() {
        assert!(!PresentOutcome::Optimal.needs_recreation());
        assert!(PresentOutcome::Suboptimal.needs_recreation());
        assert!(PresentOutcome::OutOfDate.needs_recreation());
    }

    #[test]
    fn test_queue_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Queue>();
    }
}
