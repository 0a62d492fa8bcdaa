//! Per-frame surface exposed to collaborators.
//!
//! The renderer hands a [`FrameContext`] to overlay hooks while the frame's
//! recording is open, so external layers (an editor overlay, debug
//! visualizers) can append draw commands into the same submission.

use ash::vk;

use prism_rhi::command::CommandRecorder;

/// View into the frame currently being recorded.
///
/// The recording targets the presentable image; viewport and scissor are
/// already set to the full extent.
pub struct FrameContext<'a> {
    /// The open command recording for this frame.
    pub recorder: &'a CommandRecorder,
    /// Frame slot index the recording belongs to.
    pub slot: usize,
    /// Current presentation extent.
    pub extent: vk::Extent2D,
    /// Seconds since the previous frame.
    pub delta_time: f32,
}

/// A layer that appends its own draw commands to each frame.
///
/// `record` runs once per rendered frame, after the scene and post-process
/// draws, while the presentable-image pass is still open. Skipped frames
/// (stale surface, minimized window) do not invoke it.
pub trait OverlayHook {
    fn record(&mut self, ctx: &mut FrameContext<'_>);

    /// Notification that the presentation extent changed.
    fn resized(&mut self, _width: u32, _height: u32) {}
}

/// A mesh the scene pass can bind and draw.
///
/// The pipeline, descriptor sets, viewport, and scissor are bound by the
/// renderer before `bind` is called; implementations only bind their
/// vertex/index buffers.
pub trait DrawableMesh {
    fn bind(&self, recorder: &CommandRecorder);

    fn index_count(&self) -> u32;
}
