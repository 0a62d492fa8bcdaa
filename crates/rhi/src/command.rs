//! Command recording: pools, recorders, and one-shot transfers.
//!
//! A [`CommandPool`] owns a fixed pool of reusable command buffers bound to
//! one queue family. Recorders are checked out of the pool and record GPU
//! work between `begin_recording` and `end_recording`.
//!
//! # Pool-wide recording gate
//!
//! Begin/end are serialized pool-wide: at most one recording may be open
//! against a pool at any time, because the pool may concurrently serve
//! allocation and reset calls from another thread. The gate is held from
//! begin to end through an owned token that releases on every exit path,
//! including panics. Recorders used from multiple threads therefore queue on
//! `begin_recording` rather than interleave. This is a conservative
//! correctness contract, not a throughput target.
//!
//! # State machine
//!
//! A recording is in one of the [`RecordingState`] states. Double-begin,
//! double-end, and end-without-begin are programmer errors and panic; GPU
//! validation cannot recover mid-stream from a malformed recording.

use std::sync::{Arc, Condvar, Mutex};

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;
use crate::queue::Queue;
use crate::sync::Fence;

/// CPU-side lifecycle state of a command recording.
///
/// The GPU-side Pending state (submitted, not yet retired) is folded into
/// `Executable`; the frame-slot fence already prevents re-recording while
/// work is pending, and the CPU cannot observe Pending without polling the
/// backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingState {
    /// Freshly allocated or reset; nothing recorded.
    Initial,
    /// Open: between begin_recording and end_recording.
    Recording,
    /// Closed and submittable (possibly already submitted).
    Executable,
    /// Released back to the pool, or left invalid by a failed end;
    /// must not be used again.
    Invalid,
}

impl RecordingState {
    /// Transition for `begin_recording`. Panics on contract violation.
    pub fn on_begin(self) -> Self {
        match self {
            RecordingState::Initial | RecordingState::Executable => RecordingState::Recording,
            RecordingState::Recording => {
                panic!("begin_recording called on a recording that is already open")
            }
            RecordingState::Invalid => {
                panic!("begin_recording called on a released recording")
            }
        }
    }

    /// Transition for `end_recording`. Panics on contract violation.
    pub fn on_end(self) -> Self {
        match self {
            RecordingState::Recording => RecordingState::Executable,
            other => panic!("end_recording called on a recording in state {:?}", other),
        }
    }

    /// Transition for `reset`. Panics if the recording is open.
    pub fn on_reset(self) -> Self {
        match self {
            RecordingState::Recording => {
                panic!("reset called on a recording that is still open")
            }
            RecordingState::Invalid => panic!("reset called on a released recording"),
            _ => RecordingState::Initial,
        }
    }
}

/// The pool-wide "a recording is open" flag plus its wakeup.
struct RecordingGate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl RecordingGate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(false),
            cv: Condvar::new(),
        })
    }

    /// Blocks until no recording is open, then claims the gate.
    fn acquire(self: &Arc<Self>) -> RecordingToken {
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        while *open {
            open = self.cv.wait(open).unwrap_or_else(|e| e.into_inner());
        }
        *open = true;
        RecordingToken {
            gate: Arc::clone(self),
        }
    }
}

/// Owned claim on the recording gate; releasing it (on end_recording or on
/// any drop, panic included) wakes the next waiter.
struct RecordingToken {
    gate: Arc<RecordingGate>,
}

impl Drop for RecordingToken {
    fn drop(&mut self) {
        let mut open = self.gate.open.lock().unwrap_or_else(|e| e.into_inner());
        *open = false;
        self.gate.cv.notify_one();
    }
}

/// Command pool bound to one queue family.
///
/// The pool exclusively owns every recording allocated from it and must
/// outlive them all; recorders hold a non-owning handle back to the pool's
/// gate for begin/end serialization only.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    queue_family_index: u32,
    gate: Arc<RecordingGate>,
}

impl CommandPool {
    /// Creates a command pool whose buffers can be individually reset.
    ///
    /// # Errors
    /// Returns an error if pool creation fails.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        debug!("Command pool created for queue family {}", queue_family_index);

        Ok(Self {
            device,
            pool,
            queue_family_index,
            gate: RecordingGate::new(),
        })
    }

    /// Returns the Vulkan command pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Returns the queue family this pool allocates for.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Checks out `count` recorders from the pool.
    ///
    /// Allocation failure is unrecoverable resource exhaustion and
    /// propagates as a fatal error.
    pub fn checkout(&self, count: u32) -> RhiResult<Vec<CommandRecorder>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };

        debug!("Checked out {} command recorder(s)", count);

        Ok(buffers
            .into_iter()
            .map(|buffer| CommandRecorder {
                device: Arc::clone(&self.device),
                gate: Arc::clone(&self.gate),
                buffer,
                state: RecordingState::Initial,
                token: None,
            })
            .collect())
    }

    /// Returns recorders to the pool, invalidating them.
    ///
    /// None of them may be open.
    pub fn release(&self, recorders: Vec<CommandRecorder>) {
        let handles: Vec<vk::CommandBuffer> = recorders
            .into_iter()
            .map(|mut r| {
                assert!(
                    r.state != RecordingState::Recording,
                    "release called while a recording is open"
                );
                r.state = RecordingState::Invalid;
                r.buffer
            })
            .collect();

        if handles.is_empty() {
            return;
        }

        unsafe {
            self.device
                .handle()
                .free_command_buffers(self.pool, &handles);
        }
        debug!("Released {} command recorder(s)", handles.len());
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!(
            "Command pool destroyed (queue family {})",
            self.queue_family_index
        );
    }
}

/// One reusable command recording checked out of a [`CommandPool`].
pub struct CommandRecorder {
    device: Arc<Device>,
    gate: Arc<RecordingGate>,
    buffer: vk::CommandBuffer,
    state: RecordingState,
    /// Held while the recording is open; dropping it releases the pool gate.
    token: Option<RecordingToken>,
}

impl CommandRecorder {
    /// Returns the Vulkan command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Returns the current recording state.
    #[inline]
    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// Opens the recording for a single submission.
    ///
    /// Blocks until the pool has no other open recording, then holds the
    /// gate until [`end_recording`](Self::end_recording). Panics if this
    /// recording is already open.
    pub fn begin_recording(&mut self) -> RhiResult<()> {
        self.begin_with_flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
    }

    /// Opens the recording for repeated submission (no one-time flag).
    pub fn begin_recording_reusable(&mut self) -> RhiResult<()> {
        self.begin_with_flags(vk::CommandBufferUsageFlags::empty())
    }

    fn begin_with_flags(&mut self, flags: vk::CommandBufferUsageFlags) -> RhiResult<()> {
        // State check before blocking on the gate, so a double-begin fails
        // fast instead of deadlocking on its own token.
        self.state = self.state.on_begin();
        let token = self.gate.acquire();

        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        let result = unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)
        };
        if let Err(e) = result {
            self.state = RecordingState::Initial;
            drop(token);
            return Err(e.into());
        }

        self.token = Some(token);
        Ok(())
    }

    /// Closes the recording and releases the pool gate.
    ///
    /// A failed end leaves the buffer invalid on the backend, so the
    /// recorder goes to `Invalid` rather than `Executable`; it cannot be
    /// submitted or reopened.
    ///
    /// Panics if the recording is not open.
    pub fn end_recording(&mut self) -> RhiResult<()> {
        self.state = self.state.on_end();
        let result = unsafe { self.device.handle().end_command_buffer(self.buffer) };
        // Release the gate whether or not end succeeded.
        self.token = None;
        if let Err(e) = result {
            self.state = RecordingState::Invalid;
            return Err(e.into());
        }
        Ok(())
    }

    /// Resets the recording to Initial.
    ///
    /// Panics if the recording is currently open.
    pub fn reset(&mut self) -> RhiResult<()> {
        self.state = self.state.on_reset();
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    // --- recording operations -------------------------------------------
    //
    // All of these require the recording to be open; callers uphold that
    // through the begin/end protocol.

    /// Begins dynamic rendering.
    pub fn begin_rendering(&self, rendering_info: &vk::RenderingInfo) {
        unsafe {
            self.device
                .handle()
                .cmd_begin_rendering(self.buffer, rendering_info);
        }
    }

    /// Ends dynamic rendering.
    pub fn end_rendering(&self) {
        unsafe {
            self.device.handle().cmd_end_rendering(self.buffer);
        }
    }

    /// Binds a pipeline.
    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_pipeline(self.buffer, bind_point, pipeline);
        }
    }

    /// Binds vertex buffers starting at `first_binding`.
    pub fn bind_vertex_buffers(
        &self,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_vertex_buffers(self.buffer, first_binding, buffers, offsets);
        }
    }

    /// Binds an index buffer.
    pub fn bind_index_buffer(
        &self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_index_buffer(self.buffer, buffer, offset, index_type);
        }
    }

    /// Binds descriptor sets.
    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                bind_point,
                layout,
                first_set,
                sets,
                &[],
            );
        }
    }

    /// Sets the viewport.
    pub fn set_viewport(&self, viewport: &vk::Viewport) {
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, std::slice::from_ref(viewport));
        }
    }

    /// Sets the scissor rectangle.
    pub fn set_scissor(&self, scissor: &vk::Rect2D) {
        unsafe {
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, std::slice::from_ref(scissor));
        }
    }

    /// Non-indexed draw.
    pub fn draw(
        &self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.handle().cmd_draw(
                self.buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    /// Indexed draw.
    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.handle().cmd_draw_indexed(
                self.buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    /// Pushes constants from any Pod value.
    pub fn push_constants<T: bytemuck::Pod>(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &T,
    ) {
        unsafe {
            self.device.handle().cmd_push_constants(
                self.buffer,
                layout,
                stages,
                offset,
                bytemuck::bytes_of(data),
            );
        }
    }

    /// Records an image layout-transition barrier.
    #[allow(clippy::too_many_arguments)]
    pub fn image_barrier(
        &self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    ) {
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&barrier),
            );
        }
    }

    /// Records a buffer-to-buffer copy.
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.buffer, src, dst, regions);
        }
    }
}

// Safety: the vk::CommandBuffer handle may be moved across threads; the gate
// and state machine prevent concurrent recording.
unsafe impl Send for CommandRecorder {}

/// A single-use command recording submitted and waited on synchronously.
///
/// Used for setup-time work (uploads, layout transitions) where blocking
/// semantics are simpler than pipelining. Owns its completion fence;
/// `begin` resets it, `end_and_submit` signals it.
pub struct OneShotRecorder {
    recorder: CommandRecorder,
    fence: Fence,
}

impl OneShotRecorder {
    /// Checks a recorder out of `pool` and creates the completion fence.
    ///
    /// # Errors
    /// Returns an error if allocation or fence creation fails.
    pub fn new(device: Arc<Device>, pool: &CommandPool) -> RhiResult<Self> {
        let mut recorders = pool.checkout(1)?;
        let recorder = recorders.pop().ok_or(ash::vk::Result::ERROR_UNKNOWN)?;
        let fence = Fence::new(device, false)?;
        Ok(Self { recorder, fence })
    }

    /// Resets the owned fence and opens a single-submission recording.
    pub fn begin(&mut self) -> RhiResult<()> {
        self.fence.reset()?;
        self.recorder.begin_recording()
    }

    /// Access to the open recording for the caller's copy/transition work.
    #[inline]
    pub fn recorder(&self) -> &CommandRecorder {
        &self.recorder
    }

    /// Closes the recording and submits it with the owned fence.
    ///
    /// Returns the fence; the caller must wait on it before destroying this
    /// object or relying on the transferred data.
    pub fn end_and_submit(&mut self, queue: &Queue) -> RhiResult<&Fence> {
        self.recorder.end_recording()?;

        let buffers = [self.recorder.handle()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);
        queue.submit(std::slice::from_ref(&submit_info), self.fence.handle())?;

        Ok(&self.fence)
    }

    /// Convenience: end, submit, and block until the work retires.
    pub fn submit_and_wait(&mut self, queue: &Queue) -> RhiResult<()> {
        self.end_and_submit(queue)?;
        self.fence.wait("one-shot transfer")
    }
}

impl Drop for OneShotRecorder {
    fn drop(&mut self) {
        assert!(
            self.recorder.state() != RecordingState::Recording,
            "OneShotRecorder dropped while mid-recording"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_transitions_to_recording() {
        assert_eq!(RecordingState::Initial.on_begin(), RecordingState::Recording);
        assert_eq!(
            RecordingState::Executable.on_begin(),
            RecordingState::Recording
        );
    }

    #[test]
    fn test_end_transitions_to_executable() {
        assert_eq!(
            RecordingState::Recording.on_end(),
            RecordingState::Executable
        );
    }

    #[test]
    fn test_reset_returns_to_initial() {
        assert_eq!(RecordingState::Initial.on_reset(), RecordingState::Initial);
        assert_eq!(
            RecordingState::Executable.on_reset(),
            RecordingState::Initial
        );
    }

    #[test]
    #[should_panic(expected = "already open")]
    fn test_double_begin_panics() {
        let _ = RecordingState::Recording.on_begin();
    }

    #[test]
    #[should_panic(expected = "end_recording called")]
    fn test_end_without_begin_panics() {
        let _ = RecordingState::Initial.on_end();
    }

    #[test]
    #[should_panic(expected = "end_recording called")]
    fn test_double_end_panics() {
        let state = RecordingState::Recording.on_end();
        let _ = state.on_end();
    }

    #[test]
    #[should_panic(expected = "still open")]
    fn test_reset_while_recording_panics() {
        let _ = RecordingState::Recording.on_reset();
    }

    #[test]
    #[should_panic(expected = "released recording")]
    fn test_begin_on_released_panics() {
        let _ = RecordingState::Invalid.on_begin();
    }

    #[test]
    #[should_panic(expected = "released recording")]
    fn test_reset_on_invalidated_panics() {
        // Invalid is a dead end: a recorder left invalid by release or by
        // a failed end cannot be reset back into service.
        let _ = RecordingState::Invalid.on_reset();
    }

    #[test]
    fn test_gate_serializes_and_releases() {
        let gate = RecordingGate::new();
        {
            let _token = gate.acquire();
            assert!(*gate.open.lock().unwrap());
        }
        // Token dropped: next acquire must not block.
        let _token = gate.acquire();
        assert!(*gate.open.lock().unwrap());
    }

    #[test]
    fn test_gate_release_on_panic() {
        let gate = RecordingGate::new();
        let gate2 = Arc::clone(&gate);
        let result = std::panic::catch_unwind(move || {
            let _token = gate2.acquire();
            panic!("recording failed");
        });
        assert!(result.is_err());
        // Gate must be free again after the panicking holder unwound.
        assert!(!*gate.open.lock().unwrap_or_else(|e| e.into_inner()));
    }

    #[test]
    fn test_recorder_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandRecorder>();
    }
}
