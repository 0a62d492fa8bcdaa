//! Frame pacing state machine.
//!
//! [`FramePacer`] owns the frame slot sequence and the recreation latch,
//! decoupled from any GPU object so the pacing rules can be tested without
//! a device. The renderer feeds it acquire and present results; it answers
//! which slot to use, whether a recreation is due, and whether the frame
//! may proceed.
//!
//! Opening a frame twice, or closing one that was never opened, is a
//! programming error and panics.

use prism_rhi::queue::PresentOutcome;
use prism_rhi::swapchain::{AcquireStatus, MAX_FRAMES_IN_FLIGHT};

/// What the renderer should do after feeding an acquire result in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BeginOutcome {
    /// Record and submit into the given presentable image.
    Render { image_index: u32 },
    /// Nothing was acquired; recreate the swap surface and retry next
    /// frame.
    SkipAndRecreate,
}

/// Tracks the frame slot cycle and pending-recreation state.
pub struct FramePacer {
    slot: usize,
    frame_open: bool,
    needs_recreation: bool,
    frames_presented: u64,
    recreation_count: u64,
}

impl FramePacer {
    pub fn new() -> Self {
        Self {
            slot: 0,
            frame_open: false,
            needs_recreation: false,
            frames_presented: 0,
            recreation_count: 0,
        }
    }

    /// The frame slot the next (or current) frame uses.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Total frames successfully presented.
    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Total swap surface recreations performed.
    #[inline]
    pub fn recreation_count(&self) -> u64 {
        self.recreation_count
    }

    /// True when the swap surface must be recreated before the next
    /// acquire.
    #[inline]
    pub fn needs_recreation(&self) -> bool {
        self.needs_recreation
    }

    /// Latches a recreation request (window resize). Multiple requests
    /// before the recreation happens collapse into one.
    pub fn request_recreation(&mut self) {
        self.needs_recreation = true;
    }

    /// Clears the recreation latch after the swap surface was rebuilt.
    pub fn recreated(&mut self) {
        assert!(
            !self.frame_open,
            "swap surface recreated while a frame is open"
        );
        self.needs_recreation = false;
        self.recreation_count += 1;
    }

    /// Feeds in the acquire result, opening the frame when an image is
    /// available.
    ///
    /// A suboptimal acquire still renders this frame but latches a
    /// recreation; an out-of-date acquire skips the frame entirely and
    /// leaves the slot unchanged, since nothing was submitted to it.
    ///
    /// # Panics
    /// Panics if a frame is already open.
    pub fn begin_frame(&mut self, acquire: AcquireStatus) -> BeginOutcome {
        assert!(
            !self.frame_open,
            "begin_frame called while a frame is already open"
        );

        match acquire {
            AcquireStatus::Ready {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    self.needs_recreation = true;
                }
                self.frame_open = true;
                BeginOutcome::Render { image_index }
            }
            AcquireStatus::OutOfDate => {
                self.needs_recreation = true;
                BeginOutcome::SkipAndRecreate
            }
        }
    }

    /// Closes the frame after submission and presentation, advancing to
    /// the next slot.
    ///
    /// # Panics
    /// Panics if no frame is open.
    pub fn end_frame(&mut self, outcome: PresentOutcome) {
        assert!(self.frame_open, "end_frame called without an open frame");
        self.frame_open = false;

        if outcome.needs_recreation() {
            self.needs_recreation = true;
        }

        self.slot = (self.slot + 1) % MAX_FRAMES_IN_FLIGHT;
        self.frames_presented += 1;
    }
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(image_index: u32) -> AcquireStatus {
        AcquireStatus::Ready {
            image_index,
            suboptimal: false,
        }
    }

    fn run_frame(pacer: &mut FramePacer, outcome: PresentOutcome) {
        let begun = pacer.begin_frame(ready(0));
        assert!(matches!(begun, BeginOutcome::Render { .. }));
        pacer.end_frame(outcome);
    }

    #[test]
    fn ten_frames_cycle_through_slots() {
        let mut pacer = FramePacer::new();
        let mut slots = Vec::new();

        for _ in 0..10 {
            slots.push(pacer.slot());
            run_frame(&mut pacer, PresentOutcome::Optimal);
        }

        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(pacer.frames_presented(), 10);
    }

    #[test]
    fn resize_mid_run_preserves_slot_continuity() {
        let mut pacer = FramePacer::new();

        for _ in 0..5 {
            run_frame(&mut pacer, PresentOutcome::Optimal);
        }
        assert_eq!(pacer.slot(), 5 % MAX_FRAMES_IN_FLIGHT);

        // Resize arrives between frames.
        pacer.request_recreation();
        assert!(pacer.needs_recreation());

        // Renderer rebuilds the swap surface before the next acquire.
        pacer.recreated();
        assert!(!pacer.needs_recreation());

        // The slot cycle continues where it left off.
        let mut slots = Vec::new();
        for _ in 0..5 {
            slots.push(pacer.slot());
            run_frame(&mut pacer, PresentOutcome::Optimal);
        }
        assert_eq!(slots, vec![2, 0, 1, 2, 0]);
        assert_eq!(pacer.frames_presented(), 10);
    }

    #[test]
    fn out_of_date_acquire_skips_without_advancing() {
        let mut pacer = FramePacer::new();
        run_frame(&mut pacer, PresentOutcome::Optimal);
        let slot_before = pacer.slot();

        let begun = pacer.begin_frame(AcquireStatus::OutOfDate);
        assert_eq!(begun, BeginOutcome::SkipAndRecreate);
        assert!(pacer.needs_recreation());
        assert_eq!(pacer.slot(), slot_before);

        pacer.recreated();
        run_frame(&mut pacer, PresentOutcome::Optimal);
        assert_eq!(pacer.slot(), (slot_before + 1) % MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn repeated_out_of_date_collapses_to_one_recreation() {
        let mut pacer = FramePacer::new();

        assert_eq!(
            pacer.begin_frame(AcquireStatus::OutOfDate),
            BeginOutcome::SkipAndRecreate
        );
        assert_eq!(
            pacer.begin_frame(AcquireStatus::OutOfDate),
            BeginOutcome::SkipAndRecreate
        );

        assert!(pacer.needs_recreation());
        pacer.recreated();
        assert!(!pacer.needs_recreation());
        assert_eq!(pacer.recreation_count(), 1);
    }

    #[test]
    fn suboptimal_acquire_renders_then_recreates() {
        let mut pacer = FramePacer::new();

        let begun = pacer.begin_frame(AcquireStatus::Ready {
            image_index: 1,
            suboptimal: true,
        });
        assert_eq!(begun, BeginOutcome::Render { image_index: 1 });
        assert!(pacer.needs_recreation());

        pacer.end_frame(PresentOutcome::Optimal);
        assert_eq!(pacer.frames_presented(), 1);
    }

    #[test]
    fn out_of_date_present_latches_recreation() {
        let mut pacer = FramePacer::new();
        run_frame(&mut pacer, PresentOutcome::OutOfDate);
        assert!(pacer.needs_recreation());

        let mut pacer = FramePacer::new();
        run_frame(&mut pacer, PresentOutcome::Suboptimal);
        assert!(pacer.needs_recreation());
    }

    #[test]
    #[should_panic(expected = "already open")]
    fn begin_while_open_panics() {
        let mut pacer = FramePacer::new();
        let _ = pacer.begin_frame(ready(0));
        let _ = pacer.begin_frame(ready(0));
    }

    #[test]
    #[should_panic(expected = "without an open frame")]
    fn end_without_begin_panics() {
        let mut pacer = FramePacer::new();
        pacer.end_frame(PresentOutcome::Optimal);
    }

    #[test]
    #[should_panic(expected = "while a frame is open")]
    fn recreated_while_frame_open_panics() {
        let mut pacer = FramePacer::new();
        let _ = pacer.begin_frame(ready(0));
        pacer.recreated();
    }
}
