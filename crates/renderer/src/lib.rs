//! Frame orchestration on top of the RHI.
//!
//! This crate owns the renderer composition root, the frame pacing state
//! machine, the offscreen post-process targets, the per-frame surface
//! handed to overlay layers, and the uniform layouts shared with the
//! shaders.

pub mod frame;
pub mod mesh;
pub mod pacing;
pub mod renderer;
pub mod targets;
pub mod ubo;

pub use frame::{DrawableMesh, FrameContext, OverlayHook};
pub use mesh::GpuMesh;
pub use pacing::{BeginOutcome, FramePacer};
pub use renderer::{DEFAULT_BLOCK_SIZE, Renderer};
pub use targets::PostProcessTargets;
pub use ubo::{CameraUbo, ObjectUbo, PixelizeParams};
