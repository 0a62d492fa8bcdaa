//! Shared foundation for the prism renderer.
//!
//! Provides the pieces every other crate leans on:
//! - Engine-level error type and result alias
//! - Logging initialization
//! - Frame timing

mod error;
mod logging;
mod timer;

pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::FrameTimer;
