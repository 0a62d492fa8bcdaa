//! Platform layer for the prism renderer.
//!
//! Window management via winit and Vulkan surface creation via ash-window.

mod window;

pub use window::{Surface, Window, get_required_extensions};

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
