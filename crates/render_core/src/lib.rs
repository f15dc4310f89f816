//! # Render Core
//!
//! The frame and resource lifecycle of a Vulkan renderer: instance and device bring-up,
//! a per-device memory allocator, a swapchain that survives resizes and minimization,
//! a two-slot frame pipeline and chunked uploads through a fixed staging buffer.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_core::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BackendConfig::new("Demo");
//!     let mut window = Window::new(&config.window)?;
//!     let mut backend = VulkanBackend::new(&mut window, &config)?;
//!
//!     let vertices = [
//!         Vertex::new([0.0, -0.5, 0.0], [1.0, 0.0, 0.0]),
//!         Vertex::new([0.5, 0.5, 0.0], [0.0, 1.0, 0.0]),
//!         Vertex::new([-0.5, 0.5, 0.0], [0.0, 0.0, 1.0]),
//!     ];
//!     let mut mesh = backend.load_mesh(&vertices, &[0, 1, 2])?;
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         if window.take_resized() {
//!             backend.notify_framebuffer_resized();
//!         }
//!         if let Some(mut frame) = backend.begin_draw(&window)? {
//!             mesh.draw(&mut frame, &Mat4::identity())?;
//!             backend.end_draw(frame, &window)?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

/// Common imports for backend users
pub mod prelude {
    pub use crate::backend::vulkan::rendering::Vertex;
    pub use crate::backend::vulkan::{
        RenderWindow, SwapchainState, VulkanBackend, VulkanError, VulkanResult, Window,
    };
    pub use crate::config::Config;
    pub use crate::core::{BackendConfig, CameraConfig, ShaderConfig, WindowConfig, MAX_FRAMES_IN_FLIGHT};
    pub use crate::foundation::math::{Mat4, Transform, Vec3};
    pub use crate::render::{Drawable, DrawingContext, Mesh, OverlayRenderer};
}
