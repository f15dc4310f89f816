// Vulkan state management

pub mod frame_loop;
pub mod frame_ring;
pub mod framebuffer;
pub mod render_pass;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
pub(crate) mod doubles;

pub use frame_loop::*;
pub use frame_ring::*;
pub use framebuffer::*;
pub use render_pass::*;
pub use swapchain::*;
pub use sync::*;
