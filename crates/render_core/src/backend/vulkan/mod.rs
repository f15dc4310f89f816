//! Vulkan backend implementation
//!
//! Organized the way objects are created: initialization (instance, surface, device),
//! memory, state (swapchain, render pass, synchronization), resources, rendering and
//! transfer, tied together by [`renderer::VulkanBackend`].

/// Error taxonomy shared by the whole backend
pub mod error;

/// Window abstraction and the GLFW implementation
pub mod window;

/// Instance, surface and device bring-up
pub mod initialization;

/// Per-device allocator, buffers and images
pub mod memory;

/// Swapchain, render pass, framebuffers and synchronization
pub mod state;

/// Command pools and one-off command buffers
pub mod commands;

/// Descriptor layouts, pools and writes
pub mod resources;

/// Shaders, vertex layout and the graphics pipeline
pub mod rendering;

/// Staged host-to-device uploads
pub mod transfer;

/// Frame pipeline orchestration
pub mod renderer;

pub use error::{VulkanError, VulkanResult};
pub use initialization::{GraphicsDevice, GraphicsInstance, PhysicalDeviceInfo, Surface};
pub use memory::{BufferAllocation, HostVisibleBuffer, ImageAllocation, MemoryAllocator, UniformRing};
pub use renderer::VulkanBackend;
pub use state::{AcquiredFrame, FrameLoop, FrameSlot, SwapchainBackend, SwapchainManager, SwapchainState};
pub use transfer::{StagingTransferEngine, TransferBackend};
pub use window::{RenderWindow, Window, WindowError};
