// GPU memory: the per-device allocator and the buffers and images it hands out

pub mod allocator;
pub mod buffer;
pub mod image;

pub use allocator::*;
pub use buffer::*;
pub use image::*;
