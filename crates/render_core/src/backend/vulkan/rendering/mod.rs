// Vulkan rendering: shaders, vertex input and the graphics pipeline

pub mod pipeline;
pub mod shader;
pub mod vertex_layout;

pub use pipeline::*;
pub use shader::*;
pub use vertex_layout::*;
