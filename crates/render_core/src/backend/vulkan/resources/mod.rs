// Vulkan resource management

pub mod descriptor_pool;

pub use descriptor_pool::*;
