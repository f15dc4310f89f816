// Vulkan initialization components

pub mod device;
pub mod instance;
pub mod surface;

pub use device::*;
pub use instance::*;
pub use surface::*;
