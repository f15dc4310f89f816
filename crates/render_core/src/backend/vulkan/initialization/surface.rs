//! Vulkan surface management
//!
//! Handles window surface creation and the per-adapter support queries the swapchain
//! and device selection depend on.

use std::rc::Rc;

use ash::vk;

use super::instance::GraphicsInstance;
use crate::backend::vulkan::window::RenderWindow;
use crate::backend::vulkan::{VulkanError, VulkanResult};

/// Everything an adapter reports about presenting to a surface
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    /// Image count, extent and transform limits
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format / color space pairs
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// At least one format and one present mode are available
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Presentation surface owned by a backend
///
/// Holds the instance alive so the surface is always destroyed before it.
pub struct Surface {
    instance: Rc<GraphicsInstance>,
    surface: vk::SurfaceKHR,
}

impl Surface {
    /// Create a new surface from a window
    pub fn new(instance: &Rc<GraphicsInstance>, window: &mut dyn RenderWindow) -> VulkanResult<Self> {
        let surface = window
            .create_surface(instance.instance().handle())
            .map_err(|e| VulkanError::Initialization(format!("Surface creation: {e}")))?;

        log::debug!("Created presentation surface {surface:?}");

        Ok(Self {
            instance: Rc::clone(instance),
            surface,
        })
    }

    /// Get the underlying surface handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Get surface capabilities for a physical device
    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .map_err(VulkanError::api("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))
        }
    }

    /// Get surface formats for a physical device
    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_formats(physical_device, self.surface)
                .map_err(VulkanError::api("vkGetPhysicalDeviceSurfaceFormatsKHR"))
        }
    }

    /// Get surface present modes for a physical device
    pub fn present_modes(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_present_modes(physical_device, self.surface)
                .map_err(VulkanError::api("vkGetPhysicalDeviceSurfacePresentModesKHR"))
        }
    }

    /// Whether queue `family` of `physical_device` can present to this surface
    pub fn can_present(&self, physical_device: vk::PhysicalDevice, family: u32) -> VulkanResult<bool> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_support(physical_device, family, self.surface)
                .map_err(VulkanError::api("vkGetPhysicalDeviceSurfaceSupportKHR"))
        }
    }

    /// Query capabilities, formats and present modes in one go
    pub fn support(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<SurfaceSupport> {
        Ok(SurfaceSupport {
            capabilities: self.capabilities(physical_device)?,
            formats: self.formats(physical_device)?,
            present_modes: self.present_modes(physical_device)?,
        })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.instance.surface_loader().destroy_surface(self.surface, None);
        }
    }
}
