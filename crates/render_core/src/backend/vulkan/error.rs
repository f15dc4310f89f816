//! Vulkan backend error types
//!
//! Every fallible call in the backend funnels into [`VulkanError`]. Native failures keep
//! the name of the operation that produced them so they can be logged before they
//! propagate out of the render loop.

use ash::vk;
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// A native call failed
    #[error("{operation} failed: {result:?}")]
    Api {
        /// Name of the failing operation
        operation: &'static str,
        /// Native result code
        result: vk::Result,
    },

    /// Instance, device or surface bring-up failed
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// No physical adapter satisfies the requirements
    #[error("No suitable device: {0}")]
    NoSuitableDevice(String),

    /// None of the acceptable formats are supported
    #[error("Unsupported format: no acceptable {what} format")]
    UnsupportedFormat {
        /// What the format was for (depth attachment, surface, ...)
        what: &'static str,
    },

    /// The memory allocator refused a buffer or image
    #[error("Allocation failed during {operation}: {result:?}")]
    Allocation {
        /// Name of the allocating operation
        operation: &'static str,
        /// Native result code
        result: vk::Result,
    },

    /// The swapchain no longer matches the surface
    #[error("Presentation surface is stale")]
    PresentationStale,

    /// The logical device was lost
    #[error("Device lost during {operation}")]
    DeviceLost {
        /// Name of the operation that observed the loss
        operation: &'static str,
    },

    /// A fence wait ran out of time
    #[error("Fence wait timed out during {operation}")]
    FenceTimeout {
        /// Name of the waiting operation
        operation: &'static str,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Reading shader bytes or other host files failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The windowing layer failed
    #[error("Window error: {0}")]
    Window(String),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

impl VulkanError {
    /// Build a `map_err` adapter that tags a native result with `operation`
    ///
    /// `ERROR_DEVICE_LOST` and `TIMEOUT` are routed to their dedicated variants.
    pub fn api(operation: &'static str) -> impl Fn(vk::Result) -> Self {
        move |result| Self::from_result(operation, result)
    }

    /// Like [`VulkanError::api`] but classifies failures as allocation errors
    pub fn allocation(operation: &'static str) -> impl Fn(vk::Result) -> Self {
        move |result| match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost { operation },
            result => Self::Allocation { operation, result },
        }
    }

    /// Classify a native result code
    pub fn from_result(operation: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost { operation },
            vk::Result::TIMEOUT => Self::FenceTimeout { operation },
            vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR => Self::PresentationStale,
            result => Self::Api { operation, result },
        }
    }

    /// Whether the render loop must stop
    ///
    /// Only a stale swapchain is recoverable; it is handled inside the frame loop.
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::PresentationStale)
    }

    /// Native result code carried by the error, if any
    pub const fn native_result(&self) -> Option<vk::Result> {
        match self {
            Self::Api { result, .. } | Self::Allocation { result, .. } => Some(*result),
            Self::DeviceLost { .. } => Some(vk::Result::ERROR_DEVICE_LOST),
            Self::FenceTimeout { .. } => Some(vk::Result::TIMEOUT),
            Self::PresentationStale => Some(vk::Result::ERROR_OUT_OF_DATE_KHR),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_is_classified() {
        let err = VulkanError::from_result("vkQueueSubmit", vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(err, VulkanError::DeviceLost { operation: "vkQueueSubmit" }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_timeout_becomes_fence_timeout() {
        let err = VulkanError::api("vkWaitForFences")(vk::Result::TIMEOUT);
        assert!(matches!(err, VulkanError::FenceTimeout { .. }));
        assert_eq!(err.native_result(), Some(vk::Result::TIMEOUT));
    }

    #[test]
    fn test_stale_swapchain_is_recoverable() {
        let err = VulkanError::from_result("vkQueuePresentKHR", vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(matches!(err, VulkanError::PresentationStale));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_api_error_keeps_operation_name() {
        let err = VulkanError::api("vkCreateRenderPass")(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let message = err.to_string();
        assert!(message.contains("vkCreateRenderPass"));
        assert!(message.contains("ERROR_OUT_OF_HOST_MEMORY"));
    }

    #[test]
    fn test_allocation_adapter() {
        let err = VulkanError::allocation("vmaCreateBuffer")(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(matches!(
            err,
            VulkanError::Allocation { result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, .. }
        ));
    }
}
