//! SPIR-V shader modules
//!
//! Shaders arrive as opaque, precompiled SPIR-V bytes. They are only needed while the
//! pipeline is being created and are dropped right after.

use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;

use ash::{vk, Device};

use crate::backend::vulkan::{VulkanError, VulkanResult};

/// Entry point used by every built-in shader stage
pub const SHADER_ENTRY_POINT: &CStr = c"main";

/// Decode SPIR-V bytes into words, honoring the magic number's byte order
pub fn spirv_words(bytes: &[u8]) -> VulkanResult<Vec<u32>> {
    Ok(ash::util::read_spv(&mut Cursor::new(bytes))?)
}

/// SPIR-V shader module wrapper with automatic resource management
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V bytecode
    pub fn from_bytes(device: &Device, bytes: &[u8]) -> VulkanResult<Self> {
        let words = spirv_words(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

        let module = unsafe {
            device
                .create_shader_module(&create_info, None)
                .map_err(VulkanError::api("vkCreateShaderModule"))?
        };

        log::debug!("Created shader module from {} SPIR-V words", words.len());
        Ok(Self {
            device: device.clone(),
            module,
        })
    }

    /// Load shader from SPIR-V file
    pub fn from_file<P: AsRef<Path>>(device: &Device, path: P) -> VulkanResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            log::error!("Failed to read shader {}: {e}", path.display());
            VulkanError::Io(e)
        })?;
        Self::from_bytes(device, &bytes)
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage description for pipeline creation
    pub fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(SHADER_ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_little_endian_spirv() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];
        let words = spirv_words(&bytes).unwrap();
        assert_eq!(words, vec![0x0723_0203, 0x0001_0000]);
    }

    #[test]
    fn test_rejects_truncated_bytes() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00];
        assert!(matches!(spirv_words(&bytes), Err(VulkanError::Io(_))));
    }
}
