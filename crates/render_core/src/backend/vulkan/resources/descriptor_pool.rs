//! Descriptor set layouts, the per-backend descriptor pool and descriptor writes
//!
//! Every set handed to a drawable holds two uniform buffers (view/projection and model),
//! so the pool is sized as `frames * sets_per_frame` sets with two uniform-buffer
//! descriptors each.

use ash::{vk, Device};

use crate::backend::vulkan::{VulkanError, VulkanResult};

/// Uniform-buffer descriptors reserved per set
pub const UNIFORM_DESCRIPTORS_PER_SET: u32 = 2;

/// Set count and pool sizes for `frames` frames of `sets_per_frame` sets
pub fn pool_dimensions(frames: u32, sets_per_frame: u32) -> (u32, [vk::DescriptorPoolSize; 1]) {
    let max_sets = frames * sets_per_frame;
    let sizes = [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: max_sets * UNIFORM_DESCRIPTORS_PER_SET,
    }];
    (max_sets, sizes)
}

/// Descriptor set layout builder for creating reusable layouts
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(mut self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    /// Bindings added so far
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }

    /// Build the descriptor set layout
    pub fn build(self, device: &Device) -> VulkanResult<DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(VulkanError::api("vkCreateDescriptorSetLayout"))?;

        Ok(DescriptorSetLayout {
            layout,
            device: device.clone(),
        })
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Device,
}

impl DescriptorSetLayout {
    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool for the per-frame descriptor blocks
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    max_sets: u32,
    device: Device,
}

impl DescriptorPool {
    /// Create a pool for `frames` frames of `sets_per_frame` sets
    pub fn new(device: Device, frames: u32, sets_per_frame: u32) -> VulkanResult<Self> {
        let (max_sets, pool_sizes) = pool_dimensions(frames, sets_per_frame);

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(VulkanError::api("vkCreateDescriptorPool"))?;

        log::debug!("Created descriptor pool with {max_sets} sets");

        Ok(Self { pool, max_sets, device })
    }

    /// Allocate one set per layout
    pub fn allocate(&self, layouts: &[vk::DescriptorSetLayout]) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(VulkanError::allocation("vkAllocateDescriptorSets"))
    }

    /// Allocate `count` sets sharing one layout
    pub fn allocate_many(&self, layout: vk::DescriptorSetLayout, count: u32) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count as usize];
        self.allocate(&layouts)
    }

    /// Return every set to the pool
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())
        }
        .map_err(VulkanError::api("vkResetDescriptorPool"))
    }

    /// Total sets the pool can hold
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Batches uniform-buffer writes and applies them in one call
///
/// Buffer infos are kept until [`DescriptorSetWriter::update`] so the pointers handed to
/// the driver stay valid.
#[derive(Default)]
pub struct DescriptorSetWriter {
    writes: Vec<(vk::DescriptorSet, u32, vk::DescriptorBufferInfo)>,
}

impl DescriptorSetWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a uniform buffer write to `binding` of `set`
    pub fn write_buffer(mut self, set: vk::DescriptorSet, binding: u32, info: vk::DescriptorBufferInfo) -> Self {
        self.writes.push((set, binding, info));
        self
    }

    /// Number of queued writes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Apply all queued writes
    pub fn update(self, device: &Device) {
        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|(set, binding, info)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(*set)
                    .dst_binding(*binding)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(info))
                    .build()
            })
            .collect();

        unsafe {
            device.update_descriptor_sets(&writes, &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_dimensions() {
        let (max_sets, sizes) = pool_dimensions(2, 128);
        assert_eq!(max_sets, 256);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 512);
    }

    #[test]
    fn test_layout_builder_collects_bindings() {
        let builder = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .add_uniform_buffer(1, vk::ShaderStageFlags::VERTEX);
        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
    }

    #[test]
    fn test_writer_queues_writes() {
        let info = vk::DescriptorBufferInfo {
            buffer: vk::Buffer::null(),
            offset: 0,
            range: 64,
        };
        let writer = DescriptorSetWriter::new()
            .write_buffer(vk::DescriptorSet::null(), 0, info)
            .write_buffer(vk::DescriptorSet::null(), 1, info);
        assert_eq!(writer.len(), 2);
        assert!(!writer.is_empty());
    }
}
