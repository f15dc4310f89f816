//! The drawing context
//!
//! [`VulkanBackend::begin_draw`](crate::backend::vulkan::VulkanBackend::begin_draw) returns
//! a [`DrawingContext`] with the render pass already begun, the pipeline bound and the
//! viewport set. Drawables record into it; the context goes back to `end_draw`.

use std::rc::Rc;

use ash::{vk, Device};
use bytemuck::{Pod, Zeroable};

use crate::backend::vulkan::{VulkanError, VulkanResult};
use crate::core::CameraConfig;
use crate::foundation::math::{perspective_vulkan, to_gpu, GpuMat4, Mat4};

/// Per-frame camera uniform (binding 0)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ViewProjection {
    /// World to view
    pub view: GpuMat4,
    /// View to clip, Y down and depth in `[0, 1]`
    pub projection: GpuMat4,
}

impl ViewProjection {
    /// Camera uniform for a target of `extent` pixels
    ///
    /// A zero-height extent is treated as square so the projection stays finite.
    pub fn new(view: &Mat4, camera: &CameraConfig, extent: vk::Extent2D) -> Self {
        let aspect = if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        };
        let projection = perspective_vulkan(camera.fov_degrees.to_radians(), aspect, camera.near, camera.far);

        Self {
            view: to_gpu(view),
            projection: to_gpu(&projection),
        }
    }
}

/// Descriptor sets a frame slot hands out to its drawables
///
/// The sets are allocated once per slot and reused every time the slot comes around,
/// which is safe because the slot's fence has signaled by then.
#[derive(Debug, Clone)]
pub struct DescriptorBlock {
    sets: Rc<[vk::DescriptorSet]>,
    used: usize,
}

impl DescriptorBlock {
    /// Start handing out `sets` from the beginning
    pub fn new(sets: Rc<[vk::DescriptorSet]>) -> Self {
        Self { sets, used: 0 }
    }

    /// Next unused set
    pub fn take(&mut self) -> VulkanResult<vk::DescriptorSet> {
        let set = self
            .sets
            .get(self.used)
            .copied()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("frame descriptor block exhausted ({} sets)", self.sets.len()),
            })?;
        self.used += 1;
        Ok(set)
    }

    /// Sets handed out so far
    pub fn used(&self) -> usize {
        self.used
    }

    /// Sets still available this frame
    pub fn remaining(&self) -> usize {
        self.sets.len() - self.used
    }
}

/// Everything a drawable needs to record its draw calls for one frame
pub struct DrawingContext {
    device: Device,
    command_buffer: vk::CommandBuffer,
    frame_index: usize,
    image_index: u32,
    descriptors: DescriptorBlock,
    view_projection: vk::DescriptorBufferInfo,
    pipeline_layout: vk::PipelineLayout,
    extent: vk::Extent2D,
}

impl DrawingContext {
    pub(crate) fn new(
        device: Device,
        command_buffer: vk::CommandBuffer,
        frame_index: usize,
        image_index: u32,
        descriptors: DescriptorBlock,
        view_projection: vk::DescriptorBufferInfo,
        pipeline_layout: vk::PipelineLayout,
        extent: vk::Extent2D,
    ) -> Self {
        Self {
            device,
            command_buffer,
            frame_index,
            image_index,
            descriptors,
            view_projection,
            pipeline_layout,
            extent,
        }
    }

    /// Device function table for recording
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Command buffer inside the active render pass
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Frame slot in `0..MAX_FRAMES_IN_FLIGHT`
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Acquired swapchain image
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Take a descriptor set from this frame's block
    pub fn take_descriptor_set(&mut self) -> VulkanResult<vk::DescriptorSet> {
        self.descriptors.take()
    }

    /// The frame's descriptor block
    pub fn descriptors(&self) -> &DescriptorBlock {
        &self.descriptors
    }

    /// Binding info for this frame's view/projection uniform
    pub fn view_projection(&self) -> vk::DescriptorBufferInfo {
        self.view_projection
    }

    /// Layout of the bound pipeline
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// Render target size in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Let an overlay append its commands to the active render pass
    pub fn record_overlay(&mut self, overlay: &mut dyn OverlayRenderer) -> VulkanResult<()> {
        overlay.record(self)
    }
}

/// Something that records its own draw calls
pub trait Drawable {
    /// Record into `context` with `parent` as the enclosing transform
    fn draw(&mut self, context: &mut DrawingContext, parent: &Mat4) -> VulkanResult<()>;
}

/// A late-frame collaborator such as a UI layer
///
/// Called inside the render pass after the scene has been drawn.
pub trait OverlayRenderer {
    /// Append overlay commands to the frame
    fn record(&mut self, context: &mut DrawingContext) -> VulkanResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ash::vk::Handle;

    fn block(count: u64) -> DescriptorBlock {
        let sets: Vec<vk::DescriptorSet> = (1..=count).map(vk::DescriptorSet::from_raw).collect();
        DescriptorBlock::new(sets.into())
    }

    #[test]
    fn test_descriptor_block_hands_out_in_order() {
        let mut block = block(3);
        assert_eq!(block.take().unwrap().as_raw(), 1);
        assert_eq!(block.take().unwrap().as_raw(), 2);
        assert_eq!(block.used(), 2);
        assert_eq!(block.remaining(), 1);
    }

    #[test]
    fn test_descriptor_block_exhaustion() {
        let mut block = block(1);
        block.take().unwrap();
        assert!(matches!(block.take(), Err(VulkanError::InvalidOperation { .. })));
        assert_eq!(block.used(), 1);
    }

    #[test]
    fn test_fresh_block_shares_sets() {
        let mut first = block(2);
        first.take().unwrap();
        let second = DescriptorBlock::new(Rc::clone(&first.sets));
        assert_eq!(second.remaining(), 2);
    }

    #[test]
    fn test_projection_uses_extent_aspect() {
        let camera = CameraConfig::default();
        let wide = ViewProjection::new(&Mat4::identity(), &camera, vk::Extent2D { width: 1600, height: 800 });
        let square = ViewProjection::new(&Mat4::identity(), &camera, vk::Extent2D { width: 800, height: 800 });
        assert_relative_eq!(wide.projection[0][0] * 2.0, square.projection[0][0], epsilon = 1e-5);
        assert!(wide.projection[1][1] < 0.0);
    }

    #[test]
    fn test_zero_height_projection_is_finite() {
        let vp = ViewProjection::new(
            &Mat4::identity(),
            &CameraConfig::default(),
            vk::Extent2D { width: 640, height: 0 },
        );
        assert!(vp.projection.iter().flatten().all(|v| v.is_finite()));
    }
}
