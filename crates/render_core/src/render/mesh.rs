//! Indexed meshes uploaded to device-local memory

use std::rc::Rc;

use ash::vk;

use super::drawing::{Drawable, DrawingContext};
use crate::backend::vulkan::memory::{BufferAllocation, MemoryAllocator, UniformRing};
use crate::backend::vulkan::rendering::{MODEL_BINDING, VIEW_PROJECTION_BINDING};
use crate::backend::vulkan::resources::DescriptorSetWriter;
use crate::backend::vulkan::VulkanResult;
use crate::core::MAX_FRAMES_IN_FLIGHT;
use crate::foundation::math::{to_gpu, GpuMat4, Mat4, Transform};

/// A vertex/index buffer pair with its own model uniform
///
/// Vertices and indices share one buffer: vertex data first, 32-bit indices after it.
/// The model uniform has one slot per frame in flight, so a mesh is drawn at most once
/// per frame.
pub struct Mesh {
    model: UniformRing<GpuMat4>,
    buffer: BufferAllocation,
    index_offset: vk::DeviceSize,
    index_count: u32,
    vertex_count: u32,
    /// Local transform applied on top of the parent transform
    pub transform: Transform,
}

impl Mesh {
    pub(crate) fn new(
        allocator: &Rc<MemoryAllocator>,
        buffer: BufferAllocation,
        vertex_count: u32,
        index_offset: vk::DeviceSize,
        index_count: u32,
    ) -> VulkanResult<Self> {
        Ok(Self {
            model: UniformRing::new(allocator, MAX_FRAMES_IN_FLIGHT)?,
            buffer,
            index_offset,
            index_count,
            vertex_count,
            transform: Transform::default(),
        })
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Number of indices
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Combined vertex/index buffer
    pub fn buffer(&self) -> vk::Buffer {
        self.buffer.handle()
    }
}

impl Drawable for Mesh {
    fn draw(&mut self, context: &mut DrawingContext, parent: &Mat4) -> VulkanResult<()> {
        let frame = context.frame_index();
        let model = parent * self.transform.to_matrix();
        self.model.write(frame, &to_gpu(&model))?;

        let set = context.take_descriptor_set()?;
        DescriptorSetWriter::new()
            .write_buffer(set, VIEW_PROJECTION_BINDING, context.view_projection())
            .write_buffer(set, MODEL_BINDING, self.model.descriptor_info(frame))
            .update(context.device());

        let device = context.device();
        let command_buffer = context.command_buffer();
        unsafe {
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                context.pipeline_layout(),
                0,
                &[set],
                &[],
            );
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[self.buffer.handle()], &[0]);
            device.cmd_bind_index_buffer(command_buffer, self.buffer.handle(), self.index_offset, vk::IndexType::UINT32);
            device.cmd_draw_indexed(command_buffer, self.index_count, 1, 0, 0, 0);
        }

        Ok(())
    }
}
