//! The Vulkan backend: frame pipeline orchestration
//!
//! [`VulkanBackend`] builds everything a window needs in dependency order (instance,
//! surface, device, allocator, swapchain, pipeline, descriptor pool, uniforms, staging,
//! frame ring) and drives the per-frame protocol:
//!
//! 1. `begin_draw` waits on the slot's fence, acquires an image, starts the render pass and
//!    returns a [`DrawingContext`].
//! 2. Drawables record into the context.
//! 3. `end_draw` resets the fence and submits, presents, rebuilds the swapchain if it went
//!    stale or the window was resized, and advances the slot.
//!
//! The ordering lives in [`FrameLoop`]; this module supplies the device-side slot and the
//! command recording. A slot's fence is waited on before its command buffer, semaphores or
//! uniform slot are touched again, so the CPU never runs more than
//! `MAX_FRAMES_IN_FLIGHT - 1` frames ahead.

use std::path::Path;
use std::rc::Rc;

use ash::{vk, Device};

use super::commands::CommandPool;
use super::initialization::{GraphicsDevice, GraphicsInstance, PhysicalDeviceInfo, Surface};
use super::memory::{MemoryAllocator, UniformRing};
use super::rendering::{create_forward_set_layout, GraphicsPipeline, Vertex};
use super::resources::{DescriptorPool, DescriptorSetLayout};
use super::state::{AcquiredFrame, FrameLoop, FrameRing, FrameSlot, FrameSync, SwapchainManager, SwapchainState};
use super::transfer::StagingTransferEngine;
use super::window::RenderWindow;
use super::{VulkanError, VulkanResult};
use crate::core::{BackendConfig, MAX_FRAMES_IN_FLIGHT};
use crate::foundation::math::Mat4;
use crate::render::{DescriptorBlock, DrawingContext, Mesh, ViewProjection};

/// Viewport and scissor covering `extent`
pub fn full_viewport(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    (viewport, scissor)
}

/// Clear values for the color and depth attachments
pub fn clear_values(color: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
        },
    ]
}

fn framebuffer_extent(window: &dyn RenderWindow) -> vk::Extent2D {
    let (width, height) = window.framebuffer_size();
    vk::Extent2D { width, height }
}

/// SPIR-V for the forward pipeline, kept for rebuilds after a render pass change
struct ShaderBytes {
    vertex: Vec<u8>,
    fragment: Vec<u8>,
}

impl ShaderBytes {
    fn load(config: &BackendConfig) -> VulkanResult<Self> {
        let read = |path: &str| {
            std::fs::read(Path::new(path)).map_err(|e| {
                log::error!("Failed to read shader {path}: {e}");
                VulkanError::Io(e)
            })
        };

        Ok(Self {
            vertex: read(&config.shaders.vertex_shader_path)?,
            fragment: read(&config.shaders.fragment_shader_path)?,
        })
    }
}

/// Per-slot state of the frame ring
struct RenderSlot {
    sync: FrameSync,
    command_buffer: vk::CommandBuffer,
    descriptor_sets: Rc<[vk::DescriptorSet]>,
    queue: vk::Queue,
    fence_timeout: u64,
    // Submitted and not yet waited on
    pending: bool,
    device: Device,
}

impl FrameSlot for RenderSlot {
    fn image_available(&self) -> vk::Semaphore {
        self.sync.image_available.handle()
    }

    fn render_finished(&self) -> vk::Semaphore {
        self.sync.render_finished.handle()
    }

    fn wait(&mut self) -> VulkanResult<()> {
        if self.pending {
            self.sync.in_flight.wait(self.fence_timeout)?;
            self.pending = false;
        }
        Ok(())
    }

    fn submit(&mut self) -> VulkanResult<()> {
        unsafe {
            self.device.cmd_end_render_pass(self.command_buffer);
            self.device
                .end_command_buffer(self.command_buffer)
                .map_err(VulkanError::api("vkEndCommandBuffer"))?;
        }

        let wait_semaphores = [self.sync.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.sync.render_finished.handle()];
        let command_buffers = [self.command_buffer];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        self.sync.in_flight.reset()?;
        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info.build()], self.sync.in_flight.handle())
                .map_err(VulkanError::api("vkQueueSubmit"))?;
        }
        self.pending = true;

        Ok(())
    }
}

/// Rendering backend for one window
///
/// Field order is teardown order.
pub struct VulkanBackend {
    frames: FrameLoop<RenderSlot>,
    staging: StagingTransferEngine,
    view_projection: UniformRing<ViewProjection>,
    // Frees every frame's descriptor sets
    _descriptor_pool: DescriptorPool,
    pipeline: GraphicsPipeline,
    set_layout: DescriptorSetLayout,
    // Frees every frame's command buffer
    _command_pool: CommandPool,
    // Owns the surface, destroyed after the swapchain
    swapchain: SwapchainManager,
    allocator: Rc<MemoryAllocator>,
    device: Rc<GraphicsDevice>,
    instance: Rc<GraphicsInstance>,

    shaders: ShaderBytes,
    config: BackendConfig,
    view: Mat4,
    framebuffer_resized: bool,
    acquired: Option<AcquiredFrame>,
}

impl VulkanBackend {
    /// Bring up Vulkan for `window`
    pub fn new(window: &mut dyn RenderWindow, config: &BackendConfig) -> VulkanResult<Self> {
        config
            .validate()
            .map_err(|e| VulkanError::Initialization(format!("Invalid configuration: {e}")))?;

        let instance = GraphicsInstance::new(window, config)?;
        let surface = Surface::new(&instance, window)?;
        let physical = PhysicalDeviceInfo::select(&instance, &surface)?;
        let device = GraphicsDevice::new(&instance, physical)?;
        let allocator = MemoryAllocator::get_or_create(&device)?;

        Self::build(instance, device, allocator, surface, window, config.clone())
    }

    /// Create a backend for another window on `other`'s device
    ///
    /// The instance, device and allocator are shared. Fails with
    /// [`VulkanError::NoSuitableDevice`] when the adapter cannot present to the new window.
    pub fn new_from(other: &Self, window: &mut dyn RenderWindow) -> VulkanResult<Self> {
        let surface = Surface::new(&other.instance, window)?;
        if !other.device.supports_surface(&surface)? {
            return Err(VulkanError::NoSuitableDevice(format!(
                "{} cannot present to the new window",
                other.device.physical().name
            )));
        }

        let allocator = MemoryAllocator::get_or_create(&other.device)?;
        Self::build(
            Rc::clone(&other.instance),
            Rc::clone(&other.device),
            allocator,
            surface,
            window,
            other.config.clone(),
        )
    }

    fn build(
        instance: Rc<GraphicsInstance>,
        device: Rc<GraphicsDevice>,
        allocator: Rc<MemoryAllocator>,
        surface: Surface,
        window: &dyn RenderWindow,
        config: BackendConfig,
    ) -> VulkanResult<Self> {
        let mut swapchain = SwapchainManager::new(&allocator, surface);
        if !swapchain.init(framebuffer_extent(window))? {
            return Err(VulkanError::Initialization(
                "Window has zero area, cannot create the initial swapchain".to_string(),
            ));
        }

        let raw = device.handle();
        let shaders = ShaderBytes::load(&config)?;
        let set_layout = create_forward_set_layout(raw)?;
        let pipeline = GraphicsPipeline::new_forward(
            raw,
            swapchain.render_pass_handle()?,
            &shaders.vertex,
            &shaders.fragment,
            &[set_layout.handle()],
        )?;

        let frame_count = MAX_FRAMES_IN_FLIGHT as u32;
        let descriptor_pool = DescriptorPool::new(raw.clone(), frame_count, config.max_descriptors_per_frame)?;
        let view_projection = UniformRing::new(&allocator, MAX_FRAMES_IN_FLIGHT)?;
        let staging = StagingTransferEngine::new(&allocator, config.staging_capacity, config.fence_timeout())?;

        let command_pool = CommandPool::new(raw.clone(), device.graphics_queue().family)?;
        let command_buffers = command_pool.allocate_command_buffers(frame_count)?;
        let graphics_queue = device.graphics_queue().handle;
        let frames = FrameRing::from_fn(MAX_FRAMES_IN_FLIGHT, |index| {
            Ok(RenderSlot {
                sync: FrameSync::new(raw)?,
                command_buffer: command_buffers[index],
                descriptor_sets: descriptor_pool
                    .allocate_many(set_layout.handle(), config.max_descriptors_per_frame)?
                    .into(),
                queue: graphics_queue,
                fence_timeout: config.fence_timeout(),
                pending: false,
                device: raw.clone(),
            })
        })?;

        log::info!(
            "Vulkan backend ready: {} frames in flight, {} descriptor sets per frame, {} byte staging buffer",
            MAX_FRAMES_IN_FLIGHT,
            config.max_descriptors_per_frame,
            config.staging_capacity
        );

        Ok(Self {
            frames: FrameLoop::new(frames),
            staging,
            view_projection,
            _descriptor_pool: descriptor_pool,
            pipeline,
            set_layout,
            _command_pool: command_pool,
            swapchain,
            allocator,
            device,
            instance,
            shaders,
            config,
            view: Mat4::identity(),
            framebuffer_resized: false,
            acquired: None,
        })
    }

    /// Start a frame
    ///
    /// Returns `Ok(None)` when there is nothing to draw into this tick: the swapchain is
    /// invalidated (for example the window is minimized) or acquisition found it out of
    /// date. The swapchain is rebuilt in either case and the frame slot is not consumed.
    pub fn begin_draw(&mut self, window: &dyn RenderWindow) -> VulkanResult<Option<DrawingContext>> {
        if self.acquired.is_some() {
            return Err(VulkanError::InvalidOperation {
                reason: "begin_draw called while a frame is still open".to_string(),
            });
        }

        let previous_pass = self.swapchain.render_pass_handle().ok();
        let Some(frame) = self.frames.begin(&mut self.swapchain, framebuffer_extent(window))? else {
            self.refresh_pipeline(previous_pass)?;
            return Ok(None);
        };

        let slot = self.frames.current();
        let command_buffer = slot.command_buffer;
        let descriptor_sets = Rc::clone(&slot.descriptor_sets);

        self.view_projection.write(
            frame.frame_index,
            &ViewProjection::new(&self.view, &self.config.camera, frame.extent),
        )?;
        self.record_frame_start(command_buffer, frame.framebuffer, frame.extent)?;
        self.acquired = Some(frame);

        Ok(Some(DrawingContext::new(
            self.device.handle().clone(),
            command_buffer,
            frame.frame_index,
            frame.image_index,
            DescriptorBlock::new(descriptor_sets),
            self.view_projection.descriptor_info(frame.frame_index),
            self.pipeline.layout(),
            frame.extent,
        )))
    }

    fn record_frame_start(
        &self,
        command_buffer: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    ) -> VulkanResult<()> {
        let device = self.device.handle();
        let clear = clear_values(self.config.clear_color);
        let (viewport, scissor) = full_viewport(extent);

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.swapchain.render_pass_handle()?)
            .framebuffer(framebuffer)
            .render_area(scissor)
            .clear_values(&clear);

        unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::api("vkResetCommandBuffer"))?;
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::api("vkBeginCommandBuffer"))?;
            device.cmd_begin_render_pass(command_buffer, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle());
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }

        Ok(())
    }

    /// Finish the frame started by [`begin_draw`](Self::begin_draw)
    ///
    /// The frame slot advances whether or not submission succeeds.
    pub fn end_draw(&mut self, context: DrawingContext, window: &dyn RenderWindow) -> VulkanResult<()> {
        let frame = self.acquired.take().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "end_draw called without a frame in progress".to_string(),
        })?;
        if (context.frame_index(), context.image_index()) != (frame.frame_index, frame.image_index) {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "drawing context for frame {} ended during frame {}",
                    context.frame_index(),
                    frame.frame_index
                ),
            });
        }

        let resized = std::mem::take(&mut self.framebuffer_resized);
        let previous_pass = self.swapchain.render_pass_handle().ok();
        if self
            .frames
            .end(&mut self.swapchain, &frame, framebuffer_extent(window), resized)?
        {
            self.refresh_pipeline(previous_pass)?;
        }

        Ok(())
    }

    /// Rebuild the swapchain for the window's current size
    ///
    /// Returns `false` while the window has zero area. The pipeline is rebuilt only when
    /// the render pass had to change.
    pub fn recreate_swapchain(&mut self, window: &dyn RenderWindow) -> VulkanResult<bool> {
        let previous_pass = self.swapchain.render_pass_handle().ok();
        let rebuilt = self.swapchain.recreate(framebuffer_extent(window))?;
        self.refresh_pipeline(previous_pass)?;
        Ok(rebuilt)
    }

    fn refresh_pipeline(&mut self, previous_pass: Option<vk::RenderPass>) -> VulkanResult<()> {
        let Ok(render_pass) = self.swapchain.render_pass_handle() else {
            return Ok(());
        };
        if previous_pass != Some(render_pass) {
            log::info!("Render pass changed, rebuilding graphics pipeline");
            self.pipeline = GraphicsPipeline::new_forward(
                self.device.handle(),
                render_pass,
                &self.shaders.vertex,
                &self.shaders.fragment,
                &[self.set_layout.handle()],
            )?;
        }
        Ok(())
    }

    /// Upload a mesh through the staging buffer
    ///
    /// Vertices and indices go into one device-local buffer, indices after the vertices.
    /// Blocks until the upload has completed.
    pub fn load_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> VulkanResult<Mesh> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "mesh needs at least one vertex and one index".to_string(),
            });
        }

        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        let index_offset = vertex_bytes.len() as vk::DeviceSize;
        let size = index_offset + index_bytes.len() as vk::DeviceSize;

        let buffer = self.allocator.allocate_buffer(
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        )?;

        let chunks = self
            .staging
            .upload(buffer.handle(), &[(0, vertex_bytes), (index_offset, index_bytes)])?;
        log::debug!(
            "Uploaded mesh: {} vertices, {} indices, {size} bytes in {chunks} chunks",
            vertices.len(),
            indices.len()
        );

        Mesh::new(
            &self.allocator,
            buffer,
            vertices.len() as u32,
            index_offset,
            indices.len() as u32,
        )
    }

    /// Flag a framebuffer size change; the next `end_draw` rebuilds the swapchain
    pub fn notify_framebuffer_resized(&mut self) {
        self.framebuffer_resized = true;
    }

    /// Set the camera's view matrix
    pub fn set_view(&mut self, view: Mat4) {
        self.view = view;
    }

    /// Slot the next `begin_draw` will use
    pub fn frame_index(&self) -> usize {
        self.frames.frame_index()
    }

    /// Swapchain lifecycle state
    pub fn swapchain_state(&self) -> SwapchainState {
        self.swapchain.state()
    }

    /// Current swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Shared logical device
    pub fn device(&self) -> &Rc<GraphicsDevice> {
        &self.device
    }

    /// Shared memory allocator
    pub fn allocator(&self) -> &Rc<MemoryAllocator> {
        &self.allocator
    }

    /// Configuration the backend was built with
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.device.wait_idle()
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait failed during teardown: {e}");
        }
        log::info!("Tearing down Vulkan backend");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_covers_extent() {
        let extent = vk::Extent2D { width: 1280, height: 720 };
        let (viewport, scissor) = full_viewport(extent);
        assert_eq!(viewport.width, 1280.0);
        assert_eq!(viewport.height, 720.0);
        assert_eq!(viewport.max_depth, 1.0);
        assert_eq!(scissor.extent, extent);
        assert_eq!(scissor.offset, vk::Offset2D { x: 0, y: 0 });
    }

    #[test]
    fn test_clear_values() {
        let clear = clear_values([0.1, 0.2, 0.3, 1.0]);
        unsafe {
            assert_eq!(clear[0].color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(clear[1].depth_stencil.depth, 1.0);
            assert_eq!(clear[1].depth_stencil.stencil, 0);
        }
    }
}
