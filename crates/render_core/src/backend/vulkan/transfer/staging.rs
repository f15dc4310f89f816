//! Chunked uploads through a fixed-size staging buffer
//!
//! A single host-visible buffer is reused for every chunk. Before each chunk the engine
//! waits for the previous copy's fence, so at most one transfer is in flight and the
//! pinned memory footprint stays at `capacity` bytes whatever the upload size.

use std::ops::Range;
use std::rc::Rc;

use ash::{vk, Device};

use crate::backend::vulkan::commands::CommandPool;
use crate::backend::vulkan::memory::{HostVisibleBuffer, MemoryAllocator};
use crate::backend::vulkan::state::Fence;
use crate::backend::vulkan::{VulkanError, VulkanResult};

/// One staging-sized slice of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Offset from the start of the upload
    pub offset: u64,
    /// Bytes in this chunk, never more than the staging capacity
    pub size: u64,
}

impl Chunk {
    /// Byte range of the chunk within the source slice
    pub fn range(&self) -> Range<usize> {
        self.offset as usize..(self.offset + self.size) as usize
    }
}

/// Split `total` bytes into chunks of at most `capacity` bytes
///
/// A zero capacity yields no chunks.
pub fn plan_chunks(total: u64, capacity: u64) -> impl Iterator<Item = Chunk> {
    let step = if capacity == 0 { total.max(1) } else { capacity };
    let total = if capacity == 0 { 0 } else { total };

    (0..total).step_by(step as usize).map(move |offset| Chunk {
        offset,
        size: capacity.min(total - offset),
    })
}

/// The device side of a staged transfer
///
/// The engine only sequences these calls; implementations own the staging memory, the
/// copy command buffer and the fence.
pub trait TransferBackend {
    /// Staging buffer size in bytes
    fn capacity(&self) -> u64;

    /// Block until the previously submitted copy has completed
    ///
    /// Returns immediately when no copy is outstanding, including after a failed submit.
    fn wait_for_transfer(&mut self) -> VulkanResult<()>;

    /// Copy `bytes` to the start of the staging buffer and make them device-visible
    fn write_staging(&mut self, bytes: &[u8]) -> VulkanResult<()>;

    /// Record and submit a copy from the staging buffer into `dst`
    ///
    /// The fence is reset only once recording has succeeded, immediately before the queue
    /// submission that will signal it.
    fn submit_copy(&mut self, dst: vk::Buffer, region: vk::BufferCopy) -> VulkanResult<()>;
}

/// Streams host bytes into device buffers one staging chunk at a time
pub struct StagingTransferEngine<B: TransferBackend = DeviceStagingBackend> {
    backend: B,
}

impl<B: TransferBackend> StagingTransferEngine<B> {
    /// Wrap a transfer backend
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    /// Staging capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.backend.capacity()
    }

    /// Copy `src` into `dst` starting at `dst_offset`
    ///
    /// Returns the number of chunks submitted. The last chunk may still be executing when
    /// this returns; call [`finish`](Self::finish) before releasing or reusing `src`'s
    /// destination.
    pub fn transfer(&mut self, dst: vk::Buffer, src: &[u8], dst_offset: u64) -> VulkanResult<usize> {
        let mut chunks = 0;

        for chunk in plan_chunks(src.len() as u64, self.backend.capacity()) {
            self.backend.wait_for_transfer()?;
            self.backend.write_staging(&src[chunk.range()])?;
            self.backend.submit_copy(
                dst,
                vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: dst_offset + chunk.offset,
                    size: chunk.size,
                },
            )?;
            chunks += 1;
        }

        log::trace!("Staged {} bytes in {chunks} chunks", src.len());
        Ok(chunks)
    }

    /// Copy several regions into `dst` and wait for the last one
    pub fn upload(&mut self, dst: vk::Buffer, regions: &[(u64, &[u8])]) -> VulkanResult<usize> {
        let mut chunks = 0;
        for (dst_offset, bytes) in regions {
            chunks += self.transfer(dst, bytes, *dst_offset)?;
        }
        self.finish()?;
        Ok(chunks)
    }

    /// Wait for the last submitted chunk
    pub fn finish(&mut self) -> VulkanResult<()> {
        self.backend.wait_for_transfer()
    }

    /// The wrapped backend
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl StagingTransferEngine<DeviceStagingBackend> {
    /// Create an engine with a device staging buffer of `capacity` bytes
    pub fn new(allocator: &Rc<MemoryAllocator>, capacity: u64, fence_timeout: u64) -> VulkanResult<Self> {
        Ok(Self::with_backend(DeviceStagingBackend::new(allocator, capacity, fence_timeout)?))
    }
}

/// Staging buffer, copy command buffer and fence on the graphics queue
pub struct DeviceStagingBackend {
    fence: Fence,
    command_buffer: vk::CommandBuffer,
    // Frees `command_buffer` when dropped
    _command_pool: CommandPool,
    staging: HostVisibleBuffer,
    queue: vk::Queue,
    fence_timeout: u64,
    // A copy was submitted and its fence not yet waited on
    pending: bool,
    device: Device,
}

impl DeviceStagingBackend {
    /// Allocate the staging buffer and its synchronization objects
    pub fn new(allocator: &Rc<MemoryAllocator>, capacity: u64, fence_timeout: u64) -> VulkanResult<Self> {
        let graphics_queue = allocator.device().graphics_queue();
        let device = allocator.device().handle().clone();

        let staging = allocator.allocate_host_visible(capacity, vk::BufferUsageFlags::TRANSFER_SRC)?;
        let command_pool = CommandPool::new(device.clone(), graphics_queue.family)?;
        let command_buffer = command_pool
            .allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "Driver returned no command buffer".to_string(),
            })?;
        let fence = Fence::new(device.clone(), true)?;

        log::debug!(
            "Created {capacity} byte staging buffer ({})",
            if staging.is_coherent() { "coherent" } else { "flushed" }
        );

        Ok(Self {
            fence,
            command_buffer,
            _command_pool: command_pool,
            staging,
            queue: graphics_queue.handle,
            fence_timeout,
            pending: false,
            device,
        })
    }

    /// Whether staging writes skip the explicit flush
    pub fn is_coherent(&self) -> bool {
        self.staging.is_coherent()
    }
}

impl TransferBackend for DeviceStagingBackend {
    fn capacity(&self) -> u64 {
        self.staging.size()
    }

    fn wait_for_transfer(&mut self) -> VulkanResult<()> {
        if self.pending {
            self.fence.wait(self.fence_timeout)?;
            self.pending = false;
        }
        Ok(())
    }

    fn write_staging(&mut self, bytes: &[u8]) -> VulkanResult<()> {
        self.staging.write_bytes(0, bytes)?;
        self.staging.flush(0, bytes.len() as u64)
    }

    fn submit_copy(&mut self, dst: vk::Buffer, region: vk::BufferCopy) -> VulkanResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let command_buffers = [self.command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        unsafe {
            self.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::api("vkResetCommandBuffer"))?;
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(VulkanError::api("vkBeginCommandBuffer"))?;
            self.device
                .cmd_copy_buffer(self.command_buffer, self.staging.handle(), dst, &[region]);
            self.device
                .end_command_buffer(self.command_buffer)
                .map_err(VulkanError::api("vkEndCommandBuffer"))?;
        }

        self.fence.reset()?;
        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info.build()], self.fence.handle())
                .map_err(VulkanError::api("vkQueueSubmit"))?;
        }
        self.pending = true;

        Ok(())
    }
}

impl Drop for DeviceStagingBackend {
    fn drop(&mut self) {
        if let Err(e) = self.wait_for_transfer() {
            log::warn!("Staging transfer still pending at teardown: {e}");
        }
    }
}
