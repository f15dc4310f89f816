//! Command pool and one-off command buffer management

use ash::{vk, Device};

use crate::backend::vulkan::{VulkanError, VulkanResult};

/// Create a pool whose buffers can be reset individually
pub(crate) fn create_command_pool(device: &Device, queue_family_index: u32) -> VulkanResult<vk::CommandPool> {
    let pool_create_info = vk::CommandPoolCreateInfo::builder()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(queue_family_index);

    unsafe {
        device
            .create_command_pool(&pool_create_info, None)
            .map_err(VulkanError::api("vkCreateCommandPool"))
    }
}

/// Command pool wrapper with RAII cleanup
///
/// Buffers allocated from the pool are freed together with it; the owner must make
/// sure none of them are still executing when it is dropped.
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a new command pool
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let command_pool = create_command_pool(&device, queue_family_index)?;
        Ok(Self { device, command_pool })
    }

    /// Allocate primary command buffers
    pub fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        allocate_primary(&self.device, self.command_pool, count)
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

pub(crate) fn allocate_primary(
    device: &Device,
    pool: vk::CommandPool,
    count: u32,
) -> VulkanResult<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    unsafe {
        device
            .allocate_command_buffers(&alloc_info)
            .map_err(VulkanError::api("vkAllocateCommandBuffers"))
    }
}

/// A command buffer that is recorded once, submitted, and waited on
///
/// Recording starts on creation. [`SingleShotCommand::submit`] ends recording, submits
/// to `queue`, blocks until the queue is idle and frees the buffer. Dropping the value
/// without submitting just frees it.
pub struct SingleShotCommand<'a> {
    device: &'a Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    command_buffer: vk::CommandBuffer,
    pending: bool,
}

impl<'a> SingleShotCommand<'a> {
    pub(crate) fn begin(device: &'a Device, pool: vk::CommandPool, queue: vk::Queue) -> VulkanResult<Self> {
        let command_buffer = allocate_primary(device, pool, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "Driver returned no command buffer".to_string(),
            })?;

        let recorder = Self {
            device,
            pool,
            queue,
            command_buffer,
            pending: true,
        };

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::api("vkBeginCommandBuffer"))?;
        }

        Ok(recorder)
    }

    /// The command buffer being recorded
    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Device the buffer records against
    pub fn device(&self) -> &Device {
        self.device
    }

    /// End recording, submit and wait for completion
    pub fn submit(mut self) -> VulkanResult<()> {
        let command_buffers = [self.command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        unsafe {
            self.device
                .end_command_buffer(self.command_buffer)
                .map_err(VulkanError::api("vkEndCommandBuffer"))?;
            self.device
                .queue_submit(self.queue, &[submit_info.build()], vk::Fence::null())
                .map_err(VulkanError::api("vkQueueSubmit"))?;
            self.device
                .queue_wait_idle(self.queue)
                .map_err(VulkanError::api("vkQueueWaitIdle"))?;
            self.device.free_command_buffers(self.pool, &command_buffers);
        }

        self.pending = false;
        Ok(())
    }
}

impl Drop for SingleShotCommand<'_> {
    fn drop(&mut self) {
        if self.pending {
            unsafe {
                self.device.free_command_buffers(self.pool, &[self.command_buffer]);
            }
        }
    }
}
