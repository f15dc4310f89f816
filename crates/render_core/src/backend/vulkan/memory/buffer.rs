//! Buffer allocations
//!
//! [`BufferAllocation`] is the move-only owner of a buffer and its memory.
//! [`HostVisibleBuffer`] adds a persistent CPU mapping and tracks whether writes need an
//! explicit flush. [`UniformRing`] lays out one uniform value per in-flight frame.

use std::marker::PhantomData;
use std::mem;
use std::rc::Rc;

use ash::vk;
use bytemuck::Pod;
use vk_mem::Alloc;

use super::allocator::MemoryAllocator;
use crate::backend::vulkan::{VulkanError, VulkanResult};

/// Round `value` up to the next multiple of `alignment`
///
/// An alignment of zero leaves the value unchanged.
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

fn check_range(capacity: u64, offset: u64, len: u64) -> VulkanResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(VulkanError::InvalidOperation {
            reason: format!("write of {len} bytes at offset {offset} exceeds buffer size {capacity}"),
        }),
    }
}

/// A buffer and the memory backing it
///
/// Dropping releases both through the allocator. The caller must make sure no submitted
/// GPU work still reads the buffer.
pub struct BufferAllocation {
    allocation: Option<vk_mem::Allocation>,
    buffer: vk::Buffer,
    size: vk::DeviceSize,
    allocator: Rc<MemoryAllocator>,
}

impl BufferAllocation {
    /// Create a buffer with explicit memory requirements
    pub fn new(
        allocator: &Rc<MemoryAllocator>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory: &vk_mem::AllocationCreateInfo,
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let (buffer, allocation) = unsafe {
            allocator
                .raw()
                .create_buffer(&buffer_info, memory)
                .map_err(VulkanError::allocation("vmaCreateBuffer"))?
        };

        Ok(Self {
            allocation: Some(allocation),
            buffer,
            size,
            allocator: Rc::clone(allocator),
        })
    }

    /// Create a buffer in device-local memory
    pub fn device_local(
        allocator: &Rc<MemoryAllocator>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        let memory = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            required_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ..Default::default()
        };
        Self::new(allocator, size, usage, &memory)
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Allocator the buffer came from
    pub fn allocator(&self) -> &Rc<MemoryAllocator> {
        &self.allocator
    }

    fn allocation_mut(&mut self) -> VulkanResult<&mut vk_mem::Allocation> {
        self.allocation.as_mut().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "buffer allocation already released".to_string(),
        })
    }

    fn allocation(&self) -> VulkanResult<&vk_mem::Allocation> {
        self.allocation.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "buffer allocation already released".to_string(),
        })
    }
}

impl Drop for BufferAllocation {
    fn drop(&mut self) {
        if let Some(mut allocation) = self.allocation.take() {
            unsafe {
                self.allocator.raw().destroy_buffer(self.buffer, &mut allocation);
            }
        }
    }
}

/// Persistently mapped buffer in host-visible memory
pub struct HostVisibleBuffer {
    buffer: BufferAllocation,
    mapped: *mut u8,
    coherent: bool,
}

impl HostVisibleBuffer {
    /// Allocate and map a host-visible buffer
    ///
    /// Coherent memory is tried first. If the device cannot provide it the buffer falls
    /// back to plain host-visible memory and every write must be flushed.
    pub fn new(allocator: &Rc<MemoryAllocator>, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        let memory = |required_flags| vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::Auto,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            required_flags,
            ..Default::default()
        };

        let coherent_flags = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let (mut buffer, coherent) = match BufferAllocation::new(allocator, size, usage, &memory(coherent_flags)) {
            Ok(buffer) => (buffer, true),
            Err(VulkanError::Allocation { result, .. }) => {
                log::debug!("No coherent host memory ({result:?}), falling back to explicit flushes");
                let buffer = BufferAllocation::new(allocator, size, usage, &memory(vk::MemoryPropertyFlags::HOST_VISIBLE))?;
                (buffer, false)
            }
            Err(e) => return Err(e),
        };

        let mapped = unsafe {
            allocator
                .raw()
                .map_memory(buffer.allocation_mut()?)
                .map_err(VulkanError::allocation("vmaMapMemory"))?
        };

        Ok(Self {
            buffer,
            mapped,
            coherent,
        })
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size()
    }

    /// Whether writes become visible to the device without a flush
    pub fn is_coherent(&self) -> bool {
        self.coherent
    }

    /// Copy raw bytes into the mapping at `offset`
    pub fn write_bytes(&mut self, offset: u64, bytes: &[u8]) -> VulkanResult<()> {
        check_range(self.size(), offset, bytes.len() as u64)?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped.add(offset as usize), bytes.len());
        }
        Ok(())
    }

    /// Copy plain-old-data values into the mapping at `offset`
    pub fn write<T: Pod>(&mut self, offset: u64, data: &[T]) -> VulkanResult<()> {
        self.write_bytes(offset, bytemuck::cast_slice(data))
    }

    /// Make a written range visible to the device
    ///
    /// Does nothing for coherent memory.
    pub fn flush(&self, offset: u64, size: u64) -> VulkanResult<()> {
        if self.coherent {
            return Ok(());
        }
        let allocation = self.buffer.allocation()?;
        self.buffer
            .allocator()
            .raw()
            .flush_allocation(allocation, offset as usize, size as usize)
            .map_err(VulkanError::api("vmaFlushAllocation"))
    }
}

impl Drop for HostVisibleBuffer {
    fn drop(&mut self) {
        let allocator = Rc::clone(self.buffer.allocator());
        if let Ok(allocation) = self.buffer.allocation_mut() {
            unsafe {
                allocator.raw().unmap_memory(allocation);
            }
        }
    }
}

/// One uniform value per frame slot in a single mapped buffer
///
/// Slots are spaced by the device's minimum uniform offset alignment so each one can be
/// bound on its own.
pub struct UniformRing<T> {
    buffer: HostVisibleBuffer,
    stride: u64,
    slots: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> UniformRing<T> {
    /// Allocate `slots` uniform slots
    pub fn new(allocator: &Rc<MemoryAllocator>, slots: usize) -> VulkanResult<Self> {
        let stride = align_up(mem::size_of::<T>() as u64, allocator.device().min_uniform_alignment());
        let buffer = HostVisibleBuffer::new(allocator, stride * slots as u64, vk::BufferUsageFlags::UNIFORM_BUFFER)?;

        Ok(Self {
            buffer,
            stride,
            slots,
            _marker: PhantomData,
        })
    }

    /// Write `value` into `slot` and flush it
    pub fn write(&mut self, slot: usize, value: &T) -> VulkanResult<()> {
        let offset = self.offset(slot)?;
        self.buffer.write(offset, std::slice::from_ref(value))?;
        self.buffer.flush(offset, self.stride)
    }

    /// Binding info for `slot`
    pub fn descriptor_info(&self, slot: usize) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer.handle(),
            offset: self.stride * slot as u64,
            range: mem::size_of::<T>() as u64,
        }
    }

    /// Distance between slots in bytes
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Number of slots
    pub fn slots(&self) -> usize {
        self.slots
    }

    fn offset(&self, slot: usize) -> VulkanResult<u64> {
        if slot >= self.slots {
            return Err(VulkanError::InvalidOperation {
                reason: format!("uniform slot {slot} out of range ({} slots)", self.slots),
            });
        }
        Ok(self.stride * slot as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(128, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(100, 0), 100);
        assert_eq!(align_up(100, 1), 100);
    }

    #[test]
    fn test_two_matrices_fit_one_aligned_slot() {
        let size = (2 * mem::size_of::<[[f32; 4]; 4]>()) as u64;
        assert_eq!(size, 128);
        assert_eq!(align_up(size, 64), 128);
        assert_eq!(align_up(size, 256), 256);
    }

    #[test]
    fn test_range_checks() {
        assert!(check_range(8192, 0, 8192).is_ok());
        assert!(check_range(8192, 8191, 1).is_ok());
        assert!(check_range(8192, 8192, 1).is_err());
        assert!(check_range(8192, u64::MAX, 2).is_err());
    }
}
