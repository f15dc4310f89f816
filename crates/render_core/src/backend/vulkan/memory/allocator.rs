//! Per-device GPU memory allocator
//!
//! Wraps a `vk_mem` allocator bound to a single [`GraphicsDevice`]. The allocator holds the
//! device strongly, and every buffer and image holds the allocator strongly, so teardown
//! always runs allocations, then the allocator, then the device. The device keeps only a
//! [`WeakSlot`] back to its allocator, which is how [`MemoryAllocator::get_or_create`]
//! finds the live instance without forming a reference cycle.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ash::vk;

use super::buffer::{BufferAllocation, HostVisibleBuffer};
use super::image::{ImageAllocation, ImageAllocationInfo};
use crate::backend::vulkan::initialization::GraphicsDevice;
use crate::backend::vulkan::{VulkanError, VulkanResult};

/// A non-owning slot holding at most one live value
pub struct WeakSlot<T> {
    inner: RefCell<Weak<T>>,
}

impl<T> Default for WeakSlot<T> {
    fn default() -> Self {
        Self {
            inner: RefCell::new(Weak::new()),
        }
    }
}

impl<T> WeakSlot<T> {
    /// The live value, if any strong reference remains
    pub fn get(&self) -> Option<Rc<T>> {
        self.inner.borrow().upgrade()
    }

    /// Return the live value or build and remember a new one
    ///
    /// On failure the slot is left untouched.
    pub fn get_or_try_init<E, F>(&self, init: F) -> Result<Rc<T>, E>
    where
        F: FnOnce() -> Result<Rc<T>, E>,
    {
        if let Some(existing) = self.get() {
            return Ok(existing);
        }

        let created = init()?;
        *self.inner.borrow_mut() = Rc::downgrade(&created);
        Ok(created)
    }

    /// Whether a value is currently alive
    pub fn is_live(&self) -> bool {
        self.inner.borrow().strong_count() > 0
    }
}

/// Sub-allocating memory manager for one device
pub struct MemoryAllocator {
    // Declared first so it is destroyed before the device it was created on
    raw: vk_mem::Allocator,
    device: Rc<GraphicsDevice>,
}

impl MemoryAllocator {
    /// Get the device's allocator, creating it if none is alive
    ///
    /// Calls made while an allocator exists return that same instance.
    pub fn get_or_create(device: &Rc<GraphicsDevice>) -> VulkanResult<Rc<Self>> {
        device
            .allocator_slot()
            .get_or_try_init(|| Self::create(device).map(Rc::new))
    }

    fn create(device: &Rc<GraphicsDevice>) -> VulkanResult<Self> {
        let create_info = vk_mem::AllocatorCreateInfo::new(
            device.instance().instance(),
            device.handle(),
            device.physical().handle,
        )
        .vulkan_api_version(vk::API_VERSION_1_1);

        let raw = vk_mem::Allocator::new(create_info).map_err(VulkanError::allocation("vmaCreateAllocator"))?;

        log::debug!("Created memory allocator for {}", device.physical().name);

        Ok(Self {
            raw,
            device: Rc::clone(device),
        })
    }

    /// Device the allocator is bound to
    pub fn device(&self) -> &Rc<GraphicsDevice> {
        &self.device
    }

    pub(crate) fn raw(&self) -> &vk_mem::Allocator {
        &self.raw
    }

    /// Allocate a device-local buffer
    pub fn allocate_buffer(self: &Rc<Self>, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<BufferAllocation> {
        BufferAllocation::device_local(self, size, usage)
    }

    /// Allocate a persistently mapped host-visible buffer
    pub fn allocate_host_visible(
        self: &Rc<Self>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<HostVisibleBuffer> {
        HostVisibleBuffer::new(self, size, usage)
    }

    /// Allocate a device-local image and its view
    pub fn allocate_image(self: &Rc<Self>, info: &ImageAllocationInfo) -> VulkanResult<ImageAllocation> {
        ImageAllocation::new(self, info)
    }
}

impl Drop for MemoryAllocator {
    fn drop(&mut self) {
        log::debug!("Destroying memory allocator");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counted<'a> {
        drops: &'a Cell<u32>,
    }

    impl Drop for Counted<'_> {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    fn test_second_lookup_returns_same_instance() {
        let drops = Cell::new(0);
        let creations = Cell::new(0);
        let slot = WeakSlot::default();

        let make = || {
            creations.set(creations.get() + 1);
            Ok::<_, ()>(Rc::new(Counted { drops: &drops }))
        };

        let first = slot.get_or_try_init(make).unwrap();
        let second = slot.get_or_try_init(make).unwrap();

        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(creations.get(), 1);
        assert!(slot.is_live());

        drop(first);
        assert_eq!(drops.get(), 0);
        drop(second);
        assert_eq!(drops.get(), 1);
        assert!(!slot.is_live());
        assert!(slot.get().is_none());
    }

    #[test]
    fn test_recreates_after_release() {
        let drops = Cell::new(0);
        let slot = WeakSlot::default();

        let first = slot
            .get_or_try_init(|| Ok::<_, ()>(Rc::new(Counted { drops: &drops })))
            .unwrap();
        drop(first);

        let second = slot
            .get_or_try_init(|| Ok::<_, ()>(Rc::new(Counted { drops: &drops })))
            .unwrap();
        assert_eq!(drops.get(), 1);
        assert!(Rc::ptr_eq(&slot.get().unwrap(), &second));
    }

    #[test]
    fn test_failed_init_leaves_slot_empty() {
        let slot: WeakSlot<u32> = WeakSlot::default();
        let result = slot.get_or_try_init(|| Err("no memory"));
        assert_eq!(result.unwrap_err(), "no memory");
        assert!(!slot.is_live());

        let value = slot.get_or_try_init(|| Ok::<_, &str>(Rc::new(7))).unwrap();
        assert_eq!(*value, 7);
    }
}
