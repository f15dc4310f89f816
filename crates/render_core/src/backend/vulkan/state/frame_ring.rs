//! Fixed ring of per-frame state
//!
//! The frame loop owns one slot per frame in flight and moves to the next slot after every
//! presented (or skipped-after-submit) frame. Slot `i` is only touched again after its fence
//! has been waited on, which bounds how far the CPU can run ahead of the GPU.

use crate::backend::vulkan::{VulkanError, VulkanResult};

/// A fixed-size ring with a current position
pub struct FrameRing<T> {
    slots: Vec<T>,
    index: usize,
}

impl<T> FrameRing<T> {
    /// Build `count` slots with `make(slot_index)`
    pub fn from_fn<F>(count: usize, mut make: F) -> VulkanResult<Self>
    where
        F: FnMut(usize) -> VulkanResult<T>,
    {
        if count == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "a frame ring needs at least one slot".to_string(),
            });
        }

        let slots = (0..count).map(&mut make).collect::<VulkanResult<Vec<_>>>()?;
        Ok(Self { slots, index: 0 })
    }

    /// Index of the current slot
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; a ring has at least one slot
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The current slot
    pub fn current(&self) -> &T {
        &self.slots[self.index]
    }

    /// The current slot, mutably
    pub fn current_mut(&mut self) -> &mut T {
        &mut self.slots[self.index]
    }

    /// Move to the next slot and return its index
    pub fn advance(&mut self) -> usize {
        self.index = (self.index + 1) % self.slots.len();
        self.index
    }

    /// All slots in index order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_slot_ring_alternates() {
        let mut ring = FrameRing::from_fn(2, |i| Ok(i * 10)).unwrap();
        assert_eq!(ring.index(), 0);
        assert_eq!(*ring.current(), 0);

        let visited: Vec<usize> = (0..6).map(|_| ring.advance()).collect();
        assert_eq!(visited, vec![1, 0, 1, 0, 1, 0]);
        assert_eq!(*ring.current(), 0);
    }

    #[test]
    fn test_slots_are_reused_in_order() {
        let mut ring = FrameRing::from_fn(3, |_| Ok(0_u32)).unwrap();
        for _ in 0..9 {
            *ring.current_mut() += 1;
            ring.advance();
        }
        assert!(ring.iter().all(|&uses| uses == 3));
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_empty_ring_is_rejected() {
        assert!(FrameRing::<u8>::from_fn(0, |_| Ok(0)).is_err());
    }

    #[test]
    fn test_slot_construction_error_propagates() {
        let result = FrameRing::from_fn(2, |i| {
            if i == 1 {
                Err(VulkanError::InvalidOperation {
                    reason: "boom".to_string(),
                })
            } else {
                Ok(i)
            }
        });
        assert!(result.is_err());
    }
}
