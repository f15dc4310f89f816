//! Acquire, submit and present for a ring of frame slots
//!
//! [`FrameLoop::begin`] waits on the current slot's fence, acquires a swapchain image and
//! hands back an [`AcquiredFrame`]. The caller records into the slot's command buffer and
//! then calls [`FrameLoop::end`], which submits, presents, rebuilds a stale swapchain and
//! advances to the next slot. A slot is only submitted again after its previous fence has
//! been waited on.

use ash::vk;

use super::frame_ring::FrameRing;
use super::swapchain::{SwapchainBackend, SwapchainManager};
use crate::backend::vulkan::{VulkanError, VulkanResult};

/// Per-slot synchronization and submission
pub trait FrameSlot {
    /// Semaphore the image acquisition signals
    fn image_available(&self) -> vk::Semaphore;

    /// Semaphore the submission signals and presentation waits on
    fn render_finished(&self) -> vk::Semaphore;

    /// Block until the slot's previous submission has completed
    fn wait(&mut self) -> VulkanResult<()>;

    /// Close and submit the recorded commands
    ///
    /// The fence is reset only right before the queue submission that signals it, so a
    /// failure while closing the command buffer leaves it signaled.
    fn submit(&mut self) -> VulkanResult<()>;
}

/// A frame holding an acquired swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredFrame {
    /// Slot in the frame ring
    pub frame_index: usize,
    /// Acquired swapchain image
    pub image_index: u32,
    /// Framebuffer of the acquired image
    pub framebuffer: vk::Framebuffer,
    /// Swapchain extent at acquisition
    pub extent: vk::Extent2D,
}

/// Drives a [`FrameRing`] through the per-frame protocol
pub struct FrameLoop<T> {
    frames: FrameRing<T>,
}

impl<T: FrameSlot> FrameLoop<T> {
    /// Run the protocol over `frames`
    pub fn new(frames: FrameRing<T>) -> Self {
        Self { frames }
    }

    /// Slot the next frame uses
    pub fn frame_index(&self) -> usize {
        self.frames.index()
    }

    /// The current slot
    pub fn current(&self) -> &T {
        self.frames.current()
    }

    /// Every slot in index order
    pub fn slots(&self) -> impl Iterator<Item = &T> {
        self.frames.iter()
    }

    /// Wait for the current slot and acquire an image
    ///
    /// Returns `Ok(None)` when there is nothing to draw this tick: the swapchain was not
    /// valid, or acquisition found it out of date. The swapchain is rebuilt for
    /// `framebuffer` in either case and the slot is not consumed.
    pub fn begin<B: SwapchainBackend>(
        &mut self,
        swapchain: &mut SwapchainManager<B>,
        framebuffer: vk::Extent2D,
    ) -> VulkanResult<Option<AcquiredFrame>> {
        if !swapchain.is_valid() {
            swapchain.recreate(framebuffer)?;
            return Ok(None);
        }

        let frame_index = self.frames.index();
        let slot = self.frames.current_mut();
        slot.wait()?;

        let Some(image_index) = swapchain.acquire_next_image(slot.image_available(), u64::MAX)? else {
            log::debug!("Swapchain out of date at acquire");
            swapchain.recreate(framebuffer)?;
            return Ok(None);
        };

        let target = swapchain
            .framebuffer(image_index)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("no framebuffer for swapchain image {image_index}"),
            })?;

        Ok(Some(AcquiredFrame {
            frame_index,
            image_index,
            framebuffer: target,
            extent: swapchain.extent(),
        }))
    }

    /// Submit and present `frame`, then move to the next slot
    ///
    /// The slot advances whether or not submission succeeds. The swapchain is rebuilt for
    /// `framebuffer` when presentation reports it stale or `resized` is set; the return
    /// value says whether that happened.
    pub fn end<B: SwapchainBackend>(
        &mut self,
        swapchain: &mut SwapchainManager<B>,
        frame: &AcquiredFrame,
        framebuffer: vk::Extent2D,
        resized: bool,
    ) -> VulkanResult<bool> {
        if frame.frame_index != self.frames.index() {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "frame {} ended during frame {}",
                    frame.frame_index,
                    self.frames.index()
                ),
            });
        }

        let presented = self.submit_and_present(swapchain, frame.image_index);
        self.frames.advance();
        let stale = presented?;

        if stale || resized {
            log::debug!("Rebuilding swapchain (stale: {stale}, resized: {resized})");
            swapchain.recreate(framebuffer)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn submit_and_present<B: SwapchainBackend>(
        &mut self,
        swapchain: &SwapchainManager<B>,
        image_index: u32,
    ) -> VulkanResult<bool> {
        let slot = self.frames.current_mut();
        slot.submit()?;
        swapchain.present(image_index, slot.render_finished())
    }
}
