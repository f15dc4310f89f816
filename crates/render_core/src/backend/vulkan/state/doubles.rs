//! Host-side stand-ins for the swapchain and frame slots

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ash::vk::{self, Handle};

use super::frame_loop::FrameSlot;
use super::swapchain::{plan_swapchain, SwapchainBackend, SwapchainConfiguration};
use crate::backend::vulkan::initialization::SurfaceSupport;
use crate::backend::vulkan::{VulkanError, VulkanResult};

/// Something observable that happened to a double
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    CreateSwapchain { handle: u64, old: u64 },
    DestroySwapchain(u64),
    DropImage,
    DropRenderPass,
    Acquire { signal: vk::Semaphore },
    Present { wait: vk::Semaphore },
    Wait(usize),
    Submit(usize),
}

/// Counters shared by a swapchain double and everything it hands out
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    pub events: Vec<Event>,
    pub live_swapchains: Vec<u64>,
    pub live_images: usize,
    pub live_render_passes: usize,
    pub render_passes_created: usize,
    pub wait_idles: usize,
}

impl Ledger {
    pub fn swapchains_created(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::CreateSwapchain { .. }))
            .count()
    }
}

pub(crate) type SharedLedger = Rc<RefCell<Ledger>>;

pub(crate) struct CountedImage {
    framebuffer: vk::Framebuffer,
    ledger: SharedLedger,
}

impl Drop for CountedImage {
    fn drop(&mut self) {
        let mut ledger = self.ledger.borrow_mut();
        ledger.live_images -= 1;
        ledger.events.push(Event::DropImage);
    }
}

pub(crate) struct CountedRenderPass {
    handle: vk::RenderPass,
    ledger: SharedLedger,
}

impl Drop for CountedRenderPass {
    fn drop(&mut self) {
        let mut ledger = self.ledger.borrow_mut();
        ledger.live_render_passes -= 1;
        ledger.events.push(Event::DropRenderPass);
    }
}

/// A swapchain that hands out numbered handles and tracks which are alive
pub(crate) struct CountingSwapchain {
    pub ledger: SharedLedger,
    pub format: Cell<vk::Format>,
    /// Upcoming acquires that report out of date
    pub stale_acquires: Cell<u32>,
    /// Upcoming presents that report suboptimal
    pub stale_presents: Cell<u32>,
    pub fail_create: Cell<bool>,
    next_handle: Cell<u64>,
    next_image: Cell<u32>,
}

impl CountingSwapchain {
    pub fn new(ledger: &SharedLedger) -> Self {
        Self {
            ledger: Rc::clone(ledger),
            format: Cell::new(vk::Format::B8G8R8A8_SRGB),
            stale_acquires: Cell::new(0),
            stale_presents: Cell::new(0),
            fail_create: Cell::new(false),
            next_handle: Cell::new(1),
            next_image: Cell::new(0),
        }
    }

    fn support(&self) -> SurfaceSupport {
        SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D { width: 1, height: 1 },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: self.format.get(),
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }
}

impl SwapchainBackend for CountingSwapchain {
    type Image = CountedImage;
    type RenderPass = CountedRenderPass;

    fn wait_idle(&self) -> VulkanResult<()> {
        self.ledger.borrow_mut().wait_idles += 1;
        Ok(())
    }

    fn depth_format(&self) -> VulkanResult<vk::Format> {
        Ok(vk::Format::D32_SFLOAT)
    }

    fn plan(&self, framebuffer: vk::Extent2D) -> VulkanResult<Option<SwapchainConfiguration>> {
        plan_swapchain(&self.support(), framebuffer)
    }

    fn create_swapchain(
        &self,
        _configuration: &SwapchainConfiguration,
        old: vk::SwapchainKHR,
    ) -> VulkanResult<vk::SwapchainKHR> {
        if self.fail_create.get() {
            return Err(VulkanError::Api {
                operation: "vkCreateSwapchainKHR",
                result: vk::Result::ERROR_SURFACE_LOST_KHR,
            });
        }

        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);

        let mut ledger = self.ledger.borrow_mut();
        ledger.live_swapchains.push(handle);
        ledger.events.push(Event::CreateSwapchain {
            handle,
            old: old.as_raw(),
        });
        Ok(vk::SwapchainKHR::from_raw(handle))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        Ok((0..3).map(|i| vk::Image::from_raw(swapchain.as_raw() * 100 + i)).collect())
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut ledger = self.ledger.borrow_mut();
        let handle = swapchain.as_raw();
        let position = ledger.live_swapchains.iter().position(|&live| live == handle);
        assert!(position.is_some(), "swapchain {handle} destroyed twice or never created");
        if let Some(position) = position {
            ledger.live_swapchains.remove(position);
        }
        ledger.events.push(Event::DestroySwapchain(handle));
    }

    fn create_render_pass(&self, _color: vk::Format, _depth: vk::Format) -> VulkanResult<CountedRenderPass> {
        let mut ledger = self.ledger.borrow_mut();
        ledger.live_render_passes += 1;
        ledger.render_passes_created += 1;
        Ok(CountedRenderPass {
            handle: vk::RenderPass::from_raw(ledger.render_passes_created as u64),
            ledger: Rc::clone(&self.ledger),
        })
    }

    fn render_pass_handle(render_pass: &CountedRenderPass) -> vk::RenderPass {
        render_pass.handle
    }

    fn create_image(
        &self,
        image: vk::Image,
        _configuration: &SwapchainConfiguration,
        _depth_format: vk::Format,
        _render_pass: vk::RenderPass,
    ) -> VulkanResult<CountedImage> {
        self.ledger.borrow_mut().live_images += 1;
        Ok(CountedImage {
            framebuffer: vk::Framebuffer::from_raw(image.as_raw()),
            ledger: Rc::clone(&self.ledger),
        })
    }

    fn framebuffer_handle(image: &CountedImage) -> vk::Framebuffer {
        image.framebuffer
    }

    fn acquire(&self, _swapchain: vk::SwapchainKHR, signal: vk::Semaphore, _timeout: u64) -> VulkanResult<Option<u32>> {
        self.ledger.borrow_mut().events.push(Event::Acquire { signal });

        let stale = self.stale_acquires.get();
        if stale > 0 {
            self.stale_acquires.set(stale - 1);
            return Ok(None);
        }

        let index = self.next_image.get();
        self.next_image.set((index + 1) % 3);
        Ok(Some(index))
    }

    fn present(&self, _swapchain: vk::SwapchainKHR, _image_index: u32, wait: vk::Semaphore) -> VulkanResult<bool> {
        self.ledger.borrow_mut().events.push(Event::Present { wait });

        let stale = self.stale_presents.get();
        if stale > 0 {
            self.stale_presents.set(stale - 1);
            return Ok(true);
        }
        Ok(false)
    }
}

/// A frame slot whose fence is modeled on the host
///
/// Submitting while the previous submission has not been waited on panics, as does waiting
/// on a fence that was reset with nothing submitted.
pub(crate) struct FenceSlot {
    pub id: usize,
    pub signaled: bool,
    pub pending: bool,
    pub waits: usize,
    pub submits: usize,
    pub fail_submit: bool,
    ledger: SharedLedger,
}

impl FenceSlot {
    pub fn new(id: usize, ledger: &SharedLedger) -> Self {
        Self {
            id,
            signaled: true,
            pending: false,
            waits: 0,
            submits: 0,
            fail_submit: false,
            ledger: Rc::clone(ledger),
        }
    }
}

impl FrameSlot for FenceSlot {
    fn image_available(&self) -> vk::Semaphore {
        vk::Semaphore::from_raw(self.id as u64 * 2 + 1)
    }

    fn render_finished(&self) -> vk::Semaphore {
        vk::Semaphore::from_raw(self.id as u64 * 2 + 2)
    }

    fn wait(&mut self) -> VulkanResult<()> {
        assert!(
            self.signaled || self.pending,
            "slot {} waits on a fence nothing will signal",
            self.id
        );
        self.signaled = true;
        self.pending = false;
        self.waits += 1;
        self.ledger.borrow_mut().events.push(Event::Wait(self.id));
        Ok(())
    }

    fn submit(&mut self) -> VulkanResult<()> {
        if self.fail_submit {
            return Err(VulkanError::Api {
                operation: "vkQueueSubmit",
                result: vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            });
        }
        assert!(
            self.signaled && !self.pending,
            "slot {} reused before its fence was waited on",
            self.id
        );
        self.signaled = false;
        self.pending = true;
        self.submits += 1;
        self.ledger.borrow_mut().events.push(Event::Submit(self.id));
        Ok(())
    }
}
