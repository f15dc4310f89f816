//! Swapchain management
//!
//! [`SwapchainManager`] owns the swapchain, its per-image color views, depth attachments and
//! framebuffers, and the render pass they are compatible with. It moves through
//! `Uninitialized -> Valid -> (Invalidated <-> Valid) -> Destroyed`:
//!
//! - [`SwapchainManager::init`] builds everything for the first time.
//! - [`SwapchainManager::recreate`] idles the device, drops the per-image resources and
//!   rebuilds them against the current surface. A zero-sized framebuffer, or any failure
//!   part way through, leaves the manager `Invalidated` with no per-image resources until a
//!   later call succeeds.
//! - [`SwapchainManager::destroy`] tears down framebuffers, depth attachments, views, the
//!   swapchain and finally the render pass.
//!
//! The manager only sequences these steps. The native calls sit behind [`SwapchainBackend`],
//! implemented for a real surface by [`DeviceSwapchain`]. The selection policies (surface
//! format, present mode, extent, image count, depth format) are free functions so they can
//! be checked without a device.

use std::rc::Rc;

use ash::vk;

use super::framebuffer::Framebuffer;
use super::render_pass::RenderPass;
use crate::backend::vulkan::initialization::{GraphicsDevice, Surface, SurfaceSupport};
use crate::backend::vulkan::memory::{ImageAllocation, ImageAllocationInfo, MemoryAllocator};
use crate::backend::vulkan::{VulkanError, VulkanResult};

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Prefer sRGB BGRA8, otherwise the first reported format
///
/// Returns `None` only for an empty list.
pub fn select_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// Prefer mailbox, otherwise FIFO which is always available
pub fn select_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Swapchain extent for a surface and the window's framebuffer size
///
/// A current extent of `u32::MAX` means the surface follows the swapchain, so the
/// framebuffer size is used, clamped to the surface limits. A zero-sized framebuffer always
/// yields a zero extent.
pub fn select_extent(capabilities: &vk::SurfaceCapabilitiesKHR, framebuffer: vk::Extent2D) -> vk::Extent2D {
    if framebuffer.width == 0 || framebuffer.height == 0 {
        return vk::Extent2D { width: 0, height: 0 };
    }

    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: framebuffer.width.clamp(min.width, max.width.max(min.width)),
        height: framebuffer.height.clamp(min.height, max.height.max(min.height)),
    }
}

/// One more than the minimum, capped by the maximum when the surface reports one
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Pick the depth attachment format through a format lookup
///
/// `find` receives the candidate list, the tiling and the required features, and returns
/// the first supported candidate.
pub fn choose_depth_format<F>(find: F) -> VulkanResult<vk::Format>
where
    F: FnOnce(&[vk::Format], vk::ImageTiling, vk::FormatFeatureFlags) -> Option<vk::Format>,
{
    find(
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    )
    .ok_or(VulkanError::UnsupportedFormat {
        what: "depth attachment",
    })
}

/// Negotiated swapchain parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfiguration {
    /// Color format of the presentable images
    pub format: vk::Format,
    /// Color space of the presentable images
    pub color_space: vk::ColorSpaceKHR,
    /// Present mode
    pub present_mode: vk::PresentModeKHR,
    /// Image size in pixels
    pub extent: vk::Extent2D,
    /// Number of presentable images
    pub image_count: u32,
    /// Array layers per image
    pub array_layers: u32,
    /// Transform the surface currently applies
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl Default for SwapchainConfiguration {
    fn default() -> Self {
        Self {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D { width: 0, height: 0 },
            image_count: 0,
            array_layers: 1,
            pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
        }
    }
}

/// Apply the selection policies to a surface
///
/// Returns `Ok(None)` when the extent would have zero area. `image_count` is the requested
/// minimum; the driver may create more.
pub fn plan_swapchain(
    support: &SurfaceSupport,
    framebuffer: vk::Extent2D,
) -> VulkanResult<Option<SwapchainConfiguration>> {
    let surface_format = select_surface_format(&support.formats).ok_or(VulkanError::UnsupportedFormat {
        what: "surface",
    })?;

    let extent = select_extent(&support.capabilities, framebuffer);
    if extent.width == 0 || extent.height == 0 {
        return Ok(None);
    }

    Ok(Some(SwapchainConfiguration {
        format: surface_format.format,
        color_space: surface_format.color_space,
        present_mode: select_present_mode(&support.present_modes),
        extent,
        image_count: select_image_count(&support.capabilities),
        array_layers: 1,
        pre_transform: support.capabilities.current_transform,
    }))
}

/// Lifecycle of a [`SwapchainManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    /// Nothing created yet
    Uninitialized,
    /// Images, framebuffers and render pass are usable
    Valid,
    /// The surface has zero area or went stale; no per-image resources exist
    Invalidated,
    /// Torn down; no further use
    Destroyed,
}

/// Native operations a [`SwapchainManager`] drives
///
/// Implementations own the surface and whatever the per-image resources need. Handles
/// returned by [`create_swapchain`](Self::create_swapchain) are released only through
/// [`destroy_swapchain`](Self::destroy_swapchain).
pub trait SwapchainBackend {
    /// Color view, depth attachment and framebuffer for one presentable image
    type Image;
    /// Render pass every framebuffer is compatible with
    type RenderPass;

    /// Block until the device has finished all submitted work
    fn wait_idle(&self) -> VulkanResult<()>;

    /// Depth attachment format, chosen once at init
    fn depth_format(&self) -> VulkanResult<vk::Format>;

    /// Negotiate parameters for the surface's current state; `None` for a zero extent
    fn plan(&self, framebuffer: vk::Extent2D) -> VulkanResult<Option<SwapchainConfiguration>>;

    /// Create a swapchain, handing `old` to the driver for reuse
    fn create_swapchain(
        &self,
        configuration: &SwapchainConfiguration,
        old: vk::SwapchainKHR,
    ) -> VulkanResult<vk::SwapchainKHR>;

    /// Presentable images of `swapchain`
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>>;

    /// Release a swapchain handle
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    /// Create the render pass for a color and depth format pair
    fn create_render_pass(&self, color_format: vk::Format, depth_format: vk::Format) -> VulkanResult<Self::RenderPass>;

    /// Native handle of a render pass
    fn render_pass_handle(render_pass: &Self::RenderPass) -> vk::RenderPass;

    /// Build the per-image resources for one presentable image
    fn create_image(
        &self,
        image: vk::Image,
        configuration: &SwapchainConfiguration,
        depth_format: vk::Format,
        render_pass: vk::RenderPass,
    ) -> VulkanResult<Self::Image>;

    /// Framebuffer of a per-image resource set
    fn framebuffer_handle(image: &Self::Image) -> vk::Framebuffer;

    /// Acquire the next image, signaling `signal`; `None` when out of date
    fn acquire(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore, timeout: u64) -> VulkanResult<Option<u32>>;

    /// Queue `image_index` for presentation after `wait`; `true` when the swapchain went stale
    fn present(&self, swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore) -> VulkanResult<bool>;
}

/// Owns the swapchain and everything sized to it
pub struct SwapchainManager<B: SwapchainBackend = DeviceSwapchain> {
    images: Vec<B::Image>,
    render_pass: Option<(vk::Format, B::RenderPass)>,
    swapchain: vk::SwapchainKHR,
    configuration: SwapchainConfiguration,
    depth_format: vk::Format,
    state: SwapchainState,
    backend: B,
}

impl SwapchainManager<DeviceSwapchain> {
    /// Create an uninitialized manager presenting to `surface`
    pub fn new(allocator: &Rc<MemoryAllocator>, surface: Surface) -> Self {
        Self::with_backend(DeviceSwapchain::new(allocator, surface))
    }
}

impl<B: SwapchainBackend> SwapchainManager<B> {
    /// Create an uninitialized manager over `backend`
    pub fn with_backend(backend: B) -> Self {
        Self {
            images: Vec::new(),
            render_pass: None,
            swapchain: vk::SwapchainKHR::null(),
            configuration: SwapchainConfiguration::default(),
            depth_format: vk::Format::UNDEFINED,
            state: SwapchainState::Uninitialized,
            backend,
        }
    }

    /// Build the swapchain for the first time
    ///
    /// Returns `false` when the window currently has zero area; the manager is then
    /// `Invalidated` and a later [`SwapchainManager::recreate`] finishes the job.
    pub fn init(&mut self, framebuffer: vk::Extent2D) -> VulkanResult<bool> {
        if self.state != SwapchainState::Uninitialized {
            return Err(VulkanError::InvalidOperation {
                reason: format!("swapchain init in state {:?}", self.state),
            });
        }

        self.depth_format = self.backend.depth_format()?;
        log::debug!("Using depth format {:?}", self.depth_format);

        self.rebuild(framebuffer)
    }

    /// Rebuild against the surface's current state
    ///
    /// Returns `false` and moves to `Invalidated` when the extent has zero area.
    pub fn recreate(&mut self, framebuffer: vk::Extent2D) -> VulkanResult<bool> {
        match self.state {
            SwapchainState::Valid | SwapchainState::Invalidated => self.rebuild(framebuffer),
            state => Err(VulkanError::InvalidOperation {
                reason: format!("swapchain recreate in state {state:?}"),
            }),
        }
    }

    fn rebuild(&mut self, framebuffer: vk::Extent2D) -> VulkanResult<bool> {
        self.backend.wait_idle()?;
        self.images.clear();
        // Stays here until every step below has succeeded
        self.state = SwapchainState::Invalidated;
        self.configuration.image_count = 0;

        let Some(mut configuration) = self.backend.plan(framebuffer)? else {
            log::info!("Swapchain invalidated: framebuffer is {}x{}", framebuffer.width, framebuffer.height);
            return Ok(false);
        };

        let swapchain = self.backend.create_swapchain(&configuration, self.swapchain)?;
        if self.swapchain != vk::SwapchainKHR::null() {
            self.backend.destroy_swapchain(self.swapchain);
        }
        self.swapchain = swapchain;

        let images = self.backend.swapchain_images(swapchain)?;
        configuration.image_count = images.len() as u32;

        let format_changed = self
            .render_pass
            .as_ref()
            .map_or(true, |(format, _)| *format != configuration.format);
        if format_changed {
            self.render_pass = None;
            let render_pass = self.backend.create_render_pass(configuration.format, self.depth_format)?;
            self.render_pass = Some((configuration.format, render_pass));
        }

        let render_pass = self.render_pass_handle()?;
        self.images = images
            .iter()
            .map(|&image| {
                self.backend
                    .create_image(image, &configuration, self.depth_format, render_pass)
            })
            .collect::<VulkanResult<_>>()?;
        self.configuration = configuration;
        self.state = SwapchainState::Valid;

        log::info!(
            "Swapchain ready: {}x{} {:?} {:?}, {} images",
            configuration.extent.width,
            configuration.extent.height,
            configuration.format,
            configuration.present_mode,
            configuration.image_count
        );

        Ok(true)
    }

    /// Acquire the next presentable image
    ///
    /// Returns `Ok(None)` when the swapchain is not valid or is out of date.
    pub fn acquire_next_image(&self, signal: vk::Semaphore, timeout: u64) -> VulkanResult<Option<u32>> {
        if self.state != SwapchainState::Valid {
            return Ok(None);
        }
        self.backend.acquire(self.swapchain, signal, timeout)
    }

    /// Present `image_index` once `wait` is signaled
    ///
    /// Returns `true` when the swapchain is suboptimal or out of date and should be rebuilt.
    pub fn present(&self, image_index: u32, wait: vk::Semaphore) -> VulkanResult<bool> {
        self.backend.present(self.swapchain, image_index, wait)
    }

    /// Tear everything down in reverse creation order
    pub fn destroy(&mut self) {
        if self.state == SwapchainState::Destroyed {
            return;
        }

        self.images.clear();
        if self.swapchain != vk::SwapchainKHR::null() {
            self.backend.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
        }
        self.render_pass = None;
        self.state = SwapchainState::Destroyed;
        log::debug!("Swapchain destroyed");
    }

    /// Current lifecycle state
    pub fn state(&self) -> SwapchainState {
        self.state
    }

    /// Whether frames can be rendered
    pub fn is_valid(&self) -> bool {
        self.state == SwapchainState::Valid
    }

    /// Negotiated parameters
    pub fn configuration(&self) -> &SwapchainConfiguration {
        &self.configuration
    }

    /// Image size in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.configuration.extent
    }

    /// Number of live per-image resource sets
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Swapchain handle (null before the first successful build)
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Render pass compatible with every framebuffer
    pub fn render_pass_handle(&self) -> VulkanResult<vk::RenderPass> {
        self.render_pass
            .as_ref()
            .map(|(_, pass)| B::render_pass_handle(pass))
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "render pass not created yet".to_string(),
            })
    }

    /// Framebuffer for a swapchain image
    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.images.get(image_index as usize).map(B::framebuffer_handle)
    }

    /// The native backend
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: SwapchainBackend> Drop for SwapchainManager<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}

struct ColorView {
    device: ash::Device,
    view: vk::ImageView,
}

impl Drop for ColorView {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
    }
}

/// Per-image resources of a [`DeviceSwapchain`]
///
/// Field order is destruction order: framebuffer, depth attachment, color view.
pub struct SwapchainImage {
    framebuffer: Framebuffer,
    // Attachments referenced by `framebuffer`
    _depth: ImageAllocation,
    _view: ColorView,
}

/// [`SwapchainBackend`] for a window surface on a [`GraphicsDevice`]
pub struct DeviceSwapchain {
    allocator: Rc<MemoryAllocator>,
    device: Rc<GraphicsDevice>,
    // Dropped after the manager has destroyed the swapchain
    surface: Surface,
}

impl DeviceSwapchain {
    /// Present to `surface` with images allocated from `allocator`
    pub fn new(allocator: &Rc<MemoryAllocator>, surface: Surface) -> Self {
        Self {
            allocator: Rc::clone(allocator),
            device: Rc::clone(allocator.device()),
            surface,
        }
    }

    /// The presentation surface
    pub fn surface(&self) -> &Surface {
        &self.surface
    }
}

impl SwapchainBackend for DeviceSwapchain {
    type Image = SwapchainImage;
    type RenderPass = RenderPass;

    fn wait_idle(&self) -> VulkanResult<()> {
        self.device.wait_idle()
    }

    fn depth_format(&self) -> VulkanResult<vk::Format> {
        choose_depth_format(|candidates, tiling, features| {
            self.device.find_supported_format(candidates, tiling, features)
        })
    }

    fn plan(&self, framebuffer: vk::Extent2D) -> VulkanResult<Option<SwapchainConfiguration>> {
        let support = self.surface.support(self.device.physical().handle)?;
        plan_swapchain(&support, framebuffer)
    }

    fn create_swapchain(
        &self,
        configuration: &SwapchainConfiguration,
        old: vk::SwapchainKHR,
    ) -> VulkanResult<vk::SwapchainKHR> {
        let families = self.device.queue_families();
        let family_indices = [families.graphics, families.present];
        let (sharing_mode, shared_families): (_, &[u32]) = if families.is_shared() {
            (vk::SharingMode::EXCLUSIVE, &[])
        } else {
            (vk::SharingMode::CONCURRENT, &family_indices)
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface.handle())
            .min_image_count(configuration.image_count)
            .image_format(configuration.format)
            .image_color_space(configuration.color_space)
            .image_extent(configuration.extent)
            .image_array_layers(configuration.array_layers)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(configuration.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(configuration.present_mode)
            .clipped(true)
            .old_swapchain(old);

        unsafe {
            self.device
                .swapchain_loader()
                .create_swapchain(&create_info, None)
                .map_err(VulkanError::api("vkCreateSwapchainKHR"))
        }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        unsafe {
            self.device
                .swapchain_loader()
                .get_swapchain_images(swapchain)
                .map_err(VulkanError::api("vkGetSwapchainImagesKHR"))
        }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe {
            self.device.swapchain_loader().destroy_swapchain(swapchain, None);
        }
    }

    fn create_render_pass(&self, color_format: vk::Format, depth_format: vk::Format) -> VulkanResult<RenderPass> {
        RenderPass::new_forward_pass(self.device.handle().clone(), color_format, depth_format)
    }

    fn render_pass_handle(render_pass: &RenderPass) -> vk::RenderPass {
        render_pass.handle()
    }

    fn create_image(
        &self,
        image: vk::Image,
        configuration: &SwapchainConfiguration,
        depth_format: vk::Format,
        render_pass: vk::RenderPass,
    ) -> VulkanResult<SwapchainImage> {
        let device = self.device.handle();
        let extent = configuration.extent;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(configuration.format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = ColorView {
            device: device.clone(),
            view: unsafe {
                device
                    .create_image_view(&view_info, None)
                    .map_err(VulkanError::api("vkCreateImageView"))?
            },
        };

        let mut depth = self
            .allocator
            .allocate_image(&ImageAllocationInfo::depth_attachment(extent, depth_format))?;
        depth.transition_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)?;

        let framebuffer = Framebuffer::new(device.clone(), render_pass, &[view.view, depth.view()], extent)?;

        Ok(SwapchainImage {
            framebuffer,
            _depth: depth,
            _view: view,
        })
    }

    fn framebuffer_handle(image: &SwapchainImage) -> vk::Framebuffer {
        image.framebuffer.handle()
    }

    fn acquire(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore, timeout: u64) -> VulkanResult<Option<u32>> {
        let result = unsafe {
            self.device
                .swapchain_loader()
                .acquire_next_image(swapchain, timeout, signal, vk::Fence::null())
        };

        match result {
            Ok((index, _suboptimal)) => Ok(Some(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(result) => Err(VulkanError::from_result("vkAcquireNextImageKHR", result)),
        }
    }

    fn present(&self, swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore) -> VulkanResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let queue = self.device.present_queue().handle;
        let result = unsafe { self.device.swapchain_loader().queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(result) => Err(VulkanError::from_result("vkQueuePresentKHR", result)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::vulkan::initialization::first_supported_format;
    use crate::backend::vulkan::state::doubles::{CountingSwapchain, Event, Ledger, SharedLedger};
    use std::cell::RefCell;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn capabilities(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn support() -> SurfaceSupport {
        SurfaceSupport {
            capabilities: capabilities((u32::MAX, u32::MAX), (1, 1), (4096, 4096)),
            formats: vec![format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    #[test]
    fn test_prefers_srgb_bgra() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(select_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_format_falls_back_to_first() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        for _ in 0..3 {
            assert_eq!(select_surface_format(&formats).unwrap().format, vk::Format::R8G8B8A8_UNORM);
        }
        assert!(select_surface_format(&[]).is_none());
    }

    #[test]
    fn test_srgb_format_needs_matching_color_space() {
        let formats = [
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];
        assert_eq!(select_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn test_present_mode_selection() {
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(select_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_fixed_surface_extent_wins() {
        let caps = capabilities((800, 600), (1, 1), (4096, 4096));
        assert_eq!(select_extent(&caps, extent(1920, 1080)), extent(800, 600));
    }

    #[test]
    fn test_sentinel_extent_clamps_framebuffer() {
        let caps = capabilities((u32::MAX, u32::MAX), (64, 64), (2048, 2048));
        assert_eq!(select_extent(&caps, extent(1280, 720)), extent(1280, 720));
        assert_eq!(select_extent(&caps, extent(4000, 10)), extent(2048, 64));
    }

    #[test]
    fn test_zero_framebuffer_gives_zero_extent() {
        let caps = capabilities((u32::MAX, u32::MAX), (1, 1), (4096, 4096));
        assert_eq!(select_extent(&caps, extent(0, 0)), extent(0, 0));
        assert_eq!(select_extent(&caps, extent(640, 0)), extent(0, 0));
    }

    #[test]
    fn test_image_count_respects_maximum() {
        let mut caps = capabilities((1, 1), (1, 1), (1, 1));
        assert_eq!(select_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(select_image_count(&caps), 2);

        caps.max_image_count = 0;
        caps.min_image_count = 5;
        assert_eq!(select_image_count(&caps), 6);
    }

    #[test]
    fn test_plan_is_stable_for_same_input() {
        let support = support();
        let first = plan_swapchain(&support, extent(1024, 768)).unwrap().unwrap();
        let second = plan_swapchain(&support, extent(1024, 768)).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.extent, extent(1024, 768));
        assert_eq!(first.image_count, 3);
        assert_eq!(first.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(first.array_layers, 1);
    }

    #[test]
    fn test_plan_zero_area_is_invalid() {
        assert!(plan_swapchain(&support(), extent(0, 0)).unwrap().is_none());
    }

    #[test]
    fn test_plan_without_formats_fails() {
        let mut support = support();
        support.formats.clear();
        assert!(matches!(
            plan_swapchain(&support, extent(10, 10)),
            Err(VulkanError::UnsupportedFormat { what: "surface" })
        ));
    }

    #[test]
    fn test_depth_format_candidate_order() {
        let supported = |wanted: vk::Format| {
            move |format: vk::Format| {
                if format == wanted {
                    vk::FormatProperties {
                        optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                        ..Default::default()
                    }
                } else {
                    vk::FormatProperties::default()
                }
            }
        };

        for wanted in DEPTH_FORMAT_CANDIDATES {
            let query = supported(wanted);
            let chosen = choose_depth_format(|c, t, f| first_supported_format(c, t, f, query)).unwrap();
            assert_eq!(chosen, wanted);
        }
    }

    #[test]
    fn test_no_depth_format_is_unsupported() {
        let result = choose_depth_format(|c, t, f| first_supported_format(c, t, f, |_| vk::FormatProperties::default()));
        assert!(matches!(
            result,
            Err(VulkanError::UnsupportedFormat {
                what: "depth attachment"
            })
        ));
    }

    fn manager() -> (SwapchainManager<CountingSwapchain>, SharedLedger) {
        let ledger = Rc::new(RefCell::new(Ledger::default()));
        let manager = SwapchainManager::with_backend(CountingSwapchain::new(&ledger));
        (manager, ledger)
    }

    #[test]
    fn test_init_builds_every_image() {
        let (mut swapchain, ledger) = manager();
        assert_eq!(swapchain.state(), SwapchainState::Uninitialized);

        assert!(swapchain.init(extent(800, 600)).unwrap());
        assert_eq!(swapchain.state(), SwapchainState::Valid);
        assert_eq!(swapchain.extent(), extent(800, 600));
        assert_eq!(swapchain.image_count(), 3);
        assert_eq!(swapchain.configuration().image_count, 3);
        assert!(swapchain.framebuffer(2).is_some());
        assert!(swapchain.framebuffer(3).is_none());

        let ledger = ledger.borrow();
        assert_eq!(ledger.live_images, 3);
        assert_eq!(ledger.live_render_passes, 1);
        assert_eq!(ledger.live_swapchains.len(), 1);
    }

    #[test]
    fn test_init_twice_is_rejected() {
        let (mut swapchain, _ledger) = manager();
        swapchain.init(extent(800, 600)).unwrap();
        assert!(matches!(
            swapchain.init(extent(800, 600)),
            Err(VulkanError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_repeated_recreate_keeps_one_live_swapchain() {
        let (mut swapchain, ledger) = manager();
        swapchain.init(extent(1024, 768)).unwrap();
        let first = *swapchain.configuration();

        assert!(swapchain.recreate(extent(1024, 768)).unwrap());
        let second = *swapchain.configuration();
        assert!(swapchain.recreate(extent(1024, 768)).unwrap());
        let third = *swapchain.configuration();

        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(swapchain.image_count(), 3);

        {
            let ledger = ledger.borrow();
            assert_eq!(ledger.swapchains_created(), 3);
            assert_eq!(ledger.live_swapchains, vec![3]);
            assert_eq!(ledger.live_images, 3);
            // Same format, so the render pass survives
            assert_eq!(ledger.render_passes_created, 1);
            assert_eq!(ledger.wait_idles, 3);

            // Each creation is handed the previous handle, destroyed right after
            let creations: Vec<(u64, u64)> = ledger
                .events
                .iter()
                .filter_map(|e| match *e {
                    Event::CreateSwapchain { handle, old } => Some((handle, old)),
                    _ => None,
                })
                .collect();
            assert_eq!(creations, vec![(1, 0), (2, 1), (3, 2)]);
        }

        drop(swapchain);
        let ledger = ledger.borrow();
        assert!(ledger.live_swapchains.is_empty());
        assert_eq!(ledger.live_images, 0);
        assert_eq!(ledger.live_render_passes, 0);
    }

    #[test]
    fn test_zero_area_recreate_releases_images() {
        let (mut swapchain, ledger) = manager();
        swapchain.init(extent(800, 600)).unwrap();

        assert!(!swapchain.recreate(extent(0, 0)).unwrap());
        assert_eq!(swapchain.state(), SwapchainState::Invalidated);
        assert_eq!(swapchain.image_count(), 0);
        assert_eq!(swapchain.configuration().image_count, 0);
        assert!(swapchain.acquire_next_image(vk::Semaphore::null(), 0).unwrap().is_none());
        {
            let ledger = ledger.borrow();
            assert_eq!(ledger.live_images, 0);
            // The old handle is kept for the next creation
            assert_eq!(ledger.live_swapchains, vec![1]);
        }

        assert!(!swapchain.recreate(extent(0, 0)).unwrap());
        assert!(swapchain.recreate(extent(640, 480)).unwrap());
        assert_eq!(swapchain.state(), SwapchainState::Valid);
        assert_eq!(swapchain.extent(), extent(640, 480));

        let ledger = ledger.borrow();
        assert_eq!(ledger.live_swapchains, vec![2]);
        assert_eq!(
            ledger.events.iter().rev().find(|e| matches!(e, Event::CreateSwapchain { .. })),
            Some(&Event::CreateSwapchain { handle: 2, old: 1 })
        );
    }

    #[test]
    fn test_zero_area_at_init_invalidates() {
        let (mut swapchain, ledger) = manager();
        assert!(!swapchain.init(extent(0, 0)).unwrap());
        assert_eq!(swapchain.state(), SwapchainState::Invalidated);
        assert!(swapchain.render_pass_handle().is_err());
        assert_eq!(ledger.borrow().swapchains_created(), 0);

        assert!(swapchain.recreate(extent(320, 240)).unwrap());
        assert!(swapchain.render_pass_handle().is_ok());
    }

    #[test]
    fn test_failed_rebuild_leaves_manager_invalidated() {
        let (mut swapchain, ledger) = manager();
        swapchain.init(extent(800, 600)).unwrap();

        swapchain.backend().fail_create.set(true);
        assert!(matches!(
            swapchain.recreate(extent(800, 600)),
            Err(VulkanError::Api {
                operation: "vkCreateSwapchainKHR",
                ..
            })
        ));
        assert_eq!(swapchain.state(), SwapchainState::Invalidated);
        assert!(!swapchain.is_valid());
        assert_eq!(swapchain.image_count(), 0);
        assert_eq!(swapchain.configuration().image_count, 0);
        assert_eq!(ledger.borrow().live_images, 0);

        swapchain.backend().fail_create.set(false);
        assert!(swapchain.recreate(extent(800, 600)).unwrap());
        assert_eq!(swapchain.state(), SwapchainState::Valid);
        assert_eq!(swapchain.image_count(), 3);
    }

    #[test]
    fn test_format_change_replaces_render_pass() {
        let (mut swapchain, ledger) = manager();
        swapchain.init(extent(800, 600)).unwrap();
        let before = swapchain.render_pass_handle().unwrap();

        swapchain.backend().format.set(vk::Format::R8G8B8A8_UNORM);
        swapchain.recreate(extent(800, 600)).unwrap();

        assert_ne!(swapchain.render_pass_handle().unwrap(), before);
        assert_eq!(swapchain.configuration().format, vk::Format::R8G8B8A8_UNORM);
        let ledger = ledger.borrow();
        assert_eq!(ledger.render_passes_created, 2);
        assert_eq!(ledger.live_render_passes, 1);
    }

    #[test]
    fn test_destroy_runs_in_reverse_creation_order() {
        let (mut swapchain, ledger) = manager();
        swapchain.init(extent(800, 600)).unwrap();
        ledger.borrow_mut().events.clear();

        swapchain.destroy();
        assert_eq!(swapchain.state(), SwapchainState::Destroyed);
        assert_eq!(swapchain.handle(), vk::SwapchainKHR::null());
        assert!(matches!(swapchain.recreate(extent(800, 600)), Err(VulkanError::InvalidOperation { .. })));

        assert_eq!(
            ledger.borrow().events,
            vec![
                Event::DropImage,
                Event::DropImage,
                Event::DropImage,
                Event::DestroySwapchain(1),
                Event::DropRenderPass,
            ]
        );

        // Drop after an explicit destroy releases nothing twice
        drop(swapchain);
        assert_eq!(ledger.borrow().events.len(), 5);
    }
}
