//! Physical adapter selection and logical device creation

use std::collections::BTreeSet;
use std::ffi::CStr;
use std::rc::Rc;

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use super::instance::GraphicsInstance;
use super::surface::Surface;
use crate::backend::vulkan::commands::{create_command_pool, SingleShotCommand};
use crate::backend::vulkan::memory::{MemoryAllocator, WeakSlot};
use crate::backend::vulkan::{VulkanError, VulkanResult};

/// Bonus that puts any discrete adapter ahead of every integrated one
const DISCRETE_BONUS: u64 = 100_000;

/// Graphics and present queue family indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for drawing and transfers
    pub graphics: u32,
    /// Family used for presentation, often equal to `graphics`
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Pick queue families from an adapter's family list
    ///
    /// The graphics family is the first one with `GRAPHICS`. If it can also present it is
    /// used for both, otherwise the first family that can present is chosen.
    /// Returns `None` when either role cannot be filled.
    pub fn find<F>(families: &[vk::QueueFamilyProperties], mut can_present: F) -> VulkanResult<Option<Self>>
    where
        F: FnMut(u32) -> VulkanResult<bool>,
    {
        let graphics = families
            .iter()
            .position(|family| family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS));

        let Some(graphics) = graphics.map(|index| index as u32) else {
            return Ok(None);
        };

        if can_present(graphics)? {
            return Ok(Some(Self {
                graphics,
                present: graphics,
            }));
        }

        for index in 0..families.len() as u32 {
            if families[index as usize].queue_count > 0 && can_present(index)? {
                return Ok(Some(Self {
                    graphics,
                    present: index,
                }));
            }
        }

        Ok(None)
    }

    /// Whether both roles live on the same family
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct families, in ascending order
    pub fn unique(&self) -> Vec<u32> {
        [self.graphics, self.present]
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Rank an adapter; higher is better
pub fn score_device(properties: &vk::PhysicalDeviceProperties) -> u64 {
    let mut score = u64::from(properties.limits.max_image_dimension2_d);
    if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += DISCRETE_BONUS;
    }
    score
}

/// Highest scoring candidate; ties keep the earliest
pub fn pick_best<T>(candidates: impl IntoIterator<Item = (T, u64)>) -> Option<T> {
    let mut best: Option<(T, u64)> = None;
    for (candidate, score) in candidates {
        match &best {
            Some((_, best_score)) if *best_score >= score => {}
            _ => best = Some((candidate, score)),
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// First format in `candidates` whose properties advertise `features` for `tiling`
pub fn first_supported_format<F>(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    mut properties: F,
) -> Option<vk::Format>
where
    F: FnMut(vk::Format) -> vk::FormatProperties,
{
    candidates.iter().copied().find(|&format| {
        let props = properties(format);
        match tiling {
            vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
            vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
            _ => false,
        }
    })
}

/// Physical device selection and capabilities
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub handle: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Chosen queue families
    pub queues: QueueFamilyIndices,
    /// Human readable adapter name
    pub name: String,
}

impl PhysicalDeviceInfo {
    /// Select the best adapter that can render to `surface`
    pub fn select(instance: &GraphicsInstance, surface: &Surface) -> VulkanResult<Self> {
        let mut candidates = Vec::new();

        for &adapter in instance.adapters() {
            if let Some(info) = Self::evaluate(instance, adapter, surface)? {
                log::info!("Found adapter {}", info.describe());
                let score = score_device(&info.properties);
                candidates.push((info, score));
            }
        }

        let selected = pick_best(candidates).ok_or_else(|| {
            VulkanError::NoSuitableDevice(format!(
                "none of {} adapters support swapchains on this surface",
                instance.adapters().len()
            ))
        })?;

        log::info!(
            "Selected adapter {} (graphics family {}, present family {})",
            selected.name,
            selected.queues.graphics,
            selected.queues.present
        );

        Ok(selected)
    }

    fn evaluate(
        instance: &GraphicsInstance,
        adapter: vk::PhysicalDevice,
        surface: &Surface,
    ) -> VulkanResult<Option<Self>> {
        let raw = instance.instance();
        let properties = unsafe { raw.get_physical_device_properties(adapter) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let extensions = unsafe {
            raw.enumerate_device_extension_properties(adapter)
                .map_err(VulkanError::api("vkEnumerateDeviceExtensionProperties"))?
        };
        let has_swapchain = extensions.iter().any(|available| {
            let extension_name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            extension_name == SwapchainLoader::name()
        });
        if !has_swapchain {
            log::debug!("Skipping {name}: no {:?}", SwapchainLoader::name());
            return Ok(None);
        }

        if !surface.support(adapter)?.is_adequate() {
            log::debug!("Skipping {name}: no surface formats or present modes");
            return Ok(None);
        }

        let families = unsafe { raw.get_physical_device_queue_family_properties(adapter) };
        let Some(queues) = QueueFamilyIndices::find(&families, |index| surface.can_present(adapter, index))? else {
            log::debug!("Skipping {name}: missing graphics or present queue");
            return Ok(None);
        };

        let memory_properties = unsafe { raw.get_physical_device_memory_properties(adapter) };

        Ok(Some(Self {
            handle: adapter,
            properties,
            memory_properties,
            queues,
            name,
        }))
    }

    /// Whether this is a discrete GPU
    pub fn is_discrete(&self) -> bool {
        self.properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    /// Total device-local heap size in bytes
    pub fn local_memory(&self) -> u64 {
        let heaps = &self.memory_properties.memory_heaps[..self.memory_properties.memory_heap_count as usize];
        heaps
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }

    /// `[Discrete] name (N MB)` style summary for logs
    pub fn describe(&self) -> String {
        let kind = if self.is_discrete() { "Discrete" } else { "Integrated" };
        format!("[{kind}] {} ({} MB)", self.name, self.local_memory() / (1024 * 1024))
    }
}

/// A device queue with its family
#[derive(Debug, Clone, Copy)]
pub struct Queue {
    /// Family index
    pub family: u32,
    /// Queue handle
    pub handle: vk::Queue,
}

/// Logical device, its queues and a command pool for one-off submissions
///
/// Shared behind an `Rc`; every object created from the device keeps one so the device
/// is destroyed only after all of them. The memory allocator is tracked through a weak
/// slot so the device never keeps it alive.
pub struct GraphicsDevice {
    allocator: WeakSlot<MemoryAllocator>,
    swapchain_loader: SwapchainLoader,
    command_pool: vk::CommandPool,
    graphics_queue: Queue,
    present_queue: Queue,
    device: Device,
    physical: PhysicalDeviceInfo,
    instance: Rc<GraphicsInstance>,
}

impl GraphicsDevice {
    /// Create the logical device with exactly the selected queues
    pub fn new(instance: &Rc<GraphicsInstance>, physical: PhysicalDeviceInfo) -> VulkanResult<Rc<Self>> {
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = physical
            .queues
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .instance()
                .create_device(physical.handle, &create_info, None)
                .map_err(VulkanError::api("vkCreateDevice"))?
        };

        let graphics_queue = Queue {
            family: physical.queues.graphics,
            handle: unsafe { device.get_device_queue(physical.queues.graphics, 0) },
        };
        let present_queue = Queue {
            family: physical.queues.present,
            handle: unsafe { device.get_device_queue(physical.queues.present, 0) },
        };

        let command_pool = match create_command_pool(&device, graphics_queue.family) {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };

        let swapchain_loader = SwapchainLoader::new(instance.instance(), &device);

        log::info!("Created logical device on {}", physical.name);

        Ok(Rc::new(Self {
            allocator: WeakSlot::default(),
            swapchain_loader,
            command_pool,
            graphics_queue,
            present_queue,
            device,
            physical,
            instance: Rc::clone(instance),
        }))
    }

    /// Raw device function table
    pub fn handle(&self) -> &Device {
        &self.device
    }

    /// Owning instance
    pub fn instance(&self) -> &Rc<GraphicsInstance> {
        &self.instance
    }

    /// Selected adapter
    pub fn physical(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    /// Queue used for drawing and transfers
    pub fn graphics_queue(&self) -> Queue {
        self.graphics_queue
    }

    /// Queue used for presentation
    pub fn present_queue(&self) -> Queue {
        self.present_queue
    }

    /// Queue family indices
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.physical.queues
    }

    /// Swapchain extension loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.swapchain_loader
    }

    /// Minimum offset alignment for dynamic uniform data
    pub fn min_uniform_alignment(&self) -> u64 {
        self.physical.properties.limits.min_uniform_buffer_offset_alignment
    }

    /// Weak link to this device's memory allocator
    pub(crate) fn allocator_slot(&self) -> &WeakSlot<MemoryAllocator> {
        &self.allocator
    }

    /// First candidate supporting `features` with `tiling`
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Option<vk::Format> {
        first_supported_format(candidates, tiling, features, |format| unsafe {
            self.instance
                .instance()
                .get_physical_device_format_properties(self.physical.handle, format)
        })
    }

    /// Begin a one-off command buffer on the graphics queue
    pub fn single_time_command(&self) -> VulkanResult<SingleShotCommand<'_>> {
        SingleShotCommand::begin(&self.device, self.command_pool, self.graphics_queue.handle)
    }

    /// Whether this device can present to `surface` with its present family
    pub fn supports_surface(&self, surface: &Surface) -> VulkanResult<bool> {
        Ok(surface.can_present(self.physical.handle, self.present_queue.family)?
            && surface.support(self.physical.handle)?.is_adequate())
    }

    /// Block until all queues are idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(VulkanError::api("vkDeviceWaitIdle"))
        }
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            log::error!("Device wait failed before destroying the logical device: {e}");
        }
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
        log::debug!("Destroyed logical device");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn properties(kind: vk::PhysicalDeviceType, max_dimension: u32) -> vk::PhysicalDeviceProperties {
        let mut props = vk::PhysicalDeviceProperties {
            device_type: kind,
            ..Default::default()
        };
        props.limits.max_image_dimension2_d = max_dimension;
        props
    }

    #[test]
    fn test_prefers_shared_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(true)).unwrap().unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 1, present: 1 });
        assert!(indices.is_shared());
        assert_eq!(indices.unique(), vec![1]);
    }

    #[test]
    fn test_falls_back_to_separate_present_family() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let indices = QueueFamilyIndices::find(&families, |index| Ok(index == 1)).unwrap().unwrap();
        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.present, 1);
        assert_eq!(indices.unique(), vec![0, 1]);
    }

    #[test]
    fn test_no_graphics_or_present_family() {
        let families = [family(vk::QueueFlags::COMPUTE)];
        assert!(QueueFamilyIndices::find(&families, |_| Ok(true)).unwrap().is_none());

        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(QueueFamilyIndices::find(&families, |_| Ok(false)).unwrap().is_none());
    }

    #[test]
    fn test_present_query_error_propagates() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = QueueFamilyIndices::find(&families, |_| {
            Err(VulkanError::from_result("vkGetPhysicalDeviceSurfaceSupportKHR", vk::Result::ERROR_SURFACE_LOST_KHR))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_discrete_beats_larger_integrated() {
        let integrated = score_device(&properties(vk::PhysicalDeviceType::INTEGRATED_GPU, 16384));
        let discrete = score_device(&properties(vk::PhysicalDeviceType::DISCRETE_GPU, 8192));
        assert_eq!(integrated, 16384);
        assert_eq!(discrete, 108_192);
        assert!(discrete > integrated);
    }

    #[test]
    fn test_pick_best_keeps_first_on_tie() {
        assert_eq!(pick_best([("a", 10), ("b", 30), ("c", 30)]), Some("b"));
        assert_eq!(pick_best(Vec::<(&str, u64)>::new()), None);
    }

    #[test]
    fn test_first_supported_format_respects_tiling() {
        let query = |format: vk::Format| {
            if format == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatProperties {
                    optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                    ..Default::default()
                }
            } else {
                vk::FormatProperties::default()
            }
        };
        let candidates = [vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT];
        let features = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;

        assert_eq!(
            first_supported_format(&candidates, vk::ImageTiling::OPTIMAL, features, query),
            Some(vk::Format::D24_UNORM_S8_UINT)
        );
        assert_eq!(
            first_supported_format(&candidates, vk::ImageTiling::LINEAR, features, query),
            None
        );
    }
}
