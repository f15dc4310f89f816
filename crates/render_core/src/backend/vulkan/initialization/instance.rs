//! Vulkan instance management
//!
//! [`GraphicsInstance`] owns the loader entry, the API instance, the surface extension
//! loader and (when validation is on) the debug messenger. It is created once per
//! process and shared by every device and surface made from it, so it is always the
//! last Vulkan object destroyed.

use std::ffi::{c_char, c_void, CStr, CString};
use std::rc::Rc;

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::Surface as SurfaceLoader;
use ash::{vk, Entry, Instance};

use crate::backend::vulkan::window::RenderWindow;
use crate::backend::vulkan::{VulkanError, VulkanResult};
use crate::core::{BackendConfig, DebugSeverity};

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &str = "render_core";

/// Settings read by the debug callback through its user-data pointer
struct MessengerSettings {
    abort_on_error: bool,
}

struct DebugMessenger {
    loader: DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
    // Referenced by the driver through p_user_data until the messenger is destroyed
    _settings: Box<MessengerSettings>,
}

/// Vulkan instance wrapper with RAII cleanup
pub struct GraphicsInstance {
    entry: Entry,
    instance: Instance,
    surface_loader: SurfaceLoader,
    debug: Option<DebugMessenger>,
    adapters: Vec<vk::PhysicalDevice>,
}

impl GraphicsInstance {
    /// Create the API instance for presenting to `window`
    ///
    /// Fails with [`VulkanError::Initialization`] when no Vulkan loader is installed or
    /// the window system's surface extensions are unavailable. A missing validation layer
    /// only produces a warning.
    pub fn new(window: &dyn RenderWindow, config: &BackendConfig) -> VulkanResult<Rc<Self>> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::Initialization(format!("Failed to load Vulkan: {e}")))?;

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|_| VulkanError::Initialization("Application name contains a NUL byte".to_string()))?;
        let engine_name = CString::new(ENGINE_NAME)
            .map_err(|_| VulkanError::Initialization("Engine name contains a NUL byte".to_string()))?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(config.packed_version())
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let window_extensions = window
            .required_instance_extensions()
            .map_err(|e| VulkanError::Initialization(format!("Failed to get required extensions: {e}")))?;
        let mut extensions = to_cstrings(&window_extensions)?;

        let available_extensions = entry
            .enumerate_instance_extension_properties(None)
            .map_err(VulkanError::api("vkEnumerateInstanceExtensionProperties"))?;
        let available_extension_names: Vec<&CStr> = available_extensions
            .iter()
            .map(|props| unsafe { CStr::from_ptr(props.extension_name.as_ptr()) })
            .collect();

        let missing = missing_names(&extensions, &available_extension_names);
        if !missing.is_empty() {
            return Err(VulkanError::Initialization(format!(
                "Required instance extensions unavailable: {}",
                missing.join(", ")
            )));
        }

        let mut layers = Vec::new();
        let mut validation = config.validation_enabled();
        if validation {
            let available_layers = entry
                .enumerate_instance_layer_properties()
                .map_err(VulkanError::api("vkEnumerateInstanceLayerProperties"))?;
            let available_layer_names: Vec<&CStr> = available_layers
                .iter()
                .map(|props| unsafe { CStr::from_ptr(props.layer_name.as_ptr()) })
                .collect();

            let requested = to_cstrings(&[VALIDATION_LAYER])?;
            let debug_ext = DebugUtils::name();

            if !missing_names(&requested, &available_layer_names).is_empty() {
                log::warn!("{VALIDATION_LAYER} is not installed, continuing without validation");
                validation = false;
            } else if !available_extension_names.contains(&debug_ext) {
                log::warn!("{} is unavailable, continuing without validation", debug_ext.to_string_lossy());
                validation = false;
            } else {
                layers = requested;
                extensions.push(debug_ext.to_owned());
            }
        }

        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|layer| layer.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(VulkanError::api("vkCreateInstance"))?
        };

        log::info!(
            "Created Vulkan instance for '{}' (validation {})",
            config.application_name,
            if validation { "on" } else { "off" }
        );

        let debug = if validation {
            match Self::setup_debug_messenger(&entry, &instance, config) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let adapters = match unsafe { instance.enumerate_physical_devices() } {
            Ok(adapters) => adapters,
            Err(result) => {
                unsafe {
                    if let Some(debug) = &debug {
                        debug.loader.destroy_debug_utils_messenger(debug.messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(VulkanError::from_result("vkEnumeratePhysicalDevices", result));
            }
        };

        log::debug!("Found {} physical adapter(s)", adapters.len());

        let surface_loader = SurfaceLoader::new(&entry, &instance);

        Ok(Rc::new(Self {
            entry,
            instance,
            surface_loader,
            debug,
            adapters,
        }))
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &Instance,
        config: &BackendConfig,
    ) -> VulkanResult<DebugMessenger> {
        let loader = DebugUtils::new(entry, instance);
        let settings = Box::new(MessengerSettings {
            abort_on_error: config.abort_on_validation_error,
        });

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(severity_flags(config.debug_severity))
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback))
            .user_data(std::ptr::addr_of!(*settings) as *mut c_void);

        let messenger = unsafe {
            loader
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::api("vkCreateDebugUtilsMessengerEXT"))?
        };

        log::debug!("Created debug utils messenger (minimum severity {:?})", config.debug_severity);

        Ok(DebugMessenger {
            loader,
            messenger,
            _settings: settings,
        })
    }

    /// Get a reference to the Vulkan entry
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Get a reference to the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Get the surface extension loader
    pub fn surface_loader(&self) -> &SurfaceLoader {
        &self.surface_loader
    }

    /// Physical adapters reported when the instance was created
    pub fn adapters(&self) -> &[vk::PhysicalDevice] {
        &self.adapters
    }

    /// Whether the debug messenger is installed
    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for GraphicsInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug.loader.destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::info!("Destroyed Vulkan instance");
    }
}

fn to_cstrings<S: AsRef<str>>(names: &[S]) -> VulkanResult<Vec<CString>> {
    names
        .iter()
        .map(|name| {
            CString::new(name.as_ref())
                .map_err(|_| VulkanError::Initialization(format!("Invalid name: {:?}", name.as_ref())))
        })
        .collect()
}

/// Names in `requested` that do not appear in `available`
fn missing_names(requested: &[CString], available: &[&CStr]) -> Vec<String> {
    requested
        .iter()
        .filter(|name| !available.contains(&name.as_c_str()))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

/// Severity mask that forwards `minimum` and everything above it
fn severity_flags(minimum: DebugSeverity) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;

    [
        (DebugSeverity::Verbose, Severity::VERBOSE),
        (DebugSeverity::Info, Severity::INFO),
        (DebugSeverity::Warning, Severity::WARNING),
        (DebugSeverity::Error, Severity::ERROR),
    ]
    .into_iter()
    .filter(|(level, _)| *level >= minimum)
    .fold(Severity::empty(), |mask, (_, flag)| mask | flag)
}

fn message_type_name(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "Validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "Performance"
    } else {
        "General"
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = *callback_data;
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr(callback_data.p_message).to_string_lossy()
    };
    let kind = message_type_name(message_type);

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[Vulkan/{kind}] {message}");

        let settings = user_data.cast::<MessengerSettings>();
        if cfg!(debug_assertions) && !settings.is_null() && (*settings).abort_on_error {
            std::process::abort();
        }
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[Vulkan/{kind}] {message}");
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::debug!("[Vulkan/{kind}] {message}");
    } else {
        log::trace!("[Vulkan/{kind}] {message}");
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;

    #[test]
    fn test_severity_mask_includes_higher_levels() {
        assert_eq!(severity_flags(DebugSeverity::Warning), Severity::WARNING | Severity::ERROR);
        assert_eq!(severity_flags(DebugSeverity::Error), Severity::ERROR);
        assert_eq!(
            severity_flags(DebugSeverity::Verbose),
            Severity::VERBOSE | Severity::INFO | Severity::WARNING | Severity::ERROR
        );
    }

    #[test]
    fn test_missing_names() {
        let requested = to_cstrings(&["VK_KHR_surface", "VK_KHR_xcb_surface"]).unwrap();
        let surface = CString::new("VK_KHR_surface").unwrap();
        let available = [surface.as_c_str()];

        assert_eq!(missing_names(&requested, &available), vec!["VK_KHR_xcb_surface".to_string()]);
    }

    #[test]
    fn test_message_type_prefers_validation() {
        let both = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION;
        assert_eq!(message_type_name(both), "Validation");
        assert_eq!(message_type_name(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL), "General");
    }
}
