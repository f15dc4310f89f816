//! # Backend Configuration
//!
//! Typed configuration for the rendering backend. The application supplies its name,
//! version and initial window size; everything device-related (adapter, queues, surface
//! format, present mode) is selected automatically at runtime. The remaining knobs tune
//! diagnostics and fixed-size pools.
//!
//! All structures serialize to TOML and RON through [`Config`].

use serde::{Deserialize, Serialize};
use std::path::Path;

pub use crate::config::{Config, ConfigError};

/// Number of frame slots in the in-flight ring
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Default number of per-frame descriptor sets handed out to drawables
pub const DEFAULT_MAX_DESCRIPTORS: u32 = 128;

/// Default staging buffer capacity in bytes
pub const DEFAULT_STAGING_CAPACITY: u64 = 8192;

/// # Shader Configuration
///
/// Locations of the precompiled SPIR-V blobs for the built-in pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Create shader config with automatic path resolution
    ///
    /// Tries the usual output directories so the binary can be started from the
    /// workspace root or from its own crate directory.
    pub fn with_path_resolution(base_vertex: &str, base_fragment: &str) -> Self {
        const SHADER_DIRS: [&str; 4] = ["target/shaders/", "shaders/", "resources/shaders/", "../target/shaders/"];

        let resolve = |name: &str| {
            SHADER_DIRS
                .iter()
                .map(|dir| format!("{dir}{name}"))
                .find(|candidate| Path::new(candidate).exists())
                .unwrap_or_else(|| format!("target/shaders/{name}"))
        };

        Self {
            vertex_shader_path: resolve(base_vertex),
            fragment_shader_path: resolve(base_fragment),
        }
    }

    /// Validate that shader files exist
    pub fn validate(&self) -> Result<(), String> {
        if !Path::new(&self.vertex_shader_path).exists() {
            return Err(format!("Vertex shader not found: {}", self.vertex_shader_path));
        }
        if !Path::new(&self.fragment_shader_path).exists() {
            return Err(format!("Fragment shader not found: {}", self.fragment_shader_path));
        }
        Ok(())
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution("gouraud.vert.spv", "gouraud.frag.spv")
    }
}

/// Initial window parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
    /// Whether the user may resize the window
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "render_core".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

/// Minimum severity of validation messages forwarded to the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DebugSeverity {
    /// Everything, including loader chatter
    Verbose,
    /// Informational messages and above
    Info,
    /// Warnings and errors
    Warning,
    /// Errors only
    Error,
}

impl Default for DebugSeverity {
    fn default() -> Self {
        Self::Warning
    }
}

/// Perspective camera parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Vertical field of view in degrees
    pub fov_degrees: f32,
    /// Near clip plane distance
    pub near: f32,
    /// Far clip plane distance
    pub far: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 70.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

/// # Backend Configuration
///
/// Everything [`crate::backend::vulkan::VulkanBackend`] needs at construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Whether to enable Vulkan validation layers (`None` follows the build type)
    pub enable_validation: Option<bool>,
    /// Minimum validation message severity that reaches the log
    pub debug_severity: DebugSeverity,
    /// Abort on error-severity validation messages (debug builds only)
    pub abort_on_validation_error: bool,
    /// Descriptor sets available to drawables per frame
    pub max_descriptors_per_frame: u32,
    /// Staging buffer size in bytes
    pub staging_capacity: u64,
    /// Fence wait limit in nanoseconds (`None` waits indefinitely)
    pub fence_timeout_ns: Option<u64>,
    /// Color the render pass clears to
    pub clear_color: [f32; 4],
    /// Log level used by binaries that install the default logger
    pub log_level: String,
    /// Initial window parameters
    pub window: WindowConfig,
    /// Shader blobs for the built-in pipeline
    pub shaders: ShaderConfig,
    /// Projection parameters
    pub camera: CameraConfig,
}

impl BackendConfig {
    /// Create a new backend configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (1, 0, 0),
            window: WindowConfig::default(),
            enable_validation: None,
            debug_severity: DebugSeverity::default(),
            abort_on_validation_error: false,
            shaders: ShaderConfig::default(),
            camera: CameraConfig::default(),
            max_descriptors_per_frame: DEFAULT_MAX_DESCRIPTORS,
            staging_capacity: DEFAULT_STAGING_CAPACITY,
            fence_timeout_ns: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            log_level: "info".to_string(),
        }
    }

    /// Set application version
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Set the initial window size
    pub fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window.width = width;
        self.window.height = height;
        self
    }

    /// Set custom shader configuration
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the staging buffer capacity
    pub fn with_staging_capacity(mut self, bytes: u64) -> Self {
        self.staging_capacity = bytes;
        self
    }

    /// Set the per-frame descriptor budget
    pub fn with_max_descriptors(mut self, count: u32) -> Self {
        self.max_descriptors_per_frame = count;
        self
    }

    /// Resolved validation setting
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Fence wait limit in nanoseconds
    pub fn fence_timeout(&self) -> u64 {
        self.fence_timeout_ns.unwrap_or(u64::MAX)
    }

    /// Application version packed for `VkApplicationInfo`
    pub fn packed_version(&self) -> u32 {
        let (major, minor, patch) = self.application_version;
        ash::vk::make_api_version(0, major, minor, patch)
    }

    /// Validate the configuration
    ///
    /// Shader paths are not checked here; a missing file surfaces as an I/O error when
    /// the pipeline is built.
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err("Initial window size must be non-zero".to_string());
        }
        if self.max_descriptors_per_frame == 0 {
            return Err("At least one descriptor set per frame is required".to_string());
        }
        if self.staging_capacity == 0 || self.staging_capacity % 4 != 0 {
            return Err(format!(
                "Staging capacity must be a non-zero multiple of 4, got {}",
                self.staging_capacity
            ));
        }
        if self.camera.fov_degrees <= 0.0 || self.camera.fov_degrees >= 180.0 {
            return Err(format!("Field of view out of range: {}", self.camera.fov_degrees));
        }
        if self.camera.near <= 0.0 || self.camera.near >= self.camera.far {
            return Err(format!(
                "Clip planes must satisfy 0 < near < far, got near={} far={}",
                self.camera.near, self.camera.far
            ));
        }
        Ok(())
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new("Render Core Application")
    }
}

impl Config for BackendConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BackendConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.staging_capacity, 8192);
        assert_eq!(config.max_descriptors_per_frame, 128);
        assert_eq!(config.fence_timeout(), u64::MAX);
    }

    #[test]
    fn test_rejects_empty_name() {
        let config = BackendConfig::new("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unaligned_staging_capacity() {
        let config = BackendConfig::default().with_staging_capacity(8190);
        assert!(config.validate().is_err());
        let config = BackendConfig::default().with_staging_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_clip_planes() {
        let mut config = BackendConfig::default();
        config.camera.near = 10.0;
        config.camera.far = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_validation_flag_wins() {
        assert!(BackendConfig::default().with_validation(true).validation_enabled());
        assert!(!BackendConfig::default().with_validation(false).validation_enabled());
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let path = std::env::temp_dir().join(format!("render_core_config_{}.toml", std::process::id()));
        let config = BackendConfig::new("Round Trip")
            .with_version(2, 1, 0)
            .with_window_size(640, 480)
            .with_max_descriptors(64);

        config.save_to_file(&path).expect("save");
        let loaded = BackendConfig::load_from_file(&path).expect("load");
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let loaded: BackendConfig = crate::config::ConfigFormat::Ron
            .parse(r#"(application_name: "Partial", staging_capacity: 4096)"#)
            .expect("parse");
        assert_eq!(loaded.application_name, "Partial");
        assert_eq!(loaded.staging_capacity, 4096);
        assert_eq!(loaded.max_descriptors_per_frame, DEFAULT_MAX_DESCRIPTORS);
    }
}
