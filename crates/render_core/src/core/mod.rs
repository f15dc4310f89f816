//! Core configuration types

pub mod config;

pub use config::{
    BackendConfig, CameraConfig, DebugSeverity, ShaderConfig, WindowConfig, DEFAULT_MAX_DESCRIPTORS,
    DEFAULT_STAGING_CAPACITY, MAX_FRAMES_IN_FLIGHT,
};
