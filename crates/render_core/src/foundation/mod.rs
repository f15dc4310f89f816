//! Foundation utilities shared by the backend

pub mod logging;
pub mod math;
