// Host to device transfers

pub mod staging;

pub use staging::*;
