//! Drawing-side contracts: the per-frame context handed to drawables and the mesh client

pub mod drawing;
pub mod mesh;

pub use drawing::{DescriptorBlock, Drawable, DrawingContext, OverlayRenderer, ViewProjection};
pub use mesh::Mesh;
