//! Math utilities and types
//!
//! Thin aliases over `nalgebra` plus the projection helpers the frame pipeline needs.

pub use nalgebra::{Matrix4, Point3, Unit, UnitQuaternion, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Quaternion type for rotations
pub type Quat = UnitQuaternion<f32>;

/// Column-major matrix layout as consumed by GLSL `mat4`
pub type GpuMat4 = [[f32; 4]; 4];

/// Transform representing position, rotation, and scale
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,
    /// Rotation quaternion
    pub rotation: Quat,
    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a transform at `position` with no rotation and unit scale
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Compose translation * rotation * scale
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }
}

/// Right-handed perspective projection with a `[0, 1]` depth range and Y pointing down
///
/// Vulkan clip space has +Y down, so the Y scale is negated relative to the OpenGL
/// convention.
pub fn perspective_vulkan(fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let focal = 1.0 / (fov_y_radians * 0.5).tan();

    let mut m = Mat4::zeros();
    m[(0, 0)] = focal / aspect;
    m[(1, 1)] = -focal;
    m[(2, 2)] = far / (near - far);
    m[(2, 3)] = -(far * near) / (far - near);
    m[(3, 2)] = -1.0;
    m
}

/// Right-handed view matrix looking from `eye` towards `target`
pub fn look_at(eye: &Point3<f32>, target: &Point3<f32>, up: &Vec3) -> Mat4 {
    Mat4::look_at_rh(eye, target, up)
}

/// Convert to the column-major array layout used in uniform buffers
pub fn to_gpu(m: &Mat4) -> GpuMat4 {
    (*m).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    #[test]
    fn test_perspective_depth_range() {
        let proj = perspective_vulkan(70f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);

        let near = proj * Vector4::new(0.0, 0.0, -0.1, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);

        let far = proj * Vector4::new(0.0, 0.0, -100.0, 1.0);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_perspective_flips_y() {
        let proj = perspective_vulkan(90f32.to_radians(), 1.0, 0.1, 10.0);
        let up = proj * Vector4::new(0.0, 1.0, -1.0, 1.0);
        assert!(up.y / up.w < 0.0);
    }

    #[test]
    fn test_transform_matrix_translates() {
        let transform = Transform::from_position(Vec3::new(1.0, 2.0, 3.0));
        let moved = transform.to_matrix() * Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(moved.x, 1.0);
        assert_relative_eq!(moved.y, 2.0);
        assert_relative_eq!(moved.z, 3.0);
    }

    #[test]
    fn test_gpu_layout_is_column_major() {
        let m = Mat4::new_translation(&Vec3::new(4.0, 5.0, 6.0));
        let gpu = to_gpu(&m);
        assert_relative_eq!(gpu[3][0], 4.0);
        assert_relative_eq!(gpu[3][1], 5.0);
        assert_relative_eq!(gpu[3][2], 6.0);
    }
}
