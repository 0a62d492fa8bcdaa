//! Uniform buffer and push constant layouts.
//!
//! These structures mirror the GLSL block layouts exactly. All use
//! `#[repr(C)]` and implement `Pod`/`Zeroable` for byte casting into
//! host-visible buffers.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Camera uniforms (set 0, binding 0).
///
/// Layout: view (64) + projection (64) + view_projection (64) +
/// position (12) + padding (4) = 208 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CameraUbo {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub camera_position: Vec3,
    pub _padding: f32,
}

impl CameraUbo {
    pub const SIZE: usize = size_of::<Self>();

    pub fn new(view: Mat4, projection: Mat4, camera_position: Vec3) -> Self {
        Self {
            view,
            projection,
            view_projection: projection * view,
            camera_position,
            _padding: 0.0,
        }
    }
}

/// Per-object uniforms (set 0, binding 1).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ObjectUbo {
    pub model: Mat4,
    /// Transpose of the inverse of the model matrix, for normals.
    pub normal_matrix: Mat4,
}

impl ObjectUbo {
    pub const SIZE: usize = size_of::<Self>();

    pub fn new(model: Mat4) -> Self {
        Self {
            model,
            normal_matrix: model.inverse().transpose(),
        }
    }

    pub fn identity() -> Self {
        Self {
            model: Mat4::IDENTITY,
            normal_matrix: Mat4::IDENTITY,
        }
    }
}

/// Push constants for the post-process pass.
///
/// `block_size` of 1.0 passes pixels through unchanged; larger values
/// quantize sampling to that block edge in pixels.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PixelizeParams {
    pub screen_width: f32,
    pub screen_height: f32,
    pub block_size: f32,
    pub _padding: f32,
}

impl PixelizeParams {
    pub const SIZE: usize = size_of::<Self>();

    pub fn new(screen_width: f32, screen_height: f32, block_size: f32) -> Self {
        Self {
            screen_width,
            screen_height,
            block_size: block_size.max(1.0),
            _padding: 0.0,
        }
    }

    /// Identity parameters: the pass copies the input through.
    pub fn passthrough(screen_width: f32, screen_height: f32) -> Self {
        Self::new(screen_width, screen_height, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_ubo_size() {
        assert_eq!(CameraUbo::SIZE, 208);
        assert_eq!(align_of::<CameraUbo>(), 16);
    }

    #[test]
    fn test_object_ubo_size() {
        assert_eq!(ObjectUbo::SIZE, 128);
    }

    #[test]
    fn test_pixelize_params_size() {
        // Must stay within the guaranteed 128-byte push constant budget.
        assert_eq!(PixelizeParams::SIZE, 16);
    }

    #[test]
    fn test_camera_ubo_view_projection() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_rh(45.0_f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
        let ubo = CameraUbo::new(view, projection, Vec3::new(0.0, 0.0, 5.0));
        assert_eq!(ubo.view_projection, projection * view);
    }

    #[test]
    fn test_object_ubo_normal_matrix() {
        let model = Mat4::from_scale(Vec3::splat(2.0));
        let ubo = ObjectUbo::new(model);
        assert_eq!(ubo.normal_matrix, model.inverse().transpose());
    }

    #[test]
    fn test_pixelize_params_clamps_block_size() {
        let params = PixelizeParams::new(800.0, 600.0, 0.25);
        assert_eq!(params.block_size, 1.0);

        let passthrough = PixelizeParams::passthrough(800.0, 600.0);
        assert_eq!(passthrough.block_size, 1.0);
    }
}
