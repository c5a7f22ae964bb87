//! Camera data structures - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in camera_operations.rs

use crate::math::AABB;
use cgmath::{Matrix4, Point3, Vector3};

/// Perspective camera supplied by the scene layer each frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraData {
    /// Camera position in world space
    pub position: Point3<f32>,

    /// Yaw rotation (radians, around Y axis). -PI/2 looks down -Z.
    pub yaw_radians: f32,

    /// Pitch rotation (radians, around X axis)
    pub pitch_radians: f32,

    /// Field of view (vertical, radians)
    pub fov_radians: f32,

    /// Aspect ratio (width / height)
    pub aspect_ratio: f32,

    /// Near clipping plane distance
    pub near_plane: f32,

    /// Far clipping plane distance
    pub far_plane: f32,
}

impl Default for CameraData {
    fn default() -> Self {
        Self {
            position: Point3::new(0.0, 0.0, 0.0),
            yaw_radians: -std::f32::consts::FRAC_PI_2,
            pitch_radians: 0.0,
            fov_radians: 60.0_f32.to_radians(),
            aspect_ratio: 16.0 / 9.0,
            near_plane: 0.1,
            far_plane: 1000.0,
        }
    }
}

/// Projection family of a depth view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionKind {
    Perspective,
    Orthographic,
}

/// Everything needed to rasterize into, or test against, one hierarchy.
///
/// Built from the scene camera (perspective) or from the fitted shadow
/// frustum (orthographic). `projection` uses the OpenGL clip convention;
/// the wgpu backend converts it before upload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthView {
    pub position: Point3<f32>,
    pub forward: Vector3<f32>,

    /// World -> view
    pub view: Matrix4<f32>,

    /// View -> world
    pub world: Matrix4<f32>,

    pub projection: Matrix4<f32>,

    /// Depth range along the view axis; normalized depth is
    /// `(d - near) / (far - near)`. May be negative for light views.
    pub near: f32,
    pub far: f32,

    pub kind: ProjectionKind,

    /// World-space AABB of the view volume, used to clamp unbounded shapes
    pub bounds: AABB,
}
