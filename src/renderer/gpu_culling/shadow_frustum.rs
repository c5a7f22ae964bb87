//! Shadow-caster light frustum fitting
//!
//! The light frustum is an orthographic box centred on the bounding sphere of
//! the camera frustum, clipped to the shadow system's last cascade. A sphere
//! fit keeps the box size constant while the camera rotates.

use crate::camera::{
    build_world_matrix, calculate_forward_vector, frustum_corners_view, orthographic_depth_view,
    CameraData, DepthView,
};
use crate::math::bounding_sphere_from_points;
use crate::scene::CascadedShadowDescriptor;
use cgmath::{InnerSpace, Transform, Vector3};

/// Result of fitting a light frustum
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowFrustum {
    pub view: DepthView,
    /// Normalized direction the light travels
    pub direction: Vector3<f32>,
    /// Radius of the fitted sphere (orthographic half extent)
    pub radius: f32,
}

/// Far distance of the camera frustum portion that receives shadows
pub fn effective_shadow_far(camera: &CameraData, shadow: &CascadedShadowDescriptor) -> f32 {
    match shadow.max_distance() {
        Some(distance) if distance > camera.near_plane => distance.min(camera.far_plane),
        _ => camera.far_plane,
    }
}

/// Fit the light's orthographic frustum to the camera frustum
pub fn fit_shadow_frustum(
    camera: &CameraData,
    light_direction: Vector3<f32>,
    shadow: &CascadedShadowDescriptor,
) -> ShadowFrustum {
    let far = effective_shadow_far(camera, shadow);
    let corners = frustum_corners_view(camera, far);

    // Corners are never empty, but fall back to a point sphere at the camera
    let sphere = bounding_sphere_from_points(&corners);
    let (center_view, radius) = match sphere {
        Some(s) => (s.center, s.radius.max(f32::EPSILON)),
        None => (cgmath::Point3::new(0.0, 0.0, 0.0), f32::EPSILON),
    };

    let forward = calculate_forward_vector(camera.yaw_radians, camera.pitch_radians);
    let camera_world = build_world_matrix(camera.position, forward, Vector3::unit_y());
    let center = camera_world.transform_point(center_view);

    let direction = light_direction.normalize();
    let position = center - direction * radius;

    let view = orthographic_depth_view(
        position,
        direction,
        radius,
        -shadow.min_light_distance,
        2.0 * radius,
    );

    log::trace!(
        "[ShadowFrustum] centre ({:.1}, {:.1}, {:.1}) radius {:.1} far {:.1}",
        center.x,
        center.y,
        center.z,
        radius,
        far
    );

    ShadowFrustum {
        view,
        direction,
        radius,
    }
}
