//! Camera operations - Pure DOP functions
//!
//! All functions are pure: they take data, return new data, no side effects.

use super::camera_data::{CameraData, DepthView, ProjectionKind};
use crate::math::aabb_from_points;
use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, Rad, Transform, Vector3};

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Initialize camera with default lens settings
pub fn init_camera(position: Point3<f32>, yaw: f32, pitch: f32) -> CameraData {
    CameraData {
        position,
        yaw_radians: yaw,
        pitch_radians: pitch,
        ..Default::default()
    }
}

/// Turn the camera to face `target`
pub fn look_at(camera: &CameraData, target: Point3<f32>) -> CameraData {
    let dir = target - camera.position;
    if dir.magnitude2() <= f32::EPSILON {
        return *camera;
    }
    let dir = dir.normalize();

    let mut new_camera = *camera;
    new_camera.yaw_radians = dir.z.atan2(dir.x);
    new_camera.pitch_radians = dir.y.clamp(-1.0, 1.0).asin().clamp(-PITCH_LIMIT, PITCH_LIMIT);
    new_camera
}

const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

// ============================================================================
// VIEW/PROJECTION MATRICES
// ============================================================================

/// Build view matrix from camera data
pub fn build_view_matrix(camera: &CameraData) -> Matrix4<f32> {
    let forward = calculate_forward_vector(camera.yaw_radians, camera.pitch_radians);
    Matrix4::look_to_rh(camera.position, forward, Vector3::unit_y())
}

/// Build projection matrix from camera data
pub fn build_projection_matrix(camera: &CameraData) -> Matrix4<f32> {
    cgmath::perspective(
        Rad(camera.fov_radians),
        camera.aspect_ratio,
        camera.near_plane,
        camera.far_plane,
    )
}

/// View -> world matrix for a viewer at `position` looking along `forward`.
/// Inverse of `Matrix4::look_to_rh(position, forward, up)`.
pub fn build_world_matrix(position: Point3<f32>, forward: Vector3<f32>, up: Vector3<f32>) -> Matrix4<f32> {
    let f = forward.normalize();
    let s = f.cross(up).normalize();
    let u = s.cross(f);
    Matrix4::from_cols(
        s.extend(0.0),
        u.extend(0.0),
        (-f).extend(0.0),
        position.to_vec().extend(1.0),
    )
}

/// Up vector that is never parallel to `forward`
pub fn stable_up_vector(forward: Vector3<f32>) -> Vector3<f32> {
    if forward.normalize().y.abs() > 0.99 {
        Vector3::unit_z()
    } else {
        Vector3::unit_y()
    }
}

// ============================================================================
// FRUSTUM
// ============================================================================

/// The eight view-space corners of the camera frustum between the near plane
/// and `far`. Near corners first, in (-x,-y), (+x,-y), (-x,+y), (+x,+y) order.
pub fn frustum_corners_view(camera: &CameraData, far: f32) -> [Point3<f32>; 8] {
    let tan_half = (camera.fov_radians * 0.5).tan();
    let mut corners = [Point3::new(0.0, 0.0, 0.0); 8];
    for (plane, depth) in [camera.near_plane, far].into_iter().enumerate() {
        let half_h = depth * tan_half;
        let half_w = half_h * camera.aspect_ratio;
        for i in 0..4 {
            let x = if i & 1 != 0 { half_w } else { -half_w };
            let y = if i & 2 != 0 { half_h } else { -half_h };
            corners[plane * 4 + i] = Point3::new(x, y, -depth);
        }
    }
    corners
}

/// World-space frustum corners between the near plane and `far`
pub fn frustum_corners_world(camera: &CameraData, far: f32) -> [Point3<f32>; 8] {
    let forward = calculate_forward_vector(camera.yaw_radians, camera.pitch_radians);
    let world = build_world_matrix(camera.position, forward, Vector3::unit_y());
    frustum_corners_view(camera, far).map(|p| world.transform_point(p))
}

/// Depth view of the camera's perspective frustum
pub fn perspective_depth_view(camera: &CameraData) -> DepthView {
    let forward = calculate_forward_vector(camera.yaw_radians, camera.pitch_radians);
    let corners = frustum_corners_world(camera, camera.far_plane);

    DepthView {
        position: camera.position,
        forward,
        view: build_view_matrix(camera),
        world: build_world_matrix(camera.position, forward, Vector3::unit_y()),
        projection: build_projection_matrix(camera),
        near: camera.near_plane,
        far: camera.far_plane,
        kind: ProjectionKind::Perspective,
        bounds: aabb_from_points(&corners).unwrap_or(crate::math::INFINITE_AABB),
    }
}

/// Depth view of an orthographic box: square cross-section of `half_extent`,
/// depth range `[near, far]` along `forward` measured from `position`.
pub fn orthographic_depth_view(
    position: Point3<f32>,
    forward: Vector3<f32>,
    half_extent: f32,
    near: f32,
    far: f32,
) -> DepthView {
    let forward = forward.normalize();
    let up = stable_up_vector(forward);
    let world = build_world_matrix(position, forward, up);

    let mut corners = [Point3::new(0.0, 0.0, 0.0); 8];
    for (i, corner) in corners.iter_mut().enumerate() {
        let x = if i & 1 != 0 { half_extent } else { -half_extent };
        let y = if i & 2 != 0 { half_extent } else { -half_extent };
        let z = if i & 4 != 0 { -far } else { -near };
        *corner = world.transform_point(Point3::new(x, y, z));
    }

    DepthView {
        position,
        forward,
        view: Matrix4::look_to_rh(position, forward, up),
        world,
        projection: cgmath::ortho(-half_extent, half_extent, -half_extent, half_extent, near, far),
        near,
        far,
        kind: ProjectionKind::Orthographic,
        bounds: aabb_from_points(&corners).unwrap_or(crate::math::INFINITE_AABB),
    }
}

/// View-projection matrix (OpenGL clip convention)
pub fn view_projection(view: &DepthView) -> Matrix4<f32> {
    view.projection * view.view
}

// ============================================================================
// UTILITIES
// ============================================================================

/// Calculate forward vector from yaw and pitch
pub fn calculate_forward_vector(yaw: f32, pitch: f32) -> Vector3<f32> {
    Vector3::new(
        yaw.cos() * pitch.cos(),
        pitch.sin(),
        yaw.sin() * pitch.cos(),
    )
    .normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Vector4;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{} != {}", a, b);
    }

    #[test]
    fn test_default_looks_down_negative_z() {
        let camera = CameraData::default();
        let forward = calculate_forward_vector(camera.yaw_radians, camera.pitch_radians);
        assert_close(forward.x, 0.0);
        assert_close(forward.z, -1.0);

        let world = build_world_matrix(camera.position, forward, Vector3::unit_y());
        assert_close(world.x.x, 1.0);
    }

    #[test]
    fn test_world_matrix_inverts_view() {
        let camera = look_at(
            &init_camera(Point3::new(3.0, 2.0, 5.0), 0.0, 0.0),
            Point3::new(-1.0, 0.5, -4.0),
        );
        let view = perspective_depth_view(&camera);
        let product = view.view * view.world;
        let p = product * Vector4::new(1.0, 2.0, 3.0, 1.0);
        assert_close(p.x, 1.0);
        assert_close(p.y, 2.0);
        assert_close(p.z, 3.0);
    }

    #[test]
    fn test_look_at_points_at_target() {
        let camera = look_at(&CameraData::default(), Point3::new(10.0, 0.0, 0.0));
        let forward = calculate_forward_vector(camera.yaw_radians, camera.pitch_radians);
        assert_close(forward.x, 1.0);
        assert_close(forward.y, 0.0);
    }

    #[test]
    fn test_frustum_corners() {
        let camera = CameraData {
            fov_radians: std::f32::consts::FRAC_PI_2,
            aspect_ratio: 2.0,
            near_plane: 1.0,
            far_plane: 10.0,
            ..Default::default()
        };
        let corners = frustum_corners_view(&camera, 10.0);
        assert_eq!(corners[0], Point3::new(-2.0, -1.0, -1.0));
        assert_eq!(corners[7], Point3::new(20.0, 10.0, -10.0));

        let view = perspective_depth_view(&camera);
        assert_close(view.bounds.min.z, -10.0);
        assert_close(view.bounds.max.z, -1.0);
        assert_close(view.bounds.max.x, 20.0);
    }

    #[test]
    fn test_orthographic_bounds() {
        let view = orthographic_depth_view(
            Point3::new(0.0, 10.0, 0.0),
            Vector3::new(0.0, -1.0, 0.0),
            5.0,
            -2.0,
            20.0,
        );
        assert_eq!(view.kind, ProjectionKind::Orthographic);
        assert_close(view.bounds.max.y, 12.0);
        assert_close(view.bounds.min.y, -10.0);
        assert_close(view.bounds.max.x, 5.0);

        let in_view = view.view.transform_point(Point3::new(0.0, 0.0, 0.0));
        assert_close(in_view.z, -10.0);
    }
}
