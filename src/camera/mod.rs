/// Camera Module - Data-Oriented Programming (DOP) style
///
/// This module follows pure DOP principles:
/// - camera_data.rs: Pure data structures with NO methods
/// - camera_operations.rs: Pure functions that operate on data
///
/// The occlusion engine never owns a camera. The scene supplies one per frame
/// through `FrameContext` and the engine derives `DepthView`s from it.

pub mod camera_data;
pub mod camera_operations;

// Re-export data structures
pub use camera_data::{CameraData, DepthView, ProjectionKind};

// Re-export all operations
pub use camera_operations::{
    // Initialization
    init_camera,
    look_at,

    // View/projection
    build_projection_matrix,
    build_view_matrix,
    build_world_matrix,
    orthographic_depth_view,
    perspective_depth_view,
    view_projection,

    // Frustum
    frustum_corners_view,
    frustum_corners_world,

    // Utilities
    calculate_forward_vector,
    stable_up_vector,
};
