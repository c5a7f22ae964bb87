//! Geometry shared by the hierarchy builder and the query engine

pub mod aabb;
pub mod bounding_sphere;

pub use aabb::{
    aabb_center, aabb_clamped, aabb_corners, aabb_from_center_half_extents, aabb_from_points,
    aabb_intersects, aabb_is_empty, aabb_is_unbounded, aabb_translated, aabb_union, create_aabb,
    AABB, INFINITE_AABB,
};
pub use bounding_sphere::{bounding_sphere_from_points, BoundingSphere};
