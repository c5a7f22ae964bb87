/// Data-Oriented Axis-Aligned Bounding Box System
///
/// Pure functions over a plain min/max box. Bounds may be unbounded on any
/// axis (`±f32::INFINITY`), which is how scene nodes describe planes, terrain
/// and sky geometry; such boxes must be clamped before projection.

use cgmath::{Point3, Vector3};

/// Axis-Aligned Bounding Box - pure data structure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AABB {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

/// Box covering all of space
pub const INFINITE_AABB: AABB = AABB {
    min: Point3 {
        x: f32::NEG_INFINITY,
        y: f32::NEG_INFINITY,
        z: f32::NEG_INFINITY,
    },
    max: Point3 {
        x: f32::INFINITY,
        y: f32::INFINITY,
        z: f32::INFINITY,
    },
};

/// Create new AABB from min/max points
pub fn create_aabb(min: Point3<f32>, max: Point3<f32>) -> AABB {
    AABB { min, max }
}

/// Create AABB from center point and half extents
pub fn aabb_from_center_half_extents(center: Point3<f32>, half_extents: Vector3<f32>) -> AABB {
    AABB {
        min: center - half_extents,
        max: center + half_extents,
    }
}

/// Smallest AABB enclosing every point; `None` for an empty slice
pub fn aabb_from_points(points: &[Point3<f32>]) -> Option<AABB> {
    let first = *points.first()?;
    let mut aabb = AABB {
        min: first,
        max: first,
    };
    for p in &points[1..] {
        aabb.min.x = aabb.min.x.min(p.x);
        aabb.min.y = aabb.min.y.min(p.y);
        aabb.min.z = aabb.min.z.min(p.z);
        aabb.max.x = aabb.max.x.max(p.x);
        aabb.max.y = aabb.max.y.max(p.y);
        aabb.max.z = aabb.max.z.max(p.z);
    }
    Some(aabb)
}

/// Get center point of AABB
pub fn aabb_center(aabb: &AABB) -> Point3<f32> {
    Point3::new(
        (aabb.min.x + aabb.max.x) * 0.5,
        (aabb.min.y + aabb.max.y) * 0.5,
        (aabb.min.z + aabb.max.z) * 0.5,
    )
}

/// A box is empty when any axis is NaN or inverted.
/// Zero-thickness boxes (planes, lines) are not empty.
pub fn aabb_is_empty(aabb: &AABB) -> bool {
    let axes = [
        (aabb.min.x, aabb.max.x),
        (aabb.min.y, aabb.max.y),
        (aabb.min.z, aabb.max.z),
    ];
    axes.iter()
        .any(|&(lo, hi)| lo.is_nan() || hi.is_nan() || lo > hi)
}

/// True when any bound is infinite
pub fn aabb_is_unbounded(aabb: &AABB) -> bool {
    !(aabb.min.x.is_finite()
        && aabb.min.y.is_finite()
        && aabb.min.z.is_finite()
        && aabb.max.x.is_finite()
        && aabb.max.y.is_finite()
        && aabb.max.z.is_finite())
}

/// Clamp `aabb` into `bounds`. The result is empty when they do not overlap.
pub fn aabb_clamped(aabb: &AABB, bounds: &AABB) -> AABB {
    AABB {
        min: Point3::new(
            aabb.min.x.max(bounds.min.x),
            aabb.min.y.max(bounds.min.y),
            aabb.min.z.max(bounds.min.z),
        ),
        max: Point3::new(
            aabb.max.x.min(bounds.max.x),
            aabb.max.y.min(bounds.max.y),
            aabb.max.z.min(bounds.max.z),
        ),
    }
}

/// Smallest AABB enclosing both boxes
pub fn aabb_union(a: &AABB, b: &AABB) -> AABB {
    AABB {
        min: Point3::new(
            a.min.x.min(b.min.x),
            a.min.y.min(b.min.y),
            a.min.z.min(b.min.z),
        ),
        max: Point3::new(
            a.max.x.max(b.max.x),
            a.max.y.max(b.max.y),
            a.max.z.max(b.max.z),
        ),
    }
}

/// Create translated copy of AABB
pub fn aabb_translated(aabb: &AABB, offset: Vector3<f32>) -> AABB {
    AABB {
        min: aabb.min + offset,
        max: aabb.max + offset,
    }
}

/// Test if two AABBs intersect
pub fn aabb_intersects(aabb1: &AABB, aabb2: &AABB) -> bool {
    aabb1.min.x <= aabb2.max.x
        && aabb1.max.x >= aabb2.min.x
        && aabb1.min.y <= aabb2.max.y
        && aabb1.max.y >= aabb2.min.y
        && aabb1.min.z <= aabb2.max.z
        && aabb1.max.z >= aabb2.min.z
}

/// The eight corners, bit 0 = x, bit 1 = y, bit 2 = z (set = max)
pub fn aabb_corners(aabb: &AABB) -> [Point3<f32>; 8] {
    let mut corners = [aabb.min; 8];
    for (i, corner) in corners.iter_mut().enumerate() {
        corner.x = if i & 1 != 0 { aabb.max.x } else { aabb.min.x };
        corner.y = if i & 2 != 0 { aabb.max.y } else { aabb.min.y };
        corner.z = if i & 4 != 0 { aabb.max.z } else { aabb.min.z };
    }
    corners
}
