//! Query operations - Pure DOP functions
//!
//! Visibility of one packed candidate against one or two hierarchies. This is
//! the CPU statement of what query.wgsl computes; both read the same
//! `QueryUniform`/`QueryVertex` records and must agree on every rule below.
//!
//! 1. Distance: culled when `|lod - position| > max_distance * max(scale) * k`.
//! 2. Frustum: culled when all eight corners are outside one plane.
//! 3. Near plane: a box reaching in front of the near plane is visible at
//!    distance 0, it cannot be tested conservatively.
//! 4. Occlusion: the footprint is tested at the smallest level where it spans
//!    at most two texels; culled when its nearest depth is farther than the
//!    farthest hierarchy depth under it.

use super::depth_hierarchy::HierarchySampler;
use super::hzb_layout::level_for_span;
use super::query_data::{QueryPass, QueryUniform, QueryVertex, ViewUniform};
use crate::constants::hierarchy::FAR_DEPTH;
use crate::constants::query::{CULLED_SENTINEL, NEAR_PLANE_DISTANCE};
use crate::math::{aabb_clamped, aabb_corners, aabb_is_empty, aabb_translated, aabb_union, AABB};
use cgmath::{InnerSpace, Matrix4, Point3, Vector3, Vector4};

/// Screen-space projection of a box
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Outside,
    StraddlesNear,
    /// Level-0 texel rectangle (clamped to the viewport) and nearest
    /// normalized depth
    Rect {
        min: [f32; 2],
        max: [f32; 2],
        nearest: f32,
    },
}

/// Texels of one level covering a footprint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Footprint {
    pub level: usize,
    /// Inclusive texel bounds at `level`: x0, y0, x1, y1
    pub texels: [u32; 4],
    /// Farthest hierarchy depth under the footprint
    pub hzb_max: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Visibility {
    Outside,
    Occluded,
    Visible {
        nearest: f32,
        footprint: Option<Footprint>,
    },
}

impl Visibility {
    pub fn is_visible(&self) -> bool {
        matches!(self, Visibility::Visible { .. })
    }
}

/// Project a box into the level-0 texel space of a view
pub fn project_bounds(view: &ViewUniform, bounds: &AABB) -> Projection {
    let corners = aabb_corners(bounds).map(|c| Vector4::new(c.x, c.y, c.z, 1.0));

    for plane in &view.planes {
        let plane = Vector4::from(*plane);
        if corners.iter().all(|c| plane.dot(*c) < 0.0) {
            return Projection::Outside;
        }
    }

    let view_matrix = Matrix4::from(view.view);
    let view_proj = Matrix4::from(view.view_proj);
    let (near, far) = (view.near(), view.far());
    let (width, height) = (view.depth[2], view.depth[3]);

    let mut min = [f32::INFINITY; 2];
    let mut max = [f32::NEG_INFINITY; 2];
    let mut nearest = f32::INFINITY;

    for corner in &corners {
        let d = -(view_matrix * *corner).z;
        if d < near {
            return Projection::StraddlesNear;
        }
        nearest = nearest.min(d);

        let clip = view_proj * *corner;
        let w = clip.w.max(f32::EPSILON);
        let x = (clip.x / w * 0.5 + 0.5) * width;
        let y = (0.5 - clip.y / w * 0.5) * height;
        min = [min[0].min(x), min[1].min(y)];
        max = [max[0].max(x), max[1].max(y)];
    }

    if max[0] < 0.0 || max[1] < 0.0 || min[0] > width || min[1] > height {
        return Projection::Outside;
    }

    Projection::Rect {
        min: [min[0].max(0.0), min[1].max(0.0)],
        max: [max[0].min(width), max[1].min(height)],
        nearest: (nearest - near) / (far - near),
    }
}

/// Pick the level and texels covering a level-0 rectangle
pub fn select_footprint(
    view: &ViewUniform,
    min: [f32; 2],
    max: [f32; 2],
    sampler: &dyn HierarchySampler,
) -> Footprint {
    let span = (max[0] - min[0]).max(max[1] - min[1]);
    let level = level_for_span(span, view.level_count().max(1));

    let [_, _, level_width, level_height] = view.level(level);
    let scale = (1u32 << level) as f32;
    let x0 = ((min[0] / scale).floor() as i64).clamp(0, level_width as i64 - 1) as u32;
    let y0 = ((min[1] / scale).floor() as i64).clamp(0, level_height as i64 - 1) as u32;
    let x1 = ((max[0] / scale).ceil() as i64 - 1).clamp(x0 as i64, level_width as i64 - 1) as u32;
    let y1 = ((max[1] / scale).ceil() as i64 - 1).clamp(y0 as i64, level_height as i64 - 1) as u32;

    Footprint {
        level,
        texels: [x0, y0, x1, y1],
        hzb_max: sampler.max_in_rect(level, x0, y0, x1, y1),
    }
}

/// Frustum, near-plane and occlusion test of a box against one hierarchy
pub fn test_bounds(view: &ViewUniform, bounds: &AABB, sampler: &dyn HierarchySampler) -> Visibility {
    match project_bounds(view, bounds) {
        Projection::Outside => Visibility::Outside,
        Projection::StraddlesNear => Visibility::Visible {
            nearest: NEAR_PLANE_DISTANCE,
            footprint: None,
        },
        Projection::Rect { min, max, nearest } => {
            let footprint = select_footprint(view, min, max, sampler);
            if nearest > footprint.hzb_max {
                Visibility::Occluded
            } else {
                Visibility::Visible {
                    nearest,
                    footprint: Some(footprint),
                }
            }
        }
    }
}

/// Distance (LOD) culling
pub fn distance_culled(uniform: &QueryUniform, vertex: &QueryVertex) -> bool {
    if vertex.max_distance < 0.0 {
        return false;
    }
    let lod = Vector3::new(
        uniform.lod_position[0],
        uniform.lod_position[1],
        uniform.lod_position[2],
    );
    let position = Vector3::from(vertex.world_position);
    let [sx, sy, sz] = vertex.world_scale;
    let limit = vertex.max_distance * sx.abs().max(sy.abs()).max(sz.abs()) * uniform.lod_position[3];
    (lod - position).magnitude() > limit
}

/// Result a pass writes for one candidate: view-normalized distance or
/// `CULLED_SENTINEL`
pub fn evaluate(
    pass: QueryPass,
    uniform: &QueryUniform,
    vertex: &QueryVertex,
    primary: &dyn HierarchySampler,
    secondary: &dyn HierarchySampler,
) -> f32 {
    if distance_culled(uniform, vertex) {
        return CULLED_SENTINEL;
    }
    let bounds = vertex.bounds();

    let nearest = match pass {
        QueryPass::Regular => match test_bounds(&uniform.primary, &bounds, primary) {
            Visibility::Visible { nearest, .. } => nearest,
            _ => return CULLED_SENTINEL,
        },
        QueryPass::ShadowProgressive | QueryPass::ShadowConservative => {
            let Some(volume) = shadow_volume(pass, uniform, &bounds, primary) else {
                return CULLED_SENTINEL;
            };
            match test_bounds(&uniform.secondary, &volume, secondary) {
                Visibility::Visible { nearest, .. } => nearest,
                _ => return CULLED_SENTINEL,
            }
        }
    };
    nearest.max(0.0)
}

/// Box swept by a caster's shadow, clamped to the camera-visible bounds.
/// `None` when the caster is invisible to the light or the volume misses
/// the camera bounds.
pub fn shadow_volume(
    pass: QueryPass,
    uniform: &QueryUniform,
    bounds: &AABB,
    light: &dyn HierarchySampler,
) -> Option<AABB> {
    let (nearest, footprint) = match test_bounds(&uniform.primary, bounds, light) {
        Visibility::Visible { nearest, footprint } => (nearest, footprint),
        _ => return None,
    };

    let end = match (pass, footprint) {
        (QueryPass::ShadowProgressive, Some(f)) => f.hzb_max,
        _ => FAR_DEPTH,
    };

    let range = uniform.primary.far() - uniform.primary.near();
    let direction = Vector3::new(
        uniform.light_direction[0],
        uniform.light_direction[1],
        uniform.light_direction[2],
    );
    let length = (end - nearest).max(0.0) * range;
    let swept = aabb_union(bounds, &aabb_translated(bounds, direction * length));

    let clamp = AABB {
        min: Point3::new(uniform.clamp_min[0], uniform.clamp_min[1], uniform.clamp_min[2]),
        max: Point3::new(uniform.clamp_max[0], uniform.clamp_max[1], uniform.clamp_max[2]),
    };
    let clamped = aabb_clamped(&swept, &clamp);
    if aabb_is_empty(&clamped) {
        None
    } else {
        Some(clamped)
    }
}
