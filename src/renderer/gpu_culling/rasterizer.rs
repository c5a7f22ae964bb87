//! Software occluder rasterizer
//!
//! Writes the nearest view-normalized depth of every covered texel into a
//! level-0 buffer. Triangles are clipped against the near plane in view space,
//! drawn without face culling and sampled at texel centres. Depth follows the
//! same rule the GPU path uses: `(d - near) / (far - near)` where `d` is the
//! distance along the view axis, interpolated perspective-correctly.

use crate::camera::{DepthView, ProjectionKind};
use cgmath::{Matrix4, Point3, Transform, Vector4};

/// Vertex after near-plane clipping
#[derive(Debug, Clone, Copy)]
struct ClipVertex {
    /// View-space position
    view: Point3<f32>,
}

/// Projected vertex in texel space
#[derive(Debug, Clone, Copy)]
struct ScreenVertex {
    x: f32,
    y: f32,
    /// Distance along the view axis
    depth: f32,
}

/// Target of one rasterization pass
pub struct DepthTarget<'a> {
    pub texels: &'a mut [f32],
    pub width: u32,
    pub height: u32,
}

/// Rasterize an indexed triangle list given in world space
pub fn rasterize_triangles(
    target: &mut DepthTarget<'_>,
    view: &DepthView,
    positions: &[[f32; 3]],
    indices: &[u32],
) {
    let projection = view.projection;

    for tri in indices.chunks_exact(3) {
        let mut corners = [ClipVertex {
            view: Point3::new(0.0, 0.0, 0.0),
        }; 3];
        let mut valid = true;
        for (corner, &index) in corners.iter_mut().zip(tri) {
            match positions.get(index as usize) {
                Some(p) => {
                    corner.view = view.view.transform_point(Point3::new(p[0], p[1], p[2]));
                }
                None => valid = false,
            }
        }
        if !valid {
            continue;
        }

        let polygon = clip_near(&corners, view.near);
        if polygon.len() < 3 {
            continue;
        }

        let screen: Vec<ScreenVertex> = polygon
            .iter()
            .map(|v| to_screen(v, &projection, target.width, target.height))
            .collect();

        for i in 1..screen.len() - 1 {
            fill_triangle(target, view, [screen[0], screen[i], screen[i + 1]]);
        }
    }
}

/// Sutherland-Hodgman against `d >= near`
fn clip_near(corners: &[ClipVertex; 3], near: f32) -> Vec<ClipVertex> {
    let mut out = Vec::with_capacity(4);
    for i in 0..3 {
        let a = corners[i];
        let b = corners[(i + 1) % 3];
        let da = -a.view.z;
        let db = -b.view.z;
        let a_inside = da >= near;
        let b_inside = db >= near;

        if a_inside {
            out.push(a);
        }
        if a_inside != b_inside {
            let t = (near - da) / (db - da);
            out.push(ClipVertex {
                view: Point3::new(
                    a.view.x + (b.view.x - a.view.x) * t,
                    a.view.y + (b.view.y - a.view.y) * t,
                    -near,
                ),
            });
        }
    }
    out
}

fn to_screen(v: &ClipVertex, projection: &Matrix4<f32>, width: u32, height: u32) -> ScreenVertex {
    let clip = projection * Vector4::new(v.view.x, v.view.y, v.view.z, 1.0);
    let w = if clip.w.abs() > f32::EPSILON { clip.w } else { f32::EPSILON };
    let ndc_x = clip.x / w;
    let ndc_y = clip.y / w;
    ScreenVertex {
        x: (ndc_x * 0.5 + 0.5) * width as f32,
        y: (0.5 - ndc_y * 0.5) * height as f32,
        depth: -v.view.z,
    }
}

fn edge(a: &ScreenVertex, b: &ScreenVertex, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

/// Top-left fill rule so shared edges are drawn exactly once
fn is_top_left(a: &ScreenVertex, b: &ScreenVertex) -> bool {
    let dy = b.y - a.y;
    let dx = b.x - a.x;
    (dy == 0.0 && dx > 0.0) || dy < 0.0
}

fn fill_triangle(target: &mut DepthTarget<'_>, view: &DepthView, tri: [ScreenVertex; 3]) {
    let [mut v0, mut v1, v2] = tri;
    let mut area = edge(&v0, &v1, v2.x, v2.y);
    if area == 0.0 || !area.is_finite() {
        return;
    }
    // No face culling: normalize winding
    if area < 0.0 {
        std::mem::swap(&mut v0, &mut v1);
        area = -area;
    }

    let min_x = v0.x.min(v1.x).min(v2.x).floor().max(0.0) as i64;
    let max_x = v0.x.max(v1.x).max(v2.x).ceil().min(target.width as f32) as i64;
    let min_y = v0.y.min(v1.y).min(v2.y).floor().max(0.0) as i64;
    let max_y = v0.y.max(v1.y).max(v2.y).ceil().min(target.height as f32) as i64;
    if min_x >= max_x || min_y >= max_y {
        return;
    }

    let range = view.far - view.near;
    let perspective = view.kind == ProjectionKind::Perspective;
    let inv_depth = [1.0 / v0.depth, 1.0 / v1.depth, 1.0 / v2.depth];
    let top_left = [
        is_top_left(&v1, &v2),
        is_top_left(&v2, &v0),
        is_top_left(&v0, &v1),
    ];

    for y in min_y..max_y {
        let py = y as f32 + 0.5;
        for x in min_x..max_x {
            let px = x as f32 + 0.5;
            let w = [
                edge(&v1, &v2, px, py),
                edge(&v2, &v0, px, py),
                edge(&v0, &v1, px, py),
            ];
            let covered = w
                .iter()
                .zip(top_left)
                .all(|(&wi, tl)| wi > 0.0 || (wi == 0.0 && tl));
            if !covered {
                continue;
            }
            let [w0, w1, w2] = w;

            let (b0, b1, b2) = (w0 / area, w1 / area, w2 / area);
            let depth = if perspective {
                1.0 / (b0 * inv_depth[0] + b1 * inv_depth[1] + b2 * inv_depth[2])
            } else {
                b0 * v0.depth + b1 * v1.depth + b2 * v2.depth
            };
            let normalized = (depth - view.near) / range;

            let index = (y as u32 * target.width + x as u32) as usize;
            if normalized < target.texels[index] {
                target.texels[index] = normalized.max(0.0);
            }
        }
    }
}
