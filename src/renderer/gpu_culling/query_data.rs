//! Query data - Pure DOP
//!
//! GPU-layout records shared by the CPU evaluation and query.wgsl. Every
//! struct here is `#[repr(C)]` and Pod; field order must match the WGSL
//! declarations.

use super::hzb_layout::HierarchyLayout;
use crate::camera::{view_projection, DepthView};
use crate::constants::hierarchy::MAX_LEVELS;
use crate::constants::query::NO_MAX_DISTANCE;
use crate::math::AABB;
use bytemuck::{Pod, Zeroable};
use cgmath::{Matrix4, Point3, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

/// How far a caster's shadow volume is assumed to reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowVolumeEstimate {
    /// Extent ends at the farthest light-space depth behind the caster's
    /// footprint. More culling, rarely wrong.
    Progressive,
    /// Extent reaches the far end of the light volume. Always correct.
    Conservative,
}

/// Program variant of one query pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryPass {
    Regular,
    ShadowProgressive,
    ShadowConservative,
}

impl QueryPass {
    pub fn for_shadow(estimate: ShadowVolumeEstimate) -> Self {
        match estimate {
            ShadowVolumeEstimate::Progressive => QueryPass::ShadowProgressive,
            ShadowVolumeEstimate::Conservative => QueryPass::ShadowConservative,
        }
    }

    /// Fragment entry point in query.wgsl
    pub fn entry_point(self) -> &'static str {
        match self {
            QueryPass::Regular => "fs_query_regular",
            QueryPass::ShadowProgressive => "fs_query_shadow_progressive",
            QueryPass::ShadowConservative => "fs_query_shadow_conservative",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QueryPass::Regular => "Occlusion Query Regular",
            QueryPass::ShadowProgressive => "Occlusion Query Shadow Progressive",
            QueryPass::ShadowConservative => "Occlusion Query Shadow Conservative",
        }
    }
}

/// One packed candidate
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct QueryVertex {
    /// Results grid texel (column, row)
    pub slot: [u32; 2],
    pub aabb_min: [f32; 3],
    pub aabb_max: [f32; 3],
    pub world_position: [f32; 3],
    pub world_scale: [f32; 3],
    /// Negative when the candidate has no draw distance limit
    pub max_distance: f32,
    pub _padding: f32,
}

const_assert_eq!(std::mem::size_of::<QueryVertex>(), 64);

impl QueryVertex {
    pub fn new(
        slot: [u32; 2],
        bounds: &AABB,
        world_position: Point3<f32>,
        world_scale: Vector3<f32>,
        max_distance: Option<f32>,
    ) -> Self {
        Self {
            slot,
            aabb_min: bounds.min.into(),
            aabb_max: bounds.max.into(),
            world_position: world_position.into(),
            world_scale: world_scale.into(),
            max_distance: match max_distance {
                Some(d) if d >= 0.0 => d,
                _ => NO_MAX_DISTANCE,
            },
            _padding: 0.0,
        }
    }

    /// Same record addressed at another slot
    pub fn at_slot(&self, slot: [u32; 2]) -> Self {
        Self { slot, ..*self }
    }

    pub fn bounds(&self) -> AABB {
        AABB {
            min: self.aabb_min.into(),
            max: self.aabb_max.into(),
        }
    }

    const ATTRIBUTES: [wgpu::VertexAttribute; 6] = wgpu::vertex_attr_array![
        0 => Uint32x2,
        1 => Float32x3,
        2 => Float32x3,
        3 => Float32x3,
        4 => Float32x3,
        5 => Float32,
    ];

    pub fn desc<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QueryVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Atlas rectangles of every level, `(x, y, width, height)`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LevelTable {
    pub rects: [[u32; 4]; MAX_LEVELS],
}

const_assert_eq!(std::mem::size_of::<LevelTable>(), 256);

impl LevelTable {
    pub fn from_layout(layout: &HierarchyLayout) -> Self {
        let mut rects = [[0; 4]; MAX_LEVELS];
        for (slot, level) in rects.iter_mut().zip(&layout.levels) {
            *slot = [level.x, level.y, level.width, level.height];
        }
        Self { rects }
    }
}

/// One hierarchy as seen by the query program
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ViewUniform {
    pub view: [[f32; 4]; 4],
    /// OpenGL clip convention
    pub view_proj: [[f32; 4]; 4],
    /// left, right, bottom, top, near, far; inside is `dot(plane, p) >= 0`
    pub planes: [[f32; 4]; 6],
    /// near, far, level-0 width, level-0 height
    pub depth: [f32; 4],
    /// level count, unused x3
    pub info: [u32; 4],
    pub levels: LevelTable,
}

const_assert_eq!(std::mem::size_of::<ViewUniform>(), 512);

impl ViewUniform {
    pub fn new(view: &DepthView, layout: &HierarchyLayout) -> Self {
        let view_proj = view_projection(view);
        let planes = extract_frustum_planes(&view_proj);
        let base = layout.base();
        Self {
            view: view.view.into(),
            view_proj: view_proj.into(),
            planes: planes.map(|p| p.into()),
            depth: [view.near, view.far, base.width as f32, base.height as f32],
            info: [layout.level_count() as u32, 0, 0, 0],
            levels: LevelTable::from_layout(layout),
        }
    }

    pub fn near(&self) -> f32 {
        self.depth[0]
    }

    pub fn far(&self) -> f32 {
        self.depth[1]
    }

    pub fn level_count(&self) -> usize {
        self.info[0] as usize
    }

    /// Level rect `(x, y, width, height)` clamped to the last level
    pub fn level(&self, index: usize) -> [u32; 4] {
        let last = self.level_count().saturating_sub(1);
        self.levels.rects[index.min(last)]
    }
}

/// Uniform block of one query pass
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct QueryUniform {
    /// Hierarchy the candidates are tested against first (camera or light)
    pub primary: ViewUniform,
    /// Camera hierarchy during the shadow pass; copy of `primary` otherwise
    pub secondary: ViewUniform,
    /// xyz = LOD camera position, w = distance culling scale
    pub lod_position: [f32; 4],
    /// xyz = light direction, w unused
    pub light_direction: [f32; 4],
    /// Camera-visible bounds the extruded shadow volume is clamped to
    pub clamp_min: [f32; 4],
    pub clamp_max: [f32; 4],
    /// grid width, grid height, unused x2
    pub grid: [u32; 4],
}

const_assert_eq!(std::mem::size_of::<QueryUniform>(), 1104);

impl QueryUniform {
    pub fn regular(
        camera: &ViewUniform,
        lod_position: Point3<f32>,
        distance_scale: f32,
        grid: [u32; 2],
    ) -> Self {
        Self {
            primary: *camera,
            secondary: *camera,
            lod_position: [lod_position.x, lod_position.y, lod_position.z, distance_scale],
            light_direction: [0.0; 4],
            clamp_min: [0.0; 4],
            clamp_max: [0.0; 4],
            grid: [grid[0], grid[1], 0, 0],
        }
    }

    pub fn shadow(
        light: &ViewUniform,
        camera: &ViewUniform,
        light_direction: Vector3<f32>,
        camera_bounds: &AABB,
        lod_position: Point3<f32>,
        distance_scale: f32,
        grid: [u32; 2],
    ) -> Self {
        Self {
            primary: *light,
            secondary: *camera,
            lod_position: [lod_position.x, lod_position.y, lod_position.z, distance_scale],
            light_direction: [light_direction.x, light_direction.y, light_direction.z, 0.0],
            clamp_min: [camera_bounds.min.x, camera_bounds.min.y, camera_bounds.min.z, 0.0],
            clamp_max: [camera_bounds.max.x, camera_bounds.max.y, camera_bounds.max.z, 0.0],
            grid: [grid[0], grid[1], 0, 0],
        }
    }
}

/// Extract frustum planes from a view-projection matrix (Gribb-Hartmann).
/// Planes point inwards and are normalized on their xyz part.
pub fn extract_frustum_planes(vp: &Matrix4<f32>) -> [Vector4<f32>; 6] {
    let m = vp;

    [
        // Left plane
        Vector4::new(m.x.w + m.x.x, m.y.w + m.y.x, m.z.w + m.z.x, m.w.w + m.w.x).normalize_plane(),
        // Right plane
        Vector4::new(m.x.w - m.x.x, m.y.w - m.y.x, m.z.w - m.z.x, m.w.w - m.w.x).normalize_plane(),
        // Bottom plane
        Vector4::new(m.x.w + m.x.y, m.y.w + m.y.y, m.z.w + m.z.y, m.w.w + m.w.y).normalize_plane(),
        // Top plane
        Vector4::new(m.x.w - m.x.y, m.y.w - m.y.y, m.z.w - m.z.y, m.w.w - m.w.y).normalize_plane(),
        // Near plane
        Vector4::new(m.x.w + m.x.z, m.y.w + m.y.z, m.z.w + m.z.z, m.w.w + m.w.z).normalize_plane(),
        // Far plane
        Vector4::new(m.x.w - m.x.z, m.y.w - m.y.z, m.z.w - m.z.z, m.w.w - m.w.z).normalize_plane(),
    ]
}

/// Normalize plane equation
trait NormalizePlane {
    fn normalize_plane(self) -> Self;
}

impl NormalizePlane for Vector4<f32> {
    fn normalize_plane(self) -> Self {
        let length = (self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        if length > 0.0 {
            self / length
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{perspective_depth_view, CameraData};
    use crate::math::create_aabb;
    use cgmath::InnerSpace;

    #[test]
    fn test_vertex_packing() {
        let bounds = create_aabb(Point3::new(-1.0, -2.0, -3.0), Point3::new(1.0, 2.0, 3.0));
        let vertex = QueryVertex::new(
            [5, 1],
            &bounds,
            Point3::new(0.0, 0.5, 0.0),
            Vector3::new(2.0, 2.0, 2.0),
            None,
        );
        assert_eq!(vertex.max_distance, NO_MAX_DISTANCE);
        assert_eq!(vertex.bounds(), bounds);

        let bytes = bytemuck::bytes_of(&vertex);
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[0..4], &5u32.to_ne_bytes());

        let moved = vertex.at_slot([6, 1]);
        assert_eq!(moved.slot, [6, 1]);
        assert_eq!(moved.aabb_max, vertex.aabb_max);
    }

    #[test]
    fn test_negative_max_distance_means_unlimited() {
        let bounds = create_aabb(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        let v = QueryVertex::new([0, 0], &bounds, bounds.min, Vector3::new(1.0, 1.0, 1.0), Some(-5.0));
        assert_eq!(v.max_distance, NO_MAX_DISTANCE);
        let v = QueryVertex::new([0, 0], &bounds, bounds.min, Vector3::new(1.0, 1.0, 1.0), Some(0.0));
        assert_eq!(v.max_distance, 0.0);
    }

    #[test]
    fn test_frustum_planes_contain_forward_point() {
        let camera = CameraData::default();
        let view = perspective_depth_view(&camera);
        let planes = extract_frustum_planes(&view_projection(&view));

        let inside = Vector4::new(0.0, 0.0, -10.0, 1.0);
        assert!(planes.iter().all(|p| p.dot(inside) > 0.0));

        let behind = Vector4::new(0.0, 0.0, 10.0, 1.0);
        assert!(planes[4].dot(behind) < 0.0);
    }

    #[test]
    fn test_shader_entry_points() {
        assert_eq!(QueryPass::for_shadow(ShadowVolumeEstimate::Progressive), QueryPass::ShadowProgressive);
        assert_eq!(QueryPass::Regular.entry_point(), "fs_query_regular");
    }
}
