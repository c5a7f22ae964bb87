//! CPU implementation of the occlusion backend
//!
//! Produces the same farthest-depth pyramid as the GPU path with the software
//! rasterizer and evaluates candidates with the CPU statement of the query
//! program. Used where no adapter is available and as the reference the wgpu
//! backend is compared against.

use super::backend::{OcclusionBackend, QueryBatch, VisualizationMode};
use super::depth_hierarchy::{DepthHierarchy, HierarchySampler};
use super::hzb_layout::HierarchyLayout;
use super::query_data::{QueryVertex, ViewUniform};
use super::query_operations::{evaluate, project_bounds, select_footprint, test_bounds, Projection};
use super::query_slots::{ResultsGrid, SlotLayout};
use crate::camera::DepthView;
use crate::constants::hierarchy::FAR_DEPTH;
use crate::error::EngineResult;
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

/// Colour per level for coverage views
const LEVEL_PALETTE: [[u8; 3]; 8] = [
    [230, 25, 75],
    [245, 130, 48],
    [255, 225, 25],
    [60, 180, 75],
    [70, 240, 240],
    [0, 130, 200],
    [145, 30, 180],
    [240, 50, 230],
];

#[derive(Debug, Default)]
pub struct SoftwareBackend {
    batches_drawn: u64,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query batches drawn since construction
    pub fn batches_drawn(&self) -> u64 {
        self.batches_drawn
    }
}

/// Vertices that actually produce a fragment for the given topology
fn drawn_vertices(layout: SlotLayout, vertices: &[QueryVertex]) -> &[QueryVertex] {
    match layout {
        // Each strip segment fills the texel of its first vertex
        SlotLayout::Serpentine => &vertices[..vertices.len().saturating_sub(1)],
        SlotLayout::Linear => vertices,
    }
}

impl OcclusionBackend for SoftwareBackend {
    type Hierarchy = DepthHierarchy;
    type Canvas = RgbaImage;

    fn name(&self) -> &str {
        "software"
    }

    fn create_hierarchy(&mut self, label: &str, width: u32, height: u32) -> EngineResult<DepthHierarchy> {
        DepthHierarchy::new(label, width, height)
    }

    fn hierarchy_layout<'h>(&self, hierarchy: &'h DepthHierarchy) -> &'h HierarchyLayout {
        hierarchy.layout()
    }

    fn begin_hierarchy(&mut self, hierarchy: &mut DepthHierarchy, _view: &DepthView) -> EngineResult<()> {
        hierarchy.clear();
        Ok(())
    }

    fn draw_occluders(
        &mut self,
        hierarchy: &mut DepthHierarchy,
        view: &DepthView,
        positions: &[[f32; 3]],
        indices: &[u32],
    ) -> EngineResult<()> {
        hierarchy.rasterize(view, positions, indices);
        Ok(())
    }

    fn finish_hierarchy(&mut self, hierarchy: &mut DepthHierarchy) -> EngineResult<()> {
        hierarchy.build();
        Ok(())
    }

    fn run_queries(
        &mut self,
        layout: SlotLayout,
        grid: &mut ResultsGrid,
        batches: &[QueryBatch<'_, DepthHierarchy>],
    ) -> EngineResult<()> {
        grid.reset();
        let width = grid.width();
        let height = grid.height();

        for batch in batches {
            let drawn = drawn_vertices(layout, batch.vertices);
            let results: Vec<f32> = drawn
                .par_iter()
                .map(|vertex| {
                    evaluate(batch.pass, &batch.uniform, vertex, batch.primary, batch.secondary)
                })
                .collect();

            let values = grid.values_mut();
            for (vertex, value) in drawn.iter().zip(results) {
                let [x, y] = vertex.slot;
                // Fragments outside the render target are discarded
                if x < width && y < height {
                    values[(y * width + x) as usize] = value;
                }
            }
            self.batches_drawn += 1;
        }
        Ok(())
    }

    fn visualize(
        &mut self,
        hierarchy: &DepthHierarchy,
        view: &ViewUniform,
        mode: &VisualizationMode,
        canvas: &mut RgbaImage,
    ) -> EngineResult<()> {
        let (cw, ch) = canvas.dimensions();
        if cw == 0 || ch == 0 {
            return Ok(());
        }
        let layout = hierarchy.layout();
        let base = layout.base();

        // Resolve the candidate once, not per pixel
        let candidate = mode.bounds().map(|bounds| {
            let visible = test_bounds(view, &bounds, hierarchy).is_visible();
            let footprint = match project_bounds(view, &bounds) {
                Projection::Rect { min, max, .. } => {
                    Some((min, max, select_footprint(view, min, max, hierarchy)))
                }
                _ => None,
            };
            (visible, footprint)
        });

        for (px, py, pixel) in canvas.enumerate_pixels_mut() {
            let u = (px as f32 + 0.5) / cw as f32;
            let v = (py as f32 + 0.5) / ch as f32;

            let color = match mode {
                VisualizationMode::LevelDepth { level } => {
                    let rect = layout.level(*level);
                    depth_color(hierarchy.texel(*level, texel(u, rect.width), texel(v, rect.height)))
                }
                VisualizationMode::Atlas => depth_color(hierarchy.atlas_texel(
                    texel(u, layout.atlas_width),
                    texel(v, layout.atlas_height),
                )),
                VisualizationMode::LevelCoverage => {
                    let (x, y) = (u * base.width as f32, v * base.height as f32);
                    let mut covered = None;
                    for level in 0..layout.level_count() {
                        let scale = (1u32 << level) as f32;
                        if hierarchy.texel(level, (x / scale) as u32, (y / scale) as u32) < FAR_DEPTH {
                            covered = Some(level);
                        } else {
                            break;
                        }
                    }
                    match covered {
                        Some(level) => {
                            let [r, g, b] = LEVEL_PALETTE[level % LEVEL_PALETTE.len()];
                            Rgba([r, g, b, 255])
                        }
                        None => Rgba([0, 0, 0, 255]),
                    }
                }
                VisualizationMode::CandidateFootprint { .. } => {
                    let (x, y) = (u * base.width as f32, v * base.height as f32);
                    let background = depth_color(hierarchy.texel(0, x as u32, y as u32));
                    match candidate {
                        Some((visible, Some((min, max, _))))
                            if x >= min[0] && x <= max[0] && y >= min[1] && y <= max[1] =>
                        {
                            tint(background, visible)
                        }
                        _ => background,
                    }
                }
                VisualizationMode::CandidateLevel { .. } => match candidate {
                    Some((visible, Some((_, _, footprint)))) => {
                        let rect = layout.level(footprint.level);
                        let (x, y) = (texel(u, rect.width), texel(v, rect.height));
                        let background = depth_color(hierarchy.texel(footprint.level, x, y));
                        let [x0, y0, x1, y1] = footprint.texels;
                        if x >= x0 && x <= x1 && y >= y0 && y <= y1 {
                            tint(background, visible)
                        } else {
                            background
                        }
                    }
                    _ => depth_color(hierarchy.texel(0, texel(u, base.width), texel(v, base.height))),
                },
            };
            *pixel = color;
        }
        Ok(())
    }
}

fn texel(u: f32, size: u32) -> u32 {
    ((u * size as f32) as u32).min(size - 1)
}

/// Near is bright, the far sentinel is black
fn depth_color(depth: f32) -> Rgba<u8> {
    let g = ((1.0 - depth.clamp(0.0, 1.0)) * 255.0) as u8;
    Rgba([g, g, g, 255])
}

/// Green for visible, red for culled
fn tint(background: Rgba<u8>, visible: bool) -> Rgba<u8> {
    let g = background.0[0] / 2;
    if visible {
        Rgba([g, 128 + g / 2, g, 255])
    } else {
        Rgba([128 + g / 2, g, g, 255])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{perspective_depth_view, CameraData};
    use crate::math::create_aabb;
    use crate::renderer::gpu_culling::query_data::{QueryPass, QueryUniform};
    use crate::renderer::gpu_culling::query_slots::pack_pass;
    use cgmath::{Point3, Vector3};

    fn wall_scene(backend: &mut SoftwareBackend) -> (DepthHierarchy, DepthView) {
        let camera = CameraData {
            aspect_ratio: 2.0,
            near_plane: 1.0,
            far_plane: 201.0,
            ..Default::default()
        };
        let view = perspective_depth_view(&camera);
        let mut hierarchy = backend.create_hierarchy("camera", 128, 64).expect("hierarchy");
        backend.begin_hierarchy(&mut hierarchy, &view).expect("begin");
        let wall = [
            [-100.0, -100.0, -20.0],
            [100.0, -100.0, -20.0],
            [100.0, 100.0, -20.0],
            [-100.0, 100.0, -20.0],
        ];
        backend
            .draw_occluders(&mut hierarchy, &view, &wall, &[0, 1, 2, 0, 2, 3])
            .expect("draw");
        backend.finish_hierarchy(&mut hierarchy).expect("finish");
        (hierarchy, view)
    }

    fn candidate(z: f32) -> QueryVertex {
        let bounds = create_aabb(Point3::new(-1.0, -1.0, z - 1.0), Point3::new(1.0, 1.0, z + 1.0));
        QueryVertex::new([0, 0], &bounds, Point3::new(0.0, 0.0, z), Vector3::new(1.0, 1.0, 1.0), None)
    }

    #[test]
    fn test_run_queries_writes_slots() {
        let mut backend = SoftwareBackend::new();
        let (hierarchy, view) = wall_scene(&mut backend);
        let view_uniform = ViewUniform::new(&view, hierarchy.layout());

        for layout in [SlotLayout::Serpentine, SlotLayout::Linear] {
            let mut vertices = Vec::new();
            let records = vec![candidate(-10.0), candidate(-50.0), candidate(-5.0)];
            pack_pass(layout, 0, 64, records, &mut vertices);

            let mut grid = ResultsGrid::new(1);
            let uniform = QueryUniform::regular(&view_uniform, Point3::new(0.0, 0.0, 0.0), 1.0, grid.dimensions());
            let batch = QueryBatch {
                pass: QueryPass::Regular,
                uniform,
                vertices: &vertices,
                primary: &hierarchy,
                secondary: &hierarchy,
            };
            backend.run_queries(layout, &mut grid, &[batch]).expect("queries");

            assert!(grid.value([0, 0]) >= 0.0);
            assert!(grid.value([1, 0]) < 0.0);
            assert!(grid.value([2, 0]) >= 0.0);
            assert!(grid.value([2, 0]) < grid.value([0, 0]));
        }
    }

    #[test]
    fn test_visualize_modes() {
        let mut backend = SoftwareBackend::new();
        let (hierarchy, view) = wall_scene(&mut backend);
        let view_uniform = ViewUniform::new(&view, hierarchy.layout());
        let bounds = create_aabb(Point3::new(-1.0, -1.0, -11.0), Point3::new(1.0, 1.0, -9.0));

        let modes = [
            VisualizationMode::LevelDepth { level: 1 },
            VisualizationMode::Atlas,
            VisualizationMode::LevelCoverage,
            VisualizationMode::CandidateFootprint { bounds },
            VisualizationMode::CandidateLevel { bounds },
        ];
        for mode in &modes {
            let mut canvas = RgbaImage::new(64, 32);
            backend
                .visualize(&hierarchy, &view_uniform, mode, &mut canvas)
                .expect("visualize");
            // The wall covers the whole view, so nothing is left black
            assert!(canvas.pixels().any(|p| p.0[0] > 0 || p.0[1] > 0));
        }

        let mut canvas = RgbaImage::new(64, 32);
        backend
            .visualize(
                &hierarchy,
                &view_uniform,
                &VisualizationMode::CandidateFootprint { bounds },
                &mut canvas,
            )
            .expect("visualize");
        let centre = canvas.get_pixel(32, 16);
        assert!(centre.0[1] > centre.0[0], "visible candidate is tinted green");
    }
}
