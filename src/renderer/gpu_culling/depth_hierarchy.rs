//! CPU depth hierarchy
//!
//! One value type for both the camera and the light hierarchy. Level 0 holds
//! the nearest occluder depth per texel; every higher level holds the
//! farthest of the 2x2 texels below it, so a texel never claims anything
//! closer than what was actually rasterized.

use super::hzb_layout::{HierarchyLayout, LevelRect};
use super::rasterizer::{rasterize_triangles, DepthTarget};
use crate::camera::DepthView;
use crate::constants::hierarchy::FAR_DEPTH;
use crate::error::EngineResult;
use rayon::prelude::*;

/// Read access to the levels of a built hierarchy
pub trait HierarchySampler {
    fn layout(&self) -> &HierarchyLayout;

    /// Depth of texel (x, y) in `level`; coordinates are clamped
    fn texel(&self, level: usize, x: u32, y: u32) -> f32;

    /// Farthest depth over an inclusive texel rectangle of `level`
    fn max_in_rect(&self, level: usize, x0: u32, y0: u32, x1: u32, y1: u32) -> f32 {
        let mut max_depth = f32::NEG_INFINITY;
        for y in y0..=y1 {
            for x in x0..=x1 {
                max_depth = max_depth.max(self.texel(level, x, y));
            }
        }
        max_depth
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepthHierarchy {
    label: String,
    layout: HierarchyLayout,
    levels: Vec<Vec<f32>>,
    atlas: Vec<f32>,
}

impl DepthHierarchy {
    pub fn new(label: &str, width: u32, height: u32) -> EngineResult<Self> {
        let layout = HierarchyLayout::new(width, height)?;
        let levels = layout
            .levels
            .iter()
            .map(|l| vec![FAR_DEPTH; (l.width * l.height) as usize])
            .collect();
        let atlas = vec![FAR_DEPTH; (layout.atlas_width * layout.atlas_height) as usize];

        log::debug!(
            "[DepthHierarchy::new] {} {}x{} with {} levels, atlas {}x{}",
            label,
            width,
            height,
            layout.level_count(),
            layout.atlas_width,
            layout.atlas_height
        );

        Ok(Self {
            label: label.to_string(),
            layout,
            levels,
            atlas,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Reset every level and the atlas to the far sentinel
    pub fn clear(&mut self) {
        for level in &mut self.levels {
            level.fill(FAR_DEPTH);
        }
        self.atlas.fill(FAR_DEPTH);
    }

    /// Rasterize occluder triangles into level 0
    pub fn rasterize(&mut self, view: &DepthView, positions: &[[f32; 3]], indices: &[u32]) {
        let base = self.layout.base();
        let mut target = DepthTarget {
            texels: &mut self.levels[0],
            width: base.width,
            height: base.height,
        };
        rasterize_triangles(&mut target, view, positions, indices);
    }

    /// Derive levels 1.. from level 0 and pack everything into the atlas
    pub fn build(&mut self) {
        for k in 1..self.levels.len() {
            let (lower, upper) = self.levels.split_at_mut(k);
            let src = &lower[k - 1];
            let src_rect = self.layout.levels[k - 1];
            let dst_rect = self.layout.levels[k];
            downsample_max(src, src_rect, &mut upper[0], dst_rect);
        }

        let atlas_width = self.layout.atlas_width as usize;
        for (level, rect) in self.levels.iter().zip(&self.layout.levels) {
            for row in 0..rect.height as usize {
                let dst = (rect.y as usize + row) * atlas_width + rect.x as usize;
                let src = row * rect.width as usize;
                self.atlas[dst..dst + rect.width as usize]
                    .copy_from_slice(&level[src..src + rect.width as usize]);
            }
        }
    }

    pub fn level(&self, index: usize) -> &[f32] {
        &self.levels[index]
    }

    pub fn atlas(&self) -> &[f32] {
        &self.atlas
    }

    /// Depth of one atlas texel
    pub fn atlas_texel(&self, x: u32, y: u32) -> f32 {
        let x = x.min(self.layout.atlas_width - 1);
        let y = y.min(self.layout.atlas_height - 1);
        self.atlas[(y * self.layout.atlas_width + x) as usize]
    }
}

impl HierarchySampler for DepthHierarchy {
    fn layout(&self) -> &HierarchyLayout {
        &self.layout
    }

    fn texel(&self, level: usize, x: u32, y: u32) -> f32 {
        let level = level.min(self.levels.len() - 1);
        let rect = self.layout.levels[level];
        let x = x.min(rect.width - 1);
        let y = y.min(rect.height - 1);
        self.levels[level][(y * rect.width + x) as usize]
    }
}

/// 2x2 max reduction, one output row per rayon task
fn downsample_max(src: &[f32], src_rect: LevelRect, dst: &mut [f32], dst_rect: LevelRect) {
    let src_width = src_rect.width as usize;
    let dst_width = dst_rect.width as usize;

    dst.par_chunks_mut(dst_width)
        .enumerate()
        .for_each(|(y, row)| {
            let top = &src[(2 * y) * src_width..(2 * y + 1) * src_width];
            let bottom = &src[(2 * y + 1) * src_width..(2 * y + 2) * src_width];
            for (x, out) in row.iter_mut().enumerate() {
                *out = top[2 * x]
                    .max(top[2 * x + 1])
                    .max(bottom[2 * x])
                    .max(bottom[2 * x + 1]);
            }
        });
}
