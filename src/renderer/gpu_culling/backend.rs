//! The GPU surface the occlusion engine drives
//!
//! A backend owns device resources and knows how to build a hierarchy, run
//! the query programs and read results back. Hierarchies themselves are
//! owned by the engine so that both (camera and light) can be borrowed by a
//! query pass while the backend is borrowed mutably.

use super::hzb_layout::HierarchyLayout;
use super::query_data::{QueryPass, QueryUniform, QueryVertex, ViewUniform};
use super::query_slots::{ResultsGrid, SlotLayout};
use crate::camera::DepthView;
use crate::error::EngineResult;
use crate::math::AABB;

/// Which hierarchy a visualization shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyTarget {
    Camera,
    Light,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VisualizationMode {
    /// Depth of one level stretched over the canvas
    LevelDepth { level: usize },
    /// The whole atlas
    Atlas,
    /// Deepest level at which each region is still covered by occluders
    LevelCoverage,
    /// Level-0 depth with a candidate's screen footprint highlighted
    CandidateFootprint { bounds: AABB },
    /// The level a candidate is tested at, with the tested texels highlighted
    CandidateLevel { bounds: AABB },
}

impl VisualizationMode {
    /// Mode index understood by visualize.wgsl
    pub fn index(&self) -> u32 {
        match self {
            VisualizationMode::LevelDepth { .. } => 0,
            VisualizationMode::Atlas => 1,
            VisualizationMode::LevelCoverage => 2,
            VisualizationMode::CandidateFootprint { .. } => 3,
            VisualizationMode::CandidateLevel { .. } => 4,
        }
    }

    pub fn bounds(&self) -> Option<AABB> {
        match self {
            VisualizationMode::CandidateFootprint { bounds }
            | VisualizationMode::CandidateLevel { bounds } => Some(*bounds),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualizationRequest {
    pub target: HierarchyTarget,
    pub mode: VisualizationMode,
}

/// One draw of the query program
pub struct QueryBatch<'a, H> {
    pub pass: QueryPass,
    pub uniform: QueryUniform,
    /// Packed candidates including any trailing vertex
    pub vertices: &'a [QueryVertex],
    pub primary: &'a H,
    pub secondary: &'a H,
}

pub trait OcclusionBackend {
    /// Backend representation of one depth hierarchy
    type Hierarchy;
    /// Render target visualizations are drawn into
    type Canvas: ?Sized;

    fn name(&self) -> &str;

    fn create_hierarchy(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
    ) -> EngineResult<Self::Hierarchy>;

    fn hierarchy_layout<'h>(&self, hierarchy: &'h Self::Hierarchy) -> &'h HierarchyLayout;

    /// Clear level 0 to the far sentinel and bind the view parameters
    fn begin_hierarchy(&mut self, hierarchy: &mut Self::Hierarchy, view: &DepthView)
        -> EngineResult<()>;

    /// Rasterize one batch of world-space occluder triangles into level 0
    fn draw_occluders(
        &mut self,
        hierarchy: &mut Self::Hierarchy,
        view: &DepthView,
        positions: &[[f32; 3]],
        indices: &[u32],
    ) -> EngineResult<()>;

    /// Downsample the level chain and copy it into the atlas
    fn finish_hierarchy(&mut self, hierarchy: &mut Self::Hierarchy) -> EngineResult<()>;

    /// Clear the results grid, draw every batch in order and read the grid
    /// back into `grid`. Later batches overwrite earlier ones.
    fn run_queries(
        &mut self,
        layout: SlotLayout,
        grid: &mut ResultsGrid,
        batches: &[QueryBatch<'_, Self::Hierarchy>],
    ) -> EngineResult<()>;

    /// Draw a diagnostic view of `hierarchy` into `canvas`
    fn visualize(
        &mut self,
        hierarchy: &Self::Hierarchy,
        view: &ViewUniform,
        mode: &VisualizationMode,
        canvas: &mut Self::Canvas,
    ) -> EngineResult<()>;
}
