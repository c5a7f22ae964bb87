/// Hierarchical Z-Buffer Occlusion Culling
///
/// Rasterizes occluders into a camera depth hierarchy (and optionally a
/// light hierarchy), then tests candidate bounding boxes against it and
/// writes one distance or culled flag per candidate back to the scene.
///
/// The engine is generic over `OcclusionBackend`: `SoftwareBackend` runs
/// everything on the CPU, `WgpuBackend` renders the hierarchies and queries
/// with WGSL programs. Both evaluate the same rules in query_operations.rs.
pub mod backend;
pub mod depth_hierarchy;
pub mod hzb_layout;
pub mod occluders;
pub mod occlusion_buffer;
pub mod query_data;
pub mod query_operations;
pub mod query_slots;
pub mod rasterizer;
pub mod shadow_frustum;
pub mod software_backend;
pub mod stats;
pub mod wgpu_backend;

#[cfg(test)]
mod tests;

pub use backend::{HierarchyTarget, OcclusionBackend, QueryBatch, VisualizationMode, VisualizationRequest};
pub use depth_hierarchy::{DepthHierarchy, HierarchySampler};
pub use hzb_layout::{HierarchyLayout, LevelRect};
pub use occluders::{
    reset_shadow_casters, CustomOccluderRenderer, Occludee, Occluder, OccluderMesh, OccluderSink,
    OcclusionProxy,
};
pub use occlusion_buffer::OcclusionBuffer;
pub use query_data::{QueryPass, QueryUniform, QueryVertex, ShadowVolumeEstimate, ViewUniform};
pub use query_slots::{ResultsGrid, SlotLayout};
pub use shadow_frustum::{fit_shadow_frustum, ShadowFrustum};
pub use software_backend::SoftwareBackend;
pub use stats::OcclusionStats;
pub use wgpu_backend::{GpuDepthHierarchy, WgpuBackend, WgpuCanvas};

/// CPU occlusion engine
pub type SoftwareOcclusionBuffer = OcclusionBuffer<SoftwareBackend>;

/// GPU occlusion engine
pub type GpuOcclusionBuffer = OcclusionBuffer<WgpuBackend>;
