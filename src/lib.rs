// Hearth Occlusion - Hierarchical-Z occlusion culling
//
// Each frame the scene renders its occluders into a small depth hierarchy
// from the camera (and from the shadow-casting light), then queries every
// candidate's bounding box against it in one batched draw with a single
// readback. Culled candidates are removed from the caller's list; visible
// ones receive a view-normalized sort distance.
//
// - OcclusionBuffer<B> drives a frame: render() then query()
// - SoftwareBackend evaluates everything on the CPU (tests, headless tools)
// - WgpuBackend runs the same rules as WGSL programs

// Constants module
pub mod constants;

// Core modules
pub mod config;
pub mod error;

// Scene inputs
pub mod camera;
pub mod math;
pub mod scene;

// Occlusion engine
pub mod renderer;

pub use camera::{CameraData, DepthView};
pub use config::{ConfigError, OcclusionConfig};
pub use error::{EngineError, EngineResult, OptionExt};
pub use math::AABB;
pub use renderer::gpu_culling::{
    reset_shadow_casters, CustomOccluderRenderer, GpuOcclusionBuffer, HierarchyTarget,
    OcclusionBackend, OcclusionBuffer, OcclusionProxy, OcclusionStats, Occludee, Occluder,
    OccluderMesh, OccluderSink, QueryPass, ShadowVolumeEstimate, SlotLayout, SoftwareBackend,
    SoftwareOcclusionBuffer, VisualizationMode, VisualizationRequest, WgpuBackend, WgpuCanvas,
};
pub use scene::{CascadedShadowDescriptor, DirectionalLight, FrameContext};

// Re-export wgpu so callers share the backend's version
pub use wgpu;
