//! Renderer Module
//!
//! Occluder batching, renderer error helpers and the hierarchical-Z
//! occlusion culling engine.

pub mod error;
pub mod gpu_culling;
pub mod render_batch;

pub use gpu_culling::{
    GpuOcclusionBuffer, OcclusionBackend, OcclusionBuffer, OcclusionStats, SoftwareBackend,
    SoftwareOcclusionBuffer, WgpuBackend,
};
pub use render_batch::RenderBatch;
