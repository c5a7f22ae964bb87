//! Per-frame inputs supplied by the scene layer
//!
//! The occlusion engine does not own a scene graph. Each frame the caller
//! hands it a `FrameContext` (camera, optional LOD camera) and, when shadow
//! caster culling is wanted, the active directional light.

use crate::camera::CameraData;
use cgmath::{InnerSpace, Vector3};

/// Render context for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameContext {
    /// Camera the frame is rendered from. Required by `render` and `query`.
    pub camera: Option<CameraData>,

    /// Camera used for distance culling; falls back to `camera`
    pub lod_camera: Option<CameraData>,
}

impl FrameContext {
    pub fn with_camera(camera: CameraData) -> Self {
        Self {
            camera: Some(camera),
            lod_camera: None,
        }
    }

    /// Camera distance culling measures from
    pub fn distance_camera(&self) -> Option<&CameraData> {
        self.lod_camera.as_ref().or(self.camera.as_ref())
    }
}

/// Cascaded shadow map settings of a directional light
#[derive(Debug, Clone, PartialEq)]
pub struct CascadedShadowDescriptor {
    pub cascade_count: u32,

    /// Far distance of every cascade, ascending
    pub cascade_distances: Vec<f32>,

    /// How far the light frustum's near plane is pulled back behind the
    /// camera frustum's bounding sphere, to catch casters just outside it
    pub min_light_distance: f32,
}

impl CascadedShadowDescriptor {
    /// Distance covered by the last cascade
    pub fn max_distance(&self) -> Option<f32> {
        let used = (self.cascade_count as usize).min(self.cascade_distances.len());
        self.cascade_distances[..used].last().copied()
    }
}

/// Directional light node
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalLight {
    pub name: String,

    /// Direction the light travels, world space
    pub direction: Vector3<f32>,

    /// Present when the light casts cascaded shadows
    pub shadow: Option<CascadedShadowDescriptor>,
}

impl DirectionalLight {
    pub fn new(name: impl Into<String>, direction: Vector3<f32>) -> Self {
        Self {
            name: name.into(),
            direction: direction.normalize(),
            shadow: None,
        }
    }

    pub fn with_shadow(mut self, shadow: CascadedShadowDescriptor) -> Self {
        self.shadow = Some(shadow);
        self
    }
}
