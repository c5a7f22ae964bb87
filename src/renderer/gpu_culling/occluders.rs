//! Occluder and candidate capabilities
//!
//! The engine talks to scene nodes only through these traits. Occluders are
//! resolved once per `render` call into the closed `Occluder` enum; candidates
//! are anything implementing `Occludee`.

use crate::error::EngineResult;
use crate::math::AABB;
use crate::scene::FrameContext;
use cgmath::{Point3, Vector3};

/// Triangle soup used to rasterize occlusion, world space
#[derive(Debug, Clone, Copy)]
pub struct OccluderMesh<'a> {
    pub positions: &'a [[f32; 3]],
    pub indices: &'a [u32],
}

/// Scene node carrying its own occluder geometry
///
/// `update_occluder` may run on a worker thread and must not touch GPU
/// resources.
pub trait OcclusionProxy: Send {
    fn has_occluder(&self) -> bool;

    fn occluder(&self) -> OccluderMesh<'_>;

    /// Refresh cached geometry (animation, transforms)
    fn update_occluder(&mut self);
}

/// Receives depth-only geometry from a custom renderer
pub trait OccluderSink {
    fn draw_mesh(&mut self, mesh: OccluderMesh<'_>) -> EngineResult<()>;
}

/// Pluggable renderer for scene nodes without an `OcclusionProxy`
pub trait CustomOccluderRenderer<N: ?Sized> {
    fn can_render(&self, node: &N, context: &FrameContext) -> bool;

    /// Rasterize depth for every accepted node. No colour output is needed.
    fn render(
        &self,
        nodes: &[&N],
        context: &FrameContext,
        sink: &mut dyn OccluderSink,
    ) -> EngineResult<()>;
}

/// One occluder of a `render` call
pub enum Occluder<'a, N: ?Sized> {
    Proxy(&'a mut dyn OcclusionProxy),
    Renderable(&'a N),
}

/// A candidate of `query`
pub trait Occludee {
    /// World-space bounds; may be unbounded on any axis
    fn bounds(&self) -> AABB;

    fn world_position(&self) -> Point3<f32>;

    fn world_scale(&self) -> Vector3<f32>;

    /// Draw distance limit before world scale and the distance culling scale
    fn max_distance(&self) -> Option<f32> {
        None
    }

    fn casts_shadows(&self) -> bool {
        false
    }

    /// Sort / LOD metric of a visible candidate
    fn set_sort_distance(&mut self, distance: f32);

    /// Persistent flag a shadow map pass reads to skip culled casters
    fn set_shadow_culled(&mut self, culled: bool);
}

impl<T: Occludee + ?Sized> Occludee for &mut T {
    fn bounds(&self) -> AABB {
        (**self).bounds()
    }

    fn world_position(&self) -> Point3<f32> {
        (**self).world_position()
    }

    fn world_scale(&self) -> Vector3<f32> {
        (**self).world_scale()
    }

    fn max_distance(&self) -> Option<f32> {
        (**self).max_distance()
    }

    fn casts_shadows(&self) -> bool {
        (**self).casts_shadows()
    }

    fn set_sort_distance(&mut self, distance: f32) {
        (**self).set_sort_distance(distance)
    }

    fn set_shadow_culled(&mut self, culled: bool) {
        (**self).set_shadow_culled(culled)
    }
}

/// Clear the shadow-culled flag of every shadow caster
pub fn reset_shadow_casters<T: Occludee>(nodes: &mut [T]) -> usize {
    let mut reset = 0;
    for node in nodes.iter_mut().filter(|n| n.casts_shadows()) {
        node.set_shadow_culled(false);
        reset += 1;
    }
    reset
}
