//! Hierarchical-Z occlusion engine
//!
//! `render` rasterizes the frame's occluders into the camera hierarchy (and,
//! with a shadow-casting light, into the light hierarchy). `query` then tests
//! every candidate against those hierarchies in at most two query draws and
//! one readback, nulling culled entries and annotating survivors.

use super::backend::{HierarchyTarget, OcclusionBackend, QueryBatch, VisualizationMode, VisualizationRequest};
use super::occluders::{self, CustomOccluderRenderer, Occludee, Occluder, OccluderMesh, OccluderSink, OcclusionProxy};
use super::query_data::{QueryPass, QueryUniform, QueryVertex, ViewUniform};
use super::query_slots::{pack_pass, ResultsGrid};
use super::shadow_frustum::{fit_shadow_frustum, ShadowFrustum};
use super::stats::OcclusionStats;
use crate::camera::{perspective_depth_view, DepthView};
use crate::config::OcclusionConfig;
use crate::constants::query::RESULTS_GRID_WIDTH;
use crate::error::{EngineError, EngineResult, OptionExt};
use crate::math::{aabb_clamped, aabb_is_empty, aabb_is_unbounded, AABB};
use crate::renderer::render_batch::RenderBatch;
use crate::scene::{DirectionalLight, FrameContext};
use cgmath::Vector3;
use rayon::prelude::*;

/// Hierarchies of the last successful `render`
#[derive(Debug, Clone, Copy)]
struct RenderedFrame {
    camera: DepthView,
    camera_uniform: ViewUniform,
    light: Option<LightFrame>,
}

#[derive(Debug, Clone, Copy)]
struct LightFrame {
    frustum: ShadowFrustum,
    uniform: ViewUniform,
}

/// Forwards custom-renderer meshes into the shared occluder batch
struct BatchSink<'s, B: OcclusionBackend> {
    backend: &'s mut B,
    hierarchy: &'s mut B::Hierarchy,
    batch: &'s mut RenderBatch,
    view: &'s DepthView,
}

impl<'s, B: OcclusionBackend> BatchSink<'s, B> {
    fn finish(self) -> EngineResult<()> {
        let BatchSink {
            backend,
            hierarchy,
            batch,
            view,
        } = self;
        batch.flush(&mut |positions: &[[f32; 3]], indices: &[u32]| -> EngineResult<()> {
            backend.draw_occluders(hierarchy, view, positions, indices)
        })
    }
}

impl<'s, B: OcclusionBackend> OccluderSink for BatchSink<'s, B> {
    fn draw_mesh(&mut self, mesh: OccluderMesh<'_>) -> EngineResult<()> {
        let BatchSink {
            backend,
            hierarchy,
            batch,
            view,
        } = self;
        batch.append(
            mesh.positions,
            mesh.indices,
            &mut |positions: &[[f32; 3]], indices: &[u32]| -> EngineResult<()> {
                backend.draw_occluders(hierarchy, view, positions, indices)
            },
        )
    }
}

/// Occlusion culling engine over one backend
pub struct OcclusionBuffer<B: OcclusionBackend> {
    backend: B,
    config: OcclusionConfig,

    camera_hierarchy: B::Hierarchy,
    light_hierarchy: Option<B::Hierarchy>,

    batch: RenderBatch,
    grid: ResultsGrid,
    frame: Option<RenderedFrame>,
    stats: OcclusionStats,

    // Per-query scratch, capacity kept between calls
    regular_records: Vec<QueryVertex>,
    shadow_records: Vec<QueryVertex>,
    regular_vertices: Vec<QueryVertex>,
    shadow_vertices: Vec<QueryVertex>,
    regular_owners: Vec<usize>,
    shadow_owners: Vec<usize>,
    culled_now: Vec<usize>,
    shadow_culled_now: Vec<usize>,
}

impl<B: OcclusionBackend> OcclusionBuffer<B> {
    pub fn new(mut backend: B, config: OcclusionConfig) -> EngineResult<Self> {
        config.validate()?;

        let camera_hierarchy = backend.create_hierarchy("camera_hzb", config.width, config.height)?;
        let light_hierarchy = if config.shadow_culling {
            Some(backend.create_hierarchy("light_hzb", config.light_width, config.light_height)?)
        } else {
            None
        };

        log::info!(
            "[OcclusionBuffer::new] {} backend, camera {}x{} ({} levels), light {}, {:?} slots, {:?} shadow volumes",
            backend.name(),
            config.width,
            config.height,
            backend.hierarchy_layout(&camera_hierarchy).level_count(),
            if config.shadow_culling {
                format!("{}x{}", config.light_width, config.light_height)
            } else {
                "disabled".to_string()
            },
            config.slot_layout,
            config.shadow_volume
        );

        Ok(Self {
            batch: RenderBatch::new(config.batch_max_primitives),
            grid: ResultsGrid::new(config.initial_result_rows),
            backend,
            config,
            camera_hierarchy,
            light_hierarchy,
            frame: None,
            stats: OcclusionStats::default(),
            regular_records: Vec::new(),
            shadow_records: Vec::new(),
            regular_vertices: Vec::new(),
            shadow_vertices: Vec::new(),
            regular_owners: Vec::new(),
            shadow_owners: Vec::new(),
            culled_now: Vec::new(),
            shadow_culled_now: Vec::new(),
        })
    }

    pub fn config(&self) -> &OcclusionConfig {
        &self.config
    }

    /// Counters of the last `render` / `query`
    pub fn stats(&self) -> OcclusionStats {
        self.stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn camera_hierarchy(&self) -> &B::Hierarchy {
        &self.camera_hierarchy
    }

    pub fn light_hierarchy(&self) -> Option<&B::Hierarchy> {
        self.light_hierarchy.as_ref()
    }

    /// True once `render` has succeeded and `query` may be called
    pub fn is_rendered(&self) -> bool {
        self.frame.is_some()
    }

    /// True when the last `render` also built the light hierarchy
    pub fn has_light_frame(&self) -> bool {
        self.frame.map_or(false, |f| f.light.is_some())
    }

    /// Fitted light frustum of the last `render`
    pub fn shadow_frustum(&self) -> Option<ShadowFrustum> {
        self.frame.and_then(|f| f.light).map(|l| l.frustum)
    }

    /// Current results grid size (width, height)
    pub fn results_dimensions(&self) -> [u32; 2] {
        self.grid.dimensions()
    }

    /// Forget the rendered hierarchies; `query` fails until the next `render`
    pub fn invalidate(&mut self) {
        self.frame = None;
    }

    /// Build the camera hierarchy and, when `light` casts cascaded shadows and
    /// shadow culling is enabled, the light hierarchy.
    pub fn render<N: ?Sized>(
        &mut self,
        occluders: &mut [Occluder<'_, N>],
        light: Option<&DirectionalLight>,
        custom: Option<&dyn CustomOccluderRenderer<N>>,
        context: &FrameContext,
    ) -> EngineResult<()> {
        let _span = tracing::trace_span!("occlusion_render", occluders = occluders.len()).entered();

        let camera = context.camera.ok_or_engine(|| EngineError::MissingCamera {
            operation: "render".to_string(),
        })?;

        let shadow = match light {
            Some(light) if self.config.shadow_culling => {
                let descriptor = light.shadow.as_ref().ok_or_else(|| EngineError::MissingShadowDescriptor {
                    light: light.name.clone(),
                })?;
                Some((light, descriptor))
            }
            Some(light) => {
                log::debug!(
                    "[OcclusionBuffer::render] Shadow culling disabled, ignoring light '{}'",
                    light.name
                );
                None
            }
            None => None,
        };

        self.frame = None;

        let mut proxies: Vec<&mut dyn OcclusionProxy> = Vec::new();
        let mut renderables: Vec<&N> = Vec::new();
        for occluder in occluders.iter_mut() {
            match occluder {
                Occluder::Proxy(proxy) => proxies.push(&mut **proxy),
                Occluder::Renderable(node) => renderables.push(*node),
            }
        }

        let camera_view = perspective_depth_view(&camera);
        let light_frustum = shadow.map(|(light, descriptor)| fit_shadow_frustum(&camera, light.direction, descriptor));

        let accepted: Vec<&N> = match custom {
            Some(renderer) => renderables
                .iter()
                .copied()
                .filter(|node| renderer.can_render(node, context))
                .collect(),
            None => {
                if !renderables.is_empty() {
                    log::debug!(
                        "[OcclusionBuffer::render] No custom renderer, skipping {} renderable occluders",
                        renderables.len()
                    );
                }
                Vec::new()
            }
        };

        self.batch.reset_counters();

        // Clearing and custom geometry do not depend on proxy geometry, so
        // they overlap the worker pre-pass.
        if self.config.multithreaded_occluder_update {
            let proxies_ref = &mut proxies;
            rayon::in_place_scope(|scope| {
                scope.spawn(move |_| {
                    let _span = tracing::trace_span!("occluder_update").entered();
                    proxies_ref.par_iter_mut().for_each(|proxy| proxy.update_occluder());
                });
                self.begin_hierarchies(&camera_view, light_frustum.as_ref(), &accepted, custom, context)
            })?;
        } else {
            for proxy in proxies.iter_mut() {
                proxy.update_occluder();
            }
            self.begin_hierarchies(&camera_view, light_frustum.as_ref(), &accepted, custom, context)?;
        }

        let proxy_count = {
            let _span = tracing::trace_span!("occluder_draw").entered();
            let drawn = draw_proxies(
                &mut self.backend,
                &mut self.camera_hierarchy,
                &mut self.batch,
                &camera_view,
                &proxies,
            )?;
            self.backend.finish_hierarchy(&mut self.camera_hierarchy)?;

            if let (Some(frustum), Some(hierarchy)) = (light_frustum.as_ref(), self.light_hierarchy.as_mut()) {
                draw_proxies(&mut self.backend, hierarchy, &mut self.batch, &frustum.view, &proxies)?;
                self.backend.finish_hierarchy(hierarchy)?;
            }
            drawn
        };

        let camera_uniform = ViewUniform::new(&camera_view, self.backend.hierarchy_layout(&self.camera_hierarchy));
        let light_frame = match (light_frustum, self.light_hierarchy.as_ref()) {
            (Some(frustum), Some(hierarchy)) => Some(LightFrame {
                uniform: ViewUniform::new(&frustum.view, self.backend.hierarchy_layout(hierarchy)),
                frustum,
            }),
            _ => None,
        };

        self.frame = Some(RenderedFrame {
            camera: camera_view,
            camera_uniform,
            light: light_frame,
        });
        self.stats.occluders = proxy_count + accepted.len() as u32;

        log::debug!(
            "[OcclusionBuffer::render] {} occluders ({} proxies, {} custom), {} draws, {} triangles, light hierarchy {}",
            self.stats.occluders,
            proxy_count,
            accepted.len(),
            self.batch.draw_calls(),
            self.batch.triangles_submitted(),
            if light_frame.is_some() { "built" } else { "skipped" }
        );
        Ok(())
    }

    /// Clear both hierarchies and draw custom occluders into them
    fn begin_hierarchies<N: ?Sized>(
        &mut self,
        camera_view: &DepthView,
        light: Option<&ShadowFrustum>,
        accepted: &[&N],
        custom: Option<&dyn CustomOccluderRenderer<N>>,
        context: &FrameContext,
    ) -> EngineResult<()> {
        self.backend.begin_hierarchy(&mut self.camera_hierarchy, camera_view)?;
        if let Some(renderer) = custom.filter(|_| !accepted.is_empty()) {
            let mut sink = BatchSink {
                backend: &mut self.backend,
                hierarchy: &mut self.camera_hierarchy,
                batch: &mut self.batch,
                view: camera_view,
            };
            renderer.render(accepted, context, &mut sink)?;
            sink.finish()?;
        }

        if let (Some(frustum), Some(hierarchy)) = (light, self.light_hierarchy.as_mut()) {
            self.backend.begin_hierarchy(hierarchy, &frustum.view)?;
            if let Some(renderer) = custom.filter(|_| !accepted.is_empty()) {
                let mut sink = BatchSink {
                    backend: &mut self.backend,
                    hierarchy,
                    batch: &mut self.batch,
                    view: &frustum.view,
                };
                renderer.render(accepted, context, &mut sink)?;
                sink.finish()?;
            }
        }
        Ok(())
    }

    /// Test every candidate against the hierarchies of the last `render`.
    ///
    /// Culled entries become `None`; visible ones receive their view-normalized
    /// distance through `set_sort_distance`. With a light hierarchy, shadow
    /// casters also get `set_shadow_culled`.
    pub fn query<T: Occludee>(&mut self, candidates: &mut [Option<T>], context: &FrameContext) -> EngineResult<()> {
        let _span = tracing::trace_span!("occlusion_query", candidates = candidates.len()).entered();

        let frame = self.frame.ok_or_else(|| EngineError::StateError {
            expected: "render() before query()".to_string(),
            actual: "no hierarchy rendered".to_string(),
        })?;
        let camera = context.camera.ok_or_engine(|| EngineError::MissingCamera {
            operation: "query".to_string(),
        })?;
        let lod_position = context.distance_camera().unwrap_or(&camera).position;

        let mut stats = OcclusionStats {
            occluders: self.stats.occluders,
            ..Default::default()
        };
        self.regular_records.clear();
        self.shadow_records.clear();
        self.regular_vertices.clear();
        self.shadow_vertices.clear();
        self.regular_owners.clear();
        self.shadow_owners.clear();
        self.culled_now.clear();
        self.shadow_culled_now.clear();

        for (index, candidate) in candidates.iter().enumerate() {
            let Some(candidate) = candidate else {
                continue;
            };
            stats.objects_total += 1;
            let casts = frame.light.is_some() && candidate.casts_shadows();
            if casts {
                stats.shadow_casters_total += 1;
            }

            let bounds = candidate.bounds();
            if aabb_is_empty(&bounds) {
                self.culled_now.push(index);
                if casts {
                    self.shadow_culled_now.push(index);
                }
                continue;
            }

            let record = |clamp: &AABB| -> Option<QueryVertex> {
                let bounds = if aabb_is_unbounded(&bounds) {
                    aabb_clamped(&bounds, clamp)
                } else {
                    bounds
                };
                (!aabb_is_empty(&bounds)).then(|| {
                    QueryVertex::new(
                        [0, 0],
                        &bounds,
                        candidate.world_position(),
                        candidate.world_scale(),
                        candidate.max_distance(),
                    )
                })
            };

            match record(&frame.camera.bounds) {
                Some(vertex) => {
                    self.regular_records.push(vertex);
                    self.regular_owners.push(index);
                }
                None => self.culled_now.push(index),
            }

            if let (true, Some(light)) = (casts, frame.light.as_ref()) {
                match record(&light.frustum.view.bounds) {
                    Some(vertex) => {
                        self.shadow_records.push(vertex);
                        self.shadow_owners.push(index);
                    }
                    None => self.shadow_culled_now.push(index),
                }
            }
        }

        let layout = self.config.slot_layout;
        let regular_slots = pack_pass(
            layout,
            0,
            RESULTS_GRID_WIDTH,
            self.regular_records.drain(..),
            &mut self.regular_vertices,
        );
        let shadow_slots = pack_pass(
            layout,
            regular_slots,
            RESULTS_GRID_WIDTH,
            self.shadow_records.drain(..),
            &mut self.shadow_vertices,
        );

        let previous_rows = self.grid.height();
        if self.grid.ensure_capacity(regular_slots + shadow_slots)? {
            log::warn!(
                "[OcclusionBuffer::query] Results grid grew from {} to {} rows for {} slots",
                previous_rows,
                self.grid.height(),
                regular_slots + shadow_slots
            );
        }

        if regular_slots + shadow_slots > 0 {
            let _span = tracing::trace_span!("query_draw").entered();
            let distance_scale = self.config.distance_culling_scale;
            let dimensions = self.grid.dimensions();

            let mut batches = Vec::with_capacity(2);
            if !self.regular_vertices.is_empty() {
                batches.push(QueryBatch {
                    pass: QueryPass::Regular,
                    uniform: QueryUniform::regular(&frame.camera_uniform, lod_position, distance_scale, dimensions),
                    vertices: &self.regular_vertices,
                    primary: &self.camera_hierarchy,
                    secondary: &self.camera_hierarchy,
                });
            }
            if let (Some(light), Some(light_hierarchy)) = (frame.light.as_ref(), self.light_hierarchy.as_ref()) {
                if !self.shadow_vertices.is_empty() {
                    batches.push(QueryBatch {
                        pass: QueryPass::for_shadow(self.config.shadow_volume),
                        uniform: QueryUniform::shadow(
                            &light.uniform,
                            &frame.camera_uniform,
                            light.frustum.direction,
                            &frame.camera.bounds,
                            lod_position,
                            distance_scale,
                            dimensions,
                        ),
                        vertices: &self.shadow_vertices,
                        primary: light_hierarchy,
                        secondary: &self.camera_hierarchy,
                    });
                }
            }
            self.backend.run_queries(layout, &mut self.grid, &batches)?;
        }

        // Shadow results first; the regular pass owns the final sort distance
        for (vertex, &index) in self.shadow_vertices.iter().zip(&self.shadow_owners) {
            let value = self.grid.value(vertex.slot);
            if let Some(candidate) = candidates[index].as_mut() {
                if value < 0.0 {
                    candidate.set_shadow_culled(true);
                    stats.shadow_casters_culled += 1;
                } else {
                    candidate.set_shadow_culled(false);
                    candidate.set_sort_distance(value);
                }
            }
        }
        for &index in &self.shadow_culled_now {
            if let Some(candidate) = candidates[index].as_mut() {
                candidate.set_shadow_culled(true);
                stats.shadow_casters_culled += 1;
            }
        }

        for (vertex, &index) in self.regular_vertices.iter().zip(&self.regular_owners) {
            let value = self.grid.value(vertex.slot);
            if value < 0.0 {
                candidates[index] = None;
                stats.objects_culled += 1;
            } else if let Some(candidate) = candidates[index].as_mut() {
                candidate.set_sort_distance(value);
            }
        }
        for &index in &self.culled_now {
            candidates[index] = None;
            stats.objects_culled += 1;
        }

        self.stats = stats;
        log::debug!("[OcclusionBuffer::query] {}", stats);
        Ok(())
    }

    /// Clear the shadow-culled flag of every shadow caster in `nodes`
    pub fn reset_shadow_casters<T: Occludee>(&self, nodes: &mut [T]) -> usize {
        let reset = occluders::reset_shadow_casters(nodes);
        log::debug!("[OcclusionBuffer::reset_shadow_casters] Reset {} shadow casters", reset);
        reset
    }

    /// Draw a diagnostic view of one hierarchy. Culling state is untouched.
    pub fn visualize(&mut self, request: &VisualizationRequest, canvas: &mut B::Canvas) -> EngineResult<()> {
        let frame = self.frame.ok_or_else(|| EngineError::StateError {
            expected: "render() before visualize()".to_string(),
            actual: "no hierarchy rendered".to_string(),
        })?;

        let (hierarchy, view) = match request.target {
            HierarchyTarget::Camera => (&self.camera_hierarchy, frame.camera_uniform),
            HierarchyTarget::Light => match (frame.light, self.light_hierarchy.as_ref()) {
                (Some(light), Some(hierarchy)) => (hierarchy, light.uniform),
                _ => {
                    return Err(EngineError::StateError {
                        expected: "light hierarchy".to_string(),
                        actual: "last render had no shadow-casting light".to_string(),
                    })
                }
            },
        };

        let mut mode = request.mode;
        if let VisualizationMode::LevelDepth { level } = &mut mode {
            let last = view.level_count().saturating_sub(1);
            if *level > last {
                log::warn!(
                    "[OcclusionBuffer::visualize] Level {} out of range, showing level {}",
                    level,
                    last
                );
                *level = last;
            }
        }

        self.backend.visualize(hierarchy, &view, &mode, canvas)
    }

    /// World-space bounds of the camera view of the last `render`
    pub fn camera_bounds(&self) -> Option<AABB> {
        self.frame.map(|f| f.camera.bounds)
    }

    /// Direction of the light the last light hierarchy was built for
    pub fn light_direction(&self) -> Option<Vector3<f32>> {
        self.shadow_frustum().map(|f| f.direction)
    }
}

#[cfg(test)]
impl<B: OcclusionBackend> OcclusionBuffer<B> {
    /// Capacity of the regular pass record and vertex scratch
    pub(crate) fn scratch_capacity(&self) -> [usize; 2] {
        [self.regular_records.capacity(), self.regular_vertices.capacity()]
    }
}

/// Draw every proxy occluder through the batch, returns how many had geometry
fn draw_proxies<B: OcclusionBackend>(
    backend: &mut B,
    hierarchy: &mut B::Hierarchy,
    batch: &mut RenderBatch,
    view: &DepthView,
    proxies: &[&mut dyn OcclusionProxy],
) -> EngineResult<u32> {
    let mut flush = |positions: &[[f32; 3]], indices: &[u32]| -> EngineResult<()> {
        backend.draw_occluders(hierarchy, view, positions, indices)
    };

    let mut drawn = 0;
    for proxy in proxies.iter().filter(|p| p.has_occluder()) {
        let mesh = proxy.occluder();
        batch.append(mesh.positions, mesh.indices, &mut flush)?;
        drawn += 1;
    }
    batch.flush(&mut flush)?;
    Ok(drawn)
}

