//! Engine tests on the software backend

use super::*;
use crate::camera::{init_camera, CameraData};
use crate::config::OcclusionConfig;
use crate::error::{EngineError, EngineResult};
use crate::math::{create_aabb, AABB};
use crate::scene::{CascadedShadowDescriptor, DirectionalLight, FrameContext};
use cgmath::{Point3, Vector3};
use image::RgbaImage;

const WALL_POSITIONS: [[f32; 3]; 4] = [
    [-40.0, -40.0, -20.0],
    [40.0, -40.0, -20.0],
    [40.0, 40.0, -20.0],
    [-40.0, 40.0, -20.0],
];
const WALL_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

struct WallProxy {
    updates: u32,
}

impl OcclusionProxy for WallProxy {
    fn has_occluder(&self) -> bool {
        true
    }

    fn occluder(&self) -> OccluderMesh<'_> {
        OccluderMesh {
            positions: &WALL_POSITIONS,
            indices: &WALL_INDICES,
        }
    }

    fn update_occluder(&mut self) {
        self.updates += 1;
    }
}

/// Single quad occluder anywhere in the scene
struct QuadProxy {
    positions: [[f32; 3]; 4],
}

impl OcclusionProxy for QuadProxy {
    fn has_occluder(&self) -> bool {
        true
    }

    fn occluder(&self) -> OccluderMesh<'_> {
        OccluderMesh {
            positions: &self.positions,
            indices: &WALL_INDICES,
        }
    }

    fn update_occluder(&mut self) {}
}

/// Scene node the custom renderer knows how to draw
struct WallNode {
    depth_only: bool,
}

struct WallRenderer;

impl CustomOccluderRenderer<WallNode> for WallRenderer {
    fn can_render(&self, node: &WallNode, _context: &FrameContext) -> bool {
        node.depth_only
    }

    fn render(&self, nodes: &[&WallNode], _context: &FrameContext, sink: &mut dyn OccluderSink) -> EngineResult<()> {
        for _ in nodes {
            sink.draw_mesh(OccluderMesh {
                positions: &WALL_POSITIONS,
                indices: &WALL_INDICES,
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct TestNode {
    bounds: AABB,
    max_distance: Option<f32>,
    casts: bool,
    sort_distance: Option<f32>,
    shadow_culled: bool,
}

impl TestNode {
    fn cube(center: [f32; 3], half: f32) -> Self {
        Self {
            bounds: create_aabb(
                Point3::new(center[0] - half, center[1] - half, center[2] - half),
                Point3::new(center[0] + half, center[1] + half, center[2] + half),
            ),
            max_distance: None,
            casts: false,
            sort_distance: None,
            shadow_culled: false,
        }
    }
}

impl Occludee for TestNode {
    fn bounds(&self) -> AABB {
        self.bounds
    }

    fn world_position(&self) -> Point3<f32> {
        Point3::new(
            (self.bounds.min.x + self.bounds.max.x) * 0.5,
            (self.bounds.min.y + self.bounds.max.y) * 0.5,
            (self.bounds.min.z + self.bounds.max.z) * 0.5,
        )
    }

    fn world_scale(&self) -> Vector3<f32> {
        Vector3::new(1.0, 1.0, 1.0)
    }

    fn max_distance(&self) -> Option<f32> {
        self.max_distance
    }

    fn casts_shadows(&self) -> bool {
        self.casts
    }

    fn set_sort_distance(&mut self, distance: f32) {
        self.sort_distance = Some(distance);
    }

    fn set_shadow_culled(&mut self, culled: bool) {
        self.shadow_culled = culled;
    }
}

fn test_config() -> OcclusionConfig {
    OcclusionConfig {
        width: 128,
        height: 64,
        light_width: 64,
        light_height: 64,
        initial_result_rows: 1,
        ..Default::default()
    }
}

fn test_camera() -> CameraData {
    CameraData {
        aspect_ratio: 2.0,
        far_plane: 100.0,
        ..init_camera(Point3::new(0.0, 0.0, 0.0), -std::f32::consts::FRAC_PI_2, 0.0)
    }
}

fn test_light() -> DirectionalLight {
    DirectionalLight::new("sun", Vector3::new(0.2, -1.0, -0.2)).with_shadow(CascadedShadowDescriptor {
        cascade_count: 2,
        cascade_distances: vec![20.0, 60.0],
        min_light_distance: 10.0,
    })
}

fn engine(config: OcclusionConfig) -> SoftwareOcclusionBuffer {
    OcclusionBuffer::new(SoftwareBackend::new(), config).expect("engine")
}

fn render_wall(engine: &mut SoftwareOcclusionBuffer, light: Option<&DirectionalLight>) -> EngineResult<WallProxy> {
    let mut wall = WallProxy { updates: 0 };
    {
        let mut occluders: Vec<Occluder<'_, WallNode>> = vec![Occluder::Proxy(&mut wall)];
        engine.render(
            &mut occluders,
            light,
            None,
            &FrameContext::with_camera(test_camera()),
        )?;
    }
    Ok(wall)
}

fn render_quad(
    engine: &mut SoftwareOcclusionBuffer,
    positions: [[f32; 3]; 4],
    light: Option<&DirectionalLight>,
) -> EngineResult<()> {
    let mut quad = QuadProxy { positions };
    let mut occluders: Vec<Occluder<'_, WallNode>> = vec![Occluder::Proxy(&mut quad)];
    engine.render(
        &mut occluders,
        light,
        None,
        &FrameContext::with_camera(test_camera()),
    )
}

fn survivors(candidates: &[Option<&mut TestNode>]) -> Vec<bool> {
    candidates.iter().map(Option::is_some).collect()
}

#[test]
fn test_render_requires_camera() {
    let mut engine = engine(test_config());
    let mut occluders: Vec<Occluder<'_, WallNode>> = Vec::new();
    match engine.render(&mut occluders, None, None, &FrameContext::default()) {
        Err(EngineError::MissingCamera { operation }) => assert_eq!(operation, "render"),
        other => panic!("expected MissingCamera, got {:?}", other),
    }
    assert!(!engine.is_rendered());
}

#[test]
fn test_query_before_render_fails() {
    let mut engine = engine(test_config());
    let mut node = TestNode::cube([0.0, 0.0, -10.0], 1.0);
    let mut candidates = vec![Some(&mut node)];
    let result = engine.query(&mut candidates, &FrameContext::with_camera(test_camera()));
    assert!(matches!(result, Err(EngineError::StateError { .. })));
    assert!(candidates[0].is_some());
}

#[test]
fn test_query_requires_camera() -> EngineResult<()> {
    let mut engine = engine(test_config());
    render_wall(&mut engine, None)?;
    let mut candidates: Vec<Option<TestNode>> = vec![Some(TestNode::cube([0.0, 0.0, -10.0], 1.0))];
    let result = engine.query(&mut candidates, &FrameContext::default());
    assert!(matches!(result, Err(EngineError::MissingCamera { .. })));
    Ok(())
}

#[test]
fn test_shadow_culling_requires_descriptor() {
    let mut engine = engine(test_config());
    let bare = DirectionalLight::new("moon", Vector3::new(0.0, -1.0, 0.0));
    match render_wall(&mut engine, Some(&bare)) {
        Err(EngineError::MissingShadowDescriptor { light }) => assert_eq!(light, "moon"),
        other => panic!("expected MissingShadowDescriptor, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_light_ignored_without_shadow_culling() -> EngineResult<()> {
    let mut engine = engine(OcclusionConfig {
        shadow_culling: false,
        ..test_config()
    });
    let bare = DirectionalLight::new("moon", Vector3::new(0.0, -1.0, 0.0));
    render_wall(&mut engine, Some(&bare))?;
    assert!(engine.is_rendered());
    assert!(!engine.has_light_frame());
    assert!(engine.light_hierarchy().is_none());
    Ok(())
}

#[test]
fn test_wall_occludes_candidates_behind_it() -> EngineResult<()> {
    let mut engine = engine(test_config());
    let wall = render_wall(&mut engine, None)?;
    assert_eq!(wall.updates, 1);
    assert_eq!(engine.stats().occluders, 1);

    let mut front = TestNode::cube([0.0, 0.0, -10.0], 1.0);
    let mut behind = TestNode::cube([0.0, 0.0, -50.0], 1.0);
    let mut outside = TestNode::cube([0.0, 0.0, 10.0], 1.0);
    let mut around = TestNode::cube([0.0, 0.0, 0.0], 1.0);
    let mut candidates = vec![
        Some(&mut front),
        Some(&mut behind),
        None,
        Some(&mut outside),
        Some(&mut around),
    ];
    engine.query(&mut candidates, &FrameContext::with_camera(test_camera()))?;

    assert_eq!(survivors(&candidates), vec![true, false, false, false, true]);
    let stats = engine.stats();
    assert_eq!(stats.objects_total, 4);
    assert_eq!(stats.objects_culled, 2);
    assert_eq!(stats.objects_visible(), 2);

    let expected = (9.0 - 0.1) / (100.0 - 0.1);
    let distance = front.sort_distance.expect("front distance");
    assert!((distance - expected).abs() < 1e-4, "distance {}", distance);
    assert_eq!(around.sort_distance, Some(0.0));
    Ok(())
}

#[test]
fn test_distance_culling_uses_lod_camera() -> EngineResult<()> {
    let mut engine = engine(test_config());
    render_wall(&mut engine, None)?;

    let near_limit = TestNode {
        max_distance: Some(5.0),
        ..TestNode::cube([0.0, 0.0, -10.0], 1.0)
    };

    let mut candidates = vec![Some(near_limit.clone())];
    engine.query(&mut candidates, &FrameContext::with_camera(test_camera()))?;
    assert!(candidates[0].is_none());

    // Measured from a LOD camera next to the node it stays inside the limit
    let context = FrameContext {
        lod_camera: Some(init_camera(Point3::new(0.0, 0.0, -8.0), 0.0, 0.0)),
        ..FrameContext::with_camera(test_camera())
    };
    let mut candidates = vec![Some(near_limit)];
    engine.query(&mut candidates, &context)?;
    assert!(candidates[0].is_some());
    Ok(())
}

#[test]
fn test_distance_limit_boundary() -> EngineResult<()> {
    let mut engine = engine(OcclusionConfig {
        distance_culling_scale: 1.0,
        ..test_config()
    });
    render_wall(&mut engine, None)?;

    let inside = TestNode {
        max_distance: Some(10.0),
        ..TestNode::cube([0.0, 0.0, -9.99], 0.5)
    };
    let beyond = TestNode {
        max_distance: Some(10.0),
        ..TestNode::cube([0.0, 0.0, -10.01], 0.5)
    };
    let mut candidates = vec![Some(inside), Some(beyond)];
    engine.query(&mut candidates, &FrameContext::with_camera(test_camera()))?;
    assert_eq!(candidates.iter().map(Option::is_some).collect::<Vec<_>>(), vec![true, false]);
    assert_eq!(engine.stats().objects_culled, 1);
    Ok(())
}

#[test]
fn test_boxes_beside_small_occluder_stay_visible() -> EngineResult<()> {
    let mut engine = engine(test_config());
    render_quad(
        &mut engine,
        [[-3.0, -3.0, -20.0], [3.0, -3.0, -20.0], [3.0, 3.0, -20.0], [-3.0, 3.0, -20.0]],
        None,
    )?;

    let scene = vec![
        TestNode::cube([0.0, 0.0, -40.0], 1.0),
        TestNode::cube([10.0, 0.0, -40.0], 1.0),
        TestNode::cube([20.0, 0.0, -40.0], 1.0),
        TestNode::cube([0.0, 9.0, -40.0], 1.0),
        TestNode::cube([-12.0, -9.0, -40.0], 1.0),
    ];
    let expected = vec![false, true, true, true, true];

    for _ in 0..2 {
        let mut candidates: Vec<Option<TestNode>> = scene.iter().cloned().map(Some).collect();
        engine.query(&mut candidates, &FrameContext::with_camera(test_camera()))?;
        assert_eq!(candidates.iter().map(Option::is_some).collect::<Vec<_>>(), expected);
    }
    Ok(())
}

#[test]
fn test_query_scratch_keeps_capacity() -> EngineResult<()> {
    let mut engine = engine(test_config());
    render_wall(&mut engine, None)?;

    let mut many: Vec<Option<TestNode>> = (0..200)
        .map(|i| Some(TestNode::cube([(i % 10) as f32 - 5.0, 0.0, -10.0], 0.2)))
        .collect();
    engine.query(&mut many, &FrameContext::with_camera(test_camera()))?;
    let [records, vertices] = engine.scratch_capacity();
    assert!(records >= 200 && vertices >= 200);

    let mut few = vec![Some(TestNode::cube([0.0, 0.0, -10.0], 1.0))];
    engine.query(&mut few, &FrameContext::with_camera(test_camera()))?;
    assert!(few[0].is_some());
    assert_eq!(engine.scratch_capacity(), [records, vertices]);
    Ok(())
}

#[test]
fn test_unbounded_and_empty_bounds() -> EngineResult<()> {
    let mut engine = engine(test_config());
    render_wall(&mut engine, None)?;

    let floor = TestNode {
        bounds: create_aabb(
            Point3::new(f32::NEG_INFINITY, -2.0, f32::NEG_INFINITY),
            Point3::new(f32::INFINITY, -1.0, f32::INFINITY),
        ),
        ..TestNode::cube([0.0; 3], 1.0)
    };
    let empty = TestNode {
        bounds: create_aabb(Point3::new(1.0, 1.0, -10.0), Point3::new(-1.0, 2.0, -9.0)),
        ..TestNode::cube([0.0; 3], 1.0)
    };
    let mut candidates = vec![Some(floor), Some(empty)];
    engine.query(&mut candidates, &FrameContext::with_camera(test_camera()))?;

    assert!(candidates[0].is_some());
    assert!(candidates[1].is_none());
    assert_eq!(engine.stats().objects_culled, 1);
    Ok(())
}

#[test]
fn test_results_grid_grows() -> EngineResult<()> {
    let mut engine = engine(test_config());
    render_wall(&mut engine, None)?;
    assert_eq!(engine.results_dimensions(), [64, 1]);

    let mut candidates: Vec<Option<TestNode>> = (0..300)
        .map(|i| {
            let x = (i % 20) as f32 * 0.5 - 5.0;
            let z = if i % 2 == 0 { -10.0 } else { -40.0 };
            Some(TestNode::cube([x, 0.0, z], 0.2))
        })
        .collect();
    engine.query(&mut candidates, &FrameContext::with_camera(test_camera()))?;

    assert!(engine.results_dimensions()[1] >= 5);
    for (i, candidate) in candidates.iter().enumerate() {
        assert_eq!(candidate.is_some(), i % 2 == 0, "candidate {}", i);
    }
    Ok(())
}

#[test]
fn test_slot_layouts_agree() -> EngineResult<()> {
    let scene: Vec<TestNode> = (0..90)
        .map(|i| TestNode::cube([(i % 9) as f32 - 4.0, (i / 9) as f32 * 0.3 - 1.5, -5.0 - i as f32], 0.4))
        .collect();

    let mut outcomes = Vec::new();
    for layout in [SlotLayout::Serpentine, SlotLayout::Linear] {
        let mut engine = engine(OcclusionConfig {
            slot_layout: layout,
            ..test_config()
        });
        render_wall(&mut engine, None)?;
        let mut candidates: Vec<Option<TestNode>> = scene.iter().cloned().map(Some).collect();
        engine.query(&mut candidates, &FrameContext::with_camera(test_camera()))?;
        outcomes.push(candidates);
    }
    assert_eq!(outcomes[0], outcomes[1]);
    Ok(())
}

#[test]
fn test_multithreaded_update_matches_sequential() -> EngineResult<()> {
    let mut outcomes = Vec::new();
    for multithreaded in [false, true] {
        let mut engine = engine(OcclusionConfig {
            multithreaded_occluder_update: multithreaded,
            ..test_config()
        });
        let mut walls: Vec<WallProxy> = (0..8).map(|_| WallProxy { updates: 0 }).collect();
        {
            let mut occluders: Vec<Occluder<'_, WallNode>> = walls
                .iter_mut()
                .map(|w| Occluder::Proxy(w as &mut dyn OcclusionProxy))
                .collect();
            engine.render(
                &mut occluders,
                None,
                None,
                &FrameContext::with_camera(test_camera()),
            )?;
        }
        assert!(walls.iter().all(|w| w.updates == 1));

        let mut candidates = vec![
            Some(TestNode::cube([0.0, 0.0, -10.0], 1.0)),
            Some(TestNode::cube([3.0, 1.0, -30.0], 1.0)),
        ];
        engine.query(&mut candidates, &FrameContext::with_camera(test_camera()))?;
        outcomes.push(candidates);
    }
    assert_eq!(outcomes[0], outcomes[1]);
    Ok(())
}

#[test]
fn test_custom_renderer_occludes() -> EngineResult<()> {
    let mut engine = engine(test_config());
    let wall = WallNode { depth_only: true };
    let skipped = WallNode { depth_only: false };
    let mut occluders = vec![Occluder::Renderable(&wall), Occluder::Renderable(&skipped)];
    engine.render(
        &mut occluders,
        None,
        Some(&WallRenderer),
        &FrameContext::with_camera(test_camera()),
    )?;
    assert_eq!(engine.stats().occluders, 1);

    let mut candidates = vec![Some(TestNode::cube([0.0, 0.0, -50.0], 1.0))];
    engine.query(&mut candidates, &FrameContext::with_camera(test_camera()))?;
    assert!(candidates[0].is_none());

    // Without a renderer the nodes are skipped and nothing occludes
    engine.render(
        &mut occluders,
        None,
        None,
        &FrameContext::with_camera(test_camera()),
    )?;
    assert_eq!(engine.stats().occluders, 0);
    let mut candidates = vec![Some(TestNode::cube([0.0, 0.0, -50.0], 1.0))];
    engine.query(&mut candidates, &FrameContext::with_camera(test_camera()))?;
    assert!(candidates[0].is_some());
    Ok(())
}

#[test]
fn test_shadow_caster_culling_and_reset() -> EngineResult<()> {
    for estimate in [ShadowVolumeEstimate::Conservative, ShadowVolumeEstimate::Progressive] {
        let mut engine = engine(OcclusionConfig {
            shadow_volume: estimate,
            ..test_config()
        });
        let light = test_light();
        render_wall(&mut engine, Some(&light))?;
        assert!(engine.has_light_frame());
        assert!(engine.light_direction().is_some());

        let mut visible = TestNode {
            casts: true,
            ..TestNode::cube([0.0, 0.0, -10.0], 1.0)
        };
        let mut hidden = TestNode {
            casts: true,
            ..TestNode::cube([0.0, 0.0, -50.0], 1.0)
        };
        let mut receiver = TestNode::cube([2.0, 0.0, -12.0], 1.0);
        {
            let mut candidates = vec![Some(&mut visible), Some(&mut hidden), Some(&mut receiver)];
            engine.query(&mut candidates, &FrameContext::with_camera(test_camera()))?;
            assert_eq!(survivors(&candidates), vec![true, false, true]);
        }

        assert!(!visible.shadow_culled, "{:?}", estimate);
        assert!(hidden.shadow_culled, "{:?}", estimate);
        let stats = engine.stats();
        assert_eq!(stats.shadow_casters_total, 2);
        assert_eq!(stats.shadow_casters_culled, 1);

        let mut nodes = vec![&mut visible, &mut hidden, &mut receiver];
        assert_eq!(engine.reset_shadow_casters(&mut nodes), 2);
        assert!(!hidden.shadow_culled);
    }
    Ok(())
}

#[test]
fn test_caster_under_roof_is_shadow_culled_but_visible() -> EngineResult<()> {
    // Roof above the camera: invisible from below, blocks the sun
    let roof = [[-10.0, 5.0, -2.0], [10.0, 5.0, -2.0], [10.0, 5.0, -30.0], [-10.0, 5.0, -30.0]];
    for estimate in [ShadowVolumeEstimate::Conservative, ShadowVolumeEstimate::Progressive] {
        let mut engine = engine(OcclusionConfig {
            shadow_volume: estimate,
            ..test_config()
        });
        let light = test_light();
        render_quad(&mut engine, roof, Some(&light))?;

        let mut sheltered = TestNode {
            casts: true,
            ..TestNode::cube([0.0, 0.0, -10.0], 1.0)
        };
        {
            let mut candidates = vec![Some(&mut sheltered)];
            engine.query(&mut candidates, &FrameContext::with_camera(test_camera()))?;
            assert!(candidates[0].is_some(), "{:?}", estimate);
        }
        assert!(sheltered.shadow_culled, "{:?}", estimate);
        assert!(sheltered.sort_distance.is_some());

        let stats = engine.stats();
        assert_eq!(stats.objects_culled, 0);
        assert_eq!(stats.shadow_casters_total, 1);
        assert_eq!(stats.shadow_casters_culled, 1);
    }
    Ok(())
}

#[test]
fn test_shadow_casters_ignored_without_light() -> EngineResult<()> {
    let mut engine = engine(test_config());
    render_wall(&mut engine, None)?;
    let mut hidden = TestNode {
        casts: true,
        ..TestNode::cube([0.0, 0.0, -50.0], 1.0)
    };
    let mut candidates = vec![Some(&mut hidden)];
    engine.query(&mut candidates, &FrameContext::with_camera(test_camera()))?;
    assert!(candidates[0].is_none());
    assert!(!hidden.shadow_culled);
    assert_eq!(engine.stats().shadow_casters_total, 0);
    Ok(())
}

#[test]
fn test_empty_query_resets_stats() -> EngineResult<()> {
    let mut engine = engine(test_config());
    render_wall(&mut engine, None)?;
    let mut candidates = vec![Some(TestNode::cube([0.0, 0.0, -50.0], 1.0))];
    engine.query(&mut candidates, &FrameContext::with_camera(test_camera()))?;
    assert_eq!(engine.stats().objects_culled, 1);

    let mut none: Vec<Option<TestNode>> = Vec::new();
    engine.query(&mut none, &FrameContext::with_camera(test_camera()))?;
    let stats = engine.stats();
    assert_eq!(stats.objects_total, 0);
    assert_eq!(stats.objects_culled, 0);
    assert_eq!(stats.occluders, 1);
    Ok(())
}

#[test]
fn test_invalidate_blocks_queries() -> EngineResult<()> {
    let mut engine = engine(test_config());
    render_wall(&mut engine, None)?;
    engine.invalidate();
    let mut candidates: Vec<Option<TestNode>> = vec![Some(TestNode::cube([0.0, 0.0, -10.0], 1.0))];
    assert!(engine
        .query(&mut candidates, &FrameContext::with_camera(test_camera()))
        .is_err());
    Ok(())
}

#[test]
fn test_visualize_requests() -> EngineResult<()> {
    let mut engine = engine(test_config());
    let mut canvas = RgbaImage::new(64, 32);

    let request = VisualizationRequest {
        target: HierarchyTarget::Camera,
        mode: VisualizationMode::LevelDepth { level: 99 },
    };
    assert!(engine.visualize(&request, &mut canvas).is_err());

    render_wall(&mut engine, None)?;
    engine.visualize(&request, &mut canvas)?;
    // Wall depth everywhere, so every pixel shares one gray
    let first = *canvas.get_pixel(0, 0);
    assert!(canvas.pixels().all(|p| *p == first));

    let light_request = VisualizationRequest {
        target: HierarchyTarget::Light,
        mode: VisualizationMode::Atlas,
    };
    assert!(matches!(
        engine.visualize(&light_request, &mut canvas),
        Err(EngineError::StateError { .. })
    ));

    let light = test_light();
    render_wall(&mut engine, Some(&light))?;
    engine.visualize(&light_request, &mut canvas)?;
    Ok(())
}
