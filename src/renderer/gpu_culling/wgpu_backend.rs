//! wgpu implementation of the occlusion backend
//!
//! Each hierarchy owns one R32Float render target per level, a depth buffer
//! for level 0 and an atlas texture the query program reads. Levels are
//! reduced with a fullscreen 2x2 max pass and copied into the atlas with
//! `copy_texture_to_texture`. Query results land in a 64-wide R32Float grid
//! that is read back once per `run_queries`.

use super::backend::{OcclusionBackend, QueryBatch, VisualizationMode};
use super::hzb_layout::HierarchyLayout;
use super::query_data::{QueryPass, QueryUniform, QueryVertex, ViewUniform};
use super::query_slots::{ResultsGrid, SlotLayout};
use crate::camera::{view_projection, DepthView};
use crate::constants::hierarchy::{FAR_DEPTH, MAX_LEVELS};
use crate::constants::query::{CULLED_SENTINEL, NEAR_PLANE_DISTANCE};
use crate::error::{EngineError, EngineResult};
use crate::renderer::error::{
    buffer_mapping_error, gpu_operation_error, pipeline_creation_error, RendererErrorContext,
};
use bytemuck::{Pod, Zeroable};
use cgmath::Matrix4;
use image::RgbaImage;
use static_assertions::const_assert_eq;
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;
use wgpu::{Device, Queue};

const COMMON_WGSL: &str = include_str!("shaders/common.wgsl");
const FULLSCREEN_WGSL: &str = include_str!("shaders/fullscreen.wgsl");
const OCCLUDER_WGSL: &str = include_str!("shaders/occluder.wgsl");
const DOWNSAMPLE_WGSL: &str = include_str!("shaders/downsample.wgsl");
const QUERY_WGSL: &str = include_str!("shaders/query.wgsl");
const VISUALIZE_WGSL: &str = include_str!("shaders/visualize.wgsl");

const HIERARCHY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// cgmath produces OpenGL clip space (z in -1..1), wgpu expects 0..1
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

/// Uniform block of occluder.wgsl
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct OccluderUniform {
    view_proj: [[f32; 4]; 4],
    view: [[f32; 4]; 4],
    depth: [f32; 4],
}

const_assert_eq!(std::mem::size_of::<OccluderUniform>(), 144);

/// Uniform block of visualize.wgsl
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct VisualizeUniform {
    view: ViewUniform,
    /// mode, level, canvas width, canvas height
    mode: [u32; 4],
    bounds_min: [f32; 4],
    bounds_max: [f32; 4],
}

const_assert_eq!(std::mem::size_of::<VisualizeUniform>(), 560);

/// Constants shared with constants.rs, prepended to every program
pub fn shader_prelude() -> String {
    format!(
        "const FAR_DEPTH: f32 = {:?};\nconst CULLED_SENTINEL: f32 = {:?};\nconst NEAR_PLANE_DISTANCE: f32 = {:?};\nconst MAX_LEVELS: u32 = {}u;\n\n",
        FAR_DEPTH, CULLED_SENTINEL, NEAR_PLANE_DISTANCE, MAX_LEVELS
    )
}

/// One depth hierarchy in GPU memory
pub struct GpuDepthHierarchy {
    label: String,
    layout: HierarchyLayout,
    levels: Vec<wgpu::Texture>,
    level_views: Vec<wgpu::TextureView>,
    depth_view: wgpu::TextureView,
    atlas: wgpu::Texture,
    atlas_view: wgpu::TextureView,
    uniform_buffer: wgpu::Buffer,
    occluder_bind_group: wgpu::BindGroup,
    /// Entry k-1 samples level k-1 while rendering level k
    downsample_bind_groups: Vec<wgpu::BindGroup>,
    /// Level 0 still holds last frame's depth
    needs_clear: bool,
}

impl GpuDepthHierarchy {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn layout(&self) -> &HierarchyLayout {
        &self.layout
    }

    pub fn atlas(&self) -> &wgpu::Texture {
        &self.atlas
    }

    pub fn atlas_view(&self) -> &wgpu::TextureView {
        &self.atlas_view
    }
}

/// Render target visualizations are drawn into
pub struct WgpuCanvas {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub width: u32,
    pub height: u32,
}

impl WgpuCanvas {
    /// Offscreen Rgba8Unorm canvas that can be read back
    pub fn new(device: &Device, width: u32, height: u32) -> Self {
        let format = wgpu::TextureFormat::Rgba8Unorm;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Occlusion Visualization Canvas"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            format,
            width,
            height,
        }
    }
}

/// Results grid render target and its readback buffer
struct ResultsTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    width: u32,
    height: u32,
}

/// Growable vertex/index storage
struct GrowableBuffer {
    label: &'static str,
    usage: wgpu::BufferUsages,
    buffer: wgpu::Buffer,
    capacity: u64,
}

impl GrowableBuffer {
    fn new(device: &Device, label: &'static str, usage: wgpu::BufferUsages, capacity: u64) -> Self {
        let usage = usage | wgpu::BufferUsages::COPY_DST;
        Self {
            label,
            usage,
            buffer: create_buffer(device, label, usage, capacity),
            capacity,
        }
    }

    /// Upload `data`, growing to the next power of two when needed
    fn write(&mut self, device: &Device, queue: &Queue, data: &[u8]) {
        let size = data.len() as u64;
        if size > self.capacity {
            let capacity = size.next_power_of_two();
            log::debug!(
                "[WgpuBackend] Growing {} from {} to {} bytes",
                self.label,
                self.capacity,
                capacity
            );
            self.buffer = create_buffer(device, self.label, self.usage, capacity);
            self.capacity = capacity;
        }
        if !data.is_empty() {
            queue.write_buffer(&self.buffer, 0, data);
        }
    }
}

fn create_buffer(device: &Device, label: &str, usage: wgpu::BufferUsages, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(wgpu::COPY_BUFFER_ALIGNMENT),
        usage,
        mapped_at_creation: false,
    })
}

pub struct WgpuBackend {
    device: Arc<Device>,
    queue: Arc<Queue>,

    occluder_layout: wgpu::BindGroupLayout,
    occluder_pipeline: wgpu::RenderPipeline,
    downsample_layout: wgpu::BindGroupLayout,
    downsample_pipeline: wgpu::RenderPipeline,
    query_layout: wgpu::BindGroupLayout,
    query_pipelines: HashMap<(SlotLayout, QueryPass), wgpu::RenderPipeline>,
    visualize_layout: wgpu::BindGroupLayout,
    visualize_pipeline_layout: wgpu::PipelineLayout,
    visualize_module: wgpu::ShaderModule,
    visualize_pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,

    occluder_positions: GrowableBuffer,
    occluder_indices: GrowableBuffer,
    query_vertices: GrowableBuffer,
    /// Every batch's vertices back to back, capacity kept between queries
    packed_vertices: Vec<QueryVertex>,
    results: Option<ResultsTarget>,
}

impl WgpuBackend {
    /// Acquire an adapter and device. Fails with `DeviceNotFound` when the
    /// system has no usable adapter.
    pub fn request() -> EngineResult<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(EngineError::DeviceNotFound)?;

        let info = adapter.get_info();
        log::info!("[WgpuBackend] Using adapter {} ({:?})", info.name, info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Occlusion Device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
            },
            None,
        ))
        .renderer_context("request_device")?;

        Self::new(Arc::new(device), Arc::new(queue))
    }

    /// Build pipelines on an existing device
    pub fn new(device: Arc<Device>, queue: Arc<Queue>) -> EngineResult<Self> {
        let occluder_module = create_program(&device, "occluder.wgsl", &[&shader_prelude(), OCCLUDER_WGSL])?;
        let downsample_module = create_program(&device, "downsample.wgsl", &[FULLSCREEN_WGSL, DOWNSAMPLE_WGSL])?;
        let query_module = create_program(
            &device,
            "query.wgsl",
            &[&shader_prelude(), COMMON_WGSL, QUERY_WGSL],
        )?;
        let visualize_module = create_program(
            &device,
            "visualize.wgsl",
            &[&shader_prelude(), COMMON_WGSL, FULLSCREEN_WGSL, VISUALIZE_WGSL],
        )?;

        let occluder_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Occluder Layout"),
            entries: &[uniform_entry(0, wgpu::ShaderStages::VERTEX_FRAGMENT)],
        });
        let downsample_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Downsample Layout"),
            entries: &[depth_texture_entry(0)],
        });
        let query_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Query Layout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::VERTEX_FRAGMENT),
                depth_texture_entry(1),
                depth_texture_entry(2),
            ],
        });
        let visualize_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Visualize Layout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::FRAGMENT),
                depth_texture_entry(1),
            ],
        });

        let occluder_pipeline = {
            let layout = pipeline_layout(&device, "Occluder Pipeline Layout", &occluder_layout);
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Occluder Pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &occluder_module,
                    entry_point: "vs_occluder",
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![0 => Float32x3],
                    }],
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &occluder_module,
                    entry_point: "fs_occluder",
                    targets: &[Some(HIERARCHY_FORMAT.into())],
                }),
                multiview: None,
            })
        };

        let downsample_pipeline = {
            let layout = pipeline_layout(&device, "Downsample Pipeline Layout", &downsample_layout);
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Downsample Pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &downsample_module,
                    entry_point: "vs_fullscreen",
                    buffers: &[],
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &downsample_module,
                    entry_point: "fs_downsample",
                    targets: &[Some(HIERARCHY_FORMAT.into())],
                }),
                multiview: None,
            })
        };

        let query_pipeline_layout = pipeline_layout(&device, "Query Pipeline Layout", &query_layout);
        let mut query_pipelines = HashMap::new();
        for slot_layout in [SlotLayout::Serpentine, SlotLayout::Linear] {
            for pass in [
                QueryPass::Regular,
                QueryPass::ShadowProgressive,
                QueryPass::ShadowConservative,
            ] {
                let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(pass.label()),
                    layout: Some(&query_pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &query_module,
                        entry_point: "vs_query",
                        buffers: &[QueryVertex::desc()],
                    },
                    primitive: wgpu::PrimitiveState {
                        topology: slot_layout.topology(),
                        cull_mode: None,
                        ..Default::default()
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    fragment: Some(wgpu::FragmentState {
                        module: &query_module,
                        entry_point: pass.entry_point(),
                        targets: &[Some(HIERARCHY_FORMAT.into())],
                    }),
                    multiview: None,
                });
                query_pipelines.insert((slot_layout, pass), pipeline);
            }
        }

        let visualize_pipeline_layout = pipeline_layout(&device, "Visualize Pipeline Layout", &visualize_layout);

        let occluder_positions = GrowableBuffer::new(
            &device,
            "Occluder Positions",
            wgpu::BufferUsages::VERTEX,
            1 << 16,
        );
        let occluder_indices = GrowableBuffer::new(&device, "Occluder Indices", wgpu::BufferUsages::INDEX, 1 << 16);
        let query_vertices = GrowableBuffer::new(&device, "Query Vertices", wgpu::BufferUsages::VERTEX, 1 << 16);

        log::info!(
            "[WgpuBackend::new] Created {} query pipelines",
            query_pipelines.len()
        );

        Ok(Self {
            device,
            queue,
            occluder_layout,
            occluder_pipeline,
            downsample_layout,
            downsample_pipeline,
            query_layout,
            query_pipelines,
            visualize_layout,
            visualize_pipeline_layout,
            visualize_module,
            visualize_pipelines: HashMap::new(),
            occluder_positions,
            occluder_indices,
            query_vertices,
            packed_vertices: Vec::new(),
            results: None,
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Copy a canvas back to the CPU
    pub fn read_canvas(&self, canvas: &WgpuCanvas) -> EngineResult<RgbaImage> {
        let unpadded = canvas.width * 4;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let buffer = create_buffer(
            &self.device,
            "Canvas Readback",
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            (padded * canvas.height) as u64,
        );

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Canvas Readback"),
        });
        encoder.copy_texture_to_buffer(
            canvas.texture.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(canvas.height),
                },
            },
            wgpu::Extent3d {
                width: canvas.width,
                height: canvas.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let mut pixels = Vec::with_capacity((unpadded * canvas.height) as usize);
        map_and_read(&self.device, &buffer, "canvas readback", |data| {
            for row in data.chunks_exact(padded as usize) {
                pixels.extend_from_slice(&row[..unpadded as usize]);
            }
        })?;

        RgbaImage::from_raw(canvas.width, canvas.height, pixels)
            .ok_or_else(|| gpu_operation_error("read_canvas", "pixel buffer size mismatch"))
    }

    fn visualize_pipeline(&mut self, format: wgpu::TextureFormat) -> &wgpu::RenderPipeline {
        let device = &self.device;
        let layout = &self.visualize_pipeline_layout;
        let module = &self.visualize_module;
        self.visualize_pipelines.entry(format).or_insert_with(|| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Occlusion Visualize Pipeline"),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: "vs_fullscreen",
                    buffers: &[],
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: "fs_visualize",
                    targets: &[Some(format.into())],
                }),
                multiview: None,
            })
        })
    }
}

impl OcclusionBackend for WgpuBackend {
    type Hierarchy = GpuDepthHierarchy;
    type Canvas = WgpuCanvas;

    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_hierarchy(&mut self, label: &str, width: u32, height: u32) -> EngineResult<GpuDepthHierarchy> {
        let layout = HierarchyLayout::new(width, height)?;

        let limit = self.device.limits().max_texture_dimension_2d;
        if layout.atlas_width > limit || layout.atlas_height > limit {
            log::warn!(
                "[WgpuBackend] {} atlas {}x{} exceeds the device limit of {}",
                label,
                layout.atlas_width,
                layout.atlas_height,
                limit
            );
            return Err(EngineError::ResourceExhausted(format!(
                "{} hierarchy {}x{} exceeds max texture dimension {}",
                label, width, height, limit
            )));
        }

        let make_texture = |name: String,
                            width: u32,
                            height: u32,
                            format: wgpu::TextureFormat,
                            usage: wgpu::TextureUsages| {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&name),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        };

        let levels: Vec<wgpu::Texture> = layout
            .levels
            .iter()
            .enumerate()
            .map(|(i, rect)| {
                make_texture(
                    format!("{} level {}", label, i),
                    rect.width,
                    rect.height,
                    HIERARCHY_FORMAT,
                    wgpu::TextureUsages::RENDER_ATTACHMENT
                        | wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_SRC,
                )
            })
            .collect();
        let level_views: Vec<wgpu::TextureView> = levels
            .iter()
            .map(|t| t.create_view(&wgpu::TextureViewDescriptor::default()))
            .collect();

        let base = layout.base();
        let depth = make_texture(
            format!("{} depth", label),
            base.width,
            base.height,
            DEPTH_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        );
        let atlas = make_texture(
            format!("{} atlas", label),
            layout.atlas_width,
            layout.atlas_height,
            HIERARCHY_FORMAT,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );

        let uniform_buffer = create_buffer(
            &self.device,
            label,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            std::mem::size_of::<OccluderUniform>() as u64,
        );
        let occluder_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.occluder_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        let downsample_bind_groups = level_views[..level_views.len() - 1]
            .iter()
            .map(|source| {
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(label),
                    layout: &self.downsample_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(source),
                    }],
                })
            })
            .collect();

        log::debug!(
            "[WgpuBackend::create_hierarchy] {} {}x{}, {} levels, atlas {}x{}",
            label,
            width,
            height,
            layout.level_count(),
            layout.atlas_width,
            layout.atlas_height
        );

        Ok(GpuDepthHierarchy {
            label: label.to_string(),
            layout,
            levels,
            level_views,
            depth_view: depth.create_view(&wgpu::TextureViewDescriptor::default()),
            atlas_view: atlas.create_view(&wgpu::TextureViewDescriptor::default()),
            atlas,
            uniform_buffer,
            occluder_bind_group,
            downsample_bind_groups,
            needs_clear: true,
        })
    }

    fn hierarchy_layout<'h>(&self, hierarchy: &'h GpuDepthHierarchy) -> &'h HierarchyLayout {
        &hierarchy.layout
    }

    fn begin_hierarchy(&mut self, hierarchy: &mut GpuDepthHierarchy, view: &DepthView) -> EngineResult<()> {
        let uniform = OccluderUniform {
            view_proj: (OPENGL_TO_WGPU_MATRIX * view_projection(view)).into(),
            view: view.view.into(),
            depth: [view.near, view.far, 0.0, 0.0],
        };
        self.queue
            .write_buffer(&hierarchy.uniform_buffer, 0, bytemuck::bytes_of(&uniform));
        hierarchy.needs_clear = true;
        Ok(())
    }

    fn draw_occluders(
        &mut self,
        hierarchy: &mut GpuDepthHierarchy,
        _view: &DepthView,
        positions: &[[f32; 3]],
        indices: &[u32],
    ) -> EngineResult<()> {
        if indices.is_empty() {
            return Ok(());
        }
        self.occluder_positions
            .write(&self.device, &self.queue, bytemuck::cast_slice(positions));
        self.occluder_indices
            .write(&self.device, &self.queue, bytemuck::cast_slice(indices));

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Occluder Draw"),
        });
        {
            let mut pass = begin_depth_pass(&mut encoder, hierarchy);
            pass.set_pipeline(&self.occluder_pipeline);
            pass.set_bind_group(0, &hierarchy.occluder_bind_group, &[]);
            pass.set_vertex_buffer(0, self.occluder_positions.buffer.slice(..));
            pass.set_index_buffer(self.occluder_indices.buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..indices.len() as u32, 0, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        hierarchy.needs_clear = false;
        Ok(())
    }

    fn finish_hierarchy(&mut self, hierarchy: &mut GpuDepthHierarchy) -> EngineResult<()> {
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Hierarchy Build"),
        });

        if hierarchy.needs_clear {
            // Nothing was drawn this frame
            drop(begin_depth_pass(&mut encoder, hierarchy));
            hierarchy.needs_clear = false;
        }

        for (k, bind_group) in hierarchy.downsample_bind_groups.iter().enumerate() {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Hierarchy Downsample"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &hierarchy.level_views[k + 1],
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(far_color()),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.downsample_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        for (texture, rect) in hierarchy.levels.iter().zip(&hierarchy.layout.levels) {
            encoder.copy_texture_to_texture(
                texture.as_image_copy(),
                wgpu::ImageCopyTexture {
                    texture: &hierarchy.atlas,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: rect.x,
                        y: rect.y,
                        z: 0,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: rect.width,
                    height: rect.height,
                    depth_or_array_layers: 1,
                },
            );
        }

        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn run_queries(
        &mut self,
        layout: SlotLayout,
        grid: &mut ResultsGrid,
        batches: &[QueryBatch<'_, GpuDepthHierarchy>],
    ) -> EngineResult<()> {
        let total: usize = batches.iter().map(|b| b.vertices.len()).sum();
        if total == 0 {
            grid.reset();
            return Ok(());
        }

        self.packed_vertices.clear();
        for batch in batches {
            self.packed_vertices.extend_from_slice(batch.vertices);
        }
        self.query_vertices
            .write(&self.device, &self.queue, bytemuck::cast_slice(&self.packed_vertices));

        let (width, height) = (grid.width(), grid.height());
        let stale = self
            .results
            .as_ref()
            .map_or(true, |r| r.width != width || r.height != height);
        if stale {
            self.results = Some(create_results_target(&self.device, width, height));
        }
        let target = self
            .results
            .as_ref()
            .ok_or_else(|| gpu_operation_error("run_queries", "results target missing"))?;

        let bind_groups: Vec<wgpu::BindGroup> = batches
            .iter()
            .map(|batch| {
                let uniform = QueryUniform {
                    grid: [width, height, 0, 0],
                    ..batch.uniform
                };
                let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(batch.pass.label()),
                    contents: bytemuck::bytes_of(&uniform),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(batch.pass.label()),
                    layout: &self.query_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: buffer.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(&batch.primary.atlas_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::TextureView(&batch.secondary.atlas_view),
                        },
                    ],
                })
            })
            .collect();

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Occlusion Query"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Occlusion Query Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: CULLED_SENTINEL as f64,
                            g: 0.0,
                            b: 0.0,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let stride = std::mem::size_of::<QueryVertex>() as u64;
            let mut first = 0u64;
            for (batch, bind_group) in batches.iter().zip(&bind_groups) {
                let count = batch.vertices.len() as u64;
                if count == 0 {
                    continue;
                }
                let pipeline = self
                    .query_pipelines
                    .get(&(layout, batch.pass))
                    .ok_or_else(|| pipeline_creation_error(batch.pass.label(), "no pipeline for this slot layout"))?;
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.set_vertex_buffer(
                    0,
                    self.query_vertices
                        .buffer
                        .slice(first * stride..(first + count) * stride),
                );
                pass.draw(0..count as u32, 0..1);
                first += count;
            }
        }

        encoder.copy_texture_to_buffer(
            target.texture.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &target.readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    // 64 f32 texels = 256 bytes, already row aligned
                    bytes_per_row: Some(width * 4),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        map_and_read(&self.device, &target.readback, "occlusion results", |data| {
            for (value, bytes) in grid.values_mut().iter_mut().zip(data.chunks_exact(4)) {
                *value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
        })
    }

    fn visualize(
        &mut self,
        hierarchy: &GpuDepthHierarchy,
        view: &ViewUniform,
        mode: &VisualizationMode,
        canvas: &mut WgpuCanvas,
    ) -> EngineResult<()> {
        let level = match mode {
            VisualizationMode::LevelDepth { level } => *level as u32,
            _ => 0,
        };
        let (bounds_min, bounds_max) = match mode.bounds() {
            Some(b) => (
                [b.min.x, b.min.y, b.min.z, 0.0],
                [b.max.x, b.max.y, b.max.z, 0.0],
            ),
            None => ([0.0; 4], [0.0; 4]),
        };
        let uniform = VisualizeUniform {
            view: *view,
            mode: [mode.index(), level, canvas.width, canvas.height],
            bounds_min,
            bounds_max,
        };
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Occlusion Visualize Uniform"),
            contents: bytemuck::bytes_of(&uniform),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Occlusion Visualize"),
            layout: &self.visualize_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&hierarchy.atlas_view),
                },
            ],
        });

        let device = Arc::clone(&self.device);
        let pipeline = self.visualize_pipeline(canvas.format);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Occlusion Visualize"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Occlusion Visualize Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &canvas.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

fn create_results_target(device: &Device, width: u32, height: u32) -> ResultsTarget {
    log::debug!("[WgpuBackend] Results target {}x{}", width, height);
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Occlusion Results"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: HIERARCHY_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let readback = create_buffer(
        device,
        "Occlusion Results Readback",
        wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        (width * height * 4) as u64,
    );
    ResultsTarget {
        texture,
        view,
        readback,
        width,
        height,
    }
}

fn far_color() -> wgpu::Color {
    wgpu::Color {
        r: FAR_DEPTH as f64,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    }
}

/// Level-0 pass that clears on the first draw of a frame and loads after
fn begin_depth_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    hierarchy: &'e GpuDepthHierarchy,
) -> wgpu::RenderPass<'e> {
    let (color_load, depth_load) = if hierarchy.needs_clear {
        (wgpu::LoadOp::Clear(far_color()), wgpu::LoadOp::Clear(1.0))
    } else {
        (wgpu::LoadOp::Load, wgpu::LoadOp::Load)
    };
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Occluder Depth Pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: &hierarchy.level_views[0],
            resolve_target: None,
            ops: wgpu::Operations {
                load: color_load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: &hierarchy.depth_view,
            depth_ops: Some(wgpu::Operations {
                load: depth_load,
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

/// Map a readback buffer, hand its bytes to `read` and unmap it
fn map_and_read(
    device: &Device,
    buffer: &wgpu::Buffer,
    what: &str,
    read: impl FnOnce(&[u8]),
) -> EngineResult<()> {
    let slice = buffer.slice(..);
    let (sender, receiver) = flume::bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    device.poll(wgpu::Maintain::Wait);
    receiver
        .recv()?
        .map_err(|_| buffer_mapping_error(what))?;

    {
        let data = slice.get_mapped_range();
        read(&data);
    }
    buffer.unmap();
    Ok(())
}

/// Compile one program, surfacing WGSL validation errors instead of panicking
fn create_program(device: &Device, name: &str, parts: &[&str]) -> EngineResult<wgpu::ShaderModule> {
    let source = parts.concat();
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(name),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        return Err(EngineError::ShaderCompilation {
            source: name.to_string(),
            error: error.to_string(),
        });
    }
    Ok(module)
}

fn pipeline_layout(device: &Device, label: &str, bind_group_layout: &wgpu::BindGroupLayout) -> wgpu::PipelineLayout {
    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[bind_group_layout],
        push_constant_ranges: &[],
    })
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn depth_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}
