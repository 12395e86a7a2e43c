use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowId};

use crate::geometry::Vertex;
use crate::gpu::{BufferHandle, BufferUsage, RenderDevice, FRAME_DATA_SLOT, LIGHT_STORAGE_SLOT};
use crate::scene::{FrameStats, Scene};
use crate::settings::RenderSettings;
use crate::shader_structs::{FrameData, GpuPointLight, ObjectConstants};

/// Failures while bringing up the GPU for a window.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("window has zero area")]
    ZeroSizedSurface,
    #[error("failed to create surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),
    #[error("failed to acquire GPU adapter: {0}")]
    NoAdapter(#[from] wgpu::RequestAdapterError),
    #[error("failed to create GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
}

/// wgpu-backed [`RenderDevice`] drawing into a window surface.
///
/// Buffers live in an arena indexed by [`BufferHandle`]. Binds and draws are
/// only accepted while [`Renderer::render_frame`] has a pass open.
pub struct Renderer {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    settings: RenderSettings,
    depth: DepthBuffer,
    pipelines: Pipelines,
    buffers: Vec<Option<wgpu::Buffer>>,
    free_slots: Vec<usize>,
    pass: Option<ActivePass>,
}

impl Renderer {
    /// Initializes the GPU renderer for the provided window.
    pub async fn new(window: Arc<Window>, settings: RenderSettings) -> Result<Self, RendererError> {
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            return Err(RendererError::ZeroSizedSurface);
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance.create_surface(Arc::clone(&window))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await?;
        let adapter_info = adapter.get_info();
        info!(
            "using adapter {} ({:?})",
            adapter_info.name, adapter_info.backend
        );

        let device_descriptor = wgpu::DeviceDescriptor {
            label: Some("renderer-device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: Default::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
        };
        let (device, queue) = adapter.request_device(&device_descriptor).await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|format| format.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);
        let present_mode = if settings.vsync {
            wgpu::PresentMode::Fifo
        } else {
            surface_caps
                .present_modes
                .iter()
                .copied()
                .find(|mode| {
                    matches!(
                        mode,
                        wgpu::PresentMode::Mailbox | wgpu::PresentMode::Immediate
                    )
                })
                .unwrap_or(wgpu::PresentMode::Fifo)
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            present_mode,
            desired_maximum_frame_latency: 2,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        let depth = DepthBuffer::create(&device, config.width, config.height);
        let pipelines = Pipelines::new(&device, surface_format);

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            settings,
            depth,
            pipelines,
            buffers: Vec::new(),
            free_slots: Vec::new(),
            pass: None,
        })
    }

    /// Returns the identifier of the window owned by the renderer.
    pub fn window_id(&self) -> WindowId {
        self.window.id()
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.config.width as f32 / self.config.height.max(1) as f32
    }

    /// Resizes the swap chain and depth buffer; zero-sized requests are ignored.
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        debug!(
            "reconfiguring surface to {}x{}",
            new_size.width, new_size.height
        );
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
        self.depth = DepthBuffer::create(&self.device, new_size.width, new_size.height);
    }

    /// Renders one frame of `scene`: an optional depth prepass, then the
    /// shading pass. Returns the shading pass statistics.
    pub fn render_frame(&mut self, scene: &Scene) -> Result<FrameStats, wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame-encoder"),
            });

        let z_prepass = self.settings.z_prepass;
        if z_prepass {
            let pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("depth-prepass"),
                    color_attachments: &[],
                    depth_stencil_attachment: Some(
                        self.depth.attachment(wgpu::LoadOp::Clear(1.0)),
                    ),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                })
                .forget_lifetime();
            self.begin_pass(pass, PassKind::DepthPrepass);
            scene.render(self, true);
            self.end_pass();
        }

        let depth_load = if z_prepass {
            wgpu::LoadOp::Load
        } else {
            wgpu::LoadOp::Clear(1.0)
        };
        let clear = self.settings.clear_color.as_dvec3();
        let pass = encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("shading-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: clear.x,
                            g: clear.y,
                            b: clear.z,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(self.depth.attachment(depth_load)),
                timestamp_writes: None,
                occlusion_query_set: None,
            })
            .forget_lifetime();
        self.begin_pass(pass, PassKind::Shading);
        let stats = scene.render(self, false);
        self.end_pass();

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(stats)
    }

    fn begin_pass(&mut self, mut pass: wgpu::RenderPass<'static>, kind: PassKind) {
        let pipeline = match kind {
            PassKind::DepthPrepass => &self.pipelines.prepass,
            PassKind::Shading => &self.pipelines.shading,
        };
        pass.set_pipeline(pipeline);
        self.pass = Some(ActivePass {
            kind,
            pass,
            frame_uniform: None,
            light_storage: None,
            frame_bindings_dirty: true,
        });
    }

    fn end_pass(&mut self) {
        self.pass = None;
    }
}

impl RenderDevice for Renderer {
    fn create_buffer(&mut self, label: &str, usage: BufferUsage, size: u64) -> BufferHandle {
        let usage_flags = match usage {
            BufferUsage::Attribute => wgpu::BufferUsages::VERTEX,
            BufferUsage::Index => wgpu::BufferUsages::INDEX,
            BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM,
            BufferUsage::Storage => wgpu::BufferUsages::STORAGE,
        };
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
            usage: usage_flags | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        match self.free_slots.pop() {
            Some(index) => {
                self.buffers[index] = Some(buffer);
                BufferHandle::from_index(index)
            }
            None => {
                self.buffers.push(Some(buffer));
                BufferHandle::from_index(self.buffers.len() - 1)
            }
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        match self.buffers.get(buffer.index()).and_then(Option::as_ref) {
            Some(target) => self.queue.write_buffer(target, offset, data),
            None => warn!("write to unknown buffer {buffer:?}"),
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        // Dropping only releases our reference; commands already recorded
        // keep the allocation alive until they retire.
        if let Some(entry) = self.buffers.get_mut(buffer.index()) {
            if entry.take().is_some() {
                self.free_slots.push(buffer.index());
            }
        }
    }

    fn bind_buffer(&mut self, buffer: BufferHandle, usage: BufferUsage, slot: u32) {
        let Some(source) = self.buffers.get(buffer.index()).and_then(Option::as_ref) else {
            warn!("bind of unknown buffer {buffer:?}");
            return;
        };
        let Some(active) = self.pass.as_mut() else {
            warn!("bind of {usage:?} buffer outside a render pass");
            return;
        };
        match (usage, slot) {
            (BufferUsage::Attribute, slot) => active.pass.set_vertex_buffer(slot, source.slice(..)),
            (BufferUsage::Index, _) => active
                .pass
                .set_index_buffer(source.slice(..), wgpu::IndexFormat::Uint32),
            (BufferUsage::Uniform, FRAME_DATA_SLOT) => {
                active.frame_uniform = Some(source.clone());
                active.frame_bindings_dirty = true;
            }
            (BufferUsage::Storage, LIGHT_STORAGE_SLOT) => {
                active.light_storage = Some(source.clone());
                active.frame_bindings_dirty = true;
            }
            (usage, slot) => warn!("no binding point for {usage:?} at slot {slot}"),
        }
    }

    fn bind_object(&mut self, constants: &ObjectConstants) {
        let Some(active) = self.pass.as_mut() else {
            warn!("object bind outside a render pass");
            return;
        };
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("object-constants"),
                contents: bytemuck::bytes_of(constants),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("object-bind-group"),
            layout: &self.pipelines.object_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        active.pass.set_bind_group(1, &bind_group, &[]);
    }

    fn draw_indexed(&mut self, index_count: u32) {
        let Some(active) = self.pass.as_mut() else {
            warn!("draw outside a render pass");
            return;
        };
        if active.frame_bindings_dirty {
            let Some(bind_group) = frame_bind_group(&self.device, &self.pipelines, active) else {
                warn!(
                    "skipping draw: frame bindings incomplete for {:?} pass",
                    active.kind
                );
                return;
            };
            active.pass.set_bind_group(0, &bind_group, &[]);
            active.frame_bindings_dirty = false;
        }
        active.pass.draw_indexed(0..index_count, 0, 0..1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassKind {
    DepthPrepass,
    Shading,
}

struct ActivePass {
    kind: PassKind,
    pass: wgpu::RenderPass<'static>,
    frame_uniform: Option<wgpu::Buffer>,
    light_storage: Option<wgpu::Buffer>,
    frame_bindings_dirty: bool,
}

/// Group 0 for the current pass: the frame block, plus the light array when shading.
fn frame_bind_group(
    device: &wgpu::Device,
    pipelines: &Pipelines,
    active: &ActivePass,
) -> Option<wgpu::BindGroup> {
    let uniform = active.frame_uniform.as_ref()?;
    let bind_group = match active.kind {
        PassKind::DepthPrepass => device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("prepass-frame-bind-group"),
            layout: &pipelines.prepass_frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: FRAME_DATA_SLOT,
                resource: uniform.as_entire_binding(),
            }],
        }),
        PassKind::Shading => {
            let storage = active.light_storage.as_ref()?;
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("shading-frame-bind-group"),
                layout: &pipelines.shading_frame_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: FRAME_DATA_SLOT,
                        resource: uniform.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: LIGHT_STORAGE_SLOT,
                        resource: storage.as_entire_binding(),
                    },
                ],
            })
        }
    };
    Some(bind_group)
}

struct Pipelines {
    prepass: wgpu::RenderPipeline,
    shading: wgpu::RenderPipeline,
    prepass_frame_layout: wgpu::BindGroupLayout,
    shading_frame_layout: wgpu::BindGroupLayout,
    object_layout: wgpu::BindGroupLayout,
}

impl Pipelines {
    fn new(device: &wgpu::Device, surface_format: wgpu::TextureFormat) -> Self {
        let frame_entry = buffer_layout_entry::<FrameData>(
            FRAME_DATA_SLOT,
            wgpu::ShaderStages::VERTEX_FRAGMENT,
            wgpu::BufferBindingType::Uniform,
        );
        let lights_entry = buffer_layout_entry::<GpuPointLight>(
            LIGHT_STORAGE_SLOT,
            wgpu::ShaderStages::FRAGMENT,
            wgpu::BufferBindingType::Storage { read_only: true },
        );

        let prepass_frame_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("prepass-frame-layout"),
                entries: &[frame_entry],
            });
        let shading_frame_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("shading-frame-layout"),
                entries: &[frame_entry, lights_entry],
            });
        let object_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("object-layout"),
            entries: &[buffer_layout_entry::<ObjectConstants>(
                0,
                wgpu::ShaderStages::VERTEX_FRAGMENT,
                wgpu::BufferBindingType::Uniform,
            )],
        });

        let prepass_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("prepass-shader"),
            source: wgpu::ShaderSource::Wgsl(format!("{SHADER_COMMON}{PREPASS_SHADER}").into()),
        });
        let shading_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("shading-shader"),
            source: wgpu::ShaderSource::Wgsl(format!("{SHADER_COMMON}{SHADING_SHADER}").into()),
        });

        let prepass_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("prepass-pipeline-layout"),
            bind_group_layouts: &[&prepass_frame_layout, &object_layout],
            push_constant_ranges: &[],
        });
        let shading_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("shading-pipeline-layout"),
            bind_group_layouts: &[&shading_frame_layout, &object_layout],
            push_constant_ranges: &[],
        });

        let prepass = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("prepass-pipeline"),
            layout: Some(&prepass_layout),
            vertex: wgpu::VertexState {
                module: &prepass_module,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[Vertex::layout()],
            },
            primitive: primitive_state(),
            depth_stencil: Some(depth_state(wgpu::CompareFunction::Less)),
            multisample: wgpu::MultisampleState::default(),
            fragment: None,
            multiview: None,
            cache: None,
        });

        let shading = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("shading-pipeline"),
            layout: Some(&shading_layout),
            vertex: wgpu::VertexState {
                module: &shading_module,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[Vertex::layout()],
            },
            primitive: primitive_state(),
            // LessEqual so fragments that wrote depth in the prepass still pass.
            depth_stencil: Some(depth_state(wgpu::CompareFunction::LessEqual)),
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shading_module,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        });

        Self {
            prepass,
            shading,
            prepass_frame_layout,
            shading_frame_layout,
            object_layout,
        }
    }
}

fn buffer_layout_entry<T>(
    binding: u32,
    visibility: wgpu::ShaderStages,
    ty: wgpu::BufferBindingType,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<T>() as u64),
        },
        count: None,
    }
}

fn primitive_state() -> wgpu::PrimitiveState {
    wgpu::PrimitiveState {
        topology: wgpu::PrimitiveTopology::TriangleList,
        front_face: wgpu::FrontFace::Ccw,
        cull_mode: Some(wgpu::Face::Back),
        polygon_mode: wgpu::PolygonMode::Fill,
        ..Default::default()
    }
}

fn depth_state(compare: wgpu::CompareFunction) -> wgpu::DepthStencilState {
    wgpu::DepthStencilState {
        format: DepthBuffer::FORMAT,
        depth_write_enabled: true,
        depth_compare: compare,
        stencil: Default::default(),
        bias: Default::default(),
    }
}

struct DepthBuffer {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl DepthBuffer {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

    fn create(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth-texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
        }
    }

    fn attachment(&self, load: wgpu::LoadOp<f32>) -> wgpu::RenderPassDepthStencilAttachment<'_> {
        wgpu::RenderPassDepthStencilAttachment {
            view: &self.view,
            depth_ops: Some(wgpu::Operations {
                load,
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }
    }
}

const SHADER_COMMON: &str = r#"
struct FrameData {
    view_proj: mat4x4<f32>,
    point_light_count: u32,
    sun_color: vec3<f32>,
    sun_dir: vec3<f32>,
}

struct ObjectConstants {
    model: mat4x4<f32>,
    normal: mat3x4<f32>,
    color: vec4<f32>,
}

@group(0) @binding(0)
var<uniform> frame: FrameData;

@group(1) @binding(0)
var<uniform> object: ObjectConstants;
"#;

const PREPASS_SHADER: &str = r#"
@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @invariant @builtin(position) vec4<f32> {
    let world_position = object.model * vec4<f32>(position, 1.0);
    return frame.view_proj * world_position;
}
"#;

const SHADING_SHADER: &str = r#"
struct PointLight {
    position: vec3<f32>,
    radius: f32,
    color: vec3<f32>,
    _pad: f32,
}

@group(0) @binding(1)
var<storage, read> point_lights: array<PointLight>;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec3<f32>,
}

struct VertexOutput {
    @invariant @builtin(position) position: vec4<f32>,
    @location(0) world_pos: vec3<f32>,
    @location(1) normal: vec3<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let world_position = object.model * vec4<f32>(input.position, 1.0);
    out.position = frame.view_proj * world_position;
    out.world_pos = world_position.xyz;
    let normal_matrix = mat3x3<f32>(
        object.normal[0].xyz,
        object.normal[1].xyz,
        object.normal[2].xyz
    );
    out.normal = normal_matrix * input.normal;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let normal = normalize(input.normal);
    var radiance = vec3<f32>(0.03) + frame.sun_color * max(dot(normal, frame.sun_dir), 0.0);

    for (var i = 0u; i < frame.point_light_count; i = i + 1u) {
        let point_light = point_lights[i];
        let to_light = point_light.position - input.world_pos;
        let dist = length(to_light);
        let falloff = max(1.0 - dist / point_light.radius, 0.0);
        let lambert = max(dot(normal, to_light / max(dist, 0.0001)), 0.0);
        radiance += point_light.color * lambert * falloff * falloff;
    }

    return vec4<f32>(radiance * object.color.rgb, object.color.a);
}
"#;
