//! wgpu implementation of [`GpuBackend`].
//!
//! wgpu has no global binding state, so this backend keeps one itself and turns it into
//! command buffers lazily. Draws issued while a framebuffer is bound are recorded with a
//! snapshot of the program's uniform block; the recorded work becomes one render pass
//! when the framebuffer is unbound (or [`WgpuBackend::flush`] is called).

use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap},
    num::NonZeroU64,
};

use wgpu::util::DeviceExt;

use super::{
    BackendError, BlendMode, BufferId, BufferKind, Filter, FramebufferId, FramebufferStatus,
    GpuBackend, ImageOrigin, PixelFormat, PolygonMode, ProgramId, RenderbufferId, Sampling,
    TextureDesc, TextureId, TextureUsage, VertexArrayId, VertexLayout, WrapMode,
};
use crate::shader::LinkedProgram;

pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const DEPTH_STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

struct GpuTexture {
    storage: Option<(wgpu::Texture, wgpu::TextureView)>,
    desc: Option<TextureDesc>,
    /// Level 0 in RGBA8, kept for mip generation.
    base_level: Option<Vec<u8>>,
    sampler: wgpu::Sampler,
}

struct GpuRenderbuffer {
    storage: Option<(wgpu::Texture, wgpu::TextureView)>,
    extent: (u32, u32),
}

#[derive(Default)]
struct GpuFramebuffer {
    color: Option<TextureId>,
    depth_stencil: Option<RenderbufferId>,
}

/// Per-draw uniform snapshots, uploaded once per flush and addressed by dynamic offset.
struct UniformArena {
    staging: Vec<u8>,
    buffer: Option<wgpu::Buffer>,
    bind_group: Option<wgpu::BindGroup>,
}

struct GpuProgram {
    label: String,
    vertex: wgpu::ShaderModule,
    vertex_entry: String,
    fragment: wgpu::ShaderModule,
    fragment_entry: String,
    block_size: Option<u32>,
    sampler_bindings: Vec<(u32, u32)>,

    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: Option<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
    empty_group: wgpu::BindGroup,

    block: Vec<u8>,
    sampler_units: Vec<u32>,
    arena: UniformArena,
}

struct GpuVertexArray {
    layout: VertexLayout,
    vertex_buffer: BufferId,
    index_buffer: BufferId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    vertex_array: VertexArrayId,
    polygon_mode: PolygonMode,
    depth_test: bool,
    blend: Option<BlendMode>,
}

struct RecordedDraw {
    pipeline: PipelineKey,
    uniform_offset: u32,
    textures: Vec<Option<TextureId>>,
    viewport: (u32, u32),
    index_count: u32,
}

#[derive(Default)]
struct PendingPass {
    clear: Option<[f32; 4]>,
    draws: Vec<RecordedDraw>,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter: String,
    line_mode: bool,
    uniform_alignment: u32,

    next_id: u32,
    framebuffers: HashMap<FramebufferId, GpuFramebuffer>,
    textures: HashMap<TextureId, GpuTexture>,
    renderbuffers: HashMap<RenderbufferId, GpuRenderbuffer>,
    programs: HashMap<ProgramId, GpuProgram>,
    buffers: HashMap<BufferId, wgpu::Buffer>,
    vertex_arrays: HashMap<VertexArrayId, GpuVertexArray>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,

    fallback_view: wgpu::TextureView,
    fallback_sampler: wgpu::Sampler,

    framebuffer: Option<FramebufferId>,
    program: Option<ProgramId>,
    vertex_array: Option<VertexArrayId>,
    texture_units: BTreeMap<u32, TextureId>,
    viewport: (u32, u32),
    depth_test: bool,
    blend: Option<BlendMode>,
    polygon_mode: PolygonMode,
    line_mode_warned: bool,

    pending: PendingPass,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, adapter: &wgpu::AdapterInfo) -> Self {
        let line_mode = device
            .features()
            .contains(wgpu::Features::POLYGON_MODE_LINE);
        let uniform_alignment = device.limits().min_uniform_buffer_offset_alignment;

        // Sampled by texture slots that have nothing bound.
        let fallback = device.create_texture_with_data(
            &queue,
            &wgpu::TextureDescriptor {
                label: Some("Fallback White Texture"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: COLOR_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[255, 255, 255, 255],
        );
        let fallback_view = fallback.create_view(&wgpu::TextureViewDescriptor::default());
        let fallback_sampler = create_sampler(&device, Sampling::LINEAR);

        Self {
            adapter: format!(
                "{} ({:?}, {:?})",
                adapter.name, adapter.backend, adapter.device_type
            ),
            device,
            queue,
            line_mode,
            uniform_alignment,
            next_id: 1,
            framebuffers: HashMap::new(),
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            vertex_arrays: HashMap::new(),
            pipelines: HashMap::new(),
            fallback_view,
            fallback_sampler,
            framebuffer: None,
            program: None,
            vertex_array: None,
            texture_units: BTreeMap::new(),
            viewport: (0, 0),
            depth_test: false,
            blend: None,
            polygon_mode: PolygonMode::Fill,
            line_mode_warned: false,
            pending: PendingPass::default(),
        }
    }

    /// Opens a device without a surface. Wireframe is requested when the adapter has it.
    pub fn request() -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Atelier Device"),
            required_features: adapter.features() & wgpu::Features::POLYGON_MODE_LINE,
            ..Default::default()
        }))
        .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        Ok(Self::new(device, queue, &adapter.get_info()))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// View of a texture's current storage, for handing to a UI renderer.
    pub fn texture_view(&self, texture: TextureId) -> Option<&wgpu::TextureView> {
        self.textures
            .get(&texture)
            .and_then(|t| t.storage.as_ref())
            .map(|(_, view)| view)
    }

    /// Submits everything recorded for the bound framebuffer.
    pub fn flush(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        let Some(framebuffer) = self.framebuffer else {
            if !pending.draws.is_empty() {
                log::debug!("wgpu: dropping {} draws without a framebuffer", pending.draws.len());
            }
            return;
        };
        if pending.clear.is_none() && pending.draws.is_empty() {
            return;
        }

        for draw in &pending.draws {
            self.ensure_pipeline(draw.pipeline);
        }
        self.upload_uniforms();

        let Some((color, depth)) = self.attachment_views(framebuffer) else {
            log::warn!("wgpu: framebuffer {framebuffer:?} has no storage, skipping pass");
            self.reset_arenas();
            return;
        };
        let texture_groups: Vec<Option<wgpu::BindGroup>> = pending
            .draws
            .iter()
            .map(|draw| self.texture_group(draw))
            .collect();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Offscreen Encoder"),
            });
        {
            let load = match pending.clear {
                Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                    r: r as f64,
                    g: g as f64,
                    b: b as f64,
                    a: a as f64,
                }),
                None => wgpu::LoadOp::Load,
            };
            let (depth_load, stencil_load) = match pending.clear {
                Some(_) => (wgpu::LoadOp::Clear(1.0), wgpu::LoadOp::Clear(0)),
                None => (wgpu::LoadOp::Load, wgpu::LoadOp::Load),
            };

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Offscreen Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: stencil_load,
                        store: wgpu::StoreOp::Store,
                    }),
                }),
                ..Default::default()
            });

            for (draw, texture_group) in pending.draws.iter().zip(&texture_groups) {
                let (Some(pipeline), Some(program), Some(vao)) = (
                    self.pipelines.get(&draw.pipeline),
                    self.programs.get(&draw.pipeline.program),
                    self.vertex_arrays.get(&draw.pipeline.vertex_array),
                ) else {
                    continue;
                };
                let (Some(vertex_buffer), Some(index_buffer)) = (
                    self.buffers.get(&vao.vertex_buffer),
                    self.buffers.get(&vao.index_buffer),
                ) else {
                    continue;
                };

                let (width, height) = draw.viewport;
                pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
                pass.set_pipeline(pipeline);
                match &program.arena.bind_group {
                    Some(group) => pass.set_bind_group(0, group, &[draw.uniform_offset]),
                    None => pass.set_bind_group(0, &program.empty_group, &[]),
                }
                if let Some(group) = texture_group {
                    pass.set_bind_group(1, group, &[]);
                }
                pass.set_vertex_buffer(0, vertex_buffer.slice(..));
                pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..draw.index_count, 0, 0..1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.reset_arenas();
    }

    fn reset_arenas(&mut self) {
        for program in self.programs.values_mut() {
            program.arena.staging.clear();
        }
    }

    fn next_handle(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn attachment_views(
        &self,
        framebuffer: FramebufferId,
    ) -> Option<(&wgpu::TextureView, &wgpu::TextureView)> {
        let fb = self.framebuffers.get(&framebuffer)?;
        let (_, color) = self.textures.get(&fb.color?)?.storage.as_ref()?;
        let (_, depth) = self
            .renderbuffers
            .get(&fb.depth_stencil?)?
            .storage
            .as_ref()?;
        Some((color, depth))
    }

    fn upload_uniforms(&mut self) {
        for program in self.programs.values_mut() {
            let Some(block_size) = program.block_size else {
                continue;
            };
            let arena = &mut program.arena;
            if arena.staging.is_empty() {
                continue;
            }

            let needed = arena.staging.len() as u64;
            if arena.buffer.as_ref().is_none_or(|b| b.size() < needed) {
                let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&*format!("{} Uniform Arena", program.label)),
                    size: needed.next_power_of_two().max(256),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                arena.bind_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&*format!("{} Uniform Group", program.label)),
                    layout: &program.uniform_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: crate::uniforms::UNIFORM_BINDING,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: &buffer,
                            offset: 0,
                            size: NonZeroU64::new(block_size as u64),
                        }),
                    }],
                }));
                arena.buffer = Some(buffer);
            }
            if let Some(buffer) = &arena.buffer {
                self.queue.write_buffer(buffer, 0, &arena.staging);
            }
        }
    }

    fn texture_group(&self, draw: &RecordedDraw) -> Option<wgpu::BindGroup> {
        let program = self.programs.get(&draw.pipeline.program)?;
        let layout = program.texture_layout.as_ref()?;

        let mut entries = Vec::with_capacity(program.sampler_bindings.len() * 2);
        for (slot, (texture_binding, sampler_binding)) in program.sampler_bindings.iter().enumerate()
        {
            let bound = draw
                .textures
                .get(slot)
                .copied()
                .flatten()
                .and_then(|id| self.textures.get(&id))
                .and_then(|t| t.storage.as_ref().map(|(_, view)| (view, &t.sampler)));
            let (view, sampler) = bound.unwrap_or((&self.fallback_view, &self.fallback_sampler));

            entries.push(wgpu::BindGroupEntry {
                binding: *texture_binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: *sampler_binding,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }

        Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&*format!("{} Texture Group", program.label)),
            layout,
            entries: &entries,
        }))
    }

    fn ensure_pipeline(&mut self, key: PipelineKey) {
        if self.pipelines.contains_key(&key) {
            return;
        }
        let (Some(program), Some(vao)) = (
            self.programs.get(&key.program),
            self.vertex_arrays.get(&key.vertex_array),
        ) else {
            return;
        };

        let attributes: Vec<wgpu::VertexAttribute> = vao
            .layout
            .attributes
            .iter()
            .map(|a| wgpu::VertexAttribute {
                offset: a.offset as wgpu::BufferAddress,
                shader_location: a.location,
                format: match a.components {
                    1 => wgpu::VertexFormat::Float32,
                    2 => wgpu::VertexFormat::Float32x2,
                    3 => wgpu::VertexFormat::Float32x3,
                    _ => wgpu::VertexFormat::Float32x4,
                },
            })
            .collect();

        let polygon_mode = match key.polygon_mode {
            PolygonMode::Line if self.line_mode => wgpu::PolygonMode::Line,
            _ => wgpu::PolygonMode::Fill,
        };

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                cache: None,
                label: Some(&*format!("{} Pipeline", program.label)),
                layout: Some(&program.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &program.vertex,
                    entry_point: Some(program.vertex_entry.as_str()),
                    compilation_options: Default::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: vao.layout.stride as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &attributes,
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.fragment,
                    entry_point: Some(program.fragment_entry.as_str()),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: Some(match key.blend {
                            Some(BlendMode::Alpha) => wgpu::BlendState::ALPHA_BLENDING,
                            None => wgpu::BlendState::REPLACE,
                        }),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_STENCIL_FORMAT,
                    depth_write_enabled: key.depth_test,
                    depth_compare: if key.depth_test {
                        wgpu::CompareFunction::Less
                    } else {
                        wgpu::CompareFunction::Always
                    },
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    // Cube faces are not wound consistently.
                    cull_mode: None,
                    polygon_mode,
                    unclipped_depth: false,
                    conservative: false,
                },
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });

        self.pipelines.insert(key, pipeline);
    }

    fn forget_pipelines(&mut self, mut uses: impl FnMut(&PipelineKey) -> bool) {
        self.pipelines.retain(|key, _| !uses(key));
    }
}

fn create_sampler(device: &wgpu::Device, sampling: Sampling) -> wgpu::Sampler {
    let address_mode = match sampling.wrap {
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
    };
    let filter = |f: Filter| match f {
        Filter::Nearest => wgpu::FilterMode::Nearest,
        Filter::Linear => wgpu::FilterMode::Linear,
    };

    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Texture Sampler"),
        address_mode_u: address_mode,
        address_mode_v: address_mode,
        address_mode_w: address_mode,
        mag_filter: filter(sampling.mag_filter),
        min_filter: filter(sampling.min_filter),
        mipmap_filter: filter(sampling.mip_filter.unwrap_or(Filter::Nearest)),
        lod_min_clamp: 0.0,
        // Without a mip filter only the base level is sampled.
        lod_max_clamp: if sampling.mip_filter.is_some() { 32.0 } else { 0.0 },
        ..Default::default()
    })
}

fn to_rgba8(format: PixelFormat, pixels: &[u8]) -> Cow<'_, [u8]> {
    match format {
        PixelFormat::Rgba8 => Cow::Borrowed(pixels),
        PixelFormat::Rgb8 => Cow::Owned(
            pixels
                .chunks_exact(3)
                .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 255])
                .collect(),
        ),
    }
}

/// 2x2 box filter over RGBA8. Odd edges reuse the last row/column.
fn downsample(pixels: &[u8], width: u32, height: u32) -> (Vec<u8>, u32, u32) {
    let (w, h) = ((width / 2).max(1), (height / 2).max(1));
    let texel = |x: u32, y: u32, c: usize| {
        let (x, y) = (x.min(width - 1), y.min(height - 1));
        pixels[((y * width + x) * 4) as usize + c] as u32
    };

    let mut out = Vec::with_capacity((w * h * 4) as usize);
    for y in 0..h {
        for x in 0..w {
            for c in 0..4 {
                let sum = texel(2 * x, 2 * y, c)
                    + texel(2 * x + 1, 2 * y, c)
                    + texel(2 * x, 2 * y + 1, c)
                    + texel(2 * x + 1, 2 * y + 1, c);
                out.push(((sum + 2) / 4) as u8);
            }
        }
    }
    (out, w, h)
}

fn write_level(queue: &wgpu::Queue, texture: &wgpu::Texture, level: u32, pixels: &[u8], w: u32, h: u32) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: level,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        pixels,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * w),
            rows_per_image: Some(h),
        },
        wgpu::Extent3d {
            width: w,
            height: h,
            depth_or_array_layers: 1,
        },
    );
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

impl GpuBackend for WgpuBackend {
    fn describe(&self) -> String {
        format!("wgpu on {}", self.adapter)
    }

    fn supports_framebuffers(&self) -> bool {
        true
    }

    fn image_origin(&self) -> ImageOrigin {
        ImageOrigin::TopLeft
    }

    fn max_texture_extent(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        let id = FramebufferId(self.next_handle());
        self.framebuffers.insert(id, GpuFramebuffer::default());
        id
    }

    fn attach_color_texture(&mut self, framebuffer: FramebufferId, texture: TextureId) {
        if let Some(fb) = self.framebuffers.get_mut(&framebuffer) {
            fb.color = Some(texture);
        }
    }

    fn attach_depth_stencil(&mut self, framebuffer: FramebufferId, renderbuffer: RenderbufferId) {
        if let Some(fb) = self.framebuffers.get_mut(&framebuffer) {
            fb.depth_stencil = Some(renderbuffer);
        }
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        let incomplete = |reason: String| FramebufferStatus::Incomplete(reason);

        let Some(fb) = self.framebuffers.get(&framebuffer) else {
            return incomplete("unknown framebuffer".into());
        };
        let color = fb
            .color
            .and_then(|id| self.textures.get(&id))
            .and_then(|t| t.desc);
        let Some(color) = color else {
            return incomplete("missing color attachment".into());
        };
        if color.usage != TextureUsage::RenderTarget {
            return incomplete("color attachment is not renderable".into());
        }
        let depth = fb
            .depth_stencil
            .and_then(|id| self.renderbuffers.get(&id))
            .filter(|r| r.storage.is_some());
        let Some(depth) = depth else {
            return incomplete("missing depth/stencil attachment".into());
        };

        if (color.width, color.height) != depth.extent {
            incomplete("attachment sizes differ".into())
        } else {
            FramebufferStatus::Complete
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        if self.framebuffer != framebuffer {
            self.flush();
            self.framebuffer = framebuffer;
        }
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffer == Some(framebuffer) {
            self.flush();
            self.framebuffer = None;
        }
        if self.framebuffers.remove(&framebuffer).is_none() {
            log::warn!("wgpu: release of unknown framebuffer {framebuffer:?}");
        }
    }

    fn create_texture(&mut self) -> TextureId {
        let id = TextureId(self.next_handle());
        let sampler = create_sampler(&self.device, Sampling::LINEAR);
        self.textures.insert(
            id,
            GpuTexture {
                storage: None,
                desc: None,
                base_level: None,
                sampler,
            },
        );
        id
    }

    fn texture_storage(&mut self, texture: TextureId, desc: &TextureDesc, pixels: Option<&[u8]>) {
        // Recorded draws may still sample or target the old storage.
        self.flush();

        let max = self.max_texture_extent();
        let Some(t) = self.textures.get_mut(&texture) else {
            return;
        };
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            log::warn!(
                "wgpu: refusing {}x{} storage for {texture:?} (limit {max})",
                desc.width,
                desc.height
            );
            t.storage = None;
            t.desc = None;
            return;
        }

        let usage = match desc.usage {
            TextureUsage::Sampled => {
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST
            }
            TextureUsage::RenderTarget => {
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
            }
        };
        let gpu_texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&*format!("Texture {}", texture.0)),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: desc.mip_levels.max(1),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage,
            view_formats: &[],
        });

        t.base_level = pixels.map(|p| to_rgba8(desc.format, p).into_owned());
        if let Some(base) = &t.base_level {
            write_level(&self.queue, &gpu_texture, 0, base, desc.width, desc.height);
        }

        let view = gpu_texture.create_view(&wgpu::TextureViewDescriptor::default());
        t.storage = Some((gpu_texture, view));
        t.desc = Some(*desc);
    }

    fn generate_mipmaps(&mut self, texture: TextureId) {
        let Some(t) = self.textures.get(&texture) else {
            return;
        };
        let (Some((gpu_texture, _)), Some(desc), Some(base)) =
            (&t.storage, t.desc, t.base_level.as_ref())
        else {
            return;
        };

        let (mut level, mut w, mut h) = (base.clone(), desc.width, desc.height);
        for mip in 1..desc.mip_levels {
            let (next, nw, nh) = downsample(&level, w, h);
            write_level(&self.queue, gpu_texture, mip, &next, nw, nh);
            (level, w, h) = (next, nw, nh);
        }
    }

    fn set_sampling(&mut self, texture: TextureId, sampling: Sampling) {
        let sampler = create_sampler(&self.device, sampling);
        if let Some(t) = self.textures.get_mut(&texture) {
            t.sampler = sampler;
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        match texture {
            Some(texture) => self.texture_units.insert(unit, texture),
            None => self.texture_units.remove(&unit),
        };
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.flush();
        self.texture_units.retain(|_, bound| *bound != texture);
        if self.textures.remove(&texture).is_none() {
            log::warn!("wgpu: release of unknown texture {texture:?}");
        }
    }

    fn create_renderbuffer(&mut self) -> RenderbufferId {
        let id = RenderbufferId(self.next_handle());
        self.renderbuffers.insert(
            id,
            GpuRenderbuffer {
                storage: None,
                extent: (0, 0),
            },
        );
        id
    }

    fn renderbuffer_storage(&mut self, renderbuffer: RenderbufferId, width: u32, height: u32) {
        self.flush();
        let max = self.max_texture_extent();
        let Some(r) = self.renderbuffers.get_mut(&renderbuffer) else {
            return;
        };
        r.extent = (width, height);
        if width == 0 || height == 0 || width > max || height > max {
            r.storage = None;
            return;
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Stencil"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_STENCIL_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        r.storage = Some((texture, view));
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        self.flush();
        if self.renderbuffers.remove(&renderbuffer).is_none() {
            log::warn!("wgpu: release of unknown renderbuffer {renderbuffer:?}");
        }
    }

    fn create_program(&mut self, program: &LinkedProgram) -> Result<ProgramId, BackendError> {
        let uniforms = &program.uniforms;
        let block_size = uniforms.block_size();

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vertex = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&*format!("{} Vertex", program.label)),
                source: wgpu::ShaderSource::Wgsl(Cow::Owned(program.vertex.source.clone())),
            });
        let fragment = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&*format!("{} Fragment", program.label)),
                source: wgpu::ShaderSource::Wgsl(Cow::Owned(program.fragment.source.clone())),
            });

        let uniform_entries: Vec<wgpu::BindGroupLayoutEntry> = block_size
            .map(|size| wgpu::BindGroupLayoutEntry {
                binding: crate::uniforms::UNIFORM_BINDING,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(size as u64),
                },
                count: None,
            })
            .into_iter()
            .collect();
        let uniform_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&*format!("{} Uniform Layout", program.label)),
                entries: &uniform_entries,
            });
        let empty_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&*format!("{} Empty Group", program.label)),
            layout: &uniform_layout,
            entries: &[],
        });

        let sampler_bindings: Vec<(u32, u32)> = uniforms
            .samplers()
            .iter()
            .map(|s| (s.texture_binding, s.sampler_binding))
            .collect();
        let texture_layout = (!sampler_bindings.is_empty()).then(|| {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = sampler_bindings
                .iter()
                .flat_map(|&(texture_binding, sampler_binding)| {
                    [
                        wgpu::BindGroupLayoutEntry {
                            binding: texture_binding,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Texture {
                                multisampled: false,
                                view_dimension: wgpu::TextureViewDimension::D2,
                                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: sampler_binding,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                            count: None,
                        },
                    ]
                })
                .collect();
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&*format!("{} Texture Layout", program.label)),
                    entries: &entries,
                })
        });

        let mut group_layouts = vec![&uniform_layout];
        group_layouts.extend(texture_layout.as_ref());
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&*format!("{} Pipeline Layout", program.label)),
                bind_group_layouts: &group_layouts,
                push_constant_ranges: &[],
            });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::Rejected(error.to_string()));
        }

        let id = ProgramId(self.next_handle());
        self.programs.insert(
            id,
            GpuProgram {
                label: program.label.clone(),
                vertex,
                vertex_entry: program.vertex.entry_point.clone(),
                fragment,
                fragment_entry: program.fragment.entry_point.clone(),
                block_size,
                sampler_units: vec![0; sampler_bindings.len()],
                sampler_bindings,
                uniform_layout,
                texture_layout,
                pipeline_layout,
                empty_group,
                block: vec![0; block_size.unwrap_or(0) as usize],
                arena: UniformArena {
                    staging: Vec::new(),
                    buffer: None,
                    bind_group: None,
                },
            },
        );
        Ok(id)
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.program = program;
    }

    fn write_uniform(&mut self, program: ProgramId, offset: u32, bytes: &[u8]) {
        let Some(p) = self.programs.get_mut(&program) else {
            return;
        };
        let start = offset as usize;
        if let Some(slot) = p.block.get_mut(start..start + bytes.len()) {
            slot.copy_from_slice(bytes);
        }
    }

    fn set_sampler_unit(&mut self, program: ProgramId, slot: u32, unit: u32) {
        if let Some(current) = self
            .programs
            .get_mut(&program)
            .and_then(|p| p.sampler_units.get_mut(slot as usize))
        {
            *current = unit;
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.flush();
        if self.program == Some(program) {
            self.program = None;
        }
        self.forget_pipelines(|key| key.program == program);
        if self.programs.remove(&program).is_none() {
            log::warn!("wgpu: release of unknown program {program:?}");
        }
    }

    fn create_buffer(&mut self, kind: BufferKind, contents: &[u8]) -> BufferId {
        let (label, usage) = match kind {
            BufferKind::Vertex => ("Vertex Buffer", wgpu::BufferUsages::VERTEX),
            BufferKind::Index => ("Index Buffer", wgpu::BufferUsages::INDEX),
        };
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            });

        let id = BufferId(self.next_handle());
        self.buffers.insert(id, buffer);
        id
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.flush();
        if self.buffers.remove(&buffer).is_none() {
            log::warn!("wgpu: release of unknown buffer {buffer:?}");
        }
    }

    fn create_vertex_array(
        &mut self,
        layout: &VertexLayout,
        vertex_buffer: BufferId,
        index_buffer: BufferId,
    ) -> VertexArrayId {
        let id = VertexArrayId(self.next_handle());
        self.vertex_arrays.insert(
            id,
            GpuVertexArray {
                layout: layout.clone(),
                vertex_buffer,
                index_buffer,
            },
        );
        id
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>) {
        self.vertex_array = vertex_array;
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) {
        self.flush();
        if self.vertex_array == Some(vertex_array) {
            self.vertex_array = None;
        }
        self.forget_pipelines(|key| key.vertex_array == vertex_array);
        if self.vertex_arrays.remove(&vertex_array).is_none() {
            log::warn!("wgpu: release of unknown vertex array {vertex_array:?}");
        }
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.depth_test = enabled;
    }

    fn set_blend(&mut self, blend: Option<BlendMode>) {
        self.blend = blend;
    }

    fn set_polygon_mode(&mut self, mode: PolygonMode) {
        if mode == PolygonMode::Line && !self.line_mode && !self.line_mode_warned {
            log::warn!("wgpu: device lacks POLYGON_MODE_LINE, wireframe falls back to fill");
            self.line_mode_warned = true;
        }
        self.polygon_mode = mode;
    }

    fn clear(&mut self, color: [f32; 4]) {
        // A clear after draws starts a new pass so those draws are not lost.
        if !self.pending.draws.is_empty() {
            self.flush();
        }
        self.pending.clear = Some(color);
    }

    fn draw_indexed(&mut self, index_count: u32) {
        let (Some(program_id), Some(vertex_array)) = (self.program, self.vertex_array) else {
            log::warn!("wgpu: draw without a program or vertex array");
            return;
        };
        let alignment = self.uniform_alignment as usize;
        let Some(program) = self.programs.get_mut(&program_id) else {
            return;
        };

        let uniform_offset = align_up(program.arena.staging.len(), alignment);
        if program.block_size.is_some() {
            program.arena.staging.resize(uniform_offset, 0);
            program.arena.staging.extend_from_slice(&program.block);
        }
        let textures = program
            .sampler_units
            .iter()
            .map(|unit| self.texture_units.get(unit).copied())
            .collect();

        self.pending.draws.push(RecordedDraw {
            pipeline: PipelineKey {
                program: program_id,
                vertex_array,
                polygon_mode: self.polygon_mode,
                depth_test: self.depth_test,
                blend: self.blend,
            },
            uniform_offset: uniform_offset as u32,
            textures,
            viewport: self.viewport,
            index_count,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_filter_averages_quads() {
        #[rustfmt::skip]
        let pixels = [
            0, 0, 0, 255,     100, 0, 0, 255,
            0, 100, 0, 255,   100, 100, 200, 255,
        ];
        let (level, w, h) = downsample(&pixels, 2, 2);
        assert_eq!((w, h), (1, 1));
        assert_eq!(level, vec![50, 50, 50, 255]);
    }

    #[test]
    fn box_filter_handles_odd_extent() {
        let pixels = [10u8; 12];
        let (level, w, h) = downsample(&pixels, 3, 1);
        assert_eq!((w, h), (1, 1));
        assert_eq!(level, vec![10, 10, 10, 10]);
    }

    #[test]
    fn rgb_is_expanded_to_opaque_rgba() {
        let rgba = to_rgba8(PixelFormat::Rgb8, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(rgba.as_ref(), &[1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn uniform_offsets_are_aligned() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(112, 256), 256);
        assert_eq!(align_up(256, 256), 256);
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn device_accepts_bundled_programs() {
        let mut backend = WgpuBackend::request().expect("adapter");
        let program = crate::shader::ShaderProgram::compile_and_link(
            &mut backend,
            "lit",
            crate::shaders::LIT_VERTEX,
            crate::shaders::LIT_FRAGMENT,
        )
        .expect("lit program");
        program.delete(&mut backend);
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn oversized_storage_is_refused() {
        let mut backend = WgpuBackend::request().expect("adapter");
        let too_wide = backend.max_texture_extent() + 1;
        let texture = backend.create_texture();

        backend.texture_storage(
            texture,
            &TextureDesc {
                width: too_wide,
                height: 4,
                format: PixelFormat::Rgba8,
                mip_levels: 1,
                usage: TextureUsage::RenderTarget,
            },
            None,
        );

        assert!(backend.texture_view(texture).is_none());
        backend.delete_texture(texture);
    }
}
