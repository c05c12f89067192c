//! In-memory backend. Keeps every resource on the CPU, records draw calls and
//! counts releases, so engine behaviour can be checked without a GPU.

use std::collections::{BTreeMap, HashMap};

use glam::{Mat4, Vec3};

use super::{
    BackendError, BlendMode, BufferId, BufferKind, FramebufferId, FramebufferStatus, GpuBackend,
    ImageOrigin, PolygonMode, ProgramId, RenderbufferId, Sampling, TextureDesc, TextureId,
    VertexArrayId, VertexLayout,
};
use crate::{shader::LinkedProgram, uniforms::UniformTable};

#[derive(Clone, Debug)]
pub struct HeadlessTexture {
    pub desc: Option<TextureDesc>,
    pub pixels: Option<Vec<u8>>,
    pub sampling: Option<Sampling>,
    pub mipmaps_generated: bool,
}

#[derive(Default)]
struct HeadlessFramebuffer {
    color: Option<TextureId>,
    depth_stencil: Option<RenderbufferId>,
}

struct HeadlessProgram {
    uniforms: UniformTable,
    block: Vec<u8>,
    sampler_units: Vec<u32>,
}

#[derive(Clone, Debug)]
pub struct HeadlessVertexArray {
    pub layout: VertexLayout,
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
}

/// One recorded `draw_indexed` with the state it ran under.
#[derive(Clone, Debug)]
pub struct DrawCall {
    pub framebuffer: Option<FramebufferId>,
    pub program: Option<ProgramId>,
    pub vertex_array: Option<VertexArrayId>,
    pub index_count: u32,
    pub polygon_mode: PolygonMode,
    pub viewport: (u32, u32),
    pub depth_test: bool,
    pub blend: Option<BlendMode>,
    /// Snapshot of the program's uniform block at draw time.
    pub uniforms: Vec<u8>,
    /// Texture sampled by each sampler slot, resolved through the texture units.
    pub textures: Vec<Option<TextureId>>,
}

/// Texture limit of a default wgpu device.
pub const DEFAULT_MAX_TEXTURE_EXTENT: u32 = 8192;

pub struct HeadlessBackend {
    framebuffers_supported: bool,
    max_texture_extent: u32,
    force_incomplete: bool,
    program_rejection: Option<String>,

    next_id: u32,
    created: usize,
    double_releases: usize,

    framebuffers: HashMap<FramebufferId, HeadlessFramebuffer>,
    textures: HashMap<TextureId, HeadlessTexture>,
    renderbuffers: HashMap<RenderbufferId, (u32, u32)>,
    programs: HashMap<ProgramId, HeadlessProgram>,
    buffers: HashMap<BufferId, (BufferKind, Vec<u8>)>,
    vertex_arrays: HashMap<VertexArrayId, HeadlessVertexArray>,

    framebuffer: Option<FramebufferId>,
    program: Option<ProgramId>,
    vertex_array: Option<VertexArrayId>,
    texture_units: BTreeMap<u32, TextureId>,
    viewport: (u32, u32),
    depth_test: bool,
    blend: Option<BlendMode>,
    polygon_mode: PolygonMode,

    clears: Vec<(Option<FramebufferId>, [f32; 4])>,
    draws: Vec<DrawCall>,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self {
            framebuffers_supported: true,
            max_texture_extent: DEFAULT_MAX_TEXTURE_EXTENT,
            force_incomplete: false,
            program_rejection: None,
            next_id: 1,
            created: 0,
            double_releases: 0,
            framebuffers: HashMap::new(),
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            vertex_arrays: HashMap::new(),
            framebuffer: None,
            program: None,
            vertex_array: None,
            texture_units: BTreeMap::new(),
            viewport: (0, 0),
            depth_test: false,
            blend: None,
            polygon_mode: PolygonMode::Fill,
            clears: Vec::new(),
            draws: Vec::new(),
        }
    }

    /// Simulates a device without offscreen render targets.
    pub fn without_framebuffers(mut self) -> Self {
        self.framebuffers_supported = false;
        self
    }

    /// Storage wider or taller than `extent` is refused.
    pub fn with_max_texture_extent(mut self, extent: u32) -> Self {
        self.max_texture_extent = extent;
        self
    }

    /// Every framebuffer reports itself incomplete.
    pub fn with_incomplete_framebuffers(mut self) -> Self {
        self.force_incomplete = true;
        self
    }

    /// `create_program` fails with `message`.
    pub fn rejecting_programs(mut self, message: impl Into<String>) -> Self {
        self.program_rejection = Some(message.into());
        self
    }

    fn next_handle(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.created += 1;
        id
    }

    fn released<T>(&mut self, what: &str, removed: Option<T>) {
        if removed.is_none() {
            log::warn!("headless: release of unknown {what}");
            self.double_releases += 1;
        }
    }

    // --- Inspection ---

    pub fn live_objects(&self) -> usize {
        self.framebuffers.len()
            + self.textures.len()
            + self.renderbuffers.len()
            + self.programs.len()
            + self.buffers.len()
            + self.vertex_arrays.len()
    }

    pub fn objects_created(&self) -> usize {
        self.created
    }

    /// Releases of handles that were already gone (or never existed).
    pub fn double_releases(&self) -> usize {
        self.double_releases
    }

    pub fn texture(&self, texture: TextureId) -> Option<&HeadlessTexture> {
        self.textures.get(&texture)
    }

    pub fn texture_extent(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.texture(texture)
            .and_then(|t| t.desc)
            .map(|desc| (desc.width, desc.height))
    }

    pub fn renderbuffer_extent(&self, renderbuffer: RenderbufferId) -> Option<(u32, u32)> {
        self.renderbuffers.get(&renderbuffer).copied()
    }

    pub fn vertex_array(&self, vertex_array: VertexArrayId) -> Option<&HeadlessVertexArray> {
        self.vertex_arrays.get(&vertex_array)
    }

    pub fn buffer_len(&self, buffer: BufferId) -> Option<usize> {
        self.buffers.get(&buffer).map(|(_, data)| data.len())
    }

    pub fn program_sampler_units(&self, program: ProgramId) -> Option<&[u32]> {
        self.programs
            .get(&program)
            .map(|p| p.sampler_units.as_slice())
    }

    pub fn program_mat4(&self, program: ProgramId, name: &str) -> Option<Mat4> {
        let p = self.programs.get(&program)?;
        read_mat4(&p.uniforms, &p.block, name)
    }

    pub fn program_vec3(&self, program: ProgramId, name: &str) -> Option<Vec3> {
        let p = self.programs.get(&program)?;
        read_vec3(&p.uniforms, &p.block, name)
    }

    /// Reads a matrix out of a draw's uniform snapshot. The program must still be alive.
    pub fn draw_mat4(&self, draw: &DrawCall, name: &str) -> Option<Mat4> {
        let p = self.programs.get(&draw.program?)?;
        read_mat4(&p.uniforms, &draw.uniforms, name)
    }

    pub fn draw_vec3(&self, draw: &DrawCall, name: &str) -> Option<Vec3> {
        let p = self.programs.get(&draw.program?)?;
        read_vec3(&p.uniforms, &draw.uniforms, name)
    }

    pub fn draw_float(&self, draw: &DrawCall, name: &str) -> Option<f32> {
        let p = self.programs.get(&draw.program?)?;
        let offset = offset_of(&p.uniforms, name)?;
        draw.uniforms
            .get(offset..offset + 4)
            .map(bytemuck::pod_read_unaligned::<f32>)
    }

    pub fn draws(&self) -> &[DrawCall] {
        &self.draws
    }

    pub fn clears(&self) -> &[(Option<FramebufferId>, [f32; 4])] {
        &self.clears
    }

    pub fn bound_framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffer
    }

    pub fn bound_program(&self) -> Option<ProgramId> {
        self.program
    }

    pub fn bound_vertex_array(&self) -> Option<VertexArrayId> {
        self.vertex_array
    }

    pub fn depth_test(&self) -> bool {
        self.depth_test
    }

    pub fn blend(&self) -> Option<BlendMode> {
        self.blend
    }
}

fn offset_of(table: &UniformTable, name: &str) -> Option<usize> {
    table
        .entry(table.location(name))
        .map(|entry| entry.offset as usize)
}

fn read_mat4(table: &UniformTable, block: &[u8], name: &str) -> Option<Mat4> {
    let offset = offset_of(table, name)?;
    block
        .get(offset..offset + 64)
        .map(|bytes| Mat4::from_cols_array(&bytemuck::pod_read_unaligned(bytes)))
}

fn read_vec3(table: &UniformTable, block: &[u8], name: &str) -> Option<Vec3> {
    let offset = offset_of(table, name)?;
    block
        .get(offset..offset + 12)
        .map(|bytes| Vec3::from_array(bytemuck::pod_read_unaligned(bytes)))
}

impl GpuBackend for HeadlessBackend {
    fn describe(&self) -> String {
        "headless (in-memory)".to_string()
    }

    fn supports_framebuffers(&self) -> bool {
        self.framebuffers_supported
    }

    fn image_origin(&self) -> ImageOrigin {
        ImageOrigin::BottomLeft
    }

    fn max_texture_extent(&self) -> u32 {
        self.max_texture_extent
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        let id = FramebufferId(self.next_handle());
        self.framebuffers.insert(id, HeadlessFramebuffer::default());
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
        let incomplete = |reason: &str| FramebufferStatus::Incomplete(reason.to_string());

        if self.force_incomplete {
            return incomplete("forced incomplete");
        }
        let Some(fb) = self.framebuffers.get(&framebuffer) else {
            return incomplete("unknown framebuffer");
        };
        let Some(color) = fb.color.and_then(|t| self.texture_extent(t)) else {
            return incomplete("missing color attachment");
        };
        let Some(depth) = fb.depth_stencil.and_then(|r| self.renderbuffer_extent(r)) else {
            return incomplete("missing depth/stencil attachment");
        };

        if color.0 == 0 || color.1 == 0 {
            incomplete("zero sized attachment")
        } else if color != depth {
            incomplete("attachment sizes differ")
        } else {
            FramebufferStatus::Complete
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.framebuffer = framebuffer;
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffer == Some(framebuffer) {
            self.framebuffer = None;
        }
        let removed = self.framebuffers.remove(&framebuffer);
        self.released("framebuffer", removed);
    }

    fn create_texture(&mut self) -> TextureId {
        let id = TextureId(self.next_handle());
        self.textures.insert(
            id,
            HeadlessTexture {
                desc: None,
                pixels: None,
                sampling: None,
                mipmaps_generated: false,
            },
        );
        id
    }

    fn texture_storage(&mut self, texture: TextureId, desc: &TextureDesc, pixels: Option<&[u8]>) {
        let max = self.max_texture_extent;
        if let Some(t) = self.textures.get_mut(&texture) {
            if desc.width > max || desc.height > max {
                log::warn!("headless: refusing {}x{} storage", desc.width, desc.height);
                t.desc = None;
                t.pixels = None;
                return;
            }
            t.desc = Some(*desc);
            t.pixels = pixels.map(<[u8]>::to_vec);
            t.mipmaps_generated = false;
        }
    }

    fn generate_mipmaps(&mut self, texture: TextureId) {
        if let Some(t) = self.textures.get_mut(&texture) {
            t.mipmaps_generated = true;
        }
    }

    fn set_sampling(&mut self, texture: TextureId, sampling: Sampling) {
        if let Some(t) = self.textures.get_mut(&texture) {
            t.sampling = Some(sampling);
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        match texture {
            Some(texture) => self.texture_units.insert(unit, texture),
            None => self.texture_units.remove(&unit),
        };
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.texture_units.retain(|_, bound| *bound != texture);
        let removed = self.textures.remove(&texture);
        self.released("texture", removed);
    }

    fn create_renderbuffer(&mut self) -> RenderbufferId {
        let id = RenderbufferId(self.next_handle());
        self.renderbuffers.insert(id, (0, 0));
        id
    }

    fn renderbuffer_storage(&mut self, renderbuffer: RenderbufferId, width: u32, height: u32) {
        let max = self.max_texture_extent;
        if let Some(extent) = self.renderbuffers.get_mut(&renderbuffer) {
            *extent = if width > max || height > max {
                (0, 0)
            } else {
                (width, height)
            };
        }
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        let removed = self.renderbuffers.remove(&renderbuffer);
        self.released("renderbuffer", removed);
    }

    fn create_program(&mut self, program: &LinkedProgram) -> Result<ProgramId, BackendError> {
        if let Some(message) = &self.program_rejection {
            return Err(BackendError::Rejected(message.clone()));
        }

        let uniforms = program.uniforms.clone();
        let block = vec![0; uniforms.block_size().unwrap_or(0) as usize];
        let sampler_units = vec![0; uniforms.samplers().len()];

        let id = ProgramId(self.next_handle());
        self.programs.insert(
            id,
            HeadlessProgram {
                uniforms,
                block,
                sampler_units,
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
        if self.program == Some(program) {
            self.program = None;
        }
        let removed = self.programs.remove(&program);
        self.released("program", removed);
    }

    fn create_buffer(&mut self, kind: BufferKind, contents: &[u8]) -> BufferId {
        let id = BufferId(self.next_handle());
        self.buffers.insert(id, (kind, contents.to_vec()));
        id
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        let removed = self.buffers.remove(&buffer);
        self.released("buffer", removed);
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
            HeadlessVertexArray {
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
        if self.vertex_array == Some(vertex_array) {
            self.vertex_array = None;
        }
        let removed = self.vertex_arrays.remove(&vertex_array);
        self.released("vertex array", removed);
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
        self.polygon_mode = mode;
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.clears.push((self.framebuffer, color));
    }

    fn draw_indexed(&mut self, index_count: u32) {
        let program = self.program.and_then(|id| self.programs.get(&id));

        let uniforms = program.map(|p| p.block.clone()).unwrap_or_default();
        let textures = program
            .map(|p| {
                p.sampler_units
                    .iter()
                    .map(|unit| self.texture_units.get(unit).copied())
                    .collect()
            })
            .unwrap_or_default();

        self.draws.push(DrawCall {
            framebuffer: self.framebuffer,
            program: self.program,
            vertex_array: self.vertex_array,
            index_count,
            polygon_mode: self.polygon_mode,
            viewport: self.viewport,
            depth_test: self.depth_test,
            blend: self.blend,
            uniforms,
            textures,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{PixelFormat, TextureUsage};

    fn storage(width: u32, height: u32) -> TextureDesc {
        TextureDesc {
            width,
            height,
            format: PixelFormat::Rgba8,
            mip_levels: 1,
            usage: TextureUsage::RenderTarget,
        }
    }

    #[test]
    fn framebuffer_needs_matching_attachments() {
        let mut backend = HeadlessBackend::new();
        let fb = backend.create_framebuffer();
        assert!(matches!(
            backend.framebuffer_status(fb),
            FramebufferStatus::Incomplete(_)
        ));

        let color = backend.create_texture();
        backend.texture_storage(color, &storage(4, 4), None);
        backend.attach_color_texture(fb, color);
        let depth = backend.create_renderbuffer();
        backend.renderbuffer_storage(depth, 4, 2);
        backend.attach_depth_stencil(fb, depth);
        assert_eq!(
            backend.framebuffer_status(fb),
            FramebufferStatus::Incomplete("attachment sizes differ".to_string())
        );

        backend.renderbuffer_storage(depth, 4, 4);
        assert_eq!(backend.framebuffer_status(fb), FramebufferStatus::Complete);
    }

    #[test]
    fn releasing_twice_is_counted() {
        let mut backend = HeadlessBackend::new();
        let texture = backend.create_texture();

        backend.delete_texture(texture);
        assert_eq!(backend.double_releases(), 0);

        backend.delete_texture(texture);
        assert_eq!(backend.double_releases(), 1);
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn storage_keeps_handle_identity() {
        let mut backend = HeadlessBackend::new();
        let texture = backend.create_texture();

        backend.texture_storage(texture, &storage(8, 8), None);
        backend.texture_storage(texture, &storage(16, 4), None);

        assert_eq!(backend.texture_extent(texture), Some((16, 4)));
        assert_eq!(backend.objects_created(), 1);
    }
}
