//! The seam between the engine components and a concrete GPU API.
//!
//! The object model follows a classic bind-to-edit graphics API:
//! resources are addressed by small integer handles that stay stable for the lifetime
//! of the object, even when its storage is reallocated. Only the `bind_*`, `use_program`
//! and pipeline-state calls change binding state; resource creation and storage calls
//! take explicit handles and leave bindings untouched.

pub mod headless;
pub mod wgpu_backend;

pub use atelier_assets::PixelFormat;
pub use headless::HeadlessBackend;
pub use wgpu_backend::WgpuBackend;

use crate::shader::LinkedProgram;

macro_rules! gpu_handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

gpu_handle!(
    /// An offscreen render target made of attachments.
    FramebufferId,
    /// A 2D texture, sampleable and optionally renderable.
    TextureId,
    /// Depth/stencil storage that is never sampled.
    RenderbufferId,
    ProgramId,
    BufferId,
    /// Vertex layout plus the buffers it reads from.
    VertexArrayId,
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    Sampled,
    RenderTarget,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub mip_levels: u32,
    pub usage: TextureUsage,
}

impl TextureDesc {
    /// Number of levels in a full mip chain down to 1x1.
    pub fn full_mip_chain(width: u32, height: u32) -> u32 {
        32 - width.max(height).max(1).leading_zeros()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WrapMode {
    Repeat,
    ClampToEdge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Sampling {
    pub wrap: WrapMode,
    pub min_filter: Filter,
    pub mag_filter: Filter,
    /// Filter between mip levels, `None` samples the base level only.
    pub mip_filter: Option<Filter>,
}

impl Sampling {
    pub const LINEAR: Self = Self {
        wrap: WrapMode::Repeat,
        min_filter: Filter::Linear,
        mag_filter: Filter::Linear,
        mip_filter: None,
    };

    pub const TRILINEAR: Self = Self {
        mip_filter: Some(Filter::Linear),
        ..Self::LINEAR
    };

    /// Linear sampling that never wraps, for render targets shown as images.
    pub const CLAMPED: Self = Self {
        wrap: WrapMode::ClampToEdge,
        ..Self::LINEAR
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// One float attribute inside an interleaved vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub offset: u32,
    pub components: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// `src * alpha + dst * (1 - alpha)`
    Alpha,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    Incomplete(String),
}

/// Where row 0 of a rendered image lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageOrigin {
    TopLeft,
    BottomLeft,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{0}")]
    Rejected(String),

    #[error("no usable GPU: {0}")]
    Unavailable(String),
}

pub trait GpuBackend {
    /// Human readable adapter/API description for logs.
    fn describe(&self) -> String;

    fn supports_framebuffers(&self) -> bool;

    fn image_origin(&self) -> ImageOrigin;

    /// Largest width or height a 2D texture or renderbuffer may have.
    fn max_texture_extent(&self) -> u32;

    // --- Framebuffers ---
    fn create_framebuffer(&mut self) -> FramebufferId;
    fn attach_color_texture(&mut self, framebuffer: FramebufferId, texture: TextureId);
    fn attach_depth_stencil(&mut self, framebuffer: FramebufferId, renderbuffer: RenderbufferId);
    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus;
    /// `None` returns to the host's default target.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    // --- Textures ---
    fn create_texture(&mut self) -> TextureId;
    /// (Re)allocates storage. The handle keeps its identity and attachments.
    fn texture_storage(&mut self, texture: TextureId, desc: &TextureDesc, pixels: Option<&[u8]>);
    fn generate_mipmaps(&mut self, texture: TextureId);
    fn set_sampling(&mut self, texture: TextureId, sampling: Sampling);
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>);
    fn delete_texture(&mut self, texture: TextureId);

    // --- Renderbuffers (combined depth + stencil) ---
    fn create_renderbuffer(&mut self) -> RenderbufferId;
    fn renderbuffer_storage(&mut self, renderbuffer: RenderbufferId, width: u32, height: u32);
    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId);

    // --- Programs ---
    fn create_program(&mut self, program: &LinkedProgram) -> Result<ProgramId, BackendError>;
    fn use_program(&mut self, program: Option<ProgramId>);
    /// Writes into the program's uniform block at a byte offset.
    fn write_uniform(&mut self, program: ProgramId, offset: u32, bytes: &[u8]);
    /// Points a sampler slot of the program at a texture unit.
    fn set_sampler_unit(&mut self, program: ProgramId, slot: u32, unit: u32);
    fn delete_program(&mut self, program: ProgramId);

    // --- Geometry ---
    fn create_buffer(&mut self, kind: BufferKind, contents: &[u8]) -> BufferId;
    fn delete_buffer(&mut self, buffer: BufferId);
    fn create_vertex_array(
        &mut self,
        layout: &VertexLayout,
        vertex_buffer: BufferId,
        index_buffer: BufferId,
    ) -> VertexArrayId;
    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>);
    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId);

    // --- Pipeline state and drawing ---
    fn set_viewport(&mut self, width: u32, height: u32);
    fn set_depth_test(&mut self, enabled: bool);
    fn set_blend(&mut self, blend: Option<BlendMode>);
    fn set_polygon_mode(&mut self, mode: PolygonMode);
    /// Clears color, depth and stencil of the bound framebuffer.
    fn clear(&mut self, color: [f32; 4]);
    /// Draws `index_count` u32 indices of the bound vertex array as a triangle list.
    fn draw_indexed(&mut self, index_count: u32);
}

/// Lets an engine borrow a backend that outlives it.
impl<B: GpuBackend + ?Sized> GpuBackend for &mut B {
    fn describe(&self) -> String {
        (**self).describe()
    }
    fn supports_framebuffers(&self) -> bool {
        (**self).supports_framebuffers()
    }
    fn image_origin(&self) -> ImageOrigin {
        (**self).image_origin()
    }
    fn max_texture_extent(&self) -> u32 {
        (**self).max_texture_extent()
    }
    fn create_framebuffer(&mut self) -> FramebufferId {
        (**self).create_framebuffer()
    }
    fn attach_color_texture(&mut self, framebuffer: FramebufferId, texture: TextureId) {
        (**self).attach_color_texture(framebuffer, texture)
    }
    fn attach_depth_stencil(&mut self, framebuffer: FramebufferId, renderbuffer: RenderbufferId) {
        (**self).attach_depth_stencil(framebuffer, renderbuffer)
    }
    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        (**self).framebuffer_status(framebuffer)
    }
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        (**self).bind_framebuffer(framebuffer)
    }
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        (**self).delete_framebuffer(framebuffer)
    }
    fn create_texture(&mut self) -> TextureId {
        (**self).create_texture()
    }
    fn texture_storage(&mut self, texture: TextureId, desc: &TextureDesc, pixels: Option<&[u8]>) {
        (**self).texture_storage(texture, desc, pixels)
    }
    fn generate_mipmaps(&mut self, texture: TextureId) {
        (**self).generate_mipmaps(texture)
    }
    fn set_sampling(&mut self, texture: TextureId, sampling: Sampling) {
        (**self).set_sampling(texture, sampling)
    }
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        (**self).bind_texture(unit, texture)
    }
    fn delete_texture(&mut self, texture: TextureId) {
        (**self).delete_texture(texture)
    }
    fn create_renderbuffer(&mut self) -> RenderbufferId {
        (**self).create_renderbuffer()
    }
    fn renderbuffer_storage(&mut self, renderbuffer: RenderbufferId, width: u32, height: u32) {
        (**self).renderbuffer_storage(renderbuffer, width, height)
    }
    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        (**self).delete_renderbuffer(renderbuffer)
    }
    fn create_program(&mut self, program: &LinkedProgram) -> Result<ProgramId, BackendError> {
        (**self).create_program(program)
    }
    fn use_program(&mut self, program: Option<ProgramId>) {
        (**self).use_program(program)
    }
    fn write_uniform(&mut self, program: ProgramId, offset: u32, bytes: &[u8]) {
        (**self).write_uniform(program, offset, bytes)
    }
    fn set_sampler_unit(&mut self, program: ProgramId, slot: u32, unit: u32) {
        (**self).set_sampler_unit(program, slot, unit)
    }
    fn delete_program(&mut self, program: ProgramId) {
        (**self).delete_program(program)
    }
    fn create_buffer(&mut self, kind: BufferKind, contents: &[u8]) -> BufferId {
        (**self).create_buffer(kind, contents)
    }
    fn delete_buffer(&mut self, buffer: BufferId) {
        (**self).delete_buffer(buffer)
    }
    fn create_vertex_array(
        &mut self,
        layout: &VertexLayout,
        vertex_buffer: BufferId,
        index_buffer: BufferId,
    ) -> VertexArrayId {
        (**self).create_vertex_array(layout, vertex_buffer, index_buffer)
    }
    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>) {
        (**self).bind_vertex_array(vertex_array)
    }
    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) {
        (**self).delete_vertex_array(vertex_array)
    }
    fn set_viewport(&mut self, width: u32, height: u32) {
        (**self).set_viewport(width, height)
    }
    fn set_depth_test(&mut self, enabled: bool) {
        (**self).set_depth_test(enabled)
    }
    fn set_blend(&mut self, blend: Option<BlendMode>) {
        (**self).set_blend(blend)
    }
    fn set_polygon_mode(&mut self, mode: PolygonMode) {
        (**self).set_polygon_mode(mode)
    }
    fn clear(&mut self, color: [f32; 4]) {
        (**self).clear(color)
    }
    fn draw_indexed(&mut self, index_count: u32) {
        (**self).draw_indexed(index_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_reaches_one_pixel() {
        assert_eq!(TextureDesc::full_mip_chain(1, 1), 1);
        assert_eq!(TextureDesc::full_mip_chain(64, 64), 7);
        assert_eq!(TextureDesc::full_mip_chain(500, 20), 9);
        assert_eq!(TextureDesc::full_mip_chain(0, 0), 1);
    }
}
