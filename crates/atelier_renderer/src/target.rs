use crate::{
    backend::{
        FramebufferId, FramebufferStatus, GpuBackend, PixelFormat, RenderbufferId, Sampling,
        TextureDesc, TextureId, TextureUsage,
    },
    error::RenderError,
};

/// Framebuffer with a sampleable color texture and a depth/stencil renderbuffer.
///
/// Binding state: [`OffscreenTarget::new`] leaves no framebuffer bound;
/// [`OffscreenTarget::bind`] makes this the draw target.
#[derive(Debug)]
pub struct OffscreenTarget {
    framebuffer: FramebufferId,
    color: TextureId,
    depth_stencil: RenderbufferId,
    width: u32,
    height: u32,
}

impl OffscreenTarget {
    pub fn new<B: GpuBackend + ?Sized>(
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        if !backend.supports_framebuffers() {
            return Err(RenderError::FramebuffersUnsupported);
        }

        let framebuffer = backend.create_framebuffer();
        backend.bind_framebuffer(Some(framebuffer));

        let color = backend.create_texture();
        backend.texture_storage(color, &color_desc(width, height), None);
        backend.set_sampling(color, Sampling::CLAMPED);
        backend.attach_color_texture(framebuffer, color);

        let depth_stencil = backend.create_renderbuffer();
        backend.renderbuffer_storage(depth_stencil, width, height);
        backend.attach_depth_stencil(framebuffer, depth_stencil);

        let status = backend.framebuffer_status(framebuffer);
        backend.bind_framebuffer(None);

        let target = Self {
            framebuffer,
            color,
            depth_stencil,
            width,
            height,
        };
        match status {
            FramebufferStatus::Complete => Ok(target),
            FramebufferStatus::Incomplete(reason) => {
                target.delete(backend);
                Err(RenderError::IncompleteFramebuffer(reason))
            }
        }
    }

    /// Reallocates both attachments. Handles, and therefore the color texture id, are kept.
    pub fn resize<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, width: u32, height: u32) {
        backend.texture_storage(self.color, &color_desc(width, height), None);
        backend.renderbuffer_storage(self.depth_stencil, width, height);
        self.width = width;
        self.height = height;
    }

    pub fn bind<B: GpuBackend + ?Sized>(&self, backend: &mut B) {
        backend.bind_framebuffer(Some(self.framebuffer));
        backend.set_viewport(self.width, self.height);
    }

    pub fn framebuffer(&self) -> FramebufferId {
        self.framebuffer
    }

    pub fn color_texture(&self) -> TextureId {
        self.color
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn delete<B: GpuBackend + ?Sized>(self, backend: &mut B) {
        backend.delete_framebuffer(self.framebuffer);
        backend.delete_texture(self.color);
        backend.delete_renderbuffer(self.depth_stencil);
    }
}

fn color_desc(width: u32, height: u32) -> TextureDesc {
    TextureDesc {
        width,
        height,
        format: PixelFormat::Rgba8,
        mip_levels: 1,
        usage: TextureUsage::RenderTarget,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    #[test]
    fn incomplete_target_releases_its_attachments() {
        let mut backend = HeadlessBackend::new().with_incomplete_framebuffers();
        let err = OffscreenTarget::new(&mut backend, 32, 32).unwrap_err();

        assert!(matches!(err, RenderError::IncompleteFramebuffer(_)));
        assert_eq!(backend.live_objects(), 0);
        assert_eq!(backend.bound_framebuffer(), None);
    }

    #[test]
    fn resize_keeps_the_color_handle() {
        let mut backend = HeadlessBackend::new();
        let mut target = OffscreenTarget::new(&mut backend, 32, 32).expect("complete target");
        let color = target.color_texture();

        target.resize(&mut backend, 100, 40);

        assert_eq!(target.color_texture(), color);
        assert_eq!(backend.texture_extent(color), Some((100, 40)));
        assert_eq!(
            backend.texture(color).and_then(|t| t.sampling),
            Some(Sampling::CLAMPED)
        );
        assert_eq!(
            backend.framebuffer_status(target.framebuffer()),
            FramebufferStatus::Complete
        );
    }
}
