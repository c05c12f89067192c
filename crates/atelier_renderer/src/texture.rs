use std::path::Path;

use atelier_assets::{PixelFormat, TextureData};

use crate::backend::{GpuBackend, Sampling, TextureDesc, TextureId, TextureUsage};

/// A sampleable, mipmapped 2D texture.
///
/// Binding state: [`Texture::bind`] replaces whatever was bound to the unit. Construction
/// leaves texture units untouched.
#[derive(Debug)]
pub struct Texture {
    id: TextureId,
    width: u32,
    height: u32,
    format: PixelFormat,
    mip_levels: u32,
}

impl Texture {
    /// Loads `path`, falling back to the checkerboard pattern when it cannot be decoded.
    pub fn load<B: GpuBackend + ?Sized>(backend: &mut B, path: impl AsRef<Path>) -> Self {
        Self::from_data(backend, &TextureData::load_or_fallback(path))
    }

    pub fn from_data<B: GpuBackend + ?Sized>(backend: &mut B, data: &TextureData) -> Self {
        let desc = TextureDesc {
            width: data.width,
            height: data.height,
            format: data.format,
            mip_levels: TextureDesc::full_mip_chain(data.width, data.height),
            usage: TextureUsage::Sampled,
        };

        let id = backend.create_texture();
        backend.texture_storage(id, &desc, Some(&data.pixels));
        backend.generate_mipmaps(id);
        backend.set_sampling(id, Sampling::TRILINEAR);
        log::debug!(
            "Uploaded texture {} ({}x{}, {} mip levels)",
            data.name,
            desc.width,
            desc.height,
            desc.mip_levels
        );

        Self {
            id,
            width: desc.width,
            height: desc.height,
            format: desc.format,
            mip_levels: desc.mip_levels,
        }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn bind<B: GpuBackend + ?Sized>(&self, backend: &mut B, unit: u32) {
        backend.bind_texture(unit, Some(self.id));
    }

    pub fn delete<B: GpuBackend + ?Sized>(self, backend: &mut B) {
        backend.delete_texture(self.id);
    }
}
