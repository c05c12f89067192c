pub mod mesh;
pub mod texture;

pub use mesh::{MeshData, MeshVertex};
pub use texture::{PixelFormat, TextureData};

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("unsupported pixel layout {0:?}, expected 8-bit RGB or RGBA")]
    UnsupportedLayout(image::ColorType),
}
