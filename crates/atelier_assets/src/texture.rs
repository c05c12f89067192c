use std::path::Path;

use image::DynamicImage;

use crate::AssetError;

pub const FALLBACK_SIZE: u32 = 64;
pub const FALLBACK_CELL: u32 = 8;
pub const FALLBACK_PRIMARY: [u8; 3] = [255, 0, 255];
pub const FALLBACK_SECONDARY: [u8; 3] = [0, 255, 255];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgb8,  // 24-bit color, no alpha
    Rgba8, // Standard 32-bit color (0-255)
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// Decoded 8-bit pixels, rows ordered bottom to top.
#[derive(Clone, Debug)]
pub struct TextureData {
    pub name: String,
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl TextureData {
    /// Decodes the image at `path` and flips it so row 0 is the bottom row.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let image = image::open(path)?.flipv();
        let name = path.display().to_string();

        let (width, height) = (image.width(), image.height());
        let (format, pixels) = match image {
            DynamicImage::ImageRgb8(buffer) => (PixelFormat::Rgb8, buffer.into_raw()),
            DynamicImage::ImageRgba8(buffer) => (PixelFormat::Rgba8, buffer.into_raw()),
            other => return Err(AssetError::UnsupportedLayout(other.color())),
        };

        Ok(Self {
            name,
            pixels,
            width,
            height,
            format,
        })
    }

    /// Same as [`TextureData::load`], but degrades to [`TextureData::checkerboard`].
    pub fn load_or_fallback(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(data) => data,
            Err(err) => {
                log::warn!(
                    "failed to load texture {}: {err}; using fallback pattern",
                    path.display()
                );
                Self::checkerboard()
            }
        }
    }

    /// The 64x64 magenta/cyan pattern that stands in for unreadable images.
    pub fn checkerboard() -> Self {
        let mut pixels = Vec::with_capacity((FALLBACK_SIZE * FALLBACK_SIZE * 3) as usize);
        for y in 0..FALLBACK_SIZE {
            for x in 0..FALLBACK_SIZE {
                let even = (x / FALLBACK_CELL + y / FALLBACK_CELL) % 2 == 0;
                pixels.extend_from_slice(if even {
                    &FALLBACK_PRIMARY
                } else {
                    &FALLBACK_SECONDARY
                });
            }
        }

        Self {
            name: "fallback checkerboard".to_string(),
            pixels,
            width: FALLBACK_SIZE,
            height: FALLBACK_SIZE,
            format: PixelFormat::Rgb8,
        }
    }

    /// Channels of the pixel at `(x, y)`, counted from the bottom-left corner.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let channels = self.format.channels();
        let start = (y as usize * self.width as usize + x as usize) * channels;
        self.pixels.get(start..start + channels)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("atelier_assets_{}_{name}", std::process::id()))
    }

    #[test]
    fn checkerboard_alternates_two_colors_per_cell() {
        let board = TextureData::checkerboard();

        assert_eq!((board.width, board.height), (64, 64));
        assert_eq!(board.format, PixelFormat::Rgb8);
        assert_eq!(board.pixels.len(), 64 * 64 * 3);

        assert_eq!(board.pixel(0, 0), Some(&FALLBACK_PRIMARY[..]));
        assert_eq!(board.pixel(7, 7), Some(&FALLBACK_PRIMARY[..]));
        assert_eq!(board.pixel(8, 0), Some(&FALLBACK_SECONDARY[..]));
        assert_eq!(board.pixel(0, 8), Some(&FALLBACK_SECONDARY[..]));
        assert_eq!(board.pixel(8, 8), Some(&FALLBACK_PRIMARY[..]));
        assert_eq!(board.pixel(63, 56), Some(&FALLBACK_SECONDARY[..]));
        assert_eq!(board.pixel(64, 0), None);
        assert_eq!(board.pixel(0, 64), None);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = TextureData::load(temp_path("does_not_exist.png")).unwrap_err();
        assert!(matches!(err, AssetError::Image(_)));
    }

    #[test]
    fn fallback_ignores_which_path_failed() {
        let a = TextureData::load_or_fallback("no/such/file.png");
        let b = TextureData::load_or_fallback(temp_path("missing.jpg"));

        assert_eq!(a.pixels, b.pixels);
        assert_eq!(a.pixels, TextureData::checkerboard().pixels);
    }

    #[test]
    fn rgb_image_is_flipped_bottom_up() {
        let path = temp_path("flip.png");
        let image = image::RgbImage::from_fn(2, 2, |_, y| {
            if y == 0 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([0, 0, 255])
            }
        });
        image.save(&path).unwrap();

        let data = TextureData::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(data.format, PixelFormat::Rgb8);
        assert_eq!((data.width, data.height), (2, 2));
        assert_eq!(data.pixel(0, 0), Some(&[0, 0, 255][..]));
        assert_eq!(data.pixel(1, 1), Some(&[255, 0, 0][..]));
    }

    #[test]
    fn rgba_image_keeps_alpha() {
        let path = temp_path("alpha.png");
        image::RgbaImage::from_pixel(3, 1, image::Rgba([10, 20, 30, 40]))
            .save(&path)
            .unwrap();

        let data = TextureData::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(data.format, PixelFormat::Rgba8);
        assert_eq!(data.pixel(2, 0), Some(&[10, 20, 30, 40][..]));
    }

    #[test]
    fn grayscale_image_is_rejected() {
        let path = temp_path("gray.png");
        image::GrayImage::from_pixel(4, 4, image::Luma([128])).save(&path).unwrap();

        let err = TextureData::load(&path).unwrap_err();
        let fallback = TextureData::load_or_fallback(&path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(err, AssetError::UnsupportedLayout(_)));
        assert_eq!(fallback.width, FALLBACK_SIZE);
    }
}
