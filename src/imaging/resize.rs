use super::cache::ImageCache;
use crate::error::{ResizerError, Result};
use crate::settings::Settings;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Rgb, RgbImage, Rgba};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

/// Dimensions and encoding of a source image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: Option<String>,
    pub color: String,
}

/// Produces JPEG renditions of source images, backed by an [`ImageCache`]
#[derive(Debug, Clone)]
pub struct Resizer {
    max_width: u32,
    max_height: u32,
    default_quality: u8,
    cache: ImageCache,
}

impl Resizer {
    pub fn new(max_width: u32, max_height: u32, default_quality: u8, cache: ImageCache) -> Self {
        Self {
            max_width,
            max_height,
            default_quality,
            cache,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.max_width,
            settings.max_height,
            settings.default_quality,
            ImageCache::new(&settings.cache_dir, settings.max_cache_files),
        )
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    /// Render `path` as a JPEG. A width or height of `None` or 0 is
    /// unspecified; requested dimensions above the maxima are clamped.
    pub fn resize(
        &self,
        path: &Path,
        width: Option<u32>,
        height: Option<u32>,
        quality: Option<u8>,
    ) -> Result<Vec<u8>> {
        if !path.is_file() {
            return Err(ResizerError::NotFound(format!(
                "Image not found: {}",
                path.display()
            )));
        }

        let quality = quality.unwrap_or(self.default_quality).clamp(1, 100);
        let width = width.filter(|w| *w > 0).map(|w| w.min(self.max_width));
        let height = height.filter(|h| *h > 0).map(|h| h.min(self.max_height));

        let key = ImageCache::key(path, width, height, quality);
        match self.cache.get(&key) {
            Ok(Some(bytes)) => return Ok(bytes),
            Ok(None) => {}
            Err(e) => warn!("{}", e),
        }

        let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        let rgb = flatten_to_rgb(img);

        let (target_w, target_h) = target_dimensions(rgb.dimensions(), width, height);
        let rgb = if (target_w, target_h) == rgb.dimensions() {
            rgb
        } else {
            imageops::resize(&rgb, target_w, target_h, FilterType::Lanczos3)
        };

        let bytes = encode_jpeg(&rgb, quality)?;
        debug!(
            "Rendered {} at {}x{} q{} ({} bytes)",
            path.display(),
            target_w,
            target_h,
            quality,
            bytes.len()
        );

        // Caching is best-effort; the rendition is still served
        if let Err(e) = self.cache.put(&key, &bytes) {
            warn!("{}", e);
        }
        Ok(bytes)
    }
}

/// Output size for the requested dimensions. With one side given the other
/// keeps the aspect ratio (rounded down, at least 1).
pub fn target_dimensions(
    (orig_w, orig_h): (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
) -> (u32, u32) {
    let scale = |side: u32, num: u32, den: u32| -> u32 {
        if den == 0 {
            return side.max(1);
        }
        ((side as u64 * num as u64) / den as u64).clamp(1, u32::MAX as u64) as u32
    };

    match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, scale(orig_h, w, orig_w)),
        (None, Some(h)) => (scale(orig_w, h, orig_h), h),
        (None, None) => (orig_w, orig_h),
    }
}

/// Convert to 8-bit RGB, compositing any transparency onto white
pub fn flatten_to_rgb(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.into_rgb8();
    }

    let rgba = img.into_rgba8();
    let (w, h) = rgba.dimensions();
    RgbImage::from_fn(w, h, |x, y| {
        let Rgba([r, g, b, a]) = *rgba.get_pixel(x, y);
        let a = a as u16;
        let blend = |c: u8| ((c as u16 * a + 255 * (255 - a) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(img)?;
    Ok(out)
}

/// Decode `path` and report its size and encoding
pub fn image_info(path: &Path) -> Result<ImageInfo> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let format = reader.format().map(|f| format!("{:?}", f).to_uppercase());
    let img = reader.decode()?;

    Ok(ImageInfo {
        width: img.width(),
        height: img.height(),
        format,
        color: format!("{:?}", img.color()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbaImage};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_png(dir: &Path, name: &str, w: u32, h: u32, pixel: Rgba<u8>) -> PathBuf {
        let path = dir.join(name);
        RgbaImage::from_pixel(w, h, pixel)
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        path
    }

    fn resizer(cache_dir: &Path) -> Resizer {
        Resizer::new(500, 400, 85, ImageCache::new(cache_dir, 100))
    }

    fn decode(bytes: &[u8]) -> DynamicImage {
        image::load_from_memory_with_format(bytes, ImageFormat::Jpeg).unwrap()
    }

    #[test]
    fn test_target_dimensions() {
        assert_eq!(target_dimensions((800, 600), Some(200), Some(50)), (200, 50));
        assert_eq!(target_dimensions((800, 600), Some(400), None), (400, 300));
        assert_eq!(target_dimensions((800, 600), None, Some(300)), (400, 300));
        assert_eq!(target_dimensions((800, 600), None, None), (800, 600));
        // Rounds down
        assert_eq!(target_dimensions((3, 2), Some(2), None), (2, 1));
        // Never collapses to zero
        assert_eq!(target_dimensions((1000, 1), Some(10), None), (10, 1));
    }

    #[test]
    fn test_flatten_transparent_onto_white() {
        let transparent = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0])));
        assert_eq!(*flatten_to_rgb(transparent).get_pixel(0, 0), Rgb([255, 255, 255]));

        let opaque = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255])));
        assert_eq!(*flatten_to_rgb(opaque).get_pixel(1, 1), Rgb([10, 20, 30]));
    }

    #[test]
    fn test_resize_exact_dimensions() {
        let temp_dir = TempDir::new().unwrap();
        let source = write_png(temp_dir.path(), "dog.png", 64, 48, Rgba([200, 100, 50, 255]));

        let out = resizer(&temp_dir.path().join("cache"))
            .resize(&source, Some(32), Some(10), None)
            .unwrap();
        let img = decode(&out);
        assert_eq!((img.width(), img.height()), (32, 10));
    }

    #[test]
    fn test_resize_clamps_to_maximum() {
        let temp_dir = TempDir::new().unwrap();
        let source = write_png(temp_dir.path(), "dog.png", 10, 10, Rgba([0, 0, 0, 255]));

        let out = resizer(&temp_dir.path().join("cache"))
            .resize(&source, Some(9000), Some(9000), Some(50))
            .unwrap();
        let img = decode(&out);
        assert_eq!((img.width(), img.height()), (500, 400));
    }

    #[test]
    fn test_zero_dimension_keeps_aspect_ratio() {
        let temp_dir = TempDir::new().unwrap();
        let source = write_png(temp_dir.path(), "dog.png", 40, 20, Rgba([0, 0, 0, 255]));

        let out = resizer(&temp_dir.path().join("cache"))
            .resize(&source, Some(20), Some(0), None)
            .unwrap();
        let img = decode(&out);
        assert_eq!((img.width(), img.height()), (20, 10));
    }

    #[test]
    fn test_resize_uses_cache() {
        let temp_dir = TempDir::new().unwrap();
        let cache_dir = temp_dir.path().join("cache");
        let source = write_png(temp_dir.path(), "dog.png", 16, 16, Rgba([0, 0, 0, 255]));
        let resizer = resizer(&cache_dir);

        let first = resizer.resize(&source, Some(8), Some(8), None).unwrap();
        assert_eq!(resizer.cache().len().unwrap(), 1);

        let key = ImageCache::key(&source, Some(8), Some(8), 85);
        assert_eq!(resizer.cache().get(&key).unwrap(), Some(first.clone()));

        let second = resizer.resize(&source, Some(8), Some(8), None).unwrap();
        assert_eq!(first, second);
        assert_eq!(resizer.cache().len().unwrap(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_resize_survives_unwritable_cache() {
        let temp_dir = TempDir::new().unwrap();
        let source = write_png(temp_dir.path(), "dog.png", 16, 16, Rgba([0, 0, 0, 255]));
        // A regular file where the cache directory should be
        let blocker = temp_dir.path().join("cache");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let resizer = resizer(&blocker);

        let out = resizer.resize(&source, Some(8), Some(4), None).unwrap();
        let img = decode(&out);
        assert_eq!((img.width(), img.height()), (8, 4));
    }

    #[test]
    fn test_resize_missing_source() {
        let temp_dir = TempDir::new().unwrap();
        let result = resizer(temp_dir.path()).resize(
            &temp_dir.path().join("missing.jpg"),
            Some(10),
            Some(10),
            None,
        );
        assert!(matches!(result, Err(ResizerError::NotFound(_))));
    }

    #[test]
    fn test_resize_corrupt_source() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("broken.jpg");
        std::fs::write(&source, b"not an image").unwrap();

        let result = resizer(&temp_dir.path().join("cache")).resize(&source, Some(10), Some(10), None);
        assert!(matches!(result, Err(ResizerError::ImageError(_))));
    }

    #[test]
    fn test_image_info() {
        let temp_dir = TempDir::new().unwrap();
        let source = write_png(temp_dir.path(), "dog.png", 30, 20, Rgba([1, 2, 3, 4]));

        let info = image_info(&source).unwrap();
        assert_eq!(info.width, 30);
        assert_eq!(info.height, 20);
        assert_eq!(info.format.as_deref(), Some("PNG"));
        assert_eq!(info.color, "Rgba8");
    }
}
