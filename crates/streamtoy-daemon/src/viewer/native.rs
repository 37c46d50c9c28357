//! Dock-native image derivatives.
//!
//! The dock wants key images rotated 180°, resized to the tile size and
//! JPEG-encoded. Conversions are cached on disk and reused while they are
//! at least as new as their source.

use crate::render::key_file_stem;
use crate::{Error, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageError, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// JPEG quality for native derivatives.
const JPEG_QUALITY: u8 = 95;

/// Rotates 180° and resizes to `width`×`height` (Lanczos3) when needed.
pub fn to_native(image: &DynamicImage, width: u32, height: u32) -> RgbImage {
    let rotated = imageops::rotate180(&image.to_rgb8());
    if rotated.dimensions() == (width, height) {
        rotated
    } else {
        imageops::resize(&rotated, width, height, FilterType::Lanczos3)
    }
}

/// Encodes `image` as a JPEG file at `path`.
pub fn write_jpeg(image: &RgbImage, path: &Path) -> Result<()> {
    let tmp = path.with_extension("jpg.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY).encode_image(image)?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn modified(path: &Path) -> std::io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}

/// On-disk cache of native tile derivatives.
pub struct NativeCache {
    dir: PathBuf,
    tile_size: u32,
}

impl NativeCache {
    pub fn new(dir: impl Into<PathBuf>, tile_size: u32) -> Self {
        Self {
            dir: dir.into(),
            tile_size,
        }
    }

    /// Derivative path for a content key.
    pub fn path_for(&self, content_key: &str) -> PathBuf {
        self.dir
            .join(format!("{}_native.jpg", key_file_stem(content_key)))
    }

    /// Whether a derivative exists for `content_key`.
    pub fn has(&self, content_key: &str) -> bool {
        self.path_for(content_key).is_file()
    }

    /// Returns an up-to-date derivative of `source`, converting if the
    /// cached one is missing or older than the source.
    pub fn ensure(&self, source: &Path, content_key: &str) -> Result<PathBuf> {
        let cached = self.path_for(content_key);
        let source_mtime =
            modified(source).map_err(|e| Error::decode(source, ImageError::IoError(e)))?;

        if let Ok(cached_mtime) = modified(&cached) {
            if cached_mtime >= source_mtime {
                debug!("Native cache hit: {}", cached.display());
                return Ok(cached);
            }
            debug!("Native cache outdated: {}", cached.display());
        }

        let image = image::open(source).map_err(|e| Error::decode(source, e))?;
        std::fs::create_dir_all(&self.dir)?;
        write_jpeg(&to_native(&image, self.tile_size, self.tile_size), &cached)?;
        info!(
            "Generated native tile {} -> {}",
            source.display(),
            cached.display()
        );
        Ok(cached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_to_native_rotates_and_resizes() {
        let mut img = RgbImage::from_pixel(224, 224, Rgb([0, 0, 0]));
        img.put_pixel(0, 0, Rgb([255, 255, 255]));
        let native = to_native(&DynamicImage::ImageRgb8(img.clone()), 224, 224);
        assert_eq!(native.get_pixel(223, 223).0, [255, 255, 255]);
        assert_eq!(native.get_pixel(0, 0).0, [0, 0, 0]);

        let small = to_native(&DynamicImage::ImageRgb8(img), 112, 112);
        assert_eq!(small.dimensions(), (112, 112));
    }

    #[test]
    fn test_path_for_keeps_similar_keys_apart() {
        let cache = NativeCache::new("/tmp/native", 112);
        let a = cache.path_for("text|Hi");
        let b = cache.path_for("text/Hi");
        assert_ne!(a, b);

        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("text_Hi_"));
        assert!(name.ends_with("_native.jpg"));
        assert_eq!(name, format!("{}_native.jpg", key_file_stem("text|Hi")));
    }

    #[test]
    fn test_ensure_reuses_fresh_derivative() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("cover.png");
        RgbImage::from_pixel(112, 112, Rgb([10, 20, 30]))
            .save(&source)
            .unwrap();
        let cache = NativeCache::new(dir.path().join("native"), 112);

        assert!(!cache.has("k1"));
        let first = cache.ensure(&source, "k1").unwrap();
        assert!(cache.has("k1"));
        assert!(first.to_str().unwrap().ends_with("_native.jpg"));
        let mtime = modified(&first).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        let second = cache.ensure(&source, "k1").unwrap();
        assert_eq!(first, second);
        assert_eq!(modified(&second).unwrap(), mtime);
        assert_eq!(image::open(&second).unwrap().width(), 112);
    }

    #[test]
    fn test_ensure_regenerates_when_source_newer() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("cover.png");
        RgbImage::new(112, 112).save(&source).unwrap();
        let cache = NativeCache::new(dir.path().join("native"), 112);

        let first = cache.ensure(&source, "k1").unwrap();
        let old = modified(&first).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(50));
        RgbImage::from_pixel(112, 112, Rgb([200, 0, 0]))
            .save(&source)
            .unwrap();
        let second = cache.ensure(&source, "k1").unwrap();
        assert!(modified(&second).unwrap() > old);
    }

    #[test]
    fn test_ensure_missing_source() {
        let dir = TempDir::new().unwrap();
        let cache = NativeCache::new(dir.path(), 112);
        assert!(matches!(
            cache.ensure(&dir.path().join("missing.png"), "k"),
            Err(Error::DecodeFailure { .. })
        ));
    }
}
