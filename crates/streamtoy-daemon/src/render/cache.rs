//! Content-addressed cache of rendered tile bitmaps.
//!
//! A fingerprint string built from the rendering inputs names each entry.
//! Once a fingerprint's bitmap exists it is never rewritten, so repeated
//! renders yield the same `(path, cache_key)` pair and viewers can skip
//! retransmitting it.

use super::color::parse_color;
use super::font::FontCache;
use super::text::{render_text, TextStyle};
use crate::{Error, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Longest sanitised key prefix kept in a file name.
const PREFIX_LEN: usize = 48;

/// A cached tile ready to hand to the display state manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTile {
    pub path: PathBuf,
    pub cache_key: String,
}

/// Replaces every non-alphanumeric character with `_`.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// File stem for a key: a readable sanitised prefix plus a hash of the full
/// key, so long or similar keys never collide.
pub fn key_file_stem(key: &str) -> String {
    let prefix: String = sanitize_key(key).chars().take(PREFIX_LEN).collect();
    let hash = blake3::hash(key.as_bytes()).to_hex();
    format!("{}_{}", prefix, &hash[..16])
}

/// Rendered tile store rooted at a directory.
pub struct RenderCache {
    dir: PathBuf,
    tile_size: u32,
    fonts: Arc<FontCache>,
}

impl RenderCache {
    /// Opens (and creates) the cache directory.
    pub fn new(dir: impl Into<PathBuf>, tile_size: u32, fonts: Arc<FontCache>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            tile_size,
            fonts,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// File a fingerprint is stored under.
    pub fn cache_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.png", key_file_stem(key)))
    }

    pub fn is_cached(&self, key: &str) -> bool {
        self.cache_path(key).is_file()
    }

    /// Persists `image` under `key` unless an entry already exists.
    pub fn store(&self, key: &str, image: &RgbImage) -> Result<PathBuf> {
        let path = self.cache_path(key);
        if path.is_file() {
            return Ok(path);
        }

        // Write then rename so readers never see a partial file
        let tmp = path.with_extension("png.tmp");
        image.save_with_format(&tmp, ImageFormat::Png)?;
        std::fs::rename(&tmp, &path)?;
        debug!("Cached tile {} at {}", key, path.display());
        Ok(path)
    }

    /// Returns the cached entry for `key`, rendering it once if missing.
    pub fn get_or_render<F>(&self, key: &str, render: F) -> Result<RenderedTile>
    where
        F: FnOnce() -> Result<RgbImage>,
    {
        let path = self.cache_path(key);
        let path = if path.is_file() {
            path
        } else {
            self.store(key, &render()?)?
        };
        Ok(RenderedTile {
            path,
            cache_key: key.to_string(),
        })
    }

    /// Fingerprint for a text tile.
    pub fn text_key(&self, text: &str, style: &TextStyle) -> String {
        format!(
            "text|{}|fs{}|fg{}|bg{}|w{}|ts{}",
            text, style.font_size, style.fg, style.bg, style.wrap, self.tile_size
        )
    }

    /// Centred text tile.
    pub fn text_tile(&self, text: &str, style: &TextStyle) -> Result<RenderedTile> {
        let key = self.text_key(text, style);
        self.get_or_render(&key, || {
            render_text(&self.fonts, text, style, self.tile_size)
        })
    }

    /// Solid colour tile. The same colour always maps to the same entry.
    pub fn solid_tile(&self, color: &str) -> Result<RenderedTile> {
        let rgb = parse_color(color)?;
        let key = format!(
            "solid|{:02x}{:02x}{:02x}|ts{}",
            rgb[0], rgb[1], rgb[2], self.tile_size
        );
        self.get_or_render(&key, || {
            Ok(RgbImage::from_pixel(self.tile_size, self.tile_size, Rgb(rgb)))
        })
    }

    /// In-memory image tile, keyed by a hash of its pixels.
    pub fn image_tile(&self, image: &DynamicImage) -> Result<RenderedTile> {
        let rgb = image.to_rgb8();
        let mut hasher = blake3::Hasher::new();
        hasher.update(&rgb.width().to_le_bytes());
        hasher.update(&rgb.height().to_le_bytes());
        hasher.update(rgb.as_raw());
        let key = format!("image|{}|ts{}", hasher.finalize().to_hex(), self.tile_size);

        self.get_or_render(&key, || {
            if rgb.dimensions() == (self.tile_size, self.tile_size) {
                Ok(rgb.clone())
            } else {
                Ok(image::imageops::resize(
                    &rgb,
                    self.tile_size,
                    self.tile_size,
                    image::imageops::FilterType::Lanczos3,
                ))
            }
        })
    }

    /// Existing image file used as-is; its path is the content key.
    pub fn file_tile(&self, path: impl AsRef<Path>) -> Result<RenderedTile> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("image file not found: {}", path.display()),
            )));
        }
        Ok(RenderedTile {
            path: path.to_path_buf(),
            cache_key: format!("file|{}", path.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache(dir: &TempDir) -> RenderCache {
        RenderCache::new(dir.path().join("tiles"), 112, Arc::new(FontCache::empty())).unwrap()
    }

    #[test]
    fn test_cache_path() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let path = cache.cache_path("test|Hello|fs24|fgwhite|bgblack|wFalse|ts112");

        assert_eq!(path.parent().unwrap(), cache.dir());
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with(".png"));
        assert!(name.starts_with("test_Hello_fs24_fgwhite_bg"));
        assert!(!cache.is_cached("test|Hello|fs24|fgwhite|bgblack|wFalse|ts112"));
    }

    #[test]
    fn test_store_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let img = RgbImage::from_pixel(112, 112, Rgb([255, 0, 0]));

        let first = cache.store("test|idempotent", &img).unwrap();
        let mtime1 = std::fs::metadata(&first).unwrap().modified().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let second = cache.store("test|idempotent", &img).unwrap();
        let mtime2 = std::fs::metadata(&second).unwrap().modified().unwrap();

        assert_eq!(first, second);
        assert_eq!(mtime1, mtime2);
        assert_eq!(image::open(&first).unwrap().width(), 112);
    }

    #[test]
    fn test_text_tile_reused() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let style = TextStyle::default();

        let a = cache.text_tile("Hello", &style).unwrap();
        let b = cache.text_tile("Hello", &style).unwrap();
        assert_eq!(a, b);
        assert!(a.path.is_file());
        assert_eq!(a.cache_key, "text|Hello|fs24|fgwhite|bgblack|wfalse|ts112");

        let bigger = TextStyle {
            font_size: 32.0,
            ..style
        };
        let c = cache.text_tile("Hello", &bigger).unwrap();
        assert_ne!(a.path, c.path);
        assert!(a.path.is_file() && c.path.is_file());
    }

    #[test]
    fn test_render_called_once() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let mut renders = 0;
        for _ in 0..3 {
            cache
                .get_or_render("test|once", || {
                    renders += 1;
                    Ok(RgbImage::new(112, 112))
                })
                .unwrap();
        }
        assert_eq!(renders, 1);
    }

    #[test]
    fn test_solid_tile_same_color_same_path() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let a = cache.solid_tile("black").unwrap();
        let b = cache.solid_tile("#000000").unwrap();
        assert_eq!(a, b);
        assert_ne!(a.path, cache.solid_tile("red").unwrap().path);
    }

    #[test]
    fn test_image_tile_resized_and_hashed() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([0, 0, 255])));

        let a = cache.image_tile(&img).unwrap();
        let b = cache.image_tile(&img.clone()).unwrap();
        assert_eq!(a, b);
        assert_eq!(image::open(&a.path).unwrap().width(), 112);

        let other = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([0, 255, 0])));
        assert_ne!(cache.image_tile(&other).unwrap().cache_key, a.cache_key);
    }

    #[test]
    fn test_file_tile_passthrough() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let src = dir.path().join("cover.png");
        RgbImage::new(112, 112).save(&src).unwrap();

        let tile = cache.file_tile(&src).unwrap();
        assert_eq!(tile.path, src);
        assert!(cache.file_tile(dir.path().join("missing.png")).is_err());
    }
}
