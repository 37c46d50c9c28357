//! Font loading and glyph cache.

use crate::{Error, Result};
use fontdue::{Font, FontSettings, Metrics};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// A rasterised glyph.
pub struct Glyph {
    pub metrics: Metrics,
    pub coverage: Vec<u8>,
}

/// Loaded font plus rasterised glyphs keyed by character and pixel size.
///
/// Constructed once at startup and shared by every renderer.
pub struct FontCache {
    font: Option<Font>,
    glyphs: Mutex<HashMap<(char, u32), Arc<Glyph>>>,
}

impl FontCache {
    /// Loads the first usable font from `paths`.
    ///
    /// With no usable font the cache still works, but text renders as
    /// background only.
    pub fn load(paths: &[PathBuf]) -> Self {
        for path in paths {
            match Self::from_file(path) {
                Ok(cache) => {
                    info!("Loaded font {}", path.display());
                    return cache;
                }
                Err(e) => debug!("Skipping font {}: {}", path.display(), e),
            }
        }
        warn!("No usable font found, text tiles will be blank");
        Self::empty()
    }

    /// Loads a font file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Parses font bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| Error::Render(e.to_string()))?;
        Ok(Self {
            font: Some(font),
            glyphs: Mutex::new(HashMap::new()),
        })
    }

    /// A cache with no font.
    pub fn empty() -> Self {
        Self {
            font: None,
            glyphs: Mutex::new(HashMap::new()),
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Rasterises `ch` at `size` pixels, reusing earlier work.
    pub fn glyph(&self, ch: char, size: f32) -> Option<Arc<Glyph>> {
        let font = self.font.as_ref()?;
        let key = (ch, size.to_bits());

        let mut glyphs = self.glyphs.lock().unwrap_or_else(PoisonError::into_inner);
        let glyph = glyphs.entry(key).or_insert_with(|| {
            let (metrics, coverage) = font.rasterize(ch, size);
            Arc::new(Glyph { metrics, coverage })
        });
        Some(Arc::clone(glyph))
    }

    /// Horizontal advance of `text` at `size`.
    pub fn measure(&self, text: &str, size: f32) -> f32 {
        text.chars()
            .filter_map(|ch| self.glyph(ch, size))
            .map(|g| g.metrics.advance_width)
            .sum()
    }

    /// `(ascent, line height)` at `size`.
    pub fn line_metrics(&self, size: f32) -> (f32, f32) {
        self.font
            .as_ref()
            .and_then(|f| f.horizontal_line_metrics(size))
            .map(|m| (m.ascent, m.new_line_size))
            .unwrap_or((size * 0.8, size * 1.2))
    }

    /// Number of cached glyphs.
    pub fn cached_glyphs(&self) -> usize {
        self.glyphs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
