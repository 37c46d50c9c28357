//! Tile grid geometry and authoritative slot contents.

use crate::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use streamtoy_hw::{GRID_COLS, GRID_ROWS};

/// Number of tile rows.
pub const ROWS: usize = GRID_ROWS as usize;

/// Number of tile columns.
pub const COLS: usize = GRID_COLS as usize;

/// Number of tile slots.
pub const TILE_COUNT: usize = ROWS * COLS;

/// A validated tile position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TilePos {
    pub row: u8,
    pub col: u8,
}

impl TilePos {
    /// Validates a coordinate. Out-of-range values are rejected, never
    /// clamped.
    pub fn new(row: usize, col: usize) -> Result<Self> {
        if row < ROWS && col < COLS {
            Ok(Self {
                row: row as u8,
                col: col as u8,
            })
        } else {
            Err(Error::InvalidCoordinate { row, col })
        }
    }

    /// Flat index in row-major order.
    pub fn index(&self) -> usize {
        self.row as usize * COLS + self.col as usize
    }

    /// Every position in row-major order.
    pub fn all() -> impl Iterator<Item = TilePos> {
        (0..ROWS).flat_map(|row| {
            (0..COLS).map(move |col| TilePos {
                row: row as u8,
                col: col as u8,
            })
        })
    }
}

impl fmt::Display for TilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// What a tile slot shows: a source image and its content key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileState {
    pub source: PathBuf,
    pub cache_key: String,
}

impl TileState {
    pub fn new(source: impl Into<PathBuf>, cache_key: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            cache_key: cache_key.into(),
        }
    }

    /// Key used to decide whether a slot changed: the cache key, or the
    /// source path when no key was given.
    pub fn content_key(&self) -> String {
        content_key(&self.source, &self.cache_key)
    }
}

/// Dedup key for a `(source, cache_key)` pair.
pub fn content_key(source: &Path, cache_key: &str) -> String {
    if cache_key.is_empty() {
        source.to_string_lossy().into_owned()
    } else {
        cache_key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_pos_bounds() {
        assert!(TilePos::new(0, 0).is_ok());
        assert!(TilePos::new(2, 4).is_ok());
        assert!(matches!(
            TilePos::new(3, 0),
            Err(Error::InvalidCoordinate { row: 3, col: 0 })
        ));
        assert!(TilePos::new(0, 5).is_err());
        assert!(TilePos::new(usize::MAX, 0).is_err());
    }

    #[test]
    fn test_all_positions() {
        let all: Vec<_> = TilePos::all().collect();
        assert_eq!(all.len(), TILE_COUNT);
        assert_eq!(all[0], TilePos { row: 0, col: 0 });
        assert_eq!(all[7].index(), 7);
        assert_eq!(all[14], TilePos { row: 2, col: 4 });
    }

    #[test]
    fn test_content_key_fallback() {
        assert_eq!(TileState::new("a.png", "k1").content_key(), "k1");
        assert_eq!(TileState::new("a.png", "").content_key(), "a.png");
    }
}
