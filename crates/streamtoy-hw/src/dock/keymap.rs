//! Button numbering and key remapping.
//!
//! Tiles are addressed as `(row, col)` with row 0 at the top. Physical
//! buttons are numbered 1-15 left to right, top to bottom. The dock firmware
//! inverts row order on the wire, so both raw input indices and key numbers
//! for image writes pass through [`remap`] before use.

use crate::{Error, Result, BUTTON_COUNT, GRID_COLS, GRID_ROWS};

/// Vendor remap table, indexed by key number (index 0 unused).
///
/// The table is an involution: applying it twice yields the input.
const KEY_REMAP: [u8; 16] = [0, 11, 12, 13, 14, 15, 6, 7, 8, 9, 10, 1, 2, 3, 4, 5];

/// Applies the vendor row inversion to a key number in `1..=15`.
pub fn remap(key: u8) -> Option<u8> {
    if (1..=BUTTON_COUNT).contains(&key) {
        Some(KEY_REMAP[key as usize])
    } else {
        None
    }
}

/// Converts a tile position to its physical button number (1-15).
pub fn tile_to_button(row: u8, col: u8) -> Option<u8> {
    if row < GRID_ROWS && col < GRID_COLS {
        Some(row * GRID_COLS + col + 1)
    } else {
        None
    }
}

/// Converts a tile position to the key number the dock expects in image
/// writes.
pub fn tile_to_wire_key(row: u8, col: u8) -> Result<u8> {
    let button = tile_to_button(row, col).ok_or(Error::InvalidTile { row, col })?;
    remap(button).ok_or(Error::InvalidKey(button))
}

/// Converts a logical (post-remap) input index to a tile position.
///
/// `11..=15` map to the top row, `6..=10` to the middle row and `1..=5` to
/// the bottom row.
pub fn logical_to_tile(index: u8) -> Option<(u8, u8)> {
    if !(1..=BUTTON_COUNT).contains(&index) {
        return None;
    }
    let zero_based = index - 1;
    let row = GRID_ROWS - 1 - zero_based / GRID_COLS;
    let col = zero_based % GRID_COLS;
    Some((row, col))
}

/// Converts a raw input index straight from the wire to a tile position.
pub fn raw_to_tile(raw: u8) -> Option<(u8, u8)> {
    remap(raw).and_then(logical_to_tile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remap_is_involution() {
        for key in 1..=15 {
            let once = remap(key).unwrap();
            assert_eq!(remap(once), Some(key));
        }
        assert_eq!(remap(0), None);
        assert_eq!(remap(16), None);
        assert_eq!(remap(0xFF), None);
    }

    #[test]
    fn test_logical_to_tile_rows() {
        assert_eq!(logical_to_tile(11), Some((0, 0)));
        assert_eq!(logical_to_tile(15), Some((0, 4)));
        assert_eq!(logical_to_tile(6), Some((1, 0)));
        assert_eq!(logical_to_tile(10), Some((1, 4)));
        assert_eq!(logical_to_tile(1), Some((2, 0)));
        assert_eq!(logical_to_tile(5), Some((2, 4)));
        assert_eq!(logical_to_tile(0), None);
        assert_eq!(logical_to_tile(16), None);
    }

    #[test]
    fn test_raw_top_row_maps_to_top_tiles() {
        // Raw 1-5 are remapped to 11-15, which land on row 0.
        assert_eq!(raw_to_tile(1), Some((0, 0)));
        assert_eq!(raw_to_tile(3), Some((0, 2)));
        assert_eq!(raw_to_tile(8), Some((1, 2)));
        assert_eq!(raw_to_tile(15), Some((2, 4)));
    }

    #[test]
    fn test_tile_to_button() {
        assert_eq!(tile_to_button(0, 0), Some(1));
        assert_eq!(tile_to_button(1, 2), Some(8));
        assert_eq!(tile_to_button(2, 4), Some(15));
        assert_eq!(tile_to_button(3, 0), None);
        assert_eq!(tile_to_button(0, 5), None);
    }

    #[test]
    fn test_wire_key_inverts_rows() {
        assert_eq!(tile_to_wire_key(0, 0).unwrap(), 11);
        assert_eq!(tile_to_wire_key(1, 1).unwrap(), 7);
        assert_eq!(tile_to_wire_key(2, 4).unwrap(), 5);
        assert!(tile_to_wire_key(3, 0).is_err());
    }
}
