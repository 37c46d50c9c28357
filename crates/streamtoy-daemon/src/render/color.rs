//! Colour parsing for tiles and LEDs.

use crate::{Error, Result};
use streamtoy_hw::RGB8;

const NAMED: &[(&str, [u8; 3])] = &[
    ("black", [0, 0, 0]),
    ("white", [255, 255, 255]),
    ("red", [255, 0, 0]),
    ("green", [0, 128, 0]),
    ("lime", [0, 255, 0]),
    ("blue", [0, 0, 255]),
    ("yellow", [255, 255, 0]),
    ("cyan", [0, 255, 255]),
    ("magenta", [255, 0, 255]),
    ("orange", [255, 165, 0]),
    ("purple", [128, 0, 128]),
    ("pink", [255, 192, 203]),
    ("gray", [128, 128, 128]),
    ("grey", [128, 128, 128]),
    ("darkgray", [64, 64, 64]),
    ("navy", [0, 0, 128]),
];

/// Parses a colour name, `#RRGGBB` or `#RGB`.
pub fn parse_color(s: &str) -> Result<[u8; 3]> {
    let invalid = || Error::InvalidColor(s.to_string());
    let trimmed = s.trim();

    if let Some(&(_, rgb)) = NAMED
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(trimmed))
    {
        return Ok(rgb);
    }

    let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
    // from_str_radix alone would accept a sign
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());
    match hex.len() {
        6 => Ok([
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
        ]),
        3 => {
            let mut rgb = [0u8; 3];
            for (i, out) in rgb.iter_mut().enumerate() {
                *out = channel(&hex[i..i + 1])? * 0x11;
            }
            Ok(rgb)
        }
        _ => Err(invalid()),
    }
}

/// Converts a parsed colour to an LED pixel.
pub fn to_led(rgb: [u8; 3]) -> RGB8 {
    RGB8::new(rgb[0], rgb[1], rgb[2])
}
