//! Text tile rendering using fontdue over a tiny-skia pixmap.

use super::color::parse_color;
use super::font::FontCache;
use crate::{Error, Result};
use image::RgbImage;
use tiny_skia::{Color, Pixmap};

/// Inputs for a text tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub font_size: f32,
    pub fg: String,
    pub bg: String,
    /// Word-wrap lines wider than the tile.
    pub wrap: bool,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_size: 24.0,
            fg: "white".to_string(),
            bg: "black".to_string(),
            wrap: false,
        }
    }
}

/// Margin kept free on each side when wrapping.
const WRAP_MARGIN: f32 = 4.0;

fn wrap_line(fonts: &FontCache, line: &str, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in line.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };
        if !current.is_empty() && fonts.measure(&candidate, size) > max_width {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        } else {
            current = candidate;
        }
    }
    lines.push(current);
    lines
}

fn layout(fonts: &FontCache, text: &str, style: &TextStyle, tile_size: u32) -> Vec<String> {
    let max_width = tile_size as f32 - 2.0 * WRAP_MARGIN;
    text.lines()
        .flat_map(|line| {
            if style.wrap {
                wrap_line(fonts, line, style.font_size, max_width)
            } else {
                vec![line.to_string()]
            }
        })
        .collect()
}

/// Blends glyph coverage into an opaque RGBA pixmap.
fn draw_line(pixmap: &mut Pixmap, fonts: &FontCache, line: &str, x: f32, baseline: f32, size: f32, fg: [u8; 3]) {
    let width = pixmap.width() as i32;
    let height = pixmap.height() as i32;
    let data = pixmap.data_mut();

    let mut cursor_x = x;
    for ch in line.chars() {
        let Some(glyph) = fonts.glyph(ch, size) else {
            continue;
        };
        let m = &glyph.metrics;
        let left = cursor_x.round() as i32 + m.xmin;
        let top = baseline.round() as i32 - m.height as i32 - m.ymin;

        for gy in 0..m.height {
            for gx in 0..m.width {
                let coverage = glyph.coverage[gy * m.width + gx];
                if coverage == 0 {
                    continue;
                }
                let px = left + gx as i32;
                let py = top + gy as i32;
                if px < 0 || py < 0 || px >= width || py >= height {
                    continue;
                }
                let idx = (py * width + px) as usize * 4;
                let alpha = coverage as f32 / 255.0;
                for c in 0..3 {
                    data[idx + c] =
                        (fg[c] as f32 * alpha + data[idx + c] as f32 * (1.0 - alpha)) as u8;
                }
                data[idx + 3] = 255;
            }
        }
        cursor_x += m.advance_width;
    }
}

/// Renders centred text onto a square tile.
pub fn render_text(fonts: &FontCache, text: &str, style: &TextStyle, tile_size: u32) -> Result<RgbImage> {
    let fg = parse_color(&style.fg)?;
    let bg = parse_color(&style.bg)?;

    let mut pixmap = Pixmap::new(tile_size, tile_size)
        .ok_or_else(|| Error::Render(format!("invalid tile size {}", tile_size)))?;
    pixmap.fill(Color::from_rgba8(bg[0], bg[1], bg[2], 255));

    if fonts.has_font() {
        let lines = layout(fonts, text, style, tile_size);
        let (ascent, line_height) = fonts.line_metrics(style.font_size);
        let block_height = line_height * lines.len() as f32;
        let top = (tile_size as f32 - block_height) / 2.0;

        for (i, line) in lines.iter().enumerate() {
            let width = fonts.measure(line, style.font_size);
            let x = (tile_size as f32 - width) / 2.0;
            let baseline = top + ascent + i as f32 * line_height;
            draw_line(&mut pixmap, fonts, line, x, baseline, style.font_size, fg);
        }
    }

    let rgb: Vec<u8> = pixmap
        .data()
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();
    RgbImage::from_raw(tile_size, tile_size, rgb)
        .ok_or_else(|| Error::Render("pixmap size mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fontless_render_is_background() {
        let fonts = FontCache::empty();
        let style = TextStyle {
            bg: "#102030".to_string(),
            ..TextStyle::default()
        };
        let img = render_text(&fonts, "Hello", &style, 112).unwrap();
        assert_eq!(img.dimensions(), (112, 112));
        assert!(img.pixels().all(|p| p.0 == [0x10, 0x20, 0x30]));
    }

    #[test]
    fn test_bad_color_rejected() {
        let style = TextStyle {
            fg: "nope".to_string(),
            ..TextStyle::default()
        };
        assert!(render_text(&FontCache::empty(), "x", &style, 112).is_err());
    }

    #[test]
    fn test_unwrapped_layout_keeps_lines() {
        let fonts = FontCache::empty();
        let lines = layout(&fonts, "one\ntwo", &TextStyle::default(), 112);
        assert_eq!(lines, vec!["one", "two"]);
    }
}
