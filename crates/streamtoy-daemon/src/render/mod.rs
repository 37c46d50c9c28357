//! Tile rendering and the content-addressed render cache.

mod cache;
mod color;
mod font;
mod text;

pub use cache::{key_file_stem, sanitize_key, RenderCache, RenderedTile};
pub use color::{parse_color, to_led};
pub use font::{FontCache, Glyph};
pub use text::{render_text, TextStyle};
