//! StreamToy runtime core.
//!
//! Keeps tile and LED state consistent across every attached viewer (the
//! USB dock and the browser emulator), classifies button input, and drives
//! the LED strip animation engine.

pub mod config;
pub mod display;
pub mod error;
pub mod grid;
pub mod input;
pub mod led;
pub mod render;
pub mod runtime;
pub mod scenes;
pub mod util;
pub mod viewer;

pub use config::Config;
pub use display::DisplayStateManager;
pub use error::{Error, Result};
pub use grid::{TilePos, TileState};
pub use input::{InputEvent, InputManager};
pub use led::LedManager;
pub use render::RenderCache;
pub use viewer::{Viewer, ViewerKind};
