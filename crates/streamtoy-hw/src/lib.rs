//! StreamToy Hardware Library
//!
//! Provides the wire protocol and transports for the 15-key button dock
//! (3×5 image tiles) and the 90-pixel RGB LED strip wrapped around it.

pub mod dock;
pub mod error;
pub mod led;

pub use dock::{ButtonEvent, DockDevice, DockTransport, FrameEvent, HidTransport, MemoryTransport};
pub use error::{Error, Result};
pub use led::{FakeStrip, PixelStrip, Segment, SerialStrip, RGB8};

/// Number of tile rows on the dock.
pub const GRID_ROWS: u8 = 3;
/// Number of tile columns on the dock.
pub const GRID_COLS: u8 = 5;
/// Number of physical buttons (numbered 1-15).
pub const BUTTON_COUNT: u8 = GRID_ROWS * GRID_COLS;

/// Number of LEDs on the strip.
pub const LED_COUNT: usize = 90;

/// Default USB VID:PID for the dock.
pub const DOCK_VID: u16 = 0x6603;
pub const DOCK_PID: u16 = 0x1005;
