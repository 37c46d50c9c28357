//! LED strip module.
//!
//! The strip is a fixed run of RGB pixels split into named segments. Drivers
//! implement [`PixelStrip`]; [`FakeStrip`] keeps the frame in memory and
//! [`SerialStrip`] streams it to a serial-attached controller.

mod segment;
mod serial;
mod strip;

pub use segment::Segment;
pub use serial::{adalight_frame, SerialStrip};
pub use strip::{FakeStrip, PixelStrip};
pub use smart_leds::RGB8;
