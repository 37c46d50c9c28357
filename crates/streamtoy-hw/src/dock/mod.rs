//! Button dock module.
//!
//! Provides image upload and key input for the 15-key dock via USB HID.

mod device;
mod transport;

pub mod keymap;
pub mod protocol;

pub use device::DockDevice;
pub use protocol::{ButtonEvent, FrameEvent};
pub use transport::{DockTransport, HidTransport, MemoryTransport};
