//! Error types for the StreamToy hardware library.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when interacting with the hardware.
#[derive(Error, Debug)]
pub enum Error {
    /// Dock not found or could not be opened.
    #[error("button dock not found (VID:PID {vid:04X}:{pid:04X})")]
    DockNotFound { vid: u16, pid: u16 },

    /// LED controller not found at the configured serial port.
    #[error("LED controller not found at {0}")]
    LedNotFound(String),

    /// USB HID communication error.
    #[error("USB HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    /// Serial port communication error.
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Serial I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key number outside the physical button range.
    #[error("Invalid key number: {0}")]
    InvalidKey(u8),

    /// Tile position outside the 3×5 grid.
    #[error("Invalid tile ({row}, {col})")]
    InvalidTile { row: u8, col: u8 },

    /// Image payload does not fit the length field of the protocol.
    #[error("Image payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Unknown LED segment name.
    #[error("Invalid LED segment: {0}")]
    InvalidSegment(String),

    /// Short write on the transport.
    #[error("Short write: wrote {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
}
